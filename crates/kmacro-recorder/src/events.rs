//! Macro events and the event log they are recorded into
//!
//! Events serialize to compact tagged JSON, one object per line in storage:
//!   {"e":"k","code":104,"modifiers":1,"character":"H"}
//!   {"e":"c","id":"forward-char","parameters":{"repeat-count":"3"}}

use kmacro_core::{KeyStroke, Modifiers, Parameters};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A single recorded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "e")]
pub enum MacroEvent {
    /// Literal character insertion
    #[serde(rename = "k")]
    Key {
        code: u32,
        #[serde(default, skip_serializing_if = "Modifiers::is_empty")]
        modifiers: Modifiers,
        character: char,
    },

    /// Modified keystroke that may turn out to start a key binding
    #[serde(rename = "p")]
    SubCommandKey {
        code: u32,
        #[serde(default, skip_serializing_if = "Modifiers::is_empty")]
        modifiers: Modifiers,
    },

    /// Host command with its invocation parameters
    #[serde(rename = "c")]
    Command {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<Parameters>,
    },

    /// Dismiss the active prompt before continuing
    #[serde(rename = "x")]
    MinibufferExit,
}

impl MacroEvent {
    /// Classify a raw keystroke: literal keys are final, anything else is provisional
    pub fn from_key(key: &KeyStroke) -> Self {
        match key.character {
            Some(character) if key.is_literal() => MacroEvent::Key {
                code: key.code,
                modifiers: key.modifiers,
                character,
            },
            _ => MacroEvent::SubCommandKey {
                code: key.code,
                modifiers: key.modifiers,
            },
        }
    }

    /// Command event; empty parameter maps are stored as no parameters
    pub fn command(id: impl Into<String>, parameters: Option<Parameters>) -> Self {
        MacroEvent::Command {
            id: id.into(),
            parameters: parameters.filter(|p| !p.is_empty()),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, MacroEvent::SubCommandKey { .. })
    }

    pub fn is_command(&self, command_id: &str) -> bool {
        matches!(self, MacroEvent::Command { id, .. } if id == command_id)
    }

    /// The keystroke behind a key event
    pub fn keystroke(&self) -> Option<KeyStroke> {
        match self {
            MacroEvent::Key { code, modifiers, character } => {
                Some(KeyStroke::new(*code, *modifiers, Some(*character)))
            }
            MacroEvent::SubCommandKey { code, modifiers } => {
                Some(KeyStroke::new(*code, *modifiers, None))
            }
            _ => None,
        }
    }

    pub fn character(&self) -> Option<char> {
        match self {
            MacroEvent::Key { character, .. } => Some(*character),
            _ => None,
        }
    }
}

impl fmt::Display for MacroEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroEvent::Key { character, .. } => match character {
                ' ' => f.write_str("SPC"),
                c => write!(f, "{}", c),
            },
            MacroEvent::SubCommandKey { code, modifiers } => {
                write!(f, "{}?", KeyStroke::new(*code, *modifiers, None))
            }
            MacroEvent::Command { id, parameters } => {
                f.write_str(id)?;
                if let Some(params) = parameters {
                    let joined: Vec<String> =
                        params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    write!(f, "[{}]", joined.join(" "))?;
                }
                Ok(())
            }
            MacroEvent::MinibufferExit => f.write_str("<minibuffer-exit>"),
        }
    }
}

/// Ordered macro events; owned by exactly one holder at a time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<MacroEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<MacroEvent>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, event: MacroEvent) {
        self.events.push(event);
    }

    pub fn pop(&mut self) -> Option<MacroEvent> {
        self.events.pop()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[MacroEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MacroEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&MacroEvent> {
        self.events.last()
    }

    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    pub fn into_events(self) -> Vec<MacroEvent> {
        self.events
    }

    /// Drop the last `remove` events and append `replacement` in their place.
    /// Returns how many events were actually removed.
    pub fn rewrite_tail<I>(&mut self, remove: usize, replacement: I) -> usize
    where
        I: IntoIterator<Item = MacroEvent>,
    {
        let removed = remove.min(self.events.len());
        self.events.truncate(self.events.len() - removed);
        self.events.extend(replacement);
        removed
    }

    /// Remove a range of events, clamped to the log
    pub fn remove_range(&mut self, range: Range<usize>) -> usize {
        let end = range.end.min(self.events.len());
        let start = range.start.min(end);
        self.events.drain(start..end).count()
    }

    /// Number of trailing key events matching `keys` (all or nothing).
    /// Literal and provisional entries both count; the produced character is ignored.
    pub fn tail_matches_keys(&self, keys: &[KeyStroke]) -> usize {
        if keys.is_empty() || keys.len() > self.events.len() {
            return 0;
        }
        let tail = &self.events[self.events.len() - keys.len()..];
        let all = tail.iter().zip(keys).all(|(event, key)| {
            event
                .keystroke()
                .map_or(false, |k| k.same_key(key.code, key.modifiers))
        });
        if all { keys.len() } else { 0 }
    }

    /// Provisional keys left in the log
    pub fn provisional_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_provisional()).count()
    }

    /// One event per line
    pub fn to_lines(&self) -> String {
        self.events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Comma-joined single line, for status messages
    pub fn to_compact(&self) -> String {
        self.events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lines())
    }
}

impl FromIterator<MacroEvent> for EventLog {
    fn from_iter<T: IntoIterator<Item = MacroEvent>>(iter: T) -> Self {
        Self { events: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a MacroEvent;
    type IntoIter = std::slice::Iter<'a, MacroEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
