//! Turns host notifications into a corrected event log
//!
//! The host calls in three places while a macro is being defined:
//!
//! - `on_key_event` for every raw keystroke, before its own dispatch runs
//! - `check_binding` / `check_trigger` once it knows which command the
//!   recent keys resolved to
//! - `on_pre_execute` / `on_post_execute_*` around every command it runs
//!
//! Keystrokes with command modifiers are logged provisionally and rewritten
//! into `MinibufferExit` + `Command` when a binding claims them.

use crate::config::CommandIds;
use crate::events::{EventLog, MacroEvent};
use kmacro_core::{DocumentChange, KeyStroke, Parameters};

/// A complete key binding reported by the host's resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub keys: Vec<KeyStroke>,
    pub command_id: String,
    pub parameters: Option<Parameters>,
}

impl Binding {
    pub fn new(keys: Vec<KeyStroke>, command_id: impl Into<String>) -> Self {
        Self { keys, command_id: command_id.into(), parameters: None }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Pre-execute context waiting for its post notification
#[derive(Debug, Clone)]
struct Frame {
    command_id: String,
    parameters: Option<Parameters>,
}

/// Entries appended for a resolved binding, starting at `start`
#[derive(Debug, Clone)]
struct Armed {
    command_id: String,
    start: usize,
}

#[derive(Debug)]
pub struct Recorder {
    commands: CommandIds,
    defining: bool,
    appending: bool,
    log: EventLog,
    frames: Vec<Frame>,
    armed: Option<Armed>,
    /// Log length when the extended-command prompt opened
    extended: Option<usize>,
    pending_changes: Vec<DocumentChange>,
}

impl Recorder {
    pub fn new(commands: CommandIds) -> Self {
        Self {
            commands,
            defining: false,
            appending: false,
            log: EventLog::new(),
            frames: Vec::new(),
            armed: None,
            extended: None,
            pending_changes: Vec::new(),
        }
    }

    pub fn is_defining(&self) -> bool {
        self.defining
    }

    pub fn is_appending(&self) -> bool {
        self.defining && self.appending
    }

    /// The log being defined
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Begin defining; `initial` is empty unless appending to an earlier macro
    pub fn start(&mut self, initial: EventLog, appending: bool) {
        self.reset();
        self.log = initial;
        self.defining = true;
        self.appending = appending;
        tracing::debug!(appending, events = self.log.len(), "macro definition started");
    }

    /// Stop defining and hand over the finished log
    pub fn finish(&mut self) -> EventLog {
        self.auto_fix();
        let log = std::mem::take(&mut self.log);
        let provisional = log.provisional_count();
        if provisional > 0 {
            tracing::warn!(provisional, "unresolved provisional keys replay as raw keys");
        }
        self.reset();
        log
    }

    /// Stop defining and drop everything recorded
    pub fn discard(&mut self) {
        tracing::debug!(events = self.log.len(), "macro definition discarded");
        self.log = EventLog::new();
        self.reset();
    }

    fn reset(&mut self) {
        self.defining = false;
        self.appending = false;
        self.frames.clear();
        self.armed = None;
        self.extended = None;
        self.pending_changes.clear();
    }

    pub fn on_document_change(&mut self, change: DocumentChange) {
        if self.defining {
            self.pending_changes.push(change);
        }
    }

    pub fn on_key_event(&mut self, key: &KeyStroke) {
        if !self.defining {
            return;
        }
        self.auto_fix();
        let event = MacroEvent::from_key(key);
        tracing::trace!(%key, provisional = event.is_provisional(), "key recorded");
        self.log.push(event);
    }

    pub fn on_pre_execute(&mut self, command_id: &str, parameters: Option<&Parameters>) {
        if !self.defining {
            return;
        }
        self.auto_fix();

        let carries_count = parameters
            .map_or(false, |p| p.contains_key(&self.commands.repeat_count));
        if self.frames.is_empty() && carries_count && !self.commands.is_prefix_argument(command_id)
        {
            self.strip_universal_prefix(command_id);
        }

        self.frames.push(Frame {
            command_id: command_id.to_string(),
            parameters: parameters.cloned(),
        });
    }

    pub fn on_post_execute_success(&mut self, command_id: &str) {
        if !self.defining {
            return;
        }
        let Some(frame) = self.pop_frame(command_id) else {
            tracing::trace!(command_id, "post-execute without matching pre-execute");
            return;
        };
        if !self.frames.is_empty() {
            // run from inside another command
            return;
        }

        let ids = &self.commands;
        let extended = command_id == ids.extended_command;
        let quit = command_id == ids.keyboard_quit;
        let filtered = command_id == ids.end_call_marker || ids.is_exit(command_id);

        if extended {
            self.drop_armed(command_id);
            self.extended = Some(self.log.len());
        } else if quit {
            self.quit();
        } else if filtered {
            self.drop_armed(command_id);
        } else {
            self.record_command(frame);
        }
    }

    pub fn on_post_execute_failure(&mut self, command_id: &str) {
        self.unwind(command_id);
    }

    pub fn on_not_handled(&mut self, command_id: &str) {
        self.unwind(command_id);
    }

    /// The host found no binding for the trailing keys and ran nothing, so
    /// they are dropped rather than left provisional
    pub fn on_unbound(&mut self, keys: &[KeyStroke]) {
        if !self.defining {
            return;
        }
        let removed = self.log.rewrite_tail(self.log.tail_matches_keys(keys), []);
        tracing::debug!(keys = keys.len(), removed, "unbound keys dropped");
    }

    /// The keys at the end of the log resolved to a complete binding
    pub fn check_binding(&mut self, binding: &Binding) {
        if !self.defining {
            return;
        }
        let id = binding.command_id.as_str();
        let params = binding.parameters.clone();
        if self.commands.is_exit(id) {
            return self.check_trigger(id, params, &binding.keys, true);
        }
        if id == self.commands.call_macro || id == self.commands.call_named {
            return self.check_trigger(id, params, &binding.keys, false);
        }

        let removed = self.remove_trigger_keys(&binding.keys);
        let start = self.log.len();
        self.log.push(MacroEvent::MinibufferExit);
        self.log.push(MacroEvent::command(id, params));
        self.armed = Some(Armed { command_id: id.to_string(), start });
        tracing::debug!(command_id = id, removed, "provisional keys resolved to binding");
    }

    /// A command was triggered by keys that are not a full binding
    pub fn check_trigger(
        &mut self,
        command_id: &str,
        parameters: Option<Parameters>,
        trigger: &[KeyStroke],
        is_exit: bool,
    ) {
        if !self.defining {
            return;
        }
        let removed = self.remove_trigger_keys(trigger);
        let start = self.log.len();
        if removed > 0 {
            self.log.push(MacroEvent::MinibufferExit);
        }
        if !is_exit {
            self.log.push(MacroEvent::command(command_id, parameters));
            self.armed = Some(Armed { command_id: command_id.to_string(), start });
        }
        tracing::debug!(command_id, removed, is_exit, "trigger keys rewritten");
    }

    /// Remove the keys that produced a command: the matching tail when there
    /// is one, otherwise a single trailing provisional key
    fn remove_trigger_keys(&mut self, keys: &[KeyStroke]) -> usize {
        let matched = self.log.tail_matches_keys(keys);
        let remove = if matched > 0 {
            matched
        } else if self.log.last().map_or(false, MacroEvent::is_provisional) {
            tracing::debug!("binding keys not in log, resolving trailing provisional key");
            1
        } else {
            0
        };
        self.log.rewrite_tail(remove, [])
    }

    fn pop_frame(&mut self, command_id: &str) -> Option<Frame> {
        let pos = self.frames.iter().rposition(|f| f.command_id == command_id)?;
        // anything pushed after it never got its post notification
        self.frames.drain(pos..).next()
    }

    fn record_command(&mut self, frame: Frame) {
        let id = frame.command_id.clone();
        let event = MacroEvent::command(frame.command_id, frame.parameters);

        if let Some(mark) = self.extended.take() {
            // keys typed into the extended-command prompt are replaced by the command
            self.log.truncate(mark);
            self.armed = None;
            tracing::debug!(command_id = %id, "recorded extended command");
            self.log.push(event);
            return;
        }

        match self.armed.take() {
            Some(armed) if armed.command_id == id => {
                if self.log.last().map_or(false, |last| last.is_command(&id)) {
                    self.log.rewrite_tail(1, [event]);
                } else {
                    self.log.push(event);
                }
            }
            other => {
                self.armed = other;
                tracing::trace!(command_id = %id, "command not triggered by input, not recorded");
            }
        }
    }

    fn unwind(&mut self, command_id: &str) {
        if !self.defining || self.pop_frame(command_id).is_none() || !self.frames.is_empty() {
            return;
        }
        self.drop_armed(command_id);
        if let Some(mark) = self.extended.take() {
            self.log.truncate(mark);
        }
        tracing::debug!(command_id, "failed command removed from macro");
    }

    /// Remove entries appended for `command_id` by binding resolution
    fn drop_armed(&mut self, command_id: &str) {
        if let Some(armed) = self.armed.take() {
            if armed.command_id == command_id {
                self.log.truncate(armed.start);
            } else {
                self.armed = Some(armed);
            }
        }
    }

    fn quit(&mut self) {
        let quit_id = self.commands.keyboard_quit.clone();
        let armed_for_quit = self.armed.as_ref().map_or(false, |a| a.command_id == quit_id);
        if armed_for_quit {
            self.drop_armed(&quit_id);
        } else if self.log.last().map_or(false, MacroEvent::is_provisional) {
            self.log.pop();
        }
        self.armed = None;
        if let Some(mark) = self.extended.take() {
            self.log.truncate(mark);
        }
    }

    /// A command carrying the repeat count makes the universal-argument prefix
    /// that produced it redundant; recording both would apply the count twice.
    fn strip_universal_prefix(&mut self, command_id: &str) {
        let end = match (&self.armed, self.extended) {
            (_, Some(mark)) => mark,
            (Some(armed), None) if armed.command_id == command_id => armed.start,
            _ => self.log.len(),
        };

        let events = self.log.events();
        let ids = &self.commands;
        let mut i = end;
        let mut start = None;
        while i > 0 {
            match &events[i - 1] {
                MacroEvent::Command { id, .. } if *id == ids.universal_argument => {
                    start = Some(i - 1);
                }
                MacroEvent::Command { id, .. } if ids.is_prefix_argument(id) => {}
                MacroEvent::Key { character, .. }
                    if character.is_ascii_digit() || *character == '-' => {}
                MacroEvent::MinibufferExit => {}
                _ => break,
            }
            i -= 1;
        }

        let Some(mut start) = start else {
            return;
        };
        if start > 0 && events[start - 1] == MacroEvent::MinibufferExit {
            start -= 1;
        }

        let removed = self.log.remove_range(start..end);
        if let Some(armed) = self.armed.as_mut() {
            if armed.start >= end {
                armed.start -= removed;
            }
        }
        if let Some(mark) = self.extended.as_mut() {
            if *mark >= end {
                *mark -= removed;
            }
        }
        tracing::debug!(command_id, removed, "universal argument folded into command");
    }

    /// Record a character the editor inserted on its own (closing punctuation)
    /// so replay does not depend on the auto-insert firing again
    fn auto_fix(&mut self) {
        if self.pending_changes.is_empty() {
            return;
        }
        let changes = std::mem::take(&mut self.pending_changes);
        let Some(typed) = self.log.last().and_then(MacroEvent::character) else {
            return;
        };
        match auto_inserted_char(&changes, typed) {
            Some(extra) => {
                tracing::debug!(%typed, %extra, "recorded auto-inserted character");
                let mut params = Parameters::new();
                params.insert("text".into(), extra.to_string());
                self.log
                    .push(MacroEvent::command(self.commands.insert_matched.clone(), Some(params)));
            }
            None if changes.len() > 1 => {
                tracing::trace!(changes = changes.len(), "unrecognized editor changes left as is");
            }
            None => {}
        }
    }
}

/// Only the single character appended after the caret is recognized: either
/// one change inserting `typed` plus the companion with the caret between
/// them, or two single-char inserts with the caret left before the second.
fn auto_inserted_char(changes: &[DocumentChange], typed: char) -> Option<char> {
    fn single(change: &DocumentChange) -> Option<char> {
        let mut chars = change.inserted.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if change.is_pure_insert() => Some(c),
            _ => None,
        }
    }

    match changes {
        [change] if change.is_pure_insert() => {
            let mut chars = change.inserted.chars();
            match (chars.next(), chars.next(), chars.next()) {
                (Some(first), Some(extra), None)
                    if first == typed && change.caret == change.offset + 1 =>
                {
                    Some(extra)
                }
                _ => None,
            }
        }
        [first, second] => {
            let t = single(first)?;
            let extra = single(second)?;
            (t == typed && second.offset == first.offset + 1 && second.caret == second.offset)
                .then_some(extra)
        }
        _ => None,
    }
}
