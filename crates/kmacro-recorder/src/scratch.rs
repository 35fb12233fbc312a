//! In-memory host for the `km` tool and tests
//!
//! [`ScratchEditor`] is a small deterministic text buffer implementing
//! [`MacroHost`]. [`ScratchSession`] stands in for an editor's command
//! layer: it resolves key sequences against a [`Keymap`], collects prefix
//! arguments, runs the extended-command prompt and sends the engine the
//! notifications a real editor would.

use crate::config::CommandIds;
use crate::engine::MacroEngine;
use crate::events::EventLog;
use crate::recorder::Binding;
use kmacro_core::{
    key_codes, DocumentChange, Error, ErrorCode, Interrupt, KeyStroke, LoadFailure, MacroHost,
    Modifiers, Parameters, Result, ViewId,
};

/// The single view a scratch editor shows
pub const SCRATCH_VIEW: ViewId = ViewId(1);

const SELF_INSERT: &str = "self-insert-command";

/// Upper bound for repeat counts, whether typed after `C-u` or replayed
pub const MAX_REPEAT_COUNT: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Complete(&'a str),
    /// More keys are needed
    Prefix,
    Unbound,
}

/// Key sequence to command id bindings
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    bindings: Vec<(Vec<KeyStroke>, String)>,
}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emacs-like defaults for the editing commands `ScratchEditor` knows
    pub fn standard(commands: &CommandIds) -> Self {
        let fixed = [
            ("C-f", "forward-char"),
            ("C-b", "backward-char"),
            ("<right>", "forward-char"),
            ("<left>", "backward-char"),
            ("C-a", "move-beginning-of-line"),
            ("C-e", "move-end-of-line"),
            ("M-f", "forward-word"),
            ("M-u", "upcase-word"),
            ("RET", "newline"),
            ("TAB", "tab-to-tab-stop"),
            ("DEL", "delete-backward-char"),
            ("C-d", "delete-char"),
            ("C-x =", "what-cursor-position"),
        ];
        let engine = [
            ("C-u", &commands.universal_argument),
            ("M-x", &commands.extended_command),
            ("C-g", &commands.keyboard_quit),
            ("C-x (", &commands.start_macro),
            ("C-x )", &commands.end_macro),
            ("C-x e", &commands.end_and_call_macro),
            ("<f4>", &commands.call_macro),
        ];

        let mut map = Self::new();
        let all = fixed
            .iter()
            .map(|(k, id)| (*k, id.to_string()))
            .chain(engine.iter().map(|(k, id)| (*k, id.to_string())));
        for (keys, id) in all {
            if let Ok(keys) = KeyStroke::parse_sequence(keys) {
                map.insert(keys, id);
            }
        }
        map
    }

    pub fn bind(&mut self, keys: &str, command_id: impl Into<String>) -> Result<()> {
        let keys = KeyStroke::parse_sequence(keys)
            .map_err(|e| Error::new(ErrorCode::InvalidConfig, e.to_string()))?;
        if keys.is_empty() {
            return Err(Error::invalid_config("keys", "empty key sequence"));
        }
        self.insert(keys, command_id.into());
        Ok(())
    }

    fn insert(&mut self, keys: Vec<KeyStroke>, command_id: String) {
        self.bindings.retain(|(bound, _)| !same_keys(bound, &keys));
        self.bindings.push((keys, command_id));
    }

    pub fn resolve(&self, keys: &[KeyStroke]) -> Resolution<'_> {
        let mut prefix = false;
        for (bound, id) in &self.bindings {
            if bound.len() < keys.len() || !same_keys(&bound[..keys.len()], keys) {
                continue;
            }
            if bound.len() == keys.len() {
                return Resolution::Complete(id);
            }
            prefix = true;
        }
        if prefix {
            Resolution::Prefix
        } else {
            Resolution::Unbound
        }
    }
}

fn same_keys(a: &[KeyStroke], b: &[KeyStroke]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_key(y.code, y.modifiers))
}

fn describe(keys: &[KeyStroke]) -> String {
    keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(" ")
}

fn matching_close(c: char) -> Option<char> {
    match c {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        '"' => Some('"'),
        _ => None,
    }
}

/// Deterministic text buffer with a caret, a one-line prompt and counters
/// for everything the engine asks of its host
#[derive(Debug, Clone)]
pub struct ScratchEditor {
    commands: CommandIds,
    keymap: Keymap,
    text: Vec<char>,
    caret: usize,
    auto_pair: bool,
    minibuffer: Option<String>,
    redraw_enabled: bool,
    redraws: usize,
    status_suppressed: bool,
    messages: Vec<String>,
    beeps: usize,
    interrupt: Option<Interrupt>,
    interrupt_on: Option<String>,
    changes: Vec<DocumentChange>,
    load_failures: Vec<LoadFailure>,
}

impl Default for ScratchEditor {
    fn default() -> Self {
        Self::new(&CommandIds::default())
    }
}

impl ScratchEditor {
    pub fn new(commands: &CommandIds) -> Self {
        Self {
            commands: commands.clone(),
            keymap: Keymap::standard(commands),
            text: Vec::new(),
            caret: 0,
            auto_pair: false,
            minibuffer: None,
            redraw_enabled: true,
            redraws: 0,
            status_suppressed: false,
            messages: Vec::new(),
            beeps: 0,
            interrupt: None,
            interrupt_on: None,
            changes: Vec::new(),
            load_failures: Vec::new(),
        }
    }

    /// Replace the buffer contents, caret at the end
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.chars().collect();
        self.caret = self.text.len();
        self
    }

    /// Insert the closing partner after `(`, `[`, `{` and `"`
    pub fn set_auto_pair(&mut self, enabled: bool) {
        self.auto_pair = enabled;
    }

    /// Fire the subscribed interrupt whenever `command_id` runs
    pub fn interrupt_on(&mut self, command_id: impl Into<String>) {
        self.interrupt_on = Some(command_id.into());
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn keymap_mut(&mut self) -> &mut Keymap {
        &mut self.keymap
    }

    pub fn text(&self) -> String {
        self.text.iter().collect()
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn set_caret(&mut self, caret: usize) {
        self.caret = caret.min(self.text.len());
    }

    pub fn minibuffer(&self) -> Option<&str> {
        self.minibuffer.as_deref()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }

    pub fn beeps(&self) -> usize {
        self.beeps
    }

    pub fn redraws(&self) -> usize {
        self.redraws
    }

    pub fn redraw_enabled(&self) -> bool {
        self.redraw_enabled
    }

    pub fn status_suppressed(&self) -> bool {
        self.status_suppressed
    }

    pub fn load_failures(&self) -> &[LoadFailure] {
        &self.load_failures
    }

    /// Document changes since the last call
    pub fn take_changes(&mut self) -> Vec<DocumentChange> {
        std::mem::take(&mut self.changes)
    }

    /// Type a character, pairing it when auto-pair is on
    pub fn self_insert(&mut self, c: char) {
        let close = if self.auto_pair { matching_close(c) } else { None };
        match close {
            Some(close) => {
                let offset = self.caret;
                self.text.splice(offset..offset, [c, close]);
                self.caret = offset + 1;
                self.changes
                    .push(DocumentChange::insert(offset, format!("{}{}", c, close), self.caret));
            }
            None => self.insert(&c.to_string()),
        }
    }

    fn insert(&mut self, s: &str) {
        let offset = self.caret;
        let chars: Vec<char> = s.chars().collect();
        let n = chars.len();
        self.text.splice(offset..offset, chars);
        self.caret = offset + n;
        self.changes.push(DocumentChange::insert(offset, s, self.caret));
    }

    fn remove(&mut self, start: usize, end: usize) {
        self.text.drain(start..end);
        self.caret = start;
        self.changes.push(DocumentChange {
            offset: start,
            removed: end - start,
            inserted: String::new(),
            caret: start,
        });
    }

    fn line_start(&self) -> usize {
        self.text[..self.caret]
            .iter()
            .rposition(|c| *c == '\n')
            .map_or(0, |i| i + 1)
    }

    fn line_end(&self) -> usize {
        self.text[self.caret..]
            .iter()
            .position(|c| *c == '\n')
            .map_or(self.text.len(), |i| self.caret + i)
    }

    /// End of the next word after the caret
    fn word_end(&self) -> usize {
        let mut i = self.caret;
        while i < self.text.len() && !self.text[i].is_alphanumeric() {
            i += 1;
        }
        while i < self.text.len() && self.text[i].is_alphanumeric() {
            i += 1;
        }
        i
    }

    fn upcase_word(&mut self) {
        let start = self.caret;
        let end = self.word_end();
        let upper: String = self.text[start..end].iter().flat_map(|c| c.to_uppercase()).collect();
        let removed = end - start;
        self.text.splice(start..end, upper.chars());
        self.caret = start + upper.chars().count();
        if removed > 0 {
            self.changes.push(DocumentChange { offset: start, removed, inserted: upper, caret: self.caret });
        }
    }

    fn repeat_count(&self, params: Option<&Parameters>) -> usize {
        params
            .and_then(|p| p.get(&self.commands.repeat_count))
            .and_then(|v| v.parse::<usize>().ok())
            .map_or(1, |n| n.min(MAX_REPEAT_COUNT as usize))
    }

    fn minibuffer_push(&mut self, c: char) {
        if let Some(input) = self.minibuffer.as_mut() {
            input.push(c);
        }
    }

    fn minibuffer_pop(&mut self) {
        if let Some(input) = self.minibuffer.as_mut() {
            input.pop();
        }
    }
}

impl MacroHost for ScratchEditor {
    fn type_key(&mut self, key: &KeyStroke) -> Result<()> {
        match key.character {
            Some(c) if key.is_literal() => {
                if self.minibuffer.is_some() {
                    self.minibuffer_push(c);
                } else {
                    self.self_insert(c);
                }
                Ok(())
            }
            _ => self.process_key(key),
        }
    }

    fn process_key(&mut self, key: &KeyStroke) -> Result<()> {
        if key.is_literal() {
            return self.type_key(key);
        }
        let id = match self.keymap.resolve(std::slice::from_ref(key)) {
            Resolution::Complete(id) => id.to_string(),
            _ => return Err(Error::not_handled(&key.to_string())),
        };
        self.invoke(&id, None)
    }

    fn invoke(&mut self, id: &str, params: Option<&Parameters>) -> Result<()> {
        if self.interrupt_on.as_deref() == Some(id) {
            if let Some(signal) = &self.interrupt {
                signal.trigger();
            }
        }
        let count = self.repeat_count(params);

        match id {
            "forward-char" => {
                if self.caret + count > self.text.len() {
                    return Err(Error::command_failed(id, "End of buffer"));
                }
                self.caret += count;
            }
            "backward-char" => {
                if count > self.caret {
                    return Err(Error::command_failed(id, "Beginning of buffer"));
                }
                self.caret -= count;
            }
            "move-beginning-of-line" => self.caret = self.line_start(),
            "move-end-of-line" => self.caret = self.line_end(),
            "forward-word" => {
                for _ in 0..count {
                    self.caret = self.word_end();
                }
            }
            "upcase-word" => {
                for _ in 0..count {
                    self.upcase_word();
                }
            }
            "newline" => self.insert(&"\n".repeat(count)),
            "tab-to-tab-stop" => self.insert(&"\t".repeat(count)),
            SELF_INSERT => {
                let text = params
                    .and_then(|p| p.get("text"))
                    .ok_or_else(|| Error::command_failed(id, "nothing to insert"))?;
                self.insert(&text.repeat(count));
            }
            "delete-backward-char" => {
                if count > self.caret {
                    return Err(Error::command_failed(id, "Beginning of buffer"));
                }
                self.remove(self.caret - count, self.caret);
            }
            "delete-char" => {
                if self.caret + count > self.text.len() {
                    return Err(Error::command_failed(id, "End of buffer"));
                }
                self.remove(self.caret, self.caret + count);
            }
            "what-cursor-position" => {
                let message = format!("point={} of {}", self.caret, self.text.len());
                self.show_message(&message);
            }
            _ if id == self.commands.extended_command => self.minibuffer = Some(String::new()),
            _ if id == self.commands.keyboard_quit => self.minibuffer = None,
            _ if self.commands.is_prefix_argument(id) => {}
            _ => return Err(Error::not_handled(id)),
        }
        Ok(())
    }

    fn minibuffer_active(&self) -> bool {
        self.minibuffer.is_some()
    }

    fn close_minibuffer(&mut self) {
        self.minibuffer = None;
    }

    fn set_redraw(&mut self, _view: ViewId, enabled: bool) {
        self.redraw_enabled = enabled;
    }

    fn redraw(&mut self, _view: ViewId) {
        self.redraws += 1;
    }

    fn set_status_suppressed(&mut self, suppressed: bool) {
        self.status_suppressed = suppressed;
    }

    fn char_after_caret(&self) -> Option<char> {
        self.text.get(self.caret).copied()
    }

    fn insert_after_caret(&mut self, text: &str) -> Result<()> {
        let caret = self.caret;
        self.insert(text);
        self.caret = caret;
        if let Some(change) = self.changes.last_mut() {
            change.caret = caret;
        }
        Ok(())
    }

    fn subscribe_interrupt(&mut self, signal: Interrupt) {
        self.interrupt = Some(signal);
    }

    fn unsubscribe_interrupt(&mut self) {
        self.interrupt = None;
    }

    fn beep(&mut self) {
        self.beeps += 1;
    }

    fn show_message(&mut self, message: &str) {
        if self.status_suppressed {
            tracing::trace!(message, "status message suppressed");
            return;
        }
        self.messages.push(message.to_string());
    }

    fn report_load_failures(&mut self, failures: &[LoadFailure]) {
        let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
        let message = format!(
            "{} keyboard macro(s) failed to load: {}",
            failures.len(),
            names.join(", ")
        );
        self.load_failures.extend_from_slice(failures);
        self.show_message(&message);
    }
}

/// Pending `C-u` prefix
#[derive(Debug, Clone, Default)]
struct PrefixArg {
    presses: u32,
    digits: String,
}

impl PrefixArg {
    fn value(&self) -> u32 {
        let value = if self.digits.is_empty() {
            4u32.saturating_pow(self.presses)
        } else {
            self.digits.parse().unwrap_or(u32::MAX)
        };
        value.min(MAX_REPEAT_COUNT)
    }
}

/// Drives a [`MacroEngine`] with keystrokes the way an editor's command
/// loop would
pub struct ScratchSession {
    engine: MacroEngine,
    editor: ScratchEditor,
    view: ViewId,
    pending: Vec<KeyStroke>,
    prefix: Option<PrefixArg>,
}

impl ScratchSession {
    pub fn new(engine: MacroEngine) -> Self {
        let editor = ScratchEditor::new(&engine.config().commands);
        Self::with_editor(engine, editor)
    }

    pub fn with_editor(engine: MacroEngine, editor: ScratchEditor) -> Self {
        Self {
            engine,
            editor,
            view: SCRATCH_VIEW,
            pending: Vec::new(),
            prefix: None,
        }
    }

    pub fn engine(&self) -> &MacroEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MacroEngine {
        &mut self.engine
    }

    pub fn editor(&self) -> &ScratchEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut ScratchEditor {
        &mut self.editor
    }

    pub fn into_parts(self) -> (MacroEngine, ScratchEditor) {
        (self.engine, self.editor)
    }

    /// Press a whitespace separated key sequence, stopping at the first failure
    pub fn press_keys(&mut self, keys: &str) -> Result<()> {
        let keys = KeyStroke::parse_sequence(keys)
            .map_err(|e| Error::new(ErrorCode::NotHandled, format!("Invalid key: {}", e)))?;
        for key in &keys {
            self.press(key)?;
        }
        Ok(())
    }

    /// Type every character of `text` as a key
    pub fn type_text(&mut self, text: &str) -> Result<()> {
        for c in text.chars() {
            self.press(&KeyStroke::from_char(c))?;
        }
        Ok(())
    }

    pub fn press(&mut self, key: &KeyStroke) -> Result<()> {
        self.engine.on_key_event(key);
        let result = self.dispatch(key);
        self.settle();
        if let Err(error) = &result {
            tracing::debug!(%key, %error, "key failed");
            self.editor.show_message(&error.message);
        }
        result
    }

    pub fn execute_current(&mut self, times: u32) -> Result<()> {
        let result = self.engine.execute_current(&self.view, &mut self.editor, times);
        self.settle();
        result
    }

    pub fn execute_named(&mut self, name: &str, times: u32) -> Result<()> {
        let result = self.engine.execute_named(name, &self.view, &mut self.editor, times);
        self.settle();
        result
    }

    pub fn history_next(&mut self) -> Option<EventLog> {
        self.engine.history_next(&mut self.editor).cloned()
    }

    pub fn history_previous(&mut self) -> Option<EventLog> {
        self.engine.history_previous(&mut self.editor).cloned()
    }

    /// Run deferred engine work now, as the end of a UI turn would
    pub fn run_deferred(&mut self) -> usize {
        self.engine.run_deferred(&mut self.editor)
    }

    fn settle(&mut self) {
        for change in self.editor.take_changes() {
            self.engine.on_document_change(change);
        }
        self.run_deferred();
    }

    fn dispatch(&mut self, key: &KeyStroke) -> Result<()> {
        if self.pending.is_empty() {
            if self.editor.minibuffer_active() {
                if let Some(result) = self.minibuffer_key(key) {
                    return result;
                }
            } else if self.collect_prefix_digit(key) {
                return Ok(());
            }
        }

        self.pending.push(*key);
        let resolved = match self.editor.keymap().resolve(&self.pending) {
            Resolution::Prefix => return Ok(()),
            Resolution::Complete(id) => Some(id.to_string()),
            Resolution::Unbound => None,
        };
        let keys = std::mem::take(&mut self.pending);
        match resolved {
            Some(id) => self.run_binding(keys, &id),
            None if keys.len() == 1 && key.is_literal() => self.self_insert(key),
            None => {
                self.prefix = None;
                self.engine.on_unbound(&keys);
                Err(Error::not_handled(&describe(&keys)))
            }
        }
    }

    fn minibuffer_key(&mut self, key: &KeyStroke) -> Option<Result<()>> {
        if let (Some(c), true) = (key.character, key.is_literal()) {
            self.editor.minibuffer_push(c);
            return Some(Ok(()));
        }
        if key.same_key(key_codes::RETURN, Modifiers::NONE) {
            let name = self.editor.minibuffer.take().unwrap_or_default();
            return Some(self.run_extended(name.trim()));
        }
        if key.same_key(key_codes::BACKSPACE, Modifiers::NONE) {
            self.editor.minibuffer_pop();
            return Some(Ok(()));
        }
        None
    }

    fn collect_prefix_digit(&mut self, key: &KeyStroke) -> bool {
        let Some(prefix) = self.prefix.as_mut() else {
            return false;
        };
        match key.character {
            Some(c) if key.is_literal() && c.is_ascii_digit() => {
                prefix.digits.push(c);
                true
            }
            _ => false,
        }
    }

    fn run_extended(&mut self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let params = self.take_prefix(id);
        self.run_command(id, params)
    }

    fn run_binding(&mut self, keys: Vec<KeyStroke>, id: &str) -> Result<()> {
        let params = self.take_prefix(id);
        let mut binding = Binding::new(keys, id);
        binding.parameters = params.clone();
        self.engine.check_binding(&binding);
        self.run_command(id, params)
    }

    fn self_insert(&mut self, key: &KeyStroke) -> Result<()> {
        let Some(c) = key.character else {
            return Ok(());
        };
        match self.take_prefix(SELF_INSERT) {
            Some(mut params) => {
                params.insert("text".into(), c.to_string());
                self.engine
                    .check_trigger(SELF_INSERT, Some(params.clone()), std::slice::from_ref(key), false);
                self.run_command(SELF_INSERT, Some(params))
            }
            None => {
                self.editor.self_insert(c);
                Ok(())
            }
        }
    }

    /// Consume the pending prefix as the command's repeat count
    fn take_prefix(&mut self, id: &str) -> Option<Parameters> {
        let ids = &self.engine.config().commands;
        if ids.is_prefix_argument(id) || id == ids.extended_command {
            return None;
        }
        let prefix = self.prefix.take()?;
        let mut params = Parameters::new();
        params.insert(ids.repeat_count.clone(), prefix.value().to_string());
        Some(params)
    }

    fn run_command(&mut self, id: &str, params: Option<Parameters>) -> Result<()> {
        self.engine.on_pre_execute(id, params.as_ref());
        let result = self.execute(id, params.as_ref());
        match &result {
            Ok(()) => self.engine.on_post_execute_success(id),
            Err(e) if e.code == ErrorCode::NotHandled => self.engine.on_not_handled(id),
            Err(e) => self.engine.on_post_execute_failure(id, e),
        }
        result
    }

    fn execute(&mut self, id: &str, params: Option<&Parameters>) -> Result<()> {
        let ids = self.engine.config().commands.clone();
        let count = params
            .and_then(|p| p.get(&ids.repeat_count))
            .and_then(|v| v.parse::<u32>().ok());

        if id == ids.universal_argument {
            self.prefix.get_or_insert_with(PrefixArg::default).presses += 1;
            return self.editor.invoke(id, params);
        }
        if id == ids.keyboard_quit {
            self.prefix = None;
            self.pending.clear();
            return self.editor.invoke(id, params);
        }
        if id == ids.start_macro {
            return self.engine.start_definition(count.is_some());
        }
        if id == ids.end_macro {
            return self.end_definition();
        }
        if id == ids.end_and_call_macro {
            if self.engine.is_defining() {
                self.end_definition()?;
            }
            return self.execute_current(count.unwrap_or(1));
        }
        if id == ids.call_macro {
            return self.execute_current(count.unwrap_or(1));
        }
        if id == ids.call_named {
            let name = params
                .and_then(|p| p.get(&ids.macro_name))
                .ok_or_else(|| Error::command_failed(id, "missing macro name"))?;
            return self.execute_named(name, count.unwrap_or(1));
        }
        self.editor.invoke(id, params)
    }

    fn end_definition(&mut self) -> Result<()> {
        if self.engine.end_definition(false) {
            Ok(())
        } else {
            Err(Error::not_defining())
        }
    }
}
