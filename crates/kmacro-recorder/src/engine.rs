//! The macro engine - one owned instance per application
//!
//! Ties the recorder, player, history ring, registry and storage together
//! behind the entry points the host's command layer calls. Everything runs
//! on the host's event thread; nothing here spawns or locks across calls.

use crate::config::{AutoLoadPolicy, EngineConfig};
use crate::deferred::{Deferred, DeferredQueue, LoadResults, SharedLoadResults};
use crate::events::EventLog;
use crate::history::{Direction, HistoryRing};
use crate::recorder::{Binding, Recorder};
use crate::registry::{MacroId, MacroRegistry};
use crate::replay::{MacroLookup, Player, ReplayStats};
use crate::storage::MacroStorage;
use kmacro_core::{
    DocumentChange, Error, ExecutionDepth, Interrupt, KeyStroke, LoadFailure, MacroHost, Parameters, Result,
    SourceViewerProvider,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Defining,
    Executing(u32),
}

pub struct MacroEngine {
    config: EngineConfig,
    recorder: Recorder,
    player: Player,
    history: HistoryRing,
    registry: MacroRegistry,
    storage: Option<MacroStorage>,
    deferred: DeferredQueue,
}

/// Borrowed view of the macros a replayed call command may reach
struct Reachable<'a> {
    history: &'a HistoryRing,
    registry: &'a MacroRegistry,
}

impl MacroLookup for Reachable<'_> {
    /// A ring macro calls the entry one older than itself; that was the
    /// current macro while it was being defined. Anything else calls the
    /// current macro.
    fn last_macro(&self, running: &EventLog) -> Option<&EventLog> {
        match self.history.iter().position(|log| log == running) {
            Some(pos) => self.history.iter().nth(pos + 1),
            None => self.history.current(),
        }
    }

    fn named_macro(&self, name: &str) -> Option<&EventLog> {
        self.registry.lookup(name)
    }
}

impl MacroEngine {
    /// Engine without persistence
    pub fn new(config: EngineConfig) -> Self {
        Self {
            recorder: Recorder::new(config.commands.clone()),
            player: Player::new(config.commands.clone(), config.max_depth),
            history: HistoryRing::new(config.history_capacity),
            registry: MacroRegistry::new(),
            storage: None,
            deferred: DeferredQueue::new(),
            config,
        }
    }

    pub fn with_storage(config: EngineConfig, storage: MacroStorage) -> Self {
        let mut engine = Self::new(config);
        engine.storage = Some(storage);
        engine
    }

    /// Engine persisting to the configured macro directory
    pub fn open(config: EngineConfig) -> Result<Self> {
        let dir = config.macro_dir()?;
        let storage = MacroStorage::with_dir(&dir).map_err(storage_error)?;
        Ok(Self::with_storage(config, storage))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        if self.recorder.is_defining() {
            EngineState::Defining
        } else if self.player.is_executing() {
            EngineState::Executing(self.player.depth())
        } else {
            EngineState::Idle
        }
    }

    pub fn is_defining(&self) -> bool {
        self.recorder.is_defining()
    }

    pub fn is_executing(&self) -> bool {
        self.player.is_executing()
    }

    pub fn is_busy(&self) -> bool {
        self.is_defining() || self.is_executing()
    }

    // ── Definition ──────────────────────────────────────────────────────────

    /// Start defining; with `append` the current macro is continued
    pub fn start_definition(&mut self, append: bool) -> Result<()> {
        if self.is_defining() {
            return Err(Error::already_defining());
        }
        if self.is_executing() {
            return Err(Error::executing("start a keyboard macro"));
        }
        let initial = if append {
            self.history.current().cloned().ok_or_else(Error::no_macro)?
        } else {
            EventLog::new()
        };
        self.recorder.start(initial, append);
        tracing::info!(append, "defining keyboard macro");
        Ok(())
    }

    /// Finish or abort the definition; false when nothing was being defined.
    ///
    /// An abort leaves the current macro exactly as it was before the start.
    /// The ring is not rewound to its head, so a macro made current by
    /// rotation before the start stays current; call [`Self::history_reset`]
    /// to get back to the most recent one.
    pub fn end_definition(&mut self, abort: bool) -> bool {
        if !self.is_defining() {
            tracing::debug!(abort, "end requested while not defining");
            return false;
        }

        if abort {
            self.recorder.discard();
            tracing::info!("keyboard macro definition aborted");
            return true;
        }

        let appending = self.recorder.is_appending();
        let log = self.recorder.finish();
        if log.is_empty() && !appending {
            tracing::info!("empty keyboard macro ignored");
        } else if appending {
            tracing::info!(events = log.len(), "appended to keyboard macro");
            self.history.replace_current(log);
        } else {
            tracing::info!(events = log.len(), "keyboard macro defined");
            self.history.push(log);
        }
        true
    }

    /// Events recorded so far in the running definition
    pub fn recording(&self) -> &EventLog {
        self.recorder.log()
    }

    // ── Host notifications while defining ───────────────────────────────────

    pub fn on_key_event(&mut self, key: &KeyStroke) {
        self.recorder.on_key_event(key);
    }

    pub fn on_document_change(&mut self, change: DocumentChange) {
        self.recorder.on_document_change(change);
    }

    pub fn on_pre_execute(&mut self, command_id: &str, parameters: Option<&Parameters>) {
        self.recorder.on_pre_execute(command_id, parameters);
    }

    pub fn on_post_execute_success(&mut self, command_id: &str) {
        self.recorder.on_post_execute_success(command_id);
    }

    pub fn on_post_execute_failure(&mut self, command_id: &str, error: &Error) {
        tracing::debug!(command_id, %error, "command failed during definition");
        self.recorder.on_post_execute_failure(command_id);
    }

    pub fn on_not_handled(&mut self, command_id: &str) {
        self.recorder.on_not_handled(command_id);
    }

    /// The host resolved the trailing keys to no command at all
    pub fn on_unbound(&mut self, keys: &[KeyStroke]) {
        self.recorder.on_unbound(keys);
    }

    pub fn check_binding(&mut self, binding: &Binding) {
        self.recorder.check_binding(binding);
    }

    pub fn check_trigger(
        &mut self,
        command_id: &str,
        parameters: Option<Parameters>,
        trigger: &[KeyStroke],
        is_exit: bool,
    ) {
        self.recorder.check_trigger(command_id, parameters, trigger, is_exit);
    }

    // ── Execution ───────────────────────────────────────────────────────────

    /// The macro `execute_current` replays: the history entry under the cursor
    pub fn current_macro(&self) -> Option<&EventLog> {
        self.history.current()
    }

    pub fn execute_current<H>(
        &mut self,
        context: &dyn SourceViewerProvider,
        host: &mut H,
        times: u32,
    ) -> Result<()>
    where
        H: MacroHost + ?Sized,
    {
        // the macro being appended to would call itself
        if self.recorder.is_appending() {
            return Err(Error::defining("call the keyboard macro being appended to"));
        }
        let Self { player, history, registry, deferred, .. } = self;
        let log = history.current().ok_or_else(Error::no_macro)?;
        tracing::debug!(events = log.len(), times, "executing current macro");
        let reachable = Reachable { history, registry };
        player.execute(log, times, context.view(), host, &reachable, deferred)
    }

    pub fn execute_named<H>(
        &mut self,
        name: &str,
        context: &dyn SourceViewerProvider,
        host: &mut H,
        times: u32,
    ) -> Result<()>
    where
        H: MacroHost + ?Sized,
    {
        let Self { player, history, registry, deferred, .. } = self;
        let log = registry.lookup(name).ok_or_else(|| Error::macro_not_found(name))?;
        tracing::debug!(name, events = log.len(), times, "executing named macro");
        let reachable = Reachable { history, registry };
        player.execute(log, times, context.view(), host, &reachable, deferred)
    }

    /// Signal that aborts a running replay before its next event
    pub fn interrupt(&self) -> Interrupt {
        self.player.interrupt().clone()
    }

    pub fn execution_depth(&self) -> ExecutionDepth {
        self.player.execution_depth()
    }

    pub fn last_replay_stats(&self) -> ReplayStats {
        self.player.stats()
    }

    // ── History ─────────────────────────────────────────────────────────────

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Make the next older macro current
    pub fn history_next<H: MacroHost + ?Sized>(&mut self, host: &mut H) -> Option<&EventLog> {
        self.rotate(Direction::Forward, host)
    }

    /// Make the next newer macro current
    pub fn history_previous<H: MacroHost + ?Sized>(&mut self, host: &mut H) -> Option<&EventLog> {
        self.rotate(Direction::Backward, host)
    }

    /// Back to the most recently defined macro
    pub fn history_reset(&mut self) -> Option<&EventLog> {
        self.history.rotate_to_origin()
    }

    fn rotate<H: MacroHost + ?Sized>(
        &mut self,
        direction: Direction,
        host: &mut H,
    ) -> Option<&EventLog> {
        let shown = self.history.rotate(direction).map(EventLog::to_compact);
        let message = match shown {
            Some(events) => format!(
                "Macro {}/{}: {}",
                self.history.cursor() + 1,
                self.history.len(),
                events
            ),
            None => "Keyboard macro ring is empty".to_string(),
        };
        tracing::debug!(?direction, cursor = self.history.cursor(), "macro ring rotated");
        host.show_message(&message);
        self.history.current()
    }

    // ── Naming ──────────────────────────────────────────────────────────────

    pub fn name_current(&mut self, name: &str) -> Result<MacroId> {
        self.name_current_with_binding(name, None)
    }

    pub fn name_current_with_binding(
        &mut self,
        name: &str,
        binding_hint: Option<String>,
    ) -> Result<MacroId> {
        let log = self.history.current().ok_or_else(Error::no_macro)?;
        let id = self.registry.name_with_hint(name, log, binding_hint);
        tracing::info!(name, %id, events = log.len(), "keyboard macro named");
        Ok(id)
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn lookup(&self, name: &str) -> Option<&EventLog> {
        self.registry.lookup(name)
    }

    pub fn completions(&self) -> BTreeMap<String, MacroId> {
        self.registry.completions()
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn storage(&self) -> Option<&MacroStorage> {
        self.storage.as_ref()
    }

    /// Write a named macro to the macro directory
    pub fn save(&self, name: &str) -> Result<PathBuf> {
        let storage = self.require_storage()?;
        let entry = self.registry.entry(name).ok_or_else(|| Error::macro_not_found(name))?;
        storage
            .save(name, &entry.log, entry.binding_hint.as_deref())
            .map_err(storage_error)
    }

    /// Forget a named macro, in memory and on disk
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let in_memory = self.registry.remove(name).is_some();
        let on_disk = match &self.storage {
            Some(storage) if storage.exists(name) => {
                storage.delete(name).map_err(storage_error)?;
                true
            }
            _ => false,
        };
        if !in_memory && !on_disk {
            return Err(Error::macro_not_found(name));
        }
        Ok(())
    }

    /// Schedule loading per the configured auto-load policy
    pub fn load_configured(&mut self) -> Result<usize> {
        let policy = self.config.auto_load_policy();
        self.load_from_storage(policy)
    }

    /// Schedule one deferred load per macro plus a final report.
    /// Returns the number of loads scheduled; they run in `run_deferred`.
    pub fn load_from_storage(&mut self, policy: AutoLoadPolicy) -> Result<usize> {
        let names = match policy {
            AutoLoadPolicy::None => return Ok(0),
            AutoLoadPolicy::All => self.require_storage()?.list().map_err(storage_error)?,
            AutoLoadPolicy::Subset(names) => {
                self.require_storage()?;
                names
            }
        };

        let results = SharedLoadResults::new(parking_lot::Mutex::new(LoadResults {
            scheduled: names.len(),
            ..Default::default()
        }));
        for name in &names {
            self.deferred.push(Deferred::LoadMacro {
                name: name.clone(),
                results: results.clone(),
            });
        }
        self.deferred.push(Deferred::ReportLoads(results));
        tracing::debug!(count = names.len(), "macro loads scheduled");
        Ok(names.len())
    }

    // ── Deferred work ───────────────────────────────────────────────────────

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Run everything deferred so far, in order. Call once per UI turn.
    pub fn run_deferred<H: MacroHost + ?Sized>(&mut self, host: &mut H) -> usize {
        let mut ran = 0;
        while let Some(task) = self.deferred.pop() {
            ran += 1;
            match task {
                Deferred::Redraw(view) => host.redraw(view),
                Deferred::LoadMacro { name, results } => self.load_one(name, &results),
                Deferred::ReportLoads(results) => {
                    let results = results.lock();
                    if results.attempted() < results.scheduled {
                        tracing::warn!(
                            attempted = results.attempted(),
                            scheduled = results.scheduled,
                            "reporting before all loads ran"
                        );
                    }
                    tracing::info!(
                        loaded = results.loaded.len(),
                        failed = results.failures.len(),
                        "keyboard macros loaded"
                    );
                    if !results.failures.is_empty() {
                        host.report_load_failures(&results.failures);
                    }
                }
            }
        }
        ran
    }

    fn load_one(&mut self, name: String, results: &SharedLoadResults) {
        let loaded = self
            .require_storage()
            .and_then(|storage| storage.load(&name).map_err(storage_error));
        match loaded {
            Ok(stored) => {
                tracing::debug!(name = %name, events = stored.log.len(), "macro loaded");
                self.registry.insert(name.clone(), stored.log, stored.binding);
                results.lock().loaded.push(name);
            }
            Err(error) => {
                tracing::warn!(name = %name, %error, "macro failed to load");
                results.lock().failures.push(LoadFailure { name, error });
            }
        }
    }

    fn require_storage(&self) -> Result<&MacroStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| Error::storage("No macro directory configured"))
    }
}

fn storage_error(e: anyhow::Error) -> Error {
    Error::storage(format!("{:#}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut engine = MacroEngine::new(EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(!engine.end_definition(false));

        engine.start_definition(false).unwrap();
        assert_eq!(engine.state(), EngineState::Defining);
        assert!(engine.is_busy());
        assert_eq!(
            engine.start_definition(false).unwrap_err().code,
            kmacro_core::ErrorCode::AlreadyDefining
        );
        assert!(engine.end_definition(false));
        assert_eq!(engine.state(), EngineState::Idle);
        // nothing recorded, nothing kept
        assert!(engine.history().is_empty());
    }

    #[test]
    fn append_requires_a_macro() {
        let mut engine = MacroEngine::new(EngineConfig::default());
        let err = engine.start_definition(true).unwrap_err();
        assert_eq!(err.code, kmacro_core::ErrorCode::NoMacro);
        assert!(!engine.is_defining());
    }

    #[test]
    fn storage_operations_need_a_directory() {
        let mut engine = MacroEngine::new(EngineConfig::default());
        assert_eq!(engine.load_from_storage(AutoLoadPolicy::None).unwrap(), 0);
        let err = engine.load_from_storage(AutoLoadPolicy::All).unwrap_err();
        assert_eq!(err.code, kmacro_core::ErrorCode::Storage);
        assert_eq!(engine.pending_deferred(), 0);
    }

    #[test]
    fn ring_macros_call_the_one_before_them() {
        use crate::events::MacroEvent;
        let log = |c: char| EventLog::from_events(vec![MacroEvent::from_key(&KeyStroke::from_char(c))]);
        let mut history = HistoryRing::new(4);
        history.push(log('a'));
        history.push(log('b'));
        let registry = MacroRegistry::new();
        let reachable = Reachable { history: &history, registry: &registry };

        assert_eq!(reachable.last_macro(&log('b')), Some(&log('a')));
        assert_eq!(reachable.last_macro(&log('a')), None);
        // named or hand-built macros call the current one
        assert_eq!(reachable.last_macro(&log('z')), Some(&log('b')));
    }
}
