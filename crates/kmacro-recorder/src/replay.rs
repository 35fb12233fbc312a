//! Replays event logs against the host
//!
//! Commands are invoked directly by id, so replay does not depend on the
//! live keymap. A replayed `kmacro-call-macro` or `kmacro-call-named`
//! re-enters the player; the depth counter tells nested runs apart from
//! independent ones.

use crate::config::CommandIds;
use crate::deferred::{Deferred, DeferredQueue};
use crate::events::{EventLog, MacroEvent};
use kmacro_core::{Error, ErrorCode, ExecutionDepth, Interrupt, MacroHost, Parameters, Result, ViewId};
use serde::Serialize;

/// Macros a replayed call command can refer to
pub trait MacroLookup {
    /// Target of a `kmacro-call-macro` replayed from inside `running`: the
    /// macro that was last when `running` was defined
    fn last_macro(&self, running: &EventLog) -> Option<&EventLog>;
    fn named_macro(&self, name: &str) -> Option<&EventLog>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub keys: usize,
    pub raw_keys: usize,
    pub commands: usize,
    pub minibuffer_exits: usize,
    pub nested: usize,
}

pub struct Player {
    commands: CommandIds,
    max_depth: u32,
    depth: ExecutionDepth,
    view: Option<ViewId>,
    interrupt: Interrupt,
    stats: ReplayStats,
}

impl Player {
    pub fn new(commands: CommandIds, max_depth: u32) -> Self {
        Self {
            commands,
            max_depth: max_depth.max(1),
            depth: ExecutionDepth::new(),
            view: None,
            interrupt: Interrupt::new(),
            stats: ReplayStats::default(),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn is_executing(&self) -> bool {
        self.depth.is_executing()
    }

    /// Depth handle for hosts that need to know a replay is running
    pub fn execution_depth(&self) -> ExecutionDepth {
        self.depth.clone()
    }

    /// Signal shared with the host while a replay runs
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Counters from the most recent outermost replay
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Replay `log` `times` times. Fails fast: the first failing event stops
    /// the replay and the depth is unwound either way.
    pub fn execute<H>(
        &mut self,
        log: &EventLog,
        times: u32,
        view: Option<ViewId>,
        host: &mut H,
        lookup: &dyn MacroLookup,
        deferred: &DeferredQueue,
    ) -> Result<()>
    where
        H: MacroHost + ?Sized,
    {
        if self.depth.get() >= self.max_depth {
            return Err(Error::nesting_too_deep(self.max_depth));
        }

        self.enter(view, host);
        let result = self.run(log, times.max(1), host, lookup, deferred);
        self.leave(result.is_err(), host, deferred);
        result
    }

    fn enter<H: MacroHost + ?Sized>(&mut self, view: Option<ViewId>, host: &mut H) {
        let depth = self.depth.enter();
        if depth > 1 {
            tracing::trace!(depth, "nested macro execution");
            return;
        }
        self.view = view;
        self.stats = ReplayStats::default();
        // a stale trigger from before this replay must not abort it
        self.interrupt.take();
        if let Some(view) = view {
            host.set_redraw(view, false);
        }
        host.set_status_suppressed(true);
        host.subscribe_interrupt(self.interrupt.clone());
    }

    fn leave<H: MacroHost + ?Sized>(&mut self, failed: bool, host: &mut H, deferred: &DeferredQueue) {
        if self.depth.leave() > 0 {
            return;
        }
        host.unsubscribe_interrupt();
        host.set_status_suppressed(false);
        if let Some(view) = self.view.take() {
            host.set_redraw(view, true);
            deferred.push(Deferred::Redraw(view));
        }
        if failed {
            host.beep();
        }
        tracing::debug!(failed, stats = ?self.stats, "macro execution finished");
    }

    fn run<H: MacroHost + ?Sized>(
        &mut self,
        log: &EventLog,
        times: u32,
        host: &mut H,
        lookup: &dyn MacroLookup,
        deferred: &DeferredQueue,
    ) -> Result<()> {
        for _ in 0..times {
            for event in log {
                if self.interrupt.take() {
                    tracing::info!(depth = self.depth.get(), "macro execution interrupted");
                    return Err(Error::interrupted());
                }
                self.dispatch(event, log, host, lookup, deferred)?;
            }
        }
        Ok(())
    }

    fn dispatch<H: MacroHost + ?Sized>(
        &mut self,
        event: &MacroEvent,
        running: &EventLog,
        host: &mut H,
        lookup: &dyn MacroLookup,
        deferred: &DeferredQueue,
    ) -> Result<()> {
        match event {
            MacroEvent::Key { .. } => {
                self.stats.keys += 1;
                let key = event.keystroke().ok_or_else(|| Error::not_handled("key"))?;
                host.type_key(&key)
            }
            MacroEvent::SubCommandKey { .. } => {
                self.stats.raw_keys += 1;
                let key = event.keystroke().ok_or_else(|| Error::not_handled("key"))?;
                match host.process_key(&key) {
                    // left unresolved while recording; it did nothing then either
                    Err(e) if e.code == ErrorCode::NotHandled => {
                        tracing::debug!(%key, "unresolved raw key skipped");
                        Ok(())
                    }
                    other => other,
                }
            }
            MacroEvent::MinibufferExit => {
                self.stats.minibuffer_exits += 1;
                if host.minibuffer_active() {
                    host.close_minibuffer();
                }
                Ok(())
            }
            MacroEvent::Command { id, parameters } => {
                self.stats.commands += 1;
                self.dispatch_command(id, parameters.as_ref(), running, host, lookup, deferred)
            }
        }
    }

    fn dispatch_command<H: MacroHost + ?Sized>(
        &mut self,
        id: &str,
        parameters: Option<&Parameters>,
        running: &EventLog,
        host: &mut H,
        lookup: &dyn MacroLookup,
        deferred: &DeferredQueue,
    ) -> Result<()> {
        let view = self.view;

        if id == self.commands.call_macro {
            let times = self.repeat_count(parameters);
            let log = lookup.last_macro(running).ok_or_else(Error::no_macro)?;
            self.stats.nested += 1;
            return self.execute(log, times, view, host, lookup, deferred);
        }

        if id == self.commands.call_named {
            let name = parameters
                .and_then(|p| p.get(&self.commands.macro_name))
                .ok_or_else(|| Error::command_failed(id, "missing macro name"))?;
            let times = self.repeat_count(parameters);
            let log = lookup
                .named_macro(name)
                .ok_or_else(|| Error::macro_not_found(name))?;
            self.stats.nested += 1;
            return self.execute(log, times, view, host, lookup, deferred);
        }

        // Skipped when the character after the caret already matches, which
        // covers hosts that auto-insert it themselves. A matching character
        // that was there before recording is indistinguishable, so a host
        // without auto-insert loses one character in that case.
        if id == self.commands.insert_matched {
            let text = parameters.and_then(|p| p.get("text")).map(String::as_str).unwrap_or("");
            let first = text.chars().next();
            if first.is_some() && host.char_after_caret() != first {
                host.insert_after_caret(text)?;
            }
            return Ok(());
        }

        host.invoke(id, parameters).map_err(|e| {
            tracing::debug!(command_id = id, error = %e, "replayed command failed");
            e
        })
    }

    fn repeat_count(&self, parameters: Option<&Parameters>) -> u32 {
        parameters
            .and_then(|p| p.get(&self.commands.repeat_count))
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1)
    }
}
