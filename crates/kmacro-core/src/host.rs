//! Host capability interface
//!
//! The engine never reaches into the editor on its own. Everything it needs
//! from the surrounding application goes through [`MacroHost`], and the
//! view it suppresses redraw on comes from a [`SourceViewerProvider`].

use crate::error::{Error, Result};
use crate::keys::KeyStroke;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Command invocation parameters, ordered for stable display and equality
pub type Parameters = BTreeMap<String, String>;

/// Opaque handle for a text view owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId(pub u64);

/// Gives the engine the view behind an editor context
pub trait SourceViewerProvider {
    fn view(&self) -> Option<ViewId>;
}

impl SourceViewerProvider for ViewId {
    fn view(&self) -> Option<ViewId> {
        Some(*self)
    }
}

impl SourceViewerProvider for Option<ViewId> {
    fn view(&self) -> Option<ViewId> {
        *self
    }
}

/// A single document modification reported by the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    /// Char offset where the change starts
    pub offset: usize,
    /// Number of chars removed at `offset`
    #[serde(default)]
    pub removed: usize,
    pub inserted: String,
    /// Caret offset once the change has been applied
    pub caret: usize,
}

impl DocumentChange {
    pub fn insert(offset: usize, inserted: impl Into<String>, caret: usize) -> Self {
        Self { offset, removed: 0, inserted: inserted.into(), caret }
    }

    pub fn is_pure_insert(&self) -> bool {
        self.removed == 0 && !self.inserted.is_empty()
    }
}

/// A macro that could not be loaded from storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFailure {
    pub name: String,
    pub error: Error,
}

/// Shared interrupt flag; the host sets it, the player polls it between events
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        tracing::debug!("macro interrupt requested");
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once per trigger
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Replay nesting depth, readable by host commands that behave differently
/// while a macro runs. Zero when no replay is in progress.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDepth(Arc<AtomicU32>);

impl ExecutionDepth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_executing(&self) -> bool {
        self.get() > 0
    }

    /// Enter one level, returning the new depth
    pub fn enter(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Leave one level, returning the new depth
    pub fn leave(&self) -> u32 {
        let depth = self.get().saturating_sub(1);
        self.0.store(depth, Ordering::SeqCst);
        depth
    }
}

/// Primitives the macro engine consumes from the host editor.
///
/// Only the first three are required; everything else defaults to a no-op so
/// that headless hosts (tests, batch tools) stay small.
pub trait MacroHost {
    /// Process a literal character as if the user typed it
    fn type_key(&mut self, key: &KeyStroke) -> Result<()>;

    /// Run a raw key through the host's own binding resolution
    fn process_key(&mut self, key: &KeyStroke) -> Result<()>;

    /// Run a command directly, bypassing key bindings
    fn invoke(&mut self, id: &str, params: Option<&Parameters>) -> Result<()>;

    fn minibuffer_active(&self) -> bool {
        false
    }

    fn close_minibuffer(&mut self) {}

    fn set_redraw(&mut self, _view: ViewId, _enabled: bool) {}

    fn redraw(&mut self, _view: ViewId) {}

    fn set_status_suppressed(&mut self, _suppressed: bool) {}

    fn char_after_caret(&self) -> Option<char> {
        None
    }

    /// Insert text after the caret without moving it
    fn insert_after_caret(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn subscribe_interrupt(&mut self, _signal: Interrupt) {}

    fn unsubscribe_interrupt(&mut self) {}

    /// Generic failure notification
    fn beep(&mut self) {}

    fn show_message(&mut self, _message: &str) {}

    fn report_load_failures(&mut self, _failures: &[LoadFailure]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_fires_once() {
        let signal = Interrupt::new();
        let shared = signal.clone();
        assert!(!signal.take());
        shared.trigger();
        assert!(signal.is_set());
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[test]
    fn execution_depth_is_shared() {
        let depth = ExecutionDepth::new();
        let seen = depth.clone();
        assert_eq!(depth.enter(), 1);
        assert_eq!(depth.enter(), 2);
        assert!(seen.is_executing());
        assert_eq!(depth.leave(), 1);
        assert_eq!(depth.leave(), 0);
        assert_eq!(depth.leave(), 0);
        assert!(!seen.is_executing());
    }

    #[test]
    fn pure_insert() {
        assert!(DocumentChange::insert(3, ")", 3).is_pure_insert());
        let replace = DocumentChange { offset: 0, removed: 2, inserted: "x".into(), caret: 1 };
        assert!(!replace.is_pure_insert());
    }
}
