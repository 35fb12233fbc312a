//! Work deferred until after the current UI turn
//!
//! Tasks run in FIFO order when the host calls `MacroEngine::run_deferred`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use kmacro_core::{LoadFailure, ViewId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of a batch load, filled in by each `LoadMacro` task
#[derive(Debug, Default)]
pub struct LoadResults {
    pub scheduled: usize,
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadResults {
    pub fn attempted(&self) -> usize {
        self.loaded.len() + self.failures.len()
    }
}

pub type SharedLoadResults = Arc<Mutex<LoadResults>>;

#[derive(Debug)]
pub enum Deferred {
    Redraw(ViewId),
    LoadMacro {
        name: String,
        results: SharedLoadResults,
    },
    ReportLoads(SharedLoadResults),
}

pub struct DeferredQueue {
    tx: Sender<Deferred>,
    rx: Receiver<Deferred>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, task: Deferred) {
        // rx lives as long as self, so the channel cannot be disconnected
        let _ = self.tx.send(task);
    }

    pub fn pop(&self) -> Option<Deferred> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = DeferredQueue::new();
        let results = SharedLoadResults::default();
        queue.push(Deferred::Redraw(ViewId(1)));
        queue.push(Deferred::LoadMacro { name: "a".into(), results: results.clone() });
        queue.push(Deferred::ReportLoads(results));
        assert_eq!(queue.len(), 3);

        assert!(matches!(queue.pop(), Some(Deferred::Redraw(ViewId(1)))));
        assert!(matches!(queue.pop(), Some(Deferred::LoadMacro { .. })));
        assert!(matches!(queue.pop(), Some(Deferred::ReportLoads(_))));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
