//! Named macros for the lifetime of the session

use crate::events::EventLog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one naming action; renaming or overwriting yields a new id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacroId(pub u64);

impl fmt::Display for MacroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: MacroId,
    pub name: String,
    pub log: EventLog,
    pub binding_hint: Option<String>,
}

#[derive(Debug, Default)]
pub struct MacroRegistry {
    entries: BTreeMap<String, RegistryEntry>,
    next_id: u64,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `log` under `name`, replacing any previous entry
    pub fn name(&mut self, name: impl Into<String>, log: &EventLog) -> MacroId {
        self.insert(name.into(), log.clone(), None)
    }

    pub fn name_with_hint(
        &mut self,
        name: impl Into<String>,
        log: &EventLog,
        binding_hint: Option<String>,
    ) -> MacroId {
        self.insert(name.into(), log.clone(), binding_hint)
    }

    pub(crate) fn insert(
        &mut self,
        name: String,
        log: EventLog,
        binding_hint: Option<String>,
    ) -> MacroId {
        self.next_id += 1;
        let id = MacroId(self.next_id);
        if self.entries.contains_key(&name) {
            tracing::debug!(name = %name, %id, "overwriting named macro");
        }
        self.entries.insert(
            name.clone(),
            RegistryEntry { id, name, log, binding_hint },
        );
        id
    }

    pub fn lookup(&self, name: &str) -> Option<&EventLog> {
        self.entries.get(name).map(|e| &e.log)
    }

    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegistryEntry> {
        self.entries.remove(name)
    }

    /// Names in order, for completion
    pub fn completions(&self) -> BTreeMap<String, MacroId> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
