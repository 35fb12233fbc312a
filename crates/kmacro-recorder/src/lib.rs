//! kmacro-recorder - keyboard macro recording and replay
//!
//! Records host notifications into a corrected [`EventLog`], replays logs
//! deterministically and keeps recent and named macros around.
//!
//! ## Layout
//!
//! - [`recorder`]: notification stream to event log, with the correction rules
//! - [`replay`]: nesting-aware player
//! - [`history`] / [`registry`]: unnamed ring and named macros
//! - [`storage`]: JSON lines persistence
//! - [`engine`]: the owned [`MacroEngine`] a host talks to
//! - [`scratch`]: an in-memory host for tools and tests

pub mod config;
pub mod deferred;
pub mod engine;
pub mod events;
pub mod history;
pub mod recorder;
pub mod registry;
pub mod replay;
pub mod scratch;
pub mod storage;

pub use config::{AutoLoadPolicy, CommandIds, EngineConfig};
pub use deferred::{Deferred, DeferredQueue, LoadResults};
pub use engine::{EngineState, MacroEngine};
pub use events::{EventLog, MacroEvent};
pub use history::{Direction, HistoryRing};
pub use recorder::{Binding, Recorder};
pub use registry::{MacroId, MacroRegistry, RegistryEntry};
pub use replay::{MacroLookup, Player, ReplayStats};
pub use scratch::{Keymap, Resolution, ScratchEditor, ScratchSession, SCRATCH_VIEW};
pub use storage::{MacroStorage, StoredMacro};

pub mod prelude {
    pub use crate::config::{AutoLoadPolicy, EngineConfig};
    pub use crate::engine::{EngineState, MacroEngine};
    pub use crate::events::{EventLog, MacroEvent};
    pub use crate::recorder::Binding;
    pub use crate::registry::MacroId;
    pub use crate::scratch::{ScratchEditor, ScratchSession};
    pub use crate::storage::MacroStorage;
}
