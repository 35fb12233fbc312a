//! # kmacro
//!
//! Emacs-style keyboard macros for host editors.
//!
//! ## Features
//!
//! - **Recording**: host notifications become a corrected event log
//! - **Replay**: deterministic, nesting-aware, interruptible
//! - **History**: ring of recent macros plus a registry of named ones
//! - **Persistence**: one JSON lines file per named macro
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kmacro::prelude::*;
//!
//! let mut session = ScratchSession::new(MacroEngine::new(EngineConfig::default()));
//! session.press_keys("C-x ( H i ! C-x )")?;
//! session.execute_current(2)?;
//! assert_eq!(session.editor().text(), "Hi!Hi!Hi!");
//! # Ok::<(), kmacro::Error>(())
//! ```

// Re-export the host vocabulary
pub use kmacro_core::*;

// Re-export the engine crate
pub use kmacro_recorder as recorder;

pub use kmacro_recorder::{
    AutoLoadPolicy, Binding, EngineConfig, EngineState, EventLog, MacroEngine, MacroEvent,
    MacroId, MacroStorage, ScratchEditor, ScratchSession,
};

/// Prelude - import everything you need
pub mod prelude {
    pub use kmacro_core::prelude::*;
    pub use kmacro_recorder::prelude::*;
}
