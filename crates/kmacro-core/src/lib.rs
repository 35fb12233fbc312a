//! kmacro-core - host-facing vocabulary for Emacs-style keyboard macros
//!
//! Keys, structured errors and the capability traits a host editor
//! implements so the macro engine can drive it.

pub mod error;
pub mod host;
pub mod keys;

pub use error::{Error, ErrorCode, Result};
pub use host::{
    DocumentChange, ExecutionDepth, Interrupt, LoadFailure, MacroHost, Parameters,
    SourceViewerProvider, ViewId,
};
pub use keys::{key_codes, KeyParseError, KeyStroke, Modifiers};

pub mod prelude {
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::host::{
        DocumentChange, Interrupt, LoadFailure, MacroHost, Parameters, SourceViewerProvider,
        ViewId,
    };
    pub use crate::keys::{KeyStroke, Modifiers};
}
