//! Structured errors reported to the host

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotDefining,
    AlreadyDefining,
    Executing,
    NoMacro,
    MacroNotFound,
    CommandFailed,
    NotHandled,
    Interrupted,
    NestingTooDeep,
    Storage,
    InvalidConfig,
    Unknown,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn not_defining() -> Self {
        Self::new(ErrorCode::NotDefining, "Not defining a keyboard macro")
    }

    pub fn already_defining() -> Self {
        Self::new(ErrorCode::AlreadyDefining, "Already defining a keyboard macro")
    }

    pub fn defining(action: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyDefining,
            format!("Cannot {} while defining a keyboard macro", action),
        )
    }

    pub fn executing(action: &str) -> Self {
        Self::new(
            ErrorCode::Executing,
            format!("Cannot {} while a keyboard macro is executing", action),
        )
    }

    pub fn no_macro() -> Self {
        Self::new(ErrorCode::NoMacro, "No keyboard macro defined")
            .with_suggestions(vec!["Record one with kmacro-start-macro first".into()])
    }

    pub fn macro_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::MacroNotFound,
            format!("No keyboard macro named: {}", name),
        )
    }

    pub fn command_failed(command: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::CommandFailed,
            format!("{} failed: {}", command, reason),
        )
    }

    pub fn not_handled(command: &str) -> Self {
        Self::new(
            ErrorCode::NotHandled,
            format!("Command not handled: {}", command),
        )
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorCode::Interrupted, "Keyboard macro interrupted")
    }

    pub fn nesting_too_deep(max_depth: u32) -> Self {
        Self::new(
            ErrorCode::NestingTooDeep,
            format!("Keyboard macro nesting exceeded {} levels", max_depth),
        )
        .with_suggestions(vec![
            "A macro probably calls itself through kmacro-call-macro".into(),
        ])
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Storage, message)
    }

    pub fn invalid_config(field: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::InvalidConfig,
            format!("Invalid config value for '{}': {}", field, reason),
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Unknown, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::Storage, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorCode::Storage, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let e = Error::macro_not_found("indent-all");
        assert_eq!(e.to_string(), "[MacroNotFound] No keyboard macro named: indent-all");
    }

    #[test]
    fn serializes_code_screaming_case() {
        let json = serde_json::to_value(Error::interrupted()).unwrap();
        assert_eq!(json["code"], "INTERRUPTED");
        assert!(json.get("suggestions").is_none());
    }
}
