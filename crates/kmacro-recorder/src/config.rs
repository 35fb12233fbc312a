//! Engine configuration
//!
//! Read from a JSON file; every field is optional:
//!
//! ```json
//! { "history_capacity": 8, "auto_load": "named", "auto_load_names": ["indent"] }
//! ```

use kmacro_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command ids the recorder and player treat specially
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandIds {
    pub universal_argument: String,
    pub digit_argument: String,
    pub negative_argument: String,
    pub extended_command: String,
    pub keyboard_quit: String,
    pub start_macro: String,
    pub end_macro: String,
    pub end_and_call_macro: String,
    pub call_macro: String,
    pub call_named: String,
    /// Internal marker sent when a macro is ended through a call command
    pub end_call_marker: String,
    /// Synthetic command produced by the auto-insert correction
    pub insert_matched: String,
    /// Reserved parameter carrying the universal argument
    pub repeat_count: String,
    /// Parameter naming the macro for `call_named`
    pub macro_name: String,
}

impl Default for CommandIds {
    fn default() -> Self {
        Self {
            universal_argument: "universal-argument".into(),
            digit_argument: "digit-argument".into(),
            negative_argument: "negative-argument".into(),
            extended_command: "execute-extended-command".into(),
            keyboard_quit: "keyboard-quit".into(),
            start_macro: "kmacro-start-macro".into(),
            end_macro: "kmacro-end-macro".into(),
            end_and_call_macro: "kmacro-end-and-call-macro".into(),
            call_macro: "kmacro-call-macro".into(),
            call_named: "kmacro-call-named".into(),
            end_call_marker: "kmacro-end-call-marker".into(),
            insert_matched: "kmacro-insert-matched".into(),
            repeat_count: "repeat-count".into(),
            macro_name: "name".into(),
        }
    }
}

impl CommandIds {
    /// Commands that end the definition they appear in
    pub fn is_exit(&self, id: &str) -> bool {
        id == self.end_macro || id == self.end_and_call_macro
    }

    /// Parts of a universal-argument prefix
    pub fn is_prefix_argument(&self, id: &str) -> bool {
        id == self.universal_argument || id == self.digit_argument || id == self.negative_argument
    }
}

/// Which stored macros are loaded at startup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AutoLoadPolicy {
    All,
    #[default]
    None,
    Subset(Vec<String>),
}

impl AutoLoadPolicy {
    /// Lenient parse; anything unrecognized falls back to `None`
    pub fn parse(value: &str, names: &[String]) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => AutoLoadPolicy::All,
            "none" | "" => AutoLoadPolicy::None,
            "named" | "subset" => AutoLoadPolicy::Subset(names.to_vec()),
            other => {
                tracing::warn!(value = other, "unrecognized auto_load policy, using none");
                AutoLoadPolicy::None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history_capacity: usize,
    pub max_depth: u32,
    pub macro_dir: Option<PathBuf>,
    pub auto_load: String,
    pub auto_load_names: Vec<String>,
    pub commands: CommandIds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 8,
            max_depth: 64,
            macro_dir: None,
            auto_load: "none".into(),
            auto_load_names: Vec::new(),
            commands: CommandIds::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::invalid_config(&path.display().to_string(), &e.to_string())
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn auto_load_policy(&self) -> AutoLoadPolicy {
        AutoLoadPolicy::parse(&self.auto_load, &self.auto_load_names)
    }

    /// Configured macro directory, else `$HOME/.kmacro`
    pub fn macro_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.macro_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var("HOME")
            .map_err(|_| Error::invalid_config("macro_dir", "not set and HOME is undefined"))?;
        Ok(PathBuf::from(home).join(".kmacro"))
    }

    fn normalize(&mut self) {
        if self.history_capacity == 0 {
            tracing::warn!("history_capacity of 0 clamped to 1");
            self.history_capacity = 1;
        }
        if self.max_depth == 0 {
            self.max_depth = 1;
        }
    }
}
