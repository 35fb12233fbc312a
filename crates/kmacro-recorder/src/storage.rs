//! Macro persistence - JSON lines, one event per line

use crate::events::{EventLog, MacroEvent};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Every macro file starts with this prefix; other files in the directory are ignored
pub const FILE_PREFIX: &str = "kmacro-";
const FILE_SUFFIX: &str = ".jsonl";

/// First line of a macro file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    name: String,
    events: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredMacro {
    pub name: String,
    pub log: EventLog,
    pub binding: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

pub struct MacroStorage {
    dir: PathBuf,
}

impl MacroStorage {
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create macro dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Save a macro, replacing any previous file for the same name
    pub fn save(&self, name: &str, log: &EventLog, binding: Option<&str>) -> Result<PathBuf> {
        let path = self.file_path(name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);

        let header = Header {
            name: name.to_string(),
            events: log.len(),
            binding: binding.map(str::to_string),
            saved_at: Some(Utc::now()),
        };
        serde_json::to_writer(&mut w, &header)?;
        writeln!(w)?;

        for e in log {
            serde_json::to_writer(&mut w, e)?;
            writeln!(w)?;
        }

        w.flush()?;
        tracing::debug!(name, events = log.len(), path = %path.display(), "saved macro");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<StoredMacro> {
        let path = self.file_path(name);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines.next().context("Empty macro file")??;
        let header: Header = serde_json::from_str(&header_line)
            .with_context(|| format!("Bad header in {}", path.display()))?;

        let mut events = Vec::with_capacity(header.events);
        for (n, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: MacroEvent = serde_json::from_str(&line)
                .with_context(|| format!("{}: bad event on line {}", path.display(), n + 2))?;
            events.push(event);
        }

        if events.len() != header.events {
            bail!(
                "{}: header declares {} events, found {}",
                path.display(),
                header.events,
                events.len()
            );
        }

        Ok(StoredMacro {
            name: header.name,
            log: EventLog::from_events(events),
            binding: header.binding,
            saved_at: header.saved_at,
        })
    }

    /// Names of stored macros, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(s) = file_name.to_str() {
                if let Some(name) = s
                    .strip_prefix(FILE_PREFIX)
                    .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
                {
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", FILE_PREFIX, sanitize(name), FILE_SUFFIX))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmacro_core::KeyStroke;

    fn sample() -> EventLog {
        EventLog::from_events(vec![
            MacroEvent::from_key(&KeyStroke::from_char('H')),
            MacroEvent::MinibufferExit,
            MacroEvent::command("forward-char", None),
        ])
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        let path = storage.save("greet", &sample(), Some("C-c g")).unwrap();
        assert!(path.ends_with("kmacro-greet.jsonl"));

        let stored = storage.load("greet").unwrap();
        assert_eq!(stored.name, "greet");
        assert_eq!(stored.log, sample());
        assert_eq!(stored.binding.as_deref(), Some("C-c g"));
        assert!(stored.saved_at.is_some());
    }

    #[test]
    fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        storage.save("b", &sample(), None).unwrap();
        storage.save("a", &sample(), None).unwrap();
        fs::write(dir.path().join("notes.jsonl"), "{}").unwrap();
        fs::write(dir.path().join("kmacro-.jsonl"), "{}").unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a", "b"]);
        storage.delete("a").unwrap();
        assert_eq!(storage.list().unwrap(), vec!["b"]);
        assert!(!storage.exists("a"));
    }

    #[test]
    fn load_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        fs::write(
            dir.path().join("kmacro-cut.jsonl"),
            "{\"name\":\"cut\",\"events\":2}\n{\"e\":\"x\"}\n",
        )
        .unwrap();
        let err = storage.load("cut").unwrap_err();
        assert!(err.to_string().contains("declares 2 events"));
    }

    #[test]
    fn sanitize_replaces_path_chars() {
        assert_eq!(sanitize("../x y"), "___x_y");
    }
}
