//! Test run report
//!
//! An append/update sink for one test run. Handlers merge result
//! fragments into it concurrently; the document is written out as JSON
//! when the run ends.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Key under which per-item entries accumulate
pub const ENTRIES_KEY: &str = "entries";

/// Accumulated result of one test run
#[derive(Debug)]
pub struct Report {
    test_name: String,
    path: PathBuf,
    document: Mutex<Map<String, Value>>,
}

impl Report {
    /// Create an empty report for `test_name`, written to `path` on flush
    pub fn new(test_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let test_name = test_name.into();
        let mut document = Map::new();
        document.insert("test_name".to_string(), Value::String(test_name.clone()));
        Self {
            test_name,
            path: path.into(),
            document: Mutex::new(document),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge fragment keys into the report, replacing existing values
    pub fn update(&self, fragment: Map<String, Value>) {
        let mut document = self.lock();
        for (key, value) in fragment {
            debug!("Report {}: updating {}", self.test_name, key);
            document.insert(key, value);
        }
    }

    /// Merge a single key
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().insert(key.into(), value.into());
    }

    /// Append a per-item result under `entries`
    pub fn record_entry(&self, index: usize, value: Value) {
        let mut entry = Map::new();
        entry.insert("index".to_string(), Value::from(index));
        entry.insert("result".to_string(), value);

        let mut document = self.lock();
        let entries = document
            .entry(ENTRIES_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entries {
            Value::Array(list) => list.push(Value::Object(entry)),
            other => *other = Value::Array(vec![Value::Object(entry)]),
        }
    }

    /// Current value of a key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    /// Write the report to its output path
    pub fn flush(&self) -> Result<()> {
        let body = serde_json::to_string_pretty(&Value::Object(self.snapshot()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create report directory: {:?}", parent))?;
            }
        }

        std::fs::write(&self.path, body)
            .with_context(|| format!("Failed to write report: {:?}", self.path))?;
        info!("Report written to {:?}", self.path);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Build a fragment from key/value pairs
pub fn fragment<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_merges_and_overwrites() {
        let report = Report::new("tcp_connect", "report.json");
        report.update(fragment([("torrc", json!("SocksPort 9050")), ("a", json!(1))]));
        report.update(fragment([("a", json!(2))]));

        assert_eq!(report.get("torrc"), Some(json!("SocksPort 9050")));
        assert_eq!(report.get("a"), Some(json!(2)));
        assert_eq!(report.get("test_name"), Some(json!("tcp_connect")));
    }

    #[test]
    fn test_entries_accumulate_in_order() {
        let report = Report::new("bridget", "report.json");
        report.record_entry(3, json!({"ok": true}));
        report.record_entry(1, json!({"ok": false}));

        let entries = report.get(ENTRIES_KEY).unwrap();
        assert_eq!(entries[0]["index"], json!(3));
        assert_eq!(entries[1]["result"]["ok"], json!(false));
    }

    #[test]
    fn test_flush_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let report = Report::new("tcp_connect", &path);
        report.set("probe_version", "0.1.0");
        report.flush().unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["probe_version"], json!("0.1.0"));
    }
}
