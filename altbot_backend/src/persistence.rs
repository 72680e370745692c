//! Whole-file JSON snapshots for the bot's keyed tables.
//!
//! Every table lives in memory behind its own lock and is rewritten in full
//! after each mutation, while the lock is still held, so two writers never
//! interleave their snapshots. A missing file loads as an empty table.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot, returning `T::default()` when the file does not exist yet.
    pub fn load_or_default<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// String-keyed table persisted as a JSON object.
#[derive(Debug)]
pub struct JsonTable<V> {
    name: &'static str,
    snapshot: JsonSnapshot,
    entries: Mutex<BTreeMap<String, V>>,
}

impl<V> JsonTable<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn open(name: &'static str, path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let entries: BTreeMap<String, V> = snapshot.load_or_default()?;
        tracing::debug!(table = name, entries = entries.len(), path = %snapshot.path().display(), "loaded table");
        Ok(Self {
            name,
            snapshot,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, V>) {
        if let Err(err) = self.snapshot.save(entries) {
            tracing::warn!(error = ?err, table = self.name, "failed to persist table snapshot");
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        let mut entries = self.lock();
        let previous = entries.insert(key.into(), value);
        self.persist(&entries);
        previous
    }

    /// Inserts only when the key is absent. Returns whether the value was stored.
    pub fn insert_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        let mut entries = self.lock();
        let key = key.into();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        self.persist(&entries);
        true
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let removed = entries.remove(key);
        if removed.is_some() {
            self.persist(&entries);
        }
        removed
    }

    /// Keeps entries matching `keep`; returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&str, &V) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, value| keep(key, value));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries);
        }
        removed
    }

    pub fn entries(&self) -> Vec<(String, V)> {
        self.lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        value: u32,
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table: JsonTable<Entry> =
            JsonTable::open("test", dir.path().join("absent.json")).expect("open");
        assert!(table.is_empty());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("table.json");
        {
            let table = JsonTable::open("test", &path).expect("open");
            table.insert("a", Entry { value: 1 });
            table.insert("b", Entry { value: 2 });
            table.remove("a");
        }
        let reopened: JsonTable<Entry> = JsonTable::open("test", &path).expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("b"), Some(Entry { value: 2 }));
        assert!(!reopened.contains("a"));
    }

    #[test]
    fn retain_reports_removed_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = JsonTable::open("test", dir.path().join("t.json")).expect("open");
        for value in 0..5 {
            table.insert(value.to_string(), Entry { value });
        }
        let removed = table.retain(|_, entry| entry.value % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn insert_if_absent_keeps_first_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = JsonTable::open("test", dir.path().join("t.json")).expect("open");
        assert!(table.insert_if_absent("k", Entry { value: 1 }));
        assert!(!table.insert_if_absent("k", Entry { value: 2 }));
        assert_eq!(table.get("k"), Some(Entry { value: 1 }));
    }

    #[test]
    fn snapshot_is_pretty_json_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.json");
        let table = JsonTable::open("test", &path).expect("open");
        table.insert("key", Entry { value: 7 });
        let raw = std::fs::read_to_string(&path).expect("read");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(parsed["key"]["value"], 7);
        assert!(raw.contains('\n'));
    }
}
