//! Persistence port for strategy state.
//!
//! The manager only talks to [`StateStore`]; it never reaches for a global.
//! [`JsonFileStore`] keeps every key in one JSON object on disk, rewritten
//! atomically (temp file + rename). [`MemoryStore`] backs tests and dry runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::core::slug::{path_from_state_key, state_key};
use crate::core::types::StrategyState;

/// Key/value persistence consumed by the manager.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;

    /// Value for `key`, or `default` when absent.
    fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

/// Load the strategy state persisted for `path`.
pub fn load_strategy_state<S: StateStore + ?Sized>(
    store: &S,
    path: &str,
) -> Result<Option<StrategyState>> {
    let key = state_key(path);
    match store.get(&key)? {
        Some(value) => {
            let state = serde_json::from_value(value)
                .with_context(|| format!("parse strategy state {key}"))?;
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

/// Create or overwrite the strategy state for `state.endpoint_path`.
pub fn save_strategy_state<S: StateStore + ?Sized>(store: &S, state: &StrategyState) -> Result<()> {
    let key = state_key(&state.endpoint_path);
    debug!(key = %key, status = state.status.as_str(), "saving strategy state");
    let value = serde_json::to_value(state).context("serialize strategy state")?;
    store.set(&key, value)
}

pub fn delete_strategy_state<S: StateStore + ?Sized>(store: &S, path: &str) -> Result<()> {
    store.delete(&state_key(path))
}

/// Every persisted strategy state, ordered by endpoint path.
pub fn list_strategy_states<S: StateStore + ?Sized>(store: &S) -> Result<Vec<StrategyState>> {
    let mut states = Vec::new();
    for key in store.keys()? {
        let Some(path) = path_from_state_key(&key) else {
            continue;
        };
        if let Some(state) = load_strategy_state(store, &path)? {
            states.push(state);
        }
    }
    states.sort_by(|a, b| a.endpoint_path.cmp(&b.endpoint_path));
    Ok(states)
}

/// All keys in one JSON document.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read state store {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("parse state store {}", self.path.display()))
    }

    fn write_all(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(entries)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.into_keys().collect())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace state store {}", path.display()))?;
    Ok(())
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }
}
