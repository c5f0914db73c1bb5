//! Layered configuration store
//!
//! The store holds two trees:
//! - defaults, produced once by the portal module and never mutated
//! - overrides ("custom"), loaded from the persisted file, written by
//!   handlers during the run and saved back on teardown
//!
//! Paths are dot-separated (`menu.login_page.url`). Reads consult the
//! overrides first and fall back to the defaults; when both sides hold a
//! table at the requested path the result is their deep merge.

use crate::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

/// Subtree that is dropped before persisting
pub const TEMPORARY_KEY: &str = "temporary";

/// What [`ConfigStore::persist`] did with the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Overrides were written to the file
    Written,
    /// Overrides became empty and the existing file was deleted
    Removed,
    /// Nothing changed since the last load or persist
    Unchanged,
    /// The store has no backing file
    Detached,
}

/// Result of walking a tree along a path
enum Lookup<'a> {
    Found(&'a Value),
    Absent,
    /// A non-table value sits on the path before its end
    Shadowed,
}

/// Configuration with immutable defaults and a persisted override layer
#[derive(Debug, Clone)]
pub struct ConfigStore {
    defaults: Table,
    custom: Table,
    file: Option<PathBuf>,
    file_existed: bool,
    changed: BTreeSet<String>,
}

impl ConfigStore {
    /// Creates a store with no overrides and no backing file
    pub fn new(defaults: Table) -> Self {
        Self {
            defaults,
            custom: Table::new(),
            file: None,
            file_existed: false,
            changed: BTreeSet::new(),
        }
    }

    /// Creates a store from defaults and an optional persisted payload
    ///
    /// # Arguments
    ///
    /// * `defaults` - The default tree from the portal module
    /// * `persisted` - TOML text of previously saved overrides, if any
    ///
    /// # Returns
    ///
    /// * `Ok(ConfigStore)` - Defaults overlaid with the decoded overrides
    /// * `Err(ConfigError)` - The persisted payload is not valid TOML
    pub fn load(defaults: Table, persisted: Option<&str>) -> ConfigResult<Self> {
        let custom = match persisted {
            Some(text) => toml::from_str::<Table>(text)?,
            None => Table::new(),
        };

        Ok(Self {
            custom,
            ..Self::new(defaults)
        })
    }

    /// Opens a store backed by a file
    ///
    /// A missing file means "no overrides yet". Any other read failure, or a
    /// file that does not decode, is an error: the run must not start with
    /// unknown state.
    pub fn open(defaults: Table, path: &Path) -> ConfigResult<Self> {
        let persisted = match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut store = Self::load(defaults, persisted.as_deref())?;
        store.file_existed = persisted.is_some();
        store.file = Some(path.to_path_buf());

        tracing::debug!(
            "Opened configuration {} (overrides on disk: {})",
            path.display(),
            store.file_existed
        );

        Ok(store)
    }

    /// Returns the merged value at `path`, or `None` if neither layer has it
    pub fn get(&self, path: &str) -> Option<Value> {
        let keys = split_path(path);
        if keys.is_empty() {
            let mut merged = self.defaults.clone();
            merge_tables(&mut merged, &self.custom);
            return Some(Value::Table(merged));
        }

        match (lookup(&self.defaults, &keys), lookup(&self.custom, &keys)) {
            (Lookup::Found(Value::Table(base)), Lookup::Found(Value::Table(overlay))) => {
                let mut merged = base.clone();
                merge_tables(&mut merged, overlay);
                Some(Value::Table(merged))
            }
            (_, Lookup::Found(value)) => Some(value.clone()),
            (_, Lookup::Shadowed) => None,
            (Lookup::Found(value), Lookup::Absent) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the value at `path` if it is a non-empty string
    pub fn get_str(&self, path: &str) -> Option<String> {
        match self.get(path) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Returns the value at `path` deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<Option<T>> {
        match self.get(path) {
            Some(value) => value
                .try_into::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Shape {
                    path: path.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Writes `value` into the override layer
    ///
    /// Intermediate tables are created as needed. Returns the merged value
    /// that was visible at `path` before the write.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Option<Value> {
        let keys = split_path(path);
        if keys.is_empty() {
            tracing::warn!("Ignoring write to the configuration root");
            return None;
        }

        let value = value.into();
        let previous = self.get(path);

        if matches!(lookup(&self.custom, &keys), Lookup::Found(current) if *current == value) {
            return previous;
        }

        insert_at(&mut self.custom, &keys, value);
        self.changed.insert(keys.join("."));
        previous
    }

    /// Removes the override at `path`
    ///
    /// Afterwards `get(path)` yields the default value, if any. Empty parent
    /// tables left behind are pruned so that an emptied override layer is
    /// recognized as empty. Returns the merged value visible before removal.
    pub fn unset(&mut self, path: &str) -> Option<Value> {
        let keys = split_path(path);
        let previous = self.get(path);

        if remove_at(&mut self.custom, &keys).is_some() {
            self.changed.insert(keys.join("."));
        }

        previous
    }

    /// Drops the temporary subtree from the override layer
    pub fn clear_temporary(&mut self) {
        self.custom.remove(TEMPORARY_KEY);
    }

    /// Serializes the override layer
    pub fn dump(&self) -> ConfigResult<String> {
        Ok(toml::to_string(&self.custom)?)
    }

    /// Saves the override layer to the backing file
    ///
    /// Writes only when something changed since load. When the override
    /// layer is empty and a file existed, the file is deleted: absence of
    /// overrides is represented by absence of the file.
    pub fn persist(&mut self) -> ConfigResult<PersistOutcome> {
        let Some(path) = self.file.clone() else {
            return Ok(PersistOutcome::Detached);
        };

        if self.custom.is_empty() {
            self.changed.clear();
            if self.file_existed && path.exists() {
                std::fs::remove_file(&path)?;
                self.file_existed = false;
                tracing::debug!("Removed empty configuration {}", path.display());
                return Ok(PersistOutcome::Removed);
            }
            return Ok(PersistOutcome::Unchanged);
        }

        if self.changed.is_empty() {
            return Ok(PersistOutcome::Unchanged);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(&path, self.dump()?)?;
        tracing::debug!(
            "Saved {} changed configuration path(s) to {}",
            self.changed.len(),
            path.display()
        );

        self.file_existed = true;
        self.changed.clear();
        Ok(PersistOutcome::Written)
    }

    /// Returns true if any override was written or removed since load
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Paths written or removed since load, in sorted order
    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    /// The default layer
    pub fn defaults(&self) -> &Table {
        &self.defaults
    }

    /// The override layer
    pub fn custom(&self) -> &Table {
        &self.custom
    }

    /// The backing file, if any
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

/// Splits a dot-separated path, ignoring empty segments
fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|segment| !segment.is_empty()).collect()
}

fn lookup<'a>(table: &'a Table, keys: &[&str]) -> Lookup<'a> {
    let Some((last, parents)) = keys.split_last() else {
        return Lookup::Absent;
    };

    let mut current = table;
    for key in parents {
        match current.get(*key) {
            Some(Value::Table(child)) => current = child,
            Some(_) => return Lookup::Shadowed,
            None => return Lookup::Absent,
        }
    }

    match current.get(*last) {
        Some(value) => Lookup::Found(value),
        None => Lookup::Absent,
    }
}

fn insert_at(table: &mut Table, keys: &[&str], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut current = table;
    for key in parents {
        if !matches!(current.get(*key), Some(Value::Table(_))) {
            current.insert(key.to_string(), Value::Table(Table::new()));
        }
        current = match current.get_mut(*key) {
            Some(Value::Table(child)) => child,
            _ => return,
        };
    }

    current.insert(last.to_string(), value);
}

fn remove_at(table: &mut Table, keys: &[&str]) -> Option<Value> {
    let (first, rest) = keys.split_first()?;
    if rest.is_empty() {
        return table.remove(*first);
    }

    let removed = match table.get_mut(*first) {
        Some(Value::Table(child)) => remove_at(child, rest),
        _ => None,
    };

    if matches!(table.get(*first), Some(Value::Table(child)) if child.is_empty()) {
        table.remove(*first);
    }

    removed
}

/// Deep-merges `overlay` into `base`; overlay values win key by key
pub fn merge_tables(base: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        if let (Some(Value::Table(existing)), Value::Table(incoming)) = (base.get_mut(key), value) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}
