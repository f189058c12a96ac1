// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings store and target registry.
//!
//! Srcship remembers where each project gets deployed to. The remembered
//! location is called the __deployment target__ of a project, and is keyed by
//! the absolute path of the project root. All targets live in one entry of a
//! simple key/value __settings store__ under the `deployment` key.
//!
//! # State File Layout
//!
//! The default settings store is a TOML file, `$XDG_DATA_HOME/srcship/state.toml`.
//! Each top-level key is one setting. Thus, the deployment targets of two
//! projects look like this:
//!
//! ```toml
//! [deployment]
//! "/home/jdoe/src/payroll" = "/home/JDOE/builds/payroll"
//! "/home/jdoe/src/orders" = "JDOELIB"
//! ```
//!
//! The store is shared by every srcship process. Locks are only held while
//! the in-memory table is touched, never across file I/O.

use std::{
    collections::HashMap,
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use toml::{Table, Value};
use tracing::{debug, instrument};

/// Key that all deployment targets are stored under.
pub const DEPLOYMENT_KEY: &str = "deployment";

/// Simple key/value settings storage.
pub trait SettingsStore: Send + Sync {
    /// Get value of setting.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Set value of setting.
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Settings store backed by a TOML file.
#[derive(Debug)]
pub struct TomlSettingsStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl TomlSettingsStore {
    /// Open settings store at target path.
    ///
    /// A missing file is treated as an empty store. The file is created on
    /// the first write.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if state file exists but cannot be read.
    /// - Return [`StoreError::Deserialize`] if state file is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = if path.exists() {
            let content = read_to_string(&path).map_err(|err| StoreError::Read {
                source: err,
                path: path.clone(),
            })?;
            content.parse::<Table>()?
        } else {
            Table::new()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Path to state file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn save(&self, table: &Table) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty());
        if let Some(parent) = parent {
            mkdirp::mkdirp(parent).map_err(|err| StoreError::Write {
                source: err,
                path: self.path.clone(),
            })?;
        }

        let content = toml::ser::to_string_pretty(table)?;
        write(&self.path, content).map_err(|err| StoreError::Write {
            source: err,
            path: self.path.clone(),
        })?;

        Ok(())
    }
}

impl SettingsStore for TomlSettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        // INVARIANT: Release the table lock before touching the file system.
        let snapshot = {
            let mut table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
            table.insert(key.to_string(), value);
            table.clone()
        };

        self.save(&snapshot)
    }
}

/// Settings store kept purely in memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettingsStore {
    /// Construct new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Registry of deployment targets keyed by project root.
#[derive(Debug)]
pub struct TargetRegistry<S>
where
    S: SettingsStore,
{
    store: S,
}

impl<S> TargetRegistry<S>
where
    S: SettingsStore,
{
    /// Construct new target registry on top of a settings store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Get deployment target of project root.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if settings store cannot be read.
    #[instrument(skip(self, project_root), level = "debug")]
    pub fn get(&self, project_root: impl AsRef<Path>) -> Result<Option<String>> {
        let key = root_key(project_root.as_ref());
        let targets = self.targets()?;
        let target = targets
            .get(&key)
            .and_then(Value::as_str)
            .map(ToString::to_string);
        debug!("target of {key:?} is {target:?}");

        Ok(target)
    }

    /// Set deployment target of project root.
    ///
    /// Replaces any target the project root had before.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::EmptyTarget`] if target is blank.
    /// - Return [`StoreError`] if settings store cannot be written.
    #[instrument(skip(self, project_root, target), level = "debug")]
    pub fn set(&self, project_root: impl AsRef<Path>, target: impl Into<String>) -> Result<()> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(StoreError::EmptyTarget);
        }

        let key = root_key(project_root.as_ref());
        let mut targets = self.targets()?;
        debug!("set target of {key:?} to {target:?}");
        targets.insert(key, Value::String(target));
        self.store.set(DEPLOYMENT_KEY, Value::Table(targets))
    }

    fn targets(&self) -> Result<Table> {
        match self.store.get(DEPLOYMENT_KEY)? {
            Some(Value::Table(table)) => Ok(table),
            Some(_) => Err(StoreError::Malformed(DEPLOYMENT_KEY.into())),
            None => Ok(Table::new()),
        }
    }
}

fn root_key(project_root: &Path) -> String {
    project_root.to_string_lossy().into_owned()
}

/// Settings store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// State file cannot be read from.
    #[error("failed to read from state file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be written to.
    #[error("failed to write to state file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize state file.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize state file.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Setting exists but has the wrong shape.
    #[error("setting {0:?} is malformed")]
    Malformed(String),

    /// Blank deployment target.
    #[error("deployment target cannot be empty")]
    EmptyTarget,

    /// Another thread panicked while holding the store.
    #[error("settings store lock poisoned")]
    Poisoned,
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn registry_get_and_set() -> anyhow::Result<()> {
        let registry = TargetRegistry::new(MemorySettingsStore::new());
        assert_eq!(registry.get("/home/jdoe/payroll")?, None);

        registry.set("/home/jdoe/payroll", "JDOELIB")?;
        registry.set("/home/jdoe/orders", "/home/JDOE/builds/orders")?;
        registry.set("/home/jdoe/payroll", "PAYLIB")?;

        assert_eq!(registry.get("/home/jdoe/payroll")?, Some("PAYLIB".into()));
        assert_eq!(
            registry.get("/home/jdoe/orders")?,
            Some("/home/JDOE/builds/orders".into())
        );

        Ok(())
    }

    #[test]
    fn registry_rejects_blank_target() {
        let registry = TargetRegistry::new(MemorySettingsStore::new());
        let result = registry.set("/home/jdoe/payroll", "   ");
        assert!(matches!(result, Err(StoreError::EmptyTarget)));
    }

    #[sealed_test]
    fn toml_store_persists_targets() -> anyhow::Result<()> {
        let registry = TargetRegistry::new(TomlSettingsStore::open("state/state.toml")?);
        registry.set("/home/jdoe/payroll", "JDOELIB")?;

        let result = std::fs::read_to_string("state/state.toml")?;
        let expect = indoc! {r#"
            [deployment]
            "/home/jdoe/payroll" = "JDOELIB"
        "#};
        assert_eq!(result, expect);

        let reopened = TargetRegistry::new(TomlSettingsStore::open("state/state.toml")?);
        assert_eq!(reopened.get("/home/jdoe/payroll")?, Some("JDOELIB".into()));

        Ok(())
    }

    #[sealed_test]
    fn toml_store_rejects_malformed_deployment_key() -> anyhow::Result<()> {
        std::fs::write("state.toml", "deployment = 42\n")?;
        let registry = TargetRegistry::new(TomlSettingsStore::open("state.toml")?);
        assert!(matches!(
            registry.get("/home/jdoe/payroll"),
            Err(StoreError::Malformed(_))
        ));

        Ok(())
    }
}
