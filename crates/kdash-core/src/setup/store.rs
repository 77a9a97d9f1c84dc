//! Setup persistence

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{validate, Setup, SetupError};

/// Storage for the setup document
pub trait ConfigStore: Send + Sync {
    /// Load the current setup
    fn load(&self) -> Result<Setup, SetupError>;

    /// Write an already validated setup
    fn persist(&self, setup: &Setup) -> Result<(), SetupError>;

    /// Validate a client-supplied document and persist it
    fn save(&self, raw: Value) -> Result<Setup, SetupError> {
        let setup = validate(raw)?;
        self.persist(&setup)?;
        Ok(setup)
    }

    /// Restore and persist the default setup
    fn reset(&self) -> Result<Setup, SetupError> {
        let setup = Setup::default();
        self.persist(&setup)?;
        Ok(setup)
    }

    /// Store a new odometer reading, leaving the rest of the setup untouched
    fn update_odometer(&self, km: f64) -> Result<(), SetupError> {
        let mut setup = self.load()?;
        setup.odo.value = km;
        self.persist(&setup)
    }
}

impl<S: ConfigStore + ?Sized> ConfigStore for Arc<S> {
    fn load(&self) -> Result<Setup, SetupError> {
        (**self).load()
    }

    fn persist(&self, setup: &Setup) -> Result<(), SetupError> {
        (**self).persist(setup)
    }

    fn save(&self, raw: Value) -> Result<Setup, SetupError> {
        (**self).save(raw)
    }

    fn reset(&self) -> Result<Setup, SetupError> {
        (**self).reset()
    }

    fn update_odometer(&self, km: f64) -> Result<(), SetupError> {
        (**self).update_odometer(km)
    }
}

/// Default location of the setup file
pub fn default_setup_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kdash")
        .join("setup.json")
}

/// JSON file backed store.
///
/// Writes go to a sibling temp file and are renamed into place. A missing
/// file is created from defaults on first load.
pub struct FileConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileConfigStore {
    /// Create a store for the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the setup file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io_error(&self, source: std::io::Error) -> SetupError {
        SetupError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_locked(&self) -> Result<Setup, SetupError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no setup file, writing defaults");
            let setup = Setup::default();
            self.write_locked(&setup)?;
            return Ok(setup);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        serde_json::from_str(&content).map_err(|source| SetupError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_locked(&self, setup: &Setup) -> Result<(), SetupError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let content = serde_json::to_string_pretty(setup).map_err(|source| SetupError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!(path = %self.path.display(), "setup written");
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Setup, SetupError> {
        let _guard = self.guard();
        self.read_locked()
    }

    fn persist(&self, setup: &Setup) -> Result<(), SetupError> {
        let _guard = self.guard();
        self.write_locked(setup)
    }

    fn update_odometer(&self, km: f64) -> Result<(), SetupError> {
        let _guard = self.guard();
        let mut setup = self.read_locked()?;
        setup.odo.value = km;
        self.write_locked(&setup)
    }
}
