//! Named binary variable storage backing the attempt store

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors from a variable store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Variable store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid variable name {0:?}")]
    InvalidName(String),
}

/// Persistent key/value storage of raw byte records
pub trait VariableStore {
    /// Read a variable; `None` if it was never written
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a variable
    fn set(&mut self, name: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete a variable; deleting a missing variable is not an error
    fn remove(&mut self, name: &str) -> Result<(), StoreError>;
}

/// In-memory store, lost at exit
#[derive(Debug, Default, Clone)]
pub struct MemoryVariableStore {
    vars: HashMap<String, Vec<u8>>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.vars.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: &[u8]) -> Result<(), StoreError> {
        self.vars.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        self.vars.remove(name);
        Ok(())
    }
}

/// One file per variable inside a directory
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash leaves either the old or the new record.
#[derive(Debug, Clone)]
pub struct FileVariableStore {
    dir: PathBuf,
}

impl FileVariableStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.var", name)))
    }
}

impl VariableStore for FileVariableStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_of(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn set(&mut self, name: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_of(name)?;
        let temp = path.with_extension("var.tmp");

        fs::write(&temp, value)
            .and_then(|_| fs::rename(&temp, &path))
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("Stored {} ({} bytes)", path.display(), value.len());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
