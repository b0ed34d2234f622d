//! Attempt store: the persisted set of attempts and the global record

use nvmf_shared::codec::{self, CodecError};
use nvmf_shared::{AttemptConfig, GlobalConfig};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::validate::{validate_attempt, ValidationError};
use super::variables::{StoreError, VariableStore};

/// Variable holding the packed global record
pub const GLOBAL_VARIABLE: &str = "NvmeofGlobalData";

/// Variable holding the packed attempt set
pub const ATTEMPTS_VARIABLE: &str = "NvmeofAttemptData";

/// Errors loading or saving the store
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Record {variable}: {source}")]
    Codec {
        variable: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("Stored attempt {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

/// Named connection attempts plus host-wide defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptStore {
    global: GlobalConfig,
    attempts: Vec<AttemptConfig>,
}

impl AttemptStore {
    /// Fresh store as created at first initialization
    pub fn new() -> Self {
        Self {
            global: GlobalConfig {
                enabled: true,
                host_id: Uuid::new_v4(),
                ..Default::default()
            },
            attempts: Vec::new(),
        }
    }

    /// Load both records
    ///
    /// A record of an unsupported version, or a stored attempt that fails
    /// validation, is an error.
    pub fn load(vars: &dyn VariableStore) -> Result<Self, PersistError> {
        let global = match vars.get(GLOBAL_VARIABLE)? {
            Some(raw) => codec::decode_global(&raw).map_err(|source| PersistError::Codec {
                variable: GLOBAL_VARIABLE,
                source,
            })?,
            None => {
                info!("No global record, initializing defaults");
                return Ok(Self::new());
            }
        };

        let attempts = match vars.get(ATTEMPTS_VARIABLE)? {
            Some(raw) => codec::decode_attempt_set(&raw).map_err(|source| PersistError::Codec {
                variable: ATTEMPTS_VARIABLE,
                source,
            })?,
            None => Vec::new(),
        };

        for (index, attempt) in attempts.iter().enumerate() {
            let earlier = attempts[..index].iter().map(|a| a.name.as_str());
            validate_attempt(attempt, earlier)
                .map_err(|source| PersistError::Invalid { index, source })?;
        }

        let mut store = Self { global, attempts };
        if store.global.target_count as usize != store.attempts.len() {
            debug!(
                "Global target count {} disagrees with {} stored attempts",
                store.global.target_count,
                store.attempts.len()
            );
            store.sync_count();
        }
        Ok(store)
    }

    /// Load, falling back to defaults when the stored records are unusable
    pub fn load_or_default(vars: &dyn VariableStore) -> Self {
        match Self::load(vars) {
            Ok(store) => store,
            Err(e) => {
                warn!("Ignoring stored attempts: {}", e);
                Self::new()
            }
        }
    }

    /// Persist the global record and the attempt set
    pub fn save(&self, vars: &mut dyn VariableStore) -> Result<(), PersistError> {
        let global = codec::encode_global(&self.global).map_err(|source| PersistError::Codec {
            variable: GLOBAL_VARIABLE,
            source,
        })?;
        let attempts =
            codec::encode_attempt_set(&self.attempts).map_err(|source| PersistError::Codec {
                variable: ATTEMPTS_VARIABLE,
                source,
            })?;

        vars.set(ATTEMPTS_VARIABLE, &attempts)?;
        vars.set(GLOBAL_VARIABLE, &global)?;
        Ok(())
    }

    /// Validate and append an attempt
    pub fn add(&mut self, attempt: AttemptConfig) -> Result<(), ValidationError> {
        validate_attempt(&attempt, self.attempts.iter().map(|a| a.name.as_str()))?;
        debug!("Attempt {} added", attempt.name);
        self.attempts.push(attempt);
        self.sync_count();
        Ok(())
    }

    /// Replace the attempt called `name`; the new one may rename it
    pub fn update(&mut self, name: &str, attempt: AttemptConfig) -> Result<(), ValidationError> {
        let index = self
            .position(name)
            .ok_or_else(|| ValidationError::UnknownAttempt(name.to_string()))?;
        let others = self
            .attempts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, a)| a.name.as_str());
        validate_attempt(&attempt, others)?;
        self.attempts[index] = attempt;
        Ok(())
    }

    /// Remove an attempt, returning it
    pub fn remove(&mut self, name: &str) -> Result<AttemptConfig, ValidationError> {
        let index = self
            .position(name)
            .ok_or_else(|| ValidationError::UnknownAttempt(name.to_string()))?;
        let removed = self.attempts.remove(index);
        self.sync_count();
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<&AttemptConfig> {
        self.attempts.iter().find(|a| a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptConfig> {
        self.attempts.iter()
    }

    /// Attempts to connect at startup
    pub fn enabled(&self) -> impl Iterator<Item = &AttemptConfig> {
        self.attempts.iter().filter(|a| a.enabled)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    /// Change host-wide defaults; the target count stays derived
    pub fn update_global(&mut self, f: impl FnOnce(&mut GlobalConfig)) {
        f(&mut self.global);
        self.sync_count();
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.attempts.iter().position(|a| a.name == name)
    }

    fn sync_count(&mut self) {
        self.global.target_count = self.attempts.len().min(u16::MAX as usize) as u16;
    }
}

impl Default for AttemptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{FileVariableStore, MemoryVariableStore};
    use bytes::BufMut;
    use tempfile::TempDir;

    fn attempt(name: &str) -> AttemptConfig {
        AttemptConfig::new(name, "192.168.100.29", 4420, "nvmet-test")
    }

    #[test]
    fn test_count_tracks_changes() {
        let mut store = AttemptStore::new();
        store.add(attempt("a")).unwrap();
        store.add(attempt("b")).unwrap();
        assert_eq!(store.global().target_count, 2);

        assert_eq!(
            store.add(attempt("a")),
            Err(ValidationError::DuplicateName("a".into()))
        );

        store.remove("a").unwrap();
        assert_eq!(store.global().target_count, 1);
        assert!(matches!(store.remove("a"), Err(ValidationError::UnknownAttempt(_))));

        store.update_global(|g| g.target_count = 99);
        assert_eq!(store.global().target_count, 1);
    }

    #[test]
    fn test_update_allows_same_name() {
        let mut store = AttemptStore::new();
        store.add(attempt("a")).unwrap();
        store.add(attempt("b")).unwrap();

        let mut changed = attempt("a");
        changed.target_port = 4421;
        store.update("a", changed).unwrap();
        assert_eq!(store.get("a").map(|a| a.target_port), Some(4421));

        assert_eq!(
            store.update("a", attempt("b")),
            Err(ValidationError::DuplicateName("b".into()))
        );
    }

    #[test]
    fn test_enabled_filter() {
        let mut store = AttemptStore::new();
        store.add(attempt("on")).unwrap();
        let mut off = attempt("off");
        off.enabled = false;
        store.add(off).unwrap();

        let names: Vec<_> = store.enabled().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["on"]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut vars = FileVariableStore::open(dir.path()).unwrap();

        let mut store = AttemptStore::new();
        store.add(attempt("boot0")).unwrap();
        store.update_global(|g| g.host_nqn = "nqn.2014-08.org.example:host".into());
        store.save(&mut vars).unwrap();

        let loaded = AttemptStore::load(&vars).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut vars = MemoryVariableStore::new();
        let store = AttemptStore::new();
        store.save(&mut vars).unwrap();

        let mut raw = vars.get(GLOBAL_VARIABLE).unwrap().unwrap();
        (&mut raw[..2]).put_u16_le(codec::RECORD_VERSION + 1);
        vars.set(GLOBAL_VARIABLE, &raw).unwrap();

        assert!(matches!(
            AttemptStore::load(&vars),
            Err(PersistError::Codec {
                source: CodecError::UnsupportedVersion { .. },
                ..
            })
        ));

        let fallback = AttemptStore::load_or_default(&vars);
        assert!(fallback.is_empty());
        assert_ne!(fallback.global().host_id, store.global().host_id);
    }

    #[test]
    fn test_first_load_initializes() {
        let vars = MemoryVariableStore::new();
        let store = AttemptStore::load(&vars).unwrap();
        assert!(store.global().enabled);
        assert!(!store.global().host_id.is_nil());
    }

    #[test]
    fn test_invalid_stored_attempts_rejected() {
        let mut vars = MemoryVariableStore::new();
        AttemptStore::new().save(&mut vars).unwrap();

        let mut bad = attempt("dup");
        bad.retry_count = 200;
        let raw = codec::encode_attempt_set(&[bad.clone(), bad]).unwrap();
        vars.set(ATTEMPTS_VARIABLE, &raw).unwrap();

        assert!(matches!(
            AttemptStore::load(&vars),
            Err(PersistError::Invalid {
                index: 0,
                source: ValidationError::RetryCountOutOfRange(200),
            })
        ));

        // Duplicate names are caught even when each record is valid alone
        let raw = codec::encode_attempt_set(&[attempt("dup"), attempt("dup")]).unwrap();
        vars.set(ATTEMPTS_VARIABLE, &raw).unwrap();
        assert!(matches!(
            AttemptStore::load(&vars),
            Err(PersistError::Invalid {
                index: 1,
                source: ValidationError::DuplicateName(_),
            })
        ));
        assert!(AttemptStore::load_or_default(&vars).is_empty());
    }

    #[test]
    fn test_nul_in_text_never_stored() {
        let mut store = AttemptStore::new();
        assert_eq!(
            store.add(AttemptConfig::new("boot0", "192.168.100.29", 4420, "nqn.a\0tail")),
            Err(ValidationError::EmbeddedNul("subsystem_nqn"))
        );
        assert!(store.is_empty());

        // Host-wide values bypass attempt validation; saving still refuses them
        store.update_global(|g| g.host_nqn = "nqn.host\0tail".into());
        let mut vars = MemoryVariableStore::new();
        assert!(matches!(
            store.save(&mut vars),
            Err(PersistError::Codec {
                source: CodecError::EmbeddedNul { field: "host_nqn" },
                ..
            })
        ));
    }
}
