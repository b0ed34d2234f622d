//! Persisted connection attempts
//!
//! This module handles:
//! - Validation of attempt records
//! - The attempt set and global record, kept in step
//! - Loading and saving through a variable store

mod store;
mod validate;
mod variables;

pub use store::{AttemptStore, PersistError, ATTEMPTS_VARIABLE, GLOBAL_VARIABLE};
pub use validate::{validate_attempt, ValidationError};
pub use variables::{FileVariableStore, MemoryVariableStore, StoreError, VariableStore};
