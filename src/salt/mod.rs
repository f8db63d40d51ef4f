//! Signing salt storage.
//!
//! The salt is a 64-character random secret generated lazily the first time
//! something needs to sign or verify a link. It lives in an [`OptionStore`],
//! the host's persistent key-value configuration, under a single key that is
//! not shared with any other secret.
//!
//! Generation goes through [`OptionStore::add`], an atomic "create if
//! absent" primitive, so concurrent first requests converge on one value.

mod file;

pub use file::FileOptionStore;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::ConfigurationError;

/// Length of a generated salt, in characters.
pub const SALT_LENGTH: usize = 64;

/// Characters a generated salt is drawn from (letters, digits and symbols).
const SALT_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_ []{}<>~`+=,.;:/?|";

/// Persistent key-value storage for the salt.
pub trait OptionStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, ConfigurationError>;

    /// Store `value` under `key` unless a value already exists.
    ///
    /// Returns `true` if this call stored the value, `false` if another value
    /// was already present. Must be atomic with respect to concurrent callers.
    fn add(&self, key: &str, value: &str) -> Result<bool, ConfigurationError>;
}

/// In-memory option store, for tests and hosts with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryOptionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a value unconditionally.
    pub fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }
}

impl OptionStore for MemoryOptionStore {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn add(&self, key: &str, value: &str) -> Result<bool, ConfigurationError> {
        let mut values = self.values.write();
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// The secret used to key checksums.
///
/// Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(String);

impl SigningKey {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}

/// Lazily creates and reads the signing salt.
pub struct SaltStore {
    store: Arc<dyn OptionStore>,
    option: String,
}

impl SaltStore {
    pub fn new(store: Arc<dyn OptionStore>, option: impl Into<String>) -> Self {
        SaltStore {
            store,
            option: option.into(),
        }
    }

    /// Storage key holding the salt.
    pub fn option_name(&self) -> &str {
        &self.option
    }

    /// Return the stored salt, generating and persisting one if absent.
    ///
    /// The store is read on every call; no copy is cached here.
    pub fn get_or_create_key(&self) -> Result<SigningKey, ConfigurationError> {
        if let Some(existing) = self.stored_key()? {
            return Ok(existing);
        }

        let generated = generate_salt()?;
        if self.store.add(&self.option, &generated)? {
            info!(target: "salt", option = %self.option, "generated signing salt");
            return Ok(SigningKey(generated));
        }

        // Lost the race: another request committed first.
        debug!(target: "salt", option = %self.option, "signing salt created concurrently");
        self.stored_key()?.ok_or_else(|| {
            warn!(target: "salt", option = %self.option, "signing salt vanished after add");
            ConfigurationError::Storage {
                key: self.option.clone(),
                message: "salt missing after concurrent creation".to_string(),
            }
        })
    }

    fn stored_key(&self) -> Result<Option<SigningKey>, ConfigurationError> {
        Ok(self
            .store
            .get(&self.option)?
            .filter(|value| !value.is_empty())
            .map(SigningKey))
    }
}

/// Generate a salt from the OS random source.
///
/// Uses rejection sampling so every charset entry is equally likely.
fn generate_salt() -> Result<String, ConfigurationError> {
    let limit = 256 - (256 % SALT_CHARSET.len());
    let mut salt = String::with_capacity(SALT_LENGTH);
    let mut buf = [0u8; SALT_LENGTH * 2];

    while salt.len() < SALT_LENGTH {
        getrandom::fill(&mut buf).map_err(|e| ConfigurationError::Random(e.to_string()))?;
        for byte in buf.iter().map(|b| *b as usize) {
            if byte >= limit {
                continue;
            }
            salt.push(SALT_CHARSET[byte % SALT_CHARSET.len()] as char);
            if salt.len() == SALT_LENGTH {
                break;
            }
        }
    }

    Ok(salt)
}
