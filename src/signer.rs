//! Destination checksums.
//!
//! A checksum is the HMAC-SHA256 of the exact destination string, keyed with
//! the site's signing salt, hex encoded and truncated. The same URL always
//! yields the same checksum for a given salt.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::config::{DEFAULT_CHECKSUM_LENGTH, MAX_CHECKSUM_LENGTH, MIN_CHECKSUM_LENGTH};
use crate::error::ConfigurationError;
use crate::salt::{SaltStore, SigningKey};

type HmacSha256 = Hmac<Sha256>;

/// A truncated, lowercase hex checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Signs and verifies destinations against the current salt.
pub struct Signer {
    salts: Arc<SaltStore>,
    length: usize,
}

impl Signer {
    pub fn new(salts: Arc<SaltStore>) -> Self {
        Self::with_length(salts, DEFAULT_CHECKSUM_LENGTH)
    }

    /// Use a non-default checksum length, clamped to 4..=64.
    pub fn with_length(salts: Arc<SaltStore>, length: usize) -> Self {
        Signer {
            salts,
            length: length.clamp(MIN_CHECKSUM_LENGTH, MAX_CHECKSUM_LENGTH),
        }
    }

    /// Checksum length in characters.
    pub fn checksum_length(&self) -> usize {
        self.length
    }

    /// Compute the checksum for `destination`.
    pub fn sign(&self, destination: &str) -> Result<Checksum, ConfigurationError> {
        let key = self.salts.get_or_create_key()?;
        Ok(compute_checksum(&key, destination, self.length))
    }

    /// Check `checksum` against `destination`.
    ///
    /// Case-insensitive. Malformed input of any kind is simply `Ok(false)`;
    /// only salt storage failures are errors.
    pub fn verify(&self, destination: &str, checksum: &str) -> Result<bool, ConfigurationError> {
        let expected = self.sign(destination)?;
        let supplied = checksum.to_ascii_lowercase();
        // Length is public; the content comparison is constant time.
        let matches = supplied.len() == expected.0.len()
            && bool::from(supplied.as_bytes().ct_eq(expected.0.as_bytes()));
        if !matches {
            trace!(target: "signer", "checksum mismatch");
        }
        Ok(matches)
    }
}

fn compute_checksum(key: &SigningKey, destination: &str, length: usize) -> Checksum {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(destination.as_bytes());
    let mut encoded = hex::encode(mac.finalize().into_bytes());
    encoded.truncate(length);
    Checksum(encoded)
}
