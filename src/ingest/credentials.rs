//! Credential rotation
//!
//! The rotator owns the ordered credential list and a single process-wide
//! index persisted in the storage cache. The index is always reduced modulo
//! the list length when read, so rotation never needs bounds checks.

use crate::storage::{self, SharedStorage, Storage};
use crate::{ConfigError, HarvestError};
use std::fmt;

/// Cache key of the shared rotation index
pub const CREDENTIAL_INDEX_KEY: &str = "credential_index";

/// An upstream API credential
///
/// Formatting shows only the last four characters.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The full credential, for building requests only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        write!(f, "***{}", tail)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self)
    }
}

/// A credential resolved for one request, with the index it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub index: usize,
    pub key: ApiKey,
}

/// Rotates through the configured credentials on quota exhaustion
pub struct CredentialRotator {
    keys: Vec<ApiKey>,
    storage: SharedStorage,
}

impl CredentialRotator {
    /// Creates a rotator over `keys` in the given order
    pub fn new(keys: Vec<String>, storage: SharedStorage) -> Result<Self, HarvestError> {
        if keys.is_empty() {
            return Err(
                ConfigError::Validation("no upstream credentials configured".to_string()).into(),
            );
        }

        Ok(Self {
            keys: keys.into_iter().map(ApiKey::new).collect(),
            storage,
        })
    }

    /// Number of credentials in rotation
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Current position in the credential list
    ///
    /// Storage failures are logged and read as position 0.
    pub fn index(&self) -> usize {
        match storage::lock(&self.storage).and_then(|guard| read_index(&*guard)) {
            Ok(stored) => stored % self.keys.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read credential index, using first credential");
                0
            }
        }
    }

    /// Credential at the current index
    pub fn current(&self) -> ResolvedCredential {
        let index = self.index();
        ResolvedCredential {
            index,
            key: self.keys[index].clone(),
        }
    }

    /// Advances the shared index by one
    ///
    /// Returns false without touching the index when there is no alternative
    /// credential to rotate to, or when the index could not be persisted.
    pub fn rotate(&self) -> bool {
        self.advance(None)
    }

    /// Advances past `used`, unless another cycle already rotated away from it
    ///
    /// Two cycles hitting quota on the same credential at the same time then
    /// move the index once instead of skipping a credential.
    pub fn rotate_past(&self, used: &ResolvedCredential) -> bool {
        self.advance(Some(used.index))
    }

    fn advance(&self, expected: Option<usize>) -> bool {
        if self.keys.len() < 2 {
            tracing::warn!("No alternative API credentials available");
            return false;
        }

        let result = storage::lock(&self.storage).and_then(|mut guard| {
            let current = read_index(&*guard)? % self.keys.len();
            if expected.is_some_and(|expected| expected != current) {
                return Ok((current, false));
            }

            let next = (current + 1) % self.keys.len();
            guard.cache_set(CREDENTIAL_INDEX_KEY, &next.to_string())?;
            Ok((next, true))
        });

        match result {
            Ok((index, true)) => {
                tracing::info!(index, credential = %self.keys[index], "Rotated to next API credential");
                true
            }
            Ok((index, false)) => {
                tracing::debug!(index, "Credential already rotated by another cycle");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist credential rotation");
                false
            }
        }
    }
}

fn read_index(storage: &dyn Storage) -> Result<usize, HarvestError> {
    let stored = storage.cache_get(CREDENTIAL_INDEX_KEY)?;
    Ok(stored.and_then(|value| value.parse().ok()).unwrap_or(0))
}
