//! Archived entry and identity types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an archived entry.
///
/// Identifiers are assigned monotonically and never reused while the store
/// lives, unless the store is explicitly reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl EntryId {
    /// Create a new EntryId from its raw value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BLAKE3 fingerprint of an entry's content (or of a symlink's target string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Create a new Fingerprint from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the fingerprint as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a fingerprint from 64 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, FingerprintParseError> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(FingerprintParseError {
                input: hex.to_string(),
            });
        }

        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                FingerprintParseError {
                    input: hex.to_string(),
                }
            })?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Error returned when a stored fingerprint is not valid hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: {input:?}")]
pub struct FingerprintParseError {
    input: String,
}

/// Kind of archived object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Symbolic link, archived as the link itself.
    Symlink,
}

impl EntryKind {
    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink)
    }
}

/// The identity key of an archive candidate: logical size plus fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Logical size in bytes (0 for symlinks).
    pub size: u64,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
    /// What kind of object was identified.
    pub kind: EntryKind,
}

impl Identity {
    /// Create a new identity.
    pub fn new(size: u64, fingerprint: Fingerprint, kind: EntryKind) -> Self {
        Self {
            size,
            fingerprint,
            kind,
        }
    }

    /// Check whether two identities describe the same content.
    ///
    /// The kind is not part of the key: a symlink and a file never collide in
    /// practice because a symlink always has size 0.
    pub fn matches(&self, size: u64, fingerprint: &Fingerprint) -> bool {
        self.size == size && self.fingerprint == *fingerprint
    }
}

/// A recorded archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned identifier.
    pub id: EntryId,
    /// Path relative to the archive root, `/`-separated.
    pub path: String,
    /// Logical size in bytes.
    pub size: u64,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
    /// When the entry was recorded.
    pub added_at: DateTime<Utc>,
    /// When the entry last passed verification.
    pub last_verified: Option<DateTime<Utc>>,
}

impl Entry {
    /// Check if this entry has never been verified.
    pub fn is_unverified(&self) -> bool {
        self.last_verified.is_none()
    }
}
