//! Domain types shared across the dcmvault crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};

/// Field name to textual value mapping extracted from an artifact.
///
/// Backed by a `BTreeMap` so iteration, and therefore serialization, is in
/// key order no matter how the map was populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical encoding: compact JSON object with keys in byte order.
    ///
    /// The same bytes are stored in the catalog and fed to [`Fingerprint`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Parse a stored canonical blob back into a mapping.
    pub fn from_canonical(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// SHA-256 digest of a canonical metadata encoding.
///
/// Used as the slot directory name and, through the slot path, as the dedup
/// key. Two artifacts whose extracted metadata is identical share a
/// fingerprint even if their bytes differ.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a metadata mapping.
    pub fn of(metadata: &Metadata) -> Result<Self> {
        Ok(Self::of_canonical(&metadata.canonical_bytes()?))
    }

    /// Fingerprint bytes already produced by [`Metadata::canonical_bytes`].
    pub fn of_canonical(canonical: &[u8]) -> Self {
        let digest = Sha256::digest(canonical);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(VaultError::InvalidFingerprint(s.to_string()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|_| VaultError::InvalidFingerprint(s.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A committed catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    /// Path of the stored original; unique across the catalog.
    pub location: String,
    /// Content key of the slot holding the original.
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

/// Values for a catalog insert.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub location: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// Canonical metadata encoding, stored verbatim.
    pub metadata: Vec<u8>,
    pub ingested_at: DateTime<Utc>,
}
