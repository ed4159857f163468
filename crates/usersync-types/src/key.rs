//! The stable player identity shared by the flat-file directory and the
//! relational store.
//!
//! A [`PlayerKey`] wraps a [`Uuid`]. It names the flat file (`<key>.yml`)
//! and is the unique column in every table, so parsing it is strict: a
//! filename that is not a UUID is rejected rather than guessed at.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a string is not a valid player key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid player key {input:?}: {reason}")]
pub struct KeyParseError {
    /// The rejected input.
    pub input: String,
    /// Why the input was rejected.
    pub reason: String,
}

/// Stable unique identity of a player across both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerKey(pub Uuid);

impl PlayerKey {
    /// Create a fresh random key (tests, seed data).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }

    /// Parse the key out of a flat-file stem such as
    /// `0f8fad5b-d9cb-469f-a165-70867728950e`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyParseError`] if the stem is not a UUID.
    pub fn from_file_stem(stem: &str) -> Result<Self, KeyParseError> {
        stem.parse()
    }
}

impl Default for PlayerKey {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PlayerKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|e| KeyParseError {
            input: s.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl From<Uuid> for PlayerKey {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<PlayerKey> for Uuid {
    fn from(key: PlayerKey) -> Self {
        key.0
    }
}

/// How an administrator refers to a stored record: by key or by the last
/// known display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    /// Exact key lookup.
    Key(PlayerKey),
    /// Case-insensitive display-name lookup.
    Name(String),
}

impl RecordLookup {
    /// Interpret free-form input: a UUID becomes a key lookup, anything else
    /// a name lookup.
    pub fn parse(input: &str) -> Self {
        input
            .parse::<PlayerKey>()
            .map_or_else(|_| Self::Name(input.trim().to_owned()), Self::Key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hyphenated_lowercase() {
        let key: PlayerKey = "0F8FAD5B-D9CB-469F-A165-70867728950E".parse().unwrap();
        assert_eq!(key.to_string(), "0f8fad5b-d9cb-469f-a165-70867728950e");
    }

    #[test]
    fn file_stem_must_be_a_uuid() {
        assert!(PlayerKey::from_file_stem("not-a-player").is_err());
        assert!(PlayerKey::from_file_stem("0f8fad5b-d9cb-469f-a165-70867728950e").is_ok());
    }

    #[test]
    fn lookup_distinguishes_keys_from_names() {
        let key = PlayerKey::new();
        assert_eq!(RecordLookup::parse(&key.to_string()), RecordLookup::Key(key));
        assert_eq!(
            RecordLookup::parse(" Notch "),
            RecordLookup::Name("Notch".to_owned())
        );
    }

    #[test]
    fn serializes_as_plain_uuid_string() {
        let key = PlayerKey::new();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
    }
}
