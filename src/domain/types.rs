//! Opaque identifiers shared by every storage backend.
//!
//! Identifiers carry no behavior beyond equality and the character classes the
//! transport layer validates against. Construction through `parse` enforces
//! those classes; the stores mint their own values through crate-private
//! constructors.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Literal representation of the "no prior position" page token.
pub const SENTINEL_PAGE_TOKEN: &str = "none";

fn is_url_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Identity of a user, as supplied by the caller (`[0-9a-f]+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if !is_lower_hex(&raw) {
            return Err(DomainError::validation(format!(
                "user id `{raw}` must match [0-9a-f]+"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-minted, URL-safe post identity (`[A-Za-z0-9_-]+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if !is_url_safe(&raw) {
            return Err(DomainError::validation(format!(
                "post id `{raw}` must match [A-Za-z0-9_-]+"
            )));
        }
        Ok(Self(raw))
    }

    pub(crate) fn minted(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque cursor into one owner's ordered collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    /// Start from the newest item.
    pub fn sentinel() -> Self {
        Self(SENTINEL_PAGE_TOKEN.to_string())
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL_PAGE_TOKEN
    }

    /// Parse a caller-supplied token; an absent or empty value is the sentinel.
    pub fn parse(raw: Option<&str>) -> Result<Self, DomainError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::sentinel()),
            Some(value) if is_url_safe(value) => Ok(Self(value.to_string())),
            Some(value) => Err(DomainError::validation(format!(
                "page token `{value}` must match [A-Za-z0-9_-]+"
            ))),
        }
    }

    pub(crate) fn issued(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PageToken {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic creation-order key. Larger is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingKey(i64);

impl OrderingKey {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Fixed-width lowercase hex, so textual order matches numeric order.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(raw: &str) -> Result<Self, DomainError> {
        if raw.len() != 16 || !is_lower_hex(raw) {
            return Err(DomainError::validation(format!(
                "ordering key `{raw}` is not 16 lowercase hex digits"
            )));
        }
        i64::from_str_radix(raw, 16)
            .map(Self)
            .map_err(|err| DomainError::validation(format!("ordering key `{raw}`: {err}")))
    }
}
