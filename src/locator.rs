//! Magnet locator extraction and canonical resource ids.
//!
//! A user submits free text ("/magnet magnet:?xt=urn:btih:..."). This module
//! pulls the first magnet URI out of it, validates the `xt=urn:btih:` hash and
//! derives the [`ResourceId`] every other subsystem keys on.
//!
//! Both hash encodings found in the wild are accepted:
//! - 40 hex characters (case-insensitive)
//! - 32 RFC 4648 base32 characters (case-insensitive)
//!
//! They map to the same lowercase hex [`ResourceId`], so one piece of content
//! is cached, fetched and announced once regardless of how it was linked.
//!
//! # Example
//!
//! ```
//! use magnet_relay::locator::extract_locator;
//!
//! let locator = extract_locator(
//!     "/magnet magnet:?xt=urn:btih:C12FE1C06BBA254A9DC9F519B335AA7C1367A88A&dn=demo",
//! )
//! .unwrap();
//! assert_eq!(
//!     locator.resource_id().as_str(),
//!     "c12fe1c06bba254a9dc9f519b335aa7c1367a88a"
//! );
//! assert_eq!(locator.display_name(), Some("demo"));
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Command prefix users put in front of a locator in chat.
const COMMAND_PREFIX: &str = "/magnet";

/// Matches a magnet URI up to the next whitespace.
#[allow(clippy::expect_used)]
static MAGNET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)magnet:\?\S+").expect("magnet regex is valid") // Static pattern, safe to panic
});

const BTIH_PREFIX: &str = "urn:btih:";
const HEX_HASH_LEN: usize = 40;
const BASE32_HASH_LEN: usize = 32;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Errors produced while extracting or parsing a locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// No magnet URI was present in the submitted text.
    #[error(
        "no magnet link found in input\n  Suggestion: Send a link starting with 'magnet:?xt=urn:btih:'"
    )]
    NotFound,

    /// The text looked like a magnet URI but could not be parsed.
    #[error("malformed magnet link '{locator}': {reason}")]
    Malformed {
        /// Offending input.
        locator: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The `xt` hash had the wrong length or alphabet.
    #[error(
        "invalid info hash '{hash}'\n  Suggestion: Use a 40-character hex or 32-character base32 hash"
    )]
    InvalidHash {
        /// Offending hash.
        hash: String,
    },
}

/// Content-addressed key of one resource: lowercase 40-character hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Parses and canonicalises a resource id from either hash encoding.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::InvalidHash`] when `hash` is neither 40 hex
    /// nor 32 base32 characters.
    pub fn parse(hash: &str) -> Result<Self, LocatorError> {
        let invalid = || LocatorError::InvalidHash {
            hash: hash.to_string(),
        };
        match hash.len() {
            HEX_HASH_LEN if hash.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(Self(hash.to_ascii_lowercase()))
            }
            BASE32_HASH_LEN => decode_base32(hash)
                .map(|bytes| Self(hex::encode(bytes)))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Returns the canonical hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.trim())
    }
}

/// A validated magnet locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    hash: String,
    resource_id: ResourceId,
    display_name: Option<String>,
    trackers: Vec<String>,
}

impl Locator {
    /// Parses a bare magnet URI.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Malformed`] for a non-magnet URI or a missing
    /// `xt=urn:btih:` parameter, and [`LocatorError::InvalidHash`] for a bad hash.
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let raw = input.trim();
        let malformed = |reason: &str| LocatorError::Malformed {
            locator: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| malformed(&e.to_string()))?;
        if url.scheme() != "magnet" {
            return Err(malformed("scheme must be 'magnet'"));
        }

        let mut hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if hash.is_none()
                        && let Some(h) = strip_prefix_ignore_case(&value, BTIH_PREFIX)
                    {
                        hash = Some(h.to_string());
                    }
                }
                "dn" if display_name.is_none() && !value.trim().is_empty() => {
                    display_name = Some(value.into_owned());
                }
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let hash = hash.ok_or_else(|| malformed("missing 'xt=urn:btih:' parameter"))?;
        let resource_id = ResourceId::parse(&hash)?;
        trace!(resource_id = %resource_id, trackers = trackers.len(), "parsed magnet locator");

        Ok(Self {
            raw: raw.to_string(),
            hash,
            resource_id,
            display_name,
            trackers,
        })
    }

    /// Canonical resource id derived from the info hash.
    #[must_use]
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// `dn` hint, if the link carried one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// `tr` tracker URLs in link order.
    #[must_use]
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// The link exactly as submitted (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Renders the link for the transfer engine.
    ///
    /// Base32 hashes are upper-cased; engines reject lower-case base32.
    #[must_use]
    pub fn normalized(&self) -> String {
        if self.hash.len() == BASE32_HASH_LEN {
            self.raw.replacen(&self.hash, &self.hash.to_ascii_uppercase(), 1)
        } else {
            self.raw.clone()
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Finds and parses the first magnet locator in free-form text.
///
/// An optional leading `/magnet` command is ignored.
///
/// # Errors
///
/// Returns [`LocatorError::NotFound`] when the text holds no magnet URI, or
/// the parse error of the first candidate.
#[tracing::instrument(skip(text), fields(text_len = text.len()))]
pub fn extract_locator(text: &str) -> Result<Locator, LocatorError> {
    let trimmed = text.trim();
    let body = strip_prefix_ignore_case(trimmed, COMMAND_PREFIX).unwrap_or(trimmed);

    let Some(candidate) = MAGNET_PATTERN.find(body) else {
        debug!("no magnet candidate in text");
        return Err(LocatorError::NotFound);
    };
    Locator::parse(candidate.as_str())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// Decodes unpadded RFC 4648 base32 (case-insensitive).
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let upper = byte.to_ascii_uppercase();
        let value = BASE32_ALPHABET.iter().position(|&c| c == upper)?;
        buffer = (buffer << 5) | u32::try_from(value).ok()?;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(u8::try_from((buffer >> bits) & 0xFF).ok()?);
        }
    }
    Some(out)
}
