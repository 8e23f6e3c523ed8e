//! License key format and generation.
//!
//! Keys are 32 characters split into 8 dash-separated groups of 4:
//!
//! ```text
//! 7KQM-X4TD-PZ9H-2WNB-RC8F-E6VJ-M3SA-YG5U
//! ```
//!
//! The alphabet leaves out `0`, `O`, `1`, `I` and `L` so a key read aloud
//! or copied from paper cannot be mistyped into a different valid key.
//! Parsing is forgiving about case, whitespace and dash placement.

use crate::error::{LicenseError, LicenseResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters a license key may contain.
pub const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Number of dash-separated groups in a key.
pub const KEY_GROUPS: usize = 8;

/// Characters per group.
pub const KEY_GROUP_LEN: usize = 4;

const KEY_CHARS: usize = KEY_GROUPS * KEY_GROUP_LEN;

/// A well-formed license key in canonical (upper case, dashed) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Generates a fresh random key from the thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generates a key from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let chars: String = (0..KEY_CHARS)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect();
        Self(group(&chars))
    }

    /// Parses a key typed or pasted by a human.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKeyFormat`] if the key has the wrong
    /// length or contains characters outside [`KEY_ALPHABET`].
    pub fn parse(input: &str) -> LicenseResult<Self> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if compact.len() != KEY_CHARS {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "expected {KEY_CHARS} characters in {KEY_GROUPS} groups of {KEY_GROUP_LEN}, got {}",
                compact.chars().count()
            )));
        }

        if let Some(bad) = compact.bytes().find(|b| !KEY_ALPHABET.contains(b)) {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "character '{}' is not allowed in a license key",
                bad as char
            )));
        }

        Ok(Self(group(&compact)))
    }

    /// Returns the canonical key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key with every group but the first and last hidden,
    /// suitable for log lines.
    #[must_use]
    pub fn masked(&self) -> String {
        let groups: Vec<&str> = self.0.split('-').collect();
        let mut out = Vec::with_capacity(groups.len());
        for (i, g) in groups.iter().enumerate() {
            if i == 0 || i == groups.len() - 1 {
                out.push(*g);
            } else {
                out.push("****");
            }
        }
        out.join("-")
    }
}

fn group(compact: &str) -> String {
    compact
        .as_bytes()
        .chunks(KEY_GROUP_LEN)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LicenseKey {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LicenseKey {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LicenseKey> for String {
    fn from(key: LicenseKey) -> Self {
        key.0
    }
}
