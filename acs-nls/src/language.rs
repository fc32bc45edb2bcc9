use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Four-byte language code as stored in a string table header.
///
/// The all-zero id marks the language-neutral table. Codes shorter than four bytes are
/// zero-padded, so `"en"` is stored as `65 6E 00 00`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageId([u8; 4]);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseLanguageError {
    #[error("language code {0:?} is longer than four bytes")]
    TooLong(String),
    #[error("language code {0:?} is not ASCII")]
    NotAscii(String),
}

impl LanguageId {
    pub const NEUTRAL: LanguageId = LanguageId([0; 4]);
    pub const ENGLISH: LanguageId = LanguageId(*b"en\0\0");

    /// Build from the raw little-endian header word.
    #[inline]
    pub fn from_word(word: u32) -> Self {
        Self(word.to_le_bytes())
    }

    #[inline]
    pub fn to_word(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    #[inline]
    pub fn is_neutral(self) -> bool {
        self == Self::NEUTRAL
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    /// Lookup order for `requested`: the requested table, then English, then the
    /// language-neutral table. Duplicates are dropped.
    pub fn fallback_chain(requested: LanguageId) -> Vec<LanguageId> {
        let mut chain = Vec::with_capacity(3);
        for id in [requested, Self::ENGLISH, Self::NEUTRAL] {
            if !chain.contains(&id) {
                chain.push(id);
            }
        }
        chain
    }
}

impl FromStr for LanguageId {
    type Err = ParseLanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err(ParseLanguageError::NotAscii(s.to_string()));
        }
        if s.len() > 4 {
            return Err(ParseLanguageError::TooLong(s.to_string()));
        }
        let mut raw = [0u8; 4];
        for (dst, src) in raw.iter_mut().zip(s.bytes()) {
            *dst = src.to_ascii_lowercase();
        }
        Ok(Self(raw))
    }
}

impl TryFrom<String> for LanguageId {
    type Error = ParseLanguageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LanguageId> for String {
    fn from(value: LanguageId) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Debug for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_neutral() {
            f.write_str("LanguageId(neutral)")
        } else {
            write!(f, "LanguageId({})", self.as_str())
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_neutral() {
            f.write_str("neutral")
        } else {
            f.write_str(self.as_str())
        }
    }
}
