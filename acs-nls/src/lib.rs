//! acs-nls
//!
//! String literals in compiled script modules are stored as raw NUL-terminated bytes whose
//! encoding depends on the toolchain that produced them. This crate turns those bytes into
//! Rust strings and describes the locale fallback order used when a module carries several
//! per-language string tables.

mod language;

pub use language::{LanguageId, ParseLanguageError};

use encoding_rs::{Encoding as RsEncoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;

    /// Decode C-style string: stop at the first NUL (0x00).
    fn decode_cstr<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    /// Classic compilers emit code page 1252; ISO-8859-1 content decodes identically.
    #[default]
    Windows1252,
}

impl Encoding {
    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Encoding::Utf8 => UTF_8,
            Encoding::Windows1252 => WINDOWS_1252,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown encoding {0:?} (expected utf8 or cp1252)")]
pub struct ParseEncodingError(String);

impl FromStr for Encoding {
    type Err = ParseEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "cp1252" | "windows-1252" | "latin1" => Ok(Encoding::Windows1252),
            _ => Err(ParseEncodingError(s.to_owned())),
        }
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    /// Encode a Rust string to bytes using the selected encoding.
    /// Unrepresentable characters are replaced.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        let (cow, _, _) = self.enc.as_encoding_rs().encode(s);
        cow
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.enc {
            Encoding::Utf8 => String::from_utf8_lossy(bytes),
            Encoding::Windows1252 => {
                let (cow, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
                cow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cstr_stops_at_nul() {
        let d = Decoder::new(Encoding::Utf8);
        assert_eq!(d.decode_cstr(b"door\0ignored"), "door");
    }

    #[test]
    fn windows_1252_high_bytes() {
        let d = Decoder::new(Encoding::Windows1252);
        // 0xE9 is e-acute, 0x80 is the euro sign in cp1252.
        assert_eq!(d.decode(&[b'c', b'a', b'f', 0xE9, b' ', 0x80]), "caf\u{e9} \u{20ac}");
    }

    #[test]
    fn encoding_names() {
        assert_eq!("UTF-8".parse(), Ok(Encoding::Utf8));
        assert_eq!("latin1".parse(), Ok(Encoding::Windows1252));
        assert!("sjis".parse::<Encoding>().is_err());
    }

    #[test]
    fn encode_back_to_cp1252() {
        let d = Decoder::new(Encoding::Windows1252);
        assert_eq!(d.encode("caf\u{e9}").as_ref(), &[b'c', b'a', b'f', 0xE9]);
    }
}
