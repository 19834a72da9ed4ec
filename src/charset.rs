//! Charset handling for SGF text values.
//!
//! The core only needs two capabilities from a charset implementation:
//! canonicalising a charset name (as found in the `CA` property) and moving
//! bytes between a named charset and UTF-8. [`BuiltinCharsets`] covers the
//! charsets SGF files use in practice; callers with other needs can plug in
//! their own [`CharsetCodec`].

use crate::error::{Result, SgfError};

pub const UTF_8: &str = "UTF-8";
pub const ISO_8859_1: &str = "ISO-8859-1";
pub const ASCII: &str = "ASCII";

/// Charset used when a game does not declare one.
pub const LEGACY_DEFAULT_CHARSET: &str = ISO_8859_1;

pub trait CharsetCodec: Send + Sync {
    /// Returns the canonical name for `name`, failing if the charset is unknown.
    fn normalise(&self, name: &str) -> Result<String>;

    /// Decodes `bytes` in `charset` (a canonical name) into text.
    fn decode(&self, bytes: &[u8], charset: &str) -> Result<String>;

    /// Encodes `text` into `charset` (a canonical name).
    fn encode(&self, text: &str, charset: &str) -> Result<Vec<u8>>;

    /// Re-encodes `bytes` from one charset to another.
    fn transcode(&self, bytes: &[u8], from: &str, to: &str) -> Result<Vec<u8>> {
        if from == to {
            return Ok(bytes.to_vec());
        }
        let text = self.decode(bytes, from)?;
        self.encode(&text, to)
    }
}

/// UTF-8, ISO-8859-1 and US-ASCII.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCharsets;

impl CharsetCodec for BuiltinCharsets {
    fn normalise(&self, name: &str) -> Result<String> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        let canonical = match key.as_str() {
            "utf8" | "u8" | "cp65001" => UTF_8,
            "iso88591" | "latin1" | "l1" | "8859" | "cp819" => ISO_8859_1,
            "ascii" | "usascii" | "646" | "us" => ASCII,
            _ => return Err(SgfError::encoding(format!("unknown encoding: {}", name))),
        };
        Ok(canonical.to_string())
    }

    fn decode(&self, bytes: &[u8], charset: &str) -> Result<String> {
        match charset {
            UTF_8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| SgfError::value(format!("invalid UTF-8 data: {}", e))),
            ISO_8859_1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            ASCII => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(SgfError::value(format!(
                        "non-ASCII byte 0x{:02x} at offset {}",
                        bytes[pos], pos
                    )));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            other => Err(SgfError::encoding(format!("unsupported charset: {}", other))),
        }
    }

    fn encode(&self, text: &str, charset: &str) -> Result<Vec<u8>> {
        let limit = match charset {
            UTF_8 => return Ok(text.as_bytes().to_vec()),
            ISO_8859_1 => 0xff,
            ASCII => 0x7f,
            other => return Err(SgfError::encoding(format!("unsupported charset: {}", other))),
        };
        text.chars()
            .map(|c| {
                let code = c as u32;
                if code <= limit {
                    Ok(code as u8)
                } else {
                    Err(SgfError::value(format!(
                        "character {:?} cannot be encoded in {}",
                        c, charset
                    )))
                }
            })
            .collect()
    }
}
