//! Header exchanged once, offering side to requesting side, before any chunk.

use std::collections::HashMap;

use crate::error::MetadataError;

/// Logical destination file name. Always present.
pub const FILENAME_KEY: &str = "filename";

/// Base64 IV for the stream cipher. Present iff the payload is encrypted.
pub const IV_KEY: &str = "iv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub filename: String,
    pub iv: Option<String>,
}

impl ChunkMetadata {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            iv: None,
        }
    }

    pub fn with_iv(mut self, iv: impl Into<String>) -> Self {
        self.iv = Some(iv.into());
        self
    }

    pub fn into_map(self) -> HashMap<String, String> {
        let mut map = HashMap::from([(FILENAME_KEY.to_string(), self.filename)]);
        if let Some(iv) = self.iv {
            map.insert(IV_KEY.to_string(), iv);
        }
        map
    }

    /// Validate a received header. `encrypted` says whether this side holds a
    /// key and therefore needs an IV. Unknown keys are ignored.
    pub fn from_map(map: &HashMap<String, String>, encrypted: bool) -> Result<Self, MetadataError> {
        let filename = map
            .get(FILENAME_KEY)
            .ok_or(MetadataError::MissingFilename)?
            .clone();

        let iv = if encrypted {
            Some(map.get(IV_KEY).ok_or(MetadataError::MissingIv)?.clone())
        } else {
            None
        };

        Ok(Self { filename, iv })
    }
}
