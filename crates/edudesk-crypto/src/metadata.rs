//! File metadata record
//!
//! One JSON document per protected file, stored next to its ciphertext:
//! - `owner_id`, `original_name` (plaintext, for listing)
//! - `iv`: content-cipher nonce prefix (base64)
//! - `key_encrypted`, `key_iv`, `key_tag`: the wrapped content key (base64)
//!
//! Parsing is strict. Anything unexpected is an integrity failure, never a
//! best-effort read.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use edudesk_core::{EdudeskError, EdudeskResult};

use crate::envelope::WrappedKey;
use crate::{CONTENT_NONCE_PREFIX_SIZE, KEY_SIZE, TAG_SIZE, WRAP_NONCE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileMetadata {
    pub owner_id: i64,
    pub original_name: String,
    pub iv: String,
    pub key_encrypted: String,
    pub key_iv: String,
    pub key_tag: String,
}

impl FileMetadata {
    pub fn new(
        owner_id: i64,
        original_name: impl Into<String>,
        nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
        wrapped: &WrappedKey,
    ) -> Self {
        Self {
            owner_id,
            original_name: original_name.into(),
            iv: STANDARD.encode(nonce_prefix),
            key_encrypted: STANDARD.encode(wrapped.ciphertext),
            key_iv: STANDARD.encode(wrapped.nonce),
            key_tag: STANDARD.encode(wrapped.tag),
        }
    }

    /// Content nonce prefix, length-checked.
    pub fn nonce_prefix(&self) -> EdudeskResult<[u8; CONTENT_NONCE_PREFIX_SIZE]> {
        decode_fixed("iv", &self.iv)
    }

    /// Wrapped content key, length-checked.
    pub fn wrapped_key(&self) -> EdudeskResult<WrappedKey> {
        Ok(WrappedKey {
            ciphertext: decode_fixed::<KEY_SIZE>("key_encrypted", &self.key_encrypted)?,
            nonce: decode_fixed::<WRAP_NONCE_SIZE>("key_iv", &self.key_iv)?,
            tag: decode_fixed::<TAG_SIZE>("key_tag", &self.key_tag)?,
        })
    }

    /// Serialize to pretty-printed JSON bytes
    pub fn to_json_pretty(&self) -> EdudeskResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| EdudeskError::Validation(format!("metadata serialization: {e}")))
    }

    /// Parse and fully validate a metadata document.
    pub fn from_slice(data: &[u8]) -> EdudeskResult<Self> {
        let meta: FileMetadata = serde_json::from_slice(data)
            .map_err(|e| EdudeskError::Integrity(format!("metadata is malformed: {e}")))?;
        meta.nonce_prefix()?;
        meta.wrapped_key()?;
        Ok(meta)
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> EdudeskResult<[u8; N]> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|_| EdudeskError::Integrity(format!("metadata field `{field}` is not base64")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        EdudeskError::Integrity(format!(
            "metadata field `{field}` must decode to {N} bytes, got {}",
            bytes.len()
        ))
    })
}
