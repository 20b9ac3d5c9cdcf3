//! Key material: the process-wide master key and per-file content keys

use zeroize::Zeroize;

use edudesk_core::{EdudeskError, EdudeskResult};

use crate::random::random_array;
use crate::KEY_SIZE;

/// The 256-bit master key under which every content key is wrapped.
///
/// Zeroized on drop to prevent secrets lingering in memory.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a master key from raw bytes, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> EdudeskResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(EdudeskError::Configuration(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Parse the hex transport form used in configuration files.
    pub fn from_hex(hex_str: &str) -> EdudeskResult<Self> {
        let mut decoded = hex::decode(hex_str.trim())
            .map_err(|_| EdudeskError::Configuration("master key is not valid hex".into()))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-file 256-bit content key. Zeroized on drop.
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Draw a fresh random content key.
    pub fn generate() -> EdudeskResult<Self> {
        Ok(Self::from_bytes(random_array()?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
