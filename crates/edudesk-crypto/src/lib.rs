//! edudesk-crypto: envelope encryption and password verifiers for EduDesk
//!
//! Architecture: per-file random content key, wrapped by a single master key
//!
//! Pipeline: plaintext → 64 KiB chunks → AES-256-GCM (content key) → `<file_id>.dat`
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, hex in configuration)
//!   └── Content Key (per-file, 256-bit random, wrapped by master key)
//!       ├── Key wrap: AES-256-GCM (key=master, nonce=random_96bit, detached tag)
//!       └── Chunk AEAD: AES-256-GCM (key=content_key, nonce=prefix||chunk_idx, AAD=chunk_idx||last)
//! ```
//!
//! Passwords never touch this hierarchy: they are stored as Argon2id PHC
//! strings or PBKDF2-HMAC-SHA256 verifiers.

pub mod content;
pub mod envelope;
pub mod keys;
pub mod metadata;
pub mod password;
pub mod random;

pub use content::{decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, encrypt_to_temp};
pub use envelope::{unwrap_key, wrap_key, WrappedKey};
pub use keys::{ContentKey, MasterKey};
pub use metadata::FileMetadata;
pub use password::{derive, validate_rules, verify, PasswordVerifier};
pub use random::{is_valid_file_id, new_file_id, random_array, random_bytes};

/// Size of a master or content key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Random per-file part of each chunk nonce
pub const CONTENT_NONCE_PREFIX_SIZE: usize = 8;

/// Size of an AES-GCM key-wrap nonce (96-bit)
pub const WRAP_NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes per content chunk
pub const CHUNK_SIZE: usize = 64 * 1024;
