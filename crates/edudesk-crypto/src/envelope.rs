//! Key envelope: AES-256-GCM wrapping of content keys under the master key
//!
//! Each wrap draws a fresh 96-bit nonce and yields the three detached parts
//! stored in file metadata: `ciphertext` (32 bytes), `nonce` (12 bytes) and
//! `tag` (16 bytes). Unwrapping with a wrong master key or any altered part
//! fails on the tag; unverified bytes are never returned.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use zeroize::Zeroize;

use edudesk_core::{EdudeskError, EdudeskResult};

use crate::keys::{ContentKey, MasterKey};
use crate::random::random_array;
use crate::{KEY_SIZE, TAG_SIZE, WRAP_NONCE_SIZE};

/// A content key encrypted under the master key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: [u8; KEY_SIZE],
    pub nonce: [u8; WRAP_NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

/// Wrap (encrypt) a content key using the master key.
pub fn wrap_key(master: &MasterKey, content_key: &ContentKey) -> EdudeskResult<WrappedKey> {
    let cipher = Aes256Gcm::new(master.as_bytes().into());
    let nonce = random_array::<WRAP_NONCE_SIZE>()?;

    let mut ciphertext = *content_key.as_bytes();
    let tag = match cipher.encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut ciphertext)
    {
        Ok(tag) => tag,
        Err(e) => {
            ciphertext.zeroize();
            return Err(EdudeskError::crypto("AES-256-GCM key wrap", e));
        }
    };

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(WrappedKey {
        ciphertext,
        nonce,
        tag: tag_bytes,
    })
}

/// Unwrap (decrypt) a content key using the master key.
///
/// A tag mismatch is reported as [`EdudeskError::Integrity`].
pub fn unwrap_key(master: &MasterKey, wrapped: &WrappedKey) -> EdudeskResult<ContentKey> {
    let cipher = Aes256Gcm::new(master.as_bytes().into());

    let mut plaintext = wrapped.ciphertext;
    if cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&wrapped.nonce),
            b"",
            &mut plaintext,
            Tag::from_slice(&wrapped.tag),
        )
        .is_err()
    {
        plaintext.zeroize();
        return Err(EdudeskError::Integrity(
            "key unwrap failed: tag mismatch (wrong master key or corrupted metadata)".into(),
        ));
    }

    let key = ContentKey::from_bytes(plaintext);
    plaintext.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edudesk_core::ErrorCategory;
    use proptest::prelude::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let content_key = ContentKey::generate().unwrap();

        let wrapped = wrap_key(&master, &content_key).unwrap();
        let unwrapped = unwrap_key(&master, &wrapped).unwrap();

        assert_eq!(content_key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_wrapped_key_hides_content_key() {
        let master = test_master_key();
        let content_key = ContentKey::generate().unwrap();
        let wrapped = wrap_key(&master, &content_key).unwrap();

        assert_ne!(&wrapped.ciphertext, content_key.as_bytes());
    }

    #[test]
    fn test_fresh_nonce_per_wrap() {
        let master = test_master_key();
        let content_key = ContentKey::from_bytes([9u8; KEY_SIZE]);

        let a = wrap_key(&master, &content_key).unwrap();
        let b = wrap_key(&master, &content_key).unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_key_unwrap_wrong_master() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let content_key = ContentKey::generate().unwrap();

        let wrapped = wrap_key(&master1, &content_key).unwrap();
        let err = unwrap_key(&master2, &wrapped).unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Integrity);
    }

    #[test]
    fn test_key_unwrap_wrong_nonce() {
        let master = test_master_key();
        let mut wrapped = wrap_key(&master, &ContentKey::generate().unwrap()).unwrap();
        wrapped.nonce[0] ^= 0x01;

        assert!(unwrap_key(&master, &wrapped).is_err());
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(key in proptest::array::uniform32(any::<u8>())) {
            let master = test_master_key();
            let content_key = ContentKey::from_bytes(key);
            let wrapped = wrap_key(&master, &content_key).unwrap();
            let unwrapped = unwrap_key(&master, &wrapped).unwrap();
            prop_assert_eq!(unwrapped.as_bytes(), &key);
        }

        #[test]
        fn flipped_ciphertext_byte_rejected(idx in 0usize..KEY_SIZE, bit in 0u8..8) {
            let master = test_master_key();
            let mut wrapped = wrap_key(&master, &ContentKey::generate().unwrap()).unwrap();
            wrapped.ciphertext[idx] ^= 1 << bit;
            prop_assert!(unwrap_key(&master, &wrapped).is_err());
        }

        #[test]
        fn flipped_tag_byte_rejected(idx in 0usize..TAG_SIZE, bit in 0u8..8) {
            let master = test_master_key();
            let mut wrapped = wrap_key(&master, &ContentKey::generate().unwrap()).unwrap();
            wrapped.tag[idx] ^= 1 << bit;
            prop_assert!(unwrap_key(&master, &wrapped).is_err());
        }
    }
}
