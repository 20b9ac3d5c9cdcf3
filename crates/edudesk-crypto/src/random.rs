//! OS-backed random bytes for salts, nonces, content keys, and file ids.
//!
//! Every call goes to the operating system CSPRNG. A failure is reported as
//! [`EdudeskError::RandomUnavailable`]; there is no fallback generator.

use rand::rngs::OsRng;
use rand::RngCore;

use edudesk_core::{EdudeskError, EdudeskResult};

/// Length of a file identifier before hex encoding (128 bits).
pub const FILE_ID_BYTES: usize = 16;

/// Fill `buf` from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> EdudeskResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| EdudeskError::RandomUnavailable(e.to_string()))
}

/// `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> EdudeskResult<Vec<u8>> {
    let mut out = vec![0u8; n];
    fill_random(&mut out)?;
    Ok(out)
}

pub fn random_array<const N: usize>() -> EdudeskResult<[u8; N]> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// A fresh 128-bit file identifier, lowercase hex.
pub fn new_file_id() -> EdudeskResult<String> {
    Ok(hex::encode(random_array::<FILE_ID_BYTES>()?))
}

/// True if `id` has the shape produced by [`new_file_id`].
pub fn is_valid_file_id(id: &str) -> bool {
    id.len() == FILE_ID_BYTES * 2
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length() {
        assert_eq!(random_bytes(0).unwrap().len(), 0);
        assert_eq!(random_bytes(33).unwrap().len(), 33);
    }

    #[test]
    fn test_random_arrays_differ() {
        let a = random_array::<32>().unwrap();
        let b = random_array::<32>().unwrap();
        assert_ne!(a, b, "two 256-bit draws must differ");
    }

    #[test]
    fn test_file_id_shape() {
        let id = new_file_id().unwrap();
        assert_eq!(id.len(), 32);
        assert!(is_valid_file_id(&id));
        assert_ne!(id, new_file_id().unwrap());
    }

    #[test]
    fn test_file_id_rejects_path_tricks() {
        assert!(!is_valid_file_id("../../etc/passwd"));
        assert!(!is_valid_file_id("0123456789ABCDEF0123456789ABCDEF"));
        assert!(!is_valid_file_id("0123456789abcdef"));
        assert!(!is_valid_file_id(""));
    }
}
