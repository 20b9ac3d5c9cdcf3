//! Chunked AES-256-GCM content encryption
//!
//! Ciphertext format:
//! ```text
//! frame_0 || frame_1 || ... || frame_n
//! frame_i = AES-256-GCM(chunk_i) || tag (16 bytes)
//! nonce_i = nonce_prefix (8 bytes) || i (4 bytes, big-endian)
//! AAD_i   = i (8 bytes, big-endian) || last_flag (1 byte)
//! ```
//!
//! Every chunk but the last carries exactly [`CHUNK_SIZE`] plaintext bytes.
//! The last chunk is always present, is shorter than `CHUNK_SIZE` (possibly
//! empty) and is the only one authenticated with `last_flag = 1`, so a
//! stream cut at a frame boundary fails to verify.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use tempfile::NamedTempFile;
use tracing::debug;

use edudesk_core::{EdudeskError, EdudeskResult};

use crate::keys::ContentKey;
use crate::{CHUNK_SIZE, CONTENT_NONCE_PREFIX_SIZE, TAG_SIZE};

const FRAME_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Encrypt everything readable from `reader` into `writer`.
///
/// Returns the number of plaintext bytes consumed.
pub fn encrypt_stream<R: Read, W: Write>(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    reader: R,
    writer: W,
) -> EdudeskResult<u64> {
    encrypt_frames(key, nonce_prefix, reader, writer, Path::new("<input>"), Path::new("<output>"))
}

/// Decrypt a frame stream from `reader` into `writer`.
///
/// Plaintext of a chunk is written only after that chunk's tag verified, but
/// a later chunk may still fail: on `Err` the caller must discard whatever
/// reached `writer`. [`decrypt_file`] does this for you.
pub fn decrypt_stream<R: Read, W: Write>(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    reader: R,
    writer: W,
) -> EdudeskResult<u64> {
    decrypt_frames(key, nonce_prefix, reader, writer, Path::new("<input>"), Path::new("<output>"))
}

/// Encrypt `input` into `output`, which appears only once complete.
pub fn encrypt_file(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    input: &Path,
    output: &Path,
) -> EdudeskResult<u64> {
    let tmp = encrypt_to_temp(key, nonce_prefix, input, parent_dir(output))?;
    let written = tmp.plaintext_len;
    persist(tmp.file, output)?;
    Ok(written)
}

/// Decrypt `input` into `output`, which appears only once the whole stream
/// authenticated.
pub fn decrypt_file(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    input: &Path,
    output: &Path,
) -> EdudeskResult<u64> {
    let src = File::open(input).map_err(|e| EdudeskError::io(input, e))?;
    let dir = parent_dir(output);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EdudeskError::io(dir, e))?;

    let written = {
        let tmp_path = tmp.path().to_path_buf();
        let mut sink = BufWriter::new(tmp.as_file_mut());
        let n = decrypt_frames(key, nonce_prefix, BufReader::new(src), &mut sink, input, &tmp_path)?;
        sink.flush().map_err(|e| EdudeskError::io(&tmp_path, e))?;
        n
    };

    persist(tmp, output)?;
    debug!(output = %output.display(), bytes = written, "content decrypted");
    Ok(written)
}

/// Ciphertext of a whole file, parked in a temp file until the caller
/// persists it.
pub struct EncryptedTemp {
    pub file: NamedTempFile,
    pub plaintext_len: u64,
}

/// Encrypt `input` into a fresh temp file inside `dir`.
///
/// Dropping the returned value removes the temp file.
pub fn encrypt_to_temp(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    input: &Path,
    dir: &Path,
) -> EdudeskResult<EncryptedTemp> {
    let src = File::open(input).map_err(|e| EdudeskError::io(input, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EdudeskError::io(dir, e))?;

    let plaintext_len = {
        let tmp_path = tmp.path().to_path_buf();
        let mut sink = BufWriter::new(tmp.as_file_mut());
        let n = encrypt_frames(key, nonce_prefix, BufReader::new(src), &mut sink, input, &tmp_path)?;
        sink.flush().map_err(|e| EdudeskError::io(&tmp_path, e))?;
        n
    };
    tmp.as_file()
        .sync_all()
        .map_err(|e| EdudeskError::io(tmp.path(), e))?;

    debug!(input = %input.display(), bytes = plaintext_len, "content encrypted");
    Ok(EncryptedTemp {
        file: tmp,
        plaintext_len,
    })
}

/// Size of the ciphertext produced for `plaintext_len` bytes of input.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    let full_chunks = plaintext_len / CHUNK_SIZE as u64;
    plaintext_len + (full_chunks + 1) * TAG_SIZE as u64
}

fn encrypt_frames<R: Read, W: Write>(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    mut reader: R,
    mut writer: W,
    src: &Path,
    dst: &Path,
) -> EdudeskResult<u64> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    let mut index = 0u32;

    loop {
        let n = read_full(&mut reader, &mut buf).map_err(|e| EdudeskError::io(src, e))?;
        let last = n < CHUNK_SIZE;

        let nonce = chunk_nonce(nonce_prefix, index);
        let aad = build_aad(index, last);
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, &mut buf[..n])
            .map_err(|e| EdudeskError::crypto("AES-256-GCM chunk encryption", e))?;

        writer
            .write_all(&buf[..n])
            .and_then(|()| writer.write_all(&tag))
            .map_err(|e| EdudeskError::io(dst, e))?;
        total += n as u64;

        if last {
            return Ok(total);
        }
        index = next_index(index)?;
    }
}

fn decrypt_frames<R: Read, W: Write>(
    key: &ContentKey,
    nonce_prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE],
    mut reader: R,
    mut writer: W,
    src: &Path,
    dst: &Path,
) -> EdudeskResult<u64> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let mut frame = vec![0u8; FRAME_SIZE];
    let mut total = 0u64;
    let mut index = 0u32;

    loop {
        let n = read_full(&mut reader, &mut frame).map_err(|e| EdudeskError::io(src, e))?;
        if n < TAG_SIZE {
            return Err(EdudeskError::Integrity(format!(
                "ciphertext truncated at chunk {index}"
            )));
        }
        let last = n < FRAME_SIZE;

        let (body, tag) = frame[..n].split_at_mut(n - TAG_SIZE);
        let nonce = chunk_nonce(nonce_prefix, index);
        let aad = build_aad(index, last);
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, body, Tag::from_slice(tag))
            .map_err(|_| {
                EdudeskError::Integrity(format!(
                    "chunk {index} failed authentication (wrong key, corrupted or reordered data)"
                ))
            })?;

        writer.write_all(body).map_err(|e| EdudeskError::io(dst, e))?;
        total += body.len() as u64;

        // A short frame is only short at EOF, so bytes appended after the
        // final chunk land inside it and break its tag.
        if last {
            return Ok(total);
        }
        index = next_index(index)?;
    }
}

/// Nonce for chunk `index`: prefix || u32_be(index)
fn chunk_nonce(prefix: &[u8; CONTENT_NONCE_PREFIX_SIZE], index: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..CONTENT_NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[CONTENT_NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// AAD: u64_be(index) || last_flag
fn build_aad(index: u32, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&u64::from(index).to_be_bytes());
    aad[8] = u8::from(last);
    aad
}

fn next_index(index: u32) -> EdudeskResult<u32> {
    index.checked_add(1).ok_or_else(|| {
        EdudeskError::crypto("AES-256-GCM chunk counter", "input exceeds maximum chunk count")
    })
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn persist(tmp: NamedTempFile, output: &Path) -> EdudeskResult<()> {
    tmp.persist(output)
        .map(|_| ())
        .map_err(|e| EdudeskError::io(output, e.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edudesk_core::ErrorCategory;
    use proptest::prelude::*;

    fn key(byte: u8) -> ContentKey {
        ContentKey::from_bytes([byte; 32])
    }

    const PREFIX: [u8; CONTENT_NONCE_PREFIX_SIZE] = [7u8; CONTENT_NONCE_PREFIX_SIZE];

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream(&key(1), &PREFIX, plaintext, &mut out).unwrap();
        out
    }

    fn decrypt(ciphertext: &[u8]) -> EdudeskResult<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream(&key(1), &PREFIX, ciphertext, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_empty() {
        let ct = encrypt(b"");
        assert_eq!(ct.len(), TAG_SIZE);
        assert_eq!(decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_exact_chunk_multiple() {
        let plaintext = vec![0x5Au8; CHUNK_SIZE * 2];
        let ct = encrypt(&plaintext);
        assert_eq!(ct.len() as u64, ciphertext_len(plaintext.len() as u64));
        assert_eq!(ct.len(), CHUNK_SIZE * 2 + TAG_SIZE * 3);
        assert_eq!(decrypt(&ct).unwrap(), plaintext);
    }

    #[test]
    fn test_roundtrip_multi_mib() {
        let plaintext: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();
        let ct = encrypt(&plaintext);
        assert_eq!(ct.len() as u64, ciphertext_len(plaintext.len() as u64));
        assert_eq!(decrypt(&ct).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ct = encrypt(b"secret submission");
        let mut out = Vec::new();
        let err = decrypt_stream(&key(2), &PREFIX, ct.as_slice(), &mut out).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Integrity);
    }

    #[test]
    fn test_wrong_nonce_prefix_rejected() {
        let ct = encrypt(b"secret submission");
        let mut out = Vec::new();
        let other = [8u8; CONTENT_NONCE_PREFIX_SIZE];
        assert!(decrypt_stream(&key(1), &other, ct.as_slice(), &mut out).is_err());
    }

    #[test]
    fn test_truncation_at_frame_boundary_rejected() {
        let plaintext = vec![1u8; CHUNK_SIZE * 2];
        let ct = encrypt(&plaintext);
        // Drop the empty final frame: the remaining frames still verify
        // individually but none is marked last.
        let cut = &ct[..ct.len() - TAG_SIZE];
        let err = decrypt(cut).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Integrity);
    }

    #[test]
    fn test_truncation_mid_frame_rejected() {
        let plaintext = vec![1u8; CHUNK_SIZE + 100];
        let ct = encrypt(&plaintext);
        assert!(decrypt(&ct[..CHUNK_SIZE + 10]).is_err());
        assert!(decrypt(&ct[..5]).is_err());
        assert!(decrypt(&[]).is_err());
    }

    #[test]
    fn test_trailing_data_rejected() {
        for (len, extra) in [
            (5usize, 1usize),
            (0, 1),
            (100, 40),
            (CHUNK_SIZE, 3),
            (CHUNK_SIZE * 2 + 9, 17),
            (CHUNK_SIZE, FRAME_SIZE),
        ] {
            let mut ct = encrypt(&vec![3u8; len]);
            ct.extend(std::iter::repeat(0xAA).take(extra));
            let err = decrypt(&ct).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Integrity, "len={len} extra={extra}");
        }
    }

    #[test]
    fn test_frame_reorder_rejected() {
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2).map(|i| (i % 7) as u8).collect();
        let ct = encrypt(&plaintext);
        let mut swapped = Vec::with_capacity(ct.len());
        swapped.extend_from_slice(&ct[FRAME_SIZE..2 * FRAME_SIZE]);
        swapped.extend_from_slice(&ct[..FRAME_SIZE]);
        swapped.extend_from_slice(&ct[2 * FRAME_SIZE..]);
        assert!(decrypt(&swapped).is_err());
    }

    #[test]
    fn test_file_roundtrip_and_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("essay.txt");
        let enc = dir.path().join("essay.dat");
        let dec = dir.path().join("essay.out");
        let data = vec![0xC3u8; CHUNK_SIZE + 1234];
        std::fs::write(&plain, &data).unwrap();

        let n = encrypt_file(&key(3), &PREFIX, &plain, &enc).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(decrypt_file(&key(3), &PREFIX, &enc, &dec).unwrap(), n);
        assert_eq!(std::fs::read(&dec).unwrap(), data);

        // Corrupt the last frame: the first chunk verifies, but no output
        // file may appear.
        let mut ct = std::fs::read(&enc).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        std::fs::write(&enc, &ct).unwrap();
        let out = dir.path().join("tampered.out");
        let err = decrypt_file(&key(3), &PREFIX, &enc, &out).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Integrity);
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_input_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = encrypt_file(
            &key(1),
            &PREFIX,
            &dir.path().join("nope.txt"),
            &dir.path().join("nope.dat"),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn content_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..(CHUNK_SIZE * 2 + 64))) {
            let ct = encrypt(&data);
            prop_assert_eq!(ct.len() as u64, ciphertext_len(data.len() as u64));
            prop_assert_eq!(decrypt(&ct).unwrap(), data);
        }

        #[test]
        fn flipped_ciphertext_byte_rejected(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            pos in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut ct = encrypt(&data);
            let i = pos.index(ct.len());
            ct[i] ^= 1 << bit;
            prop_assert!(decrypt(&ct).is_err());
        }
    }
}
