//! File protection orchestrator
//!
//! Protect: `KEY_GENERATED → CONTENT_ENCRYPTED → KEY_WRAPPED →
//! METADATA_WRITTEN → DB_RECORDED`
//!
//! Reveal: `METADATA_LOOKED_UP → KEY_UNWRAPPED → CONTENT_DECRYPTED →
//! PLAINTEXT_DELIVERED`
//!
//! Ciphertext only appears under its final name once it is complete, and
//! metadata only once the ciphertext is in place. A failure before
//! METADATA_WRITTEN leaves nothing behind. A failure to record the file
//! afterwards is surfaced as [`EdudeskError::Unrecorded`].

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use edudesk_core::{BlobArea, EdudeskConfig, EdudeskError, EdudeskResult};
use edudesk_crypto::content::encrypt_to_temp;
use edudesk_crypto::{
    decrypt_file, decrypt_stream, is_valid_file_id, new_file_id, random_array, unwrap_key,
    wrap_key, ContentKey, FileMetadata, MasterKey, CONTENT_NONCE_PREFIX_SIZE,
};

use crate::layout::{stored_name, write_atomic, StorageLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectStage {
    KeyGenerated,
    ContentEncrypted,
    KeyWrapped,
    MetadataWritten,
    DbRecorded,
}

impl fmt::Display for ProtectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtectStage::KeyGenerated => "KEY_GENERATED",
            ProtectStage::ContentEncrypted => "CONTENT_ENCRYPTED",
            ProtectStage::KeyWrapped => "KEY_WRAPPED",
            ProtectStage::MetadataWritten => "METADATA_WRITTEN",
            ProtectStage::DbRecorded => "DB_RECORDED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealStage {
    MetadataLookedUp,
    KeyUnwrapped,
    ContentDecrypted,
    PlaintextDelivered,
}

impl fmt::Display for RevealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RevealStage::MetadataLookedUp => "METADATA_LOOKED_UP",
            RevealStage::KeyUnwrapped => "KEY_UNWRAPPED",
            RevealStage::ContentDecrypted => "CONTENT_DECRYPTED",
            RevealStage::PlaintextDelivered => "PLAINTEXT_DELIVERED",
        })
    }
}

/// A plaintext file to bring under protection
#[derive(Debug, Clone)]
pub struct ProtectRequest {
    pub input: PathBuf,
    pub owner_id: i64,
    /// Defaults to the input's file name
    pub original_name: Option<String>,
    pub area: BlobArea,
}

impl ProtectRequest {
    pub fn new(input: impl Into<PathBuf>, owner_id: i64, area: BlobArea) -> Self {
        Self {
            input: input.into(),
            owner_id,
            original_name: None,
            area,
        }
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    fn resolve_original_name(&self) -> EdudeskResult<String> {
        let name = match &self.original_name {
            Some(name) => name.trim().to_string(),
            None => self
                .input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if name.is_empty() {
            return Err(EdudeskError::Validation(format!(
                "no original file name for {}",
                self.input.display()
            )));
        }
        Ok(name)
    }
}

/// Result of a completed protect operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedFile {
    pub file_id: String,
    pub area: BlobArea,
    /// `<file_id>.dat`
    pub stored_name: String,
    pub original_name: String,
    pub owner_id: i64,
    pub blob_path: PathBuf,
    pub metadata_path: PathBuf,
    pub plaintext_len: u64,
}

/// Plaintext delivered to a caller-chosen path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealedFile {
    pub file_id: String,
    pub path: PathBuf,
    pub original_name: String,
    pub owner_id: i64,
    pub bytes: u64,
}

/// Plaintext in a temporary file, removed on drop unless kept.
///
/// The file name keeps the original extension so an external viewer can
/// pick the right handler.
#[derive(Debug)]
pub struct TempPlaintext {
    file: NamedTempFile,
    original_name: String,
    bytes: u64,
}

impl TempPlaintext {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Stop managing the file and return its path; the caller now owns it.
    pub fn keep(self) -> EdudeskResult<PathBuf> {
        let path = self.file.path().to_path_buf();
        self.file
            .keep()
            .map(|(_, p)| p)
            .map_err(|e| EdudeskError::io(path, e.error))
    }
}

/// Key material plus storage layout; the single entry point for protecting
/// and revealing files.
#[derive(Debug)]
pub struct FileVault {
    master: MasterKey,
    layout: StorageLayout,
}

impl FileVault {
    pub fn new(master: MasterKey, layout: StorageLayout) -> Self {
        Self { master, layout }
    }

    /// Build a vault from configuration. Fails with a configuration error if
    /// the master key is missing, not hex, or not 32 bytes.
    pub fn from_config(config: &EdudeskConfig) -> EdudeskResult<Self> {
        let master = MasterKey::from_hex(config.crypto.master_key_hex()?)?;
        Ok(Self::new(master, StorageLayout::from_config(&config.storage)))
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Encrypt a plaintext file into the vault.
    pub fn protect(&self, request: &ProtectRequest) -> EdudeskResult<ProtectedFile> {
        let original_name = request.resolve_original_name()?;
        self.layout.ensure()?;

        let file_id = new_file_id()?;
        let content_key = ContentKey::generate()?;
        let nonce_prefix = random_array::<CONTENT_NONCE_PREFIX_SIZE>()?;
        debug!(file_id = %file_id, stage = %ProtectStage::KeyGenerated, "protect");

        let area_dir = self.layout.area_dir(request.area);
        let encrypted = encrypt_to_temp(&content_key, &nonce_prefix, &request.input, &area_dir)?;
        debug!(
            file_id = %file_id,
            stage = %ProtectStage::ContentEncrypted,
            bytes = encrypted.plaintext_len,
            "protect"
        );

        // On failure the temp ciphertext is dropped, and with it removed.
        let wrapped = wrap_key(&self.master, &content_key)?;
        drop(content_key);
        debug!(file_id = %file_id, stage = %ProtectStage::KeyWrapped, "protect");

        let blob_path = self.layout.blob_path(request.area, &file_id);
        encrypted
            .file
            .persist_noclobber(&blob_path)
            .map_err(|e| EdudeskError::io(&blob_path, e.error))?;

        let metadata = FileMetadata::new(request.owner_id, &original_name, &nonce_prefix, &wrapped);
        let metadata_path = self.layout.metadata_path(&file_id);
        if let Err(e) = metadata
            .to_json_pretty()
            .and_then(|json| write_atomic(&metadata_path, &json))
        {
            remove_best_effort(&blob_path);
            return Err(e);
        }
        debug!(file_id = %file_id, stage = %ProtectStage::MetadataWritten, "protect");

        info!(
            file_id = %file_id,
            owner_id = request.owner_id,
            area = request.area.dir_name(),
            "file protected"
        );
        Ok(ProtectedFile {
            stored_name: stored_name(&file_id),
            file_id,
            area: request.area,
            original_name,
            owner_id: request.owner_id,
            blob_path,
            metadata_path,
            plaintext_len: encrypted.plaintext_len,
        })
    }

    /// Protect a file, then hand the result to `record` to persist the
    /// owning record.
    ///
    /// If `record` fails the protected files stay on disk and the error is
    /// returned as [`EdudeskError::Unrecorded`] so the caller can reconcile.
    pub fn protect_and_record<R, F>(
        &self,
        request: &ProtectRequest,
        record: F,
    ) -> EdudeskResult<(ProtectedFile, R)>
    where
        F: FnOnce(&ProtectedFile) -> EdudeskResult<R>,
    {
        let protected = self.protect(request)?;
        match record(&protected) {
            Ok(recorded) => {
                debug!(file_id = %protected.file_id, stage = %ProtectStage::DbRecorded, "protect");
                Ok((protected, recorded))
            }
            Err(e) => {
                warn!(
                    file_id = %protected.file_id,
                    error = %e,
                    "file stored but its record was not written"
                );
                Err(EdudeskError::Unrecorded {
                    file_id: protected.file_id,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Read and validate the metadata record of `file_id`.
    pub fn metadata(&self, file_id: &str) -> EdudeskResult<FileMetadata> {
        check_file_id(file_id)?;
        let path = self.layout.metadata_path(file_id);
        let data = std::fs::read(&path).map_err(|e| EdudeskError::io(&path, e))?;
        FileMetadata::from_slice(&data)
    }

    /// True if both ciphertext and metadata of `file_id` are present.
    pub fn exists(&self, area: BlobArea, file_id: &str) -> bool {
        is_valid_file_id(file_id)
            && self.layout.blob_path(area, file_id).is_file()
            && self.layout.metadata_path(file_id).is_file()
    }

    /// Decrypt `file_id` into `dest`. `dest` only appears once the whole
    /// ciphertext authenticated.
    pub fn reveal_to(&self, area: BlobArea, file_id: &str, dest: &Path) -> EdudeskResult<RevealedFile> {
        let (metadata, content_key, nonce_prefix) = self.open_content(file_id)?;

        let blob_path = self.layout.blob_path(area, file_id);
        let bytes = decrypt_file(&content_key, &nonce_prefix, &blob_path, dest)?;
        debug!(file_id = %file_id, stage = %RevealStage::ContentDecrypted, bytes, "reveal");
        debug!(file_id = %file_id, stage = %RevealStage::PlaintextDelivered, "reveal");

        Ok(RevealedFile {
            file_id: file_id.to_string(),
            path: dest.to_path_buf(),
            original_name: metadata.original_name,
            owner_id: metadata.owner_id,
            bytes,
        })
    }

    /// Decrypt `file_id` into a temporary file for an external viewer.
    pub fn reveal_temp(&self, area: BlobArea, file_id: &str) -> EdudeskResult<TempPlaintext> {
        let (metadata, content_key, nonce_prefix) = self.open_content(file_id)?;

        let blob_path = self.layout.blob_path(area, file_id);
        let src = File::open(&blob_path).map_err(|e| EdudeskError::io(&blob_path, e))?;

        let suffix = viewer_suffix(&metadata.original_name);
        let tmp_dir = std::env::temp_dir();
        let mut tmp = tempfile::Builder::new()
            .prefix("edudesk-")
            .suffix(&suffix)
            .tempfile_in(&tmp_dir)
            .map_err(|e| EdudeskError::io(&tmp_dir, e))?;

        let bytes = {
            let tmp_path = tmp.path().to_path_buf();
            let mut sink = BufWriter::new(tmp.as_file_mut());
            let n = decrypt_stream(&content_key, &nonce_prefix, BufReader::new(src), &mut sink)?;
            sink.flush().map_err(|e| EdudeskError::io(&tmp_path, e))?;
            n
        };
        debug!(file_id = %file_id, stage = %RevealStage::ContentDecrypted, bytes, "reveal");
        debug!(file_id = %file_id, stage = %RevealStage::PlaintextDelivered, "reveal");

        Ok(TempPlaintext {
            file: tmp,
            original_name: metadata.original_name,
            bytes,
        })
    }

    /// Delete ciphertext and metadata of `file_id`. Missing parts are not an
    /// error.
    pub fn remove(&self, area: BlobArea, file_id: &str) -> EdudeskResult<()> {
        check_file_id(file_id)?;
        for path in [
            self.layout.blob_path(area, file_id),
            self.layout.metadata_path(file_id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(EdudeskError::io(&path, e)),
            }
        }
        info!(file_id = %file_id, area = area.dir_name(), "protected file removed");
        Ok(())
    }

    fn open_content(
        &self,
        file_id: &str,
    ) -> EdudeskResult<(FileMetadata, ContentKey, [u8; CONTENT_NONCE_PREFIX_SIZE])> {
        let metadata = self.metadata(file_id)?;
        debug!(file_id = %file_id, stage = %RevealStage::MetadataLookedUp, "reveal");

        let content_key = unwrap_key(&self.master, &metadata.wrapped_key()?)?;
        let nonce_prefix = metadata.nonce_prefix()?;
        debug!(file_id = %file_id, stage = %RevealStage::KeyUnwrapped, "reveal");

        Ok((metadata, content_key, nonce_prefix))
    }
}

fn check_file_id(file_id: &str) -> EdudeskResult<()> {
    if is_valid_file_id(file_id) {
        Ok(())
    } else {
        Err(EdudeskError::Validation(format!(
            "invalid file id {file_id:?}: expected 32 lowercase hex characters"
        )))
    }
}

/// `.ext` of `name` if it is a plain alphanumeric extension, else empty.
fn viewer_suffix(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 16)
        .filter(|ext| ext.bytes().all(|b| b.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove orphaned ciphertext");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FileVault>();
    }

    #[test]
    fn test_viewer_suffix() {
        assert_eq!(viewer_suffix("report.pdf"), ".pdf");
        assert_eq!(viewer_suffix("archive.tar.gz"), ".gz");
        assert_eq!(viewer_suffix("README"), "");
        assert_eq!(viewer_suffix("weird.p d f"), "");
        assert_eq!(viewer_suffix("../../evil.sh/"), ".sh");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ProtectStage::MetadataWritten.to_string(), "METADATA_WRITTEN");
        assert_eq!(RevealStage::KeyUnwrapped.to_string(), "KEY_UNWRAPPED");
    }

    #[test]
    fn test_original_name_defaults_to_input() {
        let req = ProtectRequest::new("/tmp/in/essay.docx", 1, BlobArea::Submission);
        assert_eq!(req.resolve_original_name().unwrap(), "essay.docx");
        let req = req.with_original_name("  final.docx ");
        assert_eq!(req.resolve_original_name().unwrap(), "final.docx");
        let req = ProtectRequest::new("/", 1, BlobArea::Submission);
        assert!(req.resolve_original_name().is_err());
    }

    #[test]
    fn test_invalid_file_id_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileVault::new(
            MasterKey::from_bytes([1u8; 32]),
            StorageLayout::new(dir.path()),
        );
        let err = vault
            .reveal_to(BlobArea::Submission, "../../etc/passwd", &dir.path().join("out"))
            .unwrap_err();
        assert_eq!(err.category(), edudesk_core::ErrorCategory::Validation);
        assert!(!vault.exists(BlobArea::Submission, "../x"));
    }
}
