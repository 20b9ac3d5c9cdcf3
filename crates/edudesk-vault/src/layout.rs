//! On-disk layout of protected files
//!
//! ```text
//! <root>/
//!   files/<file_id>.dat        submission ciphertext
//!   assignments/<file_id>.dat  instructor material ciphertext
//!   metadata/<file_id>.json    wrapped key + nonces, one per file
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use edudesk_core::config::StorageConfig;
use edudesk_core::{BlobArea, EdudeskError, EdudeskResult};

const METADATA_DIR: &str = "metadata";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the blob and metadata directories if they are missing.
    pub fn ensure(&self) -> EdudeskResult<()> {
        for dir in [
            self.area_dir(BlobArea::Submission),
            self.area_dir(BlobArea::Material),
            self.metadata_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| EdudeskError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn area_dir(&self, area: BlobArea) -> PathBuf {
        self.root.join(area.dir_name())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn blob_path(&self, area: BlobArea, file_id: &str) -> PathBuf {
        self.area_dir(area).join(stored_name(file_id))
    }

    pub fn metadata_path(&self, file_id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{file_id}.json"))
    }
}

/// Name of the ciphertext file for `file_id`, as kept in submission records
pub fn stored_name(file_id: &str) -> String {
    format!("{file_id}.dat")
}

/// Write `data` to `path` through a synced temp sibling and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> EdudeskResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EdudeskError::io(dir, e))?;
    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| EdudeskError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| EdudeskError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/srv/edudesk");
        assert_eq!(
            layout.blob_path(BlobArea::Submission, "ab12"),
            PathBuf::from("/srv/edudesk/files/ab12.dat")
        );
        assert_eq!(
            layout.blob_path(BlobArea::Material, "ab12"),
            PathBuf::from("/srv/edudesk/assignments/ab12.dat")
        );
        assert_eq!(
            layout.metadata_path("ab12"),
            PathBuf::from("/srv/edudesk/metadata/ab12.json")
        );
    }

    #[test]
    fn test_ensure_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("storage"));
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.area_dir(BlobArea::Submission).is_dir());
        assert!(layout.area_dir(BlobArea::Material).is_dir());
        assert!(layout.metadata_dir().is_dir());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
