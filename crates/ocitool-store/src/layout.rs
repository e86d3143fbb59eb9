use crate::{fsync_dir, io_at, StoreError};
use ocitool_schema::{Digest, ImageLayoutVersion};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Layout version this tool reads and writes.
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";
/// Name of the version marker at the root of every layout.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

pub const BLOBS_DIR: &str = "blobs";
pub const REFS_DIR: &str = "refs";

/// Directory form of an image layout.
///
/// ```text
/// <root>/oci-layout
/// <root>/blobs/<algorithm>/<encoded>
/// <root>/refs/<name>
/// ```
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    #[inline]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir()
            .join(digest.algorithm())
            .join(digest.encoded())
    }

    #[inline]
    pub fn refs_dir(&self) -> PathBuf {
        self.root.join(REFS_DIR)
    }

    #[inline]
    pub fn ref_path(&self, name: &str) -> PathBuf {
        self.refs_dir().join(name)
    }

    #[inline]
    pub fn layout_file(&self) -> PathBuf {
        self.root.join(OCI_LAYOUT_FILE)
    }

    /// Create `blobs/`, `refs/` and the version marker. An existing marker is
    /// verified rather than overwritten.
    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.blobs_dir()).map_err(io_at(self.blobs_dir()))?;
        fs::create_dir_all(self.refs_dir()).map_err(io_at(self.refs_dir()))?;

        let marker = self.layout_file();
        if marker.exists() {
            return self.verify_version();
        }

        let version = ImageLayoutVersion {
            version: IMAGE_LAYOUT_VERSION.to_owned(),
        };
        let content = serde_json::to_vec(&version)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&marker).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.root)?;
        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let marker = self.layout_file();
        let content = match fs::read(&marker) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::LayoutMissing(self.root.display().to_string()));
            }
            Err(e) => return Err(io_at(marker)(e)),
        };
        check_version_bytes(&content)
    }
}

/// Decode an `oci-layout` document and require the supported version.
pub fn check_version_bytes(content: &[u8]) -> Result<(), StoreError> {
    let version: ImageLayoutVersion = serde_json::from_slice(content)?;
    if version.version != IMAGE_LAYOUT_VERSION {
        return Err(StoreError::LayoutVersion {
            expected: IMAGE_LAYOUT_VERSION.to_owned(),
            found: version.version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = ImageLayout::new("/tmp/image");
        let digest = Digest::of_bytes(b"x");
        assert_eq!(layout.blobs_dir(), PathBuf::from("/tmp/image/blobs"));
        assert_eq!(
            layout.blob_path(&digest),
            PathBuf::from(format!("/tmp/image/blobs/sha256/{}", digest.encoded()))
        );
        assert_eq!(layout.ref_path("v1.0"), PathBuf::from("/tmp/image/refs/v1.0"));
        assert_eq!(layout.layout_file(), PathBuf::from("/tmp/image/oci-layout"));
    }

    #[test]
    fn initialize_creates_structure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ImageLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.blobs_dir().is_dir());
        assert!(layout.refs_dir().is_dir());
        let marker = fs::read_to_string(layout.layout_file()).unwrap();
        assert_eq!(marker, r#"{"imageLayoutVersion":"1.0.0"}"#);
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ImageLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn missing_marker_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageLayout::new(dir.path()).verify_version().unwrap_err();
        assert!(matches!(err, StoreError::LayoutMissing(_)));
    }

    #[test]
    fn version_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ImageLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(layout.layout_file(), r#"{"imageLayoutVersion":"0.9"}"#).unwrap();
        let err = layout.verify_version().unwrap_err();
        assert!(matches!(err, StoreError::LayoutVersion { .. }));
    }
}
