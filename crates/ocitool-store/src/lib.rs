//! Storage layer for oci-image-tool.
//!
//! An image layout lives either in a plain directory or inside a tar archive.
//! This crate provides uniform traversal over both (`PathWalker`, `TarWalker`),
//! a content-addressable blob store (`CasEngine`) and a named reference store
//! (`RefEngine`) for each backing, the `oci-layout` version marker, and the
//! cooperative `CancelToken` checked by every long-running loop.

pub mod cancel;
pub mod cas;
pub mod layout;
pub mod paths;
pub mod refs;
pub mod tarfile;
pub mod walker;

pub use cancel::CancelToken;
pub use cas::{open_cas, put_json, CasEngine, DirCasEngine, TarCasEngine};
pub use layout::{ImageLayout, IMAGE_LAYOUT_VERSION, OCI_LAYOUT_FILE};
pub use paths::{clean_path, escapes_root};
pub use refs::{open_refs, validate_ref_name, DirRefEngine, RefEngine, TarRefEngine};
pub use tarfile::{check_tar_version, create_tar_layout};
pub use walker::{
    EntryKind, PathWalker, SourceWalker, TarWalker, WalkControl, WalkEntry, WalkOutcome, Walker,
};

use ocitool_schema::DigestError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Wraps an I/O error with the path it concerns.
pub fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::IoAt { path, source }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {source}", path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}: not found")]
    NotFound(String),
    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),
    #[error("{0} is not supported by this backing")]
    Unimplemented(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[error("engine is closed")]
    Closed,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("oci-layout not found in {0}")]
    LayoutMissing(String),
    #[error("unrecognized imageLayoutVersion: expected {expected:?}, found {found:?}")]
    LayoutVersion { expected: String, found: String },
    #[error("invalid reference name {0:?}")]
    InvalidName(String),
    #[error("tar entry name does not start with './': {0:?}")]
    InvalidTarEntryName(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::IoAt { source, .. } | Self::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_at_includes_path() {
        let err = io_at("/some/blob")(std::io::Error::other("boom"));
        let msg = err.to_string();
        assert!(msg.contains("/some/blob"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn not_found_detection() {
        assert!(StoreError::NotFound("refs/latest".into()).is_not_found());
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(io_at("x")(io).is_not_found());
        assert!(!StoreError::Cancelled.is_not_found());
    }

    #[test]
    fn layout_version_display() {
        let e = StoreError::LayoutVersion {
            expected: "1.0.0".into(),
            found: "2.0.0".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("1.0.0"));
        assert!(msg.contains("2.0.0"));
    }
}
