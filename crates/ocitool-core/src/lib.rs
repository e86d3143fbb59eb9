//! Validation, unpacking, and conversion pipeline for OCI images.
//!
//! This crate sits on top of the walkers and engines in `ocitool-store`: it
//! resolves a named reference to a manifest, verifies every descriptor against
//! the bytes it points at, extracts layers into a directory tree with whiteout
//! handling and path-escape checks, and translates the image config into a
//! runtime bundle. [`Image`] drives the whole flow for one image source.

pub mod autodetect;
pub mod concurrency;
pub mod descriptor;
pub mod diff;
pub mod image;
pub mod layer;
pub mod manifest;
pub mod runtime;
pub mod settings;

pub use autodetect::{autodetect, InputType};
pub use concurrency::install_signal_handler;
pub use descriptor::{
    find_descriptor, list_references, read_blob, validate_content, validate_descriptor,
    validate_media_type,
};
pub use diff::{create_layer, LayerSummary};
pub use image::{Image, UnpackSummary};
pub use layer::unpack_layer;
pub use manifest::{
    find_manifest, find_manifest_list, select_manifest, unpack_manifest, validate_manifest,
};
pub use runtime::{find_config, to_runtime_spec, RuntimeSpec};
pub use settings::{load_settings, ToolSettings};

use ocitool_schema::{DigestError, SchemaError};
use ocitool_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("invalid digest: {0}")]
    Digest(#[from] DigestError),
    #[error("{expected}: digest mismatch (content hashes to {actual})")]
    DigestMismatch { expected: String, actual: String },
    #[error("{digest}: size mismatch (descriptor says {expected}, read {actual})")]
    SizeMismatch {
        digest: String,
        expected: i64,
        actual: u64,
    },
    #[error("invalid descriptor mediaType {0:?}")]
    InvalidMediaType(String),
    #[error("{path}: malformed manifest: {reason}")]
    MalformedManifest { path: String, reason: String },
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0:?}: path escapes the destination directory")]
    UnsafePath(String),
    #[error("invalid {kind} {path:?} -> {target:?}")]
    UnsafeLink {
        kind: &'static str,
        path: String,
        target: String,
    },
    #[error("{0:?}: duplicate entry in layer")]
    DuplicateEntry(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CoreError>,
    },
    #[error("{0}: unsupported OS")]
    UnsupportedOs(String),
    #[error("config.User: {0}")]
    InvalidUser(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unable to determine input type: {0}")]
    UnknownType(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {source}", path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Wrap this error with a description of what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Store(StoreError::Cancelled))
    }

    /// Individual schema violations, when the root cause is a schema failure.
    pub fn schema_violations(&self) -> Option<&[String]> {
        match self.root_cause() {
            Self::Schema(SchemaError::ValidationFailed { errors, .. }) => Some(errors),
            _ => None,
        }
    }
}

pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> CoreError {
    let path = path.into();
    move |source| CoreError::IoAt { path, source }
}

/// Attach context to the error side of a result.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, CoreError>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, CoreError>;
}

impl<T, E: Into<CoreError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, CoreError> {
        self.map_err(|e| Into::<CoreError>::into(e).context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, CoreError> {
        self.map_err(|e| Into::<CoreError>::into(e).context(f()))
    }
}
