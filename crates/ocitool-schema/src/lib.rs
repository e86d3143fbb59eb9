//! OCI image data model for oci-image-tool.
//!
//! This crate holds the wire types (`Descriptor`, `Manifest`, `ManifestList`,
//! `ImageConfig`), media type identifiers, content digests, and the bundled
//! JSON-schema validator used to check documents before they are decoded.

pub mod config;
pub mod descriptor;
pub mod digest;
pub mod manifest;
pub mod media_type;
pub mod platform;
pub mod validator;

pub use config::{ContainerConfig, History, ImageConfig, RootFs};
pub use descriptor::{Descriptor, ImageLayoutVersion};
pub use digest::{Digest, DigestError, Digester, SHA256};
pub use manifest::{Manifest, ManifestDescriptor, ManifestList, Platform};
pub use media_type::{LayerCompression, MediaType};
pub use validator::{schema_document, JsonSchemaValidator, SchemaValidator};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no schema registered for media type {0}")]
    NoValidator(String),
    #[error("{media_type}: invalid JSON: {source}")]
    Json {
        media_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{media_type}: format mismatch: {reason}")]
    FormatMismatch { media_type: String, reason: String },
    #[error("{media_type}: schema validation failed: {}", .errors.join("; "))]
    ValidationFailed {
        media_type: String,
        errors: Vec<String>,
    },
    #[error("bundled schema {name} is unusable: {reason}")]
    BadSchema { name: &'static str, reason: String },
}
