//! OCI media type identifiers.
//!
//! [`MediaType`] serializes as a plain string so unknown types survive a
//! decode/encode cycle untouched; the constants below are the types this tool
//! knows how to validate or unpack.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

pub const MEDIA_TYPE_DESCRIPTOR: &str = "application/vnd.oci.descriptor.v1+json";
pub const MEDIA_TYPE_LAYOUT_HEADER: &str = "application/vnd.oci.layout.header.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST_LIST: &str = "application/vnd.oci.image.manifest.list.v1+json";
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

pub const MEDIA_TYPE_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
pub const MEDIA_TYPE_IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_IMAGE_LAYER_NONDISTRIBUTABLE_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";
/// Pre-release spelling still produced by older image builders.
pub const MEDIA_TYPE_IMAGE_LAYER_LEGACY_GZIP: &str = "application/vnd.oci.image.layer.tar+gzip";
pub const MEDIA_TYPE_DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media types a top-level reference may point at.
pub const REF_MEDIA_TYPES: &[&str] = &[MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST];

/// Layer media types whose blobs are gzip-compressed tar streams.
pub const GZIP_LAYER_MEDIA_TYPES: &[&str] = &[
    MEDIA_TYPE_IMAGE_LAYER_GZIP,
    MEDIA_TYPE_IMAGE_LAYER_LEGACY_GZIP,
    MEDIA_TYPE_IMAGE_LAYER_NONDISTRIBUTABLE_GZIP,
    MEDIA_TYPE_DOCKER_LAYER_GZIP,
];

/// How a layer blob is encoded, derived from its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerCompression {
    None,
    Gzip,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the layer encoding if this is a layer type the unpacker understands.
    pub fn layer_compression(&self) -> Option<LayerCompression> {
        if GZIP_LAYER_MEDIA_TYPES.contains(&self.0.as_str()) {
            Some(LayerCompression::Gzip)
        } else if self.0 == MEDIA_TYPE_IMAGE_LAYER {
            Some(LayerCompression::None)
        } else {
            None
        }
    }

    pub fn is_layer(&self) -> bool {
        self.layer_compression().is_some()
    }
}

impl Deref for MediaType {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MediaType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MediaType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MediaType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        Self(s)
    }
}
