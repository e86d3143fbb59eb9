use crate::digest::{Digest, DigestError};
use crate::media_type::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a blob by media type, content digest, and size.
///
/// `digest` is kept as the raw string from the document so that malformed
/// values can still be decoded and reported; use [`Descriptor::parsed_digest`]
/// before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: MediaType,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<MediaType>, digest: &Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.to_string(),
            size,
            urls: None,
            annotations: None,
        }
    }

    pub fn parsed_digest(&self) -> Result<Digest, DigestError> {
        self.digest.parse()
    }

    /// Algorithm half of the digest, empty if the digest has no separator.
    pub fn algorithm(&self) -> &str {
        self.digest.split_once(':').map_or("", |(a, _)| a)
    }

    /// Encoded half of the digest, empty if the digest has no separator.
    pub fn encoded(&self) -> &str {
        self.digest.split_once(':').map_or("", |(_, h)| h)
    }

    /// Layout-relative path of the blob this descriptor points at.
    pub fn blob_path(&self) -> String {
        format!("blobs/{}/{}", self.algorithm(), self.encoded())
    }
}

/// Contents of the `oci-layout` marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayoutVersion {
    #[serde(rename = "imageLayoutVersion")]
    pub version: String,
}
