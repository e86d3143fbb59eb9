//! Guessing what kind of input a path holds.

use crate::{io_at, CoreError};
use ocitool_schema::media_type::{MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST};
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const SNIFF_LEN: usize = 512;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    ImageLayout,
    Image,
    Manifest,
    ManifestList,
    Config,
}

impl InputType {
    pub const ALL: [InputType; 5] = [
        Self::ImageLayout,
        Self::Image,
        Self::Manifest,
        Self::ManifestList,
        Self::Config,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageLayout => "imageLayout",
            Self::Image => "image",
            Self::Manifest => "manifest",
            Self::ManifestList => "manifestList",
            Self::Config => "config",
        }
    }

    /// Whether the input carries a reference store to resolve against.
    pub fn has_refs(self) -> bool {
        matches!(self, Self::ImageLayout | Self::Image)
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownType(format!("{s:?} is not a known input type")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    #[serde(default)]
    schema_version: i64,
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

/// Directories are image layouts; tar, gzip, and other binary content is an
/// image archive; JSON documents are classified by their `mediaType`.
pub fn autodetect(path: &Path) -> Result<InputType, CoreError> {
    let meta = fs::metadata(path).map_err(io_at(path))?;
    if meta.is_dir() {
        return Ok(InputType::ImageLayout);
    }

    let mut file = File::open(path).map_err(io_at(path))?;
    let mut data = Vec::new();
    (&mut file)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut data)
        .map_err(io_at(path))?;
    if looks_binary(&data) {
        debug!("{}: binary content, treating as image archive", path.display());
        return Ok(InputType::Image);
    }

    file.read_to_end(&mut data).map_err(io_at(path))?;
    let header: Header = serde_json::from_slice(&data)
        .map_err(|e| CoreError::UnknownType(format!("{}: unable to parse JSON: {e}", path.display())))?;
    match header.media_type.as_str() {
        MEDIA_TYPE_IMAGE_MANIFEST => Ok(InputType::Manifest),
        MEDIA_TYPE_IMAGE_MANIFEST_LIST => Ok(InputType::ManifestList),
        "" if header.schema_version == 0 && header.config.is_some() => Ok(InputType::Config),
        other => Err(CoreError::UnknownType(format!(
            "{}: unknown media type {other:?}",
            path.display()
        ))),
    }
}

fn looks_binary(head: &[u8]) -> bool {
    if head.starts_with(&GZIP_MAGIC) {
        return true;
    }
    if head.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        return true;
    }
    // A multi-byte character cut off at the sniff boundary is still text.
    head.contains(&0) || matches!(std::str::from_utf8(head), Err(e) if e.error_len().is_some())
}
