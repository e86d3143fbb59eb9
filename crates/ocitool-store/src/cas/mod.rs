//! Content-addressable blob storage.
//!
//! Blobs are named by the digest of their content and live under
//! `blobs/<algorithm>/<encoded>`. Writing identical content twice is a no-op.

mod archive;
mod directory;

pub use archive::TarCasEngine;
pub use directory::DirCasEngine;

use crate::{io_at, CancelToken, StoreError};
use ocitool_schema::{Descriptor, Digest, Digester, MediaType};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

pub trait CasEngine {
    /// Store everything `reader` yields and return its sha256 digest.
    fn put(&mut self, cancel: &CancelToken, reader: &mut dyn Read) -> Result<Digest, StoreError>;

    /// Stream the blob named by `digest` (`<algorithm>:<encoded>`).
    fn get<'a>(
        &'a mut self,
        cancel: &CancelToken,
        digest: &str,
    ) -> Result<Box<dyn Read + 'a>, StoreError>;

    fn delete(&mut self, cancel: &CancelToken, digest: &str) -> Result<(), StoreError> {
        let _ = (cancel, digest);
        Err(StoreError::Unimplemented("blob deletion"))
    }

    /// Release the backing handle. Later calls fail with `Closed`.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Serialise `value` as JSON, store it, and describe the stored blob.
pub fn put_json<T: Serialize + ?Sized>(
    engine: &mut dyn CasEngine,
    cancel: &CancelToken,
    media_type: impl Into<MediaType>,
    value: &T,
) -> Result<Descriptor, StoreError> {
    let data = serde_json::to_vec(value)?;
    let digest = engine.put(cancel, &mut data.as_slice())?;
    Ok(Descriptor::new(media_type, &digest, data.len() as i64))
}

/// Open the CAS of the layout at `path`: a directory layout or a layout tar.
pub fn open_cas(path: &Path, cancel: &CancelToken) -> Result<Box<dyn CasEngine>, StoreError> {
    let meta = std::fs::metadata(path).map_err(io_at(path))?;
    if meta.is_dir() {
        Ok(Box::new(DirCasEngine::open(path)?))
    } else {
        Ok(Box::new(TarCasEngine::open(path, cancel)?))
    }
}

/// Copy `reader` through a sha256 digester into `sink`, checking for
/// cancellation between chunks.
pub(crate) fn copy_digesting(
    cancel: &CancelToken,
    reader: &mut dyn Read,
    sink: &mut dyn std::io::Write,
) -> Result<(Digest, u64), StoreError> {
    let mut digester = Digester::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        cancel.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Io(e)),
        };
        digester.update(&buf[..n]);
        sink.write_all(&buf[..n])?;
    }
    Ok(digester.finish())
}

/// Parse a digest and require an algorithm this tool can compute.
pub(crate) fn parse_digest(digest: &str) -> Result<Digest, StoreError> {
    let parsed: Digest = digest.parse()?;
    parsed.verify_encoding()?;
    Ok(parsed)
}
