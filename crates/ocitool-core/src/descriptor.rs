//! Locating descriptors and checking them against the blobs they name.

use crate::{CoreError, ResultExt};
use ocitool_schema::{Descriptor, Digester};
use ocitool_store::{clean_path, CancelToken, WalkControl, Walker};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash everything `reader` yields and compare digest, then size, against
/// the descriptor.
pub fn validate_content(
    descriptor: &Descriptor,
    reader: &mut dyn Read,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    let expected = descriptor.parsed_digest()?;
    expected.verify_encoding()?;

    let mut digester = Digester::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        cancel.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CoreError::Io(e).context("error generating hash")),
        };
        digester.update(&buf[..n]);
    }
    let (actual, read) = digester.finish();

    if actual.to_string() != descriptor.digest {
        return Err(CoreError::DigestMismatch {
            expected: descriptor.digest.clone(),
            actual: actual.to_string(),
        });
    }
    if i64::try_from(read).ok() != Some(descriptor.size) {
        return Err(CoreError::SizeMismatch {
            digest: descriptor.digest.clone(),
            expected: descriptor.size,
            actual: read,
        });
    }
    Ok(())
}

pub fn validate_media_type(descriptor: &Descriptor, allowed: &[&str]) -> Result<(), CoreError> {
    if allowed.iter().any(|mt| descriptor.media_type == *mt) {
        Ok(())
    } else {
        Err(CoreError::InvalidMediaType(descriptor.media_type.to_string()))
    }
}

/// Read the reference `refs/<name>` and decode the descriptor it holds.
pub fn find_descriptor<W: Walker>(walker: &mut W, name: &str) -> Result<Descriptor, CoreError> {
    let target = clean_path(&format!("refs/{name}"));
    let mut found = None;
    let outcome = walker.walk(|entry, reader| {
        if entry.is_dir() || entry.path != target {
            return Ok(WalkControl::Continue);
        }
        let descriptor: Descriptor = serde_json::from_reader(reader)
            .with_context(|| format!("{target}: unable to decode descriptor"))?;
        found = Some(descriptor);
        Ok::<_, CoreError>(WalkControl::Stop)
    })?;
    match found {
        Some(descriptor) if outcome.stopped() => Ok(descriptor),
        _ => Err(CoreError::NotFound(format!("{target}: descriptor"))),
    }
}

/// Every reference in the layout, keyed by name.
pub fn list_references<W: Walker>(walker: &mut W) -> Result<BTreeMap<String, Descriptor>, CoreError> {
    let mut refs = BTreeMap::new();
    walker.walk(|entry, reader| {
        if entry.is_dir() || !entry.path.starts_with("refs/") {
            return Ok(WalkControl::Continue);
        }
        let descriptor: Descriptor = serde_json::from_reader(reader)
            .with_context(|| format!("{}: unable to decode descriptor", entry.path))?;
        refs.insert(entry.name().to_owned(), descriptor);
        Ok::<_, CoreError>(WalkControl::Continue)
    })?;
    Ok(refs)
}

/// Find the blob a descriptor points at and verify its content. When
/// `allowed` is given, the descriptor's media type must be one of them.
pub fn validate_descriptor<W: Walker>(
    walker: &mut W,
    descriptor: &Descriptor,
    allowed: Option<&[&str]>,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    if let Some(allowed) = allowed {
        validate_media_type(descriptor, allowed)?;
    }
    let target = clean_path(&descriptor.blob_path());
    let outcome = walker
        .walk(|entry, reader| {
            if entry.is_dir() || entry.path != target {
                return Ok(WalkControl::Continue);
            }
            validate_content(descriptor, reader, cancel)?;
            Ok::<_, CoreError>(WalkControl::Stop)
        })
        .with_context(|| format!("{}: validation failed", descriptor.digest))?;
    if !outcome.stopped() {
        return Err(CoreError::NotFound(descriptor.digest.clone()));
    }
    debug!("{}: content OK", descriptor.digest);
    Ok(())
}

/// Read the whole blob a descriptor points at, without verifying it.
pub fn read_blob<W: Walker>(walker: &mut W, descriptor: &Descriptor) -> Result<Vec<u8>, CoreError> {
    let target = clean_path(&descriptor.blob_path());
    let mut data = None;
    walker.walk(|entry, reader| {
        if entry.is_dir() || entry.path != target {
            return Ok(WalkControl::Continue);
        }
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .with_context(|| format!("{target}: error reading blob"))?;
        data = Some(buf);
        Ok::<_, CoreError>(WalkControl::Stop)
    })?;
    data.ok_or_else(|| CoreError::NotFound(target))
}
