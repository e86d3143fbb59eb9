//! Manifest resolution, validation, and extraction.

use crate::descriptor::{read_blob, validate_descriptor};
use crate::layer::unpack_layer;
use crate::{CoreError, ResultExt};
use ocitool_schema::media_type::{MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST};
use ocitool_schema::{Descriptor, Manifest, ManifestDescriptor, ManifestList, SchemaValidator};
use ocitool_store::{clean_path, CancelToken, WalkControl, Walker};
use std::path::Path;
use tracing::{debug, info, warn};

/// Load the manifest blob a descriptor points at, check it against the
/// manifest schema, and require at least one layer.
pub fn find_manifest<W: Walker>(
    walker: &mut W,
    descriptor: &Descriptor,
    validator: &dyn SchemaValidator,
) -> Result<Manifest, CoreError> {
    let path = clean_path(&descriptor.blob_path());
    let data = read_blob(walker, descriptor).with_context(|| format!("{path}: manifest"))?;
    validator
        .validate(MEDIA_TYPE_IMAGE_MANIFEST, &data)
        .with_context(|| format!("{path}: manifest validation failed"))?;
    let manifest: Manifest = serde_json::from_slice(&data).map_err(|e| {
        CoreError::MalformedManifest {
            path: path.clone(),
            reason: e.to_string(),
        }
    })?;
    if manifest.layers.is_empty() {
        return Err(CoreError::MalformedManifest {
            path,
            reason: "no layers found".to_owned(),
        });
    }
    Ok(manifest)
}

/// Load and schema-check a manifest list blob.
pub fn find_manifest_list<W: Walker>(
    walker: &mut W,
    descriptor: &Descriptor,
    validator: &dyn SchemaValidator,
) -> Result<ManifestList, CoreError> {
    let path = clean_path(&descriptor.blob_path());
    let data = read_blob(walker, descriptor).with_context(|| format!("{path}: manifest list"))?;
    validator
        .validate(MEDIA_TYPE_IMAGE_MANIFEST_LIST, &data)
        .with_context(|| format!("{path}: manifest list validation failed"))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Verify the config blob, then every layer blob, in order.
pub fn validate_manifest<W: Walker>(
    walker: &mut W,
    manifest: &Manifest,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    validate_descriptor(walker, &manifest.config, None, cancel)
        .context("config validation failed")?;
    for (index, layer) in manifest.layers.iter().enumerate() {
        validate_descriptor(walker, layer, None, cancel)
            .with_context(|| format!("layer {index} validation failed"))?;
    }
    Ok(())
}

/// Pick the entry of a manifest list that matches the running platform. A
/// list with a single entry matches regardless of its platform.
pub fn select_manifest<'a>(
    list: &'a ManifestList,
    os: &str,
    architecture: &str,
) -> Result<&'a ManifestDescriptor, CoreError> {
    let matching = list.manifests.iter().find(|entry| {
        entry
            .platform
            .as_ref()
            .is_some_and(|p| p.os == os && p.architecture == architecture)
    });
    match (matching, list.manifests.as_slice()) {
        (Some(entry), _) => Ok(entry),
        (None, [only]) => Ok(only),
        (None, _) => Err(CoreError::NotFound(format!(
            "manifest for platform {os}/{architecture}"
        ))),
    }
}

/// Extract every layer of `manifest` into `dest`, in manifest order.
/// Layers whose media type is not a known tar layer are skipped.
pub fn unpack_manifest<W: Walker>(
    walker: &mut W,
    manifest: &Manifest,
    dest: &Path,
    cancel: &CancelToken,
) -> Result<usize, CoreError> {
    let mut unpacked = 0;
    for layer in &manifest.layers {
        let Some(compression) = layer.media_type.layer_compression() else {
            warn!(
                "skipping layer {} with unsupported media type {}",
                layer.digest, layer.media_type
            );
            continue;
        };
        let target = clean_path(&layer.blob_path());
        let outcome = walker.walk(|entry, reader| {
            if entry.is_dir() || entry.path != target {
                return Ok(WalkControl::Continue);
            }
            unpack_layer(dest, reader, compression, cancel)
                .with_context(|| format!("error extracting layer {}", layer.digest))?;
            Ok::<_, CoreError>(WalkControl::Stop)
        })?;
        if !outcome.stopped() {
            return Err(CoreError::NotFound(target));
        }
        debug!("unpacked layer {}", layer.digest);
        unpacked += 1;
    }
    info!("unpacked {unpacked} layer(s) into {}", dest.display());
    Ok(unpacked)
}
