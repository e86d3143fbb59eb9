//! One image source, directory layout or tar archive, and the operations
//! that run end to end against it.

use crate::descriptor::{find_descriptor, list_references, validate_descriptor};
use crate::manifest::{
    find_manifest, find_manifest_list, select_manifest, unpack_manifest, validate_manifest,
};
use crate::runtime::{find_config, to_runtime_spec};
use crate::{io_at, CoreError, ResultExt};
use ocitool_schema::media_type::{
    MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST, REF_MEDIA_TYPES,
};
use ocitool_schema::{Descriptor, JsonSchemaValidator, Manifest, SchemaValidator};
use ocitool_store::layout::check_version_bytes;
use ocitool_store::{
    clean_path, escapes_root, CancelToken, SourceWalker, WalkControl, Walker, OCI_LAYOUT_FILE,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const RUNTIME_CONFIG_FILE: &str = "config.json";

const MANIFEST_ONLY: &[&str] = &[MEDIA_TYPE_IMAGE_MANIFEST];

/// Result of an unpack or bundle operation.
#[derive(Debug, Clone, Serialize)]
pub struct UnpackSummary {
    pub reference: String,
    pub manifest: String,
    pub layers: usize,
    pub rootfs: PathBuf,
}

pub struct Image<W: Walker> {
    walker: W,
    cancel: CancelToken,
    validator: Box<dyn SchemaValidator>,
}

impl Image<SourceWalker> {
    /// Open a directory layout or an image tarball.
    pub fn open(path: &Path, cancel: CancelToken) -> Result<Self, CoreError> {
        let walker = SourceWalker::open(path, cancel.clone())?;
        Ok(Self::new(walker, cancel))
    }
}

impl<W: Walker> Image<W> {
    pub fn new(walker: W, cancel: CancelToken) -> Self {
        Self {
            walker,
            cancel,
            validator: Box::new(JsonSchemaValidator::new()),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Box<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// A missing `oci-layout` only warns; a present one must declare a
    /// supported version.
    pub fn check_layout(&mut self) -> Result<(), CoreError> {
        let mut content = None;
        self.walker.walk(|entry, reader| {
            if entry.is_dir() || entry.path != OCI_LAYOUT_FILE {
                return Ok(WalkControl::Continue);
            }
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .with_context(|| format!("{OCI_LAYOUT_FILE}: read failed"))?;
            content = Some(buf);
            Ok::<_, CoreError>(WalkControl::Stop)
        })?;
        match content {
            Some(bytes) => {
                check_version_bytes(&bytes).context(OCI_LAYOUT_FILE)?;
                Ok(())
            }
            None => {
                warn!("{OCI_LAYOUT_FILE} not found; assuming a compatible layout");
                Ok(())
            }
        }
    }

    pub fn references(&mut self) -> Result<BTreeMap<String, Descriptor>, CoreError> {
        list_references(&mut self.walker)
    }

    /// Look up a reference and verify the blob it names.
    pub fn resolve(&mut self, name: &str) -> Result<Descriptor, CoreError> {
        let descriptor = find_descriptor(&mut self.walker, name)?;
        validate_descriptor(&mut self.walker, &descriptor, Some(REF_MEDIA_TYPES), &self.cancel)?;
        Ok(descriptor)
    }

    /// Full check of one reference: its manifest (or every manifest of a
    /// manifest list), the config, and every layer.
    pub fn validate_ref(&mut self, name: &str) -> Result<(), CoreError> {
        let descriptor = self.resolve(name)?;
        if descriptor.media_type == MEDIA_TYPE_IMAGE_MANIFEST_LIST {
            let list = find_manifest_list(&mut self.walker, &descriptor, self.validator.as_ref())?;
            for (index, entry) in list.manifests.iter().enumerate() {
                self.validate_manifest_descriptor(&entry.descriptor, true)
                    .with_context(|| format!("manifest {index} of list {}", descriptor.digest))?;
            }
        } else {
            self.validate_manifest_descriptor(&descriptor, false)?;
        }
        info!("reference {name:?}: OK");
        Ok(())
    }

    /// Validate each reference independently. The layout marker is checked
    /// once, up front; a bad marker fails the whole source.
    pub fn validate(&mut self, refs: &[String]) -> Result<Vec<(String, Result<(), CoreError>)>, CoreError> {
        self.check_layout()?;
        let mut results = Vec::with_capacity(refs.len());
        for name in refs {
            self.cancel.check()?;
            let result = self.validate_ref(name);
            results.push((name.clone(), result));
        }
        Ok(results)
    }

    /// Validate the image behind `name` and extract its layers into `dest`.
    pub fn unpack(&mut self, dest: &Path, name: &str) -> Result<UnpackSummary, CoreError> {
        self.check_layout()?;
        let (descriptor, manifest) = self.resolve_manifest(name)?;
        let layers = unpack_manifest(&mut self.walker, &manifest, dest, &self.cancel)?;
        Ok(UnpackSummary {
            reference: name.to_owned(),
            manifest: descriptor.digest,
            layers,
            rootfs: dest.to_path_buf(),
        })
    }

    /// Unpack into `dest/<rootfs>` and write `dest/config.json`.
    pub fn create_runtime_bundle(
        &mut self,
        dest: &Path,
        name: &str,
        rootfs: &str,
    ) -> Result<UnpackSummary, CoreError> {
        let rootfs = checked_rootfs(rootfs)?;
        self.check_layout()?;
        let (descriptor, manifest) = self.resolve_manifest(name)?;
        let config = find_config(&mut self.walker, &manifest.config, self.validator.as_ref())?;
        let spec = to_runtime_spec(&config, &rootfs)?;

        let rootfs_dir = dest.join(&rootfs);
        let layers = unpack_manifest(&mut self.walker, &manifest, &rootfs_dir, &self.cancel)?;

        let mut json = serde_json::to_vec_pretty(&spec)?;
        json.push(b'\n');
        write_atomic(&dest.join(RUNTIME_CONFIG_FILE), &json)?;
        info!("bundle written to {}", dest.display());

        Ok(UnpackSummary {
            reference: name.to_owned(),
            manifest: descriptor.digest,
            layers,
            rootfs: rootfs_dir,
        })
    }

    /// Resolve `name` to a validated manifest, choosing the host platform's
    /// entry when the reference is a manifest list.
    fn resolve_manifest(&mut self, name: &str) -> Result<(Descriptor, Manifest), CoreError> {
        let mut descriptor = self.resolve(name)?;
        if descriptor.media_type == MEDIA_TYPE_IMAGE_MANIFEST_LIST {
            let list = find_manifest_list(&mut self.walker, &descriptor, self.validator.as_ref())?;
            let (os, arch) = host_platform();
            let entry = select_manifest(&list, os, arch)?;
            debug!("manifest list {} selects {}", descriptor.digest, entry.descriptor.digest);
            descriptor = entry.descriptor.clone();
            validate_descriptor(&mut self.walker, &descriptor, Some(MANIFEST_ONLY), &self.cancel)?;
        }
        let manifest = find_manifest(&mut self.walker, &descriptor, self.validator.as_ref())?;
        validate_manifest(&mut self.walker, &manifest, &self.cancel)?;
        Ok((descriptor, manifest))
    }

    /// `verify_blob` is false when the descriptor came from a reference that
    /// [`Image::resolve`] already checked.
    fn validate_manifest_descriptor(
        &mut self,
        descriptor: &Descriptor,
        verify_blob: bool,
    ) -> Result<(), CoreError> {
        if verify_blob {
            validate_descriptor(&mut self.walker, descriptor, Some(MANIFEST_ONLY), &self.cancel)?;
        }
        let manifest = find_manifest(&mut self.walker, descriptor, self.validator.as_ref())?;
        validate_manifest(&mut self.walker, &manifest, &self.cancel)
    }
}

/// Platform names as they appear in image configs and manifest lists.
pub fn host_platform() -> (&'static str, &'static str) {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    };
    (std::env::consts::OS, arch)
}

fn checked_rootfs(rootfs: &str) -> Result<String, CoreError> {
    let cleaned = clean_path(rootfs);
    if cleaned == "." || cleaned.starts_with('/') || escapes_root(&cleaned) {
        return Err(CoreError::UnsafePath(rootfs.to_owned()));
    }
    Ok(cleaned)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_at(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_at(dir))?;
    tmp.write_all(data).map_err(io_at(path))?;
    tmp.as_file().sync_all().map_err(io_at(path))?;
    tmp.persist(path).map_err(|e| io_at(path)(e.error))?;
    Ok(())
}
