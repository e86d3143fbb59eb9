//! Schema-validation capability.
//!
//! Callers depend on [`SchemaValidator`]; [`JsonSchemaValidator`] is the
//! bundled implementation. It first runs media-type specific checks on the
//! decoded document, then validates the raw JSON against the embedded schema
//! registered for that media type.

use crate::config::ImageConfig;
use crate::descriptor::Descriptor;
use crate::digest::DigestError;
use crate::manifest::{Manifest, ManifestList};
use crate::media_type::{
    MEDIA_TYPE_DESCRIPTOR, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_IMAGE_MANIFEST_LIST, MEDIA_TYPE_LAYOUT_HEADER,
};
use crate::platform::{check_architecture, check_platform};
use crate::SchemaError;
use jsonschema::{Draft, JSONSchema};
use tracing::{debug, warn};

/// Validates raw bytes against the schema registered for a media type.
pub trait SchemaValidator {
    fn validate(&self, media_type: &str, data: &[u8]) -> Result<(), SchemaError>;
}

/// Embedded schema document for a media type: `(file name, JSON source)`.
pub fn schema_document(media_type: &str) -> Option<(&'static str, &'static str)> {
    match media_type {
        MEDIA_TYPE_DESCRIPTOR => Some((
            "content-descriptor.json",
            include_str!("../schemas/content-descriptor.json"),
        )),
        MEDIA_TYPE_LAYOUT_HEADER => Some((
            "image-layout-schema.json",
            include_str!("../schemas/image-layout-schema.json"),
        )),
        MEDIA_TYPE_IMAGE_MANIFEST => Some((
            "image-manifest-schema.json",
            include_str!("../schemas/image-manifest-schema.json"),
        )),
        MEDIA_TYPE_IMAGE_MANIFEST_LIST => Some((
            "manifest-list-schema.json",
            include_str!("../schemas/manifest-list-schema.json"),
        )),
        MEDIA_TYPE_IMAGE_CONFIG => Some((
            "config-schema.json",
            include_str!("../schemas/config-schema.json"),
        )),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, media_type: &str, data: &[u8]) -> Result<(), SchemaError> {
        let (name, source) = schema_document(media_type)
            .ok_or_else(|| SchemaError::NoValidator(media_type.to_owned()))?;

        check_media_type(media_type, data)?;

        let instance: serde_json::Value =
            serde_json::from_slice(data).map_err(|source| SchemaError::Json {
                media_type: media_type.to_owned(),
                source,
            })?;
        let schema: serde_json::Value =
            serde_json::from_str(source).map_err(|e| SchemaError::BadSchema {
                name,
                reason: e.to_string(),
            })?;
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| SchemaError::BadSchema {
                name,
                reason: e.to_string(),
            })?;

        if let Err(errors) = compiled.validate(&instance) {
            let errors: Vec<String> = errors
                .map(|e| {
                    let pointer = e.instance_path.to_string();
                    if pointer.is_empty() {
                        format!("(root): {e}")
                    } else {
                        format!("{pointer}: {e}")
                    }
                })
                .collect();
            return Err(SchemaError::ValidationFailed {
                media_type: media_type.to_owned(),
                errors,
            });
        }

        debug!("{media_type}: schema {name} OK");
        Ok(())
    }
}

fn check_media_type(media_type: &str, data: &[u8]) -> Result<(), SchemaError> {
    let mismatch = |e: serde_json::Error| SchemaError::FormatMismatch {
        media_type: media_type.to_owned(),
        reason: e.to_string(),
    };

    match media_type {
        MEDIA_TYPE_IMAGE_MANIFEST => {
            let manifest: Manifest = serde_json::from_slice(data).map_err(mismatch)?;
            if manifest.config.media_type != MEDIA_TYPE_IMAGE_CONFIG {
                warn!(
                    "config {} has an unknown media type: {}",
                    manifest.config.digest, manifest.config.media_type
                );
            }
            for layer in &manifest.layers {
                if !layer.media_type.is_layer() {
                    warn!(
                        "layer {} has an unknown media type: {}",
                        layer.digest, layer.media_type
                    );
                }
            }
        }
        MEDIA_TYPE_IMAGE_MANIFEST_LIST => {
            let list: ManifestList = serde_json::from_slice(data).map_err(mismatch)?;
            for entry in &list.manifests {
                if entry.descriptor.media_type != MEDIA_TYPE_IMAGE_MANIFEST {
                    warn!(
                        "manifest {} has an unknown media type: {}",
                        entry.descriptor.digest, entry.descriptor.media_type
                    );
                }
                if let Some(platform) = &entry.platform {
                    check_platform(&platform.os, &platform.architecture);
                    check_architecture(&platform.architecture, &platform.variant);
                }
            }
        }
        MEDIA_TYPE_IMAGE_CONFIG => {
            let config: ImageConfig = serde_json::from_slice(data).map_err(mismatch)?;
            check_platform(&config.os, &config.architecture);
            check_architecture(&config.architecture, &config.variant);
            for env in &config.config.env {
                if !valid_env(env) {
                    return Err(SchemaError::FormatMismatch {
                        media_type: media_type.to_owned(),
                        reason: format!("unexpected env: {env:?}"),
                    });
                }
            }
        }
        MEDIA_TYPE_DESCRIPTOR => {
            let descriptor: Descriptor = serde_json::from_slice(data).map_err(mismatch)?;
            match descriptor
                .parsed_digest()
                .and_then(|d| d.verify_encoding())
            {
                Ok(()) => {}
                Err(DigestError::UnsupportedAlgorithm(alg)) => {
                    warn!("unsupported digest algorithm {alg:?} in {}", descriptor.digest);
                }
                Err(e) => {
                    return Err(SchemaError::FormatMismatch {
                        media_type: media_type.to_owned(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        _ => {}
    }
    Ok(())
}

// ^[^=]+=.*$
fn valid_env(entry: &str) -> bool {
    matches!(entry.find('='), Some(idx) if idx > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:6f4e69a5ff18d92e7315e3ee31c62165ebf25bfa05cad05c0d09d8f412dae401",
            "size": 1470
        },
        "layers": [{
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": "sha256:c49bda176134fb2c23fc9c4a9e3b5d2e5ee6f0b8df4cdc42a5c57ba0bd5e7c34",
            "size": 32
        }],
        "annotations": null
    }"#;

    fn validator() -> JsonSchemaValidator {
        JsonSchemaValidator::new()
    }

    #[test]
    fn valid_manifest_passes() {
        validator()
            .validate(MEDIA_TYPE_IMAGE_MANIFEST, MANIFEST.as_bytes())
            .unwrap();
    }

    #[test]
    fn manifest_without_layers_key_fails_schema() {
        let doc = r#"{
            "schemaVersion": 2,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:aa", "size": 1}
        }"#;
        let err = validator()
            .validate(MEDIA_TYPE_IMAGE_MANIFEST, doc.as_bytes())
            .unwrap_err();
        match err {
            SchemaError::ValidationFailed { errors, .. } => assert!(!errors.is_empty()),
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn wrong_schema_version_collects_every_violation() {
        let doc = r#"{
            "schemaVersion": 1,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:aa", "size": -1},
            "layers": []
        }"#;
        let err = validator()
            .validate(MEDIA_TYPE_IMAGE_MANIFEST, doc.as_bytes())
            .unwrap_err();
        match err {
            SchemaError::ValidationFailed { errors, .. } => assert!(errors.len() >= 2, "{errors:?}"),
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = validator()
            .validate(MEDIA_TYPE_IMAGE_MANIFEST, b"{not json")
            .unwrap_err();
        assert!(matches!(err, SchemaError::FormatMismatch { .. }));
    }

    #[test]
    fn unknown_media_type_has_no_validator() {
        let err = validator().validate("text/plain", b"{}").unwrap_err();
        assert!(matches!(err, SchemaError::NoValidator(_)));
    }

    #[test]
    fn config_env_without_equals_fails() {
        let doc = r#"{"architecture": "amd64", "os": "linux", "config": {"Env": ["NOEQUALS"]}}"#;
        let err = validator()
            .validate(MEDIA_TYPE_IMAGE_CONFIG, doc.as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("unexpected env"));
    }

    #[test]
    fn config_with_null_lists_passes() {
        let doc = r#"{"architecture": "amd64", "os": "linux",
            "config": {"Env": null, "Entrypoint": null, "Cmd": null, "Volumes": null, "Labels": null}}"#;
        validator()
            .validate(MEDIA_TYPE_IMAGE_CONFIG, doc.as_bytes())
            .unwrap();

        let doc = r#"{"architecture": "amd64", "os": "linux", "config": null}"#;
        validator()
            .validate(MEDIA_TYPE_IMAGE_CONFIG, doc.as_bytes())
            .unwrap();
    }

    #[test]
    fn config_with_unknown_platform_only_warns() {
        let doc = r#"{"architecture": "vax", "os": "vms"}"#;
        validator()
            .validate(MEDIA_TYPE_IMAGE_CONFIG, doc.as_bytes())
            .unwrap();
    }

    #[test]
    fn descriptor_with_unsupported_algorithm_only_warns() {
        let doc = r#"{"mediaType": "application/octet-stream", "digest": "sha512:abcd", "size": 4}"#;
        validator()
            .validate(MEDIA_TYPE_DESCRIPTOR, doc.as_bytes())
            .unwrap();
    }

    #[test]
    fn descriptor_with_short_sha256_fails() {
        let doc = r#"{"mediaType": "application/octet-stream", "digest": "sha256:abcd", "size": 4}"#;
        let err = validator()
            .validate(MEDIA_TYPE_DESCRIPTOR, doc.as_bytes())
            .unwrap_err();
        assert!(matches!(err, SchemaError::FormatMismatch { .. }));
    }

    #[test]
    fn layout_header_requires_known_version() {
        validator()
            .validate(MEDIA_TYPE_LAYOUT_HEADER, br#"{"imageLayoutVersion": "1.0.0"}"#)
            .unwrap();
        assert!(validator()
            .validate(MEDIA_TYPE_LAYOUT_HEADER, br#"{"imageLayoutVersion": "2.0.0"}"#)
            .is_err());
    }

    #[test]
    fn manifest_list_validates() {
        let doc = r#"{
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f",
                "size": 7143,
                "platform": {"architecture": "ppc64le", "os": "linux"}
            }]
        }"#;
        validator()
            .validate(MEDIA_TYPE_IMAGE_MANIFEST_LIST, doc.as_bytes())
            .unwrap();
    }

    #[test]
    fn env_pattern() {
        assert!(valid_env("A=b"));
        assert!(valid_env("A="));
        assert!(!valid_env("=b"));
        assert!(!valid_env("A"));
    }
}
