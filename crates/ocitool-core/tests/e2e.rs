//! End-to-end scenarios over both image backings.

use flate2::write::GzEncoder;
use flate2::Compression;
use ocitool_core::image::host_platform;
use ocitool_core::{create_layer, CoreError, Image};
use ocitool_schema::media_type::{
    MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_LAYER, MEDIA_TYPE_IMAGE_LAYER_GZIP,
    MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_IMAGE_MANIFEST_LIST,
};
use ocitool_schema::{Descriptor, Manifest, ManifestDescriptor, ManifestList, Platform};
use ocitool_store::{create_tar_layout, open_cas, open_refs, put_json, CancelToken, ImageLayout};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

enum Backing {
    Directory,
    Tar,
}

fn new_source(dir: &Path, backing: &Backing) -> PathBuf {
    match backing {
        Backing::Directory => {
            let root = dir.join("layout");
            ImageLayout::new(&root).initialize().unwrap();
            root
        }
        Backing::Tar => {
            let path = dir.join("image.tar");
            create_tar_layout(&path).unwrap();
            path
        }
    }
}

fn layer_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(data).unwrap();
    gz.finish().unwrap()
}

fn config_doc() -> serde_json::Value {
    let (_, arch) = host_platform();
    serde_json::json!({
        "architecture": arch,
        "os": "linux",
        "config": { "Cmd": ["/bin/sh"], "Env": ["PATH=/bin"] },
        "rootfs": { "type": "layers", "diff_ids": [] }
    })
}

/// Store layers, config, and manifest; point `reference` at the manifest.
fn write_image(source: &Path, reference: &str, layers: &[(&str, Vec<u8>)]) -> Descriptor {
    let cancel = CancelToken::new();
    let manifest_desc = {
        let mut cas = open_cas(source, &cancel).unwrap();
        let mut layer_descs = Vec::new();
        for (media_type, blob) in layers {
            let digest = cas.put(&cancel, &mut blob.as_slice()).unwrap();
            layer_descs.push(Descriptor::new(*media_type, &digest, blob.len() as i64));
        }
        let config = put_json(cas.as_mut(), &cancel, MEDIA_TYPE_IMAGE_CONFIG, &config_doc()).unwrap();
        let manifest = Manifest {
            schema_version: 2,
            media_type: None,
            config,
            layers: layer_descs,
            annotations: None,
        };
        let desc = put_json(cas.as_mut(), &cancel, MEDIA_TYPE_IMAGE_MANIFEST, &manifest).unwrap();
        cas.close().unwrap();
        desc
    };
    let mut refs = open_refs(source, &cancel).unwrap();
    refs.put(&cancel, reference, &manifest_desc).unwrap();
    refs.close().unwrap();
    manifest_desc
}

fn test_layer() -> (&'static str, Vec<u8>) {
    (MEDIA_TYPE_IMAGE_LAYER_GZIP, gzip(&layer_tar(&[("test", b"test")])))
}

#[test]
fn validate_and_unpack_on_every_backing() {
    for backing in [Backing::Directory, Backing::Tar] {
        let dir = tempfile::tempdir().unwrap();
        let source = new_source(dir.path(), &backing);
        write_image(&source, "latest", &[test_layer()]);

        let mut image = Image::open(&source, CancelToken::new()).unwrap();
        let results = image.validate(&["latest".to_owned()]).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok(), "{:?}", results[0].1);

        let dest = dir.path().join("out");
        let summary = image.unpack(&dest, "latest").unwrap();
        assert_eq!(summary.layers, 1);
        assert_eq!(fs::read(dest.join("test")).unwrap(), b"test");
    }
}

#[test]
fn uncompressed_layers_unpack() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    write_image(&source, "plain", &[(MEDIA_TYPE_IMAGE_LAYER, layer_tar(&[("a", b"plain")]))]);
    let dest = dir.path().join("out");
    Image::open(&source, CancelToken::new())
        .unwrap()
        .unpack(&dest, "plain")
        .unwrap();
    assert_eq!(fs::read(dest.join("a")).unwrap(), b"plain");
}

#[test]
fn unknown_layer_media_types_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    write_image(
        &source,
        "mixed",
        &[
            ("application/vnd.example.blob", b"opaque".to_vec()),
            test_layer(),
        ],
    );
    let dest = dir.path().join("out");
    let summary = Image::open(&source, CancelToken::new())
        .unwrap()
        .unpack(&dest, "mixed")
        .unwrap();
    assert_eq!(summary.layers, 1);
}

#[test]
fn tampered_layer_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    let (media_type, blob) = test_layer();
    write_image(&source, "latest", &[(media_type, blob.clone())]);

    let digest = ocitool_schema::Digest::of_bytes(&blob);
    let blob_path = source.join("blobs/sha256").join(digest.encoded());
    let mut tampered = blob;
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;
    fs::write(&blob_path, tampered).unwrap();

    let mut image = Image::open(&source, CancelToken::new()).unwrap();
    let results = image.validate(&["latest".to_owned()]).unwrap();
    let err = results[0].1.as_ref().unwrap_err();
    assert!(matches!(err.root_cause(), CoreError::DigestMismatch { .. }));
    assert!(err.to_string().contains("layer 0 validation failed"));
}

#[test]
fn manifest_without_layers_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    write_image(&source, "empty", &[]);
    let mut image = Image::open(&source, CancelToken::new()).unwrap();
    let err = image.unpack(&dir.path().join("out"), "empty").unwrap_err();
    assert!(matches!(err.root_cause(), CoreError::MalformedManifest { .. }));
}

#[test]
fn missing_reference_is_not_found() {
    for backing in [Backing::Directory, Backing::Tar] {
        let dir = tempfile::tempdir().unwrap();
        let source = new_source(dir.path(), &backing);
        write_image(&source, "latest", &[test_layer()]);
        let mut image = Image::open(&source, CancelToken::new()).unwrap();
        let results = image
            .validate(&["latest".to_owned(), "v1.0".to_owned()])
            .unwrap();
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1.as_ref().unwrap_err().root_cause(),
            CoreError::NotFound(_)
        ));
    }
}

#[test]
fn traversal_layer_aborts_unpack() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    let name = b"../../etc/passwd";
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_mode(0o644);
    header.set_size(4);
    header.set_cksum();
    builder.append(&header, &b"root"[..]).unwrap();
    let evil = builder.into_inner().unwrap();
    write_image(&source, "evil", &[(MEDIA_TYPE_IMAGE_LAYER, evil)]);

    let dest = dir.path().join("a/b");
    let err = Image::open(&source, CancelToken::new())
        .unwrap()
        .unpack(&dest, "evil")
        .unwrap_err();
    assert!(matches!(err.root_cause(), CoreError::UnsafePath(_)));
    assert!(!dir.path().join("etc").exists());
}

#[test]
fn later_layer_whiteout_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Tar);
    write_image(
        &source,
        "latest",
        &[
            (MEDIA_TYPE_IMAGE_LAYER, layer_tar(&[("foo/bar", b"x"), ("foo/keep", b"y")])),
            (MEDIA_TYPE_IMAGE_LAYER, layer_tar(&[("foo/.wh.bar", b"")])),
        ],
    );
    let dest = dir.path().join("out");
    Image::open(&source, CancelToken::new())
        .unwrap()
        .unpack(&dest, "latest")
        .unwrap();
    assert!(!dest.join("foo/bar").exists());
    assert!(!dest.join("foo/.wh.bar").exists());
    assert!(dest.join("foo/keep").exists());
}

#[test]
fn runtime_bundle_on_every_backing() {
    for backing in [Backing::Directory, Backing::Tar] {
        let dir = tempfile::tempdir().unwrap();
        let source = new_source(dir.path(), &backing);
        write_image(&source, "v1.0", &[test_layer()]);

        let bundle = dir.path().join("bundle");
        let summary = Image::open(&source, CancelToken::new())
            .unwrap()
            .create_runtime_bundle(&bundle, "v1.0", "rootfs")
            .unwrap();
        assert_eq!(summary.rootfs, bundle.join("rootfs"));
        assert_eq!(fs::read(bundle.join("rootfs/test")).unwrap(), b"test");

        let spec: serde_json::Value =
            serde_json::from_slice(&fs::read(bundle.join("config.json")).unwrap()).unwrap();
        assert_eq!(spec["ociVersion"], "1.0.2");
        assert_eq!(spec["root"]["path"], "rootfs");
        assert_eq!(spec["process"]["args"][0], "/bin/sh");
        assert_eq!(spec["process"]["env"][0], "PATH=/bin");
    }
}

#[test]
fn manifest_list_resolves_host_platform() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    let manifest = write_image(&source, "single", &[test_layer()]);

    let (os, arch) = host_platform();
    let list = ManifestList {
        schema_version: 2,
        media_type: None,
        manifests: vec![ManifestDescriptor {
            descriptor: manifest,
            platform: Some(Platform {
                architecture: arch.to_owned(),
                os: os.to_owned(),
                ..Platform::default()
            }),
        }],
        annotations: None,
    };
    let cancel = CancelToken::new();
    let list_desc = {
        let mut cas = open_cas(&source, &cancel).unwrap();
        put_json(cas.as_mut(), &cancel, MEDIA_TYPE_IMAGE_MANIFEST_LIST, &list).unwrap()
    };
    open_refs(&source, &cancel)
        .unwrap()
        .put(&cancel, "multi", &list_desc)
        .unwrap();

    let mut image = Image::open(&source, CancelToken::new()).unwrap();
    let results = image.validate(&["multi".to_owned()]).unwrap();
    assert!(results[0].1.is_ok(), "{:?}", results[0].1);
    let dest = dir.path().join("out");
    image.unpack(&dest, "multi").unwrap();
    assert!(dest.join("test").exists());
}

#[test]
fn unsupported_layout_version_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Directory);
    write_image(&source, "latest", &[test_layer()]);
    fs::write(source.join("oci-layout"), br#"{"imageLayoutVersion":"2.0.0"}"#).unwrap();
    let mut image = Image::open(&source, CancelToken::new()).unwrap();
    assert!(image.validate(&["latest".to_owned()]).is_err());
}

#[test]
fn pre_cancelled_validation_stops() {
    let dir = tempfile::tempdir().unwrap();
    let source = new_source(dir.path(), &Backing::Tar);
    write_image(&source, "latest", &[test_layer()]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = Image::open(&source, cancel)
        .unwrap()
        .validate(&["latest".to_owned()])
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn created_layer_unpacks_to_same_tree() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("etc")).unwrap();
    fs::write(tree.join("etc/motd"), b"hello").unwrap();
    let out = dir.path().join("layer.tar.gz");
    let summary = create_layer(None, &tree, &out, true).unwrap();

    let source = new_source(dir.path(), &Backing::Directory);
    let blob = fs::read(&out).unwrap();
    assert_eq!(summary.size, blob.len() as u64);
    write_image(&source, "built", &[(MEDIA_TYPE_IMAGE_LAYER_GZIP, blob)]);

    let dest = dir.path().join("out");
    Image::open(&source, CancelToken::new())
        .unwrap()
        .unpack(&dest, "built")
        .unwrap();
    assert_eq!(fs::read(dest.join("etc/motd")).unwrap(), b"hello");
}
