use super::{json_pretty, open_image, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use ocitool_core::image::RUNTIME_CONFIG_FILE;
use ocitool_store::CancelToken;
use std::path::Path;

pub fn run(
    source: &Path,
    dest: &Path,
    kind: Option<&str>,
    reference: &str,
    rootfs: &str,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let mut image = open_image(source, kind, cancel)?;
    let pb = if json {
        None
    } else {
        Some(spinner("creating runtime bundle..."))
    };

    let summary = match image.create_runtime_bundle(dest, reference, rootfs) {
        Ok(summary) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "runtime bundle created");
            }
            summary
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "bundle creation failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        let payload = serde_json::json!({
            "reference": summary.reference,
            "manifest": summary.manifest,
            "layers": summary.layers,
            "rootfs": summary.rootfs,
            "config": dest.join(RUNTIME_CONFIG_FILE),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "bundle {}: {} layer(s) in {}, runtime config in {}",
            dest.display(),
            summary.layers,
            summary.rootfs.display(),
            dest.join(RUNTIME_CONFIG_FILE).display()
        );
    }
    Ok(EXIT_SUCCESS)
}
