use super::{json_pretty, open_image, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use ocitool_store::CancelToken;
use std::path::Path;

pub fn run(
    source: &Path,
    dest: &Path,
    kind: Option<&str>,
    reference: &str,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let mut image = open_image(source, kind, cancel)?;
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("unpacking {reference:?}...")))
    };

    let summary = match image.unpack(dest, reference) {
        Ok(summary) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("unpacked {reference:?}"));
            }
            summary
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "unpack failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&summary)?);
    } else {
        println!(
            "unpacked {} layer(s) of {} into {}",
            summary.layers,
            summary.manifest,
            dest.display()
        );
    }
    Ok(EXIT_SUCCESS)
}
