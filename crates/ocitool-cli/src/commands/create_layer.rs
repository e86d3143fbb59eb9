use super::{json_pretty, EXIT_SUCCESS};
use ocitool_core::create_layer;
use ocitool_core::diff::default_output;
use std::path::Path;

pub fn run(
    parent: Option<&Path>,
    child: &Path,
    output: Option<&Path>,
    gzip: bool,
    json: bool,
) -> Result<u8, String> {
    let output = output.map_or_else(|| default_output(child, gzip), Path::to_path_buf);
    let summary =
        create_layer(parent, child, &output, gzip).map_err(|e| format!("create layer failed: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "path": summary.path,
            "digest": summary.digest.to_string(),
            "size": summary.size,
            "entries": summary.entries,
            "whiteouts": summary.whiteouts,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "wrote {} ({} entries, {} whiteouts) {}",
            summary.path.display(),
            summary.entries,
            summary.whiteouts,
            summary.digest
        );
    }
    Ok(EXIT_SUCCESS)
}
