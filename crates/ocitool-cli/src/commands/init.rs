use super::{json_pretty, store_err, EXIT_SUCCESS};
use ocitool_store::{create_tar_layout, ImageLayout};
use std::path::Path;

pub fn run(path: &Path, directory: bool, json: bool) -> Result<u8, String> {
    if directory {
        ImageLayout::new(path).initialize().map_err(|e| store_err(&e))?;
    } else {
        create_tar_layout(path).map_err(|e| store_err(&e))?;
    }
    let kind = if directory { "directory" } else { "tar" };
    if json {
        let payload = serde_json::json!({ "path": path, "layout": kind });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("initialised {kind} image layout at {}", path.display());
    }
    Ok(EXIT_SUCCESS)
}
