use super::{json_pretty, store_err, EXIT_SUCCESS};
use ocitool_schema::Descriptor;
use ocitool_store::{open_refs, CancelToken};
use std::io;
use std::path::Path;

pub fn get(path: &Path, name: &str, cancel: &CancelToken) -> Result<u8, String> {
    let mut refs = open_refs(path, cancel).map_err(|e| store_err(&e))?;
    let descriptor = refs.get(cancel, name).map_err(|e| store_err(&e))?;
    refs.close().map_err(|e| store_err(&e))?;
    println!("{}", json_pretty(&descriptor)?);
    Ok(EXIT_SUCCESS)
}

pub fn put(path: &Path, name: &str, cancel: &CancelToken) -> Result<u8, String> {
    let descriptor: Descriptor = serde_json::from_reader(io::stdin().lock())
        .map_err(|e| format!("unable to decode descriptor from stdin: {e}"))?;
    let mut refs = open_refs(path, cancel).map_err(|e| store_err(&e))?;
    refs.put(cancel, name, &descriptor).map_err(|e| store_err(&e))?;
    refs.close().map_err(|e| store_err(&e))?;
    Ok(EXIT_SUCCESS)
}

pub fn list(
    path: &Path,
    prefix: &str,
    size: i64,
    from: usize,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let mut refs = open_refs(path, cancel).map_err(|e| store_err(&e))?;
    let mut names = Vec::new();
    refs.list(cancel, prefix, size, from, &mut |name: &str| {
        names.push(name.to_owned());
        Ok(())
    })
    .map_err(|e| store_err(&e))?;
    refs.close().map_err(|e| store_err(&e))?;

    if json {
        println!("{}", json_pretty(&names)?);
    } else {
        for name in &names {
            println!("{name}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(path: &Path, name: &str, cancel: &CancelToken) -> Result<u8, String> {
    let mut refs = open_refs(path, cancel).map_err(|e| store_err(&e))?;
    refs.delete(cancel, name).map_err(|e| store_err(&e))?;
    refs.close().map_err(|e| store_err(&e))?;
    Ok(EXIT_SUCCESS)
}
