use super::{json_pretty, store_err, EXIT_SUCCESS};
use ocitool_store::{open_cas, CancelToken};
use std::io::{self, Write};
use std::path::Path;

pub fn get(path: &Path, digest: &str, cancel: &CancelToken) -> Result<u8, String> {
    let mut cas = open_cas(path, cancel).map_err(|e| store_err(&e))?;
    {
        let mut reader = cas.get(cancel, digest).map_err(|e| store_err(&e))?;
        let mut stdout = io::stdout().lock();
        io::copy(&mut reader, &mut stdout).map_err(|e| format!("write failed: {e}"))?;
        stdout.flush().map_err(|e| format!("write failed: {e}"))?;
    }
    cas.close().map_err(|e| store_err(&e))?;
    Ok(EXIT_SUCCESS)
}

pub fn put(path: &Path, cancel: &CancelToken, json: bool) -> Result<u8, String> {
    let mut cas = open_cas(path, cancel).map_err(|e| store_err(&e))?;
    let mut stdin = io::stdin().lock();
    let digest = cas.put(cancel, &mut stdin).map_err(|e| store_err(&e))?;
    cas.close().map_err(|e| store_err(&e))?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "digest": digest.to_string() }))?);
    } else {
        println!("{digest}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn delete(path: &Path, digest: &str, cancel: &CancelToken) -> Result<u8, String> {
    let mut cas = open_cas(path, cancel).map_err(|e| store_err(&e))?;
    cas.delete(cancel, digest).map_err(|e| store_err(&e))?;
    cas.close().map_err(|e| store_err(&e))?;
    Ok(EXIT_SUCCESS)
}
