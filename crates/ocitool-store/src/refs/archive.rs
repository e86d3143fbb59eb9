use super::{paginate, validate_ref_name, ListCallback, RefEngine};
use crate::tarfile::{check_tar_version, entry_names, find_entry, open_entry, rewrite_with_entry};
use crate::{io_at, CancelToken, StoreError};
use ocitool_schema::Descriptor;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const REFS_PREFIX: &str = "./refs/";

/// Reference store inside a layout tar archive.
#[derive(Debug)]
pub struct TarRefEngine {
    path: PathBuf,
    file: Option<File>,
}

impl TarRefEngine {
    pub fn open(path: &Path, cancel: &CancelToken) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_at(path))?;
        check_tar_version(&mut file, cancel)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn file(&mut self) -> Result<&mut File, StoreError> {
        self.file.as_mut().ok_or(StoreError::Closed)
    }
}

impl RefEngine for TarRefEngine {
    fn put(
        &mut self,
        cancel: &CancelToken,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<(), StoreError> {
        validate_ref_name(name)?;
        let data = serde_json::to_vec(descriptor)?;
        let path = self.path.clone();
        let file = self.file()?;
        let rewritten = rewrite_with_entry(&path, file, &format!("{REFS_PREFIX}{name}"), &data, cancel)?;
        self.file = Some(rewritten);
        debug!("ref {name} -> {}", descriptor.digest);
        Ok(())
    }

    fn get(&mut self, cancel: &CancelToken, name: &str) -> Result<Descriptor, StoreError> {
        validate_ref_name(name)?;
        let file = self.file()?;
        let location = find_entry(file, &format!("{REFS_PREFIX}{name}"), cancel)?
            .ok_or_else(|| StoreError::NotFound(format!("refs/{name}")))?;
        Ok(serde_json::from_reader(open_entry(file, location)?)?)
    }

    fn list(
        &mut self,
        cancel: &CancelToken,
        prefix: &str,
        size: i64,
        from: usize,
        callback: &mut ListCallback<'_>,
    ) -> Result<(), StoreError> {
        let file = self.file()?;
        cancel.check()?;
        let names = entry_names(file, cancel)?
            .into_iter()
            .filter(|(_, kind)| !kind.is_dir())
            .filter_map(|(name, _)| name.strip_prefix(REFS_PREFIX).map(str::to_owned))
            .filter(|name| !name.is_empty())
            .collect();
        paginate(names, cancel, prefix, size, from, callback)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.file.take().map(drop).ok_or(StoreError::Closed)
    }
}
