use super::{copy_digesting, parse_digest, CasEngine};
use crate::tarfile::{check_tar_version, find_entry, open_entry, rewrite_with_entry};
use crate::{io_at, CancelToken, StoreError};
use ocitool_schema::Digest;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// CAS inside a layout tar archive. Lookups scan the archive linearly;
/// writes rebuild it beside the original and rename it into place.
#[derive(Debug)]
pub struct TarCasEngine {
    path: PathBuf,
    file: Option<File>,
}

impl TarCasEngine {
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

fn entry_name(digest: &Digest) -> String {
    format!("./blobs/{}/{}", digest.algorithm(), digest.encoded())
}

impl CasEngine for TarCasEngine {
    fn put(&mut self, cancel: &CancelToken, reader: &mut dyn Read) -> Result<Digest, StoreError> {
        let mut data = Vec::new();
        let (digest, _) = copy_digesting(cancel, reader, &mut data)?;
        let name = entry_name(&digest);

        let path = self.path.clone();
        let file = self.file()?;
        if find_entry(file, &name, cancel)?.is_some() {
            debug!("blob {digest} already present");
            return Ok(digest);
        }
        let rewritten = rewrite_with_entry(&path, file, &name, &data, cancel)?;
        self.file = Some(rewritten);
        Ok(digest)
    }

    fn get<'a>(
        &'a mut self,
        cancel: &CancelToken,
        digest: &str,
    ) -> Result<Box<dyn Read + 'a>, StoreError> {
        let parsed = parse_digest(digest)?;
        let name = entry_name(&parsed);
        let file = self.file()?;
        let location =
            find_entry(file, &name, cancel)?.ok_or_else(|| StoreError::NotFound(digest.to_owned()))?;
        Ok(Box::new(open_entry(file, location)?))
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.file.take().map(drop).ok_or(StoreError::Closed)
    }
}
