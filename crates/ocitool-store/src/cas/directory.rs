use super::{copy_digesting, parse_digest, CasEngine};
use crate::layout::ImageLayout;
use crate::{fsync_dir, io_at, CancelToken, StoreError};
use ocitool_schema::Digest;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// CAS over a directory layout. Writes go through a temporary file that is
/// renamed into place once its digest is known.
#[derive(Debug)]
pub struct DirCasEngine {
    layout: ImageLayout,
    closed: bool,
}

impl DirCasEngine {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let layout = ImageLayout::new(root);
        layout.verify_version()?;
        Ok(Self {
            layout,
            closed: false,
        })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl CasEngine for DirCasEngine {
    fn put(&mut self, cancel: &CancelToken, reader: &mut dyn Read) -> Result<Digest, StoreError> {
        self.ensure_open()?;
        let root = self.layout.root();
        let mut tmp = NamedTempFile::new_in(root).map_err(io_at(root))?;
        let (digest, size) = copy_digesting(cancel, reader, tmp.as_file_mut())?;

        let dest = self.layout.blob_path(&digest);
        if dest.exists() {
            debug!("blob {digest} already present");
            return Ok(digest);
        }

        let Some(parent) = dest.parent() else {
            return Err(StoreError::NotFound(dest.display().to_string()));
        };
        fs::create_dir_all(parent).map_err(io_at(parent))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| io_at(&dest)(e.error))?;
        fsync_dir(parent)?;
        debug!("stored blob {digest} ({size} bytes)");
        Ok(digest)
    }

    fn get<'a>(
        &'a mut self,
        cancel: &CancelToken,
        digest: &str,
    ) -> Result<Box<dyn Read + 'a>, StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        let parsed = parse_digest(digest)?;
        let path = self.layout.blob_path(&parsed);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(digest.to_owned()))
            }
            Err(e) => Err(io_at(path)(e)),
        }
    }

    fn delete(&mut self, cancel: &CancelToken, digest: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        let parsed = parse_digest(digest)?;
        let path = self.layout.blob_path(&parsed);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("deleted blob {digest}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(digest.to_owned()))
            }
            Err(e) => Err(io_at(path)(e)),
        }
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.closed = true;
        Ok(())
    }
}
