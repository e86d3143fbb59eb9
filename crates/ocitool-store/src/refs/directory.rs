use super::{paginate, validate_ref_name, ListCallback, RefEngine};
use crate::layout::ImageLayout;
use crate::{fsync_dir, io_at, CancelToken, StoreError};
use ocitool_schema::Descriptor;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Reference store over a directory layout: one JSON file per name in `refs/`.
#[derive(Debug)]
pub struct DirRefEngine {
    layout: ImageLayout,
    closed: bool,
}

impl DirRefEngine {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let layout = ImageLayout::new(root);
        layout.verify_version()?;
        Ok(Self {
            layout,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl RefEngine for DirRefEngine {
    fn put(
        &mut self,
        cancel: &CancelToken,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        validate_ref_name(name)?;
        let data = serde_json::to_vec(descriptor)?;
        let refs_dir = self.layout.refs_dir();
        fs::create_dir_all(&refs_dir).map_err(io_at(&refs_dir))?;

        let root = self.layout.root();
        let mut tmp = NamedTempFile::new_in(root).map_err(io_at(root))?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        let dest = self.layout.ref_path(name);
        tmp.persist(&dest).map_err(|e| io_at(&dest)(e.error))?;
        fsync_dir(&refs_dir)?;
        debug!("ref {name} -> {}", descriptor.digest);
        Ok(())
    }

    fn get(&mut self, cancel: &CancelToken, name: &str) -> Result<Descriptor, StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        validate_ref_name(name)?;
        let path = self.layout.ref_path(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("refs/{name}")));
            }
            Err(e) => return Err(io_at(path)(e)),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    fn list(
        &mut self,
        cancel: &CancelToken,
        prefix: &str,
        size: i64,
        from: usize,
        callback: &mut ListCallback<'_>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        let refs_dir = self.layout.refs_dir();
        let mut names = Vec::new();
        let entries = match fs::read_dir(&refs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_at(refs_dir)(e)),
        };
        for entry in entries {
            cancel.check()?;
            let entry = entry.map_err(io_at(&refs_dir))?;
            if entry.file_type().map_err(io_at(entry.path()))?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        paginate(names, cancel, prefix, size, from, callback)
    }

    fn delete(&mut self, cancel: &CancelToken, name: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        cancel.check()?;
        validate_ref_name(name)?;
        let path = self.layout.ref_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("refs/{name}")))
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

#[cfg(test)]
mod tests {
    use super::*;
    use ocitool_schema::media_type::MEDIA_TYPE_IMAGE_MANIFEST;
    use ocitool_schema::Digest;

    fn engine() -> (tempfile::TempDir, DirRefEngine) {
        let dir = tempfile::tempdir().unwrap();
        ImageLayout::new(dir.path()).initialize().unwrap();
        let engine = DirRefEngine::open(dir.path()).unwrap();
        (dir, engine)
    }

    fn desc() -> Descriptor {
        Descriptor::new(MEDIA_TYPE_IMAGE_MANIFEST, &Digest::of_bytes(b"m"), 1)
    }

    #[test]
    fn put_get_roundtrip() {
        let (dir, mut refs) = engine();
        let cancel = CancelToken::new();
        refs.put(&cancel, "latest", &desc()).unwrap();
        assert_eq!(refs.get(&cancel, "latest").unwrap(), desc());
        assert!(dir.path().join("refs/latest").is_file());
    }

    #[test]
    fn put_overwrites() {
        let (_dir, mut refs) = engine();
        let cancel = CancelToken::new();
        refs.put(&cancel, "latest", &desc()).unwrap();
        let mut other = desc();
        other.size = 99;
        refs.put(&cancel, "latest", &other).unwrap();
        assert_eq!(refs.get(&cancel, "latest").unwrap().size, 99);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, mut refs) = engine();
        assert!(matches!(
            refs.get(&CancelToken::new(), "nope"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_traversal_names() {
        let (_dir, mut refs) = engine();
        assert!(matches!(
            refs.put(&CancelToken::new(), "../escape", &desc()),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, mut refs) = engine();
        let cancel = CancelToken::new();
        for name in ["b", "c", "a"] {
            refs.put(&cancel, name, &desc()).unwrap();
        }
        let mut seen = Vec::new();
        refs.list(&cancel, "", -1, 0, &mut |n| {
            seen.push(n.to_owned());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_then_get_fails() {
        let (_dir, mut refs) = engine();
        let cancel = CancelToken::new();
        refs.put(&cancel, "old", &desc()).unwrap();
        refs.delete(&cancel, "old").unwrap();
        assert!(refs.get(&cancel, "old").is_err());
        assert!(matches!(
            refs.delete(&cancel, "old"),
            Err(StoreError::NotFound(_))
        ));
    }
}
