//! Named references to descriptors, stored as JSON under `refs/<name>`.

mod archive;
mod directory;

pub use archive::TarRefEngine;
pub use directory::DirRefEngine;

use crate::{io_at, CancelToken, StoreError};
use ocitool_schema::Descriptor;
use std::path::Path;

/// Receives one reference name per call during [`RefEngine::list`].
pub type ListCallback<'a> = dyn FnMut(&str) -> Result<(), StoreError> + 'a;

pub trait RefEngine {
    fn put(
        &mut self,
        cancel: &CancelToken,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<(), StoreError>;

    fn get(&mut self, cancel: &CancelToken, name: &str) -> Result<Descriptor, StoreError>;

    /// Call `callback` for stored names in lexical order. Names not starting
    /// with `prefix` are ignored, the first `from` matches are skipped, and at
    /// most `size` are reported (`size < 0` means no limit). A callback error
    /// stops the listing and is returned.
    fn list(
        &mut self,
        cancel: &CancelToken,
        prefix: &str,
        size: i64,
        from: usize,
        callback: &mut ListCallback<'_>,
    ) -> Result<(), StoreError>;

    fn delete(&mut self, cancel: &CancelToken, name: &str) -> Result<(), StoreError> {
        let _ = (cancel, name);
        Err(StoreError::Unimplemented("reference deletion"))
    }

    fn close(&mut self) -> Result<(), StoreError>;
}

/// Reference names are single path components.
pub fn validate_ref_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == '\0')
    {
        return Err(StoreError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Open the reference store of the layout at `path`.
pub fn open_refs(path: &Path, cancel: &CancelToken) -> Result<Box<dyn RefEngine>, StoreError> {
    let meta = std::fs::metadata(path).map_err(io_at(path))?;
    if meta.is_dir() {
        Ok(Box::new(DirRefEngine::open(path)?))
    } else {
        Ok(Box::new(TarRefEngine::open(path, cancel)?))
    }
}

pub(crate) fn paginate(
    mut names: Vec<String>,
    cancel: &CancelToken,
    prefix: &str,
    size: i64,
    from: usize,
    callback: &mut ListCallback<'_>,
) -> Result<(), StoreError> {
    names.sort();
    let limit = if size < 0 {
        usize::MAX
    } else {
        usize::try_from(size).unwrap_or(usize::MAX)
    };
    for name in names
        .iter()
        .filter(|n| n.starts_with(prefix))
        .skip(from)
        .take(limit)
    {
        cancel.check()?;
        callback(name)?;
    }
    Ok(())
}
