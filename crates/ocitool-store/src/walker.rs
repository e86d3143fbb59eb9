//! Uniform traversal over a directory tree or a tar archive.
//!
//! A walk visits every entry once, handing the visitor the cleaned relative
//! path, the entry kind, and a reader over its content (empty for anything
//! that is not a regular file). The visitor decides whether the walk goes on
//! by returning [`WalkControl`]; errors it returns abort the walk unchanged.

use crate::paths::clean_path;
use crate::{io_at, CancelToken, StoreError};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    Other,
}

/// Metadata for one visited entry.
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry<'a> {
    /// Cleaned path relative to the layout root; the root itself is `"."`.
    pub path: &'a str,
    pub kind: EntryKind,
    pub size: u64,
}

impl WalkEntry<'_> {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every entry was visited.
    Exhausted,
    /// The visitor asked to stop early.
    Stopped,
}

impl WalkOutcome {
    #[inline]
    pub fn stopped(self) -> bool {
        self == Self::Stopped
    }
}

pub trait Walker {
    /// Visit every entry in backing order. Each call starts from the
    /// beginning, so repeated walks over one store do not interfere.
    fn walk<F, E>(&mut self, visit: F) -> Result<WalkOutcome, E>
    where
        F: FnMut(&WalkEntry<'_>, &mut dyn Read) -> Result<WalkControl, E>,
        E: From<StoreError>;
}

/// Walks a directory tree in lexical order. Symlinks are reported, not followed.
#[derive(Debug, Clone)]
pub struct PathWalker {
    root: PathBuf,
    cancel: CancelToken,
}

impl PathWalker {
    pub fn new(root: impl Into<PathBuf>, cancel: CancelToken) -> Self {
        Self {
            root: root.into(),
            cancel,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk_dir<F, E>(&self, dir: &Path, rel: &str, visit: &mut F) -> Result<WalkControl, E>
    where
        F: FnMut(&WalkEntry<'_>, &mut dyn Read) -> Result<WalkControl, E>,
        E: From<StoreError>,
    {
        let mut children: Vec<_> = fs::read_dir(dir)
            .map_err(io_at(dir))?
            .collect::<Result<_, _>>()
            .map_err(io_at(dir))?;
        children.sort_by_key(fs::DirEntry::file_name);

        for child in children {
            self.cancel.check()?;
            let path = child.path();
            let name = child.file_name();
            let child_rel = if rel == "." {
                name.to_string_lossy().into_owned()
            } else {
                format!("{rel}/{}", name.to_string_lossy())
            };
            let meta = fs::symlink_metadata(&path).map_err(io_at(&path))?;
            let file_type = meta.file_type();

            if file_type.is_dir() {
                let entry = WalkEntry {
                    path: &child_rel,
                    kind: EntryKind::Directory,
                    size: 0,
                };
                if visit(&entry, &mut io::empty())? == WalkControl::Stop {
                    return Ok(WalkControl::Stop);
                }
                if self.walk_dir(&path, &child_rel, visit)? == WalkControl::Stop {
                    return Ok(WalkControl::Stop);
                }
                continue;
            }

            // Symlinks to regular files are read through, so a blob may be a link.
            let file_meta = if file_type.is_symlink() {
                fs::metadata(&path).ok().filter(fs::Metadata::is_file)
            } else if file_type.is_file() {
                Some(meta)
            } else {
                None
            };

            let control = if let Some(file_meta) = file_meta {
                let mut file = File::open(&path).map_err(io_at(&path))?;
                let entry = WalkEntry {
                    path: &child_rel,
                    kind: EntryKind::File,
                    size: file_meta.len(),
                };
                visit(&entry, &mut file)?
            } else {
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else {
                    EntryKind::Other
                };
                let entry = WalkEntry {
                    path: &child_rel,
                    kind,
                    size: 0,
                };
                visit(&entry, &mut io::empty())?
            };
            if control == WalkControl::Stop {
                return Ok(WalkControl::Stop);
            }
        }
        Ok(WalkControl::Continue)
    }
}

impl Walker for PathWalker {
    fn walk<F, E>(&mut self, mut visit: F) -> Result<WalkOutcome, E>
    where
        F: FnMut(&WalkEntry<'_>, &mut dyn Read) -> Result<WalkControl, E>,
        E: From<StoreError>,
    {
        self.cancel.check()?;
        trace!("walking directory {}", self.root.display());
        let root = WalkEntry {
            path: ".",
            kind: EntryKind::Directory,
            size: 0,
        };
        if visit(&root, &mut io::empty())? == WalkControl::Stop {
            return Ok(WalkOutcome::Stopped);
        }
        let root_dir = self.root.clone();
        match self.walk_dir(&root_dir, ".", &mut visit)? {
            WalkControl::Stop => Ok(WalkOutcome::Stopped),
            WalkControl::Continue => Ok(WalkOutcome::Exhausted),
        }
    }
}

/// Walks the entries of a tar archive in archive order.
///
/// Global PAX headers carry no content and are skipped.
#[derive(Debug)]
pub struct TarWalker<R> {
    reader: R,
    cancel: CancelToken,
}

impl<R: Read + Seek> TarWalker<R> {
    pub fn new(reader: R, cancel: CancelToken) -> Self {
        Self { reader, cancel }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> Walker for TarWalker<R> {
    fn walk<F, E>(&mut self, mut visit: F) -> Result<WalkOutcome, E>
    where
        F: FnMut(&WalkEntry<'_>, &mut dyn Read) -> Result<WalkControl, E>,
        E: From<StoreError>,
    {
        self.cancel.check()?;
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::Io(io::Error::new(e.kind(), format!("unable to reset: {e}"))))?;

        let mut archive = tar::Archive::new(&mut self.reader);
        let entries = archive.entries().map_err(StoreError::Io)?;
        for entry in entries {
            self.cancel.check()?;
            let mut entry = entry.map_err(|e| {
                StoreError::Io(io::Error::new(
                    e.kind(),
                    format!("error advancing tar stream: {e}"),
                ))
            })?;
            let header_type = entry.header().entry_type();
            if header_type == tar::EntryType::XGlobalHeader {
                continue;
            }
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let path = clean_path(&name);
            let kind = match header_type {
                tar::EntryType::Directory => EntryKind::Directory,
                tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
                tar::EntryType::Symlink => EntryKind::Symlink,
                _ => EntryKind::Other,
            };
            let walk_entry = WalkEntry {
                path: &path,
                kind,
                size: entry.size(),
            };
            if visit(&walk_entry, &mut entry)? == WalkControl::Stop {
                return Ok(WalkOutcome::Stopped);
            }
        }
        Ok(WalkOutcome::Exhausted)
    }
}

/// Either backing, chosen at runtime.
#[derive(Debug)]
pub enum SourceWalker {
    Directory(PathWalker),
    Tar(TarWalker<File>),
}

impl SourceWalker {
    pub fn directory(root: impl Into<PathBuf>, cancel: CancelToken) -> Self {
        Self::Directory(PathWalker::new(root, cancel))
    }

    pub fn tar(path: &Path, cancel: CancelToken) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(io_at(path))?;
        Ok(Self::Tar(TarWalker::new(file, cancel)))
    }

    /// Directory walker for directories, tar walker for anything else.
    pub fn open(path: &Path, cancel: CancelToken) -> Result<Self, StoreError> {
        let meta = fs::metadata(path).map_err(io_at(path))?;
        if meta.is_dir() {
            Ok(Self::directory(path, cancel))
        } else {
            Self::tar(path, cancel)
        }
    }
}

impl Walker for SourceWalker {
    fn walk<F, E>(&mut self, visit: F) -> Result<WalkOutcome, E>
    where
        F: FnMut(&WalkEntry<'_>, &mut dyn Read) -> Result<WalkControl, E>,
        E: From<StoreError>,
    {
        match self {
            Self::Directory(w) => w.walk(visit),
            Self::Tar(w) => w.walk(visit),
        }
    }
}
