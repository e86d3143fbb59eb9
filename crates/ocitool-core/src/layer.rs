//! Layer extraction.
//!
//! A layer is a tar stream, optionally gzip-compressed, applied on top of
//! whatever already sits in the destination. Entries named `.wh.<name>`
//! delete `<name>` from the tree, `.wh..wh..opq` empties its directory.
//! Nothing is ever written outside the destination: entry names that climb
//! out are rejected, parent directories are resolved with symlinks confined
//! to the destination root, and existing non-directories are removed before
//! a new entry takes their place.

use crate::{io_at, CoreError, ResultExt};
use flate2::read::GzDecoder;
use ocitool_schema::LayerCompression;
use ocitool_store::{clean_path, escapes_root, CancelToken};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tar::EntryType;
use tracing::{debug, trace, warn};

pub const WHITEOUT_PREFIX: &str = ".wh.";
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

const MAX_SYMLINK_HOPS: usize = 40;
const STAGING_DIR_MODE: u32 = 0o755;

/// Directory metadata applied once every entry of the layer is written.
struct DirFixup {
    path: PathBuf,
    mode: u32,
    mtime: Option<u64>,
}

/// Apply one layer stream to `dest`.
pub fn unpack_layer(
    dest: &Path,
    reader: &mut dyn Read,
    compression: LayerCompression,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    match compression {
        LayerCompression::Gzip => unpack_tar(dest, GzDecoder::new(reader), cancel),
        LayerCompression::None => unpack_tar(dest, reader, cancel),
    }
}

fn unpack_tar<R: Read>(dest: &Path, reader: R, cancel: &CancelToken) -> Result<(), CoreError> {
    fs::create_dir_all(dest).map_err(io_at(dest))?;

    let mut archive = tar::Archive::new(reader);
    let mut seen: HashSet<String> = HashSet::new();
    let mut fixups: Vec<DirFixup> = Vec::new();

    for entry in archive.entries().context("error reading tar stream")? {
        cancel.check()?;
        let mut entry = entry.context("error advancing tar stream")?;
        let kind = entry.header().entry_type();
        if kind == EntryType::XGlobalHeader {
            debug!("global extended header ends the layer");
            break;
        }

        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let cleaned = clean_path(&raw);
        let rel = cleaned.trim_start_matches('/');
        if rel.is_empty() || rel == "." {
            continue;
        }
        if escapes_root(rel) {
            return Err(CoreError::UnsafePath(raw));
        }
        if !seen.insert(rel.to_owned()) {
            return Err(CoreError::DuplicateEntry(rel.to_owned()));
        }

        let (parent_rel, base) = split_parent(rel);

        if base == WHITEOUT_OPAQUE {
            if let Some(parent) = resolve_parent(dest, parent_rel, false)? {
                trace!("opaque whiteout clears {}", parent.display());
                clear_dir(&parent, parent_rel, &seen)?;
            }
            continue;
        }
        if let Some(hidden) = base.strip_prefix(WHITEOUT_PREFIX) {
            if hidden.is_empty() || hidden == "." || hidden == ".." {
                return Err(CoreError::UnsafePath(raw));
            }
            if seen.contains(&join_rel(parent_rel, hidden)) {
                trace!("whiteout of {parent_rel}/{hidden} ignored, entry is in this layer");
                continue;
            }
            if let Some(parent) = resolve_parent(dest, parent_rel, false)? {
                trace!("whiteout removes {}/{hidden}", parent_rel);
                remove_path(&parent.join(hidden))?;
            }
            continue;
        }

        let Some(parent) = resolve_parent(dest, parent_rel, true)? else {
            continue;
        };
        let target = parent.join(base);
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
        let mtime = entry.header().mtime().ok();

        match kind {
            EntryType::Directory => {
                match fs::symlink_metadata(&target) {
                    Ok(meta) if meta.is_dir() => {}
                    Ok(_) => {
                        remove_path(&target)?;
                        create_staging_dir(&target)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => create_staging_dir(&target)?,
                    Err(e) => return Err(io_at(&target)(e)),
                }
                fixups.push(DirFixup {
                    path: target,
                    mode,
                    mtime,
                });
            }
            EntryType::Regular | EntryType::Continuous => {
                remove_path(&target)?;
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(mode)
                    .open(&target)
                    .map_err(io_at(&target))?;
                io::copy(&mut entry, &mut file).map_err(io_at(&target))?;
                file.set_permissions(Permissions::from_mode(mode))
                    .map_err(io_at(&target))?;
                if let Some(mtime) = mtime {
                    file.set_modified(to_system_time(mtime))
                        .map_err(io_at(&target))?;
                }
            }
            EntryType::Link => {
                let link = link_name(&entry, "hardlink", rel)?;
                let link_clean = clean_path(&link);
                let link_rel = link_clean.trim_start_matches('/');
                if link_rel.is_empty() || link_rel == "." || escapes_root(link_rel) {
                    return Err(unsafe_link("hardlink", rel, &link));
                }
                let (source_parent, source_base) = split_parent(link_rel);
                let source = resolve_parent(dest, source_parent, false)?
                    .map(|p| p.join(source_base))
                    .ok_or_else(|| CoreError::NotFound(format!("{link_rel}: hardlink target")))?;
                remove_path(&target)?;
                fs::hard_link(&source, &target).map_err(io_at(&target))?;
            }
            EntryType::Symlink => {
                let link = link_name(&entry, "symlink", rel)?;
                if !link.starts_with('/') {
                    let joined = if parent_rel.is_empty() {
                        link.clone()
                    } else {
                        format!("{parent_rel}/{link}")
                    };
                    if escapes_root(&clean_path(&joined)) {
                        return Err(unsafe_link("symlink", rel, &link));
                    }
                }
                remove_path(&target)?;
                std::os::unix::fs::symlink(&link, &target).map_err(io_at(&target))?;
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                warn!("skipping special file {rel}");
            }
            other => {
                warn!("skipping {rel}: unsupported tar entry type {other:?}");
            }
        }
    }

    for fixup in fixups.iter().rev() {
        if let Some(mtime) = fixup.mtime {
            File::open(&fixup.path)
                .and_then(|dir| dir.set_modified(to_system_time(mtime)))
                .map_err(io_at(&fixup.path))?;
        }
        fs::set_permissions(&fixup.path, Permissions::from_mode(fixup.mode))
            .map_err(io_at(&fixup.path))?;
    }
    Ok(())
}

fn split_parent(rel: &str) -> (&str, &str) {
    rel.rsplit_once('/').unwrap_or(("", rel))
}

fn to_system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn unsafe_link(kind: &'static str, path: &str, target: &str) -> CoreError {
    CoreError::UnsafeLink {
        kind,
        path: path.to_owned(),
        target: target.to_owned(),
    }
}

fn link_name<R: Read>(
    entry: &tar::Entry<'_, R>,
    kind: &'static str,
    rel: &str,
) -> Result<String, CoreError> {
    entry
        .link_name_bytes()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| unsafe_link(kind, rel, ""))
}

fn create_staging_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir(path).map_err(io_at(path))?;
    fs::set_permissions(path, Permissions::from_mode(STAGING_DIR_MODE)).map_err(io_at(path))
}

/// Map a directory path relative to `root` onto the host, following symlinks
/// as if `root` were `/`. Absolute link targets restart at `root`; climbing
/// above `root` is an error. Missing components are created when `create`
/// is set, otherwise `None` is returned.
fn resolve_parent(root: &Path, rel: &str, create: bool) -> Result<Option<PathBuf>, CoreError> {
    let mut resolved: Vec<String> = Vec::new();
    let mut pending: VecDeque<String> = components(rel).collect();
    let mut hops = 0;

    while let Some(component) = pending.pop_front() {
        if component == ".." {
            if resolved.pop().is_none() {
                return Err(CoreError::UnsafePath(rel.to_owned()));
            }
            continue;
        }

        let mut candidate = root.to_path_buf();
        candidate.extend(&resolved);
        candidate.push(&component);

        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(CoreError::UnsafePath(rel.to_owned()));
                }
                let target = fs::read_link(&candidate).map_err(io_at(&candidate))?;
                let target = target.to_string_lossy();
                if target.starts_with('/') {
                    resolved.clear();
                }
                let mut expanded: VecDeque<String> = components(&target).collect();
                expanded.extend(pending);
                pending = expanded;
            }
            Ok(meta) if meta.is_dir() => resolved.push(component),
            Ok(_) => {
                return Err(io_at(&candidate)(io::Error::other("not a directory")));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !create {
                    return Ok(None);
                }
                create_staging_dir(&candidate)?;
                resolved.push(component);
            }
            Err(e) => return Err(io_at(&candidate)(e)),
        }
    }

    let mut path = root.to_path_buf();
    path.extend(&resolved);
    Ok(Some(path))
}

fn components(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_owned)
}

/// Remove whatever is at `path`, if anything. Symlinks are removed, not followed.
fn remove_path(path: &Path) -> Result<(), CoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(io_at(path)),
        Ok(_) => fs::remove_file(path).map_err(io_at(path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_at(path)(e)),
    }
}

/// Remove the contents of `dir` that came from lower layers. Entries named in
/// `seen` belong to the layer being applied and survive.
fn clear_dir(dir: &Path, rel: &str, seen: &HashSet<String>) -> Result<(), CoreError> {
    for child in fs::read_dir(dir).map_err(io_at(dir))? {
        let child = child.map_err(io_at(dir))?;
        let child_rel = join_rel(rel, &child.file_name().to_string_lossy());
        if !seen.contains(&child_rel) {
            remove_path(&child.path())?;
            continue;
        }
        let is_dir = child
            .file_type()
            .map_err(io_at(child.path()))?
            .is_dir();
        if is_dir {
            clear_dir(&child.path(), &child_rel, seen)?;
        }
    }
    Ok(())
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}
