//! Helpers for image layouts stored as a single tar archive.
//!
//! Entry names inside a layout archive are `./`-prefixed (`./blobs/sha256/<hex>`,
//! `./refs/<name>`, `./oci-layout`) and are compared byte-for-byte.

use crate::layout::{check_version_bytes, IMAGE_LAYOUT_VERSION};
use crate::{fsync_dir, io_at, CancelToken, StoreError};
use ocitool_schema::ImageLayoutVersion;
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::debug;

pub const LAYOUT_ENTRY: &str = "./oci-layout";
const NAME_FIELD_LEN: usize = 100;
const FILE_MODE: u32 = 0o666;
const DIR_MODE: u32 = 0o777;

/// Location of an entry's data within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub offset: u64,
    pub size: u64,
}

/// Scan the archive from the start for an entry named exactly `name`.
pub fn find_entry<R: Read + Seek>(
    reader: &mut R,
    name: &str,
    cancel: &CancelToken,
) -> Result<Option<EntryLocation>, StoreError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut archive = tar::Archive::new(&mut *reader);
    for entry in archive.entries()? {
        cancel.check()?;
        let entry = entry?;
        if *entry.path_bytes() == *name.as_bytes() {
            return Ok(Some(EntryLocation {
                offset: entry.raw_file_position(),
                size: entry.size(),
            }));
        }
    }
    Ok(None)
}

/// Reader over the data of a previously located entry.
pub fn open_entry<R: Read + Seek>(
    reader: &mut R,
    location: EntryLocation,
) -> Result<io::Take<&mut R>, StoreError> {
    reader.seek(SeekFrom::Start(location.offset))?;
    Ok(reader.take(location.size))
}

/// Names and types of every entry, in archive order.
pub fn entry_names<R: Read + Seek>(
    reader: &mut R,
    cancel: &CancelToken,
) -> Result<Vec<(String, EntryType)>, StoreError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut archive = tar::Archive::new(&mut *reader);
    let mut names = Vec::new();
    for entry in archive.entries()? {
        cancel.check()?;
        let entry = entry?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        names.push((name, entry.header().entry_type()));
    }
    Ok(names)
}

/// Require a `./oci-layout` entry declaring the supported version.
pub fn check_tar_version<R: Read + Seek>(
    reader: &mut R,
    cancel: &CancelToken,
) -> Result<(), StoreError> {
    let location = find_entry(reader, LAYOUT_ENTRY, cancel)?
        .ok_or_else(|| StoreError::LayoutMissing("tar archive".to_owned()))?;
    let mut content = Vec::new();
    open_entry(reader, location)?.read_to_end(&mut content)?;
    check_version_bytes(&content)
}

/// Create a new, empty layout archive. Fails if `path` already exists.
pub fn create_tar_layout(path: &Path) -> Result<(), StoreError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_at(path))?;
    let mtime = now();
    let mut builder = Builder::new(file);
    for name in ["./blobs/", "./refs/"] {
        let mut header = dir_header(mtime);
        append_named(&mut builder, &mut header, name, io::empty())?;
    }
    let version = serde_json::to_vec(&ImageLayoutVersion {
        version: IMAGE_LAYOUT_VERSION.to_owned(),
    })?;
    let mut header = file_header(version.len() as u64, mtime);
    append_named(&mut builder, &mut header, LAYOUT_ENTRY, version.as_slice())?;
    let file = builder.into_inner()?;
    file.sync_all()?;
    debug!("created layout archive {}", path.display());
    Ok(())
}

/// Rewrite the archive at `archive_path` with `data` stored under `name`,
/// replacing an entry of that name or appending it (preceded by any missing
/// parent directory entries). The new archive is built in a temporary file
/// beside the original and renamed over it; the returned handle refers to
/// the new archive.
pub fn rewrite_with_entry(
    archive_path: &Path,
    current: &mut File,
    name: &str,
    data: &[u8],
    cancel: &CancelToken,
) -> Result<File, StoreError> {
    let components: Vec<&str> = name.split('/').collect();
    if components.first() != Some(&".") || components.len() < 2 {
        return Err(StoreError::InvalidTarEntryName(name.to_owned()));
    }
    let mut missing_parents: Vec<String> = (2..components.len())
        .map(|i| components[..i].join("/"))
        .collect();

    let dir = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_at(dir))?;
    let mtime = now();
    let mut found = false;

    {
        let mut builder = Builder::new(tmp.as_file_mut());
        current.seek(SeekFrom::Start(0))?;
        let mut archive = tar::Archive::new(&mut *current);
        for entry in archive.entries()? {
            cancel.check()?;
            let mut entry = entry?;
            let entry_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let trimmed = entry_name.trim_end_matches('/');
            missing_parents.retain(|parent| parent != trimmed);

            if entry_name == name {
                found = true;
                let mut header = file_header(data.len() as u64, mtime);
                append_named(&mut builder, &mut header, name, data)?;
            } else {
                let mut header = entry.header().clone();
                header.set_size(entry.size());
                let link = entry.link_name_bytes().map(Cow::into_owned);
                if let Some(link) = link {
                    write_long_field(&mut builder, EntryType::GNULongLink, &link)?;
                    write_link_field(&mut header, &link[..link.len().min(NAME_FIELD_LEN)]);
                }
                append_named(&mut builder, &mut header, &entry_name, &mut entry)?;
            }
        }

        if !found {
            for parent in &missing_parents {
                let mut header = dir_header(mtime);
                append_named(&mut builder, &mut header, &format!("{parent}/"), io::empty())?;
            }
            let mut header = file_header(data.len() as u64, mtime);
            append_named(&mut builder, &mut header, name, data)?;
        }
        builder.finish()?;
    }

    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(archive_path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(io_at(tmp.path()))?;
    }
    let file = tmp
        .persist(archive_path)
        .map_err(|e| io_at(archive_path)(e.error))?;
    fsync_dir(dir)?;
    debug!(
        "{} {name} in {}",
        if found { "replaced" } else { "added" },
        archive_path.display()
    );
    Ok(file)
}

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

fn file_header(size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(FILE_MODE);
    header.set_size(size);
    header.set_mtime(mtime);
    header
}

fn dir_header(mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(DIR_MODE);
    header.set_size(0);
    header.set_mtime(mtime);
    header
}

/// Append an entry under `name` verbatim. `Builder::append_data` would strip
/// the leading `./`, so the name is written into the header directly, with a
/// GNU long-name record in front when it does not fit.
pub(crate) fn append_named<W: Write, D: Read>(
    builder: &mut Builder<W>,
    header: &mut Header,
    name: &str,
    data: D,
) -> io::Result<()> {
    let bytes = name.as_bytes();
    write_long_field(builder, EntryType::GNULongName, bytes)?;
    write_name_field(header, &bytes[..bytes.len().min(NAME_FIELD_LEN)]);
    if let Some(ustar) = header.as_ustar_mut() {
        ustar.prefix.fill(0);
    }
    header.set_cksum();
    builder.append(header, data)
}

/// Emit a GNU long-name or long-link record when `value` overflows the
/// 100-byte header field.
fn write_long_field<W: Write>(
    builder: &mut Builder<W>,
    kind: EntryType,
    value: &[u8],
) -> io::Result<()> {
    if value.len() <= NAME_FIELD_LEN {
        return Ok(());
    }
    let mut long = Header::new_gnu();
    write_name_field(&mut long, b"././@LongLink");
    long.set_entry_type(kind);
    long.set_mode(0o644);
    long.set_mtime(0);
    long.set_size(value.len() as u64 + 1);
    long.set_cksum();
    let mut payload = value.to_vec();
    payload.push(0);
    builder.append(&long, payload.as_slice())
}

fn write_link_field(header: &mut Header, link: &[u8]) {
    let field = &mut header.as_old_mut().linkname;
    field.fill(0);
    field[..link.len()].copy_from_slice(link);
}

fn write_name_field(header: &mut Header, name: &[u8]) {
    let field = &mut header.as_old_mut().name;
    field.fill(0);
    field[..name.len()].copy_from_slice(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_layout() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.tar");
        create_tar_layout(&path).unwrap();
        (dir, path)
    }

    fn names(path: &Path) -> Vec<String> {
        let mut file = File::open(path).unwrap();
        entry_names(&mut file, &CancelToken::new())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect()
    }

    #[test]
    fn created_layout_has_expected_entries() {
        let (_dir, path) = new_layout();
        assert_eq!(names(&path), vec!["./blobs/", "./refs/", "./oci-layout"]);
        let mut file = File::open(&path).unwrap();
        check_tar_version(&mut file, &CancelToken::new()).unwrap();
    }

    #[test]
    fn create_refuses_existing_file() {
        let (_dir, path) = new_layout();
        assert!(create_tar_layout(&path).is_err());
    }

    #[test]
    fn missing_version_entry_is_reported() {
        let mut empty = io::Cursor::new(Builder::new(Vec::new()).into_inner().unwrap());
        let err = check_tar_version(&mut empty, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, StoreError::LayoutMissing(_)));
    }

    #[test]
    fn rewrite_adds_parents_then_replaces_in_place() {
        let (_dir, path) = new_layout();
        let cancel = CancelToken::new();
        let mut file = File::open(&path).unwrap();
        let mut file =
            rewrite_with_entry(&path, &mut file, "./blobs/sha256/abc", b"one", &cancel).unwrap();
        assert_eq!(
            names(&path),
            vec!["./blobs/", "./refs/", "./oci-layout", "./blobs/sha256/", "./blobs/sha256/abc"]
        );

        let mut file =
            rewrite_with_entry(&path, &mut file, "./blobs/sha256/abc", b"two!", &cancel).unwrap();
        assert_eq!(names(&path).len(), 5);
        let location = find_entry(&mut file, "./blobs/sha256/abc", &cancel)
            .unwrap()
            .unwrap();
        let mut content = String::new();
        open_entry(&mut file, location)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "two!");
    }

    #[test]
    fn long_names_survive_rewrite() {
        let (_dir, path) = new_layout();
        let cancel = CancelToken::new();
        let long_name = format!("./refs/{}", "r".repeat(150));
        let mut file = File::open(&path).unwrap();
        let mut file = rewrite_with_entry(&path, &mut file, &long_name, b"{}", &cancel).unwrap();
        let file = rewrite_with_entry(&path, &mut file, "./refs/short", b"{}", &cancel).unwrap();
        drop(file);
        let all = names(&path);
        assert!(all.contains(&long_name));
        assert!(all.contains(&"./refs/short".to_owned()));
    }

    #[test]
    fn long_link_targets_survive_rewrite() {
        let (_dir, path) = new_layout();
        let target = format!("/{}", "t".repeat(180));
        {
            // Append a symlink with an overlong target behind the layout entries.
            let existing = fs::read(&path).unwrap();
            let mut archive = tar::Archive::new(existing.as_slice());
            let mut builder = Builder::new(Vec::new());
            for entry in archive.entries().unwrap() {
                let mut entry = entry.unwrap();
                let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                let mut header = entry.header().clone();
                append_named(&mut builder, &mut header, &name, &mut entry).unwrap();
            }
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            write_long_field(&mut builder, EntryType::GNULongLink, target.as_bytes()).unwrap();
            write_link_field(&mut header, &target.as_bytes()[..NAME_FIELD_LEN]);
            append_named(&mut builder, &mut header, "./link", io::empty()).unwrap();
            fs::write(&path, builder.into_inner().unwrap()).unwrap();
        }

        let cancel = CancelToken::new();
        let mut file = File::open(&path).unwrap();
        let file = rewrite_with_entry(&path, &mut file, "./refs/latest", b"{}", &cancel).unwrap();
        drop(file);

        let data = fs::read(&path).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let link = archive
            .entries()
            .unwrap()
            .map(Result::unwrap)
            .find(|e| e.path_bytes().as_ref() == b"./link")
            .unwrap();
        assert_eq!(link.link_name_bytes().unwrap().as_ref(), target.as_bytes());
    }

    #[test]
    fn rewrite_rejects_names_without_dot_prefix() {
        let (_dir, path) = new_layout();
        let mut file = File::open(&path).unwrap();
        let err = rewrite_with_entry(&path, &mut file, "blobs/x", b"", &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTarEntryName(_)));
    }
}
