//! Layer creation from a directory tree, or from the changes between two.

use crate::layer::WHITEOUT_PREFIX;
use crate::{io_at, CoreError};
use flate2::write::GzEncoder;
use flate2::Compression;
use ocitool_schema::{Digest, Digester};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const WHITEOUT_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Directory,
    File,
    Symlink,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: u32,
    size: u64,
    full: PathBuf,
    link: Option<PathBuf>,
}

/// What a finished `create_layer` wrote.
#[derive(Debug, Clone)]
pub struct LayerSummary {
    pub path: PathBuf,
    pub entries: usize,
    pub whiteouts: usize,
    pub digest: Digest,
    pub size: u64,
}

/// Default archive name for a layer built from `child`: `<child>.tar`, or
/// `<child>.tar.gz` when compressed.
pub fn default_output(child: &Path, gzip: bool) -> PathBuf {
    let mut name = child.components().collect::<PathBuf>().into_os_string();
    name.push(if gzip { ".tar.gz" } else { ".tar" });
    PathBuf::from(name)
}

/// Write a layer archive for `child`. Without a parent the whole tree is
/// archived; with one, only added or changed entries are written, plus a
/// whiteout for every removed path. Output is deterministic: entries are
/// sorted and ownership and timestamps are zeroed.
pub fn create_layer(
    parent: Option<&Path>,
    child: &Path,
    output: &Path,
    gzip: bool,
) -> Result<LayerSummary, CoreError> {
    let child_tree = scan(child)?;
    let (changed, whiteouts) = match parent {
        Some(parent) => {
            let parent_tree = scan(parent)?;
            changes(&parent_tree, &child_tree)?
        }
        None => (child_tree.keys().cloned().collect(), Vec::new()),
    };
    debug!(
        "layer plan: {} entries, {} whiteouts",
        changed.len(),
        whiteouts.len()
    );

    let out_dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&out_dir).map_err(io_at(&out_dir))?;
    let (digest, size) = {
        let mut sink = HashingWriter::new(BufWriter::new(&mut tmp));
        if gzip {
            let mut encoder = GzEncoder::new(&mut sink, Compression::default());
            write_tar(&mut encoder, &child_tree, &changed, &whiteouts)?;
            encoder.finish().map_err(io_at(output))?;
        } else {
            write_tar(&mut sink, &child_tree, &changed, &whiteouts)?;
        }
        sink.finish().map_err(io_at(output))?
    };
    tmp.as_file().sync_all().map_err(io_at(output))?;
    tmp.persist(output).map_err(|e| io_at(output)(e.error))?;

    info!("wrote layer {} ({digest}, {size} bytes)", output.display());
    Ok(LayerSummary {
        path: output.to_path_buf(),
        entries: changed.len(),
        whiteouts: whiteouts.len(),
        digest,
        size,
    })
}

/// Entries of `child` that are new or differ from `parent`, with their
/// ancestors, and the topmost paths of `parent` that `child` no longer has.
fn changes(
    parent: &BTreeMap<String, Node>,
    child: &BTreeMap<String, Node>,
) -> Result<(BTreeSet<String>, Vec<String>), CoreError> {
    let mut changed = BTreeSet::new();
    for (path, node) in child {
        let differs = match parent.get(path) {
            None => true,
            Some(old) => node_differs(old, node)?,
        };
        if differs {
            for ancestor in ancestors(path) {
                if child.contains_key(ancestor) {
                    changed.insert(ancestor.to_owned());
                }
            }
            changed.insert(path.clone());
        }
    }

    let mut whiteouts = Vec::new();
    for path in parent.keys() {
        if child.contains_key(path) {
            continue;
        }
        let dir = path.rsplit_once('/').map(|(dir, _)| dir);
        // Only the topmost removed path needs a marker, and only when its
        // directory survives as a directory.
        let topmost = dir.map_or(true, |dir| {
            matches!(child.get(dir), Some(n) if n.kind == NodeKind::Directory)
                && matches!(parent.get(dir), Some(n) if n.kind == NodeKind::Directory)
        });
        if topmost {
            whiteouts.push(path.clone());
        }
    }
    Ok((changed, whiteouts))
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> + '_ {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

fn node_differs(old: &Node, new: &Node) -> Result<bool, CoreError> {
    if old.kind != new.kind || old.mode != new.mode {
        return Ok(true);
    }
    match new.kind {
        NodeKind::Directory => Ok(false),
        NodeKind::Symlink => Ok(old.link != new.link),
        NodeKind::File => {
            if old.size != new.size {
                return Ok(true);
            }
            Ok(!same_content(&old.full, &new.full)?)
        }
    }
}

fn same_content(a: &Path, b: &Path) -> Result<bool, CoreError> {
    let mut fa = File::open(a).map_err(io_at(a))?;
    let mut fb = File::open(b).map_err(io_at(b))?;
    let mut ba = vec![0u8; 64 * 1024];
    let mut bb = vec![0u8; 64 * 1024];
    loop {
        let n = read_full(&mut fa, &mut ba).map_err(io_at(a))?;
        let m = read_full(&mut fb, &mut bb).map_err(io_at(b))?;
        if n != m || ba[..n] != bb[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

fn read_full(reader: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Every entry under `root`, keyed by slash-separated relative path.
fn scan(root: &Path) -> Result<BTreeMap<String, Node>, CoreError> {
    let meta = fs::metadata(root).map_err(io_at(root))?;
    if !meta.is_dir() {
        return Err(io_at(root)(io::Error::other("not a directory")));
    }
    let mut tree = BTreeMap::new();
    scan_dir(root, "", &mut tree)?;
    Ok(tree)
}

fn scan_dir(dir: &Path, prefix: &str, tree: &mut BTreeMap<String, Node>) -> Result<(), CoreError> {
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let full = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let meta = fs::symlink_metadata(&full).map_err(io_at(&full))?;
        let ft = meta.file_type();
        let (kind, link) = if ft.is_dir() {
            (NodeKind::Directory, None)
        } else if ft.is_file() {
            (NodeKind::File, None)
        } else if ft.is_symlink() {
            let target = fs::read_link(&full).map_err(io_at(&full))?;
            (NodeKind::Symlink, Some(target))
        } else {
            warn!("skipping unsupported file type: {rel}");
            continue;
        };
        if kind == NodeKind::Directory {
            scan_dir(&full, &rel, tree)?;
        }
        tree.insert(
            rel,
            Node {
                kind,
                mode: meta.permissions().mode() & 0o7777,
                size: meta.len(),
                full,
                link,
            },
        );
    }
    Ok(())
}

fn make_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header.set_size(size);
    header
}

fn write_tar<W: Write>(
    writer: W,
    tree: &BTreeMap<String, Node>,
    changed: &BTreeSet<String>,
    whiteouts: &[String],
) -> Result<(), CoreError> {
    let mut builder = Builder::new(writer);
    builder.follow_symlinks(false);

    let mut planned: BTreeMap<String, Option<&Node>> = changed
        .iter()
        .filter_map(|path| tree.get(path).map(|node| (path.clone(), Some(node))))
        .collect();
    for removed in whiteouts {
        let marker = match removed.rsplit_once('/') {
            Some((dir, name)) => format!("{dir}/{WHITEOUT_PREFIX}{name}"),
            None => format!("{WHITEOUT_PREFIX}{removed}"),
        };
        planned.insert(marker, None);
    }

    for (path, node) in &planned {
        let Some(node) = node else {
            let mut header = make_header(EntryType::Regular, WHITEOUT_MODE, 0);
            builder.append_data(&mut header, path, io::empty())?;
            continue;
        };
        match node.kind {
            NodeKind::Directory => {
                let mut header = make_header(EntryType::Directory, node.mode, 0);
                builder.append_data(&mut header, format!("{path}/"), io::empty())?;
            }
            NodeKind::File => {
                let file = File::open(&node.full).map_err(io_at(&node.full))?;
                let size = file.metadata().map_err(io_at(&node.full))?.len();
                let mut header = make_header(EntryType::Regular, node.mode, size);
                builder.append_data(&mut header, path, file.take(size))?;
            }
            NodeKind::Symlink => {
                let mut header = make_header(EntryType::Symlink, node.mode, 0);
                let target = node.link.as_deref().unwrap_or_else(|| Path::new(""));
                builder.append_link(&mut header, path, target)?;
            }
        }
    }
    builder.into_inner()?;
    Ok(())
}

/// Pass-through writer that digests what it forwards.
struct HashingWriter<W> {
    inner: W,
    digester: Digester,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            digester: Digester::new(),
        }
    }

    fn finish(mut self) -> io::Result<(Digest, u64)> {
        self.inner.flush()?;
        Ok(self.digester.finish())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digester.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
