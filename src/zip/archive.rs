use std::cell::RefCell;
use std::fmt;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{ArchiveError, Result};
use crate::io::{Backing, FileBacking, HttpBacking, MemoryBacking};

use super::entry::{Entry, EntryType};
use super::extractor::ExtractOptions;
use super::parser::{Entries, ZipParser};
use super::structures::EndOfCentralDirectory;

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Start a new, empty archive.
    Create,
    /// Read an existing archive. Mutations fail with [`ArchiveError::ReadOnly`].
    Read,
    /// Read and modify an existing archive in place.
    Update,
}

/// Where the archive bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Memory,
    Remote(String),
}

/// A ZIP archive over one exclusively owned [`Backing`].
///
/// Reading (`entries`, `get`, `extract`) takes `&self`; mutation (`add_entry`,
/// `remove`) takes `&mut self`. The backing is not synchronized and an
/// `Archive` is neither `Send` nor `Sync`; hand a
/// [`Progress`](super::Progress) clone to another thread to observe or cancel
/// a running operation.
pub struct Archive {
    pub(crate) backing: RefCell<Box<dyn Backing>>,
    pub(crate) location: Location,
    pub(crate) mode: AccessMode,
    pub(crate) end_of_central_directory: EndOfCentralDirectory,
}

impl Archive {
    /// Create a new archive file at `path`. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let backing = FileBacking::create(path)?;
        Self::initialize(Box::new(backing), Location::File(path.to_path_buf()))
    }

    /// Open the archive file at `path`.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();
        let location = Location::File(path.to_path_buf());
        match mode {
            AccessMode::Create => Self::create(path),
            AccessMode::Read => Self::load(Box::new(FileBacking::open(path)?), location, mode),
            AccessMode::Update => {
                Self::load(Box::new(FileBacking::open_for_update(path)?), location, mode)
            }
        }
    }

    /// A new, empty in-memory archive.
    pub fn in_memory() -> Result<Self> {
        Self::initialize(Box::new(MemoryBacking::new()), Location::Memory)
    }

    /// An in-memory archive over `data`.
    ///
    /// With [`AccessMode::Create`], an empty directory is appended after
    /// `data`, which is kept as a prefix (e.g. a self-extractor stub).
    pub fn from_data(data: Vec<u8>, mode: AccessMode) -> Result<Self> {
        match mode {
            AccessMode::Create => {
                Self::initialize(Box::new(MemoryBacking::from_bytes(data)), Location::Memory)
            }
            AccessMode::Read => Self::load(
                Box::new(MemoryBacking::read_only(data)),
                Location::Memory,
                mode,
            ),
            AccessMode::Update => Self::load(
                Box::new(MemoryBacking::from_bytes(data)),
                Location::Memory,
                mode,
            ),
        }
    }

    /// A read-only archive fetched with HTTP Range requests.
    pub fn open_remote(url: &str) -> Result<Self> {
        let backing = HttpBacking::new(url.to_string()).map_err(std::io::Error::other)?;
        Self::load(
            Box::new(backing),
            Location::Remote(url.to_string()),
            AccessMode::Read,
        )
    }

    /// Wrap any backing, e.g. a custom stream implementation.
    pub fn from_backing(backing: Box<dyn Backing>, mode: AccessMode) -> Result<Self> {
        match mode {
            AccessMode::Create => Self::initialize(backing, Location::Memory),
            _ => Self::load(backing, Location::Memory, mode),
        }
    }

    fn initialize(mut backing: Box<dyn Backing>, location: Location) -> Result<Self> {
        let start = backing.seek(SeekFrom::End(0))?;
        let cd_offset = u32::try_from(start).map_err(|_| ArchiveError::DirectoryOffsetOverflow)?;
        let eocd = EndOfCentralDirectory {
            cd_offset,
            ..Default::default()
        };
        backing.write_all(&eocd.encode())?;
        backing.flush()?;

        tracing::debug!(?location, "created archive");
        Ok(Self {
            backing: RefCell::new(backing),
            location,
            mode: AccessMode::Create,
            end_of_central_directory: eocd,
        })
    }

    fn load(mut backing: Box<dyn Backing>, location: Location, mode: AccessMode) -> Result<Self> {
        let (eocd, eocd_offset) = ZipParser::new(&mut *backing)?.find_eocd()?;
        if eocd.is_multi_disk() {
            return Err(ArchiveError::UnsupportedEntry("multi-disk archive"));
        }
        if eocd.is_zip64() {
            return Err(ArchiveError::UnsupportedEntry("zip64"));
        }
        // The directory must end where the end record starts, or before.
        if eocd.cd_offset as u64 + eocd.cd_size as u64 > eocd_offset {
            return Err(ArchiveError::Malformed("end of central directory"));
        }

        tracing::debug!(?location, ?mode, entries = eocd.total_entries, "opened archive");
        Ok(Self {
            backing: RefCell::new(backing),
            location,
            mode,
            end_of_central_directory: eocd,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::Read
    }

    pub fn end_of_central_directory(&self) -> &EndOfCentralDirectory {
        &self.end_of_central_directory
    }

    /// Number of entries recorded in the end of central directory record.
    pub fn total_entries(&self) -> u16 {
        self.end_of_central_directory.total_entries
    }

    pub fn comment(&self) -> &[u8] {
        &self.end_of_central_directory.comment
    }

    /// Lazily enumerate entries in directory order.
    ///
    /// Each call starts a fresh walk, so repeated enumeration without
    /// mutation yields the same sequence.
    pub fn entries(&self) -> Entries<'_> {
        Entries::new(&self.backing, &self.end_of_central_directory)
    }

    /// Look up an entry by its exact path.
    pub fn get(&self, path: &str) -> Option<Entry> {
        self.entries().find(|entry| entry.path() == path)
    }

    /// The archive bytes of an in-memory archive. `None` for file and remote
    /// archives.
    pub fn into_data(self) -> Option<Vec<u8>> {
        self.backing.into_inner().into_bytes()
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.mode == AccessMode::Read || !self.backing.borrow().is_writable() {
            return Err(ArchiveError::ReadOnly);
        }
        Ok(())
    }

    /// Entries in an order that is safe to extract.
    ///
    /// Non-symlinks come first in directory order, except that a directory is
    /// moved in front of a file claiming the same path. Symlinks follow, each
    /// placed relative to the symlinks it depends on or that depend on it.
    pub fn sorted_entries(&self) -> Result<Vec<Entry>> {
        let mut ordered: Vec<Entry> = Vec::new();
        let mut symlinks: Vec<SymlinkNode> = Vec::new();

        for entry in self.entries() {
            match entry.entry_type() {
                EntryType::Symlink => {
                    let node = SymlinkNode::new(entry, self)?;
                    let index = symlink_position(&symlinks, &node);
                    symlinks.insert(index, node);
                }
                EntryType::Directory => {
                    let path = entry.path().trim_end_matches('/');
                    let clash = ordered.iter().position(|existing| {
                        existing.entry_type() == EntryType::File && existing.path() == path
                    });
                    match clash {
                        Some(index) => ordered.insert(index, entry),
                        None => ordered.push(entry),
                    }
                }
                EntryType::File => ordered.push(entry),
            }
        }

        ordered.extend(symlinks.into_iter().map(|node| node.entry));
        Ok(ordered)
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("location", &self.location)
            .field("mode", &self.mode)
            .field("end_of_central_directory", &self.end_of_central_directory)
            .finish_non_exhaustive()
    }
}

/// A symlink entry with its own path and its resolved target, both relative
/// to the archive root.
struct SymlinkNode {
    entry: Entry,
    path: PathBuf,
    target: PathBuf,
}

impl SymlinkNode {
    fn new(entry: Entry, archive: &Archive) -> Result<Self> {
        let mut payload = Vec::new();
        archive.extract(&entry, &ExtractOptions::default(), |chunk| {
            payload.extend_from_slice(chunk);
            Ok(())
        })?;
        let destination = String::from_utf8(payload)
            .map_err(|_| ArchiveError::InvalidSymlinkDestination(entry.path().to_string()))?;

        let path = PathBuf::from(entry.path().trim_end_matches('/'));
        let base = path.parent().unwrap_or(Path::new(""));
        let target = normalize(&base.join(destination));
        Ok(Self {
            entry,
            path: normalize(&path),
            target,
        })
    }
}

/// Where `node` goes among the already ordered `symlinks`.
///
/// Rules are tried in order against each existing symlink; the first match
/// decides:
/// 1. the new target is a prefix of its target: right after it;
/// 2. its target is a prefix of the new target: at its position;
/// 3. its target and the new path are prefixes of one another (one link
///    resolves through the other's location): at its position;
/// 4. the new target and its path are prefixes of one another: right after it.
///
/// Otherwise the new symlink is appended.
fn symlink_position(symlinks: &[SymlinkNode], node: &SymlinkNode) -> usize {
    symlinks
        .iter()
        .enumerate()
        .find_map(|(index, existing)| {
            if existing.target.starts_with(&node.target) {
                Some(index + 1)
            } else if node.target.starts_with(&existing.target) {
                Some(index)
            } else if prefixed_either_way(&existing.target, &node.path) {
                Some(index)
            } else if prefixed_either_way(&node.target, &existing.path) {
                Some(index + 1)
            } else {
                None
            }
        })
        .unwrap_or(symlinks.len())
}

fn prefixed_either_way(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Resolve `.` and `..` lexically. Leading `..` that would climb above the
/// root are kept.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
