//! Appending and removing entries.
//!
//! Adding writes a provisional local header where the central directory used
//! to start, streams the payload behind it, rewrites the header with the
//! final sizes and checksum, and then writes the old directory, one new
//! record and a new end record. Any failure after the first write restores
//! the previous bytes.
//!
//! Removing copies every other entry verbatim into a temporary archive and
//! swaps it in.

use chrono::{Local, NaiveDateTime};
use std::io::{BufWriter, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, Result};
use crate::fs::FileSystem;
use crate::io::{Backing, FileBacking, MemoryBacking, read_full};

use super::archive::{Archive, Location};
use super::compression::{self, DEFAULT_BUFFER_SIZE};
use super::entry::{Entry, EntryType, to_dos};
use super::progress::{self, Progress};
use super::structures::{
    CentralDirectoryRecord, CompressionMethod, EndOfCentralDirectory, FLAG_UTF8,
    LocalFileHeader, VERSION_NEEDED,
};

/// Options for adding entries.
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Applies to files only. Directories and symlinks are always stored.
    pub compression_method: CompressionMethod,
    /// Defaults to the current local time.
    pub modified: Option<NaiveDateTime>,
    /// Defaults to the entry type's default permissions.
    pub permissions: Option<u16>,
    pub buffer_size: usize,
    pub progress: Option<Progress>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            modified: None,
            permissions: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: None,
        }
    }
}

impl AddOptions {
    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    pub fn modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn permissions(mut self, permissions: u16) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Where an add operation stands. Every state after the first write can
/// roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// The provisional header (zero checksum and compressed size) is on disk.
    HeaderWritten,
    /// The payload follows the header; `end` is the first byte after it.
    PayloadStreamed {
        end: u64,
        checksum: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    },
    /// The header carries the final values.
    HeaderFinalized { end: u64 },
}

/// One in-flight add over the archive backing.
struct PendingEntry<'a> {
    backing: &'a mut dyn Backing,
    header: LocalFileHeader,
    header_start: u64,
    old_directory: Vec<u8>,
    old_end: EndOfCentralDirectory,
    state: Option<WriteState>,
}

impl<'a> PendingEntry<'a> {
    /// Buffer the current central directory. Nothing is written yet.
    fn new(
        backing: &'a mut dyn Backing,
        header: LocalFileHeader,
        old_end: &EndOfCentralDirectory,
    ) -> Result<Self> {
        let header_start = old_end.cd_offset as u64;
        let mut old_directory = vec![0u8; old_end.cd_size as usize];
        backing.read_at(header_start, &mut old_directory)?;

        Ok(Self {
            backing,
            header,
            header_start,
            old_directory,
            old_end: old_end.clone(),
            state: None,
        })
    }

    /// Write the provisional header over the start of the old directory.
    fn write_header(&mut self) -> Result<()> {
        self.backing.seek(SeekFrom::Start(self.header_start))?;
        self.backing.write_all(&self.header.encode())?;
        self.state = Some(WriteState::HeaderWritten);
        Ok(())
    }

    fn stream_payload<P>(
        &mut self,
        entry_type: EntryType,
        size: u64,
        options: &AddOptions,
        mut provider: P,
    ) -> Result<()>
    where
        P: FnMut(u64, &mut [u8]) -> Result<usize>,
    {
        debug_assert_eq!(self.state, Some(WriteState::HeaderWritten));
        let progress = options.progress.as_ref();
        let method = CompressionMethod::from_u16(self.header.compression_method);
        let backing = &mut *self.backing;

        let (checksum, compressed_size, uncompressed_size) = match (entry_type, method) {
            (EntryType::Directory, _) => (0, 0, 0),
            (_, CompressionMethod::Deflate) => {
                let mut uncompressed = 0u64;
                let mut compressed = 0u64;
                let checksum = compression::compress(
                    size,
                    options.buffer_size,
                    |position, buf| {
                        progress::check(progress)?;
                        let read = provider(position, buf)?;
                        uncompressed += read as u64;
                        progress::advance(progress, read);
                        Ok(read)
                    },
                    |chunk| {
                        backing.write_all(chunk)?;
                        compressed += chunk.len() as u64;
                        Ok(())
                    },
                )?;
                (checksum, compressed, uncompressed)
            }
            (_, CompressionMethod::Stored) => {
                let mut buf = vec![0u8; options.buffer_size.max(1)];
                let mut position = 0u64;
                let mut checksum = 0;
                while position < size {
                    progress::check(progress)?;
                    let wanted = (size - position).min(buf.len() as u64) as usize;
                    let read = provider(position, &mut buf[..wanted])?.min(wanted);
                    backing.write_all(&buf[..read])?;
                    checksum = compression::crc32(checksum, &buf[..read]);
                    progress::advance(progress, read);
                    position += read as u64;
                    if read < wanted {
                        break;
                    }
                }
                (checksum, position, position)
            }
            (_, CompressionMethod::Unknown(method)) => {
                return Err(ArchiveError::UnsupportedCompressionMethod(method));
            }
        };

        let end = self.header_start + self.header.size() + compressed_size;
        tracing::trace!(end, compressed_size, uncompressed_size, "payload streamed");
        self.state = Some(WriteState::PayloadStreamed {
            end,
            checksum,
            compressed_size,
            uncompressed_size,
        });
        Ok(())
    }

    /// Seek back and rewrite the header with the final checksum and sizes.
    fn finalize_header(&mut self) -> Result<()> {
        let Some(WriteState::PayloadStreamed {
            end,
            checksum,
            compressed_size,
            uncompressed_size,
        }) = self.state
        else {
            return Err(ArchiveError::Malformed("local file header"));
        };

        self.header.crc32 = checksum;
        self.header.compressed_size =
            u32::try_from(compressed_size).map_err(|_| ArchiveError::EntryTooLarge)?;
        self.header.uncompressed_size =
            u32::try_from(uncompressed_size).map_err(|_| ArchiveError::EntryTooLarge)?;

        self.backing.seek(SeekFrom::Start(self.header_start))?;
        self.backing.write_all(&self.header.encode())?;
        self.backing.seek(SeekFrom::Start(end))?;
        self.state = Some(WriteState::HeaderFinalized { end });
        Ok(())
    }

    /// Write the old directory, the new record and the new end record.
    fn write_directory(&mut self, external_attributes: u32) -> Result<EndOfCentralDirectory> {
        let Some(WriteState::HeaderFinalized { end }) = self.state else {
            return Err(ArchiveError::Malformed("local file header"));
        };

        let header_offset =
            u32::try_from(self.header_start).map_err(|_| ArchiveError::DirectoryOffsetOverflow)?;
        let record = CentralDirectoryRecord::for_local_header(
            &self.header,
            header_offset,
            external_attributes,
        );
        let new_end = self.old_end.with_entry_added(record.size(), end)?;

        self.backing.seek(SeekFrom::Start(end))?;
        self.backing.write_all(&self.old_directory)?;
        self.backing.write_all(&record.encode())?;
        self.backing.write_all(&new_end.encode())?;
        let length = self.backing.stream_position()?;
        self.backing.truncate(length)?;
        self.backing.flush()?;

        tracing::debug!(
            entries = new_end.total_entries,
            cd_offset = new_end.cd_offset,
            cd_size = new_end.cd_size,
            "rewrote central directory"
        );
        Ok(new_end)
    }

    /// Put back the bytes that were there before the header was written.
    fn rollback(&mut self) -> Result<()> {
        tracing::debug!(state = ?self.state, offset = self.header_start, "rolling back entry");
        self.backing.truncate(self.header_start)?;
        self.backing.seek(SeekFrom::Start(self.header_start))?;
        self.backing.write_all(&self.old_directory)?;
        self.backing.write_all(&self.old_end.encode())?;
        self.backing.flush()?;
        Ok(())
    }
}

impl Archive {
    /// Append one entry and return the CRC-32 of its payload.
    ///
    /// `provider(position, buf)` fills `buf` with payload bytes starting at
    /// `position` and returns how many it wrote; a short count ends the
    /// payload. Directories take no payload. A symlink's payload is its
    /// target path.
    ///
    /// On failure or cancellation the archive is left as it was.
    pub fn add_entry<P>(
        &mut self,
        path: &str,
        entry_type: EntryType,
        size: u64,
        options: &AddOptions,
        provider: P,
    ) -> Result<u32>
    where
        P: FnMut(u64, &mut [u8]) -> Result<usize>,
    {
        self.ensure_writable()?;

        let mut name = path.trim_start_matches('/').to_string();
        if entry_type == EntryType::Directory && !name.ends_with('/') {
            name.push('/');
        }
        if name.is_empty() || name == "/" || name.len() > u16::MAX as usize {
            return Err(ArchiveError::InvalidEntryPath(path.to_string()));
        }

        let old_end = self.end_of_central_directory.clone();
        if old_end.total_entries == u16::MAX || old_end.disk_entries == u16::MAX {
            return Err(ArchiveError::EntryCountOverflow);
        }
        let size = if entry_type == EntryType::Directory { 0 } else { size };
        let uncompressed_size = u32::try_from(size).map_err(|_| ArchiveError::EntryTooLarge)?;

        let method = match entry_type {
            EntryType::File => options.compression_method,
            EntryType::Directory | EntryType::Symlink => CompressionMethod::Stored,
        };
        if let CompressionMethod::Unknown(method) = method {
            return Err(ArchiveError::UnsupportedCompressionMethod(method));
        }

        let modified = options
            .modified
            .unwrap_or_else(|| Local::now().naive_local());
        let (last_mod_date, last_mod_time) = to_dos(modified);
        let permissions = options
            .permissions
            .unwrap_or_else(|| entry_type.default_permissions());

        let header = LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            compression_method: method.as_u16(),
            last_mod_time,
            last_mod_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size,
            file_name: name.clone().into_bytes(),
            extra_field: Vec::new(),
        };

        if let Some(progress) = &options.progress {
            progress.set_total(size);
        }

        let backing = self.backing.get_mut();
        let mut pending = PendingEntry::new(&mut **backing, header, &old_end)?;

        let result = pending
            .write_header()
            .and_then(|()| pending.stream_payload(entry_type, size, options, provider))
            .and_then(|()| pending.finalize_header())
            .and_then(|()| pending.write_directory(entry_type.external_attributes(permissions)));

        match result {
            Ok(new_end) => {
                let checksum = pending.header.crc32;
                self.end_of_central_directory = new_end;
                tracing::debug!(entry = %name, %entry_type, checksum, "added entry");
                Ok(checksum)
            }
            Err(e) => {
                if let Err(rollback) = pending.rollback() {
                    tracing::error!(entry = %name, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Add the item at `base/path` as entry `path`, taking its type, size,
    /// modification time and permissions from `fs`. Returns the payload
    /// CRC-32.
    pub fn add_path(
        &mut self,
        path: &Path,
        base: &Path,
        fs: &dyn FileSystem,
        options: &AddOptions,
    ) -> Result<u32> {
        let source = base.join(path);
        let name = entry_name(path)?;
        let entry_type = fs.entry_type(&source)?;

        let mut options = options.clone();
        if options.modified.is_none() {
            options.modified = Some(fs.modified(&source)?);
        }
        if options.permissions.is_none() {
            options.permissions = Some(fs.permissions(&source)?);
        }

        match entry_type {
            EntryType::Directory => {
                self.add_entry(&name, entry_type, 0, &options, |_, _| Ok(0))
            }
            EntryType::Symlink => {
                let target = fs.read_link(&source)?;
                let target = target.to_str().ok_or_else(|| {
                    ArchiveError::InvalidSymlinkDestination(source.display().to_string())
                })?;
                let target = target.as_bytes().to_vec();
                let size = target.len() as u64;
                self.add_entry(&name, entry_type, size, &options, slice_provider(&target))
            }
            EntryType::File => {
                let size = fs.size(&source)?;
                let mut reader = fs.open_read(&source)?;
                self.add_entry(&name, entry_type, size, &options, |_, buf| {
                    Ok(read_full(&mut *reader, buf)?)
                })
            }
        }
    }

    /// Add the item at `base/path` and, for a directory, everything below it.
    /// Returns the number of entries added.
    pub fn add_tree(
        &mut self,
        path: &Path,
        base: &Path,
        fs: &dyn FileSystem,
        options: &AddOptions,
    ) -> Result<usize> {
        let mut pending = vec![path.to_path_buf()];
        let mut added = 0;

        while let Some(relative) = pending.pop() {
            self.add_path(&relative, base, fs, options)?;
            added += 1;

            let source = base.join(&relative);
            if fs.entry_type(&source)? == EntryType::Directory {
                let children = fs.read_dir(&source)?;
                // Reverse so the stack pops children in name order.
                for child in children.into_iter().rev() {
                    if let Some(name) = child.file_name() {
                        pending.push(relative.join(name));
                    }
                }
            }
        }
        Ok(added)
    }

    /// Remove `entry` by rebuilding the archive without it.
    ///
    /// The remaining entries are copied byte for byte into a temporary archive
    /// which then replaces the original. Entries that enumeration skips are
    /// not carried over. On failure or cancellation the original is untouched.
    pub fn remove(&mut self, entry: &Entry, progress: Option<&Progress>) -> Result<()> {
        self.ensure_writable()?;

        let entries: Vec<Entry> = self.entries().collect();
        if !entries.contains(entry) {
            return Err(ArchiveError::EntryNotFound(entry.path().to_string()));
        }
        if let Some(progress) = progress {
            let total = entries
                .iter()
                .filter(|candidate| *candidate != entry)
                .map(Entry::local_size)
                .sum();
            progress.set_total(total);
        }

        let comment = self.end_of_central_directory.comment.clone();
        let location = self.location.clone();
        let backing = self.backing.get_mut();

        let new_end = match &location {
            Location::File(path) => {
                let parent = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let mut temp = tempfile::NamedTempFile::new_in(parent)?;
                let new_end = {
                    let mut writer = BufWriter::new(temp.as_file_mut());
                    let new_end = copy_entries(
                        &mut **backing,
                        &entries,
                        entry,
                        comment,
                        &mut writer,
                        progress,
                    )?;
                    writer.flush()?;
                    new_end
                };
                temp.as_file().sync_all()?;
                if let Ok(metadata) = std::fs::metadata(path) {
                    std::fs::set_permissions(temp.path(), metadata.permissions())?;
                }
                temp.persist(path).map_err(|e| e.error)?;
                *backing = Box::new(FileBacking::open_for_update(path)?);
                tracing::debug!(path = %path.display(), "replaced archive file");
                new_end
            }
            Location::Memory => {
                let mut data = Vec::new();
                let new_end =
                    copy_entries(&mut **backing, &entries, entry, comment, &mut data, progress)?;
                *backing = Box::new(MemoryBacking::from_bytes(data));
                tracing::debug!("replaced in-memory archive");
                new_end
            }
            Location::Remote(_) => return Err(ArchiveError::ReadOnly),
        };

        tracing::debug!(entry = entry.path(), entries = new_end.total_entries, "removed entry");
        self.end_of_central_directory = new_end;
        Ok(())
    }
}

/// Copy every entry but `skip` from `source` into `target`, followed by the
/// relocated directory and a new end record.
fn copy_entries(
    source: &mut dyn Backing,
    entries: &[Entry],
    skip: &Entry,
    comment: Vec<u8>,
    target: &mut dyn Write,
    progress: Option<&Progress>,
) -> Result<EndOfCentralDirectory> {
    let mut directory = Vec::new();
    let mut offset = 0u64;
    let mut count = 0u16;
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];

    for entry in entries.iter().filter(|entry| *entry != skip) {
        let new_offset = u32::try_from(offset).map_err(|_| ArchiveError::DirectoryOffsetOverflow)?;

        let mut remaining = entry.local_size();
        source.seek(SeekFrom::Start(entry.header_offset()))?;
        while remaining > 0 {
            progress::check(progress)?;
            let len = remaining.min(buf.len() as u64) as usize;
            source.read_exact(&mut buf[..len])?;
            target.write_all(&buf[..len])?;
            progress::advance(progress, len);
            remaining -= len as u64;
        }

        directory.extend_from_slice(&entry.central_directory().relocated(new_offset).encode());
        offset += entry.local_size();
        count += 1;
    }

    let end = EndOfCentralDirectory {
        disk_entries: count,
        total_entries: count,
        cd_size: u32::try_from(directory.len()).map_err(|_| ArchiveError::DirectorySizeOverflow)?,
        cd_offset: u32::try_from(offset).map_err(|_| ArchiveError::DirectoryOffsetOverflow)?,
        comment,
        ..Default::default()
    };
    target.write_all(&directory)?;
    target.write_all(&end.encode())?;
    Ok(end)
}

/// `/`-separated entry name for a relative filesystem path.
fn entry_name(path: &Path) -> Result<String> {
    let parts = path
        .components()
        .map(|component| match component {
            std::path::Component::Normal(part) => part
                .to_str()
                .ok_or_else(|| ArchiveError::InvalidEntryPath(path.display().to_string())),
            _ => Err(ArchiveError::InvalidEntryPath(path.display().to_string())),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn slice_provider(data: &[u8]) -> impl FnMut(u64, &mut [u8]) -> Result<usize> + '_ {
    move |position, buf| {
        let start = (position as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }
}
