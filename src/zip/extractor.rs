use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{ArchiveError, Result};
use crate::fs::FileSystem;

use super::archive::Archive;
use super::compression::{self, DEFAULT_BUFFER_SIZE};
use super::entry::{Entry, EntryType};
use super::progress::{self, Progress};
use super::structures::CompressionMethod;

/// Options for reading entry payloads.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub buffer_size: usize,
    /// Do not compute the CRC-32 of inflated data. The returned checksum is 0.
    pub skip_checksum: bool,
    /// Compare the computed checksum with the recorded one and fail on mismatch.
    pub verify_checksum: bool,
    pub progress: Option<Progress>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            skip_checksum: false,
            verify_checksum: false,
            progress: None,
        }
    }
}

impl ExtractOptions {
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn skip_checksum(mut self, skip: bool) -> Self {
        self.skip_checksum = skip;
        self
    }

    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Archive {
    /// Stream the payload of `entry` to `consumer` and return its CRC-32.
    ///
    /// Files are passed through or inflated in `buffer_size` chunks.
    /// Directories produce a single empty chunk. Symlinks produce their
    /// target text in one chunk.
    pub fn extract<F>(
        &self,
        entry: &Entry,
        options: &ExtractOptions,
        mut consumer: F,
    ) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let progress = options.progress.as_ref();
        if let Some(progress) = progress {
            progress.set_total(entry.uncompressed_size());
        }

        let checksum = match entry.entry_type() {
            EntryType::Directory => {
                consumer(&[])?;
                return Ok(0);
            }
            EntryType::Symlink => {
                let mut target = Vec::new();
                self.read_payload(entry, options, |chunk| {
                    target.extend_from_slice(chunk);
                    Ok(())
                })?;
                progress::check(progress)?;
                consumer(&target)?;
                compression::crc32(0, &target)
            }
            EntryType::File => self.read_payload(entry, options, consumer)?,
        };

        if options.verify_checksum && !options.skip_checksum && checksum != entry.checksum() {
            return Err(ArchiveError::ChecksumMismatch {
                expected: entry.checksum(),
                actual: checksum,
            });
        }
        Ok(checksum)
    }

    /// Read the whole payload of `entry` into memory.
    pub fn read(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.uncompressed_size() as usize);
        self.extract(entry, &ExtractOptions::default(), |chunk| {
            data.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(data)
    }

    fn read_payload<F>(
        &self,
        entry: &Entry,
        options: &ExtractOptions,
        mut consumer: F,
    ) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let progress = options.progress.as_ref();
        let data_offset = entry.data_offset();
        let compressed_size = entry.compressed_size();

        match entry.compression_method() {
            CompressionMethod::Stored => {
                let mut buf = vec![0u8; options.buffer_size.max(1)];
                let mut position = 0u64;
                let mut checksum = 0;
                while position < compressed_size {
                    progress::check(progress)?;
                    let len = (compressed_size - position).min(buf.len() as u64) as usize;
                    self.backing
                        .borrow_mut()
                        .read_at(data_offset + position, &mut buf[..len])?;
                    checksum = compression::crc32(checksum, &buf[..len]);
                    consumer(&buf[..len])?;
                    progress::advance(progress, len);
                    position += len as u64;
                }
                Ok(checksum)
            }
            CompressionMethod::Deflate => compression::decompress(
                compressed_size,
                options.buffer_size,
                options.skip_checksum,
                |position, buf| {
                    progress::check(progress)?;
                    let mut backing = self.backing.borrow_mut();
                    backing.seek(SeekFrom::Start(data_offset + position))?;
                    Ok(backing.read_chunk(buf)?)
                },
                |chunk| {
                    consumer(chunk)?;
                    progress::advance(progress, chunk.len());
                    Ok(())
                },
            ),
            CompressionMethod::Unknown(method) => {
                Err(ArchiveError::UnsupportedCompressionMethod(method))
            }
        }
    }

    /// Materialize `entry` below `destination` through `fs`.
    ///
    /// A file that fails or is cancelled midway is removed again.
    pub fn extract_to(
        &self,
        entry: &Entry,
        destination: &Path,
        fs: &dyn FileSystem,
        options: &ExtractOptions,
    ) -> Result<u32> {
        let path = destination.join(entry_relative_path(entry.path())?);

        match entry.entry_type() {
            EntryType::Directory => {
                let checksum = self.extract(entry, options, |_| Ok(()))?;
                fs.create_directory(&path)?;
                fs.set_permissions(&path, entry.permissions())?;
                Ok(checksum)
            }
            EntryType::Symlink => {
                let mut target = Vec::new();
                let checksum = self.extract(entry, options, |chunk| {
                    target.extend_from_slice(chunk);
                    Ok(())
                })?;
                let target = String::from_utf8(target)
                    .map_err(|_| ArchiveError::InvalidSymlinkDestination(entry.path().to_string()))?;
                create_parent(fs, &path)?;
                fs.create_symlink(&path, Path::new(&target))?;
                Ok(checksum)
            }
            EntryType::File => {
                create_parent(fs, &path)?;
                let mut writer = fs.open_write(&path)?;
                let result = self
                    .extract(entry, options, |chunk| Ok(writer.write_all(chunk)?))
                    .and_then(|checksum| {
                        writer.flush()?;
                        Ok(checksum)
                    });
                drop(writer);

                match result {
                    Ok(checksum) => {
                        fs.set_modified(&path, entry.modified())?;
                        fs.set_permissions(&path, entry.permissions())?;
                        Ok(checksum)
                    }
                    Err(e) => {
                        if let Err(cleanup) = fs.remove_file(&path) {
                            tracing::warn!(
                                path = %path.display(),
                                error = %cleanup,
                                "cannot remove partial file"
                            );
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Extract every entry below `destination` in [`Archive::sorted_entries`]
    /// order.
    pub fn extract_all(
        &self,
        destination: &Path,
        fs: &dyn FileSystem,
        options: &ExtractOptions,
    ) -> Result<usize> {
        let entries = self.sorted_entries()?;
        for entry in &entries {
            tracing::debug!(entry = entry.path(), "extracting");
            self.extract_to(entry, destination, fs, options)?;
        }
        Ok(entries.len())
    }
}

fn create_parent(fs: &dyn FileSystem, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !fs.exists(parent) {
            fs.create_directory(parent)?;
        }
    }
    Ok(())
}

/// The entry path as a relative filesystem path. Absolute paths and `..`
/// components are refused so extraction never escapes the destination.
pub fn entry_relative_path(path: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::InvalidEntryPath(path.to_string()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ArchiveError::InvalidEntryPath(path.to_string()));
    }
    Ok(relative)
}
