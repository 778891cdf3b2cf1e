#![allow(dead_code)]

use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rezip::zip::compression::crc32;
use rezip::{
    AddOptions, Archive, CompressionMethod, EntryType, FileSystem, Result,
    zip::{
        CentralDirectoryRecord, DataDescriptor, EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR,
        FLAG_UTF8, LocalFileHeader, VERSION_NEEDED,
    },
};

/// Provider serving `data` by position.
pub fn provider(data: &[u8]) -> impl FnMut(u64, &mut [u8]) -> Result<usize> + '_ {
    move |position, buf| {
        let start = (position as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }
}

pub fn add_file(archive: &mut Archive, path: &str, data: &[u8], method: CompressionMethod) -> u32 {
    let options = AddOptions::default().compression_method(method);
    archive
        .add_entry(path, EntryType::File, data.len() as u64, &options, provider(data))
        .unwrap()
}

pub fn add_symlink(archive: &mut Archive, path: &str, target: &str) {
    archive
        .add_entry(
            path,
            EntryType::Symlink,
            target.len() as u64,
            &AddOptions::default(),
            provider(target.as_bytes()),
        )
        .unwrap();
}

/// Compressible payload larger than a few default buffers.
pub fn sample_payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| b"the quick brown fox jumps over the lazy dog "[i % 44] ^ ((i / 4096) as u8 & 1))
        .collect()
}

/// `(path, checksum)` pairs in enumeration order.
pub fn listing(archive: &Archive) -> Vec<(String, u32)> {
    archive
        .entries()
        .map(|entry| (entry.path().to_string(), entry.checksum()))
        .collect()
}

/// One member of an archive assembled record by record.
pub struct RawMember {
    pub local: LocalFileHeader,
    pub payload: Vec<u8>,
    pub descriptor: Option<DataDescriptor>,
    pub central: CentralDirectoryRecord,
}

impl RawMember {
    /// A stored file whose headers carry the real checksum and sizes.
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self::new(name, CompressionMethod::Stored, data, data)
    }

    /// `payload` is written as is; `data` is what it decodes to.
    pub fn new(name: &str, method: CompressionMethod, payload: &[u8], data: &[u8]) -> Self {
        let local = LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            compression_method: method.as_u16(),
            last_mod_time: 0,
            last_mod_date: (1 << 5) | 1,
            crc32: crc32(0, data),
            compressed_size: payload.len() as u32,
            uncompressed_size: data.len() as u32,
            file_name: name.as_bytes().to_vec(),
            extra_field: Vec::new(),
        };
        let central = CentralDirectoryRecord::for_local_header(
            &local,
            0,
            EntryType::File.external_attributes(0o644),
        );
        Self {
            local,
            payload: payload.to_vec(),
            descriptor: None,
            central,
        }
    }

    /// Move checksum and sizes out of the local header into a trailing
    /// signed data descriptor, setting flag bit 3.
    pub fn with_data_descriptor(mut self) -> Self {
        self.descriptor = Some(DataDescriptor {
            crc32: self.local.crc32,
            compressed_size: self.local.compressed_size,
            uncompressed_size: self.local.uncompressed_size,
            has_signature: true,
        });
        self.local.flags |= FLAG_DATA_DESCRIPTOR;
        self.local.crc32 = 0;
        self.local.compressed_size = 0;
        self.local.uncompressed_size = 0;
        self.central.flags |= FLAG_DATA_DESCRIPTOR;
        self
    }

    /// Set general purpose flags on both headers.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.local.flags |= flags;
        self.central.flags |= flags;
        self
    }

    pub fn with_version_needed(mut self, version: u16) -> Self {
        self.local.version_needed = version;
        self.central.version_needed = version;
        self
    }
}

/// Lay out `members` followed by their directory and an end record.
pub fn raw_archive(members: &[RawMember]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut directory = Vec::new();
    for member in members {
        let offset = data.len() as u32;
        data.extend_from_slice(&member.local.encode());
        data.extend_from_slice(&member.payload);
        if let Some(descriptor) = &member.descriptor {
            data.extend_from_slice(&descriptor.encode());
        }
        directory.extend_from_slice(&member.central.relocated(offset).encode());
    }

    let end = EndOfCentralDirectory {
        disk_entries: members.len() as u16,
        total_entries: members.len() as u16,
        cd_size: directory.len() as u32,
        cd_offset: data.len() as u32,
        ..Default::default()
    };
    data.extend_from_slice(&directory);
    data.extend_from_slice(&end.encode());
    data
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateDirectory(PathBuf),
    CreateSymlink(PathBuf, PathBuf),
    OpenWrite(PathBuf),
    RemoveFile(PathBuf),
    SetPermissions(PathBuf, u16),
    SetModified(PathBuf),
}

/// In-memory [`FileSystem`] that records every mutating call.
#[derive(Debug, Default)]
pub struct RecordingFileSystem {
    pub calls: RefCell<Vec<Call>>,
    pub files: Rc<RefCell<BTreeMap<PathBuf, Vec<u8>>>>,
    pub directories: RefCell<Vec<PathBuf>>,
    pub symlinks: RefCell<BTreeMap<PathBuf, PathBuf>>,
}

impl RecordingFileSystem {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.borrow().get(path.as_ref()).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

struct SharedFile {
    path: PathBuf,
    files: Rc<RefCell<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files
            .borrow_mut()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
}

impl FileSystem for RecordingFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
            || self.directories.borrow().iter().any(|dir| dir == path)
            || self.symlinks.borrow().contains_key(path)
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        self.record(Call::CreateDirectory(path.to_path_buf()));
        self.directories.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn create_symlink(&self, path: &Path, target: &Path) -> io::Result<()> {
        self.record(Call::CreateSymlink(path.to_path_buf(), target.to_path_buf()));
        self.symlinks
            .borrow_mut()
            .insert(path.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn entry_type(&self, path: &Path) -> io::Result<EntryType> {
        if self.symlinks.borrow().contains_key(path) {
            Ok(EntryType::Symlink)
        } else if self.directories.borrow().iter().any(|dir| dir == path) {
            Ok(EntryType::Directory)
        } else if self.files.borrow().contains_key(path) {
            Ok(EntryType::File)
        } else {
            Err(not_found(path))
        }
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.file(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| not_found(path))
    }

    fn modified(&self, _path: &Path) -> io::Result<NaiveDateTime> {
        Ok(NaiveDateTime::default())
    }

    fn set_modified(&self, path: &Path, _modified: NaiveDateTime) -> io::Result<()> {
        self.record(Call::SetModified(path.to_path_buf()));
        Ok(())
    }

    fn permissions(&self, _path: &Path) -> io::Result<u16> {
        Ok(0o644)
    }

    fn set_permissions(&self, path: &Path, permissions: u16) -> io::Result<()> {
        self.record(Call::SetPermissions(path.to_path_buf(), permissions));
        Ok(())
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        let data = self.file(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        self.record(Call::OpenWrite(path.to_path_buf()));
        self.files.borrow_mut().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(SharedFile {
            path: path.to_path_buf(),
            files: Rc::clone(&self.files),
        }))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.symlinks
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.record(Call::RemoveFile(path.to_path_buf()));
        self.files
            .borrow_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children: Vec<PathBuf> = self
            .files
            .borrow()
            .keys()
            .chain(self.symlinks.borrow().keys())
            .cloned()
            .chain(self.directories.borrow().iter().cloned())
            .filter(|child| child.parent() == Some(path))
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }
}
