use super::{Backing, read_only_error};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Local file backing
pub struct FileBacking {
    file: File,
    writable: bool,
}

impl FileBacking {
    /// Open an existing file, read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            writable: false,
        })
    }

    /// Open an existing file for reading and writing.
    pub fn open_for_update(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            writable: true,
        })
    }

    /// Create a new, empty file. Fails if `path` already exists.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            file,
            writable: true,
        })
    }

    /// Wrap an already opened handle. The handle must allow reading, and
    /// writing too when `writable` is set.
    pub fn from_file(file: File, writable: bool) -> Self {
        Self { file, writable }
    }
}

impl Read for FileBacking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileBacking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(read_only_error());
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileBacking {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Backing for FileBacking {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if !self.writable {
            return Err(read_only_error());
        }
        self.file.set_len(len)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
