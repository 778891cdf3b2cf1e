use super::{Backing, read_only_error};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// In-memory backing.
///
/// Behaves like a file opened for update: writes past the end grow the
/// buffer (zero-filling any gap), writes inside it overwrite in place, and
/// [`Backing::truncate`] shrinks or extends it.
#[derive(Debug, Default)]
pub struct MemoryBacking {
    cursor: Cursor<Vec<u8>>,
    read_only: bool,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            read_only: false,
        }
    }

    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            read_only: true,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for MemoryBacking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for MemoryBacking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(read_only_error());
        }
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryBacking {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Backing for MemoryBacking {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length out of range"))?;
        self.cursor.get_mut().resize(len, 0);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.read_only
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }

    fn into_bytes(self: Box<Self>) -> Option<Vec<u8>> {
        Some(self.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_past_end_zero_fills_gap() {
        let mut backing = MemoryBacking::new();
        backing.seek(SeekFrom::Start(4)).unwrap();
        backing.write_all(b"ab").unwrap();
        assert_eq!(MemoryBacking::bytes(&backing), &[0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn overwrite_in_place_keeps_length() {
        let mut backing = MemoryBacking::from_bytes(b"hello world".to_vec());
        backing.seek(SeekFrom::Start(6)).unwrap();
        backing.write_all(b"WORLD").unwrap();
        assert_eq!(MemoryBacking::bytes(&backing), b"hello WORLD");
        assert_eq!(backing.size().unwrap(), 11);
    }

    #[test]
    fn truncate_shrinks_and_extends() {
        let mut backing = MemoryBacking::from_bytes(b"abcdef".to_vec());
        backing.truncate(3).unwrap();
        assert_eq!(MemoryBacking::bytes(&backing), b"abc");
        backing.truncate(5).unwrap();
        assert_eq!(MemoryBacking::bytes(&backing), b"abc\0\0");
    }

    #[test]
    fn read_at_and_short_chunk() {
        let mut backing = MemoryBacking::from_bytes(b"0123456789".to_vec());
        let mut buf = [0u8; 3];
        backing.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"456");

        let mut tail = [0u8; 8];
        assert_eq!(backing.read_chunk(&mut tail).unwrap(), 3);
        assert_eq!(&tail[..3], b"789");
    }

    #[test]
    fn read_only_rejects_writes() {
        let mut backing = MemoryBacking::read_only(b"zip".to_vec());
        assert!(!backing.is_writable());
        assert!(backing.write_all(b"x").is_err());
        assert!(backing.truncate(0).is_err());
    }
}
