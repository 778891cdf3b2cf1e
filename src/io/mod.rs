//! Seekable byte streams that an [`Archive`](crate::Archive) is stored in.
//!
//! Everything above this module talks to a [`Backing`]: a file on disk, a
//! growable in-memory buffer, or a read-only remote file fetched with HTTP
//! Range requests. All three expose the same read/write/seek/truncate surface.

mod http;
mod local;
mod memory;

pub use http::HttpBacking;
pub use local::FileBacking;
pub use memory::MemoryBacking;

use std::io::{self, Read, Seek, SeekFrom, Write};

/// A seekable, readable and (usually) writable byte stream.
///
/// Implementations are not synchronized. A backing is owned by exactly one
/// archive at a time.
pub trait Backing: Read + Write + Seek {
    /// Shrink or extend the stream to exactly `len` bytes.
    ///
    /// Extending fills the gap with zeros, like `ftruncate` on a POSIX file.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Whether writes and truncation are allowed.
    fn is_writable(&self) -> bool {
        true
    }

    /// Total length of the stream in bytes. The current position is preserved.
    fn size(&mut self) -> io::Result<u64> {
        let position = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if position != end {
            self.seek(SeekFrom::Start(position))?;
        }
        Ok(end)
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    /// Read up to `buf.len()` bytes from the current position, stopping early
    /// only at the end of the stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_full(self, buf)
    }

    /// Consume the backing and return its bytes, if it lives in memory.
    fn into_bytes(self: Box<Self>) -> Option<Vec<u8>> {
        None
    }
}

/// Read until `buf` is full or the reader is exhausted, returning the byte
/// count.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "backing is read-only")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most three bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn read_full_fills_across_short_reads() {
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut Trickle(b"0123456789"), &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"01234567");

        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut Trickle(b"abcde"), &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"abcde");
    }
}
