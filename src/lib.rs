//! # rezip
//!
//! A ZIP archive engine that reads, creates and updates archives in place.
//!
//! Archives live in a [`Backing`]: a local file, a growable in-memory buffer,
//! or a read-only remote file fetched with HTTP Range requests. Entries are
//! enumerated lazily from the central directory, extracted in bounded chunks,
//! appended without rewriting the rest of the archive, and removed by
//! rebuilding into a temporary archive that atomically replaces the original.
//!
//! ## Features
//!
//! - File, directory and symbolic link entries
//! - STORED and DEFLATE compression methods with CRC-32 checksums
//! - Cooperative cancellation and progress reporting through [`Progress`]
//! - Rollback of a cancelled or failed add, leaving the archive unchanged
//! - Extraction order that creates symlink dependencies first
//!
//! ## Example
//!
//! ```no_run
//! use rezip::{AddOptions, Archive, EntryType, ExtractOptions};
//!
//! fn main() -> rezip::Result<()> {
//!     let mut archive = Archive::in_memory()?;
//!
//!     let payload = b"hello";
//!     archive.add_entry("hello.txt", EntryType::File, 5, &AddOptions::default(), |pos, buf| {
//!         let start = pos as usize;
//!         let len = buf.len().min(payload.len() - start);
//!         buf[..len].copy_from_slice(&payload[start..start + len]);
//!         Ok(len)
//!     })?;
//!
//!     for entry in archive.entries() {
//!         let mut data = Vec::new();
//!         archive.extract(&entry, &ExtractOptions::default(), |chunk| {
//!             data.extend_from_slice(chunk);
//!             Ok(())
//!         })?;
//!         println!("{}: {} bytes", entry.path(), data.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod fs;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ArchiveError, Result};
pub use fs::{FileSystem, StdFileSystem};
pub use io::{Backing, FileBacking, HttpBacking, MemoryBacking};
pub use zip::{
    AccessMode, AddOptions, Archive, CompressionMethod, Entry, EntryType, ExtractOptions,
    Location, Progress,
};
