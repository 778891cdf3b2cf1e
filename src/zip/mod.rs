//! ZIP archive reading, extraction and in-place modification.
//!
//! ## Architecture
//!
//! - [`structures`]: byte layouts of the four ZIP records
//! - [`compression`]: chunked deflate/inflate with CRC-32 accumulation
//! - [`parser`]: locating the end of central directory and walking the directory
//! - [`Archive`]: the façade owning one backing stream, with extraction in
//!   `extractor` and mutation in `writer`
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and (possibly compressed) data for each entry
//! 2. Central Directory with metadata for all entries
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Appending an entry overwrites the Central Directory with the new local
//! header and payload, then writes the directory again behind it. Nothing
//! before the old directory is ever touched.
//!
//! ## Limitations
//!
//! - No ZIP64 extensions
//! - No encryption support
//! - No multi-disk archive support
//! - Only STORED and DEFLATE compression methods

mod archive;
pub mod compression;
mod entry;
mod extractor;
pub mod parser;
mod progress;
pub mod structures;
mod writer;

pub use archive::{AccessMode, Archive, Location};
pub use entry::{
    DEFAULT_DIRECTORY_PERMISSIONS, DEFAULT_FILE_PERMISSIONS, DEFAULT_SYMLINK_PERMISSIONS, Entry,
    EntryType, decode_name, from_dos, to_dos,
};
pub use extractor::{ExtractOptions, entry_relative_path};
pub use parser::{Entries, ZipParser};
pub use progress::Progress;
pub use structures::*;
pub use writer::AddOptions;
