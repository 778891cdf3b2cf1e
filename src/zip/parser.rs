//! Directory index: locating the end of central directory record and walking
//! the central directory.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) near the end of the stream
//! 2. Walk the Central Directory one record at a time from its offset
//! 3. For each record, read the matching Local File Header (and its data
//!    descriptor when bit 3 is set)
//!
//! Only the tail of the stream and the directory itself are read to list an
//! archive, which keeps remote archives cheap to enumerate.

use std::cell::RefCell;

use crate::error::{ArchiveError, Result};
use crate::io::Backing;

use super::entry::Entry;
use super::structures::*;

/// Size of the window searched for the EOCD signature. Covers the fixed
/// record plus the largest possible comment.
pub const EOCD_SEARCH_WINDOW: u64 = 66_000;

/// Low-level ZIP record reader over a borrowed backing.
pub struct ZipParser<'a> {
    backing: &'a mut dyn Backing,
    size: u64,
}

impl<'a> ZipParser<'a> {
    pub fn new(backing: &'a mut dyn Backing) -> Result<Self> {
        let size = backing.size()?;
        Ok(Self { backing, size })
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Scans the last [`EOCD_SEARCH_WINDOW`] bytes backwards, so the match
    /// closest to the end of the stream wins. A candidate whose declared
    /// comment runs past the end of the stream is ignored.
    ///
    /// Returns the record and its offset in the stream.
    pub fn find_eocd(&mut self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(ArchiveError::UnreadableArchive);
        }

        let search_size = EOCD_SEARCH_WINDOW.min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.backing.read_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE_BYTES {
                continue;
            }

            let comment_start = i + EndOfCentralDirectory::SIZE;
            let candidate = EndOfCentralDirectory::decode(&buf[i..], |len| {
                buf.get(comment_start..comment_start + len)
                    .map(<[u8]>::to_vec)
                    .ok_or(ArchiveError::Malformed("end of central directory"))
            });

            match candidate {
                Ok(eocd) => {
                    let offset = search_start + i as u64;
                    tracing::debug!(
                        offset,
                        entries = eocd.total_entries,
                        cd_offset = eocd.cd_offset,
                        cd_size = eocd.cd_size,
                        "found end of central directory"
                    );
                    return Ok((eocd, offset));
                }
                Err(ArchiveError::Malformed(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(ArchiveError::UnreadableArchive)
    }

    /// Read the central directory record at `offset`.
    pub fn read_cdfh(&mut self, offset: u64) -> Result<CentralDirectoryRecord> {
        let mut core = [0u8; CentralDirectoryRecord::SIZE];
        self.read_record(offset, &mut core, "central directory")?;
        CentralDirectoryRecord::decode(&core, |len| {
            self.read_tail(offset + CentralDirectoryRecord::SIZE as u64, len, "central directory")
        })
    }

    /// Read the local file header at `offset`.
    pub fn read_lfh(&mut self, offset: u64) -> Result<LocalFileHeader> {
        let mut core = [0u8; LocalFileHeader::SIZE];
        self.read_record(offset, &mut core, "local file header")?;
        LocalFileHeader::decode(&core, |len| {
            self.read_tail(offset + LocalFileHeader::SIZE as u64, len, "local file header")
        })
    }

    /// Read the data descriptor starting at `offset`.
    pub fn read_data_descriptor(&mut self, offset: u64) -> Result<DataDescriptor> {
        let available = self.size.saturating_sub(offset);
        let len = (DataDescriptor::SIGNED_SIZE as u64).min(available) as usize;
        if len < DataDescriptor::SIZE {
            return Err(ArchiveError::Malformed("data descriptor"));
        }
        let mut buf = vec![0u8; len];
        self.backing.read_at(offset, &mut buf)?;
        DataDescriptor::decode(&buf)
    }

    /// Build the entry described by the central directory record `central`.
    pub fn read_entry(&mut self, central: CentralDirectoryRecord) -> Result<Entry> {
        let header_offset = central.local_header_offset as u64;
        let local = self.read_lfh(header_offset)?;

        let descriptor = if central.uses_data_descriptor() {
            let descriptor_offset =
                header_offset + local.size() + central.compressed_size as u64;
            Some(self.read_data_descriptor(descriptor_offset)?)
        } else {
            None
        };

        Entry::new(central, local, descriptor)
    }

    fn read_record(&mut self, offset: u64, core: &mut [u8], record: &'static str) -> Result<()> {
        if offset.checked_add(core.len() as u64).is_none_or(|end| end > self.size) {
            return Err(ArchiveError::Malformed(record));
        }
        self.backing.read_at(offset, core)?;
        Ok(())
    }

    fn read_tail(&mut self, offset: u64, len: usize, record: &'static str) -> Result<Vec<u8>> {
        if offset + len as u64 > self.size {
            return Err(ArchiveError::Malformed(record));
        }
        let mut buf = vec![0u8; len];
        self.backing.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Lazy walk over the central directory.
///
/// Each step decodes one central directory record, then its local header and
/// optional data descriptor. Entries that cannot be built (ZIP64, encrypted,
/// unreadable local header) are skipped. A central directory record that
/// cannot be decoded ends the walk, since the position of the next one is
/// unknown.
pub struct Entries<'a> {
    backing: &'a RefCell<Box<dyn Backing>>,
    offset: u64,
    remaining: u16,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(
        backing: &'a RefCell<Box<dyn Backing>>,
        eocd: &EndOfCentralDirectory,
    ) -> Self {
        Self {
            backing,
            offset: eocd.cd_offset as u64,
            remaining: eocd.total_entries,
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.remaining == 0 {
            return None;
        }

        let mut backing = self.backing.borrow_mut();
        let mut parser = match ZipParser::new(&mut **backing) {
            Ok(parser) => parser,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read archive size");
                self.remaining = 0;
                return None;
            }
        };

        while self.remaining > 0 {
            self.remaining -= 1;

            let central = match parser.read_cdfh(self.offset) {
                Ok(central) => central,
                Err(e) => {
                    tracing::warn!(offset = self.offset, error = %e, "stopping directory walk");
                    self.remaining = 0;
                    return None;
                }
            };
            self.offset += central.size();

            let name = String::from_utf8_lossy(&central.file_name).into_owned();
            match parser.read_entry(central) {
                Ok(entry) => return Some(entry),
                Err(e) => tracing::warn!(entry = %name, error = %e, "skipping entry"),
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
