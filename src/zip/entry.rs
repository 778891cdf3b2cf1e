//! The entry model built from a central directory record, its local header
//! and an optional data descriptor.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

use crate::error::{ArchiveError, Result};

use super::structures::{
    CentralDirectoryRecord, CompressionMethod, DataDescriptor, FLAG_ENCRYPTED, FLAG_UTF8,
    LocalFileHeader, ZIP64_VERSION_NEEDED,
};

const HOST_UNIX: u16 = 3;
const HOST_OSX: u16 = 19;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Default permissions for entries that carry no Unix mode.
pub const DEFAULT_FILE_PERMISSIONS: u16 = 0o644;
pub const DEFAULT_DIRECTORY_PERMISSIONS: u16 = 0o755;
pub const DEFAULT_SYMLINK_PERMISSIONS: u16 = 0o755;

/// Kind of an archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    /// The `st_mode` file type bits for this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            EntryType::File => S_IFREG,
            EntryType::Directory => S_IFDIR,
            EntryType::Symlink => S_IFLNK,
        }
    }

    pub fn default_permissions(self) -> u16 {
        match self {
            EntryType::File => DEFAULT_FILE_PERMISSIONS,
            EntryType::Directory => DEFAULT_DIRECTORY_PERMISSIONS,
            EntryType::Symlink => DEFAULT_SYMLINK_PERMISSIONS,
        }
    }

    /// External attributes word for a Unix host entry with `permissions`.
    pub fn external_attributes(self, permissions: u16) -> u32 {
        (self.mode_bits() | (permissions as u32 & 0o7777)) << 16
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::File => write!(f, "file"),
            EntryType::Directory => write!(f, "directory"),
            EntryType::Symlink => write!(f, "symlink"),
        }
    }
}

/// Snapshot of one archive member, taken at enumeration time.
///
/// Sizes and checksum come from the data descriptor when the entry has one,
/// otherwise from the central directory record.
#[derive(Debug, Clone)]
pub struct Entry {
    central: CentralDirectoryRecord,
    local: LocalFileHeader,
    descriptor: Option<DataDescriptor>,
    path: String,
}

impl Entry {
    /// Assemble an entry. ZIP64 and encrypted members are refused.
    pub fn new(
        central: CentralDirectoryRecord,
        local: LocalFileHeader,
        descriptor: Option<DataDescriptor>,
    ) -> Result<Self> {
        if central.is_zip64() || (local.version_needed & 0xFF) >= ZIP64_VERSION_NEEDED {
            return Err(ArchiveError::UnsupportedEntry("zip64"));
        }
        if central.is_encrypted() || local.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::UnsupportedEntry("encrypted"));
        }

        let path = decode_name(&central.file_name, central.flags & FLAG_UTF8 != 0);
        Ok(Self {
            central,
            local,
            descriptor,
            path,
        })
    }

    /// Entry path as stored in the archive, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entry_type(&self) -> EntryType {
        let host = self.central.version_made_by >> 8;
        if host == HOST_UNIX || host == HOST_OSX {
            match (self.central.external_attributes >> 16) & S_IFMT {
                S_IFDIR => return EntryType::Directory,
                S_IFLNK => return EntryType::Symlink,
                S_IFREG => return EntryType::File,
                _ => {}
            }
        }
        if self.path.ends_with('/') {
            EntryType::Directory
        } else {
            EntryType::File
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type() == EntryType::Symlink
    }

    pub fn checksum(&self) -> u32 {
        self.descriptor
            .map_or(self.central.crc32, |descriptor| descriptor.crc32)
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.central.compression_method)
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_method() != CompressionMethod::Stored
    }

    pub fn compressed_size(&self) -> u64 {
        self.descriptor
            .map_or(self.central.compressed_size, |descriptor| descriptor.compressed_size)
            as u64
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.descriptor
            .map_or(self.central.uncompressed_size, |descriptor| {
                descriptor.uncompressed_size
            }) as u64
    }

    /// Offset of the local file header from the start of the archive.
    pub fn header_offset(&self) -> u64 {
        self.central.local_header_offset as u64
    }

    /// Offset of the first payload byte.
    pub fn data_offset(&self) -> u64 {
        self.header_offset() + self.local.size()
    }

    /// Bytes occupied in the archive body: local header, payload and data
    /// descriptor.
    pub fn local_size(&self) -> u64 {
        self.local.size()
            + self.compressed_size()
            + self.descriptor.map_or(0, |descriptor| descriptor.size())
    }

    /// Unix permission bits, or the type default when the entry has none.
    pub fn permissions(&self) -> u16 {
        let host = self.central.version_made_by >> 8;
        let mode = ((self.central.external_attributes >> 16) & 0o7777) as u16;
        if (host == HOST_UNIX || host == HOST_OSX) && mode != 0 {
            mode
        } else {
            self.entry_type().default_permissions()
        }
    }

    /// Modification time as stored (DOS date/time, local time, 2 second
    /// resolution).
    pub fn modified(&self) -> NaiveDateTime {
        from_dos(self.central.last_mod_date, self.central.last_mod_time)
    }

    pub fn central_directory(&self) -> &CentralDirectoryRecord {
        &self.central
    }

    pub fn local_header(&self) -> &LocalFileHeader {
        &self.local
    }

    pub fn data_descriptor(&self) -> Option<&DataDescriptor> {
        self.descriptor.as_ref()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.checksum() == other.checksum()
            && self.header_offset() == other.header_offset()
    }
}

impl Eq for Entry {}

/// Decode an entry name. Names flagged as UTF-8, and names that happen to be
/// valid UTF-8, are taken as is; everything else is code page 437.
pub fn decode_name(bytes: &[u8], utf8: bool) -> String {
    match std::str::from_utf8(bytes) {
        Ok(name) => name.to_owned(),
        Err(_) if utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => bytes.iter().map(|&b| cp437_char(b)).collect(),
    }
}

fn cp437_char(byte: u8) -> char {
    #[rustfmt::skip]
    const HIGH: [char; 128] = [
        'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
        'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
        'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
        '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
        '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
        '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
        'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
        '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
    ];

    if byte < 0x80 {
        byte as char
    } else {
        HIGH[(byte - 0x80) as usize]
    }
}

/// Decode a DOS date/time pair. Out-of-range fields fall back to
/// 1980-01-01 00:00:00.
pub fn from_dos(date: u16, time: u16) -> NaiveDateTime {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .or_else(dos_epoch)
        .unwrap_or_default()
}

fn dos_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1980, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// Encode a timestamp as a DOS `(date, time)` pair, clamped to 1980..=2107.
pub fn to_dos(datetime: NaiveDateTime) -> (u16, u16) {
    let year = datetime.year().clamp(1980, 2107) as u16;
    let date = ((year - 1980) << 9) | ((datetime.month() as u16) << 5) | datetime.day() as u16;
    let time = ((datetime.hour() as u16) << 11)
        | ((datetime.minute() as u16) << 5)
        | (datetime.second() as u16 / 2);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::{VERSION_MADE_BY, VERSION_NEEDED};

    fn records(
        name: &[u8],
        made_by: u16,
        external: u32,
    ) -> (CentralDirectoryRecord, LocalFileHeader) {
        let local = LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: 0,
            compression_method: 8,
            last_mod_time: 0,
            last_mod_date: 0x21,
            crc32: 7,
            compressed_size: 5,
            uncompressed_size: 9,
            file_name: name.to_vec(),
            extra_field: Vec::new(),
        };
        let mut central = CentralDirectoryRecord::for_local_header(&local, 100, external);
        central.version_made_by = made_by;
        (central, local)
    }

    #[test]
    fn unix_mode_decides_type() {
        let external = EntryType::Symlink.external_attributes(0o777);
        let (central, local) = records(b"link", VERSION_MADE_BY, external);
        let entry = Entry::new(central, local, None).unwrap();
        assert_eq!(entry.entry_type(), EntryType::Symlink);
        assert_eq!(entry.permissions(), 0o777);
    }

    #[test]
    fn trailing_slash_marks_directory_for_dos_hosts() {
        let (central, local) = records(b"dir/", 20, 0x10);
        let entry = Entry::new(central, local, None).unwrap();
        assert_eq!(entry.entry_type(), EntryType::Directory);
        assert_eq!(entry.permissions(), DEFAULT_DIRECTORY_PERMISSIONS);
    }

    #[test]
    fn descriptor_values_win() {
        let (central, local) = records(b"a.txt", VERSION_MADE_BY, 0);
        let descriptor = DataDescriptor {
            crc32: 42,
            compressed_size: 11,
            uncompressed_size: 22,
            has_signature: true,
        };
        let entry = Entry::new(central, local, Some(descriptor)).unwrap();
        assert_eq!(entry.checksum(), 42);
        assert_eq!(entry.compressed_size(), 11);
        assert_eq!(entry.uncompressed_size(), 22);
        assert_eq!(entry.data_offset(), 100 + 30 + 5);
        assert_eq!(entry.local_size(), 30 + 5 + 11 + 16);
    }

    #[test]
    fn zip64_and_encrypted_are_refused() {
        let (mut central, local) = records(b"big", VERSION_MADE_BY, 0);
        central.uncompressed_size = u32::MAX;
        assert!(matches!(
            Entry::new(central, local, None),
            Err(ArchiveError::UnsupportedEntry("zip64"))
        ));

        let (mut central, local) = records(b"secret", VERSION_MADE_BY, 0);
        central.flags |= FLAG_ENCRYPTED;
        assert!(matches!(
            Entry::new(central, local, None),
            Err(ArchiveError::UnsupportedEntry("encrypted"))
        ));
    }

    #[test]
    fn equality_uses_path_checksum_and_offset() {
        let (central, local) = records(b"same", VERSION_MADE_BY, 0);
        let a = Entry::new(central.clone(), local.clone(), None).unwrap();
        let b = Entry::new(central.relocated(200), local, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn cp437_names() {
        assert_eq!(decode_name(b"plain.txt", false), "plain.txt");
        assert_eq!(decode_name(&[0x80, b'a', 0xE1], false), "Çaß");
        assert_eq!(decode_name("größe".as_bytes(), true), "größe");
    }

    #[test]
    fn dos_time_conversion() {
        let datetime = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_opt(13, 37, 42))
            .unwrap();
        let (date, time) = to_dos(datetime);
        assert_eq!(from_dos(date, time), datetime);

        let odd = NaiveDate::from_ymd_opt(2001, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 59))
            .unwrap();
        let (date, time) = to_dos(odd);
        assert_eq!(from_dos(date, time).second(), 58);

        assert_eq!(from_dos(0, 0).year(), 1980);
    }
}
