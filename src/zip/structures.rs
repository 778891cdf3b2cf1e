//! Byte layouts of the four ZIP records and their encoders/decoders.
//!
//! Every integer is little-endian. Records with variable-length tails are
//! decoded in two steps: the fixed-size core is validated first, then the
//! caller-supplied `read_tail` continuation is asked for exactly as many bytes
//! as the core declares.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ArchiveError, Result};

/// General purpose flag: the entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag: sizes and checksum trail the payload in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: the entry name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Minimum "version needed to extract" that signals ZIP64 extensions.
pub const ZIP64_VERSION_NEEDED: u16 = 45;

/// Version needed for deflate, directories and plain stored entries.
pub const VERSION_NEEDED: u16 = 20;

/// Version made by: Unix host (upper byte 3), format version 2.1.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 21;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn put_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

fn tail<F>(read_tail: F, len: usize, record: &'static str) -> Result<Vec<u8>>
where
    F: FnOnce(usize) -> Result<Vec<u8>>,
{
    if len == 0 {
        return Ok(Vec::new());
    }
    let data = read_tail(len)?;
    if data.len() != len {
        return Err(ArchiveError::Malformed(record));
    }
    Ok(data)
}

/// Local File Header (LFH) - 30 bytes + name + extra field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIGNATURE: u32 = 0x0403_4b50;
    pub const SIZE: usize = 30;

    /// Decode the fixed core in `data`, then pull the name and extra field
    /// through `read_tail`.
    pub fn decode<F>(data: &[u8], read_tail: F) -> Result<Self>
    where
        F: FnOnce(usize) -> Result<Vec<u8>>,
    {
        if data.len() < Self::SIZE {
            return Err(ArchiveError::Malformed("local file header"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ArchiveError::Malformed("local file header"));
        }

        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;

        let mut variable = tail(
            read_tail,
            file_name_length + extra_field_length,
            "local file header",
        )?;
        let extra_field = variable.split_off(file_name_length);

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: variable,
            extra_field,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        put_u32(&mut buf, Self::SIGNATURE);
        put_u16(&mut buf, self.version_needed);
        put_u16(&mut buf, self.flags);
        put_u16(&mut buf, self.compression_method);
        put_u16(&mut buf, self.last_mod_time);
        put_u16(&mut buf, self.last_mod_date);
        put_u32(&mut buf, self.crc32);
        put_u32(&mut buf, self.compressed_size);
        put_u32(&mut buf, self.uncompressed_size);
        put_u16(&mut buf, self.file_name.len() as u16);
        put_u16(&mut buf, self.extra_field.len() as u16);
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&self.extra_field);
        buf
    }

    /// Size of the header including its variable-length tail.
    pub fn size(&self) -> u64 {
        (Self::SIZE + self.file_name.len() + self.extra_field.len()) as u64
    }
}

/// Data Descriptor - 12 bytes, or 16 with the optional signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub has_signature: bool,
}

impl DataDescriptor {
    pub const SIGNATURE: u32 = 0x0807_4b50;
    pub const SIZE: usize = 12;
    pub const SIGNED_SIZE: usize = 16;

    /// Decode a descriptor, tolerating one written without its signature.
    ///
    /// `data` holds up to 16 bytes read from the start of the record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ArchiveError::Malformed("data descriptor"));
        }

        let mut cursor = Cursor::new(data);
        let first = cursor.read_u32::<LittleEndian>()?;
        let has_signature = first == Self::SIGNATURE && data.len() >= Self::SIGNED_SIZE;
        if !has_signature {
            cursor.set_position(0);
        }

        Ok(Self {
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            has_signature,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIGNED_SIZE);
        if self.has_signature {
            put_u32(&mut buf, Self::SIGNATURE);
        }
        put_u32(&mut buf, self.crc32);
        put_u32(&mut buf, self.compressed_size);
        put_u32(&mut buf, self.uncompressed_size);
        buf
    }

    pub fn size(&self) -> u64 {
        if self.has_signature {
            Self::SIGNED_SIZE as u64
        } else {
            Self::SIZE as u64
        }
    }
}

/// Central Directory File Header (CDFH) - 46 bytes + name + extra + comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryRecord {
    pub const SIGNATURE: u32 = 0x0201_4b50;
    pub const SIZE: usize = 46;

    pub fn decode<F>(data: &[u8], read_tail: F) -> Result<Self>
    where
        F: FnOnce(usize) -> Result<Vec<u8>>,
    {
        if data.len() < Self::SIZE {
            return Err(ArchiveError::Malformed("central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ArchiveError::Malformed("central directory"));
        }

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attributes = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>()?;

        let mut file_name = tail(
            read_tail,
            file_name_length + extra_field_length + file_comment_length,
            "central directory",
        )?;
        let mut extra_field = file_name.split_off(file_name_length);
        let file_comment = extra_field.split_off(extra_field_length);

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            file_name,
            extra_field,
            file_comment,
        })
    }

    /// Build the central directory record describing `header`, stored at
    /// `local_header_offset`.
    pub fn for_local_header(
        header: &LocalFileHeader,
        local_header_offset: u32,
        external_attributes: u32,
    ) -> Self {
        Self {
            version_made_by: VERSION_MADE_BY,
            version_needed: header.version_needed,
            flags: header.flags,
            compression_method: header.compression_method,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes,
            local_header_offset,
            file_name: header.file_name.clone(),
            extra_field: header.extra_field.clone(),
            file_comment: Vec::new(),
        }
    }

    /// A copy of this record pointing at a local header moved to `offset`.
    pub fn relocated(&self, offset: u32) -> Self {
        Self {
            local_header_offset: offset,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        put_u32(&mut buf, Self::SIGNATURE);
        put_u16(&mut buf, self.version_made_by);
        put_u16(&mut buf, self.version_needed);
        put_u16(&mut buf, self.flags);
        put_u16(&mut buf, self.compression_method);
        put_u16(&mut buf, self.last_mod_time);
        put_u16(&mut buf, self.last_mod_date);
        put_u32(&mut buf, self.crc32);
        put_u32(&mut buf, self.compressed_size);
        put_u32(&mut buf, self.uncompressed_size);
        put_u16(&mut buf, self.file_name.len() as u16);
        put_u16(&mut buf, self.extra_field.len() as u16);
        put_u16(&mut buf, self.file_comment.len() as u16);
        put_u16(&mut buf, self.disk_number_start);
        put_u16(&mut buf, self.internal_attributes);
        put_u32(&mut buf, self.external_attributes);
        put_u32(&mut buf, self.local_header_offset);
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&self.extra_field);
        buf.extend_from_slice(&self.file_comment);
        buf
    }

    pub fn size(&self) -> u64 {
        (Self::SIZE + self.file_name.len() + self.extra_field.len() + self.file_comment.len()) as u64
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_zip64(&self) -> bool {
        (self.version_needed & 0xFF) >= ZIP64_VERSION_NEEDED
            || self.compressed_size == u32::MAX
            || self.uncompressed_size == u32::MAX
            || self.local_header_offset == u32::MAX
    }
}

/// End of Central Directory (EOCD) - 22 bytes + comment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIGNATURE_BYTES: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn decode<F>(data: &[u8], read_tail: F) -> Result<Self>
    where
        F: FnOnce(usize) -> Result<Vec<u8>>,
    {
        if data.len() < Self::SIZE {
            return Err(ArchiveError::Malformed("end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ArchiveError::Malformed("end of central directory"));
        }

        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        let comment = tail(read_tail, comment_len, "end of central directory")?;

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + self.comment.len());
        put_u32(&mut buf, Self::SIGNATURE);
        put_u16(&mut buf, self.disk_number);
        put_u16(&mut buf, self.disk_with_cd);
        put_u16(&mut buf, self.disk_entries);
        put_u16(&mut buf, self.total_entries);
        put_u32(&mut buf, self.cd_size);
        put_u32(&mut buf, self.cd_offset);
        put_u16(&mut buf, self.comment.len() as u16);
        buf.extend_from_slice(&self.comment);
        buf
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0
    }

    /// The record after appending one central directory record of
    /// `record_size` bytes, with the directory now starting at `cd_offset`.
    pub fn with_entry_added(&self, record_size: u64, cd_offset: u64) -> Result<Self> {
        let disk_entries = self
            .disk_entries
            .checked_add(1)
            .ok_or(ArchiveError::EntryCountOverflow)?;
        let total_entries = self
            .total_entries
            .checked_add(1)
            .ok_or(ArchiveError::EntryCountOverflow)?;
        let cd_size = u32::try_from(self.cd_size as u64 + record_size)
            .map_err(|_| ArchiveError::DirectorySizeOverflow)?;
        let cd_offset =
            u32::try_from(cd_offset).map_err(|_| ArchiveError::DirectoryOffsetOverflow)?;

        Ok(Self {
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            ..self.clone()
        })
    }
}
