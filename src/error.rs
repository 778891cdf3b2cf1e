use thiserror::Error;

/// Errors produced by the archive engine.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No end of central directory record was found near the end of the stream.
    #[error("unreadable archive")]
    UnreadableArchive,

    /// A record signature did not match, or one of its variable-length
    /// fields could not be read in full.
    #[error("malformed {0} record")]
    Malformed(&'static str),

    #[error("unsupported compression method: {0}")]
    UnsupportedCompressionMethod(u16),

    /// ZIP64 and encrypted entries are rejected, never emulated.
    #[error("unsupported entry: {0}")]
    UnsupportedEntry(&'static str),

    /// The deflate stream could not be encoded or decoded.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("invalid symlink destination: {0}")]
    InvalidSymlinkDestination(String),

    #[error("invalid entry path: {0}")]
    InvalidEntryPath(String),

    #[error("entry count overflow")]
    EntryCountOverflow,

    #[error("directory offset overflow")]
    DirectoryOffsetOverflow,

    #[error("directory size overflow")]
    DirectorySizeOverflow,

    #[error("entry too large")]
    EntryTooLarge,

    #[error("operation cancelled")]
    Cancelled,

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("archive is read-only")]
    ReadOnly,

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ArchiveError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
