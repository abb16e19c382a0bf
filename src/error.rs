use thiserror::Error;

/// Result type alias for D64 operations
pub type Result<T> = std::result::Result<T, D64Error>;

/// Errors that can occur when working with D64 images
#[derive(Debug, Error)]
pub enum D64Error {
    /// Track number outside the disk geometry
    #[error("Invalid track {track} (valid range 1-{max})")]
    InvalidTrack {
        /// Track number
        track: u8,
        /// Highest valid track number
        max: u8,
    },

    /// Sector number out of range for its track
    #[error("Invalid sector {sector} on track {track} (max: {max})")]
    InvalidAddress {
        /// Track number
        track: u8,
        /// Sector number
        sector: u8,
        /// Highest valid sector number on this track
        max: u8,
    },

    /// Image buffer length does not match any known disk layout
    #[error("Invalid image size {size} bytes: not a recognized disk layout")]
    InvalidImageSize {
        /// Buffer length in bytes
        size: usize,
    },

    /// Block chain is self-referencing or longer than the disk
    #[error("Corrupt chain at track {track}, sector {sector}: {reason}")]
    CorruptChain {
        /// Track of the offending block
        track: u8,
        /// Sector of the offending block
        sector: u8,
        /// What went wrong
        reason: String,
    },

    /// A data size was requested from a block that is not the last in its chain
    #[error("Block at track {track}, sector {sector} is not the final block of a chain")]
    NotFinal {
        /// Track number
        track: u8,
        /// Sector number
        sector: u8,
    },

    /// Disk is full, no free block available
    #[error("Disk full: no free block available")]
    DiskFull,

    /// File not found in the directory
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A file with this name already exists
    #[error("File already exists: {0}")]
    FileExists(String),

    /// The file's locked flag is set, refusing deletion
    #[error("File is locked: {0}")]
    FileLocked(String),

    /// Filename is too long or not representable in PETSCII
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
}

impl D64Error {
    /// Create a corrupt chain error with context
    pub fn corrupt_chain<S: Into<String>>(track: u8, sector: u8, reason: S) -> Self {
        D64Error::CorruptChain {
            track,
            sector,
            reason: reason.into(),
        }
    }

    /// Create an invalid filename error
    pub fn invalid_filename<S: Into<String>>(message: S) -> Self {
        D64Error::InvalidFilename(message.into())
    }
}

/// Non-fatal findings surfaced alongside successful results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The chain length of a file disagrees with its directory entry
    BlockCountMismatch {
        /// Block count recorded in the directory entry
        recorded: u16,
        /// Block count measured by walking the chain
        actual: u16,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::BlockCountMismatch { recorded, actual } => write!(
                f,
                "Directory records {} blocks but the chain contains {}",
                recorded, actual
            ),
        }
    }
}
