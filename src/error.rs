//! Error types for cabinet parsing and extraction.

use thiserror::Error;

/// Result type for cabinet operations
pub type Result<T> = std::result::Result<T, Error>;

/// What was found where the archive signature should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Neither the cabinet magic nor a known sibling format
    Unknown(u32),
    /// A Microsoft cabinet ("MSCF"), which needs a different tool
    MicrosoftCabinet,
}

/// Why the deflate decoder gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateFailure {
    /// The compressed stream is corrupt
    DataError,
    /// The stream stalled or did not end where the framing said it would
    Incomplete,
}

/// Cabinet error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error unrelated to the archive format
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", describe_signature(.0))]
    BadSignature(Signature),

    /// A fixed-size structure runs past the end of its buffer
    #[error("Truncated {what}: need {needed} bytes at offset {offset}, only {available} available")]
    TruncatedHeader {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The two redundant file table sizes disagree (reported as a warning)
    #[error("File table sizes do not match: {first} vs {second}")]
    TableSizeMismatch { first: u32, second: u32 },

    #[error("Header declares no cabinet descriptor")]
    MissingCabDescriptor,

    /// A relative header offset of zero was resolved
    #[error("Offset {0:#x} does not point into the header")]
    InvalidOffset(u32),

    #[error("{what} index {index} is out of range, must be less than {count}")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("{what} count {count} exceeds the format limit of {max}")]
    TableOverflow {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("File {0} is marked invalid or has no data")]
    InvalidFile(usize),

    #[error("Failed to open volume {volume}: {reason}")]
    VolumeOpenFailure { volume: u32, reason: String },

    #[error("Compressed chunk length can't be zero")]
    ZeroLengthChunk,

    #[error("Could not find end of chunk in volume {volume}")]
    ChunkMarkerNotFound { volume: u32 },

    #[error("Decompression failed ({kind:?}): {message}")]
    DecompressionFailed {
        kind: InflateFailure,
        message: String,
    },

    #[error("Expanded size expected to be {expected}, but was {actual}")]
    SizeVerificationFailed { expected: u64, actual: u64 },

    #[error(
        "MD5 checksum mismatch: expected {}, got {}",
        hex::encode(expected),
        hex::encode(actual)
    )]
    ChecksumMismatch { expected: [u8; 16], actual: [u8; 16] },

    #[error("File {0} links back to itself through its predecessors")]
    LinkCycle(usize),
}

impl Error {
    /// True when a data error suggests the member uses the legacy chunk framing.
    pub fn hints_legacy_format(&self) -> bool {
        matches!(
            self,
            Error::DecompressionFailed {
                kind: InflateFailure::DataError,
                ..
            }
        )
    }
}

fn describe_signature(signature: &Signature) -> String {
    match signature {
        Signature::Unknown(found) => format!("Invalid file signature {found:#010x}"),
        Signature::MicrosoftCabinet => {
            "Found a Microsoft cabinet signature instead of an installer cabinet signature".into()
        }
    }
}
