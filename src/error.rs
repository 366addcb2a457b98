// Error type shared by the codecs, the I/O layer and the orchestration helpers.
//
// Every variant maps onto one closed `ErrorKind` so callers can branch on the
// class of failure without matching individual variants.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error kind
// ---------------------------------------------------------------------------

/// Machine-readable class of a [`PatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// File open/read/write failures.
    Io,
    /// Bad magic, truncated header, records or metadata overrunning the buffer.
    Format,
    /// Declared size or CRC-32 mismatch (source, target or patch-self).
    Integrity,
    /// A computed cursor or offset fell outside its buffer during apply.
    Addressing,
    /// The caller asked for something the options do not permit.
    Argument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::Format => "format",
            Self::Integrity => "integrity",
            Self::Addressing => "addressing",
            Self::Argument => "argument",
        };
        f.write_str(name)
    }
}

/// Which of the three CRC-32 values failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumTarget {
    Source,
    Target,
    Patch,
}

impl fmt::Display for ChecksumTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
            Self::Patch => f.write_str("patch"),
        }
    }
}

// ---------------------------------------------------------------------------
// PatchError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("invalid patch format: {0}")]
    InvalidFormat(String),

    #[error("invalid patch header: {0}")]
    InvalidHeader(String),

    #[error("corrupted patch data: {0}")]
    Corrupted(String),

    #[error("unknown patch format")]
    UnknownFormat,

    #[error("source size mismatch: expected {expected}, got {actual}")]
    SourceSizeMismatch { expected: u64, actual: u64 },

    #[error("output size mismatch: expected {expected}, got {actual}")]
    TargetSizeMismatch { expected: u64, actual: u64 },

    #[error("{which} CRC32 mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch {
        which: ChecksumTarget,
        expected: u32,
        actual: u32,
    },

    #[error("invalid patch offset: {0}")]
    InvalidOffset(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl PatchError {
    /// The class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::FileNotFound(_) | Self::EmptyFile(_) => ErrorKind::Io,
            Self::InvalidFormat(_)
            | Self::InvalidHeader(_)
            | Self::Corrupted(_)
            | Self::UnknownFormat => ErrorKind::Format,
            Self::SourceSizeMismatch { .. }
            | Self::TargetSizeMismatch { .. }
            | Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::InvalidOffset(_) => ErrorKind::Addressing,
            Self::InvalidArgument(_) => ErrorKind::Argument,
        }
    }

    pub(crate) fn checksum(which: ChecksumTarget, expected: u32, actual: u32) -> Self {
        Self::ChecksumMismatch {
            which,
            expected,
            actual,
        }
    }
}

pub type Result<T, E = PatchError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
