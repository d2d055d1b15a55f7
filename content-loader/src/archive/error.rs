//! Error types for archive decoding and building.

use thiserror::Error;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that can occur while reading or writing tape archives.
///
/// Malformed headers encountered while scanning are not errors: the reader
/// skips them and keeps a count (see [`TarArchive::skipped`]).
///
/// [`TarArchive::skipped`]: super::TarArchive::skipped
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The requested byte range does not lie within the buffer.
    #[error("archive range {offset}+{length} exceeds buffer of {buffer_len} bytes")]
    RangeOutOfBounds {
        offset: usize,
        length: usize,
        buffer_len: usize,
    },

    /// No entry with the given path exists in the archive.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Entry payload is not valid UTF-8.
    #[error("entry {name} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        name: String,
        source: std::str::Utf8Error,
    },

    /// Entry payload could not be decoded as JSON.
    #[error("entry {name} is not valid JSON: {source}")]
    InvalidJson {
        name: String,
        source: serde_json::Error,
    },

    /// A name does not fit in the fixed-width header fields.
    #[error("name too long for archive header: {0}")]
    NameTooLong(String),

    /// A numeric value does not fit in its octal header field.
    #[error("value {value} does not fit in {width}-byte field {field}")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        width: usize,
    },
}
