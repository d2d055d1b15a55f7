//! Tape-archive decoding.
//!
//! Packages are delivered as archives made of 512-byte header blocks, each
//! followed by a payload padded to the block size. This module provides:
//!
//! - [`TarArchive`]: a single-pass scanner that records every entry and
//!   builds a name index
//! - [`EntryView`]: zero-copy payload views with typed little-endian readers
//! - [`ArchiveBuilder`]: a writer producing the same format
//!
//! # Architecture
//!
//! ```text
//! Bytes ──► TarArchive::parse ──► Vec<ArchiveEntry> + name index
//!                 │
//!                 └──► data(entry) ──► EntryView (slice of the same Bytes)
//! ```
//!
//! Malformed headers do not abort a parse. A header with a bad checksum is
//! skipped one block at a time, and a payload that runs past the end of the
//! range ends the scan; both are counted in [`TarArchive::skipped`].

mod builder;
mod error;
mod header;
mod reader;
mod view;

pub use builder::{ArchiveBuilder, HeaderFormat, HeaderFields};
pub use error::{ArchiveError, ArchiveResult};
pub use header::{
    next_header_offset, read_octal, read_string, EntryKind, Header, UstarExtension, BLOCK_SIZE,
    HEADER_SIZE, USTAR_MAGIC,
};
pub use reader::{ArchiveEntry, TarArchive};
pub use view::{EntryView, LeScalar, ScalarView};
