//! Sequential archive scanner.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, trace};

use super::error::{ArchiveError, ArchiveResult};
use super::header::{
    checksum_matches, join_prefix, next_header_offset, EntryKind, Header, UstarExtension,
    HEADER_SIZE,
};
use super::view::EntryView;

/// One entry produced by a parse.
///
/// Offsets are relative to the start of the parsed range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub link_name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub meta_offset: u64,
    pub data_offset: u64,
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
    pub checksum: u64,
    pub ustar: Option<UstarExtension>,
}

impl ArchiveEntry {
    fn from_header(header: Header, meta_offset: u64) -> Self {
        Self {
            name: header.name,
            link_name: header.link_name,
            kind: header.kind,
            size: header.size,
            meta_offset,
            data_offset: meta_offset + HEADER_SIZE as u64,
            mode: header.mode,
            uid: header.uid,
            gid: header.gid,
            mtime: header.mtime,
            checksum: header.checksum,
            ustar: header.ustar,
        }
    }

    /// Path prefix from the extended header, or empty.
    pub fn prefix(&self) -> &str {
        self.ustar.as_ref().map(|u| u.prefix.as_str()).unwrap_or("")
    }

    /// Lookup key: prefix joined with name.
    pub fn path(&self) -> String {
        join_prefix(self.prefix(), &self.name)
    }

    pub fn owner_name(&self) -> &str {
        self.ustar
            .as_ref()
            .map(|u| u.owner_name.as_str())
            .unwrap_or("")
    }

    pub fn group_name(&self) -> &str {
        self.ustar
            .as_ref()
            .map(|u| u.group_name.as_str())
            .unwrap_or("")
    }

    pub fn device_major(&self) -> u64 {
        self.ustar.as_ref().map(|u| u.device_major).unwrap_or(0)
    }

    pub fn device_minor(&self) -> u64 {
        self.ustar.as_ref().map(|u| u.device_minor).unwrap_or(0)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory || self.name.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File && !self.name.ends_with('/')
    }

    /// Offset of the header following this entry.
    pub fn next_header_offset(&self) -> u64 {
        next_header_offset(self.data_offset, self.size)
    }
}

/// Result of parsing a byte range as an archive.
///
/// Holds a handle to the parsed range, so every [`EntryView`] it issues
/// shares the caller's buffer rather than copying it.
///
/// # Example
///
/// ```
/// use content_loader::archive::{ArchiveBuilder, EntryKind, TarArchive};
///
/// let mut builder = ArchiveBuilder::new();
/// builder.append_file("a.txt", b"hello").unwrap();
/// let bytes = builder.finish();
///
/// let archive = TarArchive::parse(&[EntryKind::File], bytes).unwrap();
/// let entry = archive.entry_by_name("a.txt").unwrap();
/// assert_eq!(archive.data(entry).as_bytes(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct TarArchive {
    buffer: Bytes,
    entries: Vec<ArchiveEntry>,
    by_name: HashMap<String, usize>,
    skipped: usize,
}

impl TarArchive {
    /// Parse the whole buffer.
    pub fn parse(kinds: &[EntryKind], buffer: Bytes) -> ArchiveResult<Self> {
        let length = buffer.len();
        Self::parse_range(kinds, buffer, 0, length)
    }

    /// Parse `length` bytes starting at `offset`.
    ///
    /// Entries whose kind is not in `kinds` are still scanned so the offset
    /// advances correctly, but are not included. Headers with a bad checksum
    /// are skipped block by block; an entry whose payload runs past the end of
    /// the range stops the scan.
    pub fn parse_range(
        kinds: &[EntryKind],
        buffer: Bytes,
        offset: usize,
        length: usize,
    ) -> ArchiveResult<Self> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buffer.len())
            .ok_or(ArchiveError::RangeOutOfBounds {
                offset,
                length,
                buffer_len: buffer.len(),
            })?;
        let buffer = buffer.slice(offset..end);

        let mut entries = Vec::new();
        let mut by_name = HashMap::new();
        let mut skipped = 0usize;
        let mut position = 0usize;

        while position + HEADER_SIZE <= length {
            let block = &buffer[position..position + HEADER_SIZE];
            let Some(header) = Header::decode(block) else {
                break;
            };

            if header.is_end_of_archive() {
                trace!(offset = position, "end of archive");
                break;
            }

            if !checksum_matches(block, header.checksum) {
                debug!(offset = position, name = %header.name, "skipping header with bad checksum");
                skipped += 1;
                position += HEADER_SIZE;
                continue;
            }

            let entry = ArchiveEntry::from_header(header, position as u64);
            let next = entry.next_header_offset();
            if entry.data_offset + entry.size > length as u64 {
                debug!(
                    offset = position,
                    name = %entry.name,
                    size = entry.size,
                    "entry payload exceeds archive length"
                );
                skipped += 1;
                break;
            }

            if kinds.contains(&entry.kind) {
                by_name.insert(entry.path(), entries.len());
                entries.push(entry);
            }

            position = match usize::try_from(next) {
                Ok(next) => next,
                Err(_) => break,
            };
        }

        debug!(entries = entries.len(), skipped, "parsed archive");

        Ok(Self {
            buffer,
            entries,
            by_name,
            skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in traversal order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Number of malformed headers skipped during the scan.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&ArchiveEntry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    pub fn entry_by_index(&self, index: usize) -> Option<&ArchiveEntry> {
        self.entries.get(index)
    }

    pub fn is_directory(&self, entry: &ArchiveEntry) -> bool {
        entry.is_directory()
    }

    /// Payload view for an entry of this archive.
    pub fn data(&self, entry: &ArchiveEntry) -> EntryView {
        let start = entry.data_offset as usize;
        let end = start + entry.size as usize;
        EntryView::new(entry.path(), self.buffer.slice(start..end))
    }

    /// Payload view by name.
    pub fn data_by_name(&self, name: &str) -> ArchiveResult<EntryView> {
        self.entry_by_name(name)
            .map(|entry| self.data(entry))
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::builder::{ArchiveBuilder, HeaderFormat, HeaderFields};

    fn sample() -> Bytes {
        let mut builder = ArchiveBuilder::new();
        builder.append_directory("data/").unwrap();
        builder.append_file("data/a.txt", b"hello").unwrap();
        builder.append_file("b.bin", &[7u8; 700]).unwrap();
        builder.append_file("empty", b"").unwrap();
        builder.finish()
    }

    #[test]
    fn test_parse_files_in_order() {
        let archive = TarArchive::parse(&[EntryKind::File], sample()).unwrap();
        let names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["data/a.txt", "b.bin", "empty"]);
        assert_eq!(archive.skipped(), 0);
    }

    #[test]
    fn test_lookup_by_name_and_index() {
        let archive = TarArchive::parse(&EntryKind::STANDARD, sample()).unwrap();
        assert_eq!(archive.len(), 4);

        let dir = archive.entry_by_index(0).unwrap();
        assert!(archive.is_directory(dir));

        let b = archive.entry_by_name("b.bin").unwrap();
        assert_eq!(archive.entry_by_index(2), Some(b));
        assert_eq!(b.size, 700);
        assert_eq!(archive.data(b).len(), 700);
        assert!(archive.entry_by_name("missing").is_none());
    }

    #[test]
    fn test_offsets_follow_block_rounding() {
        let archive = TarArchive::parse(&[EntryKind::File], sample()).unwrap();
        let a = archive.entry_by_name("data/a.txt").unwrap();
        assert_eq!(a.meta_offset, 512);
        assert_eq!(a.data_offset, 1024);

        let b = archive.entry_by_name("b.bin").unwrap();
        assert_eq!(b.meta_offset, 1536);
        // 700 bytes occupy two blocks
        let empty = archive.entry_by_name("empty").unwrap();
        assert_eq!(empty.meta_offset, 1536 + 512 + 1024);
    }

    #[test]
    fn test_stops_at_sentinel_before_length() {
        let mut bytes = sample().to_vec();
        bytes.extend_from_slice(&[0xAB; 2048]);
        let archive = TarArchive::parse(&[EntryKind::File], Bytes::from(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_parse_range_with_offset() {
        let inner = sample();
        let mut bytes = vec![0xEEu8; 100];
        bytes.extend_from_slice(&inner);
        let archive =
            TarArchive::parse_range(&[EntryKind::File], Bytes::from(bytes), 100, inner.len())
                .unwrap();
        let a = archive.data_by_name("data/a.txt").unwrap();
        assert_eq!(a.as_bytes(), b"hello");
    }

    #[test]
    fn test_parse_range_out_of_bounds() {
        let err = TarArchive::parse_range(&[EntryKind::File], sample(), 10, usize::MAX).unwrap_err();
        assert!(matches!(err, ArchiveError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn test_bad_checksum_is_skipped() {
        let mut bytes = sample().to_vec();
        // corrupt the directory header's name without fixing the checksum
        bytes[0] = b'X';
        let archive = TarArchive::parse(&EntryKind::STANDARD, Bytes::from(bytes)).unwrap();
        assert_eq!(archive.skipped(), 1);
        assert!(archive.entry_by_name("data/a.txt").is_some());
    }

    #[test]
    fn test_truncated_payload_stops_scan() {
        let bytes = sample();
        let truncated = bytes.slice(0..1536 + 512 + 100);
        let archive = TarArchive::parse(&[EntryKind::File], truncated).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.skipped(), 1);
    }

    #[test]
    fn test_plain_and_ustar_headers() {
        let mut builder = ArchiveBuilder::new();
        builder
            .append_entry(
                &HeaderFields {
                    name: "plain.txt".into(),
                    format: HeaderFormat::Plain,
                    ..HeaderFields::default()
                },
                b"p",
            )
            .unwrap();
        builder
            .append_entry(
                &HeaderFields {
                    name: "file.txt".into(),
                    prefix: "nested/dir".into(),
                    owner_name: "alice".into(),
                    group_name: "staff".into(),
                    device_major: 3,
                    device_minor: 9,
                    ..HeaderFields::default()
                },
                b"u",
            )
            .unwrap();
        let archive = TarArchive::parse(&[EntryKind::File], builder.finish()).unwrap();

        let plain = archive.entry_by_name("plain.txt").unwrap();
        assert!(plain.ustar.is_none());
        assert_eq!(plain.owner_name(), "");
        assert_eq!(plain.device_major(), 0);

        let extended = archive.entry_by_name("nested/dir/file.txt").unwrap();
        assert_eq!(extended.owner_name(), "alice");
        assert_eq!(extended.group_name(), "staff");
        assert_eq!(extended.device_major(), 3);
        assert_eq!(extended.device_minor(), 9);
        assert_eq!(archive.data(extended).as_bytes(), b"u");
    }

    #[test]
    fn test_views_outlive_archive() {
        let view = {
            let archive = TarArchive::parse(&[EntryKind::File], sample()).unwrap();
            archive.data_by_name("data/a.txt").unwrap()
        };
        assert_eq!(view.to_str().unwrap(), "hello");
    }
}
