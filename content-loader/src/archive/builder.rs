//! Archive writer.
//!
//! Produces archives the reader understands: one header block per entry,
//! payloads padded to the block size, and two zero blocks at the end. Used to
//! publish packages and to build fixtures in tests.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{ArchiveError, ArchiveResult};
use super::header::{
    compute_checksum, EntryKind, BLOCK_SIZE, CHECKSUM, DEVICE_MAJOR, DEVICE_MINOR, GID, GROUP,
    HEADER_SIZE, LINK_NAME, MAGIC, MODE, MTIME, NAME, OWNER, PREFIX, SIZE, TYPE_FLAG, UID,
    USTAR_MAGIC, VERSION,
};

/// Header layout to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderFormat {
    /// Extended header with magic, owner/group names, device numbers and prefix.
    #[default]
    Ustar,
    /// Common fields only; the extended area stays zeroed.
    Plain,
}

/// Header fields for [`ArchiveBuilder::append_entry`].
///
/// The size field is taken from the payload.
#[derive(Debug, Clone)]
pub struct HeaderFields {
    pub name: String,
    pub prefix: String,
    pub link_name: String,
    pub kind: EntryKind,
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
    pub owner_name: String,
    pub group_name: String,
    pub device_major: u64,
    pub device_minor: u64,
    pub format: HeaderFormat,
}

impl Default for HeaderFields {
    fn default() -> Self {
        Self {
            name: String::new(),
            prefix: String::new(),
            link_name: String::new(),
            kind: EntryKind::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            owner_name: String::new(),
            group_name: String::new(),
            device_major: 0,
            device_minor: 0,
            format: HeaderFormat::Ustar,
        }
    }
}

/// Incremental archive writer.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    buffer: BytesMut,
    entries: usize,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append a regular file with default metadata.
    pub fn append_file(&mut self, name: &str, data: &[u8]) -> ArchiveResult<()> {
        self.append_entry(
            &HeaderFields {
                name: name.to_string(),
                ..HeaderFields::default()
            },
            data,
        )
    }

    /// Append a directory record. A trailing `/` is added if missing.
    pub fn append_directory(&mut self, name: &str) -> ArchiveResult<()> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{}/", name)
        };
        self.append_entry(
            &HeaderFields {
                name,
                kind: EntryKind::Directory,
                mode: 0o755,
                ..HeaderFields::default()
            },
            &[],
        )
    }

    /// Append an entry with explicit header fields.
    pub fn append_entry(&mut self, fields: &HeaderFields, data: &[u8]) -> ArchiveResult<()> {
        let header = encode_header(fields, data.len() as u64)?;
        self.buffer.put_slice(&header);
        self.buffer.put_slice(data);

        let padding = (BLOCK_SIZE - data.len() % BLOCK_SIZE) % BLOCK_SIZE;
        self.buffer.put_bytes(0, padding);
        self.entries += 1;
        Ok(())
    }

    /// Write the two terminating zero blocks and return the archive.
    pub fn finish(mut self) -> Bytes {
        self.buffer.put_bytes(0, BLOCK_SIZE * 2);
        self.buffer.freeze()
    }
}

fn encode_header(fields: &HeaderFields, size: u64) -> ArchiveResult<[u8; HEADER_SIZE]> {
    let mut block = [0u8; HEADER_SIZE];

    write_string(&mut block, NAME, &fields.name)?;
    write_octal(&mut block, MODE, "mode", fields.mode)?;
    write_octal(&mut block, UID, "uid", fields.uid)?;
    write_octal(&mut block, GID, "gid", fields.gid)?;
    write_octal(&mut block, SIZE, "size", size)?;
    write_octal(&mut block, MTIME, "mtime", fields.mtime)?;
    block[TYPE_FLAG] = fields.kind.type_flag();
    write_string(&mut block, LINK_NAME, &fields.link_name)?;

    if fields.format == HeaderFormat::Ustar {
        block[MAGIC.0..MAGIC.0 + MAGIC.1].copy_from_slice(USTAR_MAGIC);
        block[VERSION.0..VERSION.0 + VERSION.1].copy_from_slice(b"00");
        write_string(&mut block, OWNER, &fields.owner_name)?;
        write_string(&mut block, GROUP, &fields.group_name)?;
        write_octal(&mut block, DEVICE_MAJOR, "devmajor", fields.device_major)?;
        write_octal(&mut block, DEVICE_MINOR, "devminor", fields.device_minor)?;
        write_string(&mut block, PREFIX, &fields.prefix)?;
    }

    let checksum = compute_checksum(&block);
    let text = format!("{:06o}\0 ", checksum);
    block[CHECKSUM.0..CHECKSUM.0 + CHECKSUM.1].copy_from_slice(text.as_bytes());

    Ok(block)
}

fn write_string(
    block: &mut [u8; HEADER_SIZE],
    (offset, width): (usize, usize),
    value: &str,
) -> ArchiveResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(ArchiveError::NameTooLong(value.to_string()));
    }
    block[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn write_octal(
    block: &mut [u8; HEADER_SIZE],
    (offset, width): (usize, usize),
    field: &'static str,
    value: u64,
) -> ArchiveResult<()> {
    let digits = width - 1;
    let text = format!("{:0digits$o}\0", value, digits = digits);
    if text.len() != width {
        return Err(ArchiveError::FieldOverflow {
            field,
            value,
            width,
        });
    }
    block[offset..offset + width].copy_from_slice(text.as_bytes());
    Ok(())
}
