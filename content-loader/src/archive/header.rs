//! Fixed-layout header blocks.
//!
//! Every archive record starts with a 512-byte header. The first 257 bytes
//! are common to all variants; the remaining fields are only meaningful when
//! the 6-byte magic at offset 257 equals [`USTAR_MAGIC`].
//!
//! ```text
//! offset  size  field
//!      0   100  name
//!    100     8  mode        (octal)
//!    108     8  uid         (octal)
//!    116     8  gid         (octal)
//!    124    12  size        (octal)
//!    136    12  mtime       (octal)
//!    148     8  checksum    (octal)
//!    156     1  type flag
//!    157   100  link name
//!    257     6  magic       "ustar\0"
//!    263     2  version     (octal)
//!    265    32  owner name
//!    297    32  group name
//!    329     8  device major (octal)
//!    337     8  device minor (octal)
//!    345   155  path prefix
//! ```

/// Size of a header block and the unit payloads are padded to.
pub const BLOCK_SIZE: usize = 512;

/// Size of a header record.
pub const HEADER_SIZE: usize = 512;

/// Magic literal that enables the extended header fields.
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

pub(crate) const NAME: (usize, usize) = (0, 100);
pub(crate) const MODE: (usize, usize) = (100, 8);
pub(crate) const UID: (usize, usize) = (108, 8);
pub(crate) const GID: (usize, usize) = (116, 8);
pub(crate) const SIZE: (usize, usize) = (124, 12);
pub(crate) const MTIME: (usize, usize) = (136, 12);
pub(crate) const CHECKSUM: (usize, usize) = (148, 8);
pub(crate) const TYPE_FLAG: usize = 156;
pub(crate) const LINK_NAME: (usize, usize) = (157, 100);
pub(crate) const MAGIC: (usize, usize) = (257, 6);
pub(crate) const VERSION: (usize, usize) = (263, 2);
pub(crate) const OWNER: (usize, usize) = (265, 32);
pub(crate) const GROUP: (usize, usize) = (297, 32);
pub(crate) const DEVICE_MAJOR: (usize, usize) = (329, 8);
pub(crate) const DEVICE_MINOR: (usize, usize) = (337, 8);
pub(crate) const PREFIX: (usize, usize) = (345, 155);

/// Kind of record described by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file (`'0'`, NUL, or contiguous file `'7'`).
    File,
    /// Hard link (`'1'`).
    HardLink,
    /// Symbolic link (`'2'`).
    SymLink,
    /// Character device (`'3'`).
    Char,
    /// Block device (`'4'`).
    Block,
    /// Directory (`'5'`).
    Directory,
    /// Named pipe (`'6'`).
    Fifo,
    /// Any other type flag (pax or GNU extension records).
    Other(u8),
}

impl EntryKind {
    /// The seven standard kinds.
    pub const STANDARD: [EntryKind; 7] = [
        EntryKind::File,
        EntryKind::HardLink,
        EntryKind::SymLink,
        EntryKind::Char,
        EntryKind::Block,
        EntryKind::Directory,
        EntryKind::Fifo,
    ];

    /// Decode a single-byte type flag.
    pub fn from_type_flag(flag: u8) -> Self {
        match flag {
            b'0' | 0 | b'7' => EntryKind::File,
            b'1' => EntryKind::HardLink,
            b'2' => EntryKind::SymLink,
            b'3' => EntryKind::Char,
            b'4' => EntryKind::Block,
            b'5' => EntryKind::Directory,
            b'6' => EntryKind::Fifo,
            other => EntryKind::Other(other),
        }
    }

    /// Encode as a single-byte type flag.
    pub fn type_flag(self) -> u8 {
        match self {
            EntryKind::File => b'0',
            EntryKind::HardLink => b'1',
            EntryKind::SymLink => b'2',
            EntryKind::Char => b'3',
            EntryKind::Block => b'4',
            EntryKind::Directory => b'5',
            EntryKind::Fifo => b'6',
            EntryKind::Other(flag) => flag,
        }
    }
}

/// Fields present only in headers carrying the ustar magic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UstarExtension {
    pub version: u64,
    pub owner_name: String,
    pub group_name: String,
    pub device_major: u64,
    pub device_minor: u64,
    pub prefix: String,
}

/// A decoded header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub mtime: u64,
    pub checksum: u64,
    pub kind: EntryKind,
    pub link_name: String,
    /// `None` for plain headers without the ustar magic.
    pub ustar: Option<UstarExtension>,
}

impl Header {
    /// Decode a header from a block of at least [`HEADER_SIZE`] bytes.
    ///
    /// Returns `None` if the block is too short.
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() < HEADER_SIZE {
            return None;
        }

        let ustar = if field(block, MAGIC) == USTAR_MAGIC {
            Some(UstarExtension {
                version: read_octal(field(block, VERSION)),
                owner_name: read_string(field(block, OWNER)),
                group_name: read_string(field(block, GROUP)),
                device_major: read_octal(field(block, DEVICE_MAJOR)),
                device_minor: read_octal(field(block, DEVICE_MINOR)),
                prefix: read_string(field(block, PREFIX)),
            })
        } else {
            None
        };

        Some(Self {
            name: read_string(field(block, NAME)),
            mode: read_octal(field(block, MODE)),
            uid: read_octal(field(block, UID)),
            gid: read_octal(field(block, GID)),
            size: read_octal(field(block, SIZE)),
            mtime: read_octal(field(block, MTIME)),
            checksum: read_octal(field(block, CHECKSUM)),
            kind: EntryKind::from_type_flag(block[TYPE_FLAG]),
            link_name: read_string(field(block, LINK_NAME)),
            ustar,
        })
    }

    /// An empty name field marks the end of the archive.
    pub fn is_end_of_archive(&self) -> bool {
        self.name.is_empty()
    }

    /// Path prefix, or the empty string for plain headers.
    pub fn prefix(&self) -> &str {
        self.ustar.as_ref().map(|u| u.prefix.as_str()).unwrap_or("")
    }

    /// Full path of the entry: the prefix joined with the base name.
    pub fn path(&self) -> String {
        join_prefix(self.prefix(), &self.name)
    }
}

/// Join a ustar path prefix and a base name.
pub fn join_prefix(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Read a fixed-width NUL-terminated ASCII field.
pub fn read_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].iter().map(|&b| b as char).collect()
}

/// Read a fixed-width octal field.
///
/// Characters outside `'0'..='7'` (spaces, NUL padding) are ignored.
pub fn read_octal(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .filter(|b| (b'0'..=b'7').contains(*b))
        .fold(0u64, |value, &digit| {
            value.wrapping_mul(8).wrapping_add((digit - b'0') as u64)
        })
}

/// Compute the header checksum: the byte sum with the checksum field read as
/// spaces.
pub fn compute_checksum(block: &[u8]) -> u64 {
    let (start, len) = CHECKSUM;
    block[..HEADER_SIZE]
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (start..start + len).contains(&i) {
                b' ' as u64
            } else {
                b as u64
            }
        })
        .sum()
}

/// Check the stored checksum against the computed one.
///
/// Some historical writers summed signed bytes, so both sums are accepted.
pub fn checksum_matches(block: &[u8], stored: u64) -> bool {
    if compute_checksum(block) == stored {
        return true;
    }
    let (start, len) = CHECKSUM;
    let signed: i64 = block[..HEADER_SIZE]
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (start..start + len).contains(&i) {
                b' ' as i64
            } else {
                b as i8 as i64
            }
        })
        .sum();
    signed >= 0 && signed as u64 == stored
}

/// Offset of the next header given the payload offset and size.
pub fn next_header_offset(data_offset: u64, size: u64) -> u64 {
    let blocks = size.div_ceil(BLOCK_SIZE as u64);
    data_offset + blocks * BLOCK_SIZE as u64
}

fn field(block: &[u8], (offset, len): (usize, usize)) -> &[u8] {
    &block[offset..offset + len]
}
