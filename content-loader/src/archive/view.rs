//! Zero-copy payload views.
//!
//! An [`EntryView`] is a reference-counted slice of the buffer the archive was
//! parsed from. Creating one never copies payload bytes; the underlying buffer
//! stays alive for as long as any view over it does.

use std::marker::PhantomData;

use bytes::Bytes;

use super::error::{ArchiveError, ArchiveResult};

/// Read-only view over one entry's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    name: String,
    bytes: Bytes,
}

impl EntryView {
    pub(crate) fn new(name: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Path of the entry this view belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload as a shared buffer handle.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Payload as signed bytes.
    pub fn as_i8(&self) -> impl Iterator<Item = i8> + '_ {
        self.bytes.iter().map(|&b| b as i8)
    }

    /// Payload as UTF-8 text.
    pub fn to_str(&self) -> ArchiveResult<&str> {
        std::str::from_utf8(&self.bytes).map_err(|source| ArchiveError::InvalidUtf8 {
            name: self.name.clone(),
            source,
        })
    }

    /// Payload as little-endian UTF-16 text, replacing invalid sequences.
    pub fn to_utf16_lossy(&self) -> String {
        let units: Vec<u16> = self.scalars::<u16>().iter().collect();
        String::from_utf16_lossy(&units)
    }

    /// Decode the payload as JSON.
    pub fn to_json<T: serde::de::DeserializeOwned>(&self) -> ArchiveResult<T> {
        serde_json::from_slice(&self.bytes).map_err(|source| ArchiveError::InvalidJson {
            name: self.name.clone(),
            source,
        })
    }

    /// Typed little-endian view over the payload.
    ///
    /// Trailing bytes that do not form a whole element are not visible.
    pub fn scalars<T: LeScalar>(&self) -> ScalarView<'_, T> {
        ScalarView {
            bytes: &self.bytes,
            _marker: PhantomData,
        }
    }
}

/// Fixed-size scalar that can be read from little-endian bytes.
pub trait LeScalar: Copy + 'static {
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_le_scalar {
    ($($ty:ty),*) => {
        $(
            impl LeScalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_le_scalar!(u16, i16, u32, i32, f32, f64);

/// Borrowed typed view over a payload.
#[derive(Debug, Clone, Copy)]
pub struct ScalarView<'a, T> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: LeScalar> ScalarView<'a, T> {
    /// Number of whole elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let start = index * T::SIZE;
        Some(T::from_le_slice(&self.bytes[start..start + T::SIZE]))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        self.bytes.chunks_exact(T::SIZE).map(T::from_le_slice)
    }
}
