//! Bounded positioned reads over a byte source.
//!
//! All parsing goes through [`BoundedReader`]. It has no cursor: every read
//! names an offset and a length, both are validated against the underlying
//! slice with checked arithmetic, and a failure is reported as
//! [`Error::TruncatedData`] carrying the absolute file offset.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::util::{cstr_lossy, Endian};

// =============================================================================
// Byte Source
// =============================================================================

/// Backing storage for a file under inspection.
#[derive(Debug)]
pub enum ByteSource {
    /// A read-only memory map of a file on disk.
    Mapped(Mmap),
    /// An in-memory buffer.
    Owned(Vec<u8>),
}

impl ByteSource {
    /// Memory-maps the file at `path`.
    ///
    /// Files larger than `max_size` are rejected before mapping.
    pub fn open<P: AsRef<Path>>(path: P, max_size: u64) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })?;
        let len = file.metadata()?.len();

        if len > max_size {
            return Err(Error::AllocationLimitExceeded {
                offset: 0,
                what: "file",
                requested: len,
                limit: max_size,
            });
        }

        // Zero-length maps are rejected on some platforms
        if len == 0 {
            return Ok(ByteSource::Owned(Vec::new()));
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!("mapped {} ({} bytes)", path.display(), len);
        Ok(ByteSource::Mapped(mmap))
    }

    /// Wraps an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        ByteSource::Owned(data)
    }

    /// Returns the full contents.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ByteSource::Mapped(mmap) => mmap,
            ByteSource::Owned(data) => data,
        }
    }

    /// Returns a reader over the full contents.
    #[inline]
    pub fn reader(&self) -> BoundedReader<'_> {
        BoundedReader::new(self.as_bytes())
    }
}

// =============================================================================
// Byte Swapping
// =============================================================================

/// On-disk records whose multi-byte fields can be converted between orders.
pub trait ByteSwap {
    /// Reverses the byte order of every multi-byte field in place.
    fn byte_swap(&mut self);
}

/// Implements [`ByteSwap`] by swapping the listed integer fields.
///
/// Byte arrays (names, UUIDs) are left alone.
macro_rules! impl_byte_swap {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::reader::ByteSwap for $ty {
            #[inline]
            fn byte_swap(&mut self) {
                $( self.$field = self.$field.swap_bytes(); )*
            }
        }
    };
}
pub(crate) use impl_byte_swap;

// =============================================================================
// Bounded Reader
// =============================================================================

/// A read-only view of a byte range with validated positioned reads.
///
/// `base` is the absolute file offset of the first byte of the view, used
/// only for error reporting. Offsets passed to methods are relative to the
/// view.
#[derive(Debug, Clone, Copy)]
pub struct BoundedReader<'a> {
    data: &'a [u8],
    base: u64,
}

impl<'a> BoundedReader<'a> {
    /// Creates a reader over `data` starting at absolute offset 0.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, base: 0 }
    }

    /// Creates a reader over `data` that sits at `base` in the file.
    #[inline]
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, base }
    }

    /// Length of the view in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns true if the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute file offset of the start of the view.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Converts a view-relative offset to an absolute file offset.
    #[inline]
    pub fn absolute(&self, offset: u64) -> u64 {
        self.base.saturating_add(offset)
    }

    /// Returns the whole view.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Returns true if `len` bytes at `offset` lie within the view.
    #[inline]
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len())
    }

    /// Returns `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: u64) -> Result<&'a [u8]> {
        if !self.contains(offset, len) {
            return Err(Error::truncated(
                self.absolute(offset),
                len,
                self.len().saturating_sub(offset),
            ));
        }
        // Both bounds are <= data.len(), so they fit in usize
        let start = offset as usize;
        Ok(&self.data[start..start + len as usize])
    }

    /// Returns the bytes from `offset` to the end of the view.
    pub fn tail(&self, offset: u64) -> Result<&'a [u8]> {
        self.read_at(offset, self.len().saturating_sub(offset))
    }

    /// Returns a reader over `len` bytes at `offset`.
    pub fn sub_reader(&self, offset: u64, len: u64) -> Result<BoundedReader<'a>> {
        let data = self.read_at(offset, len)?;
        Ok(BoundedReader::with_base(data, self.absolute(offset)))
    }

    /// Reads a byte.
    #[inline]
    pub fn u8_at(&self, offset: u64) -> Result<u8> {
        Ok(self.read_at(offset, 1)?[0])
    }

    /// Reads a u16 in the given byte order.
    #[inline]
    pub fn u16_at(&self, offset: u64, endian: Endian) -> Result<u16> {
        Ok(endian.read_u16(self.read_at(offset, 2)?))
    }

    /// Reads a u32 in the given byte order.
    #[inline]
    pub fn u32_at(&self, offset: u64, endian: Endian) -> Result<u32> {
        Ok(endian.read_u32(self.read_at(offset, 4)?))
    }

    /// Reads a u64 in the given byte order.
    #[inline]
    pub fn u64_at(&self, offset: u64, endian: Endian) -> Result<u64> {
        Ok(endian.read_u64(self.read_at(offset, 8)?))
    }

    /// Reads an on-disk record stored in `endian` order and returns it in
    /// host order.
    pub fn read_struct<T>(&self, offset: u64, endian: Endian) -> Result<T>
    where
        T: FromBytes + ByteSwap,
    {
        let size = std::mem::size_of::<T>() as u64;
        let bytes = self.read_at(offset, size)?;
        let mut value = T::read_from_bytes(bytes)
            .map_err(|_| Error::truncated(self.absolute(offset), size, bytes.len() as u64))?;
        if !endian.is_native() {
            value.byte_swap();
        }
        Ok(value)
    }

    /// Reads a NUL-terminated string starting at `offset`.
    ///
    /// The string ends at the first NUL or at the end of the view, whichever
    /// comes first.
    pub fn cstr_at(&self, offset: u64) -> Result<String> {
        Ok(cstr_lossy(self.tail(offset)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_at_bounds() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let reader = BoundedReader::new(&data);

        assert_eq!(reader.read_at(0, 8).unwrap(), &data);
        assert_eq!(reader.read_at(8, 0).unwrap(), &[] as &[u8]);
        assert!(matches!(
            reader.read_at(6, 4),
            Err(Error::TruncatedData {
                offset: 6,
                needed: 4,
                available: 2
            })
        ));
        assert!(reader.read_at(u64::MAX, 2).is_err());
        assert!(reader.read_at(2, u64::MAX).is_err());
    }

    #[test]
    fn test_sub_reader_offsets_are_absolute() {
        let data = [0u8; 32];
        let reader = BoundedReader::with_base(&data, 0x1000);
        let sub = reader.sub_reader(8, 8).unwrap();

        assert_eq!(sub.base(), 0x1008);
        assert_eq!(sub.len(), 8);
        match sub.u32_at(6, Endian::Little) {
            Err(Error::TruncatedData { offset, .. }) => assert_eq!(offset, 0x100e),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_scalar_reads() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE];
        let reader = BoundedReader::new(&data);
        assert_eq!(reader.u32_at(0, Endian::Big).unwrap(), 0xCAFEBABE);
        assert_eq!(reader.u32_at(0, Endian::Little).unwrap(), 0xBEBAFECA);
        assert_eq!(reader.u8_at(3).unwrap(), 0xBE);
        assert!(reader.u8_at(4).is_err());
    }

    #[test]
    fn test_cstr_at() {
        let data = b"abc\0def";
        let reader = BoundedReader::new(data);
        assert_eq!(reader.cstr_at(0).unwrap(), "abc");
        assert_eq!(reader.cstr_at(4).unwrap(), "def");
        assert_eq!(reader.cstr_at(7).unwrap(), "");
        assert!(reader.cstr_at(8).is_err());
    }

    #[test]
    fn test_open_rejects_oversized_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[0u8; 64]).unwrap();

        let err = ByteSource::open(file.path(), 32).unwrap_err();
        assert!(matches!(
            err,
            Error::AllocationLimitExceeded {
                requested: 64,
                limit: 32,
                ..
            }
        ));

        let source = ByteSource::open(file.path(), 64).unwrap();
        assert_eq!(source.as_bytes().len(), 64);
    }
}
