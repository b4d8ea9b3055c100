//! Byte ranges and payload address mapping
//!
//! Metadata payloads (an EXIF item, an XMP packet) are addressed by logical
//! offset inside the payload. On disk a payload may be one contiguous range
//! (a JPEG APP1 segment) or several discontiguous extents (a HEIF item listed
//! in `iloc`). [`PayloadMap`] translates between the two.

use crate::{
    error::{Error, Result},
    stream::ByteStream,
};
use std::io::{Read, Seek, Write};

/// A byte range in a file (offset and size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Offset from start of file
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl ByteRange {
    /// Create a new byte range
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset of this range
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

/// Maximum size for a payload assembled in memory (256 MB)
///
/// EXIF and XMP payloads are normally a few kilobytes; anything larger is
/// treated as corrupt input rather than allocated.
pub const MAX_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Translation from logical payload offsets to absolute file offsets
pub trait PayloadMap {
    /// The payload's physical extents in declaration order
    fn extents(&self) -> Vec<ByteRange>;

    /// Total logical length of the payload
    fn payload_len(&self) -> u64 {
        self.extents().iter().map(|r| r.size).sum()
    }

    /// Map `len` logical bytes starting at `logical` onto file ranges
    ///
    /// The result has more than one range when the span crosses an extent
    /// boundary. A span reaching past the end of the payload is an
    /// addressing error.
    fn map_range(&self, logical: u64, len: u64) -> Result<Vec<ByteRange>> {
        let extents = self.extents();
        let total: u64 = extents.iter().map(|r| r.size).sum();
        let end = logical
            .checked_add(len)
            .filter(|end| *end <= total)
            .ok_or(Error::AddressOutOfBounds {
                offset: logical,
                len,
                file_len: total,
            })?;

        let mut ranges = Vec::new();
        let mut base = 0u64;
        for extent in extents {
            let extent_end = base + extent.size;
            if logical < extent_end && end > base {
                let start = logical.max(base);
                let stop = end.min(extent_end);
                ranges.push(ByteRange::new(extent.offset + (start - base), stop - start));
            }
            base = extent_end;
            if base >= end {
                break;
            }
        }
        Ok(ranges)
    }

    /// Absolute file offset of a single logical byte
    fn map_offset(&self, logical: u64) -> Result<u64> {
        self.map_range(logical, 1)?
            .first()
            .map(|r| r.offset)
            .ok_or(Error::AddressOutOfBounds {
                offset: logical,
                len: 1,
                file_len: self.payload_len(),
            })
    }
}

impl PayloadMap for ByteRange {
    fn extents(&self) -> Vec<ByteRange> {
        vec![*self]
    }
}

/// Read a whole payload by concatenating its extents
pub fn read_payload<S: Read + Seek, M: PayloadMap + ?Sized>(
    stream: &mut ByteStream<S>,
    map: &M,
) -> Result<Vec<u8>> {
    let total = map.payload_len();
    if total > MAX_SEGMENT_SIZE {
        return Err(Error::InvalidFormat(format!(
            "Payload too large: {} bytes (max {} MB)",
            total,
            MAX_SEGMENT_SIZE / (1024 * 1024)
        )));
    }

    let mut data = Vec::with_capacity(total as usize);
    for range in map.extents() {
        data.extend(stream.peek_at(range.offset, range.size as usize)?);
    }
    Ok(data)
}

/// Write `data` over the logical span starting at `logical`
///
/// Returns the absolute offset of the first written byte.
pub fn write_payload_span<S: Read + Write + Seek, M: PayloadMap + ?Sized>(
    stream: &mut ByteStream<S>,
    map: &M,
    logical: u64,
    data: &[u8],
) -> Result<u64> {
    let ranges = map.map_range(logical, data.len() as u64)?;
    let mut written = 0usize;
    for range in &ranges {
        let size = range.size as usize;
        stream.write_at(range.offset, &data[written..written + size])?;
        written += size;
    }
    ranges
        .first()
        .map(|r| r.offset)
        .ok_or_else(|| Error::InvalidInput("empty write".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Split(Vec<ByteRange>);

    impl PayloadMap for Split {
        fn extents(&self) -> Vec<ByteRange> {
            self.0.clone()
        }
    }

    #[test]
    fn test_contiguous_map() {
        let range = ByteRange::new(100, 50);
        assert_eq!(range.map_offset(0).unwrap(), 100);
        assert_eq!(range.map_range(10, 5).unwrap(), vec![ByteRange::new(110, 5)]);
        assert!(range.map_range(45, 6).is_err());
        assert!(range.map_offset(50).is_err());
    }

    #[test]
    fn test_split_extents_follow_declaration_order() {
        // Second extent sits earlier in the file than the first
        let map = Split(vec![ByteRange::new(200, 10), ByteRange::new(50, 10)]);
        assert_eq!(map.payload_len(), 20);
        assert_eq!(map.map_offset(9).unwrap(), 209);
        assert_eq!(map.map_offset(10).unwrap(), 50);
        assert_eq!(
            map.map_range(8, 4).unwrap(),
            vec![ByteRange::new(208, 2), ByteRange::new(50, 2)]
        );
        assert!(map.map_range(19, 2).is_err());
    }

    #[test]
    fn test_read_and_write_across_extents() {
        let mut data = vec![0u8; 32];
        data[4..8].copy_from_slice(b"EFGH");
        data[20..24].copy_from_slice(b"ABCD");
        let map = Split(vec![ByteRange::new(20, 4), ByteRange::new(4, 4)]);

        let mut stream = ByteStream::from_vec(data);
        assert_eq!(read_payload(&mut stream, &map).unwrap(), b"ABCDEFGH");

        let first = write_payload_span(&mut stream, &map, 2, b"wxyz").unwrap();
        assert_eq!(first, 22);
        assert_eq!(read_payload(&mut stream, &map).unwrap(), b"ABwxyzGH");
        assert_eq!(stream.len(), 32);
    }
}
