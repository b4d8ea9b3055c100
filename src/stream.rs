//! Seekable, byte-order-aware binary stream
//!
//! [`ByteStream`] wraps any `Read + Seek` source and adds:
//! - an explicit byte order for every multi-byte read/write (ISO-BMFF is always
//!   big-endian, TIFF blocks inside an EXIF item may be either)
//! - non-advancing peeks, both current-relative and absolute
//! - a LIFO stack of saved positions for nested dives into sub-structures
//! - bounds checks before every access: running off the end is a
//!   [`Error::Truncated`], never a silent zero-fill
//!
//! Writes are only available when the wrapped type implements `Write` and the
//! stream was opened with [`AccessMode::ReadWrite`]. Writes never extend the
//! stream; they patch bytes that already exist.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// Byte order used for multi-byte values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Most significant byte first (ISO-BMFF, TIFF "MM")
    #[default]
    Big,
    /// Least significant byte first (TIFF "II")
    Little,
}

impl Endian {
    /// Detect byte order from a TIFF header's 2-byte magic
    pub fn from_tiff_magic(magic: &[u8]) -> Option<Self> {
        match magic.get(..2)? {
            b"II" => Some(Endian::Little),
            b"MM" => Some(Endian::Big),
            _ => None,
        }
    }
}

/// How the underlying stream was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

macro_rules! read_num {
    ($name:ident, $ty:ty, $size:expr) => {
        #[doc = concat!("Read a `", stringify!($ty), "` in the configured byte order")]
        pub fn $name(&mut self) -> Result<$ty> {
            self.ensure(self.pos, $size)?;
            let value = match self.endian {
                Endian::Big => self.inner.$name::<BigEndian>()?,
                Endian::Little => self.inner.$name::<LittleEndian>()?,
            };
            self.pos += $size;
            Ok(value)
        }
    };
}

macro_rules! write_num {
    ($name:ident, $ty:ty, $size:expr) => {
        #[doc = concat!("Write a `", stringify!($ty), "` at the current position in the configured byte order")]
        pub fn $name(&mut self, value: $ty) -> Result<()> {
            self.check_writable()?;
            self.ensure(self.pos, $size)?;
            match self.endian {
                Endian::Big => self.inner.$name::<BigEndian>(value)?,
                Endian::Little => self.inner.$name::<LittleEndian>(value)?,
            }
            self.pos += $size;
            Ok(())
        }
    };
}

/// Binary stream with byte order, peek and mark/reset support
#[derive(Debug)]
pub struct ByteStream<S> {
    inner: S,
    len: u64,
    pos: u64,
    endian: Endian,
    mode: AccessMode,
    marks: Vec<u64>,
}

impl ByteStream<File> {
    /// Open a file for parsing only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file, AccessMode::ReadOnly)
    }

    /// Open a file for in-place patching
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::new(file, AccessMode::ReadWrite)
    }
}

impl<'a> ByteStream<Cursor<&'a [u8]>> {
    /// Read-only stream over a borrowed buffer
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            len: data.len() as u64,
            inner: Cursor::new(data),
            pos: 0,
            endian: Endian::Big,
            mode: AccessMode::ReadOnly,
            marks: Vec::new(),
        }
    }
}

impl ByteStream<Cursor<Vec<u8>>> {
    /// Read-write stream over an owned buffer
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            len: data.len() as u64,
            inner: Cursor::new(data),
            pos: 0,
            endian: Endian::Big,
            mode: AccessMode::ReadWrite,
            marks: Vec::new(),
        }
    }
}

impl<S: Read + Seek> ByteStream<S> {
    /// Wrap an arbitrary seekable source. Byte order starts as big-endian.
    pub fn new(mut inner: S, mode: AccessMode) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            len,
            pos: 0,
            endian: Endian::Big,
            mode,
            marks: Vec::new(),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.len - self.pos
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn ensure(&self, offset: u64, needed: u64) -> Result<()> {
        match offset.checked_add(needed) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::Truncated {
                offset,
                needed,
                available: self.len.saturating_sub(offset),
            }),
        }
    }

    /// Move to an absolute position (at most the stream length)
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len {
            return Err(Error::AddressOutOfBounds {
                offset: pos,
                len: 0,
                file_len: self.len,
            });
        }
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    /// Move relative to the current position
    pub fn skip(&mut self, delta: i64) -> Result<()> {
        let target = self
            .pos
            .checked_add_signed(delta)
            .ok_or_else(|| Error::InvalidInput(format!("skip {delta} from {}", self.pos)))?;
        self.seek(target)
    }

    /// Save the current position
    pub fn mark(&mut self) {
        self.marks.push(self.pos);
    }

    /// Return to the most recently saved position, popping it
    pub fn reset(&mut self) -> Result<()> {
        let pos = self.marks.pop().ok_or(Error::UnbalancedReset)?;
        self.seek(pos)
    }

    pub fn mark_depth(&self) -> usize {
        self.marks.len()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(self.pos, 1)?;
        let value = self.inner.read_u8()?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.ensure(self.pos, 1)?;
        let value = self.inner.read_i8()?;
        self.pos += 1;
        Ok(value)
    }

    read_num!(read_u16, u16, 2);
    read_num!(read_u24, u32, 3);
    read_num!(read_u32, u32, 4);
    read_num!(read_u64, u64, 8);
    read_num!(read_i16, i16, 2);
    read_num!(read_i32, i32, 4);
    read_num!(read_i64, i64, 8);
    read_num!(read_f32, f32, 4);
    read_num!(read_f64, f64, 8);

    /// Read an unsigned integer of `width` bytes (ISO-BMFF variable-size fields)
    ///
    /// A width of 0 reads nothing and yields 0.
    pub fn read_uint(&mut self, width: u8) -> Result<u64> {
        match width {
            0 => Ok(0),
            1 => Ok(self.read_u8()? as u64),
            2 => Ok(self.read_u16()? as u64),
            3 => Ok(self.read_u24()? as u64),
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            _ => Err(Error::InvalidFormat(format!(
                "Invalid integer width: {}",
                width
            ))),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(self.pos, buf.len() as u64)?;
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `len` bytes starting `offset` bytes from the current position
    /// without moving
    pub fn peek(&mut self, offset: i64, len: usize) -> Result<Vec<u8>> {
        let at = self
            .pos
            .checked_add_signed(offset)
            .ok_or_else(|| Error::InvalidInput(format!("peek {offset} from {}", self.pos)))?;
        self.peek_at(at, len)
    }

    /// Seek to `offset` and read `len` bytes, leaving the position after them
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.seek(offset)?;
        self.read_bytes(len)
    }

    /// Read `len` bytes at an absolute position without moving
    pub fn peek_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.ensure(offset, len as u64)?;
        let mut buf = vec![0u8; len];
        self.inner.seek(SeekFrom::Start(offset))?;
        let read = self.inner.read_exact(&mut buf);
        self.inner.seek(SeekFrom::Start(self.pos))?;
        read?;
        Ok(buf)
    }
}

impl<S: Read + Write + Seek> ByteStream<S> {
    fn check_writable(&self) -> Result<()> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(Error::ReadOnly),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.check_writable()?;
        self.ensure(self.pos, 1)?;
        self.inner.write_u8(value)?;
        self.pos += 1;
        Ok(())
    }

    write_num!(write_u16, u16, 2);
    write_num!(write_u32, u32, 4);
    write_num!(write_u64, u64, 8);

    /// Overwrite bytes at the current position
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.ensure(self.pos, data.len() as u64)?;
        self.inner.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Overwrite bytes at an absolute position without moving
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.ensure(offset, data.len() as u64)?;
        self.inner.seek(SeekFrom::Start(offset))?;
        let written = self.inner.write_all(data);
        self.inner.seek(SeekFrom::Start(self.pos))?;
        written?;
        Ok(())
    }

    /// Overwrite a `width`-byte unsigned field at an absolute position
    pub fn write_uint_at(&mut self, offset: u64, width: u8, value: u64) -> Result<()> {
        let bytes = encode_uint(self.endian, offset, width, value)?;
        self.write_at(offset, &bytes)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Encode `value` into exactly `width` bytes, failing if it does not fit
pub(crate) fn encode_uint(endian: Endian, position: u64, width: u8, value: u64) -> Result<Vec<u8>> {
    if width == 0 || width > 8 || (width < 8 && value >> (8 * width as u32) != 0) {
        return Err(Error::FieldOverflow {
            position,
            width,
            value,
        });
    }
    let mut buf = vec![0u8; width as usize];
    match endian {
        Endian::Big => BigEndian::write_uint(&mut buf, value, width as usize),
        Endian::Little => LittleEndian::write_uint(&mut buf, value, width as usize),
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut stream = ByteStream::from_slice(&data);
        assert_eq!(stream.read_u16().unwrap(), 0x1234);

        stream.seek(0).unwrap();
        stream.set_endian(Endian::Little);
        assert_eq!(stream.read_u32().unwrap(), 0x78563412);
    }

    #[test]
    fn test_tiff_magic() {
        assert_eq!(Endian::from_tiff_magic(b"II*\0"), Some(Endian::Little));
        assert_eq!(Endian::from_tiff_magic(b"MM\0*"), Some(Endian::Big));
        assert_eq!(Endian::from_tiff_magic(b"XX"), None);
        assert_eq!(Endian::from_tiff_magic(b"I"), None);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [1, 2, 3, 4, 5, 6];
        let mut stream = ByteStream::from_slice(&data);
        stream.seek(2).unwrap();

        assert_eq!(stream.peek(1, 2).unwrap(), vec![4, 5]);
        assert_eq!(stream.peek(-2, 1).unwrap(), vec![1]);
        assert_eq!(stream.peek_at(0, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(stream.position(), 2);
        assert_eq!(stream.read_u8().unwrap(), 3);
    }

    #[test]
    fn test_nested_mark_reset() {
        let data = [0u8; 32];
        let mut stream = ByteStream::from_slice(&data);
        stream.seek(4).unwrap();
        stream.mark();
        stream.seek(10).unwrap();
        stream.mark();
        stream.seek(20).unwrap();

        stream.reset().unwrap();
        assert_eq!(stream.position(), 10);
        stream.reset().unwrap();
        assert_eq!(stream.position(), 4);
        assert_eq!(stream.mark_depth(), 0);
        assert!(matches!(stream.reset(), Err(Error::UnbalancedReset)));
    }

    #[test]
    fn test_short_read_is_truncated() {
        let data = [0u8; 3];
        let mut stream = ByteStream::from_slice(&data);
        stream.seek(1).unwrap();
        match stream.read_u32() {
            Err(Error::Truncated {
                offset,
                needed,
                available,
            }) => {
                assert_eq!((offset, needed, available), (1, 4, 2));
            }
            other => panic!("expected Truncated, got {:?}", other),
        }
        // Position unchanged after a failed read
        assert_eq!(stream.position(), 1);
        assert!(stream.peek_at(2, 2).is_err());
    }

    #[test]
    fn test_read_uint_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut stream = ByteStream::from_slice(&data);
        assert_eq!(stream.read_uint(0).unwrap(), 0);
        assert_eq!(stream.read_uint(2).unwrap(), 0x0102);
        assert_eq!(stream.read_uint(3).unwrap(), 0x030405);
        assert!(stream.read_uint(5).is_err());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut stream =
            ByteStream::new(Cursor::new(vec![0u8; 4]), AccessMode::ReadOnly).unwrap();
        assert!(matches!(stream.write_u8(1), Err(Error::ReadOnly)));
        assert!(matches!(stream.write_at(0, &[1]), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_write_in_place_keeps_length() {
        let mut stream = ByteStream::from_vec(vec![0u8; 8]);
        stream.seek(2).unwrap();
        stream.write_at(4, b"ab").unwrap();
        stream.write_u16(0xBEEF).unwrap();
        assert_eq!(stream.position(), 4);
        assert!(stream.write_at(7, b"xy").is_err());

        let data = stream.into_inner().into_inner();
        assert_eq!(data, vec![0, 0, 0xBE, 0xEF, b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_write_uint_overflow() {
        let mut stream = ByteStream::from_vec(vec![0u8; 8]);
        stream.write_uint_at(0, 2, 0xFFFF).unwrap();
        assert!(matches!(
            stream.write_uint_at(0, 2, 0x1_0000),
            Err(Error::FieldOverflow { width: 2, .. })
        ));
        stream.write_uint_at(2, 4, 0x0102_0304).unwrap();
        let data = stream.into_inner().into_inner();
        assert_eq!(&data[..6], &[0xFF, 0xFF, 1, 2, 3, 4]);
    }
}
