//! Minimal TIFF/EXIF parser
//!
//! This module walks just enough of a TIFF structure to find date slots:
//! - IFD0 `DateTime` and the XMP packet (tag 700)
//! - `DateTimeOriginal`, `DateTimeDigitized` and the `OffsetTime*` tags in the Exif IFD
//! - `GPSDateStamp` in the GPS IFD
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), magic (0x002A), IFD offset
//! - IFD (Image File Directory): tag count, tags (12 bytes each), next IFD offset
//! - Tags: tag ID (2), type (2), count (4), value/offset (4)
//!
//! All offsets reported here are relative to the first byte of the TIFF
//! header, which is how TIFF itself addresses values.

use crate::{
    error::{Error, Result},
    segment::ByteRange,
    stream::{ByteStream, Endian},
};
use chrono::{DateTime, FixedOffset, Utc};
use std::{
    collections::HashSet,
    io::{Read, Seek},
};

/// TIFF/EXIF tag IDs
pub mod tags {
    // IFD0 (main image) tags
    pub const DATE_TIME: u16 = 0x0132;
    pub const XMP: u16 = 0x02BC;
    pub const EXIF_IFD_POINTER: u16 = 0x8769;
    pub const GPS_IFD_POINTER: u16 = 0x8825;

    // EXIF sub-IFD tags
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const DATE_TIME_DIGITIZED: u16 = 0x9004;
    pub const OFFSET_TIME: u16 = 0x9010;
    pub const OFFSET_TIME_ORIGINAL: u16 = 0x9011;
    pub const OFFSET_TIME_DIGITIZED: u16 = 0x9012;

    // GPS sub-IFD tags
    pub const GPS_DATE_STAMP: u16 = 0x001D;
}

/// TIFF data types
pub mod types {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const UNDEFINED: u16 = 7;
}

const TIFF_MAGIC: u16 = 0x002A;

/// Maximum number of tags in an IFD (prevents DOS attacks)
const MAX_IFD_TAGS: u16 = 1000;

/// Which directory a tag lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ifd {
    Ifd0,
    Exif,
    Gps,
}

/// Date-bearing EXIF tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateTag {
    DateTime,
    DateTimeOriginal,
    DateTimeDigitized,
    OffsetTime,
    OffsetTimeOriginal,
    OffsetTimeDigitized,
    GpsDateStamp,
}

impl DateTag {
    pub const ALL: [DateTag; 7] = [
        DateTag::DateTime,
        DateTag::DateTimeOriginal,
        DateTag::DateTimeDigitized,
        DateTag::OffsetTime,
        DateTag::OffsetTimeOriginal,
        DateTag::OffsetTimeDigitized,
        DateTag::GpsDateStamp,
    ];

    pub fn tag_id(self) -> u16 {
        match self {
            DateTag::DateTime => tags::DATE_TIME,
            DateTag::DateTimeOriginal => tags::DATE_TIME_ORIGINAL,
            DateTag::DateTimeDigitized => tags::DATE_TIME_DIGITIZED,
            DateTag::OffsetTime => tags::OFFSET_TIME,
            DateTag::OffsetTimeOriginal => tags::OFFSET_TIME_ORIGINAL,
            DateTag::OffsetTimeDigitized => tags::OFFSET_TIME_DIGITIZED,
            DateTag::GpsDateStamp => tags::GPS_DATE_STAMP,
        }
    }

    pub fn ifd(self) -> Ifd {
        match self {
            DateTag::DateTime => Ifd::Ifd0,
            DateTag::GpsDateStamp => Ifd::Gps,
            _ => Ifd::Exif,
        }
    }

    fn from_entry(ifd: Ifd, tag: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.ifd() == ifd && t.tag_id() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            DateTag::DateTime => "DateTime",
            DateTag::DateTimeOriginal => "DateTimeOriginal",
            DateTag::DateTimeDigitized => "DateTimeDigitized",
            DateTag::OffsetTime => "OffsetTime",
            DateTag::OffsetTimeOriginal => "OffsetTimeOriginal",
            DateTag::OffsetTimeDigitized => "OffsetTimeDigitized",
            DateTag::GpsDateStamp => "GPSDateStamp",
        }
    }

    /// Render a timestamp the way this tag stores it
    ///
    /// Date/time tags use local wall-clock time, offset tags the UTC offset
    /// and the GPS date stamp the UTC calendar date.
    pub fn format(self, timestamp: &DateTime<FixedOffset>) -> String {
        match self {
            DateTag::DateTime | DateTag::DateTimeOriginal | DateTag::DateTimeDigitized => {
                timestamp.format("%Y:%m:%d %H:%M:%S").to_string()
            }
            DateTag::OffsetTime | DateTag::OffsetTimeOriginal | DateTag::OffsetTimeDigitized => {
                timestamp.format("%:z").to_string()
            }
            DateTag::GpsDateStamp => timestamp
                .with_timezone(&Utc)
                .format("%Y:%m:%d")
                .to_string(),
        }
    }
}

impl std::fmt::Display for DateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A date tag's reserved value bytes inside the TIFF block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSlot {
    pub tag: DateTag,
    pub field_type: u16,
    /// Offset of the value bytes from the TIFF header
    pub offset: u64,
    /// Declared element count, i.e. the reserved width for ASCII values
    pub width: u32,
}

impl DateSlot {
    pub fn is_ascii(&self) -> bool {
        self.field_type == types::ASCII
    }
}

#[derive(Debug, Clone, Copy)]
struct IfdEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    raw_value: u32,
    /// Where the value bytes live: inline in the entry or at `raw_value`
    value_offset: u64,
}

fn type_size(field_type: u16) -> u64 {
    match field_type {
        types::SHORT => 2,
        types::LONG | 9 | 11 => 4,
        types::RATIONAL | 10 | 12 => 8,
        _ => 1,
    }
}

/// Open a TIFF block, pinning the stream to the block's byte order
fn open_tiff(data: &[u8]) -> Result<(ByteStream<std::io::Cursor<&[u8]>>, u64)> {
    let mut stream = ByteStream::from_slice(data);
    let endian = Endian::from_tiff_magic(&stream.peek_at(0, 2)?)
        .ok_or_else(|| Error::InvalidFormat("TIFF header missing II/MM byte order".into()))?;
    stream.set_endian(endian);
    stream.seek(2)?;

    let magic = stream.read_u16()?;
    if magic != TIFF_MAGIC {
        return Err(Error::InvalidFormat(format!(
            "Bad TIFF magic 0x{:04X}",
            magic
        )));
    }
    let ifd0_offset = stream.read_u32()? as u64;
    Ok((stream, ifd0_offset))
}

/// Read every entry of the IFD at `offset`, restoring the stream position
fn read_ifd<S: Read + Seek>(stream: &mut ByteStream<S>, offset: u64) -> Result<Vec<IfdEntry>> {
    stream.mark();
    stream.seek(offset)?;

    let tag_count = stream.read_u16()?;
    // Validate tag count to prevent DOS attacks
    if tag_count > MAX_IFD_TAGS {
        stream.reset()?;
        return Err(Error::InvalidFormat(format!(
            "IFD at {} claims {} tags",
            offset, tag_count
        )));
    }

    let mut entries = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let entry_pos = stream.position();
        let tag = stream.read_u16()?;
        let field_type = stream.read_u16()?;
        let count = stream.read_u32()?;
        let raw_value = stream.read_u32()?;

        let value_len = type_size(field_type) * count as u64;
        let value_offset = if value_len <= 4 {
            // Value is inline in the tag
            entry_pos + 8
        } else {
            raw_value as u64
        };
        entries.push(IfdEntry {
            tag,
            field_type,
            count,
            raw_value,
            value_offset,
        });
    }

    stream.reset()?;
    Ok(entries)
}

fn check_value_bounds(entry: &IfdEntry, len: u64) -> Result<()> {
    let value_len = type_size(entry.field_type) * entry.count as u64;
    if entry.value_offset + value_len > len {
        return Err(Error::AddressOutOfBounds {
            offset: entry.value_offset,
            len: value_len,
            file_len: len,
        });
    }
    Ok(())
}

fn collect_slots<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    ifd: Ifd,
    offset: u64,
    visited: &mut HashSet<u64>,
    slots: &mut Vec<DateSlot>,
) -> Result<()> {
    if !visited.insert(offset) {
        log::debug!("IFD at {} already visited, skipping loop", offset);
        return Ok(());
    }

    for entry in read_ifd(stream, offset)? {
        match (ifd, entry.tag) {
            (Ifd::Ifd0, tags::EXIF_IFD_POINTER) => {
                collect_slots(stream, Ifd::Exif, entry.raw_value as u64, visited, slots)?
            }
            (Ifd::Ifd0, tags::GPS_IFD_POINTER) => {
                collect_slots(stream, Ifd::Gps, entry.raw_value as u64, visited, slots)?
            }
            (ifd, tag) => {
                if let Some(date_tag) = DateTag::from_entry(ifd, tag) {
                    check_value_bounds(&entry, stream.len())?;
                    slots.push(DateSlot {
                        tag: date_tag,
                        field_type: entry.field_type,
                        offset: entry.value_offset,
                        width: entry.count,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Find every known date tag in a TIFF block
///
/// This expects the data to start with the TIFF header (after any
/// "Exif\0\0" signature or HEIF header-offset prefix).
pub fn find_date_slots(tiff: &[u8]) -> Result<Vec<DateSlot>> {
    let (mut stream, ifd0_offset) = open_tiff(tiff)?;
    let mut slots = Vec::new();
    collect_slots(
        &mut stream,
        Ifd::Ifd0,
        ifd0_offset,
        &mut HashSet::new(),
        &mut slots,
    )?;
    Ok(slots)
}

/// Location of the XMP packet (tag 700) in IFD0, if any
pub fn find_xmp_packet(tiff: &[u8]) -> Result<Option<ByteRange>> {
    let (mut stream, ifd0_offset) = open_tiff(tiff)?;
    for entry in read_ifd(&mut stream, ifd0_offset)? {
        if entry.tag == tags::XMP
            && matches!(entry.field_type, types::BYTE | types::UNDEFINED)
        {
            check_value_bounds(&entry, stream.len())?;
            return Ok(Some(ByteRange::new(entry.value_offset, entry.count as u64)));
        }
    }
    Ok(None)
}

/// Read the current value of every ASCII date tag
pub fn read_exif_dates(tiff: &[u8]) -> Result<Vec<(DateTag, String)>> {
    let mut dates = Vec::new();
    for slot in find_date_slots(tiff)? {
        if !slot.is_ascii() || slot.width == 0 {
            continue;
        }
        let start = slot.offset as usize;
        let bytes = &tiff[start..start + slot.width as usize];
        // Convert to string, trimming null terminator
        let value = String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .trim()
            .to_string();
        if !value.is_empty() {
            dates.push((slot.tag, value));
        }
    }
    Ok(dates)
}

/// Fill a slot of `width` bytes with `value`, truncating to fit
///
/// The final byte is always NUL so the slot stays a terminated ASCII string.
pub fn encode_ascii_slot(value: &str, width: usize) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    let len = value.len().min(width);
    buf[..len].copy_from_slice(&value.as_bytes()[..len]);
    if let Some(last) = buf.last_mut() {
        *last = 0;
    }
    buf
}
