//! Box headers, box types and the box tree walker
//!
//! Reference: ISO/IEC 14496-12:2022 section 4.2, ISO/IEC 23008-12 (HEIF)

use super::items::{
    parse_iinf, parse_iloc, parse_ipma, parse_pitm, ItemInfoEntry, ItemLocationBox,
    ItemPropertyAssociation, PrimaryItem,
};
use crate::{
    error::{Error, Result},
    stream::ByteStream,
};
use atree::{Arena, Token};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Read, Seek, Write};

// BMFF constants
pub(crate) const HEADER_SIZE: u64 = 8; // 4 byte size + 4 byte type
pub(crate) const HEADER_SIZE_LARGE: u64 = 16; // 4 byte size + 4 byte type + 8 byte large size
pub(crate) const FULL_BOX_EXT_SIZE: u64 = 4; // version (1) + flags (3)

/// Box type enum for the boxes this crate inspects
macro_rules! boxtype {
    ($( $name:ident => $value:expr ),*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum BoxType {
            $( $name, )*
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> BoxType {
                match t {
                    $( $value => BoxType::$name, )*
                    _ => BoxType::UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(t: BoxType) -> u32 {
                match t {
                    $( BoxType::$name => $value, )*
                    BoxType::UnknownBox(t) => t,
                }
            }
        }
    }
}

boxtype! {
    Empty => 0x0000_0000,
    UuidBox => 0x75756964,
    FtypBox => 0x66747970,
    FreeBox => 0x66726565,
    MdatBox => 0x6d646174,
    MetaBox => 0x6d657461,
    HdlrBox => 0x68646c72,
    DinfBox => 0x64696e66,
    PitmBox => 0x7069746d,
    IlocBox => 0x696c6f63,
    IinfBox => 0x69696e66,
    InfeBox => 0x696e6665,
    IrefBox => 0x69726566,
    IprpBox => 0x69707270,
    IpcoBox => 0x6970636f,
    IpmaBox => 0x69706d61,
    IdatBox => 0x69646174,
    IspeBox => 0x69737065,
    HvcCBox => 0x68766343,
    ColrBox => 0x636f6c72,
    PixiBox => 0x70697869,
    ImirBox => 0x696d6972,
    IrotBox => 0x69726f74,
    ClapBox => 0x636c6170,
    PaspBox => 0x70617370
}

impl BoxType {
    /// Build a box type from its four-character code
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        BoxType::from(u32::from_be_bytes(fourcc))
    }

    pub fn fourcc(self) -> [u8; 4] {
        u32::from(self).to_be_bytes()
    }

    /// Boxes whose payload is a sequence of child boxes that we walk
    pub fn is_container(self) -> bool {
        matches!(self, BoxType::MetaBox | BoxType::IprpBox | BoxType::IpcoBox)
    }

    /// Boxes that start with a version/flags word
    pub fn is_full_box(self) -> bool {
        matches!(
            self,
            BoxType::MetaBox
                | BoxType::HdlrBox
                | BoxType::PitmBox
                | BoxType::IlocBox
                | BoxType::IinfBox
                | BoxType::InfeBox
                | BoxType::IrefBox
                | BoxType::IpmaBox
                | BoxType::IspeBox
                | BoxType::PixiBox
        )
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.fourcc()))
    }
}

/// How a box's size is stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    /// 32-bit size in the header
    Compact,
    /// `size == 1`, 64-bit largesize follows the type
    Large,
    /// `size == 0`, box extends to the end of its enclosing span
    ToEnd,
}

/// Box header as read from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    /// Total box size including the header
    pub size: u64,
    pub size_field: SizeField,
}

impl BoxHeader {
    pub fn new(box_type: BoxType, size: u64) -> Self {
        Self {
            box_type,
            size,
            size_field: if size > u32::MAX as u64 {
                SizeField::Large
            } else {
                SizeField::Compact
            },
        }
    }

    pub fn header_size(&self) -> u64 {
        match self.size_field {
            SizeField::Large => HEADER_SIZE_LARGE,
            _ => HEADER_SIZE,
        }
    }

    /// Read a header at the current position; `end` bounds a `size == 0` box
    pub fn read<S: Read + Seek>(stream: &mut ByteStream<S>, end: u64) -> Result<Self> {
        let box_start = stream.position();
        let size = stream.read_u32()?;
        let box_type = BoxType::from(stream.read_u32()?);

        let header = match size {
            1 => BoxHeader {
                box_type,
                size: stream.read_u64()?,
                size_field: SizeField::Large,
            },
            // special case to indicate the size goes to the end of the enclosing span
            0 => BoxHeader {
                box_type,
                size: end.saturating_sub(box_start),
                size_field: SizeField::ToEnd,
            },
            _ => BoxHeader {
                box_type,
                size: size as u64,
                size_field: SizeField::Compact,
            },
        };

        if header.size < header.header_size() {
            return Err(Error::InvalidFormat(format!(
                "Box '{}' at offset {} has size {} smaller than its header",
                header.box_type, box_start, header.size
            )));
        }
        Ok(header)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        match self.size_field {
            SizeField::Large => {
                writer.write_u32::<BigEndian>(1)?;
                writer.write_u32::<BigEndian>(self.box_type.into())?;
                writer.write_u64::<BigEndian>(self.size)?;
                Ok(HEADER_SIZE_LARGE)
            }
            SizeField::ToEnd => {
                writer.write_u32::<BigEndian>(0)?;
                writer.write_u32::<BigEndian>(self.box_type.into())?;
                Ok(HEADER_SIZE)
            }
            SizeField::Compact => {
                let size = u32::try_from(self.size).map_err(|_| Error::FieldOverflow {
                    position: 0,
                    width: 4,
                    value: self.size,
                })?;
                writer.write_u32::<BigEndian>(size)?;
                writer.write_u32::<BigEndian>(self.box_type.into())?;
                Ok(HEADER_SIZE)
            }
        }
    }
}

/// Payload data for the boxes the patcher and injector care about
#[derive(Debug, Clone, PartialEq)]
pub enum BoxPayload {
    /// Child boxes follow; they are separate tree nodes
    Container,
    PrimaryItem(PrimaryItem),
    ItemLocation(ItemLocationBox),
    ItemInfo(Vec<ItemInfoEntry>),
    PropertyAssociation(ItemPropertyAssociation),
    /// Anything else, preserved byte-for-byte on disk and not interpreted
    Opaque,
}

/// Box information stored in the tree structure
#[derive(Debug, Clone, PartialEq)]
pub struct BoxInfo {
    pub box_type: BoxType,
    /// Absolute offset of the first header byte
    pub offset: u64,
    /// Size as stored on disk, header included
    pub size: u64,
    pub size_field: SizeField,
    pub version: Option<u8>,
    pub flags: Option<u32>,
    pub payload: BoxPayload,
}

impl BoxInfo {
    pub(crate) fn root(file_len: u64) -> Self {
        Self {
            box_type: BoxType::Empty,
            offset: 0,
            size: file_len,
            size_field: SizeField::ToEnd,
            version: None,
            flags: None,
            payload: BoxPayload::Container,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn header(&self) -> BoxHeader {
        BoxHeader {
            box_type: self.box_type,
            size: self.size,
            size_field: self.size_field,
        }
    }

    pub fn header_size(&self) -> u64 {
        self.header().header_size()
    }

    /// Offset of the first byte after the header and, for full boxes,
    /// version/flags
    pub fn content_offset(&self) -> u64 {
        let ext = if self.version.is_some() {
            FULL_BOX_EXT_SIZE
        } else {
            0
        };
        self.offset + self.header_size() + ext
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, BoxPayload::Container)
    }
}

pub(crate) fn read_box_header_ext<S: Read + Seek>(stream: &mut ByteStream<S>) -> Result<(u8, u32)> {
    let version = stream.read_u8()?;
    let flags = stream.read_u24()?;
    Ok((version, flags))
}

pub(crate) fn write_box_header_ext<W: Write>(w: &mut W, v: u8, f: u32) -> Result<u64> {
    w.write_u8(v)?;
    w.write_u24::<BigEndian>(f)?;
    Ok(FULL_BOX_EXT_SIZE)
}

/// Build a tree structure representing the box hierarchy between the
/// current position and `end`
///
/// Stored sizes are trusted; a child that does not fit inside its parent's
/// declared span is an error.
pub(crate) fn build_box_tree<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    end: u64,
    tree: &mut Arena<BoxInfo>,
    current_node: &Token,
) -> Result<()> {
    while stream.position() < end {
        let start = stream.position();
        if end - start < HEADER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "{} stray bytes at offset {} (no room for a box header)",
                end - start,
                start
            )));
        }

        let header = BoxHeader::read(stream, end)?;
        let box_end = start
            .checked_add(header.size)
            .filter(|box_end| *box_end <= end)
            .ok_or(Error::BoxOverrun {
                offset: start,
                size: header.size,
                parent_end: end,
            })?;

        let (version, flags) = if header.box_type.is_full_box() {
            let (v, f) = read_box_header_ext(stream)?;
            (Some(v), Some(f))
        } else {
            (None, None)
        };

        let payload = match header.box_type {
            t if t.is_container() => BoxPayload::Container,
            BoxType::PitmBox => {
                BoxPayload::PrimaryItem(parse_pitm(stream, version.unwrap_or(0))?)
            }
            BoxType::IlocBox => {
                BoxPayload::ItemLocation(parse_iloc(stream, version.unwrap_or(0), box_end)?)
            }
            BoxType::IinfBox => {
                BoxPayload::ItemInfo(parse_iinf(stream, version.unwrap_or(0), box_end)?)
            }
            BoxType::IpmaBox => BoxPayload::PropertyAssociation(parse_ipma(
                stream,
                version.unwrap_or(0),
                flags.unwrap_or(0),
                start,
                box_end,
            )?),
            _ => BoxPayload::Opaque,
        };

        if stream.position() > box_end {
            return Err(Error::InvalidFormat(format!(
                "Box '{}' at offset {} overruns its declared size {}",
                header.box_type, start, header.size
            )));
        }

        log::trace!(
            "box '{}' at {} size {}",
            header.box_type,
            start,
            header.size
        );

        let is_container = matches!(payload, BoxPayload::Container);
        let info = BoxInfo {
            box_type: header.box_type,
            offset: start,
            size: header.size,
            size_field: header.size_field,
            version,
            flags,
            payload,
        };
        let new_token = current_node.append(tree, info);

        if is_container {
            // consume all sub-boxes
            build_box_tree(stream, box_end, tree, &new_token)?;
        }

        // position seek pointer
        stream.seek(box_end)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fourcc_round_trip() {
        assert_eq!(BoxType::from_fourcc(*b"ipma"), BoxType::IpmaBox);
        assert_eq!(BoxType::IpcoBox.fourcc(), *b"ipco");
        let unknown = BoxType::from_fourcc(*b"zzzz");
        assert_eq!(unknown, BoxType::UnknownBox(0x7a7a7a7a));
        assert_eq!(unknown.to_string(), "zzzz");
    }

    #[test]
    fn test_header_forms() {
        let compact = [0, 0, 0, 9, b'i', b'm', b'i', b'r', 0];
        let mut stream = ByteStream::from_slice(&compact);
        let header = BoxHeader::read(&mut stream, 9).unwrap();
        assert_eq!(header.box_type, BoxType::ImirBox);
        assert_eq!(header.size, 9);
        assert_eq!(header.header_size(), 8);

        let mut large = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        large.extend(20u64.to_be_bytes());
        large.extend([0u8; 4]);
        let mut stream = ByteStream::from_slice(&large);
        let header = BoxHeader::read(&mut stream, 20).unwrap();
        assert_eq!(header.size_field, SizeField::Large);
        assert_eq!(header.size, 20);
        assert_eq!(header.header_size(), 16);

        let to_end = [0, 0, 0, 0, b'm', b'd', b'a', b't', 1, 2, 3];
        let mut stream = ByteStream::from_slice(&to_end);
        let header = BoxHeader::read(&mut stream, 11).unwrap();
        assert_eq!(header.size_field, SizeField::ToEnd);
        assert_eq!(header.size, 11);
    }

    #[test]
    fn test_header_write_preserves_form() {
        for bytes in [
            vec![0, 0, 0, 8, b'f', b'r', b'e', b'e'],
            vec![0, 0, 0, 0, b'm', b'd', b'a', b't'],
        ] {
            let mut stream = ByteStream::from_slice(&bytes);
            let header = BoxHeader::read(&mut stream, 8).unwrap();
            let mut out = Cursor::new(Vec::new());
            header.write(&mut out).unwrap();
            assert_eq!(out.into_inner(), bytes);
        }
    }

    #[test]
    fn test_undersized_box_rejected() {
        let data = [0, 0, 0, 4, b'f', b'r', b'e', b'e'];
        let mut stream = ByteStream::from_slice(&data);
        assert!(matches!(
            BoxHeader::read(&mut stream, 8),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_child_overrun_rejected() {
        // iprp declares 16 bytes but its child claims 12 of the 8 available
        let mut data = vec![0, 0, 0, 16, b'i', b'p', b'r', b'p'];
        data.extend([0, 0, 0, 12, b'i', b'p', b'c', b'o']);
        let mut stream = ByteStream::from_slice(&data);
        let (mut tree, root) = Arena::with_data(BoxInfo::root(16));
        let result = build_box_tree(&mut stream, 16, &mut tree, &root);
        assert!(matches!(
            result,
            Err(Error::BoxOverrun {
                offset: 8,
                size: 12,
                parent_end: 16
            })
        ));
    }
}
