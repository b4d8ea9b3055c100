//! Item-level tables inside `meta`: pitm, iloc, iinf and ipma
//!
//! Every parsed field that a later rewrite may touch keeps its absolute file
//! position, so patchers never have to re-derive where a value lives.

use super::boxes::{read_box_header_ext, BoxHeader, BoxType};
use crate::{
    error::{Error, Result},
    segment::{ByteRange, PayloadMap},
    stream::ByteStream,
};
use std::io::{Read, Seek};

/// Primary item (`pitm`): the item considered "the image"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryItem {
    pub item_id: u32,
}

/// Location and width of a stored integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// Absolute file position of the field's first byte
    pub position: u64,
    /// Field width in bytes
    pub width: u8,
}

/// One extent of an item's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentData {
    /// Offset as stored, relative to the construction method's base
    pub extent_offset: u64,
    /// Length as stored (0 means "to the end of the source")
    pub extent_length: u64,
    /// Resolved absolute file position, when the construction method allows it
    pub absolute_offset: Option<u64>,
    /// Resolved length in bytes
    pub length: u64,
    /// Where `extent_offset` itself is stored (absent when `offset_size == 0`)
    pub offset_field: Option<FieldRef>,
}

impl ExtentData {
    pub fn range(&self) -> Option<ByteRange> {
        self.absolute_offset.map(|offset| ByteRange::new(offset, self.length))
    }
}

/// iloc construction methods
pub mod construction {
    pub const FILE_OFFSET: u8 = 0;
    pub const IDAT_OFFSET: u8 = 1;
    pub const ITEM_OFFSET: u8 = 2;
}

/// One item's entry in `iloc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    pub item_id: u32,
    pub construction_method: u8,
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub base_offset_field: Option<FieldRef>,
    pub extents: Vec<ExtentData>,
}

impl ItemLocation {
    /// True when every extent resolved to an absolute file position
    pub fn is_resolved(&self) -> bool {
        self.extents.iter().all(|e| e.absolute_offset.is_some())
    }

    /// Fill in absolute offsets and lengths
    ///
    /// `idat` is the data range of the `idat` box, required for construction
    /// method 1. Method 2 and external data references are left unresolved.
    pub(crate) fn resolve(&mut self, file_len: u64, idat: Option<ByteRange>) -> Result<()> {
        if self.data_reference_index != 0 {
            return Ok(());
        }
        let source = match self.construction_method {
            construction::FILE_OFFSET => ByteRange::new(0, file_len),
            construction::IDAT_OFFSET => idat.ok_or(Error::MissingBox("idat"))?,
            _ => return Ok(()),
        };
        let single = self.extents.len() == 1;

        for extent in &mut self.extents {
            let relative = self
                .base_offset
                .checked_add(extent.extent_offset)
                .ok_or(Error::AddressOutOfBounds {
                    offset: self.base_offset,
                    len: extent.extent_offset,
                    file_len: source.size,
                })?;
            let length = if extent.extent_length == 0 && single {
                source.size.saturating_sub(relative)
            } else {
                extent.extent_length
            };
            if relative.checked_add(length).map_or(true, |end| end > source.size) {
                return Err(Error::AddressOutOfBounds {
                    offset: source.offset + relative,
                    len: length,
                    file_len,
                });
            }
            extent.absolute_offset = Some(source.offset + relative);
            extent.length = length;
        }
        Ok(())
    }
}

impl PayloadMap for ItemLocation {
    fn extents(&self) -> Vec<ByteRange> {
        self.extents.iter().filter_map(ExtentData::range).collect()
    }
}

/// Item location box (`iloc`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocationBox {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    pub base_offset_size: u8,
    pub index_size: u8,
    pub items: Vec<ItemLocation>,
}

/// Item information entry (`infe`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfoEntry {
    pub item_id: u32,
    pub item_type: [u8; 4],
    pub name: String,
    /// MIME content type for `mime` items
    pub content_type: Option<String>,
}

impl ItemInfoEntry {
    pub fn is_exif(&self) -> bool {
        &self.item_type == b"Exif"
    }

    pub fn is_xmp(&self) -> bool {
        &self.item_type == b"mime"
            && self.content_type.as_deref() == Some("application/rdf+xml")
    }
}

/// One property association slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// 1-based index into `ipco` (0 means "no property")
    pub property_index: u16,
    pub essential: bool,
}

/// One item's association list in `ipma`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationEntry {
    pub item_id: u32,
    /// Absolute offset of the entry's first byte (the item id)
    pub offset: u64,
    /// Absolute offset of the one-byte association count
    pub count_offset: u64,
    pub associations: Vec<Association>,
}

/// Item property association box (`ipma`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPropertyAssociation {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<AssociationEntry>,
}

impl ItemPropertyAssociation {
    /// Width of an item id: 2 bytes in version 0, 4 in version 1
    pub fn id_width(&self) -> u64 {
        if self.version < 1 {
            2
        } else {
            4
        }
    }

    /// Width of one association slot: 1 byte, or 2 when flag bit 0 is set
    pub fn index_width(&self) -> u64 {
        if self.flags & 1 != 0 {
            2
        } else {
            1
        }
    }

    /// Largest property index the slot width can hold
    pub fn max_index(&self) -> u16 {
        if self.flags & 1 != 0 {
            0x7FFF
        } else {
            0x7F
        }
    }

    pub fn entry(&self, item_id: u32) -> Option<&AssociationEntry> {
        self.entries.iter().find(|e| e.item_id == item_id)
    }

    /// Absolute offset just past an entry's last association slot
    pub fn entry_end(&self, entry: &AssociationEntry) -> u64 {
        entry.count_offset + 1 + entry.associations.len() as u64 * self.index_width()
    }

    /// Encode one association slot; the top bit carries `essential`
    pub fn encode_association(&self, association: Association) -> Result<Vec<u8>> {
        if association.property_index > self.max_index() {
            return Err(Error::PropertyIndexOverflow {
                index: association.property_index as usize,
                max: self.max_index(),
            });
        }
        if self.flags & 1 != 0 {
            let mut value = association.property_index;
            if association.essential {
                value |= 0x8000;
            }
            Ok(value.to_be_bytes().to_vec())
        } else {
            let mut value = association.property_index as u8;
            if association.essential {
                value |= 0x80;
            }
            Ok(vec![value])
        }
    }
}

/// Parse `pitm`; the stream sits just past version/flags
pub(crate) fn parse_pitm<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    version: u8,
) -> Result<PrimaryItem> {
    let item_id = if version == 0 {
        stream.read_u16()? as u32
    } else {
        stream.read_u32()?
    };
    Ok(PrimaryItem { item_id })
}

fn check_within<S: Read + Seek>(stream: &ByteStream<S>, end: u64, what: &str) -> Result<()> {
    if stream.position() > end {
        return Err(Error::InvalidFormat(format!(
            "{} overruns its box (position {}, box end {})",
            what,
            stream.position(),
            end
        )));
    }
    Ok(())
}

fn check_int_width(width: u8, what: &str) -> Result<u8> {
    match width {
        0 | 4 | 8 => Ok(width),
        _ => Err(Error::InvalidFormat(format!(
            "Invalid iloc {} size specifier: {}",
            what, width
        ))),
    }
}

fn field_at<S: Read + Seek>(stream: &ByteStream<S>, width: u8) -> Option<FieldRef> {
    (width > 0).then(|| FieldRef {
        position: stream.position(),
        width,
    })
}

/// Parse `iloc`; the stream sits just past version/flags
pub(crate) fn parse_iloc<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    version: u8,
    end: u64,
) -> Result<ItemLocationBox> {
    if version > 2 {
        return Err(Error::Unsupported(format!("iloc version {}", version)));
    }

    // offset_size (4 bits) + length_size (4 bits) + base_offset_size (4 bits) + index_size/reserved (4 bits)
    let sizes1 = stream.read_u8()?;
    let sizes2 = stream.read_u8()?;

    let offset_size = check_int_width((sizes1 >> 4) & 0x0F, "offset")?;
    let length_size = check_int_width(sizes1 & 0x0F, "length")?;
    let base_offset_size = check_int_width((sizes2 >> 4) & 0x0F, "base offset")?;
    let index_size = if version >= 1 {
        check_int_width(sizes2 & 0x0F, "index")?
    } else {
        0
    };

    let item_count = if version < 2 {
        stream.read_u16()? as u32
    } else {
        stream.read_u32()?
    };

    let mut items = Vec::new();
    for _ in 0..item_count {
        let item_id = if version < 2 {
            stream.read_u16()? as u32
        } else {
            stream.read_u32()?
        };

        // construction_method (version >= 1): 12 reserved bits + 4 bits
        let construction_method = if version >= 1 {
            (stream.read_u16()? & 0x0F) as u8
        } else {
            construction::FILE_OFFSET
        };

        let data_reference_index = stream.read_u16()?;

        let base_offset_field = field_at(stream, base_offset_size);
        let base_offset = stream.read_uint(base_offset_size)?;

        let extent_count = stream.read_u16()?;
        let mut extents = Vec::with_capacity(extent_count as usize);
        for _ in 0..extent_count {
            if version >= 1 && index_size > 0 {
                stream.read_uint(index_size)?;
            }

            let offset_field = field_at(stream, offset_size);
            let extent_offset = stream.read_uint(offset_size)?;
            let extent_length = stream.read_uint(length_size)?;

            extents.push(ExtentData {
                extent_offset,
                extent_length,
                absolute_offset: None,
                length: extent_length,
                offset_field,
            });
        }
        check_within(stream, end, "iloc")?;

        items.push(ItemLocation {
            item_id,
            construction_method,
            data_reference_index,
            base_offset,
            base_offset_field,
            extents,
        });
    }

    Ok(ItemLocationBox {
        version,
        offset_size,
        length_size,
        base_offset_size,
        index_size,
        items,
    })
}

/// Read a null-terminated string, stopping at `end`
fn read_cstring<S: Read + Seek>(stream: &mut ByteStream<S>, end: u64) -> Result<String> {
    let mut bytes = Vec::new();
    while stream.position() < end {
        let byte = stream.read_u8()?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse `iinf` and its `infe` children; the stream sits just past version/flags
pub(crate) fn parse_iinf<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    version: u8,
    end: u64,
) -> Result<Vec<ItemInfoEntry>> {
    let entry_count = if version == 0 {
        stream.read_u16()? as u32
    } else {
        stream.read_u32()?
    };

    let mut entries = Vec::new();
    for _ in 0..entry_count {
        if stream.position() >= end {
            break;
        }

        let infe_start = stream.position();
        let header = BoxHeader::read(stream, end)?;
        let infe_end = infe_start + header.size;
        if infe_end > end {
            return Err(Error::BoxOverrun {
                offset: infe_start,
                size: header.size,
                parent_end: end,
            });
        }

        if header.box_type == BoxType::InfeBox {
            stream.mark();
            let (infe_version, _flags) = read_box_header_ext(stream)?;
            entries.push(parse_infe(stream, infe_version, infe_end)?);
            stream.reset()?;
        }

        stream.seek(infe_end)?;
    }

    Ok(entries)
}

fn parse_infe<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    version: u8,
    end: u64,
) -> Result<ItemInfoEntry> {
    if version < 2 {
        // infe v0/v1: item_ID, protection index, name, content_type, encoding
        let item_id = stream.read_u16()? as u32;
        stream.read_u16()?;
        let name = read_cstring(stream, end)?;
        let content_type = read_cstring(stream, end)?;
        return Ok(ItemInfoEntry {
            item_id,
            item_type: *b"mime",
            name,
            content_type: Some(content_type),
        });
    }

    let item_id = if version == 2 {
        stream.read_u16()? as u32
    } else {
        stream.read_u32()?
    };

    // item_protection_index (2 bytes)
    stream.read_u16()?;

    let item_type = stream.read_fourcc()?;
    let name = read_cstring(stream, end)?;
    let content_type = if &item_type == b"mime" {
        Some(read_cstring(stream, end)?)
    } else {
        None
    };

    Ok(ItemInfoEntry {
        item_id,
        item_type,
        name,
        content_type,
    })
}

/// Parse `ipma`; the stream sits just past version/flags
pub(crate) fn parse_ipma<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    version: u8,
    flags: u32,
    box_start: u64,
    end: u64,
) -> Result<ItemPropertyAssociation> {
    if version > 1 {
        return Err(Error::Unsupported(format!(
            "ipma version {} at offset {}",
            version, box_start
        )));
    }

    let mut ipma = ItemPropertyAssociation {
        version,
        flags,
        entries: Vec::new(),
    };

    let entry_count = stream.read_u32()?;
    for _ in 0..entry_count {
        let offset = stream.position();
        let item_id = if version < 1 {
            stream.read_u16()? as u32
        } else {
            stream.read_u32()?
        };

        let count_offset = stream.position();
        let assoc_count = stream.read_u8()?;

        let mut associations = Vec::with_capacity(assoc_count as usize);
        for _ in 0..assoc_count {
            let association = if flags & 1 != 0 {
                // 16-bit property index
                let value = stream.read_u16()?;
                Association {
                    property_index: value & 0x7FFF,
                    essential: value & 0x8000 != 0,
                }
            } else {
                // 8-bit property index
                let value = stream.read_u8()?;
                Association {
                    property_index: (value & 0x7F) as u16,
                    essential: value & 0x80 != 0,
                }
            };
            associations.push(association);
        }
        check_within(stream, end, "ipma")?;

        ipma.entries.push(AssociationEntry {
            item_id,
            offset,
            count_offset,
            associations,
        });
    }

    Ok(ipma)
}
