//! Test utilities for building synthetic containers.
//!
//! Every test scenario is reproducible from code, so no binary fixtures are
//! committed. This module provides builders for:
//! - TIFF blocks with date tags in IFD0, the Exif IFD and the GPS IFD
//! - minimal HEIF files with configurable `iloc`/`ipma` layouts
//! - JPEG files with APP1 Exif and XMP segments
//!
//! # Usage
//!
//! ```
//! use heif_date_io::test_utils::*;
//! use heif_date_io::tiff::{tags, Ifd};
//! use heif_date_io::Endian;
//!
//! let tiff = TiffBuilder::new(Endian::Little)
//!     .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
//!     .build();
//! let heic = HeifBuilder::new().with_exif(&tiff).build();
//! assert!(heif_date_io::HeifFile::from_bytes(&heic).is_ok());
//! ```

use crate::{stream::Endian, tiff::Ifd};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Wrap a payload in a plain box
pub fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend(((payload.len() + 8) as u32).to_be_bytes());
    out.extend(fourcc);
    out.extend(payload);
    out
}

/// Wrap a payload in a full box (version + flags)
pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 4);
    body.push(version);
    body.extend(&flags.to_be_bytes()[1..]);
    body.extend(payload);
    make_box(fourcc, &body)
}

/// `ispe` property: image spatial extents
pub fn ispe(width: u32, height: u32) -> Vec<u8> {
    let mut payload = width.to_be_bytes().to_vec();
    payload.extend(height.to_be_bytes());
    make_full_box(b"ispe", 0, 0, &payload)
}

/// A minimal XMP packet carrying the given raw `rdf:Description` body
pub fn xmp_packet(description_attrs: &str, elements: &str) -> String {
    format!(
        concat!(
            "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n",
            "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n",
            " <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n",
            "  <rdf:Description rdf:about=\"\"\n",
            "    xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\"\n",
            "    xmlns:photoshop=\"http://ns.adobe.com/photoshop/1.0/\"\n",
            "    xmlns:exif=\"http://ns.adobe.com/exif/1.0/\"\n",
            "    {}>\n",
            "{}\n",
            "  </rdf:Description>\n",
            " </rdf:RDF>\n",
            "</x:xmpmeta>\n",
            "<?xpacket end=\"w\"?>"
        ),
        description_attrs, elements
    )
}

struct TiffEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    value: Vec<u8>,
}

/// Builder for TIFF blocks (the payload of an EXIF item or APP1 segment)
pub struct TiffBuilder {
    endian: Endian,
    ifd0: Vec<TiffEntry>,
    exif: Vec<TiffEntry>,
    gps: Vec<TiffEntry>,
}

impl TiffBuilder {
    pub fn new(endian: Endian) -> Self {
        Self {
            endian,
            ifd0: Vec::new(),
            exif: Vec::new(),
            gps: Vec::new(),
        }
    }

    /// Add an entry with raw value bytes (already in the block's byte order)
    pub fn entry(mut self, ifd: Ifd, tag: u16, field_type: u16, count: u32, value: Vec<u8>) -> Self {
        let entry = TiffEntry {
            tag,
            field_type,
            count,
            value,
        };
        match ifd {
            Ifd::Ifd0 => self.ifd0.push(entry),
            Ifd::Exif => self.exif.push(entry),
            Ifd::Gps => self.gps.push(entry),
        }
        self
    }

    /// Add an ASCII entry of `count` bytes, zero padded
    pub fn ascii(self, ifd: Ifd, tag: u16, text: &str, count: u32) -> Self {
        let mut value = text.as_bytes().to_vec();
        value.resize(count as usize, 0);
        self.entry(ifd, tag, 2, count, value)
    }

    fn put_u16(&self, out: &mut Vec<u8>, value: u16) {
        let mut buf = [0u8; 2];
        match self.endian {
            Endian::Big => BigEndian::write_u16(&mut buf, value),
            Endian::Little => LittleEndian::write_u16(&mut buf, value),
        }
        out.extend(buf);
    }

    fn put_u32(&self, out: &mut Vec<u8>, value: u32) {
        let mut buf = [0u8; 4];
        match self.endian {
            Endian::Big => BigEndian::write_u32(&mut buf, value),
            Endian::Little => LittleEndian::write_u32(&mut buf, value),
        }
        out.extend(buf);
    }

    fn pointer(&self, tag: u16, offset: u32) -> TiffEntry {
        let mut value = Vec::new();
        self.put_u32(&mut value, offset);
        TiffEntry {
            tag,
            field_type: 4,
            count: 1,
            value,
        }
    }

    fn write_ifd(&self, out: &mut Vec<u8>, data: &mut Vec<u8>, data_base: u32, entries: &[TiffEntry]) {
        self.put_u16(out, entries.len() as u16);
        for entry in entries {
            self.put_u16(out, entry.tag);
            self.put_u16(out, entry.field_type);
            self.put_u32(out, entry.count);
            if entry.value.len() <= 4 {
                let mut inline = entry.value.clone();
                inline.resize(4, 0);
                out.extend(inline);
            } else {
                self.put_u32(out, data_base + data.len() as u32);
                data.extend(&entry.value);
                if data.len() % 2 == 1 {
                    data.push(0);
                }
            }
        }
        self.put_u32(out, 0);
    }

    pub fn build(mut self) -> Vec<u8> {
        let ifd_size = |n: usize| (2 + 12 * n + 4) as u32;

        let exif_entries = std::mem::take(&mut self.exif);
        let gps_entries = std::mem::take(&mut self.gps);
        let mut ifd0_entries = std::mem::take(&mut self.ifd0);

        let n0 = ifd0_entries.len()
            + usize::from(!exif_entries.is_empty())
            + usize::from(!gps_entries.is_empty());
        let exif_offset = 8 + ifd_size(n0);
        let gps_offset = exif_offset
            + if exif_entries.is_empty() {
                0
            } else {
                ifd_size(exif_entries.len())
            };
        let data_offset = gps_offset
            + if gps_entries.is_empty() {
                0
            } else {
                ifd_size(gps_entries.len())
            };

        if !exif_entries.is_empty() {
            ifd0_entries.push(self.pointer(0x8769, exif_offset));
        }
        if !gps_entries.is_empty() {
            ifd0_entries.push(self.pointer(0x8825, gps_offset));
        }
        ifd0_entries.sort_by_key(|e| e.tag);

        let mut out = match self.endian {
            Endian::Little => b"II".to_vec(),
            Endian::Big => b"MM".to_vec(),
        };
        self.put_u16(&mut out, 0x002A);
        self.put_u32(&mut out, 8);

        let mut data = Vec::new();
        self.write_ifd(&mut out, &mut data, data_offset, &ifd0_entries);
        if !exif_entries.is_empty() {
            self.write_ifd(&mut out, &mut data, data_offset, &exif_entries);
        }
        if !gps_entries.is_empty() {
            self.write_ifd(&mut out, &mut data, data_offset, &gps_entries);
        }
        out.extend(data);
        out
    }
}

#[derive(Clone)]
struct ItemSpec {
    id: u32,
    item_type: [u8; 4],
    content_type: Option<&'static str>,
    data: Vec<u8>,
    in_idat: bool,
    split: bool,
}

/// Builder for minimal HEIF files: `ftyp`, `meta` and `mdat`
///
/// The default file has one `hvc1` item (id 1, primary) whose data lives in
/// `mdat` after `meta`, one `ispe` property and an `ipma` entry associating
/// item 1 with property 1.
pub struct HeifBuilder {
    items: Vec<ItemSpec>,
    properties: Vec<Vec<u8>>,
    associations: Vec<(u32, Vec<(u16, bool)>)>,
    ipma_version: u8,
    ipma_flags: u32,
    ipma_before_ipco: bool,
    iloc_after_iprp: bool,
    include_ipma: bool,
    offset_size: u8,
    base_offset_size: u8,
    mdat_before_meta: bool,
    large_meta: bool,
    mdat_to_end: bool,
}

impl Default for HeifBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeifBuilder {
    pub fn new() -> Self {
        Self {
            items: vec![ItemSpec {
                id: 1,
                item_type: *b"hvc1",
                content_type: None,
                data: b"hevc-image-data!".to_vec(),
                in_idat: false,
                split: false,
            }],
            properties: vec![ispe(64, 48)],
            associations: vec![(1, vec![(1, false)])],
            ipma_version: 0,
            ipma_flags: 0,
            ipma_before_ipco: false,
            iloc_after_iprp: false,
            include_ipma: true,
            offset_size: 4,
            base_offset_size: 0,
            mdat_before_meta: false,
            large_meta: false,
            mdat_to_end: false,
        }
    }

    /// Replace the primary item's coded data
    pub fn with_item_data(mut self, data: &[u8]) -> Self {
        self.items[0].data = data.to_vec();
        self
    }

    /// Add an `Exif` item (id 2) holding `tiff` behind a zero header offset
    pub fn with_exif(self, tiff: &[u8]) -> Self {
        let mut payload = vec![0, 0, 0, 0];
        payload.extend(tiff);
        self.with_exif_payload(payload)
    }

    /// Add an `Exif` item (id 2) with a raw payload, prefix included
    pub fn with_exif_payload(mut self, payload: Vec<u8>) -> Self {
        self.items.push(ItemSpec {
            id: 2,
            item_type: *b"Exif",
            content_type: None,
            data: payload,
            in_idat: false,
            split: false,
        });
        self
    }

    /// Add an XMP item (id 3)
    pub fn with_xmp(mut self, xmp: &[u8]) -> Self {
        self.items.push(ItemSpec {
            id: 3,
            item_type: *b"mime",
            content_type: Some("application/rdf+xml"),
            data: xmp.to_vec(),
            in_idat: false,
            split: false,
        });
        self
    }

    /// Store the Exif item as two extents, second half first on disk
    pub fn split_exif(mut self) -> Self {
        for item in self.items.iter_mut().filter(|i| &i.item_type == b"Exif") {
            item.split = true;
        }
        self
    }

    /// Store the Exif item in `idat` (construction method 1)
    pub fn exif_in_idat(mut self) -> Self {
        for item in self.items.iter_mut().filter(|i| &i.item_type == b"Exif") {
            item.in_idat = true;
        }
        self
    }

    /// Append a property box to `ipco`
    pub fn with_property(mut self, property: Vec<u8>) -> Self {
        self.properties.push(property);
        self
    }

    /// Append a separate ipma entry for `item_id`, even if it already has one
    pub fn repeat_ipma_entry(mut self, item_id: u32, property_index: u16, essential: bool) -> Self {
        self.associations
            .push((item_id, vec![(property_index, essential)]));
        self
    }

    /// Add an association for `item_id`, creating its ipma entry if needed
    pub fn associate(mut self, item_id: u32, property_index: u16, essential: bool) -> Self {
        match self.associations.iter_mut().find(|(id, _)| *id == item_id) {
            Some((_, list)) => list.push((property_index, essential)),
            None => self
                .associations
                .push((item_id, vec![(property_index, essential)])),
        }
        self
    }

    pub fn ipma_version(mut self, version: u8) -> Self {
        self.ipma_version = version;
        self
    }

    /// Use 2-byte association slots (ipma flag bit 0)
    pub fn wide_property_indices(mut self) -> Self {
        self.ipma_flags |= 1;
        self
    }

    /// Place `ipma` before `ipco` inside `iprp`
    pub fn ipma_before_ipco(mut self) -> Self {
        self.ipma_before_ipco = true;
        self
    }

    /// Place `iloc` after `iprp` inside `meta`
    pub fn iloc_after_iprp(mut self) -> Self {
        self.iloc_after_iprp = true;
        self
    }

    pub fn without_ipma(mut self) -> Self {
        self.include_ipma = false;
        self
    }

    /// Width of iloc extent offsets (0, 4 or 8)
    pub fn offset_size(mut self, size: u8) -> Self {
        self.offset_size = size;
        self
    }

    /// Address items through `base_offset` with `offset_size == 0`
    pub fn base_offsets(mut self) -> Self {
        self.offset_size = 0;
        self.base_offset_size = 4;
        self
    }

    pub fn mdat_before_meta(mut self) -> Self {
        self.mdat_before_meta = true;
        self
    }

    /// Give `meta` a 64-bit largesize header
    pub fn large_meta(mut self) -> Self {
        self.large_meta = true;
        self
    }

    /// Give `mdat` a size of 0 (extends to end of file)
    pub fn mdat_to_end(mut self) -> Self {
        self.mdat_to_end = true;
        self
    }

    fn ftyp() -> Vec<u8> {
        make_box(b"ftyp", b"heic\0\0\0\0mif1heic")
    }

    fn hdlr() -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend(b"pict");
        payload.extend([0u8; 12]);
        payload.push(0);
        make_full_box(b"hdlr", 0, 0, &payload)
    }

    fn iinf(&self) -> Vec<u8> {
        let mut payload = (self.items.len() as u16).to_be_bytes().to_vec();
        for item in &self.items {
            let mut infe = (item.id as u16).to_be_bytes().to_vec();
            infe.extend([0, 0]);
            infe.extend(item.item_type);
            infe.push(0);
            if let Some(content_type) = item.content_type {
                infe.extend(content_type.as_bytes());
                infe.push(0);
            }
            payload.extend(make_full_box(b"infe", 2, 0, &infe));
        }
        make_full_box(b"iinf", 0, 0, &payload)
    }

    fn put_uint(out: &mut Vec<u8>, width: u8, value: u64) {
        match width {
            0 => {}
            4 => out.extend((value as u32).to_be_bytes()),
            _ => out.extend(value.to_be_bytes()),
        }
    }

    /// `extents[i]` is the list of (offset, length) for item i
    fn iloc(&self, extents: &[Vec<(u64, u64)>]) -> Vec<u8> {
        let version = if self.items.iter().any(|i| i.in_idat) { 1 } else { 0 };
        let mut payload = vec![
            (self.offset_size << 4) | 4,
            self.base_offset_size << 4,
        ];
        payload.extend((self.items.len() as u16).to_be_bytes());
        for (item, extents) in self.items.iter().zip(extents) {
            payload.extend((item.id as u16).to_be_bytes());
            if version >= 1 {
                payload.extend([0, u8::from(item.in_idat)]);
            }
            payload.extend([0, 0]);
            let base = if self.offset_size == 0 {
                extents[0].0
            } else {
                0
            };
            Self::put_uint(&mut payload, self.base_offset_size, base);
            payload.extend((extents.len() as u16).to_be_bytes());
            for (offset, length) in extents {
                Self::put_uint(&mut payload, self.offset_size, *offset);
                payload.extend((*length as u32).to_be_bytes());
            }
        }
        make_full_box(b"iloc", version, 0, &payload)
    }

    fn ipma(&self) -> Vec<u8> {
        let mut payload = (self.associations.len() as u32).to_be_bytes().to_vec();
        for (item_id, list) in &self.associations {
            if self.ipma_version < 1 {
                payload.extend((*item_id as u16).to_be_bytes());
            } else {
                payload.extend(item_id.to_be_bytes());
            }
            payload.push(list.len() as u8);
            for (index, essential) in list {
                if self.ipma_flags & 1 != 0 {
                    let value = index | if *essential { 0x8000 } else { 0 };
                    payload.extend(value.to_be_bytes());
                } else {
                    payload.push(*index as u8 | if *essential { 0x80 } else { 0 });
                }
            }
        }
        make_full_box(b"ipma", self.ipma_version, self.ipma_flags, &payload)
    }

    fn iprp(&self) -> Vec<u8> {
        let ipco = make_box(b"ipco", &self.properties.concat());
        let ipma = if self.include_ipma { self.ipma() } else { Vec::new() };
        let children = if self.ipma_before_ipco {
            [ipma, ipco].concat()
        } else {
            [ipco, ipma].concat()
        };
        make_box(b"iprp", &children)
    }

    fn meta(&self, extents: &[Vec<(u64, u64)>], idat: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        body.extend(Self::hdlr());
        body.extend(make_full_box(b"pitm", 0, 0, &1u16.to_be_bytes()));
        body.extend(self.iinf());
        if !self.iloc_after_iprp {
            body.extend(self.iloc(extents));
        }
        if !idat.is_empty() {
            body.extend(make_box(b"idat", idat));
        }
        body.extend(self.iprp());
        if self.iloc_after_iprp {
            body.extend(self.iloc(extents));
        }

        if self.large_meta {
            let mut out = 1u32.to_be_bytes().to_vec();
            out.extend(b"meta");
            out.extend((body.len() as u64 + 16).to_be_bytes());
            out.extend(body);
            out
        } else {
            make_box(b"meta", &body)
        }
    }

    /// Lay out mdat and idat content, returning per-item extents relative to
    /// the start of each area, plus the two areas
    fn layout(&self) -> (Vec<Vec<(bool, u64, u64)>>, Vec<u8>, Vec<u8>) {
        let mut mdat = Vec::new();
        let mut idat = Vec::new();
        let mut extents = Vec::new();
        for item in &self.items {
            let area = if item.in_idat { &mut idat } else { &mut mdat };
            if item.split && item.data.len() >= 2 {
                let (head, tail) = item.data.split_at(item.data.len() / 2);
                let tail_at = area.len() as u64;
                area.extend(tail);
                let head_at = area.len() as u64;
                area.extend(head);
                extents.push(vec![
                    (item.in_idat, head_at, head.len() as u64),
                    (item.in_idat, tail_at, tail.len() as u64),
                ]);
            } else {
                extents.push(vec![(item.in_idat, area.len() as u64, item.data.len() as u64)]);
                area.extend(&item.data);
            }
        }
        (extents, mdat, idat)
    }

    pub fn build(self) -> Vec<u8> {
        let (relative, mdat_data, idat) = self.layout();
        let ftyp = Self::ftyp();

        let absolute = |meta_len: u64| -> Vec<Vec<(u64, u64)>> {
            let mdat_data_start = if self.mdat_before_meta {
                ftyp.len() as u64 + 8
            } else {
                ftyp.len() as u64 + meta_len + 8
            };
            relative
                .iter()
                .map(|extents| {
                    extents
                        .iter()
                        .map(|(in_idat, offset, len)| {
                            if *in_idat {
                                (*offset, *len)
                            } else {
                                (mdat_data_start + offset, *len)
                            }
                        })
                        .collect()
                })
                .collect()
        };

        // Offsets are fixed width, so the first pass fixes meta's length
        let meta_len = self.meta(&absolute(0), &idat).len() as u64;
        let meta = self.meta(&absolute(meta_len), &idat);

        let mdat = if self.mdat_to_end {
            let mut out = 0u32.to_be_bytes().to_vec();
            out.extend(b"mdat");
            out.extend(&mdat_data);
            out
        } else {
            make_box(b"mdat", &mdat_data)
        };

        let mut file = ftyp;
        if self.mdat_before_meta {
            file.extend(mdat);
            file.extend(meta);
        } else {
            file.extend(meta);
            file.extend(mdat);
        }
        file
    }
}

/// Build a JPEG with optional APP1 Exif and XMP segments
pub fn jpeg_with(tiff: Option<&[u8]>, xmp: Option<&[u8]>) -> Vec<u8> {
    fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
        out.extend([0xFF, marker]);
        out.extend(((body.len() + 2) as u16).to_be_bytes());
        out.extend(body);
    }

    let mut out = vec![0xFF, 0xD8];
    segment(&mut out, 0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
    if let Some(tiff) = tiff {
        let mut body = b"Exif\0\0".to_vec();
        body.extend(tiff);
        segment(&mut out, 0xE1, &body);
    }
    if let Some(xmp) = xmp {
        let mut body = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        body.extend(xmp);
        segment(&mut out, 0xE1, &body);
    }
    segment(&mut out, 0xDB, &[0u8; 65]);
    // SOS with a tiny scan, then EOI
    segment(&mut out, 0xDA, &[1, 1, 0, 0, 0x3F, 0]);
    out.extend([0x12, 0x34, 0xFF, 0x00, 0x56]);
    out.extend([0xFF, 0xD9]);
    out
}
