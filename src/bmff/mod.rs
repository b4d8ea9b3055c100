//! ISO-BMFF / HEIF box model
//!
//! [`HeifFile`] is the parse context for one file: the box tree, the item
//! tables of the top-level `meta` box, and handles to the boxes the date
//! patcher and structural injector rewrite. It is built once per pass and
//! never mutated; rewrites operate on raw bytes and are verified by parsing
//! again.

mod boxes;
mod items;

pub use boxes::{BoxHeader, BoxInfo, BoxPayload, BoxType, SizeField};
pub(crate) use boxes::{write_box_header_ext, HEADER_SIZE};
pub use items::{
    construction, Association, AssociationEntry, ExtentData, FieldRef, ItemInfoEntry,
    ItemLocation, ItemLocationBox, ItemPropertyAssociation, PrimaryItem,
};

use crate::{
    error::{Error, Result},
    segment::{read_payload, ByteRange},
    stream::{ByteStream, Endian},
};
use atree::{Arena, Token};
use std::{
    collections::HashMap,
    io::{Read, Seek, Write},
};

const COPY_CHUNK: u64 = 64 * 1024;

/// One box as listed by [`HeifFile::boxes`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxSummary {
    /// Slash-separated type path, e.g. `/meta/iprp/ipco`
    pub path: String,
    pub box_type: BoxType,
    pub offset: u64,
    pub size: u64,
}

/// Parsed HEIF container
pub struct HeifFile {
    tree: Arena<BoxInfo>,
    root: Token,
    file_len: u64,
    box_map: HashMap<String, Vec<Token>>,
    meta: Token,
    iprp: Token,
    ipco: Token,
    ipma: Token,
    primary_item: Option<u32>,
    iloc: Option<ItemLocationBox>,
    items: Vec<ItemLocation>,
    item_infos: Vec<ItemInfoEntry>,
    properties: Vec<Token>,
    associations: ItemPropertyAssociation,
}

fn add_token_to_cache(box_map: &mut HashMap<String, Vec<Token>>, path: String, token: Token) {
    box_map.entry(path).or_default().push(token);
}

fn path_from_token(tree: &Arena<BoxInfo>, token: Token) -> String {
    let mut path = format!("/{}", tree[token].data.box_type);
    for parent in token.ancestors_tokens(tree) {
        if tree[parent].data.box_type == BoxType::Empty {
            break;
        }
        path = format!("/{}{}", tree[parent].data.box_type, path);
    }
    path
}

fn collect_paths(
    tree: &Arena<BoxInfo>,
    token: Token,
    box_map: &mut HashMap<String, Vec<Token>>,
    order: &mut Vec<Token>,
) {
    for child in token.children_tokens(tree) {
        add_token_to_cache(box_map, path_from_token(tree, child), child);
        order.push(child);
        collect_paths(tree, child, box_map, order);
    }
}

impl HeifFile {
    /// Parse the whole box tree of a HEIF file
    ///
    /// Fails if `meta`, `iprp`, `ipco` or `ipma` is missing, if any child box
    /// overruns its parent, or if an association references a property that
    /// `ipco` does not hold.
    pub fn parse<S: Read + Seek>(stream: &mut ByteStream<S>) -> Result<Self> {
        stream.set_endian(Endian::Big);
        stream.seek(0)?;
        let file_len = stream.len();

        let (mut tree, root) = Arena::with_data(BoxInfo::root(file_len));
        boxes::build_box_tree(stream, file_len, &mut tree, &root)?;

        let first_box = root.children_tokens(&tree).next().map(|t| &tree[t].data);
        match first_box {
            Some(info) if info.box_type == BoxType::FtypBox => {}
            other => {
                return Err(Error::BoxTypeMismatch {
                    offset: 0,
                    expected: BoxType::FtypBox.to_string(),
                    found: other.map_or_else(|| "nothing".to_string(), |i| i.box_type.to_string()),
                })
            }
        }

        let mut box_map = HashMap::new();
        collect_paths(&tree, root, &mut box_map, &mut Vec::new());

        let first = |path: &str| box_map.get(path).and_then(|tokens| tokens.first().copied());
        let meta = first("/meta").ok_or(Error::MissingBox("meta"))?;
        let iprp = first("/meta/iprp").ok_or(Error::MissingBox("iprp"))?;
        let ipco = first("/meta/iprp/ipco").ok_or(Error::MissingBox("ipco"))?;
        let ipma = first("/meta/iprp/ipma").ok_or(Error::MissingBox("ipma"))?;

        let primary_item = first("/meta/pitm").and_then(|t| match &tree[t].data.payload {
            BoxPayload::PrimaryItem(pitm) => Some(pitm.item_id),
            _ => None,
        });

        let iloc = first("/meta/iloc").and_then(|t| match &tree[t].data.payload {
            BoxPayload::ItemLocation(iloc) => Some(iloc.clone()),
            _ => None,
        });

        let item_infos = first("/meta/iinf")
            .and_then(|t| match &tree[t].data.payload {
                BoxPayload::ItemInfo(entries) => Some(entries.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let associations = match &tree[ipma].data.payload {
            BoxPayload::PropertyAssociation(ipma) => ipma.clone(),
            _ => return Err(Error::MissingBox("ipma")),
        };

        let idat = first("/meta/idat").map(|t| {
            let info = &tree[t].data;
            ByteRange::new(info.content_offset(), info.end() - info.content_offset())
        });

        let mut items = iloc.as_ref().map(|b| b.items.clone()).unwrap_or_default();
        for item in &mut items {
            item.resolve(file_len, idat)?;
            if !item.is_resolved() {
                log::debug!(
                    "item {} uses construction method {} (data reference {}); not resolvable",
                    item.item_id,
                    item.construction_method,
                    item.data_reference_index
                );
            }
        }

        let properties: Vec<Token> = ipco.children_tokens(&tree).collect();
        for entry in &associations.entries {
            for association in &entry.associations {
                if association.property_index as usize > properties.len() {
                    return Err(Error::PropertyIndexOutOfRange {
                        index: association.property_index,
                        count: properties.len(),
                    });
                }
            }
        }

        log::debug!(
            "parsed HEIF: {} bytes, {} items, {} properties, primary item {:?}",
            file_len,
            items.len(),
            properties.len(),
            primary_item
        );

        Ok(Self {
            tree,
            root,
            file_len,
            box_map,
            meta,
            iprp,
            ipco,
            ipma,
            primary_item,
            iloc,
            items,
            item_infos,
            properties,
            associations,
        })
    }

    /// Parse from an in-memory buffer
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::parse(&mut ByteStream::from_slice(data))
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn primary_item(&self) -> Option<u32> {
        self.primary_item
    }

    pub fn meta(&self) -> &BoxInfo {
        self.node(self.meta)
    }

    pub fn iprp(&self) -> &BoxInfo {
        self.node(self.iprp)
    }

    pub fn ipco(&self) -> &BoxInfo {
        self.node(self.ipco)
    }

    pub fn ipma(&self) -> &BoxInfo {
        self.node(self.ipma)
    }

    /// First box at a slash-separated type path, e.g. `/meta/iloc`
    pub fn find(&self, path: &str) -> Option<&BoxInfo> {
        self.box_map
            .get(path)
            .and_then(|tokens| tokens.first())
            .map(|t| self.node(*t))
    }

    /// Layout parameters of the `iloc` box, if present
    pub fn item_location_box(&self) -> Option<&ItemLocationBox> {
        self.iloc.as_ref()
    }

    /// Every `iloc` entry with resolved absolute extents
    pub fn item_locations(&self) -> &[ItemLocation] {
        &self.items
    }

    pub fn item_location(&self, item_id: u32) -> Result<&ItemLocation> {
        self.items
            .iter()
            .find(|item| item.item_id == item_id)
            .ok_or(Error::ItemNotFound(item_id))
    }

    pub fn item_infos(&self) -> &[ItemInfoEntry] {
        &self.item_infos
    }

    /// Id of the first `Exif` item
    pub fn exif_item_id(&self) -> Option<u32> {
        self.item_infos.iter().find(|e| e.is_exif()).map(|e| e.item_id)
    }

    /// Id of the first XMP (`mime`, `application/rdf+xml`) item
    pub fn xmp_item_id(&self) -> Option<u32> {
        self.item_infos.iter().find(|e| e.is_xmp()).map(|e| e.item_id)
    }

    /// Number of property boxes in `ipco`
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Property boxes in index order (index 1 first)
    pub fn properties(&self) -> Vec<&BoxInfo> {
        self.properties.iter().map(|t| self.node(*t)).collect()
    }

    pub fn property_types(&self) -> Vec<BoxType> {
        self.properties().iter().map(|p| p.box_type).collect()
    }

    pub fn property_association(&self) -> &ItemPropertyAssociation {
        &self.associations
    }

    /// Association list for one item
    pub fn associations(&self, item_id: u32) -> Result<&[Association]> {
        self.associations
            .entry(item_id)
            .map(|e| e.associations.as_slice())
            .ok_or(Error::ItemNotFound(item_id))
    }

    /// Assemble an item's bytes from its extents in declaration order
    pub fn read_item<S: Read + Seek>(&self, stream: &mut ByteStream<S>, item_id: u32) -> Result<Vec<u8>> {
        let item = self.item_location(item_id)?;
        if !item.is_resolved() {
            return Err(Error::Unsupported(format!(
                "item {} uses construction method {}",
                item_id, item.construction_method
            )));
        }
        read_payload(stream, item)
    }

    /// All boxes, depth-first in file order
    pub fn boxes(&self) -> Vec<BoxSummary> {
        let mut order = Vec::new();
        collect_paths(&self.tree, self.root, &mut HashMap::new(), &mut order);
        order
            .into_iter()
            .map(|t| {
                let info = self.node(t);
                BoxSummary {
                    path: path_from_token(&self.tree, t),
                    box_type: info.box_type,
                    offset: info.offset,
                    size: info.size,
                }
            })
            .collect()
    }

    /// Re-serialise the file header-by-header from the parsed tree
    ///
    /// Headers of walked boxes are written from the tree; leaf payloads are
    /// copied from `source`. An unmodified tree reproduces the input exactly.
    pub fn rewrite<S: Read + Seek, W: Write>(
        &self,
        source: &mut ByteStream<S>,
        writer: &mut W,
    ) -> Result<u64> {
        let mut written = 0;
        for child in self.root.children_tokens(&self.tree) {
            written += self.write_node(child, source, writer)?;
        }
        Ok(written)
    }

    fn write_node<S: Read + Seek, W: Write>(
        &self,
        token: Token,
        source: &mut ByteStream<S>,
        writer: &mut W,
    ) -> Result<u64> {
        let info = self.node(token);
        let mut written = info.header().write(writer)?;
        if let (Some(version), Some(flags)) = (info.version, info.flags) {
            written += write_box_header_ext(writer, version, flags)?;
        }

        if info.is_container() {
            for child in token.children_tokens(&self.tree) {
                written += self.write_node(child, source, writer)?;
            }
        } else {
            let mut pos = info.content_offset();
            while pos < info.end() {
                let len = (info.end() - pos).min(COPY_CHUNK);
                writer.write_all(&source.peek_at(pos, len as usize)?)?;
                pos += len;
            }
            written += info.end() - info.content_offset();
        }
        Ok(written)
    }

    pub(crate) fn node(&self, token: Token) -> &BoxInfo {
        &self.tree[token].data
    }

    pub(crate) fn ipco_token(&self) -> Token {
        self.ipco
    }

    pub(crate) fn ipma_token(&self) -> Token {
        self.ipma
    }

    /// A box followed by its ancestors, innermost first, excluding the root
    pub(crate) fn lineage(&self, token: Token) -> Vec<&BoxInfo> {
        std::iter::once(token)
            .chain(token.ancestors_tokens(&self.tree))
            .filter(|t| *t != self.root)
            .map(|t| self.node(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::HeifBuilder;
    use std::io::Cursor;

    #[test]
    fn test_parse_minimal() {
        let data = HeifBuilder::new().build();
        let heif = HeifFile::from_bytes(&data).unwrap();

        assert_eq!(heif.primary_item(), Some(1));
        assert_eq!(heif.property_count(), 1);
        assert_eq!(heif.property_types(), vec![BoxType::IspeBox]);
        assert_eq!(
            heif.associations(1).unwrap(),
            &[Association {
                property_index: 1,
                essential: false
            }]
        );
        assert!(matches!(heif.associations(9), Err(Error::ItemNotFound(9))));
        assert_eq!(heif.lineage(heif.ipco_token()).len(), 3);
        assert!(heif.find("/meta/iloc").is_some());
    }

    #[test]
    fn test_missing_ipma() {
        let data = HeifBuilder::new().without_ipma().build();
        assert!(matches!(
            HeifFile::from_bytes(&data),
            Err(Error::MissingBox("ipma"))
        ));
    }

    #[test]
    fn test_ftyp_must_come_first() {
        let mut data = HeifBuilder::new().build();
        data[4..8].copy_from_slice(b"free");
        assert!(matches!(
            HeifFile::from_bytes(&data),
            Err(Error::BoxTypeMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn test_dangling_property_index() {
        let data = HeifBuilder::new().associate(1, 4, false).build();
        assert!(matches!(
            HeifFile::from_bytes(&data),
            Err(Error::PropertyIndexOutOfRange { index: 4, count: 1 })
        ));
    }

    #[test]
    fn test_read_item() {
        let data = HeifBuilder::new().with_item_data(b"pixels!").build();
        let heif = HeifFile::from_bytes(&data).unwrap();
        let mut stream = ByteStream::from_slice(&data);
        assert_eq!(heif.read_item(&mut stream, 1).unwrap(), b"pixels!");
    }

    #[test]
    fn test_rewrite_round_trip() {
        let data = HeifBuilder::new()
            .with_exif(b"II*\0\x08\0\0\0\0\0")
            .build();
        let heif = HeifFile::from_bytes(&data).unwrap();
        let mut out = Cursor::new(Vec::new());
        let written = heif
            .rewrite(&mut ByteStream::from_slice(&data), &mut out)
            .unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(out.into_inner(), data);

        let paths: Vec<String> = heif.boxes().into_iter().map(|b| b.path).collect();
        assert_eq!(paths[0], "/ftyp");
        assert!(paths.contains(&"/meta/iprp/ipco/ispe".to_string()));
    }
}
