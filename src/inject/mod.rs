//! Structural property injection
//!
//! Adds property boxes to `ipco` and associates them with one item in
//! `ipma`. Unlike date patching this grows the file, so every size and
//! offset downstream of the two insertion points is repaired:
//!
//! 1. encode the new property boxes and association slots
//! 2. insert them at the end of `ipco` and after the target's last slot in `ipma`
//! 3. grow the size field of every box enclosing an insertion point
//! 4. bump the target's association count
//! 5. shift every `iloc` offset whose data moved downstream
//!
//! Steps 3 to 5 locate the fields they write through one [`AddressMap`], so
//! the two insertion points may come in either file order. The output is then
//! parsed again and checked (see [`Injection::skip_verification`]).

mod property;
mod translate;
mod verify;

pub use property::{CleanAperture, MirrorAxis, Property, Rotation};
pub use translate::{AddressMap, Insertion};

use crate::{
    bmff::{construction, Association, BoxInfo, HeifFile, ItemLocation, SizeField},
    error::{Error, Result},
    stream::ByteStream,
};
use std::{collections::BTreeMap, fs, io::Cursor, path::Path};

/// Properties to add and the item to attach them to
///
/// # Example
///
/// ```
/// use heif_date_io::{inject, CleanAperture, HeifFile, Injection, MirrorAxis};
/// use heif_date_io::test_utils::HeifBuilder;
///
/// # fn main() -> heif_date_io::Result<()> {
/// let original = HeifBuilder::new().build();
/// let injection = Injection::new()
///     .mirror(MirrorAxis::Vertical, false)
///     .clean_aperture(CleanAperture::centered(32, 24), true);
///
/// let output = inject(&original, &injection)?;
/// let heif = HeifFile::from_bytes(&output)?;
/// assert_eq!(heif.property_count(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Injection {
    properties: Vec<(Property, bool)>,
    target: Option<u32>,
    verify: bool,
}

impl Default for Injection {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            target: None,
            verify: true,
        }
    }
}

impl Injection {
    /// Nothing to add yet, targeting the primary item, verification on
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property; `essential` marks it as required for decoding
    pub fn add(mut self, property: Property, essential: bool) -> Self {
        self.properties.push((property, essential));
        self
    }

    pub fn mirror(self, axis: MirrorAxis, essential: bool) -> Self {
        self.add(Property::Mirror(axis), essential)
    }

    pub fn clean_aperture(self, clap: CleanAperture, essential: bool) -> Self {
        self.add(Property::CleanAperture(clap), essential)
    }

    pub fn pixel_aspect_ratio(self, h_spacing: u32, v_spacing: u32, essential: bool) -> Self {
        self.add(
            Property::PixelAspectRatio {
                h_spacing,
                v_spacing,
            },
            essential,
        )
    }

    pub fn rotation(self, rotation: Rotation, essential: bool) -> Self {
        self.add(Property::Rotation(rotation), essential)
    }

    /// Attach to `item_id` instead of the primary item
    pub fn for_item(mut self, item_id: u32) -> Self {
        self.target = Some(item_id);
        self
    }

    /// Do not re-parse and check the output
    pub fn skip_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    pub fn properties(&self) -> &[(Property, bool)] {
        &self.properties
    }
}

/// Box size fields to grow, keyed by box offset
fn size_repairs<'a>(
    heif: &'a HeifFile,
    ipco_growth: u64,
    ipma_growth: u64,
) -> BTreeMap<u64, (&'a BoxInfo, u64)> {
    let mut repairs: BTreeMap<u64, (&BoxInfo, u64)> = BTreeMap::new();
    let lineages = [
        (heif.lineage(heif.ipco_token()), ipco_growth),
        (heif.lineage(heif.ipma_token()), ipma_growth),
    ];
    for (lineage, growth) in lineages {
        for info in lineage {
            repairs.entry(info.offset).or_insert((info, 0)).1 += growth;
        }
    }
    repairs
}

fn repair_sizes(
    out: &mut ByteStream<Cursor<Vec<u8>>>,
    map: &AddressMap,
    repairs: &BTreeMap<u64, (&BoxInfo, u64)>,
) -> Result<()> {
    for (info, growth) in repairs.values() {
        let new_size = info.size + growth;
        let (position, width) = match info.size_field {
            SizeField::Compact => (info.offset, 4),
            // largesize follows the 4-byte size and the type
            SizeField::Large => (info.offset + 8, 8),
            SizeField::ToEnd => {
                log::debug!("'{}' extends to end of file; no size to repair", info.box_type);
                continue;
            }
        };
        let at = map.translate(position);
        log::debug!(
            "'{}' size {} -> {} (field at {} -> {})",
            info.box_type,
            info.size,
            new_size,
            position,
            at
        );
        out.write_uint_at(at, width, new_size)?;
    }
    Ok(())
}

/// Shift every `iloc` offset that points at or past an insertion point
fn repair_item_locations(
    items: &[ItemLocation],
    out: &mut ByteStream<Cursor<Vec<u8>>>,
    map: &AddressMap,
) -> Result<()> {
    for item in items {
        if item.construction_method != construction::FILE_OFFSET || item.data_reference_index != 0 {
            // idat and item-relative offsets do not depend on file position
            continue;
        }

        let mut shifts = Vec::with_capacity(item.extents.len());
        for extent in &item.extents {
            let Some(range) = extent.range() else {
                continue;
            };
            if let Some(at) = map.splits(range.offset, range.end_offset()) {
                return Err(Error::ExtentStraddlesInsertion {
                    item_id: item.item_id,
                    offset: at,
                });
            }
            shifts.push((extent, map.shift(range.offset)));
        }

        if shifts.iter().all(|(extent, _)| extent.offset_field.is_some()) {
            for (extent, shift) in &shifts {
                let (Some(field), true) = (extent.offset_field, *shift > 0) else {
                    continue;
                };
                let at = map.translate(field.position);
                log::debug!(
                    "item {} extent offset {} -> {} (field at {} -> {})",
                    item.item_id,
                    extent.extent_offset,
                    extent.extent_offset + shift,
                    field.position,
                    at
                );
                out.write_uint_at(at, field.width, extent.extent_offset + shift)?;
            }
            continue;
        }

        // offset_size == 0: every extent sits at base_offset, so it is the
        // base that has to move
        let Some(&(_, shift)) = shifts.first() else {
            continue;
        };
        if shifts.iter().any(|(_, s)| *s != shift) {
            return Err(Error::Unsupported(format!(
                "item {} extents move by different amounts but share one base offset",
                item.item_id
            )));
        }
        if shift == 0 {
            continue;
        }
        let field = item.base_offset_field.ok_or_else(|| {
            Error::Unsupported(format!(
                "item {} has neither an extent offset nor a base offset field",
                item.item_id
            ))
        })?;
        let at = map.translate(field.position);
        log::debug!(
            "item {} base offset {} -> {} (field at {} -> {})",
            item.item_id,
            item.base_offset,
            item.base_offset + shift,
            field.position,
            at
        );
        out.write_uint_at(at, field.width, item.base_offset + shift)?;
    }
    Ok(())
}

/// Inject properties into an in-memory HEIF file, returning the new file
///
/// Nothing is partially applied: any failure leaves `data` untouched and
/// returns an error.
pub fn inject(data: &[u8], injection: &Injection) -> Result<Vec<u8>> {
    if injection.properties.is_empty() {
        return Err(Error::InvalidInput("no properties to inject".into()));
    }

    let heif = HeifFile::from_bytes(data)?;
    let target = injection
        .target
        .or(heif.primary_item())
        .ok_or(Error::MissingBox("pitm"))?;

    let ipma = heif.property_association();
    let entry = ipma.entry(target).ok_or(Error::ItemNotFound(target))?;

    let count = entry.associations.len() + injection.properties.len();
    if count > u8::MAX as usize {
        return Err(Error::AssociationCountOverflow {
            item_id: target,
            count,
        });
    }

    // New properties take the next 1-based indices in ipco
    let first_index = heif.property_count() + 1;
    let mut property_bytes = Vec::new();
    let mut association_bytes = Vec::new();
    let mut added = Vec::with_capacity(injection.properties.len());
    for (i, (property, essential)) in injection.properties.iter().enumerate() {
        let index = first_index + i;
        if index > ipma.max_index() as usize {
            return Err(Error::PropertyIndexOverflow {
                index,
                max: ipma.max_index(),
            });
        }
        let association = Association {
            property_index: index as u16,
            essential: *essential,
        };
        property_bytes.extend(property.encode()?);
        association_bytes.extend(ipma.encode_association(association)?);
        added.push(association);
    }

    let ipco_at = heif.ipco().end();
    let ipma_at = ipma.entry_end(entry);
    log::debug!(
        "inserting {} property bytes at {} and {} association bytes at {}",
        property_bytes.len(),
        ipco_at,
        association_bytes.len(),
        ipma_at
    );

    let ipco_growth = property_bytes.len() as u64;
    let ipma_growth = association_bytes.len() as u64;
    let map = AddressMap::new(vec![
        Insertion::new(ipco_at, property_bytes),
        Insertion::new(ipma_at, association_bytes),
    ])?;

    let mut out = ByteStream::from_vec(map.stitch(data)?);
    repair_sizes(&mut out, &map, &size_repairs(&heif, ipco_growth, ipma_growth))?;

    let count_at = map.translate(entry.count_offset);
    out.write_uint_at(count_at, 1, count as u64)?;

    repair_item_locations(heif.item_locations(), &mut out, &map)?;
    let output = out.into_inner().into_inner();

    if injection.verify {
        let added_types: Vec<_> = injection.properties.iter().map(|(p, _)| p.box_type()).collect();
        verify::verify(
            &output,
            &verify::Expected {
                original: &heif,
                original_bytes: data,
                target,
                added: &added,
                added_types: &added_types,
                total_inserted: map.total(),
            },
        )?;
    }

    log::info!(
        "injected {} properties for item {} ({} bytes added)",
        injection.properties.len(),
        target,
        map.total()
    );
    Ok(output)
}

/// Inject properties into `input`, writing the result to `output`
///
/// The output file is only created once the injection has succeeded.
pub fn inject_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    injection: &Injection,
) -> Result<()> {
    let data = fs::read(input)?;
    let result = inject(&data, injection)?;
    fs::write(output, result)?;
    Ok(())
}
