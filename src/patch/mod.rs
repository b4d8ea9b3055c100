//! In-place date patching
//!
//! Dates are overwritten inside their existing slots, so the file length and
//! every box, segment and IFD offset stay exactly as they were. The flow for
//! every container is the same:
//!
//! 1. locate the EXIF and XMP payloads and describe each as a [`PayloadMap`]
//! 2. read the payload and find date slots by logical offset
//! 3. write each new value through the map, which splits writes that cross
//!    extent boundaries
//!
//! Values that do not fit their slot are skipped and recorded in the
//! [`PatchReport`]; structural problems are errors.

mod exif;
mod xmp;

pub use self::exif::exif_tiff_start;
pub use self::xmp::{find_xmp_slots, render_xmp_value, XmpSlot, XmpStyle};

#[cfg(feature = "jpeg")]
use crate::jpeg::scan_jpeg;
use crate::{
    bmff::{HeifFile, ItemLocation},
    container::{Container, DETECT_LEN},
    error::{Error, Result},
    segment::{ByteRange, PayloadMap},
    stream::ByteStream,
    tiff::DateTag,
    updates::DateUpdates,
};
use std::{
    io::{Read, Seek, Write},
    path::Path,
};

/// Where a date slot lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSource {
    Exif(DateTag),
    /// Qualified XMP property name
    Xmp(String),
}

impl std::fmt::Display for SlotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotSource::Exif(tag) => write!(f, "EXIF {}", tag),
            SlotSource::Xmp(name) => write!(f, "XMP {}", name),
        }
    }
}

/// A slot that was overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSlot {
    pub source: SlotSource,
    /// Absolute file offset of the slot's first byte
    pub offset: u64,
    /// Slot width in bytes
    pub width: u64,
    /// Text stored in the slot, without terminator or padding
    pub value: String,
}

/// Why a slot was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The EXIF tag is stored with a non-ASCII TIFF type
    NotAscii { field_type: u16 },
    /// No representation of the date fits the slot
    NoRoom { width: u64 },
    /// The payload is stored in a way that cannot be addressed in this file
    Unresolvable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSlot {
    pub source: SlotSource,
    pub reason: SkipReason,
}

/// Outcome of patching one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub container: Container,
    pub written: Vec<WrittenSlot>,
    pub skipped: Vec<SkippedSlot>,
}

impl PatchReport {
    fn new(container: Container) -> Self {
        Self {
            container,
            written: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub(crate) fn skip(&mut self, source: SlotSource, reason: SkipReason) {
        log::warn!("skipping {}: {:?}", source, reason);
        self.skipped.push(SkippedSlot { source, reason });
    }

    /// True when at least one slot was overwritten
    pub fn is_modified(&self) -> bool {
        !self.written.is_empty()
    }
}

/// A payload's on-disk layout
#[derive(Debug, Clone)]
pub(crate) enum PayloadLocation {
    /// One contiguous range (JPEG segment, TIFF block)
    Range(ByteRange),
    /// A HEIF item, possibly split across extents
    Item(ItemLocation),
}

impl PayloadMap for PayloadLocation {
    fn extents(&self) -> Vec<ByteRange> {
        match self {
            PayloadLocation::Range(range) => range.extents(),
            PayloadLocation::Item(item) => item.extents(),
        }
    }
}

#[derive(Debug, Default)]
struct Payloads {
    exif: Option<PayloadLocation>,
    xmp: Option<PayloadLocation>,
    unresolvable_exif: bool,
    unresolvable_xmp: bool,
}

fn heif_payload(heif: &HeifFile, item_id: Option<u32>) -> Result<(Option<PayloadLocation>, bool)> {
    let Some(item_id) = item_id else {
        return Ok((None, false));
    };
    let item = heif.item_location(item_id)?;
    if item.is_resolved() {
        Ok((Some(PayloadLocation::Item(item.clone())), false))
    } else {
        Ok((None, true))
    }
}

fn locate_payloads<S: Read + Seek>(
    stream: &mut ByteStream<S>,
    container: Container,
) -> Result<Payloads> {
    match container {
        Container::Heif => {
            let heif = HeifFile::parse(stream)?;
            let (exif, unresolvable_exif) = heif_payload(&heif, heif.exif_item_id())?;
            let (xmp, unresolvable_xmp) = heif_payload(&heif, heif.xmp_item_id())?;
            Ok(Payloads {
                exif,
                xmp,
                unresolvable_exif,
                unresolvable_xmp,
            })
        }
        #[cfg(feature = "jpeg")]
        Container::Jpeg => {
            let found = scan_jpeg(stream)?;
            Ok(Payloads {
                exif: found.exif.map(PayloadLocation::Range),
                xmp: found.xmp.map(PayloadLocation::Range),
                ..Default::default()
            })
        }
        #[cfg(feature = "tiff")]
        Container::Tiff => {
            let whole = ByteRange::new(0, stream.len());
            let data = crate::segment::read_payload(stream, &whole)?;
            let xmp = crate::tiff::find_xmp_packet(&data)?.map(PayloadLocation::Range);
            Ok(Payloads {
                exif: Some(PayloadLocation::Range(whole)),
                xmp,
                ..Default::default()
            })
        }
    }
}

/// Rewrite the dates of an open read-write stream in place
///
/// The stream length never changes. Returns what was written and skipped.
pub fn patch_dates<S: Read + Write + Seek>(
    stream: &mut ByteStream<S>,
    updates: &DateUpdates,
) -> Result<PatchReport> {
    let header = stream.peek_at(0, (DETECT_LEN as u64).min(stream.len()) as usize)?;
    let container = Container::detect(&header)
        .ok_or_else(|| Error::Unsupported("unrecognised container format".into()))?;
    log::debug!("patching dates in {} container", container);

    let payloads = locate_payloads(stream, container)?;
    let mut report = PatchReport::new(container);

    if !updates.exif.is_skipped() {
        if let Some(exif) = &payloads.exif {
            let heif_prefix = container == Container::Heif;
            exif::patch_exif(stream, exif, heif_prefix, updates, &mut report)?;
        } else if payloads.unresolvable_exif {
            report.skip(SlotSource::Exif(DateTag::DateTime), SkipReason::Unresolvable);
        }
    }

    if !updates.xmp.is_skipped() {
        if let Some(xmp) = &payloads.xmp {
            xmp::patch_xmp(stream, xmp, updates, &mut report)?;
        } else if payloads.unresolvable_xmp {
            report.skip(SlotSource::Xmp("x:xmpmeta".into()), SkipReason::Unresolvable);
        }
    }

    log::info!(
        "{} date slots written, {} skipped",
        report.written.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Rewrite the dates of a file in place
///
/// # Example
///
/// ```no_run
/// use heif_date_io::{patch_file_dates, DateUpdates};
///
/// # fn main() -> heif_date_io::Result<()> {
/// let ts = chrono::DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap();
/// let report = patch_file_dates("photo.heic", &DateUpdates::new(ts))?;
/// for slot in &report.written {
///     println!("{} -> {}", slot.source, slot.value);
/// }
/// # Ok(())
/// # }
/// ```
pub fn patch_file_dates<P: AsRef<Path>>(path: P, updates: &DateUpdates) -> Result<PatchReport> {
    let mut stream = ByteStream::open_read_write(path)?;
    let report = patch_dates(&mut stream, updates)?;
    stream.flush()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stream::Endian,
        test_utils::{jpeg_with, xmp_packet, HeifBuilder, TiffBuilder},
        tiff::{read_exif_dates, tags, Ifd},
    };
    use chrono::DateTime;

    fn ts() -> chrono::DateTime<chrono::FixedOffset> {
        DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap()
    }

    fn sample_tiff() -> Vec<u8> {
        TiffBuilder::new(Endian::Little)
            .ascii(Ifd::Ifd0, tags::DATE_TIME, "2001:01:01 00:00:00", 20)
            .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
            .build()
    }

    #[test]
    fn test_unknown_container() {
        let mut stream = ByteStream::from_vec(b"GIF89a........".to_vec());
        assert!(matches!(
            patch_dates(&mut stream, &DateUpdates::new(ts())),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_patch_heif_exif() {
        let data = HeifBuilder::new().with_exif(&sample_tiff()).build();
        let len = data.len();
        let mut stream = ByteStream::from_vec(data);
        let report = patch_dates(&mut stream, &DateUpdates::new(ts())).unwrap();

        assert_eq!(report.container, Container::Heif);
        assert_eq!(report.written.len(), 2);
        let data = stream.into_inner().into_inner();
        assert_eq!(data.len(), len);

        let heif = HeifFile::from_bytes(&data).unwrap();
        let exif = heif.read_item(&mut ByteStream::from_slice(&data), 2).unwrap();
        let dates = read_exif_dates(&exif[4..]).unwrap();
        assert!(dates.iter().all(|(_, v)| v == "2026:01:28 18:30:00"));
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_patch_jpeg_exif_and_xmp() {
        let xmp = xmp_packet(r#"xmp:CreateDate="2001-01-01T00:00:00+00:00""#, "");
        let data = jpeg_with(Some(&sample_tiff()), Some(xmp.as_bytes()));
        let mut stream = ByteStream::from_vec(data);
        let report = patch_dates(&mut stream, &DateUpdates::new(ts())).unwrap();

        assert_eq!(report.container, Container::Jpeg);
        assert_eq!(report.written.len(), 3);
        let data = stream.into_inner().into_inner();
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains(r#"xmp:CreateDate="2026-01-28T18:30:00+01:00""#));
    }

    #[test]
    fn test_skip_flags() {
        let data = HeifBuilder::new().with_exif(&sample_tiff()).build();
        let original = data.clone();
        let mut stream = ByteStream::from_vec(data);
        let report = patch_dates(&mut stream, &DateUpdates::new(ts()).skip_exif()).unwrap();
        assert!(!report.is_modified());
        assert_eq!(stream.into_inner().into_inner(), original);
    }
}
