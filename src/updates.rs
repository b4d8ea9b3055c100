//! Date update options

use crate::tiff::DateTag;
use chrono::{DateTime, FixedOffset};

/// XMP date properties rewritten by default
pub const DEFAULT_XMP_PROPERTIES: &[&str] = &[
    "xmp:CreateDate",
    "xmp:ModifyDate",
    "xmp:MetadataDate",
    "photoshop:DateCreated",
    "exif:DateTimeOriginal",
    "exif:DateTimeDigitized",
    "tiff:DateTime",
];

/// Which slots of one metadata kind to rewrite (internal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection<T> {
    /// Every known slot (default)
    All,
    /// Only the listed slots
    Only(Vec<T>),
    /// Leave this metadata kind untouched
    Skip,
}

impl<T: PartialEq> Selection<T> {
    pub(crate) fn is_skipped(&self) -> bool {
        matches!(self, Selection::Skip)
    }

    pub(crate) fn includes(&self, item: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(items) => items.contains(item),
            Selection::Skip => false,
        }
    }
}

/// Dates to write into a file
///
/// This struct uses a builder pattern where the default is to rewrite every
/// known EXIF tag and XMP property to the same timestamp. Use the builder
/// methods to narrow the selection.
///
/// # Example
///
/// ```
/// use heif_date_io::{DateTag, DateUpdates};
///
/// let ts = chrono::DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap();
///
/// // Only the capture date, EXIF only
/// let updates = DateUpdates::new(ts)
///     .with_exif_tags(&[DateTag::DateTimeOriginal])
///     .skip_xmp();
/// assert_eq!(updates.timestamp(), &ts);
/// ```
#[derive(Debug, Clone)]
pub struct DateUpdates {
    timestamp: DateTime<FixedOffset>,
    pub(crate) exif: Selection<DateTag>,
    pub(crate) xmp: Selection<String>,
}

impl DateUpdates {
    /// Rewrite every known date slot to `timestamp`
    pub fn new(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            exif: Selection::All,
            xmp: Selection::All,
        }
    }

    pub fn timestamp(&self) -> &DateTime<FixedOffset> {
        &self.timestamp
    }

    /// Leave EXIF untouched
    pub fn skip_exif(mut self) -> Self {
        self.exif = Selection::Skip;
        self
    }

    /// Leave XMP untouched
    pub fn skip_xmp(mut self) -> Self {
        self.xmp = Selection::Skip;
        self
    }

    /// Only rewrite the listed EXIF tags
    pub fn with_exif_tags(mut self, tags: &[DateTag]) -> Self {
        self.exif = Selection::Only(tags.to_vec());
        self
    }

    /// Only rewrite the listed XMP properties (qualified names, e.g. `xmp:CreateDate`)
    pub fn with_xmp_properties(mut self, properties: &[&str]) -> Self {
        self.xmp = Selection::Only(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// XMP property names to scan for
    pub(crate) fn xmp_properties(&self) -> Vec<String> {
        match &self.xmp {
            Selection::All => DEFAULT_XMP_PROPERTIES.iter().map(|p| p.to_string()).collect(),
            Selection::Only(properties) => properties.clone(),
            Selection::Skip => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2020-05-06T07:08:09-04:00").unwrap()
    }

    #[test]
    fn test_default_selects_everything() {
        let updates = DateUpdates::new(ts());
        assert!(updates.exif.includes(&DateTag::GpsDateStamp));
        assert_eq!(updates.xmp_properties().len(), DEFAULT_XMP_PROPERTIES.len());
    }

    #[test]
    fn test_narrowed_selection() {
        let updates = DateUpdates::new(ts())
            .with_exif_tags(&[DateTag::DateTime])
            .with_xmp_properties(&["xmp:CreateDate"]);
        assert!(updates.exif.includes(&DateTag::DateTime));
        assert!(!updates.exif.includes(&DateTag::DateTimeOriginal));
        assert_eq!(updates.xmp_properties(), vec!["xmp:CreateDate".to_string()]);
    }

    #[test]
    fn test_skip() {
        let updates = DateUpdates::new(ts()).skip_exif().skip_xmp();
        assert!(updates.exif.is_skipped());
        assert!(updates.xmp.is_skipped());
        assert!(updates.xmp_properties().is_empty());
    }
}
