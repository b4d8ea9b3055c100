//! Minimal XMP reader
//!
//! This module provides just enough XMP parsing to read the current date
//! values of a packet, so callers can inspect a file before and after
//! patching. Writing never goes through the XML layer: date slots are
//! overwritten in place by [`crate::patch`], which keeps the packet's byte
//! length unchanged.
//!
//! XMP Structure:
//! - XMP packets are XML-based RDF metadata
//! - Properties can be attributes on rdf:Description or child elements

use crate::{error::Result, updates::DEFAULT_XMP_PROPERTIES, Error};
use quick_xml::{events::Event, name::QName, Reader};

const RDF_DESCRIPTION: &[u8] = b"rdf:Description";

/// Extract a value from XMP using a key.
///
/// Searches for the key as an attribute on `rdf:Description` or as a child element.
///
/// # Example
///
/// ```
/// use heif_date_io::xmp::extract_key;
///
/// let xmp = r#"<rdf:Description xmp:CreateDate="2020-01-01" />"#;
/// assert_eq!(extract_key(xmp, "xmp:CreateDate").unwrap(), Some("2020-01-01".to_string()));
/// ```
pub fn extract_key(xmp: &str, key: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(true);

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::InvalidFormat(format!("XMP parse error: {}", e)))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if e.name() == QName(RDF_DESCRIPTION) {
                    // Search attributes
                    for attr in e.attributes().flatten() {
                        if attr.key == QName(key.as_bytes()) {
                            if let Ok(s) = String::from_utf8(attr.value.to_vec()) {
                                return Ok(Some(s.trim().to_string()));
                            }
                        }
                    }
                } else if e.name() == QName(key.as_bytes()) && matches!(event, Event::Start(_)) {
                    // Search as element
                    let text = reader
                        .read_text(e.name())
                        .map_err(|e| Error::InvalidFormat(format!("XMP parse error: {}", e)))?;
                    return Ok(Some(text.trim().to_string()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

/// Read the current value of every known XMP date property
///
/// Properties that are absent are omitted. Values are returned as written,
/// including any padding trimmed.
pub fn read_xmp_dates(xmp: &str) -> Result<Vec<(String, String)>> {
    let mut dates = Vec::new();
    for property in DEFAULT_XMP_PROPERTIES {
        if let Some(value) = extract_key(xmp, property)? {
            dates.push((property.to_string(), value));
        }
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::xmp_packet;

    #[test]
    fn test_extract_attribute_and_element() {
        let xmp = xmp_packet(
            r#"xmp:CreateDate="2019-04-01T10:00:00+02:00""#,
            "   <photoshop:DateCreated>2019-04-01</photoshop:DateCreated>",
        );
        assert_eq!(
            extract_key(&xmp, "xmp:CreateDate").unwrap(),
            Some("2019-04-01T10:00:00+02:00".to_string())
        );
        assert_eq!(
            extract_key(&xmp, "photoshop:DateCreated").unwrap(),
            Some("2019-04-01".to_string())
        );
        assert_eq!(extract_key(&xmp, "nonexistent").unwrap(), None);
    }

    #[test]
    fn test_read_dates_trims_padding() {
        let xmp = xmp_packet(r#"xmp:ModifyDate="2019-04-01      ""#, "");
        let dates = read_xmp_dates(&xmp).unwrap();
        assert_eq!(
            dates,
            vec![("xmp:ModifyDate".to_string(), "2019-04-01".to_string())]
        );
    }
}
