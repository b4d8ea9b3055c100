//! XMP date slots
//!
//! The packet is scanned as text rather than parsed as XML: only the byte
//! span of each value matters, and it must be overwritten without moving a
//! single byte around it. All offsets here are UTF-8 byte offsets into the
//! packet, so multi-byte characters before a value never misalign a write.

use super::{PatchReport, SkipReason, SlotSource, WrittenSlot};
use crate::{
    error::Result,
    segment::{read_payload, write_payload_span, PayloadMap},
    stream::ByteStream,
    updates::DateUpdates,
};
use chrono::{DateTime, FixedOffset};
use std::io::{Read, Seek, Write};

/// Replacement formats, longest first
const XMP_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"];

/// How a property is serialised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmpStyle {
    /// `name="value"`
    Attribute,
    /// `<name>value</name>`
    Element,
}

/// A date value's byte span inside an XMP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmpSlot {
    pub property: String,
    pub style: XmpStyle,
    /// Byte offset of the value's first byte
    pub offset: usize,
    /// Byte length of the value
    pub len: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '_' | '-' | '.')
}

/// Value span following an attribute name: `="..."` or `='...'`
fn attribute_value(text: &str, after: usize) -> Option<(usize, usize)> {
    let rest = &text[after..];
    let eq = rest.find('=')?;
    if !rest[..eq].trim().is_empty() {
        return None;
    }
    let value = rest[eq + 1..].trim_start();
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let start = text.len() - value.len() + 1;
    let len = text[start..].find(quote)?;
    Some((start, len))
}

/// Value span of an element: `>...<`
fn element_value(text: &str, after: usize) -> Option<(usize, usize)> {
    let gt = after + text[after..].find('>')?;
    // self-closing element, no text content
    if text[..gt].ends_with('/') {
        return None;
    }
    let start = gt + 1;
    let len = text[start..].find('<')?;
    // whitespace only: empty or holds child elements
    if text[start..start + len].trim().is_empty() {
        return None;
    }
    Some((start, len))
}

/// Find the value spans of the given properties in both serialisation styles
///
/// Matches directly preceded by `/` are closing tags and are ignored. The
/// delimiter that follows the name picks the style: `=` for an attribute,
/// `>` for an element opened by `<`.
pub fn find_xmp_slots<S: AsRef<str>>(text: &str, properties: &[S]) -> Vec<XmpSlot> {
    let mut slots = Vec::new();
    for property in properties {
        let name = property.as_ref();
        if name.is_empty() {
            continue;
        }
        let mut search = 0;
        while let Some(rel) = text[search..].find(name) {
            let start = search + rel;
            let after = start + name.len();
            search = after;

            let before = text[..start].chars().next_back();
            if before == Some('/') || before.is_some_and(is_name_char) {
                continue;
            }
            if text[after..].chars().next().map_or(true, is_name_char) {
                continue;
            }

            let rest = &text[after..];
            let eq = rest.find('=');
            let gt = rest.find('>');
            let attribute_first = match (eq, gt) {
                (Some(eq), Some(gt)) => eq < gt,
                (Some(_), None) => true,
                _ => false,
            };

            let found = if before == Some('<') {
                element_value(text, after).map(|span| (XmpStyle::Element, span))
            } else if attribute_first {
                attribute_value(text, after).map(|span| (XmpStyle::Attribute, span))
            } else {
                None
            };

            if let Some((style, (offset, len))) = found {
                slots.push(XmpSlot {
                    property: name.to_string(),
                    style,
                    offset,
                    len,
                });
            }
        }
    }
    slots.sort_by_key(|s| s.offset);
    slots
}

/// Longest representation of `timestamp` that fits `width` bytes, padded
/// with spaces to exactly `width`
///
/// Returns `None` when even the date-only form does not fit.
pub fn render_xmp_value(timestamp: &DateTime<FixedOffset>, width: usize) -> Option<String> {
    XMP_FORMATS
        .iter()
        .map(|format| timestamp.format(format).to_string())
        .find(|value| value.len() <= width)
        .map(|value| format!("{:<width$}", value, width = width))
}

pub(super) fn patch_xmp<S: Read + Write + Seek, M: PayloadMap>(
    stream: &mut ByteStream<S>,
    map: &M,
    updates: &DateUpdates,
    report: &mut PatchReport,
) -> Result<()> {
    let payload = read_payload(stream, map)?;
    let text = match std::str::from_utf8(&payload) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(
                "XMP packet is not valid UTF-8 after byte {}; scanning the valid prefix",
                e.valid_up_to()
            );
            // valid_up_to() always marks a char boundary
            std::str::from_utf8(&payload[..e.valid_up_to()]).unwrap_or_default()
        }
    };

    let slots = find_xmp_slots(text, &updates.xmp_properties());
    log::debug!("{} XMP date properties found", slots.len());

    for slot in slots {
        let source = SlotSource::Xmp(slot.property.clone());
        let Some(value) = render_xmp_value(updates.timestamp(), slot.len) else {
            report.skip(
                source,
                SkipReason::NoRoom {
                    width: slot.len as u64,
                },
            );
            continue;
        };

        let offset = write_payload_span(stream, map, slot.offset as u64, value.as_bytes())?;
        let value = value.trim_end().to_string();
        log::info!("wrote {} = {:?} at offset {}", slot.property, value, offset);
        report.written.push(WrittenSlot {
            source,
            offset,
            width: slot.len as u64,
            value,
        });
    }
    Ok(())
}
