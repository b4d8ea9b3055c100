//! EXIF date slots

use super::{PatchReport, SkipReason, SlotSource, WrittenSlot};
use crate::{
    error::{Error, Result},
    segment::{read_payload, write_payload_span, PayloadMap},
    stream::ByteStream,
    tiff::{encode_ascii_slot, find_date_slots},
    updates::DateUpdates,
};
use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Seek, Write};

/// Logical offset of the TIFF header inside a HEIF `Exif` item
///
/// The item starts with a 4-byte big-endian offset to the TIFF header,
/// counted from the end of that field (ISO/IEC 23008-12 annex A).
pub fn exif_tiff_start(payload: &[u8]) -> Result<u64> {
    if payload.len() < 4 {
        return Err(Error::InvalidFormat(format!(
            "Exif item of {} bytes has no header offset",
            payload.len()
        )));
    }
    let start = 4 + BigEndian::read_u32(&payload[..4]) as u64;
    if start + 8 > payload.len() as u64 {
        return Err(Error::AddressOutOfBounds {
            offset: start,
            len: 8,
            file_len: payload.len() as u64,
        });
    }
    Ok(start)
}

pub(super) fn patch_exif<S: Read + Write + Seek, M: PayloadMap>(
    stream: &mut ByteStream<S>,
    map: &M,
    heif_prefix: bool,
    updates: &DateUpdates,
    report: &mut PatchReport,
) -> Result<()> {
    let payload = read_payload(stream, map)?;
    let tiff_start = if heif_prefix {
        exif_tiff_start(&payload)?
    } else {
        0
    };
    let slots = find_date_slots(&payload[tiff_start as usize..])?;
    log::debug!("{} EXIF date tags found", slots.len());

    for slot in slots {
        if !updates.exif.includes(&slot.tag) {
            continue;
        }
        let source = SlotSource::Exif(slot.tag);
        if !slot.is_ascii() {
            report.skip(
                source,
                SkipReason::NotAscii {
                    field_type: slot.field_type,
                },
            );
            continue;
        }
        // One byte of text plus the terminator at minimum
        if slot.width < 2 {
            report.skip(
                source,
                SkipReason::NoRoom {
                    width: slot.width as u64,
                },
            );
            continue;
        }

        let formatted = slot.tag.format(updates.timestamp());
        let width = slot.width as usize;
        let bytes = encode_ascii_slot(&formatted, width);
        if formatted.len() + 1 > width {
            log::debug!(
                "{} truncated from {} to {} bytes",
                slot.tag,
                formatted.len(),
                width - 1
            );
        }

        let offset = write_payload_span(stream, map, tiff_start + slot.offset, &bytes)?;
        let value = formatted[..formatted.len().min(width - 1)].to_string();
        log::info!("wrote {} = {:?} at offset {}", slot.tag, value, offset);
        report.written.push(WrittenSlot {
            source,
            offset,
            width: width as u64,
            value,
        });
    }
    Ok(())
}
