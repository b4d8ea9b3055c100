//! JPEG marker scan for the APP1 Exif and XMP segments

use crate::{
    error::{Error, Result},
    segment::ByteRange,
    stream::{ByteStream, Endian},
};
use std::io::{Read, Seek};

// JPEG markers
const SOI: u8 = 0xD8; // Start of Image
const EOI: u8 = 0xD9; // End of Image
const APP1: u8 = 0xE1; // Exif / XMP
const SOS: u8 = 0xDA; // Start of Scan (image data follows)

// Special markers without length
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Metadata payload locations in a JPEG file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JpegMetadata {
    /// TIFF block of the first APP1 Exif segment (signature excluded)
    pub exif: Option<ByteRange>,
    /// XMP packet of the first APP1 XMP segment (signature excluded)
    pub xmp: Option<ByteRange>,
}

/// Walk marker segments up to the first scan
pub fn scan_jpeg<S: Read + Seek>(stream: &mut ByteStream<S>) -> Result<JpegMetadata> {
    stream.set_endian(Endian::Big);
    stream.seek(0)?;

    // Check SOI marker
    if stream.read_u8()? != 0xFF || stream.read_u8()? != SOI {
        return Err(Error::InvalidFormat("Not a JPEG file".into()));
    }

    let mut found = JpegMetadata::default();
    loop {
        let offset = stream.position();
        let marker_prefix = stream.read_u8()?;
        if marker_prefix != 0xFF {
            return Err(Error::InvalidFormat(format!(
                "Expected 0xFF at offset {}, got 0x{:02X}",
                offset, marker_prefix
            )));
        }

        let mut marker = stream.read_u8()?;
        // Handle padding bytes
        while marker == 0xFF {
            marker = stream.read_u8()?;
        }

        match marker {
            EOI | SOS => break,
            TEM | RST0..=RST7 => continue,
            _ => {}
        }

        let size = stream.read_u16()? as u64;
        if size < 2 {
            return Err(Error::InvalidFormat(format!(
                "Segment 0x{:02X} at offset {} has length {}",
                marker, offset, size
            )));
        }
        let data_start = stream.position();
        let data_size = size - 2;

        if marker == APP1 {
            let head = stream.peek(0, (XMP_SIGNATURE.len() as u64).min(data_size) as usize)?;
            if found.exif.is_none() && head.starts_with(EXIF_SIGNATURE) {
                let sig = EXIF_SIGNATURE.len() as u64;
                found.exif = Some(ByteRange::new(data_start + sig, data_size - sig));
                log::debug!("APP1 Exif segment at {}", offset);
            } else if found.xmp.is_none() && head == XMP_SIGNATURE {
                let sig = XMP_SIGNATURE.len() as u64;
                found.xmp = Some(ByteRange::new(data_start + sig, data_size - sig));
                log::debug!("APP1 XMP segment at {}", offset);
            }
        }

        stream.seek(data_start + data_size)?;
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::jpeg_with;

    #[test]
    fn test_scan_finds_both_segments() {
        let tiff = b"MM\0*\0\0\0\x08\0\0\0\0\0\0";
        let xmp = b"<x:xmpmeta/>";
        let data = jpeg_with(Some(tiff), Some(xmp));
        let found = scan_jpeg(&mut ByteStream::from_slice(&data)).unwrap();

        let exif = found.exif.unwrap();
        assert_eq!(&data[exif.offset as usize..exif.end_offset() as usize], tiff);
        let packet = found.xmp.unwrap();
        assert_eq!(&data[packet.offset as usize..packet.end_offset() as usize], xmp);
    }

    #[test]
    fn test_scan_without_metadata() {
        let data = jpeg_with(None, None);
        let found = scan_jpeg(&mut ByteStream::from_slice(&data)).unwrap();
        assert_eq!(found, JpegMetadata::default());
    }

    #[test]
    fn test_not_a_jpeg() {
        assert!(scan_jpeg(&mut ByteStream::from_slice(b"\x89PNG")).is_err());
    }
}
