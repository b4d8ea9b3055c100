#![no_main]

use heif_date_io::{tiff, xmp, ByteStream, HeifFile};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must NEVER panic, only return errors
    if let Ok(heif) = HeifFile::from_bytes(data) {
        let _ = heif.boxes();
        let _ = heif.property_types();
        let mut stream = ByteStream::from_slice(data);
        for item in heif.item_locations() {
            let _ = heif.read_item(&mut stream, item.item_id);
        }
        let mut out = Vec::new();
        let _ = heif.rewrite(&mut stream, &mut out);
    }

    let _ = tiff::find_date_slots(data);
    let _ = tiff::find_xmp_packet(data);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = xmp::read_xmp_dates(text);
        let _ = heif_date_io::patch::find_xmp_slots(text, heif_date_io::DEFAULT_XMP_PROPERTIES);
    }
});
