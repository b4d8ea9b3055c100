#![no_main]

use heif_date_io::{inject, CleanAperture, HeifFile, Injection, MirrorAxis};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let injection = Injection::new()
        .mirror(MirrorAxis::Horizontal, false)
        .clean_aperture(CleanAperture::centered(16, 16), true);

    // Anything that made it through verification must parse again
    if let Ok(output) = inject(data, &injection) {
        assert!(HeifFile::from_bytes(&output).is_ok());
    }
});
