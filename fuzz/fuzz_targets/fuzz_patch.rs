#![no_main]

use chrono::DateTime;
use heif_date_io::{patch_dates, ByteStream, DateUpdates};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(ts) = DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00") else {
        return;
    };
    let mut stream = ByteStream::from_vec(data.to_vec());
    let _ = patch_dates(&mut stream, &DateUpdates::new(ts));

    // Whatever happened, the length is fixed
    assert_eq!(stream.into_inner().into_inner().len(), data.len());
});
