//! Safety tests - malformed input must produce errors, never panics or writes
//!
//! Comprehensive coverage is left to fuzzing (cargo-fuzz); these pin down
//! the cases that have a specific check behind them.

use chrono::DateTime;
use heif_date_io::{
    inject, patch_dates,
    test_utils::{make_box, HeifBuilder, TiffBuilder},
    tiff::{find_date_slots, tags, Ifd},
    AccessMode, ByteStream, DateUpdates, Endian, Error, HeifFile, Injection, MirrorAxis,
};

fn updates() -> DateUpdates {
    DateUpdates::new(DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap())
}

fn tiff() -> Vec<u8> {
    TiffBuilder::new(Endian::Big)
        .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
        .build()
}

#[test]
fn test_every_truncation_of_a_heif_file() {
    let full = HeifBuilder::new().with_exif(&tiff()).build();
    let injection = Injection::new().mirror(MirrorAxis::Vertical, false);

    for len in 0..full.len() {
        let cut = full[..len].to_vec();
        // Parsing may fail, but must not panic
        let _ = HeifFile::from_bytes(&cut);
        let _ = inject(&cut, &injection);

        let mut stream = ByteStream::from_vec(cut.clone());
        if patch_dates(&mut stream, &updates()).is_err() {
            assert_eq!(stream.into_inner().into_inner(), cut, "failed patch wrote bytes");
        }
    }
}

#[test]
fn test_child_box_overrunning_parent() {
    let mut file = HeifBuilder::new().build();
    // meta starts after ftyp; inflate its first child (hdlr) past the parent
    let ftyp_len = u32::from_be_bytes([file[0], file[1], file[2], file[3]]) as usize;
    let hdlr = ftyp_len + 12;
    file[hdlr..hdlr + 4].copy_from_slice(&0x7FFF_FFFFu32.to_be_bytes());

    assert!(matches!(
        HeifFile::from_bytes(&file),
        Err(Error::BoxOverrun { .. }) | Err(Error::Truncated { .. })
    ));
}

#[test]
fn test_box_size_below_header() {
    let mut file = make_box(b"ftyp", b"heic\0\0\0\0mif1");
    file.extend([0, 0, 0, 4, b'm', b'e', b't', b'a']);
    assert!(HeifFile::from_bytes(&file).is_err());
}

#[test]
fn test_association_beyond_ipco() {
    let file = HeifBuilder::new().associate(1, 9, true).build();
    assert!(matches!(
        HeifFile::from_bytes(&file),
        Err(Error::PropertyIndexOutOfRange { index: 9, count: 1 })
    ));
}

#[test]
fn test_ifd_loop_terminates() {
    let mut data = tiff();
    // IFD0 holds only the Exif pointer; aim it back at IFD0 itself
    let value = 8 + 2 + 8;
    data[value..value + 4].copy_from_slice(&8u32.to_be_bytes());
    assert!(find_date_slots(&data).unwrap().is_empty());
}

#[test]
fn test_tiff_value_out_of_bounds() {
    let mut data = tiff();
    data.truncate(data.len() - 10);
    assert!(find_date_slots(&data).is_err());
}

#[test]
fn test_exif_prefix_past_payload() {
    let mut payload = 0xFFFF_FFF0u32.to_be_bytes().to_vec();
    payload.extend(tiff());
    let original = HeifBuilder::new().with_exif_payload(payload).build();

    let mut stream = ByteStream::from_vec(original.clone());
    assert!(patch_dates(&mut stream, &updates()).is_err());
    assert_eq!(stream.into_inner().into_inner(), original);
}

#[test]
fn test_read_only_stream_rejects_writes() {
    let original = HeifBuilder::new().with_exif(&tiff()).build();
    let mut copy = original.clone();
    let mut stream = ByteStream::new(
        std::io::Cursor::new(copy.as_mut_slice()),
        AccessMode::ReadOnly,
    )
    .unwrap();
    assert!(matches!(
        patch_dates(&mut stream, &updates()),
        Err(Error::ReadOnly)
    ));
    assert_eq!(copy, original);
}
