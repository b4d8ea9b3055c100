//! End-to-end date patching
//!
//! Every test checks the one property that matters most: the file is the
//! same length afterwards, and only bytes inside the reported slots differ.

use chrono::{DateTime, FixedOffset};
use heif_date_io::{
    patch_dates, patch_file_dates,
    test_utils::{xmp_packet, HeifBuilder, TiffBuilder},
    tiff::{read_exif_dates, tags, types, Ifd},
    ByteStream, Container, DateTag, DateUpdates, Endian, HeifFile, PatchReport, SkipReason,
    SlotSource,
};
use pretty_assertions::assert_eq;

fn ts() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap()
}

fn patch(data: Vec<u8>, updates: &DateUpdates) -> (Vec<u8>, PatchReport) {
    let mut stream = ByteStream::from_vec(data);
    let report = patch_dates(&mut stream, updates).unwrap();
    (stream.into_inner().into_inner(), report)
}

/// Bytes outside the written slots must be untouched
fn assert_only_slots_changed(before: &[u8], after: &[u8], report: &PatchReport) {
    assert_eq!(before.len(), after.len(), "file length changed");
    for (i, (a, b)) in before.iter().zip(after).enumerate() {
        if a == b {
            continue;
        }
        let i = i as u64;
        assert!(
            report
                .written
                .iter()
                .any(|w| i >= w.offset && i < w.offset + w.width),
            "byte {} changed outside any reported slot",
            i
        );
    }
}

fn heif_exif_dates(data: &[u8]) -> Vec<(DateTag, String)> {
    let heif = HeifFile::from_bytes(data).unwrap();
    let id = heif.exif_item_id().unwrap();
    let exif = heif.read_item(&mut ByteStream::from_slice(data), id).unwrap();
    read_exif_dates(&exif[4..]).unwrap()
}

fn full_tiff(endian: Endian) -> Vec<u8> {
    TiffBuilder::new(endian)
        .ascii(Ifd::Ifd0, tags::DATE_TIME, "2001:01:01 00:00:00", 20)
        .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
        .ascii(Ifd::Exif, tags::DATE_TIME_DIGITIZED, "2001:01:01 00:00:00", 20)
        .ascii(Ifd::Exif, tags::OFFSET_TIME_ORIGINAL, "+00:00", 7)
        .ascii(Ifd::Gps, tags::GPS_DATE_STAMP, "2001:01:01", 11)
        .build()
}

#[test]
fn test_heif_all_exif_tags() {
    for endian in [Endian::Big, Endian::Little] {
        let original = HeifBuilder::new().with_exif(&full_tiff(endian)).build();
        let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));

        assert_eq!(report.container, Container::Heif);
        assert_eq!(report.written.len(), 5);
        assert!(report.skipped.is_empty());
        assert_only_slots_changed(&original, &patched, &report);

        assert_eq!(
            heif_exif_dates(&patched),
            vec![
                (DateTag::DateTime, "2026:01:28 18:30:00".to_string()),
                (DateTag::DateTimeOriginal, "2026:01:28 18:30:00".to_string()),
                (DateTag::DateTimeDigitized, "2026:01:28 18:30:00".to_string()),
                (DateTag::OffsetTimeOriginal, "+01:00".to_string()),
                (DateTag::GpsDateStamp, "2026:01:28".to_string()),
            ]
        );
    }
}

#[test]
fn test_gps_date_is_utc() {
    let late = DateTime::parse_from_rfc3339("2026-01-28T23:30:00-05:00").unwrap();
    let original = HeifBuilder::new().with_exif(&full_tiff(Endian::Big)).build();
    let (patched, _) = patch(original, &DateUpdates::new(late));
    let dates = heif_exif_dates(&patched);
    assert!(dates.contains(&(DateTag::GpsDateStamp, "2026:01:29".to_string())));
    assert!(dates.contains(&(DateTag::DateTime, "2026:01:28 23:30:00".to_string())));
}

#[test]
fn test_narrow_exif_slot_truncated() {
    let tiff = TiffBuilder::new(Endian::Big)
        .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01", 11)
        .build();
    let original = HeifBuilder::new().with_exif(&tiff).build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));

    assert_eq!(report.written[0].value, "2026:01:28");
    assert_eq!(report.written[0].width, 11);
    assert_only_slots_changed(&original, &patched, &report);

    // the final slot byte is always the terminator
    let end = (report.written[0].offset + report.written[0].width) as usize;
    assert_eq!(patched[end - 1], 0);
}

#[test]
fn test_non_ascii_date_tag_skipped() {
    let tiff = TiffBuilder::new(Endian::Big)
        .entry(Ifd::Ifd0, tags::DATE_TIME, types::SHORT, 1, vec![0, 7])
        .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
        .build();
    let original = HeifBuilder::new().with_exif(&tiff).build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));

    assert_eq!(report.written.len(), 1);
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::NotAscii {
            field_type: types::SHORT
        }
    );
    assert_only_slots_changed(&original, &patched, &report);
}

#[test]
fn test_selected_tags_only() {
    let original = HeifBuilder::new().with_exif(&full_tiff(Endian::Big)).build();
    let updates = DateUpdates::new(ts()).with_exif_tags(&[DateTag::DateTimeOriginal]);
    let (_, report) = patch(original, &updates);
    assert_eq!(report.written.len(), 1);
    assert_eq!(
        report.written[0].source,
        SlotSource::Exif(DateTag::DateTimeOriginal)
    );
}

#[test]
fn test_exif_split_across_extents() {
    let original = HeifBuilder::new()
        .with_exif(&full_tiff(Endian::Little))
        .split_exif()
        .build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));
    assert_eq!(report.written.len(), 5);
    assert_only_slots_changed(&original, &patched, &report);
    assert!(heif_exif_dates(&patched)
        .iter()
        .any(|(tag, v)| *tag == DateTag::DateTimeOriginal && v == "2026:01:28 18:30:00"));
}

#[test]
fn test_exif_in_idat() {
    let original = HeifBuilder::new()
        .with_exif(&full_tiff(Endian::Big))
        .exif_in_idat()
        .build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));
    assert_eq!(report.written.len(), 5);
    assert_only_slots_changed(&original, &patched, &report);
}

#[test]
fn test_exif_header_offset_honoured() {
    // 6-byte "Exif\0\0" signature between the offset field and the TIFF header
    let mut payload = 6u32.to_be_bytes().to_vec();
    payload.extend(b"Exif\0\0");
    payload.extend(full_tiff(Endian::Big));
    let original = HeifBuilder::new().with_exif_payload(payload).build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));
    assert_eq!(report.written.len(), 5);
    assert_only_slots_changed(&original, &patched, &report);
}

#[test]
fn test_heif_xmp_styles_and_widths() {
    let xmp = xmp_packet(
        r#"xmp:CreateDate="2001-01-01T00:00:00+00:00" xmp:ModifyDate="2001-01-01T00:00:00""#,
        concat!(
            "   <dc:title>Fête à Zürich ✓</dc:title>\n",
            "   <photoshop:DateCreated>2001-01-01</photoshop:DateCreated>\n",
            "   <xmp:MetadataDate>2001-01</xmp:MetadataDate>"
        ),
    );
    let original = HeifBuilder::new().with_xmp(xmp.as_bytes()).build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()).skip_exif());

    assert_only_slots_changed(&original, &patched, &report);
    let values: Vec<(&SlotSource, &str)> = report
        .written
        .iter()
        .map(|w| (&w.source, w.value.as_str()))
        .collect();
    assert_eq!(
        values,
        vec![
            (
                &SlotSource::Xmp("xmp:CreateDate".into()),
                "2026-01-28T18:30:00+01:00"
            ),
            (
                &SlotSource::Xmp("xmp:ModifyDate".into()),
                "2026-01-28T18:30:00"
            ),
            (&SlotSource::Xmp("photoshop:DateCreated".into()), "2026-01-28"),
        ]
    );
    assert_eq!(
        report.skipped[0].source,
        SlotSource::Xmp("xmp:MetadataDate".into())
    );
    assert_eq!(report.skipped[0].reason, SkipReason::NoRoom { width: 7 });

    let text = String::from_utf8_lossy(&patched);
    assert!(text.contains("Fête à Zürich ✓"));
    assert!(text.contains("<photoshop:DateCreated>2026-01-28</photoshop:DateCreated>"));
}

#[test]
fn test_xmp_value_padded_to_width() {
    let xmp = xmp_packet(r#"xmp:CreateDate="2001-01-01T00:00:00.000""#, "");
    let original = HeifBuilder::new().with_xmp(xmp.as_bytes()).build();
    let (patched, report) = patch(original, &DateUpdates::new(ts()));

    assert_eq!(report.written[0].width, 23);
    let text = String::from_utf8_lossy(&patched);
    assert!(text.contains(r#"xmp:CreateDate="2026-01-28T18:30:00    ""#));
}

#[test]
fn test_heif_exif_and_xmp_together() {
    let xmp = xmp_packet(r#"xmp:CreateDate="2001-01-01T00:00:00+00:00""#, "");
    let original = HeifBuilder::new()
        .with_exif(&full_tiff(Endian::Big))
        .with_xmp(xmp.as_bytes())
        .build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));
    assert_eq!(report.written.len(), 6);
    assert_only_slots_changed(&original, &patched, &report);

    // the box tree still reproduces the patched bytes exactly
    let heif = HeifFile::from_bytes(&patched).unwrap();
    let mut rewritten = Vec::new();
    heif.rewrite(&mut ByteStream::from_slice(&patched), &mut rewritten)
        .unwrap();
    assert_eq!(rewritten, patched);
}

#[test]
fn test_patching_twice_is_stable() {
    let original = HeifBuilder::new().with_exif(&full_tiff(Endian::Big)).build();
    let (once, _) = patch(original, &DateUpdates::new(ts()));
    let (twice, report) = patch(once.clone(), &DateUpdates::new(ts()));
    assert_eq!(once, twice);
    assert!(report.is_modified());
}

#[test]
fn test_heif_without_metadata() {
    let original = HeifBuilder::new().build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));
    assert!(!report.is_modified());
    assert_eq!(patched, original);
}

#[cfg(feature = "jpeg")]
#[test]
fn test_jpeg_exif_and_xmp() {
    use heif_date_io::test_utils::jpeg_with;

    let xmp = xmp_packet("", "<xmp:CreateDate>2001-01-01T00:00:00</xmp:CreateDate>");
    let original = jpeg_with(Some(&full_tiff(Endian::Little)), Some(xmp.as_bytes()));
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));

    assert_eq!(report.container, Container::Jpeg);
    assert_eq!(report.written.len(), 6);
    assert_only_slots_changed(&original, &patched, &report);
}

#[cfg(feature = "tiff")]
#[test]
fn test_tiff_file_with_embedded_xmp() {
    let xmp = xmp_packet(r#"xmp:ModifyDate="2001-01-01T00:00:00+00:00""#, "");
    let original = TiffBuilder::new(Endian::Little)
        .ascii(Ifd::Ifd0, tags::DATE_TIME, "2001:01:01 00:00:00", 20)
        .entry(
            Ifd::Ifd0,
            tags::XMP,
            types::BYTE,
            xmp.len() as u32,
            xmp.into_bytes(),
        )
        .build();
    let (patched, report) = patch(original.clone(), &DateUpdates::new(ts()));

    assert_eq!(report.container, Container::Tiff);
    assert_eq!(report.written.len(), 2);
    assert_only_slots_changed(&original, &patched, &report);
    assert_eq!(
        read_exif_dates(&patched).unwrap(),
        vec![(DateTag::DateTime, "2026:01:28 18:30:00".to_string())]
    );
}

#[test]
fn test_patch_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.heic");
    let original = HeifBuilder::new().with_exif(&full_tiff(Endian::Big)).build();
    std::fs::write(&path, &original).unwrap();

    let report = patch_file_dates(&path, &DateUpdates::new(ts())).unwrap();
    let patched = std::fs::read(&path).unwrap();
    assert_eq!(report.written.len(), 5);
    assert_only_slots_changed(&original, &patched, &report);
}

#[test]
fn test_unrecognised_file_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"just some text, not an image").unwrap();

    assert!(patch_file_dates(&path, &DateUpdates::new(ts())).is_err());
    assert_eq!(
        std::fs::read(&path).unwrap(),
        b"just some text, not an image"
    );
}
