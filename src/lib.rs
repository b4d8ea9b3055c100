//! In-place date rewriting and structural property injection for HEIF files.
//!
//! Two independent operations:
//!
//! - **Date patching** overwrites the capture and modification dates held in
//!   EXIF and XMP metadata without moving a single byte. Every value is
//!   written into the slot it already occupies, so the file length and all
//!   offsets stay valid. HEIF/HEIC is the primary container; JPEG and TIFF
//!   are handled through the same path.
//! - **Property injection** adds transformative properties (`imir`, `clap`,
//!   `pasp`, `irot` or any raw box) to a HEIF item. This grows the file, and
//!   every enclosing box size, the association count and the `iloc` offsets
//!   downstream are repaired, then the result is verified by parsing it again.
//!
//! # Patching dates
//!
//! ```
//! use chrono::DateTime;
//! use heif_date_io::{patch_dates, ByteStream, DateUpdates, Endian};
//! use heif_date_io::test_utils::{HeifBuilder, TiffBuilder};
//! use heif_date_io::tiff::{tags, Ifd};
//!
//! # fn main() -> heif_date_io::Result<()> {
//! let tiff = TiffBuilder::new(Endian::Big)
//!     .ascii(Ifd::Exif, tags::DATE_TIME_ORIGINAL, "2001:01:01 00:00:00", 20)
//!     .build();
//! let file = HeifBuilder::new().with_exif(&tiff).build();
//! let len = file.len();
//!
//! let when = DateTime::parse_from_rfc3339("2026-01-28T18:30:00+01:00").unwrap();
//! let mut stream = ByteStream::from_vec(file);
//! let report = patch_dates(&mut stream, &DateUpdates::new(when))?;
//!
//! assert_eq!(report.written[0].value, "2026:01:28 18:30:00");
//! assert_eq!(stream.len(), len as u64);
//! # Ok(())
//! # }
//! ```
//!
//! # Injecting properties
//!
//! ```no_run
//! use heif_date_io::{inject_file, Injection, MirrorAxis, Rotation};
//!
//! # fn main() -> heif_date_io::Result<()> {
//! let injection = Injection::new()
//!     .mirror(MirrorAxis::Horizontal, false)
//!     .rotation(Rotation::Ccw90, true);
//! inject_file("photo.heic", "photo-flipped.heic", &injection)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Inspecting the box tree
//!
//! [`HeifFile`] parses the container once and exposes the item, location and
//! property tables the two operations are built on.

pub mod bmff;
mod container;
mod error;
pub mod inject;
#[cfg(feature = "jpeg")]
pub mod jpeg;
pub mod patch;
mod segment;
mod stream;
pub mod tiff;
mod updates;
#[cfg(feature = "xmp")]
pub mod xmp;

pub use bmff::{BoxInfo, BoxSummary, BoxType, HeifFile};
pub use container::Container;
pub use error::{Error, Result};
pub use inject::{inject, inject_file, CleanAperture, Injection, MirrorAxis, Property, Rotation};
pub use patch::{
    patch_dates, patch_file_dates, PatchReport, SkipReason, SkippedSlot, SlotSource, WrittenSlot,
};
pub use segment::{ByteRange, PayloadMap};
pub use stream::{AccessMode, ByteStream, Endian};
pub use tiff::DateTag;
pub use updates::{DateUpdates, DEFAULT_XMP_PROPERTIES};

// Synthetic fixture builders - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
