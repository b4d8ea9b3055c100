//! Container formats the date patcher understands
//!
//! A `Container` defines how a file is structured and therefore how its EXIF
//! and XMP payloads are addressed: through `iloc` items (HEIF), APP1 marker
//! segments (JPEG) or IFD0 offsets (TIFF).

/// Container format, detected from the first bytes of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// ISO-BMFF image container (HEIC, HEIF, AVIF)
    Heif,
    #[cfg(feature = "jpeg")]
    /// JPEG/JFIF
    Jpeg,
    #[cfg(feature = "tiff")]
    /// TIFF, either byte order
    Tiff,
}

/// Number of header bytes [`Container::detect`] looks at
pub const DETECT_LEN: usize = 12;

/// ftyp brands of still-image ISO-BMFF files
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"heim", b"heis", b"mif1", b"msf1", b"avif", b"avis",
];

impl Container {
    /// Get all containers that are available in this build
    pub fn all() -> &'static [Container] {
        &[
            Container::Heif,
            #[cfg(feature = "jpeg")]
            Container::Jpeg,
            #[cfg(feature = "tiff")]
            Container::Tiff,
        ]
    }

    /// Detect the container from the first [`DETECT_LEN`] bytes
    ///
    /// # Example
    ///
    /// ```
    /// use heif_date_io::Container;
    ///
    /// let header = b"\0\0\0\x18ftypheic\0\0\0\0";
    /// assert_eq!(Container::detect(header), Some(Container::Heif));
    /// assert_eq!(Container::detect(b"GIF89a"), None);
    /// ```
    pub fn detect(header: &[u8]) -> Option<Container> {
        if header.len() >= 12 && &header[4..8] == b"ftyp" {
            let major_brand = &header[8..12];
            return HEIF_BRANDS
                .iter()
                .any(|brand| &brand[..] == major_brand)
                .then_some(Container::Heif);
        }

        #[cfg(feature = "jpeg")]
        if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Container::Jpeg);
        }

        #[cfg(feature = "tiff")]
        if header.starts_with(b"II*\0") || header.starts_with(b"MM\0*") {
            return Some(Container::Tiff);
        }

        None
    }

    /// Get the primary MIME type for this container
    pub fn to_mime(&self) -> &'static str {
        match self {
            Container::Heif => "image/heif",
            #[cfg(feature = "jpeg")]
            Container::Jpeg => "image/jpeg",
            #[cfg(feature = "tiff")]
            Container::Tiff => "image/tiff",
        }
    }

    /// Get the primary file extension for this container (without dot)
    pub fn to_extension(&self) -> &'static str {
        match self {
            Container::Heif => "heic",
            #[cfg(feature = "jpeg")]
            Container::Jpeg => "jpg",
            #[cfg(feature = "tiff")]
            Container::Tiff => "tif",
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_mime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_heif_brands() {
        assert_eq!(
            Container::detect(b"\0\0\0\x18ftypmif1\0\0\0\0"),
            Some(Container::Heif)
        );
        // mp4 video is ISO-BMFF but not an image container
        assert_eq!(Container::detect(b"\0\0\0\x18ftypisom\0\0\0\0"), None);
    }

    #[cfg(feature = "jpeg")]
    #[test]
    fn test_detect_jpeg() {
        assert_eq!(
            Container::detect(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(Container::Jpeg)
        );
    }

    #[cfg(feature = "tiff")]
    #[test]
    fn test_detect_tiff() {
        assert_eq!(Container::detect(b"II*\0\x08\0\0\0"), Some(Container::Tiff));
        assert_eq!(Container::detect(b"MM\0*\0\0\0\x08"), Some(Container::Tiff));
    }
}
