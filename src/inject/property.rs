//! Encoders for the transformative item properties
//!
//! Reference: ISO/IEC 23008-12 section 6.5 (`imir`, `irot`, `clap`) and
//! ISO/IEC 14496-12 section 12.1.4 (`pasp`).

use crate::{
    bmff::{BoxHeader, BoxType, HEADER_SIZE},
    error::{Error, Result},
};
use byteorder::{BigEndian, WriteBytesExt};

/// Mirror axis of an `imir` property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAxis {
    /// Mirror about a vertical axis (left and right swap)
    Vertical,
    /// Mirror about a horizontal axis (top and bottom swap)
    Horizontal,
}

/// Anti-clockwise rotation of an `irot` property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Ccw90,
    Ccw180,
    Ccw270,
}

impl Rotation {
    /// Rotation from a multiple of 90 degrees
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees % 360 {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Ccw90),
            180 => Ok(Rotation::Ccw180),
            270 => Ok(Rotation::Ccw270),
            _ => Err(Error::InvalidInput(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            ))),
        }
    }

    fn quarter_turns(self) -> u8 {
        match self {
            Rotation::None => 0,
            Rotation::Ccw90 => 1,
            Rotation::Ccw180 => 2,
            Rotation::Ccw270 => 3,
        }
    }
}

/// Clean aperture (`clap`): crop window as fractions, offsets relative to
/// the image centre
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanAperture {
    pub width_n: u32,
    pub width_d: u32,
    pub height_n: u32,
    pub height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

impl CleanAperture {
    /// Centred crop of whole pixels
    pub fn centered(width: u32, height: u32) -> Self {
        Self {
            width_n: width,
            width_d: 1,
            height_n: height,
            height_d: 1,
            horiz_off_n: 0,
            horiz_off_d: 1,
            vert_off_n: 0,
            vert_off_d: 1,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.width_d == 0 || self.height_d == 0 || self.horiz_off_d == 0 || self.vert_off_d == 0 {
            return Err(Error::InvalidInput("clap denominators must be non-zero".into()));
        }
        Ok(())
    }
}

/// A property box to add to `ipco`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Mirror(MirrorAxis),
    CleanAperture(CleanAperture),
    PixelAspectRatio { h_spacing: u32, v_spacing: u32 },
    Rotation(Rotation),
    /// Any other property, given as its type and payload (version/flags included for full boxes)
    Raw { box_type: [u8; 4], payload: Vec<u8> },
}

impl Property {
    pub fn box_type(&self) -> BoxType {
        match self {
            Property::Mirror(_) => BoxType::ImirBox,
            Property::CleanAperture(_) => BoxType::ClapBox,
            Property::PixelAspectRatio { .. } => BoxType::PaspBox,
            Property::Rotation(_) => BoxType::IrotBox,
            Property::Raw { box_type, .. } => BoxType::from_fourcc(*box_type),
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        match self {
            Property::Mirror(axis) => {
                // 7 reserved bits, then the axis bit
                payload.write_u8(match axis {
                    MirrorAxis::Vertical => 0,
                    MirrorAxis::Horizontal => 1,
                })?;
            }
            Property::Rotation(rotation) => {
                // 6 reserved bits, then the angle in quarter turns
                payload.write_u8(rotation.quarter_turns())?;
            }
            Property::PixelAspectRatio {
                h_spacing,
                v_spacing,
            } => {
                if *h_spacing == 0 || *v_spacing == 0 {
                    return Err(Error::InvalidInput("pasp spacing must be non-zero".into()));
                }
                payload.write_u32::<BigEndian>(*h_spacing)?;
                payload.write_u32::<BigEndian>(*v_spacing)?;
            }
            Property::CleanAperture(clap) => {
                clap.validate()?;
                payload.write_u32::<BigEndian>(clap.width_n)?;
                payload.write_u32::<BigEndian>(clap.width_d)?;
                payload.write_u32::<BigEndian>(clap.height_n)?;
                payload.write_u32::<BigEndian>(clap.height_d)?;
                payload.write_i32::<BigEndian>(clap.horiz_off_n)?;
                payload.write_u32::<BigEndian>(clap.horiz_off_d)?;
                payload.write_i32::<BigEndian>(clap.vert_off_n)?;
                payload.write_u32::<BigEndian>(clap.vert_off_d)?;
            }
            Property::Raw { payload: raw, .. } => payload.extend_from_slice(raw),
        }
        Ok(payload)
    }

    /// Self-contained box bytes: size, type and payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        let header = BoxHeader::new(self.box_type(), HEADER_SIZE + payload.len() as u64);
        let mut out = Vec::with_capacity(header.size as usize);
        header.write(&mut out)?;
        out.extend(payload);
        Ok(out)
    }
}
