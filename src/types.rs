// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Common value types shared across the scan system.

use std::fmt;

/// Measurement units used for all user-facing lengths.
///
/// Internally, windows and profile points are scaled by 1000 to fit integer
/// types; the units only select the alignment scale applied during the
/// camera to mill conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Units {
    /// Lengths in inches.
    #[default]
    Inches,
    /// Lengths in millimetres.
    Millimetres,
}

impl Units {
    /// Scale factor applied by the alignment transform.
    pub fn alignment_scale(&self) -> f64 {
        match self {
            Units::Inches => 1.0,
            Units::Millimetres => 25.4,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Units::Inches => write!(f, "inches"),
            Units::Millimetres => write!(f, "millimetres"),
        }
    }
}

/// Camera on a scan head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Camera {
    A,
    B,
}

impl Camera {
    /// Numeric id used on the wire and in the head specification (1-based).
    pub fn id(&self) -> u32 {
        match self {
            Camera::A => 1,
            Camera::B => 2,
        }
    }

    /// Looks up a camera by its 1-based id.
    pub fn from_id(id: u32) -> Option<Camera> {
        match id {
            1 => Some(Camera::A),
            2 => Some(Camera::B),
            _ => None,
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Camera::A => write!(f, "camera A"),
            Camera::B => write!(f, "camera B"),
        }
    }
}

/// Laser emitter on a scan head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Laser {
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
}

impl Laser {
    /// Numeric id used on the wire and in the head specification (1-based).
    pub fn id(&self) -> u32 {
        match self {
            Laser::L1 => 1,
            Laser::L2 => 2,
            Laser::L3 => 3,
            Laser::L4 => 4,
            Laser::L5 => 5,
            Laser::L6 => 6,
        }
    }

    /// Looks up a laser by its 1-based id.
    pub fn from_id(id: u32) -> Option<Laser> {
        match id {
            1 => Some(Laser::L1),
            2 => Some(Laser::L2),
            3 => Some(Laser::L3),
            4 => Some(Laser::L4),
            5 => Some(Laser::L5),
            6 => Some(Laser::L6),
            _ => None,
        }
    }
}

impl fmt::Display for Laser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "laser {}", self.id())
    }
}

/// Encoder input channels a scan head can sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoder {
    Main,
    Aux1,
    Aux2,
}

impl Encoder {
    /// Index into the per-profile encoder value array.
    pub fn index(&self) -> usize {
        match self {
            Encoder::Main => 0,
            Encoder::Aux1 => 1,
            Encoder::Aux2 => 2,
        }
    }
}

/// Which side of the scan head the cable exits.
///
/// Equivalent to a 180 degree yaw in the alignment transform; see
/// [`crate::geometry::Alignment`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CableOrientation {
    #[default]
    Upstream,
    Downstream,
}

/// Scan data formats selectable for streaming.
///
/// Full resolution fills every profile slot inside the scan window; half and
/// quarter resolution fill every other or every fourth slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataFormat {
    #[default]
    XyBrightnessFull,
    XyBrightnessHalf,
    XyBrightnessQuarter,
    XyFull,
    XyHalf,
    XyQuarter,
}

impl DataFormat {
    /// Content type bits requested from the head for this format.
    pub fn data_type_mask(&self) -> u16 {
        use crate::datagram::DataType;
        match self {
            DataFormat::XyBrightnessFull
            | DataFormat::XyBrightnessHalf
            | DataFormat::XyBrightnessQuarter => {
                DataType::XyData.bit() | DataType::Brightness.bit()
            }
            DataFormat::XyFull | DataFormat::XyHalf | DataFormat::XyQuarter => {
                DataType::XyData.bit()
            }
        }
    }

    /// Column stride requested from the head for this format.
    pub fn data_stride(&self) -> u16 {
        match self {
            DataFormat::XyBrightnessFull | DataFormat::XyFull => 1,
            DataFormat::XyBrightnessHalf | DataFormat::XyHalf => 2,
            DataFormat::XyBrightnessQuarter | DataFormat::XyQuarter => 4,
        }
    }
}

/// Upper bound for laser detection threshold values.
pub const MAX_LASER_DETECTION_THRESHOLD: u32 = 1023;
/// Upper bound for saturation threshold values.
pub const MAX_SATURATION_THRESHOLD: u32 = 1023;
/// Upper bound for the saturation percentage.
pub const MAX_SATURATION_PERCENTAGE: u32 = 100;

/// Exposure and detection parameters applied to a scan head.
///
/// The camera exposure and laser on times are each a `min <= def <= max`
/// range; the head's autoexposure moves within the range. Validity against a
/// particular head's limits is checked by
/// [`crate::head::ScanHead::is_configuration_valid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadConfiguration {
    pub camera_exposure_min_us: u32,
    pub camera_exposure_def_us: u32,
    pub camera_exposure_max_us: u32,
    pub laser_on_min_us: u32,
    pub laser_on_def_us: u32,
    pub laser_on_max_us: u32,
    /// Minimum brightness for a pixel to count as laser line, 0 to 1023.
    pub laser_detection_threshold: u32,
    /// Brightness at which a pixel counts as saturated, 0 to 1023.
    pub saturation_threshold: u32,
    /// Acceptable percentage of saturated pixels, 0 to 100.
    pub saturation_percentage: u32,
}

impl Default for HeadConfiguration {
    fn default() -> Self {
        Self {
            camera_exposure_min_us: 10_000,
            camera_exposure_def_us: 500_000,
            camera_exposure_max_us: 1_000_000,
            laser_on_min_us: 100,
            laser_on_def_us: 500,
            laser_on_max_us: 1_000,
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturation_percentage: 30,
        }
    }
}

impl HeadConfiguration {
    /// Checks the ordering invariants that hold independent of head limits:
    /// `min <= def <= max` for both ranges, thresholds within bounds.
    pub fn ranges_ordered(&self) -> bool {
        self.camera_exposure_min_us <= self.camera_exposure_def_us
            && self.camera_exposure_def_us <= self.camera_exposure_max_us
            && self.laser_on_min_us <= self.laser_on_def_us
            && self.laser_on_def_us <= self.laser_on_max_us
            && self.laser_detection_threshold <= MAX_LASER_DETECTION_THRESHOLD
            && self.saturation_threshold <= MAX_SATURATION_THRESHOLD
            && self.saturation_percentage <= MAX_SATURATION_PERCENTAGE
    }
}

/// Fixed properties of a scan head, derived from its type specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadCapabilities {
    pub camera_brightness_bit_depth: u32,
    pub max_camera_image_height: u32,
    pub max_camera_image_width: u32,
    pub min_scan_period_us: u32,
    pub max_scan_period_us: u32,
    pub num_cameras: u32,
    pub num_encoders: u32,
    pub num_lasers: u32,
}
