// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Static per-type scan head specifications.
//!
//! Each scan head product type ships with a fixed specification describing
//! its cameras, lasers, timing limits, and how camera and laser ports pair
//! into configuration groups. The specifications are embedded in the crate
//! as JSON resources and loaded once per head at construction.
//!
//! Ports versus ids: the wire identifies cameras and lasers by zero-based
//! *port* numbers, while the host API uses 1-based [`Camera`] and [`Laser`]
//! ids. The `camera_port_to_id` and `laser_port_to_id` tables translate
//! between the two; the position in the table is the port.

use crate::error::{Error, Result};
use crate::types::{Camera, Laser};
use serde::Deserialize;

/// Product type of a scan head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadType {
    Js50Wx,
    Js50Wsc,
    Js50X6B20,
    Js50X6B30,
}

impl HeadType {
    /// Numeric tag used in discovery replies.
    pub fn tag(&self) -> u32 {
        match self {
            HeadType::Js50Wx => 1,
            HeadType::Js50Wsc => 2,
            HeadType::Js50X6B20 => 3,
            HeadType::Js50X6B30 => 4,
        }
    }

    /// Looks up a head type by its discovery tag.
    pub fn from_tag(tag: u32) -> Option<HeadType> {
        match tag {
            1 => Some(HeadType::Js50Wx),
            2 => Some(HeadType::Js50Wsc),
            3 => Some(HeadType::Js50X6B20),
            4 => Some(HeadType::Js50X6B30),
            _ => None,
        }
    }
}

/// Which side of a configuration group the host addresses directly.
///
/// For camera-primary heads the host names a camera and the paired laser is
/// looked up; for laser-primary heads it is the other way around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationGroupPrimary {
    Camera,
    Laser,
}

/// A camera port / laser port pairing that can expose together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ConfigurationGroup {
    pub camera_port: u32,
    pub laser_port: u32,
}

/// Static specification for one scan head product type.
#[derive(Clone, Debug, Deserialize)]
pub struct HeadTypeSpec {
    pub min_scan_period_us: u32,
    pub max_scan_period_us: u32,
    pub min_camera_exposure_us: u32,
    pub max_camera_exposure_us: u32,
    pub min_laser_on_us: u32,
    pub max_laser_on_us: u32,
    pub max_camera_rows: u32,
    pub max_camera_columns: u32,
    pub number_of_cameras: u32,
    pub number_of_lasers: u32,
    /// Camera port physically on the cable-upstream side of the head.
    pub camera_port_cable_upstream: u32,
    pub configuration_group_primary: ConfigurationGroupPrimary,
    pub configuration_groups: Vec<ConfigurationGroup>,
    /// Camera id at index `port`.
    pub camera_port_to_id: Vec<u32>,
    /// Laser id at index `port`.
    pub laser_port_to_id: Vec<u32>,
    /// Upper bound on phase table elements for a head of this type.
    pub max_configuration_groups: u32,
    pub type_name: String,
}

const JS50WX_SPEC: &str = include_str!("resources/js50wx.json");
const JS50WSC_SPEC: &str = include_str!("resources/js50wsc.json");
const JS50X6B20_SPEC: &str = include_str!("resources/js50x6b20.json");
const JS50X6B30_SPEC: &str = include_str!("resources/js50x6b30.json");

impl HeadTypeSpec {
    /// Loads the embedded specification for a head type.
    pub fn load(head_type: HeadType) -> Result<HeadTypeSpec> {
        let raw = match head_type {
            HeadType::Js50Wx => JS50WX_SPEC,
            HeadType::Js50Wsc => JS50WSC_SPEC,
            HeadType::Js50X6B20 => JS50X6B20_SPEC,
            HeadType::Js50X6B30 => JS50X6B30_SPEC,
        };

        serde_json::from_str(raw).map_err(|_| Error::Internal)
    }

    /// Checks a camera id against the number of cameras on the head.
    pub fn is_camera_valid(&self, camera: Camera) -> bool {
        camera.id() <= self.number_of_cameras
    }

    /// Checks a laser id against the number of lasers on the head.
    pub fn is_laser_valid(&self, laser: Laser) -> bool {
        laser.id() <= self.number_of_lasers
    }

    /// Translates a camera id to its wire port, if the head has it.
    pub fn camera_id_to_port(&self, camera: Camera) -> Option<u32> {
        self.camera_port_to_id
            .iter()
            .position(|&id| id == camera.id())
            .map(|port| port as u32)
    }

    /// Translates a wire camera port to a camera id.
    pub fn camera_port_to_id(&self, port: u32) -> Option<Camera> {
        self.camera_port_to_id
            .get(port as usize)
            .and_then(|&id| Camera::from_id(id))
    }

    /// Translates a laser id to its wire port, if the head has it.
    pub fn laser_id_to_port(&self, laser: Laser) -> Option<u32> {
        self.laser_port_to_id
            .iter()
            .position(|&id| id == laser.id())
            .map(|port| port as u32)
    }

    /// Translates a wire laser port to a laser id.
    pub fn laser_port_to_id(&self, port: u32) -> Option<Laser> {
        self.laser_port_to_id
            .get(port as usize)
            .and_then(|&id| Laser::from_id(id))
    }

    /// Laser paired with `camera` by the head's configuration groups.
    ///
    /// Only meaningful on camera-primary heads; laser-primary heads return
    /// `None` because a camera there pairs with several lasers.
    pub fn paired_laser(&self, camera: Camera) -> Option<Laser> {
        if self.configuration_group_primary != ConfigurationGroupPrimary::Camera {
            return None;
        }
        if !self.is_camera_valid(camera) {
            return None;
        }

        let camera_port = self.camera_id_to_port(camera)?;
        self.configuration_groups
            .iter()
            .find(|grp| grp.camera_port == camera_port)
            .and_then(|grp| self.laser_port_to_id(grp.laser_port))
    }

    /// Camera paired with `laser` by the head's configuration groups.
    ///
    /// Only meaningful on laser-primary heads.
    pub fn paired_camera(&self, laser: Laser) -> Option<Camera> {
        if self.configuration_group_primary != ConfigurationGroupPrimary::Laser {
            return None;
        }
        if !self.is_laser_valid(laser) {
            return None;
        }

        let laser_port = self.laser_id_to_port(laser)?;
        self.configuration_groups
            .iter()
            .find(|grp| grp.laser_port == laser_port)
            .and_then(|grp| self.camera_port_to_id(grp.camera_port))
    }

    /// Checks whether a camera and laser form a configuration group.
    pub fn is_pair_valid(&self, camera: Camera, laser: Laser) -> bool {
        self.pair_index(camera, laser).is_some()
    }

    /// Index of the `(camera, laser)` configuration group.
    ///
    /// Used to key the per-pair alignment and window tables, which are plain
    /// arrays in group order.
    pub fn pair_index(&self, camera: Camera, laser: Laser) -> Option<usize> {
        let camera_port = self.camera_id_to_port(camera)?;
        let laser_port = self.laser_id_to_port(laser)?;
        self.configuration_groups
            .iter()
            .position(|grp| grp.camera_port == camera_port && grp.laser_port == laser_port)
    }

    /// All `(camera, laser)` pairs of the head, in configuration group order.
    pub fn pairs(&self) -> Vec<(Camera, Laser)> {
        self.configuration_groups
            .iter()
            .filter_map(|grp| {
                let camera = self.camera_port_to_id(grp.camera_port)?;
                let laser = self.laser_port_to_id(grp.laser_port)?;
                Some((camera, laser))
            })
            .collect()
    }
}
