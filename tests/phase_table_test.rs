// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Phase table authoring and compilation through the public system API.
//!
//! These tests run entirely offline: heads are created from registered
//! discovery records and never connected, so compilation sees the
//! specification floor as each head's minimum scan period.

use scanfleet::phase::{camera_start_early_offset_us, frame_overhead_time_us};
use scanfleet::wire::API_VERSION_MAJOR;
use scanfleet::{
    Camera, DiscoveredHead, Error, HeadConfiguration, HeadType, Laser, ScanSystem, Units,
};
use std::net::Ipv4Addr;

fn wx_record(serial: u32) -> DiscoveredHead {
    DiscoveredHead {
        serial_number: serial,
        ip_address: Ipv4Addr::new(192, 168, 1, serial as u8),
        head_type: HeadType::Js50Wx,
        firmware_version_major: API_VERSION_MAJOR,
        firmware_version_minor: 0,
        firmware_version_patch: 0,
        type_name: "JS-50 WX".to_owned(),
    }
}

fn laser_on_config(max_us: u32) -> HeadConfiguration {
    HeadConfiguration {
        laser_on_min_us: 15,
        laser_on_def_us: max_us.min(100),
        laser_on_max_us: max_us,
        ..HeadConfiguration::default()
    }
}

fn two_head_system() -> ScanSystem {
    let mut system = ScanSystem::new(Units::Inches);
    system.register_discovered(wx_record(11));
    system.register_discovered(wx_record(22));
    system.create_scan_head(11, 0).unwrap();
    system.create_scan_head(22, 1).unwrap();

    for serial in [11, 22] {
        system
            .scan_head_by_serial(serial)
            .unwrap()
            .set_configuration(laser_on_config(500))
            .unwrap();
    }
    system
}

#[test]
fn two_heads_interleaved_phases() {
    // Phase 1 exposes camera A on both heads, phase 2 camera B. With no
    // window pressure (spec floor only), each phase keeps its seeded
    // 500 us laser-on duration.
    let mut system = two_head_system();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();
    system.phase_insert_camera(22, Camera::A, None).unwrap();
    system.phase_create();
    system.phase_insert_camera(11, Camera::B, None).unwrap();
    system.phase_insert_camera(22, Camera::B, None).unwrap();

    let compiled = system.compile_phase_table();
    assert_eq!(compiled.phases.len(), 2);
    assert_eq!(compiled.phases[0].duration_us, 500);
    assert_eq!(compiled.phases[1].duration_us, 500);
    assert_eq!(compiled.total_duration_us, 1000);

    assert_eq!(
        system.min_scan_period_us(),
        camera_start_early_offset_us() + 1000
    );
}

#[test]
fn same_camera_in_consecutive_phases_pays_overhead() {
    // Reusing one camera across phases forces the frame overhead between
    // its exposures.
    let mut system = two_head_system();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();

    let compiled = system.compile_phase_table();
    // Phase 2 runs 500 us after camera A finished phase 1, which is less
    // than the mandatory overhead; the solver stretches until the gap
    // between consecutive uses is laser_on + overhead.
    assert_eq!(compiled.total_duration_us, 2 * (500 + frame_overhead_time_us()));
}

#[test]
fn compile_is_repeatable() {
    let mut system = two_head_system();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();
    system.phase_insert_camera(22, Camera::A, None).unwrap();
    system.phase_create();
    system.phase_insert_camera(11, Camera::B, None).unwrap();

    let first = system.compile_phase_table();
    let second = system.compile_phase_table();
    assert_eq!(first.total_duration_us, second.total_duration_us);
    for (a, b) in first.phases.iter().zip(second.phases.iter()) {
        assert_eq!(a.duration_us, b.duration_us);
    }
}

#[test]
fn longer_laser_on_never_shrinks_the_table() {
    let mut last_total = 0;
    for laser_on_max in [200, 400, 600, 800, 1000] {
        let mut system = two_head_system();
        system.phase_create();
        system
            .phase_insert_camera(11, Camera::A, Some(&laser_on_config(laser_on_max)))
            .unwrap();
        system.phase_create();
        system
            .phase_insert_camera(11, Camera::B, Some(&laser_on_config(laser_on_max)))
            .unwrap();

        let total = system.compile_phase_table().total_duration_us;
        assert!(total >= last_total, "total shrank at {}", laser_on_max);
        last_total = total;
    }
}

#[test]
fn element_limit_is_per_head() {
    let mut system = two_head_system();
    // A JS-50 WX accepts at most eight elements across the table.
    for _ in 0..4 {
        system.phase_create();
        system.phase_insert_camera(11, Camera::A, None).unwrap();
        system.phase_insert_camera(11, Camera::B, None).unwrap();
    }
    system.phase_create();
    assert_eq!(
        system.phase_insert_camera(11, Camera::A, None),
        Err(Error::NoMoreRoom)
    );
    // The other head has its own allowance.
    assert!(system.phase_insert_camera(22, Camera::A, None).is_ok());
}

#[test]
fn duplicate_camera_within_a_phase_rejected() {
    let mut system = two_head_system();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();
    assert_eq!(
        system.phase_insert_camera(11, Camera::A, None),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn laser_addressing_rejected_on_camera_primary_head() {
    let mut system = two_head_system();
    system.phase_create();
    assert_eq!(
        system.phase_insert_laser(11, Laser::L1, None),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn insert_before_create_rejected() {
    let mut system = two_head_system();
    assert_eq!(
        system.phase_insert_camera(11, Camera::A, None),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn start_scanning_rejects_short_period_offline() {
    // Guard order puts the connection check first when disconnected.
    let mut system = two_head_system();
    system.phase_create();
    system.phase_insert_camera(11, Camera::A, None).unwrap();
    assert_eq!(
        system
            .start_scanning(10, scanfleet::DataFormat::XyBrightnessFull)
            .unwrap_err(),
        Error::NotConnected
    );
}
