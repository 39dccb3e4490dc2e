// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Profile assembly and the bounded per-head profile buffer.
//!
//! A profile is one scan line: up to [`PROFILE_SLOTS`] `(x, y, brightness)`
//! samples at a single head timestamp. The receiver assembles profiles from
//! datagrams with a [`ProfileBuilder`] and publishes them into a
//! [`ProfileRing`], a bounded FIFO that drops the oldest entry on overflow
//! and lets hosts block for a batch with [`ProfileRing::wait_until_available`].

use crate::types::{Camera, DataFormat, Laser};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Number of point slots in a profile.
pub const PROFILE_SLOTS: usize = 1456;

/// Sentinel for x/y values of an empty slot.
pub const INVALID_XY: i32 = i32::MIN;

/// Sentinel for the brightness of an empty slot.
pub const INVALID_BRIGHTNESS: i32 = 0;

/// Maximum number of encoder values carried per profile.
pub const ENCODERS_MAX: usize = 3;

/// Capacity of the per-head profile ring.
pub const PROFILE_RING_CAPACITY: usize = 1000;

/// Profile flag bits reported by the head alongside scan data.
pub mod flags {
    /// ScanSync encoder A+/A- input connection is faulty.
    pub const ENCODER_MAIN_FAULT_A: u32 = 1 << 0;
    /// ScanSync encoder B+/B- input connection is faulty.
    pub const ENCODER_MAIN_FAULT_B: u32 = 1 << 1;
    /// ScanSync aux Y+/Y- input connection is faulty.
    pub const ENCODER_MAIN_FAULT_Y: u32 = 1 << 2;
    /// ScanSync index Z+/Z- input connection is faulty.
    pub const ENCODER_MAIN_FAULT_Z: u32 = 1 << 3;
    /// Encoder data rate exceeds hardware capabilities.
    pub const ENCODER_MAIN_OVERRUN: u32 = 1 << 4;
    /// Termination resistor pairs installed.
    pub const ENCODER_MAIN_TERMINATION_ENABLE: u32 = 1 << 5;
    /// Index Z input is logic high.
    pub const ENCODER_MAIN_INDEX_Z: u32 = 1 << 6;
    /// Sync input is logic high.
    pub const ENCODER_MAIN_SYNC: u32 = 1 << 7;
}

/// One profile sample in mill coordinates (1/1000 units).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProfilePoint {
    pub x: i32,
    pub y: i32,
    pub brightness: i32,
}

impl ProfilePoint {
    /// Whether the slot carries a measured point.
    pub fn is_valid(&self) -> bool {
        self.x != INVALID_XY && self.y != INVALID_XY
    }
}

impl Default for ProfilePoint {
    fn default() -> Self {
        Self {
            x: INVALID_XY,
            y: INVALID_XY,
            brightness: INVALID_BRIGHTNESS,
        }
    }
}

/// A fully assembled scan line.
///
/// Slots that received no data keep the sentinel values; `data_valid_xy` and
/// `data_valid_brightness` count the filled slots. `packets_received` less
/// than `packets_expected` marks a profile that lost datagrams in transit.
#[derive(Clone, Debug)]
pub struct Profile {
    pub scan_head_id: u32,
    pub camera: Camera,
    pub laser: Laser,
    pub timestamp_ns: u64,
    pub flags: u32,
    pub sequence_number: u32,
    pub encoder_values: [i64; ENCODERS_MAX],
    pub num_encoder_values: u32,
    pub laser_on_time_us: u32,
    pub format: DataFormat,
    pub packets_received: u32,
    pub packets_expected: u32,
    pub data_valid_brightness: u32,
    pub data_valid_xy: u32,
    pub data: Box<[ProfilePoint; PROFILE_SLOTS]>,
}

impl Profile {
    /// True when every expected datagram arrived.
    pub fn is_complete(&self) -> bool {
        self.packets_received == self.packets_expected
    }

    /// Iterates over the slots that carry measured points, skipping
    /// sentinels, with their column indices.
    pub fn points(&self) -> impl Iterator<Item = (usize, &ProfilePoint)> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, point)| point.is_valid())
    }
}

/// Incremental assembly of one profile from its datagrams.
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    profile: Option<Profile>,
}

/// Metadata needed to start a new profile; taken from the first datagram of
/// the profile plus head-side context.
#[derive(Clone, Copy, Debug)]
pub struct ProfileSeed {
    pub scan_head_id: u32,
    pub camera: Camera,
    pub laser: Laser,
    pub timestamp_ns: u64,
    pub flags: u32,
    pub sequence_number: u32,
    pub laser_on_time_us: u32,
    pub format: DataFormat,
    pub packets_expected: u32,
}

impl ProfileBuilder {
    /// An empty builder with no profile in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new profile, pre-filling every slot with sentinels.
    pub fn start(&mut self, seed: ProfileSeed, encoders: &[i64]) {
        let mut encoder_values = [0i64; ENCODERS_MAX];
        let num = encoders.len().min(ENCODERS_MAX);
        encoder_values[..num].copy_from_slice(&encoders[..num]);

        self.profile = Some(Profile {
            scan_head_id: seed.scan_head_id,
            camera: seed.camera,
            laser: seed.laser,
            timestamp_ns: seed.timestamp_ns,
            flags: seed.flags,
            sequence_number: seed.sequence_number,
            encoder_values,
            num_encoder_values: num as u32,
            laser_on_time_us: seed.laser_on_time_us,
            format: seed.format,
            packets_received: 0,
            packets_expected: seed.packets_expected,
            data_valid_brightness: 0,
            data_valid_xy: 0,
            data: Box::new([ProfilePoint::default(); PROFILE_SLOTS]),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
    }

    /// Expected datagram count of the profile in progress.
    pub fn packets_expected(&self) -> u32 {
        self.profile.as_ref().map_or(0, |p| p.packets_expected)
    }

    /// Inserts an x/y sample.
    #[inline]
    pub fn insert_point(&mut self, idx: usize, x: i32, y: i32) {
        if let Some(profile) = self.profile.as_mut() {
            if idx < PROFILE_SLOTS {
                profile.data[idx].x = x;
                profile.data[idx].y = y;
                profile.data_valid_xy += 1;
            }
        }
    }

    /// Inserts an x/y sample with its brightness.
    #[inline]
    pub fn insert_point_and_brightness(&mut self, idx: usize, x: i32, y: i32, brightness: u8) {
        if let Some(profile) = self.profile.as_mut() {
            if idx < PROFILE_SLOTS {
                profile.data[idx].x = x;
                profile.data[idx].y = y;
                profile.data[idx].brightness = brightness as i32;
                profile.data_valid_xy += 1;
                profile.data_valid_brightness += 1;
            }
        }
    }

    /// Counts one received datagram; returns the new count.
    pub fn mark_packet_received(&mut self) -> u32 {
        match self.profile.as_mut() {
            Some(profile) => {
                profile.packets_received += 1;
                profile.packets_received
            }
            None => 0,
        }
    }

    /// Finishes the profile and returns it, leaving the builder empty.
    pub fn take(&mut self) -> Option<Profile> {
        self.profile.take()
    }
}

/// Bounded FIFO of assembled profiles, single writer, multiple readers.
///
/// Capacity is fixed; a push into a full ring drops the oldest profile,
/// never the newest.
#[derive(Debug)]
pub struct ProfileRing {
    queue: Mutex<VecDeque<Profile>>,
    available: Condvar,
    capacity: usize,
}

impl ProfileRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a profile, dropping the oldest if the ring is full, and wakes
    /// any waiters.
    pub fn push(&self, profile: Profile) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(profile);
        drop(queue);
        self.available.notify_all();
    }

    /// Number of profiles currently buffered.
    pub fn available(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Blocks until at least `count` profiles are buffered or the timeout
    /// elapses; returns the buffered count either way.
    pub fn wait_until_available(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();

        while queue.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, result) = self
                .available
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
            if result.timed_out() {
                break;
            }
        }

        queue.len()
    }

    /// Removes and returns up to `max` profiles, oldest first.
    pub fn take(&self, max: usize) -> Vec<Profile> {
        let mut queue = self.queue.lock().unwrap();
        let n = queue.len().min(max);
        queue.drain(..n).collect()
    }

    /// Empties the ring.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }
}

impl Default for ProfileRing {
    fn default() -> Self {
        Self::new(PROFILE_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seed(timestamp_ns: u64) -> ProfileSeed {
        ProfileSeed {
            scan_head_id: 1,
            camera: Camera::A,
            laser: Laser::L1,
            timestamp_ns,
            flags: 0,
            sequence_number: 1,
            laser_on_time_us: 500,
            format: DataFormat::XyBrightnessFull,
            packets_expected: 4,
        }
    }

    fn build(timestamp_ns: u64, received: u32) -> Profile {
        let mut builder = ProfileBuilder::new();
        builder.start(seed(timestamp_ns), &[]);
        for _ in 0..received {
            builder.mark_packet_received();
        }
        builder.take().unwrap()
    }

    #[test]
    fn test_builder_sentinels() {
        let mut builder = ProfileBuilder::new();
        builder.start(seed(100), &[11, -22]);
        let profile = builder.take().unwrap();

        assert_eq!(profile.data.len(), PROFILE_SLOTS);
        for point in profile.data.iter() {
            assert_eq!(point.x, INVALID_XY);
            assert_eq!(point.y, INVALID_XY);
            assert_eq!(point.brightness, INVALID_BRIGHTNESS);
        }
        assert_eq!(profile.data_valid_xy, 0);
        assert_eq!(profile.data_valid_brightness, 0);
        assert_eq!(profile.num_encoder_values, 2);
        assert_eq!(&profile.encoder_values[..2], &[11, -22]);
    }

    #[test]
    fn test_points_skips_sentinels() {
        let mut builder = ProfileBuilder::new();
        builder.start(seed(100), &[]);
        builder.insert_point(10, 1, 2);
        builder.insert_point(20, 3, 4);
        let profile = builder.take().unwrap();

        let points: Vec<(usize, ProfilePoint)> =
            profile.points().map(|(idx, p)| (idx, *p)).collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].0, 10);
        assert_eq!(points[0].1.x, 1);
        assert_eq!(points[1].0, 20);
        assert_eq!(points[1].1.y, 4);
        assert!(!profile.data[0].is_valid());
        assert!(profile.data[10].is_valid());
    }

    #[test]
    fn test_builder_counts_inserts() {
        let mut builder = ProfileBuilder::new();
        builder.start(seed(100), &[]);
        builder.insert_point(0, 10, 20);
        builder.insert_point_and_brightness(1, 30, 40, 200);
        // Out of range slot is ignored.
        builder.insert_point(PROFILE_SLOTS, 1, 1);

        let profile = builder.take().unwrap();
        assert_eq!(profile.data_valid_xy, 2);
        assert_eq!(profile.data_valid_brightness, 1);
        assert_eq!(profile.data[0].x, 10);
        assert_eq!(profile.data[1].brightness, 200);
    }

    #[test]
    fn test_builder_packet_accounting() {
        let mut builder = ProfileBuilder::new();
        assert!(builder.is_empty());
        assert_eq!(builder.mark_packet_received(), 0);

        builder.start(seed(100), &[]);
        assert!(!builder.is_empty());
        assert_eq!(builder.packets_expected(), 4);
        assert_eq!(builder.mark_packet_received(), 1);
        assert_eq!(builder.mark_packet_received(), 2);

        let profile = builder.take().unwrap();
        assert_eq!(profile.packets_received, 2);
        assert_eq!(profile.packets_expected, 4);
        assert!(!profile.is_complete());
        assert!(builder.is_empty());
    }

    #[test]
    fn test_ring_fifo_order() {
        let ring = ProfileRing::new(10);
        for ts in 0..5 {
            ring.push(build(ts, 4));
        }
        assert_eq!(ring.available(), 5);

        let taken = ring.take(3);
        assert_eq!(taken.len(), 3);
        assert_eq!(taken[0].timestamp_ns, 0);
        assert_eq!(taken[2].timestamp_ns, 2);
        assert_eq!(ring.available(), 2);

        let rest = ring.take(100);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].timestamp_ns, 3);
    }

    #[test]
    fn test_ring_overflow_drops_oldest() {
        let ring = ProfileRing::new(3);
        for ts in 0..5 {
            ring.push(build(ts, 4));
        }
        assert_eq!(ring.available(), 3);

        let taken = ring.take(3);
        let timestamps: Vec<u64> = taken.iter().map(|p| p.timestamp_ns).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let ring = ProfileRing::new(PROFILE_RING_CAPACITY);
        for ts in 0..(PROFILE_RING_CAPACITY as u64 + 100) {
            ring.push(build(ts, 4));
            assert!(ring.available() <= PROFILE_RING_CAPACITY);
        }
        assert_eq!(ring.available(), PROFILE_RING_CAPACITY);
    }

    #[test]
    fn test_ring_clear() {
        let ring = ProfileRing::new(10);
        ring.push(build(1, 4));
        ring.push(build(2, 4));
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert!(ring.take(10).is_empty());
    }

    #[test]
    fn test_wait_times_out() {
        let ring = ProfileRing::new(10);
        ring.push(build(1, 4));
        let n = ring.wait_until_available(2, Duration::from_millis(20));
        assert_eq!(n, 1);
    }

    #[test]
    fn test_wait_satisfied_immediately() {
        let ring = ProfileRing::new(10);
        ring.push(build(1, 4));
        ring.push(build(2, 4));
        let n = ring.wait_until_available(2, Duration::from_secs(5));
        assert_eq!(n, 2);
    }

    #[test]
    fn test_wait_wakes_on_push() {
        let ring = Arc::new(ProfileRing::new(10));
        let writer = Arc::clone(&ring);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            writer.push(build(7, 4));
        });

        let n = ring.wait_until_available(1, Duration::from_secs(5));
        assert_eq!(n, 1);
        handle.join().unwrap();
        assert_eq!(ring.take(1)[0].timestamp_ns, 7);
    }
}
