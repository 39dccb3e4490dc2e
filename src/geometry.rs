// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Scanfleet Developers. All Rights Reserved.

//! Camera / mill coordinate conversion and scan window constraints.
//!
//! Scan heads report profile points in their own sensor frame ("camera
//! coordinates"); hosts reason in a common world frame ("mill coordinates").
//! The [`Alignment`] transform between the two is a roll about Z, an X/Y
//! shift, a units scale, and an optional 180 degree yaw about Y selected by
//! the cable orientation.
//!
//! All integer coordinates in this module are expressed in 1/1000 of the
//! scan system units, matching the fixed-point representation used on the
//! wire and in assembled profiles.

use crate::error::{Error, Result};
use crate::types::CableOrientation;

/// A two dimensional point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point2D {
    pub x: i32,
    pub y: i32,
}

impl Point2D {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Coordinate transform between camera space and mill space for one
/// `(camera, laser)` pair.
///
/// Camera to mill: `x' = x*m_xx - y*m_xy + Sx`, `y' = x*m_yx + y*m_yy + Sy`
/// where `Sx`/`Sy` are the shifts scaled to 1/1000 units. Mill to camera is
/// the exact inverse and is used to translate user supplied window
/// constraints back into camera coordinates before sending them to the head.
#[derive(Clone, Copy, Debug)]
pub struct Alignment {
    cable: CableOrientation,
    roll_degrees: f64,
    shift_x: f64,
    shift_y: f64,
    scale: f64,
    shift_x_1000: f64,
    shift_y_1000: f64,
    camera_to_mill_xx: f64,
    camera_to_mill_xy: f64,
    camera_to_mill_yx: f64,
    camera_to_mill_yy: f64,
    mill_to_camera_xx: f64,
    mill_to_camera_xy: f64,
    mill_to_camera_yx: f64,
    mill_to_camera_yy: f64,
}

impl Alignment {
    /// Builds a transform.
    ///
    /// `scale` converts camera units to scan system units (1.0 for inches,
    /// 25.4 for millimetres); `shift_x`/`shift_y` are in scan system units.
    pub fn new(
        scale: f64,
        roll_degrees: f64,
        shift_x: f64,
        shift_y: f64,
        cable: CableOrientation,
    ) -> Self {
        let mut alignment = Self {
            cable,
            roll_degrees,
            shift_x,
            shift_y,
            scale,
            shift_x_1000: shift_x * 1000.0,
            shift_y_1000: shift_y * 1000.0,
            camera_to_mill_xx: 0.0,
            camera_to_mill_xy: 0.0,
            camera_to_mill_yx: 0.0,
            camera_to_mill_yy: 0.0,
            mill_to_camera_xx: 0.0,
            mill_to_camera_xy: 0.0,
            mill_to_camera_yx: 0.0,
            mill_to_camera_yy: 0.0,
        };
        alignment.calculate_transform();
        alignment
    }

    /// Identity transform at the given units scale.
    pub fn with_scale(scale: f64) -> Self {
        Self::new(scale, 0.0, 0.0, 0.0, CableOrientation::Upstream)
    }

    pub fn roll_degrees(&self) -> f64 {
        self.roll_degrees
    }

    pub fn shift_x(&self) -> f64 {
        self.shift_x
    }

    pub fn shift_y(&self) -> f64 {
        self.shift_y
    }

    pub fn cable_orientation(&self) -> CableOrientation {
        self.cable
    }

    /// Changes the cable orientation, recomputing the transform.
    pub fn set_cable_orientation(&mut self, cable: CableOrientation) {
        self.cable = cable;
        self.calculate_transform();
    }

    fn calculate_transform(&mut self) {
        let rho = std::f64::consts::PI / 180.0;
        // Downstream cable turns the head 180 degrees about Y, placing
        // positive X at former negative X.
        let yaw = match self.cable {
            CableOrientation::Downstream => 180.0,
            CableOrientation::Upstream => 0.0,
        };
        let sin_roll = (self.roll_degrees * rho).sin();
        let cos_roll = (self.roll_degrees * rho).cos();
        let cos_yaw = (yaw * rho).cos();
        let sin_neg_roll = (-self.roll_degrees * rho).sin();
        let cos_neg_roll = (-self.roll_degrees * rho).cos();

        self.camera_to_mill_xx = cos_yaw * cos_roll * self.scale;
        self.camera_to_mill_xy = sin_roll * self.scale;
        self.camera_to_mill_yx = cos_yaw * sin_roll * self.scale;
        self.camera_to_mill_yy = cos_roll * self.scale;
        self.mill_to_camera_xx = cos_yaw * cos_neg_roll / self.scale;
        self.mill_to_camera_xy = cos_yaw * sin_neg_roll / self.scale;
        self.mill_to_camera_yx = sin_neg_roll / self.scale;
        self.mill_to_camera_yy = cos_neg_roll / self.scale;
    }

    /// Converts a camera space point to mill space.
    #[inline]
    pub fn camera_to_mill(&self, x: i32, y: i32) -> Point2D {
        let xd = x as f64;
        let yd = y as f64;

        let xm = (xd * self.camera_to_mill_xx) - (yd * self.camera_to_mill_xy)
            + self.shift_x_1000;
        let ym = (xd * self.camera_to_mill_yx) + (yd * self.camera_to_mill_yy)
            + self.shift_y_1000;

        Point2D::new(xm as i32, ym as i32)
    }

    /// Converts a mill space point to camera space.
    #[inline]
    pub fn mill_to_camera(&self, x: i32, y: i32) -> Point2D {
        let xd = x as f64 - self.shift_x_1000;
        let yd = y as f64 - self.shift_y_1000;

        let xc = (xd * self.mill_to_camera_xx) - (yd * self.mill_to_camera_xy);
        let yc = (xd * self.mill_to_camera_yx) + (yd * self.mill_to_camera_yy);

        Point2D::new(xc as i32, yc as i32)
    }
}

/// One linear boundary of a scan window, two points in mill coordinates
/// expressed in 1/1000 units. The window interior lies on a consistent side
/// of every constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowConstraint {
    pub p0: Point2D,
    pub p1: Point2D,
}

impl WindowConstraint {
    pub fn new(p0: Point2D, p1: Point2D) -> Self {
        Self { p0, p1 }
    }
}

/// Region outside of which a scan head suppresses measurements.
///
/// Constraints are ordered; the rectangle shorthand expands to four
/// constraints in top, bottom, left, right order with the interior kept to
/// the same side of each edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanWindow {
    constraints: Vec<WindowConstraint>,
}

impl ScanWindow {
    /// An unconstrained window.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Builds a rectangular window from extents in scan system units.
    ///
    /// Rejects rectangles where `top <= bottom` or `right <= left`.
    pub fn rectangular(top: f64, bottom: f64, left: f64, right: f64) -> Result<Self> {
        if top <= bottom || right <= left {
            return Err(Error::InvalidArgument);
        }

        let t = (top * 1000.0) as i32;
        let b = (bottom * 1000.0) as i32;
        let l = (left * 1000.0) as i32;
        let r = (right * 1000.0) as i32;

        Ok(Self {
            constraints: vec![
                WindowConstraint::new(Point2D::new(l, t), Point2D::new(r, t)),
                WindowConstraint::new(Point2D::new(r, b), Point2D::new(l, b)),
                WindowConstraint::new(Point2D::new(l, b), Point2D::new(l, t)),
                WindowConstraint::new(Point2D::new(r, t), Point2D::new(r, b)),
            ],
        })
    }

    /// Builds a window from explicit constraints given in scan system units.
    pub fn from_constraints(points: &[((f64, f64), (f64, f64))]) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let constraints = points
            .iter()
            .map(|&((x0, y0), (x1, y1))| {
                WindowConstraint::new(
                    Point2D::new((x0 * 1000.0) as i32, (y0 * 1000.0) as i32),
                    Point2D::new((x1 * 1000.0) as i32, (y1 * 1000.0) as i32),
                )
            })
            .collect();

        Ok(Self { constraints })
    }

    /// Constraints in order, in 1/1000 unit mill coordinates.
    pub fn constraints(&self) -> &[WindowConstraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let a = Alignment::with_scale(1.0);
        let p = a.camera_to_mill(1234, -5678);
        assert_eq!(p, Point2D::new(1234, -5678));
        let q = a.mill_to_camera(1234, -5678);
        assert_eq!(q, Point2D::new(1234, -5678));
    }

    #[test]
    fn test_shift_applied_in_thousandths() {
        let a = Alignment::new(1.0, 0.0, 2.0, -3.0, CableOrientation::Upstream);
        let p = a.camera_to_mill(100, 100);
        assert_eq!(p, Point2D::new(2100, -2900));
        let q = a.mill_to_camera(2100, -2900);
        assert_eq!(q, Point2D::new(100, 100));
    }

    #[test]
    fn test_downstream_yaw_negates_x() {
        let a = Alignment::new(1.0, 0.0, 0.0, 0.0, CableOrientation::Downstream);
        let p = a.camera_to_mill(1000, 500);
        assert_eq!(p, Point2D::new(-1000, 500));
        let q = a.mill_to_camera(-1000, 500);
        assert_eq!(q, Point2D::new(1000, 500));
    }

    #[test]
    fn test_millimetre_scale() {
        // Truncation may land one unit under the exact product.
        let a = Alignment::with_scale(25.4);
        let p = a.camera_to_mill(100, 100);
        assert!((p.x - 2540).abs() <= 1, "x = {}", p.x);
        assert!((p.y - 2540).abs() <= 1, "y = {}", p.y);
    }

    fn assert_round_trip(a: &Alignment, x: i32, y: i32) {
        let m = a.camera_to_mill(x, y);
        let c = a.mill_to_camera(m.x, m.y);
        assert!(
            (c.x - x).abs() <= 1 && (c.y - y).abs() <= 1,
            "round trip drift for ({}, {}): got ({}, {})",
            x,
            y,
            c.x,
            c.y
        );
    }

    #[test]
    fn test_round_trip_within_one_unit() {
        let cases = [
            Alignment::new(1.0, 0.0, 0.0, 0.0, CableOrientation::Upstream),
            Alignment::new(1.0, 12.5, 3.25, -7.75, CableOrientation::Upstream),
            Alignment::new(1.0, -45.0, 0.125, 0.5, CableOrientation::Downstream),
            Alignment::new(25.4, 30.0, -2.0, 4.0, CableOrientation::Downstream),
        ];
        for a in &cases {
            for &(x, y) in &[
                (0, 0),
                (1456, 1088),
                (-30000, 30000),
                (12345, -9876),
                (-1, 1),
            ] {
                assert_round_trip(a, x, y);
            }
        }
    }

    #[test]
    fn test_cable_change_recomputes() {
        let mut a = Alignment::with_scale(1.0);
        assert_eq!(a.camera_to_mill(100, 0).x, 100);
        a.set_cable_orientation(CableOrientation::Downstream);
        assert_eq!(a.camera_to_mill(100, 0).x, -100);
        assert_eq!(a.cable_orientation(), CableOrientation::Downstream);
    }

    #[test]
    fn test_rectangle_expansion() {
        let w = ScanWindow::rectangular(30.0, -30.0, -30.0, 30.0).unwrap();
        let c = w.constraints();
        assert_eq!(c.len(), 4);
        // top, bottom, left, right
        assert_eq!(c[0].p0, Point2D::new(-30000, 30000));
        assert_eq!(c[0].p1, Point2D::new(30000, 30000));
        assert_eq!(c[1].p0, Point2D::new(30000, -30000));
        assert_eq!(c[1].p1, Point2D::new(-30000, -30000));
        assert_eq!(c[2].p0, Point2D::new(-30000, -30000));
        assert_eq!(c[2].p1, Point2D::new(-30000, 30000));
        assert_eq!(c[3].p0, Point2D::new(30000, 30000));
        assert_eq!(c[3].p1, Point2D::new(30000, -30000));
    }

    #[test]
    fn test_degenerate_rectangle_rejected() {
        assert_eq!(
            ScanWindow::rectangular(-30.0, 30.0, -30.0, 30.0).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(
            ScanWindow::rectangular(30.0, -30.0, 30.0, -30.0).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(
            ScanWindow::rectangular(10.0, 10.0, -5.0, 5.0).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn test_empty_constraint_list_rejected() {
        assert_eq!(
            ScanWindow::from_constraints(&[]).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn test_window_constraint_round_trip() {
        // Rectangle corners survive mill -> camera -> mill within one unit.
        let a = Alignment::new(1.0, 0.0, 0.0, 0.0, CableOrientation::Upstream);
        let w = ScanWindow::rectangular(30.0, -30.0, -30.0, 30.0).unwrap();
        for c in w.constraints() {
            for p in [c.p0, c.p1] {
                let cam = a.mill_to_camera(p.x, p.y);
                let mill = a.camera_to_mill(cam.x, cam.y);
                assert!((mill.x - p.x).abs() <= 1);
                assert!((mill.y - p.y).abs() <= 1);
            }
        }
    }
}
