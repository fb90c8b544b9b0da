//! Basic geometric value types and 2D helpers
//!
//! Poses are exchanged with quaternion orientations, but the optimizer works
//! in planar yaw. The conversion helpers here are the only place where the
//! two representations meet.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// 3D position [m]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the xy plane
    pub fn distance_2d(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Orientation as a unit quaternion (x, y, z, w)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quaternion {
    /// Quaternion for a rotation of `yaw` radians about the z axis
    pub fn from_yaw(yaw: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: (yaw / 2.0).sin(),
            w: (yaw / 2.0).cos(),
        }
    }

    /// Yaw angle of the quaternion's rotation, projected onto the xy plane
    pub fn yaw(&self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }
}

/// Rigid body pose: position plus orientation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    /// Planar pose constructor (z = 0)
    pub fn from_xy_yaw(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            position: Point::new(x, y, 0.0),
            orientation: Quaternion::from_yaw(yaw),
        }
    }

    pub fn yaw(&self) -> f64 {
        self.orientation.yaw()
    }

    /// Signed lateral offset of `point` in this pose's frame.
    ///
    /// Positive is to the left of the heading.
    pub fn lateral_offset(&self, point: &Point) -> f64 {
        let yaw = self.yaw();
        let dx = point.x - self.position.x;
        let dy = point.y - self.position.y;
        -yaw.sin() * dx + yaw.cos() * dy
    }

    /// Signed longitudinal offset of `point` along this pose's heading.
    pub fn longitudinal_offset(&self, point: &Point) -> f64 {
        let yaw = self.yaw();
        let dx = point.x - self.position.x;
        let dy = point.y - self.position.y;
        yaw.cos() * dx + yaw.sin() * dy
    }
}

/// Normalize an angle into (-pi, pi]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Cumulative arc lengths along a polyline, starting at 0
pub fn arc_lengths(points: &[Point]) -> Vec<f64> {
    let mut s = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    s.push(0.0);
    for w in points.windows(2) {
        acc += w[0].distance_2d(&w[1]);
        s.push(acc);
    }
    s
}

/// Signed lateral distance from `point` to the polyline, measured at the
/// nearest segment. Positive when the point lies left of the polyline's
/// local direction of travel.
pub fn signed_lateral_distance_to_polyline(point: &Point, polyline: &[Point]) -> Option<f64> {
    if polyline.len() < 2 {
        return None;
    }

    let mut best: Option<(f64, f64)> = None; // (squared distance, signed lateral)
    for w in polyline.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let ex = b.x - a.x;
        let ey = b.y - a.y;
        let len_sq = ex * ex + ey * ey;
        if len_sq < 1e-12 {
            continue;
        }
        let t = (((point.x - a.x) * ex + (point.y - a.y) * ey) / len_sq).clamp(0.0, 1.0);
        let px = a.x + t * ex;
        let py = a.y + t * ey;
        let dx = point.x - px;
        let dy = point.y - py;
        let dist_sq = dx * dx + dy * dy;
        // Cross product of segment direction and offset gives the side
        let cross = ex * dy - ey * dx;
        let signed = cross.signum() * dist_sq.sqrt();
        if best.map_or(true, |(d, _)| dist_sq < d) {
            best = Some((dist_sq, signed));
        }
    }
    best.map(|(_, signed)| signed)
}
