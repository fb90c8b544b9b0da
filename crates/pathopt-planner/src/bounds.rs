//! Drivable-area corridor bounds
//!
//! For each reference point a lateral ray is cast along the heading normal
//! and intersected with the left and right boundary polylines. The signed
//! intersection distances, shrunk by the vehicle half-width, become the
//! box constraints on the lateral error in the QP.
//!
//! When the shrunk interval is empty (ego outside the drivable area, or the
//! corridor narrower than the vehicle) it is widened minimally so that zero
//! stays inside, and a soft-violation flag tells the optimizer to lean on
//! the slack penalty instead of going infeasible.

use log::warn;
use serde::{Deserialize, Serialize};

use pathopt_core::geometry::{Point, Pose};

use crate::reference::ReferencePoint;

/// Lateral interval around a reference point [m]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl Bounds {
    pub fn new(lower_bound: f64, upper_bound: f64) -> Self {
        Self { lower_bound, upper_bound }
    }

    pub fn width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower_bound <= value && value <= self.upper_bound
    }
}

/// Per-point corridor bounds plus the aggregated soft-violation flag
#[derive(Debug, Clone)]
pub struct CorridorBounds {
    pub bounds: Vec<Bounds>,
    /// True when at least one interval had to be widened to stay non-empty
    pub soft_violation: bool,
}

/// Project the corridor polylines onto each reference point's lateral axis.
///
/// `half_width` is the lateral clearance to keep from each edge, normally
/// `vehicle_width / 2` plus the configured soft clearance.
pub fn calculate_bounds(
    ref_points: &[ReferencePoint],
    left_bound: &[Point],
    right_bound: &[Point],
    half_width: f64,
) -> CorridorBounds {
    let mut bounds = Vec::with_capacity(ref_points.len());
    let mut soft_violation = false;

    for p in ref_points {
        let dist_left = lateral_distance_to_boundary(&p.pose, left_bound);
        let dist_right = lateral_distance_to_boundary(&p.pose, right_bound);

        let mut upper = dist_left - half_width;
        let mut lower = dist_right + half_width;

        if lower > upper {
            // Keep zero inside so the QP stays feasible with slack
            lower = lower.min(0.0);
            upper = upper.max(0.0);
            soft_violation = true;
        }
        bounds.push(Bounds::new(lower, upper));
    }

    if soft_violation {
        warn!("drivable-area corridor is infeasible; bounds widened for soft handling");
    }

    CorridorBounds { bounds, soft_violation }
}

/// Signed distance along the pose's heading normal to the boundary polyline.
///
/// Positive means the boundary lies to the left of the heading. Falls back
/// to the lateral offset of the nearest boundary vertex when the normal ray
/// misses every segment (short or strongly curved boundaries).
fn lateral_distance_to_boundary(pose: &Pose, boundary: &[Point]) -> f64 {
    let yaw = pose.yaw();
    let (nx, ny) = (-yaw.sin(), yaw.cos());
    let (px, py) = (pose.position.x, pose.position.y);

    let mut nearest: Option<f64> = None;
    for w in boundary.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let ex = b.x - a.x;
        let ey = b.y - a.y;
        // Solve p + t*n = a + u*e for (t, u)
        let det = ex * ny - ey * nx;
        if det.abs() < 1e-12 {
            continue;
        }
        let dx = a.x - px;
        let dy = a.y - py;
        let t = (ex * dy - ey * dx) / det;
        let u = (nx * dy - ny * dx) / det;
        if (0.0..=1.0).contains(&u) && nearest.map_or(true, |best: f64| t.abs() < best.abs()) {
            nearest = Some(t);
        }
    }

    nearest.unwrap_or_else(|| {
        boundary
            .iter()
            .min_by(|a, b| {
                let da = pose.position.distance_2d(a);
                let db = pose.position.distance_2d(b);
                da.partial_cmp(&db).unwrap()
            })
            .map(|p| pose.lateral_offset(p))
            .unwrap_or(0.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferencePoint;
    use approx::assert_relative_eq;
    use pathopt_core::geometry::Pose;

    fn straight_ref_point(x: f64) -> ReferencePoint {
        ReferencePoint {
            pose: Pose::from_xy_yaw(x, 0.0, 0.0),
            ..Default::default()
        }
    }

    fn polyline(y: f64) -> Vec<Point> {
        (0..=50).map(|i| Point::new(i as f64, y, 0.0)).collect()
    }

    #[test]
    fn test_straight_corridor_bounds() {
        let refs: Vec<_> = (0..10).map(|i| straight_ref_point(i as f64)).collect();
        let result = calculate_bounds(&refs, &polyline(2.0), &polyline(-2.0), 0.96);

        assert!(!result.soft_violation);
        for b in &result.bounds {
            assert_relative_eq!(b.upper_bound, 2.0 - 0.96, epsilon = 1e-9);
            assert_relative_eq!(b.lower_bound, -2.0 + 0.96, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_asymmetric_corridor() {
        let refs = vec![straight_ref_point(5.0)];
        let result = calculate_bounds(&refs, &polyline(3.0), &polyline(-1.0), 0.5);

        assert_relative_eq!(result.bounds[0].upper_bound, 2.5, epsilon = 1e-9);
        assert_relative_eq!(result.bounds[0].lower_bound, -0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_narrow_corridor_sets_soft_flag() {
        // Corridor of +-0.1 m with half-width 0.96: the interval is empty
        // and must be widened to contain zero.
        let refs = vec![straight_ref_point(5.0)];
        let result = calculate_bounds(&refs, &polyline(0.1), &polyline(-0.1), 0.96);

        assert!(result.soft_violation);
        let b = &result.bounds[0];
        assert!(b.lower_bound <= 0.0 && 0.0 <= b.upper_bound);
    }

    #[test]
    fn test_reference_point_outside_corridor() {
        // Reference point above the left boundary: the interval stays
        // non-empty but sits entirely on the negative side, steering the
        // plan back inside. No widening is needed.
        let refs = vec![ReferencePoint {
            pose: Pose::from_xy_yaw(5.0, 3.0, 0.0),
            ..Default::default()
        }];
        let result = calculate_bounds(&refs, &polyline(2.0), &polyline(-2.0), 0.5);

        assert!(!result.soft_violation);
        let b = &result.bounds[0];
        assert!(b.upper_bound < 0.0 && b.lower_bound < b.upper_bound);
        assert_relative_eq!(b.upper_bound, -1.5, epsilon = 1e-9);
        assert_relative_eq!(b.lower_bound, -4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_wrong_side_interval_is_widened() {
        // Boundaries swapped: the raw interval is inverted, so it is
        // widened minimally to include zero and flagged.
        let refs = vec![straight_ref_point(5.0)];
        let result = calculate_bounds(&refs, &polyline(-2.0), &polyline(2.0), 0.5);

        assert!(result.soft_violation);
        assert!(result.bounds[0].contains(0.0));
    }
}
