//! Path and trajectory point types
//!
//! `PathPoint` is what the upstream planner hands in; `TrajectoryPoint` is
//! what the optimizer emits, with the extra control-facing fields filled in.

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;

/// A sample on the input reference path
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PathPoint {
    pub pose: Pose,
    pub longitudinal_velocity_mps: f64,
    pub lateral_velocity_mps: f64,
    pub heading_rate_rps: f64,
}

/// A sample on the optimized output trajectory
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub pose: Pose,
    pub longitudinal_velocity_mps: f64,
    pub lateral_velocity_mps: f64,
    pub heading_rate_rps: f64,
    pub acceleration_mps2: f64,
    pub front_wheel_angle_rad: f64,
    pub rear_wheel_angle_rad: f64,
}

impl From<PathPoint> for TrajectoryPoint {
    fn from(p: PathPoint) -> Self {
        Self {
            pose: p.pose,
            longitudinal_velocity_mps: p.longitudinal_velocity_mps,
            lateral_velocity_mps: p.lateral_velocity_mps,
            heading_rate_rps: p.heading_rate_rps,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;

    #[test]
    fn test_path_to_trajectory_conversion() {
        let p = PathPoint {
            pose: Pose::from_xy_yaw(1.0, 2.0, 0.3),
            longitudinal_velocity_mps: 5.0,
            lateral_velocity_mps: 0.1,
            heading_rate_rps: 0.05,
        };
        let t = TrajectoryPoint::from(p);
        assert_eq!(t.longitudinal_velocity_mps, 5.0);
        assert_eq!(t.front_wheel_angle_rad, 0.0);
        assert_eq!(t.acceleration_mps2, 0.0);
    }
}
