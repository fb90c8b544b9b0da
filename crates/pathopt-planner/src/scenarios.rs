//! Canonical corridor scenarios
//!
//! Ready-made path/corridor/ego combinations used by the unit and
//! integration tests: a straight corridor, a constant-curvature arc, an
//! s-curve, an off-center start and an infeasibly narrow corridor.

use pathopt_core::geometry::{Point, Pose};
use pathopt_core::types::PathPoint;

/// One optimizer invocation's worth of inputs
#[derive(Debug, Clone)]
pub struct Scenario {
    pub path_points: Vec<PathPoint>,
    pub left_bound: Vec<Point>,
    pub right_bound: Vec<Point>,
    pub ego_pose: Pose,
    pub ego_velocity: f64,
}

fn path_point(x: f64, y: f64, yaw: f64, v: f64) -> PathPoint {
    PathPoint {
        pose: Pose::from_xy_yaw(x, y, yaw),
        longitudinal_velocity_mps: v,
        ..Default::default()
    }
}

/// 50 m straight path on y = 0 with a +-2 m corridor, ego at the start.
pub fn straight_corridor() -> Scenario {
    let path_points: Vec<PathPoint> =
        (0..50).map(|i| path_point(i as f64, 0.0, 0.0, 5.0)).collect();
    Scenario {
        left_bound: (0..=50).map(|i| Point::new(i as f64, 2.0, 0.0)).collect(),
        right_bound: (0..=50).map(|i| Point::new(i as f64, -2.0, 0.0)).collect(),
        ego_pose: Pose::from_xy_yaw(0.0, 0.0, 0.0),
        ego_velocity: 5.0,
        path_points,
    }
}

/// 60 degree left-curving arc of radius 20 m with +-1.5 m corridor offsets.
pub fn constant_curvature_arc() -> Scenario {
    let radius = 20.0;
    let arc = 60.0_f64.to_radians();
    let n = 60;

    // Arc center at (0, radius); theta is the swept angle from the start
    let on_circle = |r: f64, theta: f64| Point::new(r * theta.sin(), radius - r * theta.cos(), 0.0);

    let mut path_points = Vec::with_capacity(n);
    let mut left_bound = Vec::with_capacity(n);
    let mut right_bound = Vec::with_capacity(n);
    for i in 0..n {
        let theta = arc * i as f64 / (n - 1) as f64;
        let p = on_circle(radius, theta);
        path_points.push(path_point(p.x, p.y, theta, 5.0));
        // Curving left: the inner (smaller radius) edge is on the left
        left_bound.push(on_circle(radius - 1.5, theta));
        right_bound.push(on_circle(radius + 1.5, theta));
    }

    Scenario {
        path_points,
        left_bound,
        right_bound,
        ego_pose: Pose::from_xy_yaw(0.0, 0.0, 0.0),
        ego_velocity: 5.0,
    }
}

/// Sinusoidal path y = 0.5 sin(x / 5) for x in [0, 30].
pub fn s_curve() -> Scenario {
    let n = 61;
    let mut path_points = Vec::with_capacity(n);
    let mut left_bound = Vec::with_capacity(n);
    let mut right_bound = Vec::with_capacity(n);
    for i in 0..n {
        let x = 30.0 * i as f64 / (n - 1) as f64;
        let y = 0.5 * (x / 5.0).sin();
        let yaw = (0.1 * (x / 5.0).cos()).atan();
        path_points.push(path_point(x, y, yaw, 4.0));
        left_bound.push(Point::new(x, y + 2.0, 0.0));
        right_bound.push(Point::new(x, y - 2.0, 0.0));
    }
    Scenario {
        path_points,
        left_bound,
        right_bound,
        ego_pose: Pose::from_xy_yaw(0.0, 0.0, 0.0),
        ego_velocity: 4.0,
    }
}

/// Straight corridor with the ego displaced 0.8 m laterally and yawed 0.2 rad.
pub fn off_center_ego() -> Scenario {
    Scenario {
        ego_pose: Pose::from_xy_yaw(0.0, 0.8, 0.2),
        ..straight_corridor()
    }
}

/// Corridor of +-0.1 m, far narrower than the vehicle.
pub fn narrow_corridor() -> Scenario {
    let base = straight_corridor();
    Scenario {
        left_bound: base
            .left_bound
            .iter()
            .map(|p| Point::new(p.x, 0.1, 0.0))
            .collect(),
        right_bound: base
            .right_bound
            .iter()
            .map(|p| Point::new(p.x, -0.1, 0.0))
            .collect(),
        ..base
    }
}
