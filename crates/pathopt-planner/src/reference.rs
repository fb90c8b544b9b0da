//! Reference point generation
//!
//! The optimizer's horizon is a uniform arc-length resample of the target
//! path (the previous optimized trajectory when continuing, the input path
//! on a cold start). Each reference point carries the geometry the QP needs:
//! pose, curvature, step length, the optimization-center angle offset and
//! the per-point corridor bounds filled in later by the bounds calculator.

use serde::{Deserialize, Serialize};

use pathopt_core::geometry::{normalize_angle, Pose};
use pathopt_core::spline::{Spline2d, SplineError};
use pathopt_core::types::TrajectoryPoint;

use crate::bounds::Bounds;
use crate::config::{EgoNearestConfig, MptConfig};

/// Lateral and heading deviation from the reference [m, rad]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KinematicState {
    pub lat: f64,
    pub yaw: f64,
}

impl KinematicState {
    pub fn new(lat: f64, yaw: f64) -> Self {
        Self { lat, yaw }
    }
}

/// A densely resampled point along the target path with per-point
/// optimizer state.
#[derive(Debug, Clone, Default)]
pub struct ReferencePoint {
    pub pose: Pose,
    pub longitudinal_velocity_mps: f64,

    pub curvature: f64,
    /// Arc length to the next reference point [m]
    pub delta_arc_length: f64,
    /// Wheel-angle offset of the optimization center ahead of the rear axle
    pub alpha: f64,
    /// Adaptive weight interpolation factor in [0, 1]
    pub normalized_avoidance_cost: f64,
    pub bounds: Bounds,

    /// Pinned state for cross-cycle continuity, if any
    pub fixed_kinematic_state: Option<KinematicState>,
    pub optimized_kinematic_state: KinematicState,
    pub optimized_input: f64,
}

/// Resample the target trajectory into uniform arc-length reference points.
///
/// The horizon starts at the point of `traj_points` nearest the ego (within
/// the matching thresholds) and extends `mpt.num_points` steps of
/// `mpt.delta_arc_length`, truncated where the target ends. Returns an error
/// if fewer than two usable points remain.
pub fn generate_reference_points(
    traj_points: &[TrajectoryPoint],
    ego_pose: &Pose,
    mpt: &MptConfig,
    ego_nearest: &EgoNearestConfig,
) -> Result<Vec<ReferencePoint>, SplineError> {
    let start = find_ego_nearest_index(traj_points, ego_pose, ego_nearest);
    let source = &traj_points[start..];
    if source.len() < 2 {
        return Err(SplineError::TooFewSamples(source.len()));
    }

    let xs: Vec<f64> = source.iter().map(|p| p.pose.position.x).collect();
    let ys: Vec<f64> = source.iter().map(|p| p.pose.position.y).collect();
    let spline = Spline2d::new(&xs, &ys)?;

    let source_s = cumulative_arc_lengths(source);
    let total = spline.total_length();
    let ds = mpt.delta_arc_length;

    let mut ref_points = Vec::with_capacity(mpt.num_points);
    for i in 0..mpt.num_points {
        let s = i as f64 * ds;
        if s > total + 1e-9 {
            break;
        }
        let s = s.min(total);
        let (x, y) = spline.position(s);
        let yaw = spline.yaw(s);
        let curvature = spline.curvature(s);

        ref_points.push(ReferencePoint {
            pose: Pose::from_xy_yaw(x, y, yaw),
            longitudinal_velocity_mps: interpolate_velocity(source, &source_s, s),
            curvature,
            delta_arc_length: ds,
            alpha: (mpt.optimization_center_offset * curvature).atan(),
            normalized_avoidance_cost: 0.0,
            bounds: Bounds::default(),
            fixed_kinematic_state: None,
            optimized_kinematic_state: KinematicState::default(),
            optimized_input: 0.0,
        });
    }

    if ref_points.len() < 2 {
        return Err(SplineError::TooFewSamples(ref_points.len()));
    }
    Ok(ref_points)
}

/// Pin the first reference point's state to the previous optimized
/// trajectory, so consecutive plans join without a lateral step.
pub fn update_fixed_point(ref_points: &mut [ReferencePoint], prev_traj: &[TrajectoryPoint]) {
    let Some(first) = ref_points.first_mut() else {
        return;
    };
    if prev_traj.len() < 2 {
        return;
    }

    let Some((prev_pose, _)) = project_onto_trajectory(prev_traj, &first.pose) else {
        return;
    };

    first.fixed_kinematic_state = Some(KinematicState {
        lat: first.pose.lateral_offset(&prev_pose.position),
        yaw: normalize_angle(prev_pose.yaw() - first.pose.yaw()),
    });
}

/// Index of the trajectory point nearest the ego, preferring points within
/// the distance and yaw matching thresholds. Falls back to the plain
/// nearest point when nothing matches.
pub fn find_ego_nearest_index(
    points: &[TrajectoryPoint],
    ego_pose: &Pose,
    cfg: &EgoNearestConfig,
) -> usize {
    let mut best_constrained: Option<(usize, f64)> = None;
    let mut best_any: Option<(usize, f64)> = None;

    for (i, p) in points.iter().enumerate() {
        let dist = ego_pose.position.distance_2d(&p.pose.position);
        if best_any.map_or(true, |(_, d)| dist < d) {
            best_any = Some((i, dist));
        }
        let yaw_diff = normalize_angle(p.pose.yaw() - ego_pose.yaw()).abs();
        if dist <= cfg.dist_threshold && yaw_diff <= cfg.yaw_threshold {
            if best_constrained.map_or(true, |(_, d)| dist < d) {
                best_constrained = Some((i, dist));
            }
        }
    }

    best_constrained.or(best_any).map(|(i, _)| i).unwrap_or(0)
}

/// Interpolated pose on the trajectory closest to `pose`, with the segment
/// index it fell on.
pub fn project_onto_trajectory(
    traj: &[TrajectoryPoint],
    pose: &Pose,
) -> Option<(Pose, usize)> {
    if traj.len() < 2 {
        return None;
    }

    let mut best: Option<(f64, Pose, usize)> = None;
    for (i, w) in traj.windows(2).enumerate() {
        let a = &w[0].pose.position;
        let b = &w[1].pose.position;
        let ex = b.x - a.x;
        let ey = b.y - a.y;
        let len_sq = ex * ex + ey * ey;
        if len_sq < 1e-12 {
            continue;
        }
        let t = (((pose.position.x - a.x) * ex + (pose.position.y - a.y) * ey) / len_sq)
            .clamp(0.0, 1.0);
        let px = a.x + t * ex;
        let py = a.y + t * ey;
        let dist_sq = (pose.position.x - px).powi(2) + (pose.position.y - py).powi(2);

        if best.as_ref().map_or(true, |(d, _, _)| dist_sq < *d) {
            let yaw_a = w[0].pose.yaw();
            let yaw_b = w[1].pose.yaw();
            let yaw = yaw_a + t * normalize_angle(yaw_b - yaw_a);
            best = Some((dist_sq, Pose::from_xy_yaw(px, py, yaw), i));
        }
    }
    best.map(|(_, p, i)| (p, i))
}

fn cumulative_arc_lengths(points: &[TrajectoryPoint]) -> Vec<f64> {
    let mut s = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    s.push(0.0);
    for w in points.windows(2) {
        acc += w[0].pose.position.distance_2d(&w[1].pose.position);
        s.push(acc);
    }
    s
}

fn interpolate_velocity(source: &[TrajectoryPoint], source_s: &[f64], s: f64) -> f64 {
    if s <= source_s[0] {
        return source[0].longitudinal_velocity_mps;
    }
    let last = source_s.len() - 1;
    if s >= source_s[last] {
        return source[last].longitudinal_velocity_mps;
    }
    let i = source_s.partition_point(|&si| si <= s) - 1;
    let span = source_s[i + 1] - source_s[i];
    if span < 1e-9 {
        return source[i].longitudinal_velocity_mps;
    }
    let t = (s - source_s[i]) / span;
    source[i].longitudinal_velocity_mps
        + t * (source[i + 1].longitudinal_velocity_mps - source[i].longitudinal_velocity_mps)
}
