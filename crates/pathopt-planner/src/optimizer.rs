//! Per-cycle orchestrator
//!
//! `PathOptimizer` drives one optimization cycle end-to-end: input
//! validation, replan decision, the MPT solve, velocity pass-through from
//! the input path, output resampling with a trailing extension behind the
//! ego, control-field computation and the drivable-area stop guard.
//!
//! Failures never cross the public API as errors: the result carries a
//! success flag and message, and the trajectory falls back to the previous
//! plan (when fresh) or to the resampled input path.

use log::{debug, warn};
use std::time::Instant;

use pathopt_core::geometry::{
    normalize_angle, signed_lateral_distance_to_polyline, Point, Pose,
};
use pathopt_core::spline::Spline2d;
use pathopt_core::types::{PathPoint, TrajectoryPoint};
use pathopt_core::vehicle::VehicleInfo;

use crate::config::{ConfigError, PlannerConfig};
use crate::mpt::{MptInput, MptOptimizer};
use crate::reference::{project_onto_trajectory, ReferencePoint};
use crate::replan::ReplanChecker;

/// Outcome of one cycle, including debug data
#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    pub trajectory: Vec<TrajectoryPoint>,
    pub reference_points: Vec<ReferencePoint>,
    pub success: bool,
    pub error_message: String,
    pub computation_time_ms: f64,
    /// The corridor was infeasible somewhere and slack absorbed it
    pub soft_violation: bool,
}

pub struct PathOptimizer {
    config: PlannerConfig,
    vehicle: VehicleInfo,
    mpt: MptOptimizer,
    replan_checker: ReplanChecker,
    prev_optimized_traj: Option<Vec<TrajectoryPoint>>,
    clock_origin: Instant,
}

impl PathOptimizer {
    /// Validates the configuration; an invalid one never constructs.
    pub fn new(config: PlannerConfig, vehicle: VehicleInfo) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut optimizer = Self {
            mpt: MptOptimizer::new(
                config.mpt.clone(),
                config.ego_nearest.clone(),
                vehicle,
            ),
            replan_checker: ReplanChecker::new(config.replan.clone()),
            prev_optimized_traj: None,
            clock_origin: Instant::now(),
            config,
            vehicle,
        };
        if optimizer.config.enable_reset_prev_optimization {
            optimizer.reset();
        }
        Ok(optimizer)
    }

    /// Drop all cross-cycle state (new route).
    pub fn reset(&mut self) {
        self.mpt.reset();
        self.replan_checker.reset();
        self.prev_optimized_traj = None;
    }

    /// One optimization cycle. Returns an empty trajectory on invalid input.
    pub fn optimize_path(
        &mut self,
        path_points: &[PathPoint],
        left_bound: &[Point],
        right_bound: &[Point],
        ego_pose: &Pose,
        ego_velocity: f64,
    ) -> Vec<TrajectoryPoint> {
        self.optimize_path_with_debug(path_points, left_bound, right_bound, ego_pose, ego_velocity)
            .trajectory
    }

    /// One optimization cycle with reference points, status and timing.
    pub fn optimize_path_with_debug(
        &mut self,
        path_points: &[PathPoint],
        left_bound: &[Point],
        right_bound: &[Point],
        ego_pose: &Pose,
        ego_velocity: f64,
    ) -> OptimizationResult {
        let cycle_start = Instant::now();
        let now_sec = self.clock_origin.elapsed().as_secs_f64();

        if let Err(message) =
            validate_input(path_points, left_bound, right_bound, ego_velocity)
        {
            return OptimizationResult {
                error_message: message,
                computation_time_ms: elapsed_ms(cycle_start),
                ..Default::default()
            };
        }

        let traj_points: Vec<TrajectoryPoint> =
            path_points.iter().map(|p| TrajectoryPoint::from(*p)).collect();

        if self.config.enable_skip_optimization {
            let mut trajectory = self.resample_output(&traj_points);
            self.calculate_control_fields(&mut trajectory);
            return OptimizationResult {
                trajectory,
                success: true,
                error_message: String::new(),
                computation_time_ms: elapsed_ms(cycle_start),
                ..Default::default()
            };
        }

        let replan_required =
            self.replan_checker
                .is_replan_required(&traj_points, ego_pose, now_sec);
        if replan_required {
            debug!("cold replan at t={:.2}s", now_sec);
        }

        let mpt_input = MptInput {
            traj_points: &traj_points,
            left_bound,
            right_bound,
            ego_pose,
            ego_velocity,
            prev_traj: self.prev_optimized_traj.as_deref(),
        };

        match self.mpt.optimize(&mpt_input, replan_required) {
            Ok(output) => {
                let mut optimized = output.traj_points;
                apply_input_velocity(&mut optimized, &traj_points);

                let mut trajectory = self.resample_output(&optimized);
                self.calculate_control_fields(&mut trajectory);
                if self.config.enable_outside_drivable_area_stop {
                    self.insert_stop_outside_drivable_area(
                        &mut trajectory,
                        left_bound,
                        right_bound,
                    );
                }

                self.prev_optimized_traj = Some(optimized);
                let record_time = if replan_required {
                    now_sec
                } else {
                    self.replan_checker
                        .last_replanned_time_sec()
                        .unwrap_or(now_sec)
                };
                self.replan_checker
                    .update_previous_data(&traj_points, ego_pose, record_time);

                OptimizationResult {
                    trajectory,
                    reference_points: output.ref_points,
                    success: true,
                    error_message: String::new(),
                    computation_time_ms: elapsed_ms(cycle_start),
                    soft_violation: output.soft_violation,
                }
            }
            Err(e) => {
                warn!("mpt failed: {e}; falling back");
                let last_replan = self.replan_checker.last_replanned_time_sec();
                let prev_is_fresh = last_replan
                    .map(|t| now_sec - t <= self.config.replan.max_delta_time_sec)
                    .unwrap_or(false);

                let source: &[TrajectoryPoint] = match (&self.prev_optimized_traj, prev_is_fresh) {
                    (Some(prev), true) => prev,
                    _ => &traj_points,
                };
                let mut trajectory = self.resample_output(source);
                self.calculate_control_fields(&mut trajectory);

                OptimizationResult {
                    trajectory,
                    success: false,
                    error_message: e.to_string(),
                    computation_time_ms: elapsed_ms(cycle_start),
                    ..Default::default()
                }
            }
        }
    }

    /// Resample a trajectory at the output step, extending backwards along
    /// the first point's tangent by the configured trailing length.
    fn resample_output(&self, traj: &[TrajectoryPoint]) -> Vec<TrajectoryPoint> {
        let filtered = dedup_points(traj);
        if filtered.len() < 2 {
            return filtered;
        }

        let xs: Vec<f64> = filtered.iter().map(|p| p.pose.position.x).collect();
        let ys: Vec<f64> = filtered.iter().map(|p| p.pose.position.y).collect();
        let Ok(spline) = Spline2d::new(&xs, &ys) else {
            return filtered;
        };

        let step = self.config.trajectory.output_delta_arc_length;
        let back = self.config.trajectory.output_backward_traj_length;
        let total = spline.total_length();

        let mut out = Vec::new();

        // Trailing segment behind the start, straight along the tangent
        let first = &filtered[0];
        let yaw0 = spline.yaw(0.0);
        let n_back = (back / step).floor() as usize;
        for k in (1..=n_back).rev() {
            let d = k as f64 * step;
            out.push(TrajectoryPoint {
                pose: Pose::from_xy_yaw(
                    first.pose.position.x - yaw0.cos() * d,
                    first.pose.position.y - yaw0.sin() * d,
                    yaw0,
                ),
                longitudinal_velocity_mps: first.longitudinal_velocity_mps,
                ..Default::default()
            });
        }

        let source_s = cumulative_arc(&filtered);
        let mut s = 0.0;
        while s <= total + 1e-9 {
            let s_clamped = s.min(total);
            let (x, y) = spline.position(s_clamped);
            out.push(TrajectoryPoint {
                pose: Pose::from_xy_yaw(x, y, spline.yaw(s_clamped)),
                longitudinal_velocity_mps: interpolate_by_arc(&filtered, &source_s, s_clamped),
                ..Default::default()
            });
            s += step;
        }
        out
    }

    /// Fill heading rate and wheel angles from the resampled geometry.
    fn calculate_control_fields(&self, trajectory: &mut [TrajectoryPoint]) {
        let n = trajectory.len();
        if n < 2 {
            return;
        }
        let s = cumulative_arc(trajectory);
        for i in 0..n {
            let (prev, next) = (i.saturating_sub(1), (i + 1).min(n - 1));
            let ds = s[next] - s[prev];
            let curvature = if ds > 1e-6 {
                normalize_angle(trajectory[next].pose.yaw() - trajectory[prev].pose.yaw()) / ds
            } else {
                0.0
            };
            trajectory[i].heading_rate_rps =
                trajectory[i].longitudinal_velocity_mps * curvature;
            trajectory[i].front_wheel_angle_rad = (self.vehicle.wheel_base * curvature).atan();
            trajectory[i].rear_wheel_angle_rad = 0.0;
        }
    }

    /// Zero velocities from `margin` before the first point that leaves the
    /// corridor.
    fn insert_stop_outside_drivable_area(
        &self,
        trajectory: &mut [TrajectoryPoint],
        left_bound: &[Point],
        right_bound: &[Point],
    ) {
        let outside = trajectory.iter().position(|p| {
            !is_inside_drivable_area(&p.pose.position, left_bound, right_bound)
        });
        let Some(outside_idx) = outside else {
            return;
        };

        let s = cumulative_arc(trajectory);
        let margin = self.config.vehicle_stop_margin_outside_drivable_area;
        let stop_target = s[outside_idx] - margin;
        let stop_idx = s.partition_point(|&si| si < stop_target).min(outside_idx);

        warn!(
            "trajectory leaves drivable area at index {}; stopping from index {}",
            outside_idx, stop_idx
        );
        for p in trajectory[stop_idx..].iter_mut() {
            p.longitudinal_velocity_mps = 0.0;
            p.heading_rate_rps = 0.0;
            p.acceleration_mps2 = 0.0;
        }
    }
}

fn validate_input(
    path_points: &[PathPoint],
    left_bound: &[Point],
    right_bound: &[Point],
    ego_velocity: f64,
) -> Result<(), String> {
    if path_points.len() < 2 {
        return Err(format!("path has {} points; at least 2 required", path_points.len()));
    }
    for (i, w) in path_points.windows(2).enumerate() {
        if w[0].pose.position.distance_2d(&w[1].pose.position) <= 0.0 {
            return Err(format!("path arc length is not strictly increasing at index {}", i + 1));
        }
    }
    if left_bound.len() < 2 || right_bound.len() < 2 {
        return Err("drivable-area bounds need at least 2 points each".to_string());
    }
    if ego_velocity < 0.0 {
        return Err(format!("ego velocity must be non-negative, got {ego_velocity}"));
    }
    Ok(())
}

/// Velocities always come from the current input path, never from the
/// geometry the optimizer resampled.
fn apply_input_velocity(optimized: &mut [TrajectoryPoint], input: &[TrajectoryPoint]) {
    for p in optimized.iter_mut() {
        let Some((projected, seg)) = project_onto_trajectory(input, &p.pose) else {
            continue;
        };
        let a = &input[seg];
        let b = &input[seg + 1];
        let seg_len = a.pose.position.distance_2d(&b.pose.position);
        let t = if seg_len > 1e-9 {
            a.pose.position.distance_2d(&projected.position) / seg_len
        } else {
            0.0
        };
        p.longitudinal_velocity_mps = a.longitudinal_velocity_mps
            + t * (b.longitudinal_velocity_mps - a.longitudinal_velocity_mps);
    }
}

fn is_inside_drivable_area(point: &Point, left_bound: &[Point], right_bound: &[Point]) -> bool {
    // The left boundary runs along the path direction, so inside points sit
    // to its right (negative side); mirrored for the right boundary.
    let left_ok = signed_lateral_distance_to_polyline(point, left_bound)
        .map_or(true, |d| d <= 1e-9);
    let right_ok = signed_lateral_distance_to_polyline(point, right_bound)
        .map_or(true, |d| d >= -1e-9);
    left_ok && right_ok
}

fn dedup_points(traj: &[TrajectoryPoint]) -> Vec<TrajectoryPoint> {
    let mut out: Vec<TrajectoryPoint> = Vec::with_capacity(traj.len());
    for p in traj {
        if out
            .last()
            .map_or(true, |last| last.pose.position.distance_2d(&p.pose.position) > 1e-6)
        {
            out.push(*p);
        }
    }
    out
}

fn cumulative_arc(traj: &[TrajectoryPoint]) -> Vec<f64> {
    let mut s = Vec::with_capacity(traj.len());
    let mut acc = 0.0;
    s.push(0.0);
    for w in traj.windows(2) {
        acc += w[0].pose.position.distance_2d(&w[1].pose.position);
        s.push(acc);
    }
    s
}

fn interpolate_by_arc(traj: &[TrajectoryPoint], s: &[f64], target: f64) -> f64 {
    if target <= s[0] {
        return traj[0].longitudinal_velocity_mps;
    }
    let last = s.len() - 1;
    if target >= s[last] {
        return traj[last].longitudinal_velocity_mps;
    }
    let i = s.partition_point(|&si| si <= target) - 1;
    let span = s[i + 1] - s[i];
    let t = if span > 1e-9 { (target - s[i]) / span } else { 0.0 };
    traj[i].longitudinal_velocity_mps
        + t * (traj[i + 1].longitudinal_velocity_mps - traj[i].longitudinal_velocity_mps)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios;

    fn test_optimizer() -> PathOptimizer {
        let mut config = PlannerConfig::default();
        config.mpt.num_points = 40;
        config.mpt.max_optimization_time_ms = 10_000.0;
        PathOptimizer::new(config, VehicleInfo::default()).unwrap()
    }

    #[test]
    fn test_invalid_input_returns_empty() {
        let mut optimizer = test_optimizer();
        let s = scenarios::straight_corridor();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points[..1],
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(!result.success);
        assert!(result.trajectory.is_empty());
        assert!(result.error_message.contains("at least 2"));
    }

    #[test]
    fn test_duplicate_path_points_rejected() {
        let mut optimizer = test_optimizer();
        let mut s = scenarios::straight_corridor();
        s.path_points[5] = s.path_points[4];
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(!result.success);
        assert!(result.error_message.contains("strictly increasing"));
    }

    #[test]
    fn test_negative_velocity_rejected() {
        let mut optimizer = test_optimizer();
        let s = scenarios::straight_corridor();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            -1.0,
        );
        assert!(!result.success);
        assert!(result.trajectory.is_empty());
    }

    #[test]
    fn test_skip_optimization_passthrough() {
        let mut config = PlannerConfig::default();
        config.enable_skip_optimization = true;
        let mut optimizer = PathOptimizer::new(config, VehicleInfo::default()).unwrap();

        let s = scenarios::straight_corridor();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(result.success);
        assert!(result.reference_points.is_empty());
        assert!(!result.trajectory.is_empty());
    }

    #[test]
    fn test_output_spacing() {
        let mut optimizer = test_optimizer();
        let s = scenarios::straight_corridor();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(result.success, "{}", result.error_message);

        let step = optimizer.config.trajectory.output_delta_arc_length;
        for w in result.trajectory.windows(2) {
            let d = w[0].pose.position.distance_2d(&w[1].pose.position);
            assert!(
                (d - step).abs() <= step * 0.05,
                "spacing {} deviates from {}",
                d,
                step
            );
        }
    }

    #[test]
    fn test_backward_extension_behind_ego() {
        let mut optimizer = test_optimizer();
        let s = scenarios::straight_corridor();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        // 2 m of trailing points at 0.5 m spacing ahead of the first path point
        let behind: Vec<_> = result
            .trajectory
            .iter()
            .filter(|p| p.pose.position.x < -1e-6)
            .collect();
        assert_eq!(behind.len(), 4);
        assert!(behind.iter().all(|p| p.pose.position.x >= -2.0 - 1e-6));
    }

    #[test]
    fn test_velocity_passthrough() {
        let mut optimizer = test_optimizer();
        let mut s = scenarios::straight_corridor();
        for (i, p) in s.path_points.iter_mut().enumerate() {
            p.longitudinal_velocity_mps = 3.0 + 0.1 * i as f64;
        }
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(result.success);

        // Forward points carry the input profile, which increases along x
        let fwd: Vec<_> = result
            .trajectory
            .iter()
            .filter(|p| p.pose.position.x > 1.0)
            .collect();
        assert!(fwd.windows(2).all(|w| {
            w[1].longitudinal_velocity_mps >= w[0].longitudinal_velocity_mps - 1e-6
        }));
    }

    #[test]
    fn test_failure_falls_back_to_input_path() {
        // A solver budget of effectively zero forces the failure path
        let mut config = PlannerConfig::default();
        config.mpt.num_points = 40;
        config.mpt.max_optimization_time_ms = 1e-9;
        let mut optimizer = PathOptimizer::new(config, VehicleInfo::default()).unwrap();

        let s = scenarios::off_center_ego();
        let result = optimizer.optimize_path_with_debug(
            &s.path_points,
            &s.left_bound,
            &s.right_bound,
            &s.ego_pose,
            s.ego_velocity,
        );
        assert!(!result.success);
        assert!(!result.trajectory.is_empty());
        // Passthrough keeps the input centerline
        for p in &result.trajectory {
            assert!(p.pose.position.y.abs() < 1e-6);
        }
    }
}
