//! Cold-replan trigger
//!
//! Decides when the optimizer must plan from scratch instead of continuing
//! from the previous cycle: missing history, a stale plan, an ego jump, or
//! an upstream path whose shape changed materially.

use log::debug;

use pathopt_core::geometry::Pose;
use pathopt_core::types::TrajectoryPoint;

use crate::config::ReplanConfig;
use crate::reference::project_onto_trajectory;

pub struct ReplanChecker {
    config: ReplanConfig,
    prev_traj_points: Option<Vec<TrajectoryPoint>>,
    prev_ego_pose: Option<Pose>,
    prev_replanned_time_sec: Option<f64>,
}

impl ReplanChecker {
    pub fn new(config: ReplanConfig) -> Self {
        Self {
            config,
            prev_traj_points: None,
            prev_ego_pose: None,
            prev_replanned_time_sec: None,
        }
    }

    /// True when the previous plan cannot be continued.
    pub fn is_replan_required(
        &self,
        current_traj: &[TrajectoryPoint],
        current_ego_pose: &Pose,
        current_time_sec: f64,
    ) -> bool {
        let (Some(prev_traj), Some(prev_pose), Some(prev_time)) = (
            self.prev_traj_points.as_ref(),
            self.prev_ego_pose.as_ref(),
            self.prev_replanned_time_sec,
        ) else {
            return true;
        };

        if current_time_sec - prev_time > self.config.max_delta_time_sec {
            debug!("replan: previous plan is stale");
            return true;
        }

        let moved = prev_pose.position.distance_2d(&current_ego_pose.position);
        if moved > self.config.max_ego_moving_dist {
            debug!("replan: ego moved {:.2} m since last plan", moved);
            return true;
        }

        let shape_change = mean_lateral_offset(current_traj, prev_traj);
        if shape_change > self.config.max_path_shape_change_dist {
            debug!("replan: path shape changed by {:.2} m", shape_change);
            return true;
        }

        false
    }

    /// Record the plan the next cycle will be compared against.
    pub fn update_previous_data(
        &mut self,
        traj_points: &[TrajectoryPoint],
        ego_pose: &Pose,
        current_time_sec: f64,
    ) {
        self.prev_traj_points = Some(traj_points.to_vec());
        self.prev_ego_pose = Some(*ego_pose);
        self.prev_replanned_time_sec = Some(current_time_sec);
    }

    /// Drop all history (new route, manual reset).
    pub fn reset(&mut self) {
        self.prev_traj_points = None;
        self.prev_ego_pose = None;
        self.prev_replanned_time_sec = None;
    }

    pub fn last_replanned_time_sec(&self) -> Option<f64> {
        self.prev_replanned_time_sec
    }
}

/// Mean lateral distance from `traj`'s samples to `other`.
fn mean_lateral_offset(traj: &[TrajectoryPoint], other: &[TrajectoryPoint]) -> f64 {
    if traj.is_empty() || other.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for p in traj {
        if let Some((projected, _)) = project_onto_trajectory(other, &p.pose) {
            sum += projected.lateral_offset(&p.pose.position).abs();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
