//! Planner configuration
//!
//! All parameters are fixed at construction time. `PlannerConfig::validate`
//! rejects configurations the optimizer cannot run with, so an invalid
//! setup never reaches the per-cycle path.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("max_steer_rad must be in (0, pi/2], got {0}")]
    SteerLimitOutOfRange(f64),
}

/// Main planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub trajectory: TrajectoryConfig,
    pub mpt: MptConfig,
    pub replan: ReplanConfig,
    pub ego_nearest: EgoNearestConfig,

    /// Insert a stop when the optimized trajectory leaves the corridor
    pub enable_outside_drivable_area_stop: bool,
    /// Arc length margin before the violating point where the stop starts [m]
    pub vehicle_stop_margin_outside_drivable_area: f64,
    /// Debug passthrough: resample the input and skip the MPT entirely
    pub enable_skip_optimization: bool,
    /// Clear all cross-cycle state on construction
    pub enable_reset_prev_optimization: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            trajectory: TrajectoryConfig::default(),
            mpt: MptConfig::default(),
            replan: ReplanConfig::default(),
            ego_nearest: EgoNearestConfig::default(),
            enable_outside_drivable_area_stop: true,
            vehicle_stop_margin_outside_drivable_area: 0.5,
            enable_skip_optimization: false,
            enable_reset_prev_optimization: true,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive(
            "output_delta_arc_length",
            self.trajectory.output_delta_arc_length,
        )?;
        non_negative(
            "output_backward_traj_length",
            self.trajectory.output_backward_traj_length,
        )?;
        self.mpt.validate()?;
        positive("max_path_shape_change_dist", self.replan.max_path_shape_change_dist)?;
        positive("max_ego_moving_dist", self.replan.max_ego_moving_dist)?;
        positive("max_delta_time_sec", self.replan.max_delta_time_sec)?;
        Ok(())
    }
}

/// Output trajectory sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Output sample spacing [m]
    pub output_delta_arc_length: f64,
    /// Trailing length behind the ego [m]
    pub output_backward_traj_length: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            output_delta_arc_length: 0.5,
            output_backward_traj_length: 2.0,
        }
    }
}

/// MPT horizon, constraint and solver parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MptConfig {
    /// Horizon length in reference points
    pub num_points: usize,
    /// Internal reference-point spacing [m]
    pub delta_arc_length: f64,
    /// Solver time budget per cycle [ms]
    pub max_optimization_time_ms: f64,

    pub weights: MptWeights,

    /// Longitudinal offset of the tracked point ahead of the rear axle [m].
    /// Zero tracks the rear axle; ~0.8 * wheelbase is typical.
    pub optimization_center_offset: f64,

    /// Steering angle constraint [rad]
    pub max_steer_rad: f64,
    /// Steering rate constraint [rad/s]
    pub max_steer_rate_rad_per_s: f64,

    /// Blend per-point weights by normalized avoidance cost
    pub enable_avoidance: bool,
    pub avoidance_precision: f64,
    /// Penalty on corridor slack variables
    pub soft_collision_free_weight: f64,
    /// Extra lateral clearance kept from the corridor edges [m]
    pub soft_clearance_from_road: f64,

    /// Box rows keeping the terminal state near the reference
    pub enable_terminal_constraint: bool,
    pub terminal_lat_error_threshold: f64,
    pub terminal_yaw_error_threshold: f64,
}

impl Default for MptConfig {
    fn default() -> Self {
        Self {
            num_points: 100,
            delta_arc_length: 1.0,
            max_optimization_time_ms: 50.0,
            weights: MptWeights::default(),
            optimization_center_offset: 0.0,
            max_steer_rad: 0.7,
            max_steer_rate_rad_per_s: 0.5,
            enable_avoidance: true,
            avoidance_precision: 0.5,
            soft_collision_free_weight: 1000.0,
            soft_clearance_from_road: 0.0,
            enable_terminal_constraint: true,
            terminal_lat_error_threshold: 0.3,
            terminal_yaw_error_threshold: 0.1,
        }
    }
}

impl MptConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_points < 2 {
            return Err(ConfigError::NonPositive {
                name: "num_points",
                value: self.num_points as f64,
            });
        }
        positive("delta_arc_length", self.delta_arc_length)?;
        positive("max_optimization_time_ms", self.max_optimization_time_ms)?;
        if !(self.max_steer_rad > 0.0 && self.max_steer_rad <= FRAC_PI_2) {
            return Err(ConfigError::SteerLimitOutOfRange(self.max_steer_rad));
        }
        positive("max_steer_rate_rad_per_s", self.max_steer_rate_rad_per_s)?;
        non_negative("soft_clearance_from_road", self.soft_clearance_from_road)?;
        self.weights.validate()
    }
}

/// Quadratic objective weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MptWeights {
    pub lat_error_weight: f64,
    pub yaw_error_weight: f64,
    pub steer_input_weight: f64,
    pub steer_rate_weight: f64,
    /// Linear penalty on the worst lateral error over the horizon
    pub l_inf_weight: f64,

    /// Endpoint tracking when the horizon is truncated before the goal
    pub terminal_lat_error_weight: f64,
    pub terminal_yaw_error_weight: f64,
    /// Endpoint tracking when the horizon reaches the route goal
    pub goal_lat_error_weight: f64,
    pub goal_yaw_error_weight: f64,

    /// Weights blended in by the per-point avoidance cost
    pub avoidance_lat_error_weight: f64,
    pub avoidance_yaw_error_weight: f64,
}

impl Default for MptWeights {
    fn default() -> Self {
        Self {
            lat_error_weight: 1.0,
            yaw_error_weight: 0.0,
            steer_input_weight: 1.0,
            steer_rate_weight: 1.0,
            l_inf_weight: 1.0,
            terminal_lat_error_weight: 100.0,
            terminal_yaw_error_weight: 0.0,
            goal_lat_error_weight: 1000.0,
            goal_yaw_error_weight: 0.0,
            avoidance_lat_error_weight: 0.0,
            avoidance_yaw_error_weight: 0.0,
        }
    }
}

impl MptWeights {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("lat_error_weight", self.lat_error_weight),
            ("yaw_error_weight", self.yaw_error_weight),
            ("steer_input_weight", self.steer_input_weight),
            ("steer_rate_weight", self.steer_rate_weight),
            ("l_inf_weight", self.l_inf_weight),
            ("terminal_lat_error_weight", self.terminal_lat_error_weight),
            ("terminal_yaw_error_weight", self.terminal_yaw_error_weight),
            ("goal_lat_error_weight", self.goal_lat_error_weight),
            ("goal_yaw_error_weight", self.goal_yaw_error_weight),
            ("avoidance_lat_error_weight", self.avoidance_lat_error_weight),
            ("avoidance_yaw_error_weight", self.avoidance_yaw_error_weight),
        ] {
            non_negative(name, value)?;
        }
        Ok(())
    }
}

/// Cold-replan triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanConfig {
    /// Mean lateral offset between consecutive input paths [m]
    pub max_path_shape_change_dist: f64,
    /// Ego displacement since the last replan [m]
    pub max_ego_moving_dist: f64,
    /// Wall-clock age of the previous plan [s]
    pub max_delta_time_sec: f64,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            max_path_shape_change_dist: 0.5,
            max_ego_moving_dist: 5.0,
            max_delta_time_sec: 2.0,
        }
    }
}

/// Nearest-index matching of the ego onto a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgoNearestConfig {
    pub dist_threshold: f64,
    pub yaw_threshold: f64,
}

impl Default for EgoNearestConfig {
    fn default() -> Self {
        Self {
            dist_threshold: 3.0,
            yaw_threshold: 1.046, // ~60 degrees
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(PlannerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = PlannerConfig::default();
        config.mpt.weights.lat_error_weight = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { name: "lat_error_weight", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_steer_limit() {
        let mut config = PlannerConfig::default();
        config.mpt.max_steer_rad = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::SteerLimitOutOfRange(_))));

        config.mpt.max_steer_rad = 2.0;
        assert!(matches!(config.validate(), Err(ConfigError::SteerLimitOutOfRange(_))));
    }

    #[test]
    fn test_rejects_zero_step() {
        let mut config = PlannerConfig::default();
        config.mpt.delta_arc_length = 0.0;
        assert!(config.validate().is_err());
    }
}
