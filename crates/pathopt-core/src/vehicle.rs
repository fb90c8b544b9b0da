//! Kinematic bicycle model
//!
//! The optimizer tracks a two-state error vector [lateral_error, yaw_error]
//! driven by a single steering input. `VehicleModel` produces the discrete
//! linearized state transition for one arc-length step:
//!
//! ```text
//! x_{k+1} = A_d x_k + B_d u_k + W_d
//! ```
//!
//! about a reference curvature kappa, where delta_r = atan(wheelbase * kappa)
//! is the steady-state steering angle for that curvature. The feedforward
//! term W_d clamps delta_r to the steering limit so that a reference sharper
//! than the vehicle's envelope cannot blow up the offset vector.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Static vehicle parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VehicleInfo {
    /// Distance between the axles [m]
    pub wheel_base: f64,
    pub front_overhang: f64,
    pub rear_overhang: f64,
    pub vehicle_width: f64,
    pub vehicle_length: f64,
    /// Physical steering angle limit [rad]
    pub max_steer_rad: f64,
    /// Steering rate limit [rad/s]
    pub max_steer_rate_rad_per_s: f64,
}

impl Default for VehicleInfo {
    fn default() -> Self {
        Self {
            wheel_base: 2.79,
            front_overhang: 0.96,
            rear_overhang: 1.02,
            vehicle_width: 1.92,
            vehicle_length: 4.77,
            max_steer_rad: 0.7,
            max_steer_rate_rad_per_s: 0.5,
        }
    }
}

/// State dimension of the error model
pub const DIM_X: usize = 2;
/// Input dimension of the error model
pub const DIM_U: usize = 1;

/// Linearized discrete bicycle about a reference curvature
#[derive(Debug, Clone)]
pub struct VehicleModel {
    wheelbase: f64,
    steer_limit: f64,
}

impl VehicleModel {
    pub fn new(wheelbase: f64, steer_limit: f64) -> Self {
        Self { wheelbase, steer_limit }
    }

    pub fn wheelbase(&self) -> f64 {
        self.wheelbase
    }

    pub fn steer_limit(&self) -> f64 {
        self.steer_limit
    }

    /// Discrete state-equation triple (A_d, B_d, W_d) for one step of
    /// arc length `ds` about reference curvature `curvature`.
    pub fn state_equation_matrices(
        &self,
        curvature: f64,
        ds: f64,
    ) -> (Matrix2<f64>, Vector2<f64>, Vector2<f64>) {
        let delta_r = (self.wheelbase * curvature).atan();
        let cropped = delta_r.clamp(-self.steer_limit, self.steer_limit);

        let a_d = Matrix2::new(1.0, ds, 0.0, 1.0);

        let cos_delta = delta_r.cos();
        let b_d = Vector2::new(0.0, ds / self.wheelbase / (cos_delta * cos_delta));

        let tan_cropped = cropped.tan();
        let cos_cropped = cropped.cos();
        let w_d = Vector2::new(
            0.0,
            -ds * curvature
                + ds / self.wheelbase
                    * (tan_cropped - cropped / (cos_cropped * cos_cropped)),
        );

        (a_d, b_d, w_d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_reference_has_no_offset() {
        let model = VehicleModel::new(2.79, 0.7);
        let (a_d, b_d, w_d) = model.state_equation_matrices(0.0, 1.0);

        assert_relative_eq!(a_d[(0, 1)], 1.0);
        assert_relative_eq!(b_d[1], 1.0 / 2.79, epsilon = 1e-12);
        assert_relative_eq!(w_d[0], 0.0);
        assert_relative_eq!(w_d[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_a_is_curvature_independent() {
        let model = VehicleModel::new(2.79, 0.7);
        let (a0, _, _) = model.state_equation_matrices(0.0, 0.5);
        let (a1, _, _) = model.state_equation_matrices(0.05, 0.5);
        assert_eq!(a0, a1);
    }

    #[test]
    fn test_moderate_curvature_feedforward() {
        // Within the steering envelope, W_d[1] ~ -ds*kappa plus a small
        // cubic correction from the tan expansion.
        let model = VehicleModel::new(2.79, 0.7);
        let kappa = 1.0 / 20.0;
        let ds = 1.0;
        let (_, _, w_d) = model.state_equation_matrices(kappa, ds);

        let delta_r = (2.79 * kappa).atan();
        let expected = -ds * kappa
            + ds / 2.79 * (delta_r.tan() - delta_r / (delta_r.cos() * delta_r.cos()));
        assert_relative_eq!(w_d[1], expected, epsilon = 1e-12);
        // The correction beyond -ds*kappa stays small
        assert!((w_d[1] + ds * kappa).abs() < 1e-2);
    }

    #[test]
    fn test_excessive_curvature_is_clamped() {
        // Curvature far beyond the steering envelope: the clamped
        // feedforward must stay finite and bounded.
        let model = VehicleModel::new(2.79, 0.3);
        let (_, _, w_sharp) = model.state_equation_matrices(10.0, 1.0);
        assert!(w_sharp[1].is_finite());

        let (_, _, w_unclamped_ref) = model.state_equation_matrices(0.05, 1.0);
        assert!(w_unclamped_ref[1].abs() < w_sharp[1].abs());
    }
}
