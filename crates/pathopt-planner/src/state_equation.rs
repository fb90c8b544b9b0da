//! Horizon state equation
//!
//! Stacks the per-step bicycle transitions into block matrices so that the
//! whole horizon state vector is an affine function of the input vector:
//!
//! ```text
//! X = B * U + W,   X in R^(2*N),  U in R^(N-1)
//! ```
//!
//! The recurrence, with (A_d, B_d, W_d) taken from reference point i-1:
//!
//! ```text
//! W[i]    = A_d * W[i-1] + W_d
//! B[i, k] = A_d * B[i-1, k]   for k < i-1
//! B[i, i-1] = B_d
//! ```
//!
//! The input-response blocks B_d are linearized about zero steering: a
//! curvature-dependent B produced oscillating entries near sharp turns when
//! the resampled curvature was noisy, and the QP conditioning suffered. The
//! reference curvature still enters through the feedforward term W_d, which
//! is what carries the steady-state steering for a curved reference.

use nalgebra::{DMatrix, DVector, Vector2};

use pathopt_core::vehicle::{VehicleModel, DIM_U, DIM_X};

use crate::reference::{KinematicState, ReferencePoint};

/// Stacked horizon matrices: X = B * U + W
#[derive(Debug, Clone)]
pub struct HorizonMatrix {
    pub b: DMatrix<f64>,
    pub w: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct StateEquationGenerator {
    vehicle_model: VehicleModel,
}

impl StateEquationGenerator {
    pub fn new(wheelbase: f64, max_steer_rad: f64) -> Self {
        Self {
            vehicle_model: VehicleModel::new(wheelbase, max_steer_rad),
        }
    }

    pub fn dim_x(&self) -> usize {
        DIM_X
    }

    pub fn dim_u(&self) -> usize {
        DIM_U
    }

    /// Assemble the horizon matrices for `ref_points`, propagating the
    /// initial kinematic state `x0` through the offset vector W.
    pub fn calc_matrix(&self, ref_points: &[ReferencePoint], x0: &KinematicState) -> HorizonMatrix {
        let n_ref = ref_points.len();
        let n_x = n_ref * DIM_X;
        let n_u = (n_ref - 1) * DIM_U;

        let mut b = DMatrix::zeros(n_x, n_u);
        let mut w = DVector::zeros(n_x);
        w[0] = x0.lat;
        w[1] = x0.yaw;

        for i in 1..n_ref {
            let p = &ref_points[i - 1];
            let (a_d, _, w_d) = self
                .vehicle_model
                .state_equation_matrices(p.curvature, p.delta_arc_length);
            // Input response about zero steering; see the module notes
            let (_, b_d, _) = self
                .vehicle_model
                .state_equation_matrices(0.0, p.delta_arc_length);

            let w_prev = Vector2::new(w[(i - 1) * DIM_X], w[(i - 1) * DIM_X + 1]);
            let w_next = a_d * w_prev + w_d;
            w[i * DIM_X] = w_next[0];
            w[i * DIM_X + 1] = w_next[1];

            for k in 0..i - 1 {
                let prev = b.fixed_view::<DIM_X, DIM_U>((i - 1) * DIM_X, k * DIM_U).into_owned();
                let propagated = a_d * prev;
                b.fixed_view_mut::<DIM_X, DIM_U>(i * DIM_X, k * DIM_U)
                    .copy_from(&propagated);
            }
            b.fixed_view_mut::<DIM_X, DIM_U>(i * DIM_X, (i - 1) * DIM_U)
                .copy_from(&b_d);
        }

        HorizonMatrix { b, w }
    }

    /// Evaluate X = B * U + W
    pub fn predict(&self, mat: &HorizonMatrix, u: &DVector<f64>) -> DVector<f64> {
        &mat.b * u + &mat.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferencePoint;
    use approx::assert_relative_eq;
    use pathopt_core::geometry::Pose;

    fn ref_points(n: usize, ds: f64, curvature: f64) -> Vec<ReferencePoint> {
        (0..n)
            .map(|i| ReferencePoint {
                pose: Pose::from_xy_yaw(i as f64 * ds, 0.0, 0.0),
                curvature,
                delta_arc_length: ds,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_dimensions() {
        let gen = StateEquationGenerator::new(2.79, 0.7);
        let refs = ref_points(10, 1.0, 0.0);
        let mat = gen.calc_matrix(&refs, &KinematicState::default());
        assert_eq!(mat.b.nrows(), 20);
        assert_eq!(mat.b.ncols(), 9);
        assert_eq!(mat.w.len(), 20);
    }

    #[test]
    fn test_predict_matches_step_recurrence() {
        // Propagating an arbitrary U through the stacked matrices must equal
        // the per-step simulation of the same recurrence.
        let gen = StateEquationGenerator::new(2.79, 0.7);
        let refs = ref_points(8, 0.8, 0.03);
        let x0 = KinematicState::new(0.4, -0.1);
        let mat = gen.calc_matrix(&refs, &x0);

        let u = DVector::from_fn(7, |i, _| 0.05 * (i as f64 + 1.0) * if i % 2 == 0 { 1.0 } else { -1.0 });
        let x = gen.predict(&mat, &u);

        let model = VehicleModel::new(2.79, 0.7);
        let mut state = Vector2::new(x0.lat, x0.yaw);
        assert_relative_eq!(x[0], state[0], epsilon = 1e-9);
        assert_relative_eq!(x[1], state[1], epsilon = 1e-9);
        for i in 1..8 {
            let p = &refs[i - 1];
            let (a_d, _, w_d) = model.state_equation_matrices(p.curvature, p.delta_arc_length);
            let (_, b_d, _) = model.state_equation_matrices(0.0, p.delta_arc_length);
            state = a_d * state + b_d * u[i - 1] + w_d;
            assert_relative_eq!(x[i * 2], state[0], epsilon = 1e-9);
            assert_relative_eq!(x[i * 2 + 1], state[1], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_input_on_straight_reference_stays_zero() {
        let gen = StateEquationGenerator::new(2.79, 0.7);
        let refs = ref_points(12, 1.0, 0.0);
        let mat = gen.calc_matrix(&refs, &KinematicState::default());
        let x = gen.predict(&mat, &DVector::zeros(11));
        for v in x.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_curved_reference_needs_feedforward_input() {
        // On a constant-curvature reference the feedforward W_d is cancelled
        // exactly by u = delta_r / cos^2(delta_r), the steady-state steering
        // mapped through the zero-linearized input response. That input is
        // within a few milliradians of atan(L * kappa).
        let wheelbase = 2.79;
        let kappa = 1.0 / 20.0;
        let gen = StateEquationGenerator::new(wheelbase, 0.7);
        let refs = ref_points(20, 1.0, kappa);
        let mat = gen.calc_matrix(&refs, &KinematicState::default());

        let delta_r = (wheelbase * kappa).atan();
        let u_ss = delta_r / (delta_r.cos() * delta_r.cos());
        assert!((u_ss - delta_r).abs() < 5e-3);

        let x = gen.predict(&mat, &DVector::from_element(19, u_ss));
        for i in 0..20 {
            assert_relative_eq!(x[i * 2], 0.0, epsilon = 1e-9);
            assert_relative_eq!(x[i * 2 + 1], 0.0, epsilon = 1e-9);
        }
    }
}
