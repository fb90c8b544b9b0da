//! Model Predictive Trajectory optimizer
//!
//! Folds the tracking, smoothness, terminal and corridor objectives into one
//! sparse QP over the steering input sequence and solves it with warm start:
//!
//! ```text
//! min  0.5 U' P U + q' U
//! s.t. l <= A [U; s; t] <= u
//! ```
//!
//! Decision variables are the steering inputs U, one non-negative corridor
//! slack per reference point, and (when the weight is enabled) a single
//! auxiliary variable bounding the worst lateral error over the horizon.
//!
//! The tracking block substitutes the state equation X = B*U + W into the
//! weighted square of the per-point errors, so the QP stays in input space
//! and the Hessian is dense only over the input block.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use std::time::Duration;
use thiserror::Error;

use pathopt_core::geometry::{normalize_angle, Point, Pose};
use pathopt_core::spline::SplineError;
use pathopt_core::types::TrajectoryPoint;
use pathopt_core::vehicle::VehicleInfo;

use crate::bounds::calculate_bounds;
use crate::config::{EgoNearestConfig, MptConfig};
use crate::reference::{
    generate_reference_points, update_fixed_point, KinematicState, ReferencePoint,
};
use crate::solver::{
    AdmmSettings, AdmmSolver, CscMatrix, QpSolver, SolveStatus, SolverError, INF,
};
use crate::state_equation::{HorizonMatrix, StateEquationGenerator};

const EPS_ABS: f64 = 1e-5;

#[derive(Debug, Error)]
pub enum MptError {
    #[error("reference generation failed: {0}")]
    Reference(#[from] SplineError),
    #[error("qp solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("qp did not converge: {0:?}")]
    NotConverged(SolveStatus),
}

/// Optimized horizon plus per-point diagnostics
#[derive(Debug, Clone)]
pub struct MptOutput {
    pub traj_points: Vec<TrajectoryPoint>,
    pub ref_points: Vec<ReferencePoint>,
    /// The corridor was infeasible somewhere and slack absorbed it
    pub soft_violation: bool,
}

/// One cycle's borrowed inputs
#[derive(Debug, Clone, Copy)]
pub struct MptInput<'a> {
    pub traj_points: &'a [TrajectoryPoint],
    pub left_bound: &'a [Point],
    pub right_bound: &'a [Point],
    pub ego_pose: &'a Pose,
    pub ego_velocity: f64,
    /// Previous cycle's output, used as the resample target and the
    /// continuity anchor when the replan checker allows it
    pub prev_traj: Option<&'a [TrajectoryPoint]>,
}

pub struct MptOptimizer {
    config: MptConfig,
    ego_nearest: EgoNearestConfig,
    vehicle: VehicleInfo,
    state_equation: StateEquationGenerator,
    solver: Box<dyn QpSolver>,

    initialized: bool,
    prev_shape: Option<(usize, usize)>,
    prev_primal: Option<Vec<f64>>,
    prev_dual: Option<Vec<f64>>,
    /// First steering input applied in the previous cycle (u_{-1})
    prev_first_input: Option<f64>,
    prev_ref_points: Option<Vec<ReferencePoint>>,
}

impl MptOptimizer {
    pub fn new(config: MptConfig, ego_nearest: EgoNearestConfig, vehicle: VehicleInfo) -> Self {
        let settings = AdmmSettings {
            time_limit: Some(Duration::from_secs_f64(
                config.max_optimization_time_ms / 1e3,
            )),
            // Purely absolute tolerance: the slack penalty puts a large
            // scale into q, which would make a relative dual criterion
            // declare convergence far too early.
            eps_rel: 0.0,
            max_iter: 20_000,
            ..AdmmSettings::default()
        };
        Self {
            state_equation: StateEquationGenerator::new(
                vehicle.wheel_base,
                config.max_steer_rad,
            ),
            solver: Box::new(AdmmSolver::new(settings)),
            config,
            ego_nearest,
            vehicle,
            initialized: false,
            prev_shape: None,
            prev_primal: None,
            prev_dual: None,
            prev_first_input: None,
            prev_ref_points: None,
        }
    }

    /// Swap in a different QP backend. The workspace starts cold.
    pub fn with_solver(mut self, solver: Box<dyn QpSolver>) -> Self {
        self.solver = solver;
        self.initialized = false;
        self.prev_shape = None;
        self
    }

    /// Clear all cross-cycle state.
    pub fn reset(&mut self) {
        self.prev_primal = None;
        self.prev_dual = None;
        self.prev_first_input = None;
        self.prev_ref_points = None;
    }

    pub fn previous_reference_points(&self) -> Option<&[ReferencePoint]> {
        self.prev_ref_points.as_deref()
    }

    /// Run one MPT cycle. `replan_required` discards warm-start data and
    /// plans from the input path instead of the previous trajectory.
    pub fn optimize(
        &mut self,
        input: &MptInput<'_>,
        replan_required: bool,
    ) -> Result<MptOutput, MptError> {
        if replan_required {
            self.reset();
        }

        // Continue from the previous plan's geometry when allowed
        let source: &[TrajectoryPoint] = match (replan_required, input.prev_traj) {
            (false, Some(prev)) if prev.len() >= 2 => prev,
            _ => input.traj_points,
        };

        let mut ref_points = generate_reference_points(
            source,
            input.ego_pose,
            &self.config,
            &self.ego_nearest,
        )?;

        if !replan_required {
            if let Some(prev) = input.prev_traj {
                update_fixed_point(&mut ref_points, prev);
            }
        }

        let half_width = self.vehicle.vehicle_width / 2.0 + self.config.soft_clearance_from_road;
        let corridor = calculate_bounds(
            &ref_points,
            input.left_bound,
            input.right_bound,
            half_width,
        );
        for (p, b) in ref_points.iter_mut().zip(corridor.bounds.iter()) {
            p.bounds = *b;
        }

        // The horizon starts from the pinned continuity state when present,
        // otherwise from the measured ego deviation.
        let ego_state = ego_kinematic_state(&ref_points[0], input.ego_pose);
        let x0 = ref_points[0].fixed_kinematic_state.unwrap_or(ego_state);
        let mat = self.state_equation.calc_matrix(&ref_points, &x0);

        let problem = self.build_problem(&ref_points, &mat);
        let solution = self.solve(&problem, replan_required)?;

        match solution.status {
            SolveStatus::Solved => {}
            status => {
                warn!("mpt qp failed with {:?} after {} iters", status, solution.iterations);
                return Err(MptError::NotConverged(status));
            }
        }

        let n_u = ref_points.len() - 1;
        let u = DVector::from_column_slice(&solution.primal[..n_u]);
        let x = self.state_equation.predict(&mat, &u);
        for (i, p) in ref_points.iter_mut().enumerate() {
            p.optimized_kinematic_state = KinematicState::new(x[2 * i], x[2 * i + 1]);
            p.optimized_input = u[i.min(n_u - 1)];
        }

        self.prev_first_input = Some(u[0]);
        self.prev_primal = Some(solution.primal);
        self.prev_dual = Some(solution.dual);
        self.prev_ref_points = Some(ref_points.clone());

        let traj_points = ref_points.iter().map(to_trajectory_point).collect();
        Ok(MptOutput {
            traj_points,
            ref_points,
            soft_violation: corridor.soft_violation,
        })
    }

    fn solve(
        &mut self,
        problem: &QpProblem,
        replan_required: bool,
    ) -> Result<crate::solver::QpSolution, MptError> {
        let n = problem.p.ncols;
        let m = problem.a.nrows;

        let mut fresh = !(self.initialized && self.prev_shape == Some((n, m)));
        if !fresh {
            // Non-structural path: push new values into the workspace
            let updated = self
                .solver
                .update_p(&problem.p)
                .and_then(|_| self.solver.update_a(&problem.a))
                .and_then(|_| self.solver.update_q(&problem.q))
                .and_then(|_| self.solver.update_bounds(&problem.l, &problem.u));
            match updated {
                Ok(()) => {}
                Err(SolverError::PatternChanged) => fresh = true,
                Err(e) => return Err(e.into()),
            }
        }
        if fresh {
            debug!("qp workspace (re)initialized: {} vars, {} rows", n, m);
            self.solver
                .init(&problem.p, &problem.a, &problem.q, &problem.l, &problem.u, EPS_ABS)?;
            self.initialized = true;
            self.prev_shape = Some((n, m));
        }

        // Warm start: shift the previous input sequence one step forward and
        // keep the dual unchanged. Anything incompatible cold-starts.
        let warm_primal = match &self.prev_primal {
            Some(prev) if !replan_required && prev.len() == n => {
                let n_u = problem.n_u;
                let mut shifted = prev.clone();
                for i in 0..n_u {
                    shifted[i] = prev[(i + 1).min(n_u - 1)];
                }
                shifted
            }
            _ => vec![0.0; n],
        };
        let warm_dual = match &self.prev_dual {
            Some(prev) if !replan_required && prev.len() == m => prev.clone(),
            _ => vec![0.0; m],
        };
        self.solver.set_warm_start(&warm_primal, &warm_dual)?;

        Ok(self.solver.optimize()?)
    }

    /// Assemble P, q, A, l, u for the current horizon.
    fn build_problem(&self, ref_points: &[ReferencePoint], mat: &HorizonMatrix) -> QpProblem {
        let n_ref = ref_points.len();
        let n_u = n_ref - 1;
        let n_slack = n_ref;
        let has_linf = self.config.weights.l_inf_weight > 0.0;
        let n = n_u + n_slack + usize::from(has_linf);
        let t_col = n - 1; // only meaningful when has_linf

        let weights = &self.config.weights;
        let goal_reached = n_ref < self.config.num_points;
        let offset = self.config.optimization_center_offset;

        // Per-point weights, blended by the avoidance cost on interior points
        let mut w_lat = DVector::zeros(n_ref);
        let mut w_yaw = DVector::zeros(n_ref);
        for (i, p) in ref_points.iter().enumerate() {
            let (lat, yaw) = if i == n_ref - 1 {
                if goal_reached {
                    (weights.goal_lat_error_weight, weights.goal_yaw_error_weight)
                } else {
                    (
                        weights.terminal_lat_error_weight,
                        weights.terminal_yaw_error_weight,
                    )
                }
            } else if self.config.enable_avoidance {
                let c = p.normalized_avoidance_cost.clamp(0.0, 1.0);
                (
                    (1.0 - c) * weights.lat_error_weight + c * weights.avoidance_lat_error_weight,
                    (1.0 - c) * weights.yaw_error_weight + c * weights.avoidance_yaw_error_weight,
                )
            } else {
                (weights.lat_error_weight, weights.yaw_error_weight)
            };
            w_lat[i] = lat;
            w_yaw[i] = yaw;
        }

        // Tracking rows: the lateral error is evaluated at the optimization
        // center, lat + offset*cos(alpha)*yaw + offset*sin(alpha)
        let mut c_lat = DMatrix::zeros(n_ref, 2 * n_ref);
        let mut c0 = DVector::zeros(n_ref);
        let mut c_yaw = DMatrix::zeros(n_ref, 2 * n_ref);
        for (i, p) in ref_points.iter().enumerate() {
            c_lat[(i, 2 * i)] = 1.0;
            c_lat[(i, 2 * i + 1)] = offset * p.alpha.cos();
            c0[i] = offset * p.alpha.sin();
            c_yaw[(i, 2 * i + 1)] = 1.0;
        }

        let cb_lat = &c_lat * &mat.b; // n_ref x n_u
        let cw_lat = &c_lat * &mat.w + &c0;
        let cb_yaw = &c_yaw * &mat.b;
        let cw_yaw = &c_yaw * &mat.w;

        let mut p_mat = DMatrix::zeros(n, n);
        let mut q = DVector::zeros(n);

        // Quadratic tracking cost, scaled into the 0.5*U'PU form
        let wl = DMatrix::from_diagonal(&w_lat);
        let wy = DMatrix::from_diagonal(&w_yaw);
        let p_track =
            2.0 * (cb_lat.transpose() * &wl * &cb_lat + cb_yaw.transpose() * &wy * &cb_yaw);
        let q_track =
            2.0 * (cb_lat.transpose() * &wl * &cw_lat + cb_yaw.transpose() * &wy * &cw_yaw);
        p_mat.view_mut((0, 0), (n_u, n_u)).copy_from(&p_track);
        q.rows_mut(0, n_u).copy_from(&q_track);

        // Input magnitude
        for i in 0..n_u {
            p_mat[(i, i)] += 2.0 * weights.steer_input_weight;
        }

        // Input rate, with u_{-1} anchored to the previously applied input
        for i in 1..n_u {
            p_mat[(i, i)] += 2.0 * weights.steer_rate_weight;
            p_mat[(i - 1, i - 1)] += 2.0 * weights.steer_rate_weight;
            p_mat[(i, i - 1)] -= 2.0 * weights.steer_rate_weight;
            p_mat[(i - 1, i)] -= 2.0 * weights.steer_rate_weight;
        }
        if let Some(u_prev) = self.prev_first_input {
            p_mat[(0, 0)] += 2.0 * weights.steer_rate_weight;
            q[0] -= 2.0 * weights.steer_rate_weight * u_prev;
        }

        // Linear penalties on the slack block and the worst-error bound
        for i in 0..n_slack {
            q[n_u + i] = self.config.soft_collision_free_weight;
        }
        if has_linf {
            q[t_col] = weights.l_inf_weight;
        }

        // Constraint rows
        let n_fixed = ref_points
            .iter()
            .enumerate()
            .filter(|(i, p)| *i > 0 && p.fixed_kinematic_state.is_some())
            .count();
        let terminal_rows = if self.config.enable_terminal_constraint { 2 } else { 0 };
        let linf_rows = if has_linf { 2 * n_ref + 1 } else { 0 };
        let m_rows = 2 * n_ref + n_u + n_u + 2 * n_fixed + terminal_rows + linf_rows + n_slack;

        let mut a = DMatrix::zeros(m_rows, n);
        let mut l = DVector::from_element(m_rows, -INF);
        let mut u = DVector::from_element(m_rows, INF);
        let mut row = 0;

        // Corridor: lower(i) - s_i <= lat_i and lat_i <= upper(i) + s_i
        for (i, p) in ref_points.iter().enumerate() {
            for k in 0..n_u {
                a[(row, k)] = mat.b[(2 * i, k)];
            }
            a[(row, n_u + i)] = 1.0;
            l[row] = p.bounds.lower_bound - mat.w[2 * i];
            row += 1;
        }
        for (i, p) in ref_points.iter().enumerate() {
            for k in 0..n_u {
                a[(row, k)] = mat.b[(2 * i, k)];
            }
            a[(row, n_u + i)] = -1.0;
            u[row] = p.bounds.upper_bound - mat.w[2 * i];
            row += 1;
        }

        // Steering magnitude
        for i in 0..n_u {
            a[(row, i)] = 1.0;
            l[row] = -self.config.max_steer_rad;
            u[row] = self.config.max_steer_rad;
            row += 1;
        }

        // Steering rate; the first row constrains u_0 against the input
        // applied in the previous cycle when one exists
        let rate = self.config.max_steer_rate_rad_per_s;
        for i in 0..n_u {
            let ds = ref_points[i].delta_arc_length;
            if i == 0 {
                a[(row, 0)] = 1.0;
                if let Some(u_prev) = self.prev_first_input {
                    l[row] = u_prev - ds * rate;
                    u[row] = u_prev + ds * rate;
                }
            } else {
                a[(row, i)] = 1.0;
                a[(row, i - 1)] = -1.0;
                l[row] = -ds * rate;
                u[row] = ds * rate;
            }
            row += 1;
        }

        // Pinned interior states
        for (i, p) in ref_points.iter().enumerate() {
            if i == 0 {
                continue; // the first point enters through the W recurrence
            }
            let Some(fixed) = p.fixed_kinematic_state else {
                continue;
            };
            for (axis, target) in [(0, fixed.lat), (1, fixed.yaw)] {
                for k in 0..n_u {
                    a[(row, k)] = mat.b[(2 * i + axis, k)];
                }
                l[row] = target - mat.w[2 * i + axis];
                u[row] = l[row];
                row += 1;
            }
        }

        // Terminal error box
        if self.config.enable_terminal_constraint {
            let last = n_ref - 1;
            for (axis, threshold) in [
                (0, self.config.terminal_lat_error_threshold),
                (1, self.config.terminal_yaw_error_threshold),
            ] {
                for k in 0..n_u {
                    a[(row, k)] = mat.b[(2 * last + axis, k)];
                }
                l[row] = -threshold - mat.w[2 * last + axis];
                u[row] = threshold - mat.w[2 * last + axis];
                row += 1;
            }
        }

        // Worst-error bound: |lat_i| <= t, t >= 0
        if has_linf {
            for i in 0..n_ref {
                for k in 0..n_u {
                    a[(row, k)] = mat.b[(2 * i, k)];
                }
                a[(row, t_col)] = -1.0;
                u[row] = -mat.w[2 * i];
                row += 1;

                for k in 0..n_u {
                    a[(row, k)] = mat.b[(2 * i, k)];
                }
                a[(row, t_col)] = 1.0;
                l[row] = -mat.w[2 * i];
                row += 1;
            }
            a[(row, t_col)] = 1.0;
            l[row] = 0.0;
            row += 1;
        }

        // Slack non-negativity
        for i in 0..n_slack {
            a[(row, n_u + i)] = 1.0;
            l[row] = 0.0;
            row += 1;
        }
        debug_assert_eq!(row, m_rows);

        QpProblem {
            p: CscMatrix::from_dense_upper_triangular(&p_mat),
            a: CscMatrix::from_dense(&a),
            q: q.iter().copied().collect(),
            l: l.iter().copied().collect(),
            u: u.iter().copied().collect(),
            n_u,
        }
    }
}

struct QpProblem {
    p: CscMatrix,
    a: CscMatrix,
    q: Vec<f64>,
    l: Vec<f64>,
    u: Vec<f64>,
    n_u: usize,
}

/// Ego deviation from the first reference point.
fn ego_kinematic_state(ref_point: &ReferencePoint, ego_pose: &Pose) -> KinematicState {
    KinematicState {
        lat: ref_point.pose.lateral_offset(&ego_pose.position),
        yaw: normalize_angle(ego_pose.yaw() - ref_point.pose.yaw()),
    }
}

/// Shift a reference point by its optimized error state.
fn to_trajectory_point(p: &ReferencePoint) -> TrajectoryPoint {
    let yaw = p.pose.yaw();
    let lat = p.optimized_kinematic_state.lat;
    let pose = Pose::from_xy_yaw(
        p.pose.position.x - yaw.sin() * lat,
        p.pose.position.y + yaw.cos() * lat,
        normalize_angle(yaw + p.optimized_kinematic_state.yaw),
    );
    TrajectoryPoint {
        pose,
        longitudinal_velocity_mps: p.longitudinal_velocity_mps,
        front_wheel_angle_rad: p.optimized_input,
        ..Default::default()
    }
}
