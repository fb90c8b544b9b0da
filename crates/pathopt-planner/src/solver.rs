//! Sparse QP solver interface
//!
//! The optimizer talks to its QP backend through [`QpSolver`], a thin
//! stateful interface over a first-order operator-splitting solver:
//! initialize once, push non-structural updates (values, linear cost,
//! bounds) between cycles, warm-start from the previous primal/dual pair
//! and solve. Structural changes (a different sparsity pattern) require a
//! fresh `init`.
//!
//! Matrices cross the interface in Compressed Sparse Column form; the
//! quadratic cost P is supplied as its upper triangle.
//!
//! Two implementations are provided:
//!
//! - [`AdmmSolver`]: the default built-in ADMM solver using the standard
//!   operator-splitting iteration with over-relaxation and adaptive step
//!   size. The KKT system is factorized once per structural change and
//!   re-solved per iteration.
//! - `OsqpSolver` (cargo feature `osqp`): a wrapper over the OSQP solver
//!   for deployments that link it.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Stand-in for an unbounded constraint side
pub const INF: f64 = 1e30;

/// Compressed Sparse Column matrix: values, row indices per non-zero and
/// column pointers (length `ncols + 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub col_pointers: Vec<usize>,
    pub row_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl CscMatrix {
    /// Compress a dense matrix, keeping every non-zero entry.
    pub fn from_dense(m: &DMatrix<f64>) -> Self {
        Self::compress(m, |_, _| true)
    }

    /// Compress the upper triangle of a dense symmetric matrix.
    pub fn from_dense_upper_triangular(m: &DMatrix<f64>) -> Self {
        Self::compress(m, |r, c| r <= c)
    }

    fn compress(m: &DMatrix<f64>, keep: impl Fn(usize, usize) -> bool) -> Self {
        let (nrows, ncols) = m.shape();
        let mut col_pointers = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();

        col_pointers.push(0);
        for c in 0..ncols {
            for r in 0..nrows {
                let v = m[(r, c)];
                if v != 0.0 && keep(r, c) {
                    row_indices.push(r);
                    values.push(v);
                }
            }
            col_pointers.push(values.len());
        }

        Self { nrows, ncols, col_pointers, row_indices, values }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Expand back to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.nrows, self.ncols);
        for c in 0..self.ncols {
            for i in self.col_pointers[c]..self.col_pointers[c + 1] {
                m[(self.row_indices[i], c)] = self.values[i];
            }
        }
        m
    }

    /// Same sparsity structure (shape and index layout), values ignored.
    pub fn same_pattern(&self, other: &CscMatrix) -> bool {
        self.nrows == other.nrows
            && self.ncols == other.ncols
            && self.col_pointers == other.col_pointers
            && self.row_indices == other.row_indices
    }
}

/// Terminal state of one `optimize` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Solved,
    MaxIterationsReached,
    TimeLimitReached,
}

/// Result of one `optimize` call
#[derive(Debug, Clone)]
pub struct QpSolution {
    pub primal: Vec<f64>,
    pub dual: Vec<f64>,
    pub status: SolveStatus,
    pub iterations: usize,
    pub solve_time_ms: f64,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver used before init")]
    NotInitialized,
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("sparsity pattern changed; re-initialization required")]
    PatternChanged,
    #[error("KKT factorization failed (P not positive semidefinite?)")]
    Factorization,
    #[error("solver backend failure: {0}")]
    Backend(String),
}

/// Stateful QP solver: min 0.5 x'Px + q'x  s.t.  l <= Ax <= u
pub trait QpSolver {
    fn init(
        &mut self,
        p: &CscMatrix,
        a: &CscMatrix,
        q: &[f64],
        l: &[f64],
        u: &[f64],
        eps_abs: f64,
    ) -> Result<(), SolverError>;

    fn update_p(&mut self, p: &CscMatrix) -> Result<(), SolverError>;
    fn update_q(&mut self, q: &[f64]) -> Result<(), SolverError>;
    fn update_a(&mut self, a: &CscMatrix) -> Result<(), SolverError>;
    fn update_bounds(&mut self, l: &[f64], u: &[f64]) -> Result<(), SolverError>;

    /// Provide the primal (and optionally dual) starting point for the next
    /// `optimize` call. An empty dual keeps the previous multipliers.
    fn set_warm_start(&mut self, primal: &[f64], dual: &[f64]) -> Result<(), SolverError>;

    fn optimize(&mut self) -> Result<QpSolution, SolverError>;
}

/// Operator-splitting solver settings
#[derive(Debug, Clone)]
pub struct AdmmSettings {
    /// Constraint step size
    pub rho: f64,
    /// Step-size multiplier on equality rows (l == u)
    pub rho_eq_scale: f64,
    /// Primal regularization
    pub sigma: f64,
    /// Over-relaxation factor
    pub alpha: f64,
    /// Relative convergence tolerance (absolute comes from `init`)
    pub eps_rel: f64,
    pub max_iter: usize,
    /// Iterations between residual checks
    pub check_interval: usize,
    /// Iterations between step-size adaptations (0 disables)
    pub adaptive_rho_interval: usize,
    pub rho_min: f64,
    pub rho_max: f64,
    /// Wall-clock budget for one `optimize` call
    pub time_limit: Option<Duration>,
}

impl Default for AdmmSettings {
    fn default() -> Self {
        Self {
            rho: 0.1,
            rho_eq_scale: 1e3,
            sigma: 1e-6,
            alpha: 1.6,
            eps_rel: 1e-3,
            max_iter: 8000,
            check_interval: 25,
            adaptive_rho_interval: 100,
            rho_min: 1e-6,
            rho_max: 1e6,
            time_limit: None,
        }
    }
}

struct AdmmWorkspace {
    p: DMatrix<f64>,
    a: DMatrix<f64>,
    q: DVector<f64>,
    l: DVector<f64>,
    u: DVector<f64>,
    p_pattern: CscMatrix,
    a_pattern: CscMatrix,
    eps_abs: f64,
    rho: DVector<f64>,
    rho_scalar: f64,
    kkt: Cholesky<f64, Dyn>,
    x: DVector<f64>,
    z: DVector<f64>,
    y: DVector<f64>,
}

/// Built-in ADMM solver over dense factorizations of the CSC problem data.
///
/// Problem sizes here are a few hundred variables, where a cached dense
/// Cholesky of the KKT matrix beats sparse bookkeeping.
pub struct AdmmSolver {
    settings: AdmmSettings,
    ws: Option<AdmmWorkspace>,
}

impl AdmmSolver {
    pub fn new(settings: AdmmSettings) -> Self {
        Self { settings, ws: None }
    }

    fn factorize(
        p: &DMatrix<f64>,
        a: &DMatrix<f64>,
        rho: &DVector<f64>,
        sigma: f64,
    ) -> Result<Cholesky<f64, Dyn>, SolverError> {
        let n = p.nrows();
        let mut kkt = p.clone();
        for i in 0..n {
            kkt[(i, i)] += sigma;
        }
        // K = P + sigma*I + A' * diag(rho) * A
        let mut scaled_a = a.clone();
        for (r, mut row) in scaled_a.row_iter_mut().enumerate() {
            row *= rho[r];
        }
        kkt += a.transpose() * scaled_a;
        Cholesky::new(kkt).ok_or(SolverError::Factorization)
    }

    fn rho_vector(settings: &AdmmSettings, rho_scalar: f64, l: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(l.len(), |i, _| {
            if (u[i] - l[i]).abs() < 1e-12 {
                (rho_scalar * settings.rho_eq_scale).clamp(settings.rho_min, settings.rho_max)
            } else {
                rho_scalar
            }
        })
    }

    /// Mirror an upper-triangular quadratic cost into a full symmetric matrix.
    fn symmetrize(p_tri: &CscMatrix) -> DMatrix<f64> {
        let dense = p_tri.to_dense();
        let mut full = &dense + dense.transpose();
        for i in 0..dense.nrows() {
            full[(i, i)] -= dense[(i, i)];
        }
        full
    }
}

impl QpSolver for AdmmSolver {
    fn init(
        &mut self,
        p: &CscMatrix,
        a: &CscMatrix,
        q: &[f64],
        l: &[f64],
        u: &[f64],
        eps_abs: f64,
    ) -> Result<(), SolverError> {
        let n = p.ncols;
        let m = a.nrows;
        if a.ncols != n {
            return Err(SolverError::DimensionMismatch { expected: n, got: a.ncols });
        }
        for (len, name_len) in [(q.len(), n), (l.len(), m), (u.len(), m)] {
            if len != name_len {
                return Err(SolverError::DimensionMismatch { expected: name_len, got: len });
            }
        }

        let p_full = Self::symmetrize(p);
        let a_dense = a.to_dense();
        let l = DVector::from_column_slice(l);
        let u = DVector::from_column_slice(u);
        let rho_scalar = self.settings.rho;
        let rho = Self::rho_vector(&self.settings, rho_scalar, &l, &u);
        let kkt = Self::factorize(&p_full, &a_dense, &rho, self.settings.sigma)?;

        self.ws = Some(AdmmWorkspace {
            p: p_full,
            a: a_dense,
            q: DVector::from_column_slice(q),
            l,
            u,
            p_pattern: p.clone(),
            a_pattern: a.clone(),
            eps_abs,
            rho,
            rho_scalar,
            kkt,
            x: DVector::zeros(n),
            z: DVector::zeros(m),
            y: DVector::zeros(m),
        });
        Ok(())
    }

    fn update_p(&mut self, p: &CscMatrix) -> Result<(), SolverError> {
        let settings_sigma = self.settings.sigma;
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        if !p.same_pattern(&ws.p_pattern) {
            return Err(SolverError::PatternChanged);
        }
        ws.p = Self::symmetrize(p);
        ws.p_pattern = p.clone();
        ws.kkt = Self::factorize(&ws.p, &ws.a, &ws.rho, settings_sigma)?;
        Ok(())
    }

    fn update_q(&mut self, q: &[f64]) -> Result<(), SolverError> {
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        if q.len() != ws.q.len() {
            return Err(SolverError::DimensionMismatch { expected: ws.q.len(), got: q.len() });
        }
        ws.q.copy_from_slice(q);
        Ok(())
    }

    fn update_a(&mut self, a: &CscMatrix) -> Result<(), SolverError> {
        let settings_sigma = self.settings.sigma;
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        if !a.same_pattern(&ws.a_pattern) {
            return Err(SolverError::PatternChanged);
        }
        ws.a = a.to_dense();
        ws.a_pattern = a.clone();
        ws.kkt = Self::factorize(&ws.p, &ws.a, &ws.rho, settings_sigma)?;
        Ok(())
    }

    fn update_bounds(&mut self, l: &[f64], u: &[f64]) -> Result<(), SolverError> {
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        let m = ws.l.len();
        if l.len() != m || u.len() != m {
            return Err(SolverError::DimensionMismatch { expected: m, got: l.len().max(u.len()) });
        }
        ws.l.copy_from_slice(l);
        ws.u.copy_from_slice(u);
        Ok(())
    }

    fn set_warm_start(&mut self, primal: &[f64], dual: &[f64]) -> Result<(), SolverError> {
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        if primal.len() != ws.x.len() {
            return Err(SolverError::DimensionMismatch { expected: ws.x.len(), got: primal.len() });
        }
        ws.x.copy_from_slice(primal);
        if !dual.is_empty() {
            if dual.len() != ws.y.len() {
                return Err(SolverError::DimensionMismatch { expected: ws.y.len(), got: dual.len() });
            }
            ws.y.copy_from_slice(dual);
        }
        // Start the splitting variable on the constraint set
        let ax = &ws.a * &ws.x;
        ws.z = DVector::from_fn(ax.len(), |i, _| ax[i].clamp(ws.l[i], ws.u[i]));
        Ok(())
    }

    fn optimize(&mut self) -> Result<QpSolution, SolverError> {
        let settings = self.settings.clone();
        let ws = self.ws.as_mut().ok_or(SolverError::NotInitialized)?;
        let start = Instant::now();

        let mut status = SolveStatus::MaxIterationsReached;
        let mut iterations = settings.max_iter;

        for iter in 1..=settings.max_iter {
            // x-update through the cached KKT factorization
            let rhs = settings.sigma * &ws.x - &ws.q
                + ws.a.transpose() * (ws.rho.component_mul(&ws.z) - &ws.y);
            let x_tilde = ws.kkt.solve(&rhs);
            let z_tilde = &ws.a * &x_tilde;

            let x_next = settings.alpha * &x_tilde + (1.0 - settings.alpha) * &ws.x;
            let z_bar = settings.alpha * &z_tilde + (1.0 - settings.alpha) * &ws.z;

            let mut z_next = DVector::zeros(z_bar.len());
            for i in 0..z_bar.len() {
                z_next[i] = (z_bar[i] + ws.y[i] / ws.rho[i]).clamp(ws.l[i], ws.u[i]);
            }
            for i in 0..z_bar.len() {
                ws.y[i] += ws.rho[i] * (z_bar[i] - z_next[i]);
            }
            ws.x = x_next;
            ws.z = z_next;

            if iter % settings.check_interval == 0 || iter == settings.max_iter {
                let ax = &ws.a * &ws.x;
                let r_prim = (&ax - &ws.z).amax();
                let px = &ws.p * &ws.x;
                let aty = ws.a.transpose() * &ws.y;
                let r_dual = (&px + &ws.q + &aty).amax();

                let eps_prim = ws.eps_abs + settings.eps_rel * ax.amax().max(ws.z.amax());
                let eps_dual = ws.eps_abs
                    + settings.eps_rel * px.amax().max(ws.q.amax()).max(aty.amax());

                if r_prim <= eps_prim && r_dual <= eps_dual {
                    status = SolveStatus::Solved;
                    iterations = iter;
                    break;
                }

                if let Some(budget) = settings.time_limit {
                    if start.elapsed() > budget {
                        status = SolveStatus::TimeLimitReached;
                        iterations = iter;
                        break;
                    }
                }

                // Rebalance the step size when the residuals diverge
                if settings.adaptive_rho_interval > 0
                    && iter % settings.adaptive_rho_interval == 0
                {
                    let ratio = ((r_prim / eps_prim.max(1e-12))
                        / (r_dual / eps_dual.max(1e-12)).max(1e-12))
                    .sqrt();
                    if ratio > 5.0 || ratio < 0.2 {
                        ws.rho_scalar =
                            (ws.rho_scalar * ratio).clamp(settings.rho_min, settings.rho_max);
                        ws.rho = Self::rho_vector(&settings, ws.rho_scalar, &ws.l, &ws.u);
                        ws.kkt = Self::factorize(&ws.p, &ws.a, &ws.rho, settings.sigma)?;
                    }
                }
            }
        }

        Ok(QpSolution {
            primal: ws.x.iter().copied().collect(),
            dual: ws.y.iter().copied().collect(),
            status,
            iterations,
            solve_time_ms: start.elapsed().as_secs_f64() * 1e3,
        })
    }
}

/// OSQP-backed implementation of the solver interface.
#[cfg(feature = "osqp")]
pub mod osqp_backend {
    use super::*;
    use log::debug;
    use std::borrow::Cow;

    pub struct OsqpSolver {
        max_iter: u32,
        time_limit: Option<Duration>,
        problem: Option<osqp::Problem>,
    }

    impl OsqpSolver {
        pub fn new(max_iter: u32, time_limit: Option<Duration>) -> Self {
            Self { max_iter, time_limit, problem: None }
        }

        fn convert(m: &CscMatrix) -> osqp::CscMatrix<'static> {
            osqp::CscMatrix {
                nrows: m.nrows,
                ncols: m.ncols,
                indptr: Cow::Owned(m.col_pointers.clone()),
                indices: Cow::Owned(m.row_indices.clone()),
                data: Cow::Owned(m.values.clone()),
            }
        }

        fn problem_mut(&mut self) -> Result<&mut osqp::Problem, SolverError> {
            self.problem.as_mut().ok_or(SolverError::NotInitialized)
        }
    }

    impl QpSolver for OsqpSolver {
        fn init(
            &mut self,
            p: &CscMatrix,
            a: &CscMatrix,
            q: &[f64],
            l: &[f64],
            u: &[f64],
            eps_abs: f64,
        ) -> Result<(), SolverError> {
            let mut settings = osqp::Settings::default()
                .verbose(false)
                .eps_abs(eps_abs)
                .eps_rel(1e-3)
                .max_iter(self.max_iter)
                .warm_start(true);
            if let Some(budget) = self.time_limit {
                settings = settings.time_limit(Some(budget));
            }
            let problem =
                osqp::Problem::new(Self::convert(p), q, Self::convert(a), l, u, &settings)
                    .map_err(|e| SolverError::Backend(e.to_string()))?;
            self.problem = Some(problem);
            Ok(())
        }

        fn update_p(&mut self, p: &CscMatrix) -> Result<(), SolverError> {
            let p = Self::convert(p);
            self.problem_mut()?.update_P(p);
            Ok(())
        }

        fn update_q(&mut self, q: &[f64]) -> Result<(), SolverError> {
            self.problem_mut()?.update_lin_cost(q);
            Ok(())
        }

        fn update_a(&mut self, a: &CscMatrix) -> Result<(), SolverError> {
            let a = Self::convert(a);
            self.problem_mut()?.update_A(a);
            Ok(())
        }

        fn update_bounds(&mut self, l: &[f64], u: &[f64]) -> Result<(), SolverError> {
            self.problem_mut()?.update_bounds(l, u);
            Ok(())
        }

        fn set_warm_start(&mut self, _primal: &[f64], _dual: &[f64]) -> Result<(), SolverError> {
            // OSQP warm-starts internally from the previous solution held in
            // its workspace; explicit injection is not exposed by the crate.
            debug!("osqp backend keeps its own warm-start state");
            Ok(())
        }

        fn optimize(&mut self) -> Result<QpSolution, SolverError> {
            let start = Instant::now();
            let problem = self.problem_mut()?;
            let result = problem.solve();

            match result {
                osqp::Status::Solved(sol) | osqp::Status::SolvedInaccurate(sol) => {
                    Ok(QpSolution {
                        primal: sol.x().to_vec(),
                        dual: sol.y().to_vec(),
                        status: SolveStatus::Solved,
                        // Iteration counts are not exposed uniformly across
                        // osqp crate versions
                        iterations: 0,
                        solve_time_ms: start.elapsed().as_secs_f64() * 1e3,
                    })
                }
                osqp::Status::MaxIterationsReached(_) => {
                    Err(SolverError::Backend("max iterations reached".into()))
                }
                osqp::Status::TimeLimitReached(_) => {
                    Err(SolverError::Backend("time limit reached".into()))
                }
                _ => Err(SolverError::Backend("infeasible or non-convex problem".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solve(
        p: DMatrix<f64>,
        q: &[f64],
        a: DMatrix<f64>,
        l: &[f64],
        u: &[f64],
    ) -> QpSolution {
        let mut solver = AdmmSolver::new(AdmmSettings::default());
        solver
            .init(
                &CscMatrix::from_dense_upper_triangular(&p),
                &CscMatrix::from_dense(&a),
                q,
                l,
                u,
                1e-6,
            )
            .unwrap();
        solver.optimize().unwrap()
    }

    #[test]
    fn test_csc_round_trip() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 2.0, 3.0, 0.0]);
        let csc = CscMatrix::from_dense(&m);
        assert_eq!(csc.nnz(), 3);
        assert_eq!(csc.col_pointers, vec![0, 2, 3]);
        assert_eq!(csc.to_dense(), m);
    }

    #[test]
    fn test_csc_upper_triangular() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]);
        let tri = CscMatrix::from_dense_upper_triangular(&m);
        assert_eq!(tri.nnz(), 3);
        let dense = tri.to_dense();
        assert_eq!(dense[(1, 0)], 0.0);
        assert_eq!(dense[(0, 1)], 1.0);
    }

    #[test]
    fn test_pattern_comparison() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 2, &[5.0, 0.0, 0.0, -2.0]);
        let c = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
        assert!(CscMatrix::from_dense(&a).same_pattern(&CscMatrix::from_dense(&b)));
        assert!(!CscMatrix::from_dense(&a).same_pattern(&CscMatrix::from_dense(&c)));
    }

    #[test]
    fn test_unconstrained_quadratic() {
        // min (x - 3)^2 -> x = 3
        let p = DMatrix::from_row_slice(1, 1, &[2.0]);
        let a = DMatrix::from_row_slice(1, 1, &[1.0]);
        let sol = solve(p, &[-6.0], a, &[-100.0], &[100.0]);
        assert_eq!(sol.status, SolveStatus::Solved);
        assert_relative_eq!(sol.primal[0], 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_active_box_constraint() {
        // min (x - 3)^2 s.t. x <= 1 -> x = 1, with an active multiplier
        let p = DMatrix::from_row_slice(1, 1, &[2.0]);
        let a = DMatrix::from_row_slice(1, 1, &[1.0]);
        let sol = solve(p, &[-6.0], a, &[-100.0], &[1.0]);
        assert_eq!(sol.status, SolveStatus::Solved);
        assert_relative_eq!(sol.primal[0], 1.0, epsilon = 1e-3);
        assert!(sol.dual[0] < -1e-3 || sol.dual[0] > 1e-3);
    }

    #[test]
    fn test_two_variable_coupling() {
        // min x1^2 + x2^2 - 2 x1 - 4 x2  s.t. x1 + x2 = 2
        // Optimum at (0.5, 1.5)
        let p = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let sol = solve(p, &[-2.0, -4.0], a, &[2.0], &[2.0]);
        assert_eq!(sol.status, SolveStatus::Solved);
        assert_relative_eq!(sol.primal[0], 0.5, epsilon = 1e-3);
        assert_relative_eq!(sol.primal[1], 1.5, epsilon = 1e-3);
    }

    #[test]
    fn test_warm_start_accepts_previous_solution() {
        let p = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let a = DMatrix::identity(2, 2);
        let mut solver = AdmmSolver::new(AdmmSettings::default());
        solver
            .init(
                &CscMatrix::from_dense_upper_triangular(&p),
                &CscMatrix::from_dense(&a),
                &[-2.0, 2.0],
                &[-10.0, -10.0],
                &[10.0, 10.0],
                1e-6,
            )
            .unwrap();
        let first = solver.optimize().unwrap();
        solver.set_warm_start(&first.primal, &first.dual).unwrap();
        let second = solver.optimize().unwrap();

        assert_eq!(second.status, SolveStatus::Solved);
        assert!(second.iterations <= first.iterations);
        assert_relative_eq!(second.primal[0], first.primal[0], epsilon = 1e-4);
    }

    #[test]
    fn test_update_bounds_without_reinit() {
        let p = DMatrix::from_row_slice(1, 1, &[2.0]);
        let a = DMatrix::from_row_slice(1, 1, &[1.0]);
        let mut solver = AdmmSolver::new(AdmmSettings::default());
        solver
            .init(
                &CscMatrix::from_dense_upper_triangular(&p),
                &CscMatrix::from_dense(&a),
                &[-6.0],
                &[-100.0],
                &[100.0],
                1e-6,
            )
            .unwrap();
        assert_relative_eq!(solver.optimize().unwrap().primal[0], 3.0, epsilon = 1e-3);

        solver.update_bounds(&[-100.0], &[2.0]).unwrap();
        assert_relative_eq!(solver.optimize().unwrap().primal[0], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_pattern_change_is_rejected() {
        let p = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let a = DMatrix::identity(2, 2);
        let mut solver = AdmmSolver::new(AdmmSettings::default());
        solver
            .init(
                &CscMatrix::from_dense_upper_triangular(&p),
                &CscMatrix::from_dense(&a),
                &[0.0, 0.0],
                &[-1.0, -1.0],
                &[1.0, 1.0],
                1e-6,
            )
            .unwrap();

        let p_denser = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let err = solver.update_p(&CscMatrix::from_dense_upper_triangular(&p_denser));
        assert!(matches!(err, Err(SolverError::PatternChanged)));
    }

    #[test]
    fn test_uninitialized_rejected() {
        let mut solver = AdmmSolver::new(AdmmSettings::default());
        assert!(matches!(solver.optimize(), Err(SolverError::NotInitialized)));
        assert!(matches!(solver.update_q(&[1.0]), Err(SolverError::NotInitialized)));
    }

    #[test]
    fn test_infeasible_interval_still_returns() {
        // Contradictory tight rows around different values: ADMM cannot
        // satisfy both, but the call must return with a status rather than
        // spin; the iterate stays bounded.
        let p = DMatrix::from_row_slice(1, 1, &[2.0]);
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let mut solver = AdmmSolver::new(AdmmSettings {
            max_iter: 500,
            ..AdmmSettings::default()
        });
        solver
            .init(
                &CscMatrix::from_dense_upper_triangular(&p),
                &CscMatrix::from_dense(&a),
                &[0.0],
                &[1.0, -2.0],
                &[1.0, -2.0],
                1e-6,
            )
            .unwrap();
        let sol = solver.optimize().unwrap();
        assert!(sol.primal[0].is_finite());
        assert_ne!(sol.status, SolveStatus::Solved);
    }
}
