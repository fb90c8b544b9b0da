//! Natural cubic spline interpolation
//!
//! Each segment is the cubic s(t) = a + b*dt + c*dt^2 + d*dt^3 with natural
//! boundary conditions (zero second derivative at both ends). The
//! tridiagonal coefficient system is solved with the Thomas algorithm.
//!
//! Queries outside the fitted range clamp: the value saturates at the
//! nearest endpoint, the first derivative at the endpoint slope, and the
//! second derivative at zero.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SplineError {
    #[error("at least two samples are required, got {0}")]
    TooFewSamples(usize),
    #[error("abscissas must be strictly increasing (violated at index {0})")]
    NotIncreasing(usize),
    #[error("abscissa and ordinate lengths differ: {x} vs {y}")]
    LengthMismatch { x: usize, y: usize },
}

/// Natural cubic spline over a strictly increasing abscissa.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, SplineError> {
        let n = x.len();
        if n < 2 {
            return Err(SplineError::TooFewSamples(n));
        }
        if y.len() != n {
            return Err(SplineError::LengthMismatch { x: n, y: y.len() });
        }
        for i in 1..n {
            if x[i] <= x[i - 1] {
                return Err(SplineError::NotIncreasing(i));
            }
        }

        let a = y.to_vec();
        let mut b = vec![0.0; n];
        let mut c = vec![0.0; n];
        let mut d = vec![0.0; n];

        if n == 2 {
            // Two samples degrade to linear interpolation
            b[0] = (y[1] - y[0]) / (x[1] - x[0]);
            b[1] = b[0];
            return Ok(Self { x: x.to_vec(), a, b, c, d });
        }

        let h: Vec<f64> = (0..n - 1).map(|i| x[i + 1] - x[i]).collect();

        let mut alpha = vec![0.0; n];
        for i in 1..n - 1 {
            alpha[i] =
                3.0 / h[i] * (y[i + 1] - y[i]) - 3.0 / h[i - 1] * (y[i] - y[i - 1]);
        }

        // Thomas algorithm on the tridiagonal system for c
        let mut l = vec![0.0; n];
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];
        l[0] = 1.0;
        for i in 1..n - 1 {
            l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }
        c[n - 1] = 0.0;

        for i in (0..n - 1).rev() {
            c[i] = z[i] - mu[i] * c[i + 1];
            b[i] = (y[i + 1] - y[i]) / h[i] - h[i] * (c[i + 1] + 2.0 * c[i]) / 3.0;
            d[i] = (c[i + 1] - c[i]) / (3.0 * h[i]);
        }
        // Slope at the upper boundary, used when clamping derivative queries
        let hl = h[n - 2];
        b[n - 1] = b[n - 2] + 2.0 * c[n - 2] * hl + 3.0 * d[n - 2] * hl * hl;

        Ok(Self { x: x.to_vec(), a, b, c, d })
    }

    /// Spline value at `t`, clamped to the nearest endpoint outside the range
    pub fn interpolate(&self, t: f64) -> f64 {
        if t <= self.x[0] {
            return self.a[0];
        }
        if t >= *self.x.last().unwrap() {
            return *self.a.last().unwrap();
        }
        let i = self.segment_index(t);
        let dt = t - self.x[i];
        self.a[i] + self.b[i] * dt + self.c[i] * dt * dt + self.d[i] * dt * dt * dt
    }

    /// First derivative at `t`; outside the range, the endpoint slope
    pub fn derivative(&self, t: f64) -> f64 {
        if t <= self.x[0] {
            return self.b[0];
        }
        if t >= *self.x.last().unwrap() {
            return *self.b.last().unwrap();
        }
        let i = self.segment_index(t);
        let dt = t - self.x[i];
        self.b[i] + 2.0 * self.c[i] * dt + 3.0 * self.d[i] * dt * dt
    }

    /// Second derivative at `t`; zero outside the range
    pub fn second_derivative(&self, t: f64) -> f64 {
        if t <= self.x[0] || t >= *self.x.last().unwrap() {
            return 0.0;
        }
        let i = self.segment_index(t);
        let dt = t - self.x[i];
        2.0 * self.c[i] + 6.0 * self.d[i] * dt
    }

    /// Index of the segment containing `t` (binary search)
    fn segment_index(&self, t: f64) -> usize {
        let n = self.x.len();
        match self.x.partition_point(|&xi| xi <= t) {
            0 => 0,
            p if p >= n => n - 2,
            p => p - 1,
        }
    }
}

/// 2D curve x(s), y(s) parameterized by cumulative arc length.
///
/// Heading and curvature are derived from the component splines:
/// yaw = atan2(y', x'), kappa = (x'y'' - y'x'') / (x'^2 + y'^2)^(3/2).
#[derive(Debug, Clone)]
pub struct Spline2d {
    s: Vec<f64>,
    sx: CubicSpline,
    sy: CubicSpline,
}

impl Spline2d {
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, SplineError> {
        let n = x.len();
        if y.len() != n {
            return Err(SplineError::LengthMismatch { x: n, y: y.len() });
        }
        if n < 2 {
            return Err(SplineError::TooFewSamples(n));
        }

        let mut s = Vec::with_capacity(n);
        s.push(0.0);
        for i in 1..n {
            let ds = ((x[i] - x[i - 1]).powi(2) + (y[i] - y[i - 1]).powi(2)).sqrt();
            if ds <= 0.0 {
                return Err(SplineError::NotIncreasing(i));
            }
            s.push(s[i - 1] + ds);
        }

        let sx = CubicSpline::new(&s, x)?;
        let sy = CubicSpline::new(&s, y)?;
        Ok(Self { s, sx, sy })
    }

    pub fn total_length(&self) -> f64 {
        *self.s.last().unwrap()
    }

    pub fn position(&self, s: f64) -> (f64, f64) {
        (self.sx.interpolate(s), self.sy.interpolate(s))
    }

    pub fn yaw(&self, s: f64) -> f64 {
        let dx = self.sx.derivative(s);
        let dy = self.sy.derivative(s);
        dy.atan2(dx)
    }

    pub fn curvature(&self, s: f64) -> f64 {
        let dx = self.sx.derivative(s);
        let dy = self.sy.derivative(s);
        let ddx = self.sx.second_derivative(s);
        let ddy = self.sy.second_derivative(s);
        let denom = (dx * dx + dy * dy).powf(1.5);
        if denom < 1e-12 {
            return 0.0;
        }
        (dx * ddy - dy * ddx) / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_degenerate_input() {
        assert_eq!(
            CubicSpline::new(&[1.0], &[2.0]),
            Err(SplineError::TooFewSamples(1))
        );
        assert!(matches!(
            CubicSpline::new(&[0.0, 1.0, 1.0], &[0.0, 1.0, 2.0]),
            Err(SplineError::NotIncreasing(2))
        ));
        assert!(matches!(
            CubicSpline::new(&[0.0, 1.0], &[0.0]),
            Err(SplineError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_two_samples_are_linear() {
        let sp = CubicSpline::new(&[0.0, 2.0], &[1.0, 5.0]).unwrap();
        assert_relative_eq!(sp.interpolate(1.0), 3.0, epsilon = 1e-12);
        assert_relative_eq!(sp.derivative(1.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(sp.second_derivative(1.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reproduces_knots_exactly() {
        let x = [0.0, 1.0, 2.5, 4.0, 5.5];
        let y = [0.0, 0.8, -0.3, 1.1, 0.4];
        let sp = CubicSpline::new(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert_relative_eq!(sp.interpolate(*xi), *yi, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_linear_function_reproduced_exactly() {
        // A natural spline reproduces anything with zero second derivative
        // at the boundary exactly; a line is the canonical round trip.
        let f = |t: f64| 2.0 * t + 0.5;
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&t| f(t)).collect();
        let sp = CubicSpline::new(&x, &y).unwrap();
        for &t in &[0.5, 3.3, 7.9] {
            assert_relative_eq!(sp.interpolate(t), f(t), epsilon = 1e-9);
            assert_relative_eq!(sp.derivative(t), 2.0, epsilon = 1e-9);
            assert_relative_eq!(sp.second_derivative(t), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_clamping_outside_range() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 1.0, 0.0, -1.0];
        let sp = CubicSpline::new(&x, &y).unwrap();

        assert_relative_eq!(sp.interpolate(-5.0), 0.0);
        assert_relative_eq!(sp.interpolate(99.0), -1.0);
        // Endpoint slopes, not zero
        assert_relative_eq!(sp.derivative(-5.0), sp.derivative(0.0));
        assert_relative_eq!(sp.second_derivative(-5.0), 0.0);
        assert_relative_eq!(sp.second_derivative(99.0), 0.0);
    }

    #[test]
    fn test_spline2d_straight_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y = vec![0.0; 20];
        let sp = Spline2d::new(&x, &y).unwrap();

        assert_relative_eq!(sp.total_length(), 19.0, epsilon = 1e-9);
        let (px, py) = sp.position(7.5);
        assert_relative_eq!(px, 7.5, epsilon = 1e-9);
        assert_relative_eq!(py, 0.0, epsilon = 1e-9);
        assert_relative_eq!(sp.yaw(7.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(sp.curvature(7.5), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_spline2d_circle_curvature() {
        let radius = 20.0;
        let n = 60;
        let x: Vec<f64> = (0..n)
            .map(|i| radius * (i as f64 * 0.02).sin())
            .collect();
        let y: Vec<f64> = (0..n)
            .map(|i| radius * (1.0 - (i as f64 * 0.02).cos()))
            .collect();
        let sp = Spline2d::new(&x, &y).unwrap();

        // Away from the clamped ends the curvature approaches 1/R
        let mid = sp.total_length() / 2.0;
        assert_relative_eq!(sp.curvature(mid), 1.0 / radius, epsilon = 1e-4);
    }
}
