//! Natural cubic spline bases
//!
//! Restricted (natural) cubic splines in the truncated-power form: linear
//! beyond the boundary knots, cubic between them. With `k` knots the basis
//! has `k - 1` columns (the linear term plus `k - 2` nonlinear terms) and
//! spans the same space as a natural spline with those knots, up to the
//! intercept.

use ndarray::Array2;

use crate::stats::quantile;

/// Knot set of a natural cubic spline
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalSpline {
    knots: Vec<f64>,
}

impl NaturalSpline {
    /// Place knots for `df` basis columns: boundary knots at the range of
    /// `x`, interior knots at equally spaced quantiles. Tied knots are
    /// merged, so the basis may end up with fewer columns than requested.
    pub fn with_df(x: &[f64], df: usize) -> Self {
        let df = df.max(1);
        let mut knots: Vec<f64> = (0..=df)
            .map(|i| quantile(x, i as f64 / df as f64))
            .filter(|k| k.is_finite())
            .collect();
        knots.dedup_by(|a, b| (*a - *b).abs() <= 1e-12 * (1.0 + b.abs()));
        Self { knots }
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Number of basis columns, intercept excluded
    pub fn df(&self) -> usize {
        if self.knots.len() < 2 {
            // constant covariate: only the linear column, which is then degenerate
            1
        } else {
            self.knots.len() - 1
        }
    }

    /// Basis row at a single point
    pub fn basis(&self, x: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.df());
        row.push(x);
        let k = self.knots.len();
        if k < 3 {
            return row;
        }
        let t = &self.knots;
        let last = t[k - 1];
        let second_last = t[k - 2];
        let scale = (last - t[0]).powi(2);
        let cube = |v: f64| if v > 0.0 { v * v * v } else { 0.0 };
        for j in 0..(k - 2) {
            let term = cube(x - t[j]) - cube(x - second_last) * (last - t[j]) / (last - second_last)
                + cube(x - last) * (second_last - t[j]) / (last - second_last);
            row.push(term / scale);
        }
        row
    }

    /// Model matrix over `x`, optionally with a leading intercept column
    pub fn design(&self, x: &[f64], intercept: bool) -> Array2<f64> {
        let offset = usize::from(intercept);
        let mut m = Array2::zeros((x.len(), self.df() + offset));
        for (i, &xi) in x.iter().enumerate() {
            if intercept {
                m[[i, 0]] = 1.0;
            }
            for (j, v) in self.basis(xi).into_iter().enumerate() {
                m[[i, j + offset]] = v;
            }
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knots_at_quantiles() {
        let x: Vec<f64> = (0..=100).map(f64::from).collect();
        let spline = NaturalSpline::with_df(&x, 4);
        assert_eq!(spline.knots(), &[0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(spline.df(), 4);
        assert_eq!(spline.design(&x, true).ncols(), 5);
    }

    #[test]
    fn test_tied_knots_are_merged() {
        let x = vec![1.0; 20];
        let spline = NaturalSpline::with_df(&x, 4);
        assert_eq!(spline.df(), 1);
    }

    #[test]
    fn test_linear_beyond_boundary() {
        let x: Vec<f64> = (0..=10).map(f64::from).collect();
        let spline = NaturalSpline::with_df(&x, 3);
        // second differences vanish outside the boundary knots
        let f = |v: f64| spline.basis(v)[1];
        let d2_right = f(14.0) - 2.0 * f(13.0) + f(12.0);
        let d2_left = f(-4.0) - 2.0 * f(-3.0) + f(-2.0);
        assert!(d2_right.abs() < 1e-9);
        assert!(d2_left.abs() < 1e-12);
        // but not inside
        let d2_inside = f(6.0) - 2.0 * f(5.0) + f(4.0);
        assert!(d2_inside.abs() > 1e-6);
    }
}
