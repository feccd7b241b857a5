//! Negative binomial dispersion from Cox-Reid adjusted profile likelihoods
//!
//! The adjusted profile log-likelihood (APL) of every gene is evaluated on a
//! fixed grid of dispersions. Common, trended and tagwise estimates are all
//! maximisers of interpolated combinations of those profiles:
//!
//! - common: the sum over genes
//! - trended: a moving average over genes ordered by abundance
//! - tagwise: the gene's own profile plus `prior_n` times the trended one

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use super::DispersionParams;
use crate::error::{DgeError, Result};
use crate::glm::fit_single_gene;

/// Dispersion estimates of one cohort
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub common: f64,
    pub trended: Vec<f64>,
    pub tagwise: Vec<f64>,
    /// Weight of the trended profile in the tagwise estimate
    pub prior_n: f64,
}

/// Grid points on the log2 scale and the dispersions 0.1 * 2^point
pub fn dispersion_grid(params: &DispersionParams) -> (Vec<f64>, Vec<f64>) {
    let (lo, hi) = params.grid_range;
    let n = params.grid_points;
    let points: Vec<f64> = (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect();
    let dispersions = points.iter().map(|p| 0.1 * 2.0_f64.powf(*p)).collect();
    (points, dispersions)
}

/// Genes x grid matrix of adjusted profile log-likelihoods
pub fn profile_likelihoods(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    offsets: ArrayView2<f64>,
    dispersions: &[f64],
    params: &DispersionParams,
) -> Array2<f64> {
    let n_genes = counts.nrows();
    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            dispersions
                .iter()
                .map(|&phi| {
                    fit_single_gene(counts.row(i), design, offsets.row(i), phi, &params.glm)
                        .adjusted_profile_likelihood()
                })
                .collect()
        })
        .collect();

    let mut apl = Array2::zeros((n_genes, dispersions.len()));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            apl[[i, j]] = v;
        }
    }
    apl
}

/// Location of the maximum of a function known at increasing points `x`.
///
/// The best grid point is refined by the vertex of the parabola through it
/// and its neighbours; maxima on the grid boundary are returned as is.
pub fn maximize_interpolant(x: &[f64], y: &[f64]) -> f64 {
    let best = y
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i);
    let i = match best {
        Some(i) => i,
        None => return f64::NAN,
    };
    if i == 0 || i + 1 == x.len() {
        return x[i];
    }

    let (x0, x1, x2) = (x[i - 1], x[i], x[i + 1]);
    let (y0, y1, y2) = (y[i - 1], y[i], y[i + 1]);
    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;
    if a >= 0.0 || !a.is_finite() || !b.is_finite() {
        return x1;
    }
    (-b / (2.0 * a)).clamp(x0, x2)
}

/// Moving average of the rows of `values` taken in `order`, over windows of
/// `width` rows centred on each row (shrinking at the ends). The result is
/// returned in the original row order.
pub fn moving_average_by_rows(values: &Array2<f64>, order: &[usize], width: usize) -> Array2<f64> {
    let n = order.len();
    let width = width.clamp(1, n.max(1));
    let half = width / 2;
    let mut out = Array2::zeros(values.dim());

    // prefix sums over the ordered rows
    let mut prefix = Array2::<f64>::zeros((n + 1, values.ncols()));
    for (rank, &row) in order.iter().enumerate() {
        let next = &prefix.row(rank) + &values.row(row);
        prefix.row_mut(rank + 1).assign(&next);
    }

    for (rank, &row) in order.iter().enumerate() {
        let lo = rank.saturating_sub(half);
        let hi = (lo + width).min(n);
        let lo = hi.saturating_sub(width);
        let window = (hi - lo) as f64;
        let avg = (&prefix.row(hi) - &prefix.row(lo)) / window;
        out.row_mut(row).assign(&avg);
    }
    out
}

/// Estimate common, trended and tagwise dispersions.
///
/// `abundance` orders genes for the trend (average log CPM).
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    offsets: ArrayView2<f64>,
    abundance: &[f64],
    params: &DispersionParams,
) -> Result<DispersionEstimates> {
    let n_genes = counts.nrows();
    if n_genes == 0 {
        return Err(DgeError::EmptyData {
            reason: "no genes to estimate dispersions from".to_string(),
        });
    }
    if abundance.len() != n_genes {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} abundance values", n_genes),
            got: format!("{} abundance values", abundance.len()),
        });
    }
    let residual_df = design.nrows().saturating_sub(design.ncols());
    if residual_df == 0 {
        return Err(DgeError::InvalidDesign {
            reason: "no residual degrees of freedom for dispersion estimation".to_string(),
        });
    }

    let (points, grid) = dispersion_grid(params);
    let to_dispersion = |p: f64| 0.1 * 2.0_f64.powf(p);

    log::info!(
        "Evaluating adjusted profile likelihoods for {} genes on {} dispersion grid points",
        n_genes,
        grid.len()
    );
    let apl = profile_likelihoods(counts, design, offsets, &grid, params);

    let summed: Vec<f64> = apl.sum_axis(Axis(0)).to_vec();
    let common = to_dispersion(maximize_interpolant(&points, &summed));
    if !common.is_finite() {
        return Err(DgeError::NumericalFailure {
            operation: "common dispersion".to_string(),
            details: "profile likelihood is not finite at any grid point".to_string(),
        });
    }

    let mut order: Vec<usize> = (0..n_genes).collect();
    order.sort_by(|&a, &b| abundance[a].total_cmp(&abundance[b]));
    let width = ((params.trend_span * n_genes as f64).floor() as usize).max(1);
    let trended_profile = moving_average_by_rows(&apl, &order, width);

    let prior_n = params.prior_df / residual_df as f64;

    let (trended, tagwise): (Vec<f64>, Vec<f64>) = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let trend_row = trended_profile.row(i).to_vec();
            let combined: Vec<f64> = apl
                .row(i)
                .iter()
                .zip(&trend_row)
                .map(|(&own, &trend)| own + prior_n * trend)
                .collect();
            (
                to_dispersion(maximize_interpolant(&points, &trend_row)),
                to_dispersion(maximize_interpolant(&points, &combined)),
            )
        })
        .unzip();

    log::info!(
        "Dispersion: common {:.4}, trended range [{:.4}, {:.4}], prior_n {:.2}",
        common,
        trended.iter().copied().fold(f64::INFINITY, f64::min),
        trended.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        prior_n
    );

    Ok(DispersionEstimates {
        common,
        trended,
        tagwise,
        prior_n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_grid_matches_log2_scale() {
        let params = DispersionParams::default();
        let (points, grid) = dispersion_grid(&params);
        assert_eq!(points.len(), 11);
        assert_eq!(points[0], -10.0);
        assert_eq!(points[10], 10.0);
        assert!((grid[5] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_maximize_interpolant_parabola() {
        let x = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        let y: Vec<f64> = x.iter().map(|v: &f64| -(v - 0.3).powi(2)).collect();
        assert!((maximize_interpolant(&x, &y) - 0.3).abs() < 1e-10);
        // increasing function peaks at the boundary
        assert_eq!(maximize_interpolant(&x, &x), 2.0);
    }

    #[test]
    fn test_moving_average_preserves_row_order() {
        let values = array![[3.0], [1.0], [2.0]];
        let order = vec![1, 2, 0];
        let avg = moving_average_by_rows(&values, &order, 3);
        for v in avg.iter() {
            assert!((v - 2.0).abs() < 1e-12);
        }
        let same = moving_average_by_rows(&values, &order, 1);
        assert_eq!(same, values);
    }

    #[test]
    fn test_overdispersed_counts_give_larger_dispersion() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let quiet = array![[100.0, 102.0, 98.0, 101.0, 99.0, 100.0]];
        let noisy = array![[40.0, 180.0, 90.0, 30.0, 200.0, 100.0]];
        let offsets = Array2::zeros((1, 6));
        let params = DispersionParams {
            prior_df: 0.0,
            ..Default::default()
        };
        let a = estimate_dispersions(quiet.view(), &design, offsets.view(), &[5.0], &params).unwrap();
        let b = estimate_dispersions(noisy.view(), &design, offsets.view(), &[5.0], &params).unwrap();
        assert!(b.tagwise[0] > 10.0 * a.tagwise[0]);
        assert!(b.common > 0.1);
    }
}
