//! Probability weighting function
//!
//! Fits the probability that a gene is called DE as a monotone function of a
//! bias covariate (transcript length or GC content). Genes are ranked by the
//! covariate and binned; the per-bin DE fraction is smoothed by weighted
//! isotonic regression and linearly interpolated back to each gene.

use crate::error::{DgeError, Result};
use crate::stats::{pearson_correlation, quantile};

/// Weights are kept strictly inside (0, 1)
pub const PWF_EPS: f64 = 1e-6;

/// Weighted pool-adjacent-violators fit of a non-decreasing sequence
pub fn isotonic_regression(y: &[f64], w: &[f64]) -> Vec<f64> {
    // (weighted sum, total weight, run length)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(y.len());
    for (&yi, &wi) in y.iter().zip(w) {
        blocks.push((wi * yi, wi, 1));
        while blocks.len() >= 2 {
            let (s2, w2, n2) = blocks[blocks.len() - 1];
            let (s1, w1, n1) = blocks[blocks.len() - 2];
            if s1 / w1 <= s2 / w2 {
                break;
            }
            blocks.pop();
            let last = blocks.len() - 1;
            blocks[last] = (s1 + s2, w1 + w2, n1 + n2);
        }
    }
    blocks
        .into_iter()
        .flat_map(|(s, w, n)| std::iter::repeat(s / w).take(n))
        .collect()
}

/// Linear interpolation through (xs, ys), constant beyond the ends.
/// `xs` must be sorted ascending.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let k = xs.partition_point(|&v| v < x);
    if k == 0 {
        return ys[0];
    }
    if k == xs.len() {
        return ys[xs.len() - 1];
    }
    let (x0, x1) = (xs[k - 1], xs[k]);
    if x1 <= x0 {
        return ys[k];
    }
    ys[k - 1] + (ys[k] - ys[k - 1]) * (x - x0) / (x1 - x0)
}

/// Per-gene DE probability given the bias covariate.
///
/// `covariate` entries that are `None` or non-finite receive the median
/// weight of the other genes. With no usable covariate at all every gene
/// gets the overall DE fraction.
pub fn probability_weighting(de: &[bool], covariate: &[Option<f64>], bin_size: usize) -> Result<Vec<f64>> {
    if de.len() != covariate.len() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} covariate values", de.len()),
            got: format!("{} covariate values", covariate.len()),
        });
    }
    if de.is_empty() {
        return Err(DgeError::EmptyData {
            reason: "no genes to weight".to_string(),
        });
    }
    let bin_size = bin_size.max(1);
    let overall = de.iter().filter(|&&d| d).count() as f64 / de.len() as f64;

    let mut known: Vec<(f64, bool)> = covariate
        .iter()
        .zip(de)
        .filter_map(|(c, &d)| c.filter(|v| v.is_finite()).map(|v| (v, d)))
        .collect();
    if known.is_empty() {
        log::warn!("No gene has a bias covariate value; using a constant weighting function");
        return Ok(vec![overall.clamp(PWF_EPS, 1.0 - PWF_EPS); de.len()]);
    }
    known.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut centers = Vec::new();
    let mut fractions = Vec::new();
    let mut weights = Vec::new();
    for bin in known.chunks(bin_size) {
        let n = bin.len() as f64;
        centers.push(bin.iter().map(|(v, _)| v).sum::<f64>() / n);
        fractions.push(bin.iter().filter(|(_, d)| *d).count() as f64 / n);
        weights.push(n);
    }

    let x: Vec<f64> = known.iter().map(|(v, _)| *v).collect();
    let y: Vec<f64> = known.iter().map(|(_, d)| if *d { 1.0 } else { 0.0 }).collect();
    let increasing = !(pearson_correlation(&x, &y) < 0.0);
    let fitted = if increasing {
        isotonic_regression(&fractions, &weights)
    } else {
        let negated: Vec<f64> = fractions.iter().map(|f| -f).collect();
        isotonic_regression(&negated, &weights).into_iter().map(|f| -f).collect()
    };

    log::debug!(
        "PWF: {} bins over {} genes, {} in the covariate",
        centers.len(),
        known.len(),
        if increasing { "increasing" } else { "decreasing" }
    );

    let mut pwf: Vec<f64> = covariate
        .iter()
        .map(|c| match c {
            Some(v) if v.is_finite() => interpolate(&centers, &fitted, *v).clamp(PWF_EPS, 1.0 - PWF_EPS),
            _ => f64::NAN,
        })
        .collect();
    if pwf.iter().any(|w| w.is_nan()) {
        let fill = quantile(&pwf, 0.5);
        for w in pwf.iter_mut().filter(|w| w.is_nan()) {
            *w = fill;
        }
    }
    Ok(pwf)
}
