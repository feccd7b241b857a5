//! Counts-per-million transformations
//!
//! CPM for filtering and log-CPM with a library-scaled prior count for
//! abundance summaries. The prior added to each count is
//! `prior_count * lib / mean(lib)` and the library grows by twice that.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{DgeError, Result};

/// Default prior count for log-CPM
pub const PRIOR_COUNT: f64 = 2.0;

fn check_libraries(n_samples: usize, lib_sizes: &[f64]) -> Result<()> {
    if lib_sizes.len() != n_samples {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }
    if let Some(bad) = lib_sizes.iter().position(|&l| !(l > 0.0) || !l.is_finite()) {
        return Err(DgeError::EmptyData {
            reason: format!("sample {} has library size {}", bad + 1, lib_sizes[bad]),
        });
    }
    Ok(())
}

/// Counts per million over the column sums: `c * 1e6 / lib`.
/// A sample with an empty library has CPM 0 throughout.
pub fn cpm(counts: ArrayView2<f64>) -> Array2<f64> {
    let mut result = counts.to_owned();
    for mut col in result.axis_iter_mut(Axis(1)) {
        let lib = col.sum();
        if lib > 0.0 {
            col.mapv_inplace(|c| c * 1e6 / lib);
        } else {
            col.fill(0.0);
        }
    }
    result
}

/// log2 CPM with a library-scaled prior count
pub fn log_cpm(counts: ArrayView2<f64>, lib_sizes: &[f64], prior_count: f64) -> Result<Array2<f64>> {
    check_libraries(counts.ncols(), lib_sizes)?;
    let mean_lib = lib_sizes.iter().sum::<f64>() / lib_sizes.len() as f64;
    let mut result = counts.to_owned();
    for (mut col, &lib) in result.axis_iter_mut(Axis(1)).zip(lib_sizes) {
        let prior = prior_count * lib / mean_lib;
        let denom = lib + 2.0 * prior;
        col.mapv_inplace(|c| ((c + prior) / denom * 1e6).log2());
    }
    Ok(result)
}

/// Average log2 CPM per gene with per-entry effective library sizes (for
/// example `exp(glm_offset) * 1e6` after normalization)
pub fn ave_log_cpm(counts: ArrayView2<f64>, effective_libs: ArrayView2<f64>, prior_count: f64) -> Result<Vec<f64>> {
    if counts.dim() != effective_libs.dim() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{:?} library sizes", counts.dim()),
            got: format!("{:?} library sizes", effective_libs.dim()),
        });
    }
    let n_samples = counts.ncols() as f64;
    let mean_lib = effective_libs.mean().unwrap_or(f64::NAN);
    Ok(counts
        .outer_iter()
        .zip(effective_libs.outer_iter())
        .map(|(row, libs)| {
            let avg = row
                .iter()
                .zip(libs.iter())
                .map(|(&c, &lib)| {
                    let prior = prior_count * lib / mean_lib;
                    (c + prior) / (lib + 2.0 * prior)
                })
                .sum::<f64>()
                / n_samples;
            (avg * 1e6).log2()
        })
        .collect())
}
