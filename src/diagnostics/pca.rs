//! Principal components of a genes x samples expression matrix

use ndarray::{Array1, Array2, Axis};

use crate::error::{DgeError, Result};

const MAX_ITER: usize = 1000;
const TOL: f64 = 1e-12;

/// Sample-space PCA
#[derive(Debug, Clone)]
pub struct Pca {
    /// samples x components
    pub scores: Array2<f64>,
    /// Eigenvalue of each component
    pub variances: Vec<f64>,
    /// Sum of all eigenvalues
    pub total_variance: f64,
}

impl Pca {
    pub fn n_components(&self) -> usize {
        self.variances.len()
    }

    pub fn variance_explained(&self, component: usize) -> f64 {
        if self.total_variance > 0.0 {
            self.variances[component] / self.total_variance
        } else {
            0.0
        }
    }
}

/// PCA with genes as variables centered across samples.
///
/// Eigenpairs of the samples x samples covariance are found by power
/// iteration with deflation; `n_components` is capped at `n_samples - 1`.
pub fn pca(values: &Array2<f64>, n_components: usize) -> Result<Pca> {
    let (n_genes, n_samples) = values.dim();
    if n_genes < 2 || n_samples < 2 {
        return Err(DgeError::EmptyData {
            reason: format!("PCA needs at least 2 genes and 2 samples, got {} x {}", n_genes, n_samples),
        });
    }

    let mut centered = values.clone();
    for mut row in centered.axis_iter_mut(Axis(0)) {
        let m = row.mean().unwrap_or(0.0);
        row.mapv_inplace(|v| v - m);
    }
    // samples x samples covariance
    let mut cov = centered.t().dot(&centered) / (n_genes as f64 - 1.0);
    let total_variance = cov.diag().sum();

    let k = n_components.min(n_samples - 1);
    let mut scores = Array2::zeros((n_samples, k));
    let mut variances = Vec::with_capacity(k);

    for c in 0..k {
        // deterministic start that is not orthogonal to the leading vector
        let mut v = Array1::from_iter((0..n_samples).map(|j| 1.0 + (j as f64 + 1.0) * (c as f64 + 1.0).sqrt()));
        v /= v.dot(&v).sqrt();
        let mut lambda = 0.0;
        for _ in 0..MAX_ITER {
            let w = cov.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm <= f64::EPSILON {
                lambda = 0.0;
                break;
            }
            let next = &w / norm;
            let delta = (&next - &v).mapv(f64::abs).sum().min((&next + &v).mapv(f64::abs).sum());
            v = next;
            lambda = norm;
            if delta < TOL {
                break;
            }
        }
        // projections of the samples onto the component
        for j in 0..n_samples {
            scores[[j, c]] = v[j] * lambda.max(0.0).sqrt();
        }
        variances.push(lambda);
        for a in 0..n_samples {
            for b in 0..n_samples {
                cov[[a, b]] -= lambda * v[a] * v[b];
            }
        }
    }

    Ok(Pca {
        scores,
        variances,
        total_variance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rank_one_structure() {
        // samples 1-2 versus 3-4 along a single axis
        let values = array![[1.0, 1.0, -1.0, -1.0], [2.0, 2.0, -2.0, -2.0], [0.5, 0.5, -0.5, -0.5]];
        let res = pca(&values, 3).unwrap();
        assert_eq!(res.n_components(), 3);
        assert!((res.variance_explained(0) - 1.0).abs() < 1e-9);
        let s = res.scores.column(0);
        assert!(s[0] * s[2] < 0.0);
        assert!((s[0] - s[1]).abs() < 1e-9);
    }

    #[test]
    fn test_variances_descending() {
        let values = array![
            [5.0, 1.0, 3.0, 2.0, 4.0],
            [1.0, 2.0, 1.5, 3.0, 0.5],
            [2.0, 2.5, 2.0, 1.0, 3.5],
            [0.0, 1.0, 4.0, 2.0, 1.0],
            [3.0, 3.0, 1.0, 0.0, 2.0]
        ];
        let res = pca(&values, 10).unwrap();
        assert_eq!(res.n_components(), 4);
        assert!(res.variances.windows(2).all(|w| w[0] >= w[1] - 1e-6));
        let explained: f64 = (0..4).map(|c| res.variance_explained(c)).sum();
        assert!(explained <= 1.0 + 1e-6);
    }
}
