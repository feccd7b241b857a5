//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)
//!
//! Each gene is fitted independently with its own dispersion and a full
//! genes x samples matrix of natural-log offsets, so library size and any
//! gene-specific normalization enter the model the same way.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_unit_deviance, nb_weight, MIN_MU};
use crate::error::{DgeError, Result};
use crate::stats::{invert_symmetric_matrix, log_det_symmetric, weighted_least_squares, weighted_normal_equations};

/// Coefficients beyond this magnitude (natural log) mean the fit is diverging
const MAX_BETA: f64 = 30.0;

/// Maximum step halvings when an IRLS update increases the deviance
const MAX_HALVINGS: usize = 20;

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            tol: 1e-8,
        }
    }
}

/// Fit of a single gene
#[derive(Debug, Clone)]
pub struct GeneFit {
    /// Coefficients on the natural log scale
    pub coefficients: Vec<f64>,
    /// (X'WX)^-1 stored flat row-major: element (i,j) = covariance[i * n_coefs + j]
    pub covariance: Vec<f64>,
    pub n_coefs: usize,
    pub converged: bool,
    /// Fitted means
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub log_likelihood: f64,
    /// log det(X'WX) at the fitted means, for the Cox-Reid adjustment
    pub log_det_information: f64,
}

impl GeneFit {
    /// Cox-Reid adjusted profile log-likelihood of the fitted dispersion
    pub fn adjusted_profile_likelihood(&self) -> f64 {
        self.log_likelihood - 0.5 * self.log_det_information
    }

    /// Unscaled variance of one coefficient
    pub fn unscaled_variance(&self, coef: usize) -> f64 {
        self.covariance[coef * self.n_coefs + coef]
    }
}

/// Fits of all genes, assembled by gene index
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// Genes x coefficients, natural log scale; NaN where not converged
    pub coefficients: Array2<f64>,
    /// Genes x coefficients diagonal of (X'WX)^-1
    pub unscaled_variances: Array2<f64>,
    /// Genes x samples fitted means
    pub mu: Array2<f64>,
    pub deviance: Vec<f64>,
    pub converged: Vec<bool>,
    /// Dispersion each gene was fitted with
    pub dispersions: Vec<f64>,
    pub df_residual: usize,
}

impl GlmFit {
    pub fn n_genes(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn n_converged(&self) -> usize {
        self.converged.iter().filter(|&&c| c).count()
    }
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], row: usize) -> f64 {
    (0..design.ncols()).map(|j| design[[row, j]] * beta[j]).sum()
}

fn fitted_means(design: &Array2<f64>, beta: &[f64], offsets: ArrayView1<f64>) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| nb_mean(linear_predictor(design, beta, i), offsets[i]).max(MIN_MU))
        .collect()
}

fn total_deviance(counts: ArrayView1<f64>, mu: &[f64], phi: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| nb_unit_deviance(y, m, phi))
        .sum()
}

/// Fit one gene by IRLS with step halving.
///
/// `offsets` are natural-log and enter as mu = exp(X beta + offset).
/// Convergence is tested on |dev - dev_old| / (|dev| + 0.1).
pub fn fit_single_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    offsets: ArrayView1<f64>,
    phi: f64,
    params: &GlmFitParams,
) -> GeneFit {
    let n_samples = counts.len();
    let n_coefs = design.ncols();

    // Start from least squares on log(y + 0.5) - offset
    let start: Vec<f64> = counts
        .iter()
        .zip(offsets.iter())
        .map(|(&y, &o)| (y + 0.5).ln() - o)
        .collect();
    let mut beta = weighted_least_squares(design, &vec![1.0; n_samples], &start);
    if beta.iter().any(|b| !b.is_finite()) {
        beta = vec![0.0; n_coefs];
    }

    let mut mu = fitted_means(design, &beta, offsets);
    let mut dev_old = total_deviance(counts, &mu, phi);
    let mut converged = false;

    let mut weights = vec![0.0; n_samples];
    let mut working_response = vec![0.0; n_samples];

    for _iter in 0..params.maxit {
        for i in 0..n_samples {
            weights[i] = nb_weight(mu[i], phi);
            working_response[i] = linear_predictor(design, &beta, i) + (counts[i] - mu[i]) / mu[i];
        }

        let target = weighted_least_squares(design, &weights, &working_response);
        if target.iter().any(|b| !b.is_finite()) {
            break;
        }

        // Halve the step until the deviance does not increase
        let mut step = 1.0;
        let mut candidate = target.clone();
        let mut candidate_mu = fitted_means(design, &candidate, offsets);
        let mut dev = total_deviance(counts, &candidate_mu, phi);
        let mut halvings = 0;
        while (!dev.is_finite() || dev > dev_old + 1e-10 * (dev_old.abs() + 1.0)) && halvings < MAX_HALVINGS {
            step *= 0.5;
            candidate = beta
                .iter()
                .zip(&target)
                .map(|(&b, &t)| b + step * (t - b))
                .collect();
            candidate_mu = fitted_means(design, &candidate, offsets);
            dev = total_deviance(counts, &candidate_mu, phi);
            halvings += 1;
        }

        beta = candidate;
        mu = candidate_mu;

        if beta.iter().any(|&b| b.abs() > MAX_BETA) || !dev.is_finite() {
            break;
        }

        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        dev_old = dev;
        if conv_test < params.tol {
            converged = true;
            break;
        }
    }

    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, phi)).collect();
    let (xtwx, _) = weighted_normal_equations(design, &weights, &vec![0.0; n_samples]);
    let covariance = invert_symmetric_matrix(&xtwx, n_coefs);
    let log_det_information = log_det_symmetric(&xtwx, n_coefs);
    let log_likelihood = counts
        .iter()
        .zip(&mu)
        .map(|(&y, &m)| nb_log_likelihood(y, m, phi))
        .sum();

    GeneFit {
        coefficients: beta,
        covariance,
        n_coefs,
        converged,
        deviance: total_deviance(counts, &mu, phi),
        mu,
        log_likelihood,
        log_det_information,
    }
}

/// Fit every gene in parallel with its own dispersion.
///
/// Non-convergence is recorded per gene; those genes get NaN coefficients
/// and variances but keep their deviance for inspection.
pub fn fit_glm(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    offsets: ArrayView2<f64>,
    dispersions: &[f64],
    params: &GlmFitParams,
) -> Result<GlmFit> {
    let (n_genes, n_samples) = counts.dim();
    if offsets.dim() != counts.dim() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} x {} offsets", n_genes, n_samples),
            got: format!("{} x {} offsets", offsets.nrows(), offsets.ncols()),
        });
    }
    if design.nrows() != n_samples {
        return Err(DgeError::DimensionMismatch {
            expected: format!("design with {} rows", n_samples),
            got: format!("design with {} rows", design.nrows()),
        });
    }
    if dispersions.len() != n_genes {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} dispersions", n_genes),
            got: format!("{} dispersions", dispersions.len()),
        });
    }

    let n_coefs = design.ncols();
    let results: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| fit_single_gene(counts.row(i), design, offsets.row(i), dispersions[i], params))
        .collect();

    let mut coefficients = Array2::from_elem((n_genes, n_coefs), f64::NAN);
    let mut unscaled_variances = Array2::from_elem((n_genes, n_coefs), f64::NAN);
    let mut mu = Array2::zeros((n_genes, n_samples));
    let mut deviance = Vec::with_capacity(n_genes);
    let mut converged = Vec::with_capacity(n_genes);

    for (i, fit) in results.into_iter().enumerate() {
        if fit.converged {
            for j in 0..n_coefs {
                coefficients[[i, j]] = fit.coefficients[j];
                unscaled_variances[[i, j]] = fit.unscaled_variance(j);
            }
        }
        for j in 0..n_samples {
            mu[[i, j]] = fit.mu[j];
        }
        deviance.push(fit.deviance);
        converged.push(fit.converged);
    }

    let n_failed = converged.iter().filter(|&&c| !c).count();
    if n_failed > 0 {
        log::warn!("{} genes did not converge in the GLM fit and will be reported as NA", n_failed);
    }

    Ok(GlmFit {
        coefficients,
        unscaled_variances,
        mu,
        deviance,
        converged,
        dispersions: dispersions.to_vec(),
        df_residual: n_samples - n_coefs,
    })
}
