//! Normalization of RNA-seq count data

mod counts;
mod cqn;
mod quantile_regression;

pub use counts::{ave_log_cpm, cpm, log_cpm, PRIOR_COUNT};
pub use cqn::{cqn, quantile_normalize, CqnParams, CqnResult};
pub use quantile_regression::{quantile_loss, quantile_regression, QuantileRegressionParams};
