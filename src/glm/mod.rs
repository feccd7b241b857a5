//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
mod negative_binomial;

pub use design::{check_full_rank, PairedDesign};
pub use fitting::{fit_glm, fit_single_gene, GeneFit, GlmFit, GlmFitParams};
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_unit_deviance, nb_variance, nb_weight, MAX_ETA, MIN_MU};
