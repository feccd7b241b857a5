//! Gene filtering before model fitting

mod expression;

pub use expression::{filter_analysis_set, filter_by_expression, min_samples_for_groups};
