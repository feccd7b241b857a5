//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod treat;

pub use fdr::benjamini_hochberg;
pub use pvalue::{treat_pvalue, two_sided_t, upper_tail_f, upper_tail_t};
pub use treat::treat;
