//! Input data structures and their validated join

mod analysis;
mod annotation;
mod count_matrix;
mod gene_sets;
mod metadata;

pub use analysis::AnalysisSet;
pub use annotation::{Gene, GeneAnnotation};
pub use count_matrix::CountMatrix;
pub use gene_sets::{GeneSet, GeneSetCollection, MembershipRow};
pub use metadata::{Sample, SampleSheet};
