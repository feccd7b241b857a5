//! Benjamini-Hochberg false discovery rate adjustment

/// Benjamini-Hochberg adjusted p-values.
///
/// Non-finite p-values are left as NaN and do not count towards the number
/// of tests. Ties keep their input order.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut indices: Vec<usize> = (0..n).filter(|&i| pvalues[i].is_finite()).collect();
    indices.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    for (rank, &i) in indices.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.02), "BH") = 0.04 0.04 0.04 0.04
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }
        let padj = benjamini_hochberg(&[0.001, 0.5, 0.02]);
        assert!((padj[0] - 0.003).abs() < 1e-12);
        assert!((padj[2] - 0.03).abs() < 1e-12);
        assert!((padj[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        // three tests, not four
        assert!((padj[0] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bh_monotone_in_pvalue() {
        let pvalues = vec![0.2, 0.001, 0.7, 0.04, 0.04, 0.9, 0.013, 0.5];
        let padj = benjamini_hochberg(&pvalues);
        let mut order: Vec<usize> = (0..pvalues.len()).collect();
        order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));
        for w in order.windows(2) {
            assert!(padj[w[0]] <= padj[w[1]]);
        }
        for (p, adj) in pvalues.iter().zip(&padj) {
            assert!(adj >= p && *adj <= 1.0);
        }
    }

    #[test]
    fn test_bh_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
