//! P-value calculation from test statistics

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

/// Upper tail P(T > t) of Student's t with `df` degrees of freedom.
/// Infinite `df` is the standard normal.
pub fn upper_tail_t(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if df.is_infinite() {
        return match Normal::new(0.0, 1.0) {
            Ok(d) => d.sf(t),
            Err(_) => f64::NAN,
        };
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(d) => d.sf(t),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value of a t statistic
pub fn two_sided_t(t: f64, df: f64) -> f64 {
    (2.0 * upper_tail_t(t.abs(), df)).min(1.0)
}

/// Upper tail P(F > f) of the F distribution.
/// An infinite denominator df reduces to chi-squared(df1) / df1.
pub fn upper_tail_f(f: f64, df1: f64, df2: f64) -> f64 {
    if f.is_nan() || !(df1 > 0.0) || !(df2 > 0.0) {
        return f64::NAN;
    }
    if f <= 0.0 {
        return 1.0;
    }
    if df2.is_finite() {
        match FisherSnedecor::new(df1, df2) {
            Ok(d) => d.sf(f),
            Err(_) => f64::NAN,
        }
    } else {
        match ChiSquared::new(df1) {
            Ok(d) => d.sf(f * df1),
            Err(_) => f64::NAN,
        }
    }
}

/// TREAT p-value for an estimated effect against the null interval
/// [-threshold, threshold]:
/// P(T > (|b| - threshold) / se) + P(T > (|b| + threshold) / se).
pub fn treat_pvalue(effect: f64, se: f64, threshold: f64, df: f64) -> f64 {
    if !effect.is_finite() || !(se > 0.0) || !se.is_finite() {
        return f64::NAN;
    }
    let b = effect.abs();
    let p = upper_tail_t((b - threshold) / se, df) + upper_tail_t((b + threshold) / se, df);
    p.clamp(0.0, 1.0)
}
