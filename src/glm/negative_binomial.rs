//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means during IRLS
pub const MIN_MU: f64 = 1e-6;

/// Maximum eta value to prevent overflow (exp(700) ~ 1e304)
pub const MAX_ETA: f64 = 700.0;

/// Dispersions below this are treated as Poisson in the deviance
const POISSON_DISPERSION: f64 = 1e-8;

/// Mean of the negative binomial given the linear predictor and a natural
/// log offset: mu = exp(eta + offset)
pub fn nb_mean(eta: f64, offset: f64) -> f64 {
    (eta + offset).clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + phi * mu^2
pub fn nb_variance(mu: f64, phi: f64) -> f64 {
    mu + phi * mu * mu
}

/// Log-likelihood of a single observation with mean mu and dispersion phi
pub fn nb_log_likelihood(y: f64, mu: f64, phi: f64) -> f64 {
    if mu <= 0.0 {
        return if y == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }
    if phi <= POISSON_DISPERSION {
        return y * mu.ln() - mu - ln_gamma(y + 1.0);
    }

    let r = 1.0 / phi;
    ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0) + r * (r / (r + mu)).ln()
        + y * (mu / (r + mu)).ln()
}

/// IRLS working weight for the log link: W = mu / (1 + phi * mu)
pub fn nb_weight(mu: f64, phi: f64) -> f64 {
    mu / (1.0 + phi * mu)
}

/// Unit deviance 2 * (l(y; y) - l(y; mu)), Poisson limit for tiny phi
pub fn nb_unit_deviance(y: f64, mu: f64, phi: f64) -> f64 {
    let mu = mu.max(MIN_MU);
    let y_log_term = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
    let dev = if phi <= POISSON_DISPERSION {
        2.0 * (y_log_term - (y - mu))
    } else {
        let r = 1.0 / phi;
        2.0 * (y_log_term - (y + r) * ((y + r) / (mu + r)).ln())
    };
    dev.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean_with_offset() {
        let mu = nb_mean(2.0, 1000.0_f64.ln());
        assert!((mu - 1000.0 * 2.0_f64.exp()).abs() < 1e-6);
    }

    #[test]
    fn test_nb_variance() {
        assert!((nb_variance(10.0, 0.1) - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_nb_log_likelihood_poisson_limit() {
        let nb = nb_log_likelihood(5.0, 5.0, 1e-6);
        let pois = nb_log_likelihood(5.0, 5.0, 0.0);
        assert!((nb - pois).abs() < 1e-3);
        assert!(pois < 0.0);
    }

    #[test]
    fn test_nb_weight() {
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_unit_deviance_zero_at_fit() {
        assert!(nb_unit_deviance(12.0, 12.0, 0.2).abs() < 1e-12);
        assert!(nb_unit_deviance(0.0, 3.0, 0.0) > 0.0);
        // consistent with twice the log-likelihood ratio
        let (y, mu, phi) = (7.0, 4.0, 0.3);
        let lr = 2.0 * (nb_log_likelihood(y, y, phi) - nb_log_likelihood(y, mu, phi));
        assert!((nb_unit_deviance(y, mu, phi) - lr).abs() < 1e-9);
    }
}
