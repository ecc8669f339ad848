//! Derivation of LSH parameters from target error bounds.
//!
//! Given a Jaccard threshold and maximum tolerated false-negative and
//! false-positive probabilities, [`find_optimal_config`] searches for the
//! smallest `(n_hashes, n_bands, rows_per_band)` triple meeting both bounds.
//! The probabilities come from integrating the S-curve of the banding
//! technique:
//!
//! ```text
//! P_match(s) = 1 - (1 - s^R)^B
//! P_FP = integral of P_match over [0, threshold]
//! P_FN = integral of (1 - P_match) over [threshold, 1]
//! ```

use quadrature::integrate;
use tracing::warn;

use crate::lsh::LshConfig;

/// Hard cap on the number of hash permutations the search will try.
const MAX_N_HASHES: u64 = 16384;

/// Target absolute error for the quadrature. The decision margins of the
/// search are no tighter than 1e-3, so this leaves plenty of headroom.
const INTEGRATION_TARGET_ERROR: f64 = 1e-9;

/// Find the smallest LSH configuration meeting the given error bounds.
///
/// The number of hashes starts at 2 and doubles until the false-positive
/// bound is met, capped at 16384. For each candidate size, the band count is
/// the smallest one keeping the false-negative probability under its bound
/// (`rows_per_band` is the integer quotient, so `n_bands * rows_per_band`
/// may round down below `n_hashes`). Unreachable bounds are logged as
/// warnings and the best configuration so far is returned.
pub fn find_optimal_config(
    jaccard_threshold: f64,
    max_false_negative_proba: f64,
    max_false_positive_proba: f64,
) -> LshConfig {
    let mut n_hashes: u64 = 2;
    let (mut n_bands, mut rows_per_band) =
        params_given_false_negative_proba(jaccard_threshold, n_hashes, max_false_negative_proba);
    let mut fp = false_positive_probability(jaccard_threshold, n_bands, rows_per_band);
    while fp > max_false_positive_proba {
        n_hashes *= 2;
        (n_bands, rows_per_band) = params_given_false_negative_proba(
            jaccard_threshold,
            n_hashes,
            max_false_negative_proba,
        );
        fp = false_positive_probability(jaccard_threshold, n_bands, rows_per_band);
        if n_hashes >= MAX_N_HASHES {
            if fp > max_false_positive_proba {
                warn!(
                    n_hashes,
                    false_positive_proba = fp,
                    "unable to reach error thresholds, taking the best value"
                );
            }
            break;
        }
    }
    LshConfig {
        n_hashes: n_hashes as u32,
        n_bands: n_bands as u32,
        rows_per_band: rows_per_band as u32,
    }
}

/// Smallest band count keeping the false-negative probability under the
/// bound, for a fixed number of hashes. More bands mean more candidates and
/// fewer misses, so the scan stops at the first count loose enough.
fn params_given_false_negative_proba(
    threshold: f64,
    n_hashes: u64,
    max_false_negative_proba: f64,
) -> (u64, u64) {
    for n_bands in 1..=n_hashes {
        let rows_per_band = n_hashes / n_bands;
        let fn_proba = false_negative_probability(threshold, n_bands, rows_per_band);
        if fn_proba <= max_false_negative_proba {
            return (n_bands, rows_per_band);
        }
    }
    warn!(
        n_hashes,
        "unable to reach max_false_negative_proba, taking the maximum number of bands \
         to maximize the number of candidates returned"
    );
    (n_hashes, 1)
}

pub(crate) fn false_positive_probability(threshold: f64, n_bands: u64, rows_per_band: u64) -> f64 {
    let proba = |s: f64| 1.0 - (1.0 - s.powi(rows_per_band as i32)).powf(n_bands as f64);
    integrate(proba, 0.0, threshold, INTEGRATION_TARGET_ERROR).integral
}

pub(crate) fn false_negative_probability(threshold: f64, n_bands: u64, rows_per_band: u64) -> f64 {
    let proba = |s: f64| (1.0 - s.powi(rows_per_band as i32)).powf(n_bands as f64);
    integrate(proba, threshold, 1.0, INTEGRATION_TARGET_ERROR).integral
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_bounds_need_many_hashes() {
        let config = find_optimal_config(0.5, 0.05, 0.05);
        assert_eq!(config, LshConfig::new(128, 22, 5));
        assert!(false_negative_probability(0.5, 22, 5) <= 0.05);
        assert!(false_positive_probability(0.5, 22, 5) <= 0.05);
    }

    #[test]
    fn trivial_bounds_stop_at_the_smallest_size() {
        let config = find_optimal_config(0.5, 1.0, 1.0);
        assert_eq!(config, LshConfig::new(2, 1, 2));
    }

    #[test]
    fn unreachable_false_negative_bound_maximizes_bands() {
        let config = find_optimal_config(0.5, -1.0, 0.2);
        assert_eq!(config, LshConfig::new(16384, 16384, 1));
    }

    #[test]
    fn unreachable_false_positive_bound_maximizes_rows() {
        let config = find_optimal_config(0.5, 1.0, -1.0);
        assert_eq!(config, LshConfig::new(16384, 1, 16384));
    }

    #[test]
    fn default_store_parameters() {
        let config = find_optimal_config(0.75, 0.05, 0.05);
        assert_eq!(config, LshConfig::new(64, 7, 9));
    }
}
