//! Component A — fixed-precision decimal arithmetic.
//!
//! Every monetary and price field in the data model (§3) is a
//! `rust_decimal::Decimal`; all comparisons on them are exact. Probabilities
//! and calibration math stay `f64` and are clamped before log/exp — the two
//! domains never mix except at an explicit boundary conversion, per the
//! floating-point policy in the design notes.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Price in (0, 1); money in USDC units. Both are plain `Decimal` aliases —
/// kept distinct at the type level only by name, the way the source system
/// treats them as the same underlying numeric kind with different domains.
pub type Price = Decimal;
pub type Money = Decimal;

/// Clamp a probability-like f64 into the numerically sensitive range used
/// throughout calibration (§3: "Probabilities are float-64 clamped to
/// [1e-7, 1-1e-7] in numerically sensitive paths").
pub const PROB_EPS: f64 = 1e-7;

pub fn clamp_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// Clamp used for calibration outputs specifically (§4.G: "All outputs are
/// clamped to [1e-4, 1-1e-4] before downstream use").
pub const CALIBRATION_EPS: f64 = 1e-4;

pub fn clamp_calibrated(p: f64) -> f64 {
    p.clamp(CALIBRATION_EPS, 1.0 - CALIBRATION_EPS)
}

/// Construct a `Decimal` from an f64 boundary value (e.g. a price read off
/// a JSON wire message) the way the design notes require: via explicit
/// construction, never a bare cast.
pub fn decimal_from_f64(v: f64) -> Option<Decimal> {
    Decimal::from_f64(v)
}

/// Inverse boundary conversion, used only where a downstream f64-only
/// computation (e.g. probability math) needs a decimal price as an input.
pub fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

pub fn bps(fraction: Decimal) -> Decimal {
    fraction * Decimal::from(10_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn clamp_prob_keeps_interior_values() {
        assert_eq!(clamp_prob(0.5), 0.5);
    }

    #[test]
    fn clamp_prob_clips_extremes() {
        assert_eq!(clamp_prob(0.0), PROB_EPS);
        assert_eq!(clamp_prob(1.0), 1.0 - PROB_EPS);
    }

    #[test]
    fn bps_conversion() {
        assert_eq!(bps(dec!(0.0198)), dec!(198.0));
    }

    #[test]
    fn boundary_roundtrip() {
        let d = decimal_from_f64(0.51).unwrap();
        assert!((decimal_to_f64(d) - 0.51).abs() < 1e-9);
    }
}
