//! Shared math helpers and small DSP building blocks.

pub mod delay;
pub mod random;
pub mod smoothing;
pub mod tempo;

use std::f32::consts::FRAC_PI_4;

// -------------------------------------------------------------------------------------------------

/// Level reported for silence, zero, negative or invalid gains.
pub const SILENCE_FLOOR_DB: f32 = -144.0;

/// Gains below this value are reported as [`SILENCE_FLOOR_DB`].
const SILENCE_FLOOR_GAIN: f32 = 6.309_573e-8; // 10^(-7.2)

/// Magnitudes below this value are flushed to zero in recursive filter paths.
pub const DENORMAL_THRESHOLD: f32 = 1e-15;

// -------------------------------------------------------------------------------------------------

/// Convert a linear gain to decibels.
///
/// Zero, negative, NaN and tiny gains map to [`SILENCE_FLOOR_DB`], unity gain maps to exactly
/// 0 dB and positive infinity stays infinite.
pub fn linear_to_db(value: f32) -> f32 {
    if value.is_nan() || value < SILENCE_FLOOR_GAIN {
        return SILENCE_FLOOR_DB;
    }
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    }
    (20.0 * value.log10()).max(SILENCE_FLOOR_DB)
}

/// Convert decibels to a linear gain.
///
/// NaN and negative infinity map to 0, 0 dB maps to exactly 1.0. Results stay finite for
/// every finite input in the usual audio range (±200 dB).
pub fn db_to_linear(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    if value == 0.0 {
        return 1.0; // avoid rounding errors at exactly 0 dB
    }
    10.0f32.powf(value / 20.0)
}

// -------------------------------------------------------------------------------------------------

/// Fast, branch free `tanh` approximation (clamped Padé approximant).
///
/// The result is bounded to \[-1, 1\] and stays within ~0.025 of `f32::tanh`.
#[inline(always)]
pub fn fast_tanh(x: f32) -> f32 {
    let x = x.clamp(-3.0, 3.0);
    let x2 = x * x;
    x * (27.0 + x2) / (27.0 + 9.0 * x2)
}

/// Flush values below [`DENORMAL_THRESHOLD`] to zero.
#[inline(always)]
pub fn flush_denormal(value: f32) -> f32 {
    if value.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        value
    }
}

/// Replace NaN or infinite samples with silence.
#[inline(always)]
pub fn sanitize_sample(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Constant power pan law: returns left and right gains for a pan value in range \[-1, 1\].
#[inline]
pub fn panning_factors(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lin_db_conversion() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(db_to_linear(0.0), 1.0);
        assert!((linear_to_db(db_to_linear(20.0)) - 20.0).abs() < 0.0001);
        assert!((linear_to_db(db_to_linear(-20.0)) + 20.0).abs() < 0.0001);
        assert!((db_to_linear(-6.0) - 0.501_187).abs() < 1e-5);
    }

    #[test]
    fn db_edge_cases() {
        assert_eq!(db_to_linear(f32::NAN), 0.0);
        assert_eq!(db_to_linear(f32::NEG_INFINITY), 0.0);
        assert!(db_to_linear(200.0).is_finite());
        assert!(db_to_linear(-200.0).is_finite());
        assert!(db_to_linear(-200.0) >= 0.0);

        assert_eq!(linear_to_db(0.0), SILENCE_FLOOR_DB);
        assert_eq!(linear_to_db(-1.0), SILENCE_FLOOR_DB);
        assert_eq!(linear_to_db(f32::NAN), SILENCE_FLOOR_DB);
        assert_eq!(linear_to_db(1e-10), SILENCE_FLOOR_DB);
        assert_eq!(linear_to_db(f32::INFINITY), f32::INFINITY);
    }

    #[test]
    fn fast_tanh_accuracy() {
        let mut x = -10.0f32;
        while x <= 10.0 {
            let approx = fast_tanh(x);
            assert!((-1.0..=1.0).contains(&approx));
            assert!((approx - x.tanh()).abs() < 0.03, "x={x}");
            x += 0.01;
        }
        assert_eq!(fast_tanh(0.0), 0.0);
        assert_eq!(fast_tanh(100.0), 1.0);
        assert_eq!(fast_tanh(-100.0), -1.0);
    }

    #[test]
    fn constant_power_pan() {
        let (l, r) = panning_factors(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
        let (l, r) = panning_factors(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = panning_factors(1.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn denormals_and_invalid_samples() {
        assert_eq!(flush_denormal(1e-20), 0.0);
        assert_eq!(flush_denormal(0.5), 0.5);
        assert_eq!(sanitize_sample(f32::NAN), 0.0);
        assert_eq!(sanitize_sample(f32::INFINITY), 0.0);
        assert_eq!(sanitize_sample(-0.25), -0.25);
    }
}
