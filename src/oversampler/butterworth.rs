use std::f64;

use crate::{
    utils::{flush_denormal, DENORMAL_THRESHOLD},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Q values of the two second order sections of a 4-pole Butterworth response.
const SECTION_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_8];

// -------------------------------------------------------------------------------------------------

/// Low-pass coefficients of a single state variable filter section.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct SectionCoefficients {
    a1: f64,
    a2: f64,
    a3: f64,
}

impl SectionCoefficients {
    fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let g = f64::tan(f64::consts::PI * cutoff / sample_rate);
        let k = 1.0 / q;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        Self { a1, a2, a3 }
    }
}

// -------------------------------------------------------------------------------------------------

/// Coefficients of a 4-pole (24 dB/octave) Butterworth low-pass, built from two cascaded
/// state variable filter sections.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ButterworthCoefficients {
    sections: [SectionCoefficients; 2],
}

impl ButterworthCoefficients {
    /// Create low-pass coefficients for the given sample rate and cutoff in Hz.
    pub fn lowpass(sample_rate: f64, cutoff: f64) -> Result<Self, Error> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid filter sample-rate: must be > 0, but is {sample_rate}"
            )));
        }
        if !(cutoff > 0.0 && cutoff < sample_rate / 2.0) {
            return Err(Error::ParameterError(format!(
                "Invalid filter frequency: must be in range (0, {n}), but is {cutoff}",
                n = sample_rate / 2.0
            )));
        }
        Ok(Self {
            sections: SECTION_Q.map(|q| SectionCoefficients::lowpass(sample_rate, cutoff, q)),
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Filter state for [`ButterworthCoefficients`].
///
/// Each section is a trapezoidal integrated state variable filter (Andrew Simper, Cytomic),
/// which stays stable and keeps precision at high oversampled rates.
#[derive(Debug, Default, Clone)]
pub struct ButterworthFilter {
    ic1eq: [f64; 2],
    ic2eq: [f64; 2],
}

impl ButterworthFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, coefficients: &ButterworthCoefficients, input: f32) -> f32 {
        let mut value = input as f64;
        for (section, c) in coefficients.sections.iter().enumerate() {
            let v3 = value - self.ic2eq[section];
            let v1 = c.a1 * self.ic1eq[section] + c.a2 * v3;
            let v2 = self.ic2eq[section] + c.a2 * self.ic1eq[section] + c.a3 * v3;
            self.ic1eq[section] = 2.0 * v1 - self.ic1eq[section];
            self.ic2eq[section] = 2.0 * v2 - self.ic2eq[section];
            value = v2;
        }
        let output = flush_denormal(value as f32);
        if output == 0.0 {
            self.flush_denormals();
        }
        output
    }

    /// Reset state of filter.
    #[inline]
    pub fn reset(&mut self) {
        self.ic1eq = [0.0; 2];
        self.ic2eq = [0.0; 2];
    }

    fn flush_denormals(&mut self) {
        for state in self.ic1eq.iter_mut().chain(self.ic2eq.iter_mut()) {
            if state.abs() < DENORMAL_THRESHOLD as f64 {
                *state = 0.0;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_gain(coefficients: &ButterworthCoefficients, sample_rate: f64, freq: f64) -> f32 {
        let mut filter = ButterworthFilter::new();
        let mut peak = 0.0f32;
        let num_samples = (sample_rate * 0.1) as usize;
        for i in 0..num_samples {
            let input = (2.0 * f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32;
            let output = filter.process_sample(coefficients, input);
            if i > num_samples / 2 {
                peak = peak.max(output.abs());
            }
        }
        peak
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(ButterworthCoefficients::lowpass(0.0, 1000.0).is_err());
        assert!(ButterworthCoefficients::lowpass(44100.0, 30000.0).is_err());
        assert!(ButterworthCoefficients::lowpass(44100.0, 1000.0).is_ok());
    }

    #[test]
    fn lowpass_response() {
        let sample_rate = 88200.0;
        let coefficients = ButterworthCoefficients::lowpass(sample_rate, 19845.0).unwrap();
        // passband
        assert!((sine_gain(&coefficients, sample_rate, 1000.0) - 1.0).abs() < 0.01);
        // -3 dB at cutoff
        let cutoff_gain = sine_gain(&coefficients, sample_rate, 19845.0);
        assert!((cutoff_gain - 0.707).abs() < 0.05, "got {cutoff_gain}");
        // stopband
        assert!(sine_gain(&coefficients, sample_rate, 40000.0) < 0.1);
    }

    #[test]
    fn silence_decays_to_zero() {
        let coefficients = ButterworthCoefficients::lowpass(48000.0, 10000.0).unwrap();
        let mut filter = ButterworthFilter::new();
        let _ = filter.process_sample(&coefficients, 1.0);
        let mut output = 1.0;
        for _ in 0..100_000 {
            output = filter.process_sample(&coefficients, 0.0);
        }
        assert_eq!(output, 0.0);
    }
}
