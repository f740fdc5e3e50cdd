use std::f32::consts::FRAC_PI_2;

use crate::utils::{delay::DelayLine, sanitize_sample};

// -------------------------------------------------------------------------------------------------

/// Max delay window of the moving read taps.
const WINDOW_MS: f64 = 50.0;
/// Upper bound of the crossfade length between the two read taps.
const MAX_CROSSFADE_MS: f64 = 10.0;
/// Ratios closer to 1 than this are passed through without processing.
const UNITY_TOLERANCE: f32 = 1e-4;
/// Closest distance of a read tap to the write head.
const MIN_DELAY: f32 = 1.0;

// -------------------------------------------------------------------------------------------------

/// Zero latency, delay line based pitch shifter.
///
/// Two read taps move through a short delay window at `1 - ratio` samples per sample. When the
/// active tap is about to leave the window, the other tap restarts at the opposite end of the
/// window and the output crossfades to it with a constant power (half-sine) curve.
///
/// Pitch ratios within 1e-4 of unity pass the input through unchanged.
#[derive(Debug, Clone)]
pub struct SimplePitchShifter {
    delay_line: DelayLine,
    window_samples: f32,
    crossfade_samples: f32,
    taps: [f32; 2],
    active_tap: usize,
    crossfade_pos: Option<f32>,
    prepared: bool,
}

impl SimplePitchShifter {
    pub fn new() -> Self {
        Self {
            delay_line: DelayLine::default(),
            window_samples: 0.0,
            crossfade_samples: 0.0,
            taps: [MIN_DELAY; 2],
            active_tap: 0,
            crossfade_pos: None,
            prepared: false,
        }
    }

    /// Allocate the delay window for the given sample rate. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f64) {
        let window_samples = (WINDOW_MS * 0.001 * sample_rate).ceil().max(8.0);
        self.delay_line.allocate(window_samples as usize + 2);
        self.window_samples = window_samples as f32;
        self.crossfade_samples = (MAX_CROSSFADE_MS * 0.001 * sample_rate)
            .min(window_samples / 4.0)
            .max(1.0) as f32;
        self.prepared = true;
        self.reset();
    }

    /// True after [`Self::prepare`] got called.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Clear the delay window and restart the read taps.
    pub fn reset(&mut self) {
        self.delay_line.flush();
        self.taps = [MIN_DELAY; 2];
        self.active_tap = 0;
        self.crossfade_pos = None;
    }

    /// Process a single sample with the given pitch ratio.
    #[inline]
    pub fn process_sample(&mut self, input: f32, ratio: f32) -> f32 {
        let input = sanitize_sample(input);
        self.delay_line.write(input);
        if !self.prepared || (ratio - 1.0).abs() < UNITY_TOLERANCE || !ratio.is_finite() {
            return input;
        }

        // delay change per sample: < 0 when shifting up, > 0 when shifting down
        let rate = 1.0 - ratio;
        let max_delay = self.window_samples;
        let active = self.active_tap;
        let other = 1 - active;

        self.taps[active] = (self.taps[active] + rate).clamp(MIN_DELAY, max_delay);
        if self.crossfade_pos.is_some() {
            self.taps[other] = (self.taps[other] + rate).clamp(MIN_DELAY, max_delay);
        } else {
            let remaining = if rate < 0.0 {
                (self.taps[active] - MIN_DELAY) / -rate
            } else {
                (max_delay - self.taps[active]) / rate
            };
            if remaining <= self.crossfade_samples {
                self.taps[other] = if rate < 0.0 { max_delay } else { MIN_DELAY };
                self.crossfade_pos = Some(0.0);
            }
        }

        match self.crossfade_pos {
            Some(pos) => {
                let phase = pos / self.crossfade_samples;
                let fade_out = (phase * FRAC_PI_2).cos();
                let fade_in = (phase * FRAC_PI_2).sin();
                let output = self.delay_line.read(self.taps[active]) * fade_out
                    + self.delay_line.read(self.taps[other]) * fade_in;
                if pos + 1.0 >= self.crossfade_samples {
                    self.active_tap = other;
                    self.crossfade_pos = None;
                } else {
                    self.crossfade_pos = Some(pos + 1.0);
                }
                output
            }
            None => self.delay_line.read(self.taps[active]),
        }
    }

    /// Process a block with a constant pitch ratio.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], ratio: f32) {
        for (input, output) in input.iter().zip(output.iter_mut()) {
            *output = self.process_sample(*input, ratio);
        }
    }
}

impl Default for SimplePitchShifter {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn zero_crossings(signal: &[f32]) -> usize {
        signal
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count()
    }

    #[test]
    fn unity_ratio_is_bit_identical() {
        let mut shifter = SimplePitchShifter::new();
        shifter.prepare(44100.0);
        let input = sine(440.0, 44100.0, 4096);
        let mut output = vec![0.0; input.len()];
        shifter.process(&input, &mut output, 1.0);
        assert_eq!(input, output);
        shifter.process(&input, &mut output, 1.0 + 5e-5);
        assert_eq!(input, output);
    }

    #[test]
    fn shifts_frequency() {
        let sample_rate = 44100.0;
        let input = sine(441.0, sample_rate, 44100);
        let input_crossings = zero_crossings(&input);
        for ratio in [0.5f32, 1.5, 2.0] {
            let mut shifter = SimplePitchShifter::new();
            shifter.prepare(sample_rate as f64);
            let mut output = vec![0.0; input.len()];
            shifter.process(&input, &mut output, ratio);
            let crossings = zero_crossings(&output[4410..]) as f32 / 0.9;
            let expected = input_crossings as f32 * ratio;
            assert!(
                (crossings - expected).abs() < expected * 0.1,
                "ratio {ratio}: {crossings} vs {expected}"
            );
        }
    }

    #[test]
    fn output_stays_bounded() {
        let mut shifter = SimplePitchShifter::new();
        shifter.prepare(48000.0);
        let mut input = sine(100.0, 48000.0, 8192);
        input[100] = f32::NAN;
        input[200] = f32::INFINITY;
        for ratio in [0.25f32, 0.7, 1.3, 4.0] {
            let mut output = vec![0.0; input.len()];
            shifter.process(&input, &mut output, ratio);
            assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.5));
        }
    }

    #[test]
    fn unprepared_passes_through() {
        let mut shifter = SimplePitchShifter::new();
        assert!(!shifter.is_prepared());
        assert_eq!(shifter.process_sample(0.5, 2.0), 0.5);
    }
}
