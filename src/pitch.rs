//! Pitch shifting with selectable quality/latency strategies.

mod simple;

pub use simple::SimplePitchShifter;

use std::f32::consts::LN_2;

use strum::{Display, EnumCount, EnumIter, EnumString, FromRepr, VariantNames};

use crate::{
    utils::smoothing::{LinearSmoothedValue, OnePoleSmoothedValue, SmoothedValue},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Convert a pitch offset in semitones to a playback rate ratio.
#[inline]
pub fn pitch_ratio_from_semitones(semitones: f32) -> f32 {
    (semitones * LN_2 / 12.0).exp()
}

/// Convert a playback rate ratio to a pitch offset in semitones. Ratios <= 0 map to 0.
#[inline]
pub fn semitones_from_pitch_ratio(ratio: f32) -> f32 {
    if ratio <= 0.0 || ratio.is_nan() {
        return 0.0;
    }
    ratio.ln() * 12.0 / LN_2
}

// -------------------------------------------------------------------------------------------------

/// Pitch shifting algorithms, from lowest to highest latency.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, EnumCount,
    VariantNames, FromRepr,
)]
#[repr(u8)]
pub enum PitchMode {
    /// Dual tap delay line shifter. Zero latency, audible artifacts on large shifts.
    #[default]
    Simple,
    /// Overlapping grain based shifter.
    Granular,
    /// FFT phase vocoder.
    PhaseVocoder,
}

impl PitchMode {
    /// True when the mode has a processing implementation.
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::Simple)
    }

    /// Nominal latency in samples at the given sample rate, reported for delay compensation.
    pub fn latency_samples(self, sample_rate: f64) -> usize {
        const REFERENCE_RATE: f64 = 44100.0;
        let samples_at_reference = match self {
            Self::Simple => 0.0,
            Self::Granular => 2048.0,
            // FFT size + hop size
            Self::PhaseVocoder => 5120.0,
        };
        (samples_at_reference * sample_rate / REFERENCE_RATE).round() as usize
    }
}

/// Observable processing state of a [`PitchShiftProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchShiftStatus {
    /// `prepare` was not called yet or failed. Output is silent.
    Unprepared,
    /// The selected mode is processing.
    Active(PitchMode),
    /// The selected mode has no implementation. Output is silent.
    Unsupported(PitchMode),
}

// -------------------------------------------------------------------------------------------------

/// Mono pitch shifter facade, switching between [`PitchMode`] strategies.
///
/// Pitch is set in semitones (\[-24, 24\]) plus cents (\[-100, 100\]) and smoothed. Mode
/// changes fade the old mode out and the new mode in. Modes without implementation are
/// reported as [`PitchShiftStatus::Unsupported`] and render silence: they never fall back to
/// another mode silently.
#[derive(Debug, Clone)]
pub struct PitchShiftProcessor {
    sample_rate: f64,
    prepared: bool,
    mode: PitchMode,
    active_mode: PitchMode,
    semitones: f32,
    cents: f32,
    formant_preserve: bool,
    pitch: OnePoleSmoothedValue,
    transition: LinearSmoothedValue,
    simple: SimplePitchShifter,
}

impl PitchShiftProcessor {
    pub const MIN_SEMITONES: f32 = -24.0;
    pub const MAX_SEMITONES: f32 = 24.0;
    pub const MIN_CENTS: f32 = -100.0;
    pub const MAX_CENTS: f32 = 100.0;

    const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
    const TRANSITION_MS: f32 = 5.0;

    pub fn new() -> Self {
        let sample_rate = Self::DEFAULT_SAMPLE_RATE;
        Self {
            sample_rate,
            prepared: false,
            mode: PitchMode::default(),
            active_mode: PitchMode::default(),
            semitones: 0.0,
            cents: 0.0,
            formant_preserve: false,
            pitch: OnePoleSmoothedValue::new(0.0, sample_rate),
            transition: LinearSmoothedValue::new(1.0, Self::TRANSITION_MS, sample_rate),
            simple: SimplePitchShifter::new(),
        }
    }

    /// Allocate processing state for the given sample rate. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize) -> Result<(), Error> {
        self.prepared = false;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid pitch shifter sample-rate: must be > 0, but is {sample_rate}"
            )));
        }
        self.sample_rate = sample_rate;
        self.simple.prepare(sample_rate);
        self.pitch.set_sample_rate(sample_rate);
        self.transition.set_sample_rate(sample_rate);
        self.prepared = true;
        self.reset();
        log::debug!(
            "Prepared pitch shifter: {sample_rate} Hz, max block size {max_block_size}, {} mode",
            self.mode
        );
        Ok(())
    }

    /// True after a successful [`Self::prepare`] call.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Clear all processing state, applying pending mode and pitch changes immediately.
    pub fn reset(&mut self) {
        self.simple.reset();
        self.active_mode = self.mode;
        self.transition.init(1.0);
        self.pitch.init(self.pitch.target());
    }

    /// The selected mode.
    pub fn mode(&self) -> PitchMode {
        self.mode
    }

    /// Select a new mode. The mode is applied in any case so that latency reports follow it,
    /// but modes without implementation return [`Error::UnsupportedPitchMode`] and process
    /// silence.
    pub fn set_mode(&mut self, mode: PitchMode) -> Result<(), Error> {
        if mode != self.mode {
            self.mode = mode;
            if self.prepared {
                self.transition.set_target(0.0);
            } else {
                self.active_mode = mode;
            }
        }
        if mode.is_supported() {
            Ok(())
        } else {
            log::warn!("Pitch mode '{mode}' is not supported: output will be silent");
            Err(Error::UnsupportedPitchMode(mode))
        }
    }

    /// Processing state of the selected mode.
    pub fn status(&self) -> PitchShiftStatus {
        if !self.prepared {
            PitchShiftStatus::Unprepared
        } else if self.mode.is_supported() {
            PitchShiftStatus::Active(self.mode)
        } else {
            PitchShiftStatus::Unsupported(self.mode)
        }
    }

    /// Pitch offset in semitones.
    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    /// Set pitch offset in semitones, clamped to \[-24, 24\].
    pub fn set_semitones(&mut self, semitones: f32) {
        let semitones = if semitones.is_nan() { 0.0 } else { semitones };
        self.semitones = semitones.clamp(Self::MIN_SEMITONES, Self::MAX_SEMITONES);
        self.update_pitch_target();
    }

    /// Fine pitch offset in cents.
    pub fn cents(&self) -> f32 {
        self.cents
    }

    /// Set fine pitch offset in cents, clamped to \[-100, 100\].
    pub fn set_cents(&mut self, cents: f32) {
        let cents = if cents.is_nan() { 0.0 } else { cents };
        self.cents = cents.clamp(Self::MIN_CENTS, Self::MAX_CENTS);
        self.update_pitch_target();
    }

    /// Formant preservation flag. Has no effect in [`PitchMode::Simple`] mode.
    pub fn formant_preserve(&self) -> bool {
        self.formant_preserve
    }

    pub fn set_formant_preserve(&mut self, enabled: bool) {
        self.formant_preserve = enabled;
    }

    /// Target pitch ratio of the current semitone and cent settings.
    pub fn pitch_ratio(&self) -> f32 {
        pitch_ratio_from_semitones(self.pitch.target())
    }

    /// Nominal latency of the selected mode in samples.
    pub fn latency_samples(&self) -> usize {
        self.mode.latency_samples(self.sample_rate)
    }

    /// Pitch shift `input` into `output`. Unprepared processors write silence.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        if !self.prepared {
            output.fill(0.0);
            return;
        }
        for (input, output) in input.iter().zip(output.iter_mut()) {
            let gain = self.transition.next();
            if self.transition.target() == 0.0 && !self.transition.need_ramp() {
                // old mode faded out: switch and fade in the new one
                if self.active_mode != self.mode {
                    self.active_mode = self.mode;
                    self.simple.reset();
                }
                self.transition.set_target(1.0);
            }
            let ratio = pitch_ratio_from_semitones(self.pitch.next());
            let shifted = match self.active_mode {
                PitchMode::Simple => self.simple.process_sample(*input, ratio),
                PitchMode::Granular | PitchMode::PhaseVocoder => 0.0,
            };
            *output = if gain == 1.0 { shifted } else { shifted * gain };
        }
        // input and output may differ in size
        if output.len() > input.len() {
            output[input.len()..].fill(0.0);
        }
    }

    /// Pitch shift a buffer in place.
    pub fn process_in_place(&mut self, buffer: &mut [f32]) {
        if !self.prepared {
            buffer.fill(0.0);
            return;
        }
        for sample in buffer.iter_mut() {
            let input = [*sample];
            let mut output = [0.0];
            self.process(&input, &mut output);
            *sample = output[0];
        }
    }

    fn update_pitch_target(&mut self) {
        self.pitch.set_target(self.semitones + self.cents / 100.0);
        if !self.prepared {
            self.pitch.init(self.pitch.target());
        }
    }
}

impl Default for PitchShiftProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
