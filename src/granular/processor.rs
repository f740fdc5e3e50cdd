use std::f32::consts::SQRT_2;

use super::{envelope::GrainEnvelope, pool::Grain};
use crate::utils::{delay::DelayLine, panning_factors, sanitize_sample};

// -------------------------------------------------------------------------------------------------

/// Output of a single grain for a single sample frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrainFrame {
    pub left: f32,
    pub right: f32,
    /// True when the grain played its last sample and its slot can be released.
    pub finished: bool,
}

// -------------------------------------------------------------------------------------------------

/// A stolen grain which keeps playing while fading out.
#[derive(Debug, Clone, Copy)]
struct ReleasingGrain {
    grain: Grain,
    remaining: u32,
}

// -------------------------------------------------------------------------------------------------

/// Renders grains from a stereo pair of delay lines.
///
/// Grains read both delay lines at the same position, so the stereo image of the delayed signal
/// is kept. Panning balances the two channels with a constant power law, normalized to unity
/// gain at the center.
///
/// Grains which got stolen from the pool are handed over with [`Self::release_grain`] and fade
/// out linearly within a few milliseconds in [`Self::process_releases`].
#[derive(Debug, Clone)]
pub struct GrainProcessor {
    release_samples: u32,
    max_releases: usize,
    releases: Vec<ReleasingGrain>,
}

impl GrainProcessor {
    /// Fade out time of stolen grains.
    pub const RELEASE_TIME_MS: f64 = 5.0;

    /// Playback rate limits of a grain. 1/16 (4 octaves down) up to 16 (4 octaves up).
    pub const MIN_PLAYBACK_RATE: f64 = 1.0 / 16.0;
    pub const MAX_PLAYBACK_RATE: f64 = 16.0;

    pub fn new() -> Self {
        Self {
            release_samples: 1,
            max_releases: 0,
            releases: Vec::new(),
        }
    }

    /// Allocate room for up to `max_releases` simultaneously fading grains. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f64, max_releases: usize) {
        self.release_samples = (Self::RELEASE_TIME_MS * 0.001 * sample_rate)
            .round()
            .max(1.0) as u32;
        self.max_releases = max_releases;
        self.releases = Vec::with_capacity(max_releases);
    }

    /// Drop all fading grains.
    pub fn reset(&mut self) {
        self.releases.clear();
    }

    /// Number of grains which are currently fading out.
    pub fn releasing_count(&self) -> usize {
        self.releases.len()
    }

    /// Set up a freshly acquired grain.
    ///
    /// `position` is the absolute delay buffer read position, `pitch_ratio` the unsigned read
    /// speed and `duration` the grain length in samples. Out of range values are clamped.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_grain(
        &self,
        grain: &mut Grain,
        position: f64,
        pitch_ratio: f64,
        pan: f32,
        envelope: GrainEnvelope,
        duration: u32,
        reverse: bool,
    ) {
        let pitch_ratio = if pitch_ratio.is_finite() {
            pitch_ratio.clamp(Self::MIN_PLAYBACK_RATE, Self::MAX_PLAYBACK_RATE)
        } else {
            1.0
        };
        let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
        let (gain_left, gain_right) = panning_factors(pan);

        grain.active = true;
        grain.position = if position.is_finite() { position } else { 0.0 };
        grain.playback_rate = if reverse { -pitch_ratio } else { pitch_ratio };
        grain.age = 0;
        grain.duration = duration.max(1);
        grain.envelope = envelope;
        grain.pan = pan;
        grain.gain_left = gain_left * SQRT_2;
        grain.gain_right = gain_right * SQRT_2;
        grain.reverse = reverse;
    }

    /// Render the next sample frame of a grain and advance it.
    #[inline]
    pub fn process_grain(
        &self,
        grain: &mut Grain,
        left: &DelayLine,
        right: &DelayLine,
    ) -> GrainFrame {
        Self::advance(grain, left, right)
    }

    /// Hand over a stolen grain, so it fades out instead of being cut.
    ///
    /// When all release slots are busy, the release which is closest to silence gets replaced.
    pub fn release_grain(&mut self, grain: Grain) {
        if !grain.active || grain.is_finished() {
            return;
        }
        let release = ReleasingGrain {
            grain,
            remaining: self.release_samples,
        };
        if self.releases.len() < self.max_releases {
            self.releases.push(release);
        } else if let Some(quietest) = self
            .releases
            .iter_mut()
            .min_by_key(|release| release.remaining)
        {
            *quietest = release;
        }
    }

    /// Render and advance all fading grains.
    #[inline]
    pub fn process_releases(&mut self, left: &DelayLine, right: &DelayLine) -> (f32, f32) {
        if self.releases.is_empty() {
            return (0.0, 0.0);
        }
        let release_samples = self.release_samples as f32;
        let mut output = (0.0, 0.0);
        self.releases.retain_mut(|release| {
            let fade = release.remaining as f32 / release_samples;
            let frame = Self::advance(&mut release.grain, left, right);
            output.0 += frame.left * fade;
            output.1 += frame.right * fade;
            release.remaining -= 1;
            release.remaining > 0 && !frame.finished
        });
        output
    }

    fn advance(grain: &mut Grain, left: &DelayLine, right: &DelayLine) -> GrainFrame {
        if !grain.active || grain.is_finished() {
            return GrainFrame {
                finished: true,
                ..GrainFrame::default()
            };
        }
        let envelope = grain.envelope.gain(grain.phase());
        let left_sample = left.read_at(grain.position);
        let right_sample = right.read_at(grain.position);

        grain.position = left.wrap_position(grain.position + grain.playback_rate);
        grain.age += 1;

        GrainFrame {
            left: sanitize_sample(left_sample * envelope * grain.gain_left),
            right: sanitize_sample(right_sample * envelope * grain.gain_right),
            finished: grain.is_finished(),
        }
    }
}

impl Default for GrainProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
