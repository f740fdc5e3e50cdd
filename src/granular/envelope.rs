//! Grain amplitude envelopes.

use std::{f32::consts::PI, sync::LazyLock};

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Grain envelope (window) shape.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumIter,
    strum::EnumCount,
    strum::FromRepr,
)]
#[repr(u8)]
pub enum GrainEnvelope {
    /// Raised cosine. Sums to a constant when grains overlap by half.
    #[default]
    Hann = 0,
    /// Linear attack and release with a flat sustain.
    Trapezoid = 1,
    /// Half sine: louder edges than Hann, constant power at half overlap.
    Sine = 2,
    /// Steep spectral rolloff, narrow in time.
    Blackman = 3,
}

impl GrainEnvelope {
    /// Shape from a state index. Invalid indices fall back to [`Self::Hann`].
    pub fn from_index(index: i32) -> Self {
        u8::try_from(index)
            .ok()
            .and_then(Self::from_repr)
            .unwrap_or_default()
    }

    /// Envelope gain at normalized grain phase `[0, 1]`, read from the shared lookup table.
    #[inline]
    pub fn gain(self, phase: f64) -> f32 {
        GRAIN_ENVELOPE_LUT.sample(self, phase)
    }
}

// -------------------------------------------------------------------------------------------------

/// Precomputed grain envelopes. `N` must be a pow2 value.
pub(crate) struct GrainEnvelopeTable<const N: usize> {
    luts: [[f32; N]; GrainEnvelope::COUNT],
}

impl<const N: usize> GrainEnvelopeTable<N> {
    const _VERIFY_N: () = assert!(
        N.is_power_of_two(),
        "Grain envelope size must be a pow2 value"
    );

    /// Ramp length of the trapezoid shape, relative to the grain length.
    const TRAPEZOID_RAMP: f32 = 0.25;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_N;

        let mut luts = [[0.0; N]; GrainEnvelope::COUNT];

        #[allow(clippy::needless_range_loop)]
        for i in 0..N {
            // [0.0, 1.0], so both edges hit zero
            let phase = i as f32 / (N - 1) as f32;

            luts[GrainEnvelope::Hann as usize][i] = 0.5 * (1.0 - (2.0 * PI * phase).cos());

            luts[GrainEnvelope::Trapezoid as usize][i] = if phase < Self::TRAPEZOID_RAMP {
                phase / Self::TRAPEZOID_RAMP
            } else if phase > 1.0 - Self::TRAPEZOID_RAMP {
                (1.0 - phase) / Self::TRAPEZOID_RAMP
            } else {
                1.0
            };

            luts[GrainEnvelope::Sine as usize][i] = (PI * phase).sin();

            // a0=0.42, a1=0.5, a2=0.08
            luts[GrainEnvelope::Blackman as usize][i] = (0.42 - 0.5 * (2.0 * PI * phase).cos()
                + 0.08 * (4.0 * PI * phase).cos())
            .max(0.0);
        }

        Self { luts }
    }

    /// Evaluate an envelope at normalized phase, linearly interpolating between table entries.
    /// Phases outside of `[0, 1]` are clamped.
    #[inline]
    pub fn sample(&self, shape: GrainEnvelope, phase: f64) -> f32 {
        let phase = if phase.is_nan() {
            0.0
        } else {
            phase.clamp(0.0, 1.0)
        };
        let index_float = phase * (N - 1) as f64;
        let index = index_float as usize;
        let lut = &self.luts[shape as usize];
        if index < N - 1 {
            let fraction = (index_float - index as f64) as f32;
            lut[index] + (lut[index + 1] - lut[index]) * fraction
        } else {
            lut[N - 1]
        }
    }
}

/// Static, shared lookup table for all envelope shapes.
pub(crate) static GRAIN_ENVELOPE_LUT: LazyLock<GrainEnvelopeTable<2048>> =
    LazyLock::new(GrainEnvelopeTable::new);

// -------------------------------------------------------------------------------------------------
