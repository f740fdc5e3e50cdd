//! Bit depth reduction with optional TPDF dither.

use crate::utils::random::Xorshift32;

// -------------------------------------------------------------------------------------------------

/// Quantizes samples to a reduced, possibly fractional bit depth.
///
/// Samples in range \[-1, 1\] are mapped to \[0, levels\], rounded and mapped back, where
/// `levels = 2^bits - 1`. Optional triangular (TPDF) dither is added before rounding. The
/// dither noise source is a fixed seed [`Xorshift32`], so output is reproducible after
/// [`Self::reset`].
#[derive(Debug, Clone)]
pub struct BitCrusher {
    bit_depth: f32,
    dither: f32,
    levels: f32,
    rng: Xorshift32,
}

impl BitCrusher {
    pub const MIN_BIT_DEPTH: f32 = 4.0;
    pub const MAX_BIT_DEPTH: f32 = 16.0;

    pub fn new() -> Self {
        let mut crusher = Self {
            bit_depth: Self::MAX_BIT_DEPTH,
            dither: 0.0,
            levels: 0.0,
            rng: Xorshift32::default(),
        };
        crusher.update_levels();
        crusher
    }

    /// Nothing sample rate dependent is stored: resets the noise generator only.
    pub fn prepare(&mut self, _sample_rate: f64) {
        self.reset();
    }

    /// Restore the initial dither noise sequence.
    pub fn reset(&mut self) {
        self.rng.reset();
    }

    /// Current, possibly fractional bit depth.
    pub fn bit_depth(&self) -> f32 {
        self.bit_depth
    }

    /// Set bit depth, clamped to \[4, 16\]. Fractional depths are allowed.
    pub fn set_bit_depth(&mut self, bits: f32) {
        let bits = if bits.is_nan() { Self::MAX_BIT_DEPTH } else { bits };
        self.bit_depth = bits.clamp(Self::MIN_BIT_DEPTH, Self::MAX_BIT_DEPTH);
        self.update_levels();
    }

    /// Current dither amount.
    pub fn dither(&self) -> f32 {
        self.dither
    }

    /// Set dither amount, clamped to \[0, 1\]. 0 disables dithering.
    pub fn set_dither(&mut self, amount: f32) {
        let amount = if amount.is_nan() { 0.0 } else { amount };
        self.dither = amount.clamp(0.0, 1.0);
    }

    /// Number of quantization steps.
    pub fn levels(&self) -> f32 {
        self.levels
    }

    /// Quantize a single sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let mut normalized = (input + 1.0) * 0.5;
        if self.dither > 0.0 {
            let noise = self.rng.next_bipolar() + self.rng.next_bipolar();
            normalized += noise * self.dither / self.levels;
        }
        let quantized = (normalized * self.levels).round().clamp(0.0, self.levels);
        quantized / self.levels * 2.0 - 1.0
    }

    /// Quantize a buffer of samples in place.
    pub fn process_buffer(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    fn update_levels(&mut self) {
        self.levels = (2.0f32.powf(self.bit_depth) - 1.0).max(1.0);
    }
}

impl Default for BitCrusher {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
