//! Small deterministic random number generators.

use rand::RngCore;

// -------------------------------------------------------------------------------------------------

/// 32-bit xorshift generator (shifts 13, 17, 5).
///
/// Tiny state and a fixed, documented sequence make it suitable for per-sample noise such as
/// dither, where output must be reproducible across runs and platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xorshift32 {
    state: u32,
    seed: u32,
}

impl Xorshift32 {
    pub const DEFAULT_SEED: u32 = 0x1234_5678;

    /// Create a new generator. A zero seed would lock the generator at zero, so it is
    /// replaced with [`Self::DEFAULT_SEED`].
    pub const fn new(seed: u32) -> Self {
        let seed = if seed == 0 { Self::DEFAULT_SEED } else { seed };
        Self { state: seed, seed }
    }

    /// Restore the initial seed.
    pub fn reset(&mut self) {
        self.state = self.seed;
    }

    /// Next raw 32-bit value.
    #[inline(always)]
    pub fn next_state(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Next uniform value in range \[-1, 1\].
    #[inline(always)]
    pub fn next_bipolar(&mut self) -> f32 {
        const SCALE: f32 = 2.0 / u32::MAX as f32;
        self.next_state() as f32 * SCALE - 1.0
    }
}

impl Default for Xorshift32 {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl RngCore for Xorshift32 {
    fn next_u32(&mut self) -> u32 {
        self.next_state()
    }

    fn next_u64(&mut self) -> u64 {
        let low = self.next_state() as u64;
        let high = self.next_state() as u64;
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(4) {
            let bytes = self.next_state().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

// -------------------------------------------------------------------------------------------------
