use rand::{rngs::SmallRng, Rng, SeedableRng};

// -------------------------------------------------------------------------------------------------

/// How grain trigger times are distributed.
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
)]
#[repr(u8)]
pub enum SchedulingMode {
    /// Random trigger times with an average rate of `density` grains per second.
    #[default]
    Stochastic,
    /// Evenly spaced triggers, `sample_rate / density` samples apart.
    Synchronous,
}

// -------------------------------------------------------------------------------------------------

/// Decides, once per sample, whether a new grain should start.
///
/// Trigger sequences are fully determined by the seed: [`Self::reset`] restores the most
/// recently applied seed.
#[derive(Debug, Clone)]
pub struct GrainScheduler {
    sample_rate: f64,
    density: f64,
    mode: SchedulingMode,
    trigger_phase: f64,
    seed: u64,
    rng: SmallRng,
}

impl GrainScheduler {
    pub const DEFAULT_SEED: u64 = 0x5EED;

    pub fn new() -> Self {
        Self {
            sample_rate: 44100.0,
            density: 0.0,
            mode: SchedulingMode::default(),
            trigger_phase: 0.0,
            seed: Self::DEFAULT_SEED,
            rng: SmallRng::seed_from_u64(Self::DEFAULT_SEED),
        }
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        debug_assert!(sample_rate > 0.0, "Invalid sample rate");
        self.sample_rate = sample_rate;
        self.reset();
    }

    /// Grains per second.
    pub fn density(&self) -> f64 {
        self.density
    }

    /// Set grains per second. Negative or NaN values disable triggering.
    #[inline]
    pub fn set_density(&mut self, density: f64) {
        self.density = if density.is_nan() {
            0.0
        } else {
            density.max(0.0)
        };
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SchedulingMode) {
        self.mode = mode;
        self.trigger_phase = 0.0;
    }

    /// Reseed the trigger sequence.
    pub fn seed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self.trigger_phase = 0.0;
    }

    /// Restart the trigger sequence from the last seed.
    pub fn reset(&mut self) {
        self.seed(self.seed);
    }

    /// Advance by one sample. Returns true when a grain should be triggered.
    #[inline]
    pub fn tick(&mut self) -> bool {
        if self.density <= 0.0 {
            return false;
        }
        let increment = self.density / self.sample_rate;
        match self.mode {
            SchedulingMode::Stochastic => self.rng.random::<f64>() < increment,
            SchedulingMode::Synchronous => {
                self.trigger_phase += increment;
                if self.trigger_phase >= 1.0 {
                    self.trigger_phase -= 1.0;
                    // densities above the sample rate can't trigger more than once per sample
                    self.trigger_phase = self.trigger_phase.min(1.0);
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Default for GrainScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
