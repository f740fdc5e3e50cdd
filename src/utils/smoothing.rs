use std::fmt::{Debug, Display};

// -------------------------------------------------------------------------------------------------

/// Provides smooth transitions between a current and target f32 value.
/// Smoothing needs to be applied to avoid zipper noise and clicks on parameter changes.
pub trait SmoothedValue: Debug {
    /// Access to the current, possibly ramped value.
    #[must_use]
    fn current(&self) -> f32;
    /// Access to the target value.
    #[must_use]
    fn target(&self) -> f32;

    /// Ramp, if needed, and get the current ramped value, else returns the target value.
    #[must_use]
    fn next(&mut self) -> f32 {
        if self.need_ramp() {
            self.ramp();
            self.current()
        } else {
            self.target()
        }
    }

    /// Test if ramping is necessary. When ramping is not necessary, values may be applied
    /// in blocks without calling `next` or `ramp`.
    #[must_use]
    fn need_ramp(&self) -> bool;
    /// Move current towards the target value, when ramping is necessary, else does nothing.
    fn ramp(&mut self);

    /// Set current and target to the same value.
    fn init(&mut self, amount: f32);
    /// Set a new target value and ramp current, when current is different from the target.
    fn set_target(&mut self, target: f32);

    /// Update the sample rate. Smoothed values are expected to be advanced once per sample
    /// frame, so ramp times scale with the sample rate.
    fn set_sample_rate(&mut self, sample_rate: f64);
}

impl Display for dyn SmoothedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.need_ramp() {
            f.write_fmt(format_args!("{}(->{})", self.current(), self.target()))
        } else {
            f.write_fmt(format_args!("{}", self.target()))
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// One-pole low-pass smoother: `current = target + coefficient * (current - target)`.
///
/// The coefficient is derived from a time constant in milliseconds and the sample rate, so
/// the value reaches ~63% of a step after one time constant.
#[derive(Debug, Clone)]
pub struct OnePoleSmoothedValue {
    current: f32,
    target: f32,
    time_ms: f32,
    coefficient: f32,
}

impl OnePoleSmoothedValue {
    pub const DEFAULT_TIME_MS: f32 = 10.0;

    const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
    /// Relative distance below which the value snaps to its target.
    const SNAP_EPSILON: f32 = 1e-5;

    pub fn new(value: f32, sample_rate: f64) -> Self {
        Self::with_time(value, Self::DEFAULT_TIME_MS, sample_rate)
    }

    pub fn with_time(value: f32, time_ms: f32, sample_rate: f64) -> Self {
        assert!(time_ms >= 0.0, "Invalid smoothing time");
        assert!(sample_rate > 0.0, "Invalid sample rate");
        Self {
            current: value,
            target: value,
            time_ms,
            coefficient: Self::coefficient(time_ms, sample_rate),
        }
    }

    /// Smoothing time constant in milliseconds.
    pub fn time_ms(&self) -> f32 {
        self.time_ms
    }

    /// Jump to the target value.
    pub fn snap(&mut self) {
        self.current = self.target;
    }

    fn coefficient(time_ms: f32, sample_rate: f64) -> f32 {
        let time_samples = time_ms as f64 * 0.001 * sample_rate;
        if time_samples <= f64::EPSILON {
            0.0
        } else {
            (-1.0 / time_samples).exp() as f32
        }
    }
}

impl SmoothedValue for OnePoleSmoothedValue {
    #[inline(always)]
    fn current(&self) -> f32 {
        self.current
    }

    #[inline(always)]
    fn target(&self) -> f32 {
        self.target
    }

    #[inline(always)]
    fn need_ramp(&self) -> bool {
        self.current != self.target
    }

    #[inline]
    fn ramp(&mut self) {
        let distance = self.current - self.target;
        if distance.abs() <= Self::SNAP_EPSILON * self.target.abs().max(1.0) {
            self.current = self.target;
        } else {
            self.current = self.target + self.coefficient * distance;
        }
    }

    fn init(&mut self, amount: f32) {
        self.current = amount;
        self.target = amount;
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
        if !self.current.is_finite() {
            self.current = target;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        debug_assert!(sample_rate > 0.0, "Invalid sample rate");
        self.coefficient = Self::coefficient(self.time_ms, sample_rate);
    }
}

impl Default for OnePoleSmoothedValue {
    fn default() -> Self {
        Self::new(0.0, Self::DEFAULT_SAMPLE_RATE)
    }
}

impl From<f32> for OnePoleSmoothedValue {
    fn from(value: f32) -> Self {
        Self::new(value, Self::DEFAULT_SAMPLE_RATE)
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear smoothed value, ramping towards the target within a fixed duration.
/// Used for crossfades, where the fade must complete after a known number of samples.
#[derive(Debug, Clone)]
pub struct LinearSmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    num_pending_steps: u32,
    duration_ms: f32,
    duration_samples: u32,
}

impl LinearSmoothedValue {
    pub fn new(value: f32, duration_ms: f32, sample_rate: f64) -> Self {
        assert!(duration_ms >= 0.0, "Invalid ramp duration");
        Self {
            current: value,
            target: value,
            step: 0.0,
            num_pending_steps: 0,
            duration_ms,
            duration_samples: Self::duration_samples(duration_ms, sample_rate),
        }
    }

    /// Ramp duration in samples at the current sample rate.
    pub fn duration_in_samples(&self) -> u32 {
        self.duration_samples
    }

    /// Set a new target, reaching it after exactly `duration_in_samples` steps.
    pub fn set_target_with_duration(&mut self, target: f32, duration_in_samples: u32) {
        self.target = target;
        if self.current == self.target || duration_in_samples == 0 {
            self.current = self.target;
            self.num_pending_steps = 0;
        } else {
            self.num_pending_steps = duration_in_samples;
            self.step = (self.target - self.current) / duration_in_samples as f32;
        }
    }

    fn duration_samples(duration_ms: f32, sample_rate: f64) -> u32 {
        (duration_ms as f64 * 0.001 * sample_rate).round().max(1.0) as u32
    }
}

impl SmoothedValue for LinearSmoothedValue {
    #[inline(always)]
    fn current(&self) -> f32 {
        self.current
    }

    #[inline(always)]
    fn target(&self) -> f32 {
        self.target
    }

    #[inline(always)]
    fn need_ramp(&self) -> bool {
        self.num_pending_steps > 0
    }

    fn ramp(&mut self) {
        if self.num_pending_steps > 0 {
            self.current += self.step;
            self.num_pending_steps -= 1;
            if self.num_pending_steps == 0 {
                self.current = self.target;
            }
        }
    }

    fn init(&mut self, amount: f32) {
        self.target = amount;
        self.current = amount;
        self.num_pending_steps = 0;
    }

    fn set_target(&mut self, target: f32) {
        self.set_target_with_duration(target, self.duration_samples);
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.duration_samples = Self::duration_samples(self.duration_ms, sample_rate);
    }
}

// -------------------------------------------------------------------------------------------------
