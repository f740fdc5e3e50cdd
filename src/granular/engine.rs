use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{
    envelope::{GrainEnvelope, GRAIN_ENVELOPE_LUT},
    pool::GrainPool,
    processor::GrainProcessor,
    scheduler::{GrainScheduler, SchedulingMode},
};
use crate::{
    pitch::pitch_ratio_from_semitones,
    utils::{
        delay::DelayLine,
        sanitize_sample,
        smoothing::{LinearSmoothedValue, SmoothedValue},
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Per sample grain settings of a [`GranularEngine`], in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainParameters {
    /// Grain length in milliseconds (10 - 500).
    pub grain_size_ms: f32,
    /// Grains per second (0 - 100).
    pub density: f32,
    /// Nominal distance of new grains to the write head in milliseconds (0 - 2000).
    pub delay_ms: f32,
    /// Grain pitch in semitones (-24 - 24).
    pub pitch_semitones: f32,
    /// Random pitch offset amount (0 - 1): up to ±12 semitones.
    pub pitch_spray: f32,
    /// Random delay offset amount (0 - 1): up to ±100% of the delay time.
    pub position_spray: f32,
    /// Random panning amount (0 - 1).
    pub pan_spray: f32,
    /// Probability of a grain playing backwards (0 - 1).
    pub reverse_probability: f32,
    pub envelope: GrainEnvelope,
}

impl Default for GrainParameters {
    fn default() -> Self {
        Self {
            grain_size_ms: 100.0,
            density: 10.0,
            delay_ms: 500.0,
            pitch_semitones: 0.0,
            pitch_spray: 0.0,
            position_spray: 0.0,
            pan_spray: 0.0,
            reverse_probability: 0.0,
            envelope: GrainEnvelope::Hann,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Stereo granular delay signal path: a delay line pair, written with the input, from which
/// scheduled grains read pitched, panned and enveloped snippets.
///
/// Per sample, the input gets written into the delay lines (unless frozen), the scheduler
/// decides whether a new grain starts, and all active and fading grains get rendered.
/// Randomization (spray) of new grains is drawn from a seeded generator, so the output is
/// fully reproducible after [`Self::seed`] or [`Self::reset`].
#[derive(Debug, Clone)]
pub struct GranularEngine {
    sample_rate: f64,
    prepared: bool,
    delay_lines: [DelayLine; 2],
    pool: GrainPool,
    scheduler: GrainScheduler,
    processor: GrainProcessor,
    rng: SmallRng,
    seed: u64,
    frozen: bool,
    freeze_fade: LinearSmoothedValue,
}

impl GranularEngine {
    pub const MAX_DELAY_MS: f32 = 2000.0;
    pub const MIN_GRAIN_SIZE_MS: f32 = 10.0;
    pub const MAX_GRAIN_SIZE_MS: f32 = 500.0;
    pub const MAX_DENSITY: f32 = 100.0;
    pub const MAX_PITCH_SEMITONES: f32 = 24.0;
    /// Pitch offset at full pitch spray.
    pub const MAX_PITCH_SPRAY_SEMITONES: f32 = 12.0;
    /// Write crossfade time when toggling freeze.
    pub const FREEZE_FADE_MS: f32 = 10.0;

    /// Highest grain read speed: max pitch plus max pitch spray (3 octaves).
    const MAX_READ_RATE: f64 = 8.0;
    /// Closest distance of a read position to the write head, in samples.
    const MIN_DELAY_SAMPLES: f64 = 1.0;
    /// Decorrelates the spray generator from the scheduler, which share the same seed.
    const SPRAY_SEED_MASK: u64 = 0x9E37_79B9_7F4A_7C15;

    pub fn new() -> Self {
        let seed = GrainScheduler::DEFAULT_SEED;
        let sample_rate = 44100.0;
        Self {
            sample_rate,
            prepared: false,
            delay_lines: [DelayLine::default(), DelayLine::default()],
            pool: GrainPool::new(0),
            scheduler: GrainScheduler::new(),
            processor: GrainProcessor::new(),
            rng: SmallRng::seed_from_u64(seed ^ Self::SPRAY_SEED_MASK),
            seed,
            frozen: false,
            freeze_fade: LinearSmoothedValue::new(0.0, Self::FREEZE_FADE_MS, sample_rate),
        }
    }

    /// Allocate delay lines and grain slots. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f64, grain_capacity: usize) -> Result<(), Error> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            self.prepared = false;
            return Err(Error::ParameterError(format!(
                "Invalid granular engine sample rate: {sample_rate}"
            )));
        }
        if grain_capacity == 0 {
            self.prepared = false;
            return Err(Error::ParameterError(
                "Granular engine needs at least one grain slot".to_owned(),
            ));
        }
        // the grain envelopes are shared: build them here and not in the audio thread
        let _ = &*GRAIN_ENVELOPE_LUT;

        self.sample_rate = sample_rate;
        let history_ms = Self::MAX_DELAY_MS as f64
            + Self::MAX_GRAIN_SIZE_MS as f64 * (1.0 + Self::MAX_READ_RATE);
        let history_frames = (history_ms * 0.001 * sample_rate).ceil() as usize + 4;
        for delay_line in &mut self.delay_lines {
            delay_line.allocate(history_frames);
        }
        self.pool.prepare(grain_capacity);
        self.processor.prepare(sample_rate, grain_capacity);
        self.scheduler.prepare(sample_rate);
        self.freeze_fade.set_sample_rate(sample_rate);
        self.prepared = true;
        self.reset();

        log::debug!(
            "Prepared granular engine: {sample_rate} Hz, {grain_capacity} grains, {} delay frames",
            self.delay_lines[0].len()
        );
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Clear the delay history, stop all grains and restart random sequences from the seed.
    pub fn reset(&mut self) {
        for delay_line in &mut self.delay_lines {
            delay_line.flush();
        }
        self.pool.reset();
        self.processor.reset();
        self.scheduler.reset();
        self.rng = SmallRng::seed_from_u64(self.seed ^ Self::SPRAY_SEED_MASK);
        self.freeze_fade.init(if self.frozen { 1.0 } else { 0.0 });
    }

    /// Reseed grain scheduling and spray randomization.
    pub fn seed(&mut self, seed: u64) {
        self.seed = seed;
        self.scheduler.seed(seed);
        self.rng = SmallRng::seed_from_u64(seed ^ Self::SPRAY_SEED_MASK);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Stop or resume writing into the delay lines. Toggling crossfades the writes.
    pub fn set_freeze(&mut self, frozen: bool) {
        if self.frozen != frozen {
            self.frozen = frozen;
            self.freeze_fade.set_target(if frozen { 1.0 } else { 0.0 });
        }
    }

    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.scheduler.mode()
    }

    pub fn set_scheduling_mode(&mut self, mode: SchedulingMode) {
        self.scheduler.set_mode(mode);
    }

    pub fn grain_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn active_grain_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Process a single stereo sample frame.
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32, params: &GrainParameters) -> (f32, f32) {
        if !self.prepared {
            return (0.0, 0.0);
        }

        // write
        let keep = self.freeze_fade.next();
        if !self.writes_stopped() {
            let (left, right) = (sanitize_sample(left), sanitize_sample(right));
            if keep > 0.0 {
                self.delay_lines[0].write_blended(left, keep);
                self.delay_lines[1].write_blended(right, keep);
            } else {
                self.delay_lines[0].write(left);
                self.delay_lines[1].write(right);
            }
        }

        // schedule
        self.scheduler
            .set_density(params.density.clamp(0.0, Self::MAX_DENSITY) as f64);
        if self.scheduler.tick() {
            self.trigger_grain(params);
        }

        // render
        let [delay_left, delay_right] = &self.delay_lines;
        let (mut output_left, mut output_right) =
            self.processor.process_releases(delay_left, delay_right);
        if self.pool.active_count() > 0 {
            for index in 0..self.pool.capacity() {
                let Some(grain) = self.pool.grain_mut(index) else {
                    break;
                };
                if !grain.is_active() {
                    continue;
                }
                let frame = self
                    .processor
                    .process_grain(grain, delay_left, delay_right);
                output_left += frame.left;
                output_right += frame.right;
                if frame.finished {
                    self.pool.release_grain(index);
                }
            }
        }
        (output_left, output_right)
    }

    /// Process a block of stereo samples. Processes the shortest of the given buffers only.
    pub fn process(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        output_left: &mut [f32],
        output_right: &mut [f32],
        params: &GrainParameters,
    ) {
        for (((input_left, input_right), output_left), output_right) in input_left
            .iter()
            .zip(input_right)
            .zip(output_left.iter_mut())
            .zip(output_right.iter_mut())
        {
            (*output_left, *output_right) = self.process_frame(*input_left, *input_right, params);
        }
    }

    /// True when freeze faded in completely and the write head stopped.
    #[inline]
    fn writes_stopped(&self) -> bool {
        self.frozen && !self.freeze_fade.need_ramp()
    }

    fn trigger_grain(&mut self, params: &GrainParameters) {
        // always draw all values, so the random sequence does not depend on parameters
        let pitch_draw = self.rng.random::<f32>() * 2.0 - 1.0;
        let position_draw = self.rng.random::<f64>() * 2.0 - 1.0;
        let pan_draw = self.rng.random::<f32>() * 2.0 - 1.0;
        let reverse_draw = self.rng.random::<f32>();

        let semitones = params
            .pitch_semitones
            .clamp(-Self::MAX_PITCH_SEMITONES, Self::MAX_PITCH_SEMITONES)
            + pitch_draw * params.pitch_spray.clamp(0.0, 1.0) * Self::MAX_PITCH_SPRAY_SEMITONES;
        let pitch_ratio = pitch_ratio_from_semitones(semitones) as f64;
        let reverse = reverse_draw < params.reverse_probability.clamp(0.0, 1.0);
        let pan = pan_draw * params.pan_spray.clamp(0.0, 1.0);
        let duration = (params
            .grain_size_ms
            .clamp(Self::MIN_GRAIN_SIZE_MS, Self::MAX_GRAIN_SIZE_MS) as f64
            * 0.001
            * self.sample_rate)
            .round()
            .max(1.0);

        let delay_ms = params.delay_ms.clamp(0.0, Self::MAX_DELAY_MS) as f64;
        let position_spray = params.position_spray.clamp(0.0, 1.0) as f64;
        let delay = delay_ms * (1.0 + position_draw * position_spray) * 0.001 * self.sample_rate;

        // Keep the read position inside the recorded history for the grain's whole lifetime.
        // Freeze may toggle while the grain plays, so the write head may either stand still
        // (the grain closes in at the full read rate) or keep moving (it overwrites the
        // history behind the grain).
        let read_rate = if reverse { -pitch_ratio } else { pitch_ratio };
        let min_delay = Self::MIN_DELAY_SAMPLES + read_rate.max(0.0) * duration;
        let max_delay =
            (self.delay_lines[0].len() as f64 - 2.0) - (1.0 - read_rate).max(0.0) * duration;
        let delay = delay.min(max_delay).max(min_delay);
        let position = self.delay_lines[0].position_for_delay(delay);

        if let Some(acquired) = self.pool.acquire_grain() {
            if let Some(stolen) = acquired.stolen {
                self.processor.release_grain(stolen);
            }
            if let Some(grain) = self.pool.grain_mut(acquired.index) {
                self.processor.initialize_grain(
                    grain,
                    position,
                    pitch_ratio,
                    pan,
                    params.envelope,
                    duration as u32,
                    reverse,
                );
            }
        }
    }
}

impl Default for GranularEngine {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 44100.0;

    fn prepared_engine(capacity: usize) -> GranularEngine {
        let mut engine = GranularEngine::new();
        engine.prepare(SAMPLE_RATE, capacity).unwrap();
        engine
    }

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
    }

    fn run(engine: &mut GranularEngine, input: &[f32], params: &GrainParameters) -> Vec<f32> {
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        engine.process(input, input, &mut left, &mut right, params);
        left.iter().zip(right).map(|(l, r)| l + r).collect()
    }

    #[test]
    fn prepare_validation() {
        let mut engine = GranularEngine::new();
        assert!(engine.prepare(0.0, 16).is_err());
        assert!(engine.prepare(f64::NAN, 16).is_err());
        assert!(engine.prepare(SAMPLE_RATE, 0).is_err());
        assert!(!engine.is_prepared());
        assert_eq!(engine.process_frame(1.0, 1.0, &GrainParameters::default()), (0.0, 0.0));

        assert!(engine.prepare(SAMPLE_RATE, 16).is_ok());
        assert!(engine.is_prepared());
        assert_eq!(engine.grain_capacity(), 16);
    }

    #[test]
    fn zero_density_is_silent() {
        let mut engine = prepared_engine(32);
        let params = GrainParameters {
            density: 0.0,
            ..GrainParameters::default()
        };
        let output = run(&mut engine, &noise(44100, 1), &params);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(engine.active_grain_count(), 0);
    }

    #[test]
    fn grains_start_at_delay_time() {
        let mut engine = prepared_engine(32);
        engine.set_scheduling_mode(SchedulingMode::Synchronous);
        let params = GrainParameters {
            density: 100.0,
            delay_ms: 100.0,
            grain_size_ms: 50.0,
            envelope: GrainEnvelope::Trapezoid,
            ..GrainParameters::default()
        };
        let mut input = vec![0.0; 44100];
        input[0] = 1.0;
        let output = run(&mut engine, &input, &params);
        let first = output.iter().position(|s| s.abs() > 1e-6).unwrap();
        assert!(first >= 4409, "first output at {first}");
        assert!(first < 4410 + 2205, "first output at {first}");
    }

    #[test]
    fn pool_stays_bounded() {
        let mut engine = prepared_engine(8);
        let params = GrainParameters {
            density: 100.0,
            grain_size_ms: 500.0,
            pitch_semitones: 24.0,
            pitch_spray: 1.0,
            position_spray: 1.0,
            pan_spray: 1.0,
            reverse_probability: 0.5,
            ..GrainParameters::default()
        };
        let input = noise(4096, 2);
        for _ in 0..20 {
            let output = run(&mut engine, &input, &params);
            assert!(engine.active_grain_count() <= 8);
            assert!(output.iter().all(|s| s.is_finite()));
        }
        assert!(engine.active_grain_count() > 0);
    }

    #[test]
    fn seeded_output_is_reproducible() {
        let params = GrainParameters {
            density: 60.0,
            delay_ms: 20.0,
            pitch_spray: 0.5,
            position_spray: 0.5,
            pan_spray: 1.0,
            reverse_probability: 0.3,
            ..GrainParameters::default()
        };
        let input = noise(22050, 3);

        let mut engine = prepared_engine(16);
        engine.seed(42);
        let first = run(&mut engine, &input, &params);
        engine.reset();
        let second = run(&mut engine, &input, &params);
        assert_eq!(first, second);
        assert!(first.iter().any(|s| *s != 0.0));

        let mut other = prepared_engine(16);
        other.seed(42);
        assert_eq!(first, run(&mut other, &input, &params));

        other.seed(43);
        other.reset();
        assert_ne!(first, run(&mut other, &input, &params));
    }

    #[test]
    fn freeze_keeps_history() {
        let params = GrainParameters {
            density: 50.0,
            delay_ms: 200.0,
            ..GrainParameters::default()
        };
        let warm_up = noise(22050, 4);
        let silence = vec![0.0; 2048];

        let mut frozen = [prepared_engine(16), prepared_engine(16)];
        for engine in &mut frozen {
            run(engine, &warm_up, &params);
            engine.set_freeze(true);
            assert!(engine.is_frozen());
            // let the write crossfade complete
            run(engine, &silence, &params);
        }
        let [a, b] = &mut frozen;
        let output_a = run(a, &vec![0.0; 22050], &params);
        let output_b = run(b, &noise(22050, 5), &params);
        assert_eq!(output_a, output_b);
        assert!(output_a.iter().any(|s| s.abs() > 1e-3));

        a.set_freeze(false);
        assert!(!a.is_frozen());
    }

    /// Distance of all active grains behind the write head, in samples.
    fn grain_distances(engine: &GranularEngine) -> Vec<f64> {
        let delay_line = &engine.delay_lines[0];
        let head = delay_line.newest_index() as f64;
        (0..engine.pool.capacity())
            .filter_map(|index| engine.pool.grain(index))
            .filter(|grain| grain.is_active())
            .map(|grain| (head - grain.position).rem_euclid(delay_line.len() as f64))
            .collect()
    }

    /// Read back delay line content at absolute indices.
    fn delay_content(
        engine: &GranularEngine,
        indices: std::ops::RangeInclusive<usize>,
    ) -> Vec<f32> {
        indices
            .map(|index| engine.delay_lines[0].read_at(index as f64))
            .collect()
    }

    #[test]
    fn grains_stay_behind_write_head_across_freeze() {
        for (pitch_semitones, reverse_probability) in [(24.0, 0.0), (12.0, 0.0), (24.0, 1.0)] {
            let mut engine = prepared_engine(32);
            engine.set_scheduling_mode(SchedulingMode::Synchronous);
            let mut params = GrainParameters {
                density: 100.0,
                grain_size_ms: 500.0,
                delay_ms: 5.0,
                pitch_semitones,
                reverse_probability,
                ..GrainParameters::default()
            };
            let max_distance = engine.delay_lines[0].len() as f64 - 1.5;
            let check = |engine: &GranularEngine| {
                for distance in grain_distances(engine) {
                    assert!(
                        (0.5..=max_distance).contains(&distance),
                        "grain at {distance} samples behind the write head"
                    );
                }
            };
            for _ in 0..2000 {
                engine.process_frame(0.5, 0.5, &params);
                check(&engine);
            }
            assert!(engine.active_grain_count() > 0);

            // freeze while grains play, then unfreeze while grains triggered frozen play
            engine.set_freeze(true);
            for frame in 0..30000 {
                if frame == 1000 {
                    params.density = 0.0;
                }
                engine.process_frame(0.5, 0.5, &params);
                check(&engine);
            }
            params.density = 100.0;
            for _ in 0..1000 {
                engine.process_frame(0.5, 0.5, &params);
                check(&engine);
            }
            engine.set_freeze(false);
            params.density = 0.0;
            for _ in 0..30000 {
                engine.process_frame(0.5, 0.5, &params);
                check(&engine);
            }
        }
    }

    #[test]
    fn freeze_crossfades_writes() {
        let mut engine = prepared_engine(4);
        let params = GrainParameters {
            density: 0.0,
            ..GrainParameters::default()
        };
        let fade_samples =
            (GranularEngine::FREEZE_FADE_MS as f64 * 0.001 * SAMPLE_RATE).round() as usize;
        assert_eq!(fade_samples, 441);

        run(&mut engine, &vec![0.5; 1000], &params);
        let frozen_at = engine.delay_lines[0].newest_index();

        // freezing fades the input out against the old (silent) content, then stops writing
        engine.set_freeze(true);
        run(&mut engine, &vec![1.0; 2000], &params);
        let stopped_at = engine.delay_lines[0].newest_index();
        assert_eq!(stopped_at - frozen_at, fade_samples - 1);
        let fade_out = delay_content(&engine, frozen_at + 1..=stopped_at);
        assert!(fade_out[0] > 0.99);
        assert!(*fade_out.last().unwrap() < 0.01);
        assert!(fade_out.windows(2).all(|w| w[1] < w[0]));
        assert!(delay_content(&engine, 0..=frozen_at).iter().all(|s| *s == 0.5));

        run(&mut engine, &vec![1.0; 2000], &params);
        assert_eq!(engine.delay_lines[0].newest_index(), stopped_at);

        // unfreezing resumes writes right away, fading the input in
        engine.set_freeze(false);
        run(&mut engine, &vec![1.0; 1000], &params);
        let resumed_at = engine.delay_lines[0].newest_index();
        assert_eq!(resumed_at - stopped_at, 1000);
        let fade_in = delay_content(&engine, stopped_at + 1..=resumed_at);
        assert!(fade_in[0] < 0.01);
        assert!(fade_in[..fade_samples].windows(2).all(|w| w[1] > w[0]));
        assert_eq!(fade_in[fade_samples - 1], 1.0);
        assert!(fade_in[fade_samples..].iter().all(|s| *s == 1.0));
    }

    #[test]
    fn extreme_input_stays_finite() {
        let mut engine = prepared_engine(32);
        let params = GrainParameters {
            density: 100.0,
            grain_size_ms: 10.0,
            delay_ms: 0.0,
            pitch_semitones: 24.0,
            pitch_spray: 1.0,
            reverse_probability: 0.5,
            ..GrainParameters::default()
        };
        let mut input = (0..8192)
            .map(|i| if (i / 64) % 2 == 0 { 10.0 } else { -10.0 })
            .collect::<Vec<f32>>();
        input[100] = f32::NAN;
        input[200] = f32::INFINITY;
        let output = run(&mut engine, &input, &params);
        assert!(output.iter().all(|s| s.is_finite()));
    }
}
