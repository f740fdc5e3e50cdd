//! Up- and downsampling around nonlinear processing stages.

mod butterworth;
mod halfband;

use strum::{Display, EnumIter, EnumString, VariantNames};

use crate::Error;

use butterworth::{ButterworthCoefficients, ButterworthFilter};
use halfband::HalfbandFilter;

// -------------------------------------------------------------------------------------------------

/// Anti-aliasing filter quality of an [`Oversampler`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, VariantNames)]
pub enum OversamplingQuality {
    /// 4-pole IIR Butterworth filters. No latency, moderate alias rejection.
    Economy,
    /// 31-tap half-band FIR (~80 dB stopband) in linear phase mode.
    #[default]
    Standard,
    /// 63-tap half-band FIR (~100 dB stopband) in linear phase mode.
    High,
}

/// Phase response of an [`Oversampler`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, VariantNames)]
pub enum OversamplingMode {
    /// Minimum phase IIR filters, regardless of the quality setting.
    #[default]
    ZeroLatency,
    /// Linear phase FIR filters for Standard and High quality, IIR for Economy.
    LinearPhase,
}

impl OversamplingQuality {
    fn fir_taps(self) -> usize {
        match self {
            Self::Economy | Self::Standard => 31,
            Self::High => 63,
        }
    }

    fn fir_kaiser_beta(self) -> f64 {
        match self {
            Self::Economy | Self::Standard => 8.0,
            Self::High => 10.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Uses FIR filters for the given quality and mode, else IIR filters.
pub const fn uses_fir_filters(quality: OversamplingQuality, mode: OversamplingMode) -> bool {
    !matches!(quality, OversamplingQuality::Economy)
        && matches!(mode, OversamplingMode::LinearPhase)
}

/// Latency in samples at the base rate for the given oversampling settings.
pub const fn oversampling_latency(
    factor: usize,
    quality: OversamplingQuality,
    mode: OversamplingMode,
) -> usize {
    if !uses_fir_filters(quality, mode) {
        return 0;
    }
    let per_stage = match quality {
        OversamplingQuality::High => 31,
        _ => 15,
    };
    if factor >= 4 {
        per_stage * 2
    } else {
        per_stage
    }
}

// -------------------------------------------------------------------------------------------------

/// Cutoff of the IIR anti-aliasing filters, relative to the base sample rate.
const IIR_CUTOFF_RATIO: f64 = 0.45;

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum AntiAliasingFilter {
    Iir(ButterworthFilter),
    Fir(HalfbandFilter),
}

impl AntiAliasingFilter {
    fn new(quality: OversamplingQuality, mode: OversamplingMode) -> Self {
        if uses_fir_filters(quality, mode) {
            Self::Fir(HalfbandFilter::new(
                quality.fir_taps(),
                quality.fir_kaiser_beta(),
            ))
        } else {
            Self::Iir(ButterworthFilter::new())
        }
    }

    #[inline]
    fn process_sample(&mut self, coefficients: &ButterworthCoefficients, input: f32) -> f32 {
        match self {
            Self::Iir(filter) => filter.process_sample(coefficients, input),
            Self::Fir(filter) => filter.process_sample(input),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Iir(filter) => filter.reset(),
            Self::Fir(filter) => filter.reset(),
        }
    }
}

/// Up and down filters of a single 2x stage of a single channel.
#[derive(Debug, Clone)]
struct StageFilters {
    up: AntiAliasingFilter,
    down: AntiAliasingFilter,
}

// -------------------------------------------------------------------------------------------------

/// Runs a nonlinear processing callback at `FACTOR` times the base sample rate.
///
/// Input blocks are zero-stuffed and low-pass filtered in 2x stages (two cascaded stages for
/// 4x), handed to the callback at the oversampled rate, then low-pass filtered and decimated
/// back into the input buffers.
///
/// Call [`Self::prepare`] before processing: it allocates all buffers and filter states.
/// Processing and resetting never allocate.
#[derive(Debug, Clone)]
pub struct Oversampler<const FACTOR: usize, const CHANNELS: usize> {
    sample_rate: f64,
    max_block_size: usize,
    quality: OversamplingQuality,
    mode: OversamplingMode,
    latency: usize,
    prepared: bool,
    iir_coefficients: [ButterworthCoefficients; 2],
    filters: Vec<[StageFilters; 2]>,
    buffer: Vec<f32>,
    scratch: Vec<f32>,
}

/// Stereo 2x oversampler.
pub type Oversampler2x = Oversampler<2, 2>;
/// Stereo 4x oversampler.
pub type Oversampler4x = Oversampler<4, 2>;
/// Mono 2x oversampler.
pub type Oversampler2xMono = Oversampler<2, 1>;
/// Mono 4x oversampler.
pub type Oversampler4xMono = Oversampler<4, 1>;

impl<const FACTOR: usize, const CHANNELS: usize> Oversampler<FACTOR, CHANNELS> {
    const VERIFY: () = {
        assert!(FACTOR == 2 || FACTOR == 4, "Oversampling factor must be 2 or 4");
        assert!(CHANNELS >= 1, "Oversampler needs at least one channel");
    };

    const NUM_STAGES: usize = if FACTOR == 4 { 2 } else { 1 };

    /// Create a new, unprepared oversampler.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VERIFY;
        Self {
            sample_rate: 0.0,
            max_block_size: 0,
            quality: OversamplingQuality::default(),
            mode: OversamplingMode::default(),
            latency: 0,
            prepared: false,
            iir_coefficients: [ButterworthCoefficients::default(); 2],
            filters: Vec::new(),
            buffer: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// The oversampling factor.
    pub const fn factor(&self) -> usize {
        FACTOR
    }

    /// Number of processed channels.
    pub const fn channel_count(&self) -> usize {
        CHANNELS
    }

    /// True after a successful [`Self::prepare`] call.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// The currently applied filter quality.
    pub fn quality(&self) -> OversamplingQuality {
        self.quality
    }

    /// The currently applied filter mode.
    pub fn mode(&self) -> OversamplingMode {
        self.mode
    }

    /// True when linear phase FIR filters are in use.
    pub fn is_using_fir(&self) -> bool {
        uses_fir_filters(self.quality, self.mode)
    }

    /// Latency in samples at the base sample rate, introduced by the anti-aliasing filters.
    pub fn latency(&self) -> usize {
        self.latency
    }

    /// Max number of base rate frames accepted by `process`.
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Allocate buffers and set up filters. Not real-time safe.
    ///
    /// On errors the oversampler stays unprepared and processing is bypassed.
    pub fn prepare(
        &mut self,
        sample_rate: f64,
        max_block_size: usize,
        quality: OversamplingQuality,
        mode: OversamplingMode,
    ) -> Result<(), Error> {
        self.prepared = false;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid oversampler sample-rate: must be > 0, but is {sample_rate}"
            )));
        }
        if max_block_size == 0 {
            return Err(Error::ParameterError(
                "Invalid oversampler block size: must be > 0".to_string(),
            ));
        }

        let cutoff = sample_rate * IIR_CUTOFF_RATIO;
        for (stage, coefficients) in self.iir_coefficients.iter_mut().enumerate() {
            let stage_rate = sample_rate * (2 << stage) as f64;
            *coefficients = ButterworthCoefficients::lowpass(stage_rate, cutoff)?;
        }

        self.filters = (0..CHANNELS)
            .map(|_| {
                std::array::from_fn(|_| StageFilters {
                    up: AntiAliasingFilter::new(quality, mode),
                    down: AntiAliasingFilter::new(quality, mode),
                })
            })
            .collect();
        self.buffer = vec![0.0; max_block_size * FACTOR * CHANNELS];
        self.scratch = vec![0.0; max_block_size * FACTOR];

        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        self.quality = quality;
        self.mode = mode;
        self.latency = oversampling_latency(FACTOR, quality, mode);
        self.prepared = true;

        log::debug!(
            "Prepared {FACTOR}x oversampler: {sample_rate} Hz, {quality} quality, {mode}, \
            {} samples latency",
            self.latency
        );
        Ok(())
    }

    /// Clear all filter states and buffers.
    pub fn reset(&mut self) {
        for stages in &mut self.filters {
            for stage in stages.iter_mut() {
                stage.up.reset();
                stage.down.reset();
            }
        }
        self.buffer.fill(0.0);
        self.scratch.fill(0.0);
    }

    /// Upsample the given channel buffers, call `callback` with the oversampled channel buffers
    /// and downsample the result back into the given buffers.
    ///
    /// Does nothing when the oversampler is not prepared or when the block is longer than
    /// the prepared max block size. When the channel buffers differ in size, the shortest
    /// length is processed.
    pub fn process<F>(&mut self, mut channels: [&mut [f32]; CHANNELS], mut callback: F)
    where
        F: FnMut([&mut [f32]; CHANNELS]),
    {
        let num_frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        if !self.prepared || num_frames == 0 || num_frames > self.max_block_size {
            return;
        }
        let oversampled_frames = num_frames * FACTOR;

        for (channel, (input, stages)) in channels.iter().zip(self.filters.iter_mut()).enumerate()
        {
            let offset = channel * self.max_block_size * FACTOR;
            let output = &mut self.buffer[offset..offset + oversampled_frames];
            Self::upsample(
                &self.iir_coefficients,
                stages,
                &input[..num_frames],
                output,
                &mut self.scratch,
            );
        }

        {
            let mut chunks = self.buffer.chunks_exact_mut(self.max_block_size * FACTOR);
            let oversampled: [&mut [f32]; CHANNELS] = std::array::from_fn(|_| {
                let chunk = chunks.next().unwrap_or_default();
                let len = chunk.len().min(oversampled_frames);
                &mut chunk[..len]
            });
            callback(oversampled);
        }

        for (channel, (output, stages)) in channels
            .iter_mut()
            .zip(self.filters.iter_mut())
            .enumerate()
        {
            let offset = channel * self.max_block_size * FACTOR;
            let input = &mut self.buffer[offset..offset + oversampled_frames];
            Self::downsample(
                &self.iir_coefficients,
                stages,
                input,
                &mut output[..num_frames],
                &mut self.scratch,
            );
        }
    }

    fn upsample(
        coefficients: &[ButterworthCoefficients; 2],
        stages: &mut [StageFilters; 2],
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [f32],
    ) {
        if Self::NUM_STAGES == 1 {
            Self::upsample_stage(&coefficients[0], &mut stages[0].up, input, output);
        } else {
            let intermediate = &mut scratch[..input.len() * 2];
            Self::upsample_stage(&coefficients[0], &mut stages[0].up, input, intermediate);
            Self::upsample_stage(&coefficients[1], &mut stages[1].up, intermediate, output);
        }
    }

    fn downsample(
        coefficients: &[ButterworthCoefficients; 2],
        stages: &mut [StageFilters; 2],
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [f32],
    ) {
        if Self::NUM_STAGES == 1 {
            Self::downsample_stage(&coefficients[0], &mut stages[0].down, input, output);
        } else {
            let intermediate = &mut scratch[..output.len() * 2];
            Self::downsample_stage(&coefficients[1], &mut stages[1].down, input, intermediate);
            Self::downsample_stage(&coefficients[0], &mut stages[0].down, intermediate, output);
        }
    }

    /// Zero-stuff by 2 and low-pass. The gain of 2 compensates the energy lost by stuffing.
    #[inline]
    fn upsample_stage(
        coefficients: &ButterworthCoefficients,
        filter: &mut AntiAliasingFilter,
        input: &[f32],
        output: &mut [f32],
    ) {
        debug_assert_eq!(input.len() * 2, output.len());
        for (frame, sample) in output.chunks_exact_mut(2).zip(input) {
            frame[0] = filter.process_sample(coefficients, *sample * 2.0);
            frame[1] = filter.process_sample(coefficients, 0.0);
        }
    }

    /// Low-pass and keep every second sample.
    #[inline]
    fn downsample_stage(
        coefficients: &ButterworthCoefficients,
        filter: &mut AntiAliasingFilter,
        input: &[f32],
        output: &mut [f32],
    ) {
        debug_assert_eq!(output.len() * 2, input.len());
        for (frame, sample) in input.chunks_exact(2).zip(output.iter_mut()) {
            *sample = filter.process_sample(coefficients, frame[0]);
            let _ = filter.process_sample(coefficients, frame[1]);
        }
    }
}

impl<const FACTOR: usize> Oversampler<FACTOR, 2> {
    /// Stereo convenience wrapper for [`Self::process`].
    pub fn process_stereo<F>(&mut self, left: &mut [f32], right: &mut [f32], mut callback: F)
    where
        F: FnMut(&mut [f32], &mut [f32]),
    {
        self.process([left, right], |[left, right]| callback(left, right));
    }
}

impl<const FACTOR: usize> Oversampler<FACTOR, 1> {
    /// Mono convenience wrapper for [`Self::process`].
    pub fn process_mono<F>(&mut self, buffer: &mut [f32], mut callback: F)
    where
        F: FnMut(&mut [f32]),
    {
        self.process([buffer], |[buffer]| callback(buffer));
    }
}

impl<const FACTOR: usize, const CHANNELS: usize> Default for Oversampler<FACTOR, CHANNELS> {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32 * 0.5)
            .collect()
    }

    #[test]
    fn latency_table() {
        use OversamplingMode::*;
        use OversamplingQuality::*;
        for mode in OversamplingMode::iter() {
            assert_eq!(oversampling_latency(2, Economy, mode), 0);
            assert_eq!(oversampling_latency(4, Economy, mode), 0);
        }
        for quality in OversamplingQuality::iter() {
            assert_eq!(oversampling_latency(2, quality, ZeroLatency), 0);
            assert_eq!(oversampling_latency(4, quality, ZeroLatency), 0);
        }
        assert_eq!(oversampling_latency(2, Standard, LinearPhase), 15);
        assert_eq!(oversampling_latency(4, Standard, LinearPhase), 30);
        assert_eq!(oversampling_latency(2, High, LinearPhase), 31);
        assert_eq!(oversampling_latency(4, High, LinearPhase), 62);

        let mut oversampler = Oversampler4x::new();
        oversampler.prepare(44100.0, 64, High, LinearPhase).unwrap();
        assert!(oversampler.is_using_fir());
        assert_eq!(oversampler.latency(), 62);
        oversampler.prepare(44100.0, 64, High, ZeroLatency).unwrap();
        assert!(!oversampler.is_using_fir());
        assert_eq!(oversampler.latency(), 0);
    }

    #[test]
    fn invalid_prepare_bypasses_processing() {
        let mut oversampler = Oversampler2x::new();
        assert!(oversampler
            .prepare(0.0, 64, OversamplingQuality::Standard, OversamplingMode::LinearPhase)
            .is_err());
        assert!(!oversampler.is_prepared());

        let mut left = vec![0.25; 16];
        let mut right = vec![-0.25; 16];
        let mut called = false;
        oversampler.process_stereo(&mut left, &mut right, |_, _| called = true);
        assert!(!called);
        assert!(left.iter().all(|s| *s == 0.25));
        assert!(right.iter().all(|s| *s == -0.25));
    }

    #[test]
    fn oversized_blocks_are_ignored() {
        let mut oversampler = Oversampler2xMono::new();
        oversampler
            .prepare(48000.0, 32, OversamplingQuality::Economy, OversamplingMode::ZeroLatency)
            .unwrap();
        let mut buffer = vec![0.5; 64];
        let mut called = false;
        oversampler.process_mono(&mut buffer, |_| called = true);
        assert!(!called);
        assert!(buffer.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn callback_runs_at_oversampled_rate() {
        let mut oversampler = Oversampler4x::new();
        oversampler
            .prepare(44100.0, 128, OversamplingQuality::Standard, OversamplingMode::LinearPhase)
            .unwrap();
        let mut left = vec![0.0; 100];
        let mut right = vec![0.0; 100];
        let mut lengths = (0, 0);
        oversampler.process_stereo(&mut left, &mut right, |l, r| lengths = (l.len(), r.len()));
        assert_eq!(lengths, (400, 400));
    }

    #[test]
    fn identity_callback_preserves_signal() {
        let sample_rate = 44100.0;
        for quality in OversamplingQuality::iter() {
            for mode in OversamplingMode::iter() {
                let mut oversampler = Oversampler2xMono::new();
                oversampler.prepare(sample_rate, 512, quality, mode).unwrap();
                let latency = oversampler.latency();

                let input = sine(1000.0, sample_rate, 4096);
                let mut output = input.clone();
                for block in output.chunks_mut(512) {
                    oversampler.process_mono(block, |_| {});
                }
                if oversampler.is_using_fir() {
                    // linear phase: delayed copy of the input
                    for i in 2048..4096 {
                        assert!(
                            (output[i] - input[i - latency]).abs() < 0.01,
                            "{quality} {mode}: sample {i}"
                        );
                    }
                } else {
                    // minimum phase: same amplitude
                    let peak = output[2048..].iter().fold(0.0f32, |p, s| p.max(s.abs()));
                    assert!((peak - 0.5).abs() < 0.02, "{quality} {mode}: peak {peak}");
                }
            }
        }
    }

    #[test]
    fn nonlinear_callback_and_reset() {
        let mut oversampler = Oversampler4x::new();
        oversampler
            .prepare(48000.0, 256, OversamplingQuality::High, OversamplingMode::LinearPhase)
            .unwrap();
        let mut left = sine(5000.0, 48000.0, 256).iter().map(|s| s * 20.0).collect::<Vec<_>>();
        let mut right = left.clone();
        oversampler.process_stereo(&mut left, &mut right, |l, r| {
            for sample in l.iter_mut().chain(r.iter_mut()) {
                *sample = crate::utils::fast_tanh(*sample);
            }
        });
        assert!(left.iter().chain(right.iter()).all(|s| s.is_finite() && s.abs() < 1.5));
        assert_eq!(left, right);

        oversampler.reset();
        let mut silence = vec![0.0; 256];
        let mut silence_right = vec![0.0; 256];
        oversampler.process_stereo(&mut silence, &mut silence_right, |_, _| {});
        assert!(silence.iter().all(|s| *s == 0.0));
    }
}
