use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use four_cc::FourCC;

use crate::{
    effect::{BlockContext, Effect},
    granular::{GrainEnvelope, GrainParameters, GranularEngine},
    parameter::{
        BooleanParameter, BooleanParameterValue, EnumParameter, EnumParameterValue,
        FloatParameter, ParameterValueUpdate, SmoothedParameterValue,
    },
    utils::{
        db_to_linear, fast_tanh, sanitize_sample,
        tempo::{NoteValue, TimeMode},
    },
    ClonableParameter, Error,
};

// -------------------------------------------------------------------------------------------------

/// A stereo granular delay.
///
/// The input, mixed with the previous block's wet output as feedback, gets written into a delay
/// line pair. Grains, triggered at `density` grains per second, replay snippets of the delayed
/// signal at `delay time` behind the input with their own pitch, panning, direction and envelope.
/// The wet grain sum is mixed with the dry input and scaled by the output gain.
///
/// Delay times can be set freely or synced to the host tempo with a note value. Freezing stops
/// recording, so grains keep scanning the frozen history.
#[derive(Debug, Clone)]
pub struct GranularDelay {
    sample_rate: f64,
    max_block_size: usize,
    prepared: bool,

    // Parameters
    grain_size: SmoothedParameterValue,
    density: SmoothedParameterValue,
    delay_time: SmoothedParameterValue,
    pitch: SmoothedParameterValue,
    pitch_spray: SmoothedParameterValue,
    position_spray: SmoothedParameterValue,
    pan_spray: SmoothedParameterValue,
    reverse: SmoothedParameterValue,
    freeze: BooleanParameterValue,
    feedback: SmoothedParameterValue,
    dry_wet: SmoothedParameterValue,
    output_gain: SmoothedParameterValue,
    envelope: EnumParameterValue<GrainEnvelope>,
    time_mode: EnumParameterValue<TimeMode>,
    note_value: EnumParameterValue<NoteValue>,

    // Runtime data
    engine: GranularEngine,
    feedback_left: Vec<f32>,
    feedback_right: Vec<f32>,
    feedback_len: usize,
    current_delay_ms: f32,
}

impl GranularDelay {
    pub const EFFECT_NAME: &str = "GranularDelay";
    pub const GRAIN_SIZE_ID: FourCC = FourCC(*b"gsiz");
    pub const DENSITY_ID: FourCC = FourCC(*b"dens");
    pub const DELAY_TIME_ID: FourCC = FourCC(*b"dtim");
    pub const PITCH_ID: FourCC = FourCC(*b"ptch");
    pub const PITCH_SPRAY_ID: FourCC = FourCC(*b"pspr");
    pub const POSITION_SPRAY_ID: FourCC = FourCC(*b"xspr");
    pub const PAN_SPRAY_ID: FourCC = FourCC(*b"nspr");
    pub const REVERSE_ID: FourCC = FourCC(*b"rvrs");
    pub const FREEZE_ID: FourCC = FourCC(*b"frz ");
    pub const FEEDBACK_ID: FourCC = FourCC(*b"fdbk");
    pub const DRY_WET_ID: FourCC = FourCC(*b"mix ");
    pub const OUTPUT_GAIN_ID: FourCC = FourCC(*b"gain");
    pub const ENVELOPE_ID: FourCC = FourCC(*b"envl");
    pub const TIME_MODE_ID: FourCC = FourCC(*b"tmod");
    pub const NOTE_VALUE_ID: FourCC = FourCC(*b"note");

    /// Max number of simultaneously playing grains.
    pub const GRAIN_CAPACITY: usize = 64;
    /// Size of a serialized state in bytes: 15 little endian 4 byte values.
    pub const STATE_SIZE: usize = 15 * 4;

    /// Creates a new `GranularDelay` with default parameter values.
    pub fn new() -> Self {
        let to_string_percent = |v: f32| format!("{:.2}", v * 100.0);
        let from_string_percent = |v: &str| v.parse::<f32>().map(|f| f / 100.0).ok();

        Self {
            sample_rate: 0.0,
            max_block_size: 0,
            prepared: false,

            grain_size: SmoothedParameterValue::from_description(
                FloatParameter::new(
                    Self::GRAIN_SIZE_ID,
                    "Grain Size",
                    GranularEngine::MIN_GRAIN_SIZE_MS..=GranularEngine::MAX_GRAIN_SIZE_MS,
                    100.0,
                )
                .with_unit("ms"),
            ),
            density: SmoothedParameterValue::from_description(
                FloatParameter::new(
                    Self::DENSITY_ID,
                    "Density",
                    0.0..=GranularEngine::MAX_DENSITY,
                    10.0,
                )
                .with_unit("Hz"),
            ),
            delay_time: SmoothedParameterValue::from_description(
                FloatParameter::new(
                    Self::DELAY_TIME_ID,
                    "Delay Time",
                    0.0..=GranularEngine::MAX_DELAY_MS,
                    500.0,
                )
                .with_unit("ms"),
            ),
            pitch: SmoothedParameterValue::from_description(
                FloatParameter::new(
                    Self::PITCH_ID,
                    "Pitch",
                    -GranularEngine::MAX_PITCH_SEMITONES..=GranularEngine::MAX_PITCH_SEMITONES,
                    0.0,
                )
                .with_unit("st"),
            ),
            pitch_spray: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::PITCH_SPRAY_ID, "Pitch Spray", 0.0..=1.0, 0.0)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            position_spray: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::POSITION_SPRAY_ID, "Position Spray", 0.0..=1.0, 0.0)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            pan_spray: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::PAN_SPRAY_ID, "Pan Spray", 0.0..=1.0, 0.0)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            reverse: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::REVERSE_ID, "Reverse", 0.0..=1.0, 0.0)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            freeze: BooleanParameterValue::from_description(BooleanParameter::new(
                Self::FREEZE_ID,
                "Freeze",
                false,
            )),
            feedback: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::FEEDBACK_ID, "Feedback", 0.0..=1.2, 0.0)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            dry_wet: SmoothedParameterValue::from_description(
                FloatParameter::new(Self::DRY_WET_ID, "Dry/Wet", 0.0..=1.0, 0.5)
                    .with_unit("%")
                    .with_display(to_string_percent, from_string_percent),
            ),
            output_gain: SmoothedParameterValue::from_description(
                FloatParameter::new(
                    Self::OUTPUT_GAIN_ID,
                    "Output Gain",
                    -96.0..=6.0,
                    0.0, //
                )
                .with_unit("dB"),
            ),
            envelope: EnumParameterValue::from_description(EnumParameter::new(
                Self::ENVELOPE_ID,
                "Envelope",
                GrainEnvelope::Hann,
            )),
            time_mode: EnumParameterValue::from_description(EnumParameter::new(
                Self::TIME_MODE_ID,
                "Time Mode",
                TimeMode::Free,
            )),
            note_value: EnumParameterValue::from_description(EnumParameter::new(
                Self::NOTE_VALUE_ID,
                "Note Value",
                NoteValue::Eighth,
            )),

            engine: GranularEngine::new(),
            feedback_left: Vec::new(),
            feedback_right: Vec::new(),
            feedback_len: 0,
            current_delay_ms: 500.0,
        }
    }

    // Setters clamp into the parameter ranges and ramp continuous values.

    pub fn set_grain_size(&mut self, ms: f32) {
        self.grain_size.set_target_value_clamped(ms);
    }
    pub fn set_density(&mut self, grains_per_second: f32) {
        self.density.set_target_value_clamped(grains_per_second);
    }
    pub fn set_delay_time(&mut self, ms: f32) {
        self.delay_time.set_target_value_clamped(ms);
    }
    pub fn set_pitch(&mut self, semitones: f32) {
        self.pitch.set_target_value_clamped(semitones);
    }
    pub fn set_pitch_spray(&mut self, amount: f32) {
        self.pitch_spray.set_target_value_clamped(amount);
    }
    pub fn set_position_spray(&mut self, amount: f32) {
        self.position_spray.set_target_value_clamped(amount);
    }
    pub fn set_pan_spray(&mut self, amount: f32) {
        self.pan_spray.set_target_value_clamped(amount);
    }
    pub fn set_reverse_probability(&mut self, probability: f32) {
        self.reverse.set_target_value_clamped(probability);
    }
    pub fn set_freeze(&mut self, freeze: bool) {
        self.freeze.set_value(freeze);
    }
    pub fn set_feedback(&mut self, amount: f32) {
        self.feedback.set_target_value_clamped(amount);
    }
    pub fn set_dry_wet(&mut self, mix: f32) {
        self.dry_wet.set_target_value_clamped(mix);
    }
    pub fn set_output_gain_db(&mut self, db: f32) {
        self.output_gain.set_target_value_clamped(db);
    }
    pub fn set_envelope(&mut self, envelope: GrainEnvelope) {
        self.envelope.set_value(envelope);
    }
    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.time_mode.set_value(mode);
    }
    pub fn set_note_value(&mut self, note: NoteValue) {
        self.note_value.set_value(note);
    }

    pub fn grain_size(&self) -> f32 {
        self.grain_size.target_value()
    }
    pub fn density(&self) -> f32 {
        self.density.target_value()
    }
    pub fn delay_time(&self) -> f32 {
        self.delay_time.target_value()
    }
    pub fn pitch(&self) -> f32 {
        self.pitch.target_value()
    }
    pub fn pitch_spray(&self) -> f32 {
        self.pitch_spray.target_value()
    }
    pub fn position_spray(&self) -> f32 {
        self.position_spray.target_value()
    }
    pub fn pan_spray(&self) -> f32 {
        self.pan_spray.target_value()
    }
    pub fn reverse_probability(&self) -> f32 {
        self.reverse.target_value()
    }
    pub fn freeze(&self) -> bool {
        self.freeze.value()
    }
    pub fn feedback(&self) -> f32 {
        self.feedback.target_value()
    }
    pub fn dry_wet(&self) -> f32 {
        self.dry_wet.target_value()
    }
    pub fn output_gain_db(&self) -> f32 {
        self.output_gain.target_value()
    }
    pub fn envelope(&self) -> GrainEnvelope {
        self.envelope.value()
    }
    pub fn time_mode(&self) -> TimeMode {
        self.time_mode.value()
    }
    pub fn note_value(&self) -> NoteValue {
        self.note_value.value()
    }

    /// Delay time which gets applied at the given host tempo: the delay time parameter in
    /// free mode, or the note value's length, limited to the max delay time, when synced.
    pub fn effective_delay_ms(&self, tempo_bpm: f64) -> f32 {
        match self.time_mode.value() {
            TimeMode::Free => self.delay_time.target_value(),
            TimeMode::Synced => (self.note_value.value().to_ms(tempo_bpm) as f32)
                .min(GranularEngine::MAX_DELAY_MS),
        }
    }

    /// Delay time used in the most recently processed block.
    pub fn current_delay_ms(&self) -> f32 {
        self.current_delay_ms
    }

    /// Number of currently playing grains.
    pub fn active_grain_count(&self) -> usize {
        self.engine.active_grain_count()
    }

    /// Reseed grain scheduling and randomization, making the output reproducible.
    pub fn seed(&mut self, seed: u64) {
        self.engine.seed(seed);
    }

    /// Jump all smoothed parameters to their target values.
    pub fn snap_parameters(&mut self) {
        for value in self.smoothed_values_mut() {
            value.snap_to_target();
        }
    }

    /// Write all parameter values as little endian f32 and i32 values.
    ///
    /// Field order: grain size, density, delay time, pitch, pitch spray, position spray,
    /// pan spray, reverse, freeze (i32), feedback, dry/wet, output gain, envelope (i32),
    /// time mode (i32), note value (i32). Changing the order breaks existing states.
    pub fn save_state<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_f32::<LittleEndian>(self.grain_size())?;
        writer.write_f32::<LittleEndian>(self.density())?;
        writer.write_f32::<LittleEndian>(self.delay_time())?;
        writer.write_f32::<LittleEndian>(self.pitch())?;
        writer.write_f32::<LittleEndian>(self.pitch_spray())?;
        writer.write_f32::<LittleEndian>(self.position_spray())?;
        writer.write_f32::<LittleEndian>(self.pan_spray())?;
        writer.write_f32::<LittleEndian>(self.reverse_probability())?;
        writer.write_i32::<LittleEndian>(self.freeze() as i32)?;
        writer.write_f32::<LittleEndian>(self.feedback())?;
        writer.write_f32::<LittleEndian>(self.dry_wet())?;
        writer.write_f32::<LittleEndian>(self.output_gain_db())?;
        writer.write_i32::<LittleEndian>(self.envelope.index() as i32)?;
        writer.write_i32::<LittleEndian>(self.time_mode.index() as i32)?;
        writer.write_i32::<LittleEndian>(self.note_value().index())?;
        Ok(())
    }

    /// Read parameter values written by [`Self::save_state`]. Values are applied without
    /// smoothing. When the stream is incomplete, no value gets applied.
    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), Error> {
        let mut floats = [0.0f32; 11];
        let mut freeze = 0;
        let mut enums = [0i32; 3];
        Self::read_state(reader, &mut floats, &mut freeze, &mut enums).map_err(|err| {
            Error::StateError(format!("Failed to read granular delay state: {err}"))
        })?;

        let [
            grain_size,
            density,
            delay_time,
            pitch,
            pitch_spray,
            position_spray,
            pan_spray,
            reverse,
            feedback,
            dry_wet,
            output_gain,
        ] = floats;
        self.grain_size.init_value_clamped(grain_size);
        self.density.init_value_clamped(density);
        self.delay_time.init_value_clamped(delay_time);
        self.pitch.init_value_clamped(pitch);
        self.pitch_spray.init_value_clamped(pitch_spray);
        self.position_spray.init_value_clamped(position_spray);
        self.pan_spray.init_value_clamped(pan_spray);
        self.reverse.init_value_clamped(reverse);
        self.freeze.set_value(freeze != 0);
        self.feedback.init_value_clamped(feedback);
        self.dry_wet.init_value_clamped(dry_wet);
        self.output_gain.init_value_clamped(output_gain);
        self.envelope.set_value(GrainEnvelope::from_index(enums[0]));
        let time_mode = u8::try_from(enums[1]).ok().and_then(TimeMode::from_repr);
        self.time_mode.set_value(time_mode.unwrap_or_default());
        self.note_value.set_value(NoteValue::from_index(enums[2]));
        Ok(())
    }

    fn read_state<R: Read>(
        reader: &mut R,
        floats: &mut [f32; 11],
        freeze: &mut i32,
        enums: &mut [i32; 3],
    ) -> std::io::Result<()> {
        for value in &mut floats[..8] {
            *value = reader.read_f32::<LittleEndian>()?;
        }
        *freeze = reader.read_i32::<LittleEndian>()?;
        for value in &mut floats[8..] {
            *value = reader.read_f32::<LittleEndian>()?;
        }
        for value in enums.iter_mut() {
            *value = reader.read_i32::<LittleEndian>()?;
        }
        Ok(())
    }

    fn smoothed_values_mut(&mut self) -> [&mut SmoothedParameterValue; 11] {
        [
            &mut self.grain_size,
            &mut self.density,
            &mut self.delay_time,
            &mut self.pitch,
            &mut self.pitch_spray,
            &mut self.position_spray,
            &mut self.pan_spray,
            &mut self.reverse,
            &mut self.feedback,
            &mut self.dry_wet,
            &mut self.output_gain,
        ]
    }

    fn process_chunk(&mut self, left: &mut [f32], right: &mut [f32], synced_delay: Option<f32>) {
        debug_assert!(left.len() <= self.feedback_left.len());
        let envelope = self.envelope.value();
        let mut gain = db_to_linear(self.output_gain.current_value());

        for (index, (output_left, output_right)) in
            left.iter_mut().zip(right.iter_mut()).enumerate()
        {
            let (input_left, input_right) =
                (sanitize_sample(*output_left), sanitize_sample(*output_right));

            // mix in feedback from the previous block, saturated: overlapping grains can sum
            // above unity gain
            let feedback = self.feedback.next_value();
            let (feedback_left, feedback_right) = if index < self.feedback_len {
                (self.feedback_left[index], self.feedback_right[index])
            } else {
                (0.0, 0.0)
            };
            let engine_left = input_left + fast_tanh(feedback * feedback_left);
            let engine_right = input_right + fast_tanh(feedback * feedback_right);

            let delay_ms = self.delay_time.next_value();
            let params = GrainParameters {
                grain_size_ms: self.grain_size.next_value(),
                density: self.density.next_value(),
                delay_ms: synced_delay.unwrap_or(delay_ms),
                pitch_semitones: self.pitch.next_value(),
                pitch_spray: self.pitch_spray.next_value(),
                position_spray: self.position_spray.next_value(),
                pan_spray: self.pan_spray.next_value(),
                reverse_probability: self.reverse.next_value(),
                envelope,
            };
            let (wet_left, wet_right) = self.engine.process_frame(engine_left, engine_right, &params);

            // store for the next block's feedback
            self.feedback_left[index] = wet_left;
            self.feedback_right[index] = wet_right;

            let wet = self.dry_wet.next_value();
            let dry = 1.0 - wet;
            if self.output_gain.value_need_ramp() {
                gain = db_to_linear(self.output_gain.next_value());
            }
            *output_left = (input_left * dry + wet_left * wet) * gain;
            *output_right = (input_right * dry + wet_right * wet) * gain;
        }
        self.feedback_len = left.len().min(right.len());
    }
}

impl Default for GranularDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for GranularDelay {
    fn name(&self) -> &'static str {
        Self::EFFECT_NAME
    }

    fn parameters(&self) -> Vec<&dyn ClonableParameter> {
        vec![
            self.grain_size.description(),
            self.density.description(),
            self.delay_time.description(),
            self.pitch.description(),
            self.pitch_spray.description(),
            self.position_spray.description(),
            self.pan_spray.description(),
            self.reverse.description(),
            self.freeze.description(),
            self.feedback.description(),
            self.dry_wet.description(),
            self.output_gain.description(),
            self.envelope.description(),
            self.time_mode.description(),
            self.note_value.description(),
        ]
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) -> Result<(), Error> {
        self.prepared = false;
        if max_block_size == 0 {
            return Err(Error::ParameterError(
                "GranularDelay needs a non zero max block size".to_owned(),
            ));
        }
        self.engine.prepare(sample_rate, Self::GRAIN_CAPACITY)?;

        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        for value in self.smoothed_values_mut() {
            value.set_sample_rate(sample_rate);
        }
        self.feedback_left = vec![0.0; max_block_size];
        self.feedback_right = vec![0.0; max_block_size];
        self.prepared = true;
        self.reset();

        log::debug!(
            "Prepared {}: {sample_rate} Hz, max block size {max_block_size}",
            Self::EFFECT_NAME
        );
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn process(&mut self, left: &mut [f32], right: &mut [f32], context: &BlockContext) {
        if !self.prepared {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }
        self.engine.set_freeze(self.freeze.value());

        self.current_delay_ms = self.effective_delay_ms(context.tempo_bpm);
        let synced_delay = match self.time_mode.value() {
            TimeMode::Free => None,
            TimeMode::Synced => Some(self.current_delay_ms),
        };

        let len = left.len().min(right.len());
        for (left, right) in left[..len]
            .chunks_mut(self.max_block_size)
            .zip(right[..len].chunks_mut(self.max_block_size))
        {
            self.process_chunk(left, right, synced_delay);
        }
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.feedback_left.fill(0.0);
        self.feedback_right.fill(0.0);
        self.feedback_len = 0;
        self.snap_parameters();
    }

    fn process_tail(&self) -> Option<usize> {
        if self.freeze.value() || self.feedback.target_value() > 0.0 {
            Some(usize::MAX)
        } else {
            // longest sprayed delay plus the longest grain
            let tail_ms = 2.0 * GranularEngine::MAX_DELAY_MS + GranularEngine::MAX_GRAIN_SIZE_MS;
            Some((tail_ms as f64 * 0.001 * self.sample_rate).ceil() as usize)
        }
    }

    fn process_parameter_update(
        &mut self,
        id: FourCC,
        value: &ParameterValueUpdate,
    ) -> Result<(), Error> {
        match id {
            Self::GRAIN_SIZE_ID => self.grain_size.apply_update(value),
            Self::DENSITY_ID => self.density.apply_update(value),
            Self::DELAY_TIME_ID => self.delay_time.apply_update(value),
            Self::PITCH_ID => self.pitch.apply_update(value),
            Self::PITCH_SPRAY_ID => self.pitch_spray.apply_update(value),
            Self::POSITION_SPRAY_ID => self.position_spray.apply_update(value),
            Self::PAN_SPRAY_ID => self.pan_spray.apply_update(value),
            Self::REVERSE_ID => self.reverse.apply_update(value),
            Self::FREEZE_ID => self.freeze.apply_update(value),
            Self::FEEDBACK_ID => self.feedback.apply_update(value),
            Self::DRY_WET_ID => self.dry_wet.apply_update(value),
            Self::OUTPUT_GAIN_ID => self.output_gain.apply_update(value),
            Self::ENVELOPE_ID => self.envelope.apply_update(value),
            Self::TIME_MODE_ID => self.time_mode.apply_update(value),
            Self::NOTE_VALUE_ID => self.note_value.apply_update(value),
            _ => {
                log::warn!("Unknown parameter '{id}' for effect '{}'", self.name());
                return Err(Error::ParameterError(format!(
                    "Unknown parameter: '{id}' for effect '{}'",
                    self.name()
                )));
            }
        };
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::parameter::SharedParameterValues;

    const SAMPLE_RATE: f64 = 44100.0;
    const BLOCK_SIZE: usize = 512;

    fn prepared_delay() -> GranularDelay {
        let mut delay = GranularDelay::new();
        delay.prepare(SAMPLE_RATE, BLOCK_SIZE).unwrap();
        delay
    }

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
    }

    /// Process a mono signal on both channels in blocks, guarding against allocations.
    fn run(delay: &mut GranularDelay, input: &[f32], context: &BlockContext) -> Vec<f32> {
        let mut left = input.to_vec();
        let mut right = input.to_vec();
        for (left, right) in left.chunks_mut(BLOCK_SIZE).zip(right.chunks_mut(BLOCK_SIZE)) {
            #[cfg(feature = "assert-allocs")]
            assert_no_alloc::assert_no_alloc(|| delay.process(left, right, context));
            #[cfg(not(feature = "assert-allocs"))]
            delay.process(left, right, context);
        }
        left.iter().zip(right).map(|(l, r)| l + r).collect()
    }

    #[test]
    fn parameter_descriptors() {
        let delay = GranularDelay::new();
        let parameters = delay.parameters();
        assert_eq!(parameters.len(), 15);
        let mut ids = parameters.iter().map(|p| p.id()).collect::<Vec<_>>();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        assert_eq!(ids.len(), 15);
    }

    #[test]
    fn unprepared_outputs_silence() {
        let mut delay = GranularDelay::new();
        assert!(!delay.is_prepared());
        assert!(delay.prepare(0.0, BLOCK_SIZE).is_err());
        assert!(delay.prepare(SAMPLE_RATE, 0).is_err());
        assert!(!delay.is_prepared());
        let mut left = vec![1.0; 64];
        let mut right = vec![1.0; 64];
        delay.process(&mut left, &mut right, &BlockContext::default());
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
    }

    #[test]
    fn no_grains_fully_wet_is_silent() {
        let mut delay = prepared_delay();
        delay.set_density(0.0);
        delay.set_feedback(0.0);
        delay.set_dry_wet(1.0);
        delay.snap_parameters();
        let output = run(&mut delay, &noise(44100, 1), &BlockContext::default());
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn dry_signal_passes_unchanged() {
        let mut delay = prepared_delay();
        delay.set_dry_wet(0.0);
        delay.snap_parameters();
        let input = noise(4096, 2);
        let output = run(&mut delay, &input, &BlockContext::default());
        for (input, output) in input.iter().zip(output) {
            assert!((input * 2.0 - output).abs() < 1e-6);
        }
    }

    #[test]
    fn output_stays_finite() {
        let mut delay = prepared_delay();
        delay.set_density(100.0);
        delay.set_grain_size(10.0);
        delay.set_delay_time(5.0);
        delay.set_feedback(1.2);
        delay.set_pitch(24.0);
        delay.set_pitch_spray(1.0);
        delay.set_position_spray(1.0);
        delay.set_reverse_probability(0.5);
        delay.set_dry_wet(1.0);
        delay.set_output_gain_db(6.0);

        let full_scale = (0..8192)
            .map(|i| if (i / 32) % 2 == 0 { 10.0 } else { -10.0 })
            .collect::<Vec<f32>>();
        let silence = vec![0.0; 8192];
        let transients = (0..8192)
            .map(|i| if i % 1000 < 4 { 10.0 } else { 0.0 })
            .collect::<Vec<f32>>();
        for input in [&full_scale, &silence, &transients] {
            let output = run(&mut delay, input, &BlockContext::default());
            assert!(output.iter().all(|s| s.is_finite()));
        }
        assert!(delay.active_grain_count() <= GranularDelay::GRAIN_CAPACITY);
    }

    #[test]
    fn seeded_output_is_reproducible() {
        let configure = |delay: &mut GranularDelay| {
            delay.set_density(40.0);
            delay.set_delay_time(50.0);
            delay.set_pitch_spray(0.3);
            delay.set_position_spray(0.5);
            delay.set_pan_spray(1.0);
            delay.set_feedback(0.5);
            delay.seed(7);
        };
        let input = noise(22050, 3);
        let mut first = prepared_delay();
        configure(&mut first);
        let mut second = prepared_delay();
        configure(&mut second);
        let output = run(&mut first, &input, &BlockContext::default());
        assert_eq!(output, run(&mut second, &input, &BlockContext::default()));
        assert!(output.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn large_blocks_get_split() {
        let mut chunked = GranularDelay::new();
        chunked.prepare(SAMPLE_RATE, 256).unwrap();
        let mut whole = GranularDelay::new();
        whole.prepare(SAMPLE_RATE, 256).unwrap();
        for delay in [&mut chunked, &mut whole] {
            delay.set_density(80.0);
            delay.set_delay_time(10.0);
            delay.seed(9);
        }
        let input = noise(1024, 4);
        let (mut left_a, mut right_a) = (input.clone(), input.clone());
        for (left, right) in left_a.chunks_mut(256).zip(right_a.chunks_mut(256)) {
            chunked.process(left, right, &BlockContext::default());
        }
        let (mut left_b, mut right_b) = (input.clone(), input);
        whole.process(&mut left_b, &mut right_b, &BlockContext::default());
        assert_eq!(left_a, left_b);
        assert_eq!(right_a, right_b);
    }

    #[test]
    fn output_gain_ramps_once_per_frame() {
        let mut delay = prepared_delay();
        delay.set_dry_wet(0.0);
        delay.snap_parameters();
        delay.set_output_gain_db(-24.0);
        let mut expected_gain = delay.output_gain.clone();

        let (mut left, mut right) = (vec![0.5; BLOCK_SIZE], vec![0.5; BLOCK_SIZE]);
        delay.process(&mut left, &mut right, &BlockContext::default());
        for (frame, sample) in left.iter().enumerate() {
            let expected = 0.5 * db_to_linear(expected_gain.next_value());
            assert!((sample - expected).abs() < 1e-6, "gain mismatch at frame {frame}");
        }
        assert!(left[BLOCK_SIZE - 1] < 0.5);
    }

    #[test]
    fn feedback_loop_stays_bounded() {
        for feedback in [1.0, 1.2] {
            let mut delay = prepared_delay();
            delay.set_density(100.0);
            delay.set_grain_size(500.0);
            delay.set_delay_time(10.0);
            delay.set_feedback(feedback);
            delay.set_dry_wet(1.0);
            delay.snap_parameters();

            let output = run(&mut delay, &noise(88200, 7), &BlockContext::default());
            // playing and fading grains read at most |input| + 1, the saturated feedback
            let voices = 2 * GranularDelay::GRAIN_CAPACITY;
            let bound = voices as f32 * 2.0 * std::f32::consts::SQRT_2;
            assert!(output.iter().all(|s| s.is_finite() && s.abs() < bound));
            assert!(output.iter().any(|s| s.abs() > 0.1));
        }
    }

    #[test]
    fn freeze_holds_recorded_audio() {
        let configure = |delay: &mut GranularDelay| {
            delay.set_density(50.0);
            delay.set_delay_time(50.0);
            delay.set_grain_size(100.0);
            delay.set_dry_wet(1.0);
            delay.seed(11);
            delay.snap_parameters();
        };
        let context = BlockContext::default();
        let warm_up = noise(22050, 6);
        let silence = vec![0.0; 44100];

        let mut frozen = prepared_delay();
        configure(&mut frozen);
        let mut running = prepared_delay();
        configure(&mut running);
        run(&mut frozen, &warm_up, &context);
        run(&mut running, &warm_up, &context);

        let freeze_on = ParameterValueUpdate::Normalized(1.0);
        frozen
            .process_parameter_update(GranularDelay::FREEZE_ID, &freeze_on)
            .unwrap();
        assert!(frozen.freeze());
        let frozen_output = run(&mut frozen, &silence, &context);
        let running_output = run(&mut running, &silence, &context);
        // the running delay forgets the noise, the frozen one keeps replaying it
        assert!(running_output[22050..].iter().all(|s| *s == 0.0));
        assert!(frozen_output[22050..].iter().any(|s| s.abs() > 1e-3));

        // unfreezing records the silence again
        frozen.set_freeze(false);
        let output = run(&mut frozen, &silence, &context);
        assert!(output[22050..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn tempo_sync() {
        let mut delay = prepared_delay();
        delay.set_time_mode(TimeMode::Synced);
        delay.set_note_value(NoteValue::Quarter);
        assert_eq!(delay.effective_delay_ms(120.0), 500.0);
        assert_eq!(delay.effective_delay_ms(60.0), 1000.0);
        assert_eq!(delay.effective_delay_ms(0.0), 500.0);
        assert_eq!(delay.effective_delay_ms(-30.0), 500.0);
        delay.set_note_value(NoteValue::Whole);
        assert_eq!(delay.effective_delay_ms(60.0), 2000.0);

        let input = noise(BLOCK_SIZE, 5);
        run(&mut delay, &input, &BlockContext::with_tempo(90.0));
        assert_eq!(delay.current_delay_ms(), 2000.0);
        delay.set_note_value(NoteValue::Eighth);
        run(&mut delay, &input, &BlockContext::with_tempo(120.0));
        assert_eq!(delay.current_delay_ms(), 250.0);

        delay.set_time_mode(TimeMode::Free);
        delay.set_delay_time(123.0);
        run(&mut delay, &input, &BlockContext::with_tempo(120.0));
        assert_eq!(delay.current_delay_ms(), 123.0);
    }

    #[test]
    fn parameter_updates() {
        let mut delay = prepared_delay();
        delay
            .process_parameter_update(GranularDelay::DRY_WET_ID, &ParameterValueUpdate::Normalized(0.25))
            .unwrap();
        assert_eq!(delay.dry_wet(), 0.25);
        delay
            .process_parameter_update(
                GranularDelay::FEEDBACK_ID,
                &ParameterValueUpdate::Raw(Arc::new(5.0f32)),
            )
            .unwrap();
        assert_eq!(delay.feedback(), 1.2);
        delay
            .process_parameter_update(
                GranularDelay::ENVELOPE_ID,
                &ParameterValueUpdate::Raw(Arc::new(GrainEnvelope::Blackman)),
            )
            .unwrap();
        assert_eq!(delay.envelope(), GrainEnvelope::Blackman);
        delay
            .process_parameter_update(GranularDelay::FREEZE_ID, &ParameterValueUpdate::Normalized(1.0))
            .unwrap();
        assert!(delay.freeze());
        assert!(delay
            .process_parameter_update(FourCC(*b"????"), &ParameterValueUpdate::Normalized(0.0))
            .is_err());

        // through the shared, lock free parameter cells
        let shared = SharedParameterValues::from_parameters(&delay.parameters());
        shared.set_normalized(GranularDelay::PITCH_ID, 1.0).unwrap();
        shared.set_normalized(GranularDelay::NOTE_VALUE_ID, 1.0).unwrap();
        shared.apply_to(&mut delay).unwrap();
        assert_eq!(delay.pitch(), 24.0);
        assert_eq!(delay.note_value(), NoteValue::Whole);
    }

    #[test]
    fn state_round_trip() {
        let mut delay = GranularDelay::new();
        delay.set_grain_size(250.0);
        delay.set_density(33.0);
        delay.set_delay_time(1500.0);
        delay.set_pitch(-7.0);
        delay.set_pitch_spray(0.1);
        delay.set_position_spray(0.2);
        delay.set_pan_spray(0.3);
        delay.set_reverse_probability(0.4);
        delay.set_freeze(true);
        delay.set_feedback(0.9);
        delay.set_dry_wet(0.75);
        delay.set_output_gain_db(-6.0);
        delay.set_envelope(GrainEnvelope::Sine);
        delay.set_time_mode(TimeMode::Synced);
        delay.set_note_value(NoteValue::QuarterTriplet);

        let mut state = Vec::new();
        delay.save_state(&mut state).unwrap();
        assert_eq!(state.len(), GranularDelay::STATE_SIZE);
        // grain size is the first field
        assert_eq!(&state[..4], &250.0f32.to_le_bytes());

        let mut loaded = GranularDelay::new();
        loaded.load_state(&mut state.as_slice()).unwrap();
        let mut reloaded_state = Vec::new();
        loaded.save_state(&mut reloaded_state).unwrap();
        assert_eq!(state, reloaded_state);
        assert_eq!(loaded.note_value(), NoteValue::QuarterTriplet);
        assert_eq!(loaded.envelope(), GrainEnvelope::Sine);
        assert!(loaded.freeze());

        // truncated states are rejected as a whole
        let mut fresh = GranularDelay::new();
        let result = fresh.load_state(&mut &state[..30]);
        assert!(matches!(result, Err(Error::StateError(_))));
        assert_eq!(fresh.grain_size(), 100.0);
    }
}
