use four_cc::FourCC;

use crate::{parameter::ParameterValueUpdate, ClonableParameter, Error};

// -------------------------------------------------------------------------------------------------

pub mod granular_delay;

// -------------------------------------------------------------------------------------------------

/// Host transport and timing info for an [`Effect`]'s process function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockContext {
    /// Host tempo in beats per minute. Invalid tempos (<= 0) fall back to 120 BPM in effects.
    pub tempo_bpm: f64,
    /// True when the host transport is running.
    pub is_playing: bool,
    /// Host sample frame position of the block's first frame.
    pub sample_position: u64,
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            tempo_bpm: crate::utils::tempo::FALLBACK_TEMPO_BPM,
            is_playing: false,
            sample_position: 0,
        }
    }
}

impl BlockContext {
    pub fn with_tempo(tempo_bpm: f64) -> Self {
        Self {
            tempo_bpm,
            ..Self::default()
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Effects manipulate stereo audio in `f32` format and can be `Send` and `Sync`ed across threads.
/// Buffers are processed in-place in the audio real-time thread.
///
/// The lifecycle is `prepare` (not real-time safe, may allocate) followed by any number of
/// `process` calls, with optional `reset` calls in between. Calling `prepare` again changes the
/// sample rate or max block size.
///
/// Hosts and UIs can query info about an effect's parameter set via [`Effect::parameters`].
/// Parameter values are changed in the audio thread via [`Effect::process_parameter_update`],
/// usually fed from a [`SharedParameterValues`](crate::parameter::SharedParameterValues)
/// instance which is written by a control thread.
///
/// NB: all `process_XXX` functions and `reset` are called in realtime audio threads, so they must
/// not block or allocate! All other functions are called in the main thread to set up the effect.
pub trait Effect: Send + Sync + 'static {
    /// A unique, static name for the effect. Used for logging or in UIs.
    fn name(&self) -> &'static str;

    /// Returns a list of parameter descriptors for this effect.
    ///
    /// This method may only be called on non-real-time threads: Usually it will be called
    /// after creating a new effect instance in order to gather parameter info for generic UIs
    /// or host parameter registration.
    fn parameters(&self) -> Vec<&dyn ClonableParameter>;

    /// Prepares the effect for processing with the given sample rate and max block size.
    ///
    /// Runs on a non-real-time thread, so it's safe to perform allocations (e.g., for delay
    /// buffers). When an error is returned, the effect stays unprepared and outputs silence.
    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) -> Result<(), Error>;

    /// True after a successful [`Effect::prepare`] call.
    fn is_prepared(&self) -> bool;

    /// Processes a stereo buffer pair in-place, applying the effect.
    ///
    /// This method is called repeatedly on the real-time audio thread. To avoid audio glitches,
    /// it must not block, allocate memory, or perform other time-consuming operations.
    fn process(&mut self, left: &mut [f32], right: &mut [f32], context: &BlockContext);

    /// Clears all processing state (delay lines, filters, voices) without deallocating.
    fn reset(&mut self);

    /// Processing latency in sample frames, for host delay compensation.
    fn latency_samples(&self) -> usize {
        0
    }

    /// Returns the number of audible sample frames this effect will produce, after it received
    /// silence.
    /// - `None`: means I don't know.
    /// - `Some(X)`: means that the effect will produce at least X sample frames of audible audio.
    /// - `Some(usize::MAX)`: signals an infinite tail.
    fn process_tail(&self) -> Option<usize> {
        None
    }

    /// Handles a parameter update in the real-time thread.
    ///
    /// Unknown ids should be reported as [`Error::ParameterError`]. Values of known parameters
    /// are clamped into their valid ranges.
    fn process_parameter_update(
        &mut self,
        id: FourCC,
        value: &ParameterValueUpdate,
    ) -> Result<(), Error>;
}
