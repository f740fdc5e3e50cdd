//! Real-time granular delay DSP core.
//!
//! The crate is layered from small DSP primitives (delay lines, smoothers, oversampling filters,
//! a bit crusher and pitch shifters) up to a granular engine and the user facing
//! [`GranularDelay`](effects::GranularDelay) effect.
//!
//! Effects implement the [`Effect`] trait: `prepare` allocates and configures, `process` runs
//! in real-time audio threads without allocating or blocking, and parameters get changed via
//! [`ParameterValueUpdate`]s, usually drained from a [`SharedParameterValues`] instance which
//! a control thread writes to.

// private mods (will be partly re-exported)
mod effect;
mod error;

// public, flat re-exports
pub use error::Error;

pub use effect::{BlockContext, Effect};

pub use parameter::{
    ClonableParameter, Parameter, ParameterType, ParameterValueUpdate, SharedParameterValues,
};

// public mods
pub mod bit_crusher;
pub mod granular;
pub mod oversampler;
pub mod parameter;
pub mod pitch;
pub mod utils;

pub mod effects {
    //! Audio effects built from the crate's DSP building blocks.

    pub use super::effect::granular_delay::GranularDelay;
}

// -------------------------------------------------------------------------------------------------

// Detect allocations in audio threads in tests.
#[cfg(all(test, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;
