//! Granular delay building blocks: grain envelopes, a fixed size grain pool, the trigger
//! scheduler, the grain renderer and the engine composing them.

mod engine;
mod envelope;
mod pool;
mod processor;
mod scheduler;

// -------------------------------------------------------------------------------------------------

pub use engine::{GrainParameters, GranularEngine};
pub use envelope::GrainEnvelope;
pub use pool::{AcquiredGrain, Grain, GrainPool};
pub use processor::{GrainFrame, GrainProcessor};
pub use scheduler::{GrainScheduler, SchedulingMode};
