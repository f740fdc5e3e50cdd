use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use four_cc::FourCC;

use super::{ClonableParameter, ParameterValueUpdate};
use crate::{Effect, Error};

// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct SharedParameterSlot {
    id: FourCC,
    /// Bits of the normalized f32 value.
    value: AtomicU32,
    changed: AtomicBool,
}

// -------------------------------------------------------------------------------------------------

/// Lock free, latest-value-wins parameter exchange between a control thread and the audio thread.
///
/// Holds one atomic normalized value and one "changed" flag per parameter. The control thread
/// writes values with [`Self::set_normalized`]. The audio thread drains changed values once per
/// block with [`Self::drain`] or [`Self::apply_to`] and feeds them into the effect's smoothers.
/// There is a single writer and a single reader per slot: intermediate values written between
/// two drains are skipped.
///
/// Share the instance via an `Arc` between the two threads.
#[derive(Debug)]
pub struct SharedParameterValues {
    slots: Box<[SharedParameterSlot]>,
}

impl SharedParameterValues {
    /// Create slots for the given parameters, initialized to their default values.
    pub fn from_parameters(parameters: &[&dyn ClonableParameter]) -> Self {
        let slots = parameters
            .iter()
            .map(|parameter| SharedParameterSlot {
                id: parameter.id(),
                value: AtomicU32::new(parameter.default_normalized_value().to_bits()),
                changed: AtomicBool::new(false),
            })
            .collect();
        Self { slots }
    }

    /// Number of parameter slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ids of all parameter slots, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = FourCC> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    /// Write a new normalized value from the control thread. Values are clamped to \[0, 1\].
    pub fn set_normalized(&self, id: FourCC, normalized: f32) -> Result<(), Error> {
        let slot = self.slot(id)?;
        if normalized.is_nan() {
            return Err(Error::ParameterError(format!(
                "Invalid normalized value for parameter '{id}'"
            )));
        }
        let normalized = normalized.clamp(0.0, 1.0);
        slot.value.store(normalized.to_bits(), Ordering::Relaxed);
        slot.changed.store(true, Ordering::Release);
        Ok(())
    }

    /// Last written normalized value of a parameter.
    pub fn normalized(&self, id: FourCC) -> Option<f32> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| f32::from_bits(slot.value.load(Ordering::Acquire)))
    }

    /// Mark all parameters as changed, so the next drain applies all current values.
    pub fn mark_all_changed(&self) {
        for slot in self.slots.iter() {
            slot.changed.store(true, Ordering::Release);
        }
    }

    /// Call `f` with every value which changed since the last drain. Real-time safe.
    pub fn drain<F: FnMut(FourCC, f32)>(&self, mut f: F) {
        for slot in self.slots.iter() {
            if slot.changed.swap(false, Ordering::Acquire) {
                f(slot.id, f32::from_bits(slot.value.load(Ordering::Relaxed)));
            }
        }
    }

    /// Drain all changed values into the given effect as normalized parameter updates.
    /// All values get applied. When some of them fail, the last error is returned.
    pub fn apply_to<E: Effect + ?Sized>(&self, effect: &mut E) -> Result<(), Error> {
        let mut result = Ok(());
        self.drain(|id, normalized| {
            if let Err(err) =
                effect.process_parameter_update(id, &ParameterValueUpdate::Normalized(normalized))
            {
                result = Err(err);
            }
        });
        result
    }

    fn slot(&self, id: FourCC) -> Result<&SharedParameterSlot, Error> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .ok_or_else(|| Error::ParameterError(format!("Unknown parameter: '{id}'")))
    }
}

// -------------------------------------------------------------------------------------------------
