use crate::utils::smoothing::{OnePoleSmoothedValue, SmoothedValue};

use super::{FloatParameter, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// A [`FloatParameter`] value which ramps towards new targets with a [`SmoothedValue`].
///
/// Call [`Self::set_sample_rate`] when the owning effect gets prepared, before pulling values
/// with [`Self::next_value`].
#[derive(Debug, Clone)]
pub struct SmoothedParameterValue<Value: SmoothedValue = OnePoleSmoothedValue> {
    description: FloatParameter,
    value: Value,
}

impl<Value: SmoothedValue + From<f32>> SmoothedParameterValue<Value> {
    /// Start at the descriptor's default value, without ramping.
    pub fn from_description(description: FloatParameter) -> Self {
        Self {
            value: Value::from(description.default_value()),
            description,
        }
    }
}

impl<Value: SmoothedValue> SmoothedParameterValue<Value> {
    pub fn description(&self) -> &FloatParameter {
        &self.description
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.value.set_sample_rate(sample_rate);
    }

    /// True while the value still moves towards its target.
    pub fn value_need_ramp(&self) -> bool {
        self.value.need_ramp()
    }

    /// Advance the ramp by one sample frame and return the new value.
    #[inline(always)]
    pub fn next_value(&mut self) -> f32 {
        self.value.next()
    }

    /// Value of the last ramp step, without advancing.
    #[inline(always)]
    pub fn current_value(&self) -> f32 {
        self.value.current()
    }

    #[inline(always)]
    pub fn target_value(&self) -> f32 {
        self.value.target()
    }

    /// Ramp to the given value, clamped into the parameter range.
    pub fn set_target_value_clamped(&mut self, value: f32) {
        self.value.set_target(self.description.clamp_value(value));
    }

    /// Jump to the given value, clamped into the parameter range.
    pub fn init_value_clamped(&mut self, value: f32) {
        self.value.init(self.description.clamp_value(value));
    }

    /// Skip all pending ramp steps.
    pub fn snap_to_target(&mut self) {
        let target = self.value.target();
        self.value.init(target);
    }

    /// Ramp to a raw `f32`/`f64` or a normalized value. Other raw types are ignored.
    pub fn apply_update(&mut self, update: &ParameterValueUpdate) {
        let value = match update {
            ParameterValueUpdate::Raw(raw) => {
                if let Some(value) = raw.downcast_ref::<f32>() {
                    *value
                } else if let Some(value) = raw.downcast_ref::<f64>() {
                    *value as f32
                } else {
                    log::warn!("Ignoring non float update for '{}'", self.description.id());
                    return;
                }
            }
            ParameterValueUpdate::Normalized(normalized) => {
                self.description.denormalize_value(*normalized)
            }
        };
        self.set_target_value_clamped(value);
    }
}

// -------------------------------------------------------------------------------------------------
