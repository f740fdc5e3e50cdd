use std::str::FromStr;

use four_cc::FourCC;
use strum::IntoEnumIterator;

use super::{Parameter, ParameterType, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// An enum parameter descriptor. Normalized values map to the enum's variant indices.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumParameter {
    id: FourCC,
    name: &'static str,
    values: Vec<String>,
    default_index: usize,
}

impl EnumParameter {
    pub fn new<E: IntoEnumIterator + ToString + PartialEq>(
        id: FourCC,
        name: &'static str,
        default: E,
    ) -> Self {
        let values = E::iter().map(|v| v.to_string()).collect::<Vec<_>>();
        assert!(!values.is_empty(), "Enum parameters need at least one value");
        let default_index = E::iter().position(|r| r == default).unwrap_or(0);
        Self {
            id,
            name,
            values,
            default_index,
        }
    }

    pub const fn id(&self) -> FourCC {
        self.id
    }

    pub fn default_index(&self) -> usize {
        self.default_index
    }

    pub fn normalize_index(&self, index: usize) -> f32 {
        if self.values.len() <= 1 {
            0.0
        } else {
            index.min(self.values.len() - 1) as f32 / (self.values.len() - 1) as f32
        }
    }

    /// Denormalize a 0.0-1.0 ranged value to the nearest variant index.
    pub fn denormalize_index(&self, normalized: f32) -> usize {
        if normalized.is_nan() {
            return self.default_index;
        }
        let normalized = normalized.clamp(0.0, 1.0);
        (normalized * (self.values.len() - 1) as f32).round() as usize
    }
}

impl Parameter for EnumParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Enum {
            values: self.values.clone(),
            default_index: self.default_index,
        }
    }

    fn default_normalized_value(&self) -> f32 {
        self.normalize_index(self.default_index)
    }

    fn normalized_value_to_string(&self, normalized: f32, _include_unit: bool) -> String {
        self.values[self.denormalize_index(normalized)].clone()
    }

    fn string_to_normalized_value(&self, string: String) -> Option<f32> {
        let string = string.trim();
        self.values
            .iter()
            .position(|v| v.eq_ignore_ascii_case(string))
            .map(|index| self.normalize_index(index))
    }
}

// -------------------------------------------------------------------------------------------------

/// Current variant of an [`EnumParameter`], typed as the strum enum `T` it was built from.
/// Normalized updates select variants by index.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumParameterValue<T: IntoEnumIterator + Copy + PartialEq> {
    value: T,
    description: EnumParameter,
}

impl<T> EnumParameterValue<T>
where
    T: IntoEnumIterator + FromStr + Copy + PartialEq + Default + Send + Sync + 'static,
{
    pub fn from_description(description: EnumParameter) -> Self {
        let value = T::iter()
            .nth(description.default_index())
            .unwrap_or_default();
        Self { value, description }
    }

    #[inline(always)]
    pub fn value(&self) -> T {
        self.value
    }

    pub fn set_value(&mut self, value: T) {
        self.value = value;
    }

    /// Index of the current value in the enum's variant list.
    pub fn index(&self) -> usize {
        T::iter().position(|v| v == self.value).unwrap_or(0)
    }

    pub fn description(&self) -> &EnumParameter {
        &self.description
    }

    /// Apply a raw `T`, a raw variant name `String`, or a normalized update.
    pub fn apply_update(&mut self, update: &ParameterValueUpdate) {
        match update {
            ParameterValueUpdate::Raw(raw) => {
                if let Some(value) = raw.downcast_ref::<T>() {
                    self.set_value(*value);
                } else if let Some(value_str) = raw.downcast_ref::<String>() {
                    if let Ok(value) = T::from_str(value_str) {
                        self.set_value(value);
                    } else {
                        log::warn!(
                            "Invalid string value for enum parameter '{}'",
                            self.description.id()
                        );
                    }
                } else {
                    log::warn!(
                        "Invalid value type for enum parameter '{}'",
                        self.description.id()
                    );
                }
            }
            ParameterValueUpdate::Normalized(normalized) => {
                let index = self.description.denormalize_index(*normalized);
                if let Some(value) = T::iter().nth(index) {
                    self.value = value;
                }
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
