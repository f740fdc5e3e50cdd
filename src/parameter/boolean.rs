use four_cc::FourCC;

use super::{Parameter, ParameterType, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// A toggle parameter descriptor. Normalized values >= 0.5 are on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanParameter {
    id: FourCC,
    name: &'static str,
    default: bool,
}

impl BooleanParameter {
    const ON: &str = "On";
    const OFF: &str = "Off";

    pub const fn new(id: FourCC, name: &'static str, default: bool) -> Self {
        Self { id, name, default }
    }

    pub const fn id(&self) -> FourCC {
        self.id
    }

    pub const fn default_value(&self) -> bool {
        self.default
    }

    /// Map a normalized value to a toggle state. NaN falls back to the default.
    pub fn denormalize_value(&self, normalized: f32) -> bool {
        if normalized.is_nan() {
            self.default
        } else {
            normalized >= 0.5
        }
    }
}

impl Parameter for BooleanParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Boolean {
            default: self.default,
        }
    }

    fn default_normalized_value(&self) -> f32 {
        f32::from(u8::from(self.default))
    }

    fn normalized_value_to_string(&self, normalized: f32, _include_unit: bool) -> String {
        let label = if self.denormalize_value(normalized) {
            Self::ON
        } else {
            Self::OFF
        };
        label.to_owned()
    }

    fn string_to_normalized_value(&self, string: String) -> Option<f32> {
        let string = string.trim();
        let value = if string.eq_ignore_ascii_case(Self::ON) {
            true
        } else if string.eq_ignore_ascii_case(Self::OFF) {
            false
        } else {
            string.parse::<bool>().ok()?
        };
        Some(f32::from(u8::from(value)))
    }
}

// -------------------------------------------------------------------------------------------------

/// Current state of a [`BooleanParameter`]. Toggles switch immediately.
#[derive(Debug, Clone)]
pub struct BooleanParameterValue {
    description: BooleanParameter,
    value: bool,
}

impl BooleanParameterValue {
    pub fn from_description(description: BooleanParameter) -> Self {
        Self {
            value: description.default_value(),
            description,
        }
    }

    pub fn description(&self) -> &BooleanParameter {
        &self.description
    }

    #[inline(always)]
    pub fn value(&self) -> bool {
        self.value
    }

    pub fn set_value(&mut self, value: bool) {
        self.value = value;
    }

    /// Apply a raw `bool` or a normalized update. Other raw types are ignored.
    pub fn apply_update(&mut self, update: &ParameterValueUpdate) {
        match update {
            ParameterValueUpdate::Raw(raw) => match raw.downcast_ref::<bool>() {
                Some(value) => self.value = *value,
                None => log::warn!("Ignoring non bool update for '{}'", self.description.id),
            },
            ParameterValueUpdate::Normalized(normalized) => {
                self.value = self.description.denormalize_value(*normalized);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn labels() {
        let freeze = BooleanParameter::new(FourCC(*b"frz "), "Freeze", false);
        assert_eq!(freeze.default_normalized_value(), 0.0);
        assert_eq!(freeze.normalized_value_to_string(1.0, true), "On");
        assert_eq!(freeze.normalized_value_to_string(f32::NAN, true), "Off");
        assert_eq!(freeze.string_to_normalized_value(" off".to_owned()), Some(0.0));
        assert_eq!(freeze.string_to_normalized_value("true".to_owned()), Some(1.0));
        assert_eq!(freeze.string_to_normalized_value("maybe".to_owned()), None);
    }

    #[test]
    fn updates() {
        let mut value =
            BooleanParameterValue::from_description(BooleanParameter::new(FourCC(*b"frz "), "Freeze", true));
        assert!(value.value());
        value.apply_update(&ParameterValueUpdate::Normalized(0.2));
        assert!(!value.value());
        value.apply_update(&ParameterValueUpdate::Raw(Arc::new(true)));
        assert!(value.value());
        // wrong raw types are ignored
        value.apply_update(&ParameterValueUpdate::Raw(Arc::new(0.0f32)));
        assert!(value.value());
    }
}
