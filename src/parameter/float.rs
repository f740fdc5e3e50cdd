use std::{fmt, ops::RangeInclusive, sync::Arc};

use four_cc::FourCC;

use super::{Parameter, ParameterType};

// -------------------------------------------------------------------------------------------------

type ValueFormatter = Arc<dyn Fn(f32) -> String + Send + Sync>;
type ValueParser = Arc<dyn Fn(&str) -> Option<f32> + Send + Sync>;

/// A continuous parameter descriptor. Normalized values map linearly onto `range`.
#[derive(Clone)]
pub struct FloatParameter {
    id: FourCC,
    name: &'static str,
    range: RangeInclusive<f32>,
    default: f32,
    unit: &'static str,
    display: Option<(ValueFormatter, ValueParser)>,
}

impl fmt::Debug for FloatParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FloatParameter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("range", &self.range)
            .field("default", &self.default)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

impl FloatParameter {
    /// Panics when the range is empty or does not contain the default.
    pub const fn new(
        id: FourCC,
        name: &'static str,
        range: RangeInclusive<f32>,
        default: f32,
    ) -> Self {
        assert!(*range.start() < *range.end(), "Empty parameter range");
        assert!(
            default >= *range.start() && default <= *range.end(),
            "Parameter default out of range"
        );
        Self {
            id,
            name,
            range,
            default,
            unit: "",
            display: None,
        }
    }

    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// Custom value formatting and parsing, e.g. to show 0-1 values as percent.
    /// Formatted strings should not contain the unit. Parsed values get clamped.
    pub fn with_display<F, P>(mut self, format: F, parse: P) -> Self
    where
        F: Fn(f32) -> String + Send + Sync + 'static,
        P: Fn(&str) -> Option<f32> + Send + Sync + 'static,
    {
        self.display = Some((Arc::new(format), Arc::new(parse)));
        self
    }

    pub const fn id(&self) -> FourCC {
        self.id
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// Clamp into the range. NaN becomes the default value.
    pub fn clamp_value(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(*self.range.start(), *self.range.end())
        }
    }

    pub fn normalize_value(&self, value: f32) -> f32 {
        let (start, end) = (*self.range.start(), *self.range.end());
        (self.clamp_value(value) - start) / (end - start)
    }

    /// Map a normalized value into the range. Out of range values are clamped and NaN
    /// becomes the default value.
    pub fn denormalize_value(&self, normalized: f32) -> f32 {
        if normalized.is_nan() {
            return self.default;
        }
        let (start, end) = (*self.range.start(), *self.range.end());
        start + normalized.clamp(0.0, 1.0) * (end - start)
    }

    pub fn value_to_string(&self, value: f32, include_unit: bool) -> String {
        let string = match &self.display {
            Some((format, _)) => format(value),
            None => format!("{value:.2}"),
        };
        if include_unit && !self.unit.is_empty() {
            format!("{string} {}", self.unit)
        } else {
            string
        }
    }

    pub fn string_to_value(&self, string: &str) -> Option<f32> {
        let string = string.trim().trim_end_matches(self.unit).trim();
        let value = match &self.display {
            Some((_, parse)) => parse(string),
            None => string.parse().ok(),
        }?;
        Some(self.clamp_value(value))
    }
}

impl Parameter for FloatParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Float {
            range: self.range.clone(),
            default: self.default,
        }
    }

    fn default_normalized_value(&self) -> f32 {
        self.normalize_value(self.default)
    }

    fn normalized_value_to_string(&self, normalized: f32, include_unit: bool) -> String {
        self.value_to_string(self.denormalize_value(normalized), include_unit)
    }

    fn string_to_normalized_value(&self, string: String) -> Option<f32> {
        self.string_to_value(&string)
            .map(|value| self.normalize_value(value))
    }
}

// -------------------------------------------------------------------------------------------------
