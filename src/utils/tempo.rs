//! Tempo synced time values.

use strum::{Display, EnumCount, EnumIter, EnumString, FromRepr, VariantNames};

// -------------------------------------------------------------------------------------------------

/// Tempo used when the host reports no or an invalid tempo.
pub const FALLBACK_TEMPO_BPM: f64 = 120.0;

// -------------------------------------------------------------------------------------------------

/// How delay times are specified.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, EnumCount,
    VariantNames, FromRepr,
)]
#[repr(u8)]
pub enum TimeMode {
    /// Delay time in milliseconds.
    #[default]
    Free,
    /// Delay time derived from the host tempo and a [`NoteValue`].
    Synced,
}

// -------------------------------------------------------------------------------------------------

/// Musical note lengths, including triplets, from 1/32 to a whole note.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, EnumCount,
    VariantNames, FromRepr,
)]
#[repr(u8)]
pub enum NoteValue {
    #[strum(serialize = "1/32")]
    ThirtySecond,
    #[strum(serialize = "1/16T")]
    SixteenthTriplet,
    #[strum(serialize = "1/16")]
    Sixteenth,
    #[strum(serialize = "1/8T")]
    EighthTriplet,
    #[default]
    #[strum(serialize = "1/8")]
    Eighth,
    #[strum(serialize = "1/4T")]
    QuarterTriplet,
    #[strum(serialize = "1/4")]
    Quarter,
    #[strum(serialize = "1/2T")]
    HalfTriplet,
    #[strum(serialize = "1/2")]
    Half,
    #[strum(serialize = "1/1")]
    Whole,
}

impl NoteValue {
    /// Length of the note in quarter note beats.
    pub const fn beats(self) -> f64 {
        const TRIPLET: f64 = 2.0 / 3.0;
        match self {
            Self::ThirtySecond => 0.125,
            Self::SixteenthTriplet => 0.25 * TRIPLET,
            Self::Sixteenth => 0.25,
            Self::EighthTriplet => 0.5 * TRIPLET,
            Self::Eighth => 0.5,
            Self::QuarterTriplet => TRIPLET,
            Self::Quarter => 1.0,
            Self::HalfTriplet => 2.0 * TRIPLET,
            Self::Half => 2.0,
            Self::Whole => 4.0,
        }
    }

    /// Note value from its index in the note list. Out of range indices are clamped.
    pub fn from_index(index: i32) -> Self {
        let index = index.clamp(0, Self::COUNT as i32 - 1);
        Self::from_repr(index as u8).unwrap_or_default()
    }

    /// Index of the note in the note list.
    pub const fn index(self) -> i32 {
        self as i32
    }

    /// Length of the note in milliseconds at the given tempo.
    ///
    /// Zero, negative or non finite tempos fall back to [`FALLBACK_TEMPO_BPM`].
    pub fn to_ms(self, tempo_bpm: f64) -> f64 {
        let tempo_bpm = if tempo_bpm.is_finite() && tempo_bpm > 0.0 {
            tempo_bpm
        } else {
            FALLBACK_TEMPO_BPM
        };
        self.beats() * 60_000.0 / tempo_bpm
    }
}

// -------------------------------------------------------------------------------------------------
