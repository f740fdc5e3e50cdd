use std::{error, fmt, io};

use crate::pitch::PitchMode;

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by echoform.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid parameter id, value or processing setup.
    ParameterError(String),
    /// The selected pitch mode has no processing implementation.
    UnsupportedPitchMode(PitchMode),
    /// A saved state stream is malformed.
    StateError(String),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::UnsupportedPitchMode(mode) => {
                write!(f, "Pitch mode '{mode}' is not supported")
            }
            Self::StateError(str) => write!(f, "Invalid state: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
