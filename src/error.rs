use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, NnetErr>;

/// The network engine's error type.
///
/// Every variant describes a programming or configuration error: a network that
/// produced one of these must not be used for further computation.
#[derive(Debug)]
pub enum NnetErr {
    Io(io::Error),
    Config(serde_json::Error),
    DimMismatch {
        index: usize,
        output_dim: usize,
        input_dim: usize,
    },
    BufferChain {
        which: &'static str,
        got: usize,
        expected: usize,
    },
    InfParams,
    NanParams,
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ParamCount {
        got: usize,
        expected: usize,
    },
    NotPropagated,
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    EmptyNetwork,
    UnknownComponent(String),
    Parse(String),
}

impl NnetErr {
    /// Builds a `Parse` error out of anything printable.
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }
}

impl Display for NnetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NnetErr::Io(e) => write!(f, "io error: {e}"),
            NnetErr::Config(e) => write!(f, "invalid training options: {e}"),
            NnetErr::DimMismatch {
                index,
                output_dim,
                input_dim,
            } => write!(
                f,
                "Dimensionality mismatch! Previous layer output: {output_dim} Current layer input: {input_dim} (component {index})"
            ),
            NnetErr::BufferChain {
                which,
                got,
                expected,
            } => write!(
                f,
                "the {which} buffer chain has {got} slots, expected {expected}"
            ),
            NnetErr::InfParams => write!(
                f,
                "'inf' in network parameters (weight explosion, try lower learning rate?)"
            ),
            NnetErr::NanParams => {
                write!(f, "'nan' in network parameters (try lower learning rate?)")
            }
            NnetErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            NnetErr::ParamCount { got, expected } => write!(
                f,
                "parameter bookkeeping ended at position {got}, the network holds {expected} parameters"
            ),
            NnetErr::NotPropagated => write!(
                f,
                "backpropagation requires a preceding propagate with matching shapes"
            ),
            NnetErr::IndexOutOfRange { index, len } => {
                write!(f, "component index {index} out of range, the network has {len}")
            }
            NnetErr::EmptyNetwork => write!(f, "the network has no components"),
            NnetErr::UnknownComponent(marker) => write!(f, "unknown component marker {marker}"),
            NnetErr::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl Error for NnetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NnetErr::Io(e) => Some(e),
            NnetErr::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NnetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for NnetErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value)
    }
}
