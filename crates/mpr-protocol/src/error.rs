//! Error types for line protocol parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing amplifier responses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `>` response header was found in the received bytes
    #[error("no response header for {0}")]
    MissingHeader(String),

    /// Response belongs to a different zone than the one queried
    #[error("response for zone {actual}, expected {expected}")]
    ZoneMismatch { expected: String, actual: String },

    /// Zone status blob is shorter than the fixed layout
    #[error("status blob too short: {len} of {expected} chars")]
    ShortBlob { len: usize, expected: usize },

    /// Parameter value is not two ASCII digits
    #[error("invalid parameter value: {0:?}")]
    InvalidValue(String),

    /// Response frame is not terminated
    #[error("unterminated frame: {0:?}")]
    Unterminated(String),
}

/// Errors for malformed zone, parameter, or value identifiers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Zone code outside the amplifier/zone address space
    #[error("invalid zone code: {0}")]
    InvalidZone(String),

    /// Unknown two-letter parameter code
    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    /// Parameter is reported by the unit but cannot be set
    #[error("parameter {0} is read-only")]
    ReadOnly(String),

    /// Value outside the parameter's accepted range
    #[error("value {value} out of range {min:02}..={max:02} for {param}")]
    OutOfRange {
        param: String,
        value: String,
        min: u8,
        max: u8,
    },
}
