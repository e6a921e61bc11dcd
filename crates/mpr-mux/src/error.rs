//! Error types for the zone engine

use thiserror::Error;

/// Errors raised by the serial bus transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The serial device could not be opened
    #[error("failed to open {path}: {reason}")]
    DeviceOpen { path: String, reason: String },

    /// The serial device could not be released
    #[error("failed to close bus: {0}")]
    DeviceClose(#[source] std::io::Error),

    /// Writing a request frame failed
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading a response failed at the I/O layer
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The response terminator was not seen before the deadline
    #[error("response timeout after {}ms ({} bytes received)", .timeout_ms, .received.len())]
    ReadTimeout { timeout_ms: u64, received: Vec<u8> },

    /// The response did not have the expected shape
    #[error("malformed response: {0}")]
    Parse(#[from] mpr_protocol::ParseError),
}

/// Errors that can occur in the zone engine
///
/// The display text of the command rejections is the reason string handed
/// back to command callers.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Command references a zone id that is not registered
    #[error("unknown device id")]
    UnknownZone(u64),

    /// A child zone is held by another virtual zone
    #[error("vzone is locked")]
    ZoneLocked,

    /// Parameter change requested while the virtual zone is powered off
    #[error("vzone is off")]
    ZoneOff,

    /// Parameter name not accepted for virtual zones
    #[error("unknown parameter {0}")]
    UnknownParam(String),

    /// Value rejected for the parameter
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Bus transport failure
    #[error("bus error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The zone actor has stopped
    #[error("zone engine is not running")]
    ActorGone,
}

impl MuxError {
    /// Reason string reported to command callers
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Whether this is a command rejection rather than a system fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MuxError::UnknownZone(_)
                | MuxError::ZoneLocked
                | MuxError::ZoneOff
                | MuxError::UnknownParam(_)
                | MuxError::InvalidValue(_)
        )
    }
}

impl From<mpr_protocol::ProtocolError> for MuxError {
    fn from(e: mpr_protocol::ProtocolError) -> Self {
        match e {
            mpr_protocol::ProtocolError::UnknownParam(p) => MuxError::UnknownParam(p),
            other => MuxError::InvalidValue(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reasons() {
        assert_eq!(MuxError::UnknownZone(42).reason(), "unknown device id");
        assert_eq!(MuxError::ZoneLocked.reason(), "vzone is locked");
        assert_eq!(MuxError::ZoneOff.reason(), "vzone is off");
        assert!(MuxError::ZoneOff.is_rejection());
    }

    #[test]
    fn test_transport_errors_are_faults() {
        let err = MuxError::from(TransportError::ReadTimeout {
            timeout_ms: 1500,
            received: b"?11".to_vec(),
        });
        assert!(!err.is_rejection());
        assert_eq!(err.reason(), "bus error: response timeout after 1500ms (3 bytes received)");
    }
}
