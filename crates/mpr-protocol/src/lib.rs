//! MPR-6ZHMAUT Line Protocol Library
//!
//! This crate provides parsing and encoding for the RS-232 control protocol
//! of the Monoprice MPR-6ZHMAUT six-zone amplifier. Up to three units share
//! one serial bus and are addressed by the first digit of a two-digit zone
//! code.
//!
//! # Architecture
//!
//! - [`ZoneCode`] addresses one physical zone (`"11"` ..= `"36"`)
//! - [`Param`] and [`ParamValue`] describe one of the ten zone parameters
//! - [`ZoneParams`] is the fixed-width 20-character zone status blob
//! - [`Request`] encodes the four request frames, and the `parse_*`
//!   functions in [`frame`] decode the matching responses
//!
//! # Example
//!
//! ```rust
//! use mpr_protocol::{frame, EncodeCommand, Param, Request, ZoneCode};
//!
//! let zone: ZoneCode = "11".parse().unwrap();
//! let request = Request::QueryParam { zone, param: Param::VO };
//! assert_eq!(request.encode(), b"?11VO\r\n");
//!
//! let value = frame::parse_param_response(zone, Param::VO, b"#>11VO13\r\r\n").unwrap();
//! assert_eq!(value.as_str(), "13");
//! ```

pub mod error;
pub mod frame;
pub mod param;
pub mod zone;

pub use error::{ParseError, ProtocolError};
pub use frame::{Request, RequestCodec, RequestLine, AMP_TERMINATOR, ZONE_TERMINATOR};
pub use param::{Param, ParamValue, ZoneParams, BLOB_LEN};
pub use zone::{ZoneCode, MAX_AMPS, ZONES_PER_AMP};

/// Trait for codecs that parse an incoming byte stream
pub trait ProtocolCodec {
    /// The command type produced by this codec
    type Command;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete command from the buffer
    fn next_command(&mut self) -> Option<Self::Command>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for commands that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}

/// Render bytes with control characters escaped, for traffic logs
pub fn escape_bytes(data: &[u8]) -> String {
    data.iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"?11\r\n"), "?11\\r\\n");
        assert_eq!(escape_bytes(b">11VO08"), ">11VO08");
    }
}
