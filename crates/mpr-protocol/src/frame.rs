//! Request and response frames
//!
//! # Format
//! - Query parameter: `?ZZPP\r\n` answered by `>ZZPPVV\r\r\n`
//! - Query zone: `?ZZ\r\n` answered by `>ZZ<20-char blob>\r\r\n`
//! - Query amplifier: `?A0\r\n\r\n` answered by six zone lines, the whole
//!   response terminated by `\r\r\n\n`
//! - Set parameter: `<ZZPPVV\r\n`, no response
//!
//! Real units echo the request and print a `#` prompt around responses, so
//! the parsers below search for the `>` header instead of expecting it at
//! the start of the buffer.

use tracing::trace;

use crate::error::ParseError;
use crate::param::{Param, ParamValue, ZoneParams, BLOB_LEN};
use crate::zone::ZoneCode;
use crate::{EncodeCommand, ProtocolCodec};

/// Command line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Terminator of a single-zone or single-parameter response
pub const ZONE_TERMINATOR: &[u8] = b"\r\r\n";

/// Terminator of a whole-amplifier response
pub const AMP_TERMINATOR: &[u8] = b"\r\r\n\n";

/// Maximum request line length accepted by [`RequestCodec`]
const MAX_LINE_LEN: usize = 32;

/// A request sent from the controller to the amplifier bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Query a single parameter of one zone
    QueryParam { zone: ZoneCode, param: Param },
    /// Query all parameters of one zone
    QueryZone { zone: ZoneCode },
    /// Query all zones of one amplifier
    QueryAmp { amp: u8 },
    /// Set a single parameter of one zone
    SetParam {
        zone: ZoneCode,
        param: Param,
        value: ParamValue,
    },
}

impl Request {
    /// Terminator of the expected response, `None` when the unit does not answer
    pub fn response_terminator(&self) -> Option<&'static [u8]> {
        match self {
            Request::QueryParam { .. } | Request::QueryZone { .. } => Some(ZONE_TERMINATOR),
            Request::QueryAmp { .. } => Some(AMP_TERMINATOR),
            Request::SetParam { .. } => None,
        }
    }

    /// Parse a request line (without its CRLF)
    pub fn parse_line(line: &[u8]) -> Option<Request> {
        let (&kind, rest) = line.split_first()?;
        match (kind, rest.len()) {
            (b'?', 2) if rest[1] == b'0' => {
                let amp = rest[0].checked_sub(b'0')?;
                (1..=crate::zone::MAX_AMPS)
                    .contains(&amp)
                    .then_some(Request::QueryAmp { amp })
            }
            (b'?', 2) => Some(Request::QueryZone {
                zone: ZoneCode::from_bytes(rest).ok()?,
            }),
            (b'?', 4) => Some(Request::QueryParam {
                zone: ZoneCode::from_bytes(&rest[..2]).ok()?,
                param: Param::from_code(std::str::from_utf8(&rest[2..]).ok()?)?,
            }),
            (b'<', 6) => Some(Request::SetParam {
                zone: ZoneCode::from_bytes(&rest[..2]).ok()?,
                param: Param::from_code(std::str::from_utf8(&rest[2..4]).ok()?)?,
                value: ParamValue::from_wire(&rest[4..]).ok()?,
            }),
            _ => None,
        }
    }
}

impl EncodeCommand for Request {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        match self {
            Request::QueryParam { zone, param } => {
                out.push(b'?');
                out.extend_from_slice(&zone.as_bytes());
                out.extend_from_slice(param.code().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Request::QueryZone { zone } => {
                out.push(b'?');
                out.extend_from_slice(&zone.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Request::QueryAmp { amp } => {
                out.push(b'?');
                out.push(b'0' + amp);
                out.push(b'0');
                out.extend_from_slice(CRLF);
                out.extend_from_slice(CRLF);
            }
            Request::SetParam { zone, param, value } => {
                out.push(b'<');
                out.extend_from_slice(&zone.as_bytes());
                out.extend_from_slice(param.code().as_bytes());
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(CRLF);
            }
        }
        out
    }
}

/// Streaming parser for request lines, used by the amplifier side
#[derive(Debug, Default)]
pub struct RequestCodec {
    buffer: Vec<u8>,
}

/// Result of parsing one request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLine {
    /// A well-formed request
    Request(Request),
    /// A non-empty line that is not a valid request
    Unknown(String),
}

impl RequestCodec {
    /// Create a new request codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }
}

impl ProtocolCodec for RequestCodec {
    type Command = RequestLine;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_command(&mut self) -> Option<RequestLine> {
        loop {
            let end = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n')?;
            let line: Vec<u8> = self.buffer.drain(..=end).take(end).collect();
            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Some(RequestLine::Unknown(
                    String::from_utf8_lossy(&line[..MAX_LINE_LEN]).into_owned(),
                ));
            }
            return Some(match Request::parse_line(&line) {
                Some(req) => RequestLine::Request(req),
                None => RequestLine::Unknown(String::from_utf8_lossy(&line).into_owned()),
            });
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Positions just past every `>` in the buffer
fn headers(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    data.iter()
        .enumerate()
        .filter_map(|(i, b)| (*b == b'>').then_some(i + 1))
}

/// Extract the value of a single-parameter response
pub fn parse_param_response(
    zone: ZoneCode,
    param: Param,
    data: &[u8],
) -> Result<ParamValue, ParseError> {
    let zone_bytes = zone.as_bytes();
    let mut other_zone = None;

    for start in headers(data) {
        let rest = &data[start..];
        if rest.len() < 2 {
            continue;
        }
        if rest[..2] != zone_bytes {
            other_zone.get_or_insert_with(|| String::from_utf8_lossy(&rest[..2]).into_owned());
            continue;
        }
        if !rest[2..].starts_with(param.code().as_bytes()) {
            continue;
        }
        let value = &rest[4..];
        let end = value
            .iter()
            .position(|&b| b == b'\r')
            .ok_or_else(|| ParseError::Unterminated(String::from_utf8_lossy(rest).into_owned()))?;
        trace!("Parsed {}{} = {:?}", zone, param, &value[..end]);
        return ParamValue::from_wire(&value[..end]);
    }

    Err(match other_zone {
        Some(actual) => ParseError::ZoneMismatch {
            expected: zone.to_string(),
            actual,
        },
        None => ParseError::MissingHeader(format!("{}{}", zone, param)),
    })
}

/// Extract the status blob of a single-zone response
pub fn parse_zone_response(zone: ZoneCode, data: &[u8]) -> Result<ZoneParams, ParseError> {
    let zone_bytes = zone.as_bytes();
    let mut other_zone = None;

    for start in headers(data) {
        let rest = &data[start..];
        if rest.len() < 2 {
            continue;
        }
        if rest[..2] != zone_bytes {
            other_zone.get_or_insert_with(|| String::from_utf8_lossy(&rest[..2]).into_owned());
            continue;
        }
        return ZoneParams::from_blob(&rest[2..]);
    }

    Err(match other_zone {
        Some(actual) => ParseError::ZoneMismatch {
            expected: zone.to_string(),
            actual,
        },
        None => ParseError::MissingHeader(zone.to_string()),
    })
}

/// Extract every zone blob of a whole-amplifier response, in the order received
pub fn parse_amp_response(amp: u8, data: &[u8]) -> Result<Vec<(ZoneCode, ZoneParams)>, ParseError> {
    let mut zones = Vec::with_capacity(crate::zone::ZONES_PER_AMP as usize);

    for start in headers(data) {
        let rest = &data[start..];
        let Some(code) = rest.get(..2).and_then(|b| ZoneCode::from_bytes(b).ok()) else {
            continue;
        };
        if code.amp() != amp {
            return Err(ParseError::ZoneMismatch {
                expected: format!("{}x", amp),
                actual: code.to_string(),
            });
        }
        zones.push((code, ZoneParams::from_blob(&rest[2..])?));
    }

    if zones.is_empty() {
        return Err(ParseError::MissingHeader(format!("amp {}", amp)));
    }
    Ok(zones)
}

/// Encode one zone status line as the amplifier sends it
pub fn encode_zone_status(zone: ZoneCode, params: &ZoneParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + BLOB_LEN + ZONE_TERMINATOR.len());
    out.push(b'>');
    out.extend_from_slice(&zone.as_bytes());
    out.extend_from_slice(params.to_blob().as_bytes());
    out.extend_from_slice(ZONE_TERMINATOR);
    out
}

/// Encode one parameter line as the amplifier sends it
pub fn encode_param_status(zone: ZoneCode, param: Param, value: ParamValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + ZONE_TERMINATOR.len());
    out.push(b'>');
    out.extend_from_slice(&zone.as_bytes());
    out.extend_from_slice(param.code().as_bytes());
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(ZONE_TERMINATOR);
    out
}
