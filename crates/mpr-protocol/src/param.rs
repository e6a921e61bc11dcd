//! Zone parameters and their two-character values
//!
//! The amplifier reports ten parameters per zone, always in the same order
//! and always as two ASCII digits. A full zone status is therefore a fixed
//! 20-character blob.

use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ProtocolError};

/// Length of the fixed-width zone status blob
pub const BLOB_LEN: usize = Param::ALL.len() * 2;

/// One of the ten per-zone parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Param {
    /// Public announcement (PA) input active
    PA,
    /// Power
    PR,
    /// Mute
    MU,
    /// Do-not-disturb
    DT,
    /// Volume
    VO,
    /// Treble
    TR,
    /// Bass
    BS,
    /// Balance
    BL,
    /// Source channel
    CH,
    /// Keypad connected
    LS,
}

impl Param {
    /// Every parameter in wire order
    pub const ALL: [Param; 10] = [
        Param::PA,
        Param::PR,
        Param::MU,
        Param::DT,
        Param::VO,
        Param::TR,
        Param::BS,
        Param::BL,
        Param::CH,
        Param::LS,
    ];

    /// Parameters mirrored from a model zone into a virtual zone
    pub const DERIVED: [Param; 7] = [
        Param::MU,
        Param::DT,
        Param::VO,
        Param::TR,
        Param::BS,
        Param::BL,
        Param::CH,
    ];

    /// Two-letter wire code
    pub fn code(&self) -> &'static str {
        match self {
            Param::PA => "PA",
            Param::PR => "PR",
            Param::MU => "MU",
            Param::DT => "DT",
            Param::VO => "VO",
            Param::TR => "TR",
            Param::BS => "BS",
            Param::BL => "BL",
            Param::CH => "CH",
            Param::LS => "LS",
        }
    }

    /// Look up a parameter by its two-letter code
    pub fn from_code(code: &str) -> Option<Param> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Position in the status blob
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Accepted value range (inclusive)
    pub fn range(&self) -> (u8, u8) {
        match self {
            Param::PA | Param::PR | Param::MU | Param::DT | Param::LS => (0, 1),
            Param::VO => (0, 38),
            Param::TR | Param::BS => (0, 14),
            Param::BL => (0, 20),
            Param::CH => (1, 6),
        }
    }

    /// Whether the unit accepts set commands for this parameter
    pub fn is_settable(&self) -> bool {
        !matches!(self, Param::PA | Param::LS)
    }

    /// Value assumed before the first poll
    pub fn default_value(&self) -> ParamValue {
        match self {
            Param::TR | Param::BS => ParamValue::from_number(7),
            Param::BL => ParamValue::from_number(10),
            Param::CH => ParamValue::from_number(1),
            _ => ParamValue::OFF,
        }
    }

    /// Validate and normalize a user-supplied value for a set command
    ///
    /// Accepts one or two digits (`"8"` and `"08"` are equivalent).
    pub fn normalize(&self, input: &str) -> Result<ParamValue, ProtocolError> {
        if !self.is_settable() {
            return Err(ProtocolError::ReadOnly(self.code().to_string()));
        }

        let trimmed = input.trim();
        let (min, max) = self.range();
        let out_of_range = || ProtocolError::OutOfRange {
            param: self.code().to_string(),
            value: trimmed.to_string(),
            min,
            max,
        };

        if trimmed.is_empty() || trimmed.len() > 2 || !trimmed.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(out_of_range());
        }
        let n: u8 = trimmed.parse().map_err(|_| out_of_range())?;
        if n < min || n > max {
            return Err(out_of_range());
        }
        Ok(ParamValue::from_number(n))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Param {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Param::from_code(&s.trim().to_ascii_uppercase())
            .ok_or_else(|| ProtocolError::UnknownParam(s.to_string()))
    }
}

/// A two-digit parameter value as exchanged on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamValue([u8; 2]);

impl ParamValue {
    /// `00`
    pub const OFF: ParamValue = ParamValue(*b"00");
    /// `01`
    pub const ON: ParamValue = ParamValue(*b"01");

    /// Build from a number below 100
    pub fn from_number(n: u8) -> Self {
        let n = n.min(99);
        Self([b'0' + n / 10, b'0' + n % 10])
    }

    /// Parse exactly two ASCII digits
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ParseError> {
        match bytes {
            [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => Ok(Self([*a, *b])),
            _ => Err(ParseError::InvalidValue(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
        }
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }

    /// Value as a string slice
    pub fn as_str(&self) -> &str {
        // Both bytes are ASCII digits by construction
        std::str::from_utf8(&self.0).unwrap_or("??")
    }

    /// Numeric value
    pub fn number(&self) -> u8 {
        (self.0[0] - b'0') * 10 + (self.0[1] - b'0')
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamValue({})", self.as_str())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ParamValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// All ten parameter values of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneParams {
    values: [ParamValue; 10],
}

impl Default for ZoneParams {
    fn default() -> Self {
        Self {
            values: Param::ALL.map(|p| p.default_value()),
        }
    }
}

impl ZoneParams {
    /// Parse the fixed-width status blob (extra trailing bytes are ignored)
    pub fn from_blob(blob: &[u8]) -> Result<Self, ParseError> {
        if blob.len() < BLOB_LEN {
            return Err(ParseError::ShortBlob {
                len: blob.len(),
                expected: BLOB_LEN,
            });
        }

        let mut values = [ParamValue::OFF; 10];
        for (slot, chunk) in values.iter_mut().zip(blob[..BLOB_LEN].chunks_exact(2)) {
            *slot = ParamValue::from_wire(chunk)?;
        }
        Ok(Self { values })
    }

    /// Serialize back into the 20-character blob, parameters in wire order
    pub fn to_blob(&self) -> String {
        self.values.iter().map(|v| v.as_str()).collect()
    }

    /// Get one parameter's value
    pub fn get(&self, param: Param) -> ParamValue {
        self.values[param.index()]
    }

    /// Overwrite one parameter's value
    pub fn set(&mut self, param: Param, value: ParamValue) {
        self.values[param.index()] = value;
    }

    /// Iterate `(param, value)` in wire order
    pub fn iter(&self) -> impl Iterator<Item = (Param, ParamValue)> + '_ {
        Param::ALL.into_iter().zip(self.values.iter().copied())
    }
}
