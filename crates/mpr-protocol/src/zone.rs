//! Physical zone addressing
//!
//! Every zone on the bus is addressed by a two-digit code: the amplifier
//! number (1..=3, set by the rear panel switch) followed by the zone number
//! on that amplifier (1..=6). Zone `"23"` is zone 3 of the second amplifier.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Maximum number of amplifiers that can be chained on one bus
pub const MAX_AMPS: u8 = 3;

/// Number of zones on each amplifier
pub const ZONES_PER_AMP: u8 = 6;

/// Address of one physical zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneCode {
    amp: u8,
    zone: u8,
}

impl ZoneCode {
    /// Create a zone code, validating both digits
    pub fn new(amp: u8, zone: u8) -> Result<Self, ProtocolError> {
        if !(1..=MAX_AMPS).contains(&amp) || !(1..=ZONES_PER_AMP).contains(&zone) {
            return Err(ProtocolError::InvalidZone(format!("{}{}", amp, zone)));
        }
        Ok(Self { amp, zone })
    }

    /// Amplifier number (1-based)
    pub fn amp(&self) -> u8 {
        self.amp
    }

    /// Zone number on the amplifier (1-based)
    pub fn zone(&self) -> u8 {
        self.zone
    }

    /// The two ASCII digits sent on the wire
    pub fn as_bytes(&self) -> [u8; 2] {
        [b'0' + self.amp, b'0' + self.zone]
    }

    /// Parse from the two wire digits
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [a, z] if a.is_ascii_digit() && z.is_ascii_digit() => Self::new(a - b'0', z - b'0'),
            _ => Err(ProtocolError::InvalidZone(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
        }
    }

    /// All zones of `amps` amplifiers in ascending order
    pub fn all(amps: u8) -> impl Iterator<Item = ZoneCode> {
        let amps = amps.min(MAX_AMPS);
        (1..=amps).flat_map(|amp| (1..=ZONES_PER_AMP).map(move |zone| ZoneCode { amp, zone }))
    }

    /// All zones of one amplifier in ascending order
    pub fn of_amp(amp: u8) -> impl Iterator<Item = ZoneCode> {
        (1..=ZONES_PER_AMP).map(move |zone| ZoneCode { amp, zone })
    }
}

impl fmt::Display for ZoneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amp, self.zone)
    }
}

impl FromStr for ZoneCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.trim().as_bytes())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ZoneCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ZoneCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
