//! Bridge configuration
//!
//! Describes the amplifier bus, the channel labels of its source inputs, and
//! the virtual zones built on top of the physical zones.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use mpr_protocol::{Param, ZoneCode, MAX_AMPS};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MuxError;
use crate::store::SetPolicy;

/// How the polling loop paces itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollSchedule {
    /// Refresh every amplifier and evaluate every virtual zone, then sleep
    /// for the full poll interval
    #[default]
    PerPass,
    /// Evaluate one virtual zone per tick, sleeping `interval / zone_count`
    /// between zones so a full rotation still takes one interval
    PerZone,
}

/// Serial bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub device: String,
    /// Number of chained amplifiers on the bus
    #[serde(default = "default_amplifiers")]
    pub amplifiers: u8,
    /// Source channel labels keyed by two-digit channel code (`"01"`..`"06"`)
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
}

fn default_amplifiers() -> u8 {
    MAX_AMPS
}

/// One virtual zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VzoneConfig {
    /// Externally supplied identifier
    pub id: u64,
    /// Human label, also the lock owner token
    pub name: String,
    /// Physical zones, the first one being the model zone
    ///
    /// Accepts a list (`["11", "12"]`) or a comma-separated string (`"11,12"`).
    #[serde(deserialize_with = "deserialize_childs")]
    pub childs: Vec<ZoneCode>,
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Amplifier bus
    pub bus: BusConfig,
    /// Virtual zones in registration order
    #[serde(default)]
    pub vzones: Vec<VzoneConfig>,
    /// Duration of one full polling rotation in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polling pace
    #[serde(default)]
    pub poll_schedule: PollSchedule,
    /// Deadline for one complete response frame in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Whether parameter sets are confirmed by reading them back
    #[serde(default)]
    pub set_policy: SetPolicy,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_read_timeout_ms() -> u64 {
    1500
}

impl BridgeConfig {
    /// Create a configuration for `device` with defaults and no virtual zones
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            bus: BusConfig {
                device: device.into(),
                amplifiers: default_amplifiers(),
                channels: BTreeMap::new(),
            },
            vzones: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_schedule: PollSchedule::default(),
            read_timeout_ms: default_read_timeout_ms(),
            set_policy: SetPolicy::default(),
        }
    }

    /// Duration of one full polling rotation
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline for one response frame
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Check the configuration for inconsistencies
    pub fn validate(&self) -> Result<(), MuxError> {
        let amps = self.bus.amplifiers;
        if !(1..=MAX_AMPS).contains(&amps) {
            return Err(MuxError::Config(format!(
                "amplifiers must be 1..={}, got {}",
                MAX_AMPS, amps
            )));
        }
        if self.bus.device.trim().is_empty() {
            return Err(MuxError::Config("bus device is empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(MuxError::Config("poll_interval_ms must be positive".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(MuxError::Config("read_timeout_ms must be positive".into()));
        }

        for code in self.bus.channels.keys() {
            Param::CH
                .normalize(code)
                .map_err(|_| MuxError::Config(format!("invalid channel code {:?}", code)))?;
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for vzone in &self.vzones {
            if !ids.insert(vzone.id) {
                return Err(MuxError::Config(format!("duplicate vzone id {}", vzone.id)));
            }
            if vzone.name.trim().is_empty() {
                return Err(MuxError::Config(format!("vzone {} has no name", vzone.id)));
            }
            if !names.insert(vzone.name.as_str()) {
                return Err(MuxError::Config(format!(
                    "duplicate vzone name {:?}",
                    vzone.name
                )));
            }
            if vzone.childs.is_empty() {
                return Err(MuxError::Config(format!(
                    "vzone {} has no child zones",
                    vzone.id
                )));
            }
            if let Some(child) = vzone.childs.iter().find(|c| c.amp() > amps) {
                return Err(MuxError::Config(format!(
                    "vzone {} child {} is beyond the {} configured amplifiers",
                    vzone.id, child, amps
                )));
            }
        }

        Ok(())
    }
}

fn deserialize_childs<'de, D>(deserializer: D) -> Result<Vec<ZoneCode>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Childs {
        List(Vec<ZoneCode>),
        Joined(String),
    }

    match Childs::deserialize(deserializer)? {
        Childs::List(list) => Ok(list),
        Childs::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(s: &str) -> ZoneCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let json = r#"{
            "bus": { "device": "/dev/ttyUSB0", "channels": { "01": "Tuner", "02": "Chromecast" } },
            "vzones": [
                { "id": 1, "name": "Kitchen", "childs": ["11"] },
                { "id": 2, "name": "Ground floor", "childs": "11, 12,13" }
            ]
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.bus.amplifiers, 3);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.read_timeout_ms, 1500);
        assert_eq!(config.poll_schedule, PollSchedule::PerPass);
        assert_eq!(config.set_policy, SetPolicy::Optimistic);
        assert_eq!(config.vzones[1].childs, vec![zone("11"), zone("12"), zone("13")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_schedule_and_policy() {
        let json = r#"{
            "bus": { "device": "/dev/ttyUSB0" },
            "poll_schedule": "per_zone",
            "set_policy": "read_back"
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.poll_schedule, PollSchedule::PerZone);
        assert_eq!(config.set_policy, SetPolicy::ReadBack);
    }

    #[test]
    fn test_reject_bad_child_code() {
        let json = r#"{
            "bus": { "device": "/dev/ttyUSB0" },
            "vzones": [{ "id": 1, "name": "Porch", "childs": "11,47" }]
        }"#;
        assert!(serde_json::from_str::<BridgeConfig>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_childs() {
        let mut config = BridgeConfig::new("/dev/ttyUSB0");
        config.vzones.push(VzoneConfig {
            id: 1,
            name: "Attic".into(),
            childs: vec![],
        });
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_child_beyond_amp_count() {
        let mut config = BridgeConfig::new("/dev/ttyUSB0");
        config.bus.amplifiers = 1;
        config.vzones.push(VzoneConfig {
            id: 1,
            name: "Garage".into(),
            childs: vec![zone("21")],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = BridgeConfig::new("/dev/ttyUSB0");
        config.vzones.push(VzoneConfig {
            id: 1,
            name: "Den".into(),
            childs: vec![zone("11")],
        });
        config.vzones.push(VzoneConfig {
            id: 1,
            name: "Office".into(),
            childs: vec![zone("12")],
        });
        assert!(config.validate().is_err());

        config.vzones[1].id = 2;
        config.vzones[1].name = "Den".into();
        assert!(config.validate().is_err());

        config.vzones[1].name = "Office".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_channel_code() {
        let mut config = BridgeConfig::new("/dev/ttyUSB0");
        config.bus.channels.insert("09".into(), "Phono".into());
        assert!(config.validate().is_err());
    }
}
