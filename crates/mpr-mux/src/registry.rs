//! Virtual zone registry
//!
//! A virtual zone groups one or more physical zones under a single name.
//! Powering it on takes the lock on every child so no other virtual zone can
//! drive them; the first child is the model zone whose parameters the
//! virtual zone reports.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use mpr_protocol::{Param, ParamValue, ZoneCode, ZoneParams};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::VzoneConfig;
use crate::error::MuxError;
use crate::store::ZoneStore;
use crate::transport::BusTransport;

/// Power parameter name accepted by virtual zones
pub const POWER_PARAM: &str = "PO";

/// Lifecycle state of a virtual zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VzoneStatus {
    /// Not holding its children
    Off,
    /// Holding the lock on its children
    On,
    /// At least one child is held by another virtual zone
    Locked,
}

impl VzoneStatus {
    /// Name used in status events
    pub fn as_str(&self) -> &'static str {
        match self {
            VzoneStatus::Off => "off",
            VzoneStatus::On => "on",
            VzoneStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for VzoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last published state of a virtual zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub status: VzoneStatus,
    pub params: ZoneParams,
}

/// One virtual zone
#[derive(Debug, Clone)]
pub struct VirtualZone {
    pub id: u64,
    pub name: String,
    /// Child zones, the first is the model zone
    pub childs: Vec<ZoneCode>,
    pub status: VzoneStatus,
    /// Parameters mirrored from the model zone (only [`Param::DERIVED`] are
    /// meaningful)
    pub derived: ZoneParams,
    /// What was last published; `None` until the first poll observes it
    pub previous: Option<Snapshot>,
}

impl VirtualZone {
    /// The child whose parameters this zone reports
    pub fn model(&self) -> ZoneCode {
        self.childs[0]
    }
}

/// Result of observing one virtual zone during a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub status: VzoneStatus,
    /// Derived parameters that differ from the previous snapshot, in wire
    /// order (always empty while locked)
    pub changes: Vec<(Param, ParamValue)>,
}

/// Parameter addressed by an inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandParam {
    Power,
    Zone(Param),
}

impl CommandParam {
    /// Parse a parameter name as accepted by virtual zones
    pub fn parse(name: &str) -> Result<Self, MuxError> {
        if name.trim().eq_ignore_ascii_case(POWER_PARAM) {
            return Ok(CommandParam::Power);
        }
        let param: Param = name.parse()?;
        if !Param::DERIVED.contains(&param) {
            return Err(MuxError::UnknownParam(param.code().to_string()));
        }
        Ok(CommandParam::Zone(param))
    }

    /// Name used in events
    pub fn code(&self) -> &'static str {
        match self {
            CommandParam::Power => POWER_PARAM,
            CommandParam::Zone(param) => param.code(),
        }
    }
}

/// Parse a power value
pub fn parse_power(value: &str) -> Result<bool, MuxError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "01" | "1" | "on" | "true" => Ok(true),
        "00" | "0" | "off" | "false" => Ok(false),
        other => Err(MuxError::InvalidValue(format!("power value {:?}", other))),
    }
}

/// A command that was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub param: CommandParam,
    pub value: ParamValue,
}

/// Set of virtual zones over one bus
#[derive(Debug, Default)]
pub struct VzoneRegistry {
    zones: Vec<VirtualZone>,
    channels: BTreeMap<String, String>,
}

impl VzoneRegistry {
    /// Create an empty registry with source channel labels keyed by code
    pub fn new(channels: BTreeMap<String, String>) -> Self {
        let channels = channels
            .into_iter()
            .map(|(code, label)| match Param::CH.normalize(&code) {
                Ok(value) => (value.as_str().to_string(), label),
                Err(_) => (code, label),
            })
            .collect();
        Self {
            zones: Vec::new(),
            channels,
        }
    }

    /// Register a virtual zone and record it on each child
    pub fn add(&mut self, store: &mut ZoneStore, config: &VzoneConfig) -> Result<(), MuxError> {
        if self.get(config.id).is_some() {
            return Err(MuxError::Config(format!("duplicate vzone id {}", config.id)));
        }
        if config.childs.is_empty() {
            return Err(MuxError::Config(format!(
                "vzone {} has no child zones",
                config.id
            )));
        }
        if let Some(child) = config.childs.iter().find(|c| !store.contains(**c)) {
            return Err(MuxError::Config(format!(
                "vzone {} child {} is not on the bus",
                config.id, child
            )));
        }

        for &child in &config.childs {
            store.add_slave(child, &config.name);
        }

        info!(
            "Registered vzone {} ({}) over zones {}",
            config.name,
            config.id,
            config
                .childs
                .iter()
                .map(ZoneCode::to_string)
                .collect::<Vec<_>>()
                .join(",")
        );

        self.zones.push(VirtualZone {
            id: config.id,
            name: config.name.clone(),
            childs: config.childs.clone(),
            status: VzoneStatus::Off,
            derived: ZoneParams::default(),
            previous: None,
        });
        Ok(())
    }

    /// Find a virtual zone by id
    pub fn get(&self, id: u64) -> Option<&VirtualZone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// Virtual zones in registration order
    pub fn iter(&self) -> impl Iterator<Item = &VirtualZone> {
        self.zones.iter()
    }

    /// Number of registered virtual zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether no virtual zone is registered
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Amplifiers hosting at least one child, ascending
    pub fn amps_in_use(&self) -> BTreeSet<u8> {
        self.zones
            .iter()
            .flat_map(|z| z.childs.iter().map(ZoneCode::amp))
            .collect()
    }

    /// Derive a virtual zone's status from the locks on its children
    pub fn compute_status(&self, zone: &VirtualZone, store: &ZoneStore) -> VzoneStatus {
        let owners: BTreeSet<&str> = zone
            .childs
            .iter()
            .map(|&c| store.locked_by(c))
            .filter(|owner| !owner.is_empty())
            .collect();

        if owners.len() > 1 {
            return VzoneStatus::Locked;
        }
        if owners.iter().any(|owner| *owner != zone.name) {
            return VzoneStatus::Locked;
        }
        if store.locked_by(zone.model()) == zone.name {
            VzoneStatus::On
        } else {
            VzoneStatus::Off
        }
    }

    /// Recompute the status of the zone at `index` and diff its derived
    /// parameters against the previous snapshot
    pub fn observe(&mut self, index: usize, store: &ZoneStore) -> Option<Observation> {
        let status = self.compute_status(self.zones.get(index)?, store);
        let zone = &mut self.zones[index];
        zone.status = status;

        if status == VzoneStatus::Locked {
            return Some(Observation {
                status,
                changes: Vec::new(),
            });
        }

        let current = store.params(zone.model()).unwrap_or_default();
        let changes = Param::DERIVED
            .into_iter()
            .filter(|&p| {
                zone.previous
                    .map_or(true, |prev| prev.params.get(p) != current.get(p))
            })
            .map(|p| (p, current.get(p)))
            .collect();

        zone.derived = current;
        zone.previous = Some(Snapshot {
            status,
            params: current,
        });

        Some(Observation { status, changes })
    }

    /// Carry out a command against a virtual zone
    ///
    /// Rejected commands never touch the bus. A bus failure halfway through
    /// leaves the already updated children as they are.
    pub async fn apply_command<T>(
        &mut self,
        store: &mut ZoneStore,
        bus: &mut BusTransport<T>,
        id: u64,
        param: &str,
        value: &str,
    ) -> Result<CommandOutcome, MuxError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let index = self
            .zones
            .iter()
            .position(|z| z.id == id)
            .ok_or(MuxError::UnknownZone(id))?;

        let status = self.compute_status(&self.zones[index], store);
        self.zones[index].status = status;
        if status == VzoneStatus::Locked {
            return Err(MuxError::ZoneLocked);
        }

        let param = CommandParam::parse(param)?;
        let zone = &mut self.zones[index];

        match param {
            CommandParam::Power => {
                let on = parse_power(value)?;
                let value = if on { ParamValue::ON } else { ParamValue::OFF };

                match (status, on) {
                    (VzoneStatus::Off, true) => {
                        for &child in &zone.childs {
                            store.set_param(bus, child, Param::PR, ParamValue::ON).await?;
                            store.lock(child, &zone.name);
                        }
                        zone.status = VzoneStatus::On;
                        info!("Vzone {} powered on", zone.name);
                    }
                    (VzoneStatus::On, false) => {
                        // Every lock is released before the first bus write
                        for &child in &zone.childs {
                            store.unlock(child);
                        }
                        for &child in &zone.childs {
                            store.set_param(bus, child, Param::PR, ParamValue::OFF).await?;
                        }
                        zone.status = VzoneStatus::Off;
                        info!("Vzone {} powered off", zone.name);
                    }
                    _ => debug!("Vzone {} already {}", zone.name, status),
                }

                Ok(CommandOutcome { param, value })
            }
            CommandParam::Zone(p) => {
                let requested = p.normalize(value)?;
                if status != VzoneStatus::On {
                    return Err(MuxError::ZoneOff);
                }

                let mut stored = requested;
                for (i, &child) in zone.childs.iter().enumerate() {
                    let value = store.set_param(bus, child, p, requested).await?;
                    if i == 0 {
                        stored = value;
                    }
                }

                zone.derived.set(p, stored);
                if let Some(previous) = zone.previous.as_mut() {
                    previous.params.set(p, stored);
                }
                debug!("Vzone {} {} set to {}", zone.name, p, stored);

                Ok(CommandOutcome {
                    param,
                    value: stored,
                })
            }
        }
    }

    /// Label of a source channel, or the code itself when unconfigured
    pub fn resolve_channel_name(&self, code: &str) -> String {
        let key = Param::CH
            .normalize(code)
            .map(|v| v.as_str().to_string())
            .unwrap_or_else(|_| code.to_string());
        self.channels.get(&key).cloned().unwrap_or(key)
    }
}
