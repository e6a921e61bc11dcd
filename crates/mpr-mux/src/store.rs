//! Physical zone state tracking

use std::collections::BTreeMap;

use mpr_protocol::{Param, ParamValue, ZoneCode, ZoneParams};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::BusTransport;

/// How a parameter set is reflected in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetPolicy {
    /// Store the requested value immediately without reading it back; the
    /// polling loop corrects any drift
    #[default]
    Optimistic,
    /// Query the parameter after setting it and store what the unit reports
    ReadBack,
}

/// Cached state of one physical zone
#[derive(Debug, Clone)]
pub struct PhysicalZone {
    /// Zone address
    pub code: ZoneCode,
    /// Last known parameter values
    pub params: ZoneParams,
    /// Name of the virtual zone holding this zone, empty when free
    pub locked_by: String,
    /// Virtual zones that include this zone (diagnostic only)
    pub slave_of: Vec<String>,
}

impl PhysicalZone {
    fn new(code: ZoneCode) -> Self {
        Self {
            code,
            params: ZoneParams::default(),
            locked_by: String::new(),
            slave_of: Vec::new(),
        }
    }

    /// Whether any virtual zone holds this zone
    pub fn is_locked(&self) -> bool {
        !self.locked_by.is_empty()
    }
}

/// In-memory table of every physical zone on the bus
#[derive(Debug)]
pub struct ZoneStore {
    zones: BTreeMap<ZoneCode, PhysicalZone>,
    set_policy: SetPolicy,
}

impl ZoneStore {
    /// Create entries with default values for every zone of `amps` amplifiers
    pub fn new(amps: u8, set_policy: SetPolicy) -> Self {
        Self {
            zones: ZoneCode::all(amps)
                .map(|code| (code, PhysicalZone::new(code)))
                .collect(),
            set_policy,
        }
    }

    /// Get a zone's cached state
    pub fn get(&self, code: ZoneCode) -> Option<&PhysicalZone> {
        self.zones.get(&code)
    }

    /// Get a copy of a zone's cached parameters
    pub fn params(&self, code: ZoneCode) -> Option<ZoneParams> {
        self.zones.get(&code).map(|z| z.params)
    }

    /// Whether the zone exists on this bus
    pub fn contains(&self, code: ZoneCode) -> bool {
        self.zones.contains_key(&code)
    }

    /// Iterate over all zones in address order
    pub fn zones(&self) -> impl Iterator<Item = &PhysicalZone> {
        self.zones.values()
    }

    /// Active set policy
    pub fn set_policy(&self) -> SetPolicy {
        self.set_policy
    }

    /// Overwrite the cached parameters of one zone
    pub fn update(&mut self, code: ZoneCode, params: ZoneParams) {
        if let Some(zone) = self.zones.get_mut(&code) {
            zone.params = params;
        }
    }

    /// Overwrite one cached parameter
    fn update_param(&mut self, code: ZoneCode, param: Param, value: ParamValue) {
        if let Some(zone) = self.zones.get_mut(&code) {
            zone.params.set(param, value);
        }
    }

    /// Query one zone from the hardware and overwrite its cache entry
    pub async fn refresh_one<T>(
        &mut self,
        bus: &mut BusTransport<T>,
        code: ZoneCode,
    ) -> Result<(), TransportError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let params = bus.query_zone(code).await?;
        self.update(code, params);
        Ok(())
    }

    /// Query every zone of one amplifier and overwrite their cache entries
    ///
    /// Returns the number of zones updated.
    pub async fn refresh_amp<T>(
        &mut self,
        bus: &mut BusTransport<T>,
        amp: u8,
    ) -> Result<usize, TransportError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let zones = bus.query_amp(amp).await?;
        let count = zones.len();
        for (code, params) in zones {
            self.update(code, params);
        }
        debug!("Refreshed {} zones of amp {}", count, amp);
        Ok(count)
    }

    /// Set one parameter on the hardware and update the cache
    ///
    /// Returns the value now cached.
    pub async fn set_param<T>(
        &mut self,
        bus: &mut BusTransport<T>,
        code: ZoneCode,
        param: Param,
        value: ParamValue,
    ) -> Result<ParamValue, TransportError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        bus.set_param(code, param, value).await?;

        let stored = match self.set_policy {
            SetPolicy::Optimistic => value,
            SetPolicy::ReadBack => {
                let reported = bus.query_param(code, param).await?;
                if reported != value {
                    warn!(
                        "Zone {} reported {}={} after setting {}",
                        code, param, reported, value
                    );
                }
                reported
            }
        };
        self.update_param(code, param, stored);
        Ok(stored)
    }

    /// Record `owner` as holding the zone
    ///
    /// Ignored when a different owner already holds it; exclusivity is
    /// enforced by the registry before calling.
    pub fn lock(&mut self, code: ZoneCode, owner: &str) {
        let Some(zone) = self.zones.get_mut(&code) else {
            return;
        };
        if zone.is_locked() && zone.locked_by != owner {
            debug!(
                "Zone {} already locked by {:?}, ignoring lock for {:?}",
                code, zone.locked_by, owner
            );
            return;
        }
        zone.locked_by = owner.to_string();
    }

    /// Release the zone
    pub fn unlock(&mut self, code: ZoneCode) {
        if let Some(zone) = self.zones.get_mut(&code) {
            zone.locked_by.clear();
        }
    }

    /// Current lock owner, empty when free
    pub fn locked_by(&self, code: ZoneCode) -> &str {
        self.zones
            .get(&code)
            .map(|z| z.locked_by.as_str())
            .unwrap_or("")
    }

    /// Record that `vzone` includes this zone
    pub fn add_slave(&mut self, code: ZoneCode, vzone: &str) {
        if let Some(zone) = self.zones.get_mut(&code) {
            zone.slave_of.push(vzone.to_string());
        }
    }
}
