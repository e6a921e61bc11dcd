//! Virtual amplifier for testing
//!
//! This module provides a simulated bus of chained MPR-6ZHMAUT units that
//! tracks every zone's parameters and answers queries the way the hardware
//! does, including the echoed request and `#` prompt.

use std::collections::{BTreeMap, BTreeSet};

use mpr_protocol::frame::{encode_param_status, encode_zone_status};
use mpr_protocol::{EncodeCommand, Param, ParamValue, Request, ZoneCode, ZoneParams, MAX_AMPS};
use tracing::debug;

/// Virtual amplifier bus for testing
pub struct VirtualAmplifier {
    /// Identifier for logging
    id: String,
    /// Number of units answering on the bus
    amps: u8,
    zones: BTreeMap<ZoneCode, ZoneParams>,
    /// Echo requests back before answering, like the hardware
    echo: bool,
    /// When false, queries go unanswered (simulates a cable fault)
    responsive: bool,
    /// Zones whose single-zone and single-parameter queries go unanswered
    silent: BTreeSet<ZoneCode>,
    /// Requests received (for test verification)
    received: Vec<Request>,
}

impl VirtualAmplifier {
    /// Create a bus with `amps` units, every zone at its power-on defaults
    pub fn new(id: impl Into<String>, amps: u8) -> Self {
        let amps = amps.clamp(1, MAX_AMPS);
        Self {
            id: id.into(),
            amps,
            zones: ZoneCode::all(amps)
                .map(|z| (z, ZoneParams::default()))
                .collect(),
            echo: true,
            responsive: true,
            silent: BTreeSet::new(),
            received: Vec::new(),
        }
    }

    /// Get the identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of units on the bus
    pub fn amps(&self) -> u8 {
        self.amps
    }

    /// Enable or disable request echo
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Enable or disable responses to queries
    pub fn set_responsive(&mut self, responsive: bool) {
        self.responsive = responsive;
    }

    /// Enable or disable responses to queries addressed to one zone
    ///
    /// Whole-amplifier queries are still answered.
    pub fn set_zone_responsive(&mut self, zone: ZoneCode, responsive: bool) {
        if responsive {
            self.silent.remove(&zone);
        } else {
            self.silent.insert(zone);
        }
    }

    /// Current parameters of a zone
    pub fn zone(&self, zone: ZoneCode) -> Option<&ZoneParams> {
        self.zones.get(&zone)
    }

    /// Change a parameter out-of-band (front keypad, another controller)
    ///
    /// Returns true if the value changed.
    pub fn set_zone_param(&mut self, zone: ZoneCode, param: Param, value: ParamValue) -> bool {
        let Some(params) = self.zones.get_mut(&zone) else {
            return false;
        };
        if params.get(param) == value {
            return false;
        }
        params.set(param, value);
        true
    }

    /// Requests received so far
    pub fn received(&self) -> &[Request] {
        &self.received
    }

    /// Process one request
    ///
    /// Returns the bytes the bus sends back, or `None` when nothing is sent
    /// (set commands, addresses without a unit, unresponsive mode).
    pub fn process_request(&mut self, request: &Request) -> Option<Vec<u8>> {
        self.received.push(*request);

        let body = match *request {
            Request::SetParam { zone, param, value } => {
                if self.set_zone_param(zone, param, value) {
                    debug!("Virtual amp {} set {}{} = {}", self.id, zone, param, value);
                }
                return None;
            }
            Request::QueryParam { zone, param } => {
                let params = self.zones.get(&zone)?;
                encode_param_status(zone, param, params.get(param))
            }
            Request::QueryZone { zone } => {
                let params = self.zones.get(&zone)?;
                encode_zone_status(zone, params)
            }
            Request::QueryAmp { amp } => {
                if amp > self.amps {
                    return None;
                }
                let mut out = Vec::new();
                for zone in ZoneCode::of_amp(amp) {
                    let params = self.zones.get(&zone)?;
                    out.extend_from_slice(&encode_zone_status(zone, params));
                }
                out.push(b'\n');
                out
            }
        };

        let zone_silent = match *request {
            Request::QueryParam { zone, .. } | Request::QueryZone { zone } => {
                self.silent.contains(&zone)
            }
            _ => false,
        };
        if !self.responsive || zone_silent {
            debug!("Virtual amp {} dropping response to {:?}", self.id, request);
            return None;
        }

        let mut out = Vec::with_capacity(body.len() + 16);
        if self.echo {
            let mut line = request.encode();
            line.truncate(line.len().saturating_sub(2));
            out.extend_from_slice(&line);
            out.push(b'\r');
        }
        out.push(b'#');
        out.extend_from_slice(&body);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpr_protocol::frame::{parse_amp_response, parse_zone_response};
    use mpr_protocol::{AMP_TERMINATOR, ZONE_TERMINATOR};

    fn zone(s: &str) -> ZoneCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_set_then_query() {
        let mut amp = VirtualAmplifier::new("test", 3);
        let set = Request::SetParam {
            zone: zone("12"),
            param: Param::VO,
            value: ParamValue::from_number(20),
        };
        assert!(amp.process_request(&set).is_none());

        let response = amp
            .process_request(&Request::QueryZone { zone: zone("12") })
            .unwrap();
        assert!(response.starts_with(b"?12\r#>12"));
        assert!(response.ends_with(ZONE_TERMINATOR));
        let params = parse_zone_response(zone("12"), &response).unwrap();
        assert_eq!(params.get(Param::VO).number(), 20);
    }

    #[test]
    fn test_amp_query_lists_six_zones() {
        let mut amp = VirtualAmplifier::new("test", 2);
        let response = amp.process_request(&Request::QueryAmp { amp: 2 }).unwrap();
        assert!(response.ends_with(AMP_TERMINATOR));
        assert_eq!(parse_amp_response(2, &response).unwrap().len(), 6);
    }

    #[test]
    fn test_missing_unit_stays_silent() {
        let mut amp = VirtualAmplifier::new("test", 1);
        assert!(amp.process_request(&Request::QueryAmp { amp: 2 }).is_none());
        assert!(amp
            .process_request(&Request::QueryZone { zone: zone("21") })
            .is_none());
    }

    #[test]
    fn test_unresponsive_drops_queries() {
        let mut amp = VirtualAmplifier::new("test", 1);
        amp.set_responsive(false);
        assert!(amp
            .process_request(&Request::QueryZone { zone: zone("11") })
            .is_none());
        assert_eq!(amp.received().len(), 1);
    }

    #[test]
    fn test_without_echo_response_starts_at_prompt() {
        let mut amp = VirtualAmplifier::new("test", 1);
        amp.set_echo(false);
        let response = amp
            .process_request(&Request::QueryParam {
                zone: zone("11"),
                param: Param::BL,
            })
            .unwrap();
        assert_eq!(response, b"#>11BL10\r\r\n");
    }

    #[test]
    fn test_silent_zone_only_drops_its_queries() {
        let mut amp = VirtualAmplifier::new("test", 1);
        amp.set_zone_responsive(zone("12"), false);
        assert!(amp
            .process_request(&Request::QueryZone { zone: zone("12") })
            .is_none());
        assert!(amp
            .process_request(&Request::QueryParam {
                zone: zone("12"),
                param: Param::PR
            })
            .is_none());
        assert!(amp
            .process_request(&Request::QueryZone { zone: zone("11") })
            .is_some());
        assert!(amp.process_request(&Request::QueryAmp { amp: 1 }).is_some());

        amp.set_zone_responsive(zone("12"), true);
        assert!(amp
            .process_request(&Request::QueryZone { zone: zone("12") })
            .is_some());
    }

    #[test]
    fn test_out_of_band_change() {
        let mut amp = VirtualAmplifier::new("test", 1);
        assert!(amp.set_zone_param(zone("13"), Param::MU, ParamValue::ON));
        assert!(!amp.set_zone_param(zone("13"), Param::MU, ParamValue::ON));
        assert!(!amp.set_zone_param(zone("23"), Param::MU, ParamValue::ON));
        assert_eq!(amp.zone(zone("13")).unwrap().get(Param::MU), ParamValue::ON);
    }
}
