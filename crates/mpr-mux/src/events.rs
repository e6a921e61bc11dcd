//! Events published by the zone engine and replies to commands

use serde::{Deserialize, Serialize};

use crate::error::MuxError;

/// Parameter name of status events
pub const STATUS_PARAM: &str = "Status";

/// A published change of one virtual zone parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEvent {
    /// Virtual zone id
    pub zone_id: u64,
    /// Parameter name (`Status`, `PO` or a two-letter parameter code)
    pub param: String,
    /// New value
    pub value: String,
    /// Human label of the value, set for source channel changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ZoneEvent {
    pub fn new(zone_id: u64, param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            zone_id,
            param: param.into(),
            value: value.into(),
            label: None,
        }
    }

    /// Status event
    pub fn status(zone_id: u64, status: &str) -> Self {
        Self::new(zone_id, STATUS_PARAM, status)
    }

    /// Attach a value label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Answer to an inbound command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    /// Empty on success
    pub reason: String,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            reason: String::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }

    pub fn from_result<T>(result: &Result<T, MuxError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::failure(e.reason()),
        }
    }
}
