//! MPR-6ZHMAUT Virtual Zone Engine
//!
//! This crate groups the physical zones of one or more chained Monoprice
//! MPR-6ZHMAUT amplifiers into virtual zones and drives them over the shared
//! serial bus.
//!
//! # Architecture
//!
//! - [`BusTransport`] runs request/response exchanges over the serial line
//! - [`ZoneStore`] caches every physical zone and records which virtual zone
//!   holds it
//! - [`VzoneRegistry`] derives virtual zone status from the locks on its
//!   children and carries out inbound commands
//! - The zone actor ([`run_zone_actor`]) owns all three, polls the bus on a
//!   timer and publishes a [`ZoneEvent`] for every observed change
//!
//! # Locking
//!
//! Powering on a virtual zone locks each of its children under the zone's
//! name. Any other virtual zone sharing one of those children reports
//! `locked` and rejects commands until the holder powers off.
//!
//! # Example
//!
//! ```rust,no_run
//! use mpr_mux::{spawn_zone_bus, BridgeConfig, VzoneConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), mpr_mux::MuxError> {
//! let mut config = BridgeConfig::new("/dev/ttyUSB0");
//! config.vzones.push(VzoneConfig {
//!     id: 1,
//!     name: "Kitchen".into(),
//!     childs: vec!["11".parse().unwrap(), "12".parse().unwrap()],
//! });
//!
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//! let (handle, _task) = spawn_zone_bus(&config, event_tx)?;
//!
//! let reply = handle.command(1, "PO", "on").await;
//! assert!(reply.success);
//! while let Some(event) = event_rx.recv().await {
//!     println!("{} {}={}", event.zone_id, event.param, event.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod store;
pub mod transport;

// Re-export actor types
pub use actor::{
    run_zone_actor, spawn_with_transport, spawn_zone_bus, VzoneSummary, ZoneActorCommand,
    ZoneEngine, ZoneHandle,
};

pub use config::{BridgeConfig, BusConfig, PollSchedule, VzoneConfig};
pub use error::{MuxError, TransportError};
pub use events::{CommandReply, ZoneEvent, STATUS_PARAM};
pub use registry::{
    parse_power, CommandOutcome, CommandParam, Observation, VirtualZone, VzoneRegistry,
    VzoneStatus, POWER_PARAM,
};
pub use store::{PhysicalZone, SetPolicy, ZoneStore};
pub use transport::{BusTransport, BAUD_RATE, BYTE_TIMEOUT};
