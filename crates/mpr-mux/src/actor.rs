//! Zone Actor
//!
//! This module provides the async actor that owns the bus transport, the
//! physical zone store and the virtual zone registry. Polling and inbound
//! commands are both handled inside one `select!` loop, so exactly one
//! request/response exchange is ever in flight on the bus.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpr_mux::{spawn_zone_bus, BridgeConfig};
//! use tokio::sync::mpsc;
//!
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//! let (handle, task) = spawn_zone_bus(&BridgeConfig::new("/dev/ttyUSB0"), event_tx)?;
//!
//! let reply = handle.command(1, "PO", "on").await;
//! ```

use std::collections::BTreeSet;

use mpr_protocol::{Param, ParamValue, ZoneCode};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, PollSchedule};
use crate::error::MuxError;
use crate::events::{CommandReply, ZoneEvent};
use crate::registry::{CommandOutcome, CommandParam, Observation, VzoneRegistry, VzoneStatus};
use crate::store::ZoneStore;
use crate::transport::BusTransport;

/// Depth of the actor command queue
const COMMAND_QUEUE: usize = 64;

/// Snapshot of one virtual zone for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VzoneSummary {
    pub id: u64,
    pub name: String,
    pub status: VzoneStatus,
    pub childs: Vec<ZoneCode>,
    /// Derived parameters as last observed
    pub params: Vec<(Param, ParamValue)>,
}

/// Commands sent to the zone actor
#[derive(Debug)]
pub enum ZoneActorCommand {
    /// Inbound command for a virtual zone
    Command {
        zone_id: u64,
        param: String,
        value: String,
        /// Channel to send back the reply
        response: oneshot::Sender<CommandReply>,
    },

    /// Query every virtual zone
    QueryStatus {
        response: oneshot::Sender<Vec<VzoneSummary>>,
    },

    /// Run a full polling pass now, answering when it is done
    PollNow { response: oneshot::Sender<()> },

    /// Shutdown the actor
    Shutdown,
}

/// Cloneable handle for talking to a running zone actor
#[derive(Debug, Clone)]
pub struct ZoneHandle {
    cmd_tx: mpsc::Sender<ZoneActorCommand>,
}

impl ZoneHandle {
    /// Send a command and wait for its reply
    ///
    /// A stopped actor yields a failed reply rather than an error.
    pub async fn command(
        &self,
        zone_id: u64,
        param: impl Into<String>,
        value: impl Into<String>,
    ) -> CommandReply {
        let (response, rx) = oneshot::channel();
        let cmd = ZoneActorCommand::Command {
            zone_id,
            param: param.into(),
            value: value.into(),
            response,
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            return CommandReply::failure(MuxError::ActorGone.reason());
        }
        rx.await
            .unwrap_or_else(|_| CommandReply::failure(MuxError::ActorGone.reason()))
    }

    /// Current state of every virtual zone
    pub async fn status(&self) -> Result<Vec<VzoneSummary>, MuxError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(ZoneActorCommand::QueryStatus { response })
            .await
            .map_err(|_| MuxError::ActorGone)?;
        rx.await.map_err(|_| MuxError::ActorGone)
    }

    /// Run a polling pass and wait for it to finish
    pub async fn poll_now(&self) -> Result<(), MuxError> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx
            .send(ZoneActorCommand::PollNow { response })
            .await
            .map_err(|_| MuxError::ActorGone)?;
        rx.await.map_err(|_| MuxError::ActorGone)
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) -> Result<(), MuxError> {
        self.cmd_tx
            .send(ZoneActorCommand::Shutdown)
            .await
            .map_err(|_| MuxError::ActorGone)
    }
}

/// The state owned by the zone actor
pub struct ZoneEngine<T> {
    bus: BusTransport<T>,
    store: ZoneStore,
    registry: VzoneRegistry,
    poll_interval: Duration,
    schedule: PollSchedule,
    /// Next virtual zone for per-zone polling
    cursor: usize,
    event_tx: mpsc::Sender<ZoneEvent>,
}

impl<T> ZoneEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Build the store and registry for `config` over an open transport
    pub fn build(
        bus: BusTransport<T>,
        config: &BridgeConfig,
        event_tx: mpsc::Sender<ZoneEvent>,
    ) -> Result<Self, MuxError> {
        config.validate()?;

        let mut store = ZoneStore::new(config.bus.amplifiers, config.set_policy);
        let mut registry = VzoneRegistry::new(config.bus.channels.clone());
        for vzone in &config.vzones {
            registry.add(&mut store, vzone)?;
        }

        Ok(Self {
            bus,
            store,
            registry,
            poll_interval: config.poll_interval(),
            schedule: config.poll_schedule,
            cursor: 0,
            event_tx,
        })
    }

    /// Physical zone store
    pub fn store(&self) -> &ZoneStore {
        &self.store
    }

    /// Virtual zone registry
    pub fn registry(&self) -> &VzoneRegistry {
        &self.registry
    }

    /// Time between polling ticks
    pub fn tick_period(&self) -> Duration {
        let period = match self.schedule {
            PollSchedule::PerPass => self.poll_interval,
            PollSchedule::PerZone => {
                let zones = self.registry.len().max(1) as u32;
                self.poll_interval / zones
            }
        };
        period.max(Duration::from_millis(1))
    }

    /// Run one tick of the configured schedule
    pub async fn poll_tick(&mut self) {
        match self.schedule {
            PollSchedule::PerPass => self.poll_pass().await,
            PollSchedule::PerZone => self.poll_next_zone().await,
        }
    }

    /// Refresh every amplifier in use, then observe every virtual zone
    pub async fn poll_pass(&mut self) {
        let amps = self.registry.amps_in_use();
        self.refresh_amps(&amps).await;
        for index in 0..self.registry.len() {
            self.observe(index).await;
        }
    }

    /// Refresh and observe the next virtual zone in rotation
    pub async fn poll_next_zone(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let index = self.cursor % self.registry.len();
        self.cursor = (index + 1) % self.registry.len();

        let amps: BTreeSet<u8> = self
            .registry
            .iter()
            .nth(index)
            .map(|z| z.childs.iter().map(ZoneCode::amp).collect())
            .unwrap_or_default();
        self.refresh_amps(&amps).await;
        self.observe(index).await;
    }

    async fn refresh_amps(&mut self, amps: &BTreeSet<u8>) {
        for &amp in amps {
            if let Err(e) = self.store.refresh_amp(&mut self.bus, amp).await {
                warn!("Failed to refresh amp {} on {}: {}", amp, self.bus.name(), e);
            }
        }
    }

    async fn observe(&mut self, index: usize) {
        let Some(Observation { status, changes }) = self.registry.observe(index, &self.store)
        else {
            return;
        };
        let Some(id) = self.registry.iter().nth(index).map(|z| z.id) else {
            return;
        };

        publish(&self.event_tx, ZoneEvent::status(id, status.as_str())).await;
        for (param, value) in changes {
            debug!("Vzone {} {} changed to {}", id, param, value);
            let event = self.param_event(id, param.code(), value);
            publish(&self.event_tx, event).await;
        }
    }

    fn param_event(&self, id: u64, param: &str, value: ParamValue) -> ZoneEvent {
        let event = ZoneEvent::new(id, param, value.as_str());
        if param == Param::CH.code() {
            event.with_label(self.registry.resolve_channel_name(value.as_str()))
        } else {
            event
        }
    }

    /// Carry out an inbound command and publish it on success
    pub async fn handle_command(&mut self, zone_id: u64, param: &str, value: &str) -> CommandReply {
        let result = self
            .registry
            .apply_command(&mut self.store, &mut self.bus, zone_id, param, value)
            .await;

        match &result {
            Ok(CommandOutcome { param, value }) => {
                let event = match param {
                    CommandParam::Power => ZoneEvent::new(zone_id, param.code(), value.as_str()),
                    CommandParam::Zone(p) => self.param_event(zone_id, p.code(), *value),
                };
                publish(&self.event_tx, event).await;
            }
            Err(e) if e.is_rejection() => {
                debug!("Rejected {} {}={} : {}", zone_id, param, value, e);
            }
            Err(e) => {
                warn!("Command {} {}={} failed: {}", zone_id, param, value, e);
            }
        }

        CommandReply::from_result(&result)
    }

    /// Summaries of every virtual zone
    pub fn summaries(&self) -> Vec<VzoneSummary> {
        self.registry
            .iter()
            .map(|z| VzoneSummary {
                id: z.id,
                name: z.name.clone(),
                status: z.status,
                childs: z.childs.clone(),
                params: Param::DERIVED
                    .into_iter()
                    .map(|p| (p, z.derived.get(p)))
                    .collect(),
            })
            .collect()
    }

    /// Release the bus
    pub async fn close(self) -> Result<(), MuxError> {
        self.bus.close().await.map_err(MuxError::from)
    }
}

async fn publish(event_tx: &mpsc::Sender<ZoneEvent>, event: ZoneEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}

/// Run the zone actor
///
/// The first poll runs immediately. Returns when a `Shutdown` command is
/// received or every handle has been dropped, after closing the bus.
pub async fn run_zone_actor<T>(
    mut engine: ZoneEngine<T>,
    mut cmd_rx: mpsc::Receiver<ZoneActorCommand>,
) -> Result<(), MuxError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let period = engine.tick_period();
    info!(
        "Zone actor started on {} with {} vzones, polling every {:?}",
        engine.bus.name(),
        engine.registry.len(),
        period
    );

    let mut poll_timer = interval(period);
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("All zone handles dropped");
                    break;
                };
                match cmd {
                    ZoneActorCommand::Command { zone_id, param, value, response } => {
                        let reply = engine.handle_command(zone_id, &param, &value).await;
                        let _ = response.send(reply);
                    }
                    ZoneActorCommand::QueryStatus { response } => {
                        let _ = response.send(engine.summaries());
                    }
                    ZoneActorCommand::PollNow { response } => {
                        engine.poll_pass().await;
                        let _ = response.send(());
                    }
                    ZoneActorCommand::Shutdown => {
                        info!("Shutdown requested for zone actor");
                        break;
                    }
                }
            }

            _ = poll_timer.tick() => {
                engine.poll_tick().await;
            }
        }
    }

    engine.close().await?;
    info!("Zone actor stopped");
    Ok(())
}

/// Start a zone actor over an already connected transport
pub fn spawn_with_transport<T>(
    bus: BusTransport<T>,
    config: &BridgeConfig,
    event_tx: mpsc::Sender<ZoneEvent>,
) -> Result<(ZoneHandle, JoinHandle<Result<(), MuxError>>), MuxError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let engine = ZoneEngine::build(bus, config, event_tx)?;
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(run_zone_actor(engine, cmd_rx));
    Ok((ZoneHandle { cmd_tx }, task))
}

/// Open the configured serial device and start a zone actor on it
///
/// The device is opened before any virtual zone is built, so a bad path is
/// reported as [`TransportError::DeviceOpen`](crate::TransportError::DeviceOpen).
pub fn spawn_zone_bus(
    config: &BridgeConfig,
    event_tx: mpsc::Sender<ZoneEvent>,
) -> Result<(ZoneHandle, JoinHandle<Result<(), MuxError>>), MuxError> {
    let bus = BusTransport::open(&config.bus.device, config.read_timeout())?;
    spawn_with_transport(bus, config, event_tx)
}
