//! MPR-6ZHMAUT Bridge Daemon
//!
//! Runs the virtual zone engine on one amplifier bus. Commands are read from
//! stdin, one per line; zone events and command replies are written to stdout
//! as JSON lines. Logs go to stderr.

mod input;
mod settings;

use mpr_mux::{
    spawn_with_transport, spawn_zone_bus, BridgeConfig, BusTransport, CommandReply, MuxError,
    ZoneEvent, ZoneHandle,
};
use mpr_sim::{run_virtual_amp_task, VirtualAmplifier};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use input::InputLine;
use settings::{DaemonError, CONFIG_ENV, SIM_DEVICE};

/// Reply line written for each command
#[derive(Debug, Serialize)]
struct ReplyLine<'a> {
    zone_id: u64,
    param: &'a str,
    #[serde(flatten)]
    reply: CommandReply,
}

type ActorTask = JoinHandle<Result<(), MuxError>>;

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mpr_bridged=info,mpr_protocol=info,mpr_mux=info,mpr_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting MPR-6ZHMAUT bridge");

    if let Err(e) = run().await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn run() -> Result<(), DaemonError> {
    let path = settings::resolve_config_path(
        std::env::args().nth(1),
        std::env::var(CONFIG_ENV).ok(),
    )?;
    info!("Loading config from {}", path.display());
    let config = settings::load(&path)?;

    let (event_tx, mut event_rx) = mpsc::channel::<ZoneEvent>(256);
    let (handle, mut task) = start_bus(&config, event_tx)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_json(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                handle_line(&handle, &line).await;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }

            result = &mut task => {
                warn!("Zone actor exited early");
                return match result {
                    Ok(result) => result.map_err(DaemonError::from),
                    Err(e) => Err(DaemonError::Io(std::io::Error::other(e))),
                };
            }
        }
    }

    if handle.shutdown().await.is_ok() {
        match task.await {
            Ok(result) => result?,
            Err(e) => warn!("Zone actor task failed: {}", e),
        }
    }
    drop(handle);
    let _ = printer.await;
    Ok(())
}

/// Spawn the zone actor on the configured device, or on an in-process
/// simulated bus when the device is `sim`
fn start_bus(
    config: &BridgeConfig,
    event_tx: mpsc::Sender<ZoneEvent>,
) -> Result<(ZoneHandle, ActorTask), DaemonError> {
    if config.bus.device != SIM_DEVICE {
        return Ok(spawn_zone_bus(config, event_tx)?);
    }

    info!(
        "Using simulated bus with {} amplifiers",
        config.bus.amplifiers
    );
    let (ours, theirs) = tokio::io::duplex(4096);
    let amp = VirtualAmplifier::new("sim", config.bus.amplifiers);
    // The simulator stops when its command sender is dropped, so the sender
    // moves into the task that outlives the bus
    let (amp_cmd_tx, amp_cmd_rx) = mpsc::channel(16);
    let (amp_event_tx, _) = broadcast::channel(64);
    tokio::spawn(async move {
        let _keep = amp_cmd_tx;
        if let Err(e) = run_virtual_amp_task(theirs, amp, amp_cmd_rx, amp_event_tx).await {
            warn!("Simulated bus failed: {}", e);
        }
    });

    let bus = BusTransport::new(ours, SIM_DEVICE, config.read_timeout());
    Ok(spawn_with_transport(bus, config, event_tx)?)
}

async fn handle_line(handle: &ZoneHandle, line: &str) {
    match input::parse_line(line) {
        Ok(Some(InputLine::Command {
            zone_id,
            param,
            value,
        })) => {
            let reply = handle.command(zone_id, param.as_str(), value).await;
            print_json(&ReplyLine {
                zone_id,
                param: &param,
                reply,
            });
        }
        Ok(Some(InputLine::Status)) => match handle.status().await {
            Ok(summaries) => print_json(&summaries),
            Err(e) => warn!("Status query failed: {}", e),
        },
        Ok(Some(InputLine::Poll)) => {
            if let Err(e) = handle.poll_now().await {
                warn!("Poll failed: {}", e);
            }
        }
        Ok(None) => {}
        Err(e) => warn!("{}", e),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to encode output: {}", e),
    }
}
