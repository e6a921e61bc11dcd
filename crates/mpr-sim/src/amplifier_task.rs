//! Virtual amplifier actor task
//!
//! This module provides a pure async task that owns a VirtualAmplifier and
//! serves the line protocol over an async stream. The task uses a select!
//! loop to:
//! - Read request lines from the stream and answer them
//! - Apply out-of-band changes and shutdown commands from a channel
//! - Emit request and state change events via a broadcast channel

use std::io;
use std::time::Duration;

use mpr_protocol::{Param, ParamValue, ProtocolCodec, Request, RequestCodec, RequestLine, ZoneCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::VirtualAmplifier;

/// Commands that can be sent to a virtual amplifier actor
#[derive(Debug, Clone)]
pub enum VirtualAmpCommand {
    /// Change a zone parameter as if from the front keypad
    SetZoneParam {
        zone: ZoneCode,
        param: Param,
        value: ParamValue,
    },
    /// Stop (or resume) answering queries
    SetResponsive(bool),
    /// Stop (or resume) answering queries addressed to one zone
    SetZoneResponsive { zone: ZoneCode, responsive: bool },
    /// Wait this long before writing each response
    SetReplyDelay(Duration),
    /// Shutdown the virtual amplifier actor
    Shutdown,
}

/// Event emitted by the virtual amplifier actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualAmpEvent {
    /// A well-formed request arrived on the bus
    RequestReceived(Request),
    /// A zone parameter changed (by a set frame or out-of-band)
    ZoneChanged {
        zone: ZoneCode,
        param: Param,
        value: ParamValue,
    },
}

/// Run the virtual amplifier actor task
///
/// This task owns the VirtualAmplifier and processes:
/// 1. Request lines read from the stream (sent by the bus transport)
/// 2. Commands from the command channel
///
/// Returns when the stream closes, on shutdown, or when the command channel
/// closes.
pub async fn run_virtual_amp_task<S>(
    mut stream: S,
    mut amp: VirtualAmplifier,
    mut cmd_rx: mpsc::Receiver<VirtualAmpCommand>,
    event_tx: broadcast::Sender<VirtualAmpEvent>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = RequestCodec::new();
    let mut buf = [0u8; 256];
    let mut reply_delay = Duration::ZERO;

    info!(
        "Starting virtual amplifier task for {} ({} units)",
        amp.id(),
        amp.amps()
    );

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual amplifier stream closed for {}", amp.id());
                        break;
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(line) = codec.next_command() {
                            let request = match line {
                                RequestLine::Request(request) => request,
                                RequestLine::Unknown(text) => {
                                    warn!("Virtual amplifier {} ignoring {:?}", amp.id(), text);
                                    continue;
                                }
                            };
                            let _ = event_tx.send(VirtualAmpEvent::RequestReceived(request));

                            let before = match request {
                                Request::SetParam { zone, param, .. } => {
                                    amp.zone(zone).map(|p| p.get(param))
                                }
                                _ => None,
                            };

                            if let Some(response) = amp.process_request(&request) {
                                if !reply_delay.is_zero() {
                                    tokio::time::sleep(reply_delay).await;
                                }
                                stream.write_all(&response).await?;
                                stream.flush().await?;
                            }

                            if let Request::SetParam { zone, param, value } = request {
                                if before.is_some_and(|old| old != value) {
                                    let _ = event_tx.send(VirtualAmpEvent::ZoneChanged { zone, param, value });
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Virtual amplifier {} stream error: {}", amp.id(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualAmpCommand::SetZoneParam { zone, param, value }) => {
                        if amp.set_zone_param(zone, param, value) {
                            debug!("Virtual amp {} keypad change {}{} = {}", amp.id(), zone, param, value);
                            let _ = event_tx.send(VirtualAmpEvent::ZoneChanged { zone, param, value });
                        }
                    }
                    Some(VirtualAmpCommand::SetResponsive(responsive)) => {
                        info!("Virtual amp {} responsive set to {}", amp.id(), responsive);
                        amp.set_responsive(responsive);
                    }
                    Some(VirtualAmpCommand::SetZoneResponsive { zone, responsive }) => {
                        info!("Virtual amp {} zone {} responsive set to {}", amp.id(), zone, responsive);
                        amp.set_zone_responsive(zone, responsive);
                    }
                    Some(VirtualAmpCommand::SetReplyDelay(delay)) => {
                        info!("Virtual amp {} reply delay set to {:?}", amp.id(), delay);
                        reply_delay = delay;
                    }
                    Some(VirtualAmpCommand::Shutdown) => {
                        info!("Shutdown requested for virtual amplifier {}", amp.id());
                        break;
                    }
                    None => {
                        debug!("Command channel closed for virtual amplifier {}", amp.id());
                        break;
                    }
                }
            }
        }
    }

    info!("Virtual amplifier task ended for {}", amp.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use mpr_protocol::frame::parse_zone_response;
    use tokio::io::AsyncWriteExt;

    fn zone(s: &str) -> ZoneCode {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_virtual_amp_answers_zone_query() {
        let (mut connection_stream, amp_stream) = tokio::io::duplex(1024);

        let amp = VirtualAmplifier::new("Test", 3);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _event_rx) = broadcast::channel(32);

        let task_handle = tokio::spawn(run_virtual_amp_task(amp_stream, amp, cmd_rx, event_tx));

        connection_stream.write_all(b"?21\r\n").await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 64];
        while !response.ends_with(b"\r\r\n") {
            let n = tokio::time::timeout(Duration::from_millis(100), connection_stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            response.extend_from_slice(&buf[..n]);
        }
        let params = parse_zone_response(zone("21"), &response).unwrap();
        assert_eq!(params, mpr_protocol::ZoneParams::default());

        drop(cmd_tx);
        drop(connection_stream);
        let _ = task_handle.await;
    }

    #[tokio::test]
    async fn test_virtual_amp_emits_set_changes() {
        let (mut connection_stream, amp_stream) = tokio::io::duplex(1024);

        let amp = VirtualAmplifier::new("Test", 1);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, mut event_rx) = broadcast::channel(32);

        let task_handle = tokio::spawn(run_virtual_amp_task(amp_stream, amp, cmd_rx, event_tx));

        connection_stream.write_all(b"<11VO12\r\n").await.unwrap();

        let first = tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, VirtualAmpEvent::RequestReceived(Request::SetParam { .. })));

        let second = tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            second,
            VirtualAmpEvent::ZoneChanged {
                zone: zone("11"),
                param: Param::VO,
                value: ParamValue::from_number(12),
            }
        );

        drop(cmd_tx);
        drop(connection_stream);
        let _ = task_handle.await;
    }

    #[tokio::test]
    async fn test_virtual_amp_shutdown_command() {
        let (_connection_stream, amp_stream) = tokio::io::duplex(1024);

        let amp = VirtualAmplifier::new("Test", 3);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _event_rx) = broadcast::channel(32);

        let task_handle = tokio::spawn(run_virtual_amp_task(amp_stream, amp, cmd_rx, event_tx));

        cmd_tx.send(VirtualAmpCommand::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), task_handle)
            .await
            .unwrap();

        assert!(result.is_ok());
    }
}
