//! Serial bus transport
//!
//! One connection serves every amplifier on the bus. The protocol is strictly
//! request/response, so a transport must only ever be driven by one task at a
//! time; the zone actor owns it exclusively.
//!
//! Every response read is bounded by a deadline covering the whole frame. If
//! the terminator never arrives the read fails with
//! [`TransportError::ReadTimeout`] carrying whatever bytes were received.
//! Bytes still readable when the next request goes out belong to an
//! abandoned exchange and are discarded first.

use std::time::Duration;

use mpr_protocol::frame::{parse_amp_response, parse_param_response, parse_zone_response};
use mpr_protocol::{
    escape_bytes, EncodeCommand, Param, ParamValue, Request, ZoneCode, ZoneParams,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;

/// Fixed bus baud rate
pub const BAUD_RATE: u32 = 9600;

/// Per-byte read timeout configured on the serial device
pub const BYTE_TIMEOUT: Duration = Duration::from_secs(1);

/// Request/response transport over one amplifier bus
pub struct BusTransport<T> {
    io: T,
    name: String,
    read_timeout: Duration,
}

impl BusTransport<SerialStream> {
    /// Open the serial device at 9600 baud, 8N1
    pub fn open(path: &str, read_timeout: Duration) -> Result<Self, TransportError> {
        let stream = tokio_serial::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(BYTE_TIMEOUT)
            .open_native_async()
            .map_err(|e| TransportError::DeviceOpen {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        info!("Amplifier bus opened on {} @ {}", path, BAUD_RATE);
        Ok(Self::new(stream, path, read_timeout))
    }
}

impl<T> BusTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream
    ///
    /// Any `AsyncRead + AsyncWrite` works, which lets a simulated amplifier
    /// on a duplex pipe stand in for the serial port.
    pub fn new(io: T, name: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            io,
            name: name.into(),
            read_timeout,
        }
    }

    /// Bus name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame read deadline
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Write raw bytes to the bus
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        trace!("{} TX {}", self.name, escape_bytes(data));
        self.io.write_all(data).await.map_err(TransportError::Write)?;
        self.io.flush().await.map_err(TransportError::Write)
    }

    /// Read one byte at a time until the received bytes end with `terminator`
    pub async fn receive(&mut self, terminator: &[u8]) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut received = Vec::with_capacity(64);

        loop {
            match timeout_at(deadline, self.io.read_u8()).await {
                Ok(Ok(byte)) => {
                    received.push(byte);
                    if received.ends_with(terminator) {
                        trace!("{} RX {}", self.name, escape_bytes(&received));
                        return Ok(received);
                    }
                }
                Ok(Err(e))
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    tokio::task::yield_now().await;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("{} closed mid-frame", self.name);
                    return Err(self.timed_out(received));
                }
                Ok(Err(e)) => return Err(TransportError::Read(e)),
                Err(_) => return Err(self.timed_out(received)),
            }
        }
    }

    fn timed_out(&self, received: Vec<u8>) -> TransportError {
        warn!(
            "{} response timeout, partial frame: {}",
            self.name,
            escape_bytes(&received)
        );
        TransportError::ReadTimeout {
            timeout_ms: self.read_timeout.as_millis() as u64,
            received,
        }
    }

    /// Drop any bytes that are already readable without waiting
    pub async fn discard_pending(&mut self) -> Result<usize, TransportError> {
        let mut buf = [0u8; 64];
        let mut discarded = Vec::new();

        loop {
            match timeout(Duration::ZERO, self.io.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded.extend_from_slice(&buf[..n]),
                Ok(Err(e))
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Ok(Err(e)) => return Err(TransportError::Read(e)),
            }
        }

        if !discarded.is_empty() {
            debug!(
                "{} discarded {} stale bytes: {}",
                self.name,
                discarded.len(),
                escape_bytes(&discarded)
            );
        }
        Ok(discarded.len())
    }

    /// Send a request and read its response, if the request has one
    pub async fn exchange(&mut self, request: &Request) -> Result<Option<Vec<u8>>, TransportError> {
        self.discard_pending().await?;
        self.send(&request.encode()).await?;
        match request.response_terminator() {
            Some(terminator) => self.receive(terminator).await.map(Some),
            None => Ok(None),
        }
    }

    /// Query a single parameter of one zone
    pub async fn query_param(
        &mut self,
        zone: ZoneCode,
        param: Param,
    ) -> Result<ParamValue, TransportError> {
        let response = self.expect_response(&Request::QueryParam { zone, param }).await?;
        Ok(parse_param_response(zone, param, &response)?)
    }

    /// Query all parameters of one zone
    pub async fn query_zone(&mut self, zone: ZoneCode) -> Result<ZoneParams, TransportError> {
        let response = self.expect_response(&Request::QueryZone { zone }).await?;
        Ok(parse_zone_response(zone, &response)?)
    }

    /// Query all zones of one amplifier
    pub async fn query_amp(&mut self, amp: u8) -> Result<Vec<(ZoneCode, ZoneParams)>, TransportError> {
        let response = self.expect_response(&Request::QueryAmp { amp }).await?;
        Ok(parse_amp_response(amp, &response)?)
    }

    /// Set one parameter; the amplifier does not answer
    pub async fn set_param(
        &mut self,
        zone: ZoneCode,
        param: Param,
        value: ParamValue,
    ) -> Result<(), TransportError> {
        self.exchange(&Request::SetParam { zone, param, value })
            .await
            .map(|_| ())
    }

    async fn expect_response(&mut self, request: &Request) -> Result<Vec<u8>, TransportError> {
        // Only set requests go unanswered and those never reach here
        Ok(self.exchange(request).await?.unwrap_or_default())
    }

    /// Release the connection
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.io
            .shutdown()
            .await
            .map_err(TransportError::DeviceClose)?;
        info!("Amplifier bus {} closed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn bus(timeout_ms: u64) -> (BusTransport<DuplexStream>, DuplexStream) {
        let (ours, theirs) = duplex(1024);
        (
            BusTransport::new(ours, "test", Duration::from_millis(timeout_ms)),
            theirs,
        )
    }

    fn zone(s: &str) -> ZoneCode {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_receive_stops_at_terminator() {
        let (mut bus, mut amp) = bus(200);
        amp.write_all(b"#>11VO08\r\r\nleftover").await.unwrap();

        let frame = bus.receive(b"\r\r\n").await.unwrap();
        assert_eq!(frame, b"#>11VO08\r\r\n");
    }

    #[tokio::test]
    async fn test_receive_waits_for_long_terminator() {
        let (mut bus, mut amp) = bus(200);
        amp.write_all(b">11a\r\r\n>12b\r\r\n\n").await.unwrap();

        let frame = bus.receive(b"\r\r\n\n").await.unwrap();
        assert_eq!(frame, b">11a\r\r\n>12b\r\r\n\n");
    }

    #[tokio::test]
    async fn test_receive_times_out_with_partial_frame() {
        let (mut bus, mut amp) = bus(50);
        amp.write_all(b"#>11VO0").await.unwrap();

        let started = std::time::Instant::now();
        let err = bus.receive(b"\r\r\n").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            TransportError::ReadTimeout { received, .. } => assert_eq!(received, b"#>11VO0"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_receive_on_closed_peer() {
        let (mut bus, amp) = bus(200);
        drop(amp);
        assert!(matches!(
            bus.receive(b"\r\r\n").await,
            Err(TransportError::ReadTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_param_writes_frame_without_reading() {
        let (mut bus, mut amp) = bus(50);
        bus.set_param(zone("12"), Param::VO, ParamValue::from_number(8))
            .await
            .unwrap();

        let mut buf = [0u8; 9];
        amp.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"<12VO08\r\n");
    }

    /// Answer each expected request with its reply, after an optional delay
    fn respond(
        mut amp: DuplexStream,
        script: Vec<(&'static [u8], Duration, &'static [u8])>,
    ) -> tokio::task::JoinHandle<DuplexStream> {
        tokio::spawn(async move {
            for (request, delay, reply) in script {
                let mut buf = vec![0u8; request.len()];
                amp.read_exact(&mut buf).await.unwrap();
                assert_eq!(buf, request);
                tokio::time::sleep(delay).await;
                amp.write_all(reply).await.unwrap();
            }
            amp
        })
    }

    #[tokio::test]
    async fn test_query_param_parses_value() {
        let (mut bus, amp) = bus(200);
        let peer = respond(
            amp,
            vec![(&b"?11VO\r\n"[..], Duration::ZERO, &b"?11VO\r#>11VO21\r\r\n"[..])],
        );

        let value = bus.query_param(zone("11"), Param::VO).await.unwrap();
        assert_eq!(value.number(), 21);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_zone_malformed_response() {
        let (mut bus, amp) = bus(200);
        let _peer = respond(amp, vec![(&b"?11\r\n"[..], Duration::ZERO, &b"#>11000100\r\r\n"[..])]);

        assert!(matches!(
            bus.query_zone(zone("11")).await,
            Err(TransportError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_late_reply_does_not_shift_next_exchange() {
        let (mut bus, amp) = bus(50);
        let peer = respond(
            amp,
            vec![
                (
                    &b"?11\r\n"[..],
                    Duration::from_millis(100),
                    &b"#>1100010000130707100100\r\r\n"[..],
                ),
                (&b"?12\r\n"[..], Duration::ZERO, &b"#>1200010000200707100100\r\r\n"[..]),
            ],
        );

        assert!(matches!(
            bus.query_zone(zone("11")).await,
            Err(TransportError::ReadTimeout { .. })
        ));
        // Let the late zone 11 reply land before asking for zone 12
        tokio::time::sleep(Duration::from_millis(150)).await;

        let params = bus.query_zone(zone("12")).await.unwrap();
        assert_eq!(params.get(Param::VO).number(), 20);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_pending_returns_without_data() {
        let (mut bus, mut amp) = bus(50);
        assert_eq!(bus.discard_pending().await.unwrap(), 0);

        amp.write_all(b"#>11VO08\r\r\n").await.unwrap();
        assert_eq!(bus.discard_pending().await.unwrap(), 11);
        assert_eq!(bus.discard_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_invalid_device() {
        let err = BusTransport::open("/dev/does-not-exist-mpr", Duration::from_millis(100))
            .err()
            .unwrap();
        match err {
            TransportError::DeviceOpen { path, .. } => assert_eq!(path, "/dev/does-not-exist-mpr"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
