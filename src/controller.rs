//! Prologix GPIB-ETHERNET controller session
//!
//! Protocol Overview:
//! - Transport: TCP to port 1234 on the adapter
//! - Setup: after connecting, stale bytes are drained and the adapter is put
//!   in controller mode with manual reads, EOI on writes, no EOT character
//!   and a read timeout matching ours
//! - Queries: write the command, wait the settle delay, send `++read eoi`,
//!   read one reply
//!
//! # Important Notes
//!
//! - The adapter gives no "ready" signal; the settle delay is the only
//!   synchronization between a command and its read request
//! - A reply is read with a single receive. Replies split across TCP
//!   segments are returned truncated; this matches the adapter behavior the
//!   driver was written against and is intentionally not reassembled
//! - The GPIB address is not cached; [`GpibController::ask_device`] always
//!   re-sends it
//!
//! # Example Usage
//!
//! ```no_run
//! use prologix_gpib::GpibController;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> prologix_gpib::Result<()> {
//!     let mut controller = GpibController::connect("192.168.1.50", Duration::from_secs(2)).await?;
//!     println!("Adapter: {}", controller.version());
//!
//!     let idn = controller.ask_device(12, "*IDN?").await?;
//!     println!("Instrument: {}", idn);
//!
//!     controller.close().await;
//!     Ok(())
//! }
//! ```

use crate::config::ControllerConfig;
use crate::error::{GpibError, Result};
use crate::protocol;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// A session with one Prologix GPIB-ETHERNET adapter.
///
/// Owns the TCP connection exclusively. All operations take `&mut self`, so
/// a session serves one caller at a time; share it behind an external mutex
/// if several tasks need the bus. Dropping the session closes the socket.
#[derive(Debug)]
pub struct GpibController {
    host: String,
    stream: Option<TcpStream>,
    timeout: Duration,
    settle_delay: Duration,
    recv_buffer_size: usize,
    version: String,
}

impl GpibController {
    /// Port the adapter listens on, fixed by Prologix.
    pub const PORT: u16 = protocol::PORT;

    /// Timeout used when none is given.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Connect to the adapter at `host` and run the setup sequence.
    ///
    /// # Errors
    /// [`GpibError::Connection`] if the host refuses or is unreachable,
    /// [`GpibError::Timeout`] if the connect or any setup step exceeds
    /// `timeout`.
    pub async fn connect(host: &str, timeout: Duration) -> Result<Self> {
        Self::connect_with_config(ControllerConfig::new(host).with_timeout(timeout)).await
    }

    /// Connect using explicit settings.
    ///
    /// The configuration is validated before any network activity. If any
    /// step after the TCP connect fails, the half-built session is dropped
    /// and the socket closed before the error is returned.
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect_with_config(config: ControllerConfig) -> Result<Self> {
        config.validate()?;

        info!("Connecting to {}:{}", config.host, config.port);
        let operation = format!("connecting to {}:{}", config.host, config.port);
        let stream = bounded(
            config.timeout,
            &operation,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await?;

        // Commands are tiny; don't let Nagle hold them back
        stream
            .set_nodelay(true)
            .map_err(|e| GpibError::from_io("configuring socket", config.timeout, e))?;

        info!("Connected to controller at {}", config.host);

        let mut controller = Self {
            host: config.host,
            stream: Some(stream),
            timeout: config.timeout,
            settle_delay: config.settle_delay,
            recv_buffer_size: config.recv_buffer_size,
            version: String::new(),
        };

        controller.flush().await?;
        controller.setup().await?;

        controller.write(protocol::VERSION).await?;
        controller.version = controller.read().await?;
        info!(version = %controller.version, "Controller info");

        Ok(controller)
    }

    /// Send the adapter configuration commands, once, in order.
    async fn setup(&mut self) -> Result<()> {
        let read_timeout_ms = self.timeout.as_millis();
        if !protocol::READ_TIMEOUT_RANGE_MS.contains(&read_timeout_ms) {
            warn!(
                "Adapter read timeout {} ms is outside the supported {:?} ms range",
                read_timeout_ms,
                protocol::READ_TIMEOUT_RANGE_MS
            );
        }

        for command in protocol::setup_sequence(read_timeout_ms) {
            self.write(&command).await?;
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| GpibError::connection("session is closed"))
    }

    /// Write `text` to the adapter verbatim. No terminator is added.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let limit = self.timeout;
        let stream = self.stream_mut()?;

        debug!("Prologix write: {:?}", text);
        bounded(limit, "writing to adapter", stream.write_all(text.as_bytes())).await
    }

    /// Receive one chunk of at most `max_bytes` bytes.
    ///
    /// Returns as soon as any data arrives. A `max_bytes` of zero is treated
    /// as one.
    ///
    /// # Errors
    /// [`GpibError::Timeout`] if nothing arrives within the timeout,
    /// [`GpibError::Connection`] if the adapter closed the connection.
    pub async fn recv(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let limit = self.timeout;
        let stream = self.stream_mut()?;

        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = bounded(limit, "waiting for adapter data", stream.read(&mut buf)).await?;
        if n == 0 {
            return Err(GpibError::connection("connection closed by adapter"));
        }
        buf.truncate(n);
        debug!(bytes = n, "Prologix recv: {:?}", String::from_utf8_lossy(&buf));
        Ok(buf)
    }

    /// Alias for [`send`](Self::send).
    pub async fn write(&mut self, text: &str) -> Result<()> {
        self.send(text).await
    }

    /// Receive one reply and return it as text without trailing whitespace.
    ///
    /// # Errors
    /// Everything [`recv`](Self::recv) can return, plus
    /// [`GpibError::Decode`] if the reply is not 7-bit ASCII.
    pub async fn read(&mut self) -> Result<String> {
        let bytes = self.recv(self.recv_buffer_size).await?;
        decode_response(&bytes)
    }

    /// Discard everything buffered on the connection.
    ///
    /// Reads until a receive times out, so this always takes at least one
    /// full timeout. Returns the number of bytes discarded.
    pub async fn flush(&mut self) -> Result<usize> {
        let mut discarded = 0;
        loop {
            match self.recv(self.recv_buffer_size).await {
                Ok(chunk) => discarded += chunk.len(),
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            }
        }

        if discarded > 0 {
            debug!("Flushed {} stale bytes from adapter", discarded);
        }
        Ok(discarded)
    }

    /// Select the instrument at GPIB primary address `address`.
    ///
    /// The address is not range checked and no reply is read.
    pub async fn set_device_address(&mut self, address: i32) -> Result<()> {
        self.write(&protocol::set_address(address)).await
    }

    /// Send `command` to the addressed instrument and return its reply.
    ///
    /// Every command is assumed to produce a reply; one that doesn't ends in
    /// [`GpibError::Timeout`].
    pub async fn ask(&mut self, command: &str) -> Result<String> {
        self.send(&format!("{}{}", command, protocol::INSTRUMENT_TERMINATOR))
            .await?;
        self.settle().await;
        self.write(protocol::READ_EOI).await?;
        self.read().await
    }

    /// Address the instrument at `address`, then [`ask`](Self::ask) it.
    #[instrument(level = "debug", skip(self))]
    pub async fn ask_device(&mut self, address: i32, command: &str) -> Result<String> {
        self.set_device_address(address).await?;
        self.settle().await;
        self.ask(command).await
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    /// Close the connection. Calling this again is a no-op.
    ///
    /// Any later operation fails with [`GpibError::Connection`].
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                // Peer may already be gone; the socket is released on drop either way
                debug!("Ignoring shutdown error: {}", e);
            }
            info!("Connection to {} closed", self.host);
        }
    }

    /// Adapter version string reported by `++ver` at connect time.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Host this session connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Connect/read/write timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay between a command and its read request.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Run `io` under `limit`.
///
/// An elapsed timer becomes [`GpibError::Timeout`]; I/O failures are
/// classified by [`GpibError::from_io`].
async fn bounded<T>(
    limit: Duration,
    operation: &str,
    io: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match timeout(limit, io).await {
        Err(_) => Err(GpibError::timeout(operation, limit)),
        Ok(Err(e)) => Err(GpibError::from_io(operation, limit, e)),
        Ok(Ok(value)) => Ok(value),
    }
}

/// Strict 7-bit ASCII decode with trailing whitespace removed.
fn decode_response(bytes: &[u8]) -> Result<String> {
    if !bytes.is_ascii() {
        return Err(GpibError::decode(bytes));
    }
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();
    Ok(text.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use crate::GpibErrorKind;
    use tracing_test::traced_test;

    const VERSION: &str = "Prologix GPIB-ETHERNET Controller version 01.06.06.00";

    fn test_config(mock: &MockAdapter) -> ControllerConfig {
        ControllerConfig::new("127.0.0.1")
            .with_port(mock.port())
            .with_timeout(Duration::from_millis(150))
            .with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn decode_strips_trailing_whitespace_only() {
        assert_eq!(decode_response(b"  +1.234E-3\r\n").unwrap(), "  +1.234E-3");
        assert_eq!(decode_response(b"\r\n").unwrap(), "");
    }

    #[test]
    fn decode_rejects_eight_bit_bytes() {
        let err = decode_response(&[0x31, 0xb5, 0x0a]).unwrap_err();
        assert_eq!(err.kind(), GpibErrorKind::Decode);
    }

    #[tokio::test]
    async fn bounded_reports_elapsed_timer_as_timeout() {
        let limit = Duration::from_millis(20);
        let err = bounded(limit, "waiting forever", std::future::pending::<std::io::Result<()>>())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), GpibErrorKind::Timeout);
        assert!(err.to_string().contains("waiting forever"));
    }

    #[tokio::test]
    async fn bounded_classifies_io_errors() {
        let limit = Duration::from_millis(20);
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = bounded(limit, "connecting", async { Err::<(), _>(refused) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), GpibErrorKind::Connection);

        let value = bounded(limit, "reading", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_connect_is_not_logged_as_error() {
        // Nothing listens on a port we just released
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ControllerConfig::new("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_millis(150));

        let err = GpibController::connect_with_config(config).await.unwrap_err();
        assert_eq!(err.kind(), GpibErrorKind::Connection);

        // Reporting the failure is left to the caller
        assert!(!logs_contain("ERROR"));
    }

    #[tokio::test]
    #[traced_test]
    async fn connect_logs_adapter_version() {
        let mock = MockAdapter::builder().version(VERSION).spawn().await.unwrap();
        let controller = GpibController::connect_with_config(test_config(&mock))
            .await
            .unwrap();

        assert_eq!(controller.version(), VERSION);
        assert!(logs_contain("Controller info"));
        assert!(logs_contain(VERSION));
    }

    #[tokio::test]
    async fn boot_chatter_is_flushed_before_setup() {
        let mock = MockAdapter::builder()
            .version(VERSION)
            .boot_banner("Prologix GPIB-ETHERNET boot\r\nDHCP lease acquired\r\n")
            .spawn()
            .await
            .unwrap();
        let mut controller = GpibController::connect_with_config(test_config(&mock))
            .await
            .unwrap();

        assert_eq!(controller.version(), VERSION);
        let commands = mock.commands().await;
        assert_eq!(commands.first().map(String::as_str), Some("++mode 1\n"));

        // Nothing left over once setup is done
        assert_eq!(controller.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mock = MockAdapter::builder().spawn().await.unwrap();
        let mut controller = GpibController::connect_with_config(test_config(&mock))
            .await
            .unwrap();

        assert!(!controller.is_closed());
        controller.close().await;
        controller.close().await;
        assert!(controller.is_closed());

        let err = controller.ask("*IDN?").await.unwrap_err();
        assert_eq!(err.kind(), GpibErrorKind::Connection);
    }

    #[tokio::test]
    async fn accessors_reflect_config() {
        let mock = MockAdapter::builder().spawn().await.unwrap();
        let controller = GpibController::connect_with_config(
            test_config(&mock).with_settle_delay(Duration::from_millis(5)),
        )
        .await
        .unwrap();

        assert_eq!(controller.host(), "127.0.0.1");
        assert_eq!(controller.timeout(), Duration::from_millis(150));
        assert_eq!(controller.settle_delay(), Duration::from_millis(5));
    }
}
