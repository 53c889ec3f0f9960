//! In-process fake Prologix adapter for testing without hardware
//!
//! [`MockAdapter`] listens on an ephemeral localhost port and speaks just
//! enough of the adapter protocol to drive a [`GpibController`](crate::GpibController):
//!
//! - `++ver` is answered with the configured version string, unless the
//!   adapter was built with [`MockAdapterBuilder::silent_version`]
//! - other `++` commands are accepted silently
//! - anything else is treated as an instrument command; the next
//!   `++read eoi` is answered with the reply registered for it, or not at
//!   all if none was registered
//!
//! Every command is recorded with its terminator, and the raw byte stream is
//! kept too, so tests can assert exactly what went over the wire.

use crate::protocol;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_VERSION: &str = "Prologix GPIB-ETHERNET Controller version 1.0";

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Behavior {
    version: String,
    responses: HashMap<String, Vec<u8>>,
    boot_banner: Option<Vec<u8>>,
    hang_up_on: Option<String>,
    answer_version: bool,
}

/// Builder for [`MockAdapter`].
#[derive(Debug, Clone)]
pub struct MockAdapterBuilder {
    behavior: Behavior,
}

impl MockAdapterBuilder {
    /// Version string returned for `++ver` (sent followed by CRLF).
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.behavior.version = version.into();
        self
    }

    /// Reply sent for `++read eoi` after the instrument command `command`
    /// (given without terminator, e.g. `"*IDN?"`).
    #[must_use]
    pub fn respond(mut self, command: impl Into<String>, reply: impl Into<Vec<u8>>) -> Self {
        self.behavior
            .responses
            .insert(command.into(), reply.into());
        self
    }

    /// Bytes pushed to the client as soon as it connects.
    #[must_use]
    pub fn boot_banner(mut self, banner: impl Into<Vec<u8>>) -> Self {
        self.behavior.boot_banner = Some(banner.into());
        self
    }

    /// Close the connection upon receiving `command` (with terminator).
    #[must_use]
    pub fn hang_up_on(mut self, command: impl Into<String>) -> Self {
        self.behavior.hang_up_on = Some(command.into());
        self
    }

    /// Record `++ver` but never answer it, like an adapter that stalls
    /// during setup.
    #[must_use]
    pub fn silent_version(mut self) -> Self {
        self.behavior.answer_version = false;
        self
    }

    /// Bind to `127.0.0.1:0` and start serving.
    pub async fn spawn(self) -> std::io::Result<MockAdapter> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let task = tokio::spawn(serve(listener, self.behavior, recorded.clone()));
        debug!(%addr, "Mock adapter listening");

        Ok(MockAdapter {
            port: addr.port(),
            recorded,
            task,
        })
    }
}

/// Fake adapter. Stops serving when dropped.
#[derive(Debug)]
pub struct MockAdapter {
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
    task: JoinHandle<()>,
}

impl MockAdapter {
    /// Start configuring a fake adapter.
    #[must_use]
    pub fn builder() -> MockAdapterBuilder {
        MockAdapterBuilder {
            behavior: Behavior {
                version: DEFAULT_VERSION.to_string(),
                responses: HashMap::new(),
                boot_banner: None,
                hang_up_on: None,
                answer_version: true,
            },
        }
    }

    /// Port the adapter is listening on, on `127.0.0.1`.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Commands received so far, each with its terminator.
    pub async fn commands(&self) -> Vec<String> {
        self.recorded.lock().await.commands.clone()
    }

    /// Every byte received so far.
    pub async fn raw_bytes(&self) -> Vec<u8> {
        self.recorded.lock().await.raw.clone()
    }

    /// Wait until at least `count` commands were received, or `limit` passes.
    ///
    /// Returns whatever was recorded at that point.
    pub async fn wait_for_commands(&self, count: usize, limit: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let commands = self.commands().await;
            if commands.len() >= count || tokio::time::Instant::now() >= deadline {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for MockAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, behavior: Behavior, recorded: Arc<Mutex<Recorded>>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Mock adapter accept failed: {}", e);
                return;
            }
        };

        debug!(%peer, "Mock adapter accepted connection");
        if let Err(e) = handle_connection(socket, &behavior, &recorded).await {
            debug!("Mock adapter connection ended: {}", e);
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    behavior: &Behavior,
    recorded: &Mutex<Recorded>,
) -> std::io::Result<()> {
    if let Some(banner) = &behavior.boot_banner {
        socket.write_all(banner).await?;
    }

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    let mut last_instrument_command: Option<String> = None;

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        recorded.lock().await.raw.extend_from_slice(&buf[..n]);
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            if line.len() == 1 {
                // Bare terminator, e.g. the LF of a CRLF pair
                continue;
            }
            let command = String::from_utf8_lossy(&line).into_owned();
            debug!("Mock adapter received {:?}", command);
            recorded.lock().await.commands.push(command.clone());

            if behavior.hang_up_on.as_deref() == Some(command.as_str()) {
                debug!("Mock adapter hanging up");
                return Ok(());
            }

            match command.as_str() {
                protocol::VERSION if !behavior.answer_version => {}
                protocol::VERSION => {
                    socket
                        .write_all(format!("{}\r\n", behavior.version).as_bytes())
                        .await?;
                }
                protocol::READ_EOI => {
                    let reply = last_instrument_command
                        .as_ref()
                        .and_then(|cmd| behavior.responses.get(cmd));
                    if let Some(reply) = reply {
                        socket.write_all(reply).await?;
                    }
                }
                other if other.starts_with("++") => {}
                other => {
                    last_instrument_command =
                        Some(other.trim_end_matches(['\r', '\n']).to_string());
                }
            }
        }
    }
}
