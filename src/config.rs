//! Controller configuration using Figment
//!
//! Settings can be built in code or loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `PROLOGIX_`
//!
//! Durations are written as humantime strings:
//!
//! ```toml
//! host = "192.168.1.50"
//! timeout = "2s"
//! settle_delay = "100ms"
//! ```
//!
//! The adapter port is fixed at [`protocol::PORT`](crate::protocol::PORT) and
//! is not read from files or the environment.

use crate::error::{GpibError, Result};
use crate::protocol;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Connection settings for a [`GpibController`](crate::GpibController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Adapter hostname or IP address.
    pub host: String,
    /// TCP port. Always [`protocol::PORT`] outside of test harnesses.
    #[serde(skip, default = "default_port")]
    pub port: u16,
    /// Timeout for connect, every write and every receive. Also sent to
    /// the adapter as its own read timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Pause between addressing or writing a command and requesting the
    /// instrument's reply.
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Upper bound on bytes returned by a single receive.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

fn default_port() -> u16 {
    protocol::PORT
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_recv_buffer_size() -> usize {
    16384
}

impl ControllerConfig {
    /// Settings for `host` with every other field at its default.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            timeout: default_timeout(),
            settle_delay: default_settle_delay(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }

    /// Set the connect/read/write timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the settle delay used by `ask` and `ask_device`
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Set the per-receive byte bound
    #[must_use]
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Override the TCP port.
    ///
    /// Real adapters always listen on [`protocol::PORT`]; this exists so a
    /// fake adapter bound to an ephemeral port can be targeted.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Load configuration from a TOML file, with `PROLOGIX_` environment
    /// overrides (e.g. `PROLOGIX_TIMEOUT=2s`).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PROLOGIX_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GpibError::Config("host must not be empty".into()));
        }

        if self.timeout.is_zero() {
            return Err(GpibError::Config("timeout must be greater than zero".into()));
        }

        if self.recv_buffer_size == 0 {
            return Err(GpibError::Config(
                "recv_buffer_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_adapter_conventions() {
        let config = ControllerConfig::new("10.0.0.5");
        assert_eq!(config.port, 1234);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.recv_buffer_size, 16384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(ControllerConfig::new("  ").validate().is_err());
        assert!(ControllerConfig::new("host")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ControllerConfig::new("host")
            .with_recv_buffer_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn load_from_toml_with_humantime_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
host = "192.168.1.50"
timeout = "2s"
settle_delay = "250ms"
"#
        )
        .unwrap();

        let config = ControllerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.host, "192.168.1.50");
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.recv_buffer_size, 16384);
        assert_eq!(config.port, protocol::PORT);
    }

    #[test]
    fn port_is_not_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"adapter.lab\"\nport = 9999").unwrap();

        let config = ControllerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.port, protocol::PORT);
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout = \"2s\"").unwrap();

        let err = ControllerConfig::load_from(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::GpibErrorKind::Config);
    }
}
