//! # prologix_gpib
//!
//! Client driver for the Prologix GPIB-ETHERNET controller.
//!
//! The adapter bridges a TCP socket to a GPIB bus. [`GpibController`] opens
//! the socket, puts the adapter in controller mode, and then addresses and
//! queries instruments on the bus:
//!
//! ```no_run
//! use prologix_gpib::GpibController;
//! use std::time::Duration;
//!
//! # async fn demo() -> prologix_gpib::Result<()> {
//! let mut controller = GpibController::connect("192.168.1.50", Duration::from_secs(2)).await?;
//! let reading = controller.ask_device(22, "MEAS:VOLT:DC?").await?;
//! controller.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`controller`]: the session type and its operations
//! - [`protocol`]: the adapter command set
//! - [`config`]: connection settings, loadable with Figment
//! - [`error`]: [`GpibError`] and its categories
//! - [`logging`]: `tracing-subscriber` setup for applications
//! - [`mock`]: a fake adapter for tests

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod mock;
pub mod protocol;

pub use config::ControllerConfig;
pub use controller::GpibController;
pub use error::{GpibError, GpibErrorKind, Result};
