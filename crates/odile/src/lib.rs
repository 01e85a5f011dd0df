//! odile: host-side controller for the ODILE CCD readout board.
//!
//! The board is driven over UDP. Three-character commands go to the command
//! port and are acknowledged with `DON`; register settings are streamed to
//! the configuration port; bulk flash data moves through the firmware port;
//! image and telemetry data arrive on ports the host listens on.
//!
//! This crate ties those together:
//!
//! - [`Controller`]: command protocol, register configuration, raw data
//! - [`flash`]: EPCQ flash programming (firmware images and stored
//!   configuration pages)
//! - [`capture`]: background tasks that stream incoming data to files
//! - [`command`]: command word encoding and query response decoding
//!
//! # Quick start
//!
//! ```no_run
//! use odile::ControllerBuilder;
//!
//! # async fn example() -> odile_core::Result<()> {
//! let mut ctl = ControllerBuilder::new()
//!     .device_address("192.168.0.3".parse().unwrap())
//!     .server_address("192.168.0.1".parse().unwrap())
//!     .build()
//!     .await?;
//!
//! ctl.config_mut().set_nskips(4)?;
//! ctl.send_config().await?;
//!
//! let id = ctl.launch_capture("frame.bin", 0x1999, 100, 600).await?;
//! ctl.execute("RDC", None, None).await?;
//! let words = ctl.close_capture(id).await?;
//! println!("received {words} words");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod capture;
pub mod command;
pub mod controller;
pub mod flash;

pub use builder::ControllerBuilder;
pub use capture::CaptureManager;
pub use command::CommandResponse;
pub use controller::{Controller, ControllerOptions, ReadoutInfo};
pub use flash::FirmwareMap;

pub use odile_config::ConfigBlockList;
pub use odile_core::{Error, Result};
