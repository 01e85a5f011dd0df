//! odile-core: core traits, wire codec, and error definitions for the ODILE
//! host controller.
//!
//! This crate holds the pieces every other crate in the workspace agrees on:
//! the fixed port map of the board, the byte-order boundary, the transport
//! abstraction, and the optional image capability used by data capture.
//!
//! # Key types
//!
//! - [`DatagramTransport`] -- port-addressed datagram channel to the board
//! - [`ImageSinkFactory`] / [`ImageSink`] -- optional image output for captures
//! - [`wire`] -- host-order words to network-order bytes and back
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod image;
pub mod transport;
pub mod wire;

pub use error::{Error, Result};
pub use image::{HeaderCard, HeaderValue, ImageSink, ImageSinkFactory};
pub use transport::DatagramTransport;

/// UDP port that accepts 3-character commands and emits `DON` markers.
pub const COMMAND_PORT: u16 = 0x3000;

/// UDP port used for bulk flash page data in both directions.
pub const FIRMWARE_PORT: u16 = 0x4000;

/// UDP port that accepts configuration register words.
pub const CONFIG_PORT: u16 = 0x4268;

/// Largest datagram the host expects from the board.
pub const MAX_DATAGRAM: usize = 2048;
