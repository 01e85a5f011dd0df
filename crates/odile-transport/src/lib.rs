//! UDP transport for the ODILE host controller.
//!
//! - [`UdpTransport`]: the [`DatagramTransport`](odile_core::DatagramTransport)
//!   used to talk to a real board
//! - [`UdpEndpoint`]: a single bound socket, used directly by capture tasks
//!
//! # Example
//!
//! ```no_run
//! use odile_core::{DatagramTransport, COMMAND_PORT};
//! use odile_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> odile_core::Result<()> {
//! let link = UdpTransport::open("192.168.1.5".parse().unwrap(), "192.168.1.1".parse().unwrap()).await?;
//!
//! // Ask the board for its firmware compile time
//! link.send(COMMAND_PORT, &[0x00, b'G', b'C', b'T']).await?;
//!
//! let mut buf = [0u8; 2048];
//! let n = link.receive(COMMAND_PORT, &mut buf, Some(Duration::from_secs(1))).await?;
//! # Ok(())
//! # }
//! ```

pub mod link;
pub mod udp;

pub use link::UdpTransport;
pub use udp::UdpEndpoint;
