//! Datagram transport trait for ODILE communication.
//!
//! The [`DatagramTransport`] trait abstracts over the UDP link to an ODILE
//! board. The device listens on a handful of fixed ports (command, firmware,
//! configuration) and answers on the same port numbers at the host, so both
//! directions are addressed by port only; the device and host addresses are
//! fixed when the transport is built.
//!
//! Protocol code (command encoding, flash programming) operates on a
//! `DatagramTransport` rather than on sockets directly, enabling both real
//! hardware control and deterministic tests with the simulated device from
//! the `odile-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous datagram transport to an ODILE board.
///
/// UDP is best effort: a datagram either arrives whole or not at all.
/// Implementations do not retry; protocol code handles loss through
/// timeouts.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to `port` on the device.
    ///
    /// Returns the number of bytes handed to the network.
    async fn send(&self, port: u16, data: &[u8]) -> Result<usize>;

    /// Receive one datagram arriving at `port` on the host.
    ///
    /// Waits up to `timeout` when given, or indefinitely when `None`.
    /// Returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives within the deadline. Bytes beyond `buf.len()` are discarded.
    async fn receive(&self, port: u16, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;
}
