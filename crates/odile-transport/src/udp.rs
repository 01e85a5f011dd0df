//! A bound UDP socket with timeout-aware receives.
//!
//! [`UdpEndpoint`] is the socket primitive under both the device link
//! ([`UdpTransport`](crate::UdpTransport)) and the capture tasks, which
//! each own one endpoint bound to a data port.
//!
//! # Example
//!
//! ```no_run
//! use odile_transport::UdpEndpoint;
//! use std::time::Duration;
//!
//! # async fn example() -> odile_core::Result<()> {
//! // Listen for readout data on the default data port
//! let endpoint = UdpEndpoint::bind("192.168.1.1:4610").await?;
//!
//! let mut buf = [0u8; 2048];
//! let n = endpoint.recv(&mut buf, Some(Duration::from_secs(1))).await?;
//! println!("{} bytes from the board", n);
//! # Ok(())
//! # }
//! ```

use odile_core::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};

/// A UDP socket bound to one local address.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpEndpoint {
    /// Bind to a local address such as `"0.0.0.0:0"` or `"192.168.1.1:4610"`.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(&addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self { socket, local_addr })
    }

    /// The local address this socket is bound to.
    ///
    /// Useful after binding to port 0 to discover the assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one datagram to `addr`. Returns the number of bytes sent.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<usize> {
        tracing::trace!(
            local = %self.local_addr,
            remote = %addr,
            bytes = data.len(),
            "Sending datagram"
        );

        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to send datagram"
            );
            Error::Io(e)
        })
    }

    /// Receive one datagram. Returns `(bytes_read, source_addr)`.
    ///
    /// Waits at most `timeout`, or forever when `None`. Bytes beyond
    /// `buf.len()` are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no datagram arrives in time.
    pub async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(usize, SocketAddr)> {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.socket.recv_from(buf)).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::trace!(
                        local = %self.local_addr,
                        timeout_ms = limit.as_millis(),
                        "Timeout waiting for datagram"
                    );
                    return Err(Error::Timeout);
                }
            },
            None => self.socket.recv_from(buf).await,
        };

        match result {
            Ok((n, src)) => {
                tracing::trace!(
                    local = %self.local_addr,
                    remote = %src,
                    bytes = n,
                    "Received datagram"
                );
                Ok((n, src))
            }
            Err(e) => {
                tracing::error!(
                    local = %self.local_addr,
                    error = %e,
                    "Failed to receive datagram"
                );
                Err(Error::Io(e))
            }
        }
    }

    /// Receive one datagram, ignoring the source address.
    pub async fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let (n, _src) = self.recv_from(buf, timeout).await?;
        Ok(n)
    }
}
