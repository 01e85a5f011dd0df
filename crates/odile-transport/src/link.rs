//! UDP link to one ODILE board.
//!
//! [`UdpTransport`] implements [`DatagramTransport`]: datagrams are sent to
//! `device_ip:port` from an ephemeral socket, and received on a socket bound
//! to `server_ip:port`. Receive sockets are bound on first use and kept for
//! the life of the transport; the command and firmware ports are bound up
//! front so a reply can never arrive before its socket exists.

use async_trait::async_trait;
use odile_core::error::Result;
use odile_core::transport::DatagramTransport;
use odile_core::{COMMAND_PORT, FIRMWARE_PORT};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::udp::UdpEndpoint;

/// UDP transport to an ODILE board.
#[derive(Debug)]
pub struct UdpTransport {
    device_ip: IpAddr,
    server_ip: IpAddr,
    sender: UdpEndpoint,
    receivers: Mutex<HashMap<u16, Arc<UdpEndpoint>>>,
}

impl UdpTransport {
    /// Open a link to the board at `device_ip`, receiving on `server_ip`.
    ///
    /// Binds the command and firmware reply ports immediately.
    pub async fn open(device_ip: IpAddr, server_ip: IpAddr) -> Result<Self> {
        tracing::debug!(device = %device_ip, server = %server_ip, "Opening ODILE link");

        let sender = UdpEndpoint::bind(SocketAddr::new(server_ip, 0)).await?;
        let transport = Self {
            device_ip,
            server_ip,
            sender,
            receivers: Mutex::new(HashMap::new()),
        };
        transport.listen(COMMAND_PORT).await?;
        transport.listen(FIRMWARE_PORT).await?;
        Ok(transport)
    }

    pub fn device_ip(&self) -> IpAddr {
        self.device_ip
    }

    pub fn server_ip(&self) -> IpAddr {
        self.server_ip
    }

    /// Address datagrams to the board are sent from.
    pub fn sender_addr(&self) -> SocketAddr {
        self.sender.local_addr()
    }

    /// Bind the host-side receive socket for `port` if not already bound.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        Ok(self.receiver(port).await?.local_addr())
    }

    async fn receiver(&self, port: u16) -> Result<Arc<UdpEndpoint>> {
        let mut receivers = self.receivers.lock().await;
        if let Some(endpoint) = receivers.get(&port) {
            return Ok(Arc::clone(endpoint));
        }
        let endpoint = Arc::new(UdpEndpoint::bind(SocketAddr::new(self.server_ip, port)).await?);
        receivers.insert(port, Arc::clone(&endpoint));
        Ok(endpoint)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, port: u16, data: &[u8]) -> Result<usize> {
        self.sender
            .send_to(data, SocketAddr::new(self.device_ip, port))
            .await
    }

    async fn receive(&self, port: u16, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let endpoint = self.receiver(port).await?;
        endpoint.recv(buf, timeout).await
    }
}
