//! ControllerBuilder -- fluent builder for constructing [`Controller`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use odile::ControllerBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> odile_core::Result<()> {
//! let mut ctl = ControllerBuilder::new()
//!     .device_address("192.168.0.3".parse().unwrap())
//!     .server_address("192.168.0.1".parse().unwrap())
//!     .flash_timeout(Some(Duration::from_secs(10)))
//!     .build()
//!     .await?;
//! ctl.send_config().await?;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use odile_config::ConfigBlockList;
use odile_core::error::{Error, Result};
use odile_core::image::ImageSinkFactory;
use odile_core::transport::DatagramTransport;

use crate::controller::{Controller, ControllerOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_FLASH_TIMEOUT};

/// Fluent builder for [`Controller`].
pub struct ControllerBuilder {
    device_address: Option<IpAddr>,
    server_address: IpAddr,
    command_timeout: Option<Duration>,
    flash_timeout: Option<Duration>,
    write_all: bool,
    config: Option<ConfigBlockList>,
    image_factory: Option<Arc<dyn ImageSinkFactory>>,
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerBuilder {
    pub fn new() -> Self {
        ControllerBuilder {
            device_address: None,
            server_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            flash_timeout: Some(DEFAULT_FLASH_TIMEOUT),
            write_all: true,
            config: None,
            image_factory: None,
        }
    }

    /// Set the board's IP address. Required for [`build()`](Self::build).
    pub fn device_address(mut self, addr: IpAddr) -> Self {
        self.device_address = Some(addr);
        self
    }

    /// Set the host address replies and capture streams arrive on
    /// (default: all interfaces).
    pub fn server_address(mut self, addr: IpAddr) -> Self {
        self.server_address = addr;
        self
    }

    /// Set how long to wait for a command acknowledgement (default: 1s).
    /// `None` waits forever.
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how long to wait for each step of a flash operation
    /// (default: 5s). `None` waits forever.
    pub fn flash_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flash_timeout = timeout;
        self
    }

    /// Send every register (default), or only those that differ from their
    /// defaults.
    pub fn write_all(mut self, enabled: bool) -> Self {
        self.write_all = enabled;
        self
    }

    /// Start from an existing register model instead of the defaults.
    pub fn config(mut self, config: ConfigBlockList) -> Self {
        self.config = Some(config);
        self
    }

    /// Enable FITS image captures and image headers.
    pub fn image_sink_factory(mut self, factory: Arc<dyn ImageSinkFactory>) -> Self {
        self.image_factory = Some(factory);
        self
    }

    /// Build a [`Controller`] on a caller-provided transport.
    ///
    /// Tests pass a `MockDevice` from `odile-test-harness` here.
    pub async fn build_with_transport(self, transport: Box<dyn DatagramTransport>) -> Result<Controller> {
        let options = ControllerOptions {
            server_address: self.server_address,
            command_timeout: self.command_timeout,
            flash_timeout: self.flash_timeout,
            write_all: self.write_all,
        };
        Ok(Controller::new(
            transport,
            self.config.unwrap_or_default(),
            self.image_factory,
            options,
        ))
    }

    /// Build a [`Controller`] talking UDP to the board.
    ///
    /// Requires that [`device_address()`](Self::device_address) has been
    /// called.
    pub async fn build(self) -> Result<Controller> {
        let device = self
            .device_address
            .ok_or_else(|| Error::InvalidParameter("device_address is required for build()".into()))?;

        let transport = odile_transport::UdpTransport::open(device, self.server_address).await?;
        tracing::info!(%device, server = %self.server_address, "Connected to ODILE board");
        self.build_with_transport(Box::new(transport)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odile_config::defaults::ADC_BLOCK;
    use odile_test_harness::MockDevice;

    #[tokio::test]
    async fn builder_defaults() {
        let ctl = ControllerBuilder::new()
            .build_with_transport(Box::new(MockDevice::new()))
            .await
            .unwrap();
        let options = ctl.options();
        assert_eq!(options.command_timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.flash_timeout, Some(Duration::from_secs(5)));
        assert!(options.write_all);
        assert_eq!(options.server_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(ctl.config().blocks().len(), 7);
    }

    #[tokio::test]
    async fn builder_overrides() {
        let mut config = ConfigBlockList::default();
        config.set(ADC_BLOCK, "ADC_CDS_NSkips", 9).unwrap();

        let ctl = ControllerBuilder::new()
            .server_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .command_timeout(None)
            .flash_timeout(Some(Duration::from_millis(50)))
            .write_all(false)
            .config(config)
            .build_with_transport(Box::new(MockDevice::new()))
            .await
            .unwrap();

        let options = ctl.options();
        assert_eq!(options.command_timeout, None);
        assert_eq!(options.flash_timeout, Some(Duration::from_millis(50)));
        assert!(!options.write_all);
        assert_eq!(ctl.config().get(ADC_BLOCK, "ADC_CDS_NSkips").unwrap(), 9);
    }

    #[tokio::test]
    async fn build_requires_device_address() {
        let result = ControllerBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
