//! The ODILE host controller.
//!
//! [`Controller`] owns the link to one board, the register model, and the
//! table of running capture tasks. Everything that talks to the command port
//! takes `&mut self`: the board's `DON` marker carries no correlation id, so
//! only one waiter may ever be listening for it.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

use odile_config::ConfigBlockList;
use odile_config::defaults::ADC_BLOCK;
use odile_config::ini::parse_c_integer;
use odile_core::error::{Error, Result};
use odile_core::image::{HeaderCard, HeaderValue, ImageSinkFactory};
use odile_core::transport::DatagramTransport;
use odile_core::wire::{decode_words, encode_words};
use odile_core::{COMMAND_PORT, CONFIG_PORT, MAX_DATAGRAM};

use crate::capture::CaptureManager;
use crate::command::{
    CMD_COMPILE_TIME, CommandResponse, contains_done, encode_command_frame, format_timestamp,
};

/// Default time to wait for a `DON` after an ordinary command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time to wait for each `DON` or readback during flash programming.
pub const DEFAULT_FLASH_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables fixed when the controller is built.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Host address capture sockets bind to.
    pub server_address: IpAddr,
    /// Timeout for command acknowledgements and query responses.
    /// `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Timeout for each acknowledgement and readback during flash
    /// programming. `None` waits forever.
    pub flash_timeout: Option<Duration>,
    /// Send every register, not only those that differ from their default.
    pub write_all: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            server_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            flash_timeout: Some(DEFAULT_FLASH_TIMEOUT),
            write_all: true,
        }
    }
}

/// Host-side controller for one ODILE board.
///
/// Build one with [`ControllerBuilder`](crate::ControllerBuilder).
pub struct Controller {
    pub(crate) transport: Box<dyn DatagramTransport>,
    pub(crate) config: ConfigBlockList,
    pub(crate) captures: CaptureManager,
    pub(crate) image_factory: Option<Arc<dyn ImageSinkFactory>>,
    pub(crate) options: ControllerOptions,
}

impl Controller {
    pub(crate) fn new(
        transport: Box<dyn DatagramTransport>,
        config: ConfigBlockList,
        image_factory: Option<Arc<dyn ImageSinkFactory>>,
        options: ControllerOptions,
    ) -> Self {
        Controller {
            transport,
            config,
            captures: CaptureManager::new(image_factory.clone()),
            image_factory,
            options,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// The register model.
    pub fn config(&self) -> &ConfigBlockList {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigBlockList {
        &mut self.config
    }

    /// The capture task table.
    pub fn captures(&self) -> &CaptureManager {
        &self.captures
    }

    // -----------------------------------------------------------------
    // Command protocol
    // -----------------------------------------------------------------

    /// Send one command to the command port. Returns the bytes sent.
    ///
    /// Does not wait for an acknowledgement; see [`execute`](Self::execute).
    pub async fn send_command(
        &mut self,
        cmd: &str,
        prefix: Option<u8>,
        second_word: Option<u32>,
    ) -> Result<usize> {
        let frame = encode_command_frame(cmd, prefix, second_word)?;
        tracing::debug!(cmd, prefix = ?prefix, second_word = ?second_word, "Sending command");
        self.transport.send(COMMAND_PORT, &frame).await
    }

    /// Block until a `DON` word arrives on the command port.
    ///
    /// Receives in slices of `timeout / 10` and gives up with
    /// [`Error::Timeout`] once `timeout` has elapsed. `None` or a zero
    /// timeout waits indefinitely. Any `DON` satisfies any wait; `tag` only
    /// labels log output.
    pub async fn wait_for_done(&mut self, tag: &str, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let slice = timeout.map(|t| (t / 10).max(Duration::from_millis(1)));
        let start = Instant::now();
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            match self.transport.receive(COMMAND_PORT, &mut buf, slice).await {
                Ok(n) => {
                    let words = decode_words(&buf[..n]);
                    if contains_done(&words) {
                        tracing::trace!(tag, elapsed_ms = start.elapsed().as_millis(), "DON received");
                        return Ok(());
                    }
                    tracing::trace!(tag, words = words.len(), "Ignoring non-DON datagram");
                }
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }

            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    tracing::warn!(tag, timeout_ms = limit.as_millis(), "Timed out waiting for DON");
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Send a command and wait for its `DON` with the command timeout.
    pub async fn execute(
        &mut self,
        cmd: &str,
        prefix: Option<u8>,
        second_word: Option<u32>,
    ) -> Result<()> {
        self.send_command(cmd, prefix, second_word).await?;
        let timeout = self.options.command_timeout;
        self.wait_for_done(cmd, timeout).await
    }

    /// Send a command and decode the datagram the board answers with.
    pub async fn query(
        &mut self,
        cmd: &str,
        prefix: Option<u8>,
        second_word: Option<u32>,
    ) -> Result<CommandResponse> {
        self.send_command(cmd, prefix, second_word).await?;
        let timeout = self.options.command_timeout;
        let words = self.receive_data(COMMAND_PORT, timeout).await?;
        CommandResponse::parse(cmd, &words)
    }

    /// Firmware compile time as UNIX seconds (`GCT`).
    pub async fn compile_time(&mut self) -> Result<u32> {
        match self.query(CMD_COMPILE_TIME, None, None).await? {
            CommandResponse::CompileTime(t) => Ok(t),
            other => Err(Error::Protocol(format!("unexpected GCT response: {other:?}"))),
        }
    }

    /// Firmware compile time in local `asctime` form.
    pub async fn compile_time_string(&mut self) -> Result<String> {
        Ok(format_timestamp(self.compile_time().await?))
    }

    // -----------------------------------------------------------------
    // Raw data
    // -----------------------------------------------------------------

    /// Send host-order words to any device port. Returns the bytes sent.
    pub async fn send_data(&mut self, words: &[u32], port: u16) -> Result<usize> {
        tracing::debug!(port, words = words.len(), "Sending data");
        self.transport.send(port, &encode_words(words)).await
    }

    /// Send whitespace-separated integer words (hex with `0x`, octal with a
    /// leading `0`, otherwise decimal) read from a text file.
    pub async fn send_data_file(&mut self, path: impl AsRef<Path>, port: u16) -> Result<usize> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        let words = parse_data_words(&text)?;
        self.send_data(&words, port).await
    }

    /// Receive one datagram on `port`, decoded to host-order words.
    pub async fn receive_data(&mut self, port: u16, timeout: Option<Duration>) -> Result<Vec<u32>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let n = self.transport.receive(port, &mut buf, timeout).await?;
        Ok(decode_words(&buf[..n]))
    }

    // -----------------------------------------------------------------
    // Configuration registers
    // -----------------------------------------------------------------

    /// Load register values from an INI file into the model.
    ///
    /// Returns the line of the first malformed line, 0 if none; values from
    /// the well-formed lines are applied either way.
    pub fn load_config(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.config.load_ini_file(path)
    }

    /// Send the register model to the configuration port. Returns the bytes
    /// sent.
    pub async fn send_config(&mut self) -> Result<usize> {
        let message = self.config.master_message(self.options.write_all);
        tracing::debug!(words = message.len(), write_all = self.options.write_all, "Sending configuration");
        self.transport.send(CONFIG_PORT, &encode_words(&message)).await
    }

    /// Load an INI file and send the resulting configuration.
    pub async fn send_config_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.load_config(path)?;
        self.send_config().await
    }

    // -----------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------

    /// Start capturing datagrams arriving at `port` on the server address
    /// into `output`. Returns the task id.
    ///
    /// `rows`/`cols` of 0 mean the frame shape is unknown.
    pub async fn launch_capture(
        &mut self,
        output: impl AsRef<Path>,
        port: u16,
        rows: u32,
        cols: u32,
    ) -> Result<usize> {
        let address = self.options.server_address;
        self.captures.launch(output, address, port, rows, cols).await
    }

    /// Stop a capture task and return the words it received.
    pub async fn close_capture(&mut self, id: usize) -> Result<u64> {
        self.captures.close(id).await
    }

    /// Stop every running capture task. Returns the number stopped.
    pub async fn close_all_captures(&mut self) -> usize {
        self.captures.close_all().await
    }

    pub fn is_capture_valid(&self, id: usize) -> bool {
        self.captures.is_valid(id)
    }

    pub fn words_read(&self, id: usize) -> Option<u64> {
        self.captures.words_read(id)
    }

    /// Expected data words for an `nrows` x `ncols` readout under the
    /// current ADC settings.
    pub fn words_to_read(&self, nrows: u64, ncols: u64, nskips: u64) -> Result<u64> {
        self.config.words_to_read(nrows, ncols, nskips)
    }

    /// Annotate a finished image with the ADC registers and readout
    /// parameters.
    pub async fn write_image_header(&self, path: impl AsRef<Path>, info: &ReadoutInfo) -> Result<()> {
        let factory = self.image_factory.as_ref().ok_or_else(|| {
            Error::InvalidParameter("no image capability configured".into())
        })?;
        let cards = self.image_header_cards(info)?;
        factory.write_header(path.as_ref(), &cards).await
    }

    fn image_header_cards(&self, info: &ReadoutInfo) -> Result<Vec<HeaderCard>> {
        let mut cards = vec![HeaderCard::comment("This image was taken using odile")];
        for entry in self.config.block(ADC_BLOCK)?.entries() {
            if entry.is_unused() {
                continue;
            }
            cards.push(HeaderCard::new(
                &entry.name,
                HeaderValue::Int(i64::from(entry.value)),
                &entry.description,
            ));
        }
        cards.extend([
            HeaderCard::new("NDCMs", HeaderValue::Int(i64::from(info.ndcms)), "Number of charge measurements"),
            HeaderCard::new("NPBIN", HeaderValue::Int(1), "Vertical binning"),
            HeaderCard::new("NSBIN", HeaderValue::Int(1), "Horizontal binning"),
            HeaderCard::new("AMPL", HeaderValue::Text(info.amplifier.clone()), "Amplifier"),
            HeaderCard::new("MREAD", HeaderValue::Float(info.read_time), "Readout time"),
            HeaderCard::new("MEXP", HeaderValue::Float(info.exposure_time), "Exposure time"),
            HeaderCard::new(
                "RdEnd",
                HeaderValue::Text(Local::now().format("%a %b %e %H:%M:%S %Y").to_string()),
                "Readout end time",
            ),
            HeaderCard::new(
                "FWCTIME",
                HeaderValue::Text(info.compile_time.clone()),
                "Firmware compile time",
            ),
        ]);
        Ok(cards)
    }

    /// Stop every capture task.
    pub async fn shutdown(mut self) -> Result<()> {
        let closed = self.close_all_captures().await;
        tracing::debug!(closed, "Controller shut down");
        Ok(())
    }
}

/// Readout parameters recorded in an image header.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutInfo {
    /// Number of charge measurements (skips) per pixel.
    pub ndcms: u16,
    pub amplifier: String,
    /// Exposure time in seconds.
    pub exposure_time: f64,
    /// Readout time in seconds.
    pub read_time: f64,
    /// Firmware compile time, as returned by
    /// [`compile_time_string`](Controller::compile_time_string).
    pub compile_time: String,
}

/// Parse whitespace-separated integers into words.
pub fn parse_data_words(text: &str) -> Result<Vec<u32>> {
    text.split_whitespace()
        .map(|token| {
            parse_c_integer(token)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::InvalidParameter(format!("not a 32-bit word: {token:?}")))
        })
        .collect()
}
