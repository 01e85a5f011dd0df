//! Simulated ODILE board for deterministic testing of the host controller.
//!
//! [`MockDevice`] implements [`DatagramTransport`] and answers the way the
//! board's firmware does: every command gets a `DON` word on the command
//! port, the flash commands (`ERB`, `ESA`, `ESE`, `EWR`, `ERD`) operate on an
//! in-memory EPCQ image, and `ERD` returns page data on the firmware port.
//! Flash cells behave like NOR flash: erased words read `0xFFFFFFFF` and a
//! write can only clear bits.
//!
//! The device is cheaply clonable. Hand one clone to the code under test and
//! keep another to inspect traffic and flash contents.
//!
//! # Example
//!
//! ```
//! use odile_core::{DatagramTransport, COMMAND_PORT};
//! use odile_test_harness::MockDevice;
//!
//! # async fn example() -> odile_core::Result<()> {
//! let device = MockDevice::new();
//! device.send(COMMAND_PORT, &[0x00, b'E', b'R', b'B']).await?;
//!
//! let mut buf = [0u8; 16];
//! let n = device.receive(COMMAND_PORT, &mut buf, None).await?;
//! assert_eq!(&buf[..n], &[0x00, b'D', b'O', b'N']);
//! assert_eq!(device.sent_commands(), vec!["ERB"]);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use odile_core::error::{Error, Result};
use odile_core::transport::DatagramTransport;
use odile_core::wire::{ASCII_MASK, ascii_word, decode_words, encode_words, word_ascii};
use odile_core::{COMMAND_PORT, CONFIG_PORT, FIRMWARE_PORT};

/// Bytes per flash sector.
const SECTOR_BYTES: u32 = 0x1_0000;

/// Value of an erased flash word.
const ERASED: u32 = 0xFFFF_FFFF;

/// One command datagram as the device decoded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub command: String,
    pub prefix: u8,
    pub second_word: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct ReadbackFault {
    word: usize,
    mask: u32,
}

#[derive(Debug, Default)]
struct State {
    /// Datagrams queued for the host, by host port.
    outbound: HashMap<u16, VecDeque<Vec<u8>>>,
    /// Every datagram the host sent, with its destination port.
    sent: Vec<(u16, Vec<u8>)>,
    commands: Vec<ReceivedCommand>,
    /// Sparse flash image keyed by byte address; absent words are erased.
    flash: HashMap<u32, u32>,
    address: u32,
    write_buffer: Vec<u32>,
    erased_sectors: Vec<u32>,
    fault: Option<ReadbackFault>,
    /// One-shot faults for the `ERD` that reads from a given address.
    address_faults: HashMap<u32, ReadbackFault>,
    responses: HashMap<String, Vec<u32>>,
    silent: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// An in-memory ODILE board.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    inner: Arc<Inner>,
}

impl MockDevice {
    /// A device with fully erased flash that acknowledges every command.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue(&self, state: &mut State, port: u16, data: Vec<u8>) {
        state.outbound.entry(port).or_default().push_back(data);
        self.inner.notify.notify_waiters();
    }

    // -----------------------------------------------------------------
    // Scripting
    // -----------------------------------------------------------------

    /// Stop answering commands. Flash commands still take effect, but no
    /// `DON` or `ERD` data is sent back.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Answer `command` with `words` on the command port instead of `DON`.
    pub fn set_response(&self, command: &str, words: &[u32]) {
        self.state()
            .responses
            .insert(command.to_string(), words.to_vec());
    }

    /// Queue a raw datagram for the host on `port`.
    pub fn push_datagram(&self, port: u16, data: &[u8]) {
        let mut state = self.state();
        self.queue(&mut state, port, data.to_vec());
    }

    /// Queue host-order words for the host on `port`.
    pub fn push_words(&self, port: u16, words: &[u32]) {
        self.push_datagram(port, &encode_words(words));
    }

    /// Queue an unsolicited `DON` on the command port.
    pub fn inject_done(&self) {
        self.push_words(COMMAND_PORT, &[ascii_word("DON")]);
    }

    /// XOR `mask` into word `word` of the next `ERD` response only.
    pub fn inject_readback_fault(&self, word: usize, mask: u32) {
        self.state().fault = Some(ReadbackFault { word, mask });
    }

    /// XOR `mask` into word `word` of the first `ERD` that reads from byte
    /// address `address`. Earlier reads from other addresses are untouched.
    pub fn inject_readback_fault_at(&self, address: u32, word: usize, mask: u32) {
        self.state()
            .address_faults
            .insert(address, ReadbackFault { word, mask });
    }

    /// Store words directly into flash starting at byte address `address`.
    pub fn preload_flash(&self, address: u32, words: &[u32]) {
        let mut state = self.state();
        for (i, &word) in words.iter().enumerate() {
            state.flash.insert(address + 4 * i as u32, word);
        }
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    /// Every datagram sent by the host, as `(device port, bytes)`.
    pub fn sent(&self) -> Vec<(u16, Vec<u8>)> {
        self.state().sent.clone()
    }

    /// Datagrams sent by the host to one device port.
    pub fn sent_on(&self, port: u16) -> Vec<Vec<u8>> {
        self.state()
            .sent
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Decoded commands received on the command port, in order.
    pub fn received_commands(&self) -> Vec<ReceivedCommand> {
        self.state().commands.clone()
    }

    /// Just the 3-character command names received, in order.
    pub fn sent_commands(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Host-order words received on the configuration port.
    pub fn config_words(&self) -> Vec<u32> {
        self.sent_on(CONFIG_PORT)
            .iter()
            .flat_map(|d| decode_words(d))
            .collect()
    }

    /// Number of sector erases performed.
    pub fn erase_count(&self) -> usize {
        self.state().erased_sectors.len()
    }

    /// Base addresses of erased sectors, in erase order.
    pub fn erased_sectors(&self) -> Vec<u32> {
        self.state().erased_sectors.clone()
    }

    /// Read `count` flash words starting at byte address `address`.
    pub fn flash_words(&self, address: u32, count: usize) -> Vec<u32> {
        let state = self.state();
        read_flash(&state, address, count)
    }

    /// Datagrams queued for the host that have not been received yet.
    pub fn pending(&self, port: u16) -> usize {
        self.state().outbound.get(&port).map_or(0, VecDeque::len)
    }

    // -----------------------------------------------------------------
    // Device behaviour
    // -----------------------------------------------------------------

    fn handle_command(&self, state: &mut State, data: &[u8]) {
        let words = decode_words(data);
        let Some(&first) = words.first() else {
            tracing::warn!(bytes = data.len(), "mock device: short command datagram");
            return;
        };
        let command = ReceivedCommand {
            command: word_ascii(first & ASCII_MASK),
            prefix: (first >> 24) as u8,
            second_word: words.get(1).copied(),
        };
        tracing::trace!(command = %command.command, prefix = command.prefix, "mock device: command");

        let count = usize::from(command.prefix);
        let mut reply = true;
        match command.command.as_str() {
            "ERB" => state.write_buffer.clear(),
            "ESA" => state.address = command.second_word.unwrap_or(0),
            "ESE" => {
                let base = state.address & !(SECTOR_BYTES - 1);
                state
                    .flash
                    .retain(|&addr, _| addr < base || addr >= base + SECTOR_BYTES);
                state.erased_sectors.push(base);
            }
            "EWR" => {
                let n = count.min(state.write_buffer.len());
                let pending: Vec<u32> = state.write_buffer.drain(..n).collect();
                for (i, word) in pending.into_iter().enumerate() {
                    let addr = state.address + 4 * i as u32;
                    let cell = state.flash.entry(addr).or_insert(ERASED);
                    *cell &= word;
                }
                state.write_buffer.clear();
            }
            "ERD" => {
                reply = false;
                let mut page = read_flash(state, state.address, count);
                let address = state.address;
                let fault = state
                    .fault
                    .take()
                    .or_else(|| state.address_faults.remove(&address));
                if let Some(fault) = fault {
                    if let Some(word) = page.get_mut(fault.word) {
                        *word ^= fault.mask;
                    }
                }
                if !state.silent {
                    self.queue(state, FIRMWARE_PORT, encode_words(&page).to_vec());
                }
            }
            _ => {}
        }

        if reply && !state.silent {
            let answer = state
                .responses
                .get(&command.command)
                .cloned()
                .unwrap_or_else(|| vec![ascii_word("DON")]);
            self.queue(state, COMMAND_PORT, encode_words(&answer).to_vec());
        }
        state.commands.push(command);
    }

    fn pop(&self, port: u16) -> Option<Vec<u8>> {
        self.state().outbound.get_mut(&port)?.pop_front()
    }
}

fn read_flash(state: &State, address: u32, count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| {
            state
                .flash
                .get(&(address + 4 * i as u32))
                .copied()
                .unwrap_or(ERASED)
        })
        .collect()
}

#[async_trait]
impl DatagramTransport for MockDevice {
    async fn send(&self, port: u16, data: &[u8]) -> Result<usize> {
        let mut state = self.state();
        state.sent.push((port, data.to_vec()));
        match port {
            COMMAND_PORT => self.handle_command(&mut state, data),
            FIRMWARE_PORT => {
                let words = decode_words(data);
                state.write_buffer.extend(words);
            }
            _ => {}
        }
        Ok(data.len())
    }

    async fn receive(&self, port: u16, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.inner.notify.notified();
            if let Some(datagram) = self.pop(port) {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                return Ok(n);
            }
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified)
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(cmd: &str, prefix: u8, second: Option<u32>) -> Vec<u8> {
        let mut words = vec![(u32::from(prefix) << 24) | ascii_word(cmd)];
        words.extend(second);
        encode_words(&words).to_vec()
    }

    async fn expect_done(device: &MockDevice) {
        let mut buf = [0u8; 16];
        let n = device
            .receive(COMMAND_PORT, &mut buf, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(decode_words(&buf[..n]), vec![ascii_word("DON")]);
    }

    #[tokio::test]
    async fn every_command_is_acknowledged() {
        let device = MockDevice::new();
        device.send(COMMAND_PORT, &command("SEX", 0, None)).await.unwrap();
        expect_done(&device).await;
        assert_eq!(device.sent_commands(), vec!["SEX"]);
    }

    #[tokio::test]
    async fn receive_times_out_when_nothing_queued() {
        let device = MockDevice::new();
        let mut buf = [0u8; 16];
        let result = device
            .receive(COMMAND_PORT, &mut buf, Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn silent_device_does_not_answer() {
        let device = MockDevice::new();
        device.set_silent(true);
        device.send(COMMAND_PORT, &command("ERB", 0, None)).await.unwrap();
        assert_eq!(device.pending(COMMAND_PORT), 0);
    }

    #[tokio::test]
    async fn receive_wakes_on_later_datagram() {
        let device = MockDevice::new();
        let waker = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waker.inject_done();
        });
        expect_done(&device).await;
    }

    #[tokio::test]
    async fn write_then_read_page() {
        let device = MockDevice::new();
        device.send(COMMAND_PORT, &command("ESA", 0, Some(0x0001_0000))).await.unwrap();
        device.send(FIRMWARE_PORT, &encode_words(&[1, 2, 3, 4])).await.unwrap();
        device.send(COMMAND_PORT, &command("EWR", 4, None)).await.unwrap();
        device.send(COMMAND_PORT, &command("ERD", 4, None)).await.unwrap();

        let mut buf = [0u8; 64];
        let n = device
            .receive(FIRMWARE_PORT, &mut buf, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(decode_words(&buf[..n]), vec![1, 2, 3, 4]);
        assert_eq!(device.flash_words(0x0001_0000, 5), vec![1, 2, 3, 4, ERASED]);
        // ESA and EWR each produced a DON; ERD did not.
        assert_eq!(device.pending(COMMAND_PORT), 2);
    }

    #[tokio::test]
    async fn writes_only_clear_bits_until_erased() {
        let device = MockDevice::new();
        device.preload_flash(0x2_0000, &[0x0000_FFFF]);
        device.send(COMMAND_PORT, &command("ESA", 0, Some(0x2_0000))).await.unwrap();
        device.send(FIRMWARE_PORT, &encode_words(&[0xFFFF_0000])).await.unwrap();
        device.send(COMMAND_PORT, &command("EWR", 1, None)).await.unwrap();
        assert_eq!(device.flash_words(0x2_0000, 1), vec![0]);

        device.send(COMMAND_PORT, &command("ESA", 0, Some(0x2_0100))).await.unwrap();
        device.send(COMMAND_PORT, &command("ESE", 0, None)).await.unwrap();
        assert_eq!(device.flash_words(0x2_0000, 1), vec![ERASED]);
        assert_eq!(device.erased_sectors(), vec![0x2_0000]);
    }

    #[tokio::test]
    async fn readback_fault_is_one_shot() {
        let device = MockDevice::new();
        device.inject_readback_fault(1, 0x1);
        for _ in 0..2 {
            device.send(COMMAND_PORT, &command("ERD", 2, None)).await.unwrap();
        }
        let mut buf = [0u8; 16];
        let n = device.receive(FIRMWARE_PORT, &mut buf, None).await.unwrap();
        assert_eq!(decode_words(&buf[..n]), vec![ERASED, 0xFFFF_FFFE]);
        let n = device.receive(FIRMWARE_PORT, &mut buf, None).await.unwrap();
        assert_eq!(decode_words(&buf[..n]), vec![ERASED, ERASED]);
    }

    #[tokio::test]
    async fn readback_fault_waits_for_its_address() {
        let device = MockDevice::new();
        device.inject_readback_fault_at(0x100, 0, 0x8000_0000);
        let mut buf = [0u8; 16];
        for (address, expected) in [(0x000, ERASED), (0x100, 0x7FFF_FFFF), (0x100, ERASED)] {
            device.send(COMMAND_PORT, &command("ESA", 0, Some(address))).await.unwrap();
            device.send(COMMAND_PORT, &command("ERD", 1, None)).await.unwrap();
            let n = device.receive(FIRMWARE_PORT, &mut buf, None).await.unwrap();
            assert_eq!(decode_words(&buf[..n]), vec![expected], "read at {address:#x}");
        }
    }

    #[tokio::test]
    async fn canned_response_replaces_done() {
        let device = MockDevice::new();
        device.set_response("GCT", &[ascii_word("GCT"), 1_600_000_000]);
        device.send(COMMAND_PORT, &command("GCT", 0, None)).await.unwrap();

        let mut buf = [0u8; 16];
        let n = device.receive(COMMAND_PORT, &mut buf, None).await.unwrap();
        assert_eq!(decode_words(&buf[..n]), vec![ascii_word("GCT"), 1_600_000_000]);
    }

    #[tokio::test]
    async fn decodes_prefix_and_second_word() {
        let device = MockDevice::new();
        device.send(COMMAND_PORT, &command("ESA", 0, Some(0x01F6_0000))).await.unwrap();
        device.send(COMMAND_PORT, &command("EWR", 64, None)).await.unwrap();
        assert_eq!(
            device.received_commands(),
            vec![
                ReceivedCommand {
                    command: "ESA".into(),
                    prefix: 0,
                    second_word: Some(0x01F6_0000),
                },
                ReceivedCommand {
                    command: "EWR".into(),
                    prefix: 64,
                    second_word: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn config_words_are_collected() {
        let device = MockDevice::new();
        device.send(CONFIG_PORT, &encode_words(&[0x2004_0004])).await.unwrap();
        device.send(CONFIG_PORT, &encode_words(&[0x1012_012C])).await.unwrap();
        assert_eq!(device.config_words(), vec![0x2004_0004, 0x1012_012C]);
    }
}
