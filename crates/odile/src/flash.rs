//! EPCQ flash programming over the command and firmware ports.
//!
//! The board exposes its configuration flash through five primitives:
//! `ERB` clears the write buffer, `ESA` sets the flash address, `ESE` erases
//! the sector holding that address, `EWR` commits the first *n* buffered
//! words and `ERD` reads *n* words back on the firmware port. Every primitive
//! except `ERD` is acknowledged with `DON`.
//!
//! Data moves in 64-word pages. Each written page is read back and compared
//! before the next one is sent; any difference aborts the operation.

use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use odile_config::ini::parse_c_integer;
use odile_core::error::{Error, Result};
use odile_core::wire::{decode_words, encode_words};
use odile_core::{CONFIG_PORT, FIRMWARE_PORT, MAX_DATAGRAM};

use crate::command::{CMD_CLEAR_BUFFERS, CMD_ERASE_SECTOR, CMD_READ, CMD_SET_ADDRESS, CMD_WRITE};
use crate::controller::Controller;

/// Bytes per flash page.
pub const PAGE_BYTES: u32 = 256;

/// Words per flash page.
pub const PAGE_WORDS: usize = 64;

/// Bytes per erasable flash sector.
pub const SECTOR_BYTES: u32 = 0x1_0000;

/// Value of an erased flash word, used to pad short pages.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Flash addresses of the ten stored configuration pages, one sector each.
pub const CONFIG_PAGE_ADDRESS: [u32; 10] = [
    0x01F6_0000, 0x01F7_0000, 0x01F8_0000, 0x01F9_0000, 0x01FA_0000,
    0x01FB_0000, 0x01FC_0000, 0x01FD_0000, 0x01FE_0000, 0x01FF_0000,
];

/// Top byte of every stored configuration block header.
pub const CONFIG_HEADER_FLAG: u32 = 0xCD;

/// Payload words per stored configuration block (one word is the header).
const CONFIG_BLOCK_PAYLOAD: usize = PAGE_WORDS - 1;

/// Split a configuration message into the blocks stored in flash.
///
/// Each block is a header word `0xCD << 24 | count << 16 | port` followed by
/// up to 63 message words. The firmware replays each block to `port` at
/// boot. An empty message produces no blocks.
pub fn frame_config_page(message: &[u32], port: u16) -> Vec<u32> {
    let blocks = message.len().div_ceil(CONFIG_BLOCK_PAYLOAD);
    let mut framed = Vec::with_capacity(message.len() + blocks);
    for chunk in message.chunks(CONFIG_BLOCK_PAYLOAD) {
        framed.push((CONFIG_HEADER_FLAG << 24) | ((chunk.len() as u32) << 16) | u32::from(port));
        framed.extend_from_slice(chunk);
    }
    framed
}

/// Address range of a firmware image, from a Quartus `.map` file.
///
/// Addresses are relative to the start of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareMap {
    pub start: u32,
    pub end: u32,
}

impl FirmwareMap {
    /// Take the first line whose last two tokens are integers as
    /// `start end`.
    ///
    /// ```
    /// use odile::flash::FirmwareMap;
    ///
    /// let map = FirmwareMap::parse(
    ///     "BLOCK\tSTART ADDRESS\tEND ADDRESS\n\nPage_0\t0x00000000\t0x002B1A4F\n",
    /// )
    /// .unwrap();
    /// assert_eq!(map.end, 0x002B_1A4F);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        for line in text.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [.., start, end] = tokens.as_slice() else {
                continue;
            };
            let parse = |t: &str| parse_c_integer(t).and_then(|v| u32::try_from(v).ok());
            if let (Some(start), Some(end)) = (parse(*start), parse(*end)) {
                if end < start {
                    return Err(Error::MapFile(format!(
                        "end address {end:#x} before start address {start:#x}"
                    )));
                }
                return Ok(FirmwareMap { start, end });
            }
        }
        Err(Error::MapFile("no address range found".into()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::parse(&text).map_err(|e| match e {
            Error::MapFile(msg) => Error::MapFile(format!("{}: {msg}", path.as_ref().display())),
            other => other,
        })
    }

    /// Pages needed to cover the image.
    pub fn pages(&self) -> usize {
        (self.end / PAGE_BYTES) as usize + 1
    }
}

/// Byte address of page `index` of an operation starting at `start`.
fn page_address(start: u32, index: usize) -> Result<u32> {
    u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(PAGE_BYTES))
        .and_then(|offset| start.checked_add(offset))
        .ok_or_else(|| {
            Error::InvalidParameter(format!(
                "page {index} from {start:#010x} is past the end of the flash address space"
            ))
        })
}

/// Fail unless `pages` whole pages from `start` fit in the address space.
fn check_span(start: u32, pages: usize) -> Result<()> {
    page_address(start, pages.saturating_sub(1))?
        .checked_add(PAGE_BYTES - 1)
        .map(|_| ())
        .ok_or_else(|| {
            Error::InvalidParameter(format!(
                "{pages} pages from {start:#010x} run past the end of the flash address space"
            ))
        })
}

/// Words of firmware page `page`, read little-endian from the `.rpd` image
/// and padded with erased words past its end.
fn firmware_page(image: &[u8], page: usize) -> Vec<u32> {
    let offset = page * PAGE_BYTES as usize;
    let bytes = image.get(offset..).unwrap_or(&[]);
    let bytes = &bytes[..bytes.len().min(PAGE_BYTES as usize)];

    let mut words: Vec<u32> = bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0xFFu8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect();
    words.resize(PAGE_WORDS, ERASED_WORD);
    words
}

impl Controller {
    /// Send a flash primitive and wait for its acknowledgement with the
    /// flash timeout.
    async fn flash_step(&mut self, cmd: &str, prefix: Option<u8>, second_word: Option<u32>) -> Result<()> {
        self.send_command(cmd, prefix, second_word).await?;
        let timeout = self.options.flash_timeout;
        self.wait_for_done(cmd, timeout).await
    }

    /// Request `count` words from the current flash address and receive
    /// them from the firmware port.
    async fn read_page(&mut self, count: usize) -> Result<Vec<u8>> {
        let prefix = u8::try_from(count)
            .map_err(|_| Error::InvalidParameter(format!("cannot read {count} words at once")))?;
        self.send_command(CMD_READ, Some(prefix), None).await?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let timeout = self.options.flash_timeout;
        let n = self.transport.receive(FIRMWARE_PORT, &mut buf, timeout).await?;
        Ok(buf[..n].to_vec())
    }

    /// Write one full page at `address`, then read it back and compare.
    async fn program_page(&mut self, address: u32, page: &[u32], sector: usize, index: usize) -> Result<()> {
        self.flash_step(CMD_SET_ADDRESS, None, Some(address)).await?;
        self.transport.send(FIRMWARE_PORT, &encode_words(page)).await?;
        self.flash_step(CMD_WRITE, Some(PAGE_WORDS as u8), None).await?;

        let readback = decode_words(&self.read_page(PAGE_WORDS).await?);
        if readback.as_slice() == page {
            tracing::trace!(address = format_args!("{address:#010x}"), sector, page = index, "Page verified");
            return Ok(());
        }

        let diff: Vec<(usize, u32, u32)> = if readback.len() == page.len() {
            page.iter()
                .zip(&readback)
                .enumerate()
                .filter(|(_, (w, r))| w != r)
                .map(|(i, (&w, &r))| (i, w, r))
                .collect()
        } else {
            Vec::new()
        };
        for (i, written, read) in &diff {
            tracing::error!(
                word = *i,
                written = format_args!("{written:#010x}"),
                read = format_args!("{read:#010x}"),
                "Flash word differs"
            );
        }
        tracing::error!(
            address = format_args!("{address:#010x}"),
            sector,
            page = index,
            written = page.len(),
            read = readback.len(),
            "Flash verify failed"
        );
        Err(Error::VerifyMismatch {
            sector,
            page: index,
            address,
            written: page.len(),
            read: readback.len(),
            diff,
        })
    }

    /// Write up to one sector of words starting at `start`, optionally
    /// erasing the sector first.
    ///
    /// Returns the words written, whole pages including padding. A verify
    /// failure reports its sector and page counted from `start`'s sector
    /// and page.
    pub async fn write_epcq(&mut self, data: &[u32], start: u32, erase: bool) -> Result<usize> {
        let bytes = data.len() * 4;
        if bytes > SECTOR_BYTES as usize {
            return Err(Error::SectorOverflow {
                bytes,
                max: SECTOR_BYTES as usize,
            });
        }
        let pages = data.len().div_ceil(PAGE_WORDS).max(1);
        check_span(start, pages)?;
        tracing::debug!(start = format_args!("{start:#010x}"), words = data.len(), pages, erase, "Writing EPCQ");

        self.flash_step(CMD_CLEAR_BUFFERS, None, None).await?;
        self.flash_step(CMD_SET_ADDRESS, None, Some(start)).await?;
        if erase {
            self.flash_step(CMD_ERASE_SECTOR, None, None).await?;
        }

        for index in 0..pages {
            let from = (index * PAGE_WORDS).min(data.len());
            let to = (from + PAGE_WORDS).min(data.len());
            let mut page = data[from..to].to_vec();
            page.resize(PAGE_WORDS, ERASED_WORD);

            let address = page_address(start, index)?;
            let sector = (address / SECTOR_BYTES - start / SECTOR_BYTES) as usize;
            self.program_page(address, &page, sector, index).await?;
        }
        Ok(pages * PAGE_WORDS)
    }

    /// Read `words` words starting at `start` into `dest` as network-order
    /// bytes. Returns the words read.
    pub async fn read_epcq<W>(&mut self, dest: &mut W, start: u32, words: usize) -> Result<usize>
    where
        W: AsyncWrite + Unpin + Send,
    {
        check_span(start, words.div_ceil(PAGE_WORDS))?;
        tracing::debug!(start = format_args!("{start:#010x}"), words, "Reading EPCQ");
        self.flash_step(CMD_CLEAR_BUFFERS, None, None).await?;
        self.flash_step(CMD_SET_ADDRESS, None, Some(start)).await?;

        let full_pages = words / PAGE_WORDS;
        let remainder = words % PAGE_WORDS;
        let mut read = 0;

        for index in 0..full_pages {
            read += write_received(dest, &self.read_page(PAGE_WORDS).await?, PAGE_WORDS).await?;
            let address = page_address(start, index + 1)?;
            self.flash_step(CMD_SET_ADDRESS, None, Some(address)).await?;
        }
        if remainder > 0 {
            read += write_received(dest, &self.read_page(remainder).await?, remainder).await?;
        }
        dest.flush().await?;
        Ok(read)
    }

    /// Program a raw `.rpd` firmware image at the sector-aligned `start`.
    ///
    /// `map` gives the image's extent. Sectors are erased as the write
    /// reaches them. `progress` receives the completed fraction after every
    /// page. Returns the pages written.
    ///
    /// A verify failure stops the write at the failing page, which is
    /// reported with its sector counted from `start`.
    pub async fn write_firmware<F>(
        &mut self,
        image: &[u8],
        map: &FirmwareMap,
        start: u32,
        mut progress: F,
    ) -> Result<usize>
    where
        F: FnMut(f64) + Send,
    {
        if start % SECTOR_BYTES != 0 {
            return Err(Error::UnalignedAddress(start));
        }
        let pages = map.pages();
        check_span(start, pages)?;
        let sectors = (map.end / SECTOR_BYTES) as usize + 1;
        tracing::info!(
            start = format_args!("{start:#010x}"),
            image_bytes = image.len(),
            pages,
            sectors,
            "Writing firmware"
        );

        self.flash_step(CMD_CLEAR_BUFFERS, None, None).await?;
        progress(0.0);

        let mut sector = 0;
        for index in 0..pages {
            let address = page_address(start, index)?;
            self.flash_step(CMD_SET_ADDRESS, None, Some(address)).await?;
            if address % SECTOR_BYTES == 0 {
                sector = ((address - start) / SECTOR_BYTES) as usize;
                tracing::debug!(sector, address = format_args!("{address:#010x}"), "Erasing sector");
                self.flash_step(CMD_ERASE_SECTOR, None, None).await?;
            }

            let page = firmware_page(image, index);
            self.program_page(address, &page, sector, index).await?;
            progress((index + 1) as f64 / pages as f64);
        }

        tracing::info!(pages, "Firmware written");
        Ok(pages)
    }

    /// Read an `.rpd` image and its `.map` file, then
    /// [`write_firmware`](Self::write_firmware).
    pub async fn write_firmware_files<F>(
        &mut self,
        rpd: impl AsRef<Path>,
        map: impl AsRef<Path>,
        start: u32,
        progress: F,
    ) -> Result<usize>
    where
        F: FnMut(f64) + Send,
    {
        let map = FirmwareMap::load(map).await?;
        let image = tokio::fs::read(rpd.as_ref()).await?;
        self.write_firmware(&image, &map, start, progress).await
    }

    /// Store the current register configuration in flash page `page`
    /// (0-9), from where the firmware loads it at boot.
    pub async fn write_flash_config(&mut self, page: usize) -> Result<usize> {
        let address = *CONFIG_PAGE_ADDRESS.get(page).ok_or(Error::InvalidPage(page))?;
        let message = self.config.master_message(self.options.write_all);
        let framed = frame_config_page(&message, CONFIG_PORT);
        tracing::info!(page, address = format_args!("{address:#010x}"), words = framed.len(), "Writing configuration to flash");
        self.write_epcq(&framed, address, true).await
    }
}

/// Append the first `max_words` whole words of a readback datagram to
/// `dest`. Returns the words written.
async fn write_received<W>(dest: &mut W, bytes: &[u8], max_words: usize) -> Result<usize>
where
    W: AsyncWrite + Unpin + Send,
{
    let words = (bytes.len() / 4).min(max_words);
    if words < max_words {
        tracing::warn!(expected = max_words, received = words, "Short flash readback");
    }
    dest.write_all(&bytes[..words * 4]).await?;
    Ok(words)
}
