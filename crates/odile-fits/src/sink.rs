//! FITS implementation of the capture image capability.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use odile_core::error::{Error, Result};
use odile_core::image::{HeaderCard, ImageSink, ImageSinkFactory};

use crate::header::{BLOCK, encode_header, format_card, header_cards, header_len, pad_to_block, primary_cards};

/// An open FITS image with a fixed-size data unit.
///
/// The data unit is allocated (zero-filled) when the image is created, so
/// pixels never written read back as 0.
#[derive(Debug)]
pub struct FitsImageSink {
    path: PathBuf,
    file: File,
    data_offset: u64,
    pixels: u64,
}

impl FitsImageSink {
    /// Create (or truncate) a `width` x `height` image at `path`.
    pub async fn create(path: &Path, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "FITS image must be at least 1x1, got {width}x{height}"
            )));
        }

        let header = encode_header(&primary_cards(width, height));
        let pixels = (width * height) as u64;
        let data_len = (pixels * 4).div_ceil(BLOCK as u64) * BLOCK as u64;

        let mut file = File::create(path).await?;
        file.write_all(&header).await?;
        file.set_len(header.len() as u64 + data_len).await?;

        tracing::debug!(path = %path.display(), width, height, "Created FITS image");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            data_offset: header.len() as u64,
            pixels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImageSink for FitsImageSink {
    async fn write_pixels(&mut self, first_pixel: u64, pixels: &[i32]) -> Result<()> {
        if first_pixel >= self.pixels {
            return Ok(());
        }
        let room = (self.pixels - first_pixel) as usize;
        let take = pixels.len().min(room);
        if take < pixels.len() {
            tracing::warn!(
                path = %self.path.display(),
                dropped = pixels.len() - take,
                "Pixels beyond image size dropped"
            );
        }

        let mut bytes = Vec::with_capacity(take * 4);
        for &p in &pixels[..take] {
            bytes.extend_from_slice(&p.to_be_bytes());
        }
        self.file
            .seek(SeekFrom::Start(self.data_offset + first_pixel * 4))
            .await?;
        self.file.write_all(&bytes).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tracing::debug!(path = %self.path.display(), "Closed FITS image");
        Ok(())
    }
}

/// Creates [`FitsImageSink`]s and appends header keywords to finished
/// images.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsImageSinkFactory;

impl FitsImageSinkFactory {
    pub fn new() -> Self {
        FitsImageSinkFactory
    }
}

#[async_trait]
impl ImageSinkFactory for FitsImageSinkFactory {
    async fn create(&self, path: &Path, width: usize, height: usize) -> Result<Box<dyn ImageSink>> {
        Ok(Box::new(FitsImageSink::create(path, width, height).await?))
    }

    /// Insert `cards` before `END`, growing the header by whole blocks when
    /// needed and moving the data unit accordingly.
    async fn write_header(&self, path: &Path, cards: &[HeaderCard]) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let old_len = header_len(&bytes)
            .ok_or_else(|| Error::Protocol(format!("{} is not a FITS file", path.display())))?;
        if bytes.len() < old_len {
            return Err(Error::Protocol(format!(
                "{} is truncated: header needs {old_len} bytes, file has {}",
                path.display(),
                bytes.len()
            )));
        }

        let mut header = Vec::with_capacity(old_len + BLOCK);
        for card in header_cards(&bytes[..old_len]) {
            header.extend_from_slice(&card);
        }
        for card in cards {
            header.extend_from_slice(&format_card(card));
        }
        header.extend_from_slice(&crate::header::end_card());
        pad_to_block(&mut header, b' ');

        let mut file = OpenOptions::new().write(true).open(path).await?;
        if header.len() != old_len {
            file.seek(SeekFrom::Start(header.len() as u64)).await?;
            file.write_all(&bytes[old_len..]).await?;
        }
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&header).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), cards = cards.len(), "Wrote FITS header");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odile_core::image::HeaderValue;

    fn pixel_at(bytes: &[u8], index: usize) -> i32 {
        let offset = header_len(bytes).unwrap() + index * 4;
        i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[tokio::test]
    async fn create_allocates_padded_data_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        let sink = FitsImageSink::create(&path, 10, 20).await.unwrap();
        Box::new(sink).close().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * BLOCK);
        assert_eq!(pixel_at(&bytes, 0), 0);
    }

    #[tokio::test]
    async fn zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = FitsImageSink::create(&dir.path().join("x.fits"), 0, 5).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn pixels_written_big_endian_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        let mut sink: Box<dyn ImageSink> = FitsImageSinkFactory.create(&path, 4, 2).await.unwrap();
        sink.write_pixels(0, &[1, -2, 3]).await.unwrap();
        sink.write_pixels(3, &[0x0102_0304, 5]).await.unwrap();
        sink.close().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let hdr = header_len(&bytes).unwrap();
        assert_eq!(&bytes[hdr + 12..hdr + 16], &[0x01, 0x02, 0x03, 0x04]);
        let pixels: Vec<i32> = (0..8).map(|i| pixel_at(&bytes, i)).collect();
        assert_eq!(pixels, vec![1, -2, 3, 0x0102_0304, 5, 0, 0, 0]);
    }

    #[tokio::test]
    async fn pixels_past_end_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        let mut sink = FitsImageSinkFactory.create(&path, 2, 2).await.unwrap();
        sink.write_pixels(2, &[7, 8, 9, 10]).await.unwrap();
        sink.write_pixels(4, &[11]).await.unwrap();
        sink.close().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * BLOCK);
        let pixels: Vec<i32> = (0..4).map(|i| pixel_at(&bytes, i)).collect();
        assert_eq!(pixels, vec![0, 0, 7, 8]);
        assert_eq!(pixel_at(&bytes, 4), 0);
    }

    #[tokio::test]
    async fn header_cards_appended_before_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        let mut sink = FitsImageSinkFactory.create(&path, 2, 1).await.unwrap();
        sink.write_pixels(0, &[42, 43]).await.unwrap();
        sink.close().await.unwrap();

        let cards = vec![
            HeaderCard::comment("This image was taken using odile"),
            HeaderCard::new("NDCMs", HeaderValue::Int(4), "Number of charge measurements"),
        ];
        FitsImageSinkFactory.write_header(&path, &cards).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let parsed = header_cards(&bytes);
        assert_eq!(parsed.len(), 7);
        assert!(parsed[6].starts_with(b"NDCMS   ="));
        assert_eq!(pixel_at(&bytes, 0), 42);
        assert_eq!(pixel_at(&bytes, 1), 43);
    }

    #[tokio::test]
    async fn header_growth_moves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        let mut sink = FitsImageSinkFactory.create(&path, 3, 1).await.unwrap();
        sink.write_pixels(0, &[-1, 0, 1]).await.unwrap();
        sink.close().await.unwrap();

        let cards: Vec<HeaderCard> = (0..40)
            .map(|i| HeaderCard::new(&format!("K{i}"), HeaderValue::Int(i), ""))
            .collect();
        FitsImageSinkFactory.write_header(&path, &cards).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(header_len(&bytes), Some(2 * BLOCK));
        assert_eq!(bytes.len(), 3 * BLOCK);
        let pixels: Vec<i32> = (0..3).map(|i| pixel_at(&bytes, i)).collect();
        assert_eq!(pixels, vec![-1, 0, 1]);
    }

    #[tokio::test]
    async fn write_header_rejects_non_fits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, b"not a fits file").unwrap();
        let result = FitsImageSinkFactory.write_header(&path, &[]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn write_header_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");
        let full = encode_header(&primary_cards(4, 4));
        let end = header_len(&full).unwrap();
        // Keep the END card but cut the header block short.
        let cut = full
            .chunks_exact(80)
            .position(|card| card.starts_with(b"END "))
            .map(|i| (i + 1) * 80)
            .unwrap();
        assert!(cut < end);
        std::fs::write(&path, &full[..cut]).unwrap();

        let result = FitsImageSinkFactory.write_header(&path, &[]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(std::fs::read(&path).unwrap(), &full[..cut]);
    }
}
