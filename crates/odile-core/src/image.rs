//! Optional image-writing capability used by capture tasks.
//!
//! Capture tasks that write to a `.fits` path hand decoded pixels to an
//! [`ImageSink`]. The sink is created by an [`ImageSinkFactory`] injected
//! when the controller is built. A controller without a factory still
//! accepts `.fits` captures; it simply discards the data.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// A value stored in an image header card.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// One keyword/value/comment entry for an image header.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCard {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: String,
}

impl HeaderCard {
    pub fn new(keyword: &str, value: HeaderValue, comment: &str) -> Self {
        HeaderCard {
            keyword: keyword.to_string(),
            value,
            comment: comment.to_string(),
        }
    }

    /// A comment-only card (keyword `COMMENT`).
    pub fn comment(text: &str) -> Self {
        HeaderCard {
            keyword: "COMMENT".to_string(),
            value: HeaderValue::Text(String::new()),
            comment: text.to_string(),
        }
    }
}

/// An open two-dimensional image of signed 32-bit pixels.
#[async_trait]
pub trait ImageSink: Send {
    /// Write `pixels` starting at the zero-based pixel offset `first_pixel`
    /// (row-major, `width` pixels per row).
    async fn write_pixels(&mut self, first_pixel: u64, pixels: &[i32]) -> Result<()>;

    /// Flush and close the image.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Creates image sinks and annotates finished images.
#[async_trait]
pub trait ImageSinkFactory: Send + Sync {
    /// Create a new `width` x `height` image at `path`.
    async fn create(&self, path: &Path, width: usize, height: usize) -> Result<Box<dyn ImageSink>>;

    /// Append header cards to an existing image.
    async fn write_header(&self, path: &Path, cards: &[HeaderCard]) -> Result<()>;
}
