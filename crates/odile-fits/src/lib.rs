//! odile-fits: a minimal FITS writer for ODILE image captures.
//!
//! Writes single-HDU, two-dimensional images of signed 32-bit pixels
//! (`BITPIX = 32`) and appends keyword cards to finished images. The
//! controller uses it through the `ImageSinkFactory` capability; it can also
//! be driven directly:
//!
//! ```no_run
//! use odile_core::{HeaderCard, HeaderValue, ImageSinkFactory};
//! use odile_fits::FitsImageSinkFactory;
//! use std::path::Path;
//!
//! # async fn example() -> odile_core::Result<()> {
//! let factory = FitsImageSinkFactory::new();
//! let path = Path::new("frame.fits");
//!
//! let mut image = factory.create(path, 600, 100).await?;
//! image.write_pixels(0, &[12, 15, 11]).await?;
//! image.close().await?;
//!
//! factory
//!     .write_header(path, &[HeaderCard::new("NDCMs", HeaderValue::Int(1), "Number of charge measurements")])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod header;
pub mod sink;

pub use sink::{FitsImageSink, FitsImageSinkFactory};
