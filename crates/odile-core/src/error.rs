//! Error types for the ODILE host controller.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, command encoding
//! problems, flash programming failures, capture task misuse, and register
//! lookup misses are all captured here.

/// The error type for all ODILE operations.
///
/// Protocol-level failures (`Timeout`, `VerifyMismatch`, `UnalignedAddress`,
/// `SectorOverflow`) abort the multi-step operation that raised them. The
/// core never retries; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A command token was not exactly three ASCII characters.
    #[error("invalid command: {0:?} (commands are exactly 3 ASCII characters)")]
    InvalidCommand(String),

    /// A datagram send or receive failed at the socket level.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a completion marker or a datagram.
    #[error("timeout waiting for response")]
    Timeout,

    /// Flash readback differs from the page that was just written.
    ///
    /// `diff` lists `(word index, written, read)` for every differing word
    /// and is only populated when both pages have the same length.
    #[error(
        "flash verify failed at sector {sector}, page {page} (address {address:#010x}): \
         wrote {written} words, read back {read} words, {} differing",
        .diff.len()
    )]
    VerifyMismatch {
        sector: usize,
        page: usize,
        address: u32,
        written: usize,
        read: usize,
        diff: Vec<(usize, u32, u32)>,
    },

    /// An invalid parameter was passed to a register or capture operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A firmware write target was not on a sector boundary.
    #[error("address {0:#010x} is not aligned to a flash sector boundary")]
    UnalignedAddress(u32),

    /// A single-call flash write was larger than one sector.
    #[error("write of {bytes} bytes exceeds one flash sector ({max} bytes)")]
    SectorOverflow { bytes: usize, max: usize },

    /// A configuration page index outside `0..=9`.
    #[error("invalid configuration page {0} (valid pages are 0-9)")]
    InvalidPage(usize),

    /// A capture task id that is unknown or already finished.
    #[error("invalid capture task {0}")]
    InvalidTask(usize),

    /// No block with this name exists in the register model.
    #[error("configuration block not found: {0}")]
    BlockNotFound(String),

    /// No entry with this name exists in the named block.
    #[error("configuration entry {entry} not found in block {block}")]
    EntryNotFound { block: String, entry: String },

    /// An INI configuration file could not be parsed.
    #[error("configuration parse error on line {line}")]
    ConfigParse { line: usize },

    /// A firmware `.map` file did not contain an address range.
    #[error("invalid map file: {0}")]
    MapFile(String),

    /// The device answered with something this host cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_command() {
        let e = Error::InvalidCommand("ERASE".into());
        assert_eq!(
            e.to_string(),
            "invalid command: \"ERASE\" (commands are exactly 3 ASCII characters)"
        );
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_verify_mismatch() {
        let e = Error::VerifyMismatch {
            sector: 2,
            page: 517,
            address: 0x0102_0500,
            written: 64,
            read: 64,
            diff: vec![(3, 0xDEAD_BEEF, 0xDEAD_BEEE)],
        };
        assert_eq!(
            e.to_string(),
            "flash verify failed at sector 2, page 517 (address 0x01020500): \
             wrote 64 words, read back 64 words, 1 differing"
        );
    }

    #[test]
    fn error_display_unaligned() {
        let e = Error::UnalignedAddress(0x0100_0100);
        assert_eq!(
            e.to_string(),
            "address 0x01000100 is not aligned to a flash sector boundary"
        );
    }

    #[test]
    fn error_display_sector_overflow() {
        let e = Error::SectorOverflow {
            bytes: 65540,
            max: 65536,
        };
        assert_eq!(
            e.to_string(),
            "write of 65540 bytes exceeds one flash sector (65536 bytes)"
        );
    }

    #[test]
    fn error_display_lookup_misses() {
        let e = Error::BlockNotFound("DACConfigBlock".into());
        assert_eq!(e.to_string(), "configuration block not found: DACConfigBlock");

        let e = Error::EntryNotFound {
            block: "ADCConfigBlock".into(),
            entry: "ADC_Gain".into(),
        };
        assert_eq!(
            e.to_string(),
            "configuration entry ADC_Gain not found in block ADCConfigBlock"
        );
    }

    #[test]
    fn error_display_invalid_page_and_task() {
        assert_eq!(
            Error::InvalidPage(10).to_string(),
            "invalid configuration page 10 (valid pages are 0-9)"
        );
        assert_eq!(Error::InvalidTask(3).to_string(), "invalid capture task 3");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("block ADCConfigBlock is full".into());
        assert_eq!(e.to_string(), "invalid parameter: block ADCConfigBlock is full");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("no such file"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
