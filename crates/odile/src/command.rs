//! ODILE command word encoder and response decoder.
//!
//! Commands are three ASCII characters packed into the low 24 bits of a
//! 32-bit word, optionally carrying an 8-bit prefix in the top byte and a
//! second 32-bit parameter word.
//!
//! # Command format
//!
//! ```text
//! word 0: [prefix:8][c0:8][c1:8][c2:8]
//! word 1: [parameter:32]              (optional)
//! ```
//!
//! The board acknowledges most commands with a `DON` word on the command
//! port. Query commands (`GCT`, `GUT`, `GEC`, `GCL`) answer with their own
//! datagram instead: the echoed command word followed by data words.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Local};

use odile_core::error::{Error, Result};
use odile_core::wire::{ASCII_MASK, ascii_word, encode_words, word_ascii};

/// ASCII `DON`, the completion marker sent by the board.
pub const DON: u32 = 0x0044_4F4E;

/// Second-word value meaning "no second word".
pub const NO_SECOND_WORD: u32 = 0xFFFF_FFFF;

/// Clear the flash read/write buffers.
pub const CMD_CLEAR_BUFFERS: &str = "ERB";
/// Set the flash address (second word).
pub const CMD_SET_ADDRESS: &str = "ESA";
/// Erase the sector containing the current address.
pub const CMD_ERASE_SECTOR: &str = "ESE";
/// Commit the write buffer (prefix = word count).
pub const CMD_WRITE: &str = "EWR";
/// Read into the buffer and return it on the firmware port (prefix = word count).
pub const CMD_READ: &str = "ERD";
/// Firmware compile time.
pub const CMD_COMPILE_TIME: &str = "GCT";
/// Uptime in seconds.
pub const CMD_UPTIME: &str = "GUT";
/// Last error code.
pub const CMD_ERROR_CODE: &str = "GEC";
/// List of valid commands.
pub const CMD_LIST: &str = "GCL";

/// Pack a command and optional prefix into a single word.
///
/// A prefix of `0` is the same as no prefix.
pub fn command_word(cmd: &str, prefix: Option<u8>) -> Result<u32> {
    if cmd.len() != 3 || !cmd.is_ascii() {
        return Err(Error::InvalidCommand(cmd.to_string()));
    }
    let prefix = u32::from(prefix.unwrap_or(0));
    Ok((prefix << 24) | ascii_word(cmd))
}

/// Encode a command into host-order words ready for the wire codec.
///
/// The second word is appended unless it is `None` or [`NO_SECOND_WORD`].
///
/// # Example
///
/// ```
/// use odile::command::encode_command;
///
/// let words = encode_command("EWR", Some(64), None).unwrap();
/// assert_eq!(words, vec![0x4045_5752]);
///
/// let words = encode_command("ESA", None, Some(0x01F6_0000)).unwrap();
/// assert_eq!(words, vec![0x0045_5341, 0x01F6_0000]);
/// ```
pub fn encode_command(cmd: &str, prefix: Option<u8>, second_word: Option<u32>) -> Result<Vec<u32>> {
    let mut words = vec![command_word(cmd, prefix)?];
    if let Some(second) = second_word.filter(|&w| w != NO_SECOND_WORD) {
        words.push(second);
    }
    Ok(words)
}

/// Encode a command straight into network-order datagram bytes.
pub fn encode_command_frame(cmd: &str, prefix: Option<u8>, second_word: Option<u32>) -> Result<Bytes> {
    Ok(encode_words(&encode_command(cmd, prefix, second_word)?))
}

/// Whether a word is the `DON` marker. The top 8 bits are ignored.
pub fn is_done(word: u32) -> bool {
    word & ASCII_MASK == DON
}

/// Whether any word of a datagram is the `DON` marker.
pub fn contains_done(words: &[u32]) -> bool {
    words.iter().copied().any(is_done)
}

/// A decoded answer to a command sent with a response expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    /// `GCT`: firmware compile time, UNIX seconds.
    CompileTime(u32),
    /// `GUT`: approximate uptime in seconds.
    Uptime(u32),
    /// `GEC`: error code.
    ErrorCode(u32),
    /// `GCL`: command names the firmware accepts.
    CommandList(Vec<String>),
    /// Any other answer, as the ASCII field of each word (`DON`, `INV`, ...).
    Words(Vec<String>),
}

impl CommandResponse {
    /// Decode the datagram received after sending `command`.
    pub fn parse(command: &str, words: &[u32]) -> Result<Self> {
        let second = || {
            words.get(1).copied().ok_or_else(|| {
                Error::Protocol(format!(
                    "{command} response has {} words, expected at least 2",
                    words.len()
                ))
            })
        };
        Ok(match command {
            CMD_COMPILE_TIME => CommandResponse::CompileTime(second()?),
            CMD_UPTIME => CommandResponse::Uptime(second()?),
            CMD_ERROR_CODE => CommandResponse::ErrorCode(second()?),
            // First word echoes the command, last word terminates the list.
            CMD_LIST => {
                let inner = if words.len() > 2 { &words[1..words.len() - 1] } else { &[][..] };
                CommandResponse::CommandList(inner.iter().map(|&w| word_ascii(w)).collect())
            }
            _ => CommandResponse::Words(words.iter().map(|&w| word_ascii(w)).collect()),
        })
    }
}

impl fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResponse::CompileTime(t) => {
                write!(f, "Firmware was compiled at: {}", format_timestamp(*t))
            }
            CommandResponse::Uptime(s) => {
                write!(f, "System has been running for: {s} seconds (roughly)")
            }
            CommandResponse::ErrorCode(c) => write!(f, "Error code is: {c:#x}"),
            CommandResponse::CommandList(cmds) => {
                write!(f, "Valid commands are: {}", cmds.join(","))
            }
            CommandResponse::Words(words) => write!(f, "Received responses: {}", words.join(" ")),
        }
    }
}

/// Render UNIX seconds in local time, `asctime` style
/// (`Thu Mar  7 14:02:11 2024`).
pub fn format_timestamp(unix_seconds: u32) -> String {
    match DateTime::from_timestamp(i64::from(unix_seconds), 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%a %b %e %H:%M:%S %Y")
            .to_string(),
        None => unix_seconds.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_plain_command() {
        assert_eq!(encode_command("SEX", None, None).unwrap(), vec![0x0053_4558]);
    }

    #[test]
    fn zero_prefix_is_no_prefix() {
        assert_eq!(
            encode_command("ERB", Some(0), None).unwrap(),
            encode_command("ERB", None, None).unwrap()
        );
    }

    #[test]
    fn prefix_in_top_byte() {
        assert_eq!(encode_command("ERD", Some(0xFF), None).unwrap(), vec![0xFF45_5244]);
    }

    #[test]
    fn sentinel_second_word_is_dropped() {
        assert_eq!(
            encode_command("ESA", None, Some(NO_SECOND_WORD)).unwrap(),
            vec![0x0045_5341]
        );
    }

    #[test]
    fn zero_second_word_is_sent() {
        assert_eq!(
            encode_command("ESA", None, Some(0)).unwrap(),
            vec![0x0045_5341, 0]
        );
    }

    #[test]
    fn command_length_is_checked() {
        for bad in ["", "ER", "ERBS", "ÉRB"] {
            assert!(
                matches!(encode_command(bad, None, None), Err(Error::InvalidCommand(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn frame_is_network_order() {
        let frame = encode_command_frame("ESA", None, Some(0x01F6_0000)).unwrap();
        assert_eq!(&frame[..], &[0x00, b'E', b'S', b'A', 0x01, 0xF6, 0x00, 0x00]);
    }

    #[test]
    fn frame_matches_wire_codec() {
        let words = encode_command("EWR", Some(64), Some(0x0100_0100)).unwrap();
        let frame = encode_command_frame("EWR", Some(64), Some(0x0100_0100)).unwrap();
        assert_eq!(frame, encode_words(&words));
        assert_eq!(&frame[..4], &[0x40, b'E', b'W', b'R']);
    }

    #[test]
    fn done_ignores_top_byte() {
        assert!(is_done(DON));
        assert!(is_done(0xAB44_4F4E));
        assert!(!is_done(0x0044_4F4F));
        assert!(contains_done(&[0x1234_5678, 0x0044_4F4E]));
        assert!(!contains_done(&[]));
    }

    #[test]
    fn parse_compile_time() {
        let resp = CommandResponse::parse("GCT", &[ascii_word("GCT"), 1_700_000_000]).unwrap();
        assert_eq!(resp, CommandResponse::CompileTime(1_700_000_000));
    }

    #[test]
    fn parse_short_response_is_protocol_error() {
        assert!(matches!(
            CommandResponse::parse("GUT", &[ascii_word("GUT")]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn parse_command_list() {
        let words = [
            ascii_word("GCL"),
            ascii_word("SEX"),
            ascii_word("AEX"),
            ascii_word("GCT"),
            ascii_word("DON"),
        ];
        let resp = CommandResponse::parse("GCL", &words).unwrap();
        assert_eq!(
            resp,
            CommandResponse::CommandList(vec!["SEX".into(), "AEX".into(), "GCT".into()])
        );
        assert_eq!(resp.to_string(), "Valid commands are: SEX,AEX,GCT");
    }

    #[test]
    fn parse_other_response() {
        let resp = CommandResponse::parse("XYZ", &[ascii_word("INV")]).unwrap();
        assert_eq!(resp, CommandResponse::Words(vec!["INV".into()]));
    }

    #[test]
    fn display_error_code() {
        assert_eq!(CommandResponse::ErrorCode(0x1F).to_string(), "Error code is: 0x1f");
    }
}
