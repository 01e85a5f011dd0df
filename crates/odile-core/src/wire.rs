//! Wire codec for ODILE datagrams.
//!
//! The device exchanges 32-bit words in network byte order. Everything above
//! this module works with host-order `u32` values; these functions are the
//! only place where words become bytes and bytes become words.
//!
//! # Word formats
//!
//! ```text
//! command word:   [prefix:8][ascii0:8][ascii1:8][ascii2:8]
//! register word:  [block_address:8][sub_address:8][value:16]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Mask selecting the 24-bit ASCII field of a command word.
pub const ASCII_MASK: u32 = 0x00FF_FFFF;

/// Encode host-order words into network-order bytes.
///
/// # Example
///
/// ```
/// use odile_core::wire::encode_words;
///
/// let bytes = encode_words(&[0x2004_0004]);
/// assert_eq!(&bytes[..], &[0x20, 0x04, 0x00, 0x04]);
/// ```
pub fn encode_words(words: &[u32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(words.len() * 4);
    for &word in words {
        buf.put_u32(word);
    }
    buf.freeze()
}

/// Decode network-order bytes into host-order words.
///
/// A trailing partial word (fewer than four bytes) is dropped, matching the
/// device's word-granular framing.
pub fn decode_words(mut bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(bytes.len() / 4);
    while bytes.remaining() >= 4 {
        words.push(bytes.get_u32());
    }
    words
}

/// Pack up to three ASCII characters into the low 24 bits of a word,
/// first character most significant.
///
/// # Example
///
/// ```
/// use odile_core::wire::ascii_word;
///
/// assert_eq!(ascii_word("DON"), 0x0044_4F4E);
/// ```
pub fn ascii_word(token: &str) -> u32 {
    token
        .bytes()
        .take(3)
        .fold(0u32, |acc, b| (acc << 8) | u32::from(b))
}

/// Unpack the 24-bit ASCII field of a word into a string.
///
/// Zero bytes (unused leading positions) are skipped; other non-printable
/// bytes are rendered as `?`.
pub fn word_ascii(word: u32) -> String {
    [(word >> 16) as u8, (word >> 8) as u8, word as u8]
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Build a configuration register word from its three fields.
pub fn register_word(block_address: u8, sub_address: u8, value: u16) -> u32 {
    (u32::from(block_address) << 24) | (u32::from(sub_address) << 16) | u32::from(value)
}
