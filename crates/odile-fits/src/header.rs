//! FITS header card formatting and parsing.
//!
//! A FITS header is a sequence of 80-character ASCII cards stored in
//! 2880-byte blocks and terminated by an `END` card. Keywords longer than
//! eight characters use the `HIERARCH` convention.

use odile_core::image::{HeaderCard, HeaderValue};

/// Bytes per FITS block.
pub const BLOCK: usize = 2880;

/// Bytes per header card.
pub const CARD: usize = 80;

/// Format one card, padded or truncated to exactly 80 bytes.
pub fn format_card(card: &HeaderCard) -> [u8; CARD] {
    let keyword = card.keyword.to_ascii_uppercase();

    let text = if keyword == "COMMENT" || keyword == "HISTORY" {
        format!("{keyword:<8}{}", card.comment)
    } else {
        let value = match &card.value {
            HeaderValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
            HeaderValue::Int(v) => format!("{v:>20}"),
            HeaderValue::Float(v) => format!("{:>20}", format_float(*v)),
            HeaderValue::Text(s) => format!("{:<20}", quote(s)),
        };
        let head = if keyword.len() > 8 || !keyword.bytes().all(is_keyword_byte) {
            format!("HIERARCH {keyword} = {}", value.trim_start())
        } else {
            format!("{keyword:<8}= {value}")
        };
        if card.comment.is_empty() {
            head
        } else {
            format!("{head} / {}", card.comment)
        }
    };

    let mut out = [b' '; CARD];
    for (slot, b) in out.iter_mut().zip(text.bytes().filter(|b| b.is_ascii() && !b.is_ascii_control())) {
        *slot = b;
    }
    out
}

/// The `END` card.
pub fn end_card() -> [u8; CARD] {
    let mut out = [b' '; CARD];
    out[..3].copy_from_slice(b"END");
    out
}

/// Mandatory cards for a 2-D signed 32-bit image.
pub fn primary_cards(width: usize, height: usize) -> Vec<HeaderCard> {
    vec![
        HeaderCard::new("SIMPLE", HeaderValue::Logical(true), ""),
        HeaderCard::new("BITPIX", HeaderValue::Int(32), "signed 32-bit pixels"),
        HeaderCard::new("NAXIS", HeaderValue::Int(2), "image dimensions"),
        HeaderCard::new("NAXIS1", HeaderValue::Int(width as i64), "columns"),
        HeaderCard::new("NAXIS2", HeaderValue::Int(height as i64), "rows"),
    ]
}

/// Serialize cards plus `END`, padded to whole blocks.
pub fn encode_header(cards: &[HeaderCard]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK);
    for card in cards {
        out.extend_from_slice(&format_card(card));
    }
    out.extend_from_slice(&end_card());
    pad_to_block(&mut out, b' ');
    out
}

/// Byte length of the header at the start of `bytes`, including padding,
/// or `None` if no `END` card is found.
pub fn header_len(bytes: &[u8]) -> Option<usize> {
    let end = bytes
        .chunks_exact(CARD)
        .position(|card| card.starts_with(b"END") && card[3..].iter().all(|&b| b == b' '))?;
    Some((end + 1).div_ceil(BLOCK / CARD) * BLOCK)
}

/// Raw cards of a header, `END` excluded.
pub fn header_cards(bytes: &[u8]) -> Vec<[u8; CARD]> {
    let mut cards = Vec::new();
    for chunk in bytes.chunks_exact(CARD) {
        if chunk.starts_with(b"END") && chunk[3..].iter().all(|&b| b == b' ') {
            break;
        }
        let mut card = [b' '; CARD];
        card.copy_from_slice(chunk);
        cards.push(card);
    }
    cards
}

pub(crate) fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    let padded = buf.len().div_ceil(BLOCK) * BLOCK;
    buf.resize(padded, fill);
}

fn is_keyword_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_'
}

fn quote(s: &str) -> String {
    format!("'{:<8}'", s.replace('\'', "''"))
}

fn format_float(v: f64) -> String {
    format!("{v:?}").replace('e', "E")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_text(card: &[u8; CARD]) -> String {
        String::from_utf8(card.to_vec()).unwrap().trim_end().to_string()
    }

    #[test]
    fn integer_card_is_right_justified() {
        let card = format_card(&HeaderCard::new("NDCMs", HeaderValue::Int(4), "Number of charge measurements"));
        assert_eq!(
            card_text(&card),
            "NDCMS   =                    4 / Number of charge measurements"
        );
    }

    #[test]
    fn string_card_is_quoted() {
        let card = format_card(&HeaderCard::new("AMPL", HeaderValue::Text("U".into()), ""));
        assert_eq!(card_text(&card), "AMPL    = 'U       '");
    }

    #[test]
    fn quotes_are_doubled() {
        let card = format_card(&HeaderCard::new("NOTE", HeaderValue::Text("it's".into()), ""));
        assert_eq!(card_text(&card), "NOTE    = 'it''s   '");
    }

    #[test]
    fn long_keyword_uses_hierarch() {
        let card = format_card(&HeaderCard::new("ADC_CDS_NSkips", HeaderValue::Int(1), "skips"));
        assert_eq!(card_text(&card), "HIERARCH ADC_CDS_NSKIPS = 1 / skips");
    }

    #[test]
    fn float_card() {
        let card = format_card(&HeaderCard::new("MREAD", HeaderValue::Float(2.5), ""));
        assert_eq!(card_text(&card), "MREAD   =                  2.5");
        let card = format_card(&HeaderCard::new("MEXP", HeaderValue::Float(3.0), ""));
        assert_eq!(card_text(&card), "MEXP    =                  3.0");
    }

    #[test]
    fn comment_card() {
        let card = format_card(&HeaderCard::comment("taken with odile"));
        assert_eq!(card_text(&card), "COMMENT taken with odile");
    }

    #[test]
    fn overlong_card_is_truncated() {
        let long = "x".repeat(200);
        let card = format_card(&HeaderCard::comment(&long));
        assert_eq!(card.len(), CARD);
        assert!(card.iter().skip(8).all(|&b| b == b'x'));
    }

    #[test]
    fn primary_header_layout() {
        let header = encode_header(&primary_cards(10, 20));
        assert_eq!(header.len(), BLOCK);
        let cards = header_cards(&header);
        assert_eq!(cards.len(), 5);
        assert_eq!(card_text(&cards[0]), "SIMPLE  =                    T");
        assert_eq!(card_text(&cards[3]), "NAXIS1  =                   10 / columns");
        assert_eq!(header_len(&header), Some(BLOCK));
    }

    #[test]
    fn header_spanning_two_blocks() {
        let mut cards = primary_cards(1, 1);
        for i in 0..40 {
            cards.push(HeaderCard::new(&format!("K{i}"), HeaderValue::Int(i), ""));
        }
        let header = encode_header(&cards);
        assert_eq!(header.len(), 2 * BLOCK);
        assert_eq!(header_len(&header), Some(2 * BLOCK));
        assert_eq!(header_cards(&header).len(), 45);
    }

    #[test]
    fn missing_end_card() {
        assert_eq!(header_len(&[b' '; BLOCK]), None);
    }
}
