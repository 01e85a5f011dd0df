//! INI reader and integer parsing for register files.
//!
//! Register files are plain INI: `[BlockName]` section headers followed by
//! `EntryName = value` lines. Values are C-style integers (`0x` hex, leading
//! `0` octal, otherwise decimal). Section and key lookups ignore ASCII case.
//!
//! ```text
//! [ADCConfigBlock]
//! ;0x4 Number of skips to perform CDS over
//! ADC_CDS_NSkips = 0x4
//! ```
//!
//! Parsing never stops at the first bad line: malformed lines are skipped and
//! the line number of the first one is kept in [`IniDocument::parse_error`].

use std::path::Path;

use odile_core::error::Result;

/// Read access to parsed INI data.
///
/// The register model only needs section membership, the keys of a section,
/// and integer values, so that is all this trait exposes.
pub trait IniSource {
    /// Whether a section with this name exists.
    fn has_section(&self, section: &str) -> bool;

    /// Keys present in `section`, in file order.
    fn fields(&self, section: &str) -> Vec<String>;

    /// Raw string value of `key` in `section`.
    fn get(&self, section: &str, key: &str) -> Option<&str>;

    /// Integer value of `key` in `section`, or `None` if missing or not an
    /// integer.
    fn get_integer(&self, section: &str, key: &str) -> Option<i64> {
        self.get(section, key).and_then(parse_c_integer)
    }

    /// Line number (1-based) of the first malformed line, 0 if none.
    fn parse_error(&self) -> usize;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    name: String,
    values: Vec<(String, String)>,
}

/// A parsed INI document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<Section>,
    error_line: usize,
}

impl IniDocument {
    /// Parse INI text.
    pub fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        let mut current: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                match rest.find(']') {
                    Some(end) => {
                        let name = rest[..end].trim();
                        current = Some(doc.section_index_or_insert(name));
                    }
                    None => doc.note_error(line_no),
                }
                continue;
            }

            let Some(split) = line.find(['=', ':']) else {
                doc.note_error(line_no);
                continue;
            };

            let key = line[..split].trim();
            if key.is_empty() {
                doc.note_error(line_no);
                continue;
            }
            let value = strip_inline_comment(&line[split + 1..]).trim();

            let section = match current {
                Some(i) => i,
                None => {
                    let i = doc.section_index_or_insert("");
                    current = Some(i);
                    i
                }
            };
            let values = &mut doc.sections[section].values;
            match values.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some(existing) => existing.1 = value.to_string(),
                None => values.push((key.to_string(), value.to_string())),
            }
        }

        doc
    }

    /// Read and parse an INI file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::parse(&text))
    }

    /// Names of all sections, in file order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(i) = self
            .sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
        {
            return i;
        }
        self.sections.push(Section {
            name: name.to_string(),
            values: Vec::new(),
        });
        self.sections.len() - 1
    }

    fn note_error(&mut self, line: usize) {
        tracing::debug!(line, "malformed INI line");
        if self.error_line == 0 {
            self.error_line = line;
        }
    }
}

impl IniSource for IniDocument {
    fn has_section(&self, section: &str) -> bool {
        self.section(section).is_some()
    }

    fn fields(&self, section: &str) -> Vec<String> {
        self.section(section)
            .map(|s| s.values.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn parse_error(&self) -> usize {
        self.error_line
    }
}

/// Remove a `;` comment that follows whitespace (`value ; comment`).
fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b';' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &value[..i];
        }
    }
    value
}

/// Parse an integer the way C `strtol(s, NULL, 0)` does.
///
/// Accepts an optional sign, then `0x`/`0X` hex, a leading `0` for octal, or
/// decimal. The whole (trimmed) string must be consumed.
///
/// # Example
///
/// ```
/// use odile_config::ini::parse_c_integer;
///
/// assert_eq!(parse_c_integer("0x4268"), Some(0x4268));
/// assert_eq!(parse_c_integer("017"), Some(15));
/// assert_eq!(parse_c_integer("-3"), Some(-3));
/// assert_eq!(parse_c_integer("abc"), None);
/// ```
pub fn parse_c_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    // from_str_radix would accept a second sign here.
    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i64::from_str_radix(body, radix).ok()?;

    Some(if negative { -magnitude } else { magnitude })
}
