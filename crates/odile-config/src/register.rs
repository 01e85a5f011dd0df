//! Configuration entries and register blocks.
//!
//! A [`ConfigRegisterBlock`] is a named group of up to 64 16-bit registers
//! sharing one block address. Its wire messages are recomputed on every call
//! from the current values; nothing is cached.

use std::io::Write;

use odile_core::error::{Error, Result};
use odile_core::wire::register_word;

use crate::ini::IniSource;

/// Name reserved for placeholder entries that are never sent to the device.
pub const UNUSED: &str = "UNUSED";

/// Maximum number of entries in one block (sub-addresses `0..64`).
pub const MAX_ENTRIES: usize = 64;

/// A named 16-bit register value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Sub-address within the block.
    pub address: u8,
    /// Current value.
    pub value: u16,
    /// Compiled-in default.
    pub default_value: u16,
    pub name: String,
    pub description: String,
}

impl ConfigEntry {
    /// An entry whose current value starts at its default.
    pub fn new(default_value: u16, address: u8, name: &str, description: &str) -> Self {
        ConfigEntry {
            address,
            value: default_value,
            default_value,
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    /// Placeholder for a sub-address the device does not use.
    pub fn unused(address: u8) -> Self {
        ConfigEntry::new(0x0000, address, UNUSED, "Unused")
    }

    pub fn is_unused(&self) -> bool {
        self.name == UNUSED
    }

    /// Whether this entry produces a wire message under the given mode.
    pub fn is_emitted(&self, write_all: bool) -> bool {
        !self.is_unused() && (write_all || self.value != self.default_value)
    }
}

/// A named block of registers sharing one 8-bit block address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRegisterBlock {
    address: u8,
    name: String,
    entries: Vec<ConfigEntry>,
}

impl ConfigRegisterBlock {
    /// An empty block.
    pub fn new(address: u8, name: &str) -> Self {
        ConfigRegisterBlock {
            address,
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// A block populated from `entries`, validated as by [`add_entry`](Self::add_entry).
    pub fn with_entries(
        address: u8,
        name: &str,
        entries: impl IntoIterator<Item = ConfigEntry>,
    ) -> Result<Self> {
        let mut block = ConfigRegisterBlock::new(address, name);
        for entry in entries {
            block.add_entry(entry)?;
        }
        Ok(block)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entries in sub-address order.
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Insert an entry, keeping sub-address order.
    ///
    /// Fails if the block is full, the sub-address is out of range or
    /// already taken, or a non-`UNUSED` name is already present.
    pub fn add_entry(&mut self, entry: ConfigEntry) -> Result<()> {
        if usize::from(entry.address) >= MAX_ENTRIES {
            return Err(Error::InvalidParameter(format!(
                "sub-address {:#04x} of {} is outside block {}",
                entry.address, entry.name, self.name
            )));
        }
        if self.entries.len() >= MAX_ENTRIES {
            return Err(Error::InvalidParameter(format!(
                "block {} already holds {MAX_ENTRIES} entries",
                self.name
            )));
        }
        if self.entries.iter().any(|e| e.address == entry.address) {
            return Err(Error::InvalidParameter(format!(
                "sub-address {:#04x} already used in block {}",
                entry.address, self.name
            )));
        }
        if !entry.is_unused() && self.entries.iter().any(|e| e.name == entry.name) {
            return Err(Error::InvalidParameter(format!(
                "entry {} already exists in block {}",
                entry.name, self.name
            )));
        }

        let pos = self
            .entries
            .iter()
            .position(|e| e.address > entry.address)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_unused() && e.name.eq_ignore_ascii_case(name))
    }

    fn not_found(&self, name: &str) -> Error {
        Error::EntryNotFound {
            block: self.name.clone(),
            entry: name.to_string(),
        }
    }

    /// Look up an entry by name (ASCII case-insensitive).
    pub fn entry(&self, name: &str) -> Result<&ConfigEntry> {
        match self.position(name) {
            Some(i) => Ok(&self.entries[i]),
            None => Err(self.not_found(name)),
        }
    }

    pub fn entry_mut(&mut self, name: &str) -> Result<&mut ConfigEntry> {
        match self.position(name) {
            Some(i) => Ok(&mut self.entries[i]),
            None => Err(self.not_found(name)),
        }
    }

    /// Set the current value of the named entry.
    pub fn set(&mut self, name: &str, value: u16) -> Result<()> {
        self.entry_mut(name)?.value = value;
        Ok(())
    }

    /// Current value of the named entry.
    pub fn get(&self, name: &str) -> Result<u16> {
        Ok(self.entry(name)?.value)
    }

    /// Reset every entry to its default value.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.value = entry.default_value;
        }
    }

    /// Host-order wire words for this block.
    ///
    /// An entry is emitted when it is not `UNUSED` and either differs from
    /// its default or `write_all` is set.
    pub fn wire_messages(&self, write_all: bool) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| e.is_emitted(write_all))
            .map(|e| register_word(self.address, e.address, e.value))
            .collect()
    }

    /// Assign values from the section named after this block.
    ///
    /// Unknown keys and values outside `0..=0xFFFF` are skipped with a
    /// warning. Returns the number of entries assigned.
    pub fn load_ini(&mut self, source: &impl IniSource) -> usize {
        if !source.has_section(&self.name) {
            return 0;
        }

        let mut assigned = 0;
        for key in source.fields(&self.name) {
            let Some(i) = self.position(&key) else {
                tracing::warn!(block = %self.name, key = %key, "unknown register in INI file, skipped");
                continue;
            };
            let raw = source.get_integer(&self.name, &key);
            match raw.and_then(|v| u16::try_from(v).ok()) {
                Some(value) => {
                    self.entries[i].value = value;
                    assigned += 1;
                }
                None => {
                    tracing::warn!(
                        block = %self.name,
                        key = %key,
                        value = ?source.get(&self.name, &key),
                        "register value is not a 16-bit integer, skipped"
                    );
                }
            }
        }
        assigned
    }

    /// Write this block as an INI section.
    ///
    /// ```text
    /// [ADCConfigBlock]
    /// ;0x4 Number of skips to perform CDS over
    /// ADC_CDS_NSkips = 0x4
    /// ```
    pub fn write_ini(
        &self,
        out: &mut impl Write,
        write_all: bool,
        with_descriptions: bool,
    ) -> Result<()> {
        writeln!(out, "[{}]", self.name)?;
        for entry in self.entries.iter().filter(|e| e.is_emitted(write_all)) {
            if with_descriptions {
                writeln!(out, ";{:#x} {}", entry.address, entry.description)?;
            }
            writeln!(out, "{} = {:#x}", entry.name, entry.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::IniDocument;

    fn sample_block() -> ConfigRegisterBlock {
        ConfigRegisterBlock::with_entries(
            0x20,
            "ADCConfigBlock",
            [
                ConfigEntry::new(0x0004, 0x00, "ADC_Tap_Delays", "Tap delay"),
                ConfigEntry::unused(0x01),
                ConfigEntry::new(0x0001, 0x04, "ADC_CDS_NSkips", "Number of skips"),
                ConfigEntry::new(0x0000, 0x02, "ADC_Output_Config", "Output config"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn entries_sorted_by_sub_address() {
        let block = sample_block();
        let addrs: Vec<u8> = block.entries().iter().map(|e| e.address).collect();
        assert_eq!(addrs, vec![0x00, 0x01, 0x02, 0x04]);
    }

    #[test]
    fn no_messages_at_defaults() {
        assert!(sample_block().wire_messages(false).is_empty());
    }

    #[test]
    fn changed_entry_is_emitted() {
        let mut block = sample_block();
        block.set("ADC_CDS_NSkips", 4).unwrap();
        assert_eq!(block.wire_messages(false), vec![0x2004_0004]);
    }

    #[test]
    fn write_all_emits_everything_but_unused() {
        let block = sample_block();
        assert_eq!(
            block.wire_messages(true),
            vec![0x2000_0004, 0x2002_0000, 0x2004_0001]
        );
    }

    #[test]
    fn setting_back_to_default_removes_message() {
        let mut block = sample_block();
        block.set("ADC_CDS_NSkips", 4).unwrap();
        block.set("ADC_CDS_NSkips", 1).unwrap();
        assert!(block.wire_messages(false).is_empty());
    }

    #[test]
    fn unused_entries_cannot_be_looked_up() {
        let block = sample_block();
        assert!(matches!(
            block.entry(UNUSED),
            Err(Error::EntryNotFound { .. })
        ));
    }

    #[test]
    fn lookup_miss_names_block_and_entry() {
        let block = sample_block();
        match block.get("ADC_Bogus") {
            Err(Error::EntryNotFound { block, entry }) => {
                assert_eq!(block, "ADCConfigBlock");
                assert_eq!(entry, "ADC_Bogus");
            }
            other => panic!("expected EntryNotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_sub_address_rejected() {
        let mut block = sample_block();
        let result = block.add_entry(ConfigEntry::new(0, 0x04, "Other", ""));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut block = sample_block();
        let result = block.add_entry(ConfigEntry::new(0, 0x10, "ADC_CDS_NSkips", ""));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn sub_address_out_of_range_rejected() {
        let mut block = sample_block();
        let result = block.add_entry(ConfigEntry::new(0, 64, "TooFar", ""));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn full_block_rejects_more_entries() {
        let mut block = ConfigRegisterBlock::new(0x30, "Full");
        for addr in 0..64u8 {
            block.add_entry(ConfigEntry::unused(addr)).unwrap();
        }
        let result = block.add_entry(ConfigEntry::unused(0));
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn load_ini_assigns_known_keys() {
        let mut block = sample_block();
        let doc = IniDocument::parse("[ADCConfigBlock]\nadc_cds_nskips = 0x4\nADC_Tap_Delays = 7\n");
        assert_eq!(block.load_ini(&doc), 2);
        assert_eq!(block.get("ADC_CDS_NSkips").unwrap(), 4);
        assert_eq!(block.get("ADC_Tap_Delays").unwrap(), 7);
    }

    #[test]
    fn load_ini_skips_unknown_and_oversized() {
        let mut block = sample_block();
        let doc = IniDocument::parse(
            "[ADCConfigBlock]\nNotARegister = 1\nADC_CDS_NSkips = 0x10000\nADC_Tap_Delays = -1\nADC_Output_Config = junk\n",
        );
        assert_eq!(block.load_ini(&doc), 0);
        assert!(block.wire_messages(false).is_empty());
    }

    #[test]
    fn load_ini_ignores_other_sections() {
        let mut block = sample_block();
        let doc = IniDocument::parse("[SFP0ConfigBlock]\nADC_CDS_NSkips = 4\n");
        assert_eq!(block.load_ini(&doc), 0);
        assert_eq!(block.get("ADC_CDS_NSkips").unwrap(), 1);
    }

    #[test]
    fn write_ini_format() {
        let mut block = sample_block();
        block.set("ADC_CDS_NSkips", 4).unwrap();
        let mut out = Vec::new();
        block.write_ini(&mut out, false, true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[ADCConfigBlock]\n;0x4 Number of skips\nADC_CDS_NSkips = 0x4\n"
        );
    }

    #[test]
    fn write_ini_without_descriptions() {
        let block = sample_block();
        let mut out = Vec::new();
        block.write_ini(&mut out, true, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[ADCConfigBlock]\nADC_Tap_Delays = 0x4\nADC_Output_Config = 0x0\nADC_CDS_NSkips = 0x1\n"
        );
    }

    #[test]
    fn reset_restores_defaults() {
        let mut block = sample_block();
        block.set("ADC_Tap_Delays", 0x77).unwrap();
        block.reset();
        assert_eq!(block.get("ADC_Tap_Delays").unwrap(), 4);
    }
}
