//! The ordered collection of all register blocks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use odile_core::error::{Error, Result};

use crate::defaults::{
    ADC_BLOCK, ADC_CDS_NSAMPLES, ADC_CDS_NSKIPS, ADC_OUTPUT_CDS, ADC_OUTPUT_CONFIG,
    ADC_TRIGGER_SAMPLES, odile_blocks,
};
use crate::ini::{IniDocument, IniSource};
use crate::register::{ConfigEntry, ConfigRegisterBlock};

/// Every configuration block of the board, in wire order.
///
/// The master message is the concatenation of each block's wire messages.
/// `Default` builds the compiled-in ODILE tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlockList {
    blocks: Vec<ConfigRegisterBlock>,
}

impl Default for ConfigBlockList {
    fn default() -> Self {
        ConfigBlockList {
            blocks: odile_blocks(),
        }
    }
}

impl ConfigBlockList {
    /// Build a list from explicit blocks. Block names must be unique.
    pub fn new(blocks: Vec<ConfigRegisterBlock>) -> Result<Self> {
        for (i, block) in blocks.iter().enumerate() {
            if blocks[..i].iter().any(|b| b.name() == block.name()) {
                return Err(Error::InvalidParameter(format!(
                    "duplicate configuration block {}",
                    block.name()
                )));
            }
        }
        Ok(ConfigBlockList { blocks })
    }

    /// The default tables with values from an INI file applied.
    ///
    /// A malformed line is reported as [`Error::ConfigParse`]; use
    /// [`load_ini_file`](Self::load_ini_file) to apply a partially valid file.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut list = ConfigBlockList::default();
        let line = list.load_ini_file(path)?;
        if line != 0 {
            return Err(Error::ConfigParse { line });
        }
        Ok(list)
    }

    pub fn blocks(&self) -> &[ConfigRegisterBlock] {
        &self.blocks
    }

    pub fn block(&self, name: &str) -> Result<&ConfigRegisterBlock> {
        self.blocks
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| Error::BlockNotFound(name.to_string()))
    }

    pub fn block_mut(&mut self, name: &str) -> Result<&mut ConfigRegisterBlock> {
        self.blocks
            .iter_mut()
            .find(|b| b.name() == name)
            .ok_or_else(|| Error::BlockNotFound(name.to_string()))
    }

    pub fn entry(&self, block: &str, entry: &str) -> Result<&ConfigEntry> {
        self.block(block)?.entry(entry)
    }

    pub fn entry_mut(&mut self, block: &str, entry: &str) -> Result<&mut ConfigEntry> {
        self.block_mut(block)?.entry_mut(entry)
    }

    /// Set one register value.
    pub fn set(&mut self, block: &str, entry: &str, value: u16) -> Result<()> {
        self.block_mut(block)?.set(entry, value)
    }

    /// Read one register value.
    pub fn get(&self, block: &str, entry: &str) -> Result<u16> {
        self.block(block)?.get(entry)
    }

    /// Reset every register to its default.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.reset();
        }
    }

    /// All wire words, block by block, in host order.
    pub fn master_message(&self, write_all: bool) -> Vec<u32> {
        self.blocks
            .iter()
            .flat_map(|b| b.wire_messages(write_all))
            .collect()
    }

    /// Apply values from parsed INI data.
    ///
    /// Returns the source's parse-error line (0 when clean). Values from
    /// well-formed lines are applied either way.
    pub fn load_ini(&mut self, source: &impl IniSource) -> usize {
        let mut assigned = 0;
        for block in &mut self.blocks {
            assigned += block.load_ini(source);
        }
        let line = source.parse_error();
        tracing::debug!(assigned, parse_error = line, "loaded register values");
        line
    }

    /// Read and apply an INI file. Returns the parse-error line.
    pub fn load_ini_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let doc = IniDocument::load(path.as_ref())?;
        let line = self.load_ini(&doc);
        if line != 0 {
            tracing::warn!(path = %path.as_ref().display(), line, "INI parse error");
        }
        Ok(line)
    }

    /// Write every block as INI text.
    pub fn write_ini(
        &self,
        out: &mut impl Write,
        write_all: bool,
        with_descriptions: bool,
    ) -> Result<()> {
        for block in &self.blocks {
            block.write_ini(out, write_all, with_descriptions)?;
        }
        Ok(())
    }

    /// Write every entry, with descriptions, to a file.
    pub fn write_ini_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_ini(&mut out, true, true)?;
        out.flush()?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // ADC helpers
    // -----------------------------------------------------------------

    /// Number of skips for skipper readout, independent of any INI file.
    pub fn set_nskips(&mut self, nskips: u16) -> Result<()> {
        self.set(ADC_BLOCK, ADC_CDS_NSKIPS, nskips)
    }

    /// ADC samples per integration window in integral mode.
    pub fn set_nsamples(&mut self, nsamples: u16) -> Result<()> {
        self.set(ADC_BLOCK, ADC_CDS_NSAMPLES, nsamples)
    }

    /// ADC samples per trigger.
    pub fn set_trigger_samples(&mut self, nsamples: u16) -> Result<()> {
        self.set(ADC_BLOCK, ADC_TRIGGER_SAMPLES, nsamples)
    }

    /// Number of data words a readout of `nrows` x `ncols` pixels produces
    /// under the current ADC settings.
    ///
    /// Without on-device averaging (`ADC_CDS_NSkips == 1`) every skip is a
    /// separate word. Outside CDS mode each pixel yields
    /// `2 * ADC_Trigger_Samples` raw samples.
    pub fn words_to_read(&self, nrows: u64, ncols: u64, nskips: u64) -> Result<u64> {
        let adc = self.block(ADC_BLOCK)?;
        let mut words = nrows * ncols;

        if adc.get(ADC_CDS_NSKIPS)? == 1 && nskips > 1 {
            words *= nskips;
        }
        if adc.get(ADC_OUTPUT_CONFIG)? & ADC_OUTPUT_CDS == 0 {
            words *= 2 * u64::from(adc.get(ADC_TRIGGER_SAMPLES)?);
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{RJ45_TSE_BLOCK, SFP0_BLOCK};

    #[test]
    fn defaults_emit_nothing_without_write_all() {
        assert!(ConfigBlockList::default().master_message(false).is_empty());
    }

    #[test]
    fn nskips_change_yields_single_word() {
        let mut list = ConfigBlockList::default();
        list.set_nskips(4).unwrap();
        assert_eq!(list.master_message(false), vec![(0x20 << 24) | (0x04 << 16) | 4]);
    }

    #[test]
    fn write_all_skips_unused_entries() {
        let list = ConfigBlockList::default();
        let message = list.master_message(true);
        // 17 live entries per Ethernet block, 16 per TSE block, 8 ADC.
        assert_eq!(message.len(), 3 * 17 + 3 * 16 + 8);
        for unused_sub in [0x03u32, 0x07, 0x0F, 0x13, 0x15] {
            assert!(
                !message
                    .iter()
                    .any(|w| w >> 24 == 0x10 && (w >> 16) & 0xFF == unused_sub)
            );
        }
    }

    #[test]
    fn master_message_follows_block_order() {
        let mut list = ConfigBlockList::default();
        list.set(RJ45_TSE_BLOCK, "TSE_MDIO_AN_OR", 0x0010).unwrap();
        list.set(SFP0_BLOCK, "ENET_PacketSize", 0x0100).unwrap();
        assert_eq!(
            list.master_message(false),
            vec![0x1012_0100, 0x1502_0010]
        );
    }

    #[test]
    fn unknown_block_and_entry() {
        let list = ConfigBlockList::default();
        assert!(matches!(list.block("Nope"), Err(Error::BlockNotFound(_))));
        assert!(matches!(
            list.entry(ADC_BLOCK, "Nope"),
            Err(Error::EntryNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_block_names_rejected() {
        let a = ConfigRegisterBlock::new(0x01, "Dup");
        let b = ConfigRegisterBlock::new(0x02, "Dup");
        assert!(matches!(
            ConfigBlockList::new(vec![a, b]),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn words_to_read_cds_without_averaging() {
        let mut list = ConfigBlockList::default();
        list.set(ADC_BLOCK, ADC_OUTPUT_CONFIG, ADC_OUTPUT_CDS).unwrap();
        assert_eq!(list.words_to_read(100, 10, 4).unwrap(), 4000);
    }

    #[test]
    fn words_to_read_with_averaging() {
        let mut list = ConfigBlockList::default();
        list.set(ADC_BLOCK, ADC_OUTPUT_CONFIG, ADC_OUTPUT_CDS).unwrap();
        list.set_nskips(4).unwrap();
        assert_eq!(list.words_to_read(100, 10, 4).unwrap(), 1000);
    }

    #[test]
    fn words_to_read_raw_samples() {
        let mut list = ConfigBlockList::default();
        list.set_trigger_samples(3).unwrap();
        assert_eq!(list.words_to_read(10, 10, 1).unwrap(), 600);
    }

    #[test]
    fn setters_touch_adc_block() {
        let mut list = ConfigBlockList::default();
        list.set_nsamples(8).unwrap();
        list.set_trigger_samples(2).unwrap();
        assert_eq!(list.get(ADC_BLOCK, ADC_CDS_NSAMPLES).unwrap(), 8);
        assert_eq!(list.get(ADC_BLOCK, ADC_TRIGGER_SAMPLES).unwrap(), 2);
    }

    #[test]
    fn ini_round_trip_reproduces_full_message() {
        let mut original = ConfigBlockList::default();
        original.set_nskips(16).unwrap();
        original.set(SFP0_BLOCK, "SFP0_UDP", 0x1010).unwrap();

        let mut text = Vec::new();
        original.write_ini(&mut text, true, true).unwrap();
        let doc = IniDocument::parse(std::str::from_utf8(&text).unwrap());
        assert_eq!(doc.parse_error(), 0);

        let mut restored = ConfigBlockList::default();
        assert_eq!(restored.load_ini(&doc), 0);
        assert_eq!(restored.master_message(true), original.master_message(true));
        assert_eq!(restored.master_message(false), original.master_message(false));
    }

    #[test]
    fn shared_entry_names_stay_per_block() {
        let mut list = ConfigBlockList::default();
        let doc = IniDocument::parse("[SFP1ConfigBlock]\nSFP_IP0 = 0x0009\n");
        list.load_ini(&doc);
        assert_eq!(list.get(SFP0_BLOCK, "SFP_IP0").unwrap(), 0x0003);
        assert_eq!(list.get("SFP1ConfigBlock", "SFP_IP0").unwrap(), 0x0009);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.ini");

        let mut list = ConfigBlockList::default();
        list.set_nskips(4).unwrap();
        list.write_ini_file(&path).unwrap();

        let restored = ConfigBlockList::from_ini_file(&path).unwrap();
        assert_eq!(restored.master_message(false), vec![0x2004_0004]);
    }

    #[test]
    fn from_ini_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ini");
        std::fs::write(&path, "[ADCConfigBlock]\nADC_CDS_NSkips = 4\ngarbage\n").unwrap();

        assert!(matches!(
            ConfigBlockList::from_ini_file(&path),
            Err(Error::ConfigParse { line: 3 })
        ));

        let mut list = ConfigBlockList::default();
        assert_eq!(list.load_ini_file(&path).unwrap(), 3);
        assert_eq!(list.get(ADC_BLOCK, ADC_CDS_NSKIPS).unwrap(), 4);
    }
}
