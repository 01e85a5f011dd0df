//! Compiled-in register tables for the ODILE board.
//!
//! All three Ethernet interfaces share one block layout and differ only in
//! their MAC, IP, TSE and UDP base values. The optical (SFP) and copper
//! (RJ45) interfaces need different TSE configurations.
//!
//! The TSE MDIO blocks configure the PHY by reading a register and writing
//! `(result & AND) | OR`. Only the extended control register is normally
//! touched.

use crate::register::{ConfigEntry, ConfigRegisterBlock};

pub const SFP0_BLOCK: &str = "SFP0ConfigBlock";
pub const SFP1_BLOCK: &str = "SFP1ConfigBlock";
pub const RJ45_BLOCK: &str = "RJ45ConfigBlock";
pub const SFP0_TSE_BLOCK: &str = "SFP0TSEConfigBlock";
pub const SFP1_TSE_BLOCK: &str = "SFP1TSEConfigBlock";
pub const RJ45_TSE_BLOCK: &str = "RJ45TSEConfigBlock";
pub const ADC_BLOCK: &str = "ADCConfigBlock";

pub const ADC_OUTPUT_CONFIG: &str = "ADC_Output_Config";
pub const ADC_CDS_NSKIPS: &str = "ADC_CDS_NSkips";
pub const ADC_CDS_NSAMPLES: &str = "ADC_CDS_NSamples";
pub const ADC_TRIGGER_SAMPLES: &str = "ADC_Trigger_Samples";

/// `ADC_Output_Config` bit selecting CDS output.
pub const ADC_OUTPUT_CDS: u16 = 0x0002;

/// Per-interface values of the Ethernet block.
struct EnetInterface {
    block: &'static str,
    address: u8,
    mac0: ConfigEntry,
    server_mac: [ConfigEntry; 3],
    ip0: ConfigEntry,
    server_ip0: ConfigEntry,
    tse0: ConfigEntry,
    udp: ConfigEntry,
}

fn sfp_server_mac() -> [ConfigEntry; 3] {
    [
        ConfigEntry::new(0x7434, 0x04, "SFP_ServerMAC0", "Mac address bits[15:0] for SFP0/1 interface"),
        ConfigEntry::new(0x1151, 0x05, "SFP_ServerMAC1", "Mac address bits[31:16] for SFP0/1 interface"),
        ConfigEntry::new(0x6CB3, 0x06, "SFP_ServerMAC2", "Mac address bits[47:32] for SFP0/1 interface"),
    ]
}

fn sfp_server_ip0() -> ConfigEntry {
    ConfigEntry::new(0x0001, 0x0A, "SFP_ServerIP0", "Server IP address bits [15:0] for SFP0/1 interfaces")
}

fn sfp_tse0() -> ConfigEntry {
    ConfigEntry::new(0x0058, 0x0C, "SFP_TSE0", "TSE configuration bits [15:0] for TSE MAC (SFP interface)")
}

fn enet_block(iface: EnetInterface) -> ConfigRegisterBlock {
    let [server_mac0, server_mac1, server_mac2] = iface.server_mac;
    let entries = [
        iface.mac0,
        ConfigEntry::new(0x2233, 0x01, "ENET_MAC1", "Mac address bits[31:16] for Ethernet interface"),
        ConfigEntry::new(0xEE11, 0x02, "ENET_MAC2", "Mac address bits[47:32] for Ethernet interface"),
        ConfigEntry::unused(0x03),
        server_mac0,
        server_mac1,
        server_mac2,
        ConfigEntry::unused(0x07),
        iface.ip0,
        ConfigEntry::new(0xC0A8, 0x09, "ENET_IP1", "IP address bits [31:16] for Ethernet interface"),
        iface.server_ip0,
        ConfigEntry::new(0xC0A8, 0x0B, "ENET_ServerIP1", "Server IP address bits [31:16] for Ethernet interface"),
        iface.tse0,
        ConfigEntry::new(0x0050, 0x0D, "ENET_TSE1", "TSE configuration bits [31:16] for TSE MAC"),
        iface.udp,
        ConfigEntry::unused(0x0F),
        ConfigEntry::new(0x0555, 0x10, "ENET_FIFO", "FIFO enable flags for Ethernet interfaces"),
        ConfigEntry::new(0x0000, 0x11, "ENET_CounterEnable", "Counter enable flags for Ethernet interface"),
        ConfigEntry::new(0x012C, 0x12, "ENET_PacketSize", "Packet size (in 32-bit words) for Ethernet interfaces"),
        ConfigEntry::unused(0x13),
        ConfigEntry::new(0x0007, 0x14, "ENET_HeaderConfig", "Ethernet header configuration"),
        ConfigEntry::unused(0x15),
    ];
    build(iface.address, iface.block, entries)
}

fn tse_block(address: u8, name: &str) -> ConfigRegisterBlock {
    // Register tables shipped with older firmware give each OR/AND pair one
    // shared name; the suffixes keep lookups by name unambiguous.
    let entries = [
        ConfigEntry::new(0x0140, 0x00, "TSE_MDIO_Ctrl0_OR", "MDIO Control Register OR bits"),
        ConfigEntry::new(0x937F, 0x01, "TSE_MDIO_Ctrl0_AND", "MDIO Control Register AND bits"),
        ConfigEntry::new(0x0000, 0x02, "TSE_MDIO_AN_OR", "MDIO Autonegotiation register OR bits"),
        ConfigEntry::new(0xFC1F, 0x03, "TSE_MDIO_AN_AND", "MDIO Autonegotiation register AND bits"),
        ConfigEntry::new(0x0000, 0x04, "TSE_MDIO_1000BASE_OR", "MDIO 1000BASE Register OR bits"),
        ConfigEntry::new(0xFFFF, 0x05, "TSE_MDIO_1000BASE_AND", "MDIO 1000BASE Register AND bits"),
        ConfigEntry::new(0xC000, 0x06, "TSE_MDIO_PHYCtrl_OR", "MDIO PHY Control Register OR bits"),
        ConfigEntry::new(0xFFFF, 0x07, "TSE_MDIO_PHYCtrl_AND", "MDIO PHY Control Register AND bits"),
        ConfigEntry::new(0x0004, 0x08, "TSE_MDIO_ExtPHYStat_OR", "MDIO Extended PHY Status Register OR bits"),
        ConfigEntry::new(0xFFF4, 0x09, "TSE_MDIO_ExtPHYStat_AND", "MDIO Extended PHY Status Register AND bits"),
        ConfigEntry::new(0x0000, 0x0A, "TSE_MDIO_ExtPHYCtrl_OR", "MDIO Extended PHY Control Register OR bits"),
        ConfigEntry::new(0xFFFF, 0x0B, "TSE_MDIO_ExtPHYCtrl_AND", "MDIO Extended PHY Control Register AND bits"),
        ConfigEntry::new(0x03D8, 0x0C, "TSE_MDIO_ResetCycles0", "Clock cycles (bits [15:0]) to wait during a HW reset"),
        ConfigEntry::new(0x0000, 0x0D, "TSE_MDIO_ResetCycles1", "Clock cycles (bits [31:16]) to wait during a HW reset"),
        // Older firmware decodes the wait cycles at 0x0C/0x0D, on top of the
        // reset cycles. These sub-addresses do not match that firmware.
        ConfigEntry::new(
            0x4240,
            0x0E,
            "TSE_MDIO_WaitCycles0",
            "Clock cycles (bits [15:0]) to wait after a HW reset before configuring the PHY",
        ),
        ConfigEntry::new(
            0x000F,
            0x0F,
            "TSE_MDIO_WaitCycles1",
            "Clock cycles (bits [31:16]) to wait after a HW reset before configuring the PHY",
        ),
    ];
    build(address, name, entries)
}

fn adc_block() -> ConfigRegisterBlock {
    let entries = [
        ConfigEntry::new(
            0x0004,
            0x00,
            "ADC_Tap_Delays",
            "Tap delay for the 20-bit 1.6 Msps ADCs. Bits [2:0] set input tap delay, bits [6:4] control output tap delay, bits [11:8] control LVDS tap delay for CDS module",
        ),
        ConfigEntry::new(
            0x0000,
            0x02,
            ADC_OUTPUT_CONFIG,
            "Output config for the 20-bit ADCs. [0] LVDS, [1] CDS, [2] integral mode, [3] trigger mode",
        ),
        ConfigEntry::new(0x0001, 0x04, ADC_CDS_NSKIPS, "Number of skips to perform CDS over"),
        ConfigEntry::new(
            0x0001,
            0x05,
            "ADC_CDS_Config",
            "Config for CDS block (bit 0 controls output average if hi, output sum of pixels if low)",
        ),
        ConfigEntry::new(0x0001, 0x06, ADC_CDS_NSAMPLES, "Number of samples to read in integral mode"),
        ConfigEntry::new(0x0000, 0x07, ADC_TRIGGER_SAMPLES, "Number of samples to read per trigger in triggered mode"),
        ConfigEntry::new(0x0000, 0x08, "ADC_Trigger_Delay", "Number of 100 MHz clock cycles to wait before starting CNVST"),
        ConfigEntry::new(0x0001, 0x09, "ADC_Data_Multiplier", "Multiplier to apply to ADC data before CDS module"),
    ];
    build(0x20, ADC_BLOCK, entries)
}

// Every table above has distinct sub-addresses and names below 64 entries,
// which the tests in this module pin down.
fn build<const N: usize>(address: u8, name: &str, entries: [ConfigEntry; N]) -> ConfigRegisterBlock {
    let mut block = ConfigRegisterBlock::new(address, name);
    for entry in entries {
        if let Err(e) = block.add_entry(entry) {
            tracing::error!(block = name, error = %e, "invalid compiled-in register table");
        }
    }
    block
}

/// The ODILE blocks, in wire order.
pub fn odile_blocks() -> Vec<ConfigRegisterBlock> {
    vec![
        enet_block(EnetInterface {
            block: SFP0_BLOCK,
            address: 0x10,
            mac0: ConfigEntry::new(0x4455, 0x00, "SFP0_MAC0", "Mac address bits[15:0] for SFP0 interface"),
            server_mac: sfp_server_mac(),
            ip0: ConfigEntry::new(0x0003, 0x08, "SFP_IP0", "IP address bits [15:0] for SFP interface"),
            server_ip0: sfp_server_ip0(),
            tse0: sfp_tse0(),
            udp: ConfigEntry::new(0x1000, 0x0E, "SFP0_UDP", "Base UDP address for SFP0 interface"),
        }),
        enet_block(EnetInterface {
            block: SFP1_BLOCK,
            address: 0x11,
            mac0: ConfigEntry::new(0x4456, 0x00, "SFP1_MAC0", "Mac address bits[15:0] for SFP1 interface"),
            server_mac: sfp_server_mac(),
            ip0: ConfigEntry::new(0x0004, 0x08, "SFP_IP0", "IP address bits [15:0] for SFP interface"),
            server_ip0: sfp_server_ip0(),
            tse0: sfp_tse0(),
            udp: ConfigEntry::new(0x1100, 0x0E, "SFP1_UDP", "Base UDP address for SFP1 interface"),
        }),
        enet_block(EnetInterface {
            block: RJ45_BLOCK,
            address: 0x12,
            mac0: ConfigEntry::new(0x4457, 0x00, "RJ45_MAC0", "Mac address bits[15:0] for RJ45 interface"),
            server_mac: [
                ConfigEntry::new(0x0275, 0x04, "RJ45_ServerMAC0", "Server Mac address bits[15:0] for RJ45 interface"),
                ConfigEntry::new(0x0C22, 0x05, "RJ45_ServerMAC1", "Server Mac address bits[31:16] for RJ45 interface"),
                ConfigEntry::new(0x000E, 0x06, "RJ45_ServerMAC2", "Server Mac address bits[47:32] for RJ45 interface"),
            ],
            ip0: ConfigEntry::new(0x0105, 0x08, "RJ45_IP0", "IP address bits [15:0] for RJ45 interface"),
            server_ip0: ConfigEntry::new(0x0101, 0x0A, "RJ45_ServerIP0", "Server IP address bits [15:0] for RJ45 interface"),
            tse0: ConfigEntry::new(0x00D8, 0x0C, "RJ45_TSE0", "TSE configuration bits [15:0] for TSE MAC (RJ45 interface)"),
            udp: ConfigEntry::new(0x1200, 0x0E, "RJ45_UDP", "Base UDP address for RJ45 interface"),
        }),
        tse_block(0x13, SFP0_TSE_BLOCK),
        tse_block(0x14, SFP1_TSE_BLOCK),
        tse_block(0x15, RJ45_TSE_BLOCK),
        adc_block(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_order_and_addresses() {
        let blocks = odile_blocks();
        let layout: Vec<(&str, u8)> = blocks.iter().map(|b| (b.name(), b.address())).collect();
        assert_eq!(
            layout,
            vec![
                (SFP0_BLOCK, 0x10),
                (SFP1_BLOCK, 0x11),
                (RJ45_BLOCK, 0x12),
                (SFP0_TSE_BLOCK, 0x13),
                (SFP1_TSE_BLOCK, 0x14),
                (RJ45_TSE_BLOCK, 0x15),
                (ADC_BLOCK, 0x20),
            ]
        );
    }

    #[test]
    fn tables_are_complete() {
        let blocks = odile_blocks();
        let counts: Vec<usize> = blocks.iter().map(|b| b.entries().len()).collect();
        assert_eq!(counts, vec![22, 22, 22, 16, 16, 16, 8]);
    }

    #[test]
    fn enet_unused_slots() {
        let blocks = odile_blocks();
        let unused: Vec<u8> = blocks[0]
            .entries()
            .iter()
            .filter(|e| e.is_unused())
            .map(|e| e.address)
            .collect();
        assert_eq!(unused, vec![0x03, 0x07, 0x0F, 0x13, 0x15]);
    }

    #[test]
    fn interfaces_differ_where_expected() {
        let blocks = odile_blocks();
        assert_eq!(blocks[0].get("SFP0_MAC0").unwrap(), 0x4455);
        assert_eq!(blocks[1].get("SFP1_MAC0").unwrap(), 0x4456);
        assert_eq!(blocks[2].get("RJ45_MAC0").unwrap(), 0x4457);
        assert_eq!(blocks[0].get("SFP_IP0").unwrap(), 0x0003);
        assert_eq!(blocks[1].get("SFP_IP0").unwrap(), 0x0004);
        assert_eq!(blocks[2].get("RJ45_TSE0").unwrap(), 0x00D8);
        assert_eq!(blocks[1].get("SFP1_UDP").unwrap(), 0x1100);
    }

    #[test]
    fn tse_wait_cycles_follow_reset_cycles() {
        let blocks = odile_blocks();
        let tse = &blocks[3];
        assert_eq!(tse.entry("TSE_MDIO_WaitCycles0").unwrap().address, 0x0E);
        assert_eq!(tse.entry("TSE_MDIO_WaitCycles1").unwrap().address, 0x0F);
        assert_eq!(tse.get("TSE_MDIO_ExtPHYStat_AND").unwrap(), 0xFFF4);
    }

    #[test]
    fn adc_defaults() {
        let blocks = odile_blocks();
        let adc = &blocks[6];
        assert_eq!(adc.get(ADC_CDS_NSKIPS).unwrap(), 1);
        assert_eq!(adc.get(ADC_OUTPUT_CONFIG).unwrap(), 0);
        assert_eq!(adc.get("ADC_Data_Multiplier").unwrap(), 1);
    }
}
