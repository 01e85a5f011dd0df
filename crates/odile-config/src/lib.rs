//! odile-config: the configuration register model of the ODILE board.
//!
//! Registers are named 16-bit values grouped into blocks. Each block has an
//! 8-bit address and each register a sub-address within its block. The
//! device is configured by streaming 32-bit words of the form
//! `[block:8][sub:8][value:16]` to its configuration port.
//!
//! # Key types
//!
//! - [`ConfigEntry`] -- one register with its default and description
//! - [`ConfigRegisterBlock`] -- a block of up to 64 registers
//! - [`ConfigBlockList`] -- all blocks, with INI load/save and ADC helpers
//! - [`ini::IniDocument`] -- the INI reader used for register files
//!
//! # Example
//!
//! ```
//! use odile_config::ConfigBlockList;
//!
//! let mut blocks = ConfigBlockList::default();
//! blocks.set_nskips(4).unwrap();
//! assert_eq!(blocks.master_message(false), vec![0x2004_0004]);
//! ```

pub mod defaults;
pub mod ini;
pub mod list;
pub mod register;

pub use ini::{IniDocument, IniSource};
pub use list::ConfigBlockList;
pub use register::{ConfigEntry, ConfigRegisterBlock};
