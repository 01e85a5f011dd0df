//! odile-test-harness: test utilities for the ODILE host controller.
//!
//! This crate provides [`MockDevice`], an in-memory board that speaks the
//! command, firmware and configuration ports, for deterministic testing of
//! the command protocol and flash programming without hardware.

pub mod mock_device;

pub use mock_device::{MockDevice, ReceivedCommand};
