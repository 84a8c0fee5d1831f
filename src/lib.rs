//! This crate provides a way to interact with an AVR microcontroller running the kp_boot_32u4
//! bootloader connected via USB and exposes all bootloader functions.
//!
//! The bootloader enumerates as a HID device and is driven with fixed-size 64-byte reports. After
//! the identification exchange, the crate knows the attached chip's flash and EEPROM geometry and
//! maps a decoded Intel-HEX image onto exactly the flash pages it touches, leaving all other pages
//! alone.
//!
//! # Example: Basic flashing
//! ```rust, no_run
//! use kpboot::{Context, Operation, Segment};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Image segments as produced by an Intel-HEX decoder
//! let segments = vec![Segment {
//!     address: 0,
//!     data: vec![0x0c, 0x94, 0x56, 0x03],
//! }];
//!
//! // Find a bootloader target and identify the attached chip
//! let context = Context::new()?;
//! let mut target = context.pick_target(None)?.open(&context)?;
//!
//! println!("{}", target.device_info);
//!
//! // Program only the pages the image actually touches
//! target.write_flash_image(&segments)?.execute()?;
//!
//! // Restart into the freshly flashed application
//! target.reset()?;
//!
//! println!("Done!");
//! # Ok(())
//! # }
//! ```
//!
//! In addition to this very basic API, it also provides functionality for progress feedback during
//! operations like erasing and flashing. See the [`Operation`] trait for details.
//!
//! [`Operation`]: trait.Operation.html

mod chip;
mod context;
mod error;
mod image;
mod operation;
mod protocol;
mod target;
mod target_handle;
mod transport;

pub use chip::{BootConfig, ChipDescriptor, DeviceInfo};
pub use context::Context;
pub use error::{Error, Result};
pub use image::Segment;
pub use operation::{Erase, Operation, ProgramEeprom, ProgramFlash};
pub use protocol::{MAX_PAYLOAD, REPORT_SIZE};
pub use target::{Target, TargetInfo};
pub use transport::{Transport, UsbTransport};

/// USB vendor id the bootloader enumerates with.
pub const USB_VID: u16 = 0x6666;

/// USB product id the bootloader enumerates with.
pub const USB_PID: u16 = 0x9999;

/// Timeout for all usb transactions.
const TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);
