//! Wire protocol of the kp_boot_32u4 bootloader: command ids, self-programming action bits and
//! the fixed 64-byte command report layout.

use crate::error::{Error, Result};

/// Size of a single HID report exchanged with the bootloader.
pub const REPORT_SIZE: usize = 64;

/// Size of the fixed header at the start of every command report.
pub(crate) const HEADER_SIZE: usize = 6;

/// Maximum payload a single command report can carry after the header.
pub const MAX_PAYLOAD: usize = REPORT_SIZE - HEADER_SIZE;

/// Commands understood by the kp_boot_32u4 bootloader. The first byte of every response echoes
/// the command id it acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Query the bootloader version alone. The INFO response carries the same byte, so this
    /// command is never issued by this crate.
    #[allow(dead_code)]
    Version = 0x00,

    /// Query bootloader version, chip id and boot-size fuse bits.
    Info = 0x01,

    /// Reserved on the device side.
    #[allow(dead_code)]
    Erase = 0x02,

    /// Self-programming operation; the action byte selects erase, buffer fill, page write or
    /// lock-bit write.
    Spm = 0x03,

    /// Write the payload to EEPROM at the packet address.
    WriteEeprom = 0x04,

    /// Reset the microcontroller. The device disconnects without answering.
    Reset = 0x05,
}

/// Self-programming action bits, mirroring the layout of the AVR SPMCSR register. The packet's
/// primary action byte runs first; the second action byte runs after the operation completes,
/// which is how the read-while-write section gets re-enabled.
pub(crate) mod spm {
    /// Executes the store-program-memory operation selected by the other bits.
    pub const SPMEN: u8 = 1 << 0;
    /// Page erase.
    pub const PGERS: u8 = 1 << 1;
    /// Page write from the temporary buffer.
    pub const PGWRT: u8 = 1 << 2;
    /// Boot lock bit set.
    pub const BLBSET: u8 = 1 << 3;
    /// Read-while-write section re-enable.
    pub const RWWSRE: u8 = 1 << 4;

    /// Load payload words into the temporary page buffer.
    pub const BUFFER_FILL: u8 = SPMEN;
    /// Erase the page containing the packet address.
    pub const PAGE_ERASE: u8 = PGERS | SPMEN;
    /// Write the temporary page buffer to the page containing the packet address.
    pub const PAGE_WRITE: u8 = PGWRT | SPMEN;
    /// Re-enable the read-while-write section after an erase or page write.
    pub const RWW_ENABLE: u8 = RWWSRE | SPMEN;
    /// Write the payload byte to the boot lock bits.
    pub const LOCK_WRITE: u8 = BLBSET | SPMEN;
}

/// A single command report before encoding.
///
/// Layout on the wire: command id, 16-bit little-endian address, action byte, second action byte,
/// end offset (header size plus effective payload length, telling the device where to stop
/// repeating its write micro-operation), then the payload.
pub(crate) struct CommandPacket<'p> {
    pub command: Command,
    pub address: u16,
    pub action: u8,
    pub action2: u8,
    /// Overrides the payload length declared in the end-offset field. `None` declares the actual
    /// payload length.
    pub length: Option<u8>,
    pub payload: &'p [u8],
}

impl CommandPacket<'_> {
    /// A packet with no payload and no action bits, as used by the query commands.
    pub fn bare(command: Command) -> Self {
        CommandPacket {
            command,
            address: 0,
            action: 0,
            action2: 0,
            length: None,
            payload: &[],
        }
    }

    /// Encodes the packet into one full-size report. Unused trailing bytes are set to 0xff, the
    /// erased-flash value, so that a partially filled page buffer does not program unintended
    /// bits on chips which expect a full-size block.
    pub fn encode(&self) -> Result<[u8; REPORT_SIZE]> {
        if self.address % 2 != 0 {
            return Err(Error::AddressNotWordAligned(u32::from(self.address)));
        }
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(self.payload.len()));
        }

        let length = self.length.unwrap_or(self.payload.len() as u8);
        // The end-offset field declares header + length and must fit the report
        if usize::from(length) > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(usize::from(length)));
        }
        let mut report = [0xffu8; REPORT_SIZE];
        report[0] = self.command as u8;
        report[1..3].copy_from_slice(&self.address.to_le_bytes());
        report[3] = self.action;
        report[4] = self.action2;
        report[5] = HEADER_SIZE as u8 + length;
        report[HEADER_SIZE..HEADER_SIZE + self.payload.len()].copy_from_slice(self.payload);
        Ok(report)
    }
}
