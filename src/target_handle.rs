use crate::chip::DeviceInfo;
use crate::error::{Error, Result};
use crate::protocol::{spm, Command, CommandPacket, MAX_PAYLOAD, REPORT_SIZE};
use crate::transport::Transport;
use log::{debug, trace};
use std::convert::TryFrom;

/// Session lifecycle. Once a reset has been issued the device side of the handle is gone, so the
/// local close must not touch the transport again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opened,
    Identified,
    ResetIssued,
}

/// Low-level bootloader session.
///
/// Owns the transport exclusively and performs one synchronous write followed by exactly one
/// blocking read per primitive; the device cannot accept a new command while a self-programming
/// operation is mid-sequence, so nothing is ever pipelined.
pub struct TargetHandle<T: Transport> {
    transport: T,
    state: State,
}

impl<T: Transport> TargetHandle<T> {
    pub(crate) fn new(transport: T) -> Self {
        TargetHandle {
            transport,
            state: State::Opened,
        }
    }

    /// Performs the INFO exchange and decodes the chip and its boot geometry. Runs exactly once,
    /// while the session is being constructed.
    pub(crate) fn identify(&mut self) -> Result<DeviceInfo> {
        let response = self.command(CommandPacket::bare(Command::Info))?;
        let info = DeviceInfo::from_info(response[1], response[2])?;
        self.state = State::Identified;
        Ok(info)
    }

    /// Erases the flash page containing `address` and re-enables the read-while-write section
    /// afterwards.
    pub(crate) fn erase_page(&mut self, address: u32) -> Result<()> {
        let address = wire_address(address, 0)?;
        self.command(CommandPacket {
            command: Command::Spm,
            address,
            action: spm::PAGE_ERASE,
            action2: spm::RWW_ENABLE,
            length: None,
            payload: &[],
        })?;
        Ok(())
    }

    /// Loads one chunk into the device's temporary page buffer. The buffer is keyed by absolute
    /// flash address, not by a buffer offset, so the address determines where within the page the
    /// chunk lands.
    fn fill_buffer(&mut self, address: u16, chunk: &[u8]) -> Result<()> {
        self.command(CommandPacket {
            command: Command::Spm,
            address,
            action: spm::BUFFER_FILL,
            action2: 0,
            length: None,
            payload: chunk,
        })?;
        Ok(())
    }

    /// Writes the temporary page buffer to the page containing `address`. Only after this commit
    /// does the buffered content become durable and the read-while-write restriction lift.
    fn commit_page(&mut self, address: u16) -> Result<()> {
        self.command(CommandPacket {
            command: Command::Spm,
            address,
            action: spm::PAGE_WRITE,
            action2: spm::RWW_ENABLE,
            length: None,
            payload: &[],
        })?;
        Ok(())
    }

    /// Full erase-fill-commit sequence for one page. `data` may be shorter than the page; the
    /// remainder stays erased. Each buffer fill waits for its acknowledgement before the next
    /// chunk goes out.
    pub(crate) fn program_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        debug!("programming {} bytes at {:#07x}", data.len(), address);
        let base = wire_address(address, data.len())?;
        self.erase_page(address)?;
        for (i, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            self.fill_buffer(base + (i * MAX_PAYLOAD) as u16, chunk)?;
        }
        self.commit_page(base)
    }

    /// Writes up to one report's worth of bytes to EEPROM.
    pub(crate) fn write_eeprom_chunk(&mut self, address: u32, chunk: &[u8]) -> Result<()> {
        let address = wire_address(address, chunk.len())?;
        self.command(CommandPacket {
            command: Command::WriteEeprom,
            address,
            action: 0,
            action2: 0,
            length: None,
            payload: chunk,
        })?;
        Ok(())
    }

    /// Writes the boot lock byte via the lock-set self-programming action.
    pub(crate) fn write_lock_bits(&mut self, value: u8) -> Result<()> {
        self.command(CommandPacket {
            command: Command::Spm,
            address: 0,
            action: spm::LOCK_WRITE,
            action2: 0,
            length: None,
            payload: &[value],
        })?;
        Ok(())
    }

    /// Resets the target. The device drops off the bus without answering, so nothing is read
    /// back and any later close is suppressed.
    pub(crate) fn reset(&mut self) -> Result<()> {
        debug!("resetting target");
        let report = CommandPacket::bare(Command::Reset).encode()?;
        self.transport.write(&report)?;
        self.state = State::ResetIssued;
        Ok(())
    }

    /// Releases the transport. A no-op once a reset has been issued; the far side of the handle
    /// no longer exists and closing it locally would only raise spurious errors.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state == State::ResetIssued {
            return Ok(());
        }
        self.transport.close()
    }

    /// Sends one command report and blocks for the device's response, validating the echoed
    /// command id before anything else of the response is interpreted.
    fn command(&mut self, packet: CommandPacket<'_>) -> Result<[u8; REPORT_SIZE]> {
        let expected = packet.command as u8;
        let report = packet.encode()?;
        trace!(
            "command {:#04x} at {:#06x}, {} payload bytes",
            expected,
            u16::from_le_bytes([report[1], report[2]]),
            packet.payload.len()
        );
        self.transport.write(&report)?;
        let response = self.transport.read()?;
        if response[0] != expected {
            return Err(Error::UnexpectedResponse {
                expected,
                actual: response[0],
            });
        }
        Ok(response)
    }
}

/// The packet address field is 16 bits wide; anything past it cannot be expressed on the wire
/// and is rejected rather than silently truncated.
fn wire_address(address: u32, length: usize) -> Result<u16> {
    u16::try_from(address).map_err(|_| Error::InvalidPageWrite { address, length })
}
