//! Chip catalog and flash geometry for the AVR USB family the bootloader runs on.

use crate::error::{Error, Result};
use std::fmt;

const KIB: u32 = 1024;

/// Static description of one supported AVR part.
#[derive(Debug, PartialEq, Eq)]
pub struct ChipDescriptor {
    /// 6-bit identification code the bootloader reports.
    pub id: u8,

    /// Part number.
    pub name: &'static str,

    /// Total flash size in bytes, boot section included.
    pub flash_size: u32,

    /// EEPROM size in bytes.
    pub eeprom_size: u32,
}

/// All parts the bootloader can report.
static CHIPS: [ChipDescriptor; 10] = [
    ChipDescriptor { id: 0x00, name: "ATmega8U2", flash_size: 8 * KIB, eeprom_size: 512 },
    ChipDescriptor { id: 0x01, name: "ATmega16U2", flash_size: 16 * KIB, eeprom_size: 512 },
    ChipDescriptor { id: 0x02, name: "ATmega32U2", flash_size: 32 * KIB, eeprom_size: 1024 },
    ChipDescriptor { id: 0x03, name: "ATmega16U4", flash_size: 16 * KIB, eeprom_size: 512 },
    ChipDescriptor { id: 0x04, name: "ATmega32U4", flash_size: 32 * KIB, eeprom_size: 1024 },
    ChipDescriptor { id: 0x05, name: "ATmega32U6", flash_size: 32 * KIB, eeprom_size: 1024 },
    ChipDescriptor { id: 0x06, name: "AT90USB646", flash_size: 64 * KIB, eeprom_size: 2048 },
    ChipDescriptor { id: 0x07, name: "AT90USB647", flash_size: 64 * KIB, eeprom_size: 2048 },
    ChipDescriptor { id: 0x08, name: "AT90USB1286", flash_size: 128 * KIB, eeprom_size: 4096 },
    ChipDescriptor { id: 0x09, name: "AT90USB1287", flash_size: 128 * KIB, eeprom_size: 4096 },
];

/// Looks a chip up by the identification code from an INFO response.
pub(crate) fn find_chip(id: u8) -> Result<&'static ChipDescriptor> {
    CHIPS
        .iter()
        .find(|chip| chip.id == id)
        .ok_or(Error::UnknownChipId(id))
}

/// Boot section geometry, decoded from the BOOTSZ fuse bits the bootloader reports alongside the
/// chip id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Bytes of flash reserved for the bootloader at the top of flash.
    pub boot_size: u32,

    /// Erase/program granularity of the part's flash, in bytes.
    pub page_size: u32,
}

impl BootConfig {
    /// Decodes the 2-bit boot-size selector `b`. The reserved boot section is `512 * 2^(3-b)`
    /// bytes on parts with less than 64 KiB of flash and `1024 * 2^(3-b)` bytes on the larger
    /// ones; the flash page size is 128 or 256 bytes along the same threshold. This mirrors the
    /// family's documented self-programming fuse semantics and must not be changed.
    pub(crate) fn from_selector(flash_size: u32, selector: u8) -> Self {
        let multiplier = 1 << (3 - u32::from(selector & 0x03));
        if flash_size < 64 * KIB {
            BootConfig {
                boot_size: 512 * multiplier,
                page_size: 128,
            }
        } else {
            BootConfig {
                boot_size: 1024 * multiplier,
                page_size: 256,
            }
        }
    }
}

/// Information the bootloader reports back during identification.
#[derive(Debug)]
pub struct DeviceInfo {
    /// Bootloader firmware version.
    pub bootloader_version: u8,

    /// The identified part.
    pub chip: &'static ChipDescriptor,

    /// Boot section geometry decoded from the reported fuse bits.
    pub boot: BootConfig,
}

impl DeviceInfo {
    /// Decodes the version byte and the packed chip-id/boot-size status byte of an INFO
    /// response. The chip id sits in the low six bits, the boot-size selector in the top two.
    pub(crate) fn from_info(version: u8, status: u8) -> Result<Self> {
        let chip = find_chip(status & 0x3f)?;
        let boot = BootConfig::from_selector(chip.flash_size, status >> 6);
        Ok(DeviceInfo {
            bootloader_version: version,
            chip,
            boot,
        })
    }

    /// Bytes of flash available to the application. The programmable region is everything below
    /// the boot section; addresses at or above it belong to the bootloader.
    pub fn application_size(&self) -> u32 {
        self.chip.flash_size - self.boot.boot_size
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chip: {}", self.chip.name)?;
        writeln!(f, "Bootloader version: {}", self.bootloader_version)?;
        writeln!(f, "Flash size: {} KiB", self.chip.flash_size / KIB)?;
        writeln!(f, "EEPROM size: {} B", self.chip.eeprom_size)?;
        writeln!(f, "Flash page size: {} B", self.boot.page_size)?;
        writeln!(f, "Boot section size: {} B", self.boot.boot_size)?;
        writeln!(
            f,
            "Application flash size: {} B",
            self.application_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chip_id_is_rejected() {
        match find_chip(0x3f) {
            Err(Error::UnknownChipId(0x3f)) => {}
            other => panic!("expected unknown chip id, got {:?}", other),
        }
    }

    #[test]
    fn boot_size_selector_on_a_small_flash_part() {
        // ATmega32U4: 32 KiB of flash is below the 64 KiB threshold, so the boot section is
        // counted in 512-byte units and pages are 128 bytes.
        let flash_size = find_chip(0x04).unwrap().flash_size;

        let boot = BootConfig::from_selector(flash_size, 0b00);
        assert_eq!(boot.boot_size, 4096);
        assert_eq!(boot.page_size, 128);

        let boot = BootConfig::from_selector(flash_size, 0b11);
        assert_eq!(boot.boot_size, 512);
        assert_eq!(boot.page_size, 128);
    }

    #[test]
    fn boot_size_selector_on_a_large_flash_part() {
        // AT90USB1286: at or above 64 KiB the units double and pages are 256 bytes.
        let flash_size = find_chip(0x08).unwrap().flash_size;

        let boot = BootConfig::from_selector(flash_size, 0b00);
        assert_eq!(boot.boot_size, 8192);
        assert_eq!(boot.page_size, 256);

        let boot = BootConfig::from_selector(flash_size, 0b10);
        assert_eq!(boot.boot_size, 2048);
        assert_eq!(boot.page_size, 256);
    }

    #[test]
    fn info_status_byte_is_unpacked() {
        // Chip id in the low six bits, boot-size selector in the top two
        let info = DeviceInfo::from_info(7, 0x04 | (0b11 << 6)).unwrap();
        assert_eq!(info.bootloader_version, 7);
        assert_eq!(info.chip.name, "ATmega32U4");
        assert_eq!(info.boot.boot_size, 512);
        assert_eq!(info.application_size(), 32 * KIB - 512);
    }
}
