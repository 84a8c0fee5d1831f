use crate::chip::DeviceInfo;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::{self, Segment};
use crate::operation::{Erase, ProgramEeprom, ProgramFlash};
use crate::protocol::MAX_PAYLOAD;
use crate::target_handle::TargetHandle;
use crate::transport::{get_serial, Transport, UsbTransport};
use log::debug;
use rusb::UsbContext;

/// Contains necessary information to connect to a target via USB.
pub struct TargetInfo {
    /// USB bus ID the target is connected to.
    pub usb_bus_number: u8,

    /// USB device address of the target.
    pub usb_bus_address: u8,

    /// Serial number string the target reported via its USB descriptor.
    pub serial: String,
}

impl TargetInfo {
    /// Connects to a target and identifies the attached chip. Fails if the USB device is not a
    /// valid kp_boot target.
    pub fn open(&self, context: &Context) -> Result<Target<UsbTransport>> {
        for device in context.usb_context().devices()?.iter() {
            if device.bus_number() == self.usb_bus_number
                && device.address() == self.usb_bus_address
            {
                // get_serial() fails if the device is unsupported. This check ensures that we
                // don't send commands to some entirely different device (e.g. if bus number and
                // address have been determined by something else than Context::find_targets() or
                // there was a reenumeration between its call and a call of open()).
                match get_serial(&device) {
                    Ok(ref serial) if serial == &self.serial => {
                        let transport = UsbTransport::from_usb_device(device)?;
                        return Target::open(transport);
                    }
                    Ok(_) => return Err(Error::TargetNotFound),
                    Err(e) => return Err(e),
                }
            }
        }
        Err(Error::TargetNotFound)
    }
}

/// An identified bootloader session.
///
/// Owns the low-level handle and knows the chip's geometry, so every request is checked against
/// the application flash region or the EEPROM size before anything goes on the wire.
pub struct Target<T: Transport> {
    /// Handle for the low-level communication.
    handle: TargetHandle<T>,

    /// Chip and boot section geometry reported during identification.
    pub device_info: DeviceInfo,
}

impl<T: Transport> Target<T> {
    /// Performs the identification exchange on a freshly opened transport and builds a session
    /// around it.
    pub fn open(transport: T) -> Result<Self> {
        let mut handle = TargetHandle::new(transport);
        let device_info = handle.identify()?;
        debug!(
            "identified {} (bootloader version {}, {} B application flash)",
            device_info.chip.name,
            device_info.bootloader_version,
            device_info.application_size()
        );
        Ok(Target {
            handle,
            device_info,
        })
    }

    /// Erases a single application flash page.
    pub fn erase_page(&mut self, address: u32) -> Result<()> {
        self.check_page(address, 0)?;
        self.handle.erase_page(address)
    }

    /// Writes one flash page: erase, chunk-wise buffer fill, commit. `data` may be shorter than
    /// a full page; the remainder of the page stays erased.
    pub fn write_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_page(address, data.len())?;
        self.handle.program_page(address, data)
    }

    /// Erases every page of the application flash region unconditionally, as preparation for a
    /// fresh full-image program pass.
    pub fn erase_application(&mut self) -> Erase<'_, T> {
        let application_size = self.device_info.application_size();
        let page_size = self.device_info.boot.page_size;
        Erase::application(&mut self.handle, application_size, page_size)
    }

    /// Programs a decoded firmware image into application flash. Only the pages the image
    /// touches are erased and written; everything else is left exactly as it was.
    pub fn write_flash_image(&mut self, segments: &[Segment]) -> Result<ProgramFlash<'_, T>> {
        let application_size = self.device_info.application_size();
        let page_size = self.device_info.boot.page_size;
        image::check_flash_bounds(segments, application_size)?;

        let pages = image::used_pages(segments, application_size, page_size)
            .into_iter()
            .map(|address| (address, image::extract_page(segments, address, page_size)))
            .collect();
        Ok(ProgramFlash::new(&mut self.handle, pages))
    }

    /// Writes a buffer to the target's EEPROM.
    pub fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<()> {
        image::check_eeprom_bounds(address, data.len(), self.device_info.chip.eeprom_size)?;
        for (i, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            self.handle
                .write_eeprom_chunk(address + (i * MAX_PAYLOAD) as u32, chunk)?;
        }
        Ok(())
    }

    /// Programs a decoded EEPROM image. Segments are written exactly as given; EEPROM is
    /// byte-addressable, so no page mapping is involved.
    pub fn write_eeprom_image(&mut self, segments: &[Segment]) -> Result<ProgramEeprom<'_, T>> {
        let eeprom_size = self.device_info.chip.eeprom_size;
        for segment in segments {
            image::check_eeprom_bounds(segment.address, segment.data.len(), eeprom_size)?;
        }
        Ok(ProgramEeprom::new(&mut self.handle, image::eeprom_chunks(segments)))
    }

    /// Writes the boot lock byte.
    pub fn write_lock_bits(&mut self, value: u8) -> Result<()> {
        self.handle.write_lock_bits(value)
    }

    /// Resets the target out of the bootloader and into the application. The device drops off
    /// the bus immediately, so the session ends here and no local close follows.
    pub fn reset(mut self) -> Result<()> {
        self.handle.reset()
    }

    /// Ends the session and releases the transport.
    pub fn close(mut self) -> Result<()> {
        self.handle.close()
    }

    /// A page write must start on a page boundary, fit within one page and lie entirely inside
    /// the application flash region.
    fn check_page(&self, address: u32, length: usize) -> Result<()> {
        let page_size = self.device_info.boot.page_size;
        if address % page_size != 0
            || length as u32 > page_size
            || address >= self.device_info.application_size()
        {
            return Err(Error::InvalidPageWrite { address, length });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use crate::transport::mock::MockTransport;
    use crate::Operation;

    const INFO: u8 = Command::Info as u8;
    const SPM: u8 = Command::Spm as u8;
    const WRITE_EEPROM: u8 = Command::WriteEeprom as u8;

    /// An identified ATmega32U4 session: 32 KiB flash, 1 KiB EEPROM, 128-byte pages and, with
    /// the 0b11 selector, a 512-byte boot section (28 KiB + 3.5 KiB application flash).
    fn atmega32u4(mock: &MockTransport) -> Target<MockTransport> {
        mock.push_response(&[INFO, 1, 0x04 | (0b11 << 6)]);
        let target = Target::open(mock.clone()).unwrap();
        assert_eq!(target.device_info.application_size(), 32256);
        target
    }

    #[test]
    fn misaligned_page_writes_issue_no_transport_calls() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);
        let frames_after_open = mock.written().len();

        match target.write_page(64, &[0u8; 16]) {
            Err(Error::InvalidPageWrite {
                address: 64,
                length: 16,
            }) => {}
            other => panic!("expected invalid page write, got {:?}", other),
        }
        assert_eq!(mock.written().len(), frames_after_open);
    }

    #[test]
    fn oversized_page_writes_are_rejected() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        assert!(matches!(
            target.write_page(0, &[0u8; 129]),
            Err(Error::InvalidPageWrite { .. })
        ));
    }

    #[test]
    fn pages_in_the_boot_section_are_never_written() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        // First page past the application region
        assert!(matches!(
            target.write_page(32256, &[0u8; 128]),
            Err(Error::InvalidPageWrite { .. })
        ));
        assert!(matches!(
            target.erase_page(32256),
            Err(Error::InvalidPageWrite { .. })
        ));
    }

    #[test]
    fn flash_image_bound_is_exclusive() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        // Maximum defined address equals the application size exactly
        let image = [Segment {
            address: 32256,
            data: vec![0x00],
        }];
        assert!(matches!(
            target.write_flash_image(&image),
            Err(Error::ImageExceedsFlash { .. })
        ));
    }

    #[test]
    fn flash_image_writes_only_the_touched_page() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        // One page: erase + three fills (128 bytes) + commit
        mock.push_acks(SPM, 5);
        let image = [Segment {
            address: 10,
            data: vec![0xaa; 10],
        }];
        target.write_flash_image(&image).unwrap().execute().unwrap();

        let written = mock.written();
        // INFO + the single page sequence; no other page is touched
        assert_eq!(written.len(), 6);
        let first_fill = &written[2];
        assert_eq!(first_fill[3], 0x01);
        assert!(first_fill[6..16].iter().all(|&byte| byte == 0xff));
        assert!(first_fill[16..26].iter().all(|&byte| byte == 0xaa));
    }

    #[test]
    fn eeprom_writes_are_chunked_and_bounded() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        // 300 bytes fan out into chunks of 58, 58, 58, 58, 58 and 10 bytes
        mock.push_acks(WRITE_EEPROM, 6);
        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        target.write_eeprom(0, &data).unwrap();

        let written = mock.written();
        assert_eq!(written.len(), 7);
        let lengths: Vec<u8> = written[1..].iter().map(|report| report[5] - 6).collect();
        assert_eq!(lengths, vec![58, 58, 58, 58, 58, 10]);

        // Exclusive-end bound: running up to the last EEPROM byte is fine, one past is not
        mock.push_acks(WRITE_EEPROM, 1);
        assert!(target.write_eeprom(1014, &[0u8; 10]).is_ok());
        assert!(matches!(
            target.write_eeprom(1015, &[0u8; 10]),
            Err(Error::ImageExceedsEeprom { .. })
        ));
    }

    #[test]
    fn eeprom_image_segments_are_checked_up_front() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        let image = [
            Segment {
                address: 0,
                data: vec![0x11; 4],
            },
            Segment {
                address: 1020,
                data: vec![0x22; 8],
            },
        ];
        // The second segment exceeds the EEPROM, so nothing at all is written
        let frames_after_open = mock.written().len();
        assert!(matches!(
            target.write_eeprom_image(&image),
            Err(Error::ImageExceedsEeprom { .. })
        ));
        assert_eq!(mock.written().len(), frames_after_open);
    }

    #[test]
    fn erase_application_covers_the_whole_region() {
        let mock = MockTransport::default();
        let mut target = atmega32u4(&mock);

        let pages = 32256 / 128;
        mock.push_acks(SPM, pages);
        let mut erase = target.erase_application();
        assert_eq!(erase.total(), pages);
        erase.execute().unwrap();

        assert_eq!(mock.written().len(), pages + 1);
    }

    #[test]
    fn reset_suppresses_the_local_close() {
        let mock = MockTransport::default();
        let target = atmega32u4(&mock);

        target.reset().unwrap();
        assert!(!mock.state.borrow().closed);
    }

    #[test]
    fn close_releases_the_transport() {
        let mock = MockTransport::default();
        let target = atmega32u4(&mock);

        target.close().unwrap();
        assert!(mock.state.borrow().closed);
    }
}
