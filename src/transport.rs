//! The 64-byte report channel a session talks through, and its rusb-backed implementation.

use crate::error::{Error, Result};
use crate::protocol::REPORT_SIZE;
use crate::{TIMEOUT, USB_PID, USB_VID};
use rusb::DeviceHandle;

/// Interrupt IN endpoint carrying responses from the bootloader.
const ENDPOINT_IN: u8 = 0x81;

/// Interrupt OUT endpoint carrying command reports to the bootloader.
const ENDPOINT_OUT: u8 = 0x02;

/// A bidirectional channel moving one fixed-size report per call.
///
/// The session types are generic over this trait, so the protocol logic never touches USB
/// directly and can be exercised against a scripted channel in tests. The real device is driven
/// through [`UsbTransport`].
pub trait Transport {
    /// Sends one report. Blocks until the device has accepted it.
    fn write(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()>;

    /// Receives one report. Blocks until the device has produced one.
    fn read(&mut self) -> Result<[u8; REPORT_SIZE]>;

    /// Releases the underlying handle.
    fn close(&mut self) -> Result<()>;
}

/// [`Transport`] over the bootloader's raw HID interface.
pub struct UsbTransport {
    usb_device_handle: DeviceHandle<rusb::Context>,
}

impl UsbTransport {
    /// Opens the device and claims its HID interface. The OS HID driver binds the interface
    /// first, so it is detached for the duration of the session and reattached on close.
    pub(crate) fn from_usb_device(device: rusb::Device<rusb::Context>) -> Result<Self> {
        let mut usb_device_handle = device.open()?;
        usb_device_handle.set_auto_detach_kernel_driver(true)?;
        usb_device_handle.claim_interface(0)?;
        Ok(UsbTransport { usb_device_handle })
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
        self.usb_device_handle
            .write_interrupt(ENDPOINT_OUT, report, TIMEOUT)?;
        Ok(())
    }

    fn read(&mut self) -> Result<[u8; REPORT_SIZE]> {
        let mut report = [0u8; REPORT_SIZE];
        self.usb_device_handle
            .read_interrupt(ENDPOINT_IN, &mut report, TIMEOUT)?;
        Ok(report)
    }

    fn close(&mut self) -> Result<()> {
        self.usb_device_handle.release_interface(0)?;
        Ok(())
    }
}

/// Reads the serial number string of a USB device, after checking that it enumerates with the
/// bootloader's vendor and product id. Fails with `UnsupportedTarget` for any other device.
pub(crate) fn get_serial(device: &rusb::Device<rusb::Context>) -> Result<String> {
    let descriptor = device.device_descriptor()?;
    if descriptor.vendor_id() != USB_VID || descriptor.product_id() != USB_PID {
        return Err(Error::UnsupportedTarget);
    }

    // Some boards ship without a serial number string; they are still valid targets.
    if descriptor.serial_number_string_index().is_none() {
        return Ok(String::new());
    }
    let handle = device.open()?;
    Ok(handle.read_serial_number_string_ascii(&descriptor)?)
}
