use crate::error::{Error, Result};
use crate::target::TargetInfo;
use crate::transport::get_serial;
use rusb::UsbContext;

/// Entry point for finding attached bootloader targets.
pub struct Context {
    usb_context: rusb::Context,
}

impl Context {
    /// Initializes a USB context.
    pub fn new() -> Result<Self> {
        let usb_context = rusb::Context::new()?;
        Ok(Context { usb_context })
    }

    pub(crate) fn usb_context(&self) -> &rusb::Context {
        &self.usb_context
    }

    /// Lists all attached kp_boot targets.
    pub fn find_targets(&self) -> Result<Vec<TargetInfo>> {
        let mut targets = Vec::new();

        for device in self.usb_context.devices()?.iter() {
            if let Ok(serial) = get_serial(&device) {
                targets.push(TargetInfo {
                    serial,
                    usb_bus_number: device.bus_number(),
                    usb_bus_address: device.address(),
                });
            }
        }

        Ok(targets)
    }

    /// Picks a single attached target, by serial number if one is given.
    pub fn pick_target(&self, serial: Option<&str>) -> Result<TargetInfo> {
        let targets = self.find_targets()?;
        if targets.is_empty() {
            Err(Error::TargetNotFound)
        } else if let Some(serial) = serial {
            targets
                .into_iter()
                .find(|i| i.serial == serial)
                .ok_or(Error::TargetNotFound)
        } else if targets.len() == 1 {
            Ok(targets.into_iter().next().unwrap())
        } else {
            // More than one target and no serial given
            Err(Error::TooManyMatches)
        }
    }
}
