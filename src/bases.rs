/// The supported USB base stations. One just names its vendor/product ids;
/// the other needs a vendor-specific bring-up script before any radio I/O.
use log::{debug, warn};

use crate::ant::Transport;
use crate::ant::constants::READ_BYTES;
use crate::error::{AntError, Result};
use crate::usb::UsbTransport;

/// A base station variant: vendor/product ids plus whatever device-specific
/// initialization it needs after USB open and before radio traffic.
pub trait AntBase {
    fn name(&self) -> &'static str;

    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Device bring-up after open, before any radio I/O. Most bases need
    /// nothing.
    fn vendor_init(&self, transport: &mut UsbTransport) -> Result<()> {
        let _ = transport;
        Ok(())
    }

    /// Open the base and run its vendor init.
    fn open(&self) -> Result<UsbTransport> {
        let mut transport = UsbTransport::open(self.vendor_id(), self.product_id())?;
        self.vendor_init(&mut transport)?;
        Ok(transport)
    }
}

/// Dynastream USB stick, as used by garmin/suunto equipment. Only needs its
/// vendor/product ids set.
pub struct DynastreamBase;

impl AntBase for DynastreamBase {
    fn name(&self) -> &'static str {
        "Dynastream"
    }

    fn vendor_id(&self) -> u16 {
        0x0FCF
    }

    fn product_id(&self) -> u16 {
        0x1008
    }
}

/// FitBit base. The extra hardware handling tracker charging sits behind a
/// bridge chip that wants a fixed script of vendor control transfers first.
pub struct FitbitBase;

impl AntBase for FitbitBase {
    fn name(&self) -> &'static str {
        "FitBit"
    }

    fn vendor_id(&self) -> u16 {
        0x10C4
    }

    fn product_id(&self) -> u16 {
        0x84C4
    }

    fn vendor_init(&self, transport: &mut UsbTransport) -> Result<()> {
        debug!("running {} vendor init", self.name());

        transport.control_out(0x40, 0x00, 0xFFFF, 0x00, &[])?;
        transport.control_out(0x40, 0x01, 0x2000, 0x00, &[])?;
        transport.control_out(0x40, 0x00, 0x0000, 0x00, &[])?;
        transport.control_out(0x40, 0x00, 0xFFFF, 0x00, &[])?;
        transport.control_out(0x40, 0x01, 0x2000, 0x00, &[])?;
        transport.control_out(0x40, 0x01, 0x004A, 0x00, &[])?;

        let status = transport.control_in(0xC0, 0xFF, 0x370B, 0x00, 1)?;
        if status.first() != Some(&0x02) {
            warn!("unexpected bridge status {status:02x?}, continuing");
        }

        transport.control_out(0x40, 0x03, 0x0800, 0x00, &[])?;
        transport.control_out(
            0x40,
            0x13,
            0x0000,
            0x00,
            &[
                0x08, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ],
        )?;
        transport.control_out(0x40, 0x12, 0x000C, 0x00, &[])?;

        // Flush whatever the bridge has queued; silence here is fine.
        match transport.read(READ_BYTES) {
            Ok(_) | Err(AntError::TransportTimeout) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
