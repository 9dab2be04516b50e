use std::io;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys as libusb;
use log::{debug, info};

use super::context::{
    LibusbContext, LibusbDeviceHandle, get_device_descriptor, map_libusb_error,
};
use crate::ant::Transport;
use crate::error::{AntError, Result};

/// Bulk IN endpoint of the base radio.
pub const EP_IN: u8 = 0x81;
/// Bulk OUT endpoint of the base radio.
pub const EP_OUT: u8 = 0x01;

/// Short deadline for bulk writes; the base drains the OUT endpoint quickly.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
/// Default deadline for bulk reads.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);
/// Deadline for vendor control transfers during base init.
const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Blocking USB transport for an ANT base station.
///
/// Owns the device handle exclusively; the radio controller above it owns the
/// transport exclusively, so there is never more than one transfer in flight.
pub struct UsbTransport {
    handle: LibusbDeviceHandle,
    interface: i32,
    read_timeout: Duration,
}

impl UsbTransport {
    /// Open the first device matching `vid:pid` and prepare it for bulk I/O.
    ///
    /// Configuration has to be selected before the bus reset and re-selected
    /// after it; doing it in any other order faults the stick on some hosts.
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        let context = LibusbContext::new()?;
        let handle = find_device(&context, vid, pid)?;

        handle.set_configuration(1)?;
        handle.reset_device()?;
        handle.set_configuration(1)?;

        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(0)?;

        info!("Opened base {vid:04x}:{pid:04x}");

        Ok(UsbTransport {
            handle,
            interface: 0,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Override the bulk-read deadline (default 1000 ms).
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Vendor control transfer, host to device.
    pub fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<usize> {
        debug!(
            "ControlOut req={:#04x}, val={:#06x}, idx={:#06x}, data={:02x?}",
            request, value, index, data
        );
        let written = self
            .handle
            .control_out_blocking(request_type, request, value, index, data, CONTROL_TIMEOUT)?;
        Ok(written)
    }

    /// Vendor control transfer, device to host.
    pub fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let read = self
            .handle
            .control_in_blocking(request_type, request, value, index, &mut buffer, CONTROL_TIMEOUT)?;
        buffer.truncate(read);
        debug!(
            "ControlIn req={:#04x}, val={:#06x}, idx={:#06x} -> {:02x?}",
            request, value, index, buffer
        );
        Ok(buffer)
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let written = self.handle.bulk_write_blocking(EP_OUT, data, WRITE_TIMEOUT)?;
        if written != data.len() {
            return Err(AntError::Transport(io::Error::new(
                io::ErrorKind::Other,
                format!("incomplete bulk write: {written} of {} bytes", data.len()),
            )));
        }
        Ok(())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        match self.handle.bulk_read_blocking(EP_IN, max_len, self.read_timeout) {
            Ok(buffer) => Ok(buffer),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(AntError::TransportTimeout),
            Err(err) => Err(AntError::Transport(err)),
        }
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

/// Scan the libusb device list for the first descriptor matching `vid:pid`.
fn find_device(context: &Arc<LibusbContext>, vid: u16, pid: u16) -> Result<LibusbDeviceHandle> {
    let mut list = ptr::null();
    let count = unsafe { libusb::libusb_get_device_list(context.ptr, &mut list) };
    if count < 0 {
        return Err(AntError::Transport(map_libusb_error(count as i32)));
    }

    let mut result: Option<io::Result<LibusbDeviceHandle>> = None;

    for i in 0..count {
        let device = unsafe { *list.add(i as usize) };
        let desc = match get_device_descriptor(device) {
            Ok(d) => d,
            Err(e) => {
                result = Some(Err(e));
                break;
            }
        };

        if desc.idVendor != vid || desc.idProduct != pid {
            continue;
        }

        result = Some(LibusbDeviceHandle::open(context.clone(), device));
        break;
    }

    unsafe {
        libusb::libusb_free_device_list(list, 1);
    }

    match result {
        Some(Ok(handle)) => Ok(handle),
        Some(Err(err)) => Err(AntError::Transport(err)),
        None => Err(AntError::Transport(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no base radio at {vid:04x}:{pid:04x}"),
        ))),
    }
}
