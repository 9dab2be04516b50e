use std::ffi::CStr;
use std::io;
use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_uint};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys as libusb;
use libusb1_sys::constants::{
    LIBUSB_ERROR_INTERRUPTED, LIBUSB_ERROR_NO_DEVICE, LIBUSB_ERROR_NOT_FOUND,
    LIBUSB_ERROR_NOT_SUPPORTED, LIBUSB_ERROR_PIPE, LIBUSB_ERROR_TIMEOUT,
};

/// RAII wrapper owning a libusb context.
///
/// All transfers in this crate go through the blocking libusb entry points, so
/// no event thread is needed; the context only has to outlive every handle
/// opened from it.
pub(crate) struct LibusbContext {
    pub(crate) ptr: *mut libusb::libusb_context,
}

unsafe impl Send for LibusbContext {}
unsafe impl Sync for LibusbContext {}

impl LibusbContext {
    pub(crate) fn new() -> io::Result<Arc<Self>> {
        let mut ctx = ptr::null_mut();
        let rc = unsafe { libusb::libusb_init(&mut ctx) };
        if rc < 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("libusb init failed: {rc}"),
            ));
        }
        Ok(Arc::new(LibusbContext { ptr: ctx }))
    }
}

impl Drop for LibusbContext {
    fn drop(&mut self) {
        unsafe { libusb::libusb_exit(self.ptr) };
    }
}

/// Wrapper around a libusb device handle with blocking transfer helpers and
/// automatic close semantics.
pub(crate) struct LibusbDeviceHandle {
    pub(crate) _context: Arc<LibusbContext>,
    handle: *mut libusb::libusb_device_handle,
}

unsafe impl Send for LibusbDeviceHandle {}

impl Drop for LibusbDeviceHandle {
    fn drop(&mut self) {
        unsafe { libusb::libusb_close(self.handle) };
    }
}

impl LibusbDeviceHandle {
    pub(crate) fn open(
        context: Arc<LibusbContext>,
        device: *mut libusb::libusb_device,
    ) -> io::Result<Self> {
        let mut handle = ptr::null_mut();
        let rc = unsafe { libusb::libusb_open(device, &mut handle) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(Self {
            _context: context,
            handle,
        })
    }

    pub(crate) fn set_auto_detach_kernel_driver(&self, enable: bool) -> io::Result<()> {
        let flag = if enable { 1 } else { 0 };
        let rc = unsafe { libusb::libusb_set_auto_detach_kernel_driver(self.handle, flag) };
        if rc < 0 && rc != LIBUSB_ERROR_NOT_SUPPORTED {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub(crate) fn claim_interface(&self, interface: i32) -> io::Result<()> {
        let rc = unsafe { libusb::libusb_claim_interface(self.handle, interface) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub(crate) fn release_interface(&self, interface: i32) -> io::Result<()> {
        let rc = unsafe { libusb::libusb_release_interface(self.handle, interface) };
        if rc < 0 && rc != LIBUSB_ERROR_NO_DEVICE {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub(crate) fn set_configuration(&self, config: i32) -> io::Result<()> {
        let rc = unsafe { libusb::libusb_set_configuration(self.handle, config) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub(crate) fn reset_device(&self) -> io::Result<()> {
        let rc = unsafe { libusb::libusb_reset_device(self.handle) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    pub(crate) fn bulk_read_blocking(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        let mut transferred: c_int = 0;
        let rc = unsafe {
            libusb::libusb_bulk_transfer(
                self.handle,
                endpoint,
                buffer.as_mut_ptr(),
                length as c_int,
                &mut transferred,
                duration_to_timeout(timeout) as c_uint,
            )
        };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        buffer.truncate(transferred as usize);
        Ok(buffer)
    }

    pub(crate) fn bulk_write_blocking(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> io::Result<usize> {
        let mut transferred: c_int = 0;
        let rc = unsafe {
            libusb::libusb_bulk_transfer(
                self.handle,
                endpoint,
                data.as_ptr() as *mut u8,
                data.len() as c_int,
                &mut transferred,
                duration_to_timeout(timeout) as c_uint,
            )
        };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(transferred as usize)
    }

    pub(crate) fn control_out_blocking(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> io::Result<usize> {
        let millis = duration_to_timeout(timeout);
        let rc = unsafe {
            libusb::libusb_control_transfer(
                self.handle,
                request_type,
                request,
                value,
                index,
                data.as_ptr() as *mut u8,
                data.len() as u16,
                millis,
            )
        };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(rc as usize)
    }

    pub(crate) fn control_in_blocking(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<usize> {
        let millis = duration_to_timeout(timeout);
        let rc = unsafe {
            libusb::libusb_control_transfer(
                self.handle,
                request_type,
                request,
                value,
                index,
                buf.as_mut_ptr(),
                buf.len() as u16,
                millis,
            )
        };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(rc as usize)
    }
}

pub(crate) fn libusb_error_string(code: i32) -> String {
    unsafe {
        let ptr = libusb::libusb_error_name(code);
        if ptr.is_null() {
            format!("libusb error {code}")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

pub(crate) fn map_libusb_error(code: i32) -> io::Error {
    let kind = match code {
        LIBUSB_ERROR_TIMEOUT => io::ErrorKind::WouldBlock,
        LIBUSB_ERROR_PIPE => io::ErrorKind::BrokenPipe,
        LIBUSB_ERROR_NO_DEVICE => io::ErrorKind::NotConnected,
        LIBUSB_ERROR_NOT_FOUND => io::ErrorKind::NotFound,
        LIBUSB_ERROR_INTERRUPTED => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, libusb_error_string(code))
}

pub(crate) fn get_device_descriptor(
    device: *mut libusb::libusb_device,
) -> io::Result<libusb::libusb_device_descriptor> {
    let mut desc = MaybeUninit::<libusb::libusb_device_descriptor>::uninit();
    let rc = unsafe { libusb::libusb_get_device_descriptor(device, desc.as_mut_ptr()) };
    if rc < 0 {
        return Err(map_libusb_error(rc));
    }
    Ok(unsafe { desc.assume_init() })
}

/// Convert Duration into libusb timeout (ms)
pub(crate) fn duration_to_timeout(duration: Duration) -> u32 {
    if duration.is_zero() {
        return 0;
    }
    let millis = duration.as_millis();
    if millis == 0 {
        1
    } else if millis > u32::MAX as u128 {
        u32::MAX
    } else {
        millis as u32
    }
}
