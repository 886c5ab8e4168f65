//! CUDA Context and Device Management
//!
//! Uses the Primary Context API (`cuDevicePrimaryCtxRetain`), which matches the
//! runtime API's one-context-per-device model: selecting a device retains its
//! primary context and makes it current on the calling thread.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use super::sys::{attribute, CUcontext, CUdevice, CudaDriver};
use super::types::{DeviceOrdinal, DeviceProperties, Limit};
use crate::error::{JitError, Result};

/// Track whether cuInit has been called
static CUDA_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Get the CUDA driver, initializing if needed
///
/// # Errors
///
/// Returns `Err(JitError::CudaNotAvailable)` if the driver is not installed
/// (or the `cuda` feature is off), `Err(JitError::Device)` if `cuInit` fails.
pub fn get_driver() -> Result<&'static CudaDriver> {
    let driver = CudaDriver::load()
        .ok_or_else(|| JitError::CudaNotAvailable("CUDA driver not found".to_string()))?;

    if !CUDA_INITIALIZED.swap(true, Ordering::SeqCst) {
        // SAFETY: cuInit may be called more than once; we only avoid redundant calls
        let result = unsafe { (driver.cuInit)(0) };
        if let Err(err) = driver.check("cuInit", result) {
            CUDA_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(err);
        }
    }

    Ok(driver)
}

/// Number of CUDA devices visible to this process
///
/// # Errors
///
/// Returns `Err` if the driver is unavailable or the query fails.
pub fn device_count() -> Result<u32> {
    let driver = get_driver()?;
    let mut count: c_int = 0;
    // SAFETY: count is a valid out-pointer
    let result = unsafe { (driver.cuDeviceGetCount)(&mut count) };
    driver.check("cuDeviceGetCount", result)?;
    Ok(u32::try_from(count).unwrap_or(0))
}

fn device_handle(driver: &CudaDriver, ordinal: DeviceOrdinal) -> Result<CUdevice> {
    let ordinal = c_int::try_from(ordinal).map_err(|_| {
        JitError::from(crate::error::DeviceError::new(
            "cuDeviceGet",
            super::sys::CUDA_ERROR_INVALID_DEVICE,
            "CUDA_ERROR_INVALID_DEVICE",
            "device ordinal out of range",
        ))
    })?;
    let mut device: CUdevice = 0;
    // SAFETY: device is a valid out-pointer; the driver validates the ordinal
    let result = unsafe { (driver.cuDeviceGet)(&mut device, ordinal) };
    driver.check("cuDeviceGet", result)?;
    Ok(device)
}

/// Ordinal of the device whose context is current on this thread
///
/// # Errors
///
/// Returns `Err` if no context is current or the driver is unavailable.
pub fn current_device() -> Result<DeviceOrdinal> {
    let driver = get_driver()?;
    let mut device: CUdevice = 0;
    // SAFETY: device is a valid out-pointer
    let result = unsafe { (driver.cuCtxGetDevice)(&mut device) };
    driver.check("cuCtxGetDevice", result)?;
    Ok(u32::try_from(device).unwrap_or(0))
}

/// Query the properties reported to callers for `ordinal`
///
/// # Errors
///
/// Returns `Err` if the device does not exist or an attribute query fails.
pub fn device_properties(ordinal: DeviceOrdinal) -> Result<DeviceProperties> {
    let driver = get_driver()?;
    let device = device_handle(driver, ordinal)?;

    let mut name: [c_char; 256] = [0; 256];
    // SAFETY: buffer is valid for 256 bytes
    let result = unsafe { (driver.cuDeviceGetName)(name.as_mut_ptr(), 256, device) };
    driver.check("cuDeviceGetName", result)?;
    // SAFETY: the driver NUL-terminates the name within the buffer
    let name = unsafe { CStr::from_ptr(name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let mut total: usize = 0;
    // SAFETY: total is a valid out-pointer
    let result = unsafe { (driver.cuDeviceTotalMem)(&mut total, device) };
    driver.check("cuDeviceTotalMem", result)?;

    let attr = |id: c_int| -> Result<u32> {
        let mut value: c_int = 0;
        // SAFETY: value is a valid out-pointer; id is a documented attribute
        let result = unsafe { (driver.cuDeviceGetAttribute)(&mut value, id, device) };
        driver.check("cuDeviceGetAttribute", result)?;
        Ok(u32::try_from(value).unwrap_or(0))
    };

    Ok(DeviceProperties {
        name,
        total_global_mem: total as u64,
        shared_mem_per_block: u64::from(attr(attribute::MAX_SHARED_MEMORY_PER_BLOCK)?),
        regs_per_block: attr(attribute::MAX_REGISTERS_PER_BLOCK)?,
        warp_size: attr(attribute::WARP_SIZE)?,
        mem_pitch: u64::from(attr(attribute::MAX_PITCH)?),
        pci_bus_id: attr(attribute::PCI_BUS_ID)?,
        pci_device_id: attr(attribute::PCI_DEVICE_ID)?,
        pci_domain_id: attr(attribute::PCI_DOMAIN_ID)?,
    })
}

/// CUDA primary context with RAII cleanup
///
/// Retaining makes the context current on the calling thread. Dropping
/// releases the retain count taken here.
pub struct CudaContext {
    ordinal: DeviceOrdinal,
    device: CUdevice,
    context: CUcontext,
}

// SAFETY: primary context handles may be used from any thread
unsafe impl Send for CudaContext {}
unsafe impl Sync for CudaContext {}

impl CudaContext {
    /// Retain the primary context of `ordinal` and make it current
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the device does not exist or the
    /// context cannot be retained or made current.
    pub fn new(ordinal: DeviceOrdinal) -> Result<Self> {
        let driver = get_driver()?;
        let device = device_handle(driver, ordinal)?;

        let mut context: CUcontext = ptr::null_mut();
        // SAFETY: device is a valid handle from cuDeviceGet
        let result = unsafe { (driver.cuDevicePrimaryCtxRetain)(&mut context, device) };
        driver.check("cuDevicePrimaryCtxRetain", result)?;

        // SAFETY: context is valid from cuDevicePrimaryCtxRetain
        let result = unsafe { (driver.cuCtxSetCurrent)(context) };
        if let Err(err) = driver.check("cuCtxSetCurrent", result) {
            // SAFETY: balances the retain above
            unsafe { (driver.cuDevicePrimaryCtxRelease)(device) };
            return Err(err);
        }

        tracing::debug!(device = ordinal, "primary context retained");
        Ok(Self {
            ordinal,
            device,
            context,
        })
    }

    /// Device ordinal of this context
    #[must_use]
    pub fn ordinal(&self) -> DeviceOrdinal {
        self.ordinal
    }

    /// Make this context current on the calling thread again
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if `cuCtxSetCurrent` fails.
    pub fn make_current(&self) -> Result<()> {
        let driver = get_driver()?;
        // SAFETY: context is retained for the lifetime of self
        let result = unsafe { (driver.cuCtxSetCurrent)(self.context) };
        driver.check("cuCtxSetCurrent", result)
    }

    /// Block until all work queued on this context has completed
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` with the status of the failed work.
    pub fn synchronize(&self) -> Result<()> {
        let driver = get_driver()?;
        // SAFETY: callers make this context current first
        let result = unsafe { (driver.cuCtxSynchronize)() };
        driver.check("cuCtxSynchronize", result)
    }

    /// Read a per-context limit
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the limit is unsupported on this device.
    pub fn get_limit(&self, limit: Limit) -> Result<u64> {
        let driver = get_driver()?;
        let mut value: usize = 0;
        // SAFETY: value is a valid out-pointer
        let result = unsafe { (driver.cuCtxGetLimit)(&mut value, limit as u32) };
        driver.check("cuCtxGetLimit", result)?;
        Ok(value as u64)
    }

    /// Write a per-context limit
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the value is rejected.
    pub fn set_limit(&self, limit: Limit, value: u64) -> Result<()> {
        let driver = get_driver()?;
        let value = usize::try_from(value).unwrap_or(usize::MAX);
        // SAFETY: plain value call on the current context
        let result = unsafe { (driver.cuCtxSetLimit)(limit as u32, value) };
        driver.check("cuCtxSetLimit", result)
    }

    /// Destroy every allocation and module of the primary context
    ///
    /// Consumes the context: the caller retains a fresh one afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if `cuDevicePrimaryCtxReset` fails.
    pub fn reset(self) -> Result<()> {
        let driver = get_driver()?;
        let device = self.device;
        let ordinal = self.ordinal;
        drop(self);
        // SAFETY: device is a valid handle; the reset destroys all context state
        let result = unsafe { (driver.cuDevicePrimaryCtxReset)(device) };
        driver.check("cuDevicePrimaryCtxReset", result)?;
        tracing::debug!(device = ordinal, "primary context reset");
        Ok(())
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: balances the retain in the constructor
            unsafe {
                let _ = (driver.cuDevicePrimaryCtxRelease)(self.device);
            }
        }
    }
}
