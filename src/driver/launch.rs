//! Kernel Launch on the Default Stream
//!
//! Every argument arrives as one 64-bit slot. The kernel receives an array of
//! pointers into those slots, which is the driver's native parameter
//! convention; a kernel parameter narrower than 8 bytes reads the low bytes of
//! its slot.

use std::ffi::c_void;
use std::ptr;

use super::context::get_driver;
use super::sys::{CUfunction, CUstream};
use super::types::LaunchShape;
use crate::error::Result;

/// Maximum number of arguments a single launch can marshal
pub const MAX_KERNEL_ARGS: usize = 256;

/// Launch `func` asynchronously on the default stream
///
/// # Safety
///
/// `func` must be a live function handle, and `args` must match the kernel's
/// parameter list in count and width. Buffers referenced by `args` must stay
/// alive until the launch completes.
///
/// # Errors
///
/// Returns `Err(JitError::Device)` with the status of `cuLaunchKernel`
/// (e.g. `CUDA_ERROR_INVALID_VALUE` for a zero grid dimension).
pub unsafe fn launch_function(func: CUfunction, shape: &LaunchShape, args: &[u64]) -> Result<()> {
    let driver = get_driver()?;
    debug_assert!(args.len() <= MAX_KERNEL_ARGS);

    let mut values = [0u64; MAX_KERNEL_ARGS];
    let count = args.len().min(MAX_KERNEL_ARGS);
    values[..count].copy_from_slice(&args[..count]);

    let mut params = [ptr::null_mut::<c_void>(); MAX_KERNEL_ARGS];
    for (param, value) in params.iter_mut().zip(values.iter_mut()).take(count) {
        *param = (value as *mut u64).cast::<c_void>();
    }

    // SAFETY: params point into `values`, which outlives the call; the driver
    // copies parameter values before returning
    let result = unsafe {
        (driver.cuLaunchKernel)(
            func,
            shape.grid.x,
            shape.grid.y,
            shape.grid.z,
            shape.block.x,
            shape.block.y,
            shape.block.z,
            shape.shared_mem,
            ptr::null_mut::<c_void>() as CUstream, // default stream
            params.as_mut_ptr(),
            ptr::null_mut(),
        )
    };
    driver.check("cuLaunchKernel", result)
}
