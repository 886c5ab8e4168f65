//! Execution Dispatcher
//!
//! Turns caller-supplied [`KernelArg`]s into the 64-bit parameter slots a
//! launch passes to the device, and reports launches as [`LaunchResult`]s.
//! No argument is checked against the kernel's parameter list; a mismatch is
//! a device fault.

use serde::{Deserialize, Serialize};

use crate::error::{JitError, Result};
use crate::memory::{
    DeviceBufferHandle, MemoryManager, PinnedBufferHandle, PitchedBufferHandle, TextureHandle,
};

pub use crate::driver::launch::MAX_KERNEL_ARGS;

/// One kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    /// Passes the buffer's device address
    Buffer(DeviceBufferHandle),
    /// Passes the buffer's host address (page-locked, device accessible)
    Pinned(PinnedBufferHandle),
    /// Passes the pitched volume's base address
    Pitched(PitchedBufferHandle),
    /// Passes the texture object
    Texture(TextureHandle),
    /// Passes the value itself, little-endian in a 64-bit slot
    Scalar(u64),
}

impl From<DeviceBufferHandle> for KernelArg {
    fn from(handle: DeviceBufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

impl From<PinnedBufferHandle> for KernelArg {
    fn from(handle: PinnedBufferHandle) -> Self {
        Self::Pinned(handle)
    }
}

impl From<PitchedBufferHandle> for KernelArg {
    fn from(handle: PitchedBufferHandle) -> Self {
        Self::Pitched(handle)
    }
}

impl From<TextureHandle> for KernelArg {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}

macro_rules! scalar_arg {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for KernelArg {
                fn from($v: $ty) -> Self {
                    Self::Scalar($conv)
                }
            }
        )*
    };
}

scalar_arg! {
    u8 => |v| u64::from(v),
    u16 => |v| u64::from(v),
    u32 => |v| u64::from(v),
    u64 => |v| v,
    i8 => |v| u64::from(v as u8),
    i16 => |v| u64::from(v as u16),
    i32 => |v| u64::from(v as u32),
    i64 => |v| v as u64,
    f32 => |v| u64::from(v.to_bits()),
    f64 => |v| v.to_bits(),
    bool => |v| u64::from(v),
}

/// Resolve `args` into parameter slots
///
/// # Errors
///
/// Returns `Err(JitError::TooManyArguments)` past [`MAX_KERNEL_ARGS`], or
/// `Err(JitError::InvalidHandle)` for a stale memory handle.
pub fn marshal(memory: &MemoryManager, args: &[KernelArg]) -> Result<Vec<u64>> {
    if args.len() > MAX_KERNEL_ARGS {
        return Err(JitError::TooManyArguments {
            count: args.len(),
            max: MAX_KERNEL_ARGS,
        });
    }
    args.iter()
        .map(|arg| match *arg {
            KernelArg::Buffer(h) => memory.buffer(h).map(|b| b.ptr()),
            KernelArg::Pinned(h) => memory.pinned(h).map(|b| b.addr()),
            KernelArg::Pitched(h) => memory.pitched(h).map(|b| b.pitched_ptr().ptr),
            KernelArg::Texture(h) => memory.texture(h).map(|t| t.object()),
            KernelArg::Scalar(value) => Ok(value),
        })
        .collect()
}

/// Outcome of a launch as reported to a dynamically typed caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    /// `0` on success, `-1` on failure
    pub code: i32,
    /// Toolkit error name (e.g. `CUDA_ERROR_INVALID_VALUE`) or bridge error text
    pub err: Option<String>,
}

impl LaunchResult {
    /// Successful launch
    #[must_use]
    pub const fn ok() -> Self {
        Self { code: 0, err: None }
    }

    /// Whether the launch was queued
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<Result<()>> for LaunchResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self {
                code: -1,
                err: Some(err.error_name()),
            },
        }
    }
}
