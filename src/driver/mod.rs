//! CUDA Driver API and NVRTC (Minimal FFI)
//!
//! Hand-written bindings loaded at runtime, so the crate builds everywhere and
//! only talks to a GPU when the `cuda` feature is on and a driver is present.
//!
//! ## Design Philosophy
//!
//! - **Minimal FFI**: Only bind what the bridge needs
//! - **Safe wrappers**: All unsafe code isolated here
//! - **Exact status**: Every call's own result is translated, never a sticky "last error"

pub mod context;
pub mod launch;
pub mod memory;
pub mod module;
pub mod nvrtc;
pub mod sys;

mod types;
pub use types::*;

/// Check if a CUDA driver with at least one device is usable
#[must_use]
pub fn cuda_available() -> bool {
    context::device_count().map(|n| n > 0).unwrap_or(false)
}

/// Check if the NVRTC runtime compiler can be loaded
#[must_use]
pub fn nvrtc_available() -> bool {
    nvrtc::Nvrtc::load().is_some()
}
