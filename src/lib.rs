//! # nvjit: Runtime CUDA Compilation Behind Opaque Handles
//!
//! Compile CUDA C++ at runtime, instantiate template kernels, launch them and
//! move memory, with every native resource named by a `u64` handle that can
//! cross a language boundary and be validated on the way back in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nvjit::{KernelArg, Runtime, RuntimeConfig};
//!
//! # fn main() -> nvjit::Result<()> {
//! let mut rt = Runtime::new(RuntimeConfig::from_env())?;
//!
//! let program = rt.compile(
//!     "scale\n\
//!      template<typename T, int N>\n\
//!      __global__ void scale(T* data) { data[threadIdx.x] *= N; }",
//!     None,
//! )?;
//! let kernel = rt.kernel(program, "scale")?;
//! let inst = rt.instantiate(kernel, &["float", "4"])?;
//! let launcher = rt.configure(inst, &[1, 1, 1], &[256, 1, 1])?;
//!
//! let data = rt.alloc_device(256 * 4)?;
//! rt.write(data, &[0u8; 256 * 4])?;
//! let result = rt.launch(launcher, &[KernelArg::Buffer(data)]);
//! assert!(result.is_ok());
//! rt.synchronize()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`runtime`] - The [`Runtime`] facade owning every resource
//! - [`program`] - Program -> Kernel -> Instantiation -> Launcher pipeline
//! - [`source`] - Per-compilation include resolution
//! - [`memory`] - Linear, pinned, pitched, array and texture allocations
//! - [`dispatch`] - Kernel argument marshaling and launch results
//! - [`handle`] - Generation-checked handle arena
//! - [`backend`] - Compiler and device seams (NVRTC, CUDA driver)
//! - [`driver`] - CUDA driver and NVRTC FFI (loaded at runtime, optional)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
// Allow doc markdown for toolkit identifiers (cuMemAlloc, NVRTC, ...)
#![allow(clippy::doc_markdown)]
// Allow possible truncation - addresses and sizes are 64-bit on every supported target
#![allow(clippy::cast_possible_truncation)]
// Allow module_name_repetitions - handle aliases read better fully spelled
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod handle;
pub mod memory;
pub mod program;
pub mod runtime;
pub mod source;

// Error types
pub mod error;

pub use config::RuntimeConfig;
pub use dispatch::{KernelArg, LaunchResult, MAX_KERNEL_ARGS};
pub use driver::{DeviceProperties, Dim3, Extent3D, LaunchShape, Limit, PitchedPtr};
pub use error::{DeviceError, JitError, Result};
pub use handle::Handle;
pub use memory::{
    DeviceArrayHandle, DeviceBufferHandle, Pitched3D, PinnedBufferHandle, PitchedBufferHandle,
    TextureHandle, TextureTarget,
};
pub use program::{
    InstantiationHandle, InstantiationInfo, KernelHandle, LauncherHandle, ProgramHandle,
};
pub use runtime::Runtime;
pub use source::{HeaderSet, SourceResolver};
