//! Toolkit Abstraction
//!
//! The pipeline talks to the GPU toolkit through two traits:
//! - [`Compiler`]: the runtime C++ compiler (NVRTC)
//! - [`Device`]: memory, modules, launches and device management (CUDA driver)
//!
//! The CUDA implementations live in [`cuda`] and [`nvrtc`]. Anything else that
//! honours the same contracts (a host emulator, a recording fake) can stand in.

pub mod cuda;
pub mod nvrtc;

pub use cuda::CudaDevice;
pub use nvrtc::NvrtcCompiler;

use crate::driver::{
    DeviceOrdinal, DeviceProperties, Extent3D, LaunchShape, Limit, PitchedPtr, Volume,
};
use crate::error::Result;

/// Header text supplied for an include directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Name exactly as written in the include directive
    pub name: String,
    /// Header source text
    pub source: String,
}

/// Everything the compiler needs for one translation unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileUnit {
    /// Program name (used in diagnostics)
    pub name: String,
    /// Main source text
    pub source: String,
    /// Resolved headers, in discovery order
    pub headers: Vec<Header>,
    /// Compiler options (link options already removed)
    pub options: Vec<String>,
}

/// Output of compiling one kernel instantiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledKernel {
    /// Generated PTX
    pub ptx: String,
    /// Mangled entry point name for the requested name expression
    pub lowered_name: String,
    /// Compiler log (warnings)
    pub log: String,
}

/// Runtime C++ compiler
pub trait Compiler: Send {
    /// Compiler name
    fn name(&self) -> &str;

    /// Compile `unit` for diagnostics only
    ///
    /// Returns the compiler log on success.
    ///
    /// # Errors
    ///
    /// `JitError::Compile` carrying the log when the unit does not compile.
    fn check(&self, unit: &CompileUnit) -> Result<String>;

    /// Compile `unit` and lower `name_expression` (e.g. `saxpy<float, 4>`)
    ///
    /// # Errors
    ///
    /// `JitError::Compile` carrying the log when compilation fails, including
    /// when the name expression does not name a kernel of the unit.
    fn compile_kernel(&self, unit: &CompileUnit, name_expression: &str) -> Result<CompiledKernel>;
}

/// Opaque id of a loaded module
pub type ModuleId = u64;

/// Opaque id of a kernel entry point in a loaded module
pub type FunctionId = u64;

/// GPU device services
///
/// Addresses and ids are plain integers so the runtime can record them in its
/// arenas. The runtime validates sizes and extents before calling in; a device
/// only reports what the toolkit itself rejects.
pub trait Device: Send {
    /// Backend name
    fn name(&self) -> &str;

    // Device management

    /// Number of visible devices
    fn device_count(&self) -> Result<u32>;
    /// Ordinal of the active device
    fn current_device(&self) -> Result<DeviceOrdinal>;
    /// Make `ordinal` the active device
    fn set_device(&mut self, ordinal: DeviceOrdinal) -> Result<()>;
    /// Properties of `ordinal`
    fn properties(&self, ordinal: DeviceOrdinal) -> Result<DeviceProperties>;
    /// Read a limit of the active device
    fn get_limit(&self, limit: Limit) -> Result<u64>;
    /// Write a limit of the active device
    fn set_limit(&mut self, limit: Limit, value: u64) -> Result<()>;
    /// Wait for all queued work on the active device
    fn synchronize(&self) -> Result<()>;
    /// Destroy every allocation and module on the active device
    fn reset(&mut self) -> Result<()>;

    // Linear memory

    /// Allocate linear device memory, returning its address
    fn alloc(&mut self, bytes: usize) -> Result<u64>;
    /// Free linear device memory
    fn free(&mut self, ptr: u64) -> Result<()>;
    /// Copy host bytes to a device address
    fn write(&mut self, dst: u64, src: &[u8]) -> Result<()>;
    /// Copy from a device address into host bytes
    fn read(&self, src: u64, dst: &mut [u8]) -> Result<()>;
    /// Copy `bytes` between device addresses
    fn copy(&mut self, dst: u64, src: u64, bytes: usize) -> Result<()>;

    // Pinned host memory

    /// Allocate page-locked host memory, returning its host address
    fn alloc_pinned(&mut self, bytes: usize) -> Result<u64>;
    /// Free page-locked host memory
    fn free_pinned(&mut self, addr: u64) -> Result<()>;
    /// View a pinned allocation
    fn pinned(&self, addr: u64) -> Result<&[u8]>;
    /// Mutably view a pinned allocation
    fn pinned_mut(&mut self, addr: u64) -> Result<&mut [u8]>;

    // 3-D memory

    /// Allocate a pitched volume (`extent.width` in bytes)
    fn alloc_pitched(&mut self, extent: Extent3D) -> Result<PitchedPtr>;
    /// Free a pitched volume by base address
    fn free_pitched(&mut self, ptr: u64) -> Result<()>;
    /// Allocate a signed 8-bit single-channel array
    fn alloc_array(&mut self, extent: Extent3D) -> Result<u64>;
    /// Destroy an array
    fn free_array(&mut self, array: u64) -> Result<()>;
    /// Copy a packed host volume (rows `extent.width` apart) into `dst`
    fn write_3d(&mut self, dst: Volume, src: &[u8], extent: Extent3D) -> Result<()>;
    /// Copy `src` into a packed host volume
    fn read_3d(&self, src: Volume, dst: &mut [u8], extent: Extent3D) -> Result<()>;

    // Textures

    /// Create a texture over `bytes` of linear memory at `ptr`
    fn create_texture(&mut self, ptr: u64, bytes: usize) -> Result<u64>;
    /// Destroy a texture object
    fn destroy_texture(&mut self, texture: u64) -> Result<()>;

    // Modules and launch

    /// Load PTX (linking `link_files` from `link_paths`) into a module
    fn load_module(
        &mut self,
        ptx: &str,
        link_files: &[String],
        link_paths: &[String],
    ) -> Result<ModuleId>;
    /// Resolve an entry point of a loaded module
    fn function(&mut self, module: ModuleId, lowered_name: &str) -> Result<FunctionId>;
    /// Unload a module and every entry point resolved from it
    fn unload_module(&mut self, module: ModuleId) -> Result<()>;
    /// Queue `function` with one 64-bit value per kernel parameter
    ///
    /// Arguments are not checked against the kernel signature; a mismatch
    /// surfaces as a device fault reported by a later call.
    fn launch(&mut self, function: FunctionId, shape: &LaunchShape, args: &[u64]) -> Result<()>;
}
