//! Runtime facade
//!
//! [`Runtime`] owns every resource the bridge creates and is the only surface
//! a host environment needs: resources go in by value, handles come out, and
//! every later call names its resources by handle.
//!
//! ```text
//! compile(source, resolver?) -> ProgramHandle
//!   kernel(program, name) -> KernelHandle
//!     instantiate(kernel, args) -> InstantiationHandle <-> serialize / deserialize
//!       configure(instantiation, grid, block) -> LauncherHandle
//!         launch(launcher, args) -> LaunchResult
//! ```

use std::fmt;

use tracing::instrument;

use crate::backend::{Compiler, CudaDevice, Device, NvrtcCompiler};
use crate::config::RuntimeConfig;
use crate::dispatch::{self, KernelArg, LaunchResult};
use crate::driver::{DeviceOrdinal, DeviceProperties, Extent3D, LaunchShape, Limit};
use crate::error::Result;
use crate::handle::Registry;
use crate::memory::{
    DeviceArrayHandle, DeviceBufferHandle, MemoryManager, Pitched3D, PinnedBufferHandle,
    PitchedBufferHandle, TextureHandle, TextureTarget,
};
use crate::program::{
    CompileOptions, Instantiation, InstantiationHandle, InstantiationInfo, Kernel, KernelHandle,
    KernelImage, Launcher, LauncherHandle, Program, ProgramHandle,
};
use crate::source::SourceResolver;

/// Owner of every program, kernel, instantiation, launcher and allocation
pub struct Runtime {
    config: RuntimeConfig,
    compiler: Box<dyn Compiler>,
    device: Box<dyn Device>,
    programs: Registry<Program>,
    kernels: Registry<Kernel>,
    instantiations: Registry<Instantiation>,
    launchers: Registry<Launcher>,
    memory: MemoryManager,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("compiler", &self.compiler.name())
            .field("device", &self.device.name())
            .field("programs", &self.programs.len())
            .field("kernels", &self.kernels.len())
            .field("instantiations", &self.instantiations.len())
            .field("launchers", &self.launchers.len())
            .field("memory", &self.memory)
            .finish()
    }
}

impl Runtime {
    /// Open the configured CUDA device with NVRTC as the compiler
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::CudaNotAvailable)` if the driver or NVRTC cannot
    /// be loaded, or `Err(JitError::Device)` if the device cannot be opened.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let compiler = NvrtcCompiler::new()?;
        let device = CudaDevice::new(config.device)?;
        tracing::info!(device = config.device, "CUDA runtime ready");
        Ok(Self::with_backends(config, Box::new(compiler), Box::new(device)))
    }

    /// Build on caller-supplied backends
    #[must_use]
    pub fn with_backends(
        config: RuntimeConfig,
        compiler: Box<dyn Compiler>,
        device: Box<dyn Device>,
    ) -> Self {
        Self {
            config,
            compiler,
            device,
            programs: Registry::new(),
            kernels: Registry::new(),
            instantiations: Registry::new(),
            launchers: Registry::new(),
            memory: MemoryManager::new(),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // Compilation pipeline

    /// Compile `source`, resolving quoted includes through `resolver`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Compile)` with the compiler log on failure.
    pub fn compile(
        &mut self,
        source: &str,
        resolver: Option<&mut dyn SourceResolver>,
    ) -> Result<ProgramHandle> {
        self.compile_with_options::<&str>(source, &[], resolver)
    }

    /// Compile `source` with extra options (`-l`/`-L` select link inputs)
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Compile)` with the compiler log on failure.
    pub fn compile_with_options<S: AsRef<str>>(
        &mut self,
        source: &str,
        options: &[S],
        resolver: Option<&mut dyn SourceResolver>,
    ) -> Result<ProgramHandle> {
        let options = CompileOptions::parse(self.config.compile_options(options));
        let program = Program::compile(
            self.compiler.as_ref(),
            source,
            options,
            &self.config.default_program_name,
            resolver,
        )?;
        let name = program.name().to_string();
        let handle = self.programs.insert(program);
        tracing::debug!(program = %name, handle = handle.to_raw(), "program created");
        Ok(handle)
    }

    /// Borrow a compiled program
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn program(&self, handle: ProgramHandle) -> Result<&Program> {
        self.programs.get(handle)
    }

    /// Release a program; its kernels become unusable
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn destroy_program(&mut self, handle: ProgramHandle) -> Result<()> {
        let program = self.programs.remove(handle)?;
        tracing::debug!(program = %program.name(), "program destroyed");
        Ok(())
    }

    /// Look up the `__global__` function `name` of a program
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Lookup)` if the program defines no such kernel.
    pub fn kernel(&mut self, program: ProgramHandle, name: &str) -> Result<KernelHandle> {
        let kernel = Kernel::lookup(program, self.programs.get(program)?, name)?;
        Ok(self.kernels.insert(kernel))
    }

    /// Release a kernel
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn destroy_kernel(&mut self, handle: KernelHandle) -> Result<()> {
        self.kernels.remove(handle).map(drop)
    }

    /// Compile, load and register `kernel<args...>`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Instantiation)` if the arguments do not fit the
    /// template or the compiler rejects them, `Err(JitError::InvalidHandle)`
    /// if the kernel or its program was released, or `Err(JitError::Device)`
    /// if the module cannot be loaded.
    #[instrument(level = "debug", skip_all, fields(kernel = kernel.to_raw()))]
    pub fn instantiate<S: AsRef<str>>(
        &mut self,
        kernel: KernelHandle,
        args: &[S],
    ) -> Result<InstantiationHandle> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().trim().to_string()).collect();
        let kernel = self.kernels.get(kernel)?;
        let program = self.programs.get(kernel.program())?;
        let image = KernelImage::build(self.compiler.as_ref(), program, kernel, &args)?;
        let instantiation = Instantiation::load(self.device.as_mut(), image)?;
        Ok(self.instantiations.insert(instantiation))
    }

    /// PTX, link inputs and entry name of an instantiation
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn instantiation_info(&self, handle: InstantiationHandle) -> Result<InstantiationInfo> {
        Ok(self.instantiations.get(handle)?.info())
    }

    /// Serialize an instantiation so it can be loaded without recompiling
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn serialize(&self, handle: InstantiationHandle) -> Result<Vec<u8>> {
        self.instantiations.get(handle)?.image().to_bytes()
    }

    /// Load a serialized instantiation
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Deserialize)` for a malformed payload or
    /// `Err(JitError::Device)` if the module cannot be loaded.
    #[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<InstantiationHandle> {
        let image = KernelImage::from_bytes(bytes)?;
        let instantiation = Instantiation::load(self.device.as_mut(), image)?;
        Ok(self.instantiations.insert(instantiation))
    }

    /// Unload an instantiation; its launchers become unusable
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn destroy_instantiation(&mut self, handle: InstantiationHandle) -> Result<()> {
        let instantiation = self.instantiations.remove(handle)?;
        tracing::debug!(kernel = %instantiation.image().name_expression, "instantiation destroyed");
        instantiation.unload(self.device.as_mut())
    }

    /// Bind an instantiation to a grid and block shape (three components each)
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidLaunchConfig)` for a slice that does not
    /// hold three components.
    pub fn configure(
        &mut self,
        instantiation: InstantiationHandle,
        grid: &[u32],
        block: &[u32],
    ) -> Result<LauncherHandle> {
        self.instantiations.get(instantiation)?;
        let launcher = Launcher::configure(instantiation, grid, block)?;
        Ok(self.launchers.insert(launcher))
    }

    /// Bind an instantiation to a shape with dynamic shared memory
    ///
    /// # Errors
    ///
    /// As [`Runtime::configure`].
    pub fn configure_with_shared_mem(
        &mut self,
        instantiation: InstantiationHandle,
        grid: &[u32],
        block: &[u32],
        shared_mem: u32,
    ) -> Result<LauncherHandle> {
        self.instantiations.get(instantiation)?;
        let launcher = Launcher::configure(instantiation, grid, block)?.with_shared_mem(shared_mem);
        Ok(self.launchers.insert(launcher))
    }

    /// Borrow a launcher
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn launcher(&self, handle: LauncherHandle) -> Result<&Launcher> {
        self.launchers.get(handle)
    }

    /// Release a launcher
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn destroy_launcher(&mut self, handle: LauncherHandle) -> Result<()> {
        self.launchers.remove(handle).map(drop)
    }

    // Launch

    /// Launch through a configured launcher
    pub fn launch(&mut self, launcher: LauncherHandle, args: &[KernelArg]) -> LaunchResult {
        report(self.try_launch(launcher, args))
    }

    /// Launch an instantiation on one block of one thread
    pub fn launch_instantiation(
        &mut self,
        instantiation: InstantiationHandle,
        args: &[KernelArg],
    ) -> LaunchResult {
        report(self.try_launch_instantiation(instantiation, args))
    }

    /// Instantiate `name<template_args...>` of a program, launch it on one
    /// block of one thread, then unload it
    pub fn launch_kernel<S: AsRef<str>>(
        &mut self,
        program: ProgramHandle,
        name: &str,
        template_args: &[S],
        args: &[KernelArg],
    ) -> LaunchResult {
        report(self.try_launch_kernel(program, name, template_args, args))
    }

    /// [`Runtime::launch`] returning the error itself
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale launcher or argument,
    /// `Err(JitError::TooManyArguments)`, or `Err(JitError::Device)` if the
    /// device refuses the launch.
    pub fn try_launch(&mut self, launcher: LauncherHandle, args: &[KernelArg]) -> Result<()> {
        let launcher = *self.launchers.get(launcher)?;
        let function = self.instantiations.get(launcher.instantiation())?.function();
        let slots = dispatch::marshal(&self.memory, args)?;
        tracing::trace!(?launcher, args = slots.len(), "launch");
        self.device.launch(function, launcher.shape(), &slots)
    }

    /// [`Runtime::launch_instantiation`] returning the error itself
    ///
    /// # Errors
    ///
    /// As [`Runtime::try_launch`].
    pub fn try_launch_instantiation(
        &mut self,
        instantiation: InstantiationHandle,
        args: &[KernelArg]) -> Result<()> {
        let function = self.instantiations.get(instantiation)?.function();
        let slots = dispatch::marshal(&self.memory, args)?;
        self.device.launch(function, &LaunchShape::default(), &slots)
    }

    /// [`Runtime::launch_kernel`] returning the error itself
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Lookup)` or `Err(JitError::Instantiation)` for a
    /// kernel that cannot be instantiated, otherwise as [`Runtime::try_launch`].
    #[instrument(level = "debug", skip_all, fields(program = program.to_raw(), kernel = name))]
    pub fn try_launch_kernel<S: AsRef<str>>(
        &mut self,
        program: ProgramHandle,
        name: &str,
        template_args: &[S],
        args: &[KernelArg],
    ) -> Result<()> {
        let template_args: Vec<String> = template_args
            .iter()
            .map(|a| a.as_ref().trim().to_string())
            .collect();
        let slots = dispatch::marshal(&self.memory, args)?;
        let source = self.programs.get(program)?;
        let kernel = Kernel::lookup(program, source, name)?;
        let image = KernelImage::build(self.compiler.as_ref(), source, &kernel, &template_args)?;

        let device = self.device.as_mut();
        let instantiation = Instantiation::load(device, image)?;
        let launched = device.launch(instantiation.function(), &LaunchShape::default(), &slots);
        let unloaded = instantiation.unload(device);
        launched?;
        unloaded
    }

    // Device management

    /// Number of visible devices
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the driver cannot be queried.
    pub fn device_count(&self) -> Result<u32> {
        self.device.device_count()
    }

    /// Ordinal of the active device
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the driver cannot be queried.
    pub fn current_device(&self) -> Result<DeviceOrdinal> {
        self.device.current_device()
    }

    /// Make `ordinal` the active device
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` for an invalid ordinal.
    pub fn set_device(&mut self, ordinal: DeviceOrdinal) -> Result<()> {
        self.device.set_device(ordinal)
    }

    /// Properties of `ordinal`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` for an invalid ordinal.
    pub fn device_properties(&self, ordinal: DeviceOrdinal) -> Result<DeviceProperties> {
        self.device.properties(ordinal)
    }

    /// Read a limit of the active device
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the limit is unsupported.
    pub fn get_limit(&self, limit: Limit) -> Result<u64> {
        self.device.get_limit(limit)
    }

    /// Write a limit of the active device
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the value is refused.
    pub fn set_limit(&mut self, limit: Limit, value: u64) -> Result<()> {
        self.device.set_limit(limit, value)
    }

    /// Wait for every queued launch and copy to finish
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` with the first asynchronous fault.
    pub fn synchronize(&self) -> Result<()> {
        self.device.synchronize()
    }

    /// Reset the active device
    ///
    /// Every instantiation, launcher and allocation handle becomes stale;
    /// programs and kernels survive and can be instantiated again.
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the reset fails.
    pub fn reset_device(&mut self) -> Result<()> {
        self.device.reset()?;
        let launchers = self.launchers.drain().len();
        let instantiations = self.instantiations.drain().len();
        let allocations = self.memory.forget_all();
        tracing::info!(launchers, instantiations, allocations, "device reset");
        Ok(())
    }

    // Memory

    /// Allocate `bytes` of device memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_device(&mut self, bytes: usize) -> Result<DeviceBufferHandle> {
        self.memory.alloc_device(self.device.as_mut(), bytes)
    }

    /// Allocate `bytes` of page-locked host memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_pinned_host(&mut self, bytes: usize) -> Result<PinnedBufferHandle> {
        self.memory.alloc_pinned_host(self.device.as_mut(), bytes)
    }

    /// Release a device buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn free(&mut self, handle: DeviceBufferHandle) -> Result<()> {
        self.memory.free(self.device.as_mut(), handle)
    }

    /// Release a pinned buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn free_pinned(&mut self, handle: PinnedBufferHandle) -> Result<()> {
        self.memory.free_pinned(self.device.as_mut(), handle)
    }

    /// Copy host bytes to the start of a device buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `src` is larger than the buffer.
    pub fn write(&mut self, handle: DeviceBufferHandle, src: &[u8]) -> Result<()> {
        self.memory.write(self.device.as_mut(), handle, src)
    }

    /// Copy the start of a device buffer to host bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `dst` is larger than the buffer.
    pub fn read(&self, handle: DeviceBufferHandle, dst: &mut [u8]) -> Result<()> {
        self.memory.read(self.device.as_ref(), handle, dst)
    }

    /// Copy `bytes` between device buffers
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if either buffer is too small.
    pub fn copy_device_to_device(
        &mut self,
        dst: DeviceBufferHandle,
        src: DeviceBufferHandle,
        bytes: usize) -> Result<()> {
        self.memory.copy_device_to_device(self.device.as_mut(), dst, src, bytes)
    }

    /// Copy host bytes into a pinned buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `src` is larger than the buffer.
    pub fn write_pinned(&mut self, handle: PinnedBufferHandle, src: &[u8]) -> Result<()> {
        self.memory.write_pinned(self.device.as_mut(), handle, src)
    }

    /// Copy a pinned buffer into host bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `dst` is larger than the buffer.
    pub fn read_pinned(&self, handle: PinnedBufferHandle, dst: &mut [u8]) -> Result<()> {
        self.memory.read_pinned(self.device.as_ref(), handle, dst)
    }

    /// Device address of a buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn device_ptr(&self, handle: DeviceBufferHandle) -> Result<u64> {
        Ok(self.memory.buffer(handle)?.ptr())
    }

    /// Allocate a pitched volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_3d(&mut self, width: usize, height: usize, depth: usize) -> Result<Pitched3D> {
        self.memory.alloc_3d(self.device.as_mut(), width, height, depth)
    }

    /// Copy a packed host volume into a pitched buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the copy does not fit.
    pub fn write_3d(
        &mut self,
        handle: PitchedBufferHandle,
        src: &[u8],
        extent: Extent3D,
        row_width: usize) -> Result<()> {
        self.memory.write_3d(self.device.as_mut(), handle, src, extent, row_width)
    }

    /// Copy a pitched buffer into a packed host volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the copy does not fit.
    pub fn read_3d(
        &self,
        handle: PitchedBufferHandle,
        dst: &mut [u8],
        extent: Extent3D,
        row_width: usize) -> Result<()> {
        self.memory.read_3d(self.device.as_ref(), handle, dst, extent, row_width)
    }

    /// Release a pitched volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn free_3d(&mut self, handle: PitchedBufferHandle) -> Result<()> {
        self.memory.free_3d(self.device.as_mut(), handle)
    }

    /// Allocate a signed-byte 3-D array
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_array_3d(&mut self, x: usize, y: usize, z: usize) -> Result<DeviceArrayHandle> {
        self.memory.alloc_array_3d(self.device.as_mut(), x, y, z)
    }

    /// Copy a packed host volume into an array
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the copy does not fit.
    pub fn write_array_3d(
        &mut self,
        handle: DeviceArrayHandle,
        src: &[u8],
        extent: Extent3D) -> Result<()> {
        self.memory.write_array_3d(self.device.as_mut(), handle, src, extent)
    }

    /// Copy an array into a packed host volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the copy does not fit.
    pub fn read_array_3d(
        &self,
        handle: DeviceArrayHandle,
        dst: &mut [u8],
        extent: Extent3D) -> Result<()> {
        self.memory.read_array_3d(self.device.as_ref(), handle, dst, extent)
    }

    /// Destroy an array
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn free_array_3d(&mut self, handle: DeviceArrayHandle) -> Result<()> {
        self.memory.free_array_3d(self.device.as_mut(), handle)
    }

    /// Create a texture over the first `length_bytes` of a buffer or pitched volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the length exceeds the target.
    pub fn bind_texture_3d(
        &mut self,
        target: impl Into<TextureTarget>,
        length_bytes: usize,
    ) -> Result<TextureHandle> {
        self.memory.bind_texture_3d(self.device.as_mut(), target.into(), length_bytes)
    }

    /// Destroy a texture
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<()> {
        self.memory.destroy_texture(self.device.as_mut(), handle)
    }
}

fn report(result: Result<()>) -> LaunchResult {
    if let Err(err) = &result {
        tracing::debug!(error = %err, "launch failed");
    }
    LaunchResult::from(result)
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let device = self.device.as_mut();
        self.launchers.drain();
        for instantiation in self.instantiations.drain() {
            if let Err(err) = instantiation.unload(device) {
                tracing::warn!(error = %err, "failed to unload module");
            }
        }
        self.memory.release_all(device);
    }
}
