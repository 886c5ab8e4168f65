//! CUDA driver implementation of [`Device`]
//!
//! Owns the RAII wrappers from [`crate::driver`] keyed by the integer ids the
//! runtime records, so releasing an id drops (and frees) the native resource.
//!
//! Every device keeps its primary context retained once selected, so switching
//! devices never destroys what was allocated on the previous one. Each call
//! makes the owning context current on the calling thread first, which lets a
//! [`CudaDevice`] move between threads.

use std::collections::HashMap;
use std::ffi::c_void;

use super::{Device, FunctionId, ModuleId};
use crate::driver::context::{self, CudaContext};
use crate::driver::launch::launch_function;
use crate::driver::memory::{
    self, Array3D, DeviceMemory, PinnedMemory, PitchedMemory, TextureObject,
};
use crate::driver::module::CudaModule;
use crate::driver::sys::CUDA_ERROR_INVALID_HANDLE;
use crate::driver::{
    DeviceOrdinal, DeviceProperties, Extent3D, LaunchShape, Limit, PitchedPtr, Volume,
};
use crate::error::{DeviceError, JitError, Result};

/// Native resource tagged with the device it was created on
struct Owned<T> {
    ordinal: DeviceOrdinal,
    value: T,
}

struct LoadedModule {
    module: CudaModule,
    functions: Vec<FunctionId>,
}

/// CUDA device set holding one retained primary context per selected ordinal
pub struct CudaDevice {
    current: DeviceOrdinal,
    linear: HashMap<u64, Owned<DeviceMemory>>,
    pinned: HashMap<u64, Owned<PinnedMemory>>,
    pitched: HashMap<u64, Owned<PitchedMemory>>,
    arrays: HashMap<u64, Owned<Array3D>>,
    textures: HashMap<u64, Owned<TextureObject>>,
    modules: HashMap<ModuleId, Owned<LoadedModule>>,
    functions: HashMap<FunctionId, ModuleId>,
    next_module: ModuleId,
    // Released last, after every resource above
    contexts: HashMap<DeviceOrdinal, CudaContext>,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("device", &self.current)
            .field("contexts", &self.contexts.len())
            .field("allocations", &self.linear.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

#[track_caller]
fn unknown(op: &'static str, what: &str, id: u64) -> JitError {
    DeviceError::new(
        op,
        CUDA_ERROR_INVALID_HANDLE,
        "CUDA_ERROR_INVALID_HANDLE",
        format!("unknown {what} {id:#x}"),
    )
    .into()
}

/// Remove and leak every entry created on `ordinal`
fn forget_on<T>(map: &mut HashMap<u64, Owned<T>>, ordinal: DeviceOrdinal) {
    let ids: Vec<u64> = map
        .iter()
        .filter(|(_, owned)| owned.ordinal == ordinal)
        .map(|(id, _)| *id)
        .collect();
    for id in &ids {
        if let Some(owned) = map.remove(id) {
            std::mem::forget(owned.value);
        }
    }
}

impl CudaDevice {
    /// Retain the primary context of `ordinal` and select it
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::CudaNotAvailable)` without a driver, or
    /// `Err(JitError::Device)` if the device cannot be opened.
    pub fn new(ordinal: DeviceOrdinal) -> Result<Self> {
        let context = CudaContext::new(ordinal)?;
        Ok(Self {
            current: ordinal,
            linear: HashMap::new(),
            pinned: HashMap::new(),
            pitched: HashMap::new(),
            arrays: HashMap::new(),
            textures: HashMap::new(),
            modules: HashMap::new(),
            functions: HashMap::new(),
            next_module: 1,
            contexts: HashMap::from([(ordinal, context)]),
        })
    }

    /// Make the context of `ordinal` current on the calling thread
    fn activate(&self, ordinal: DeviceOrdinal) -> Result<&CudaContext> {
        let context = self.contexts.get(&ordinal).ok_or_else(|| {
            JitError::CudaNotAvailable(format!("no retained context for device {ordinal}"))
        })?;
        context.make_current()?;
        Ok(context)
    }

    /// Make the selected device's context current on the calling thread
    fn bind(&self) -> Result<&CudaContext> {
        self.activate(self.current)
    }

    fn own<T>(&self, value: T) -> Owned<T> {
        Owned {
            ordinal: self.current,
            value,
        }
    }

    /// Drop a resource with its own context current
    fn release<T>(&self, owned: Owned<T>) -> Result<()> {
        self.activate(owned.ordinal)?;
        drop(owned.value);
        Ok(())
    }

    fn forget_device(&mut self, ordinal: DeviceOrdinal) {
        // The context reset already destroyed these; dropping would free twice
        forget_on(&mut self.linear, ordinal);
        forget_on(&mut self.pinned, ordinal);
        forget_on(&mut self.pitched, ordinal);
        forget_on(&mut self.arrays, ordinal);
        forget_on(&mut self.textures, ordinal);
        let ids: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|(_, owned)| owned.ordinal == ordinal)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(owned) = self.modules.remove(&id) {
                for function in &owned.value.functions {
                    self.functions.remove(function);
                }
                std::mem::forget(owned.value.module);
            }
        }
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        let modules: Vec<_> = self.modules.drain().map(|(_, m)| m).collect();
        self.functions.clear();
        for owned in modules {
            let _ = self.release(owned);
        }
        let textures: Vec<_> = self.textures.drain().map(|(_, t)| t).collect();
        for owned in textures {
            let _ = self.release(owned);
        }
        let arrays: Vec<_> = self.arrays.drain().map(|(_, a)| a).collect();
        for owned in arrays {
            let _ = self.release(owned);
        }
        let pitched: Vec<_> = self.pitched.drain().map(|(_, m)| m).collect();
        for owned in pitched {
            let _ = self.release(owned);
        }
        let linear: Vec<_> = self.linear.drain().map(|(_, m)| m).collect();
        for owned in linear {
            let _ = self.release(owned);
        }
        let pinned: Vec<_> = self.pinned.drain().map(|(_, m)| m).collect();
        for owned in pinned {
            let _ = self.release(owned);
        }
    }
}

impl Device for CudaDevice {
    fn name(&self) -> &str {
        "CUDA"
    }

    fn device_count(&self) -> Result<u32> {
        context::device_count()
    }

    fn current_device(&self) -> Result<DeviceOrdinal> {
        self.bind()?;
        context::current_device()
    }

    fn set_device(&mut self, ordinal: DeviceOrdinal) -> Result<()> {
        if !self.contexts.contains_key(&ordinal) {
            let context = CudaContext::new(ordinal)?;
            self.contexts.insert(ordinal, context);
        }
        self.activate(ordinal)?;
        self.current = ordinal;
        tracing::debug!(device = ordinal, "device selected");
        Ok(())
    }

    fn properties(&self, ordinal: DeviceOrdinal) -> Result<DeviceProperties> {
        context::device_properties(ordinal)
    }

    fn get_limit(&self, limit: Limit) -> Result<u64> {
        self.bind()?.get_limit(limit)
    }

    fn set_limit(&mut self, limit: Limit, value: u64) -> Result<()> {
        self.bind()?.set_limit(limit, value)
    }

    fn synchronize(&self) -> Result<()> {
        self.bind()?.synchronize()
    }

    fn reset(&mut self) -> Result<()> {
        let ordinal = self.current;
        let context = self
            .contexts
            .remove(&ordinal)
            .ok_or_else(|| JitError::CudaNotAvailable("no active CUDA context".to_string()))?;
        self.forget_device(ordinal);
        context.reset()?;
        self.contexts.insert(ordinal, CudaContext::new(ordinal)?);
        Ok(())
    }

    fn alloc(&mut self, bytes: usize) -> Result<u64> {
        self.bind()?;
        let mem = DeviceMemory::new(bytes)?;
        let ptr = mem.as_ptr();
        let owned = self.own(mem);
        self.linear.insert(ptr, owned);
        Ok(ptr)
    }

    fn free(&mut self, ptr: u64) -> Result<()> {
        let owned = self
            .linear
            .remove(&ptr)
            .ok_or_else(|| unknown("cuMemFree", "device allocation", ptr))?;
        self.release(owned)
    }

    fn write(&mut self, dst: u64, src: &[u8]) -> Result<()> {
        self.bind()?;
        memory::copy_htod(dst, src)
    }

    fn read(&self, src: u64, dst: &mut [u8]) -> Result<()> {
        self.bind()?;
        memory::copy_dtoh(dst, src)
    }

    fn copy(&mut self, dst: u64, src: u64, bytes: usize) -> Result<()> {
        self.bind()?;
        memory::copy_dtod(dst, src, bytes)
    }

    fn alloc_pinned(&mut self, bytes: usize) -> Result<u64> {
        self.bind()?;
        let mem = PinnedMemory::new(bytes)?;
        let addr = mem.address();
        let owned = self.own(mem);
        self.pinned.insert(addr, owned);
        Ok(addr)
    }

    fn free_pinned(&mut self, addr: u64) -> Result<()> {
        let owned = self
            .pinned
            .remove(&addr)
            .ok_or_else(|| unknown("cuMemFreeHost", "pinned allocation", addr))?;
        self.release(owned)
    }

    fn pinned(&self, addr: u64) -> Result<&[u8]> {
        self.pinned
            .get(&addr)
            .map(|owned| owned.value.as_slice())
            .ok_or_else(|| unknown("pinned", "pinned allocation", addr))
    }

    fn pinned_mut(&mut self, addr: u64) -> Result<&mut [u8]> {
        self.pinned
            .get_mut(&addr)
            .map(|owned| owned.value.as_mut_slice())
            .ok_or_else(|| unknown("pinned", "pinned allocation", addr))
    }

    fn alloc_pitched(&mut self, extent: Extent3D) -> Result<PitchedPtr> {
        self.bind()?;
        let mem = PitchedMemory::new(extent)?;
        let pitched = mem.pitched_ptr();
        let owned = self.own(mem);
        self.pitched.insert(pitched.ptr, owned);
        Ok(pitched)
    }

    fn free_pitched(&mut self, ptr: u64) -> Result<()> {
        let owned = self
            .pitched
            .remove(&ptr)
            .ok_or_else(|| unknown("cuMemFree", "pitched allocation", ptr))?;
        self.release(owned)
    }

    fn alloc_array(&mut self, extent: Extent3D) -> Result<u64> {
        self.bind()?;
        let array = Array3D::new(extent)?;
        let id = array.address();
        let owned = self.own(array);
        self.arrays.insert(id, owned);
        Ok(id)
    }

    fn free_array(&mut self, array: u64) -> Result<()> {
        let owned = self
            .arrays
            .remove(&array)
            .ok_or_else(|| unknown("cuArrayDestroy", "array", array))?;
        self.release(owned)
    }

    fn write_3d(&mut self, dst: Volume, src: &[u8], extent: Extent3D) -> Result<()> {
        self.bind()?;
        memory::copy_3d_htod(dst, src, extent)
    }

    fn read_3d(&self, src: Volume, dst: &mut [u8], extent: Extent3D) -> Result<()> {
        self.bind()?;
        memory::copy_3d_dtoh(dst, src, extent)
    }

    fn create_texture(&mut self, ptr: u64, bytes: usize) -> Result<u64> {
        self.bind()?;
        let texture = TextureObject::over_linear(ptr, bytes)?;
        let id = texture.raw();
        let owned = self.own(texture);
        self.textures.insert(id, owned);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: u64) -> Result<()> {
        let owned = self
            .textures
            .remove(&texture)
            .ok_or_else(|| unknown("cuTexObjectDestroy", "texture", texture))?;
        self.release(owned)
    }

    fn load_module(
        &mut self,
        ptx: &str,
        link_files: &[String],
        link_paths: &[String],
    ) -> Result<ModuleId> {
        self.bind()?;
        let module = CudaModule::load(ptx, link_files, link_paths)?;
        let id = self.next_module;
        self.next_module += 1;
        let loaded = self.own(LoadedModule {
            module,
            functions: Vec::new(),
        });
        self.modules.insert(id, loaded);
        Ok(id)
    }

    fn function(&mut self, module: ModuleId, lowered_name: &str) -> Result<FunctionId> {
        let loaded = self
            .modules
            .get_mut(&module)
            .ok_or_else(|| unknown("cuModuleGetFunction", "module", module))?;
        let id = loaded.value.module.get_function(lowered_name)? as FunctionId;
        loaded.value.functions.push(id);
        self.functions.insert(id, module);
        Ok(id)
    }

    fn unload_module(&mut self, module: ModuleId) -> Result<()> {
        let loaded = self
            .modules
            .remove(&module)
            .ok_or_else(|| unknown("cuModuleUnload", "module", module))?;
        for function in &loaded.value.functions {
            self.functions.remove(function);
        }
        self.release(loaded)
    }

    fn launch(&mut self, function: FunctionId, shape: &LaunchShape, args: &[u64]) -> Result<()> {
        let module = self
            .functions
            .get(&function)
            .and_then(|module| self.modules.get(module))
            .ok_or_else(|| unknown("cuLaunchKernel", "function", function))?;
        // Launch on the device the module was loaded on
        self.activate(module.ordinal)?;
        // SAFETY: the function belongs to a loaded module whose context is
        // current; argument layout is the caller's contract with the kernel
        unsafe { launch_function(function as *mut c_void, shape, args) }
    }
}
