//! Minimal CUDA Driver API FFI Bindings
//!
//! Hand-written FFI for the driver functions the bridge needs. Loaded at
//! runtime from libcuda.so/nvcuda.dll, so the crate builds and tests on machines
//! without a GPU.
//!
//! # Safety
//!
//! All functions in this module are unsafe. Safe wrappers live in the sibling
//! modules (context.rs, memory.rs, module.rs, launch.rs).

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

use crate::error::{DeviceError, JitError};

// ============================================================================
// CUDA Type Definitions (from cuda.h)
// ============================================================================

/// CUDA error code
pub type CUresult = c_int;

/// CUDA device handle
pub type CUdevice = c_int;

/// CUDA context handle (opaque pointer)
pub type CUcontext = *mut c_void;

/// CUDA module handle (opaque pointer)
pub type CUmodule = *mut c_void;

/// CUDA function handle (opaque pointer)
pub type CUfunction = *mut c_void;

/// CUDA stream handle (opaque pointer)
pub type CUstream = *mut c_void;

/// CUDA array handle (opaque pointer)
pub type CUarray = *mut c_void;

/// Linker state handle (opaque pointer)
pub type CUlinkState = *mut c_void;

/// Texture object
pub type CUtexObject = u64;

/// CUDA device pointer (GPU memory address)
pub type CUdeviceptr = u64;

// ============================================================================
// CUDA Error Codes (subset we name)
// ============================================================================

/// CUDA success
pub const CUDA_SUCCESS: CUresult = 0;
/// Invalid value passed
pub const CUDA_ERROR_INVALID_VALUE: CUresult = 1;
/// Out of memory
pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;
/// CUDA not initialized
pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;
/// CUDA deinitialized
pub const CUDA_ERROR_DEINITIALIZED: CUresult = 4;
/// No CUDA device
pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;
/// Invalid device
pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;
/// Invalid module image
pub const CUDA_ERROR_INVALID_IMAGE: CUresult = 200;
/// Invalid context
pub const CUDA_ERROR_INVALID_CONTEXT: CUresult = 201;
/// No kernel image for this GPU
pub const CUDA_ERROR_NO_BINARY_FOR_GPU: CUresult = 209;
/// Invalid PTX
pub const CUDA_ERROR_INVALID_PTX: CUresult = 218;
/// Link file not found
pub const CUDA_ERROR_FILE_NOT_FOUND: CUresult = 301;
/// Invalid handle
pub const CUDA_ERROR_INVALID_HANDLE: CUresult = 400;
/// Function not found
pub const CUDA_ERROR_NOT_FOUND: CUresult = 500;
/// Illegal device address
pub const CUDA_ERROR_ILLEGAL_ADDRESS: CUresult = 700;
/// Too many resources requested for launch
pub const CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES: CUresult = 701;
/// Kernel launch failed
pub const CUDA_ERROR_LAUNCH_FAILED: CUresult = 719;
/// Operation not supported
pub const CUDA_ERROR_NOT_SUPPORTED: CUresult = 801;

// ============================================================================
// Enumerations used in descriptors
// ============================================================================

/// `CUmemorytype`: host memory
pub const CU_MEMORYTYPE_HOST: c_uint = 1;
/// `CUmemorytype`: device memory
pub const CU_MEMORYTYPE_DEVICE: c_uint = 2;
/// `CUmemorytype`: array
pub const CU_MEMORYTYPE_ARRAY: c_uint = 3;

/// `CUarray_format`: signed 8-bit integer
pub const CU_AD_FORMAT_SIGNED_INT8: c_uint = 0x08;

/// `CUresourcetype`: linear memory
pub const CU_RESOURCE_TYPE_LINEAR: c_uint = 0x02;

/// `CUaddress_mode`: mirror
pub const CU_TR_ADDRESS_MODE_MIRROR: c_uint = 2;
/// `CUfilter_mode`: point sampling
pub const CU_TR_FILTER_MODE_POINT: c_uint = 0;
/// Texture flag: return integer data without promotion
pub const CU_TRSF_READ_AS_INTEGER: c_uint = 0x01;
/// Texture flag: normalized coordinates
pub const CU_TRSF_NORMALIZED_COORDINATES: c_uint = 0x02;

/// `CUjitInputType`: compiled device code
pub const CU_JIT_INPUT_CUBIN: c_uint = 0;
/// `CUjitInputType`: PTX source
pub const CU_JIT_INPUT_PTX: c_uint = 1;
/// `CUjitInputType`: fat binary
pub const CU_JIT_INPUT_FATBINARY: c_uint = 2;
/// `CUjitInputType`: relocatable object
pub const CU_JIT_INPUT_OBJECT: c_uint = 3;
/// `CUjitInputType`: static library
pub const CU_JIT_INPUT_LIBRARY: c_uint = 4;

/// `CUdevice_attribute` values we query
pub mod attribute {
    use std::os::raw::c_int;

    /// Maximum shared memory per block
    pub const MAX_SHARED_MEMORY_PER_BLOCK: c_int = 8;
    /// Warp size in threads
    pub const WARP_SIZE: c_int = 10;
    /// Maximum pitch for memory copies
    pub const MAX_PITCH: c_int = 11;
    /// Maximum 32-bit registers per block
    pub const MAX_REGISTERS_PER_BLOCK: c_int = 12;
    /// PCI bus identifier
    pub const PCI_BUS_ID: c_int = 33;
    /// PCI device identifier
    pub const PCI_DEVICE_ID: c_int = 34;
    /// PCI domain identifier
    pub const PCI_DOMAIN_ID: c_int = 50;
}

// ============================================================================
// Descriptor structs (layout matches cuda.h)
// ============================================================================

/// `CUDA_MEMCPY3D`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct CudaMemcpy3D {
    pub src_x_in_bytes: usize,
    pub src_y: usize,
    pub src_z: usize,
    pub src_lod: usize,
    pub src_memory_type: c_uint,
    pub src_host: *const c_void,
    pub src_device: CUdeviceptr,
    pub src_array: CUarray,
    pub reserved0: *mut c_void,
    pub src_pitch: usize,
    pub src_height: usize,

    pub dst_x_in_bytes: usize,
    pub dst_y: usize,
    pub dst_z: usize,
    pub dst_lod: usize,
    pub dst_memory_type: c_uint,
    pub dst_host: *mut c_void,
    pub dst_device: CUdeviceptr,
    pub dst_array: CUarray,
    pub reserved1: *mut c_void,
    pub dst_pitch: usize,
    pub dst_height: usize,

    pub width_in_bytes: usize,
    pub height: usize,
    pub depth: usize,
}

impl Default for CudaMemcpy3D {
    fn default() -> Self {
        Self {
            src_x_in_bytes: 0,
            src_y: 0,
            src_z: 0,
            src_lod: 0,
            src_memory_type: 0,
            src_host: ptr::null(),
            src_device: 0,
            src_array: ptr::null_mut(),
            reserved0: ptr::null_mut(),
            src_pitch: 0,
            src_height: 0,
            dst_x_in_bytes: 0,
            dst_y: 0,
            dst_z: 0,
            dst_lod: 0,
            dst_memory_type: 0,
            dst_host: ptr::null_mut(),
            dst_device: 0,
            dst_array: ptr::null_mut(),
            reserved1: ptr::null_mut(),
            dst_pitch: 0,
            dst_height: 0,
            width_in_bytes: 0,
            height: 0,
            depth: 0,
        }
    }
}

/// `CUDA_ARRAY3D_DESCRIPTOR`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct CudaArray3DDescriptor {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub format: c_uint,
    pub num_channels: c_uint,
    pub flags: c_uint,
}

/// Linear member of the `CUDA_RESOURCE_DESC` union
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct CudaResourceLinear {
    pub dev_ptr: CUdeviceptr,
    pub format: c_uint,
    pub num_channels: c_uint,
    pub size_in_bytes: usize,
}

/// Resource union of `CUDA_RESOURCE_DESC` (only the linear member is used)
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(missing_docs)]
pub union CudaResourceUnion {
    pub linear: CudaResourceLinear,
    pub reserved: [c_int; 32],
}

/// `CUDA_RESOURCE_DESC`
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(missing_docs)]
pub struct CudaResourceDesc {
    pub res_type: c_uint,
    pub res: CudaResourceUnion,
    pub flags: c_uint,
}

/// `CUDA_TEXTURE_DESC`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct CudaTextureDesc {
    pub address_mode: [c_uint; 3],
    pub filter_mode: c_uint,
    pub flags: c_uint,
    pub max_anisotropy: c_uint,
    pub mipmap_filter_mode: c_uint,
    pub mipmap_level_bias: f32,
    pub min_mipmap_level_clamp: f32,
    pub max_mipmap_level_clamp: f32,
    pub border_color: [f32; 4],
    pub reserved: [c_int; 12],
}

// ============================================================================
// CUDA Driver Function Pointers
// ============================================================================

/// Dynamically loaded CUDA driver functions
#[allow(non_snake_case)]
#[allow(missing_docs)]
pub struct CudaDriver {
    // Initialization and error reporting
    pub cuInit: unsafe extern "C" fn(flags: c_uint) -> CUresult,
    pub cuGetErrorName: unsafe extern "C" fn(error: CUresult, name: *mut *const c_char) -> CUresult,
    pub cuGetErrorString:
        unsafe extern "C" fn(error: CUresult, desc: *mut *const c_char) -> CUresult,

    // Device management
    pub cuDeviceGetCount: unsafe extern "C" fn(count: *mut c_int) -> CUresult,
    pub cuDeviceGet: unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> CUresult,
    pub cuDeviceGetName:
        unsafe extern "C" fn(name: *mut c_char, len: c_int, device: CUdevice) -> CUresult,
    pub cuDeviceTotalMem: unsafe extern "C" fn(bytes: *mut usize, device: CUdevice) -> CUresult,
    pub cuDeviceGetAttribute:
        unsafe extern "C" fn(value: *mut c_int, attrib: c_int, device: CUdevice) -> CUresult,

    // Context management (primary context API)
    pub cuDevicePrimaryCtxRetain:
        unsafe extern "C" fn(ctx: *mut CUcontext, device: CUdevice) -> CUresult,
    pub cuDevicePrimaryCtxRelease: unsafe extern "C" fn(device: CUdevice) -> CUresult,
    pub cuDevicePrimaryCtxReset: unsafe extern "C" fn(device: CUdevice) -> CUresult,
    pub cuCtxSetCurrent: unsafe extern "C" fn(ctx: CUcontext) -> CUresult,
    pub cuCtxGetDevice: unsafe extern "C" fn(device: *mut CUdevice) -> CUresult,
    pub cuCtxSynchronize: unsafe extern "C" fn() -> CUresult,
    pub cuCtxGetLimit: unsafe extern "C" fn(value: *mut usize, limit: c_uint) -> CUresult,
    pub cuCtxSetLimit: unsafe extern "C" fn(limit: c_uint, value: usize) -> CUresult,

    // Module management
    pub cuModuleLoadData:
        unsafe extern "C" fn(module: *mut CUmodule, image: *const c_void) -> CUresult,
    pub cuModuleUnload: unsafe extern "C" fn(module: CUmodule) -> CUresult,
    pub cuModuleGetFunction: unsafe extern "C" fn(
        func: *mut CUfunction,
        module: CUmodule,
        name: *const c_char,
    ) -> CUresult,

    // Linker
    pub cuLinkCreate: unsafe extern "C" fn(
        num_options: c_uint,
        options: *mut c_uint,
        option_values: *mut *mut c_void,
        state: *mut CUlinkState,
    ) -> CUresult,
    pub cuLinkAddData: unsafe extern "C" fn(
        state: CUlinkState,
        input_type: c_uint,
        data: *mut c_void,
        size: usize,
        name: *const c_char,
        num_options: c_uint,
        options: *mut c_uint,
        option_values: *mut *mut c_void,
    ) -> CUresult,
    pub cuLinkAddFile: unsafe extern "C" fn(
        state: CUlinkState,
        input_type: c_uint,
        path: *const c_char,
        num_options: c_uint,
        options: *mut c_uint,
        option_values: *mut *mut c_void,
    ) -> CUresult,
    pub cuLinkComplete: unsafe extern "C" fn(
        state: CUlinkState,
        cubin: *mut *mut c_void,
        size: *mut usize,
    ) -> CUresult,
    pub cuLinkDestroy: unsafe extern "C" fn(state: CUlinkState) -> CUresult,

    // Memory management
    pub cuMemAlloc: unsafe extern "C" fn(ptr: *mut CUdeviceptr, size: usize) -> CUresult,
    pub cuMemFree: unsafe extern "C" fn(ptr: CUdeviceptr) -> CUresult,
    pub cuMemAllocHost: unsafe extern "C" fn(ptr: *mut *mut c_void, size: usize) -> CUresult,
    pub cuMemFreeHost: unsafe extern "C" fn(ptr: *mut c_void) -> CUresult,
    pub cuMemAllocPitch: unsafe extern "C" fn(
        ptr: *mut CUdeviceptr,
        pitch: *mut usize,
        width_in_bytes: usize,
        height: usize,
        element_size_bytes: c_uint,
    ) -> CUresult,
    pub cuMemcpyHtoD:
        unsafe extern "C" fn(dst: CUdeviceptr, src: *const c_void, size: usize) -> CUresult,
    pub cuMemcpyDtoH:
        unsafe extern "C" fn(dst: *mut c_void, src: CUdeviceptr, size: usize) -> CUresult,
    pub cuMemcpyDtoD:
        unsafe extern "C" fn(dst: CUdeviceptr, src: CUdeviceptr, size: usize) -> CUresult,
    pub cuMemcpy3D: unsafe extern "C" fn(copy: *const CudaMemcpy3D) -> CUresult,
    pub cuArray3DCreate: unsafe extern "C" fn(
        array: *mut CUarray,
        desc: *const CudaArray3DDescriptor,
    ) -> CUresult,
    pub cuArrayDestroy: unsafe extern "C" fn(array: CUarray) -> CUresult,

    // Textures
    pub cuTexObjectCreate: unsafe extern "C" fn(
        tex: *mut CUtexObject,
        res_desc: *const CudaResourceDesc,
        tex_desc: *const CudaTextureDesc,
        view_desc: *const c_void,
    ) -> CUresult,
    pub cuTexObjectDestroy: unsafe extern "C" fn(tex: CUtexObject) -> CUresult,

    // Kernel launch
    #[allow(clippy::type_complexity)]
    pub cuLaunchKernel: unsafe extern "C" fn(
        func: CUfunction,
        grid_dim_x: c_uint,
        grid_dim_y: c_uint,
        grid_dim_z: c_uint,
        block_dim_x: c_uint,
        block_dim_y: c_uint,
        block_dim_z: c_uint,
        shared_mem_bytes: c_uint,
        stream: CUstream,
        kernel_params: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> CUresult,
}

// ============================================================================
// Dynamic Loading
// ============================================================================

#[cfg(feature = "cuda")]
mod loading {
    use super::*;
    use libloading::{Library, Symbol};
    use std::sync::OnceLock;

    /// Global driver instance (loaded once)
    static DRIVER: OnceLock<Option<CudaDriver>> = OnceLock::new();

    /// Library handle (must outlive function pointers)
    static LIBRARY: OnceLock<Option<Library>> = OnceLock::new();

    impl CudaDriver {
        /// Load the CUDA driver dynamically
        ///
        /// Returns `None` when no driver is installed; that is the normal
        /// situation on machines without an NVIDIA GPU.
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            let _ = LIBRARY.get_or_init(|| {
                #[cfg(target_os = "linux")]
                let lib_names = ["libcuda.so.1", "libcuda.so"];
                #[cfg(target_os = "windows")]
                let lib_names = ["nvcuda.dll"];
                #[cfg(not(any(target_os = "linux", target_os = "windows")))]
                let lib_names: [&str; 0] = [];

                for name in lib_names {
                    // SAFETY: loading a well-known system library
                    if let Ok(lib) = unsafe { Library::new(name) } {
                        tracing::debug!(library = name, "loaded CUDA driver");
                        return Some(lib);
                    }
                }
                None
            });

            DRIVER
                .get_or_init(|| {
                    let lib = LIBRARY.get()?.as_ref()?;
                    Self::load_from_library(lib)
                })
                .as_ref()
        }

        #[allow(clippy::too_many_lines)]
        fn load_from_library(lib: &Library) -> Option<Self> {
            // SAFETY: every symbol is a documented CUDA driver entry point and
            // is cast to its documented signature
            unsafe {
                macro_rules! load_sym {
                    ($name:ident) => {{
                        let sym: Symbol<'_, _> = lib.get(stringify!($name).as_bytes()).ok()?;
                        *sym
                    }};
                }

                Some(CudaDriver {
                    cuInit: load_sym!(cuInit),
                    cuGetErrorName: load_sym!(cuGetErrorName),
                    cuGetErrorString: load_sym!(cuGetErrorString),
                    cuDeviceGetCount: load_sym!(cuDeviceGetCount),
                    cuDeviceGet: load_sym!(cuDeviceGet),
                    cuDeviceGetName: load_sym!(cuDeviceGetName),
                    cuDeviceTotalMem: load_sym!(cuDeviceTotalMem_v2),
                    cuDeviceGetAttribute: load_sym!(cuDeviceGetAttribute),
                    cuDevicePrimaryCtxRetain: load_sym!(cuDevicePrimaryCtxRetain),
                    cuDevicePrimaryCtxRelease: load_sym!(cuDevicePrimaryCtxRelease_v2),
                    cuDevicePrimaryCtxReset: load_sym!(cuDevicePrimaryCtxReset_v2),
                    cuCtxSetCurrent: load_sym!(cuCtxSetCurrent),
                    cuCtxGetDevice: load_sym!(cuCtxGetDevice),
                    cuCtxSynchronize: load_sym!(cuCtxSynchronize),
                    cuCtxGetLimit: load_sym!(cuCtxGetLimit),
                    cuCtxSetLimit: load_sym!(cuCtxSetLimit),
                    cuModuleLoadData: load_sym!(cuModuleLoadData),
                    cuModuleUnload: load_sym!(cuModuleUnload),
                    cuModuleGetFunction: load_sym!(cuModuleGetFunction),
                    cuLinkCreate: load_sym!(cuLinkCreate_v2),
                    cuLinkAddData: load_sym!(cuLinkAddData_v2),
                    cuLinkAddFile: load_sym!(cuLinkAddFile_v2),
                    cuLinkComplete: load_sym!(cuLinkComplete),
                    cuLinkDestroy: load_sym!(cuLinkDestroy),
                    cuMemAlloc: load_sym!(cuMemAlloc_v2),
                    cuMemFree: load_sym!(cuMemFree_v2),
                    cuMemAllocHost: load_sym!(cuMemAllocHost_v2),
                    cuMemFreeHost: load_sym!(cuMemFreeHost),
                    cuMemAllocPitch: load_sym!(cuMemAllocPitch_v2),
                    cuMemcpyHtoD: load_sym!(cuMemcpyHtoD_v2),
                    cuMemcpyDtoH: load_sym!(cuMemcpyDtoH_v2),
                    cuMemcpyDtoD: load_sym!(cuMemcpyDtoD_v2),
                    cuMemcpy3D: load_sym!(cuMemcpy3D_v2),
                    cuArray3DCreate: load_sym!(cuArray3DCreate_v2),
                    cuArrayDestroy: load_sym!(cuArrayDestroy),
                    cuTexObjectCreate: load_sym!(cuTexObjectCreate),
                    cuTexObjectDestroy: load_sym!(cuTexObjectDestroy),
                    cuLaunchKernel: load_sym!(cuLaunchKernel),
                })
            }
        }
    }
}

#[cfg(not(feature = "cuda"))]
mod loading {
    use super::CudaDriver;

    impl CudaDriver {
        /// CUDA not available without the `cuda` feature
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            None
        }
    }
}

impl CudaDriver {
    /// Translate the status of one driver call
    ///
    /// The error describes `result` itself, not whatever error the driver last
    /// recorded on this thread.
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if `result` is not `CUDA_SUCCESS`.
    #[track_caller]
    pub fn check(&self, op: &'static str, result: CUresult) -> Result<(), JitError> {
        if result == CUDA_SUCCESS {
            return Ok(());
        }
        let name = self
            .lookup(self.cuGetErrorName, result)
            .unwrap_or_else(|| cuda_error_string(result).to_string());
        let description = self
            .lookup(self.cuGetErrorString, result)
            .unwrap_or_else(|| name.clone());
        Err(DeviceError::new(op, result, name, description).into())
    }

    fn lookup(
        &self,
        getter: unsafe extern "C" fn(CUresult, *mut *const c_char) -> CUresult,
        code: CUresult,
    ) -> Option<String> {
        let mut text: *const c_char = ptr::null();
        // SAFETY: text is a valid out-pointer; the driver returns a static string
        let status = unsafe { getter(code, &mut text) };
        if status != CUDA_SUCCESS || text.is_null() {
            return None;
        }
        // SAFETY: non-null, NUL-terminated static string owned by the driver
        Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
    }
}

// ============================================================================
// Error String Conversion
// ============================================================================

/// Convert CUDA error code to its symbolic name
///
/// Used when the driver cannot name the code itself.
#[must_use]
pub fn cuda_error_string(code: CUresult) -> &'static str {
    match code {
        CUDA_SUCCESS => "CUDA_SUCCESS",
        CUDA_ERROR_INVALID_VALUE => "CUDA_ERROR_INVALID_VALUE",
        CUDA_ERROR_OUT_OF_MEMORY => "CUDA_ERROR_OUT_OF_MEMORY",
        CUDA_ERROR_NOT_INITIALIZED => "CUDA_ERROR_NOT_INITIALIZED",
        CUDA_ERROR_DEINITIALIZED => "CUDA_ERROR_DEINITIALIZED",
        CUDA_ERROR_NO_DEVICE => "CUDA_ERROR_NO_DEVICE",
        CUDA_ERROR_INVALID_DEVICE => "CUDA_ERROR_INVALID_DEVICE",
        CUDA_ERROR_INVALID_IMAGE => "CUDA_ERROR_INVALID_IMAGE",
        CUDA_ERROR_INVALID_CONTEXT => "CUDA_ERROR_INVALID_CONTEXT",
        CUDA_ERROR_NO_BINARY_FOR_GPU => "CUDA_ERROR_NO_BINARY_FOR_GPU",
        CUDA_ERROR_INVALID_PTX => "CUDA_ERROR_INVALID_PTX",
        CUDA_ERROR_FILE_NOT_FOUND => "CUDA_ERROR_FILE_NOT_FOUND",
        CUDA_ERROR_INVALID_HANDLE => "CUDA_ERROR_INVALID_HANDLE",
        CUDA_ERROR_NOT_FOUND => "CUDA_ERROR_NOT_FOUND",
        CUDA_ERROR_ILLEGAL_ADDRESS => "CUDA_ERROR_ILLEGAL_ADDRESS",
        CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES => "CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES",
        CUDA_ERROR_LAUNCH_FAILED => "CUDA_ERROR_LAUNCH_FAILED",
        CUDA_ERROR_NOT_SUPPORTED => "CUDA_ERROR_NOT_SUPPORTED",
        _ => "CUDA_ERROR_UNKNOWN",
    }
}

/// Input type for a link dependency, chosen by file extension
#[must_use]
pub fn jit_input_type(path: &str) -> c_uint {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("ptx") => CU_JIT_INPUT_PTX,
        Some("cubin") => CU_JIT_INPUT_CUBIN,
        Some("fatbin") => CU_JIT_INPUT_FATBINARY,
        Some("o" | "obj") => CU_JIT_INPUT_OBJECT,
        _ => CU_JIT_INPUT_LIBRARY,
    }
}

// ============================================================================
// Tests
// ============================================================================
