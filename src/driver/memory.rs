//! GPU Memory Management
//!
//! RAII owners for every allocation kind the bridge hands out, plus the copy
//! primitives between them. Each owner frees its memory on drop; after a
//! context reset the memory is already gone and the owner must be forgotten
//! with [`std::mem::forget`] instead.

use std::ffi::c_void;
use std::ptr;

use super::context::get_driver;
use super::sys::{
    CUarray, CUdeviceptr, CUtexObject, CudaArray3DDescriptor, CudaMemcpy3D, CudaResourceDesc,
    CudaResourceLinear, CudaResourceUnion, CudaTextureDesc, CU_AD_FORMAT_SIGNED_INT8,
    CU_MEMORYTYPE_ARRAY, CU_MEMORYTYPE_DEVICE, CU_MEMORYTYPE_HOST, CU_RESOURCE_TYPE_LINEAR,
    CU_TRSF_READ_AS_INTEGER, CU_TR_ADDRESS_MODE_MIRROR, CU_TR_FILTER_MODE_POINT,
};
use super::types::{Extent3D, PitchedPtr, Volume};
use crate::error::Result;

/// Element size handed to `cuMemAllocPitch` (selects the pitch alignment)
const PITCH_ELEMENT_BYTES: u32 = 4;

// ============================================================================
// Linear device memory
// ============================================================================

/// Linear device allocation
#[derive(Debug)]
pub struct DeviceMemory {
    ptr: CUdeviceptr,
    bytes: usize,
}

impl DeviceMemory {
    /// Allocate `bytes` of device memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if allocation fails (out of memory, zero size).
    pub fn new(bytes: usize) -> Result<Self> {
        let driver = get_driver()?;
        let mut ptr: CUdeviceptr = 0;
        // SAFETY: ptr is a valid out-pointer
        let result = unsafe { (driver.cuMemAlloc)(&mut ptr, bytes) };
        driver.check("cuMemAlloc", result)?;
        Ok(Self { ptr, bytes })
    }

    /// Device address
    #[must_use]
    pub fn as_ptr(&self) -> CUdeviceptr {
        self.ptr
    }

    /// Allocation size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: ptr came from cuMemAlloc and is freed once
            unsafe {
                let _ = (driver.cuMemFree)(self.ptr);
            }
        }
    }
}

/// Copy host bytes to `dst`
///
/// # Errors
///
/// Returns `Err(JitError::Device)` if the copy fails.
pub fn copy_htod(dst: CUdeviceptr, src: &[u8]) -> Result<()> {
    if src.is_empty() {
        return Ok(());
    }
    let driver = get_driver()?;
    // SAFETY: src is valid for src.len() bytes; the caller bounds-checked dst
    let result = unsafe { (driver.cuMemcpyHtoD)(dst, src.as_ptr().cast::<c_void>(), src.len()) };
    driver.check("cuMemcpyHtoD", result)
}

/// Copy device bytes at `src` into `dst`
///
/// # Errors
///
/// Returns `Err(JitError::Device)` if the copy fails.
pub fn copy_dtoh(dst: &mut [u8], src: CUdeviceptr) -> Result<()> {
    if dst.is_empty() {
        return Ok(());
    }
    let driver = get_driver()?;
    // SAFETY: dst is valid for dst.len() bytes; the caller bounds-checked src
    let result =
        unsafe { (driver.cuMemcpyDtoH)(dst.as_mut_ptr().cast::<c_void>(), src, dst.len()) };
    driver.check("cuMemcpyDtoH", result)
}

/// Copy `bytes` between two device addresses
///
/// # Errors
///
/// Returns `Err(JitError::Device)` if the copy fails.
pub fn copy_dtod(dst: CUdeviceptr, src: CUdeviceptr, bytes: usize) -> Result<()> {
    if bytes == 0 {
        return Ok(());
    }
    let driver = get_driver()?;
    // SAFETY: the caller bounds-checked both ranges
    let result = unsafe { (driver.cuMemcpyDtoD)(dst, src, bytes) };
    driver.check("cuMemcpyDtoD", result)
}

// ============================================================================
// Pinned host memory
// ============================================================================

/// Page-locked host allocation
#[derive(Debug)]
pub struct PinnedMemory {
    ptr: *mut c_void,
    bytes: usize,
}

// SAFETY: the allocation is plain host memory owned by this value
unsafe impl Send for PinnedMemory {}

impl PinnedMemory {
    /// Allocate `bytes` of page-locked host memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if allocation fails.
    pub fn new(bytes: usize) -> Result<Self> {
        let driver = get_driver()?;
        let mut ptr: *mut c_void = ptr::null_mut();
        // SAFETY: ptr is a valid out-pointer
        let result = unsafe { (driver.cuMemAllocHost)(&mut ptr, bytes) };
        driver.check("cuMemAllocHost", result)?;
        Ok(Self { ptr, bytes })
    }

    /// Host address (also valid in kernels on unified-addressing devices)
    #[must_use]
    pub fn address(&self) -> u64 {
        self.ptr as u64
    }

    /// Allocation size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    /// View the allocation
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        if self.bytes == 0 {
            return &[];
        }
        // SAFETY: ptr is valid for `bytes` bytes while self is alive
        unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.bytes) }
    }

    /// Mutably view the allocation
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.bytes == 0 {
            return &mut [];
        }
        // SAFETY: ptr is valid for `bytes` bytes and uniquely borrowed
        unsafe { std::slice::from_raw_parts_mut(self.ptr.cast::<u8>(), self.bytes) }
    }
}

impl Drop for PinnedMemory {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: ptr came from cuMemAllocHost and is freed once
            unsafe {
                let _ = (driver.cuMemFreeHost)(self.ptr);
            }
        }
    }
}

// ============================================================================
// 3-D pitched memory
// ============================================================================

/// 3-D allocation with toolkit-chosen row pitch
///
/// Allocated as `height * depth` padded rows of `width` bytes.
#[derive(Debug)]
pub struct PitchedMemory {
    ptr: CUdeviceptr,
    pitch: usize,
    extent: Extent3D,
}

impl PitchedMemory {
    /// Allocate a pitched volume of `extent` (width in bytes)
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if allocation fails.
    pub fn new(extent: Extent3D) -> Result<Self> {
        let driver = get_driver()?;
        let rows = extent.height.saturating_mul(extent.depth);
        let mut ptr: CUdeviceptr = 0;
        let mut pitch: usize = 0;
        // SAFETY: out-pointers are valid
        let result = unsafe {
            (driver.cuMemAllocPitch)(&mut ptr, &mut pitch, extent.width, rows, PITCH_ELEMENT_BYTES)
        };
        driver.check("cuMemAllocPitch", result)?;
        Ok(Self { ptr, pitch, extent })
    }

    /// Descriptor in the toolkit's pitched-pointer layout
    #[must_use]
    pub fn pitched_ptr(&self) -> PitchedPtr {
        PitchedPtr {
            ptr: self.ptr,
            pitch: self.pitch as u64,
            xsize: self.extent.width as u64,
            ysize: self.extent.height as u64,
        }
    }

    /// Requested extent
    #[must_use]
    pub fn extent(&self) -> Extent3D {
        self.extent
    }
}

impl Drop for PitchedMemory {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: ptr came from cuMemAllocPitch and is freed once
            unsafe {
                let _ = (driver.cuMemFree)(self.ptr);
            }
        }
    }
}

// ============================================================================
// 3-D arrays
// ============================================================================

/// 3-D array of signed 8-bit single-channel elements
#[derive(Debug)]
pub struct Array3D {
    array: CUarray,
    extent: Extent3D,
}

// SAFETY: CUarray handles may be used from any thread
unsafe impl Send for Array3D {}

impl Array3D {
    /// Allocate an array of `extent` elements
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if allocation fails.
    pub fn new(extent: Extent3D) -> Result<Self> {
        let driver = get_driver()?;
        let desc = CudaArray3DDescriptor {
            width: extent.width,
            height: extent.height,
            depth: extent.depth,
            format: CU_AD_FORMAT_SIGNED_INT8,
            num_channels: 1,
            flags: 0,
        };
        let mut array: CUarray = ptr::null_mut();
        // SAFETY: desc and out-pointer are valid
        let result = unsafe { (driver.cuArray3DCreate)(&mut array, &desc) };
        driver.check("cuArray3DCreate", result)?;
        Ok(Self { array, extent })
    }

    /// Opaque array handle as an integer
    #[must_use]
    pub fn address(&self) -> u64 {
        self.array as u64
    }

    /// Allocated extent in elements
    #[must_use]
    pub fn extent(&self) -> Extent3D {
        self.extent
    }
}

impl Drop for Array3D {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: array came from cuArray3DCreate and is destroyed once
            unsafe {
                let _ = (driver.cuArrayDestroy)(self.array);
            }
        }
    }
}

impl Volume {
    fn fill_src(self, copy: &mut CudaMemcpy3D) {
        match self {
            Self::Pitched { ptr, pitch, height } => {
                copy.src_memory_type = CU_MEMORYTYPE_DEVICE;
                copy.src_device = ptr;
                copy.src_pitch = pitch;
                copy.src_height = height;
            }
            Self::Array(array) => {
                copy.src_memory_type = CU_MEMORYTYPE_ARRAY;
                copy.src_array = array as CUarray;
            }
        }
    }

    fn fill_dst(self, copy: &mut CudaMemcpy3D) {
        match self {
            Self::Pitched { ptr, pitch, height } => {
                copy.dst_memory_type = CU_MEMORYTYPE_DEVICE;
                copy.dst_device = ptr;
                copy.dst_pitch = pitch;
                copy.dst_height = height;
            }
            Self::Array(array) => {
                copy.dst_memory_type = CU_MEMORYTYPE_ARRAY;
                copy.dst_array = array as CUarray;
            }
        }
    }
}

/// Copy a densely packed host volume into `dst`
///
/// The host rows are `extent.width` bytes apart.
///
/// # Errors
///
/// Returns `Err(JitError::Device)` if the copy fails.
pub fn copy_3d_htod(dst: Volume, src: &[u8], extent: Extent3D) -> Result<()> {
    let driver = get_driver()?;
    let mut copy = CudaMemcpy3D {
        src_memory_type: CU_MEMORYTYPE_HOST,
        src_host: src.as_ptr().cast::<c_void>(),
        src_pitch: extent.width,
        src_height: extent.height,
        width_in_bytes: extent.width,
        height: extent.height,
        depth: extent.depth,
        ..CudaMemcpy3D::default()
    };
    dst.fill_dst(&mut copy);
    // SAFETY: src covers the packed extent (checked by the caller)
    let result = unsafe { (driver.cuMemcpy3D)(&copy) };
    driver.check("cuMemcpy3D", result)
}

/// Copy `src` into a densely packed host volume
///
/// # Errors
///
/// Returns `Err(JitError::Device)` if the copy fails.
pub fn copy_3d_dtoh(dst: &mut [u8], src: Volume, extent: Extent3D) -> Result<()> {
    let driver = get_driver()?;
    let mut copy = CudaMemcpy3D {
        dst_memory_type: CU_MEMORYTYPE_HOST,
        dst_host: dst.as_mut_ptr().cast::<c_void>(),
        dst_pitch: extent.width,
        dst_height: extent.height,
        width_in_bytes: extent.width,
        height: extent.height,
        depth: extent.depth,
        ..CudaMemcpy3D::default()
    };
    src.fill_src(&mut copy);
    // SAFETY: dst covers the packed extent (checked by the caller)
    let result = unsafe { (driver.cuMemcpy3D)(&copy) };
    driver.check("cuMemcpy3D", result)
}

// ============================================================================
// Textures
// ============================================================================

/// Texture object over linear device memory
///
/// Sampling policy is fixed: signed 8-bit single channel, point filtering,
/// mirror addressing on every axis, unnormalized coordinates, integer reads.
#[derive(Debug)]
pub struct TextureObject {
    texture: CUtexObject,
}

impl TextureObject {
    /// Create a texture reading `bytes` bytes starting at `ptr`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the driver rejects the descriptor.
    pub fn over_linear(ptr: CUdeviceptr, bytes: usize) -> Result<Self> {
        let driver = get_driver()?;
        let res_desc = CudaResourceDesc {
            res_type: CU_RESOURCE_TYPE_LINEAR,
            res: CudaResourceUnion {
                linear: CudaResourceLinear {
                    dev_ptr: ptr,
                    format: CU_AD_FORMAT_SIGNED_INT8,
                    num_channels: 1,
                    size_in_bytes: bytes,
                },
            },
            flags: 0,
        };
        let tex_desc = CudaTextureDesc {
            address_mode: [CU_TR_ADDRESS_MODE_MIRROR; 3],
            filter_mode: CU_TR_FILTER_MODE_POINT,
            flags: CU_TRSF_READ_AS_INTEGER,
            ..CudaTextureDesc::default()
        };
        let mut texture: CUtexObject = 0;
        // SAFETY: descriptors are fully initialized; no view descriptor
        let result = unsafe {
            (driver.cuTexObjectCreate)(&mut texture, &res_desc, &tex_desc, ptr::null())
        };
        driver.check("cuTexObjectCreate", result)?;
        Ok(Self { texture })
    }

    /// Texture object value passed to kernels
    #[must_use]
    pub fn raw(&self) -> CUtexObject {
        self.texture
    }
}

impl Drop for TextureObject {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: texture came from cuTexObjectCreate and is destroyed once
            unsafe {
                let _ = (driver.cuTexObjectDestroy)(self.texture);
            }
        }
    }
}
