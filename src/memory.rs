//! Device Memory Manager
//!
//! Tracks every allocation the runtime hands out: linear device buffers,
//! page-locked host buffers, 3-D pitched buffers, 3-D arrays and textures.
//! Each slot records the allocation's size (and extent for 3-D forms), so a
//! transfer that would run past either end is refused before the device sees
//! it.
//!
//! The toolkit work itself goes through [`Device`]; this module only does the
//! bookkeeping and the checks.

use std::fmt;

use crate::backend::Device;
use crate::driver::{Extent3D, PitchedPtr, Volume};
use crate::error::{JitError, Result};
use crate::handle::{Handle, Registry, Resource, ResourceKind};

/// Handle of a [`DeviceBuffer`]
pub type DeviceBufferHandle = Handle<DeviceBuffer>;
/// Handle of a [`PinnedBuffer`]
pub type PinnedBufferHandle = Handle<PinnedBuffer>;
/// Handle of a [`PitchedBuffer`]
pub type PitchedBufferHandle = Handle<PitchedBuffer>;
/// Handle of a [`DeviceArray`]
pub type DeviceArrayHandle = Handle<DeviceArray>;
/// Handle of a [`Texture`]
pub type TextureHandle = Handle<Texture>;

/// Linear device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    ptr: u64,
    size: usize,
}

impl Resource for DeviceBuffer {
    const KIND: ResourceKind = ResourceKind::DeviceBuffer;
}

impl DeviceBuffer {
    /// Device address
    #[must_use]
    pub const fn ptr(&self) -> u64 {
        self.ptr
    }

    /// Size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Page-locked host allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedBuffer {
    addr: u64,
    size: usize,
}

impl Resource for PinnedBuffer {
    const KIND: ResourceKind = ResourceKind::PinnedBuffer;
}

impl PinnedBuffer {
    /// Host address
    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    /// Size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// 3-D pitched device allocation with single-byte elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchedBuffer {
    ptr: PitchedPtr,
    extent: Extent3D,
}

impl Resource for PitchedBuffer {
    const KIND: ResourceKind = ResourceKind::PitchedBuffer;
}

impl PitchedBuffer {
    /// Descriptor reported by the toolkit
    #[must_use]
    pub const fn pitched_ptr(&self) -> PitchedPtr {
        self.ptr
    }

    /// Requested extent
    #[must_use]
    pub const fn extent(&self) -> Extent3D {
        self.extent
    }

    /// Bytes spanned including row padding
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn span_bytes(&self) -> usize {
        self.ptr.span_bytes(self.extent.depth as u64) as usize
    }

    #[allow(clippy::cast_possible_truncation)]
    fn volume(&self) -> Volume {
        Volume::Pitched {
            ptr: self.ptr.ptr,
            pitch: self.ptr.pitch as usize,
            height: self.extent.height,
        }
    }
}

/// 3-D array of signed 8-bit single-channel elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceArray {
    array: u64,
    extent: Extent3D,
}

impl Resource for DeviceArray {
    const KIND: ResourceKind = ResourceKind::DeviceArray;
}

impl DeviceArray {
    /// Extent in elements (bytes)
    #[must_use]
    pub const fn extent(&self) -> Extent3D {
        self.extent
    }
}

/// Allocation a texture reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    /// Linear device buffer
    Buffer(DeviceBufferHandle),
    /// Pitched 3-D buffer
    Pitched(PitchedBufferHandle),
}

impl From<DeviceBufferHandle> for TextureTarget {
    fn from(handle: DeviceBufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

impl From<PitchedBufferHandle> for TextureTarget {
    fn from(handle: PitchedBufferHandle) -> Self {
        Self::Pitched(handle)
    }
}

/// Texture object over linear memory
///
/// Point filtering, mirror addressing on every axis, unnormalized
/// coordinates, reads return the stored element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    object: u64,
    target: TextureTarget,
    length: usize,
}

impl Resource for Texture {
    const KIND: ResourceKind = ResourceKind::Texture;
}

impl Texture {
    /// Toolkit texture object
    #[must_use]
    pub const fn object(&self) -> u64 {
        self.object
    }

    /// Allocation the texture was bound over
    #[must_use]
    pub const fn target(&self) -> TextureTarget {
        self.target
    }

    /// Bound length in bytes
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}

/// Result of a pitched allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pitched3D {
    /// Handle for later transfers and release
    pub handle: PitchedBufferHandle,
    /// Base address, pitch and logical size
    pub ptr: PitchedPtr,
}

fn out_of_bounds(what: &str, requested: usize, available: usize) -> JitError {
    JitError::OutOfBounds(format!(
        "{what}: {requested} bytes requested, {available} available"
    ))
}

fn check_len(what: &str, requested: usize, available: usize) -> Result<()> {
    if requested > available {
        return Err(out_of_bounds(what, requested, available));
    }
    Ok(())
}

/// Validate a 3-D copy of `extent` against the allocation and the host slice
///
/// Returns the packed host length the copy touches.
fn check_volume(
    what: &str,
    allocated: Extent3D,
    extent: Extent3D,
    host_len: usize,
) -> Result<usize> {
    if !allocated.contains(&extent) {
        return Err(JitError::OutOfBounds(format!(
            "{what}: extent {}x{}x{} exceeds allocation {}x{}x{}",
            extent.width,
            extent.height,
            extent.depth,
            allocated.width,
            allocated.height,
            allocated.depth
        )));
    }
    let packed = extent
        .packed_len()
        .ok_or_else(|| JitError::OutOfBounds(format!("{what}: extent overflows usize")))?;
    check_len(what, packed, host_len)?;
    Ok(packed)
}

/// Bookkeeping for every live allocation
#[derive(Default)]
pub struct MemoryManager {
    buffers: Registry<DeviceBuffer>,
    pinned: Registry<PinnedBuffer>,
    pitched: Registry<PitchedBuffer>,
    arrays: Registry<DeviceArray>,
    textures: Registry<Texture>,
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("buffers", &self.buffers.len())
            .field("pinned", &self.pinned.len())
            .field("pitched", &self.pitched.len())
            .field("arrays", &self.arrays.len())
            .field("textures", &self.textures.len())
            .finish()
    }
}

impl MemoryManager {
    /// Empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations of every kind
    #[must_use]
    pub fn live(&self) -> usize {
        self.buffers.len()
            + self.pinned.len()
            + self.pitched.len()
            + self.arrays.len()
            + self.textures.len()
    }

    // Linear device memory

    /// Allocate `bytes` of device memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_device(
        &mut self,
        device: &mut dyn Device,
        bytes: usize,
    ) -> Result<DeviceBufferHandle> {
        let ptr = device.alloc(bytes)?;
        let handle = self.buffers.insert(DeviceBuffer { ptr, size: bytes });
        tracing::debug!(ptr = format_args!("{ptr:#x}"), bytes, "device buffer allocated");
        Ok(handle)
    }

    /// Release a device buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale handle or
    /// `Err(JitError::Device)` if the device refuses the free.
    pub fn free(&mut self, device: &mut dyn Device, handle: DeviceBufferHandle) -> Result<()> {
        let buffer = *self.buffers.get(handle)?;
        device.free(buffer.ptr)?;
        self.buffers.remove(handle)?;
        tracing::debug!(ptr = format_args!("{:#x}", buffer.ptr), "device buffer freed");
        Ok(())
    }

    /// Borrow a device buffer record
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn buffer(&self, handle: DeviceBufferHandle) -> Result<&DeviceBuffer> {
        self.buffers.get(handle)
    }

    /// Copy `src` to the start of a device buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `src` is larger than the buffer.
    pub fn write(
        &self,
        device: &mut dyn Device,
        handle: DeviceBufferHandle,
        src: &[u8]) -> Result<()> {
        let buffer = self.buffers.get(handle)?;
        check_len("write", src.len(), buffer.size)?;
        device.write(buffer.ptr, src)
    }

    /// Copy the start of a device buffer into `dst`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `dst` is larger than the buffer.
    pub fn read(
        &self,
        device: &dyn Device,
        handle: DeviceBufferHandle,
        dst: &mut [u8]) -> Result<()> {
        let buffer = self.buffers.get(handle)?;
        check_len("read", dst.len(), buffer.size)?;
        device.read(buffer.ptr, dst)
    }

    /// Copy `bytes` from the start of `src` to the start of `dst`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if either buffer is shorter than `bytes`.
    pub fn copy_device_to_device(
        &self,
        device: &mut dyn Device,
        dst: DeviceBufferHandle,
        src: DeviceBufferHandle,
        bytes: usize,
    ) -> Result<()> {
        let to = *self.buffers.get(dst)?;
        let from = *self.buffers.get(src)?;
        check_len("device copy source", bytes, from.size)?;
        check_len("device copy destination", bytes, to.size)?;
        device.copy(to.ptr, from.ptr, bytes)
    }

    // Pinned host memory

    /// Allocate `bytes` of page-locked host memory
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_pinned_host(
        &mut self,
        device: &mut dyn Device,
        bytes: usize,
    ) -> Result<PinnedBufferHandle> {
        let addr = device.alloc_pinned(bytes)?;
        let handle = self.pinned.insert(PinnedBuffer { addr, size: bytes });
        tracing::debug!(addr = format_args!("{addr:#x}"), bytes, "pinned buffer allocated");
        Ok(handle)
    }

    /// Release a pinned buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale handle.
    pub fn free_pinned(
        &mut self,
        device: &mut dyn Device,
        handle: PinnedBufferHandle) -> Result<()> {
        let buffer = *self.pinned.get(handle)?;
        device.free_pinned(buffer.addr)?;
        self.pinned.remove(handle)?;
        tracing::debug!(addr = format_args!("{:#x}", buffer.addr), "pinned buffer freed");
        Ok(())
    }

    /// Borrow a pinned buffer record
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn pinned(&self, handle: PinnedBufferHandle) -> Result<&PinnedBuffer> {
        self.pinned.get(handle)
    }

    /// Copy host bytes into the start of a pinned buffer
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `src` is larger than the buffer.
    pub fn write_pinned(
        &self,
        device: &mut dyn Device,
        handle: PinnedBufferHandle,
        src: &[u8]) -> Result<()> {
        let buffer = self.pinned.get(handle)?;
        check_len("pinned write", src.len(), buffer.size)?;
        let view = device.pinned_mut(buffer.addr)?;
        check_len("pinned write", src.len(), view.len())?;
        view[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy the start of a pinned buffer into host bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `dst` is larger than the buffer.
    pub fn read_pinned(
        &self,
        device: &dyn Device,
        handle: PinnedBufferHandle,
        dst: &mut [u8]) -> Result<()> {
        let buffer = self.pinned.get(handle)?;
        check_len("pinned read", dst.len(), buffer.size)?;
        let view = device.pinned(buffer.addr)?;
        check_len("pinned read", dst.len(), view.len())?;
        dst.copy_from_slice(&view[..dst.len()]);
        Ok(())
    }

    // 3-D pitched memory

    /// Allocate a pitched volume of `width` bytes by `height` rows by `depth` slices
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_3d(
        &mut self,
        device: &mut dyn Device,
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<Pitched3D> {
        let extent = Extent3D::new(width, height, depth);
        let ptr = device.alloc_pitched(extent)?;
        let handle = self.pitched.insert(PitchedBuffer { ptr, extent });
        tracing::debug!(
            ptr = format_args!("{:#x}", ptr.ptr),
            pitch = ptr.pitch,
            width,
            height,
            depth,
            "pitched buffer allocated"
        );
        Ok(Pitched3D { handle, ptr })
    }

    /// Release a pitched volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale handle.
    pub fn free_3d(&mut self, device: &mut dyn Device, handle: PitchedBufferHandle) -> Result<()> {
        let buffer = *self.pitched.get(handle)?;
        device.free_pitched(buffer.ptr.ptr)?;
        self.pitched.remove(handle)?;
        tracing::debug!(ptr = format_args!("{:#x}", buffer.ptr.ptr), "pitched buffer freed");
        Ok(())
    }

    /// Borrow a pitched buffer record
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn pitched(&self, handle: PitchedBufferHandle) -> Result<&PitchedBuffer> {
        self.pitched.get(handle)
    }

    /// Copy a packed host volume into a pitched buffer
    ///
    /// Host rows are `extent.width` bytes apart. `row_width` describes the
    /// host rows to the caller only; the copy itself never reads it.
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the extent exceeds the
    /// allocation or `src` is shorter than the packed extent.
    pub fn write_3d(
        &self,
        device: &mut dyn Device,
        handle: PitchedBufferHandle,
        src: &[u8],
        extent: Extent3D,
        row_width: usize,
    ) -> Result<()> {
        let buffer = self.pitched.get(handle)?;
        let packed = check_volume("3-D write", buffer.extent, extent, src.len())?;
        tracing::trace!(?extent, row_width, "3-D write");
        device.write_3d(buffer.volume(), &src[..packed], extent)
    }

    /// Copy a pitched buffer into a packed host volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the extent exceeds the
    /// allocation or `dst` is shorter than the packed extent.
    pub fn read_3d(
        &self,
        device: &dyn Device,
        handle: PitchedBufferHandle,
        dst: &mut [u8],
        extent: Extent3D,
        row_width: usize,
    ) -> Result<()> {
        let buffer = self.pitched.get(handle)?;
        let packed = check_volume("3-D read", buffer.extent, extent, dst.len())?;
        tracing::trace!(?extent, row_width, "3-D read");
        device.read_3d(buffer.volume(), &mut dst[..packed], extent)
    }

    // 3-D arrays

    /// Allocate an `x` by `y` by `z` array of signed bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the allocation fails.
    pub fn alloc_array_3d(
        &mut self,
        device: &mut dyn Device,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<DeviceArrayHandle> {
        let extent = Extent3D::new(x, y, z);
        let array = device.alloc_array(extent)?;
        let handle = self.arrays.insert(DeviceArray { array, extent });
        tracing::debug!(x, y, z, "device array allocated");
        Ok(handle)
    }

    /// Destroy an array
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale handle.
    pub fn free_array_3d(
        &mut self,
        device: &mut dyn Device,
        handle: DeviceArrayHandle) -> Result<()> {
        let array = *self.arrays.get(handle)?;
        device.free_array(array.array)?;
        self.arrays.remove(handle)?;
        tracing::debug!("device array freed");
        Ok(())
    }

    /// Copy a packed host volume into an array
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the extent exceeds the array
    /// or `src` is shorter than the packed extent.
    pub fn write_array_3d(
        &self,
        device: &mut dyn Device,
        handle: DeviceArrayHandle,
        src: &[u8],
        extent: Extent3D,
    ) -> Result<()> {
        let array = self.arrays.get(handle)?;
        let packed = check_volume("array write", array.extent, extent, src.len())?;
        device.write_3d(Volume::Array(array.array), &src[..packed], extent)
    }

    /// Copy an array into a packed host volume
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if the extent exceeds the array
    /// or `dst` is shorter than the packed extent.
    pub fn read_array_3d(
        &self,
        device: &dyn Device,
        handle: DeviceArrayHandle,
        dst: &mut [u8],
        extent: Extent3D,
    ) -> Result<()> {
        let array = self.arrays.get(handle)?;
        let packed = check_volume("array read", array.extent, extent, dst.len())?;
        device.read_3d(Volume::Array(array.array), &mut dst[..packed], extent)
    }

    // Textures

    /// Create a texture over the first `length_bytes` of `target`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::OutOfBounds)` if `length_bytes` is zero or
    /// exceeds the target allocation.
    pub fn bind_texture_3d(
        &mut self,
        device: &mut dyn Device,
        target: TextureTarget,
        length_bytes: usize,
    ) -> Result<TextureHandle> {
        let (ptr, available) = match target {
            TextureTarget::Buffer(handle) => {
                let buffer = self.buffers.get(handle)?;
                (buffer.ptr, buffer.size)
            }
            TextureTarget::Pitched(handle) => {
                let buffer = self.pitched.get(handle)?;
                (buffer.ptr.ptr, buffer.span_bytes())
            }
        };
        if length_bytes == 0 {
            return Err(JitError::OutOfBounds("texture: length must be non-zero".to_string()));
        }
        check_len("texture", length_bytes, available)?;

        let object = device.create_texture(ptr, length_bytes)?;
        let handle = self.textures.insert(Texture {
            object,
            target,
            length: length_bytes,
        });
        tracing::debug!(object, bytes = length_bytes, "texture created");
        Ok(handle)
    }

    /// Destroy a texture object
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale handle.
    pub fn destroy_texture(
        &mut self,
        device: &mut dyn Device,
        handle: TextureHandle) -> Result<()> {
        let texture = *self.textures.get(handle)?;
        device.destroy_texture(texture.object)?;
        self.textures.remove(handle)?;
        tracing::debug!(object = texture.object, "texture destroyed");
        Ok(())
    }

    /// Borrow a texture record
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidHandle)` for a stale or foreign handle.
    pub fn texture(&self, handle: TextureHandle) -> Result<&Texture> {
        self.textures.get(handle)
    }

    // Whole-manager operations

    /// Drop every record without touching the device
    ///
    /// Used after a device reset, when the toolkit has already destroyed the
    /// allocations. Returns how many records were dropped.
    pub fn forget_all(&mut self) -> usize {
        self.textures.drain().len()
            + self.arrays.drain().len()
            + self.pitched.drain().len()
            + self.pinned.drain().len()
            + self.buffers.drain().len()
    }

    /// Free every live allocation, textures first
    ///
    /// Failures are logged and skipped.
    pub fn release_all(&mut self, device: &mut dyn Device) {
        for texture in self.textures.drain() {
            if let Err(err) = device.destroy_texture(texture.object) {
                tracing::warn!(error = %err, "failed to destroy texture");
            }
        }
        for array in self.arrays.drain() {
            if let Err(err) = device.free_array(array.array) {
                tracing::warn!(error = %err, "failed to free device array");
            }
        }
        for buffer in self.pitched.drain() {
            if let Err(err) = device.free_pitched(buffer.ptr.ptr) {
                tracing::warn!(error = %err, "failed to free pitched buffer");
            }
        }
        for buffer in self.pinned.drain() {
            if let Err(err) = device.free_pinned(buffer.addr) {
                tracing::warn!(error = %err, "failed to free pinned buffer");
            }
        }
        for buffer in self.buffers.drain() {
            if let Err(err) = device.free(buffer.ptr) {
                tracing::warn!(error = %err, "failed to free device buffer");
            }
        }
    }
}
