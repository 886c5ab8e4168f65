//! Device-side value types
//!
//! Plain data shared by the driver wrappers, the backend seam and the runtime.
//! Nothing here touches the device.

use serde::{Deserialize, Serialize};

use crate::error::JitError;

/// CUDA device ordinal
pub type DeviceOrdinal = u32;

/// Three-dimensional count (grid of blocks or block of threads)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    /// X extent
    pub x: u32,
    /// Y extent
    pub y: u32,
    /// Z extent
    pub z: u32,
}

impl Dim3 {
    /// Build from components
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// `(1, 1, 1)`
    #[must_use]
    pub const fn one() -> Self {
        Self::new(1, 1, 1)
    }

    /// Product of all components
    #[must_use]
    pub const fn volume(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Whether any component is zero (accepted here, rejected by the device)
    #[must_use]
    pub const fn is_degenerate(self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::one()
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl TryFrom<&[u32]> for Dim3 {
    type Error = JitError;

    fn try_from(value: &[u32]) -> Result<Self, Self::Error> {
        match value {
            [x, y, z] => Ok(Self::new(*x, *y, *z)),
            other => Err(JitError::InvalidLaunchConfig(format!(
                "expected 3 components, got {}",
                other.len()
            ))),
        }
    }
}

/// Execution shape of a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchShape {
    /// Grid dimensions (blocks)
    pub grid: Dim3,
    /// Block dimensions (threads)
    pub block: Dim3,
    /// Dynamic shared memory per block (bytes)
    pub shared_mem: u32,
}

impl LaunchShape {
    /// Shape from grid and block counts with no dynamic shared memory
    #[must_use]
    pub const fn new(grid: Dim3, block: Dim3) -> Self {
        Self {
            grid,
            block,
            shared_mem: 0,
        }
    }

    /// 1-D shape covering `num_elements` with `block_size` threads per block
    #[must_use]
    pub const fn linear(num_elements: u32, block_size: u32) -> Self {
        let grid_x = (num_elements + block_size - 1) / block_size;
        Self::new(Dim3::new(grid_x, 1, 1), Dim3::new(block_size, 1, 1))
    }

    /// Set dynamic shared memory size
    #[must_use]
    pub const fn with_shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem = bytes;
        self
    }

    /// Total threads launched
    #[must_use]
    pub const fn total_threads(&self) -> u64 {
        self.grid.volume() * self.block.volume()
    }
}

impl Default for LaunchShape {
    /// One block of one thread
    fn default() -> Self {
        Self::new(Dim3::one(), Dim3::one())
    }
}

/// 3-D extent in bytes (x) and rows/slices (y, z)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent3D {
    /// Row width in bytes
    pub width: usize,
    /// Rows per slice
    pub height: usize,
    /// Slices
    pub depth: usize,
}

impl Extent3D {
    /// Build from components
    #[must_use]
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Bytes of a densely packed host copy of this extent
    #[must_use]
    pub fn packed_len(&self) -> Option<usize> {
        self.width.checked_mul(self.height)?.checked_mul(self.depth)
    }

    /// Whether `other` fits inside `self` on every axis
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.width <= self.width && other.height <= self.height && other.depth <= self.depth
    }
}

/// Pitched 3-D allocation descriptor, as reported by the toolkit
///
/// Field order matches `cudaPitchedPtr`, so a kernel taking a pitched pointer
/// can read this struct after it is copied to the device.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PitchedPtr {
    /// Base device address
    pub ptr: u64,
    /// Padded row stride in bytes
    pub pitch: u64,
    /// Logical row width in bytes
    pub xsize: u64,
    /// Rows per slice
    pub ysize: u64,
}

impl PitchedPtr {
    /// Bytes spanned by `depth` slices
    #[must_use]
    pub const fn span_bytes(&self, depth: u64) -> u64 {
        self.pitch * self.ysize * depth
    }

    /// Little-endian image of the descriptor for upload to the device
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&self.ptr.to_le_bytes());
        out[8..16].copy_from_slice(&self.pitch.to_le_bytes());
        out[16..24].copy_from_slice(&self.xsize.to_le_bytes());
        out[24..32].copy_from_slice(&self.ysize.to_le_bytes());
        out
    }
}

/// Device side of a 3-D copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volume {
    /// Pitched linear memory
    Pitched {
        /// Base address
        ptr: u64,
        /// Row pitch in bytes
        pitch: usize,
        /// Rows per slice of the allocation
        height: usize,
    },
    /// CUDA array (opaque handle)
    Array(u64),
}

/// Subset of device properties exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Marketing name (e.g. "NVIDIA GeForce RTX 4090")
    pub name: String,
    /// Global memory in bytes
    pub total_global_mem: u64,
    /// Shared memory per block in bytes
    pub shared_mem_per_block: u64,
    /// 32-bit registers per block
    pub regs_per_block: u32,
    /// Threads per warp
    pub warp_size: u32,
    /// Maximum pitch for pitched copies in bytes
    pub mem_pitch: u64,
    /// PCI bus identifier
    pub pci_bus_id: u32,
    /// PCI device identifier
    pub pci_device_id: u32,
    /// PCI domain identifier
    pub pci_domain_id: u32,
}

/// Per-context resource limits (values match `CUlimit`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Limit {
    /// Thread stack size
    StackSize = 0,
    /// Device printf FIFO size
    PrintfFifoSize = 1,
    /// Device malloc heap size
    MallocHeapSize = 2,
    /// Device runtime synchronize depth
    DevRuntimeSyncDepth = 3,
    /// Device runtime pending launch count
    DevRuntimePendingLaunchCount = 4,
    /// L2 maximum fetch granularity (0..=128 bytes)
    MaxL2FetchGranularity = 5,
    /// Persisting L2 cache size
    PersistingL2CacheSize = 6,
}

impl TryFrom<u32> for Limit {
    type Error = JitError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::StackSize,
            1 => Self::PrintfFifoSize,
            2 => Self::MallocHeapSize,
            3 => Self::DevRuntimeSyncDepth,
            4 => Self::DevRuntimePendingLaunchCount,
            5 => Self::MaxL2FetchGranularity,
            6 => Self::PersistingL2CacheSize,
            other => {
                return Err(JitError::InvalidLaunchConfig(format!(
                    "unknown device limit {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim3_from_slice() {
        let dims: &[u32] = &[4, 2, 1];
        assert_eq!(Dim3::try_from(dims).unwrap(), Dim3::new(4, 2, 1));
    }

    #[test]
    fn test_dim3_malformed_slice() {
        let dims: &[u32] = &[4, 2];
        let err = Dim3::try_from(dims).unwrap_err();
        assert!(matches!(err, JitError::InvalidLaunchConfig(_)));
    }

    #[test]
    fn test_dim3_zero_is_structurally_valid() {
        let dims: &[u32] = &[0, 0, 0];
        let d = Dim3::try_from(dims).unwrap();
        assert!(d.is_degenerate());
        assert_eq!(d.volume(), 0);
    }

    #[test]
    fn test_launch_shape_linear() {
        let shape = LaunchShape::linear(1000, 256);
        assert_eq!(shape.grid.x, 4);
        assert_eq!(shape.block.x, 256);
        assert_eq!(shape.shared_mem, 0);
    }

    #[test]
    fn test_launch_shape_total_threads() {
        let shape = LaunchShape::new(Dim3::new(16, 16, 1), Dim3::new(8, 8, 2));
        assert_eq!(shape.total_threads(), 16 * 16 * 8 * 8 * 2);
    }

    #[test]
    fn test_launch_shape_default_is_single_thread() {
        let shape = LaunchShape::default();
        assert_eq!(shape.total_threads(), 1);
        assert_eq!(shape.with_shared_mem(512).shared_mem, 512);
    }

    #[test]
    fn test_extent_contains() {
        let alloc = Extent3D::new(8, 4, 2);
        assert!(alloc.contains(&Extent3D::new(8, 4, 2)));
        assert!(alloc.contains(&Extent3D::new(1, 1, 1)));
        assert!(!alloc.contains(&Extent3D::new(9, 1, 1)));
        assert_eq!(alloc.packed_len(), Some(64));
    }

    #[test]
    fn test_extent_packed_len_overflow() {
        let huge = Extent3D::new(usize::MAX, 2, 1);
        assert_eq!(huge.packed_len(), None);
    }

    #[test]
    fn test_pitched_ptr_bytes() {
        let p = PitchedPtr {
            ptr: 0x1000,
            pitch: 512,
            xsize: 2,
            ysize: 2,
        };
        let bytes = p.to_bytes();
        assert_eq!(&bytes[0..8], &0x1000u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &512u64.to_le_bytes());
        assert_eq!(p.span_bytes(2), 2048);
    }

    #[test]
    fn test_limit_try_from() {
        assert_eq!(Limit::try_from(2).unwrap(), Limit::MallocHeapSize);
        assert_eq!(Limit::PersistingL2CacheSize as u32, 6);
        assert!(Limit::try_from(7).is_err());
    }
}
