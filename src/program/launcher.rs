//! Launch configuration

use crate::driver::{Dim3, LaunchShape};
use crate::error::Result;
use crate::handle::{Resource, ResourceKind};

use super::InstantiationHandle;

/// An instantiation bound to a grid/block shape
///
/// Pure data: configuring touches no device state, so a shape the device will
/// refuse (a zero component, too many threads per block) is only reported when
/// the launcher is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launcher {
    instantiation: InstantiationHandle,
    shape: LaunchShape,
}

impl Resource for Launcher {
    const KIND: ResourceKind = ResourceKind::Launcher;
}

impl Launcher {
    /// Bind `instantiation` to `grid` and `block`, each exactly three components
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::InvalidLaunchConfig)` if either slice does not
    /// hold three components.
    pub fn configure(
        instantiation: InstantiationHandle,
        grid: &[u32],
        block: &[u32],
    ) -> Result<Self> {
        let grid = Dim3::try_from(grid)?;
        let block = Dim3::try_from(block)?;
        Ok(Self::with_shape(instantiation, LaunchShape::new(grid, block)))
    }

    /// Bind `instantiation` to a prepared shape
    #[must_use]
    pub const fn with_shape(instantiation: InstantiationHandle, shape: LaunchShape) -> Self {
        Self {
            instantiation,
            shape,
        }
    }

    /// Set dynamic shared memory per block
    #[must_use]
    pub const fn with_shared_mem(mut self, bytes: u32) -> Self {
        self.shape = self.shape.with_shared_mem(bytes);
        self
    }

    /// Instantiation launched by this launcher
    #[must_use]
    pub const fn instantiation(&self) -> InstantiationHandle {
        self.instantiation
    }

    /// Launch shape
    #[must_use]
    pub const fn shape(&self) -> &LaunchShape {
        &self.shape
    }
}
