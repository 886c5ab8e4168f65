//! Error types for nvjit operations
//!
//! Every failure the bridge can report is a [`JitError`]. Toolkit failures carry
//! the status of the exact call that failed (never the thread's "last error"),
//! together with the call site that issued it.

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Result type alias for nvjit operations
pub type Result<T> = std::result::Result<T, JitError>;

/// A non-success status returned by a CUDA driver or NVRTC call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Toolkit entry point that failed (e.g. `cuMemAlloc`)
    pub op: &'static str,
    /// Raw status code
    pub code: i32,
    /// Symbolic error name (e.g. `CUDA_ERROR_OUT_OF_MEMORY`)
    pub name: String,
    /// Human readable description
    pub description: String,
    /// `file:line` of the bridge call that issued the toolkit call
    pub location: String,
}

impl DeviceError {
    /// Build an error for `code`, tagging it with the caller's location
    #[track_caller]
    #[must_use]
    pub fn new(
        op: &'static str,
        code: i32,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let caller = Location::caller();
        Self {
            op,
            code,
            name: name.into(),
            description: description.into(),
            location: format!("{}:{}", caller.file(), caller.line()),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with {} (code {}): {} at {}",
            self.op, self.name, self.code, self.description, self.location
        )
    }
}

/// Errors that can occur while compiling, instantiating, launching or moving memory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JitError {
    /// Source could not be compiled (syntax, unresolved include, bad option)
    #[error("compile error in program '{program}': {log}")]
    Compile {
        /// Program name
        program: String,
        /// Compiler diagnostics
        log: String,
    },

    /// Kernel name not defined in the program
    #[error("kernel '{kernel}' not found in program '{program}'")]
    Lookup {
        /// Program name
        program: String,
        /// Requested kernel name
        kernel: String,
    },

    /// Template arguments do not fit the kernel's template parameters
    #[error("cannot instantiate '{kernel}': {reason}")]
    Instantiation {
        /// Kernel name
        kernel: String,
        /// Mismatch description or compiler log
        reason: String,
    },

    /// Serialized instantiation payload is malformed
    #[error("malformed serialized instantiation: {0}")]
    Deserialize(String),

    /// A toolkit call returned non-success
    #[error("CUDA error: {0}")]
    Device(DeviceError),

    /// Handle is stale, released, or names a different kind of resource
    #[error("invalid {expected} handle {handle:#x}: {reason}")]
    InvalidHandle {
        /// Raw handle value
        handle: u64,
        /// Resource kind the caller asked for
        expected: &'static str,
        /// Why decoding failed
        reason: &'static str,
    },

    /// More launch arguments than the dispatcher can marshal
    #[error("too many kernel arguments: {count} (max {max})")]
    TooManyArguments {
        /// Number of arguments supplied
        count: usize,
        /// Dispatcher capacity
        max: usize,
    },

    /// Grid/block shape is structurally malformed
    #[error("invalid launch config: {0}")]
    InvalidLaunchConfig(String),

    /// Transfer does not fit the allocation or the host slice
    #[error("transfer out of bounds: {0}")]
    OutOfBounds(String),

    /// CUDA driver or NVRTC library not present
    #[error("CUDA not available: {0}")]
    CudaNotAvailable(String),
}

impl From<DeviceError> for JitError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl JitError {
    /// Short name reported to callers in a failed launch result
    ///
    /// For toolkit failures this is the toolkit's error name.
    #[must_use]
    pub fn error_name(&self) -> String {
        match self {
            Self::Device(err) => err.name.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the failure came from the toolkit rather than the bridge
    #[must_use]
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}
