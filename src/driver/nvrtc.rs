//! Minimal NVRTC FFI Bindings
//!
//! The runtime compiler is loaded the same way as the driver: dynamically,
//! once per process, and only with the `cuda` feature.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};

use crate::error::{DeviceError, JitError};

/// NVRTC status code
pub type NvrtcResult = c_int;

/// NVRTC program handle (opaque pointer)
pub type NvrtcProgram = *mut c_void;

/// Success
pub const NVRTC_SUCCESS: NvrtcResult = 0;
/// Compilation failed (diagnostics in the program log)
pub const NVRTC_ERROR_COMPILATION: NvrtcResult = 6;
/// Name expression was not registered or not found
pub const NVRTC_ERROR_NAME_EXPRESSION_NOT_VALID: NvrtcResult = 11;

/// Dynamically loaded NVRTC functions
#[allow(non_snake_case)]
#[allow(missing_docs)]
pub struct Nvrtc {
    pub nvrtcGetErrorString: unsafe extern "C" fn(result: NvrtcResult) -> *const c_char,
    pub nvrtcCreateProgram: unsafe extern "C" fn(
        prog: *mut NvrtcProgram,
        src: *const c_char,
        name: *const c_char,
        num_headers: c_int,
        headers: *const *const c_char,
        include_names: *const *const c_char,
    ) -> NvrtcResult,
    pub nvrtcDestroyProgram: unsafe extern "C" fn(prog: *mut NvrtcProgram) -> NvrtcResult,
    pub nvrtcAddNameExpression:
        unsafe extern "C" fn(prog: NvrtcProgram, name_expression: *const c_char) -> NvrtcResult,
    pub nvrtcCompileProgram: unsafe extern "C" fn(
        prog: NvrtcProgram,
        num_options: c_int,
        options: *const *const c_char,
    ) -> NvrtcResult,
    pub nvrtcGetLoweredName: unsafe extern "C" fn(
        prog: NvrtcProgram,
        name_expression: *const c_char,
        lowered_name: *mut *const c_char,
    ) -> NvrtcResult,
    pub nvrtcGetPTXSize: unsafe extern "C" fn(prog: NvrtcProgram, size: *mut usize) -> NvrtcResult,
    pub nvrtcGetPTX: unsafe extern "C" fn(prog: NvrtcProgram, ptx: *mut c_char) -> NvrtcResult,
    pub nvrtcGetProgramLogSize:
        unsafe extern "C" fn(prog: NvrtcProgram, size: *mut usize) -> NvrtcResult,
    pub nvrtcGetProgramLog:
        unsafe extern "C" fn(prog: NvrtcProgram, log: *mut c_char) -> NvrtcResult,
}

#[cfg(feature = "cuda")]
mod loading {
    use super::*;
    use libloading::{Library, Symbol};
    use std::sync::OnceLock;

    static NVRTC: OnceLock<Option<Nvrtc>> = OnceLock::new();
    static LIBRARY: OnceLock<Option<Library>> = OnceLock::new();

    impl Nvrtc {
        /// Load NVRTC dynamically
        ///
        /// Returns `None` when the CUDA toolkit's runtime compiler is not installed.
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            let _ = LIBRARY.get_or_init(|| {
                #[cfg(target_os = "linux")]
                let lib_names = [
                    "libnvrtc.so",
                    "libnvrtc.so.12",
                    "libnvrtc.so.11.2",
                    "libnvrtc.so.11.1",
                    "libnvrtc.so.11.0",
                ];
                #[cfg(target_os = "windows")]
                let lib_names = [
                    "nvrtc64_120_0.dll",
                    "nvrtc64_112_0.dll",
                    "nvrtc64_111_0.dll",
                    "nvrtc64_110_0.dll",
                ];
                #[cfg(not(any(target_os = "linux", target_os = "windows")))]
                let lib_names: [&str; 0] = [];

                for name in lib_names {
                    // SAFETY: loading the toolkit's runtime compiler library
                    if let Ok(lib) = unsafe { Library::new(name) } {
                        tracing::debug!(library = name, "loaded NVRTC");
                        return Some(lib);
                    }
                }
                None
            });

            NVRTC
                .get_or_init(|| {
                    let lib = LIBRARY.get()?.as_ref()?;
                    Self::load_from_library(lib)
                })
                .as_ref()
        }

        fn load_from_library(lib: &Library) -> Option<Self> {
            // SAFETY: documented NVRTC entry points cast to their signatures
            unsafe {
                macro_rules! load_sym {
                    ($name:ident) => {{
                        let sym: Symbol<'_, _> = lib.get(stringify!($name).as_bytes()).ok()?;
                        *sym
                    }};
                }

                Some(Nvrtc {
                    nvrtcGetErrorString: load_sym!(nvrtcGetErrorString),
                    nvrtcCreateProgram: load_sym!(nvrtcCreateProgram),
                    nvrtcDestroyProgram: load_sym!(nvrtcDestroyProgram),
                    nvrtcAddNameExpression: load_sym!(nvrtcAddNameExpression),
                    nvrtcCompileProgram: load_sym!(nvrtcCompileProgram),
                    nvrtcGetLoweredName: load_sym!(nvrtcGetLoweredName),
                    nvrtcGetPTXSize: load_sym!(nvrtcGetPTXSize),
                    nvrtcGetPTX: load_sym!(nvrtcGetPTX),
                    nvrtcGetProgramLogSize: load_sym!(nvrtcGetProgramLogSize),
                    nvrtcGetProgramLog: load_sym!(nvrtcGetProgramLog),
                })
            }
        }
    }
}

#[cfg(not(feature = "cuda"))]
mod loading {
    use super::Nvrtc;

    impl Nvrtc {
        /// NVRTC not available without the `cuda` feature
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            None
        }
    }
}

impl Nvrtc {
    /// Translate an NVRTC status
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if `result` is not `NVRTC_SUCCESS`.
    #[track_caller]
    pub fn check(&self, op: &'static str, result: NvrtcResult) -> Result<(), JitError> {
        if result == NVRTC_SUCCESS {
            return Ok(());
        }
        let text = self.error_string(result);
        Err(DeviceError::new(op, result, text.clone(), text).into())
    }

    /// Symbolic name of an NVRTC status
    #[must_use]
    pub fn error_string(&self, result: NvrtcResult) -> String {
        // SAFETY: NVRTC returns a static NUL-terminated string for any code
        let text = unsafe { (self.nvrtcGetErrorString)(result) };
        if text.is_null() {
            return format!("NVRTC_ERROR_{result}");
        }
        // SAFETY: non-null static string
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_constants() {
        assert_eq!(NVRTC_SUCCESS, 0);
        assert_eq!(NVRTC_ERROR_COMPILATION, 6);
    }

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_nvrtc_load_without_feature() {
        assert!(Nvrtc::load().is_none());
    }
}
