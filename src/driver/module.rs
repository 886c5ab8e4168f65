//! Module Loading and Linking
//!
//! Loads PTX into a device module. When the program names link files, the PTX
//! is first linked with them through the driver's JIT linker.

use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use super::context::get_driver;
use super::sys::{jit_input_type, CUfunction, CUlinkState, CUmodule, CudaDriver, CU_JIT_INPUT_PTX};
use crate::error::{DeviceError, JitError, Result};

/// Loaded device module with RAII unload
#[derive(Debug)]
pub struct CudaModule {
    module: CUmodule,
}

// SAFETY: CUmodule handles are thread-safe for read-only operations
unsafe impl Send for CudaModule {}

impl CudaModule {
    /// Load `ptx`, linking `link_files` (searched in `link_paths`) when present
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the image is rejected, a link file
    /// cannot be found, or linking fails.
    pub fn load(ptx: &str, link_files: &[String], link_paths: &[String]) -> Result<Self> {
        let driver = get_driver()?;
        let image = CString::new(ptx).map_err(|_| invalid_image("PTX contains NUL bytes"))?;

        if link_files.is_empty() {
            return Self::load_image(driver, image.as_ptr().cast::<c_void>());
        }

        let linker = Linker::new(driver)?;
        linker.add_ptx(&image)?;
        for file in link_files {
            let path = resolve_link_file(file, link_paths).ok_or_else(|| {
                JitError::from(DeviceError::new(
                    "cuLinkAddFile",
                    super::sys::CUDA_ERROR_FILE_NOT_FOUND,
                    "CUDA_ERROR_FILE_NOT_FOUND",
                    format!("link file '{file}' not found in {link_paths:?}"),
                ))
            })?;
            linker.add_file(&path)?;
        }
        let cubin = linker.complete()?;
        Self::load_image(driver, cubin)
    }

    fn load_image(driver: &CudaDriver, image: *const c_void) -> Result<Self> {
        let mut module: CUmodule = ptr::null_mut();
        // SAFETY: image points to NUL-terminated PTX or a linked cubin
        let result = unsafe { (driver.cuModuleLoadData)(&mut module, image) };
        driver.check("cuModuleLoadData", result)?;
        Ok(Self { module })
    }

    /// Resolve a kernel entry point by its lowered name
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` with `CUDA_ERROR_NOT_FOUND` if the
    /// module has no such entry.
    pub fn get_function(&self, name: &str) -> Result<CUfunction> {
        let driver = get_driver()?;
        let name = CString::new(name).map_err(|_| invalid_image("entry name contains NUL bytes"))?;
        let mut func: CUfunction = ptr::null_mut();
        // SAFETY: module is loaded, name is NUL-terminated
        let result = unsafe { (driver.cuModuleGetFunction)(&mut func, self.module, name.as_ptr()) };
        driver.check("cuModuleGetFunction", result)?;
        Ok(func)
    }
}

impl Drop for CudaModule {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: module came from cuModuleLoadData and is unloaded once
            unsafe {
                let _ = (driver.cuModuleUnload)(self.module);
            }
        }
    }
}

#[track_caller]
fn invalid_image(reason: &str) -> JitError {
    DeviceError::new(
        "cuModuleLoadData",
        super::sys::CUDA_ERROR_INVALID_IMAGE,
        "CUDA_ERROR_INVALID_IMAGE",
        reason,
    )
    .into()
}

/// JIT linker session; the linked image lives until the session is destroyed
struct Linker<'d> {
    driver: &'d CudaDriver,
    state: CUlinkState,
}

impl<'d> Linker<'d> {
    fn new(driver: &'d CudaDriver) -> Result<Self> {
        let mut state: CUlinkState = ptr::null_mut();
        // SAFETY: no options; state is a valid out-pointer
        let result = unsafe {
            (driver.cuLinkCreate)(0, ptr::null_mut(), ptr::null_mut(), &mut state)
        };
        driver.check("cuLinkCreate", result)?;
        Ok(Self { driver, state })
    }

    fn add_ptx(&self, ptx: &CString) -> Result<()> {
        let bytes = ptx.as_bytes_with_nul();
        // SAFETY: data is valid for its length; the driver copies it
        let result = unsafe {
            (self.driver.cuLinkAddData)(
                self.state,
                CU_JIT_INPUT_PTX,
                bytes.as_ptr().cast_mut().cast::<c_void>(),
                bytes.len(),
                b"program.ptx\0".as_ptr().cast(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        self.driver.check("cuLinkAddData", result)
    }

    fn add_file(&self, path: &Path) -> Result<()> {
        let display = path.to_string_lossy().into_owned();
        let c_path = CString::new(display.as_str())
            .map_err(|_| invalid_image("link path contains NUL bytes"))?;
        // SAFETY: c_path is NUL-terminated
        let result = unsafe {
            (self.driver.cuLinkAddFile)(
                self.state,
                jit_input_type(&display),
                c_path.as_ptr(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        self.driver.check("cuLinkAddFile", result)
    }

    /// Finish linking; the returned image is owned by the session
    fn complete(&self) -> Result<*const c_void> {
        let mut cubin: *mut c_void = ptr::null_mut();
        let mut size: usize = 0;
        // SAFETY: out-pointers are valid
        let result = unsafe { (self.driver.cuLinkComplete)(self.state, &mut cubin, &mut size) };
        self.driver.check("cuLinkComplete", result)?;
        tracing::trace!(bytes = size, "linked module image");
        Ok(cubin.cast_const())
    }
}

impl Drop for Linker<'_> {
    fn drop(&mut self) {
        // SAFETY: state came from cuLinkCreate and is destroyed once
        unsafe {
            let _ = (self.driver.cuLinkDestroy)(self.state);
        }
    }
}

/// Locate a link file (`-lname`) on the link search path (`-Lpath`)
///
/// A bare name without extension also matches the static-library spelling
/// of the platform (`libname.a` or `name.lib`).
#[must_use]
pub fn resolve_link_file(file: &str, link_paths: &[String]) -> Option<PathBuf> {
    let mut candidates = vec![file.to_string()];
    if Path::new(file).extension().is_none() {
        if cfg!(windows) {
            candidates.push(format!("{file}.lib"));
        } else {
            candidates.push(format!("lib{file}.a"));
        }
    }

    let search = link_paths
        .iter()
        .map(PathBuf::from)
        .chain(std::iter::once(PathBuf::new()));
    for dir in search {
        for name in &candidates {
            let path = dir.join(name);
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}
