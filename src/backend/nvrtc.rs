//! NVRTC implementation of [`Compiler`]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use super::{CompileUnit, CompiledKernel, Compiler};
use crate::driver::nvrtc::{Nvrtc, NvrtcProgram, NVRTC_ERROR_COMPILATION, NVRTC_SUCCESS};
use crate::error::{JitError, Result};

/// Runtime compiler backed by libnvrtc
#[derive(Clone, Copy)]
pub struct NvrtcCompiler {
    nvrtc: &'static Nvrtc,
}

impl std::fmt::Debug for NvrtcCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NvrtcCompiler")
    }
}

impl NvrtcCompiler {
    /// Load NVRTC
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::CudaNotAvailable)` if the library cannot be loaded.
    pub fn new() -> Result<Self> {
        let nvrtc = Nvrtc::load()
            .ok_or_else(|| JitError::CudaNotAvailable("NVRTC library not found".to_string()))?;
        Ok(Self { nvrtc })
    }

    fn compile(&self, unit: &CompileUnit, name_expression: Option<&str>) -> Result<Session<'_>> {
        let session = Session::create(self.nvrtc, unit)?;
        let expression = name_expression.map(cstring).transpose()?;
        if let Some(expression) = &expression {
            // SAFETY: program is live, expression is NUL-terminated
            let result = unsafe {
                (self.nvrtc.nvrtcAddNameExpression)(session.program, expression.as_ptr())
            };
            self.nvrtc.check("nvrtcAddNameExpression", result)?;
        }

        let options = unit
            .options
            .iter()
            .map(|o| cstring(o))
            .collect::<Result<Vec<_>>>()?;
        let option_ptrs: Vec<*const c_char> = options.iter().map(|o| o.as_ptr()).collect();

        // SAFETY: option pointers stay valid for the duration of the call
        let result = unsafe {
            (self.nvrtc.nvrtcCompileProgram)(
                session.program,
                c_int::try_from(option_ptrs.len()).unwrap_or(c_int::MAX),
                option_ptrs.as_ptr(),
            )
        };
        let log = session.log()?;
        match result {
            NVRTC_SUCCESS => {
                if !log.trim().is_empty() {
                    tracing::debug!(program = %unit.name, %log, "NVRTC diagnostics");
                }
                Ok(session.with_log(log))
            }
            NVRTC_ERROR_COMPILATION => Err(JitError::Compile {
                program: unit.name.clone(),
                log,
            }),
            other => {
                self.nvrtc.check("nvrtcCompileProgram", other)?;
                Ok(session.with_log(log))
            }
        }
    }
}

impl Compiler for NvrtcCompiler {
    fn name(&self) -> &str {
        "NVRTC"
    }

    fn check(&self, unit: &CompileUnit) -> Result<String> {
        let mut session = self.compile(unit, None)?;
        Ok(std::mem::take(&mut session.log))
    }

    fn compile_kernel(&self, unit: &CompileUnit, name_expression: &str) -> Result<CompiledKernel> {
        let mut session = self.compile(unit, Some(name_expression))?;
        let lowered_name = session.lowered_name(name_expression)?;
        let ptx = session.ptx()?;
        Ok(CompiledKernel {
            ptx,
            lowered_name,
            log: std::mem::take(&mut session.log),
        })
    }
}

fn cstring(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| JitError::Compile {
        program: String::new(),
        log: format!("input contains a NUL byte: {text:?}"),
    })
}

/// One NVRTC program, destroyed on drop
struct Session<'n> {
    nvrtc: &'n Nvrtc,
    program: NvrtcProgram,
    log: String,
}

impl<'n> Session<'n> {
    fn create(nvrtc: &'n Nvrtc, unit: &CompileUnit) -> Result<Self> {
        let source = cstring(&unit.source)?;
        let name = cstring(&unit.name)?;
        let header_sources = unit
            .headers
            .iter()
            .map(|h| cstring(&h.source))
            .collect::<Result<Vec<_>>>()?;
        let header_names = unit
            .headers
            .iter()
            .map(|h| cstring(&h.name))
            .collect::<Result<Vec<_>>>()?;
        let source_ptrs: Vec<*const c_char> = header_sources.iter().map(|h| h.as_ptr()).collect();
        let name_ptrs: Vec<*const c_char> = header_names.iter().map(|h| h.as_ptr()).collect();

        let mut program: NvrtcProgram = ptr::null_mut();
        // SAFETY: every pointer refers to a live NUL-terminated string; NVRTC
        // copies the texts before returning
        let result = unsafe {
            (nvrtc.nvrtcCreateProgram)(
                &mut program,
                source.as_ptr(),
                name.as_ptr(),
                c_int::try_from(source_ptrs.len()).unwrap_or(c_int::MAX),
                source_ptrs.as_ptr(),
                name_ptrs.as_ptr(),
            )
        };
        nvrtc.check("nvrtcCreateProgram", result)?;
        Ok(Self {
            nvrtc,
            program,
            log: String::new(),
        })
    }

    fn with_log(mut self, log: String) -> Self {
        self.log = log;
        self
    }

    fn log(&self) -> Result<String> {
        let mut size: usize = 0;
        // SAFETY: program is live, size is a valid out-pointer
        let result = unsafe { (self.nvrtc.nvrtcGetProgramLogSize)(self.program, &mut size) };
        self.nvrtc.check("nvrtcGetProgramLogSize", result)?;
        let mut buf = vec![0u8; size.max(1)];
        // SAFETY: buf holds `size` bytes
        let result =
            unsafe { (self.nvrtc.nvrtcGetProgramLog)(self.program, buf.as_mut_ptr().cast()) };
        self.nvrtc.check("nvrtcGetProgramLog", result)?;
        Ok(c_buffer_to_string(buf))
    }

    fn ptx(&self) -> Result<String> {
        let mut size: usize = 0;
        // SAFETY: program compiled successfully
        let result = unsafe { (self.nvrtc.nvrtcGetPTXSize)(self.program, &mut size) };
        self.nvrtc.check("nvrtcGetPTXSize", result)?;
        let mut buf = vec![0u8; size.max(1)];
        // SAFETY: buf holds `size` bytes
        let result = unsafe { (self.nvrtc.nvrtcGetPTX)(self.program, buf.as_mut_ptr().cast()) };
        self.nvrtc.check("nvrtcGetPTX", result)?;
        Ok(c_buffer_to_string(buf))
    }

    fn lowered_name(&self, expression: &str) -> Result<String> {
        let expression = cstring(expression)?;
        let mut lowered: *const c_char = ptr::null();
        // SAFETY: the expression was registered before compilation; the
        // returned string is owned by the program
        let result = unsafe {
            (self.nvrtc.nvrtcGetLoweredName)(self.program, expression.as_ptr(), &mut lowered)
        };
        self.nvrtc.check("nvrtcGetLoweredName", result)?;
        if lowered.is_null() {
            return Ok(String::new());
        }
        // SAFETY: non-null NUL-terminated string owned by the live program
        Ok(unsafe { CStr::from_ptr(lowered) }.to_string_lossy().into_owned())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        // SAFETY: program came from nvrtcCreateProgram and is destroyed once
        unsafe {
            let _ = (self.nvrtc.nvrtcDestroyProgram)(&mut self.program);
        }
    }
}

fn c_buffer_to_string(mut buf: Vec<u8>) -> String {
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
