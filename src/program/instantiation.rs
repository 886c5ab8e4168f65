//! Template Instantiation and Serialization
//!
//! An instantiation is a kernel bound to concrete template arguments. Its
//! [`KernelImage`] is pure data (PTX, entry name and link inputs), which is
//! what gets serialized; the loaded module is rebuilt from it on demand.
//!
//! Serialized layout:
//!
//! ```text
//! +--------+----------------+---------------------------+
//! | "NVJI" | version u32 LE | KernelImage as JSON bytes |
//! +--------+----------------+---------------------------+
//! ```

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::signature::{classify_argument, ArgKind, KernelSignature, ParamKind};
use super::{Kernel, Program};
use crate::backend::{Compiler, Device, FunctionId, ModuleId};
use crate::error::{JitError, Result};
use crate::handle::{Resource, ResourceKind};

/// Leading bytes of every serialized instantiation
pub const MAGIC: [u8; 4] = *b"NVJI";

/// Current serialization format version
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = MAGIC.len() + 4;

/// Everything needed to load and launch one kernel instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelImage {
    /// Name of the program the kernel came from
    pub program: String,
    /// Kernel name
    pub kernel: String,
    /// Template arguments, in order
    pub template_args: Vec<String>,
    /// Name expression handed to the compiler (e.g. `scale<float, 4>`)
    pub name_expression: String,
    /// Mangled entry point
    pub lowered_name: String,
    /// Generated PTX
    pub ptx: String,
    /// Link inputs (`-l`)
    pub link_files: Vec<String>,
    /// Link search paths (`-L`)
    pub link_paths: Vec<String>,
    /// Compiler options used
    pub options: Vec<String>,
}

/// Build the C++ name expression for `kernel<args...>`
///
/// A non-template kernel is named bare. A closing `>` in the last argument is
/// separated from the list's own `>`.
#[must_use]
pub fn name_expression(kernel: &str, template: bool, args: &[String]) -> String {
    if !template && args.is_empty() {
        return kernel.to_string();
    }
    let list = args.join(", ");
    let spacer = if list.ends_with('>') { " " } else { "" };
    format!("{kernel}<{list}{spacer}>")
}

/// Check argument count and evident kinds against the kernel's template
///
/// # Errors
///
/// Returns `Err(JitError::Instantiation)` describing the first mismatch.
pub fn validate_template_args(signature: &KernelSignature, args: &[String]) -> Result<()> {
    let fail = |reason: String| JitError::Instantiation {
        kernel: signature.name.clone(),
        reason,
    };

    let min = signature.min_args();
    match signature.max_args() {
        Some(0) if !args.is_empty() && !signature.is_template() => {
            return Err(fail(format!(
                "kernel is not a template but {} template argument(s) were given",
                args.len()
            )));
        }
        Some(max) if args.len() < min || args.len() > max => {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(fail(format!(
                "expected {expected} template argument(s), got {}",
                args.len()
            )));
        }
        None if args.len() < min => {
            return Err(fail(format!(
                "expected at least {min} template argument(s), got {}",
                args.len()
            )));
        }
        _ => {}
    }

    for (position, arg) in args.iter().enumerate() {
        let Some(param) = signature.param_for(position) else {
            continue;
        };
        let label = param.name.as_deref().unwrap_or("<unnamed>");
        match (param.kind, classify_argument(arg)) {
            (ParamKind::Type | ParamKind::Template, ArgKind::Value) => {
                return Err(fail(format!(
                    "argument {position} ('{arg}') is a value \
                     but parameter '{label}' expects a type"
                )));
            }
            (ParamKind::Value, ArgKind::Type) => {
                return Err(fail(format!(
                    "argument {position} ('{arg}') is a type \
                     but parameter '{label}' expects a value"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

impl KernelImage {
    /// Compile `kernel` of `program` for `args`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Instantiation)` if the arguments do not fit the
    /// template or the compiler rejects the instantiation.
    #[instrument(level = "debug", skip_all, fields(kernel = kernel.name()))]
    pub fn build(
        compiler: &dyn Compiler,
        program: &Program,
        kernel: &Kernel,
        args: &[String],
    ) -> Result<Self> {
        let signature = kernel.signature();
        validate_template_args(signature, args)?;

        let expression = name_expression(kernel.name(), signature.is_template(), args);
        let compiled = compiler
            .compile_kernel(program.unit(), &expression)
            .map_err(|err| match err {
                JitError::Compile { log, .. } => JitError::Instantiation {
                    kernel: kernel.name().to_string(),
                    reason: log,
                },
                other => other,
            })?;
        if compiled.lowered_name.is_empty() {
            return Err(JitError::Instantiation {
                kernel: kernel.name().to_string(),
                reason: format!("compiler produced no entry point for '{expression}'"),
            });
        }
        tracing::debug!(
            name_expression = %expression,
            lowered = %compiled.lowered_name,
            ptx_bytes = compiled.ptx.len(),
            "kernel instantiated"
        );

        Ok(Self {
            program: program.name().to_string(),
            kernel: kernel.name().to_string(),
            template_args: args.to_vec(),
            name_expression: expression,
            lowered_name: compiled.lowered_name,
            ptx: compiled.ptx,
            link_files: program.link_files().to_vec(),
            link_paths: program.link_paths().to_vec(),
            options: program.unit().options.clone(),
        })
    }

    /// Encode with the `NVJI` header
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Deserialize)` if JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)
            .map_err(|e| JitError::Deserialize(format!("cannot encode instantiation: {e}")))?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode and validate bytes produced by [`KernelImage::to_bytes`]
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Deserialize)` for a wrong magic or version,
    /// malformed JSON, or an image without PTX or entry name.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(JitError::Deserialize(format!(
                "payload too short: {} bytes",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if header[..4] != MAGIC {
            return Err(JitError::Deserialize("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(JitError::Deserialize(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let image: Self = serde_json::from_slice(body)
            .map_err(|e| JitError::Deserialize(format!("invalid body: {e}")))?;
        if image.ptx.is_empty() || image.lowered_name.is_empty() {
            return Err(JitError::Deserialize(
                "image has no PTX or entry name".to_string(),
            ));
        }
        Ok(image)
    }
}

/// Query result for an instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantiationInfo {
    /// Generated PTX
    pub ir: String,
    /// Link inputs
    pub link_files: Vec<String>,
    /// Link search paths
    pub link_paths: Vec<String>,
    /// Mangled entry point
    pub lowered_name: String,
}

/// A kernel image loaded on the device
#[derive(Debug)]
pub struct Instantiation {
    image: KernelImage,
    module: ModuleId,
    function: FunctionId,
}

impl Resource for Instantiation {
    const KIND: ResourceKind = ResourceKind::Instantiation;
}

impl Instantiation {
    /// Load `image` on `device` and resolve its entry point
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if loading, linking or entry lookup fails.
    pub fn load(device: &mut dyn Device, image: KernelImage) -> Result<Self> {
        let module = device.load_module(&image.ptx, &image.link_files, &image.link_paths)?;
        let function = match device.function(module, &image.lowered_name) {
            Ok(function) => function,
            Err(err) => {
                if let Err(unload) = device.unload_module(module) {
                    tracing::warn!(error = %unload, "failed to unload module after lookup failure");
                }
                return Err(err);
            }
        };
        Ok(Self {
            image,
            module,
            function,
        })
    }

    /// Unload the module
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Device)` if the device rejects the unload.
    pub fn unload(self, device: &mut dyn Device) -> Result<()> {
        device.unload_module(self.module)
    }

    /// The loaded image
    #[must_use]
    pub fn image(&self) -> &KernelImage {
        &self.image
    }

    /// Device entry point
    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// IR and link inputs
    #[must_use]
    pub fn info(&self) -> InstantiationInfo {
        InstantiationInfo {
            ir: self.image.ptx.clone(),
            link_files: self.image.link_files.clone(),
            link_paths: self.image.link_paths.clone(),
            lowered_name: self.image.lowered_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::signature::scan_kernels;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn sig(src: &str) -> KernelSignature {
        scan_kernels(src).remove(0)
    }

    fn image() -> KernelImage {
        KernelImage {
            program: "my_program".to_string(),
            kernel: "my_kernel".to_string(),
            template_args: args(&["4", "float"]),
            name_expression: "my_kernel<4, float>".to_string(),
            lowered_name: "_Z9my_kernelILi4EfEvPT0_".to_string(),
            ptx: ".version 7.0\n.entry _Z9my_kernelILi4EfEvPT0_()\n".to_string(),
            link_files: args(&["cudadevrt"]),
            link_paths: args(&["/usr/local/cuda/lib64"]),
            options: args(&["-std=c++14"]),
        }
    }

    #[test]
    fn test_name_expression() {
        assert_eq!(name_expression("k", false, &[]), "k");
        assert_eq!(name_expression("k", true, &args(&["4", "float"])), "k<4, float>");
        assert_eq!(name_expression("k", true, &[]), "k<>");
        assert_eq!(
            name_expression("k", true, &args(&["Vec<float>"])),
            "k<Vec<float> >"
        );
    }

    #[test]
    fn test_arity_exact() {
        let s = sig("template<int N, typename T> __global__ void my_kernel(T* d) {}");
        assert!(validate_template_args(&s, &args(&["4", "float"])).is_ok());
        assert!(validate_template_args(&s, &args(&[])).is_err());
        assert!(validate_template_args(&s, &args(&["4"])).is_err());
        assert!(validate_template_args(&s, &args(&["4", "float", "int"])).is_err());
    }

    #[test]
    fn test_arity_with_defaults_and_pack() {
        let s = sig("template<typename T, int B = 128> __global__ void k(T* d) {}");
        assert!(validate_template_args(&s, &args(&["float"])).is_ok());
        assert!(validate_template_args(&s, &args(&["float", "256"])).is_ok());

        let p = sig("template<typename T, typename... Rest> __global__ void v(T* d) {}");
        assert!(validate_template_args(&p, &args(&["float", "int", "char", "double"])).is_ok());
        let err = validate_template_args(&p, &args(&[])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_non_template_rejects_args() {
        let s = sig("__global__ void plain(int* d) {}");
        assert!(validate_template_args(&s, &[]).is_ok());
        let err = validate_template_args(&s, &args(&["int"])).unwrap_err();
        assert!(err.to_string().contains("not a template"));
    }

    #[test]
    fn test_kind_mismatch() {
        let s = sig("template<int N, typename T> __global__ void my_kernel(T* d) {}");
        let err = validate_template_args(&s, &args(&["float", "4"])).unwrap_err();
        match err {
            JitError::Instantiation { kernel, reason } => {
                assert_eq!(kernel, "my_kernel");
                assert!(reason.contains("'N'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Unknown spellings are left to the compiler
        assert!(validate_template_args(&s, &args(&["SIZE", "MyType"])).is_ok());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let img = image();
        let bytes = img.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"NVJI");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(KernelImage::from_bytes(&bytes).unwrap(), img);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            KernelImage::from_bytes(b"NV"),
            Err(JitError::Deserialize(_))
        ));
        assert!(matches!(
            KernelImage::from_bytes(b"XXXX\x01\x00\x00\x00{}"),
            Err(JitError::Deserialize(_))
        ));

        let mut bytes = image().to_bytes().unwrap();
        bytes[4] = 9;
        let err = KernelImage::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version 9"));

        let mut bytes = image().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(KernelImage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_empty_ptx() {
        let mut img = image();
        img.ptx.clear();
        let bytes = img.to_bytes().unwrap();
        let err = KernelImage::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("no PTX"));
    }
}
