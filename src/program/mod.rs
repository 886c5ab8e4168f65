//! Compilation Pipeline
//!
//! ```text
//! Program --kernel(name)--> Kernel --instantiate(args)--> Instantiation
//!         --configure(grid, block)--> Launcher
//! ```
//!
//! Each stage holds the handle of the stage it came from, never a pointer, so
//! using a child after its parent was destroyed is caught when the handle is
//! decoded. An [`Instantiation`] carries everything it needs to run, so it
//! outlives its program and kernel.

pub mod instantiation;
pub mod launcher;
pub mod signature;

pub use instantiation::{Instantiation, InstantiationInfo, KernelImage};
pub use launcher::Launcher;
pub use signature::{KernelSignature, ParamKind, TemplateParam};

use tracing::instrument;

use crate::backend::{CompileUnit, Compiler};
use crate::error::{JitError, Result};
use crate::handle::{Handle, Resource, ResourceKind};
use crate::source::{resolve_headers, SourceResolver};

/// Handle of a compiled [`Program`]
pub type ProgramHandle = Handle<Program>;
/// Handle of a [`Kernel`]
pub type KernelHandle = Handle<Kernel>;
/// Handle of an [`Instantiation`]
pub type InstantiationHandle = Handle<Instantiation>;
/// Handle of a [`Launcher`]
pub type LauncherHandle = Handle<Launcher>;

/// NVRTC flags that would otherwise read as `-l`/`-L` link inputs
const LINK_PREFIXED_FLAGS: &[&str] = &["-lineinfo", "-lto"];

/// Compiler options split into compiler flags and link inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Flags passed to the compiler
    pub flags: Vec<String>,
    /// `-lname` inputs linked into every instantiation
    pub link_files: Vec<String>,
    /// `-Lpath` directories searched for link files
    pub link_paths: Vec<String>,
}

impl CompileOptions {
    /// Split raw options: `-l` prefixes become link files, `-L` prefixes link paths
    ///
    /// Compiler flags that happen to start with `-l` (`-lineinfo`) stay flags.
    pub fn parse<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();
        for option in options {
            let option = option.as_ref().trim();
            if LINK_PREFIXED_FLAGS.contains(&option) {
                parsed.flags.push(option.to_string());
            } else if let Some(file) = option.strip_prefix("-l") {
                if !file.is_empty() {
                    parsed.link_files.push(file.to_string());
                }
            } else if let Some(path) = option.strip_prefix("-L") {
                if !path.is_empty() {
                    parsed.link_paths.push(path.to_string());
                }
            } else if !option.is_empty() {
                parsed.flags.push(option.to_string());
            }
        }
        parsed
    }
}

/// Split a leading program-name line off `source`
///
/// Source may start with a line holding only the program name (for example
/// `"my_program\n__global__ void k() {}"`). Returns `(name, rest)` when the
/// first line is a single bare token.
#[must_use]
pub fn split_program_name(source: &str) -> Option<(&str, &str)> {
    let (first, rest) = source.split_once('\n').unwrap_or((source, ""));
    let name = first.trim();
    let is_name = !name.is_empty()
        && !name.chars().any(char::is_whitespace)
        && !name.contains(['#', '(', ')', ';', '{', '}', '<', '>', '"', '\'', '=', '*', ',', '/'])
        && !name.starts_with("__")
        && !matches!(name, "extern" | "template" | "struct" | "class" | "static" | "inline");
    is_name.then_some((name, rest))
}

/// A compiled translation unit
#[derive(Debug, Clone)]
pub struct Program {
    unit: CompileUnit,
    link_files: Vec<String>,
    link_paths: Vec<String>,
    kernels: Vec<KernelSignature>,
    log: String,
}

impl Resource for Program {
    const KIND: ResourceKind = ResourceKind::Program;
}

impl Program {
    /// Resolve includes, check the unit with `compiler`, and index its kernels
    ///
    /// `default_name` is used when the source does not start with a name line.
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Compile)` if an include cannot be resolved or the
    /// compiler rejects the unit.
    #[instrument(level = "debug", skip_all, fields(program = tracing::field::Empty))]
    pub fn compile(
        compiler: &dyn Compiler,
        source: &str,
        options: CompileOptions,
        default_name: &str,
        resolver: Option<&mut dyn SourceResolver>,
    ) -> Result<Self> {
        let (name, body) = split_program_name(source).unwrap_or((default_name, source));
        tracing::Span::current().record("program", name);

        let headers = resolve_headers(name, body, resolver)?;
        let unit = CompileUnit {
            name: name.to_string(),
            source: body.to_string(),
            headers,
            options: options.flags,
        };
        let log = compiler.check(&unit)?;

        let mut kernels = signature::scan_kernels(&unit.source);
        for header in &unit.headers {
            kernels.extend(signature::scan_kernels(&header.source));
        }
        tracing::debug!(
            headers = unit.headers.len(),
            kernels = kernels.len(),
            link_files = options.link_files.len(),
            "program compiled"
        );

        Ok(Self {
            unit,
            link_files: options.link_files,
            link_paths: options.link_paths,
            kernels,
            log,
        })
    }

    /// Program name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// The unit as handed to the compiler
    #[must_use]
    pub fn unit(&self) -> &CompileUnit {
        &self.unit
    }

    /// Kernels found in the program and its headers
    #[must_use]
    pub fn kernels(&self) -> &[KernelSignature] {
        &self.kernels
    }

    /// Signature of the kernel called `name`
    ///
    /// Kernels inside namespaces are named by their qualified form (`ns::k`);
    /// a leading `::` is accepted.
    #[must_use]
    pub fn signature(&self, name: &str) -> Option<&KernelSignature> {
        let name = name.trim();
        let name = name.strip_prefix("::").unwrap_or(name);
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Link inputs (`-l`)
    #[must_use]
    pub fn link_files(&self) -> &[String] {
        &self.link_files
    }

    /// Link search paths (`-L`)
    #[must_use]
    pub fn link_paths(&self) -> &[String] {
        &self.link_paths
    }

    /// Compiler log from the check compile
    #[must_use]
    pub fn log(&self) -> &str {
        &self.log
    }
}

/// A named, uninstantiated kernel of a program
#[derive(Debug, Clone)]
pub struct Kernel {
    program: ProgramHandle,
    signature: KernelSignature,
}

impl Resource for Kernel {
    const KIND: ResourceKind = ResourceKind::Kernel;
}

impl Kernel {
    /// Look up `name` in `program`
    ///
    /// # Errors
    ///
    /// Returns `Err(JitError::Lookup)` if the program defines no such kernel.
    pub fn lookup(handle: ProgramHandle, program: &Program, name: &str) -> Result<Self> {
        let signature = program.signature(name).cloned().ok_or_else(|| JitError::Lookup {
            program: program.name().to_string(),
            kernel: name.to_string(),
        })?;
        Ok(Self {
            program: handle,
            signature,
        })
    }

    /// Owning program
    #[must_use]
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// Kernel name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Scanned signature
    #[must_use]
    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }
}
