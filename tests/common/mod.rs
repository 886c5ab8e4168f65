//! Host-memory stand-ins for the CUDA toolkit
//!
//! - [`EmuDevice`] keeps every allocation in host `Vec`s and runs kernels as
//!   Rust closures registered by kernel name.
//! - [`ScriptedCompiler`] checks brace balance and `#error` lines, and emits
//!   fake PTX whose entry names encode the name expression.
//!
//! Both report what happened through a shared [`Stats`] so tests can observe
//! backend traffic after the backends were moved into a `Runtime`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use nvjit::backend::{CompileUnit, CompiledKernel, Compiler, Device, FunctionId, ModuleId};
use nvjit::program::signature::scan_kernels;
use nvjit::{
    DeviceError, DeviceProperties, Extent3D, JitError, LaunchShape, Limit, PitchedPtr, Result,
    Runtime, RuntimeConfig,
};
use nvjit::driver::Volume;

// ============================================================================
// SHARED OBSERVATIONS
// ============================================================================

/// Backend traffic visible to tests
#[derive(Debug, Default)]
pub struct Stats {
    pub checks: usize,
    pub kernel_compiles: usize,
    pub modules_loaded: usize,
    pub modules_unloaded: usize,
    pub launches: usize,
    pub last_link_files: Vec<String>,
    pub last_link_paths: Vec<String>,
    pub last_options: Vec<String>,
    pub resets: usize,
    pub contexts_opened: usize,
}

/// Cloneable view of [`Stats`]
#[derive(Debug, Clone, Default)]
pub struct Observer(Arc<Mutex<Stats>>);

impl Observer {
    pub fn stats(&self) -> MutexGuard<'_, Stats> {
        self.0.lock().unwrap()
    }
}

// ============================================================================
// SCRIPTED COMPILER
// ============================================================================

/// Compiler that validates just enough to exercise the pipeline
pub struct ScriptedCompiler {
    observer: Observer,
}

impl ScriptedCompiler {
    pub fn new(observer: Observer) -> Self {
        Self { observer }
    }
}

fn diagnose(unit: &CompileUnit) -> Option<String> {
    let texts = std::iter::once((unit.name.as_str(), unit.source.as_str()))
        .chain(unit.headers.iter().map(|h| (h.name.as_str(), h.source.as_str())));
    for (file, text) in texts {
        for (line, content) in text.lines().enumerate() {
            if let Some(message) = content.trim_start().strip_prefix("#error") {
                return Some(format!("{file}({}): error: {}", line + 1, message.trim()));
            }
        }
        let open = text.matches('{').count();
        let close = text.matches('}').count();
        if open != close {
            return Some(format!(
                "{file}: error: expected a \"}}\" ({open} opened, {close} closed)"
            ));
        }
    }
    None
}

/// Entry name the scripted compiler reports for `expression`
pub fn mangle(expression: &str) -> String {
    let body: String = expression
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("_Z_emu_{body}")
}

impl Compiler for ScriptedCompiler {
    fn name(&self) -> &str {
        "scripted"
    }

    fn check(&self, unit: &CompileUnit) -> Result<String> {
        self.observer.stats().checks += 1;
        self.observer.stats().last_options = unit.options.clone();
        match diagnose(unit) {
            Some(log) => Err(JitError::Compile {
                program: unit.name.clone(),
                log,
            }),
            None => Ok(String::new()),
        }
    }

    fn compile_kernel(&self, unit: &CompileUnit, name_expression: &str) -> Result<CompiledKernel> {
        self.observer.stats().kernel_compiles += 1;
        if let Some(log) = diagnose(unit) {
            return Err(JitError::Compile {
                program: unit.name.clone(),
                log,
            });
        }
        let (name, args) = match name_expression.split_once('<') {
            Some((name, rest)) => {
                let list = rest.trim_end().trim_end_matches('>').trim();
                let args: Vec<String> = if list.is_empty() {
                    Vec::new()
                } else {
                    list.split(',').map(|a| a.trim().to_string()).collect()
                };
                (name.trim(), args)
            }
            None => (name_expression.trim(), Vec::new()),
        };

        let mut known = scan_kernels(&unit.source);
        for header in &unit.headers {
            known.extend(scan_kernels(&header.source));
        }
        if !known.iter().any(|k| k.name == name) {
            return Err(JitError::Compile {
                program: unit.name.clone(),
                log: format!("error: name expression '{name_expression}' is not valid"),
            });
        }
        if let Some(bad) = args.iter().find(|a| a.starts_with("Undefined")) {
            return Err(JitError::Compile {
                program: unit.name.clone(),
                log: format!("error: identifier \"{bad}\" is undefined"),
            });
        }

        let lowered = mangle(name_expression);
        let ptx = format!(
            "// emu ptx\n.version 7.0\n.target sm_70\n.entry {lowered}\n\
             // kernel {name}\n// template {}\n",
            args.join("|")
        );
        Ok(CompiledKernel {
            ptx,
            lowered_name: lowered,
            log: String::new(),
        })
    }
}

// ============================================================================
// EMULATED DEVICE
// ============================================================================

const CUDA_ERROR_INVALID_VALUE: i32 = 1;
const CUDA_ERROR_INVALID_DEVICE: i32 = 101;
const CUDA_ERROR_INVALID_IMAGE: i32 = 200;
const CUDA_ERROR_FILE_NOT_FOUND: i32 = 301;
const CUDA_ERROR_INVALID_HANDLE: i32 = 400;
const CUDA_ERROR_NOT_FOUND: i32 = 500;
const CUDA_ERROR_LAUNCH_FAILED: i32 = 719;

#[track_caller]
fn fail(op: &'static str, code: i32) -> JitError {
    let name = match code {
        CUDA_ERROR_INVALID_VALUE => "CUDA_ERROR_INVALID_VALUE",
        CUDA_ERROR_INVALID_DEVICE => "CUDA_ERROR_INVALID_DEVICE",
        CUDA_ERROR_INVALID_IMAGE => "CUDA_ERROR_INVALID_IMAGE",
        CUDA_ERROR_FILE_NOT_FOUND => "CUDA_ERROR_FILE_NOT_FOUND",
        CUDA_ERROR_INVALID_HANDLE => "CUDA_ERROR_INVALID_HANDLE",
        CUDA_ERROR_NOT_FOUND => "CUDA_ERROR_NOT_FOUND",
        CUDA_ERROR_LAUNCH_FAILED => "CUDA_ERROR_LAUNCH_FAILED",
        _ => "CUDA_ERROR_UNKNOWN",
    };
    DeviceError::new(op, code, name, "emulated failure").into()
}

/// What a kernel closure sees
#[derive(Debug, Clone)]
pub struct Invocation {
    pub template_args: Vec<String>,
    pub shape: LaunchShape,
    pub args: Vec<u64>,
}

/// Host memory reachable by device address
#[derive(Debug, Default)]
pub struct EmuMemory {
    linear: BTreeMap<u64, Vec<u8>>,
    pinned: BTreeMap<u64, Vec<u8>>,
    arrays: HashMap<u64, (Extent3D, Vec<u8>)>,
    textures: HashMap<u64, (u64, usize)>,
}

impl EmuMemory {
    fn region(map: &mut BTreeMap<u64, Vec<u8>>, addr: u64, len: usize) -> Option<&mut [u8]> {
        let (base, bytes) = map.range_mut(..=addr).next_back()?;
        let offset = usize::try_from(addr - *base).ok()?;
        bytes.get_mut(offset..offset.checked_add(len)?)
    }

    /// Bytes at `addr` in any linear or pinned allocation
    pub fn bytes_mut(&mut self, addr: u64, len: usize) -> Option<&mut [u8]> {
        if Self::region(&mut self.linear, addr, len).is_some() {
            return Self::region(&mut self.linear, addr, len);
        }
        Self::region(&mut self.pinned, addr, len)
    }

    pub fn read_f32(&mut self, addr: u64) -> Option<f32> {
        let bytes = self.bytes_mut(addr, 4)?;
        Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_f32(&mut self, addr: u64, value: f32) -> Option<()> {
        self.bytes_mut(addr, 4)?.copy_from_slice(&value.to_le_bytes());
        Some(())
    }

    /// Texture object -> (base address, bound length)
    pub fn texture(&self, object: u64) -> Option<(u64, usize)> {
        self.textures.get(&object).copied()
    }
}

type KernelFn = Box<dyn Fn(&mut EmuMemory, &Invocation) -> std::result::Result<(), String> + Send>;

struct EmuModule {
    entries: Vec<(String, String, Vec<String>)>,
}

/// Device whose memory is host memory and whose kernels are closures
pub struct EmuDevice {
    observer: Observer,
    memory: EmuMemory,
    kernels: HashMap<String, KernelFn>,
    modules: HashMap<ModuleId, EmuModule>,
    functions: HashMap<FunctionId, (ModuleId, String, Vec<String>)>,
    next_addr: u64,
    next_id: u64,
    device_count: u32,
    current: u32,
    opened: Vec<u32>,
    limits: HashMap<Limit, u64>,
    link_libraries: Vec<String>,
}

/// Row alignment of emulated pitched allocations
pub const PITCH_ALIGN: usize = 32;

impl EmuDevice {
    pub fn new(observer: Observer) -> Self {
        Self {
            observer,
            memory: EmuMemory::default(),
            kernels: HashMap::new(),
            modules: HashMap::new(),
            functions: HashMap::new(),
            next_addr: 0x7000_0000,
            next_id: 1,
            device_count: 2,
            current: 0,
            opened: vec![0],
            limits: HashMap::new(),
            link_libraries: vec!["cudadevrt".to_string()],
        }
    }

    /// Run `body` for launches of kernel `name`
    pub fn with_kernel<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&mut EmuMemory, &Invocation) -> std::result::Result<(), String> + Send + 'static,
    {
        self.kernels.insert(name.to_string(), Box::new(body));
        self
    }

    fn next_address(&mut self, bytes: usize) -> u64 {
        let addr = self.next_addr;
        let span = (bytes.max(1) as u64 + 255) & !255;
        self.next_addr += span;
        addr
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn volume_offset(pitch: usize, height: usize, x: usize, y: usize, z: usize) -> usize {
        (z * height + y) * pitch + x
    }
}

impl Device for EmuDevice {
    fn name(&self) -> &str {
        "emulator"
    }

    fn device_count(&self) -> Result<u32> {
        Ok(self.device_count)
    }

    fn current_device(&self) -> Result<u32> {
        Ok(self.current)
    }

    fn set_device(&mut self, ordinal: u32) -> Result<()> {
        if ordinal >= self.device_count {
            return Err(fail("cuDeviceGet", CUDA_ERROR_INVALID_DEVICE));
        }
        if !self.opened.contains(&ordinal) {
            self.opened.push(ordinal);
            self.observer.stats().contexts_opened += 1;
        }
        self.current = ordinal;
        Ok(())
    }

    fn properties(&self, ordinal: u32) -> Result<DeviceProperties> {
        if ordinal >= self.device_count {
            return Err(fail("cuDeviceGet", CUDA_ERROR_INVALID_DEVICE));
        }
        Ok(DeviceProperties {
            name: format!("Emulated GPU {ordinal}"),
            total_global_mem: 8 << 30,
            shared_mem_per_block: 48 << 10,
            regs_per_block: 65536,
            warp_size: 32,
            mem_pitch: i32::MAX as u64,
            pci_bus_id: 1 + ordinal,
            pci_device_id: 0,
            pci_domain_id: 0,
        })
    }

    fn get_limit(&self, limit: Limit) -> Result<u64> {
        Ok(self.limits.get(&limit).copied().unwrap_or(1024))
    }

    fn set_limit(&mut self, limit: Limit, value: u64) -> Result<()> {
        if limit == Limit::MaxL2FetchGranularity && value > 128 {
            return Err(fail("cuCtxSetLimit", CUDA_ERROR_INVALID_VALUE));
        }
        self.limits.insert(limit, value);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.memory = EmuMemory::default();
        self.modules.clear();
        self.functions.clear();
        self.limits.clear();
        self.observer.stats().resets += 1;
        Ok(())
    }

    fn alloc(&mut self, bytes: usize) -> Result<u64> {
        if bytes == 0 {
            return Err(fail("cuMemAlloc", CUDA_ERROR_INVALID_VALUE));
        }
        let addr = self.next_address(bytes);
        self.memory.linear.insert(addr, vec![0; bytes]);
        Ok(addr)
    }

    fn free(&mut self, ptr: u64) -> Result<()> {
        self.memory
            .linear
            .remove(&ptr)
            .map(drop)
            .ok_or_else(|| fail("cuMemFree", CUDA_ERROR_INVALID_VALUE))
    }

    fn write(&mut self, dst: u64, src: &[u8]) -> Result<()> {
        let region = EmuMemory::region(&mut self.memory.linear, dst, src.len())
            .ok_or_else(|| fail("cuMemcpyHtoD", CUDA_ERROR_INVALID_VALUE))?;
        region.copy_from_slice(src);
        Ok(())
    }

    fn read(&self, src: u64, dst: &mut [u8]) -> Result<()> {
        let (base, bytes) = self
            .memory
            .linear
            .range(..=src)
            .next_back()
            .ok_or_else(|| fail("cuMemcpyDtoH", CUDA_ERROR_INVALID_VALUE))?;
        let offset = (src - base) as usize;
        let region = bytes
            .get(offset..offset + dst.len())
            .ok_or_else(|| fail("cuMemcpyDtoH", CUDA_ERROR_INVALID_VALUE))?;
        dst.copy_from_slice(region);
        Ok(())
    }

    fn copy(&mut self, dst: u64, src: u64, bytes: usize) -> Result<()> {
        let mut staging = vec![0u8; bytes];
        self.read(src, &mut staging)?;
        self.write(dst, &staging)
    }

    fn alloc_pinned(&mut self, bytes: usize) -> Result<u64> {
        let addr = self.next_address(bytes) | 0x1_0000_0000_0000;
        self.memory.pinned.insert(addr, vec![0; bytes]);
        Ok(addr)
    }

    fn free_pinned(&mut self, addr: u64) -> Result<()> {
        self.memory
            .pinned
            .remove(&addr)
            .map(drop)
            .ok_or_else(|| fail("cuMemFreeHost", CUDA_ERROR_INVALID_VALUE))
    }

    fn pinned(&self, addr: u64) -> Result<&[u8]> {
        self.memory
            .pinned
            .get(&addr)
            .map(Vec::as_slice)
            .ok_or_else(|| fail("pinned", CUDA_ERROR_INVALID_VALUE))
    }

    fn pinned_mut(&mut self, addr: u64) -> Result<&mut [u8]> {
        self.memory
            .pinned
            .get_mut(&addr)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| fail("pinned", CUDA_ERROR_INVALID_VALUE))
    }

    fn alloc_pitched(&mut self, extent: Extent3D) -> Result<PitchedPtr> {
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(fail("cuMemAllocPitch", CUDA_ERROR_INVALID_VALUE));
        }
        let pitch = extent.width.div_ceil(PITCH_ALIGN) * PITCH_ALIGN;
        let bytes = pitch * extent.height * extent.depth;
        let ptr = self.next_address(bytes);
        self.memory.linear.insert(ptr, vec![0; bytes]);
        Ok(PitchedPtr {
            ptr,
            pitch: pitch as u64,
            xsize: extent.width as u64,
            ysize: extent.height as u64,
        })
    }

    fn free_pitched(&mut self, ptr: u64) -> Result<()> {
        self.free(ptr)
    }

    fn alloc_array(&mut self, extent: Extent3D) -> Result<u64> {
        let bytes = extent
            .packed_len()
            .filter(|&b| b > 0)
            .ok_or_else(|| fail("cuArray3DCreate", CUDA_ERROR_INVALID_VALUE))?;
        let id = self.next_id();
        self.memory.arrays.insert(id, (extent, vec![0; bytes]));
        Ok(id)
    }

    fn free_array(&mut self, array: u64) -> Result<()> {
        self.memory
            .arrays
            .remove(&array)
            .map(drop)
            .ok_or_else(|| fail("cuArrayDestroy", CUDA_ERROR_INVALID_HANDLE))
    }

    fn write_3d(&mut self, dst: Volume, src: &[u8], extent: Extent3D) -> Result<()> {
        let (target, pitch, height) = match dst {
            Volume::Pitched { ptr, pitch, height } => {
                let (_, bytes) = self
                    .memory
                    .linear
                    .range_mut(..=ptr)
                    .next_back()
                    .ok_or_else(|| fail("cuMemcpy3D", CUDA_ERROR_INVALID_VALUE))?;
                (bytes, pitch, height)
            }
            Volume::Array(id) => {
                let (array_extent, bytes) = self
                    .memory
                    .arrays
                    .get_mut(&id)
                    .ok_or_else(|| fail("cuMemcpy3D", CUDA_ERROR_INVALID_HANDLE))?;
                (bytes, array_extent.width, array_extent.height)
            }
        };
        for z in 0..extent.depth {
            for y in 0..extent.height {
                let from = (z * extent.height + y) * extent.width;
                let to = Self::volume_offset(pitch, height, 0, y, z);
                target[to..to + extent.width].copy_from_slice(&src[from..from + extent.width]);
            }
        }
        Ok(())
    }

    fn read_3d(&self, src: Volume, dst: &mut [u8], extent: Extent3D) -> Result<()> {
        let (source, pitch, height) = match src {
            Volume::Pitched { ptr, pitch, height } => {
                let (_, bytes) = self
                    .memory
                    .linear
                    .range(..=ptr)
                    .next_back()
                    .ok_or_else(|| fail("cuMemcpy3D", CUDA_ERROR_INVALID_VALUE))?;
                (bytes, pitch, height)
            }
            Volume::Array(id) => {
                let (array_extent, bytes) = self
                    .memory
                    .arrays
                    .get(&id)
                    .ok_or_else(|| fail("cuMemcpy3D", CUDA_ERROR_INVALID_HANDLE))?;
                (bytes, array_extent.width, array_extent.height)
            }
        };
        for z in 0..extent.depth {
            for y in 0..extent.height {
                let to = (z * extent.height + y) * extent.width;
                let from = Self::volume_offset(pitch, height, 0, y, z);
                dst[to..to + extent.width].copy_from_slice(&source[from..from + extent.width]);
            }
        }
        Ok(())
    }

    fn create_texture(&mut self, ptr: u64, bytes: usize) -> Result<u64> {
        if EmuMemory::region(&mut self.memory.linear, ptr, bytes).is_none() {
            return Err(fail("cuTexObjectCreate", CUDA_ERROR_INVALID_VALUE));
        }
        let id = self.next_id();
        self.memory.textures.insert(id, (ptr, bytes));
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: u64) -> Result<()> {
        self.memory
            .textures
            .remove(&texture)
            .map(drop)
            .ok_or_else(|| fail("cuTexObjectDestroy", CUDA_ERROR_INVALID_VALUE))
    }

    fn load_module(
        &mut self,
        ptx: &str,
        link_files: &[String],
        link_paths: &[String],
    ) -> Result<ModuleId> {
        {
            let mut stats = self.observer.stats();
            stats.last_link_files = link_files.to_vec();
            stats.last_link_paths = link_paths.to_vec();
        }
        if link_files.iter().any(|f| !self.link_libraries.contains(f)) {
            return Err(fail("cuLinkAddFile", CUDA_ERROR_FILE_NOT_FOUND));
        }
        if !ptx.starts_with("// emu ptx") {
            return Err(fail("cuModuleLoadData", CUDA_ERROR_INVALID_IMAGE));
        }

        let mut entries = Vec::new();
        let mut lines = ptx.lines();
        while let Some(line) = lines.next() {
            if let Some(entry) = line.strip_prefix(".entry ") {
                let kernel = lines
                    .next()
                    .and_then(|l| l.strip_prefix("// kernel "))
                    .unwrap_or_default()
                    .to_string();
                let template = lines
                    .next()
                    .and_then(|l| l.strip_prefix("// template"))
                    .map(str::trim)
                    .unwrap_or_default();
                let args = if template.is_empty() {
                    Vec::new()
                } else {
                    template.split('|').map(str::to_string).collect()
                };
                entries.push((entry.trim().to_string(), kernel, args));
            }
        }

        let id = self.next_id();
        self.modules.insert(id, EmuModule { entries });
        self.observer.stats().modules_loaded += 1;
        Ok(id)
    }

    fn function(&mut self, module: ModuleId, lowered_name: &str) -> Result<FunctionId> {
        let entry = self
            .modules
            .get(&module)
            .ok_or_else(|| fail("cuModuleGetFunction", CUDA_ERROR_INVALID_HANDLE))?
            .entries
            .iter()
            .find(|(lowered, _, _)| lowered == lowered_name)
            .cloned()
            .ok_or_else(|| fail("cuModuleGetFunction", CUDA_ERROR_NOT_FOUND))?;
        let id = self.next_id();
        self.functions.insert(id, (module, entry.1, entry.2));
        Ok(id)
    }

    fn unload_module(&mut self, module: ModuleId) -> Result<()> {
        self.modules
            .remove(&module)
            .ok_or_else(|| fail("cuModuleUnload", CUDA_ERROR_INVALID_HANDLE))?;
        self.functions.retain(|_, (owner, _, _)| *owner != module);
        self.observer.stats().modules_unloaded += 1;
        Ok(())
    }

    fn launch(&mut self, function: FunctionId, shape: &LaunchShape, args: &[u64]) -> Result<()> {
        let (_, kernel, template_args) = self
            .functions
            .get(&function)
            .cloned()
            .ok_or_else(|| fail("cuLaunchKernel", CUDA_ERROR_INVALID_HANDLE))?;
        if shape.grid.is_degenerate() || shape.block.is_degenerate() {
            return Err(fail("cuLaunchKernel", CUDA_ERROR_INVALID_VALUE));
        }
        self.observer.stats().launches += 1;
        let unqualified = kernel.rsplit("::").next().unwrap_or(&kernel);
        let Some(body) = self.kernels.get(unqualified) else {
            return Ok(());
        };
        let invocation = Invocation {
            template_args,
            shape: *shape,
            args: args.to_vec(),
        };
        body(&mut self.memory, &invocation)
            .map_err(|_| fail("cuLaunchKernel", CUDA_ERROR_LAUNCH_FAILED))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// `add_one<T>(T* x)`: adds one to the float at `x`
pub fn add_one(memory: &mut EmuMemory, call: &Invocation) -> std::result::Result<(), String> {
    let addr = *call.args.first().ok_or("missing argument")?;
    let value = memory.read_f32(addr).ok_or("bad address")?;
    memory.write_f32(addr, value + 1.0).ok_or("bad address")?;
    Ok(())
}

/// `scale<T, N>(T* x, int n)`: multiplies `n` floats at `x` by `N`
pub fn scale(memory: &mut EmuMemory, call: &Invocation) -> std::result::Result<(), String> {
    let factor: f32 = call
        .template_args
        .get(1)
        .and_then(|n| n.parse().ok())
        .ok_or("bad template argument")?;
    let (addr, count) = match call.args.as_slice() {
        [addr, count, ..] => (*addr, *count),
        _ => return Err("missing arguments".to_string()),
    };
    for i in 0..count {
        let at = addr + i * 4;
        let value = memory.read_f32(at).ok_or("bad address")?;
        memory.write_f32(at, value * factor).ok_or("bad address")?;
    }
    Ok(())
}

pub const ADD_ONE_SOURCE: &str = "add_one_program\n\
template<typename T>\n\
__global__ void add_one(T* x) { *x += T(1); }\n";

pub const SCALE_SOURCE: &str = "scale_program\n\
template<typename T, int N>\n\
__global__ void scale(T* x, int n) {\n\
    int i = blockIdx.x * blockDim.x + threadIdx.x;\n\
    if (i < n) { x[i] *= N; }\n\
}\n\
__global__ void plain(int* x) { x[0] = 1; }\n";

/// Runtime over the emulator with the fixture kernels registered
pub fn runtime() -> (Runtime, Observer) {
    runtime_with(RuntimeConfig::default())
}

pub fn runtime_with(config: RuntimeConfig) -> (Runtime, Observer) {
    let observer = Observer::default();
    let device = EmuDevice::new(observer.clone())
        .with_kernel("add_one", add_one)
        .with_kernel("scale", scale);
    let compiler = ScriptedCompiler::new(observer.clone());
    (
        Runtime::with_backends(config, Box::new(compiler), Box::new(device)),
        observer,
    )
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
