//! End-to-end checks on a real CUDA device
//!
//! Needs libcuda and libnvrtc on the loader path:
//! ```bash
//! cargo test --features cuda --test gpu -- --ignored
//! ```

#![cfg(feature = "cuda")]

use nvjit::{KernelArg, Limit, Runtime, RuntimeConfig};
use serial_test::serial;

const SCALE_SOURCE: &str = "scale_program\n\
    template<typename T, int N>\n\
    __global__ void scale(T* data, int n) {\n\
        int i = blockIdx.x * blockDim.x + threadIdx.x;\n\
        if (i < n) { data[i] *= N; }\n\
    }\n";

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn open() -> Option<Runtime> {
    match Runtime::new(RuntimeConfig::from_env()) {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_scale_template_on_device() {
    let Some(mut rt) = open() else { return };

    let program = rt.compile(SCALE_SOURCE, None).unwrap();
    let kernel = rt.kernel(program, "scale").unwrap();
    let inst = rt.instantiate(kernel, &["float", "3"]).unwrap();
    let info = rt.instantiation_info(inst).unwrap();
    assert!(info.ir.contains(".entry"));
    assert!(!info.lowered_name.is_empty());

    let n = 1000usize;
    let input: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let data = rt.alloc_device(n * 4).unwrap();
    rt.write(data, &f32_bytes(&input)).unwrap();

    let grid = (n as u32).div_ceil(256);
    let launcher = rt.configure(inst, &[grid], &[256]).unwrap();
    let result = rt.launch(launcher, &[KernelArg::Buffer(data), KernelArg::from(n as i32)]);
    assert!(result.is_ok(), "{result:?}");
    rt.synchronize().unwrap();

    let mut out = vec![0u8; n * 4];
    rt.read(data, &mut out).unwrap();
    let expected: Vec<f32> = input.iter().map(|v| v * 3.0).collect();
    assert_eq!(f32s(&out), expected);
}

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_serialized_instantiation_reloads() {
    let Some(mut rt) = open() else { return };

    let program = rt.compile(SCALE_SOURCE, None).unwrap();
    let kernel = rt.kernel(program, "scale").unwrap();
    let inst = rt.instantiate(kernel, &["int", "2"]).unwrap();
    let bytes = rt.serialize(inst).unwrap();
    rt.destroy_instantiation(inst).unwrap();

    let restored = rt.deserialize(&bytes).unwrap();
    let data = rt.alloc_device(4).unwrap();
    rt.write(data, &21i32.to_le_bytes()).unwrap();
    let launcher = rt.configure(restored, &[1], &[1]).unwrap();
    assert!(rt.launch(launcher, &[KernelArg::Buffer(data), KernelArg::from(1i32)]).is_ok());
    rt.synchronize().unwrap();

    let mut out = [0u8; 4];
    rt.read(data, &mut out).unwrap();
    assert_eq!(i32::from_le_bytes(out), 42);
}

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_compile_error_carries_log() {
    let Some(mut rt) = open() else { return };
    let err = rt
        .compile("broken\n__global__ void k() { undeclared_symbol = 1; }", None)
        .unwrap_err();
    let nvjit::JitError::Compile { program, log } = err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert_eq!(program, "broken");
    assert!(log.contains("undeclared_symbol"), "{log}");
}

// ============================================================================
// DEVICE
// ============================================================================

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_device_queries() {
    let Some(mut rt) = open() else { return };
    assert!(rt.device_count().unwrap() >= 1);
    let ordinal = rt.current_device().unwrap();
    let props = rt.device_properties(ordinal).unwrap();
    assert!(!props.name.is_empty());

    let before = rt.get_limit(Limit::StackSize).unwrap();
    rt.set_limit(Limit::StackSize, before).unwrap();
}

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_pitched_roundtrip_on_device() {
    let Some(mut rt) = open() else { return };
    let extent = nvjit::Extent3D::new(24, 3, 2);
    let volume = rt.alloc_3d(extent.width, extent.height, extent.depth).unwrap();
    assert!(volume.ptr.pitch >= 24);

    let packed: Vec<u8> = (0..144u32).map(|v| v as u8).collect();
    rt.write_3d(volume.handle, &packed, extent, 24).unwrap();
    let mut out = vec![0u8; 144];
    rt.read_3d(volume.handle, &mut out, extent, 24).unwrap();
    assert_eq!(out, packed);
}

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_set_device_round_trip_keeps_allocations() {
    let Some(mut rt) = open() else { return };
    let start = rt.current_device().unwrap();
    let data = rt.alloc_device(4).unwrap();
    rt.write(data, &5i32.to_le_bytes()).unwrap();

    let other = if rt.device_count().unwrap() > 1 { (start + 1) % 2 } else { start };
    rt.set_device(other).unwrap();
    rt.set_device(start).unwrap();

    let mut out = [0u8; 4];
    rt.read(data, &mut out).unwrap();
    assert_eq!(i32::from_le_bytes(out), 5);
    rt.free(data).unwrap();
}

#[test]
#[ignore = "requires a CUDA device"]
#[serial]
fn test_runtime_usable_from_another_thread() {
    let Some(mut rt) = open() else { return };
    let data = rt.alloc_device(4).unwrap();
    let rt = std::thread::spawn(move || {
        rt.write(data, &9i32.to_le_bytes()).unwrap();
        rt
    })
    .join()
    .unwrap();

    let mut out = [0u8; 4];
    rt.read(data, &mut out).unwrap();
    assert_eq!(i32::from_le_bytes(out), 9);
}
