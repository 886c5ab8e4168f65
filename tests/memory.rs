//! Device memory manager against the host emulator

mod common;

use common::{f32_bytes, f32s, runtime, PITCH_ALIGN};
use nvjit::{Extent3D, JitError, KernelArg, TextureTarget};

// ============================================================================
// LINEAR AND PINNED
// ============================================================================

#[test]
fn test_linear_roundtrip() {
    let (mut rt, _) = runtime();
    let buffer = rt.alloc_device(32).unwrap();
    let payload: Vec<u8> = (0..32).collect();
    rt.write(buffer, &payload).unwrap();

    let mut out = vec![0u8; 32];
    rt.read(buffer, &mut out).unwrap();
    assert_eq!(out, payload);

    // Partial reads start at the beginning of the buffer
    let mut head = [0u8; 4];
    rt.read(buffer, &mut head).unwrap();
    assert_eq!(head, [0, 1, 2, 3]);
    assert_ne!(rt.device_ptr(buffer).unwrap(), 0);
}

#[test]
fn test_linear_out_of_bounds() {
    let (mut rt, _) = runtime();
    let buffer = rt.alloc_device(8).unwrap();
    assert!(matches!(rt.write(buffer, &[0u8; 9]), Err(JitError::OutOfBounds(_))));
    let mut big = [0u8; 9];
    assert!(matches!(rt.read(buffer, &mut big), Err(JitError::OutOfBounds(_))));
}

#[test]
fn test_zero_sized_allocation_is_a_device_error() {
    let (mut rt, _) = runtime();
    let err = rt.alloc_device(0).unwrap_err();
    assert_eq!(err.error_name(), "CUDA_ERROR_INVALID_VALUE");
}

#[test]
fn test_device_to_device_copy() {
    let (mut rt, _) = runtime();
    let src = rt.alloc_device(16).unwrap();
    let dst = rt.alloc_device(8).unwrap();
    rt.write(src, &f32_bytes(&[1.5, 2.5, 3.5, 4.5])).unwrap();

    rt.copy_device_to_device(dst, src, 8).unwrap();
    let mut out = [0u8; 8];
    rt.read(dst, &mut out).unwrap();
    assert_eq!(f32s(&out), vec![1.5, 2.5]);

    assert!(matches!(
        rt.copy_device_to_device(dst, src, 16),
        Err(JitError::OutOfBounds(_))
    ));
}

#[test]
fn test_free_invalidates_handle() {
    let (mut rt, _) = runtime();
    let buffer = rt.alloc_device(4).unwrap();
    rt.free(buffer).unwrap();
    assert!(matches!(rt.write(buffer, &[0u8; 4]), Err(JitError::InvalidHandle { .. })));
    assert!(matches!(rt.free(buffer), Err(JitError::InvalidHandle { .. })));

    // The slot is reused, the old handle stays dead
    let again = rt.alloc_device(4).unwrap();
    assert_ne!(again, buffer);
    assert!(rt.write(again, &[1, 2, 3, 4]).is_ok());
    assert!(rt.device_ptr(buffer).is_err());
}

#[test]
fn test_pinned_roundtrip_and_kernel_access() {
    let (mut rt, _) = runtime();
    let pinned = rt.alloc_pinned_host(4).unwrap();
    rt.write_pinned(pinned, &f32_bytes(&[9.0])).unwrap();

    let program = rt.compile(common::ADD_ONE_SOURCE, None).unwrap();
    let kernel = rt.kernel(program, "add_one").unwrap();
    let inst = rt.instantiate(kernel, &["float"]).unwrap();
    assert!(rt.launch_instantiation(inst, &[KernelArg::Pinned(pinned)]).is_ok());

    let mut out = [0u8; 4];
    rt.read_pinned(pinned, &mut out).unwrap();
    assert_eq!(f32s(&out), vec![10.0]);

    assert!(matches!(
        rt.write_pinned(pinned, &[0u8; 5]),
        Err(JitError::OutOfBounds(_))
    ));
    rt.free_pinned(pinned).unwrap();
    assert!(rt.read_pinned(pinned, &mut out).is_err());
}

#[test]
fn test_foreign_handle_kind_rejected() {
    let (mut rt, _) = runtime();
    let pinned = rt.alloc_pinned_host(4).unwrap();
    // Same bits, read as a device buffer handle
    let forged = nvjit::DeviceBufferHandle::from_raw(pinned.to_raw());
    match rt.free(forged).unwrap_err() {
        JitError::InvalidHandle { expected, reason, .. } => {
            assert_eq!(expected, "device buffer");
            assert!(reason.contains("different resource kind"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The pinned buffer is untouched
    assert!(rt.write_pinned(pinned, &[1, 2, 3, 4]).is_ok());
}

// ============================================================================
// 3-D PITCHED
// ============================================================================

#[test]
fn test_pitched_allocation_reports_pitch() {
    let (mut rt, _) = runtime();
    let volume = rt.alloc_3d(10, 4, 2).unwrap();
    assert_eq!(volume.ptr.xsize, 10);
    assert_eq!(volume.ptr.ysize, 4);
    assert_eq!(volume.ptr.pitch, PITCH_ALIGN as u64);
    assert!(volume.ptr.pitch >= volume.ptr.xsize);
}

#[test]
fn test_pitched_roundtrip() {
    let (mut rt, _) = runtime();
    let extent = Extent3D::new(10, 4, 2);
    let volume = rt.alloc_3d(extent.width, extent.height, extent.depth).unwrap();
    let packed: Vec<u8> = (0..80).collect();
    rt.write_3d(volume.handle, &packed, extent, 10).unwrap();

    let mut out = vec![0u8; 80];
    rt.read_3d(volume.handle, &mut out, extent, 10).unwrap();
    assert_eq!(out, packed);

    // Sub-volume from the origin
    let corner = Extent3D::new(2, 2, 1);
    let mut small = vec![0u8; 4];
    rt.read_3d(volume.handle, &mut small, corner, 2).unwrap();
    assert_eq!(small, vec![0, 1, 10, 11]);
}

#[test]
fn test_pitched_bounds() {
    let (mut rt, _) = runtime();
    let volume = rt.alloc_3d(8, 2, 2).unwrap();
    let data = vec![0u8; 64];

    let too_deep = Extent3D::new(8, 2, 3);
    assert!(matches!(
        rt.write_3d(volume.handle, &data, too_deep, 8),
        Err(JitError::OutOfBounds(_))
    ));
    let fits = Extent3D::new(8, 2, 2);
    assert!(matches!(
        rt.write_3d(volume.handle, &data[..31], fits, 8),
        Err(JitError::OutOfBounds(_))
    ));
    // Row width is descriptive; only the extent decides what is copied
    rt.write_3d(volume.handle, &data, fits, 0).unwrap();
    rt.write_3d(volume.handle, &data, fits, 64).unwrap();
    let mut out = vec![1u8; 32];
    rt.read_3d(volume.handle, &mut out, fits, 3).unwrap();
    assert_eq!(out, vec![0u8; 32]);
    rt.free_3d(volume.handle).unwrap();
    assert!(rt.free_3d(volume.handle).is_err());
}

// ============================================================================
// ARRAYS AND TEXTURES
// ============================================================================

#[test]
fn test_array_roundtrip() {
    let (mut rt, _) = runtime();
    let array = rt.alloc_array_3d(4, 3, 2).unwrap();
    let extent = Extent3D::new(4, 3, 2);
    let packed: Vec<u8> = (0..24).map(|v| (v as i8 - 12) as u8).collect();
    rt.write_array_3d(array, &packed, extent).unwrap();

    let mut out = vec![0u8; 24];
    rt.read_array_3d(array, &mut out, extent).unwrap();
    assert_eq!(out, packed);

    let mut short = vec![0u8; 23];
    assert!(matches!(
        rt.read_array_3d(array, &mut short, extent),
        Err(JitError::OutOfBounds(_))
    ));
    rt.free_array_3d(array).unwrap();
}

#[test]
fn test_texture_over_pitched_and_linear() {
    let (mut rt, _) = runtime();
    let volume = rt.alloc_3d(16, 4, 4).unwrap();
    let span = (volume.ptr.pitch * volume.ptr.ysize * 4) as usize;
    let texture = rt.bind_texture_3d(volume.handle, span).unwrap();

    let buffer = rt.alloc_device(64).unwrap();
    let linear = rt.bind_texture_3d(TextureTarget::Buffer(buffer), 64).unwrap();
    assert_ne!(texture.to_raw(), linear.to_raw());

    assert!(matches!(
        rt.bind_texture_3d(buffer, 65),
        Err(JitError::OutOfBounds(_))
    ));
    assert!(matches!(
        rt.bind_texture_3d(buffer, 0),
        Err(JitError::OutOfBounds(_))
    ));

    rt.destroy_texture(texture).unwrap();
    rt.destroy_texture(linear).unwrap();
    assert!(rt.destroy_texture(linear).is_err());
}

#[test]
fn test_texture_and_pitched_as_kernel_args() {
    let (mut rt, _) = runtime();
    let volume = rt.alloc_3d(16, 1, 1).unwrap();
    let texture = rt.bind_texture_3d(volume.handle, 16).unwrap();
    let program = rt.compile(common::SCALE_SOURCE, None).unwrap();
    let kernel = rt.kernel(program, "plain").unwrap();
    let inst = rt.instantiate::<&str>(kernel, &[]).unwrap();
    let result = rt.launch_instantiation(
        inst,
        &[KernelArg::Pitched(volume.handle), KernelArg::Texture(texture)],
    );
    assert!(result.is_ok(), "{result:?}");
}
