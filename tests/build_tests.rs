//! End-to-end builds through BuilderContext on the host driver.

#![cfg(feature = "internal-builder")]

use std::sync::Arc;

use rtas::api::*;
use rtas::config::Config;
use rtas::driver::HostDriver;
use rtas::layout::{HwAccel, InstanceLeaf, InstanceLeafV1, NodeType, ProceduralLeaf, QuadLeaf, QuadLeafV1, HW_ACCEL_SIZE};
use rtas::util::{Affine3A, BBox3f, Vec3};
use rtas::{BuilderContext, Error};

const DRIVER: DriverHandle = DriverHandle(1);
const DEVICE: DeviceHandle = DeviceHandle(1);
const CONTEXT: ContextHandle = ContextHandle(1);

fn context(config: Config) -> (BuilderContext, Arc<HostDriver>) {
    let driver = Arc::new(HostDriver::new());
    let ctx = BuilderContext::with_config(driver.loader(), config);
    ctx.init().expect("init");
    ctx.init_builder(ApiRevision::Ext, DRIVER, BuilderMode::Internal)
        .expect("internal builder");
    (ctx, driver)
}

fn quad() -> GeometryInfo {
    GeometryInfo::Triangles(TrianglesGeometryInfo::from_slices(
        &[[0, 1, 2], [0, 2, 3]],
        &[Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
    ))
}

/// `n` x `n` unit quads in the z=0 plane, two triangles each.
fn grid(n: u32) -> GeometryInfo {
    let mut vertices = Vec::new();
    for y in 0..=n {
        for x in 0..=n {
            vertices.push(Vec3::new(x as f32, y as f32, 0.0));
        }
    }
    let mut indices = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let a = y * (n + 1) + x;
            let (b, c, d) = (a + 1, a + n + 2, a + n + 1);
            indices.push([a, b, c]);
            indices.push([a, c, d]);
        }
    }
    GeometryInfo::Triangles(TrianglesGeometryInfo::from_slices(&indices, &vertices))
}

/// Synchronous build into a fresh shared buffer sized for the worst case.
fn build(ctx: &BuilderContext, op: &BuildOpDesc) -> (DeviceBuffer, BuildOutput) {
    let builder = ctx.create_builder(DRIVER).unwrap();
    let props = ctx.build_properties(builder, op).unwrap();
    assert_eq!(props.scratch_buffer_size, 0);
    let rtas = ctx
        .mem_alloc_shared(CONTEXT, DEVICE, props.rtas_buffer_size_max, RTAS_BUFFER_ALIGNMENT as usize)
        .unwrap();
    let status = ctx.build(builder, op, None, &rtas, None).unwrap();
    ctx.destroy_builder(builder).unwrap();
    let out = *status.output().expect("synchronous build");
    assert!(out.rtas_bytes <= props.rtas_buffer_size_max);
    (rtas, out)
}

fn header(rtas: &DeviceBuffer) -> HwAccel {
    bytemuck::pod_read_unaligned(&rtas.to_vec()[..HW_ACCEL_SIZE])
}

#[test]
fn test_quad_build() {
    let (ctx, _driver) = context(Config::default());
    let format = ctx.rtas_device_properties(DEVICE).unwrap().format;
    assert_eq!(format, RtasFormat::V1);

    let op = BuildOpDesc::new(format).with_geometry(quad());
    let (rtas, out) = build(&ctx, &op);
    assert_eq!(out.rtas_bytes, HW_ACCEL_SIZE + 64);
    assert_eq!(out.bounds, BBox3f::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));

    let hdr = header(&rtas);
    assert_eq!(hdr.bounds(), out.bounds);
    assert_eq!(hdr.root_node_type(), Some(NodeType::Quad));
    assert_eq!(hdr.root_offset(), HW_ACCEL_SIZE as u64);
    assert_eq!(hdr.leaf_count(), 1);

    let leaf: QuadLeafV1 = bytemuck::pod_read_unaligned(&rtas.to_vec()[HW_ACCEL_SIZE..HW_ACCEL_SIZE + 64]);
    assert!(leaf.last());
    assert_eq!(leaf.prim_index0(), 0);
    assert_eq!(leaf.prim_index1_delta(), 1);
    assert_eq!(leaf.j(), [0, 2, 3]);
    assert_eq!(leaf.leaf_desc().geom_index(), 0);
}

#[test]
fn test_deferred_join_from_threads() {
    let config = Config {
        build_chunk_size: 8,
        ..Config::default()
    };
    let (ctx, _driver) = context(config);
    let op = BuildOpDesc::new(RtasFormat::V1).with_geometry(grid(8));
    let builder = ctx.create_builder(DRIVER).unwrap();
    let pop = ctx.parallel_operation_create(DRIVER).unwrap();
    let props = ctx.build_properties(builder, &op).unwrap();
    assert_eq!(props.rtas_buffer_size_expected, HW_ACCEL_SIZE + 64 * 64);

    let rtas = ctx
        .mem_alloc_shared(CONTEXT, DEVICE, props.rtas_buffer_size_max, 128)
        .unwrap();
    let status = ctx.build(builder, &op, None, &rtas, Some(pop)).unwrap();
    assert!(status.is_deferred());

    let outputs: Vec<BuildOutput> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| s.spawn(|| ctx.parallel_operation_join(pop).expect("join")))
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });
    assert!(outputs.windows(2).all(|w| w[0] == w[1]), "joiners disagree");
    assert_eq!(outputs[0].rtas_bytes, HW_ACCEL_SIZE + 64 * 64);
    assert_eq!(outputs[0].bounds, BBox3f::new(Vec3::ZERO, Vec3::new(8.0, 8.0, 0.0)));

    // a late join still sees the finished build
    assert_eq!(ctx.parallel_operation_join(pop).unwrap(), outputs[0]);
    assert_eq!(header(&rtas).leaf_count(), 64);

    ctx.parallel_operation_destroy(pop).unwrap();
    ctx.destroy_builder(builder).unwrap();
}

#[test]
fn test_failed_deferred_build_frees_operation() {
    let (ctx, _driver) = context(Config {
        build_chunk_size: 4,
        ..Config::default()
    });
    let mut geom = ProceduralGeometryInfo::from_boxes(vec![BBox3f::new(Vec3::ZERO, Vec3::ONE); 16]);
    geom.bounds = Arc::new(|i: u32| {
        assert!(i != 9, "no bounds for primitive {i}");
        BBox3f::new(Vec3::ZERO, Vec3::ONE)
    });
    let bad = BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Procedural(geom));

    let builder = ctx.create_builder(DRIVER).unwrap();
    let pop = ctx.parallel_operation_create(DRIVER).unwrap();
    let rtas = ctx.mem_alloc_shared(CONTEXT, DEVICE, 4096, 128).unwrap();
    assert!(ctx.build(builder, &bad, None, &rtas, Some(pop)).unwrap().is_deferred());

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..3).map(|_| s.spawn(|| ctx.parallel_operation_join(pop))).collect();
        handles.into_iter().map(|h| h.join().expect("joiner")).collect()
    });
    for r in &results {
        assert!(matches!(r, Err(Error::Build(_))), "got {r:?}");
    }

    // the same operation runs the next build
    let good = BuildOpDesc::new(RtasFormat::V1).with_geometry(quad());
    assert!(ctx.build(builder, &good, None, &rtas, Some(pop)).unwrap().is_deferred());
    assert_eq!(ctx.parallel_operation_join(pop).unwrap().rtas_bytes, HW_ACCEL_SIZE + 64);

    ctx.parallel_operation_destroy(pop).unwrap();
    ctx.destroy_builder(builder).unwrap();
}

#[test]
fn test_instance_build() {
    let (ctx, _driver) = context(Config::default());
    let (blas, blas_out) = build(&ctx, &BuildOpDesc::new(RtasFormat::V1).with_geometry(quad()));

    let xfm = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0));
    let mut inst = InstanceGeometryInfo::new(blas.address(), &xfm, blas_out.bounds);
    inst.user_id = 42;
    let op = BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Instance(inst));
    let (tlas, out) = build(&ctx, &op);

    assert_eq!(out.rtas_bytes, HW_ACCEL_SIZE + 128);
    assert_eq!(out.bounds.min, Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(out.bounds.max, Vec3::new(11.0, 1.0, 0.0));
    assert_eq!(header(&tlas).root_node_type(), Some(NodeType::Instance));

    let leaf: InstanceLeafV1 = bytemuck::pod_read_unaligned(&tlas.to_vec()[HW_ACCEL_SIZE..HW_ACCEL_SIZE + 128]);
    assert_eq!(leaf.part1().bvh_ptr(), blas.address());
    assert_eq!(leaf.start_node_ptr(), blas.address() + HW_ACCEL_SIZE as u64);
    assert_eq!(leaf.part1().instance_id, 42);
    assert!(leaf.obj2world().abs_diff_eq(xfm, 1e-6));
}

#[test]
fn test_procedural_build() {
    let (ctx, _driver) = context(Config::default());
    let boxes: Vec<BBox3f> = (0..20)
        .map(|i| {
            let p = Vec3::splat(i as f32);
            BBox3f::new(p, p + Vec3::ONE)
        })
        .collect();
    let op = BuildOpDesc::new(RtasFormat::V1)
        .with_geometry(GeometryInfo::Procedural(ProceduralGeometryInfo::from_boxes(boxes)));
    let (rtas, out) = build(&ctx, &op);

    assert_eq!(out.rtas_bytes, HW_ACCEL_SIZE + 2 * 64);
    assert_eq!(out.bounds, BBox3f::new(Vec3::ZERO, Vec3::splat(20.0)));
    assert_eq!(header(&rtas).root_node_type(), Some(NodeType::Procedural));

    let bytes = rtas.to_vec();
    let first: ProceduralLeaf = bytemuck::pod_read_unaligned(&bytes[HW_ACCEL_SIZE..HW_ACCEL_SIZE + 64]);
    let second: ProceduralLeaf = bytemuck::pod_read_unaligned(&bytes[HW_ACCEL_SIZE + 64..HW_ACCEL_SIZE + 128]);
    assert_eq!(first.num_primitives(), ProceduralLeaf::N);
    assert_eq!(second.num_primitives(), 20 - ProceduralLeaf::N);
    assert_eq!(first.last_mask(), 0);
    assert!(second.is_last(second.num_primitives() - 1));
}

#[test]
fn test_empty_build() {
    let (ctx, _driver) = context(Config::default());
    let op = BuildOpDesc::new(RtasFormat::V1);
    let (rtas, out) = build(&ctx, &op);
    assert_eq!(out.rtas_bytes, HW_ACCEL_SIZE);
    assert_eq!(header(&rtas).root_node_type(), Some(NodeType::Invalid));
}

#[test]
fn test_copy_to_device_memory() {
    let (ctx, driver) = context(Config::default());
    let (host, out) = build(&ctx, &BuildOpDesc::new(RtasFormat::V1).with_geometry(quad()));
    let device = ctx
        .mem_alloc_device(CONTEXT, DEVICE, host.len(), RTAS_BUFFER_ALIGNMENT as usize)
        .unwrap();
    assert_eq!(device.kind(), MemoryKind::Device);

    let queue = ctx.command_queue_create(CONTEXT, DEVICE).unwrap();
    let list = ctx.command_list_create(CONTEXT, DEVICE).unwrap();
    ctx.command_list_append_copy(list, &device, &host, out.rtas_bytes).unwrap();
    // nothing moves before submission
    assert!(device.to_vec().iter().all(|&b| b == 0));
    ctx.command_list_close(list).unwrap();
    ctx.command_queue_execute_command_lists(queue, &[list]).unwrap();
    ctx.command_list_destroy(list).unwrap();

    assert_eq!(device.to_vec()[..out.rtas_bytes], host.to_vec()[..out.rtas_bytes]);
    ctx.mem_free(CONTEXT, &host).unwrap();
    ctx.mem_free(CONTEXT, &device).unwrap();
    assert_eq!(driver.allocation_count(), 0);
}
