//! Primitive preparation and leaf encoding for the internal builder.
//!
//! Output layout: an [`HwAccel`] header at offset 0, followed by one leaf list
//! starting at [`HW_ACCEL_SIZE`]. Leaves appear in geometry id order, and
//! within a geometry in primitive id order. The final leaf of the list carries
//! the `last` flag.

use std::ops::Range;

use bytemuck::bytes_of;
use smallvec::SmallVec;

use crate::api::{
    BuildOpDesc, BuildProperties, GeometryFlags, GeometryInfo, InstanceGeometryInfo, ProceduralGeometryInfo,
    RtasFormat, TrianglesGeometryInfo,
};
use crate::geom::{sort_by_id64, PrimRef};
use crate::layout::{
    instance_leaf, HwAccel, InstanceLeaf, InstanceLeafParams, InstanceLeafV1, InstanceLeafV2, NodeType, PrimLeafDesc,
    ProceduralLeaf, QuadLeaf, QuadLeafV1, QuadLeafV2, GEOM_FLAG_NONE, GEOM_FLAG_OPAQUE, HW_ACCEL_SIZE,
};
use crate::util::{BBox3f, Error, Result};

/// Size of a quad or procedural leaf.
pub(super) const LEAF_SIZE: usize = 64;
/// Size of an instance leaf, both halves.
pub(super) const INSTANCE_LEAF_SIZE: usize = 128;

const _: () = assert!(std::mem::size_of::<QuadLeafV1>() == LEAF_SIZE);
const _: () = assert!(std::mem::size_of::<QuadLeafV2>() == LEAF_SIZE);
const _: () = assert!(std::mem::size_of::<ProceduralLeaf>() == LEAF_SIZE);
const _: () = assert!(std::mem::size_of::<InstanceLeafV1>() == INSTANCE_LEAF_SIZE);
const _: () = assert!(std::mem::size_of::<InstanceLeafV2>() == INSTANCE_LEAF_SIZE);

/// Buffer sizes for `op`.
///
/// The expected size assumes every triangle pairs up with a neighbour; the
/// maximum assumes none do. Preparation needs no scratch memory.
pub(super) fn build_properties(op: &BuildOpDesc) -> BuildProperties {
    let mut expected = HW_ACCEL_SIZE;
    let mut max = HW_ACCEL_SIZE;
    for (_, geom) in op.iter_geometries() {
        match geom {
            GeometryInfo::Triangles(t) => {
                let n = t.triangle_count as usize;
                expected += n.div_ceil(2) * LEAF_SIZE;
                max += n * LEAF_SIZE;
            }
            GeometryInfo::Procedural(p) => {
                let bytes = (p.prim_count as usize).div_ceil(ProceduralLeaf::N) * LEAF_SIZE;
                expected += bytes;
                max += bytes;
            }
            GeometryInfo::Instance(_) => {
                expected += INSTANCE_LEAF_SIZE;
                max += INSTANCE_LEAF_SIZE;
            }
        }
    }
    BuildProperties {
        scratch_buffer_size: 0,
        rtas_buffer_size_expected: expected,
        rtas_buffer_size_max: max,
    }
}

/// Contiguous run of primitives of one geometry inside the flat primitive space.
#[derive(Debug, Clone, Copy)]
struct Span {
    geom_id: u32,
    begin: usize,
    count: u32,
}

/// All primitives of a build, numbered consecutively across geometries so
/// work can be split into fixed-size chunks.
#[derive(Debug, Clone)]
pub(super) struct PrimSpace {
    spans: Vec<Span>,
    total: usize,
}

impl PrimSpace {
    pub fn new(op: &BuildOpDesc) -> Self {
        let mut spans = Vec::new();
        let mut total = 0;
        for (geom_id, geom) in op.iter_geometries() {
            let count = geom.prim_count();
            if count > 0 {
                spans.push(Span { geom_id, begin: total, count });
                total += count as usize;
            }
        }
        Self { spans, total }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    /// Number of chunks of `chunk_size`. Never zero, so an empty build still
    /// has one chunk whose completion triggers encoding.
    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        self.total.div_ceil(chunk_size.max(1)).max(1)
    }

    pub fn chunk(&self, index: usize, chunk_size: usize) -> Range<usize> {
        let size = chunk_size.max(1);
        let begin = (index * size).min(self.total);
        begin..(begin + size).min(self.total)
    }

    /// Per-geometry primitive id ranges covering `range`.
    fn split(&self, range: Range<usize>) -> impl Iterator<Item = (u32, Range<u32>)> + '_ {
        self.spans.iter().filter_map(move |s| {
            let end = s.begin + s.count as usize;
            let lo = range.start.max(s.begin);
            let hi = range.end.min(end);
            (lo < hi).then(|| (s.geom_id, (lo - s.begin) as u32..(hi - s.begin) as u32))
        })
    }
}

fn usable(b: &BBox3f) -> bool {
    !b.is_empty() && b.min.is_finite() && b.max.is_finite()
}

fn triangle_bounds(t: &TrianglesGeometryInfo, prim: u32) -> Option<BBox3f> {
    let idx = t.triangle_vertices(prim)?;
    let b = BBox3f::from_points(idx.map(|i| t.vertex(i)));
    usable(&b).then_some(b)
}

/// Primitive references for the primitives in `range`.
///
/// Triangles with out-of-range indices or non-finite vertices and procedural
/// primitives with empty bounds are skipped.
pub(super) fn prepare_prims(op: &BuildOpDesc, space: &PrimSpace, range: Range<usize>) -> Result<Vec<PrimRef>> {
    let mut out = Vec::with_capacity(range.len());
    for (geom_id, prims) in space.split(range) {
        let Some(geom) = op.geometries.get(geom_id as usize).and_then(Option::as_ref) else {
            continue;
        };
        match geom {
            GeometryInfo::Triangles(t) => {
                out.extend(prims.filter_map(|i| triangle_bounds(t, i).map(|b| PrimRef::new(&b, geom_id, i))));
            }
            GeometryInfo::Procedural(p) => {
                out.extend(prims.filter_map(|i| {
                    let b = (p.bounds)(i);
                    usable(&b).then(|| PrimRef::new(&b, geom_id, i))
                }));
            }
            GeometryInfo::Instance(inst) => {
                let b = inst.world_bounds()?;
                if usable(&b) {
                    out.push(PrimRef::new(&b, geom_id, 0));
                }
            }
        }
    }
    Ok(out)
}

/// Encoded acceleration structure.
#[derive(Debug, Clone)]
pub(super) struct Encoded {
    pub bytes: Vec<u8>,
    pub bounds: BBox3f,
}

/// Sort `prims` and encode them in `op.format`.
pub(super) fn encode(op: &BuildOpDesc, prims: &mut [PrimRef]) -> Result<Encoded> {
    match op.format {
        RtasFormat::V1 => encode_as::<QuadLeafV1, InstanceLeafV1>(op, prims),
        RtasFormat::V2 => encode_as::<QuadLeafV2, InstanceLeafV2>(op, prims),
        RtasFormat::Invalid => Err(Error::invalid("invalid rtas format")),
    }
}

enum Leaf<Q, I> {
    Quad(Q),
    Procedural(ProceduralLeaf),
    Instance(I),
}

impl<Q: QuadLeaf, I: InstanceLeaf> Leaf<Q, I> {
    fn node_type(&self) -> NodeType {
        match self {
            Self::Quad(_) => NodeType::Quad,
            Self::Procedural(_) => NodeType::Procedural,
            Self::Instance(_) => NodeType::Instance,
        }
    }

    fn mark_last(&mut self) {
        match self {
            Self::Quad(q) => q.set_last(true),
            Self::Procedural(p) => {
                let prims = p.prim_indices().to_vec();
                *p = ProceduralLeaf::new(p.leaf_desc(), &prims, true);
            }
            Self::Instance(_) => {}
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Self::Quad(q) => bytes_of(q),
            Self::Procedural(p) => bytes_of(p),
            Self::Instance(i) => bytes_of(i),
        }
    }
}

fn encode_as<Q: QuadLeaf, I: InstanceLeaf>(op: &BuildOpDesc, prims: &mut [PrimRef]) -> Result<Encoded> {
    // chunks finish in any order; sorting makes the output deterministic
    sort_by_id64(prims);

    let mut bounds = BBox3f::EMPTY;
    let mut per_geom: Vec<Vec<u32>> = vec![Vec::new(); op.geometries.len()];
    for p in prims.iter() {
        bounds.expand_by_box(&p.bounds());
        if let Some(ids) = per_geom.get_mut(p.geom_id() as usize) {
            ids.push(p.prim_id());
        }
    }

    let mut leaves: Vec<Leaf<Q, I>> = Vec::new();
    for (geom_id, geom) in op.iter_geometries() {
        let ids = &per_geom[geom_id as usize];
        if ids.is_empty() {
            continue;
        }
        match geom {
            GeometryInfo::Triangles(t) => write_quads::<Q, I>(&mut leaves, geom_id, t, ids),
            GeometryInfo::Procedural(p) => write_procedurals(&mut leaves, geom_id, p, ids),
            GeometryInfo::Instance(inst) => leaves.push(Leaf::Instance(encode_instance(geom_id, inst)?)),
        }
    }

    let root_type = match leaves.first() {
        None => NodeType::Invalid,
        Some(first) => {
            let ty = first.node_type();
            if leaves.iter().all(|l| l.node_type() == ty) {
                ty
            } else {
                NodeType::MIXED
            }
        }
    };
    if let Some(last) = leaves.last_mut() {
        last.mark_last();
    }

    let mut header = HwAccel::new(&bounds);
    header.set_root(root_type, HW_ACCEL_SIZE as u64, leaves.len() as u32);

    let mut bytes = Vec::with_capacity(HW_ACCEL_SIZE + leaves.len() * LEAF_SIZE);
    bytes.extend_from_slice(bytes_of(&header));
    for leaf in &leaves {
        bytes.extend_from_slice(leaf.bytes());
    }
    Ok(Encoded { bytes, bounds })
}

fn leaf_desc(geom_id: u32, mask: u8, flags: GeometryFlags) -> PrimLeafDesc {
    let geom_flags = if flags.contains(GeometryFlags::OPAQUE) {
        GEOM_FLAG_OPAQUE
    } else {
        GEOM_FLAG_NONE
    };
    PrimLeafDesc::new(geom_id, geom_id, mask, geom_flags)
}

/// Place triangle `b` next to `a`'s vertices.
///
/// Returns the vertex slots of `b` in `[a0, a1, a2, extra]` if the two share
/// exactly one edge, with the index of the one vertex `a` lacks.
fn pair_slots(a: [u32; 3], b: [u32; 3]) -> Option<([u32; 3], u32)> {
    let mut j = [0u32; 3];
    let mut extra: SmallVec<[u32; 3]> = SmallVec::new();
    for (k, &vb) in b.iter().enumerate() {
        match a.iter().position(|&va| va == vb) {
            Some(slot) => j[k] = slot as u32,
            None => {
                j[k] = 3;
                extra.push(vb);
            }
        }
    }
    // degenerate triangles repeat a slot and must not be paired
    let distinct = j[0] != j[1] && j[1] != j[2] && j[0] != j[2];
    (extra.len() == 1 && distinct).then(|| (j, extra[0]))
}

fn write_quads<Q: QuadLeaf, I>(leaves: &mut Vec<Leaf<Q, I>>, geom_id: u32, t: &TrianglesGeometryInfo, ids: &[u32]) {
    let desc = leaf_desc(geom_id, t.mask, t.flags);
    let pos = |i: u32| t.vertex(i);

    let mut k = 0;
    while k < ids.len() {
        let p0 = ids[k];
        let a = t.triangle(p0);
        let va = a.map(pos);

        let paired = ids.get(k + 1).and_then(|&p1| {
            let delta = p1 - p0;
            if !Q::delta_fits(delta) {
                return None;
            }
            pair_slots(a, t.triangle(p1)).map(|(j, extra)| (delta, j, extra))
        });

        let leaf = match paired {
            Some((delta, j, extra)) => {
                k += 2;
                Q::from_parts(desc, p0, delta, j, false, [va[0], va[1], va[2], pos(extra)])
            }
            None => {
                k += 1;
                Q::from_parts(desc, p0, 0, [0, 1, 2], false, [va[0], va[1], va[2], va[2]])
            }
        };
        leaves.push(Leaf::Quad(leaf));
    }
}

fn write_procedurals<Q, I>(leaves: &mut Vec<Leaf<Q, I>>, geom_id: u32, p: &ProceduralGeometryInfo, ids: &[u32]) {
    let desc = leaf_desc(geom_id, p.mask, p.flags);
    for chunk in ids.chunks(ProceduralLeaf::N) {
        leaves.push(Leaf::Procedural(ProceduralLeaf::new(desc, chunk, false)));
    }
}

/// Instance leaves store 48-bit pointers; both the structure and its first
/// node behind the header have to fit.
fn encode_instance<I: InstanceLeaf>(geom_id: u32, inst: &InstanceGeometryInfo) -> Result<I> {
    let bvh_ptr = inst.acceleration_structure;
    let start_node_ptr = bvh_ptr
        .checked_add(HW_ACCEL_SIZE as u64)
        .filter(|&p| p <= instance_leaf::PTR48.max_value())
        .ok_or_else(|| {
            Error::invalid(format!(
                "geometry {geom_id}: acceleration structure address {bvh_ptr:#x} does not fit 48 bits"
            ))
        })?;
    Ok(I::from_params(&InstanceLeafParams {
        shader_index: geom_id,
        geom_mask: inst.mask,
        inst_flags: inst.flags.bits() as u8,
        start_node_ptr,
        bvh_ptr,
        instance_id: inst.user_id,
        instance_index: geom_id,
        obj2world: inst.obj2world()?,
    }))
}

/// Vertex positions of a stored quad leaf, for checks.
#[cfg(test)]
pub(super) fn quad_triangles<Q: QuadLeaf>(q: &Q) -> [[crate::util::Vec3; 3]; 2] {
    let v = q.vertices();
    let j = q.j();
    [[v[0], v[1], v[2]], [v[j[0] as usize], v[j[1] as usize], v[j[2] as usize]]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Affine3A, Vec3};
    use bytemuck::pod_read_unaligned;

    fn quad_op(format: RtasFormat) -> BuildOpDesc {
        let tris = TrianglesGeometryInfo::from_slices(
            &[[0, 1, 2], [0, 2, 3]],
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
        );
        BuildOpDesc::new(format).with_geometry(GeometryInfo::Triangles(tris))
    }

    fn build(op: &BuildOpDesc, chunk: usize) -> Encoded {
        let space = PrimSpace::new(op);
        let mut prims = Vec::new();
        // reverse chunk order to show the result does not depend on it
        for c in (0..space.chunk_count(chunk)).rev() {
            prims.extend(prepare_prims(op, &space, space.chunk(c, chunk)).unwrap());
        }
        encode(op, &mut prims).unwrap()
    }

    #[test]
    fn test_pair_slots() {
        assert_eq!(pair_slots([0, 1, 2], [0, 2, 3]), Some(([0, 2, 3], 3)));
        assert_eq!(pair_slots([0, 1, 2], [3, 2, 1]), Some(([3, 2, 1], 3)));
        // shares one vertex only
        assert_eq!(pair_slots([0, 1, 2], [0, 4, 5]), None);
        // same triangle
        assert_eq!(pair_slots([0, 1, 2], [2, 1, 0]), None);
        // degenerate
        assert_eq!(pair_slots([0, 1, 2], [0, 0, 3]), None);
    }

    #[test]
    fn test_quad_pairs_into_one_leaf() {
        let enc = build(&quad_op(RtasFormat::V1), 1);
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE + LEAF_SIZE);

        let header: HwAccel = pod_read_unaligned(&enc.bytes[..HW_ACCEL_SIZE]);
        assert_eq!(header.root_node_type(), Some(NodeType::Quad));
        assert_eq!(header.root_offset(), HW_ACCEL_SIZE as u64);
        assert_eq!(header.leaf_count(), 1);

        let q: QuadLeafV1 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE..]);
        assert!(q.last());
        assert_eq!(q.prim_index0(), 0);
        assert_eq!(q.prim_index1(), 1);
        assert_eq!(q.j(), [0, 2, 3]);
        let [t0, t1] = quad_triangles(&q);
        assert_eq!(t0[1], Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(t1[2], Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(enc.bounds, BBox3f::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn test_delta_too_wide_for_v2() {
        // 40 triangles, only the first and last two are valid neighbours
        let mut indices = vec![[0, 1, 2]];
        indices.extend(std::iter::repeat([0, 0, 99]).take(38));
        indices.push([0, 2, 3]);
        let verts = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y];
        let tris = TrianglesGeometryInfo::from_slices(&indices, &verts);

        let op = BuildOpDesc::new(RtasFormat::V2).with_geometry(GeometryInfo::Triangles(tris.clone()));
        let enc = build(&op, 8);
        // out-of-range triangles are dropped, the survivors are 39 apart
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE + 2 * LEAF_SIZE);
        let a: QuadLeafV2 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE..HW_ACCEL_SIZE + LEAF_SIZE]);
        let b: QuadLeafV2 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE + LEAF_SIZE..]);
        assert!(!a.last() && b.last());
        assert_eq!((a.prim_index0(), a.prim_index1_delta()), (0, 0));
        assert_eq!((b.prim_index0(), b.prim_index1_delta()), (39, 0));

        // the V1 delta field holds 39
        let op = BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Triangles(tris));
        let enc = build(&op, 8);
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE + LEAF_SIZE);
        let q: QuadLeafV1 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE..]);
        assert_eq!(q.prim_index1(), 39);
    }

    #[test]
    fn test_procedural_leaves() {
        let boxes = (0..20)
            .map(|i| BBox3f::new(Vec3::splat(i as f32), Vec3::splat(i as f32 + 1.0)))
            .collect();
        let op = BuildOpDesc::new(RtasFormat::V1)
            .with_geometry(GeometryInfo::Procedural(ProceduralGeometryInfo::from_boxes(boxes)));
        let props = build_properties(&op);
        let enc = build(&op, 3);
        assert_eq!(enc.bytes.len(), props.rtas_buffer_size_max);
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE + 2 * LEAF_SIZE);

        let a: ProceduralLeaf = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE..HW_ACCEL_SIZE + LEAF_SIZE]);
        let b: ProceduralLeaf = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE + LEAF_SIZE..]);
        assert_eq!(a.num_primitives(), 13);
        assert_eq!(a.last_mask(), 0);
        assert_eq!(b.prim_indices(), &[13, 14, 15, 16, 17, 18, 19]);
        assert!(b.is_last(6));
        assert_eq!(enc.bounds.max, Vec3::splat(20.0));
    }

    #[test]
    fn test_mixed_scene() {
        let xfm = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let inst = InstanceGeometryInfo::new(0x4000, &xfm, BBox3f::new(Vec3::ZERO, Vec3::ONE));
        let mut op = quad_op(RtasFormat::V2);
        op.geometries.push(None);
        op.geometries.push(Some(GeometryInfo::Instance(inst)));

        let enc = build(&op, 1);
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE + LEAF_SIZE + INSTANCE_LEAF_SIZE);
        let header: HwAccel = pod_read_unaligned(&enc.bytes[..HW_ACCEL_SIZE]);
        assert_eq!(header.root_node_type(), Some(NodeType::MIXED));
        assert_eq!(header.leaf_count(), 2);
        assert_eq!(enc.bounds.max, Vec3::new(11.0, 1.0, 1.0));

        let leaf: InstanceLeafV2 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE + LEAF_SIZE..]);
        assert_eq!(leaf.part1().bvh_ptr(), 0x4000);
        assert_eq!(leaf.part1().instance_index, 2);
        assert_eq!(leaf.start_node_ptr(), 0x4000 + HW_ACCEL_SIZE as u64);
    }

    #[test]
    fn test_instance_address_out_of_range() {
        for addr in [u64::MAX - 16, 1u64 << 48, (1u64 << 48) - 64] {
            let inst = InstanceGeometryInfo::new(addr, &Affine3A::IDENTITY, BBox3f::new(Vec3::ZERO, Vec3::ONE));
            let op = BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Instance(inst));
            let space = PrimSpace::new(&op);
            let mut prims = prepare_prims(&op, &space, 0..space.len()).unwrap();
            assert!(
                matches!(encode(&op, &mut prims), Err(Error::InvalidArgument(_))),
                "address {addr:#x}"
            );
        }

        // a 128-byte aligned structure near the top of the 48-bit range
        let top = (1u64 << 48) - 2 * HW_ACCEL_SIZE as u64;
        let inst = InstanceGeometryInfo::new(top, &Affine3A::IDENTITY, BBox3f::new(Vec3::ZERO, Vec3::ONE));
        let op = BuildOpDesc::new(RtasFormat::V1).with_geometry(GeometryInfo::Instance(inst));
        let enc = build(&op, 4);
        let leaf: InstanceLeafV1 = pod_read_unaligned(&enc.bytes[HW_ACCEL_SIZE..HW_ACCEL_SIZE + INSTANCE_LEAF_SIZE]);
        assert_eq!(leaf.part1().bvh_ptr(), top);
        assert_eq!(leaf.start_node_ptr(), top + HW_ACCEL_SIZE as u64);
    }

    #[test]
    fn test_empty_build() {
        let op = BuildOpDesc::new(RtasFormat::V1);
        let space = PrimSpace::new(&op);
        assert_eq!(space.len(), 0);
        assert_eq!(space.chunk_count(16), 1);
        let enc = build(&op, 16);
        assert_eq!(enc.bytes.len(), HW_ACCEL_SIZE);
        let header: HwAccel = pod_read_unaligned(&enc.bytes[..HW_ACCEL_SIZE]);
        assert_eq!(header.root_node_type(), Some(NodeType::Invalid));
        assert!(enc.bounds.is_empty());
    }

    #[test]
    fn test_prim_space_chunks() {
        let op = quad_op(RtasFormat::V1)
            .with_geometry(GeometryInfo::Procedural(ProceduralGeometryInfo::from_boxes(vec![
                BBox3f::new(Vec3::ZERO, Vec3::ONE);
                3
            ])));
        let space = PrimSpace::new(&op);
        assert_eq!(space.len(), 5);
        assert_eq!(space.chunk_count(2), 3);
        assert_eq!(space.chunk(2, 2), 4..5);
        let parts: Vec<_> = space.split(1..4).collect();
        assert_eq!(parts, vec![(0, 1..2), (1, 0..2)]);
    }
}
