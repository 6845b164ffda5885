//! Leaf records: quads, procedurals and instances.
//!
//! Every leaf is 64-byte aligned and starts with a [`PrimLeafDesc`] header
//! (instance leaves carry the same fields inline). Leaves of one list are
//! stored back to back; the `last` bit marks the end of a list.

use bytemuck::{Pod, Zeroable};

use super::bits::BitField;
use crate::util::{Affine3A, Vec3};

/// Geometry flag value stored in the 2-bit `geomFlags` field.
pub const GEOM_FLAG_NONE: u32 = 0;
pub const GEOM_FLAG_OPAQUE: u32 = 1;

/// `type` bit of the leaf header.
pub const TYPE_OPACITY_CULLING_ENABLED: u32 = 0;
pub const TYPE_OPACITY_CULLING_DISABLED: u32 = 1;

/// Field table for [`PrimLeafDesc`].
pub mod prim_leaf_desc {
    use super::BitField;

    /// `shader_word`
    pub const SHADER_INDEX: BitField = BitField::new(0, 24);
    pub const GEOM_MASK: BitField = BitField::new(24, 8);
    /// `geom_word`
    pub const GEOM_INDEX: BitField = BitField::new(0, 29);
    pub const TYPE: BitField = BitField::new(29, 1);
    pub const GEOM_FLAGS: BitField = BitField::new(30, 2);
}

/// Header shared by all primitive leaves (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C, align(8))]
pub struct PrimLeafDesc {
    pub shader_word: u32,
    pub geom_word: u32,
}

impl PrimLeafDesc {
    /// Header for geometry `geom_index`. Values wider than their fields are truncated.
    pub fn new(shader_index: u32, geom_index: u32, geom_mask: u8, geom_flags: u32) -> Self {
        use prim_leaf_desc::*;
        let mut d = Self::default();
        d.shader_word = SHADER_INDEX.set32(d.shader_word, shader_index);
        d.shader_word = GEOM_MASK.set32(d.shader_word, geom_mask as u32);
        d.geom_word = GEOM_INDEX.set32(d.geom_word, geom_index);
        d.geom_word = TYPE.set32(d.geom_word, TYPE_OPACITY_CULLING_ENABLED);
        d.geom_word = GEOM_FLAGS.set32(d.geom_word, geom_flags);
        d
    }

    #[inline]
    pub fn shader_index(&self) -> u32 {
        prim_leaf_desc::SHADER_INDEX.get32(self.shader_word)
    }

    #[inline]
    pub fn geom_mask(&self) -> u8 {
        prim_leaf_desc::GEOM_MASK.get32(self.shader_word) as u8
    }

    #[inline]
    pub fn geom_index(&self) -> u32 {
        prim_leaf_desc::GEOM_INDEX.get32(self.geom_word)
    }

    #[inline]
    pub fn ty(&self) -> u32 {
        prim_leaf_desc::TYPE.get32(self.geom_word)
    }

    #[inline]
    pub fn set_ty(&mut self, ty: u32) {
        self.geom_word = prim_leaf_desc::TYPE.set32(self.geom_word, ty);
    }

    #[inline]
    pub fn geom_flags(&self) -> u32 {
        prim_leaf_desc::GEOM_FLAGS.get32(self.geom_word)
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.geom_flags() & GEOM_FLAG_OPAQUE != 0
    }
}

/// Fields of a quad leaf's second word that are common to both revisions.
pub mod quad_leaf {
    use super::BitField;

    pub const J0: BitField = BitField::new(16, 2);
    pub const J1: BitField = BitField::new(18, 2);
    pub const J2: BitField = BitField::new(20, 2);
    pub const LAST: BitField = BitField::new(22, 1);
    pub const PAD: BitField = BitField::new(23, 9);

    /// Delta field of [`super::QuadLeafV1`].
    pub const PRIM_INDEX1_DELTA_V1: BitField = BitField::new(0, 16);
    /// Delta field of [`super::QuadLeafV2`], followed by 11 unused bits.
    pub const PRIM_INDEX1_DELTA_V2: BitField = BitField::new(0, 5);
    pub const PAD1_V2: BitField = BitField::new(5, 11);
}

/// Two triangles sharing up to four vertices.
///
/// The first triangle is `v[0], v[1], v[2]` with primitive index
/// `prim_index0`. The second uses the vertices `v[j0], v[j1], v[j2]` and the
/// primitive index `prim_index0 + delta`. A single triangle is stored with
/// `j = (0, 1, 2)` and delta 0.
pub trait QuadLeaf: Pod {
    /// Where the second triangle's primitive index delta lives.
    const PRIM_INDEX1_DELTA: BitField;

    fn from_parts(
        desc: PrimLeafDesc,
        prim_index0: u32,
        prim_index1_delta: u32,
        j: [u32; 3],
        last: bool,
        v: [Vec3; 4],
    ) -> Self;

    fn leaf_desc(&self) -> PrimLeafDesc;
    fn prim_index0(&self) -> u32;
    fn word(&self) -> u32;
    fn vertices(&self) -> [Vec3; 4];
    fn set_last(&mut self, last: bool);

    /// True if `delta` can be stored, so the two triangles may share a leaf.
    #[inline]
    fn delta_fits(delta: u32) -> bool {
        Self::PRIM_INDEX1_DELTA.fits(delta as u64)
    }

    #[inline]
    fn prim_index1_delta(&self) -> u32 {
        Self::PRIM_INDEX1_DELTA.get32(self.word())
    }

    #[inline]
    fn prim_index1(&self) -> u32 {
        self.prim_index0() + self.prim_index1_delta()
    }

    #[inline]
    fn j(&self) -> [u32; 3] {
        let w = self.word();
        [quad_leaf::J0.get32(w), quad_leaf::J1.get32(w), quad_leaf::J2.get32(w)]
    }

    #[inline]
    fn last(&self) -> bool {
        quad_leaf::LAST.get32(self.word()) != 0
    }
}

macro_rules! quad_leaf_struct {
    ($name:ident, $delta:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
        #[repr(C, align(64))]
        pub struct $name {
            pub leaf_desc: PrimLeafDesc,
            pub prim_index0: u32,
            /// `primIndex1Delta | j0:2 | j1:2 | j2:2 | last:1 | pad:9`
            pub word: u32,
            pub v: [[f32; 3]; 4],
        }

        impl QuadLeaf for $name {
            const PRIM_INDEX1_DELTA: BitField = $delta;

            fn from_parts(
                desc: PrimLeafDesc,
                prim_index0: u32,
                prim_index1_delta: u32,
                j: [u32; 3],
                last: bool,
                v: [Vec3; 4],
            ) -> Self {
                debug_assert!(Self::delta_fits(prim_index1_delta));
                let mut w = Self::PRIM_INDEX1_DELTA.set32(0, prim_index1_delta);
                w = quad_leaf::J0.set32(w, j[0]);
                w = quad_leaf::J1.set32(w, j[1]);
                w = quad_leaf::J2.set32(w, j[2]);
                w = quad_leaf::LAST.set32(w, last as u32);
                Self {
                    leaf_desc: desc,
                    prim_index0,
                    word: w,
                    v: v.map(|p| p.to_array()),
                }
            }

            #[inline]
            fn leaf_desc(&self) -> PrimLeafDesc {
                self.leaf_desc
            }

            #[inline]
            fn prim_index0(&self) -> u32 {
                self.prim_index0
            }

            #[inline]
            fn word(&self) -> u32 {
                self.word
            }

            #[inline]
            fn vertices(&self) -> [Vec3; 4] {
                self.v.map(Vec3::from_array)
            }

            #[inline]
            fn set_last(&mut self, last: bool) {
                self.word = quad_leaf::LAST.set32(self.word, last as u32);
            }
        }
    };
}

quad_leaf_struct!(
    QuadLeafV1,
    quad_leaf::PRIM_INDEX1_DELTA_V1,
    "Quad leaf, first revision: 16-bit primitive index delta."
);
quad_leaf_struct!(
    QuadLeafV2,
    quad_leaf::PRIM_INDEX1_DELTA_V2,
    "Quad leaf, second revision: 5-bit primitive index delta."
);

/// Field table for [`ProceduralLeaf`].
pub mod procedural_leaf {
    use super::BitField;

    pub const NUM_PRIMITIVES: BitField = BitField::new(0, 4);
    pub const PAD: BitField = BitField::new(4, 32 - 4 - super::ProceduralLeaf::N as u32);
    pub const LAST: BitField = BitField::new(32 - super::ProceduralLeaf::N as u32, 13);
}

/// Up to [`ProceduralLeaf::N`] procedural primitives of one geometry.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct ProceduralLeaf {
    pub leaf_desc: PrimLeafDesc,
    /// `numPrimitives:4 | pad:15 | last:13`, one `last` bit per primitive.
    pub word: u32,
    pub prim_index: [u32; 13],
}

impl ProceduralLeaf {
    pub const N: usize = 13;

    /// Leaf holding `prims`, which must have between 1 and `N` entries.
    ///
    /// With `last` set, the final primitive terminates the leaf list. Every
    /// other primitive gets a clear `last` bit.
    pub fn new(desc: PrimLeafDesc, prims: &[u32], last: bool) -> Self {
        debug_assert!(!prims.is_empty() && prims.len() <= Self::N);
        let n = prims.len().min(Self::N);
        let mut prim_index = [0u32; 13];
        prim_index[..n].copy_from_slice(&prims[..n]);

        let mut last_bits = 0u32;
        if last && n > 0 {
            last_bits |= 1 << (n - 1);
        }
        let mut w = procedural_leaf::NUM_PRIMITIVES.set32(0, n as u32);
        w = procedural_leaf::LAST.set32(w, last_bits);
        Self { leaf_desc: desc, word: w, prim_index }
    }

    #[inline]
    pub fn num_primitives(&self) -> usize {
        procedural_leaf::NUM_PRIMITIVES.get32(self.word) as usize
    }

    /// Bit vector with one `last` bit per stored primitive.
    #[inline]
    pub fn last_mask(&self) -> u32 {
        procedural_leaf::LAST.get32(self.word)
    }

    #[inline]
    pub fn is_last(&self, i: usize) -> bool {
        i < Self::N && self.last_mask() & (1 << i) != 0
    }

    /// Primitive indices of the stored primitives.
    #[inline]
    pub fn prim_indices(&self) -> &[u32] {
        &self.prim_index[..self.num_primitives().min(Self::N)]
    }

    #[inline]
    pub fn leaf_desc(&self) -> PrimLeafDesc {
        self.leaf_desc
    }
}

/// Everything needed to write one instance leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceLeafParams {
    pub shader_index: u32,
    pub geom_mask: u8,
    pub inst_flags: u8,
    /// Byte address of the node traversal continues at inside the instanced structure.
    pub start_node_ptr: u64,
    /// Base address of the instanced structure.
    pub bvh_ptr: u64,
    pub instance_id: u32,
    /// Index of the instance among the scene's geometries.
    pub instance_index: u32,
    pub obj2world: Affine3A,
}

/// Shading-time half shared by both instance leaf revisions.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceLeafPart1 {
    /// `bvhPtr:48 | pad:16`
    pub bvh_word: u64,
    pub instance_id: u32,
    pub instance_index: u32,
    pub obj2world_vx: [f32; 3],
    pub obj2world_vy: [f32; 3],
    pub obj2world_vz: [f32; 3],
    pub world2obj_p: [f32; 3],
}

/// Field table for the 48-bit pointers of instance leaves.
pub mod instance_leaf {
    use super::BitField;

    pub const PTR48: BitField = BitField::new(0, 48);

    /// V1 `part0.flags_word`
    pub const V1_INSTANCE_CONTRIBUTION: BitField = BitField::new(0, 24);
    pub const V1_PAD0: BitField = BitField::new(24, 5);
    pub const V1_TYPE: BitField = BitField::new(29, 1);
    pub const V1_GEOM_FLAGS: BitField = BitField::new(30, 2);
    /// V1 `part0.start_word`
    pub const V1_INST_FLAGS: BitField = BitField::new(48, 8);

    /// V2 `part0.shader_word`
    pub const V2_INSTANCE_CONTRIBUTION: BitField = BitField::new(0, 24);
    pub const V2_GEOM_MASK: BitField = BitField::new(24, 8);
    /// V2 `part0.flags_word`
    pub const V2_INST_FLAGS: BitField = BitField::new(0, 8);
    pub const V2_COMPARISON_MODE: BitField = BitField::new(8, 1);
    pub const V2_COMPARISON_VALUE: BitField = BitField::new(9, 7);
    pub const V2_PAD0: BitField = BitField::new(16, 8);
    pub const V2_SUB_TYPE: BitField = BitField::new(24, 3);
    pub const V2_PAD1: BitField = BitField::new(27, 2);
    pub const V2_DISABLE_OPACITY_CULL: BitField = BitField::new(29, 1);
    pub const V2_OPAQUE_GEOMETRY: BitField = BitField::new(30, 1);
    pub const V2_IGNORE_RAY_MULTIPLIER: BitField = BitField::new(31, 1);
}

impl InstanceLeafPart1 {
    fn new(p: &InstanceLeafParams, world2obj: &Affine3A) -> Self {
        Self {
            bvh_word: instance_leaf::PTR48.set64(0, p.bvh_ptr),
            instance_id: p.instance_id,
            instance_index: p.instance_index,
            obj2world_vx: p.obj2world.matrix3.x_axis.to_array(),
            obj2world_vy: p.obj2world.matrix3.y_axis.to_array(),
            obj2world_vz: p.obj2world.matrix3.z_axis.to_array(),
            world2obj_p: world2obj.translation.to_array(),
        }
    }

    #[inline]
    pub fn bvh_ptr(&self) -> u64 {
        instance_leaf::PTR48.get64(self.bvh_word)
    }
}

/// Traversal-time half of [`InstanceLeafV1`].
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceLeafV1Part0 {
    /// `shaderIndex:24 | geomMask:8`, same layout as [`PrimLeafDesc`]
    pub shader_word: u32,
    /// `instanceContributionToHitGroupIndex:24 | pad0:5 | type:1 | geomFlags:2`
    pub flags_word: u32,
    /// `startNodePtr:48 | instFlags:8 | pad1:8`
    pub start_word: u64,
    pub world2obj_vx: [f32; 3],
    pub world2obj_vy: [f32; 3],
    pub world2obj_vz: [f32; 3],
    pub obj2world_p: [f32; 3],
}

/// Traversal-time half of [`InstanceLeafV2`].
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceLeafV2Part0 {
    /// `instanceContributionToHitGroupIndex:24 | geomMask:8`
    pub shader_word: u32,
    pub flags_word: u32,
    /// Full 64-bit start node address.
    pub start_node_ptr: u64,
    pub world2obj_vx: [f32; 3],
    pub world2obj_vy: [f32; 3],
    pub world2obj_vz: [f32; 3],
    pub obj2world_p: [f32; 3],
}

/// Leaf referencing a separately built structure through a transform.
pub trait InstanceLeaf: Pod {
    fn from_params(p: &InstanceLeafParams) -> Self;
    fn geom_mask(&self) -> u8;
    fn inst_flags(&self) -> u8;
    fn start_node_ptr(&self) -> u64;
    fn part1(&self) -> &InstanceLeafPart1;

    /// Object to world transform, rebuilt from the shading half and the translation.
    fn obj2world(&self) -> Affine3A;
    /// World to object transform, as traversal uses it.
    fn world2obj(&self) -> Affine3A;
}

fn world2obj_of(obj2world: &Affine3A) -> Affine3A {
    obj2world.inverse()
}

fn affine_from_columns(vx: [f32; 3], vy: [f32; 3], vz: [f32; 3], p: [f32; 3]) -> Affine3A {
    Affine3A::from_cols(
        Vec3::from_array(vx).into(),
        Vec3::from_array(vy).into(),
        Vec3::from_array(vz).into(),
        Vec3::from_array(p).into(),
    )
}

/// Instance leaf, first revision (two 64-byte halves).
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct InstanceLeafV1 {
    pub part0: InstanceLeafV1Part0,
    pub part1: InstanceLeafPart1,
}

impl InstanceLeaf for InstanceLeafV1 {
    fn from_params(p: &InstanceLeafParams) -> Self {
        use instance_leaf::*;
        let w2o = world2obj_of(&p.obj2world);
        let shader_word = prim_leaf_desc::SHADER_INDEX.set32(0, p.shader_index);
        let shader_word = prim_leaf_desc::GEOM_MASK.set32(shader_word, p.geom_mask as u32);
        let flags_word = V1_TYPE.set32(0, TYPE_OPACITY_CULLING_ENABLED);
        let start_word = PTR48.set64(0, p.start_node_ptr);
        let start_word = V1_INST_FLAGS.set64(start_word, p.inst_flags as u64);
        Self {
            part0: InstanceLeafV1Part0 {
                shader_word,
                flags_word,
                start_word,
                world2obj_vx: w2o.matrix3.x_axis.to_array(),
                world2obj_vy: w2o.matrix3.y_axis.to_array(),
                world2obj_vz: w2o.matrix3.z_axis.to_array(),
                obj2world_p: p.obj2world.translation.to_array(),
            },
            part1: InstanceLeafPart1::new(p, &w2o),
        }
    }

    #[inline]
    fn geom_mask(&self) -> u8 {
        prim_leaf_desc::GEOM_MASK.get32(self.part0.shader_word) as u8
    }

    #[inline]
    fn inst_flags(&self) -> u8 {
        instance_leaf::V1_INST_FLAGS.get64(self.part0.start_word) as u8
    }

    #[inline]
    fn start_node_ptr(&self) -> u64 {
        instance_leaf::PTR48.get64(self.part0.start_word)
    }

    #[inline]
    fn part1(&self) -> &InstanceLeafPart1 {
        &self.part1
    }

    fn obj2world(&self) -> Affine3A {
        affine_from_columns(
            self.part1.obj2world_vx,
            self.part1.obj2world_vy,
            self.part1.obj2world_vz,
            self.part0.obj2world_p,
        )
    }

    fn world2obj(&self) -> Affine3A {
        affine_from_columns(
            self.part0.world2obj_vx,
            self.part0.world2obj_vy,
            self.part0.world2obj_vz,
            self.part1.world2obj_p,
        )
    }
}

/// Instance leaf, second revision. The shading half is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct InstanceLeafV2 {
    pub part0: InstanceLeafV2Part0,
    pub part1: InstanceLeafPart1,
}

impl InstanceLeafV2 {
    #[inline]
    pub fn comparison_mode(&self) -> u32 {
        instance_leaf::V2_COMPARISON_MODE.get32(self.part0.flags_word)
    }

    #[inline]
    pub fn comparison_value(&self) -> u32 {
        instance_leaf::V2_COMPARISON_VALUE.get32(self.part0.flags_word)
    }

    #[inline]
    pub fn sub_type(&self) -> u32 {
        instance_leaf::V2_SUB_TYPE.get32(self.part0.flags_word)
    }
}

impl InstanceLeaf for InstanceLeafV2 {
    fn from_params(p: &InstanceLeafParams) -> Self {
        use instance_leaf::*;
        let w2o = world2obj_of(&p.obj2world);
        let shader_word = V2_GEOM_MASK.set32(0, p.geom_mask as u32);
        let flags_word = V2_INST_FLAGS.set32(0, p.inst_flags as u32);
        Self {
            part0: InstanceLeafV2Part0 {
                shader_word,
                flags_word,
                start_node_ptr: p.start_node_ptr,
                world2obj_vx: w2o.matrix3.x_axis.to_array(),
                world2obj_vy: w2o.matrix3.y_axis.to_array(),
                world2obj_vz: w2o.matrix3.z_axis.to_array(),
                obj2world_p: p.obj2world.translation.to_array(),
            },
            part1: InstanceLeafPart1::new(p, &w2o),
        }
    }

    #[inline]
    fn geom_mask(&self) -> u8 {
        instance_leaf::V2_GEOM_MASK.get32(self.part0.shader_word) as u8
    }

    #[inline]
    fn inst_flags(&self) -> u8 {
        instance_leaf::V2_INST_FLAGS.get32(self.part0.flags_word) as u8
    }

    #[inline]
    fn start_node_ptr(&self) -> u64 {
        self.part0.start_node_ptr
    }

    #[inline]
    fn part1(&self) -> &InstanceLeafPart1 {
        &self.part1
    }

    fn obj2world(&self) -> Affine3A {
        affine_from_columns(
            self.part1.obj2world_vx,
            self.part1.obj2world_vy,
            self.part1.obj2world_vz,
            self.part0.obj2world_p,
        )
    }

    fn world2obj(&self) -> Affine3A {
        affine_from_columns(
            self.part0.world2obj_vx,
            self.part0.world2obj_vy,
            self.part0.world2obj_vz,
            self.part1.world2obj_p,
        )
    }
}

const _: () = assert!(std::mem::size_of::<PrimLeafDesc>() == 8);
const _: () = assert!(std::mem::size_of::<QuadLeafV1>() == 64);
const _: () = assert!(std::mem::size_of::<QuadLeafV2>() == 64);
const _: () = assert!(std::mem::size_of::<ProceduralLeaf>() == 64);
const _: () = assert!(std::mem::size_of::<InstanceLeafV1Part0>() == 64);
const _: () = assert!(std::mem::size_of::<InstanceLeafV2Part0>() == 64);
const _: () = assert!(std::mem::size_of::<InstanceLeafPart1>() == 64);
const _: () = assert!(std::mem::size_of::<InstanceLeafV1>() == 128);
const _: () = assert!(std::mem::size_of::<InstanceLeafV2>() == 128);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Mat3, Vec3};

    fn quad_vertices() -> [Vec3; 4] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_prim_leaf_desc_bits() {
        let d = PrimLeafDesc::new(0x12_3456, 0x1ABC_DEF0, 0xF0, GEOM_FLAG_OPAQUE);
        assert_eq!(d.shader_index(), 0x12_3456);
        assert_eq!(d.geom_mask(), 0xF0);
        assert_eq!(d.geom_index(), 0x1ABC_DEF0);
        assert_eq!(d.ty(), TYPE_OPACITY_CULLING_ENABLED);
        assert!(d.is_opaque());
        assert_eq!(d.shader_word, 0xF012_3456);
        assert_eq!(d.geom_word, 0x5ABC_DEF0);
    }

    #[test]
    fn test_prim_leaf_desc_truncates() {
        let d = PrimLeafDesc::new(0xFFFF_FFFF, 0xFFFF_FFFF, 0xFF, 0);
        assert_eq!(d.shader_index(), 0xFF_FFFF);
        assert_eq!(d.geom_index(), (1 << 29) - 1);
        assert_eq!(d.geom_flags(), 0);
    }

    #[test]
    fn test_quad_leaf_v1() {
        let desc = PrimLeafDesc::new(2, 2, 0xFF, 0);
        let q = QuadLeafV1::from_parts(desc, 10, 1, [0, 2, 3], true, quad_vertices());
        assert_eq!(q.prim_index0(), 10);
        assert_eq!(q.prim_index1_delta(), 1);
        assert_eq!(q.prim_index1(), 11);
        assert_eq!(q.j(), [0, 2, 3]);
        assert!(q.last());
        assert_eq!(q.word, 1 | (2 << 18) | (3 << 20) | (1 << 22));
        assert_eq!(q.vertices(), quad_vertices());

        let bytes = bytemuck::bytes_of(&q);
        assert_eq!(&bytes[8..12], &10u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0.0f32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_quad_leaf_delta_widths() {
        assert!(QuadLeafV1::delta_fits(0xFFFF));
        assert!(!QuadLeafV1::delta_fits(0x1_0000));
        assert!(QuadLeafV2::delta_fits(31));
        assert!(!QuadLeafV2::delta_fits(32));

        let mut q = QuadLeafV2::from_parts(PrimLeafDesc::default(), 7, 31, [1, 2, 3], false, quad_vertices());
        assert_eq!(q.prim_index1(), 38);
        assert_eq!(q.j(), [1, 2, 3]);
        assert!(!q.last());
        q.set_last(true);
        assert!(q.last());
        assert_eq!(quad_leaf::PAD1_V2.get32(q.word), 0);
    }

    #[test]
    fn test_procedural_leaf() {
        let desc = PrimLeafDesc::new(0, 4, 0xFF, 0);
        let leaf = ProceduralLeaf::new(desc, &[3, 4, 5], true);
        assert_eq!(leaf.num_primitives(), 3);
        assert_eq!(leaf.prim_indices(), &[3, 4, 5]);
        assert!(!leaf.is_last(0));
        assert!(!leaf.is_last(1));
        assert!(leaf.is_last(2));
        assert_eq!(leaf.word, 3 | (0b100 << 19));

        let full: Vec<u32> = (0..13).collect();
        let leaf = ProceduralLeaf::new(desc, &full, false);
        assert_eq!(leaf.num_primitives(), 13);
        assert_eq!(leaf.last_mask(), 0);
        assert_eq!(leaf.prim_index[12], 12);
    }

    fn params(obj2world: Affine3A) -> InstanceLeafParams {
        InstanceLeafParams {
            shader_index: 0,
            geom_mask: 0x0F,
            inst_flags: 0x5,
            start_node_ptr: 0x1_0080,
            bvh_ptr: 0x1_0000,
            instance_id: 77,
            instance_index: 3,
            obj2world,
        }
    }

    #[test]
    fn test_instance_leaf_v1() {
        let xfm = Affine3A::from_mat3_translation(
            Mat3::from_diagonal(Vec3::new(2.0, 2.0, 2.0)),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let leaf = InstanceLeafV1::from_params(&params(xfm));
        assert_eq!(leaf.geom_mask(), 0x0F);
        assert_eq!(leaf.inst_flags(), 0x5);
        assert_eq!(leaf.start_node_ptr(), 0x1_0080);
        assert_eq!(leaf.part1().bvh_ptr(), 0x1_0000);
        assert_eq!(leaf.part1().instance_id, 77);
        assert_eq!(leaf.part1().instance_index, 3);

        assert_eq!(leaf.part0.obj2world_p, [1.0, 2.0, 3.0]);
        assert_eq!(leaf.part0.world2obj_vx, [0.5, 0.0, 0.0]);
        assert_eq!(leaf.part1.world2obj_p, [-0.5, -1.0, -1.5]);

        let p = Vec3::new(4.0, -1.0, 0.5);
        let back = leaf.world2obj().transform_point3(leaf.obj2world().transform_point3(p));
        assert!((back - p).abs().max_element() < 1e-5);

        // hardware reads the first 64 bytes only
        let bytes = bytemuck::bytes_of(&leaf);
        assert_eq!(&bytes[52..64], bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_instance_leaf_v2() {
        let leaf = InstanceLeafV2::from_params(&params(Affine3A::IDENTITY));
        assert_eq!(leaf.geom_mask(), 0x0F);
        assert_eq!(leaf.inst_flags(), 0x5);
        assert_eq!(leaf.start_node_ptr(), 0x1_0080);
        assert_eq!(leaf.comparison_mode(), 0);
        assert_eq!(leaf.comparison_value(), 0);
        assert_eq!(leaf.sub_type(), 0);
        assert_eq!(leaf.part0.shader_word, 0x0F00_0000);
        assert_eq!(leaf.world2obj(), Affine3A::IDENTITY);
    }
}
