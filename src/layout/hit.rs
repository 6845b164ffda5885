//! Hit records written by the traversal unit and the per-ray stack holding them.
//!
//! Each ray stack carries two hit slots: the committed hit, which is the
//! closest accepted hit so far, and the potential hit handed to any-hit
//! shaders. Leaf pointers are stored as signed counts of 64-byte blocks; the
//! accessors here convert to and from byte addresses.

use bytemuck::{Pod, Zeroable};

use super::bits::{from_blocks64, to_blocks64, BitField};
use super::ray::{MemRayV1, MemRayV2};

/// Scale of the 24-bit unsigned normalized barycentrics.
pub const UNORM24_MAX: u32 = 0xFF_FFFF;

/// Quantize `x` to unorm24: clamp to `[0, 1]`, scale, round to nearest.
#[inline]
pub fn quantize_unorm24(x: f32) -> u32 {
    (x.clamp(0.0, 1.0) * UNORM24_MAX as f32).round() as u32
}

#[inline]
pub fn dequantize_unorm24(i: u32) -> f32 {
    i as f32 * (1.0 / UNORM24_MAX as f32)
}

/// Which of the two hit slots of a ray stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HitSlot {
    Committed = 0,
    Potential = 1,
}

/// Field table for [`MemHitV1`].
pub mod hit_v1 {
    use super::BitField;

    /// `data`
    pub const PRIM_INDEX_DELTA: BitField = BitField::new(0, 16);
    pub const VALID: BitField = BitField::new(16, 1);
    pub const LEAF_TYPE: BitField = BitField::new(17, 3);
    pub const PRIM_LEAF_INDEX: BitField = BitField::new(20, 4);
    pub const BVH_LEVEL: BitField = BitField::new(24, 3);
    pub const FRONT_FACE: BitField = BitField::new(27, 1);
    pub const DONE: BitField = BitField::new(28, 1);
    pub const PAD0: BitField = BitField::new(29, 3);
    /// `prim_leaf_word`, `inst_leaf_word`
    pub const LEAF_PTR: BitField = BitField::new(0, 42);
    pub const HIT_GROUP_REC_PTR: BitField = BitField::new(42, 22);
}

/// Hit record, first hardware revision (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct MemHitV1 {
    /// Hit distance, or the initial traversal distance.
    pub ft: f32,
    pub fu: f32,
    pub fv: f32,
    pub data: u32,
    /// Leaf pointer in 64 B blocks, low bits of the hit group record (16 B units) above.
    pub prim_leaf_word: u64,
    /// Instance leaf pointer in 64 B blocks, high bits of the hit group record above.
    pub inst_leaf_word: u64,
}

impl MemHitV1 {
    #[inline]
    pub fn t(&self) -> f32 {
        self.ft
    }

    #[inline]
    pub fn set_t(&mut self, t: f32) {
        self.ft = t;
    }

    #[inline]
    pub fn u(&self) -> f32 {
        self.fu
    }

    #[inline]
    pub fn set_u(&mut self, u: f32) {
        self.fu = u;
    }

    #[inline]
    pub fn v(&self) -> f32 {
        self.fv
    }

    #[inline]
    pub fn set_v(&mut self, v: f32) {
        self.fv = v;
    }

    #[inline]
    pub fn valid(&self) -> bool {
        hit_v1::VALID.get32(self.data) != 0
    }

    #[inline]
    pub fn done(&self) -> bool {
        hit_v1::DONE.get32(self.data) != 0
    }

    #[inline]
    pub fn front_face(&self) -> bool {
        hit_v1::FRONT_FACE.get32(self.data) != 0
    }

    #[inline]
    pub fn set_front_face(&mut self, front: bool) {
        self.data = hit_v1::FRONT_FACE.set32(self.data, front as u32);
    }

    #[inline]
    pub fn prim_index_delta(&self) -> u32 {
        hit_v1::PRIM_INDEX_DELTA.get32(self.data)
    }

    #[inline]
    pub fn set_prim_index_delta(&mut self, delta: u32) {
        self.data = hit_v1::PRIM_INDEX_DELTA.set32(self.data, delta);
    }

    /// Node type of the leaf `prim_leaf_ptr` points at.
    #[inline]
    pub fn leaf_type(&self) -> u32 {
        hit_v1::LEAF_TYPE.get32(self.data)
    }

    #[inline]
    pub fn set_leaf_type(&mut self, ty: u32) {
        self.data = hit_v1::LEAF_TYPE.set32(self.data, ty);
    }

    #[inline]
    pub fn prim_leaf_index(&self) -> u32 {
        hit_v1::PRIM_LEAF_INDEX.get32(self.data)
    }

    #[inline]
    pub fn set_prim_leaf_index(&mut self, index: u32) {
        self.data = hit_v1::PRIM_LEAF_INDEX.set32(self.data, index);
    }

    /// Instancing level the hit occurred at.
    #[inline]
    pub fn bvh_level(&self) -> u32 {
        hit_v1::BVH_LEVEL.get32(self.data)
    }

    #[inline]
    pub fn set_bvh_level(&mut self, level: u32) {
        self.data = hit_v1::BVH_LEVEL.set32(self.data, level);
    }

    /// Byte address of the primitive leaf.
    #[inline]
    pub fn prim_leaf_ptr(&self) -> u64 {
        from_blocks64(hit_v1::LEAF_PTR.get64_signed(self.prim_leaf_word) as u64)
    }

    /// Store a 64-byte aligned leaf address.
    #[inline]
    pub fn set_prim_leaf_ptr(&mut self, addr: u64) {
        debug_assert_eq!(addr % 64, 0);
        self.prim_leaf_word = hit_v1::LEAF_PTR.set64(self.prim_leaf_word, to_blocks64(addr));
    }

    #[inline]
    pub fn instance_leaf_ptr(&self) -> u64 {
        from_blocks64(hit_v1::LEAF_PTR.get64_signed(self.inst_leaf_word) as u64)
    }

    #[inline]
    pub fn set_instance_leaf_ptr(&mut self, addr: u64) {
        debug_assert_eq!(addr % 64, 0);
        self.inst_leaf_word = hit_v1::LEAF_PTR.set64(self.inst_leaf_word, to_blocks64(addr));
    }

    /// Hit group record address, reassembled from both pointer words.
    pub fn hit_group_rec_ptr(&self) -> u64 {
        let lo = hit_v1::HIT_GROUP_REC_PTR.get64(self.prim_leaf_word);
        let hi = hit_v1::HIT_GROUP_REC_PTR.get64(self.inst_leaf_word);
        (lo | (hi << 22)) * 16
    }

    pub fn set_hit_group_rec_ptr(&mut self, addr: u64) {
        let units = addr / 16;
        let f = hit_v1::HIT_GROUP_REC_PTR;
        self.prim_leaf_word = f.set64(self.prim_leaf_word, units);
        self.inst_leaf_word = f.set64(self.inst_leaf_word, units >> 22);
    }

    /// Reset to "no hit yet". Leaf pointers are left untouched.
    pub fn clear(&mut self, done: bool, valid: bool) {
        self.ft = 0.0;
        self.fu = 0.0;
        self.fv = 0.0;
        self.data = 0;
        self.data = hit_v1::DONE.set32(self.data, done as u32);
        self.data = hit_v1::VALID.set32(self.data, valid as u32);
    }
}

/// Field table for [`MemHitV2`].
pub mod hit_v2 {
    use super::BitField;

    /// `u_word`, `v_word`
    pub const BARY: BitField = BitField::new(0, 24);
    pub const HIT_GROUP_INDEX_BYTE: BitField = BitField::new(24, 8);
    /// `data`
    pub const PRIM_INDEX_DELTA: BitField = BitField::new(0, 5);
    pub const PAD1: BitField = BitField::new(5, 7);
    pub const LEAF_NODE_SUB_TYPE: BitField = BitField::new(12, 4);
    pub const VALID: BitField = BitField::new(16, 1);
    pub const LEAF_TYPE: BitField = BitField::new(17, 3);
    pub const PRIM_LEAF_INDEX: BitField = BitField::new(20, 4);
    pub const BVH_LEVEL: BitField = BitField::new(24, 3);
    pub const FRONT_FACE: BitField = BitField::new(27, 1);
    pub const DONE: BitField = BitField::new(28, 1);
    pub const NEED_SW_STOC: BitField = BitField::new(29, 1);
    pub const PAD0: BitField = BitField::new(30, 2);
    /// `prim_leaf_word`, `inst_leaf_word`
    pub const HIT_GROUP_INDEX_LOW: BitField = BitField::new(0, 6);
    pub const LEAF_PTR: BitField = BitField::new(6, 58);
}

/// Hit record, second hardware revision (32 bytes). Barycentrics are unorm24.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct MemHitV2 {
    pub ft: f32,
    /// `iu:24 | hitGroupIndex0:8`
    pub u_word: u32,
    /// `iv:24 | hitGroupIndex1:8`
    pub v_word: u32,
    pub data: u32,
    /// `hitGroupIndex2:6 | primLeafPtr:58`
    pub prim_leaf_word: u64,
    /// `hitGroupIndex3:6 | instLeafPtr:58`
    pub inst_leaf_word: u64,
}

impl MemHitV2 {
    #[inline]
    pub fn t(&self) -> f32 {
        self.ft
    }

    #[inline]
    pub fn set_t(&mut self, t: f32) {
        self.ft = t;
    }

    #[inline]
    pub fn iu(&self) -> u32 {
        hit_v2::BARY.get32(self.u_word)
    }

    #[inline]
    pub fn iv(&self) -> u32 {
        hit_v2::BARY.get32(self.v_word)
    }

    #[inline]
    pub fn u(&self) -> f32 {
        dequantize_unorm24(self.iu())
    }

    /// Values outside `[0, 1]` are clamped before quantization.
    #[inline]
    pub fn set_u(&mut self, u: f32) {
        self.u_word = hit_v2::BARY.set32(self.u_word, quantize_unorm24(u));
    }

    #[inline]
    pub fn v(&self) -> f32 {
        dequantize_unorm24(self.iv())
    }

    #[inline]
    pub fn set_v(&mut self, v: f32) {
        self.v_word = hit_v2::BARY.set32(self.v_word, quantize_unorm24(v));
    }

    #[inline]
    pub fn valid(&self) -> bool {
        hit_v2::VALID.get32(self.data) != 0
    }

    #[inline]
    pub fn done(&self) -> bool {
        hit_v2::DONE.get32(self.data) != 0
    }

    #[inline]
    pub fn front_face(&self) -> bool {
        hit_v2::FRONT_FACE.get32(self.data) != 0
    }

    #[inline]
    pub fn set_front_face(&mut self, front: bool) {
        self.data = hit_v2::FRONT_FACE.set32(self.data, front as u32);
    }

    #[inline]
    pub fn prim_index_delta(&self) -> u32 {
        hit_v2::PRIM_INDEX_DELTA.get32(self.data)
    }

    #[inline]
    pub fn set_prim_index_delta(&mut self, delta: u32) {
        self.data = hit_v2::PRIM_INDEX_DELTA.set32(self.data, delta);
    }

    #[inline]
    pub fn leaf_type(&self) -> u32 {
        hit_v2::LEAF_TYPE.get32(self.data)
    }

    #[inline]
    pub fn set_leaf_type(&mut self, ty: u32) {
        self.data = hit_v2::LEAF_TYPE.set32(self.data, ty);
    }

    #[inline]
    pub fn leaf_node_sub_type(&self) -> u32 {
        hit_v2::LEAF_NODE_SUB_TYPE.get32(self.data)
    }

    #[inline]
    pub fn set_leaf_node_sub_type(&mut self, sub: u32) {
        self.data = hit_v2::LEAF_NODE_SUB_TYPE.set32(self.data, sub);
    }

    #[inline]
    pub fn prim_leaf_index(&self) -> u32 {
        hit_v2::PRIM_LEAF_INDEX.get32(self.data)
    }

    #[inline]
    pub fn set_prim_leaf_index(&mut self, index: u32) {
        self.data = hit_v2::PRIM_LEAF_INDEX.set32(self.data, index);
    }

    #[inline]
    pub fn bvh_level(&self) -> u32 {
        hit_v2::BVH_LEVEL.get32(self.data)
    }

    #[inline]
    pub fn set_bvh_level(&mut self, level: u32) {
        self.data = hit_v2::BVH_LEVEL.set32(self.data, level);
    }

    /// Any-hit shader has to run the comparison test in software.
    #[inline]
    pub fn need_sw_stoc(&self) -> bool {
        hit_v2::NEED_SW_STOC.get32(self.data) != 0
    }

    #[inline]
    pub fn prim_leaf_ptr(&self) -> u64 {
        from_blocks64(hit_v2::LEAF_PTR.get64_signed(self.prim_leaf_word) as u64)
    }

    #[inline]
    pub fn set_prim_leaf_ptr(&mut self, addr: u64) {
        debug_assert_eq!(addr % 64, 0);
        self.prim_leaf_word = hit_v2::LEAF_PTR.set64(self.prim_leaf_word, to_blocks64(addr));
    }

    #[inline]
    pub fn instance_leaf_ptr(&self) -> u64 {
        from_blocks64(hit_v2::LEAF_PTR.get64_signed(self.inst_leaf_word) as u64)
    }

    #[inline]
    pub fn set_instance_leaf_ptr(&mut self, addr: u64) {
        debug_assert_eq!(addr % 64, 0);
        self.inst_leaf_word = hit_v2::LEAF_PTR.set64(self.inst_leaf_word, to_blocks64(addr));
    }

    /// Hit group index, spread over four fields: 8 + 8 + 6 + 6 bits.
    pub fn hit_group_index(&self) -> u32 {
        let b = hit_v2::HIT_GROUP_INDEX_BYTE;
        let l = hit_v2::HIT_GROUP_INDEX_LOW;
        b.get32(self.u_word)
            | (b.get32(self.v_word) << 8)
            | ((l.get64(self.prim_leaf_word) as u32) << 16)
            | ((l.get64(self.inst_leaf_word) as u32) << 22)
    }

    pub fn set_hit_group_index(&mut self, index: u32) {
        let b = hit_v2::HIT_GROUP_INDEX_BYTE;
        let l = hit_v2::HIT_GROUP_INDEX_LOW;
        self.u_word = b.set32(self.u_word, index);
        self.v_word = b.set32(self.v_word, index >> 8);
        self.prim_leaf_word = l.set64(self.prim_leaf_word, (index >> 16) as u64);
        self.inst_leaf_word = l.set64(self.inst_leaf_word, (index >> 22) as u64);
    }

    /// Reset to "no hit yet". Zeroes the two low hit group index bytes; the
    /// pointer words are left untouched.
    pub fn clear(&mut self, done: bool, valid: bool) {
        self.ft = 0.0;
        self.u_word = 0;
        self.v_word = 0;
        self.data = 0;
        self.data = hit_v2::DONE.set32(self.data, done as u32);
        self.data = hit_v2::VALID.set32(self.data, valid as u32);
    }
}

/// Per-ray traversal stack, first revision: two hits, two rays, 64 B of node stack.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct RtStackV1 {
    pub hit: [MemHitV1; 2],
    pub ray: [MemRayV1; 2],
    pub trav_stack: [u8; 64],
}

impl RtStackV1 {
    #[inline]
    pub fn hit(&self, slot: HitSlot) -> &MemHitV1 {
        &self.hit[slot as usize]
    }

    #[inline]
    pub fn hit_mut(&mut self, slot: HitSlot) -> &mut MemHitV1 {
        &mut self.hit[slot as usize]
    }
}

/// Per-ray traversal stack, second revision.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct RtStackV2 {
    pub hit: [MemHitV2; 2],
    pub ray: [MemRayV2; 2],
    pub trav_stack: [u8; 64],
}

impl RtStackV2 {
    #[inline]
    pub fn hit(&self, slot: HitSlot) -> &MemHitV2 {
        &self.hit[slot as usize]
    }

    #[inline]
    pub fn hit_mut(&mut self, slot: HitSlot) -> &mut MemHitV2 {
        &mut self.hit[slot as usize]
    }
}

const _: () = assert!(std::mem::size_of::<MemHitV1>() == 32);
const _: () = assert!(std::mem::size_of::<MemHitV2>() == 32);
const _: () = assert!(std::mem::size_of::<RtStackV1>() == 256);
const _: () = assert!(std::mem::size_of::<RtStackV2>() == 256);
