//! In-memory ray records read by the traversal unit.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::bits::BitField;
use crate::util::Vec3;

bitflags! {
    /// Per-ray traversal flags (16 bits in both ray revisions).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RayFlags: u16 {
        const FORCE_OPAQUE = 1 << 0;
        const FORCE_NON_OPAQUE = 1 << 1;
        const ACCEPT_FIRST_HIT_AND_END_SEARCH = 1 << 2;
        const SKIP_CLOSEST_HIT_SHADER = 1 << 3;
        const CULL_BACK_FACING_TRIANGLES = 1 << 4;
        const CULL_FRONT_FACING_TRIANGLES = 1 << 5;
        const CULL_OPAQUE = 1 << 6;
        const CULL_NON_OPAQUE = 1 << 7;
        const SKIP_TRIANGLES = 1 << 8;
        const SKIP_PROCEDURAL_PRIMITIVES = 1 << 9;
    }
}

/// Ray as the caller describes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayDesc {
    pub origin: Vec3,
    pub direction: Vec3,
    pub tmin: f32,
    pub tmax: f32,
    pub mask: u8,
    pub flags: RayFlags,
}

impl Default for RayDesc {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::Z,
            tmin: 0.0,
            tmax: f32::INFINITY,
            mask: 0xFF,
            flags: RayFlags::empty(),
        }
    }
}

/// Field table for [`MemRayV1`].
pub mod ray_v1 {
    use super::BitField;

    /// `root_word`
    pub const ROOT_NODE_PTR: BitField = BitField::new(0, 48);
    pub const RAY_FLAGS: BitField = BitField::new(48, 16);
    /// `hit_group_word`
    pub const HIT_GROUP_SR_BASE_PTR: BitField = BitField::new(0, 48);
    pub const HIT_GROUP_SR_STRIDE: BitField = BitField::new(48, 16);
    /// `miss_word`
    pub const MISS_SR_PTR: BitField = BitField::new(0, 48);
    pub const PAD0: BitField = BitField::new(48, 8);
    pub const SHADER_INDEX_MULTIPLIER: BitField = BitField::new(56, 8);
    /// `inst_word`
    pub const INST_LEAF_PTR: BitField = BitField::new(0, 48);
    pub const RAY_MASK: BitField = BitField::new(48, 8);
    pub const PAD1: BitField = BitField::new(56, 8);
}

/// Ray record, first hardware revision (64 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct MemRayV1 {
    pub org: [f32; 3],
    pub dir: [f32; 3],
    pub tnear: f32,
    pub tfar: f32,
    pub root_word: u64,
    pub hit_group_word: u64,
    pub miss_word: u64,
    pub inst_word: u64,
}

impl MemRayV1 {
    /// Ray starting traversal at `root_node_ptr`, with all shader records zeroed.
    pub fn new(ray: &RayDesc, root_node_ptr: u64) -> Self {
        let mut r = Self::zeroed();
        r.org = ray.origin.to_array();
        r.dir = ray.direction.to_array();
        r.tnear = ray.tmin;
        r.tfar = ray.tmax;
        r.set_root_node_ptr(root_node_ptr);
        r.set_ray_flags(ray.flags);
        r.set_ray_mask(ray.mask);
        r
    }

    #[inline]
    pub fn root_node_ptr(&self) -> u64 {
        ray_v1::ROOT_NODE_PTR.get64(self.root_word)
    }

    #[inline]
    pub fn set_root_node_ptr(&mut self, ptr: u64) {
        self.root_word = ray_v1::ROOT_NODE_PTR.set64(self.root_word, ptr);
    }

    #[inline]
    pub fn ray_flags(&self) -> RayFlags {
        RayFlags::from_bits_retain(ray_v1::RAY_FLAGS.get64(self.root_word) as u16)
    }

    #[inline]
    pub fn set_ray_flags(&mut self, flags: RayFlags) {
        self.root_word = ray_v1::RAY_FLAGS.set64(self.root_word, flags.bits() as u64);
    }

    #[inline]
    pub fn hit_group_sr_base_ptr(&self) -> u64 {
        ray_v1::HIT_GROUP_SR_BASE_PTR.get64(self.hit_group_word)
    }

    #[inline]
    pub fn set_hit_group_sr_base_ptr(&mut self, ptr: u64) {
        self.hit_group_word = ray_v1::HIT_GROUP_SR_BASE_PTR.set64(self.hit_group_word, ptr);
    }

    #[inline]
    pub fn hit_group_sr_stride(&self) -> u16 {
        ray_v1::HIT_GROUP_SR_STRIDE.get64(self.hit_group_word) as u16
    }

    #[inline]
    pub fn set_hit_group_sr_stride(&mut self, stride: u16) {
        self.hit_group_word = ray_v1::HIT_GROUP_SR_STRIDE.set64(self.hit_group_word, stride as u64);
    }

    #[inline]
    pub fn miss_sr_ptr(&self) -> u64 {
        ray_v1::MISS_SR_PTR.get64(self.miss_word)
    }

    #[inline]
    pub fn set_miss_sr_ptr(&mut self, ptr: u64) {
        self.miss_word = ray_v1::MISS_SR_PTR.set64(self.miss_word, ptr);
    }

    #[inline]
    pub fn shader_index_multiplier(&self) -> u8 {
        ray_v1::SHADER_INDEX_MULTIPLIER.get64(self.miss_word) as u8
    }

    #[inline]
    pub fn set_shader_index_multiplier(&mut self, m: u8) {
        self.miss_word = ray_v1::SHADER_INDEX_MULTIPLIER.set64(self.miss_word, m as u64);
    }

    /// Byte address of the instance leaf being traversed, 0 outside instances.
    #[inline]
    pub fn inst_leaf_ptr(&self) -> u64 {
        ray_v1::INST_LEAF_PTR.get64(self.inst_word)
    }

    #[inline]
    pub fn set_inst_leaf_ptr(&mut self, ptr: u64) {
        self.inst_word = ray_v1::INST_LEAF_PTR.set64(self.inst_word, ptr);
    }

    #[inline]
    pub fn ray_mask(&self) -> u8 {
        ray_v1::RAY_MASK.get64(self.inst_word) as u8
    }

    #[inline]
    pub fn set_ray_mask(&mut self, mask: u8) {
        self.inst_word = ray_v1::RAY_MASK.set64(self.inst_word, mask as u64);
    }
}

/// Field table for [`MemRayV2`].
pub mod ray_v2 {
    use super::BitField;

    /// `flags_word`
    pub const RAY_FLAGS: BitField = BitField::new(0, 16);
    pub const RAY_MASK: BitField = BitField::new(16, 8);
    pub const COMPARISON_VALUE: BitField = BitField::new(24, 7);
    pub const PAD1: BitField = BitField::new(31, 1);
    /// `miss_word`
    pub const MISS_SHADER_INDEX: BitField = BitField::new(0, 16);
    pub const SHADER_INDEX_MULTIPLIER: BitField = BitField::new(16, 4);
    pub const PAD2: BitField = BitField::new(20, 4);
    pub const INTERNAL_RAY_FLAGS: BitField = BitField::new(24, 8);
}

/// Ray record, second hardware revision (64 bytes). Pointers are full 64 bit.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct MemRayV2 {
    pub org: [f32; 3],
    pub dir: [f32; 3],
    pub tnear: f32,
    pub tfar: f32,
    pub root_node_ptr: u64,
    pub inst_leaf_ptr: u64,
    pub flags_word: u32,
    pub hit_group_index: u32,
    pub miss_word: u32,
    /// Ray time in `[0, 1]` for motion blur.
    pub time: f32,
}

impl MemRayV2 {
    pub fn new(ray: &RayDesc, root_node_ptr: u64) -> Self {
        let mut r = Self::zeroed();
        r.org = ray.origin.to_array();
        r.dir = ray.direction.to_array();
        r.tnear = ray.tmin;
        r.tfar = ray.tmax;
        r.root_node_ptr = root_node_ptr;
        r.set_ray_flags(ray.flags);
        r.set_ray_mask(ray.mask);
        r
    }

    #[inline]
    pub fn ray_flags(&self) -> RayFlags {
        RayFlags::from_bits_retain(ray_v2::RAY_FLAGS.get32(self.flags_word) as u16)
    }

    #[inline]
    pub fn set_ray_flags(&mut self, flags: RayFlags) {
        self.flags_word = ray_v2::RAY_FLAGS.set32(self.flags_word, flags.bits() as u32);
    }

    #[inline]
    pub fn ray_mask(&self) -> u8 {
        ray_v2::RAY_MASK.get32(self.flags_word) as u8
    }

    #[inline]
    pub fn set_ray_mask(&mut self, mask: u8) {
        self.flags_word = ray_v2::RAY_MASK.set32(self.flags_word, mask as u32);
    }

    /// Value compared against an instance's comparison mask (7 bits).
    #[inline]
    pub fn comparison_value(&self) -> u8 {
        ray_v2::COMPARISON_VALUE.get32(self.flags_word) as u8
    }

    #[inline]
    pub fn set_comparison_value(&mut self, v: u8) {
        self.flags_word = ray_v2::COMPARISON_VALUE.set32(self.flags_word, v as u32);
    }

    #[inline]
    pub fn miss_shader_index(&self) -> u16 {
        ray_v2::MISS_SHADER_INDEX.get32(self.miss_word) as u16
    }

    #[inline]
    pub fn set_miss_shader_index(&mut self, index: u16) {
        self.miss_word = ray_v2::MISS_SHADER_INDEX.set32(self.miss_word, index as u32);
    }

    #[inline]
    pub fn shader_index_multiplier(&self) -> u8 {
        ray_v2::SHADER_INDEX_MULTIPLIER.get32(self.miss_word) as u8
    }

    #[inline]
    pub fn set_shader_index_multiplier(&mut self, m: u8) {
        self.miss_word = ray_v2::SHADER_INDEX_MULTIPLIER.set32(self.miss_word, m as u32);
    }

    #[inline]
    pub fn internal_ray_flags(&self) -> u8 {
        ray_v2::INTERNAL_RAY_FLAGS.get32(self.miss_word) as u8
    }

    #[inline]
    pub fn set_internal_ray_flags(&mut self, flags: u8) {
        self.miss_word = ray_v2::INTERNAL_RAY_FLAGS.set32(self.miss_word, flags as u32);
    }
}

const _: () = assert!(std::mem::size_of::<MemRayV1>() == 64);
const _: () = assert!(std::mem::size_of::<MemRayV2>() == 64);

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> RayDesc {
        RayDesc {
            origin: Vec3::new(278.0, 273.0, -800.0),
            direction: Vec3::new(0.0, 0.0, 1.0),
            tmin: 0.0,
            tmax: 1e4,
            mask: 0xA5,
            flags: RayFlags::FORCE_OPAQUE | RayFlags::SKIP_PROCEDURAL_PRIMITIVES,
        }
    }

    #[test]
    fn test_ray_v1_packing() {
        let r = MemRayV1::new(&desc(), 0x0000_1234_5678_9AC0);
        assert_eq!(r.root_node_ptr(), 0x1234_5678_9AC0);
        assert_eq!(r.ray_flags(), desc().flags);
        assert_eq!(r.ray_mask(), 0xA5);
        assert_eq!(r.root_word >> 48, desc().flags.bits() as u64);
        assert_eq!(r.inst_word, 0xA5u64 << 48);
        assert_eq!(r.miss_word, 0);
        assert_eq!(r.hit_group_word, 0);

        let bytes = bytemuck::bytes_of(&r);
        assert_eq!(&bytes[0..4], &278.0f32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1e4f32.to_le_bytes());
    }

    #[test]
    fn test_ray_v1_setters_do_not_clobber() {
        let mut r = MemRayV1::new(&desc(), 0x40);
        r.set_hit_group_sr_base_ptr(0xFFFF_FFFF_FFFF);
        r.set_hit_group_sr_stride(0x20);
        r.set_miss_sr_ptr(0x80);
        r.set_shader_index_multiplier(3);
        r.set_inst_leaf_ptr(0x1000);
        assert_eq!(r.hit_group_sr_base_ptr(), 0xFFFF_FFFF_FFFF);
        assert_eq!(r.hit_group_sr_stride(), 0x20);
        assert_eq!(r.miss_sr_ptr(), 0x80);
        assert_eq!(r.shader_index_multiplier(), 3);
        assert_eq!(r.inst_leaf_ptr(), 0x1000);
        assert_eq!(r.ray_mask(), 0xA5);
        assert_eq!(r.root_node_ptr(), 0x40);
    }

    #[test]
    fn test_ray_v2_packing() {
        let mut r = MemRayV2::new(&desc(), 0xFFFF_0000_0000_0040);
        assert_eq!(r.root_node_ptr, 0xFFFF_0000_0000_0040);
        assert_eq!(r.ray_flags(), desc().flags);
        assert_eq!(r.ray_mask(), 0xA5);
        assert_eq!(r.comparison_value(), 0);
        assert_eq!(r.time, 0.0);

        r.set_comparison_value(0x7F);
        r.set_miss_shader_index(0xBEEF);
        r.set_shader_index_multiplier(0xF);
        r.set_internal_ray_flags(0x81);
        assert_eq!(r.flags_word >> 24, 0x7F);
        assert_eq!(r.ray_mask(), 0xA5);
        assert_eq!(r.miss_shader_index(), 0xBEEF);
        assert_eq!(r.shader_index_multiplier(), 0xF);
        assert_eq!(r.internal_ray_flags(), 0x81);
        assert_eq!(r.miss_word, 0x810F_BEEF);
    }
}
