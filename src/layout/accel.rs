//! Top-level handle of a built acceleration structure.

use bytemuck::{Pod, Zeroable};

use crate::util::{BBox3f, Vec3};

/// Node type codes as traversal hardware reads them (3 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    /// Internal node with up to six children. Mixed internal nodes share the code.
    Internal = 0,
    Instance = 1,
    Procedural = 3,
    Quad = 4,
    Invalid = 7,
}

impl NodeType {
    /// Mixed node: children of different kinds.
    ///
    /// Shares code 0 with [`NodeType::Internal`], as in hardware. In the root
    /// description of [`HwAccel`] it tags a flat leaf list whose leaves differ
    /// in kind; that description never points at an internal node.
    pub const MIXED: NodeType = NodeType::Internal;

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Internal),
            1 => Some(Self::Instance),
            3 => Some(Self::Procedural),
            4 => Some(Self::Quad),
            7 => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// Size of [`HwAccel`] and offset of the first node behind it.
pub const HW_ACCEL_SIZE: usize = 128;

/// Header at offset 0 of every acceleration structure buffer (128 bytes).
///
/// Hardware only reads the bounds and the time segment count. The in-process
/// builder keeps its root description in the reserved words:
/// `reserved` holds the byte offset of the root leaf list with the root
/// [`NodeType`] in its low 3 bits, and `reserved0[0]` holds the leaf count.
///
/// The root is always a leaf list, so the type names the kind of its leaves:
/// `Quad`, `Procedural` or `Instance` for a uniform list, [`NodeType::MIXED`]
/// when kinds differ, `Invalid` when empty. Leaves of a mixed list appear in
/// geometry id order, so readers walk it alongside the build's geometries,
/// each geometry's type giving the kind and size of its leaves. An all-zero
/// header has no leaves; check [`HwAccel::leaf_count`] before walking.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct HwAccel {
    pub reserved: u64,
    /// World space bounds, `[lower, upper]`.
    pub bounds: [[f32; 3]; 2],
    pub reserved0: [u32; 8],
    /// Number of motion blur time segments, 0 for static geometry.
    pub num_time_segments: u32,
    pub reserved1: [u32; 13],
    /// Debug only: dispatch globals of the in-process builder.
    pub dispatch_globals_ptr: u64,
}

impl HwAccel {
    pub fn new(bounds: &BBox3f) -> Self {
        let mut h = Self::zeroed();
        h.set_bounds(bounds);
        h
    }

    pub fn bounds(&self) -> BBox3f {
        BBox3f::new(Vec3::from_array(self.bounds[0]), Vec3::from_array(self.bounds[1]))
    }

    /// Empty boxes are stored as all zeros.
    pub fn set_bounds(&mut self, bounds: &BBox3f) {
        self.bounds = if bounds.is_empty() {
            [[0.0; 3]; 2]
        } else {
            bounds.to_array()
        };
    }

    /// Record where the root leaf list starts. `offset` must be 64-byte aligned.
    pub fn set_root(&mut self, node_type: NodeType, offset: u64, leaf_count: u32) {
        debug_assert_eq!(offset % 64, 0);
        self.reserved = offset | node_type as u64;
        self.reserved0[0] = leaf_count;
    }

    pub fn root_node_type(&self) -> Option<NodeType> {
        NodeType::from_u32((self.reserved & 0x7) as u32)
    }

    pub fn root_offset(&self) -> u64 {
        self.reserved & !0x3F
    }

    pub fn leaf_count(&self) -> u32 {
        self.reserved0[0]
    }
}

const _: () = assert!(std::mem::size_of::<HwAccel>() == HW_ACCEL_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let b = BBox3f::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(3.0, 4.0, 5.0));
        let mut h = HwAccel::new(&b);
        h.num_time_segments = 2;
        h.set_root(NodeType::Quad, 128, 5);

        let bytes = bytemuck::bytes_of(&h);
        assert_eq!(&bytes[8..12], &(-1.0f32).to_le_bytes());
        assert_eq!(&bytes[28..32], &5.0f32.to_le_bytes());
        assert_eq!(&bytes[64..68], &2u32.to_le_bytes());
        assert_eq!(&bytes[0..8], &(128u64 | 4).to_le_bytes());

        assert_eq!(h.bounds(), b);
        assert_eq!(h.root_node_type(), Some(NodeType::Quad));
        assert_eq!(h.root_offset(), 128);
        assert_eq!(h.leaf_count(), 5);
    }

    #[test]
    fn test_empty_bounds_are_zeroed() {
        let h = HwAccel::new(&BBox3f::EMPTY);
        assert_eq!(h.bounds, [[0.0; 3]; 2]);
        assert_eq!(h.root_node_type(), Some(NodeType::Internal));
    }

    #[test]
    fn test_mixed_root_is_leaf_list() {
        let mut h = HwAccel::new(&BBox3f::new(Vec3::ZERO, Vec3::ONE));
        h.set_root(NodeType::MIXED, HW_ACCEL_SIZE as u64, 3);
        assert_eq!(h.root_node_type(), Some(NodeType::MIXED));
        assert_eq!(h.root_offset(), HW_ACCEL_SIZE as u64);
        assert_eq!(h.leaf_count(), 3);

        // a zeroed header decodes to the same code, but without leaves
        let empty = HwAccel::zeroed();
        assert_eq!(empty.root_node_type(), Some(NodeType::MIXED));
        assert_eq!(empty.leaf_count(), 0);
    }

    #[test]
    fn test_node_type_codes() {
        assert_eq!(NodeType::MIXED as u8, 0);
        assert_eq!(NodeType::from_u32(3), Some(NodeType::Procedural));
        assert_eq!(NodeType::from_u32(2), None);
    }
}
