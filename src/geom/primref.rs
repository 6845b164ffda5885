//! Primitive references: the compact bound + id records builders sort and partition.

use std::cmp::Ordering;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::util::{BBox3f, Vec3};

/// Bounds of one primitive plus its identity, packed into two 16-byte lanes.
///
/// The 4th lane of `lower` and `upper` carries the id. Constructed from a
/// geometry/primitive pair the lanes hold `geom_id` and `prim_id`; constructed
/// from a flat index they hold the low and high halves of a 64-bit id.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct PrimRef {
    pub lower: Vec3,
    lower_id: u32,
    pub upper: Vec3,
    upper_id: u32,
}

const _: () = assert!(std::mem::size_of::<PrimRef>() == 32);

impl PrimRef {
    /// Reference primitive `prim_id` of geometry `geom_id`.
    #[inline]
    pub fn new(bounds: &BBox3f, geom_id: u32, prim_id: u32) -> Self {
        Self {
            lower: bounds.min,
            lower_id: geom_id,
            upper: bounds.max,
            upper_id: prim_id,
        }
    }

    /// Reference by a flat 64-bit index, split across both id lanes.
    #[inline]
    pub fn from_id(bounds: &BBox3f, id: u64) -> Self {
        Self {
            lower: bounds.min,
            lower_id: (id & 0xFFFF_FFFF) as u32,
            upper: bounds.max,
            upper_id: (id >> 32) as u32,
        }
    }

    /// Bounding box of the primitive.
    #[inline]
    pub fn bounds(&self) -> BBox3f {
        BBox3f::new(self.lower, self.upper)
    }

    /// Twice the center of the primitive.
    #[inline]
    pub fn center2(&self) -> Vec3 {
        self.lower + self.upper
    }

    /// Bounds and doubled centroid, as the binner consumes them.
    #[inline]
    pub fn bin_bounds_and_center(&self) -> (BBox3f, Vec3) {
        (self.bounds(), self.center2())
    }

    /// Weight of this reference for the bin heuristic.
    #[inline]
    pub fn size(&self) -> usize {
        1
    }

    #[inline]
    pub fn geom_id(&self) -> u32 {
        self.lower_id
    }

    #[inline]
    pub fn prim_id(&self) -> u32 {
        self.upper_id
    }

    /// Flat id as stored by [`PrimRef::from_id`].
    #[inline]
    pub fn id(&self) -> u64 {
        self.lower_id as u64 | ((self.upper_id as u64) << 32)
    }

    /// Sort key `(prim_id << 32) | geom_id`.
    #[inline]
    pub fn id64(&self) -> u64 {
        ((self.prim_id() as u64) << 32) | self.geom_id() as u64
    }

    /// Total order on [`PrimRef::id64`].
    #[inline]
    pub fn cmp_id64(&self, other: &Self) -> Ordering {
        self.id64().cmp(&other.id64())
    }
}

impl fmt::Debug for PrimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimRef")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("geom_id", &self.geom_id())
            .field("prim_id", &self.prim_id())
            .finish()
    }
}

/// Sort references into deterministic [`PrimRef::id64`] order.
pub fn sort_by_id64(prims: &mut [PrimRef]) {
    prims.sort_by_key(PrimRef::id64);
}
