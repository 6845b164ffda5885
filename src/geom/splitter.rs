//! Spatial splits: clip a convex polygon against an axis-aligned plane.
//!
//! Polygons are passed as closed vertex loops, `N` edges stored as `N + 1`
//! vertices with the last one repeating the first. Vertices lying exactly on
//! the plane extend both sides.

use crate::geom::PrimRef;
use crate::util::{BBox3f, Vec3};

/// The two halves of a split primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitBounds {
    pub left: BBox3f,
    pub right: BBox3f,
}

/// Split the polygon loop `v` at `pos` along axis `dim`.
///
/// Both halves are clipped against `bounds`, the primitive's bounds before the
/// split. An edge only divides by its extent when it strictly crosses the
/// plane, so its extent along `dim` is nonzero there.
pub fn split_polygon(bounds: &BBox3f, dim: usize, pos: f32, v: &[Vec3]) -> SplitBounds {
    split_edges(bounds, dim, pos, v, |i, v0d, v1d| {
        debug_assert!(v1d - v0d != 0.0, "edge {i} has zero extent on axis {dim}");
        1.0 / (v1d - v0d)
    })
}

/// Like [`split_polygon`], reusing per-edge inverse extents from [`edge_inv_lengths`].
pub fn split_polygon_with_inv_lengths(
    bounds: &BBox3f,
    dim: usize,
    pos: f32,
    v: &[Vec3],
    inv_length: &[Vec3],
) -> SplitBounds {
    debug_assert!(inv_length.len() + 1 >= v.len());
    split_edges(bounds, dim, pos, v, |i, _, _| inv_length[i][dim])
}

/// Split a primitive reference, keeping its geometry and primitive ids on both halves.
pub fn split_primref(prim: &PrimRef, dim: usize, pos: f32, v: &[Vec3]) -> (PrimRef, PrimRef) {
    let s = split_polygon(&prim.bounds(), dim, pos, v);
    (
        PrimRef::new(&s.left, prim.geom_id(), prim.prim_id()),
        PrimRef::new(&s.right, prim.geom_id(), prim.prim_id()),
    )
}

/// Componentwise `1 / (v[i+1] - v[i])` for every edge of the loop.
pub fn edge_inv_lengths(v: &[Vec3]) -> Vec<Vec3> {
    v.windows(2).map(|e| (e[1] - e[0]).recip()).collect()
}

fn split_edges(
    bounds: &BBox3f,
    dim: usize,
    pos: f32,
    v: &[Vec3],
    inv_length: impl Fn(usize, f32, f32) -> f32,
) -> SplitBounds {
    let mut left = BBox3f::EMPTY;
    let mut right = BBox3f::EMPTY;

    for (i, edge) in v.windows(2).enumerate() {
        let (v0, v1) = (edge[0], edge[1]);
        let v0d = v0[dim];
        let v1d = v1[dim];

        if v0d <= pos {
            left.expand_by_point(v0);
        }
        if v0d >= pos {
            right.expand_by_point(v0);
        }

        if (v0d < pos && pos < v1d) || (v1d < pos && pos < v0d) {
            let t = (pos - v0d) * inv_length(i, v0d, v1d);
            let c = (v1 - v0).mul_add(Vec3::splat(t), v0);
            left.expand_by_point(c);
            right.expand_by_point(c);
        }
    }

    SplitBounds {
        left: left.intersect(bounds),
        right: right.intersect(bounds),
    }
}

/// Splits one triangle along many planes without recomputing edge extents.
#[derive(Debug, Clone)]
pub struct TriangleSplitter {
    v: [Vec3; 4],
    inv_length: [Vec3; 3],
}

impl TriangleSplitter {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        let v = [v0, v1, v2, v0];
        let inv_length = [
            (v[1] - v[0]).recip(),
            (v[2] - v[1]).recip(),
            (v[3] - v[2]).recip(),
        ];
        Self { v, inv_length }
    }

    /// Split `prim`, which must reference this triangle, at `pos` along `dim`.
    pub fn split(&self, prim: &PrimRef, dim: usize, pos: f32) -> (PrimRef, PrimRef) {
        let s = split_polygon_with_inv_lengths(&prim.bounds(), dim, pos, &self.v, &self.inv_length);
        (
            PrimRef::new(&s.left, prim.geom_id(), prim.prim_id()),
            PrimRef::new(&s.right, prim.geom_id(), prim.prim_id()),
        )
    }
}
