//! Build operation and geometry descriptors.
//!
//! Geometry data is owned by the descriptor as raw bytes plus a stride, the
//! way a driver receives it; accessors decode individual elements.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use super::RtasFormat;
use crate::util::{Affine3A, BBox3f, Error, Result, Vec3, Vec3A};

bitflags! {
    /// Per-geometry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeometryFlags: u32 {
        /// Never invoke any-hit shaders for this geometry.
        const OPAQUE = 1 << 0;
    }
}

bitflags! {
    /// Per-instance flags, stored in the instance leaf as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceFlags: u32 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        const TRIANGLE_FORCE_OPAQUE = 1 << 2;
        const TRIANGLE_FORCE_NON_OPAQUE = 1 << 3;
    }
}

bitflags! {
    /// Build operation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BuildFlags: u32 {
        /// Trade build time for a smaller structure.
        const COMPACT = 1 << 0;
        /// Each primitive's any-hit shader runs at most once per ray.
        const NO_DUPLICATE_ANYHIT_INVOCATION = 1 << 1;
    }
}

/// Build quality hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// Input element formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    /// Three `f32` vertex coordinates.
    Float3,
    /// 3x4 matrix, columns `vx, vy, vz, p` with 3 floats each.
    Float3x4ColumnMajor,
    /// 3x4 matrix, columns padded to 4 floats.
    Float3x4AlignedColumnMajor,
    /// 3x4 matrix stored row by row.
    Float3x4RowMajor,
    /// Three `u32` vertex indices per triangle.
    TriangleIndicesU32,
}

/// Triangle mesh with indexed vertices.
#[derive(Debug, Clone)]
pub struct TrianglesGeometryInfo {
    pub flags: GeometryFlags,
    pub mask: u8,
    pub triangle_format: InputFormat,
    pub triangle_count: u32,
    pub triangle_stride: u32,
    pub triangles: Arc<[u8]>,
    pub vertex_format: InputFormat,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertices: Arc<[u8]>,
}

impl TrianglesGeometryInfo {
    /// Tightly packed mesh from index triples and positions.
    pub fn from_slices(indices: &[[u32; 3]], vertices: &[Vec3]) -> Self {
        let mut tri = vec![0u8; indices.len() * 12];
        for (i, t) in indices.iter().enumerate() {
            LittleEndian::write_u32_into(t, &mut tri[i * 12..i * 12 + 12]);
        }
        let mut vtx = vec![0u8; vertices.len() * 12];
        for (i, v) in vertices.iter().enumerate() {
            LittleEndian::write_f32_into(&v.to_array(), &mut vtx[i * 12..i * 12 + 12]);
        }
        Self {
            flags: GeometryFlags::empty(),
            mask: 0xFF,
            triangle_format: InputFormat::TriangleIndicesU32,
            triangle_count: indices.len() as u32,
            triangle_stride: 12,
            triangles: tri.into(),
            vertex_format: InputFormat::Float3,
            vertex_count: vertices.len() as u32,
            vertex_stride: 12,
            vertices: vtx.into(),
        }
    }

    /// Check formats, strides and that both buffers hold their counts.
    pub fn validate(&self) -> Result<()> {
        if self.triangle_format != InputFormat::TriangleIndicesU32 {
            return Err(Error::invalid(format!(
                "unsupported triangle format {:?}",
                self.triangle_format
            )));
        }
        if self.vertex_format != InputFormat::Float3 {
            return Err(Error::invalid(format!("unsupported vertex format {:?}", self.vertex_format)));
        }
        check_buffer("triangle", self.triangles.len(), self.triangle_count, self.triangle_stride, 12)?;
        check_buffer("vertex", self.vertices.len(), self.vertex_count, self.vertex_stride, 12)
    }

    /// Vertex indices of triangle `i`.
    #[inline]
    pub fn triangle(&self, i: u32) -> [u32; 3] {
        let o = i as usize * self.triangle_stride as usize;
        let b = &self.triangles[o..o + 12];
        [
            LittleEndian::read_u32(&b[0..4]),
            LittleEndian::read_u32(&b[4..8]),
            LittleEndian::read_u32(&b[8..12]),
        ]
    }

    #[inline]
    pub fn vertex(&self, i: u32) -> Vec3 {
        let o = i as usize * self.vertex_stride as usize;
        let b = &self.vertices[o..o + 12];
        Vec3::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
            LittleEndian::read_f32(&b[8..12]),
        )
    }

    /// Positions of triangle `i`, or `None` if an index is out of range.
    pub fn triangle_vertices(&self, i: u32) -> Option<[u32; 3]> {
        let t = self.triangle(i);
        t.iter().all(|&v| v < self.vertex_count).then_some(t)
    }
}

/// Callback reporting the bounds of procedural primitive `prim_id`.
pub type BoundsFn = Arc<dyn Fn(u32) -> BBox3f + Send + Sync>;

/// User-defined primitives, known to the builder only by their bounds.
#[derive(Clone)]
pub struct ProceduralGeometryInfo {
    pub flags: GeometryFlags,
    pub mask: u8,
    pub prim_count: u32,
    pub bounds: BoundsFn,
}

impl ProceduralGeometryInfo {
    /// Primitives with fixed boxes, one per entry.
    pub fn from_boxes(boxes: Vec<BBox3f>) -> Self {
        let prim_count = boxes.len() as u32;
        let boxes: Arc<[BBox3f]> = boxes.into();
        Self {
            flags: GeometryFlags::empty(),
            mask: 0xFF,
            prim_count,
            bounds: Arc::new(move |i: u32| boxes.get(i as usize).copied().unwrap_or(BBox3f::EMPTY)),
        }
    }
}

impl fmt::Debug for ProceduralGeometryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceduralGeometryInfo")
            .field("flags", &self.flags)
            .field("mask", &self.mask)
            .field("prim_count", &self.prim_count)
            .finish_non_exhaustive()
    }
}

/// Instance of an already built acceleration structure.
#[derive(Debug, Clone)]
pub struct InstanceGeometryInfo {
    pub flags: InstanceFlags,
    pub mask: u8,
    pub user_id: u32,
    pub transform_format: InputFormat,
    /// Object to world transform in `transform_format` layout.
    pub transform: Vec<f32>,
    /// Conservative object space bounds of the instanced structure.
    pub bounds: BBox3f,
    /// Address of the instanced acceleration structure.
    pub acceleration_structure: u64,
}

impl InstanceGeometryInfo {
    pub fn new(acceleration_structure: u64, obj2world: &Affine3A, bounds: BBox3f) -> Self {
        let m = obj2world.matrix3;
        let p = obj2world.translation;
        let transform = [m.x_axis, m.y_axis, m.z_axis, p]
            .iter()
            .flat_map(|c| c.to_array())
            .collect();
        Self {
            flags: InstanceFlags::empty(),
            mask: 0xFF,
            user_id: 0,
            transform_format: InputFormat::Float3x4ColumnMajor,
            transform,
            bounds,
            acceleration_structure,
        }
    }

    /// Decode the object to world transform.
    pub fn obj2world(&self) -> Result<Affine3A> {
        let t = &self.transform;
        let need = match self.transform_format {
            InputFormat::Float3x4ColumnMajor | InputFormat::Float3x4RowMajor => 12,
            InputFormat::Float3x4AlignedColumnMajor => 16,
            other => return Err(Error::invalid(format!("{other:?} is not a transform format"))),
        };
        if t.len() < need {
            return Err(Error::invalid(format!(
                "transform has {} floats, {need} required",
                t.len()
            )));
        }
        let col = Vec3A::from_array;
        Ok(match self.transform_format {
            InputFormat::Float3x4ColumnMajor => Affine3A::from_cols(
                col([t[0], t[1], t[2]]),
                col([t[3], t[4], t[5]]),
                col([t[6], t[7], t[8]]),
                col([t[9], t[10], t[11]]),
            ),
            InputFormat::Float3x4AlignedColumnMajor => Affine3A::from_cols(
                col([t[0], t[1], t[2]]),
                col([t[4], t[5], t[6]]),
                col([t[8], t[9], t[10]]),
                col([t[12], t[13], t[14]]),
            ),
            _ => Affine3A::from_cols(
                col([t[0], t[4], t[8]]),
                col([t[1], t[5], t[9]]),
                col([t[2], t[6], t[10]]),
                col([t[3], t[7], t[11]]),
            ),
        })
    }

    /// World space bounds: the conservative box pushed through the transform.
    pub fn world_bounds(&self) -> Result<BBox3f> {
        Ok(self.bounds.transformed(&self.obj2world()?))
    }
}

/// One entry of a build operation.
#[derive(Debug, Clone)]
pub enum GeometryInfo {
    Triangles(TrianglesGeometryInfo),
    Procedural(ProceduralGeometryInfo),
    Instance(InstanceGeometryInfo),
}

impl GeometryInfo {
    /// Number of build primitives the entry contributes.
    pub fn prim_count(&self) -> u32 {
        match self {
            Self::Triangles(t) => t.triangle_count,
            Self::Procedural(p) => p.prim_count,
            Self::Instance(_) => 1,
        }
    }
}

/// Description of one build.
///
/// The position of a geometry in `geometries` is its geometry id. `None`
/// entries are skipped but keep their id.
#[derive(Debug, Clone, Default)]
pub struct BuildOpDesc {
    pub format: RtasFormat,
    pub quality: BuildQuality,
    pub flags: BuildFlags,
    pub geometries: Vec<Option<GeometryInfo>>,
}

impl BuildOpDesc {
    pub fn new(format: RtasFormat) -> Self {
        Self { format, ..Default::default() }
    }

    pub fn with_geometry(mut self, geometry: GeometryInfo) -> Self {
        self.geometries.push(Some(geometry));
        self
    }

    /// Present geometries with their ids.
    pub fn iter_geometries(&self) -> impl Iterator<Item = (u32, &GeometryInfo)> {
        self.geometries
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (i as u32, g)))
    }

    /// Check every geometry descriptor and the format tag.
    pub fn validate(&self) -> Result<()> {
        if self.format == RtasFormat::Invalid {
            return Err(Error::invalid("invalid rtas format"));
        }
        for (id, g) in self.iter_geometries() {
            match g {
                GeometryInfo::Triangles(t) => t
                    .validate()
                    .map_err(|e| Error::invalid(format!("geometry {id}: {e}")))?,
                GeometryInfo::Instance(inst) => {
                    inst.obj2world()
                        .map_err(|e| Error::invalid(format!("geometry {id}: {e}")))?;
                    if inst.acceleration_structure == 0 {
                        return Err(Error::invalid(format!(
                            "geometry {id}: null acceleration structure"
                        )));
                    }
                }
                GeometryInfo::Procedural(_) => {}
            }
        }
        Ok(())
    }
}

fn check_buffer(what: &str, len: usize, count: u32, stride: u32, elem: usize) -> Result<()> {
    if (stride as usize) < elem {
        return Err(Error::invalid(format!("{what} stride {stride} below element size {elem}")));
    }
    let need = match count {
        0 => 0,
        n => (n as usize - 1) * stride as usize + elem,
    };
    if len < need {
        return Err(Error::invalid(format!(
            "{what} buffer holds {len} bytes, {count} elements need {need}"
        )));
    }
    Ok(())
}
