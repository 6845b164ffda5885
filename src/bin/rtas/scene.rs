//! Cornell box test scene.

use rtas::api::{GeometryInfo, InputFormat, InstanceGeometryInfo, TrianglesGeometryInfo};
use rtas::util::{Affine3A, BBox3f, Vec3};

/// Vertex indices, two triangles per wall or block face.
const INDICES: [[u32; 3]; 34] = [
    [0, 1, 2],
    [0, 2, 3],
    [4, 5, 6],
    [4, 6, 7],
    [8, 9, 10],
    [8, 10, 11],
    [12, 13, 14],
    [12, 14, 15],
    [16, 17, 18],
    [16, 18, 19],
    [20, 21, 22],
    [20, 22, 23],
    [24, 25, 26],
    [24, 26, 27],
    [28, 29, 30],
    [28, 30, 31],
    [32, 33, 34],
    [32, 34, 35],
    [36, 37, 38],
    [36, 38, 39],
    [40, 41, 42],
    [40, 42, 43],
    [44, 45, 46],
    [44, 46, 47],
    [48, 49, 50],
    [48, 50, 51],
    [52, 53, 54],
    [52, 54, 55],
    [56, 57, 58],
    [56, 58, 59],
    [60, 61, 62],
    [60, 62, 63],
    [64, 65, 66],
    [64, 66, 67],
];

const VERTICES: [[f32; 3]; 68] = [
    // floor
    [552.8, 0.0, 0.0],
    [0.0, 0.0, 0.0],
    [0.0, 0.0, 559.2],
    [549.6, 0.0, 559.2],
    // short block footprint
    [290.0, 0.0, 114.0],
    [240.0, 0.0, 272.0],
    [82.0, 0.0, 225.0],
    [130.0, 0.0, 65.0],
    // tall block footprint
    [472.0, 0.0, 406.0],
    [314.0, 0.0, 456.0],
    [265.0, 0.0, 296.0],
    [423.0, 0.0, 247.0],
    // ceiling
    [556.0, 548.8, 0.0],
    [556.0, 548.8, 559.2],
    [0.0, 548.8, 559.2],
    [0.0, 548.8, 0.0],
    // back wall
    [549.6, 0.0, 559.2],
    [0.0, 0.0, 559.2],
    [0.0, 548.8, 559.2],
    [556.0, 548.8, 559.2],
    // right wall
    [0.0, 0.0, 559.2],
    [0.0, 0.0, 0.0],
    [0.0, 548.8, 0.0],
    [0.0, 548.8, 559.2],
    // left wall
    [552.8, 0.0, 0.0],
    [549.6, 0.0, 559.2],
    [556.0, 548.8, 559.2],
    [556.0, 548.8, 0.0],
    // short block
    [130.0, 165.0, 65.0],
    [82.0, 165.0, 225.0],
    [240.0, 165.0, 272.0],
    [290.0, 165.0, 114.0],
    [290.0, 0.0, 114.0],
    [290.0, 165.0, 114.0],
    [240.0, 165.0, 272.0],
    [240.0, 0.0, 272.0],
    [130.0, 0.0, 65.0],
    [130.0, 165.0, 65.0],
    [290.0, 165.0, 114.0],
    [290.0, 0.0, 114.0],
    [82.0, 0.0, 225.0],
    [82.0, 165.0, 225.0],
    [130.0, 165.0, 65.0],
    [130.0, 0.0, 65.0],
    [240.0, 0.0, 272.0],
    [240.0, 165.0, 272.0],
    [82.0, 165.0, 225.0],
    [82.0, 0.0, 225.0],
    // tall block
    [423.0, 330.0, 247.0],
    [265.0, 330.0, 296.0],
    [314.0, 330.0, 456.0],
    [472.0, 330.0, 406.0],
    [423.0, 0.0, 247.0],
    [423.0, 330.0, 247.0],
    [472.0, 330.0, 406.0],
    [472.0, 0.0, 406.0],
    [472.0, 0.0, 406.0],
    [472.0, 330.0, 406.0],
    [314.0, 330.0, 456.0],
    [314.0, 0.0, 456.0],
    [314.0, 0.0, 456.0],
    [314.0, 330.0, 456.0],
    [265.0, 330.0, 296.0],
    [265.0, 0.0, 296.0],
    [265.0, 0.0, 296.0],
    [265.0, 330.0, 296.0],
    [423.0, 330.0, 247.0],
    [423.0, 0.0, 247.0],
];

/// The box as a single triangle mesh.
pub fn cornell_box() -> GeometryInfo {
    let vertices: Vec<Vec3> = VERTICES.iter().copied().map(Vec3::from_array).collect();
    GeometryInfo::Triangles(TrianglesGeometryInfo::from_slices(&INDICES, &vertices))
}

/// Identity instance of the structure at `blas`, in aligned column-major layout.
pub fn cornell_box_instance(blas: u64) -> GeometryInfo {
    let bounds = BBox3f::new(Vec3::ZERO, Vec3::splat(1000.0));
    let mut inst = InstanceGeometryInfo::new(blas, &Affine3A::IDENTITY, bounds);
    inst.transform_format = InputFormat::Float3x4AlignedColumnMajor;
    inst.transform = vec![
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 0.0,
    ];
    GeometryInfo::Instance(inst)
}
