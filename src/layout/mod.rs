//! Binary records shared with ray tracing hardware.
//!
//! Two revisions coexist: V1 for the first generation of devices, V2 for
//! the newest. Bit fields are packed by hand into fixed-width words; every
//! field has a [`BitField`] constant in the table next to its struct, so the
//! packing does not depend on compiler bit-field rules.
//!
//! - [`MemRayV1`], [`MemRayV2`] - rays handed to traversal
//! - [`MemHitV1`], [`MemHitV2`] - committed and potential hits
//! - [`QuadLeafV1`], [`QuadLeafV2`], [`ProceduralLeaf`],
//!   [`InstanceLeafV1`], [`InstanceLeafV2`] - leaves
//! - [`HwAccel`] - top-level header

mod accel;
mod bits;
mod hit;
mod leaf;
mod ray;

pub use accel::*;
pub use bits::*;
pub use hit::*;
pub use leaf::*;
pub use ray::*;
