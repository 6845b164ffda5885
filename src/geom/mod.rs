//! Builder-side geometry preparation.
//!
//! - [`PrimRef`] - bound + id record created once per input primitive
//! - [`split_polygon`] and friends - spatial splits of primitives that
//!   straddle a partition plane

mod primref;
mod splitter;

pub use primref::*;
pub use splitter::*;
