//! Value types of the RTAS build API.
//!
//! These are shared by every back-end and by [`crate::dispatch::BuilderContext`],
//! which forwards them unchanged.

mod buffer;
mod desc;
mod handle;
mod props;

pub use buffer::*;
pub use desc::*;
pub use handle::*;
pub use props::*;

/// Acceleration structure format, fixed by the device's hardware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RtasFormat {
    #[default]
    Invalid,
    /// First generation ray tracing hardware.
    V1,
    /// Newest generation, with 64-bit pointers and unorm24 barycentrics.
    V2,
}

/// Which of the two mutually exclusive builder API revisions a caller speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiRevision {
    /// Experimental builder extension.
    Exp,
    /// Released RTAS extension.
    Ext,
}

impl ApiRevision {
    /// Driver extension that provides this revision.
    pub fn extension_name(self) -> &'static str {
        match self {
            Self::Exp => RTAS_EXP_EXTENSION_NAME,
            Self::Ext => RTAS_EXTENSION_NAME,
        }
    }
}

/// Builder implementation selected for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderMode {
    /// In-process builder.
    Internal,
    /// Builder shipped with the vendor driver.
    VendorDriver,
}
