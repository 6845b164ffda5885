//! Property structs returned by driver and builder queries.

use bitflags::bitflags;

use super::RtasFormat;
use crate::util::BBox3f;

/// Alignment every RTAS buffer must honor on supported devices.
pub const RTAS_BUFFER_ALIGNMENT: u32 = 128;

/// Name of the driver extension exposing RTAS builders.
pub const RTAS_EXTENSION_NAME: &str = "ZE_extension_rtas";

/// Name of the experimental builder extension.
pub const RTAS_EXP_EXTENSION_NAME: &str = "ZE_experimental_rtas_builder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverExtensionProperties {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceProperties {
    pub vendor_id: u32,
    pub device_id: u32,
    pub name: String,
}

bitflags! {
    /// Ray tracing capabilities of a device module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RaytracingFlags: u32 {
        const RAY_QUERY = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceModuleProperties {
    pub raytracing_flags: RaytracingFlags,
    /// Highest number of BVH levels traversal supports.
    pub max_bvh_levels: u32,
}

/// Acceleration structure format of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtasDeviceProperties {
    pub format: RtasFormat,
    pub buffer_alignment: u32,
}

/// Buffer sizes a build needs, queried before allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildProperties {
    pub scratch_buffer_size: usize,
    /// Enough for typical input; a build may still need up to the max.
    pub rtas_buffer_size_expected: usize,
    /// Always enough.
    pub rtas_buffer_size_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelOperationProperties {
    /// Number of threads that may usefully join the operation.
    pub max_concurrency: u32,
}

/// What a finished build reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOutput {
    pub bounds: BBox3f,
    /// Bytes of the RTAS buffer actually used.
    pub rtas_bytes: usize,
}

/// Result of starting a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuildStatus {
    Complete(BuildOutput),
    /// Started on a parallel operation; join it to finish.
    Deferred,
}

impl BuildStatus {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    pub fn output(&self) -> Option<&BuildOutput> {
        match self {
            Self::Complete(o) => Some(o),
            Self::Deferred => None,
        }
    }
}
