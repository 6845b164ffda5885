//! Build back-ends.
//!
//! Every back-end implements [`RtasBuilderApi`]. Two exist:
//!
//! - the vendor driver's own builder, obtained from
//!   [`crate::driver::DriverApi::rtas_builder_api`]
//! - [`InternalBuilder`], the in-process builder (feature `internal-builder`)
//!
//! [`BackendFactory`] picks one in two phases: `probe` checks that the back-end
//! is usable, `commit` turns a successful probe into the [`BoundBackend`] a
//! [`crate::dispatch::BuilderContext`] forwards to.

mod factory;
#[cfg(feature = "internal-builder")]
mod internal;

pub use factory::*;
#[cfg(feature = "internal-builder")]
pub use internal::InternalBuilder;

use crate::api::{
    BuildOpDesc, BuildOutput, BuildProperties, BuildStatus, BuilderHandle, CommandListHandle,
    DeviceBuffer, DriverHandle, ParallelOperationHandle, ParallelOperationProperties, RtasFormat,
};
use crate::util::{Error, Result};

/// Builder entry points of one back-end.
pub trait RtasBuilderApi: Send + Sync {
    fn create_builder(&self, driver: DriverHandle) -> Result<BuilderHandle>;

    fn destroy_builder(&self, builder: BuilderHandle) -> Result<()>;

    /// Succeeds if structures of format `a` may be used where `b` is expected.
    fn format_compatibility_check(&self, driver: DriverHandle, a: RtasFormat, b: RtasFormat) -> Result<()>;

    /// Scratch and output sizes for `op`. Query before allocating.
    fn build_properties(&self, builder: BuilderHandle, op: &BuildOpDesc) -> Result<BuildProperties>;

    /// Build `op` into `rtas`.
    ///
    /// With a parallel operation the call only validates and returns
    /// [`BuildStatus::Deferred`]; threads then finish it through
    /// [`RtasBuilderApi::parallel_operation_join`].
    fn build(
        &self,
        builder: BuilderHandle,
        op: &BuildOpDesc,
        scratch: Option<&DeviceBuffer>,
        rtas: &DeviceBuffer,
        parallel_op: Option<ParallelOperationHandle>,
    ) -> Result<BuildStatus>;

    fn parallel_operation_create(&self, driver: DriverHandle) -> Result<ParallelOperationHandle>;

    fn parallel_operation_destroy(&self, op: ParallelOperationHandle) -> Result<()>;

    fn parallel_operation_properties(&self, op: ParallelOperationHandle) -> Result<ParallelOperationProperties>;

    /// Contribute to the build running on `op` and wait for it to finish.
    ///
    /// Safe to call from any number of threads at once; all of them return
    /// the same result.
    fn parallel_operation_join(&self, op: ParallelOperationHandle) -> Result<BuildOutput>;

    /// Copy an acceleration structure, relocating it to `dst`.
    ///
    /// Only the released API revision has this entry point.
    fn command_list_append_copy(
        &self,
        _list: CommandListHandle,
        _dst: &DeviceBuffer,
        _src: &DeviceBuffer,
        _size: usize,
    ) -> Result<()> {
        Err(Error::Unsupported("command_list_append_copy"))
    }
}

/// Shared format compatibility rule: identical valid formats only.
pub fn check_format_compatibility(a: RtasFormat, b: RtasFormat) -> Result<()> {
    if a == b && a != RtasFormat::Invalid {
        Ok(())
    } else {
        Err(Error::IncompatibleFormats(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_compatibility() {
        assert!(check_format_compatibility(RtasFormat::V1, RtasFormat::V1).is_ok());
        assert!(check_format_compatibility(RtasFormat::V2, RtasFormat::V2).is_ok());
        assert!(matches!(
            check_format_compatibility(RtasFormat::V1, RtasFormat::V2),
            Err(Error::IncompatibleFormats(RtasFormat::V1, RtasFormat::V2))
        ));
        assert!(check_format_compatibility(RtasFormat::Invalid, RtasFormat::Invalid).is_err());
    }
}
