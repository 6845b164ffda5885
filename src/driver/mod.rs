//! The driver seam: baseline entry points every back-end relies on.
//!
//! A driver is loaded once per [`crate::dispatch::BuilderContext`] through a
//! [`DriverLoader`]. What it exposes is split in two:
//!
//! - [`DriverApi`] - allocation, property queries and command lists,
//!   bound by `init()` and required by both back-ends
//! - [`crate::backend::RtasBuilderApi`] - the driver's own RTAS builder,
//!   looked up per API revision only when the vendor back-end is selected

mod device;
mod host;

pub use device::*;
pub use host::*;

use std::sync::Arc;

use crate::api::{
    ApiRevision, CommandListHandle, CommandQueueHandle, ContextHandle, DeviceBuffer,
    DeviceHandle, DeviceModuleProperties, DeviceProperties, DriverExtensionProperties,
    DriverHandle, RtasDeviceProperties,
};
use crate::backend::RtasBuilderApi;
use crate::util::Result;

/// Baseline driver entry points.
///
/// Implementations are shared between threads; every method takes `&self`.
pub trait DriverApi: Send + Sync {
    /// Allocate memory visible to host and device.
    fn mem_alloc_shared(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer>;

    /// Allocate device local memory.
    fn mem_alloc_device(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer>;

    fn mem_free(&self, context: ContextHandle, buffer: &DeviceBuffer) -> Result<()>;

    fn driver_extension_properties(&self, driver: DriverHandle) -> Result<Vec<DriverExtensionProperties>>;

    fn device_properties(&self, device: DeviceHandle) -> Result<DeviceProperties>;

    fn device_module_properties(&self, device: DeviceHandle) -> Result<DeviceModuleProperties>;

    /// RTAS format as the driver itself reports it.
    fn rtas_device_properties(&self, device: DeviceHandle) -> Result<RtasDeviceProperties>;

    fn command_queue_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandQueueHandle>;

    fn command_list_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandListHandle>;

    fn command_list_close(&self, list: CommandListHandle) -> Result<()>;

    fn command_list_destroy(&self, list: CommandListHandle) -> Result<()>;

    /// Plain memory copy, executed when the list is submitted.
    fn command_list_append_memory_copy(
        &self,
        list: CommandListHandle,
        dst: &DeviceBuffer,
        src: &DeviceBuffer,
        size: usize,
    ) -> Result<()>;

    fn command_queue_execute_command_lists(
        &self,
        queue: CommandQueueHandle,
        lists: &[CommandListHandle],
    ) -> Result<()>;

    /// The driver's builder entry points for `revision`.
    ///
    /// Fails with [`crate::Error::SymbolNotFound`] if the driver does not
    /// export them, and with [`crate::Error::DependencyUnavailable`] if it
    /// exports them but the extension cannot be loaded.
    fn rtas_builder_api(&self, revision: ApiRevision) -> Result<Arc<dyn RtasBuilderApi>>;
}

/// Locates and binds a driver module.
///
/// Fails with [`crate::Error::ModuleNotFound`] or
/// [`crate::Error::SymbolNotFound`]; the caller folds both into one
/// initialization error.
pub trait DriverLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn DriverApi>>;
}

impl<F> DriverLoader for F
where
    F: Fn() -> Result<Arc<dyn DriverApi>> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn DriverApi>> {
        self()
    }
}
