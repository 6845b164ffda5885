//! Builder selection and call routing.
//!
//! [`BuilderContext`] owns the driver binding and the selected build back-end.
//! Callers create one context, call [`BuilderContext::init`] and
//! [`BuilderContext::init_builder`], then issue every allocation, property and
//! build call through it.
//!
//! Selection happens under one lock. Forwarded calls take a snapshot of the
//! current binding and run without it, so a long build never blocks another
//! thread's property query or a second build.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::api::{
    ApiRevision, BuildOpDesc, BuildOutput, BuildProperties, BuildStatus, BuilderHandle, BuilderMode,
    CommandListHandle, CommandQueueHandle, ContextHandle, DeviceBuffer, DeviceHandle, DeviceModuleProperties,
    DeviceProperties, DriverExtensionProperties, DriverHandle, ParallelOperationHandle,
    ParallelOperationProperties, RtasDeviceProperties, RtasFormat,
};
use crate::backend::{BackendFactory, BoundBackend};
use crate::config::Config;
use crate::driver::{rtas_device_properties_for, DriverApi, DriverLoader};
use crate::util::{Error, Result};

/// Caller-owned dispatcher. See the module docs.
pub struct BuilderContext {
    config: Config,
    loader: Box<dyn DriverLoader>,
    factory: BackendFactory,
    /// Held across `init` and `init_builder`, never across forwarded calls.
    transition: Mutex<()>,
    driver: RwLock<Option<Arc<dyn DriverApi>>>,
    backend: RwLock<Option<Arc<BoundBackend>>>,
}

impl BuilderContext {
    /// Context with configuration from the environment.
    pub fn new(loader: impl DriverLoader + 'static) -> Self {
        Self::with_config(loader, Config::from_env())
    }

    pub fn with_config(loader: impl DriverLoader + 'static, config: Config) -> Self {
        Self {
            factory: BackendFactory::new(config.clone()),
            config,
            loader: Box::new(loader),
            transition: Mutex::new(()),
            driver: RwLock::new(None),
            backend: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the driver's baseline entry points.
    ///
    /// Returns immediately once bound. A missing module or entry point is
    /// reported as [`Error::Initialization`]; a later call tries again.
    pub fn init(&self) -> Result<()> {
        let _guard = self.transition.lock();
        if self.driver.read().is_some() {
            return Ok(());
        }
        let driver = self.loader.load().map_err(|e| match e {
            Error::ModuleNotFound(_) | Error::SymbolNotFound(_) => Error::Initialization(e.to_string()),
            other => other,
        })?;
        *self.driver.write() = Some(driver);
        debug!("driver bound");
        Ok(())
    }

    /// Select the build back-end.
    ///
    /// A request the current back-end already serves is a no-op. Requesting
    /// the vendor back-end for one API revision while it is bound for the
    /// other fails with [`Error::ApiRevisionMismatch`]. A vendor probe that
    /// reports [`Error::DependencyUnavailable`] returns that error unchanged.
    /// On any failure the previous selection stays in place.
    pub fn init_builder(&self, revision: ApiRevision, driver_handle: DriverHandle, mode: BuilderMode) -> Result<()> {
        let _guard = self.transition.lock();
        let current = self.backend.read().clone();
        if let Some(bound) = &current {
            if bound.serves(mode, revision) {
                return Ok(());
            }
            if mode == BuilderMode::VendorDriver && bound.mode == BuilderMode::VendorDriver {
                return Err(Error::ApiRevisionMismatch {
                    active: bound.revision,
                    requested: revision,
                });
            }
        }

        let driver = self.driver()?;
        let backend = self.factory.probe(mode, revision, driver.as_ref(), driver_handle)?.commit();
        info!(?mode, ?revision, "builder back-end selected");
        *self.backend.write() = Some(Arc::new(backend));
        Ok(())
    }

    /// Mode of the selected back-end, if any.
    pub fn builder_mode(&self) -> Option<BuilderMode> {
        self.backend.read().as_ref().map(|b| b.mode)
    }

    /// API revision the selected back-end was bound for.
    pub fn api_revision(&self) -> Option<ApiRevision> {
        self.backend.read().as_ref().map(|b| b.revision)
    }

    fn driver(&self) -> Result<Arc<dyn DriverApi>> {
        self.driver.read().clone().ok_or(Error::NotInitialized)
    }

    fn backend(&self) -> Result<Arc<BoundBackend>> {
        self.backend.read().clone().ok_or(Error::NotInitialized)
    }

    // Memory

    pub fn mem_alloc_shared(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer> {
        self.driver()?.mem_alloc_shared(context, device, size, alignment)
    }

    pub fn mem_alloc_device(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer> {
        self.driver()?.mem_alloc_device(context, device, size, alignment)
    }

    pub fn mem_free(&self, context: ContextHandle, buffer: &DeviceBuffer) -> Result<()> {
        self.driver()?.mem_free(context, buffer)
    }

    // Properties

    pub fn driver_extension_properties(&self, driver: DriverHandle) -> Result<Vec<DriverExtensionProperties>> {
        self.driver()?.driver_extension_properties(driver)
    }

    pub fn device_properties(&self, device: DeviceHandle) -> Result<DeviceProperties> {
        self.driver()?.device_properties(device)
    }

    pub fn device_module_properties(&self, device: DeviceHandle) -> Result<DeviceModuleProperties> {
        self.driver()?.device_module_properties(device)
    }

    /// RTAS format and alignment for `device`.
    ///
    /// With the internal back-end the answer comes from the device id
    /// allow-list (unless disabled in [`Config`]); the vendor back-end asks
    /// the driver.
    pub fn rtas_device_properties(&self, device: DeviceHandle) -> Result<RtasDeviceProperties> {
        let backend = self.backend()?;
        let driver = self.driver()?;
        device.non_null()?;
        match backend.mode {
            BuilderMode::Internal => {
                let p = driver.device_properties(device)?;
                rtas_device_properties_for(p.vendor_id, p.device_id, self.config.disable_device_id_check)
            }
            BuilderMode::VendorDriver => driver.rtas_device_properties(device),
        }
    }

    // Builder

    pub fn create_builder(&self, driver: DriverHandle) -> Result<BuilderHandle> {
        self.backend()?.api.create_builder(driver)
    }

    pub fn destroy_builder(&self, builder: BuilderHandle) -> Result<()> {
        self.backend()?.api.destroy_builder(builder)
    }

    pub fn format_compatibility_check(&self, driver: DriverHandle, a: RtasFormat, b: RtasFormat) -> Result<()> {
        self.backend()?.api.format_compatibility_check(driver, a, b)
    }

    pub fn build_properties(&self, builder: BuilderHandle, op: &BuildOpDesc) -> Result<BuildProperties> {
        self.backend()?.api.build_properties(builder, op)
    }

    /// Forward a build. Back-end failures come back unchanged; nothing is retried.
    pub fn build(
        &self,
        builder: BuilderHandle,
        op: &BuildOpDesc,
        scratch: Option<&DeviceBuffer>,
        rtas: &DeviceBuffer,
        parallel_op: Option<ParallelOperationHandle>,
    ) -> Result<BuildStatus> {
        self.backend()?.api.build(builder, op, scratch, rtas, parallel_op)
    }

    // Parallel operations

    pub fn parallel_operation_create(&self, driver: DriverHandle) -> Result<ParallelOperationHandle> {
        self.backend()?.api.parallel_operation_create(driver)
    }

    pub fn parallel_operation_destroy(&self, op: ParallelOperationHandle) -> Result<()> {
        self.backend()?.api.parallel_operation_destroy(op)
    }

    pub fn parallel_operation_properties(&self, op: ParallelOperationHandle) -> Result<ParallelOperationProperties> {
        self.backend()?.api.parallel_operation_properties(op)
    }

    pub fn parallel_operation_join(&self, op: ParallelOperationHandle) -> Result<BuildOutput> {
        self.backend()?.api.parallel_operation_join(op)
    }

    // Command lists

    pub fn command_queue_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandQueueHandle> {
        self.driver()?.command_queue_create(context, device)
    }

    pub fn command_list_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandListHandle> {
        self.driver()?.command_list_create(context, device)
    }

    pub fn command_list_close(&self, list: CommandListHandle) -> Result<()> {
        self.driver()?.command_list_close(list)
    }

    pub fn command_list_destroy(&self, list: CommandListHandle) -> Result<()> {
        self.driver()?.command_list_destroy(list)
    }

    pub fn command_queue_execute_command_lists(
        &self,
        queue: CommandQueueHandle,
        lists: &[CommandListHandle],
    ) -> Result<()> {
        self.driver()?.command_queue_execute_command_lists(queue, lists)
    }

    /// Append a copy of an acceleration structure to `list`.
    ///
    /// Only the vendor back-end of the released revision has a dedicated
    /// entry point; everything else records a plain memory copy.
    pub fn command_list_append_copy(
        &self,
        list: CommandListHandle,
        dst: &DeviceBuffer,
        src: &DeviceBuffer,
        size: usize,
    ) -> Result<()> {
        let backend = self.backend()?;
        if backend.mode == BuilderMode::VendorDriver && backend.revision == ApiRevision::Ext {
            backend.api.command_list_append_copy(list, dst, src, size)
        } else {
            self.driver()?.command_list_append_memory_copy(list, dst, src, size)
        }
    }
}

impl fmt::Debug for BuilderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderContext")
            .field("config", &self.config)
            .field("driver_bound", &self.driver.read().is_some())
            .field("backend", &self.backend.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HostDriver;

    fn context() -> BuilderContext {
        let driver = Arc::new(HostDriver::new());
        BuilderContext::with_config(driver.loader(), Config::default())
    }

    #[test]
    fn test_not_initialized() {
        let ctx = context();
        assert!(matches!(ctx.create_builder(DriverHandle(1)), Err(Error::NotInitialized)));
        assert!(matches!(
            ctx.mem_alloc_shared(ContextHandle(1), DeviceHandle(1), 16, 128),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            ctx.init_builder(ApiRevision::Ext, DriverHandle(1), BuilderMode::Internal),
            Err(Error::NotInitialized)
        ));
        assert_eq!(ctx.builder_mode(), None);
    }

    #[test]
    fn test_init_is_idempotent() {
        let ctx = context();
        ctx.init().unwrap();
        ctx.init().unwrap();
        assert!(ctx.mem_alloc_shared(ContextHandle(1), DeviceHandle(1), 16, 128).is_ok());
        // driver calls work before a builder is selected, builder calls do not
        assert!(matches!(ctx.rtas_device_properties(DeviceHandle(1)), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_loader_errors_fold_into_initialization() {
        let ctx = BuilderContext::with_config(
            || -> Result<Arc<dyn DriverApi>> { Err(Error::ModuleNotFound("libze_loader.so.1".into())) },
            Config::default(),
        );
        assert!(matches!(ctx.init(), Err(Error::Initialization(_))));

        let ctx = BuilderContext::with_config(
            || -> Result<Arc<dyn DriverApi>> { Err(Error::SymbolNotFound("zeMemAllocShared".into())) },
            Config::default(),
        );
        assert!(matches!(ctx.init(), Err(Error::Initialization(_))));
    }

    #[test]
    fn test_internal_selection() {
        let ctx = context();
        ctx.init().unwrap();
        ctx.init_builder(ApiRevision::Exp, DriverHandle(1), BuilderMode::Internal).unwrap();
        // the internal back-end serves both revisions
        ctx.init_builder(ApiRevision::Ext, DriverHandle(1), BuilderMode::Internal).unwrap();
        assert_eq!(ctx.builder_mode(), Some(BuilderMode::Internal));
        assert_eq!(ctx.api_revision(), Some(ApiRevision::Exp));

        let p = ctx.rtas_device_properties(DeviceHandle(1)).unwrap();
        assert_eq!(p.format, RtasFormat::V1);
        assert_eq!(p.buffer_alignment, 128);
    }
}
