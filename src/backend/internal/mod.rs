//! In-process builder.
//!
//! Writes acceleration structures straight into host visible buffers. The
//! structure is a header plus a flat leaf list (see [`encode`]); it needs no
//! scratch memory.

mod encode;
mod parallel;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use self::parallel::{BuildJob, ParallelOperation};
use super::{check_format_compatibility, RtasBuilderApi};
use crate::api::{
    BuildOpDesc, BuildOutput, BuildProperties, BuildStatus, BuilderHandle, DeviceBuffer, DriverHandle,
    ParallelOperationHandle, ParallelOperationProperties, RtasFormat, RTAS_BUFFER_ALIGNMENT,
};
use crate::util::{Error, Result};

/// The in-process [`RtasBuilderApi`].
pub struct InternalBuilder {
    /// Primitives per preparation chunk.
    chunk_size: usize,
    /// Source of builder and parallel operation handles.
    next_handle: AtomicU64,
    /// Live builders.
    builders: Mutex<HashSet<BuilderHandle>>,
    /// Live parallel operations.
    operations: Mutex<HashMap<ParallelOperationHandle, Arc<ParallelOperation>>>,
}

impl InternalBuilder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            next_handle: AtomicU64::new(1),
            builders: Mutex::new(HashSet::new()),
            operations: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn check_builder(&self, builder: BuilderHandle) -> Result<()> {
        builder.non_null()?;
        if self.builders.lock().contains(&builder) {
            Ok(())
        } else {
            Err(Error::InvalidHandle("builder"))
        }
    }

    fn operation(&self, op: ParallelOperationHandle) -> Result<Arc<ParallelOperation>> {
        op.non_null()?;
        self.operations
            .lock()
            .get(&op)
            .cloned()
            .ok_or(Error::InvalidHandle("parallel operation"))
    }
}

impl Default for InternalBuilder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BUILD_CHUNK_SIZE)
    }
}

impl RtasBuilderApi for InternalBuilder {
    fn create_builder(&self, driver: DriverHandle) -> Result<BuilderHandle> {
        driver.non_null()?;
        let builder = BuilderHandle(self.handle());
        self.builders.lock().insert(builder);
        Ok(builder)
    }

    fn destroy_builder(&self, builder: BuilderHandle) -> Result<()> {
        builder.non_null()?;
        if self.builders.lock().remove(&builder) {
            Ok(())
        } else {
            Err(Error::InvalidHandle("builder"))
        }
    }

    fn format_compatibility_check(&self, driver: DriverHandle, a: RtasFormat, b: RtasFormat) -> Result<()> {
        driver.non_null()?;
        check_format_compatibility(a, b)
    }

    fn build_properties(&self, builder: BuilderHandle, op: &BuildOpDesc) -> Result<BuildProperties> {
        self.check_builder(builder)?;
        op.validate()?;
        Ok(encode::build_properties(op))
    }

    #[instrument(skip_all, fields(format = ?op.format, geometries = op.geometries.len()))]
    fn build(
        &self,
        builder: BuilderHandle,
        op: &BuildOpDesc,
        _scratch: Option<&DeviceBuffer>,
        rtas: &DeviceBuffer,
        parallel_op: Option<ParallelOperationHandle>,
    ) -> Result<BuildStatus> {
        self.check_builder(builder)?;
        op.validate()?;
        if rtas.address() % RTAS_BUFFER_ALIGNMENT as u64 != 0 {
            return Err(Error::invalid(format!(
                "rtas buffer at {:#x} is not {RTAS_BUFFER_ALIGNMENT}-byte aligned",
                rtas.address()
            )));
        }

        let job = BuildJob::new(op.clone(), rtas.clone(), self.chunk_size);
        match parallel_op {
            Some(handle) => {
                self.operation(handle)?.start(Arc::new(job))?;
                debug!("build deferred to parallel operation");
                Ok(BuildStatus::Deferred)
            }
            None => job.run().map(BuildStatus::Complete),
        }
    }

    fn parallel_operation_create(&self, driver: DriverHandle) -> Result<ParallelOperationHandle> {
        driver.non_null()?;
        let op = ParallelOperationHandle(self.handle());
        self.operations.lock().insert(op, Arc::default());
        Ok(op)
    }

    fn parallel_operation_destroy(&self, op: ParallelOperationHandle) -> Result<()> {
        op.non_null()?;
        self.operations
            .lock()
            .remove(&op)
            .map(|_| ())
            .ok_or(Error::InvalidHandle("parallel operation"))
    }

    fn parallel_operation_properties(&self, op: ParallelOperationHandle) -> Result<ParallelOperationProperties> {
        self.operation(op)?;
        Ok(ParallelOperationProperties {
            max_concurrency: rayon::current_num_threads() as u32,
        })
    }

    fn parallel_operation_join(&self, op: ParallelOperationHandle) -> Result<BuildOutput> {
        // the registry lock is released before joining
        let operation = self.operation(op)?;
        operation.join()
    }
}
