//! Two-phase back-end selection: probe, then commit.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::RtasBuilderApi;
use crate::api::{ApiRevision, BuilderMode, DriverHandle};
use crate::config::Config;
use crate::driver::DriverApi;
use crate::util::Result;

/// A back-end that passed its probe but is not in use yet.
///
/// Dropping it discards the probe without side effects.
pub struct ProbedBackend {
    mode: BuilderMode,
    revision: ApiRevision,
    api: Arc<dyn RtasBuilderApi>,
}

impl ProbedBackend {
    pub fn mode(&self) -> BuilderMode {
        self.mode
    }

    pub fn revision(&self) -> ApiRevision {
        self.revision
    }

    /// Bind the probed entry points for good.
    pub fn commit(self) -> BoundBackend {
        debug!(mode = ?self.mode, revision = ?self.revision, "committing builder back-end");
        BoundBackend {
            mode: self.mode,
            revision: self.revision,
            api: self.api,
        }
    }
}

/// The back-end a context forwards build calls to.
pub struct BoundBackend {
    pub mode: BuilderMode,
    /// Revision the back-end was bound for. The internal back-end serves both.
    pub revision: ApiRevision,
    pub api: Arc<dyn RtasBuilderApi>,
}

impl BoundBackend {
    /// True if this back-end already satisfies a request for `mode` and `revision`.
    pub fn serves(&self, mode: BuilderMode, revision: ApiRevision) -> bool {
        match mode {
            BuilderMode::Internal => self.mode == BuilderMode::Internal,
            BuilderMode::VendorDriver => self.mode == BuilderMode::VendorDriver && self.revision == revision,
        }
    }
}

impl fmt::Debug for BoundBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundBackend")
            .field("mode", &self.mode)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ProbedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbedBackend")
            .field("mode", &self.mode)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

/// Creates back-ends for a context.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    config: Config,
}

impl BackendFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Check that the back-end for `mode` can be used.
    ///
    /// The vendor probe creates and destroys a throwaway builder. If creation
    /// reports [`crate::Error::DependencyUnavailable`] that error is returned as-is so
    /// the caller can pick the internal back-end instead. Other creation
    /// failures are logged and do not stop the back-end from being bound.
    pub fn probe(
        &self,
        mode: BuilderMode,
        revision: ApiRevision,
        driver: &dyn DriverApi,
        driver_handle: DriverHandle,
    ) -> Result<ProbedBackend> {
        let api = match mode {
            BuilderMode::Internal => self.internal()?,
            BuilderMode::VendorDriver => {
                let api = driver.rtas_builder_api(revision)?;
                match api.create_builder(driver_handle) {
                    Ok(builder) => {
                        if let Err(e) = api.destroy_builder(builder) {
                            warn!("destroying probe builder failed: {e}");
                        }
                    }
                    Err(e) if e.is_dependency_unavailable() => return Err(e),
                    Err(e) => warn!(?revision, "probe builder creation failed: {e}"),
                }
                api
            }
        };
        Ok(ProbedBackend { mode, revision, api })
    }

    #[cfg(feature = "internal-builder")]
    fn internal(&self) -> Result<Arc<dyn RtasBuilderApi>> {
        Ok(Arc::new(super::InternalBuilder::new(self.config.build_chunk_size)))
    }

    #[cfg(not(feature = "internal-builder"))]
    fn internal(&self) -> Result<Arc<dyn RtasBuilderApi>> {
        let _ = &self.config;
        Err(crate::util::Error::InternalBuilderDisabled)
    }
}

#[cfg(all(test, feature = "internal-builder"))]
mod tests {
    use super::*;
    use crate::driver::HostDriver;

    #[test]
    fn test_internal_probe() {
        let factory = BackendFactory::new(Config::default());
        let driver = HostDriver::new();
        let probed = factory
            .probe(BuilderMode::Internal, ApiRevision::Ext, &driver, DriverHandle(1))
            .unwrap();
        assert_eq!(probed.mode(), BuilderMode::Internal);

        let bound = probed.commit();
        assert!(bound.serves(BuilderMode::Internal, ApiRevision::Exp));
        assert!(!bound.serves(BuilderMode::VendorDriver, ApiRevision::Ext));
    }

    #[test]
    fn test_vendor_probe_without_extension() {
        let factory = BackendFactory::new(Config::default());
        let driver = HostDriver::new();
        let err = factory
            .probe(BuilderMode::VendorDriver, ApiRevision::Ext, &driver, DriverHandle(1))
            .unwrap_err();
        assert!(err.is_dependency_unavailable());
    }

    #[test]
    fn test_vendor_probe_binds_revision() {
        let factory = BackendFactory::new(Config::default());
        let vendor: Arc<dyn RtasBuilderApi> = Arc::new(crate::backend::InternalBuilder::new(16));
        let driver = HostDriver::new().with_vendor_builder(ApiRevision::Exp, vendor);
        let bound = factory
            .probe(BuilderMode::VendorDriver, ApiRevision::Exp, &driver, DriverHandle(1))
            .unwrap()
            .commit();
        assert!(bound.serves(BuilderMode::VendorDriver, ApiRevision::Exp));
        assert!(!bound.serves(BuilderMode::VendorDriver, ApiRevision::Ext));
        assert!(!bound.serves(BuilderMode::Internal, ApiRevision::Exp));
    }
}
