//! # rtas
//!
//! Geometry preparation, hardware layouts and builder dispatch for ray
//! tracing acceleration structures (RTAS) traversed by fixed-function
//! hardware.
//!
//! ## Modules
//!
//! - [`util`] - Errors, bounding boxes and math re-exports
//! - [`config`] - Runtime configuration
//! - [`geom`] - Primitive references and spatial splits
//! - [`layout`] - Bit-exact ray, hit, leaf and header records (V1 and V2)
//! - [`api`] - Build API value types: handles, descriptors, properties
//! - [`driver`] - Driver seam, device allow-list, in-process host driver
//! - [`backend`] - Builder back-ends and their two-phase factory
//! - [`dispatch`] - [`BuilderContext`], the caller-owned dispatcher
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rtas::prelude::*;
//!
//! let driver = Arc::new(HostDriver::new());
//! let ctx = BuilderContext::new(driver.loader());
//! ctx.init()?;
//! match ctx.init_builder(ApiRevision::Ext, DriverHandle(1), BuilderMode::VendorDriver) {
//!     Err(e) if e.is_dependency_unavailable() => {
//!         ctx.init_builder(ApiRevision::Ext, DriverHandle(1), BuilderMode::Internal)?
//!     }
//!     other => other?,
//! }
//! let props = ctx.rtas_device_properties(DeviceHandle(1))?;
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod geom;
pub mod layout;
pub mod util;

// Re-export commonly used types
pub use dispatch::BuilderContext;
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::*;
    pub use crate::backend::RtasBuilderApi;
    pub use crate::config::Config;
    pub use crate::dispatch::BuilderContext;
    pub use crate::driver::{DriverApi, DriverLoader, HostDriver};
    pub use crate::util::{BBox3f, Error, Result, Vec3};
}
