//! Error types for acceleration structure preparation and builder dispatch.

use thiserror::Error;

use crate::api::{ApiRevision, RtasFormat};

/// Main error type for RTAS operations.
///
/// The variants follow the status codes a driver reports. Two of them are
/// load-bearing for callers: [`Error::DependencyUnavailable`] means "retry with
/// the other back-end", everything else is fatal to the attempt.
#[derive(Error, Debug)]
pub enum Error {
    /// Driver module or one of its baseline entry points could not be bound
    #[error("driver initialization failed: {0}")]
    Initialization(String),

    /// Dynamic driver module could not be located
    #[error("module {0} not found")]
    ModuleNotFound(String),

    /// Driver module does not export a required entry point
    #[error("symbol {0} not found")]
    SymbolNotFound(String),

    /// No driver or builder back-end has been bound yet
    #[error("builder context not initialized, call init() and init_builder() first")]
    NotInitialized,

    /// Requested extension cannot be loaded on this driver
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The in-process builder was compiled out
    #[error("internal builder disabled at compile time")]
    InternalBuilderDisabled,

    /// A required handle was null
    #[error("invalid null handle: {0}")]
    InvalidNullHandle(&'static str),

    /// Handle does not refer to a live object of this back-end
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    /// Malformed argument (strides, formats, counts, alignment)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device is not on the list of devices with known RTAS formats
    #[error("unsupported device: vendor {vendor_id:#06x}, device {device_id:#06x}")]
    UnsupportedDevice { vendor_id: u32, device_id: u32 },

    /// The vendor back-end is already bound for the other API revision
    #[error("api revision mismatch: {active:?} is active, {requested:?} requested")]
    ApiRevisionMismatch {
        active: ApiRevision,
        requested: ApiRevision,
    },

    /// Two acceleration structure formats cannot be mixed
    #[error("incompatible rtas formats: {0:?} and {1:?}")]
    IncompatibleFormats(RtasFormat, RtasFormat),

    /// Destination buffer is smaller than the build requires
    #[error("buffer too small: {required} bytes required, {actual} provided")]
    BufferTooSmall { required: usize, actual: usize },

    /// Back-end failure during a build or join, passed through as-is
    #[error("build failed: {0}")]
    Build(String),

    /// Entry point not provided by the active back-end
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid argument error from a string.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a build failure from a string.
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    /// True for the one condition callers answer by switching back-ends.
    #[inline]
    pub fn is_dependency_unavailable(&self) -> bool {
        matches!(self, Self::DependencyUnavailable(_))
    }

    /// A clone-able copy of this error for fan-out to several joiners.
    ///
    /// `Io` and `Json` are flattened into `Build` since their sources are not `Clone`.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Initialization(s) => Self::Initialization(s.clone()),
            Self::ModuleNotFound(s) => Self::ModuleNotFound(s.clone()),
            Self::SymbolNotFound(s) => Self::SymbolNotFound(s.clone()),
            Self::NotInitialized => Self::NotInitialized,
            Self::DependencyUnavailable(s) => Self::DependencyUnavailable(s.clone()),
            Self::InternalBuilderDisabled => Self::InternalBuilderDisabled,
            Self::InvalidNullHandle(s) => Self::InvalidNullHandle(s),
            Self::InvalidHandle(s) => Self::InvalidHandle(s),
            Self::InvalidArgument(s) => Self::InvalidArgument(s.clone()),
            Self::UnsupportedDevice { vendor_id, device_id } => Self::UnsupportedDevice {
                vendor_id: *vendor_id,
                device_id: *device_id,
            },
            Self::ApiRevisionMismatch { active, requested } => Self::ApiRevisionMismatch {
                active: *active,
                requested: *requested,
            },
            Self::IncompatibleFormats(a, b) => Self::IncompatibleFormats(*a, *b),
            Self::BufferTooSmall { required, actual } => Self::BufferTooSmall {
                required: *required,
                actual: *actual,
            },
            Self::Build(s) => Self::Build(s.clone()),
            Self::Unsupported(s) => Self::Unsupported(s),
            Self::Io(e) => Self::Build(e.to_string()),
            Self::Json(e) => Self::Build(e.to_string()),
        }
    }
}

/// Result type alias for RTAS operations.
pub type Result<T> = std::result::Result<T, Error>;
