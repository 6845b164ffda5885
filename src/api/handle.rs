//! Opaque handles passed across the driver boundary.
//!
//! A handle is a non-zero 64-bit token. Zero is the null handle; forwarding a
//! null handle where one is required fails before any back-end is touched.

use crate::util::{Error, Result};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            /// The handle itself, or [`Error::InvalidNullHandle`].
            #[inline]
            pub fn non_null(self) -> Result<Self> {
                if self.is_null() {
                    Err(Error::InvalidNullHandle($what))
                } else {
                    Ok(self)
                }
            }
        }
    };
}

handle!(
    /// Driver instance.
    DriverHandle,
    "driver"
);
handle!(
    /// Device owned by a driver.
    DeviceHandle,
    "device"
);
handle!(
    /// Context memory is allocated in.
    ContextHandle,
    "context"
);
handle!(
    /// Builder object of the active back-end.
    BuilderHandle,
    "builder"
);
handle!(
    /// In-flight build that worker threads join.
    ParallelOperationHandle,
    "parallel operation"
);
handle!(CommandListHandle, "command list");
handle!(CommandQueueHandle, "command queue");
