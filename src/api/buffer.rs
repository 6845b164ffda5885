//! Memory allocations handed out by a driver.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::util::{Error, Result};

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Visible to host and device.
    Shared,
    /// Device local, reachable from the host only through copies.
    Device,
}

/// A driver allocation: a device-visible address plus the bytes behind it.
///
/// Clones share the same storage. The address is what ends up inside
/// acceleration structures (instance leaves point at other structures by
/// address), so it is stable for the allocation's lifetime.
#[derive(Clone)]
pub struct DeviceBuffer {
    address: u64,
    kind: MemoryKind,
    data: Arc<Mutex<Vec<u8>>>,
}

impl DeviceBuffer {
    /// Zero-filled buffer of `size` bytes at `address`.
    pub fn new(address: u64, kind: MemoryKind, size: usize) -> Self {
        Self {
            address,
            kind,
            data: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[inline]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the storage for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    /// Copy of the whole buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Overwrite `bytes.len()` bytes starting at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(bytes.len())
            .filter(|&e| e <= data.len())
            .ok_or(Error::BufferTooSmall {
                required: offset.saturating_add(bytes.len()),
                actual: data.len(),
            })?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy the first `size` bytes of `src` into this buffer.
    pub fn copy_from(&self, src: &DeviceBuffer, size: usize) -> Result<()> {
        if Arc::ptr_eq(&self.data, &src.data) {
            return Ok(());
        }
        let bytes = {
            let s = src.data.lock();
            if size > s.len() {
                return Err(Error::BufferTooSmall { required: size, actual: s.len() });
            }
            s[..size].to_vec()
        };
        self.write(0, &bytes)
    }

    /// True if both values refer to the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_copy() {
        let a = DeviceBuffer::new(0x1000, MemoryKind::Shared, 16);
        let b = DeviceBuffer::new(0x2000, MemoryKind::Device, 16);
        a.write(4, &[1, 2, 3]).unwrap();
        b.copy_from(&a, 8).unwrap();
        assert_eq!(&b.to_vec()[..8], &[0, 0, 0, 0, 1, 2, 3, 0]);
        assert_eq!(b.address(), 0x2000);
        assert!(!a.same_allocation(&b));
        assert!(a.same_allocation(&a.clone()));
    }

    #[test]
    fn test_out_of_bounds() {
        let a = DeviceBuffer::new(0x1000, MemoryKind::Shared, 4);
        assert!(matches!(
            a.write(2, &[0; 4]),
            Err(Error::BufferTooSmall { required: 6, actual: 4 })
        ));
        let b = DeviceBuffer::new(0x2000, MemoryKind::Shared, 2);
        assert!(b.copy_from(&a, 4).is_err());
    }
}
