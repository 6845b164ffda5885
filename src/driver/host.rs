//! In-process driver backed by host memory.
//!
//! Serves as the driver module when no GPU runtime is present: allocations
//! are plain byte vectors at synthetic, aligned addresses, command lists
//! record copies and run them on submission. A vendor builder can be
//! injected per API revision to stand in for the driver's own.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{rtas_device_properties_for, DriverApi, DriverLoader, INTEL_VENDOR_ID};
use crate::api::{
    ApiRevision, CommandListHandle, CommandQueueHandle, ContextHandle, DeviceBuffer,
    DeviceHandle, DeviceModuleProperties, DeviceProperties, DriverExtensionProperties,
    DriverHandle, MemoryKind, RaytracingFlags, RtasDeviceProperties, RTAS_EXTENSION_NAME,
    RTAS_EXP_EXTENSION_NAME,
};
use crate::backend::RtasBuilderApi;
use crate::util::{Error, Result};

/// First address handed out; keeps null and low pages unused.
const BASE_ADDRESS: u64 = 0x1_0000;

/// Device id of the default device, a DG2 part.
const DEFAULT_DEVICE_ID: u32 = 0x56A0;

struct CommandList {
    closed: bool,
    copies: Vec<(DeviceBuffer, DeviceBuffer, usize)>,
}

/// Host memory driver. See the module docs.
pub struct HostDriver {
    vendor_id: u32,
    device_id: u32,
    name: String,
    ray_query: bool,
    next_address: AtomicU64,
    next_handle: AtomicU64,
    allocations: Mutex<HashMap<u64, DeviceBuffer>>,
    command_lists: Mutex<HashMap<CommandListHandle, CommandList>>,
    queues: Mutex<HashSet<CommandQueueHandle>>,
    vendor_builders: RwLock<HashMap<ApiRevision, Arc<dyn RtasBuilderApi>>>,
}

impl HostDriver {
    pub fn new() -> Self {
        Self {
            vendor_id: INTEL_VENDOR_ID,
            device_id: DEFAULT_DEVICE_ID,
            name: "host".to_string(),
            ray_query: true,
            next_address: AtomicU64::new(BASE_ADDRESS),
            next_handle: AtomicU64::new(1),
            allocations: Mutex::new(HashMap::new()),
            command_lists: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashSet::new()),
            vendor_builders: RwLock::new(HashMap::new()),
        }
    }

    /// Report a different PCI vendor and device.
    pub fn with_device(mut self, vendor_id: u32, device_id: u32) -> Self {
        self.vendor_id = vendor_id;
        self.device_id = device_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Report a device without ray query support.
    pub fn without_ray_query(mut self) -> Self {
        self.ray_query = false;
        self
    }

    /// Expose `api` as the driver's own builder for `revision`.
    pub fn with_vendor_builder(self, revision: ApiRevision, api: Arc<dyn RtasBuilderApi>) -> Self {
        self.vendor_builders.write().insert(revision, api);
        self
    }

    /// Loader handing out this driver.
    pub fn loader(self: &Arc<Self>) -> impl DriverLoader {
        let driver = Arc::clone(self);
        move || -> Result<Arc<dyn DriverApi>> { Ok(driver.clone()) }
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().len()
    }

    /// Storage behind a device address, if it belongs to a live allocation.
    pub fn buffer_at(&self, address: u64) -> Option<DeviceBuffer> {
        self.allocations.lock().get(&address).cloned()
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn alloc(&self, kind: MemoryKind, size: usize, alignment: usize) -> Result<DeviceBuffer> {
        let align = alignment.max(64);
        if !align.is_power_of_two() {
            return Err(Error::invalid(format!("alignment {alignment} is not a power of two")));
        }
        let align = align as u64;
        let span = (size as u64).max(1).div_ceil(align) * align;

        // bump allocator; addresses are never reused
        let mut address = 0;
        self.next_address
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                address = cur.div_ceil(align) * align;
                Some(address + span)
            })
            .map_err(|_| Error::invalid("address space exhausted"))?;

        let buffer = DeviceBuffer::new(address, kind, size);
        self.allocations.lock().insert(address, buffer.clone());
        debug!(address = format_args!("{address:#x}"), size, ?kind, "host allocation");
        Ok(buffer)
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverApi for HostDriver {
    fn mem_alloc_shared(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer> {
        context.non_null()?;
        device.non_null()?;
        self.alloc(MemoryKind::Shared, size, alignment)
    }

    fn mem_alloc_device(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        size: usize,
        alignment: usize,
    ) -> Result<DeviceBuffer> {
        context.non_null()?;
        device.non_null()?;
        self.alloc(MemoryKind::Device, size, alignment)
    }

    fn mem_free(&self, context: ContextHandle, buffer: &DeviceBuffer) -> Result<()> {
        context.non_null()?;
        match self.allocations.lock().remove(&buffer.address()) {
            Some(_) => Ok(()),
            None => Err(Error::invalid(format!(
                "address {:#x} is not a live allocation",
                buffer.address()
            ))),
        }
    }

    fn driver_extension_properties(&self, driver: DriverHandle) -> Result<Vec<DriverExtensionProperties>> {
        driver.non_null()?;
        let builders = self.vendor_builders.read();
        let mut out = vec![DriverExtensionProperties {
            name: RTAS_EXTENSION_NAME.to_string(),
            version: 1,
        }];
        if builders.contains_key(&ApiRevision::Exp) {
            out.push(DriverExtensionProperties {
                name: RTAS_EXP_EXTENSION_NAME.to_string(),
                version: 1,
            });
        }
        Ok(out)
    }

    fn device_properties(&self, device: DeviceHandle) -> Result<DeviceProperties> {
        device.non_null()?;
        Ok(DeviceProperties {
            vendor_id: self.vendor_id,
            device_id: self.device_id,
            name: self.name.clone(),
        })
    }

    fn device_module_properties(&self, device: DeviceHandle) -> Result<DeviceModuleProperties> {
        device.non_null()?;
        let mut flags = RaytracingFlags::empty();
        flags.set(RaytracingFlags::RAY_QUERY, self.ray_query);
        Ok(DeviceModuleProperties {
            raytracing_flags: flags,
            max_bvh_levels: 2,
        })
    }

    fn rtas_device_properties(&self, device: DeviceHandle) -> Result<RtasDeviceProperties> {
        device.non_null()?;
        rtas_device_properties_for(self.vendor_id, self.device_id, false)
    }

    fn command_queue_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandQueueHandle> {
        context.non_null()?;
        device.non_null()?;
        let queue = CommandQueueHandle(self.handle());
        self.queues.lock().insert(queue);
        Ok(queue)
    }

    fn command_list_create(&self, context: ContextHandle, device: DeviceHandle) -> Result<CommandListHandle> {
        context.non_null()?;
        device.non_null()?;
        let list = CommandListHandle(self.handle());
        self.command_lists.lock().insert(
            list,
            CommandList {
                closed: false,
                copies: Vec::new(),
            },
        );
        Ok(list)
    }

    fn command_list_close(&self, list: CommandListHandle) -> Result<()> {
        list.non_null()?;
        let mut lists = self.command_lists.lock();
        let cl = lists.get_mut(&list).ok_or(Error::InvalidHandle("command list"))?;
        cl.closed = true;
        Ok(())
    }

    fn command_list_destroy(&self, list: CommandListHandle) -> Result<()> {
        list.non_null()?;
        self.command_lists
            .lock()
            .remove(&list)
            .map(|_| ())
            .ok_or(Error::InvalidHandle("command list"))
    }

    fn command_list_append_memory_copy(
        &self,
        list: CommandListHandle,
        dst: &DeviceBuffer,
        src: &DeviceBuffer,
        size: usize,
    ) -> Result<()> {
        list.non_null()?;
        if size > dst.len() || size > src.len() {
            return Err(Error::BufferTooSmall {
                required: size,
                actual: dst.len().min(src.len()),
            });
        }
        let mut lists = self.command_lists.lock();
        let cl = lists.get_mut(&list).ok_or(Error::InvalidHandle("command list"))?;
        if cl.closed {
            return Err(Error::invalid("command list is closed"));
        }
        cl.copies.push((dst.clone(), src.clone(), size));
        Ok(())
    }

    fn command_queue_execute_command_lists(
        &self,
        queue: CommandQueueHandle,
        lists: &[CommandListHandle],
    ) -> Result<()> {
        queue.non_null()?;
        if !self.queues.lock().contains(&queue) {
            return Err(Error::InvalidHandle("command queue"));
        }

        // collect under the lock, copy outside of it
        let mut work = Vec::new();
        {
            let cls = self.command_lists.lock();
            for list in lists {
                let cl = cls.get(list).ok_or(Error::InvalidHandle("command list"))?;
                if !cl.closed {
                    return Err(Error::invalid("command list submitted before close"));
                }
                work.extend(cl.copies.iter().cloned());
            }
        }
        for (dst, src, size) in &work {
            dst.copy_from(src, *size)?;
        }
        debug!(lists = lists.len(), copies = work.len(), "executed command lists");
        Ok(())
    }

    fn rtas_builder_api(&self, revision: ApiRevision) -> Result<Arc<dyn RtasBuilderApi>> {
        self.vendor_builders
            .read()
            .get(&revision)
            .cloned()
            .ok_or_else(|| Error::DependencyUnavailable(revision.extension_name().to_string()))
    }
}
