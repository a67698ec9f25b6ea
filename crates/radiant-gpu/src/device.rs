//! Logical device scaffolding.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::capabilities::{DeviceProperties, DeviceUuid};
use crate::error::{fatal, fatal_vk, Error, Result};
use crate::instance::Instance;
use crate::memory::DeviceAllocator;
use crate::sync::SyncObjectPool;

/// Optional capabilities resolved at device creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionalFeatures {
    /// `VK_EXT_swapchain_maintenance1` (or the KHR equivalent) is enabled.
    pub swapchain_maintenance1: bool,
}

/// Parameters for adopting a native device.
pub struct DeviceInitInfo {
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    /// Destroy the native device on drop.
    pub gain_ownership: bool,
    pub optional_features: OptionalFeatures,
}

/// A logical device and everything scoped to it: loaders, cached
/// properties, the memory allocator and the sync-object pool.
pub struct Device {
    instance: Arc<Instance>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    owned: bool,
    swapchain_loader: ash::khr::swapchain::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    properties: DeviceProperties,
    optional_features: OptionalFeatures,
    allocator: Mutex<DeviceAllocator>,
    sync_pool: Mutex<SyncObjectPool>,
}

impl Device {
    /// Builds the scaffolding around an already created native device.
    /// Normally called by the selector; callers that create their own device
    /// use this directly (or [`Device::from_raw`] for a raw handle).
    pub fn init(instance: Arc<Instance>, info: DeviceInitInfo) -> Result<Arc<Self>> {
        let index = enumeration_index(&instance, info.physical_device);
        let properties =
            unsafe { DeviceProperties::query(instance.handle(), info.physical_device, index) };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &info.device);
        let debug_utils = cfg!(debug_assertions)
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &info.device));

        let allocator = unsafe {
            DeviceAllocator::new(instance.handle(), info.device.clone(), info.physical_device)?
        };
        let sync_pool = SyncObjectPool::new(info.device.clone());

        Ok(Arc::new(Self {
            instance,
            physical_device: info.physical_device,
            device: info.device,
            owned: info.gain_ownership,
            swapchain_loader,
            debug_utils,
            properties,
            optional_features: info.optional_features,
            allocator: Mutex::new(allocator),
            sync_pool: Mutex::new(sync_pool),
        }))
    }

    /// Adopts a raw `VkDevice` handle.
    ///
    /// # Safety
    /// `device` must be a live device created from `physical_device` on this
    /// instance, with the baseline features (timeline semaphores,
    /// synchronization2, buffer device address) enabled.
    pub unsafe fn from_raw(
        instance: Arc<Instance>,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
        gain_ownership: bool,
        optional_features: OptionalFeatures,
    ) -> Result<Arc<Self>> {
        let device = ash::Device::load(instance.handle().fp_v1_0(), device);
        Self::init(
            instance,
            DeviceInitInfo {
                physical_device,
                device,
                gain_ownership,
                optional_features,
            },
        )
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub fn optional_features(&self) -> OptionalFeatures {
        self.optional_features
    }

    pub fn allocator(&self) -> &Mutex<DeviceAllocator> {
        &self.allocator
    }

    pub fn sync_pool(&self) -> &Mutex<SyncObjectPool> {
        &self.sync_pool
    }

    pub(crate) fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Blocks until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Attaches a debug name to a Vulkan object. No-op in release builds.
    pub(crate) fn set_object_name<T: vk::Handle + Copy>(&self, object: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name);
        if let Err(ret) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            tracing::error!("Failed to set object name: {ret:?}");
        }
    }

    pub(crate) fn queue_label_begin(&self, queue: vk::Queue, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { debug_utils.queue_begin_debug_utils_label(queue, &label) };
    }

    pub(crate) fn queue_label_end(&self, queue: vk::Queue) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.queue_end_debug_utils_label(queue) };
        }
    }

    pub(crate) fn cmd_label_begin(&self, command_buffer: vk::CommandBuffer, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(command_buffer, &label) };
    }

    pub(crate) fn cmd_label_end(&self, command_buffer: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(command_buffer) };
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.allocator.lock().shutdown();
        self.sync_pool.lock().clear();
        if self.owned {
            unsafe { self.device.destroy_device(None) };
        }
    }
}

/// Re-finds a physical device from a synthetic UUID.
///
/// The embedded enumeration index short-circuits the search; the UUID is
/// regenerated at that index and compared to reject stale identifiers from a
/// different device topology.
pub fn physical_device_from_uuid(
    instance: &Instance,
    uuid: &DeviceUuid,
) -> Result<vk::PhysicalDevice> {
    let devices = unsafe { instance.handle().enumerate_physical_devices()? };
    let index = uuid.index() as usize;
    if let Some(&device) = devices.get(index) {
        let properties = unsafe { instance.handle().get_physical_device_properties(device) };
        if DeviceUuid::new(&properties, uuid.index()) == *uuid {
            return Ok(device);
        }
    }
    tracing::error!("Failed to find device with UUID: {uuid}");
    Err(Error::Vulkan(vk::Result::ERROR_DEVICE_LOST))
}

/// Position of `physical_device` in the instance's enumeration order.
fn enumeration_index(instance: &Instance, physical_device: vk::PhysicalDevice) -> u16 {
    let devices = match unsafe { instance.handle().enumerate_physical_devices() } {
        Ok(devices) => devices,
        Err(ret) => fatal_vk("Failed to get list of GPU devices", ret),
    };
    if devices.len() >= u16::MAX as usize {
        fatal("Number of Vulkan devices overflows u16, this should never happen");
    }
    match devices.iter().position(|&d| d == physical_device) {
        Some(index) => index as u16,
        None => fatal("VkPhysicalDevice was either lost or not created from the same VkInstance"),
    }
}
