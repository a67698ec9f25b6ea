//! Device memory binding.
//!
//! Wraps `gpu-allocator` and keeps the two memory-type partitions callers
//! budget against: BAR types (device-local and host-visible at once, scarce)
//! and everything else.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::error::{Error, Result};

/// Memory allocator bound to one logical device.
pub struct DeviceAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
    bar_memory_type_bits: u32,
    no_bar_memory_type_bits: u32,
}

impl DeviceAllocator {
    /// # Safety
    /// The instance, device and physical device must be valid; the device
    /// must have been created with `bufferDeviceAddress` enabled.
    pub(crate) unsafe fn new(
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| Error::AllocationFailed(e.to_string()))?;

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);
        let bar = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
        let mut bar_memory_type_bits = 0u32;
        let mut no_bar_memory_type_bits = 0u32;
        for i in 0..memory_properties.memory_type_count as usize {
            if memory_properties.memory_types[i].property_flags.contains(bar) {
                bar_memory_type_bits |= 1 << i;
            } else {
                no_bar_memory_type_bits |= 1 << i;
            }
        }

        Ok(Self {
            allocator: Some(allocator),
            device,
            bar_memory_type_bits,
            no_bar_memory_type_bits,
        })
    }

    /// Memory types that are both device-local and host-visible.
    pub fn bar_memory_type_bits(&self) -> u32 {
        self.bar_memory_type_bits
    }

    /// Memory types that are not BAR memory.
    pub fn no_bar_memory_type_bits(&self) -> u32 {
        self.no_bar_memory_type_bits
    }

    fn allocator_mut(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| Error::Other("Allocator already shut down".to_string()))
    }

    /// Creates a mapped host-visible buffer for single-frame staging use.
    pub(crate) fn create_scratch_buffer(
        &mut self,
        info: &vk::BufferCreateInfo,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation, NonNull<std::ffi::c_void>)> {
        let buffer = unsafe { self.device.create_buffer(info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator_mut()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(Error::AllocationFailed(e.to_string()));
            }
        };

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        let ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| Error::AllocationFailed("Scratch buffer is not mapped".to_string()))?;
        Ok((buffer, allocation, ptr))
    }

    /// Destroys a scratch buffer; the mapping dies with the allocation.
    pub(crate) fn free_scratch_buffer(&mut self, buffer: vk::Buffer, allocation: Allocation) {
        if let Ok(allocator) = self.allocator_mut() {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free scratch allocation: {e}");
            }
        }
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    /// Tears down the allocator, reporting leaks. Must run before the device
    /// is destroyed.
    pub(crate) fn shutdown(&mut self) {
        self.allocator = None;
    }
}

/// A single-frame staging buffer, mapped for host writes.
///
/// Valid until the next `begin` of the frame slot it was created in; the
/// owning context frees it then.
pub struct ScratchBuffer {
    pub buffer: vk::Buffer,
    pub ptr: NonNull<std::ffi::c_void>,
    pub size: vk::DeviceSize,
}

impl ScratchBuffer {
    /// View of the mapped memory.
    ///
    /// # Safety
    /// The slot that created this buffer must not have begun a new frame.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.size as usize)
    }
}
