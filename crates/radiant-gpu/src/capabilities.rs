//! Device identity and capability records.

use std::fmt;

use ash::vk;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Synthetic device identifier.
///
/// Not the UUID the driver reports: the layout packs the PCI vendor id, the
/// enumeration index and the PCI device id so a device can be re-found in a
/// later session by indexing straight into the enumeration order. Byte 6
/// carries UUID version 8 ("vendor specific") and byte 8 an intentionally
/// invalid variant marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceUuid(pub [u8; vk::UUID_SIZE]);

const UUID_VENDOR_OFFSET: usize = 0;
const UUID_INDEX_OFFSET: usize = 4;
const UUID_DEVICE_OFFSET: usize = 10;

impl DeviceUuid {
    pub fn new(properties: &vk::PhysicalDeviceProperties, index: u16) -> Self {
        let mut bytes = [0u8; vk::UUID_SIZE];
        bytes[6] = 0x80;
        bytes[8] = 0xF0;
        bytes[UUID_VENDOR_OFFSET..UUID_VENDOR_OFFSET + 4]
            .copy_from_slice(&properties.vendor_id.to_le_bytes());
        // device id alone is not unique on multi-gpu systems, the index is
        // what disambiguates
        bytes[UUID_INDEX_OFFSET..UUID_INDEX_OFFSET + 2].copy_from_slice(&index.to_le_bytes());
        bytes[UUID_DEVICE_OFFSET..UUID_DEVICE_OFFSET + 4]
            .copy_from_slice(&properties.device_id.to_le_bytes());
        Self(bytes)
    }

    /// Enumeration index embedded at creation time.
    pub fn index(&self) -> u16 {
        u16::from_le_bytes([self.0[UUID_INDEX_OFFSET], self.0[UUID_INDEX_OFFSET + 1]])
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Global allocation caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalLimits {
    pub max_allocation_size: vk::DeviceSize,
    pub max_memory_allocation_count: u32,
    pub max_sampler_allocation_count: u32,
}

/// Per-descriptor resource caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerDescriptorLimits {
    pub max_image_dimension_1d: u32,
    pub max_image_dimension_2d: u32,
    pub max_image_dimension_3d: u32,
    pub max_image_dimension_cube: u32,
    pub max_image_array_layers: u32,
    pub max_sampler_anisotropy: f32,
    pub max_uniform_buffer_range: u32,
    pub max_storage_buffer_range: u32,
}

/// Per-shader-stage resource caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerStageLimits {
    pub max_samplers: u32,
    pub max_sampled_images: u32,
    pub max_combined_image_samplers: u32,
    pub max_storage_images: u32,
    pub max_uniform_buffers: u32,
    pub max_storage_buffers: u32,
    pub max_resources: u32,
}

/// Per-pipeline resource caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerPipelineLimits {
    pub max_samplers: u32,
    pub max_sampled_images: u32,
    pub max_combined_image_samplers: u32,
    pub max_storage_images: u32,
    pub max_uniform_buffers: u32,
    pub max_storage_buffers: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_push_constants_size: u32,
}

/// Compute dispatch and workgroup caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeLimits {
    pub max_dispatch_count: [u32; 3],
    pub max_workgroup_size: [u32; 3],
    pub max_workgroup_invocations: u32,
    pub max_workgroup_subgroups: u32,
    pub min_subgroup_size: u32,
    pub max_subgroup_size: u32,
}

/// Cached device limits, regrouped by how callers budget against them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceLimits {
    pub min_line_width: f32,
    pub max_line_width: f32,
    pub min_point_size: f32,
    pub max_point_size: f32,
    pub global: GlobalLimits,
    pub per_descriptor: PerDescriptorLimits,
    pub per_stage: PerStageLimits,
    pub per_pipeline: PerPipelineLimits,
    pub compute: ComputeLimits,
}

/// Cached properties of a logical device's physical device.
#[derive(Debug, Clone)]
pub struct DeviceProperties {
    pub uuid: DeviceUuid,
    pub vendor: GpuVendor,
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: u32,
    pub api_version: u32,
    pub subgroup_size: u32,
    pub limits: DeviceLimits,
}

impl DeviceProperties {
    /// Query and cache the property set this layer exposes.
    ///
    /// # Safety
    /// The instance and physical device must be valid, and `index` must be
    /// the device's position in the instance's enumeration order.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        index: u16,
    ) -> Self {
        let mut props11 = vk::PhysicalDeviceVulkan11Properties::default();
        let mut props12 = vk::PhysicalDeviceVulkan12Properties::default();
        let mut props13 = vk::PhysicalDeviceVulkan13Properties::default();
        let mut props2 = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut props11)
            .push_next(&mut props12)
            .push_next(&mut props13);
        instance.get_physical_device_properties2(physical_device, &mut props2);

        let props10 = props2.properties;
        let limits10 = props10.limits;

        let limits = DeviceLimits {
            min_line_width: limits10.line_width_range[0],
            max_line_width: limits10.line_width_range[1],
            min_point_size: limits10.point_size_range[0],
            max_point_size: limits10.point_size_range[1],
            global: GlobalLimits {
                max_allocation_size: props11.max_memory_allocation_size,
                max_memory_allocation_count: limits10.max_memory_allocation_count,
                max_sampler_allocation_count: limits10.max_sampler_allocation_count,
            },
            per_descriptor: PerDescriptorLimits {
                max_image_dimension_1d: limits10.max_image_dimension1_d,
                max_image_dimension_2d: limits10.max_image_dimension2_d,
                max_image_dimension_3d: limits10.max_image_dimension3_d,
                max_image_dimension_cube: limits10.max_image_dimension_cube,
                max_image_array_layers: limits10.max_image_array_layers,
                max_sampler_anisotropy: limits10.max_sampler_anisotropy,
                max_uniform_buffer_range: limits10.max_uniform_buffer_range,
                max_storage_buffer_range: limits10.max_storage_buffer_range,
            },
            per_stage: PerStageLimits {
                max_samplers: limits10.max_per_stage_descriptor_samplers,
                max_sampled_images: limits10.max_per_stage_descriptor_sampled_images,
                max_combined_image_samplers: limits10
                    .max_per_stage_descriptor_samplers
                    .min(limits10.max_per_stage_descriptor_sampled_images),
                max_storage_images: limits10.max_per_stage_descriptor_storage_images,
                max_uniform_buffers: limits10.max_per_stage_descriptor_uniform_buffers,
                max_storage_buffers: limits10.max_per_stage_descriptor_storage_buffers,
                max_resources: limits10.max_per_stage_resources,
            },
            per_pipeline: PerPipelineLimits {
                max_samplers: limits10.max_descriptor_set_samplers,
                max_sampled_images: limits10.max_descriptor_set_sampled_images,
                max_combined_image_samplers: limits10
                    .max_descriptor_set_samplers
                    .min(limits10.max_descriptor_set_sampled_images),
                max_storage_images: limits10.max_descriptor_set_storage_images,
                max_uniform_buffers: limits10.max_descriptor_set_uniform_buffers,
                max_storage_buffers: limits10.max_descriptor_set_storage_buffers,
                max_bound_descriptor_sets: limits10.max_bound_descriptor_sets,
                max_push_constants_size: limits10.max_push_constants_size,
            },
            compute: ComputeLimits {
                max_dispatch_count: limits10.max_compute_work_group_count,
                max_workgroup_size: limits10.max_compute_work_group_size,
                max_workgroup_invocations: limits10.max_compute_work_group_invocations,
                max_workgroup_subgroups: props13.max_compute_workgroup_subgroups,
                min_subgroup_size: props13.min_subgroup_size,
                max_subgroup_size: props13.max_subgroup_size,
            },
        };

        Self {
            uuid: DeviceUuid::new(&props10, index),
            vendor: GpuVendor::from_vendor_id(props10.vendor_id),
            vendor_id: props10.vendor_id,
            device_id: props10.device_id,
            driver_version: props10.driver_version,
            api_version: props10.api_version,
            subgroup_size: props11.subgroup_size,
            limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn uuid_layout() {
        let properties = vk::PhysicalDeviceProperties {
            vendor_id: 0x10DE,
            device_id: 0x1B80,
            ..Default::default()
        };
        let uuid = DeviceUuid::new(&properties, 3);
        assert_eq!(
            uuid.0,
            [
                0xDE, 0x10, 0x00, 0x00, 0x03, 0x00, 0x80, 0x00, //
                0xF0, 0x00, 0x80, 0x1B, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn uuid_index_round_trip() {
        let properties = vk::PhysicalDeviceProperties::default();
        for index in [0u16, 1, 3, 0x1234, u16::MAX] {
            assert_eq!(DeviceUuid::new(&properties, index).index(), index);
        }
    }

    #[test]
    fn uuid_display_grouping() {
        let properties = vk::PhysicalDeviceProperties {
            vendor_id: 0x10DE,
            device_id: 0x1B80,
            ..Default::default()
        };
        let uuid = DeviceUuid::new(&properties, 3);
        assert_eq!(uuid.to_string(), "DE100000-0300-8000-F000-801B00000000");
    }
}
