//! Static registry of known Vulkan extensions.
//!
//! The selector only accepts extensions it knows about: each entry records
//! whether the extension is instance- or device-level, the core version it
//! was promoted to (if any), and the extensions it depends on, so that
//! requiring one extension transitively requires its dependencies.

use std::ffi::CStr;

/// Scope an extension is enabled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Instance,
    Device,
}

/// Registry entry for one extension.
#[derive(Debug)]
pub struct ExtensionInfo {
    /// Canonical extension name.
    pub name: &'static CStr,
    pub kind: ExtensionKind,
    /// Core API version the extension was promoted to, 0 if never promoted.
    pub promoted: u32,
    /// Instance extensions this extension depends on (flattened).
    pub instance_dependencies: &'static [&'static CStr],
    /// Device extensions this extension depends on (flattened).
    pub device_dependencies: &'static [&'static CStr],
}

impl ExtensionInfo {
    /// Whether the extension is part of core at the given API version.
    pub fn is_core_at(&self, version: u32) -> bool {
        self.promoted != 0 && self.promoted < version
    }
}

const KHR_SWAPCHAIN_MAINTENANCE_1: &CStr = c"VK_KHR_swapchain_maintenance1";

static REGISTRY: &[ExtensionInfo] = &[
    // Instance extensions.
    ExtensionInfo {
        name: ash::khr::surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::win32_surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::xlib_surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::xcb_surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::wayland_surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::metal_surface::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::portability_enumeration::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::debug_utils::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::get_surface_capabilities2::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::surface_maintenance1::NAME,
        kind: ExtensionKind::Instance,
        promoted: 0,
        instance_dependencies: &[
            ash::khr::get_surface_capabilities2::NAME,
            ash::khr::surface::NAME,
        ],
        device_dependencies: &[],
    },
    // Device extensions.
    ExtensionInfo {
        name: ash::khr::swapchain::NAME,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[ash::khr::surface::NAME],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::swapchain_maintenance1::NAME,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[
            ash::ext::surface_maintenance1::NAME,
            ash::khr::get_surface_capabilities2::NAME,
            ash::khr::surface::NAME,
        ],
        device_dependencies: &[ash::khr::swapchain::NAME],
    },
    ExtensionInfo {
        name: KHR_SWAPCHAIN_MAINTENANCE_1,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[
            ash::ext::surface_maintenance1::NAME,
            ash::khr::get_surface_capabilities2::NAME,
            ash::khr::surface::NAME,
        ],
        device_dependencies: &[ash::khr::swapchain::NAME],
    },
    ExtensionInfo {
        name: ash::khr::timeline_semaphore::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 2),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::synchronization2::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 3),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::dynamic_rendering::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 3),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::maintenance4::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 3),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::khr::buffer_device_address::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 2),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::descriptor_indexing::NAME,
        kind: ExtensionKind::Device,
        promoted: vk_version(1, 2),
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::memory_budget::NAME,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::mesh_shader::NAME,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
    ExtensionInfo {
        name: ash::ext::robustness2::NAME,
        kind: ExtensionKind::Device,
        promoted: 0,
        instance_dependencies: &[],
        device_dependencies: &[],
    },
];

const fn vk_version(major: u32, minor: u32) -> u32 {
    ash::vk::make_api_version(0, major, minor, 0)
}

/// Look up an extension by name. `None` means the extension is unknown to
/// the registry and cannot be required through the selector.
pub fn find(name: &CStr) -> Option<&'static ExtensionInfo> {
    REGISTRY.iter().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_extensions() {
        let swapchain = find(ash::khr::swapchain::NAME).unwrap();
        assert_eq!(swapchain.kind, ExtensionKind::Device);
        assert_eq!(swapchain.instance_dependencies, &[ash::khr::surface::NAME][..]);

        let debug = find(ash::ext::debug_utils::NAME).unwrap();
        assert_eq!(debug.kind, ExtensionKind::Instance);
    }

    #[test]
    fn lookup_unknown_extension() {
        assert!(find(c"VK_NV_made_up_extension").is_none());
    }

    #[test]
    fn promotion_is_exclusive_of_the_promoting_version() {
        let sync2 = find(ash::khr::synchronization2::NAME).unwrap();
        assert!(!sync2.is_core_at(vk_version(1, 3)));
        assert!(sync2.is_core_at(vk_version(1, 4)));
    }

    #[test]
    fn maintenance1_pulls_surface_dependencies() {
        let maint1 = find(ash::ext::swapchain_maintenance1::NAME).unwrap();
        assert!(maint1
            .instance_dependencies
            .contains(&ash::khr::get_surface_capabilities2::NAME));
        assert!(maint1.device_dependencies.contains(&ash::khr::swapchain::NAME));
    }
}
