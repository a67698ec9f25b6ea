//! Swapchain lifecycle: format and present-mode negotiation, resize,
//! acquire/present, and the `EXT_swapchain_maintenance1` fast paths.

use std::fmt::Write as _;
use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::{fatal, fatal_vk, Error, Result};
use crate::sync::WAIT_TIMEOUT_NS;

/// Swapchain construction parameters. Empty preference lists fall back to
/// sRGB 8-bit formats and `FIFO_RELAXED`.
#[derive(Debug, Clone, Default)]
pub struct SwapchainCreateInfo {
    pub surface: vk::SurfaceKHR,
    /// Usage every image must support; `COLOR_ATTACHMENT` is always added.
    pub required_usage: vk::ImageUsageFlags,
    pub preferred_image_count: u32,
    pub preferred_formats: Vec<vk::SurfaceFormatKHR>,
    pub preferred_present_modes: Vec<vk::PresentModeKHR>,
    pub extent: vk::Extent2D,
}

/// The image handed out by a successful acquire.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Format, extent and image count of the current present chain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainProperties {
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

struct ImageResources {
    image: vk::Image,
    view: vk::ImageView,
    /// Signalled by the submit that renders to this image, waited by present.
    release_semaphore: vk::Semaphore,
    /// Present fence (maintenance1 only), null otherwise.
    present_fence: vk::Fence,
}

pub struct Swapchain {
    device: Arc<Device>,
    name: String,

    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    compatible_present_modes: Vec<vk::PresentModeKHR>,
    capabilities: vk::SurfaceCapabilitiesKHR,
    extent: vk::Extent2D,

    required_usage: vk::ImageUsageFlags,
    preferred_image_count: u32,
    preferred_formats: Vec<vk::SurfaceFormatKHR>,
    preferred_present_modes: Vec<vk::PresentModeKHR>,

    /// Present-mode switch consumed by the next present (maintenance1 fast
    /// path, no recreation).
    pending_present_mode: Option<vk::PresentModeKHR>,

    images: Vec<ImageResources>,
    /// `Some` between a successful acquire and its present.
    image_index: Option<u32>,
}

impl Swapchain {
    /// Creates the swapchain, running the full present-mode, capability and
    /// format negotiation for the initial extent.
    pub fn new(device: &Arc<Device>, name: &str, info: SwapchainCreateInfo) -> Result<Self> {
        let name = if name.is_empty() {
            format!("swapchain_{:?}", info.surface)
        } else {
            format!("{name}_swapchain")
        };

        let mut preferred_formats = info.preferred_formats;
        if preferred_formats.is_empty() {
            preferred_formats = vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ];
        }

        let mut swapchain = Self {
            device: device.clone(),
            name,
            surface: info.surface,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            compatible_present_modes: Vec::new(),
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            extent: vk::Extent2D::default(),
            required_usage: info.required_usage | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            preferred_image_count: info.preferred_image_count,
            preferred_formats,
            preferred_present_modes: Vec::new(),
            pending_present_mode: None,
            images: Vec::new(),
            image_index: None,
        };
        swapchain.change_present_mode(&info.preferred_present_modes, info.extent)?;
        Ok(swapchain)
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn properties(&self) -> SwapchainProperties {
        SwapchainProperties {
            surface_format: self.surface_format,
            extent: self.extent,
            image_count: self.images.len() as u32,
        }
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Whether an acquire is pending its present.
    pub fn is_acquired(&self) -> bool {
        self.image_index.is_some()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the next image, signalling `semaphore` once it is usable.
    ///
    /// `OUT_OF_DATE` and `SURFACE_LOST` leave the swapchain idle and return
    /// no image; the caller reacts by resizing or recreating the surface.
    /// Calling this again before presenting the previous acquire is caller
    /// error.
    pub fn acquire(&mut self, semaphore: vk::Semaphore) -> (vk::Result, Option<AcquiredImage>) {
        if self.image_index.is_some() {
            fatal("Cannot acquire swapchain before presenting the previous acquire");
        }
        match unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                WAIT_TIMEOUT_NS,
                semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((index, suboptimal)) => {
                self.image_index = Some(index);
                let image = &self.images[index as usize];
                let acquired = AcquiredImage {
                    index,
                    image: image.image,
                    view: image.view,
                };
                let ret = if suboptimal {
                    vk::Result::SUBOPTIMAL_KHR
                } else {
                    vk::Result::SUCCESS
                };
                (ret, Some(acquired))
            }
            Err(ret @ (vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR)) => {
                (ret, None)
            }
            Err(ret) => fatal_vk("Failed to acquire image", ret),
        }
    }

    /// Release semaphore of the acquired image; the submit that renders to
    /// the image must signal it.
    pub(crate) fn release_semaphore(&self) -> vk::Semaphore {
        let Some(index) = self.image_index else {
            fatal("Cannot present swapchain before acquiring");
        };
        self.images[index as usize].release_semaphore
    }

    /// Presents the acquired image on `queue`, consuming any pending
    /// present-mode switch. Returns the driver's status; `SUBOPTIMAL`,
    /// `OUT_OF_DATE` and `SURFACE_LOST` are the caller's signal to resize.
    pub(crate) fn present(&mut self, queue: vk::Queue) -> vk::Result {
        let Some(index) = self.image_index else {
            fatal("Cannot present swapchain before acquiring");
        };
        let image = &self.images[index as usize];

        let wait_semaphores = [image.release_semaphore];
        let swapchains = [self.swapchain];
        let indices = [index];
        let mut present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let modes = self.pending_present_mode.map(|m| [m]);
        let mut mode_info;
        if let Some(modes) = &modes {
            mode_info = vk::SwapchainPresentModeInfoEXT::default().present_modes(modes);
            present_info = present_info.push_next(&mut mode_info);
        }

        let fences = [image.present_fence];
        let mut fence_info;
        if image.present_fence != vk::Fence::null() {
            unsafe {
                if let Err(ret) =
                    self.device
                        .handle()
                        .wait_for_fences(&fences, true, WAIT_TIMEOUT_NS)
                {
                    fatal_vk("Failed to wait for present fence", ret);
                }
                if let Err(ret) = self.device.handle().reset_fences(&fences) {
                    fatal_vk("Failed to reset present fence", ret);
                }
            }
            fence_info = vk::SwapchainPresentFenceInfoEXT::default().fences(&fences);
            present_info = present_info.push_next(&mut fence_info);
        }

        let ret = unsafe { self.device.swapchain_loader().queue_present(queue, &present_info) };
        self.pending_present_mode = None;
        self.image_index = None;
        match ret {
            Ok(false) => vk::Result::SUCCESS,
            Ok(true) => vk::Result::SUBOPTIMAL_KHR,
            Err(ret @ (vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR)) => {
                ret
            }
            Err(ret) => fatal_vk("Failed to present frame", ret),
        }
    }

    /// Reselects the present mode from a new preference list and applies it.
    ///
    /// When the extent also changed this is a full resize. Otherwise, if
    /// maintenance1 is active and the driver listed the new mode as
    /// compatible with the current chain, the switch is deferred to the next
    /// present with no recreation at all.
    pub fn change_present_mode(
        &mut self,
        preferred: &[vk::PresentModeKHR],
        extent: vk::Extent2D,
    ) -> Result<()> {
        let old_mode = self.present_mode;
        self.preferred_present_modes = if preferred.is_empty() {
            vec![vk::PresentModeKHR::FIFO_RELAXED]
        } else {
            preferred.to_vec()
        };
        self.find_present_mode()?;

        if self.extent != extent || self.swapchain == vk::SwapchainKHR::null() {
            return self.resize(extent);
        }
        if old_mode == self.present_mode {
            return Ok(());
        }
        if self.device.optional_features().swapchain_maintenance1
            && self.compatible_present_modes.contains(&self.present_mode)
        {
            self.pending_present_mode = Some(self.present_mode);
            return Ok(());
        }
        self.resize(extent)
    }

    /// Recreates the present chain for `extent`, reusing the old swapchain
    /// as `oldSwapchain`. Without maintenance1 this waits for device idle
    /// first; with it, the per-image present fences make teardown safe.
    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<()> {
        let maintenance1 = self.device.optional_features().swapchain_maintenance1;
        if !maintenance1 {
            let _ = self.device.wait_idle();
        }
        self.destroy_images();

        self.find_capabilities()?;
        self.find_surface_format()?;

        if !self
            .capabilities
            .supported_composite_alpha
            .contains(vk::CompositeAlphaFlagsKHR::OPAQUE)
        {
            fatal("Failed to create swapchain: VK_COMPOSITE_ALPHA_OPAQUE_BIT_KHR is unsupported");
        }
        self.extent = extent;

        {
            let mut min_image_count =
                (self.capabilities.min_image_count + 1).max(self.preferred_image_count);
            if self.capabilities.max_image_count != 0 {
                min_image_count = min_image_count.min(self.capabilities.max_image_count);
            }

            let mut present_modes_info = vk::SwapchainPresentModesCreateInfoEXT::default()
                .present_modes(&self.compatible_present_modes);
            let mut create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(min_image_count)
                .image_format(self.surface_format.format)
                .image_color_space(self.surface_format.color_space)
                .image_extent(self.extent)
                .image_array_layers(1)
                .image_usage(self.required_usage)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(self.capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(self.present_mode)
                .old_swapchain(self.swapchain);
            if maintenance1 {
                create_info = create_info.push_next(&mut present_modes_info);
            }

            let old_swapchain = self.swapchain;
            self.swapchain = surface_call("Failed to create swapchain", unsafe {
                self.device.swapchain_loader().create_swapchain(&create_info, None)
            })?;
            unsafe {
                self.device
                    .swapchain_loader()
                    .destroy_swapchain(old_swapchain, None)
            };
            self.device.set_object_name(self.swapchain, &self.name);
        }

        let images = surface_call("Failed to get swapchain images", unsafe {
            self.device.swapchain_loader().get_swapchain_images(self.swapchain)
        })?;
        for (i, &image) in images.iter().enumerate() {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = surface_call("Failed to create swapchain image view", unsafe {
                self.device.handle().create_image_view(&view_info, None)
            })?;
            self.device.set_object_name(image, &format!("{}_image_{i}", self.name));
            self.device
                .set_object_name(view, &format!("{}_imageView_{i}", self.name));

            let mut sync_pool = self.device.sync_pool().lock();
            let release_semaphore = sync_pool.acquire_binary_semaphore();
            self.device.set_object_name(
                release_semaphore,
                &format!("{}_semaphoreBinary_surfaceRelease_image_{i}", self.name),
            );
            let present_fence = if maintenance1 {
                let fence = sync_pool.acquire_fence(true);
                self.device
                    .set_object_name(fence, &format!("{}_fence_image_{i}", self.name));
                fence
            } else {
                vk::Fence::null()
            };

            self.images.push(ImageResources {
                image,
                view,
                release_semaphore,
                present_fence,
            });
        }

        Ok(())
    }

    fn find_present_mode(&mut self) -> Result<()> {
        self.present_mode = vk::PresentModeKHR::FIFO;
        let present_modes = surface_call("Failed to get surface present modes", unsafe {
            self.device
                .instance()
                .surface_loader()
                .get_physical_device_surface_present_modes(
                    self.device.physical_device(),
                    self.surface,
                )
        })?;

        let mut listing = String::from("Found surface present modes:");
        for (i, mode) in present_modes.iter().enumerate() {
            let _ = write!(listing, "\n[{i}] {mode:?}");
        }
        tracing::info!("{listing}");

        'select: for want in &self.preferred_present_modes {
            for (i, have) in present_modes.iter().enumerate() {
                if have == want {
                    tracing::info!("Selected present mode: [{i}]");
                    self.present_mode = *have;
                    break 'select;
                }
            }
        }
        Ok(())
    }

    fn find_capabilities(&mut self) -> Result<()> {
        if self.device.optional_features().swapchain_maintenance1 {
            // Capabilities can differ per present mode with maintenance1, so
            // the query names the mode and also yields the set of modes the
            // next chain can switch to without recreation.
            let mut present_mode_info =
                vk::SurfacePresentModeEXT::default().present_mode(self.present_mode);
            let surface_info = vk::PhysicalDeviceSurfaceInfo2KHR {
                p_next: std::ptr::from_mut(&mut present_mode_info).cast(),
                surface: self.surface,
                ..Default::default()
            };

            let mut compatibility = vk::SurfacePresentModeCompatibilityEXT::default();
            let mut capabilities2 = vk::SurfaceCapabilities2KHR {
                p_next: std::ptr::from_mut(&mut compatibility).cast(),
                ..Default::default()
            };
            surface_call("Failed to get surface capabilities", unsafe {
                self.device
                    .instance()
                    .surface_capabilities2_loader()
                    .get_physical_device_surface_capabilities2(
                        self.device.physical_device(),
                        &surface_info,
                        &mut capabilities2,
                    )
            })?;

            self.compatible_present_modes = vec![
                vk::PresentModeKHR::default();
                compatibility.present_mode_count as usize
            ];
            compatibility.p_present_modes = self.compatible_present_modes.as_mut_ptr();
            surface_call("Failed to get surface capabilities", unsafe {
                self.device
                    .instance()
                    .surface_capabilities2_loader()
                    .get_physical_device_surface_capabilities2(
                        self.device.physical_device(),
                        &surface_info,
                        &mut capabilities2,
                    )
            })?;

            self.capabilities = capabilities2.surface_capabilities;
        } else {
            self.capabilities = surface_call("Failed to get surface capabilities", unsafe {
                self.device
                    .instance()
                    .surface_loader()
                    .get_physical_device_surface_capabilities(
                        self.device.physical_device(),
                        self.surface,
                    )
            })?;
        }
        Ok(())
    }

    fn find_surface_format(&mut self) -> Result<()> {
        let surface_formats = surface_call("Failed to get surface formats", unsafe {
            self.device
                .instance()
                .surface_loader()
                .get_physical_device_surface_formats(self.device.physical_device(), self.surface)
        })?;

        let mut listing = String::from("Found surface formats:");
        for (i, surface_format) in surface_formats.iter().enumerate() {
            let _ = write!(
                listing,
                "\n[{i}] {:?}, {:?}",
                surface_format.format, surface_format.color_space
            );
        }
        tracing::info!("{listing}");

        for want in &self.preferred_formats {
            for (i, have) in surface_formats.iter().enumerate() {
                if have.format != want.format || have.color_space != want.color_space {
                    continue;
                }
                if !self.format_supports_usage(have.format) {
                    continue;
                }
                if !self
                    .capabilities
                    .supported_usage_flags
                    .contains(self.required_usage)
                {
                    continue;
                }
                tracing::info!("Selected format: [{i}]");
                self.surface_format = *have;
                return Ok(());
            }
        }

        tracing::error!(
            "No known surface formats with required usage {:?} found",
            self.required_usage
        );
        Err(Error::FormatNotSupported)
    }

    fn format_supports_usage(&self, format: vk::Format) -> bool {
        let mut properties3 = vk::FormatProperties3::default();
        let mut properties2 = vk::FormatProperties2::default().push_next(&mut properties3);
        unsafe {
            self.device
                .instance()
                .handle()
                .get_physical_device_format_properties2(
                    self.device.physical_device(),
                    format,
                    &mut properties2,
                )
        };
        properties3
            .optimal_tiling_features
            .contains(usage_to_format_features(self.required_usage))
    }

    fn destroy_images(&mut self) {
        let device = self.device.clone();
        for image in self.images.drain(..) {
            if image.present_fence != vk::Fence::null() {
                let fences = [image.present_fence];
                if let Err(ret) =
                    unsafe { device.handle().wait_for_fences(&fences, true, WAIT_TIMEOUT_NS) }
                {
                    fatal_vk("Failed to wait on swapchain image", ret);
                }
                let mut sync_pool = device.sync_pool().lock();
                sync_pool.release_fence(image.present_fence);
                sync_pool.release_binary_semaphore(image.release_semaphore);
            } else {
                // Without a present fence there is no way to know when the
                // semaphore's last wait retired; the device was idled, so a
                // plain destroy is the safe option over repooling.
                unsafe { device.handle().destroy_semaphore(image.release_semaphore, None) };
            }
            unsafe { device.handle().destroy_image_view(image.view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if !self.device.optional_features().swapchain_maintenance1 {
            let _ = self.device.wait_idle();
        }
        self.destroy_images();
        unsafe {
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.swapchain, None)
        };
    }
}

/// Maps image usage onto the format-feature bits a format must advertise for
/// optimal tiling to support that usage.
fn usage_to_format_features(usage: vk::ImageUsageFlags) -> vk::FormatFeatureFlags2 {
    let mut features = vk::FormatFeatureFlags2::empty();
    let pairs = [
        (vk::ImageUsageFlags::TRANSFER_SRC, vk::FormatFeatureFlags2::TRANSFER_SRC),
        (vk::ImageUsageFlags::TRANSFER_DST, vk::FormatFeatureFlags2::TRANSFER_DST),
        (vk::ImageUsageFlags::SAMPLED, vk::FormatFeatureFlags2::SAMPLED_IMAGE),
        (vk::ImageUsageFlags::STORAGE, vk::FormatFeatureFlags2::STORAGE_IMAGE),
        (
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::FormatFeatureFlags2::COLOR_ATTACHMENT,
        ),
        (
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::FormatFeatureFlags2::DEPTH_STENCIL_ATTACHMENT,
        ),
        (
            vk::ImageUsageFlags::INPUT_ATTACHMENT,
            vk::FormatFeatureFlags2::COLOR_ATTACHMENT,
        ),
    ];
    for (usage_bit, feature) in pairs {
        if usage.contains(usage_bit) {
            features |= feature;
        }
    }
    features
}

/// Surface queries recover from `SURFACE_LOST` (the caller owns the surface
/// and can recreate it); every other failure is fatal.
fn surface_call<T>(what: &str, result: std::result::Result<T, vk::Result>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(Error::SurfaceLost),
        Err(ret) => fatal_vk(what, ret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_maps_to_matching_format_features() {
        let features = usage_to_format_features(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        );
        assert!(features.contains(vk::FormatFeatureFlags2::COLOR_ATTACHMENT));
        assert!(features.contains(vk::FormatFeatureFlags2::TRANSFER_DST));
        assert!(!features.contains(vk::FormatFeatureFlags2::SAMPLED_IMAGE));
    }

    #[test]
    fn storage_usage_requires_storage_feature() {
        let features = usage_to_format_features(vk::ImageUsageFlags::STORAGE);
        assert_eq!(features, vk::FormatFeatureFlags2::STORAGE_IMAGE);
    }

    #[test]
    fn surface_call_passes_values_through() {
        assert_eq!(surface_call("q", Ok::<_, vk::Result>(7)).unwrap(), 7);
        assert!(matches!(
            surface_call("q", Err::<(), _>(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(Error::SurfaceLost)
        ));
    }
}
