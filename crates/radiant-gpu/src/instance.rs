//! Vulkan instance ownership and driver-message forwarding.

use std::ffi::CStr;
use std::fmt::Write as _;
use std::os::raw::c_void;

use ash::vk;

/// An initialized Vulkan instance and the instance-level loaders the rest of
/// the layer needs.
///
/// Created either by [`crate::DeviceSelector::create_instance`] or, when the
/// caller brings its own `VkInstance`, through [`Instance::from_raw`]. The
/// `owned` flag decides whether drop destroys the native instance.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
    surface_capabilities2: ash::khr::get_surface_capabilities2::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    owned: bool,
}

impl Instance {
    /// Wraps an already created native instance.
    ///
    /// With `gain_ownership` set the instance is destroyed on drop.
    ///
    /// # Safety
    /// `raw` must be a live instance created from `entry`, compatible with
    /// Vulkan 1.3, and must outlive this value unless ownership is gained.
    pub unsafe fn from_raw(entry: ash::Entry, raw: vk::Instance, gain_ownership: bool) -> Self {
        let instance = ash::Instance::load(entry.static_fn(), raw);
        Self::wrap(entry, instance, gain_ownership)
    }

    pub(crate) unsafe fn wrap(entry: ash::Entry, instance: ash::Instance, owned: bool) -> Self {
        let surface = ash::khr::surface::Instance::new(&entry, &instance);
        let surface_capabilities2 =
            ash::khr::get_surface_capabilities2::Instance::new(&entry, &instance);

        let debug_utils = if cfg!(debug_assertions) {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let create_info = messenger_create_info();
            match loader.create_debug_utils_messenger(&create_info, None) {
                Ok(messenger) => Some((loader, messenger)),
                Err(ret) => {
                    tracing::error!("Failed to create debug messenger: {ret:?}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            entry,
            instance,
            surface,
            surface_capabilities2,
            debug_utils,
            owned,
        }
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn raw(&self) -> vk::Instance {
        self.instance.handle()
    }

    pub(crate) fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface
    }

    pub(crate) fn surface_capabilities2_loader(
        &self,
    ) -> &ash::khr::get_surface_capabilities2::Instance {
        &self.surface_capabilities2
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            if self.owned {
                self.instance.destroy_instance(None);
            }
        }
    }
}

/// Loads a Vulkan entry point from a caller-supplied
/// `vkGetInstanceProcAddr`, for embedders that already link the loader.
///
/// # Safety
/// `get_instance_proc_addr` must behave as the Vulkan function of that name.
pub unsafe fn entry_from_proc_addr(
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
) -> ash::Entry {
    ash::Entry::from_static_fn(ash::StaticFn {
        get_instance_proc_addr,
    })
}

/// Messenger configuration whose severity threshold follows the compile-time
/// tracing level, so release builds with a capped `STATIC_MAX_LEVEL` skip the
/// chatter at the driver side already.
pub(crate) fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    use tracing::level_filters::STATIC_MAX_LEVEL;
    use tracing::Level;

    let mut severity = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if STATIC_MAX_LEVEL >= Level::WARN {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
    }
    if STATIC_MAX_LEVEL >= Level::INFO {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    }
    if STATIC_MAX_LEVEL >= Level::TRACE {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }

    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_utils_callback))
}

/// Forwards driver messages to `tracing`, folding the structured callback
/// data (message id, queue and command-buffer labels, object names) into a
/// tag prefix.
unsafe extern "system" fn debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let data = &*p_callback_data;
    let message = if data.p_message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy().into_owned()
    };

    let mut tags = String::new();
    if message_types.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        tags.push_str("[VkGeneral]");
    }
    if message_types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        tags.push_str("[VkValidation]");
    }
    if message_types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        tags.push_str("[VkPerformance]");
    }
    if data.p_message_id_name.is_null() {
        let _ = write!(tags, "[MessageId: {}]", data.message_id_number);
    } else {
        let name = CStr::from_ptr(data.p_message_id_name).to_string_lossy();
        let _ = write!(tags, "[{}: {}]", name, data.message_id_number);
    }
    for i in 0..data.queue_label_count as usize {
        let label = *data.p_queue_labels.add(i);
        if !label.p_label_name.is_null() {
            let name = CStr::from_ptr(label.p_label_name).to_string_lossy();
            let _ = write!(tags, "[VkQueue: {name}]");
        }
    }
    for i in 0..data.cmd_buf_label_count as usize {
        let label = *data.p_cmd_buf_labels.add(i);
        if !label.p_label_name.is_null() {
            let name = CStr::from_ptr(label.p_label_name).to_string_lossy();
            let _ = write!(tags, "[VkCommandBuffer: {name}]");
        }
    }
    for i in 0..data.object_count as usize {
        let object = *data.p_objects.add(i);
        let _ = write!(tags, "[VkObj: {:?} ", object.object_type);
        if !object.p_object_name.is_null() {
            let name = CStr::from_ptr(object.p_object_name).to_string_lossy();
            let _ = write!(tags, "{name} ");
        }
        let _ = write!(tags, "{:#X}]", object.object_handle);
    }

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("{tags} {message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("{tags} {message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!("{tags} {message}");
    } else {
        tracing::trace!("{tags} {message}");
    }

    vk::FALSE
}
