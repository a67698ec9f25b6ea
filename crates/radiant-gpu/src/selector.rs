//! Declarative physical-device selection.
//!
//! A [`DeviceSelector`] accumulates requirements (extensions, features,
//! format capabilities, presentation targets, queues), then walks the
//! physical devices in preference order and creates a logical device from the
//! first one that satisfies everything. Every rejected device keeps a
//! human-readable reason so "no compatible device" is diagnosable.

use std::cmp::Ordering;
use std::ffi::{CStr, CString};
use std::fmt::Write as _;
use std::sync::Arc;

use ash::vk;

use crate::capabilities::DeviceUuid;
use crate::device::{Device, DeviceInitInfo, OptionalFeatures};
use crate::error::{fatal, fatal_vk, Error, Result};
use crate::extensions::{self, ExtensionKind};
use crate::features::{self, FeatureChain, FeatureDependency};
use crate::instance::{messenger_create_info, Instance};

/// Which device class wins the sort when several are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Keep the driver's enumeration order.
    #[default]
    System,
    Integrated,
    Discrete,
}

/// Callback to exclude devices the application cannot use for reasons the
/// selector does not model (e.g. a denylist of known-bad drivers). Returning
/// `true` vetoes the device.
pub type VetoFn = Box<dyn FnMut(vk::PhysicalDevice, &DeviceUuid) -> bool>;

/// Selector construction parameters.
#[derive(Default)]
pub struct DeviceSelectorCreateInfo {
    /// Required Vulkan API version, e.g. `vk::API_VERSION_1_3`. Zero means
    /// 1.3, the minimum this layer supports.
    pub api: u32,
    pub prefer: DevicePreference,
    pub veto: Option<VetoFn>,
}

/// Per-class queue requirement as declared by the caller.
#[derive(Debug, Clone, Default)]
pub struct QueueRequest {
    pub flags: vk::DeviceQueueCreateFlags,
    /// Minimum acceptable queue count; a family with fewer queues is skipped.
    pub min: u32,
    /// Upper bound on created queues; 0 means `min`.
    pub max: u32,
    /// Per-queue priorities, `max` entries. Defaults to 1.0 everywhere.
    pub priorities: Option<Vec<f32>>,
}

/// Chosen family and queue count for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub family: u32,
    pub count: u32,
}

/// Why one physical device was rejected.
#[derive(Debug)]
pub struct RejectReason {
    pub physical_device: vk::PhysicalDevice,
    /// Newline-joined failure descriptions.
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
struct QueueRequirement {
    min: u32,
    max: u32,
    flags: vk::DeviceQueueCreateFlags,
    priorities: Vec<f32>,
    // Filled by find_queues for the device under test.
    family: u32,
    count: u32,
}

/// One enumerated device with the data the sort and the log need.
struct DeviceRecord {
    physical_device: vk::PhysicalDevice,
    uuid: DeviceUuid,
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    bar_heap_size: vk::DeviceSize,
}

pub struct DeviceSelector {
    entry: ash::Entry,
    required_api: u32,
    prefer: DevicePreference,
    veto: Option<VetoFn>,

    have_instance_extensions: Vec<CString>,
    required_instance_extensions: Vec<CString>,
    optional_instance_extensions: Vec<CString>,
    enabled_instance_extensions: Vec<CString>,

    required_device_extensions: Vec<CString>,
    optional_device_extensions: Vec<CString>,
    enabled_device_extensions: Vec<CString>,

    required_features: FeatureChain,
    optional_features: FeatureChain,
    enabled_features: FeatureChain,

    required_format_features: Vec<(vk::Format, vk::FormatFeatureFlags2)>,
    target_surfaces: Vec<vk::SurfaceKHR>,

    graphics_queue: QueueRequirement,
    compute_queue: QueueRequirement,
    transfer_queue: QueueRequirement,

    rejected: Vec<RejectReason>,
}

impl DeviceSelector {
    /// Creates a selector and seeds the baseline this layer itself depends
    /// on: timeline semaphores, synchronization2, maintenance4 and buffer
    /// device address, plus the debug-utils instance extension in debug
    /// builds.
    pub fn new(entry: &ash::Entry, info: DeviceSelectorCreateInfo) -> Self {
        let mut selector = Self {
            entry: entry.clone(),
            required_api: if info.api == 0 {
                vk::API_VERSION_1_3
            } else {
                info.api
            },
            prefer: info.prefer,
            veto: info.veto,
            have_instance_extensions: Vec::new(),
            required_instance_extensions: Vec::new(),
            optional_instance_extensions: Vec::new(),
            enabled_instance_extensions: Vec::new(),
            required_device_extensions: Vec::new(),
            optional_device_extensions: Vec::new(),
            enabled_device_extensions: Vec::new(),
            required_features: FeatureChain::new(),
            optional_features: FeatureChain::new(),
            enabled_features: FeatureChain::new(),
            required_format_features: Vec::new(),
            target_surfaces: Vec::new(),
            graphics_queue: QueueRequirement::default(),
            compute_queue: QueueRequirement::default(),
            transfer_queue: QueueRequirement::default(),
            rejected: Vec::new(),
        };

        if cfg!(debug_assertions) {
            selector.require_extension(ash::ext::debug_utils::NAME, true);
        }
        {
            let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
                .synchronization2(true)
                .maintenance4(true);
            let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
                .timeline_semaphore(true)
                .buffer_device_address(true);
            let features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features13)
                .push_next(&mut features12);
            unsafe { selector.require_feature_chain(&features, true) };
        }

        selector
    }

    /// Adds an extension and its dependencies to the required or optional
    /// set. Idempotent; an already required extension is not demoted by a
    /// later optional request. Unknown extension names are caller error.
    pub fn require_extension(&mut self, name: &CStr, required: bool) {
        let Some(info) = extensions::find(name) else {
            fatal(&format!(
                "Cannot add unknown extension: {}",
                name.to_string_lossy()
            ));
        };

        {
            let (required_list, optional_list) = match info.kind {
                ExtensionKind::Instance => (
                    &mut self.required_instance_extensions,
                    &mut self.optional_instance_extensions,
                ),
                ExtensionKind::Device => (
                    &mut self.required_device_extensions,
                    &mut self.optional_device_extensions,
                ),
            };
            let name = CString::from(info.name);
            if required {
                if !required_list.contains(&name) {
                    required_list.push(name);
                }
            } else if !required_list.contains(&name) && !optional_list.contains(&name) {
                optional_list.push(name);
            }
        }

        let (instance_list, device_list) = if required {
            (
                &mut self.required_instance_extensions,
                &mut self.required_device_extensions,
            )
        } else {
            (
                &mut self.optional_instance_extensions,
                &mut self.optional_device_extensions,
            )
        };
        instance_list.extend(info.instance_dependencies.iter().map(|&d| CString::from(d)));
        device_list.extend(info.device_dependencies.iter().map(|&d| CString::from(d)));
        sort_compact(instance_list);
        sort_compact(device_list);
    }

    /// Folds a caller-built feature chain into the requirement set. Bool
    /// fields from repeated calls OR together, so feature demands can be
    /// accumulated. Each node's provider is resolved through the catalog: a
    /// core dependency is checked against the selector's API version, a
    /// single-extension dependency is required transitively, and
    /// multi-provided structs are left for the config check to enforce.
    ///
    /// # Safety
    /// Every node reachable through `pNext` must be live and carry a tag the
    /// feature catalog knows.
    pub unsafe fn require_feature_chain(
        &mut self,
        features: &vk::PhysicalDeviceFeatures2,
        required: bool,
    ) {
        // Collected first so `self` is free for the extension calls below.
        let mut nodes = Vec::new();
        features::walk_chain(features, |node| nodes.push(node));

        for node in nodes {
            let stype = (*node).s_type;
            if stype != vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
                let ty = features::expect_type(stype);
                if let [dependency] = ty.dependencies {
                    match *dependency {
                        FeatureDependency::Core(minor) => {
                            let needed = vk::make_api_version(0, 1, minor, 0);
                            if needed > self.required_api {
                                fatal(&format!(
                                    "{} requires Vulkan 1.{} but the selector was created for 1.{}",
                                    ty.name,
                                    minor,
                                    vk::api_version_minor(self.required_api)
                                ));
                            }
                        }
                        FeatureDependency::Extension(name) => {
                            self.require_extension(name, required);
                        }
                    }
                }
            }
            if required {
                self.required_features.merge_node(node);
                self.optional_features.append((*node).s_type);
            } else {
                self.required_features.append((*node).s_type);
                self.optional_features.merge_node(node);
            }
        }
    }

    /// Requires `format` to support `features` for optimal tiling.
    pub fn require_image_format_feature(
        &mut self,
        format: vk::Format,
        features: vk::FormatFeatureFlags2,
    ) {
        self.required_format_features.push((format, features));
    }

    /// Requires at least one selected queue family to present to `surface`.
    /// Implies `VK_KHR_swapchain`.
    pub fn require_presentation_support(&mut self, surface: vk::SurfaceKHR) {
        self.target_surfaces.push(surface);
        self.require_extension(ash::khr::swapchain::NAME, true);
    }

    pub fn require_graphics_queue(&mut self, request: QueueRequest) {
        self.graphics_queue = normalize_queue_request("graphics", request);
    }

    pub fn require_compute_queue(&mut self, request: QueueRequest) {
        self.compute_queue = normalize_queue_request("compute", request);
    }

    pub fn require_transfer_queue(&mut self, request: QueueRequest) {
        self.transfer_queue = normalize_queue_request("transfer", request);
    }

    /// Scans driver-advertised instance extensions and returns the enabled
    /// list (required ∪ present optionals). Fails if a required extension is
    /// missing.
    pub fn instance_extension_list(&mut self) -> Result<&[CString]> {
        self.scan_instance_extensions()?;
        Ok(&self.enabled_instance_extensions)
    }

    fn scan_instance_extensions(&mut self) -> Result<()> {
        tracing::trace!("Finding instance extensions");
        self.enabled_instance_extensions.clear();

        if self.have_instance_extensions.is_empty() {
            let properties = match unsafe { self.entry.enumerate_instance_extension_properties(None) }
            {
                Ok(properties) => properties,
                Err(ret) => fatal_vk("Failed to get instance extension list", ret),
            };
            self.have_instance_extensions = properties
                .iter()
                .filter_map(|p| p.extension_name_as_c_str().ok())
                .map(CString::from)
                .collect();
        }

        let mut missing = Vec::new();
        for name in &self.required_instance_extensions {
            if self.have_instance_extensions.contains(name) {
                self.enabled_instance_extensions.push(name.clone());
            } else {
                missing.push(name.to_string_lossy().into_owned());
            }
        }
        for name in &self.optional_instance_extensions {
            if self.have_instance_extensions.contains(name) {
                self.enabled_instance_extensions.push(name.clone());
            }
        }
        sort_compact(&mut self.enabled_instance_extensions);

        if missing.is_empty() {
            tracing::trace!("findInstanceExtensions: Pass");
            Ok(())
        } else {
            let missing = missing.join(", ");
            tracing::error!("Failed to find required instance extensions: {missing}");
            Err(Error::ExtensionNotSupported(missing))
        }
    }

    /// Creates the instance with the enabled instance-extension list. In
    /// debug builds a debug messenger is chained into creation so even
    /// instance-creation messages are captured.
    pub fn create_instance(&mut self, app_info: &vk::ApplicationInfo) -> Result<Instance> {
        self.scan_instance_extensions()?;

        tracing::info!("Creating instance");
        for name in &self.enabled_instance_extensions {
            tracing::trace!("Enabled extension: {}", name.to_string_lossy());
        }

        let app_info = app_info.api_version(self.required_api);
        let extension_names: Vec<*const std::os::raw::c_char> = self
            .enabled_instance_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names);

        let mut messenger_info = messenger_create_info();
        if cfg!(debug_assertions) {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        Ok(unsafe { Instance::wrap(self.entry.clone(), instance, true) })
    }

    /// Runs the selection algorithm and creates the logical device from the
    /// first physical device that passes every check.
    pub fn create_device(&mut self, instance: &Arc<Instance>) -> Result<Arc<Device>> {
        tracing::info!("Finding device");
        if !self.check_config() {
            fatal("Failed device selector config checks");
        }

        let records = self.get_devices(instance);
        self.rejected.clear();
        for (index, record) in records.iter().enumerate() {
            tracing::info!("Checking device: [{index}]");
            let physical_device = record.physical_device;
            self.rejected.push(RejectReason {
                physical_device,
                reason: String::new(),
            });

            if let Some(veto) = &mut self.veto {
                if veto(physical_device, &record.uuid) {
                    append_reason(&mut self.rejected.last_mut().expect("just pushed").reason, "Vetoed");
                    continue;
                }
            }
            if !self.check_device(instance, physical_device) {
                continue;
            }
            tracing::info!("Selected device: [{index}]");
            let optional_features = self.check_optionals();

            let mut queue_infos = Vec::new();
            for requirement in [&self.graphics_queue, &self.compute_queue, &self.transfer_queue] {
                if requirement.count > 0 {
                    queue_infos.push(
                        vk::DeviceQueueCreateInfo::default()
                            .flags(requirement.flags)
                            .queue_family_index(requirement.family)
                            .queue_priorities(&requirement.priorities[..requirement.count as usize]),
                    );
                }
            }
            let extension_names: Vec<*const std::os::raw::c_char> = self
                .enabled_device_extensions
                .iter()
                .map(|name| name.as_ptr())
                .collect();
            let mut create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&extension_names);
            create_info.p_next = self.enabled_features.chain_ptr();

            let device =
                match unsafe { instance.handle().create_device(physical_device, &create_info, None) }
                {
                    Ok(device) => device,
                    Err(ret) => {
                        tracing::info!("Failed to initialize device: {ret:?}");
                        self.append_reject_reason(&format!("Failed to initialize device: {ret:?}"));
                        continue;
                    }
                };

            self.rejected.pop();
            let device = Device::init(
                instance.clone(),
                DeviceInitInfo {
                    physical_device,
                    device,
                    gain_ownership: true,
                    optional_features,
                },
            )?;

            for name in &self.enabled_device_extensions {
                tracing::trace!("Enabled extension: {}", name.to_string_lossy());
            }
            if cfg!(debug_assertions) {
                for (requirement, class) in [
                    (&self.graphics_queue, "graphics"),
                    (&self.compute_queue, "compute"),
                    (&self.transfer_queue, "transfer"),
                ] {
                    for i in 0..requirement.count {
                        let queue =
                            unsafe { device.handle().get_device_queue(requirement.family, i) };
                        device.set_object_name(queue, &format!("queue_{class}_{i}"));
                    }
                }
            }
            return Ok(device);
        }

        tracing::error!("No compatible devices found");
        Err(Error::NoCompatibleDevice)
    }

    /// Enabled instance and device extensions, in that order.
    pub fn enabled_extensions(&self) -> Vec<&CStr> {
        self.enabled_instance_extensions
            .iter()
            .chain(self.enabled_device_extensions.iter())
            .map(|name| name.as_c_str())
            .collect()
    }

    /// Overwrites the bool fields of the caller's chain with the enabled
    /// state, mirroring the chain layout handed to `require_feature_chain`.
    /// Tags never enabled read back as all-FALSE.
    ///
    /// # Safety
    /// Every node reachable through `pNext` must be live, mutable and carry
    /// a tag the feature catalog knows.
    pub unsafe fn enabled_features(&self, features: &mut vk::PhysicalDeviceFeatures2) {
        let mut node = std::ptr::from_mut(features).cast::<features::ChainNode>();
        while !node.is_null() {
            self.enabled_features.extract_node(node);
            node = (*node).p_next;
        }
    }

    pub fn graphics_queue_info(&self) -> Option<QueueInfo> {
        queue_info(&self.graphics_queue)
    }

    pub fn compute_queue_info(&self) -> Option<QueueInfo> {
        queue_info(&self.compute_queue)
    }

    pub fn transfer_queue_info(&self) -> Option<QueueInfo> {
        queue_info(&self.transfer_queue)
    }

    /// One entry per device tried, in sort order, up to and including the
    /// selected device (which is removed again on success).
    pub fn reject_reasons(&self) -> &[RejectReason] {
        &self.rejected
    }

    fn append_reject_reason(&mut self, msg: &str) {
        let entry = self.rejected.last_mut().expect("no device under test");
        append_reason(&mut entry.reason, msg);
    }

    fn check_config(&self) -> bool {
        let mut ok = true;
        if !self.check_features_config() {
            tracing::error!("checkFeatures: Fail");
            ok = false;
        }
        if !self.check_queue_config() {
            tracing::error!("checkQueueCreateInfo: Fail");
            ok = false;
        }
        ok
    }

    /// A multi-provided feature struct (one that several extensions can
    /// provide) with any field set demands that the caller also requested
    /// one of its providers; the selector cannot pick one on its own.
    fn check_features_config(&self) -> bool {
        let check_chain = |label: &str, chain: &FeatureChain, extension_list: &[CString]| -> bool {
            let mut ok = true;
            for i in 1..chain.len() {
                let (ty, node) = chain.node(i);
                let has_values =
                    (0..ty.fields.len()).any(|f| unsafe { ty.read_bool(node, f) } == vk::TRUE);
                if !has_values || ty.dependencies.len() <= 1 {
                    continue;
                }
                let provided = ty.dependencies.iter().any(|dependency| match dependency {
                    FeatureDependency::Extension(name) => {
                        extension_list.iter().any(|e| e.as_c_str() == *name)
                    }
                    FeatureDependency::Core(_) => false,
                });
                if !provided {
                    ok = false;
                    let mut msg = format!(
                        "{label} feature {} was passed but the struct is provided by multiple \
                         extensions, one of the following must be added to the {label} extension \
                         list:",
                        ty.name
                    );
                    for dependency in ty.dependencies {
                        if let FeatureDependency::Extension(name) = dependency {
                            let _ = write!(msg, "\n{}", name.to_string_lossy());
                        }
                    }
                    tracing::error!("{msg}");
                }
            }
            ok
        };

        check_chain(
            "Required",
            &self.required_features,
            &self.required_device_extensions,
        ) && check_chain(
            "Optional",
            &self.optional_features,
            &self.optional_device_extensions,
        )
    }

    fn check_queue_config(&self) -> bool {
        if self.graphics_queue.max == 0 && self.compute_queue.max == 0 && self.transfer_queue.max == 0
        {
            tracing::error!("Device selector has no queues required");
            return false;
        }
        true
    }

    fn get_devices(&self, instance: &Instance) -> Vec<DeviceRecord> {
        let devices = match unsafe { instance.handle().enumerate_physical_devices() } {
            Ok(devices) => devices,
            Err(ret) => fatal_vk("Failed to get list of GPU devices", ret),
        };
        if devices.is_empty() {
            fatal("Failed to get list of GPU devices: List is empty");
        }

        let mut records: Vec<DeviceRecord> = devices
            .iter()
            .enumerate()
            .map(|(i, &physical_device)| {
                let properties =
                    unsafe { instance.handle().get_physical_device_properties(physical_device) };
                let memory = unsafe {
                    instance
                        .handle()
                        .get_physical_device_memory_properties(physical_device)
                };
                DeviceRecord {
                    physical_device,
                    uuid: DeviceUuid::new(&properties, i as u16),
                    device_type: properties.device_type,
                    api_version: properties.api_version,
                    bar_heap_size: bar_heap_size(&memory),
                }
            })
            .collect();

        if records.len() > 1 && self.prefer != DevicePreference::System {
            let preferred = match self.prefer {
                DevicePreference::Integrated => {
                    tracing::info!("Device sort order: Integrated");
                    vk::PhysicalDeviceType::INTEGRATED_GPU
                }
                DevicePreference::Discrete => {
                    tracing::info!("Device sort order: Discrete");
                    vk::PhysicalDeviceType::DISCRETE_GPU
                }
                DevicePreference::System => unreachable!(),
            };
            records.sort_by(|a, b| device_order(a, b, preferred));
        }

        let mut listing = String::from("Detected Devices:");
        for (i, record) in records.iter().enumerate() {
            let mut driver = vk::PhysicalDeviceDriverProperties::default();
            let mut properties = vk::PhysicalDeviceProperties2::default().push_next(&mut driver);
            unsafe {
                instance
                    .handle()
                    .get_physical_device_properties2(record.physical_device, &mut properties)
            };
            let name = properties
                .properties
                .device_name_as_c_str()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            let driver_name = driver
                .driver_name_as_c_str()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            let driver_info = driver
                .driver_info_as_c_str()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            let _ = write!(
                listing,
                "\n[{i}] ({}) {name} UUID: {} BAR: {:.2} GiB VK: {}.{}.{} Driver: {driver_name} {driver_info}",
                device_type_name(record.device_type),
                record.uuid,
                record.bar_heap_size as f64 / (1u64 << 30) as f64,
                vk::api_version_major(record.api_version),
                vk::api_version_minor(record.api_version),
                vk::api_version_patch(record.api_version),
            );
        }
        tracing::info!("{listing}");

        records
    }

    fn check_device(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        type Check = fn(&mut DeviceSelector, &Instance, vk::PhysicalDevice) -> bool;
        // findFeatures stays ahead of findExtensions to match the order the
        // reject reasons read in.
        static CHECKS: &[(&str, Check)] = &[
            ("findProperties", DeviceSelector::find_properties),
            ("findFeatures", DeviceSelector::find_features),
            ("findExtensions", DeviceSelector::find_extensions),
            ("findFormats", DeviceSelector::find_formats),
            ("findQueues", DeviceSelector::find_queues),
        ];

        let mut ok = true;
        for (name, check) in CHECKS {
            if check(self, instance, physical_device) {
                tracing::trace!("{name}: Pass");
            } else {
                tracing::trace!("{name}: Fail");
                self.append_reject_reason(&format!("{name}: Fail"));
                ok = false;
            }
        }
        ok
    }

    fn find_properties(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        let properties =
            unsafe { instance.handle().get_physical_device_properties(physical_device) };
        if properties.api_version < self.required_api {
            self.append_reject_reason(&format!(
                "Device API {}.{} < required API {}.{}",
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_major(self.required_api),
                vk::api_version_minor(self.required_api),
            ));
            return false;
        }
        true
    }

    fn find_features(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        if self.required_features.len() != self.optional_features.len() {
            fatal(&format!(
                "Size mismatch between required and optional feature chains: {} != {}",
                self.required_features.len(),
                self.optional_features.len()
            ));
        }

        let mut have = FeatureChain::new();
        for i in 0..self.required_features.len() {
            if self.required_features.tag(i) != self.optional_features.tag(i) {
                fatal("Required and optional feature chains must hold the same tags in order");
            }
            have.append(self.required_features.tag(i));
        }
        unsafe {
            instance
                .handle()
                .get_physical_device_features2(physical_device, have.head_mut())
        };

        self.enabled_features.reset();
        let mut ok = true;
        let mut missing = Vec::new();
        for i in 0..have.len() {
            let tag = have.tag(i);
            let (ty, have_node) = have.node(i);
            let (_, required_node) = self.required_features.node(i);
            let (_, optional_node) = self.optional_features.node(i);

            let mut enable = Vec::new();
            for field in 0..ty.fields.len() {
                let required = unsafe { ty.read_bool(required_node, field) };
                let optional = unsafe { ty.read_bool(optional_node, field) };
                let available = unsafe { ty.read_bool(have_node, field) };
                if required == vk::TRUE {
                    if available == vk::TRUE {
                        enable.push(field);
                    } else {
                        missing.push(format!(
                            "Missing required feature {}.{}",
                            ty.name, ty.fields[field]
                        ));
                        ok = false;
                    }
                } else if optional == vk::TRUE && available == vk::TRUE {
                    enable.push(field);
                }
            }
            if !enable.is_empty() {
                self.enabled_features.set_fields(tag, &enable);
            }
        }
        for msg in missing {
            self.append_reject_reason(&msg);
        }
        ok
    }

    fn find_extensions(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        let properties = match unsafe {
            instance
                .handle()
                .enumerate_device_extension_properties(physical_device)
        } {
            Ok(properties) => properties,
            Err(ret) => fatal_vk("Failed to get device extension list", ret),
        };
        let available: Vec<CString> = properties
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(CString::from)
            .collect();

        self.enabled_device_extensions.clear();
        let mut ok = true;
        let mut missing = Vec::new();
        for name in &self.required_device_extensions {
            if available.contains(name) {
                self.enabled_device_extensions.push(name.clone());
            } else {
                missing.push(format!(
                    "Failed to find required extension: {}",
                    name.to_string_lossy()
                ));
                ok = false;
            }
        }
        for name in &self.optional_device_extensions {
            if available.contains(name) {
                self.enabled_device_extensions.push(name.clone());
            }
        }
        sort_compact(&mut self.enabled_device_extensions);

        for msg in missing {
            self.append_reject_reason(&msg);
        }
        ok
    }

    fn find_formats(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        let mut ok = true;
        let required = self.required_format_features.clone();
        for (format, wanted) in required {
            let mut properties3 = vk::FormatProperties3::default();
            let mut properties2 = vk::FormatProperties2::default().push_next(&mut properties3);
            unsafe {
                instance.handle().get_physical_device_format_properties2(
                    physical_device,
                    format,
                    &mut properties2,
                )
            };
            if !properties3.optimal_tiling_features.contains(wanted) {
                self.rejected_format(format, properties3.optimal_tiling_features, wanted);
                ok = false;
            }
        }
        ok
    }

    fn rejected_format(
        &mut self,
        format: vk::Format,
        have: vk::FormatFeatureFlags2,
        want: vk::FormatFeatureFlags2,
    ) {
        self.append_reject_reason(&format!(
            "Missing required features for format: {format:?}, have: {have:?} want {want:?}"
        ));
    }

    fn find_queues(&mut self, instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
        let families = unsafe {
            instance
                .handle()
                .get_physical_device_queue_family_properties(physical_device)
        };

        // Strictly typed matching keeps the classes on distinct families
        // wherever the hardware offers them.
        if !find_queue_family(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::empty(),
            &mut self.graphics_queue,
        ) {
            let min = self.graphics_queue.min;
            self.append_reject_reason(&format!(
                "Failed to find graphics queue family with at least [{min}] queues"
            ));
            return false;
        }
        if !find_queue_family(
            &families,
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS,
            &mut self.compute_queue,
        ) {
            let min = self.compute_queue.min;
            self.append_reject_reason(&format!(
                "Failed to find compute queue family with at least [{min}] queues"
            ));
            return false;
        }
        if !find_queue_family(
            &families,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            &mut self.transfer_queue,
        ) {
            let min = self.transfer_queue.min;
            self.append_reject_reason(&format!(
                "Failed to find transfer queue family with at least [{min}] queues"
            ));
            return false;
        }

        let chosen_families: Vec<u32> = [&self.graphics_queue, &self.compute_queue, &self.transfer_queue]
            .iter()
            .filter(|r| r.count > 0)
            .map(|r| r.family)
            .collect();
        let surfaces = self.target_surfaces.clone();
        let mut ok = true;
        for surface in surfaces {
            let mut supported = false;
            for &family in &chosen_families {
                match unsafe {
                    instance.surface_loader().get_physical_device_surface_support(
                        physical_device,
                        family,
                        surface,
                    )
                } {
                    Ok(support) => {
                        if support {
                            supported = true;
                            break;
                        }
                    }
                    Err(ret) => {
                        self.append_reject_reason(&format!(
                            "Failed to query presentation support: {ret:?}"
                        ));
                        return false;
                    }
                }
            }
            if !supported {
                ok = false;
                self.append_reject_reason(&format!("Unable to present to surface: {surface:?}"));
            }
        }
        ok
    }

    /// After a successful enable, resolves optional capabilities from the
    /// enabled extension set.
    fn check_optionals(&self) -> OptionalFeatures {
        let maintenance1 = [
            ash::ext::swapchain_maintenance1::NAME,
            c"VK_KHR_swapchain_maintenance1",
        ]
        .iter()
        .any(|&want| {
            self.enabled_device_extensions
                .iter()
                .any(|e| e.as_c_str() == want)
        });
        if maintenance1 {
            tracing::trace!("Optional feature swapchain_maintenance1: Enabled");
        }
        OptionalFeatures {
            swapchain_maintenance1: maintenance1,
        }
    }
}

fn queue_info(requirement: &QueueRequirement) -> Option<QueueInfo> {
    (requirement.count > 0).then_some(QueueInfo {
        family: requirement.family,
        count: requirement.count,
    })
}

/// Validates and fills in a queue request. Bad min/max combinations are
/// caller error.
fn normalize_queue_request(class: &str, mut request: QueueRequest) -> QueueRequirement {
    if request.max == 0 {
        request.max = request.min;
    }
    if request.max < request.min {
        fatal(&format!("Cannot require {class} queue with max < min"));
    }
    if request.max == 0 && request.min == 0 {
        fatal(&format!("Cannot require {class} queue with max = min = 0"));
    }
    let priorities = match request.priorities {
        Some(priorities) => {
            if priorities.len() != request.max as usize {
                fatal(&format!(
                    "{class} queue priorities must hold max ({}) entries, got {}",
                    request.max,
                    priorities.len()
                ));
            }
            priorities
        }
        None => vec![1.0; request.max as usize],
    };
    QueueRequirement {
        min: request.min,
        max: request.max,
        flags: request.flags,
        priorities,
        family: 0,
        count: 0,
    }
}

/// First family carrying the wanted flags (and none of the unwanted ones)
/// with enough queues. The created count is the family's count clamped into
/// the requested range.
fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    want: vk::QueueFlags,
    dont_want: vk::QueueFlags,
    requirement: &mut QueueRequirement,
) -> bool {
    requirement.count = 0;
    if requirement.max == 0 {
        return true;
    }
    for (i, family) in families.iter().enumerate() {
        if family.queue_flags.contains(want)
            && !family.queue_flags.intersects(dont_want)
            && family.queue_count >= requirement.min
        {
            requirement.family = i as u32;
            requirement.count = family.queue_count.clamp(requirement.min, requirement.max);
            return true;
        }
    }
    false
}

/// Preference sort: preferred type first, then newer API, then more BAR
/// memory. Used with a stable sort so equal devices keep enumeration order.
fn device_order(a: &DeviceRecord, b: &DeviceRecord, preferred: vk::PhysicalDeviceType) -> Ordering {
    let a_preferred = a.device_type == preferred;
    let b_preferred = b.device_type == preferred;
    b_preferred
        .cmp(&a_preferred)
        .then(b.api_version.cmp(&a.api_version))
        .then(b.bar_heap_size.cmp(&a.bar_heap_size))
}

/// Largest heap reachable through a memory type that is both device-local
/// and host-visible.
fn bar_heap_size(memory: &vk::PhysicalDeviceMemoryProperties) -> vk::DeviceSize {
    let bar = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
    let mut size = 0;
    for i in 0..memory.memory_type_count as usize {
        let memory_type = memory.memory_types[i];
        if memory_type.property_flags.contains(bar) {
            size = size.max(memory.memory_heaps[memory_type.heap_index as usize].size);
        }
    }
    size
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual",
        vk::PhysicalDeviceType::CPU => "Software",
        vk::PhysicalDeviceType::OTHER => "Other",
        _ => "Unknown",
    }
}

fn append_reason(reason: &mut String, msg: &str) {
    if !reason.is_empty() {
        reason.push('\n');
    }
    reason.push_str(msg);
}

fn sort_compact(list: &mut Vec<CString>) {
    list.sort();
    list.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn queue_request_defaults() {
        let requirement = normalize_queue_request(
            "graphics",
            QueueRequest {
                min: 1,
                ..Default::default()
            },
        );
        assert_eq!(requirement.min, 1);
        assert_eq!(requirement.max, 1);
        assert_eq!(requirement.priorities, vec![1.0]);
    }

    #[test]
    #[should_panic(expected = "max < min")]
    fn queue_request_rejects_max_below_min() {
        normalize_queue_request(
            "compute",
            QueueRequest {
                min: 2,
                max: 1,
                ..Default::default()
            },
        );
    }

    #[test]
    #[should_panic(expected = "max = min = 0")]
    fn queue_request_rejects_zero_counts() {
        normalize_queue_request("transfer", QueueRequest::default());
    }

    #[test]
    fn strict_queue_matching_avoids_family_sharing() {
        // F0 graphics|compute|transfer, F1 compute|transfer, F2 transfer.
        let families = [
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            ),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let mut graphics = normalize_queue_request("graphics", QueueRequest { min: 1, max: 1, ..Default::default() });
        let mut compute = normalize_queue_request("compute", QueueRequest { min: 1, max: 1, ..Default::default() });
        let mut transfer = normalize_queue_request("transfer", QueueRequest { min: 1, max: 1, ..Default::default() });

        assert!(find_queue_family(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::empty(),
            &mut graphics,
        ));
        assert!(find_queue_family(
            &families,
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS,
            &mut compute,
        ));
        assert!(find_queue_family(
            &families,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            &mut transfer,
        ));
        assert_eq!((graphics.family, graphics.count), (0, 1));
        assert_eq!((compute.family, compute.count), (1, 1));
        assert_eq!((transfer.family, transfer.count), (2, 1));
    }

    #[test]
    fn queue_count_clamps_into_requested_range() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let mut requirement = normalize_queue_request(
            "graphics",
            QueueRequest {
                min: 1,
                max: 2,
                ..Default::default()
            },
        );
        assert!(find_queue_family(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::empty(),
            &mut requirement,
        ));
        assert_eq!(requirement.count, 2);
    }

    #[test]
    fn unconstrained_class_matches_without_a_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1)];
        let mut requirement = QueueRequirement::default();
        assert!(find_queue_family(
            &families,
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS,
            &mut requirement,
        ));
        assert_eq!(requirement.count, 0);
    }

    #[test]
    fn reject_reasons_join_with_newlines() {
        let mut reason = String::new();
        append_reason(&mut reason, "findFeatures: Fail");
        append_reason(&mut reason, "findExtensions: Fail");
        assert_eq!(reason, "findFeatures: Fail\nfindExtensions: Fail");
    }

    #[test]
    fn preference_sort_order() {
        let record = |device_type, api_version, bar_heap_size| DeviceRecord {
            physical_device: vk::PhysicalDevice::null(),
            uuid: DeviceUuid::new(&vk::PhysicalDeviceProperties::default(), 0),
            device_type,
            api_version,
            bar_heap_size,
        };
        let discrete = record(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_3, 256 << 20);
        let integrated = record(vk::PhysicalDeviceType::INTEGRATED_GPU, vk::make_api_version(0, 1, 4, 0), 1 << 30);

        assert_eq!(
            device_order(&discrete, &integrated, vk::PhysicalDeviceType::DISCRETE_GPU),
            Ordering::Less
        );
        assert_eq!(
            device_order(&discrete, &integrated, vk::PhysicalDeviceType::INTEGRATED_GPU),
            Ordering::Greater
        );

        // Same type: newer API wins, then more BAR memory.
        let old = record(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_3, 1 << 30);
        let new = record(vk::PhysicalDeviceType::DISCRETE_GPU, vk::make_api_version(0, 1, 4, 0), 256 << 20);
        assert_eq!(
            device_order(&new, &old, vk::PhysicalDeviceType::DISCRETE_GPU),
            Ordering::Less
        );
        let small = record(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_3, 256 << 20);
        assert_eq!(
            device_order(&old, &small, vk::PhysicalDeviceType::DISCRETE_GPU),
            Ordering::Less
        );
    }

    #[test]
    fn bar_heap_size_ignores_non_bar_types() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            memory_heap_count: 2,
            ..Default::default()
        };
        memory.memory_heaps[0].size = 8 << 30;
        memory.memory_heaps[1].size = 256 << 20;
        memory.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE,
            heap_index: 1,
        };
        memory.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };
        assert_eq!(bar_heap_size(&memory), 256 << 20);
    }

    #[test]
    fn sort_compact_sorts_and_deduplicates() {
        let mut list = vec![
            CString::from(c"VK_KHR_swapchain"),
            CString::from(c"VK_KHR_surface"),
            CString::from(c"VK_KHR_swapchain"),
        ];
        sort_compact(&mut list);
        assert_eq!(
            list,
            vec![
                CString::from(c"VK_KHR_surface"),
                CString::from(c"VK_KHR_swapchain"),
            ]
        );
    }
}
