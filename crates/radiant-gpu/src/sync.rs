//! Synchronization primitives: the per-device sync-object pool and timeline
//! semaphore helpers.

use ash::vk;

use crate::error::fatal_vk;

/// How long any host-side wait may block before the layer gives up and
/// aborts. A frame that takes longer than a second to signal is considered a
/// hang.
pub const WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

/// Free-lists of reusable binary semaphores and fences.
///
/// Handles are created lazily, recycled LIFO and only destroyed by
/// [`SyncObjectPool::clear`] during device teardown.
pub struct SyncObjectPool {
    device: ash::Device,
    free_semaphores: Vec<vk::Semaphore>,
    free_fences: Vec<vk::Fence>,
}

impl SyncObjectPool {
    pub(crate) fn new(device: ash::Device) -> Self {
        Self {
            device,
            free_semaphores: Vec::new(),
            free_fences: Vec::new(),
        }
    }

    /// Pops a pooled binary semaphore or creates a fresh one.
    pub fn acquire_binary_semaphore(&mut self) -> vk::Semaphore {
        if let Some(semaphore) = self.free_semaphores.pop() {
            return semaphore;
        }
        let create_info = vk::SemaphoreCreateInfo::default();
        match unsafe { self.device.create_semaphore(&create_info, None) } {
            Ok(semaphore) => semaphore,
            Err(ret) => fatal_vk("Failed to create semaphore", ret),
        }
    }

    /// Returns a binary semaphore to the pool. The semaphore must be
    /// unsignalled or have its pending wait already consumed.
    pub fn release_binary_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.free_semaphores.push(semaphore);
    }

    /// Pops a pooled fence or creates one with the requested initial state.
    /// Pooled fences are always signalled, so an unsignalled request resets.
    pub fn acquire_fence(&mut self, signalled: bool) -> vk::Fence {
        if let Some(fence) = self.free_fences.pop() {
            if !signalled {
                if let Err(ret) = unsafe { self.device.reset_fences(&[fence]) } {
                    fatal_vk("Failed to reset fence", ret);
                }
            }
            return fence;
        }
        let mut create_info = vk::FenceCreateInfo::default();
        if signalled {
            create_info = create_info.flags(vk::FenceCreateFlags::SIGNALED);
        }
        match unsafe { self.device.create_fence(&create_info, None) } {
            Ok(fence) => fence,
            Err(ret) => fatal_vk("Failed to create fence", ret),
        }
    }

    /// Returns a fence to the pool. The fence must already be signalled; a
    /// zero-timeout wait asserts that.
    pub fn release_fence(&mut self, fence: vk::Fence) {
        if let Err(ret) = unsafe { self.device.wait_for_fences(&[fence], true, 0) } {
            fatal_vk("Cannot release unsignalled fence", ret);
        }
        self.free_fences.push(fence);
    }

    /// Destroys every pooled handle.
    pub(crate) fn clear(&mut self) {
        unsafe {
            for semaphore in self.free_semaphores.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for fence in self.free_fences.drain(..) {
                self.device.destroy_fence(fence, None);
            }
        }
    }
}

/// Creates a timeline semaphore starting at `initial_value`.
pub fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> vk::Semaphore {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    match unsafe { device.create_semaphore(&create_info, None) } {
        Ok(semaphore) => semaphore,
        Err(ret) => fatal_vk("Failed to create timeline semaphore", ret),
    }
}

/// Blocks until the timeline reaches `value`. Timeout expiry is fatal.
pub fn timeline_wait(device: &ash::Device, semaphore: vk::Semaphore, value: u64) {
    let semaphores = [semaphore];
    let values = [value];
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);
    if let Err(ret) = unsafe { device.wait_semaphores(&wait_info, WAIT_TIMEOUT_NS) } {
        fatal_vk("Failed waiting on timeline semaphore", ret);
    }
}

/// Signals the timeline from the host.
pub fn timeline_signal(device: &ash::Device, semaphore: vk::Semaphore, value: u64) {
    let signal_info = vk::SemaphoreSignalInfo::default()
        .semaphore(semaphore)
        .value(value);
    if let Err(ret) = unsafe { device.signal_semaphore(&signal_info) } {
        fatal_vk("Failed to signal timeline semaphore", ret);
    }
}

/// Reads the timeline's current value.
pub fn timeline_value(device: &ash::Device, semaphore: vk::Semaphore) -> u64 {
    match unsafe { device.get_semaphore_counter_value(semaphore) } {
        Ok(value) => value,
        Err(ret) => fatal_vk("Failed to read timeline semaphore", ret),
    }
}
