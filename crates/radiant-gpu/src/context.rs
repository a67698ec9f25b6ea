//! Per-queue frame execution.
//!
//! A [`FrameContext`] owns a ring of frame slots, each with its own command
//! pool and lists of work to undo once the GPU is done with that slot. A
//! single timeline semaphore gates reclamation: every submit signals the next
//! value, every slot remembers the value it must wait for, and `begin` on a
//! slot blocks until that value is reached before draining the slot's
//! pending destroyers, semaphores and scratch buffers.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::device::Device;
use crate::error::{fatal, fatal_vk};
use crate::memory::ScratchBuffer;
use crate::swapchain::{AcquiredImage, Swapchain};
use crate::sync;

/// Context construction parameters.
#[derive(Debug, Clone, Default)]
pub struct ContextCreateInfo {
    pub queue_family: u32,
    pub queue_index: u32,
    /// Frame-ring depth; clamped to at least 1.
    pub max_pending_frames: u32,
    /// Extra flags for the per-frame command pools; `TRANSIENT` is always
    /// set.
    pub command_pool_flags: vk::CommandPoolCreateFlags,
}

/// Caller-supplied extras for the submit built by
/// [`FrameContext::end_command_buffer`].
#[derive(Default)]
pub struct CommandBufferEndInfo<'a> {
    pub flags: vk::SubmitFlags,
    pub wait_semaphores: &'a [vk::SemaphoreSubmitInfo<'static>],
    pub signal_semaphores: &'a [vk::SemaphoreSubmitInfo<'static>],
}

/// One swapchain to present after the submit.
pub struct PresentRequest<'a> {
    pub swapchain: &'a mut Swapchain,
    /// Stage at which the image's release semaphore is signalled; empty
    /// means `ALL_COMMANDS`.
    pub stage: vk::PipelineStageFlags2,
}

type Destroyer = Box<dyn FnOnce()>;

struct Frame {
    name: String,
    /// Timeline value the GPU must reach before this slot may be reused.
    pending_semaphore_value: u64,

    command_pool: vk::CommandPool,
    acquired_command_buffers: usize,
    submitted_command_buffers: usize,
    /// Allocation cache, indexed by acquisition order within the frame.
    command_buffers: Vec<vk::CommandBuffer>,

    pending_destroyers: Vec<Destroyer>,
    pending_binary_semaphores: Vec<vk::Semaphore>,
    pending_scratch_buffers: Vec<(vk::Buffer, Allocation)>,
    pending_wait_semaphores: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

pub struct FrameContext {
    device: Arc<Device>,
    name: String,
    queue_family: u32,
    queue: vk::Queue,

    timeline_semaphore: vk::Semaphore,
    /// Last value scheduled to be signalled on the timeline.
    pending_value: u64,

    frames: Vec<Frame>,
    frame_id: usize,
}

impl FrameContext {
    pub fn new(device: &Arc<Device>, name: &str, info: ContextCreateInfo) -> Self {
        let name = if name.is_empty() {
            format!("context_{}_{}", info.queue_family, info.queue_index)
        } else {
            format!("{name}_context_{}_{}", info.queue_family, info.queue_index)
        };
        let queue = unsafe {
            device
                .handle()
                .get_device_queue(info.queue_family, info.queue_index)
        };

        let timeline_semaphore = sync::create_timeline_semaphore(device.handle(), 0);
        device.set_object_name(timeline_semaphore, &format!("{name}_semaphoreTimeline"));

        let frame_count = info.max_pending_frames.max(1);
        let mut frames = Vec::with_capacity(frame_count as usize);
        for i in 0..frame_count {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | info.command_pool_flags)
                .queue_family_index(info.queue_family);
            let command_pool = match unsafe { device.handle().create_command_pool(&pool_info, None) }
            {
                Ok(pool) => pool,
                Err(ret) => fatal_vk("Failed to create command pool", ret),
            };
            device.set_object_name(command_pool, &format!("{name}_cmdPool_{i}"));

            frames.push(Frame {
                name: format!("{name}_frame_{i}"),
                pending_semaphore_value: 0,
                command_pool,
                acquired_command_buffers: 0,
                submitted_command_buffers: 0,
                command_buffers: Vec::new(),
                pending_destroyers: Vec::new(),
                pending_binary_semaphores: Vec::new(),
                pending_scratch_buffers: Vec::new(),
                pending_wait_semaphores: Vec::new(),
            });
        }

        Self {
            device: device.clone(),
            name,
            queue_family: info.queue_family,
            queue,
            timeline_semaphore,
            pending_value: 0,
            frames,
            frame_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the frame slot currently being recorded.
    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    /// Whether the context's queue family can present to the swapchain's
    /// surface.
    pub fn swapchain_presentation_support(&self, swapchain: &Swapchain) -> bool {
        match unsafe {
            self.device
                .instance()
                .surface_loader()
                .get_physical_device_surface_support(
                    self.device.physical_device(),
                    self.queue_family,
                    swapchain.surface(),
                )
        } {
            Ok(support) => support,
            Err(ret) => fatal_vk("Failed to query presentation support", ret),
        }
    }

    /// Opens the current frame slot: waits until the GPU finished the slot's
    /// previous use, then reclaims everything queued on it.
    pub fn begin(&mut self, label: &str) {
        let frame = &mut self.frames[self.frame_id];

        sync::timeline_wait(
            self.device.handle(),
            self.timeline_semaphore,
            frame.pending_semaphore_value,
        );

        run_destroyers(&mut frame.pending_destroyers);
        {
            let mut sync_pool = self.device.sync_pool().lock();
            for semaphore in frame.pending_binary_semaphores.drain(..) {
                sync_pool.release_binary_semaphore(semaphore);
            }
        }
        {
            let mut allocator = self.device.allocator().lock();
            for (buffer, allocation) in frame.pending_scratch_buffers.drain(..) {
                allocator.free_scratch_buffer(buffer, allocation);
            }
        }

        if let Err(ret) = unsafe {
            self.device
                .handle()
                .reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())
        } {
            fatal_vk("Failed to reset command pool", ret);
        }
        if frame.acquired_command_buffers != frame.submitted_command_buffers {
            fatal(&format!(
                "Acquired {} command buffers but submitted {}",
                frame.acquired_command_buffers, frame.submitted_command_buffers
            ));
        }
        frame.acquired_command_buffers = 0;
        frame.submitted_command_buffers = 0;

        if label.is_empty() {
            let name = frame.name.clone();
            self.device.queue_label_begin(self.queue, &name);
        } else {
            let name = format!("{}_{label}", frame.name);
            self.device.queue_label_begin(self.queue, &name);
        }
    }

    /// Runs `destroyer` exactly once at the next `begin` of the current
    /// frame slot, i.e. once the GPU can no longer reference what it tears
    /// down.
    pub fn queue_destroyer(&mut self, destroyer: impl FnOnce() + 'static) {
        self.frames[self.frame_id]
            .pending_destroyers
            .push(Box::new(destroyer));
    }

    /// Allocates a mapped host-visible buffer that lives until the next
    /// `begin` of the current frame slot.
    pub fn create_scratch_buffer(
        &mut self,
        name: &str,
        info: &vk::BufferCreateInfo,
    ) -> ScratchBuffer {
        let frame = &mut self.frames[self.frame_id];
        let (buffer, allocation, ptr) = match self
            .device
            .allocator()
            .lock()
            .create_scratch_buffer(info, name)
        {
            Ok(scratch) => scratch,
            Err(e) => fatal(&format!("Failed to create scratch buffer: {e}")),
        };
        frame.pending_scratch_buffers.push((buffer, allocation));
        self.device
            .set_object_name(buffer, &format!("{name}_scratchHostBuffer"));
        ScratchBuffer {
            buffer,
            ptr,
            size: info.size,
        }
    }

    /// Acquires a swapchain image for this frame. The acquire semaphore
    /// comes from the sync pool, is waited by this frame's submit at `stage`
    /// (empty means `ALL_COMMANDS`) and returns to the pool when the slot is
    /// reclaimed — regardless of whether the acquire succeeded.
    pub fn acquire_swapchain(
        &mut self,
        swapchain: &mut Swapchain,
        stage: vk::PipelineStageFlags2,
    ) -> (vk::Result, Option<AcquiredImage>) {
        let frame = &mut self.frames[self.frame_id];
        let stage = if stage.is_empty() {
            vk::PipelineStageFlags2::ALL_COMMANDS
        } else {
            stage
        };

        let semaphore = self.device.sync_pool().lock().acquire_binary_semaphore();
        frame.pending_binary_semaphores.push(semaphore);
        frame.pending_wait_semaphores.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(stage),
        );

        let (ret, image) = swapchain.acquire(semaphore);
        if ret.as_raw() >= 0 {
            self.device.set_object_name(
                semaphore,
                &format!(
                    "{}_semaphoreBinary_surfaceAcquire_frame_{}",
                    swapchain.name(),
                    self.frame_id
                ),
            );
        }
        (ret, image)
    }

    /// Begins this frame's command buffer, reusing a cached allocation when
    /// one exists. Only one command buffer may be open at a time.
    pub fn begin_command_buffer(
        &mut self,
        name: &str,
        flags: vk::CommandBufferUsageFlags,
    ) -> vk::CommandBuffer {
        let frame = &mut self.frames[self.frame_id];

        if frame.acquired_command_buffers != frame.submitted_command_buffers {
            fatal("Cannot begin another command buffer until after ending the current one");
        }

        let command_buffer = if frame.command_buffers.len() > frame.acquired_command_buffers {
            frame.command_buffers[frame.acquired_command_buffers]
        } else {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(frame.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = match unsafe { self.device.handle().allocate_command_buffers(&allocate_info) }
            {
                Ok(buffers) => buffers,
                Err(ret) => fatal_vk("Failed to create command buffer", ret),
            };
            frame.command_buffers.push(buffers[0]);
            buffers[0]
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT | flags);
        if let Err(ret) = unsafe {
            self.device
                .handle()
                .begin_command_buffer(command_buffer, &begin_info)
        } {
            fatal_vk("Failed to begin command buffer", ret);
        }

        let label = if name.is_empty() {
            format!(
                "{}_commandBuffer_{}",
                frame.name, frame.acquired_command_buffers
            )
        } else {
            name.to_string()
        };
        self.device.cmd_label_begin(command_buffer, &label);
        self.frames[self.frame_id].acquired_command_buffers += 1;
        command_buffer
    }

    /// Ends the open command buffer and submits it. The submit waits on
    /// every semaphore accumulated by swapchain acquires plus the caller's
    /// waits, and signals each present target's release semaphore, the
    /// context timeline at its next value, then the caller's signals. The
    /// presents run right after the submit; their results come back in
    /// request order.
    pub fn end_command_buffer(
        &mut self,
        info: CommandBufferEndInfo<'_>,
        presents: &mut [PresentRequest<'_>],
    ) -> Vec<vk::Result> {
        let frame = &mut self.frames[self.frame_id];

        if frame.acquired_command_buffers == frame.submitted_command_buffers {
            fatal("No active command buffer to end");
        }
        let command_buffer = frame.command_buffers[frame.submitted_command_buffers];

        self.device.cmd_label_end(command_buffer);
        if let Err(ret) = unsafe { self.device.handle().end_command_buffer(command_buffer) } {
            fatal_vk("Failed to end command buffer", ret);
        }

        let mut wait_semaphores = std::mem::take(&mut frame.pending_wait_semaphores);
        wait_semaphores.extend_from_slice(info.wait_semaphores);

        self.pending_value += 1;
        let mut signal_semaphores: Vec<vk::SemaphoreSubmitInfo<'static>> = Vec::new();
        for present in presents.iter() {
            let stage = if present.stage.is_empty() {
                vk::PipelineStageFlags2::ALL_COMMANDS
            } else {
                present.stage
            };
            signal_semaphores.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(present.swapchain.release_semaphore())
                    .stage_mask(stage),
            );
        }
        signal_semaphores.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline_semaphore)
                .value(self.pending_value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        );
        signal_semaphores.extend_from_slice(info.signal_semaphores);

        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let submit_info = vk::SubmitInfo2::default()
            .flags(info.flags)
            .wait_semaphore_infos(&wait_semaphores)
            .signal_semaphore_infos(&signal_semaphores)
            .command_buffer_infos(&command_buffer_infos);
        if let Err(ret) = unsafe {
            self.device
                .handle()
                .queue_submit2(self.queue, &[submit_info], vk::Fence::null())
        } {
            fatal(&format!("Failed to submit {}: {ret:?}", frame.name));
        }
        frame.submitted_command_buffers += 1;

        presents
            .iter_mut()
            .map(|present| present.swapchain.present(self.queue))
            .collect()
    }

    /// Closes the current frame slot and advances the ring. The slot
    /// remembers the timeline value of its last submit; the next `begin` on
    /// it waits for exactly that value.
    pub fn end(&mut self) {
        let frame = &mut self.frames[self.frame_id];
        if frame.acquired_command_buffers != frame.submitted_command_buffers {
            fatal("Cannot end context before ending active command buffer");
        }

        self.device.queue_label_end(self.queue);
        frame.pending_semaphore_value = self.pending_value;
        self.frame_id = (self.frame_id + 1) % self.frames.len();
    }

    /// Blocks until every submitted frame has completed.
    pub fn wait(&self) {
        sync::timeline_wait(self.device.handle(), self.timeline_semaphore, self.pending_value);
    }

    /// Current value the context's timeline has actually reached.
    pub fn completed_value(&self) -> u64 {
        sync::timeline_value(self.device.handle(), self.timeline_semaphore)
    }
}

impl Drop for FrameContext {
    fn drop(&mut self) {
        sync::timeline_wait(self.device.handle(), self.timeline_semaphore, self.pending_value);
        unsafe {
            self.device
                .handle()
                .destroy_semaphore(self.timeline_semaphore, None)
        };
        for frame in &mut self.frames {
            run_destroyers(&mut frame.pending_destroyers);
            {
                let mut sync_pool = self.device.sync_pool().lock();
                for semaphore in frame.pending_binary_semaphores.drain(..) {
                    sync_pool.release_binary_semaphore(semaphore);
                }
            }
            {
                let mut allocator = self.device.allocator().lock();
                for (buffer, allocation) in frame.pending_scratch_buffers.drain(..) {
                    allocator.free_scratch_buffer(buffer, allocation);
                }
            }
            unsafe {
                if !frame.command_buffers.is_empty() {
                    self.device
                        .handle()
                        .free_command_buffers(frame.command_pool, &frame.command_buffers);
                }
                self.device
                    .handle()
                    .destroy_command_pool(frame.command_pool, None);
            }
        }
    }
}

/// Drains the queue in FIFO order, running each destroyer exactly once.
fn run_destroyers(destroyers: &mut Vec<Destroyer>) {
    for destroyer in destroyers.drain(..) {
        destroyer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn destroyers_run_once_in_fifo_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut destroyers: Vec<Destroyer> = Vec::new();
        for i in 0..3 {
            let order = order.clone();
            destroyers.push(Box::new(move || order.borrow_mut().push(i)));
        }

        run_destroyers(&mut destroyers);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);

        // A second drain is a no-op; nothing runs twice.
        run_destroyers(&mut destroyers);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }
}
