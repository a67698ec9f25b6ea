//! Thin device-management layer for Vulkan 1.3+.
//!
//! This crate takes care of the plumbing every Vulkan application repeats:
//! - Declarative physical-device selection: requirements in, logical device
//!   plus an enabled-capability report out, with per-device rejection reasons
//! - Feature-struct reflection for assembling and merging `pNext` chains
//! - Per-frame execution contexts with timeline-semaphore gated reclamation
//!   of command pools, scratch buffers and semaphores
//! - Swapchain lifecycle including resize and `EXT_swapchain_maintenance1`
//!   present-mode switching
//! - A pool of reusable binary semaphores and fences per device

pub mod capabilities;
pub mod context;
pub mod device;
pub mod error;
pub mod extensions;
pub mod features;
pub mod instance;
pub mod memory;
pub mod selector;
pub mod swapchain;
pub mod sync;

pub use ash;

pub use capabilities::{DeviceLimits, DeviceProperties, DeviceUuid, GpuVendor};
pub use context::{
    CommandBufferEndInfo, ContextCreateInfo, FrameContext, PresentRequest,
};
pub use device::{physical_device_from_uuid, Device, DeviceInitInfo, OptionalFeatures};
pub use error::{Error, Result};
pub use instance::{entry_from_proc_addr, Instance};
pub use memory::ScratchBuffer;
pub use selector::{
    DevicePreference, DeviceSelector, DeviceSelectorCreateInfo, QueueInfo, QueueRequest,
    RejectReason, VetoFn,
};
pub use swapchain::{AcquiredImage, Swapchain, SwapchainCreateInfo, SwapchainProperties};
pub use sync::SyncObjectPool;
