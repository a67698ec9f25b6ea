//! GPU error types.

use ash::vk;
use thiserror::Error;

/// Errors surfaced by the device-management layer.
///
/// Only recoverable conditions are represented here; unexpected driver
/// failures (allocation failures, submit errors, semaphore timeouts) abort
/// the process with a logged message instead of unwinding across the API.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan error returned by the driver.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device passed every selector check.
    #[error("No compatible device found")]
    NoCompatibleDevice,

    /// A required extension is not advertised by the driver.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// None of the preferred surface formats supports the required usage.
    #[error("No surface format with the required usage found")]
    FormatNotSupported,

    /// The surface was lost and must be recreated by the caller.
    #[error("Surface lost")]
    SurfaceLost,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Aborts on a driver return the layer cannot recover from.
///
/// The driver status is logged before panicking so the failure shows up in
/// the trace even when panics are swallowed by a foreign caller.
#[track_caller]
pub(crate) fn fatal_vk(what: &str, ret: vk::Result) -> ! {
    tracing::error!("{what}: {ret:?}");
    panic!("{what}: {ret:?}");
}

/// Aborts on invalid API usage with a descriptive message.
#[track_caller]
pub(crate) fn fatal(msg: &str) -> ! {
    tracing::error!("{msg}");
    panic!("{msg}");
}
