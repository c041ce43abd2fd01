//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`ForgeError`] covers all failure modes including:
//! - GPU memory exhaustion (residency pass cannot free enough memory)
//! - Frame-graph compilation and submission errors
//! - Buffer sub-allocation and descriptor-heap exhaustion
//! - PSO library cache I/O errors
//! - Presentation callback failures
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for `std::result::Result<T, ForgeError>`.

use thiserror::Error;

/// The main error type for the Forge engine.
///
/// This enum covers all possible error conditions that can occur
/// during engine operation. Each variant provides specific context
/// about what went wrong.
#[derive(Error, Debug)]
pub enum ForgeError {
    // ========================================================================
    // GPU Memory & Residency Errors
    // ========================================================================
    /// The GPU ran out of memory and the residency pass could not free
    /// enough of it, even after falling back to deletion.
    #[error("The GPU does not have enough memory to make all of the resources needed for the current frame resident")]
    OutOfGpuMemory,

    /// A heap allocation request could not be satisfied by any existing
    /// heap, and creating a new heap failed.
    #[error("Failed to allocate {size} bytes from a GPU heap: {reason}")]
    HeapAllocationFailed {
        /// Requested allocation size in bytes
        size: u64,
        /// Backend-provided failure reason
        reason: String,
    },

    /// A buffer sub-allocation request did not fit into the owning buffer.
    #[error("Buffer sub-allocation of {size} bytes (alignment {alignment}) does not fit")]
    SubAllocationFailed {
        /// Requested sub-allocation size in bytes
        size: u64,
        /// Required placement alignment in bytes
        alignment: u64,
    },

    // ========================================================================
    // Descriptor Heap Errors
    // ========================================================================
    /// The per-frame half of the shader-visible descriptor heap is full.
    #[error("The per-frame descriptor partition is exhausted: requested {requested} descriptors, {available} available")]
    PerFrameDescriptorsExhausted {
        /// Number of descriptors requested
        requested: u32,
        /// Number of descriptors still available this frame
        available: u32,
    },

    /// All bindless SRV indices are in use.
    #[error("The bindless SRV partition is exhausted")]
    BindlessSrvsExhausted,

    // ========================================================================
    // Device & Initialization Errors
    // ========================================================================
    /// The device does not meet the minimum feature requirements.
    #[error("The GPU device does not meet minimum requirements: {0}")]
    UnsupportedDevice(String),

    /// A device-level call failed.
    #[error("GPU device error: {0}")]
    DeviceError(String),

    // ========================================================================
    // Frame Graph Errors
    // ========================================================================
    /// A render pass was recorded against a queue that its execution module
    /// does not use, or submission state was otherwise inconsistent.
    #[error("Frame graph submission error: {0}")]
    SubmissionError(String),

    // ========================================================================
    // PSO Library Errors
    // ========================================================================
    /// Reading or writing the pipeline library cache file failed.
    #[error("PSO library cache I/O error: {0}")]
    PsoCacheIo(#[from] std::io::Error),

    // ========================================================================
    // Presentation Errors
    // ========================================================================
    /// One or more presentation callbacks failed. All callbacks run to
    /// completion before this error is reported; `failed_count` records how
    /// many of them failed in total.
    #[error("Presentation failed ({failed_count} callback(s)): {first_error}")]
    PresentationFailed {
        /// Number of callbacks that returned an error this frame
        failed_count: usize,
        /// Description of the first error encountered
        first_error: String,
    },
}

/// Alias for `Result<T, ForgeError>`.
pub type Result<T> = std::result::Result<T, ForgeError>;
