//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`LumenError`] covers the failure modes that are surfaced
//! to callers:
//! - Missing GPU capabilities (detected once at startup)
//! - GPU memory / resource allocation failures
//! - Program creation failures reported by the backend
//! - Settings loading errors
//!
//! Programming errors (out-of-range batch edits, stale resource handles,
//! out-of-bounds texel access) are **not** represented here: they are
//! assertions and abort the frame loop.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lumen::errors::{LumenError, Result};
//!
//! fn init() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the Lumen engine.
///
/// None of these conditions is retried internally: GPU memory pressure does
/// not resolve by retrying without first freeing resources, and a missing
/// capability has no degraded fallback path.
#[derive(Error, Debug)]
pub enum LumenError {
    // ========================================================================
    // GPU & Rendering Errors
    // ========================================================================
    /// A capability the pipeline depends on is not supported by the device.
    #[error("GPU capability not supported: {0}")]
    MissingCapability(&'static str),

    /// A buffer or texture allocation exceeded the available device memory.
    #[error("GPU allocation failed for {label}: {requested} bytes requested")]
    OutOfMemory {
        /// Label of the resource being allocated
        label: String,
        /// Size of the failed allocation in bytes
        requested: u64,
    },

    /// The backend could not build a program from its description.
    #[error("Failed to create program {label}: {reason}")]
    ProgramCreation {
        /// Program label
        label: &'static str,
        /// Backend diagnostic
        reason: String,
    },

    /// Adapter or device request failure (wgpu backend).
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings parsing error.
    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Alias for `Result<T, LumenError>`.
pub type Result<T> = std::result::Result<T, LumenError>;
