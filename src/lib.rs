//! Fontpipe - dynamic font provisioning for documents
//!
//! This crate ties the platform-agnostic pipeline in `fontpipe-core` to a
//! headless probe runner:
//! - Acquisition and data URI encoding of font binaries
//! - Face registration with a deduplicating load cache
//! - Rendering verification and forced fallback
//! - Reports for the `fontpipe-probe` command line tool

pub mod report;

// Re-export main types for convenience
pub use fontpipe_core::*;
pub use report::{probe_files, FontReport, ProbeOptions};

#[cfg(target_arch = "wasm32")]
pub use fontpipe_web as web;
