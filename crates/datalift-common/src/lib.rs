//! Datalift Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Datalift workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all Datalift workspace
//! members:
//!
//! - **Error Handling**: the pipeline error taxonomy and the
//!   transient-vs-fatal classification the retry layer switches on
//! - **Logging**: centralized tracing initialization
//! - **Types**: shared identifiers such as [`types::RunId`]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DataliftError, ErrorKind, Result};
pub use types::RunId;
