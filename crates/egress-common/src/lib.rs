//! Egress Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling used across the egress
//! pipeline workspace members.
//!
//! - **Error Handling**: common error type shared by low-level utilities
//! - **Checksums**: file integrity verification utilities
//! - **Logging**: tracing-based structured logging setup
//!
//! # Example
//!
//! ```no_run
//! use egress_common::{Result, CommonError};
//! use egress_common::checksum::compute_file_checksum;
//! use egress_common::types::ChecksumAlgorithm;
//!
//! fn process_file(path: &str) -> Result<()> {
//!     let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
//!     println!("file checksum: {}", checksum);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
