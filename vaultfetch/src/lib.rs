//! Vaultfetch - resumable, verified bulk-file acquisition
//!
//! This library implements a single-target download pipeline: a chunked,
//! resumable HTTP transfer engine, archive format detection and nested
//! extraction, directory layout normalization, and manifest verification,
//! all reporting progress through an atomically-written descriptor file
//! that an external caller polls.

pub mod archive;
pub mod config;
pub mod descriptor;
pub mod external;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod transfer;
pub mod verify;

/// Crate version, surfaced by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
