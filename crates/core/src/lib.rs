//! binaudit-core
//!
//! Core library for auditing the output tree of an Android platform build.
//!
//! Given the build log and the build output directory, the library discovers
//! every shipped binary, maps it back to the build module and source path that
//! produced it, fingerprints it, resolves its license / OSS identity through a
//! cascade of sources, checks whether the legal notice document covers it, and
//! collapses duplicate copies installed at multiple paths.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends; the `binaudit` CLI is a thin wrapper.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod services;

pub use error::{AuditError, AuditResult};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
