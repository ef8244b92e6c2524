//! Audit stages and their supporting services.
//!
//! Leaf-first: build-log parsing, discovery, module mapping and
//! fingerprinting feed the license chain (`license`, `identity`,
//! `repository`, `source_scan`), the notice checker and deduplication.
//! `audit` wires the stages together.

pub mod audit;
pub mod buildlog;
pub mod dedup;
pub mod discovery;
pub mod fingerprint;
pub mod identity;
pub mod license;
pub mod modules;
pub mod notice;
pub mod packaging;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod source_scan;
pub mod tlsh;
