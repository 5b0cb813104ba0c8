//! # Engine Module
//!
//! This module implements the snapshot formats and everything they need to
//! know about the current run.
//!
//! ## Overview
//!
//! A snapshot is populated from in-memory components, saved collectively, and
//! later loaded back on any number of processes. The engine owns the
//! configuration those operations are performed against, the formats
//! performing them, and the checks applied to the loaded data.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Units, box size and cosmology of the current run
//! - **Run Context** ([`context`]) - Configuration, process group and domain layout of one process
//! - **Snapshot Formats** ([`formats`]) - The standard container format and the legacy GADGET2 format
//! - **Validation** ([`validate`]) - Box bounds checks and parameter reconciliation
//! - **Error Handling** ([`error`]) - The error taxonomy of snapshot operations
//!
//! ## Key Capabilities
//!
//! - **Process-count independence** of everything written to disk
//! - **Unit conversion** on load whenever a snapshot declares different units
//! - **Format conversion** of loaded snapshots without a second read

pub mod config;
pub mod context;
pub mod error;
pub mod formats;
pub mod validate;
