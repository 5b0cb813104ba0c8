//! # Workflows Module
//!
//! The public entry points for saving and loading snapshots.
//!
//! ## Overview
//!
//! Workflows are collective: every process of the group calls them with the
//! same arguments. [`snapshot::save`] writes components in the configured
//! format, [`snapshot::load`] reads a snapshot of any registered format and
//! hands the particles and grids to the processes owning them, and
//! [`snapshot::detect_format`] tells which format a file is in.

pub mod snapshot;
