//! On-disk formats.
//!
//! [`container`] implements the self-describing hierarchical container that
//! backs the standard snapshot format, and [`gadget2`] the byte-level codec of
//! the legacy GADGET2 (type 2) format: its fixed header record and the
//! tagged block framing.

pub mod container;
pub mod gadget2;
