//! Process-group communication and domain decomposition.
//!
//! Snapshots are written and read collectively by a fixed group of
//! cooperating processes. [`comm`] provides the collective primitives, and
//! [`domain`] the partitioning of particles and grids over the group.

pub mod comm;
pub mod domain;
