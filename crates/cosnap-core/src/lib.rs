//! # cosnap Core Library
//!
//! Parallel snapshot serialization for cosmological particle and fluid
//! simulations. The library persists the distributed state of a simulation
//! (particle components spread over processes and fluid components living on
//! domain-decomposed grids) and restores it, possibly on a different number
//! of processes and in a different internal unit system.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Component`,
//!   `SnapshotParams`), the unit system, the byte-level file codecs and the
//!   process-group primitives with the domain decomposition built on them.
//!
//! - **[`engine`]: The Logic Core.** The immutable run configuration, the error
//!   taxonomy, the snapshot formats themselves and the validators applied to
//!   freshly loaded data.
//!
//! - **[`workflows`]: The Public API.** The collective `save`, `load` and
//!   `detect_format` entry points tying everything together.

pub mod core;
pub mod engine;
pub mod workflows;
