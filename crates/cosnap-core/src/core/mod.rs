//! # Core Module
//!
//! The foundation layer: data describing the simulation state and the
//! primitives used to move it between memory and disk.
//!
//! ## Architecture
//!
//! - **Simulation State** ([`models`]) - Particle and fluid components, species and global parameters
//! - **Physical Units** ([`units`]) - Unit expressions and conversion between unit systems
//! - **File Codecs** ([`io`]) - The structured container and the GADGET2 block format
//! - **Parallelism** ([`parallel`]) - Process groups, partitioning and domain decomposition
//! - **Utilities** ([`utils`]) - Number formatting shared by messages
//!
//! ## Key Capabilities
//!
//! - **Distributed components** whose global counts are split over a fixed process group
//! - **Padded domain grids** carrying ghost layers for stencil operations
//! - **Hyperslab access** to container datasets for genuinely parallel writes
//! - **Unit-aware values** convertible between any two length, time and mass units

pub mod io;
pub mod models;
pub mod parallel;
pub mod units;
pub mod utils;
