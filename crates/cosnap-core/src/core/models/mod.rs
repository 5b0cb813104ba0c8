//! # Core Models Module
//!
//! Data structures describing the distributed simulation state that snapshots
//! persist.
//!
//! ## Key Components
//!
//! - [`species`] - Physical species and their in-memory representation
//! - [`particles`] - Particle components with per-process position and momentum arrays
//! - [`fluid`] - Fluid components with padded domain grids and equations of state
//! - [`component`] - The closed set of component kinds
//! - [`params`] - Global scalar parameters stored alongside the components
//!
//! ## Usage
//!
//! ```ignore
//! use cosnap::core::models::{component::Component, particles::ParticleComponent, species::Species};
//!
//! let mut halos = ParticleComponent::new("halos", Species::DarkMatterParticles, 2, 1.0);
//! halos.push(Point3::new(1.0, 2.0, 3.0), Vector3::zeros());
//! let component = Component::from(halos);
//! ```

pub mod component;
pub mod fluid;
pub mod params;
pub mod particles;
pub mod species;
