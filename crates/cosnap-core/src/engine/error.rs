use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::config::ConfigError;
use crate::core::io::container::ContainerError;
use crate::core::io::gadget2::Gadget2Error;
use crate::core::models::species::{Representation, Species};
use crate::core::parallel::comm::CommError;
use crate::core::units::UnitError;
use crate::core::utils::format::significant_figures;
use nalgebra::Point3;

fn coords(position: &Point3<f64>) -> String {
    format!(
        "{}, {}, {}",
        significant_figures(position.x, 9),
        significant_figures(position.y, 9),
        significant_figures(position.z, 9)
    )
}

fn sig9(value: &f64) -> String {
    significant_figures(*value, 9)
}

fn names(known: &[&'static str]) -> String {
    known.join(", ")
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Cannot recognize \"{}\" as one of the implemented snapshot types ({})", .path.display(), names(.known))]
    FormatRecognition {
        path: PathBuf,
        known: Vec<&'static str>,
    },

    #[error("The snapshot file \"{}\" does not exist", .0.display())]
    SnapshotNotFound(PathBuf),

    #[error(
        "The GADGET2 snapshot type can only store dark matter or matter particles (the species of the {component} component is \"{species}\")"
    )]
    UnsupportedSpecies { component: String, species: Species },

    #[error("Does not know how to save component \"{component}\" with representation \"{representation}\"")]
    UnsupportedRepresentation {
        component: String,
        representation: Representation,
    },

    #[error("The GADGET2 snapshot type stores exactly one component, got {count}")]
    UnsupportedComponentCount { count: usize },

    #[error(
        "The fluid component \"{component}\" has gridsize {gridsize}, which is not divisible by the domain subdivisions {subdivisions:?} and the process count {processes}"
    )]
    GridDivisibility {
        component: String,
        gridsize: usize,
        subdivisions: [usize; 3],
        processes: usize,
    },

    #[error(
        "Particle number {index} of component \"{component}\" has position ({}) {unit}, which is outside of the cubic box of side length {} {unit}",
        coords(.position),
        sig9(.boxsize)
    )]
    OutOfBounds {
        index: usize,
        component: String,
        position: Point3<f64>,
        boxsize: f64,
        unit: String,
    },

    #[error(
        "Component \"{component}\" declares {n} particles, but its processes hold {total} together"
    )]
    ParticleCount {
        component: String,
        n: usize,
        total: usize,
    },

    #[error("Snapshot holds an unrecognized equation of state type \"{0}\"")]
    EquationOfState(String),

    #[error("Snapshot holds a component of unknown species: {0}")]
    UnknownSpecies(String),

    #[error("Process group failure: {0}")]
    Comm(#[from] CommError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("GADGET2 error: {0}")]
    Gadget2(#[from] Gadget2Error),

    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    /// Whether the error stems from another process aborting the group.
    pub fn is_group_abort(&self) -> bool {
        matches!(
            self,
            SnapshotError::Comm(CommError::GroupAborted { .. })
                | SnapshotError::Container(ContainerError::Comm(CommError::GroupAborted { .. }))
        )
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_uses_nine_significant_figures() {
        let error = SnapshotError::OutOfBounds {
            index: 3,
            component: "halos".into(),
            position: Point3::new(1.0 / 3.0, 2.0, 100.5),
            boxsize: 100.0,
            unit: "kpc".into(),
        };
        assert_eq!(
            error.to_string(),
            "Particle number 3 of component \"halos\" has position (0.333333333, 2, 100.5) kpc, \
             which is outside of the cubic box of side length 100 kpc"
        );
    }

    #[test]
    fn format_recognition_lists_every_known_format() {
        let error = SnapshotError::FormatRecognition {
            path: PathBuf::from("snap.bin"),
            known: vec!["standard", "GADGET2"],
        };
        assert_eq!(
            error.to_string(),
            "Cannot recognize \"snap.bin\" as one of the implemented snapshot types (standard, GADGET2)"
        );
    }

    #[test]
    fn group_aborts_are_recognized_through_wrappers() {
        let direct = SnapshotError::from(CommError::GroupAborted { rank: 2 });
        let wrapped = SnapshotError::from(ContainerError::from(CommError::GroupAborted { rank: 2 }));
        assert!(direct.is_group_abort());
        assert!(wrapped.is_group_abort());
        assert!(!SnapshotError::UnsupportedComponentCount { count: 2 }.is_group_abort());
    }
}
