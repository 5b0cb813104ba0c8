use super::context::RunContext;
use super::error::{Result, SnapshotError};
use crate::core::models::component::Component;
use crate::core::models::params::SnapshotParams;
use crate::core::models::particles::ParticleVariable;
use crate::core::utils::format::significant_figures;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Relative tolerance within which loaded parameters count as equal.
pub const PARAMETER_REL_TOL: f64 = 1e-6;

/// Significant digits used when reporting mismatching parameters.
const REPORT_DIGITS: usize = 7;

/// Checks that every local particle lies inside the periodic box `[0, boxsize)`.
///
/// Coordinates exactly on the upper box edge are wrapped to 0. Fluid
/// components are left untouched. No communication is performed, so particles
/// still have to be exchanged afterwards.
///
/// # Errors
///
/// Returns [`SnapshotError::OutOfBounds`] for the first particle still outside
/// the box after wrapping.
pub fn out_of_bounds_check(component: &mut Component, boxsize: f64, unit: &str) -> Result<()> {
    let Some(particles) = component.as_particles_mut() else {
        return Ok(());
    };
    for var in ParticleVariable::ALL.into_iter().filter(|v| v.is_position()) {
        for x in particles.array_mut(var).iter_mut() {
            if *x == boxsize {
                *x = 0.0;
            }
        }
    }
    let inside = |x: f64| (0.0..boxsize).contains(&x);
    for i in 0..particles.n_local() {
        let position = particles.position(i);
        if !position.iter().all(|&x| inside(x)) {
            return Err(SnapshotError::OutOfBounds {
                index: i,
                component: particles.name.clone(),
                position,
                boxsize,
                unit: unit.to_string(),
            });
        }
    }
    Ok(())
}

/// A global parameter whose loaded value disagrees with the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMismatch {
    pub field: &'static str,
    pub current: f64,
    pub loaded: f64,
    pub unit: Option<String>,
}

impl fmt::Display for ParameterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} vs {}",
            self.field,
            significant_figures(self.current, REPORT_DIGITS),
            significant_figures(self.loaded, REPORT_DIGITS)
        )?;
        if let Some(unit) = &self.unit {
            write!(f, " [{}]", unit)?;
        }
        Ok(())
    }
}

fn is_close(a: f64, b: f64, rel_tol: f64) -> bool {
    a == b || (a - b).abs() <= rel_tol * a.abs().max(b.abs())
}

/// Builds the combined warning text for a set of mismatches.
pub fn mismatch_message(path: &Path, mismatches: &[ParameterMismatch]) -> String {
    let mut message = format!(
        "Mismatch between current parameters and those in the snapshot \"{}\":",
        path.display()
    );
    for mismatch in mismatches {
        message.push_str("\n    ");
        message.push_str(&mismatch.to_string());
    }
    message
}

/// Compares the global parameters of a loaded snapshot with the current run.
///
/// The loaded scale factor is compared against the run's initial scale factor
/// (only when Hubble expansion is enabled). Parameters absent from the
/// snapshot are skipped. Any mismatches are logged as a single warning on the
/// master process; they are never fatal.
///
/// # Return
///
/// The mismatching parameters, in reporting order.
pub fn compare_parameters(
    params: &SnapshotParams,
    path: &Path,
    ctx: &RunContext,
) -> Vec<ParameterMismatch> {
    let config = ctx.config;
    let cosmology = &config.cosmology;
    let units = config.units.units();
    let km_s_mpc = units.km / (units.s * units.mpc);

    let candidates = [
        (
            "a_begin",
            cosmology.enable_hubble.then_some(cosmology.a_begin),
            params.a,
            1.0,
            None,
        ),
        (
            "boxsize",
            Some(config.boxsize),
            params.boxsize,
            1.0,
            Some(config.units.labels().length.clone()),
        ),
        (
            "H0",
            Some(cosmology.h0),
            params.h0,
            km_s_mpc,
            Some("km s⁻¹ Mpc⁻¹".to_string()),
        ),
        ("Ωb", Some(cosmology.omega_b), params.omega_b, 1.0, None),
        ("Ωcdm", Some(cosmology.omega_cdm), params.omega_cdm, 1.0, None),
        ("Ωm", Some(cosmology.omega_m()), params.omega_m, 1.0, None),
    ];

    let mismatches: Vec<ParameterMismatch> = candidates
        .into_iter()
        .filter_map(|(field, current, loaded, unit, label)| match (current, loaded) {
            (Some(current), Some(loaded)) if !is_close(current, loaded, PARAMETER_REL_TOL) => {
                Some(ParameterMismatch {
                    field,
                    current: current / unit,
                    loaded: loaded / unit,
                    unit: label,
                })
            }
            _ => None,
        })
        .collect();

    if !mismatches.is_empty() && ctx.is_master() {
        warn!("{}", mismatch_message(path, &mismatches));
    }
    mismatches
}
