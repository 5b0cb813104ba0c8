use super::formats::SnapshotKind;
use crate::core::units::{Dimension, UnitError, UnitSystem};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Invalid unit: {0}")]
    Unit(#[from] UnitError),
}

/// Background cosmology of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cosmology {
    /// The Hubble constant, in internal units (1/time).
    pub h0: f64,
    pub omega_cdm: f64,
    pub omega_b: f64,
    /// The scale factor at the beginning of the run.
    pub a_begin: f64,
    /// Whether the background expands; without expansion the scale factor is fixed.
    pub enable_hubble: bool,
}

impl Cosmology {
    /// Total matter density `Ωm = Ωb + Ωcdm`.
    pub fn omega_m(&self) -> f64 {
        self.omega_b + self.omega_cdm
    }

    /// Dark energy density of a flat universe, `ΩΛ = 1 − Ωm`.
    pub fn omega_lambda(&self) -> f64 {
        1.0 - self.omega_m()
    }
}

/// The immutable configuration of the current run that snapshots are
/// populated from and compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub units: UnitSystem,
    /// Side length of the periodic box, in internal length units.
    pub boxsize: f64,
    /// The current scale factor.
    pub a: f64,
    pub cosmology: Cosmology,
    /// The format used when saving.
    pub snapshot_type: SnapshotKind,
}

impl RunConfig {
    /// A copy of this configuration at a different current scale factor.
    pub fn with_scale_factor(&self, a: f64) -> Self {
        Self { a, ..self.clone() }
    }

    /// A copy of this configuration saving in a different format.
    pub fn with_snapshot_type(&self, snapshot_type: SnapshotKind) -> Self {
        Self {
            snapshot_type,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BoxsizeSpec {
    Internal(f64),
    Expression(String),
}

#[derive(Default)]
pub struct RunConfigBuilder {
    units: Option<(String, String, String)>,
    boxsize: Option<BoxsizeSpec>,
    a: Option<f64>,
    h0_km_s_mpc: Option<f64>,
    omega_cdm: Option<f64>,
    omega_b: Option<f64>,
    a_begin: Option<f64>,
    enable_hubble: Option<bool>,
    snapshot_type: Option<SnapshotKind>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the internal base units as unit expressions, e.g. `("kpc", "Gyr", "1e10*m_sun")`.
    pub fn units(mut self, length: &str, time: &str, mass: &str) -> Self {
        self.units = Some((length.to_string(), time.to_string(), mass.to_string()));
        self
    }
    /// Sets the box size in internal length units.
    pub fn boxsize(mut self, boxsize: f64) -> Self {
        self.boxsize = Some(BoxsizeSpec::Internal(boxsize));
        self
    }
    /// Sets the box size as a length expression, e.g. `"100*Mpc"`.
    pub fn boxsize_expr(mut self, expr: &str) -> Self {
        self.boxsize = Some(BoxsizeSpec::Expression(expr.to_string()));
        self
    }
    /// Sets the current scale factor. Defaults to `a_begin`.
    pub fn scale_factor(mut self, a: f64) -> Self {
        self.a = Some(a);
        self
    }
    /// Sets the Hubble constant in km s⁻¹ Mpc⁻¹.
    pub fn hubble_constant(mut self, h0_km_s_mpc: f64) -> Self {
        self.h0_km_s_mpc = Some(h0_km_s_mpc);
        self
    }
    pub fn omega_cdm(mut self, omega_cdm: f64) -> Self {
        self.omega_cdm = Some(omega_cdm);
        self
    }
    pub fn omega_b(mut self, omega_b: f64) -> Self {
        self.omega_b = Some(omega_b);
        self
    }
    /// Sets the initial scale factor. Defaults to 1.
    pub fn a_begin(mut self, a_begin: f64) -> Self {
        self.a_begin = Some(a_begin);
        self
    }
    /// Enables or disables Hubble expansion. Enabled by default.
    pub fn enable_hubble(mut self, enable: bool) -> Self {
        self.enable_hubble = Some(enable);
        self
    }
    /// Sets the snapshot format used when saving. Defaults to [`SnapshotKind::Standard`].
    pub fn snapshot_type(mut self, kind: SnapshotKind) -> Self {
        self.snapshot_type = Some(kind);
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let (length, time, mass) = self.units.ok_or(ConfigError::MissingParameter("units"))?;
        let units = UnitSystem::new(&length, &time, &mass)?;

        let boxsize = match self
            .boxsize
            .ok_or(ConfigError::MissingParameter("boxsize"))?
        {
            BoxsizeSpec::Internal(value) => value,
            BoxsizeSpec::Expression(expr) => units.eval(&expr, Dimension::Length)?,
        };
        if !(boxsize.is_finite() && boxsize > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "boxsize",
                reason: format!("must be positive, got {}", boxsize),
            });
        }

        let h0_km_s_mpc = self
            .h0_km_s_mpc
            .ok_or(ConfigError::MissingParameter("H0"))?;
        if !(h0_km_s_mpc.is_finite() && h0_km_s_mpc >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "H0",
                reason: format!("must be non-negative, got {}", h0_km_s_mpc),
            });
        }
        let named = units.units();
        let h0 = h0_km_s_mpc * named.km / (named.s * named.mpc);

        let a_begin = self.a_begin.unwrap_or(1.0);
        let a = self.a.unwrap_or(a_begin);
        for (name, value) in [("a_begin", a_begin), ("a", a)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("must be positive, got {}", value),
                });
            }
        }

        let cosmology = Cosmology {
            h0,
            omega_cdm: self
                .omega_cdm
                .ok_or(ConfigError::MissingParameter("Ωcdm"))?,
            omega_b: self.omega_b.ok_or(ConfigError::MissingParameter("Ωb"))?,
            a_begin,
            enable_hubble: self.enable_hubble.unwrap_or(true),
        };

        Ok(RunConfig {
            units,
            boxsize,
            a,
            cosmology,
            snapshot_type: self.snapshot_type.unwrap_or_default(),
        })
    }
}
