/// Global scalar parameters carried by a snapshot.
///
/// Every field is optional because the formats store different subsets:
/// the structured container stores `Ωcdm` and `Ωb`, while GADGET2 stores the
/// total matter density `Ωm` and the dark energy density `ΩΛ`. All values are
/// in internal units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotParams {
    /// The Hubble constant, in internal units (1/time).
    pub h0: Option<f64>,
    /// The scale factor.
    pub a: Option<f64>,
    /// The side length of the periodic box, in internal length units.
    pub boxsize: Option<f64>,
    pub omega_cdm: Option<f64>,
    pub omega_b: Option<f64>,
    pub omega_m: Option<f64>,
    pub omega_lambda: Option<f64>,
}

impl SnapshotParams {
    /// The total matter density, taken from `Ωm` or summed from `Ωb + Ωcdm`.
    pub fn matter_density(&self) -> Option<f64> {
        self.omega_m.or(match (self.omega_b, self.omega_cdm) {
            (Some(b), Some(cdm)) => Some(b + cdm),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matter_density_prefers_explicit_value() {
        let params = SnapshotParams {
            omega_m: Some(0.3),
            omega_b: Some(0.05),
            omega_cdm: Some(0.2),
            ..Default::default()
        };
        assert_eq!(params.matter_density(), Some(0.3));
    }

    #[test]
    fn matter_density_falls_back_to_sum() {
        let params = SnapshotParams {
            omega_b: Some(0.25),
            omega_cdm: Some(0.5),
            ..Default::default()
        };
        assert_eq!(params.matter_density(), Some(0.75));
        assert_eq!(SnapshotParams::default().matter_density(), None);
    }
}
