use phf::phf_map;
use std::fmt;
use std::str::FromStr;

/// How a component's state is represented in memory and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Discrete particles with explicit positions and momenta.
    Particles,
    /// Grid-based fluid variables on a domain-decomposed mesh.
    Fluid,
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Particles => write!(f, "particles"),
            Representation::Fluid => write!(f, "fluid"),
        }
    }
}

/// The physical species a component models.
///
/// The species determines the component's [`Representation`] and, for the
/// legacy GADGET2 format, whether the component can be stored at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Species {
    DarkMatterParticles,
    MatterParticles,
    BaryonParticles,
    DarkMatterFluid,
    BaryonFluid,
    MatterFluid,
    NeutrinoFluid,
}

static SPECIES_NAMES: phf::Map<&'static str, Species> = phf_map! {
    "dark matter particles" => Species::DarkMatterParticles,
    "matter particles" => Species::MatterParticles,
    "baryon particles" => Species::BaryonParticles,
    "dark matter fluid" => Species::DarkMatterFluid,
    "baryon fluid" => Species::BaryonFluid,
    "matter fluid" => Species::MatterFluid,
    "neutrino fluid" => Species::NeutrinoFluid,
};

impl Species {
    /// The canonical name written to the `species` attribute of a snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::DarkMatterParticles => "dark matter particles",
            Species::MatterParticles => "matter particles",
            Species::BaryonParticles => "baryon particles",
            Species::DarkMatterFluid => "dark matter fluid",
            Species::BaryonFluid => "baryon fluid",
            Species::MatterFluid => "matter fluid",
            Species::NeutrinoFluid => "neutrino fluid",
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            Species::DarkMatterParticles | Species::MatterParticles | Species::BaryonParticles => {
                Representation::Particles
            }
            Species::DarkMatterFluid
            | Species::BaryonFluid
            | Species::MatterFluid
            | Species::NeutrinoFluid => Representation::Fluid,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Species {
    type Err = String;

    /// Parses the canonical species name (as stored in snapshot files).
    ///
    /// # Errors
    ///
    /// Returns the unrecognized name if it does not match any known species.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SPECIES_NAMES
            .get(s.trim())
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_names_round_trip_through_from_str() {
        for species in [
            Species::DarkMatterParticles,
            Species::MatterParticles,
            Species::BaryonParticles,
            Species::DarkMatterFluid,
            Species::BaryonFluid,
            Species::MatterFluid,
            Species::NeutrinoFluid,
        ] {
            assert_eq!(species.as_str().parse::<Species>(), Ok(species));
        }
    }

    #[test]
    fn representation_follows_species_suffix() {
        assert_eq!(
            Species::MatterParticles.representation(),
            Representation::Particles
        );
        assert_eq!(Species::BaryonFluid.representation(), Representation::Fluid);
    }

    #[test]
    fn unknown_species_is_rejected() {
        assert_eq!("dark energy".parse::<Species>(), Err("dark energy".to_string()));
    }
}
