use super::fluid::FluidComponent;
use super::particles::ParticleComponent;
use super::species::{Representation, Species};

/// A named, homogeneous population of the simulation state.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Particles(ParticleComponent),
    Fluid(FluidComponent),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Particles(p) => &p.name,
            Component::Fluid(f) => &f.name,
        }
    }

    pub fn species(&self) -> Species {
        match self {
            Component::Particles(p) => p.species,
            Component::Fluid(f) => f.species,
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            Component::Particles(_) => Representation::Particles,
            Component::Fluid(_) => Representation::Fluid,
        }
    }

    pub fn as_particles(&self) -> Option<&ParticleComponent> {
        match self {
            Component::Particles(p) => Some(p),
            Component::Fluid(_) => None,
        }
    }

    pub fn as_particles_mut(&mut self) -> Option<&mut ParticleComponent> {
        match self {
            Component::Particles(p) => Some(p),
            Component::Fluid(_) => None,
        }
    }

    pub fn as_fluid(&self) -> Option<&FluidComponent> {
        match self {
            Component::Fluid(f) => Some(f),
            Component::Particles(_) => None,
        }
    }

    pub fn as_fluid_mut(&mut self) -> Option<&mut FluidComponent> {
        match self {
            Component::Fluid(f) => Some(f),
            Component::Particles(_) => None,
        }
    }

    /// A one-line summary such as `"halos (1000 dark matter particles)"`.
    pub fn summary(&self) -> String {
        match self {
            Component::Particles(p) => format!("{} ({} {})", p.name, p.n, p.species),
            Component::Fluid(f) => format!(
                "{} ({}³ {} with {} fluid variable{})",
                f.name,
                f.gridsize,
                f.species,
                f.n_fluidvars,
                if f.n_fluidvars == 1 { "" } else { "s" }
            ),
        }
    }
}

impl From<ParticleComponent> for Component {
    fn from(component: ParticleComponent) -> Self {
        Component::Particles(component)
    }
}

impl From<FluidComponent> for Component {
    fn from(component: FluidComponent) -> Self {
        Component::Fluid(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fluid::EquationOfState;

    #[test]
    fn accessors_dispatch_on_representation() {
        let particles: Component =
            ParticleComponent::new("halos", Species::DarkMatterParticles, 10, 1.0).into();
        let fluid: Component = FluidComponent::new(
            "gas",
            Species::BaryonFluid,
            4,
            1,
            EquationOfState::Constant(0.0),
            [4, 4, 4],
        )
        .into();

        assert_eq!(particles.name(), "halos");
        assert_eq!(particles.representation(), Representation::Particles);
        assert!(particles.as_fluid().is_none());
        assert_eq!(fluid.species(), Species::BaryonFluid);
        assert!(fluid.as_particles().is_none());
        assert_eq!(particles.summary(), "halos (10 dark matter particles)");
        assert_eq!(fluid.summary(), "gas (4³ baryon fluid with 1 fluid variable)");
    }
}
