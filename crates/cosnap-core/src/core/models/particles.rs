use super::species::Species;
use nalgebra::{Point3, Vector3};

/// One of the six per-particle arrays of a [`ParticleComponent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleVariable {
    PosX,
    PosY,
    PosZ,
    MomX,
    MomY,
    MomZ,
}

impl ParticleVariable {
    /// All particle variables, in on-disk order.
    pub const ALL: [ParticleVariable; 6] = [
        ParticleVariable::PosX,
        ParticleVariable::PosY,
        ParticleVariable::PosZ,
        ParticleVariable::MomX,
        ParticleVariable::MomY,
        ParticleVariable::MomZ,
    ];

    /// The dataset name used by the structured-container format.
    pub fn name(&self) -> &'static str {
        match self {
            ParticleVariable::PosX => "posx",
            ParticleVariable::PosY => "posy",
            ParticleVariable::PosZ => "posz",
            ParticleVariable::MomX => "momx",
            ParticleVariable::MomY => "momy",
            ParticleVariable::MomZ => "momz",
        }
    }

    pub fn is_position(&self) -> bool {
        matches!(
            self,
            ParticleVariable::PosX | ParticleVariable::PosY | ParticleVariable::PosZ
        )
    }
}

/// A component of identical-mass particles, distributed over processes.
///
/// Each process holds only its local particles. The global count `n` is the
/// sum of the local counts over all processes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleComponent {
    /// The unique name of the component (e.g. "GADGET halos").
    pub name: String,
    /// The physical species of the particles.
    pub species: Species,
    /// The global number of particles over all processes.
    pub n: usize,
    /// The mass of every particle, in internal units.
    pub mass: f64,
    pub posx: Vec<f64>,
    pub posy: Vec<f64>,
    pub posz: Vec<f64>,
    pub momx: Vec<f64>,
    pub momy: Vec<f64>,
    pub momz: Vec<f64>,
}

impl ParticleComponent {
    /// Creates a component shell holding no local particle data.
    pub fn new(name: &str, species: Species, n: usize, mass: f64) -> Self {
        Self {
            name: name.to_string(),
            species,
            n,
            mass,
            posx: Vec::new(),
            posy: Vec::new(),
            posz: Vec::new(),
            momx: Vec::new(),
            momy: Vec::new(),
            momz: Vec::new(),
        }
    }

    /// The number of particles held by this process.
    pub fn n_local(&self) -> usize {
        self.posx.len()
    }

    /// Whether all six local arrays share the same length.
    pub fn is_consistent(&self) -> bool {
        let n_local = self.n_local();
        ParticleVariable::ALL
            .iter()
            .all(|&var| self.array(var).len() == n_local)
    }

    pub fn array(&self, var: ParticleVariable) -> &[f64] {
        match var {
            ParticleVariable::PosX => &self.posx,
            ParticleVariable::PosY => &self.posy,
            ParticleVariable::PosZ => &self.posz,
            ParticleVariable::MomX => &self.momx,
            ParticleVariable::MomY => &self.momy,
            ParticleVariable::MomZ => &self.momz,
        }
    }

    pub fn array_mut(&mut self, var: ParticleVariable) -> &mut Vec<f64> {
        match var {
            ParticleVariable::PosX => &mut self.posx,
            ParticleVariable::PosY => &mut self.posy,
            ParticleVariable::PosZ => &mut self.posz,
            ParticleVariable::MomX => &mut self.momx,
            ParticleVariable::MomY => &mut self.momy,
            ParticleVariable::MomZ => &mut self.momz,
        }
    }

    /// Replaces one local array with freshly loaded data.
    pub fn populate(&mut self, data: Vec<f64>, var: ParticleVariable) {
        *self.array_mut(var) = data;
    }

    /// Appends a single particle to the local arrays.
    pub fn push(&mut self, position: Point3<f64>, momentum: Vector3<f64>) {
        self.posx.push(position.x);
        self.posy.push(position.y);
        self.posz.push(position.z);
        self.momx.push(momentum.x);
        self.momy.push(momentum.y);
        self.momz.push(momentum.z);
    }

    /// Removes all local particles, keeping the global count and mass.
    pub fn clear_local(&mut self) {
        for var in ParticleVariable::ALL {
            self.array_mut(var).clear();
        }
    }

    pub fn position(&self, i: usize) -> Point3<f64> {
        Point3::new(self.posx[i], self.posy[i], self.posz[i])
    }

    pub fn momentum(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.momx[i], self.momy[i], self.momz[i])
    }

    /// Multiplies all local positions by `factor`.
    pub fn scale_positions(&mut self, factor: f64) {
        for var in [
            ParticleVariable::PosX,
            ParticleVariable::PosY,
            ParticleVariable::PosZ,
        ] {
            self.array_mut(var).iter_mut().for_each(|x| *x *= factor);
        }
    }

    /// Multiplies all local momenta by `factor`.
    pub fn scale_momenta(&mut self, factor: f64) {
        for var in [
            ParticleVariable::MomX,
            ParticleVariable::MomY,
            ParticleVariable::MomZ,
        ] {
            self.array_mut(var).iter_mut().for_each(|x| *x *= factor);
        }
    }
}
