use super::species::Species;
use std::fmt;

/// Number of ghost layers on each side of a domain grid, required by the
/// stencils of the fluid solver.
pub const GHOST_LAYERS: usize = 2;

/// Extra points along each axis of a padded domain grid: ghost layers on both
/// sides plus one pseudo point at the upper end.
pub const PADDING: usize = 2 * GHOST_LAYERS + 1;

/// A multi-index addressing a fluid scalar within its fluid variable.
///
/// Density has the single index `(0,)`, momentum density `(0,)`..`(2,)`, and
/// the symmetric stress tensor the upper-triangular pairs `(0, 0)`..`(2, 2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MultiIndex(pub Vec<usize>);

impl fmt::Display for MultiIndex {
    /// Formats the index as a tuple literal, e.g. `(0,)` or `(0, 1)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "({},)", single),
            indices => {
                let joined: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", joined.join(", "))
            }
        }
    }
}

/// The multi-indices of the fluid scalars making up fluid variable `index`.
pub fn multi_indices(index: usize) -> Vec<MultiIndex> {
    match index {
        0 => vec![MultiIndex(vec![0])],
        1 => (0..3).map(|i| MultiIndex(vec![i])).collect(),
        _ => {
            let mut indices = Vec::with_capacity(6);
            for i in 0..3 {
                for j in i..3 {
                    indices.push(MultiIndex(vec![i, j]));
                }
            }
            indices
        }
    }
}

/// A physical name addressing part of a fluid component's hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluidName {
    /// A whole fluid variable, by index.
    Variable(usize),
    /// A single fluid scalar: variable index and multi-index.
    Scalar(usize, &'static [usize]),
}

/// Physical names of fluid variables and scalars, stored as aliases on disk.
pub const FLUID_NAMES: &[(&str, FluidName)] = &[
    ("ϱ", FluidName::Scalar(0, &[0])),
    ("J", FluidName::Variable(1)),
    ("Jx", FluidName::Scalar(1, &[0])),
    ("Jy", FluidName::Scalar(1, &[1])),
    ("Jz", FluidName::Scalar(1, &[2])),
    ("σ", FluidName::Variable(2)),
    ("σxx", FluidName::Scalar(2, &[0, 0])),
    ("σxy", FluidName::Scalar(2, &[0, 1])),
    ("σxz", FluidName::Scalar(2, &[0, 2])),
    ("σyy", FluidName::Scalar(2, &[1, 1])),
    ("σyz", FluidName::Scalar(2, &[1, 2])),
    ("σzz", FluidName::Scalar(2, &[2, 2])),
];

/// The independent variable of a tabulated equation of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Independent {
    /// Cosmic time `t`.
    Time,
    /// Scale factor `a`.
    ScaleFactor,
}

impl Independent {
    pub fn symbol(&self) -> char {
        match self {
            Independent::Time => 't',
            Independent::ScaleFactor => 'a',
        }
    }
}

/// The equation of state parameter `w` of a fluid component.
#[derive(Debug, Clone, PartialEq)]
pub enum EquationOfState {
    Constant(f64),
    Tabulated {
        independent: Independent,
        x: Vec<f64>,
        w: Vec<f64>,
    },
    Expression(String),
}

impl EquationOfState {
    /// The `w_type` tag stored on disk.
    pub fn w_type(&self) -> &'static str {
        match self {
            EquationOfState::Constant(_) => "constant",
            EquationOfState::Tabulated {
                independent: Independent::Time,
                ..
            } => "tabulated (t)",
            EquationOfState::Tabulated {
                independent: Independent::ScaleFactor,
                ..
            } => "tabulated (a)",
            EquationOfState::Expression(_) => "expression",
        }
    }

    /// Parses a `w_type` tag into the independent variable it implies, if tabulated.
    ///
    /// # Return
    ///
    /// `Some(Ok(independent))` for tabulated tags, `None` for scalar tags, and
    /// `Some(Err(()))` for unknown tags.
    pub fn tabulated_independent(w_type: &str) -> Option<Result<Independent, ()>> {
        match w_type {
            "tabulated (t)" => Some(Ok(Independent::Time)),
            "tabulated (a)" => Some(Ok(Independent::ScaleFactor)),
            "constant" | "expression" => None,
            _ => Some(Err(())),
        }
    }

    /// A human-readable description used in progress messages.
    pub fn describe(&self) -> String {
        match self {
            EquationOfState::Constant(w) => format!(
                "constant equation of state w = {}",
                crate::core::utils::format::significant_figures(*w, 6)
            ),
            EquationOfState::Tabulated { independent, .. } => {
                format!("tabulated equation of state w({})", independent.symbol())
            }
            EquationOfState::Expression(expr) => format!("equation of state w = {}", expr),
        }
    }
}

/// A 3D grid covering one process's domain, padded for stencil access.
///
/// The interior holds `size[0] × size[1] × size[2]` points. Along every axis
/// the interior is preceded by [`GHOST_LAYERS`] ghost points and followed by
/// one pseudo point and [`GHOST_LAYERS`] ghost points. Storage is row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainGrid {
    size: [usize; 3],
    data: Vec<f64>,
}

impl DomainGrid {
    /// Creates a zero-filled padded grid with the given interior size.
    pub fn zeros(size: [usize; 3]) -> Self {
        let shape = Self::padded_shape_of(size);
        Self {
            size,
            data: vec![0.0; shape[0] * shape[1] * shape[2]],
        }
    }

    fn padded_shape_of(size: [usize; 3]) -> [usize; 3] {
        [size[0] + PADDING, size[1] + PADDING, size[2] + PADDING]
    }

    /// The interior (domain) size along each axis.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// The padded size along each axis.
    pub fn padded_shape(&self) -> [usize; 3] {
        Self::padded_shape_of(self.size)
    }

    /// Flat storage index of the padded point `(i, j, k)`.
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let shape = self.padded_shape();
        (i * shape[1] + j) * shape[2] + k
    }

    /// Value at padded coordinates.
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.index(i, j, k)]
    }

    /// Sets the value at padded coordinates.
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.index(i, j, k);
        self.data[idx] = value;
    }

    /// Value at interior coordinates (0-based within the domain).
    pub fn interior_get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.get(i + GHOST_LAYERS, j + GHOST_LAYERS, k + GHOST_LAYERS)
    }

    /// Copies the interior points into a contiguous row-major buffer.
    pub fn interior(&self) -> Vec<f64> {
        let [ni, nj, nk] = self.size;
        let mut out = Vec::with_capacity(ni * nj * nk);
        for i in 0..ni {
            for j in 0..nj {
                let start = self.index(i + GHOST_LAYERS, j + GHOST_LAYERS, GHOST_LAYERS);
                out.extend_from_slice(&self.data[start..start + nk]);
            }
        }
        out
    }

    /// Overwrites the interior points from a contiguous row-major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not hold exactly the number of interior points.
    pub fn set_interior(&mut self, values: &[f64]) {
        let [ni, nj, nk] = self.size;
        assert_eq!(values.len(), ni * nj * nk, "interior size mismatch");
        for i in 0..ni {
            for j in 0..nj {
                let start = self.index(i + GHOST_LAYERS, j + GHOST_LAYERS, GHOST_LAYERS);
                let src = (i * nj + j) * nk;
                self.data[start..start + nk].copy_from_slice(&values[src..src + nk]);
            }
        }
    }

    /// Multiplies every stored point (padding included) by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.data.iter_mut().for_each(|x| *x *= factor);
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// A single scalar grid of a fluid variable.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidScalar {
    pub multi_index: MultiIndex,
    pub grid: DomainGrid,
}

/// A fluid variable: one or more fluid scalars sharing a physical meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidVariable {
    pub scalars: Vec<FluidScalar>,
}

impl FluidVariable {
    fn zeros(index: usize, domain_size: [usize; 3]) -> Self {
        Self {
            scalars: multi_indices(index)
                .into_iter()
                .map(|multi_index| FluidScalar {
                    multi_index,
                    grid: DomainGrid::zeros(domain_size),
                })
                .collect(),
        }
    }

    pub fn scalar(&self, multi_index: &[usize]) -> Option<&FluidScalar> {
        self.scalars.iter().find(|s| s.multi_index.0 == multi_index)
    }
}

/// A component represented as fluid variables on a global cubic grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidComponent {
    pub name: String,
    pub species: Species,
    /// Number of grid points along each axis of the global grid.
    pub gridsize: usize,
    /// Number of fluid variables in use (1 = ϱ, 2 = ϱ + J, 3 = ϱ + J + σ).
    pub n_fluidvars: usize,
    pub eos: EquationOfState,
    pub fluidvars: Vec<FluidVariable>,
}

impl FluidComponent {
    /// Creates a fluid component with zero-filled grids of the given domain size.
    pub fn new(
        name: &str,
        species: Species,
        gridsize: usize,
        n_fluidvars: usize,
        eos: EquationOfState,
        domain_size: [usize; 3],
    ) -> Self {
        Self {
            name: name.to_string(),
            species,
            gridsize,
            n_fluidvars,
            eos,
            fluidvars: (0..n_fluidvars)
                .map(|index| FluidVariable::zeros(index, domain_size))
                .collect(),
        }
    }

    /// The interior size of the local domain grids.
    pub fn domain_size(&self) -> [usize; 3] {
        self.fluidvars
            .first()
            .and_then(|var| var.scalars.first())
            .map(|scalar| scalar.grid.size())
            .unwrap_or([0, 0, 0])
    }

    /// Iterates over `(variable index, scalar)` for every active fluid scalar.
    pub fn scalars(&self) -> impl Iterator<Item = (usize, &FluidScalar)> {
        self.fluidvars
            .iter()
            .take(self.n_fluidvars)
            .enumerate()
            .flat_map(|(index, var)| var.scalars.iter().map(move |s| (index, s)))
    }

    /// Mutable counterpart of [`FluidComponent::scalars`].
    pub fn scalars_mut(&mut self) -> impl Iterator<Item = (usize, &mut FluidScalar)> {
        let n = self.n_fluidvars;
        self.fluidvars
            .iter_mut()
            .take(n)
            .enumerate()
            .flat_map(|(index, var)| var.scalars.iter_mut().map(move |s| (index, s)))
    }
}
