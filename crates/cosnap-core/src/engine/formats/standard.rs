use super::{SnapshotFormat, SnapshotKind};
use crate::core::io::container::Container;
use crate::core::models::component::Component;
use crate::core::models::fluid::{
    EquationOfState, FLUID_NAMES, FluidComponent, FluidName, MultiIndex,
};
use crate::core::models::params::SnapshotParams;
use crate::core::models::particles::{ParticleComponent, ParticleVariable};
use crate::core::models::species::{Representation, Species};
use crate::core::parallel::domain::{offset_and_total, partition, slab_decompose};
use crate::core::units::{UnitFactors, UnitLabels};
use crate::engine::context::{RunContext, master_info};
use crate::engine::error::{Result, SnapshotError};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::debug;

const COMPONENTS: &str = "components";

/// A snapshot in the self-describing structured container format.
///
/// Stores particle and fluid components together with the unit system they
/// are expressed in, so that a snapshot can be loaded by a run using
/// different internal units.
#[derive(Debug, Clone)]
pub struct StandardSnapshot<'a> {
    params: SnapshotParams,
    units: UnitLabels,
    components: Cow<'a, [Component]>,
}

impl StandardSnapshot<'_> {
    /// The base units the snapshot's values are expressed in.
    pub fn units(&self) -> &UnitLabels {
        &self.units
    }
}

fn component_group(name: &str) -> String {
    format!("{}/{}", COMPONENTS, name)
}

fn fluidvar_path(group: &str, index: usize) -> String {
    format!("{}/fluidvar_{}", group, index)
}

fn fluidscalar_path(group: &str, index: usize, multi_index: &MultiIndex) -> String {
    format!("{}/fluidscalar_{}", fluidvar_path(group, index), multi_index)
}

fn check_divisible(component: &FluidComponent, ctx: &RunContext, slabs: bool) -> Result<()> {
    let nprocs = ctx.comm.size();
    let divisible = ctx.layout.divides(component.gridsize)
        && (!slabs || component.gridsize % nprocs == 0);
    if divisible {
        Ok(())
    } else {
        Err(SnapshotError::GridDivisibility {
            component: component.name.clone(),
            gridsize: component.gridsize,
            subdivisions: ctx.layout.subdivisions,
            processes: nprocs,
        })
    }
}

fn save_particles(
    container: &mut Container,
    group: &str,
    component: &ParticleComponent,
    ctx: &RunContext,
) -> Result<()> {
    master_info!(
        ctx,
        "Writing out {} ({} {}) ...",
        component.name,
        component.n,
        component.species
    );
    container.set_attr(group, "mass", component.mass)?;
    container.set_attr(group, "N", component.n)?;

    let (start, total) = offset_and_total(component.n_local(), ctx.comm)?;
    if total != component.n {
        return Err(SnapshotError::ParticleCount {
            component: component.name.clone(),
            n: component.n,
            total,
        });
    }
    debug!(rank = ctx.comm.rank(), start, n_local = component.n_local(), "Particle slice");
    for var in ParticleVariable::ALL {
        let dataset = container.create_dataset(&format!("{}/{}", group, var.name()), &[component.n])?;
        container.write_rows(&dataset, start, component.array(var))?;
    }
    Ok(())
}

fn save_fluid(
    container: &mut Container,
    group: &str,
    component: &FluidComponent,
    ctx: &RunContext,
) -> Result<()> {
    master_info!(
        ctx,
        "Writing out {} ({} with gridsize {}, {} fluid variables, {}) ...",
        component.name,
        component.species,
        component.gridsize,
        component.n_fluidvars,
        component.eos.describe()
    );
    check_divisible(component, ctx, true)?;

    container.set_attr(group, "gridsize", component.gridsize)?;
    container.set_attr(group, "N_fluidvars", component.n_fluidvars)?;
    container.set_attr(group, "w_type", component.eos.w_type())?;
    match &component.eos {
        EquationOfState::Constant(w) => container.set_attr(group, "w", *w)?,
        EquationOfState::Expression(expr) => container.set_attr(group, "w", expr.as_str())?,
        EquationOfState::Tabulated { x, w, .. } => {
            let dataset = container.create_dataset(&format!("{}/w", group), &[2, x.len()])?;
            if ctx.is_master() {
                let table: Vec<f64> = x.iter().chain(w.iter()).copied().collect();
                container.write_rows(&dataset, 0, &table)?;
            }
        }
    }

    let gridsize = component.gridsize;
    let thickness = gridsize / ctx.comm.size();
    for (index, scalar) in component.scalars() {
        let path = fluidscalar_path(group, index, &scalar.multi_index);
        let dataset = container.create_dataset(&path, &[gridsize; 3])?;
        let slab = slab_decompose(&scalar.grid, gridsize, &ctx.layout, ctx.comm)?;
        container.write_rows(&dataset, ctx.comm.rank() * thickness, &slab)?;
    }

    for (alias, target) in FLUID_NAMES {
        let target = match *target {
            FluidName::Variable(index) if index < component.n_fluidvars => {
                fluidvar_path(group, index)
            }
            FluidName::Scalar(index, multi_index) if index < component.n_fluidvars => {
                fluidscalar_path(group, index, &MultiIndex(multi_index.to_vec()))
            }
            _ => continue,
        };
        container.link(&format!("{}/{}", group, alias), &target)?;
    }
    Ok(())
}

fn load_particles(
    container: &mut Container,
    group: &str,
    name: &str,
    species: Species,
    only_params: bool,
    factors: &UnitFactors,
    ctx: &RunContext,
) -> Result<ParticleComponent> {
    let n = container.attr_usize(group, "N")?;
    let mass = container.attr_f64(group, "mass")? * factors.mass;
    let mut component = ParticleComponent::new(name, species, n, mass);
    if only_params {
        return Ok(component);
    }

    master_info!(ctx, "Reading in {} ({} {}) ...", name, n, species);
    let (start, count) = partition(n, ctx.comm);
    for var in ParticleVariable::ALL {
        let data = container.read_block(&format!("{}/{}", group, var.name()), &[start], &[count])?;
        component.populate(data, var);
    }
    if factors.length != 1.0 {
        component.scale_positions(factors.length);
    }
    if factors.momentum() != 1.0 {
        component.scale_momenta(factors.momentum());
    }
    Ok(component)
}

fn read_equation_of_state(container: &mut Container, group: &str) -> Result<EquationOfState> {
    let w_type = container.attr_str(group, "w_type")?.to_string();
    match EquationOfState::tabulated_independent(&w_type) {
        None if w_type == "constant" => Ok(EquationOfState::Constant(container.attr_f64(group, "w")?)),
        None => Ok(EquationOfState::Expression(
            container.attr_str(group, "w")?.to_string(),
        )),
        Some(Ok(independent)) => {
            let mut table = container.read_all(&format!("{}/w", group))?;
            let w = table.split_off(table.len() / 2);
            Ok(EquationOfState::Tabulated {
                independent,
                x: table,
                w,
            })
        }
        Some(Err(())) => Err(SnapshotError::EquationOfState(w_type)),
    }
}

fn load_fluid(
    container: &mut Container,
    group: &str,
    name: &str,
    species: Species,
    only_params: bool,
    factors: &UnitFactors,
    ctx: &RunContext,
) -> Result<FluidComponent> {
    let gridsize = container.attr_usize(group, "gridsize")?;
    let n_fluidvars = container.attr_usize(group, "N_fluidvars")?;
    let eos = read_equation_of_state(container, group)?;
    let mut component = FluidComponent::new(
        name,
        species,
        gridsize,
        n_fluidvars,
        eos,
        ctx.layout.domain_size(gridsize),
    );
    check_divisible(&component, ctx, false)?;
    if only_params {
        return Ok(component);
    }

    master_info!(
        ctx,
        "Reading in {} ({} with gridsize {}, {} fluid variables, {}) ...",
        name,
        species,
        gridsize,
        n_fluidvars,
        component.eos.describe()
    );
    let origin = ctx.layout.origin(gridsize, ctx.layout.coords);
    let size = ctx.layout.domain_size(gridsize);
    let scales = factors.fluid_variables();
    for (index, scalar) in component.scalars_mut() {
        let path = fluidscalar_path(group, index, &scalar.multi_index);
        let data = container.read_block(&path, &origin, &size)?;
        scalar.grid.set_interior(&data);
        let scale = scales.get(index).copied().unwrap_or(1.0);
        if scale != 1.0 {
            scalar.grid.scale(scale);
        }
    }
    Ok(component)
}

impl<'a> SnapshotFormat<'a> for StandardSnapshot<'a> {
    const KIND: SnapshotKind = SnapshotKind::Standard;

    fn is_this_type(path: &Path) -> bool {
        Container::open(path)
            .and_then(|container| container.attr_f64("", "Ωcdm"))
            .is_ok()
    }

    fn populate(
        components: Cow<'a, [Component]>,
        params: &SnapshotParams,
        ctx: &RunContext,
    ) -> Result<Self> {
        let config = ctx.config;
        let a = if config.cosmology.enable_hubble {
            params.a.unwrap_or(config.a)
        } else {
            config.a
        };
        Ok(Self {
            params: SnapshotParams {
                h0: Some(params.h0.unwrap_or(config.cosmology.h0)),
                a: Some(a),
                boxsize: Some(params.boxsize.unwrap_or(config.boxsize)),
                omega_cdm: Some(params.omega_cdm.unwrap_or(config.cosmology.omega_cdm)),
                omega_b: Some(params.omega_b.unwrap_or(config.cosmology.omega_b)),
                omega_m: None,
                omega_lambda: None,
            },
            units: config.units.labels().clone(),
            components,
        })
    }

    fn save(&self, path: &Path, ctx: &RunContext) -> Result<PathBuf> {
        let extension = Self::KIND.extension();
        let path = if path.to_string_lossy().ends_with(extension) {
            path.to_path_buf()
        } else {
            PathBuf::from(format!("{}{}", path.display(), extension))
        };
        master_info!(ctx, "Saving standard snapshot \"{}\" ...", path.display());

        let mut container = Container::create(&path, ctx.comm)?;
        container.set_attr("", "unit length", self.units.length.as_str())?;
        container.set_attr("", "unit time", self.units.time.as_str())?;
        container.set_attr("", "unit mass", self.units.mass.as_str())?;
        let attrs = [
            ("H0", self.params.h0),
            ("a", self.params.a),
            ("boxsize", self.params.boxsize),
            ("Ωcdm", self.params.omega_cdm),
            ("Ωb", self.params.omega_b),
        ];
        for (name, value) in attrs {
            if let Some(value) = value {
                container.set_attr("", name, value)?;
            }
        }

        for component in self.components.iter() {
            let group = component_group(component.name());
            container.create_group(&group)?;
            container.set_attr(&group, "species", component.species().as_str())?;
            match component {
                Component::Particles(particles) => {
                    save_particles(&mut container, &group, particles, ctx)?
                }
                Component::Fluid(fluid) => save_fluid(&mut container, &group, fluid, ctx)?,
            }
        }

        container.close(ctx.comm)?;
        master_info!(ctx, "done");
        Ok(path)
    }

    fn load(path: &Path, only_params: bool, ctx: &RunContext) -> Result<Self> {
        if only_params {
            master_info!(ctx, "Loading parameters of snapshot \"{}\" ...", path.display());
        } else {
            master_info!(ctx, "Loading snapshot \"{}\" ...", path.display());
        }
        let mut container = Container::open(path)?;

        let units = UnitLabels {
            length: container.attr_str("", "unit length")?.to_string(),
            time: container.attr_str("", "unit time")?.to_string(),
            mass: container.attr_str("", "unit mass")?.to_string(),
        };
        let factors = ctx.config.units.conversion_factors(&units)?;

        let params = SnapshotParams {
            h0: Some(container.attr_f64("", "H0")? / factors.time),
            a: Some(container.attr_f64("", "a")?),
            boxsize: Some(container.attr_f64("", "boxsize")? * factors.length),
            omega_cdm: Some(container.attr_f64("", "Ωcdm")?),
            omega_b: Some(container.attr_f64("", "Ωb")?),
            omega_m: None,
            omega_lambda: None,
        };

        let names = if container.has_group(COMPONENTS) {
            container.group_names(COMPONENTS)?
        } else {
            Vec::new()
        };
        let mut components = Vec::with_capacity(names.len());
        for name in names {
            let group = component_group(&name);
            let species_name = container.attr_str(&group, "species")?.to_string();
            let species: Species = species_name
                .parse()
                .map_err(SnapshotError::UnknownSpecies)?;
            let component = match species.representation() {
                Representation::Particles => Component::Particles(
                    load_particles(&mut container, &group, &name, species, only_params, &factors, ctx)?,
                ),
                Representation::Fluid => Component::Fluid(load_fluid(
                    &mut container,
                    &group,
                    &name,
                    species,
                    only_params,
                    &factors,
                    ctx,
                )?),
            };
            components.push(component);
        }
        master_info!(ctx, "done");

        Ok(Self {
            params,
            units,
            components: Cow::Owned(components),
        })
    }

    fn params(&self) -> &SnapshotParams {
        &self.params
    }

    fn components(&self) -> &[Component] {
        &self.components
    }

    fn components_mut(&mut self) -> &mut [Component] {
        self.components.to_mut()
    }

    fn into_components(self) -> Vec<Component> {
        self.components.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fluid::Independent;
    use crate::core::parallel::comm::{ProcessGroup, SerialComm};
    use crate::core::parallel::domain::DomainLayout;
    use crate::engine::config::{RunConfig, RunConfigBuilder};
    use itertools::iproduct;
    use nalgebra::{Point3, Vector3};
    use tempfile::tempdir;

    fn config(length: &str) -> RunConfig {
        RunConfigBuilder::new()
            .units(length, "Gyr", "1e10*m_sun")
            .boxsize_expr("100*Mpc")
            .hubble_constant(67.7)
            .omega_cdm(0.26)
            .omega_b(0.049)
            .scale_factor(0.5)
            .build()
            .unwrap()
    }

    fn halos(n: usize, boxsize: f64) -> ParticleComponent {
        let mut component = ParticleComponent::new("halos", Species::DarkMatterParticles, n, 2.0);
        for i in 0..n {
            let x = boxsize * i as f64 / n as f64;
            component.push(Point3::new(x, x / 2.0, x / 3.0), Vector3::new(i as f64, -1.0, 0.5));
        }
        component
    }

    fn gas(layout: &DomainLayout, gridsize: usize, eos: EquationOfState) -> FluidComponent {
        let size = layout.domain_size(gridsize);
        let origin = layout.origin(gridsize, layout.coords);
        let mut component = FluidComponent::new("gas", Species::BaryonFluid, gridsize, 2, eos, size);
        for (index, scalar) in component.scalars_mut() {
            let values: Vec<f64> = iproduct!(0..size[0], 0..size[1], 0..size[2])
                .map(|(i, j, k)| {
                    let (x, y, z) = (origin[0] + i, origin[1] + j, origin[2] + k);
                    (index * 1000 + scalar.multi_index.0[0] * 100 + x * 16 + y * 4 + z) as f64
                })
                .collect();
            scalar.grid.set_interior(&values);
        }
        component
    }

    #[test]
    fn serial_round_trip_preserves_particles_and_params() {
        let dir = tempdir().unwrap();
        let config = config("kpc");
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let components = vec![Component::from(halos(10, config.boxsize))];

        let snapshot =
            StandardSnapshot::populate(Cow::Borrowed(&components), &SnapshotParams::default(), &ctx)
                .unwrap();
        let saved = snapshot.save(&dir.path().join("snap"), &ctx).unwrap();
        assert_eq!(saved.file_name().unwrap(), "snap.cosnap");
        assert!(StandardSnapshot::is_this_type(&saved));

        let loaded = StandardSnapshot::load(&saved, false, &ctx).unwrap();
        assert_eq!(loaded.components(), components.as_slice());
        assert_eq!(loaded.params().h0, Some(config.cosmology.h0));
        assert_eq!(loaded.params().a, Some(0.5));
        assert_eq!(loaded.params().boxsize, Some(config.boxsize));
        assert_eq!(loaded.units(), config.units.labels());
    }

    #[test]
    fn re_saving_a_loaded_snapshot_keeps_its_parameter_attributes() {
        let dir = tempdir().unwrap();
        let config = config("kpc");
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let params = SnapshotParams {
            a: Some(0.25),
            boxsize: Some(1234.5),
            omega_b: Some(0.04),
            ..Default::default()
        };
        let first = StandardSnapshot::populate(Cow::Owned(Vec::new()), &params, &ctx)
            .unwrap()
            .save(&dir.path().join("first.cosnap"), &ctx)
            .unwrap();
        let loaded = StandardSnapshot::load(&first, true, &ctx).unwrap();
        let second = StandardSnapshot::populate(Cow::Owned(Vec::new()), loaded.params(), &ctx)
            .unwrap()
            .save(&dir.path().join("second.cosnap"), &ctx)
            .unwrap();

        let (first, second) = (Container::open(&first).unwrap(), Container::open(&second).unwrap());
        for name in ["H0", "a", "boxsize", "Ωcdm", "Ωb"] {
            assert_eq!(
                first.attr_f64("", name).unwrap(),
                second.attr_f64("", name).unwrap(),
                "attribute {} changed",
                name
            );
        }
        assert_eq!(first.attr_f64("", "a").unwrap(), 0.25);
    }

    #[test]
    fn loading_in_other_units_rescales_lengths_and_momenta() {
        let dir = tempdir().unwrap();
        let kpc = config("kpc");
        let mpc = config("Mpc");
        let comm = SerialComm::new();
        let components = vec![Component::from(halos(4, kpc.boxsize))];

        let ctx = RunContext::new(&kpc, &comm);
        let path = StandardSnapshot::populate(Cow::Borrowed(&components), &SnapshotParams::default(), &ctx)
            .unwrap()
            .save(&dir.path().join("units"), &ctx)
            .unwrap();

        let ctx = RunContext::new(&mpc, &comm);
        let loaded = StandardSnapshot::load(&path, false, &ctx).unwrap();
        let original = components[0].as_particles().unwrap();
        let particles = loaded.components()[0].as_particles().unwrap();
        for i in 0..4 {
            assert!((particles.posx[i] - original.posx[i] / 1000.0).abs() < 1e-9);
            assert!((particles.momx[i] - original.momx[i] / 1000.0).abs() < 1e-9);
        }
        assert!((loaded.params().boxsize.unwrap() - 100.0).abs() < 1e-9);
        assert!((loaded.params().h0.unwrap() - mpc.cosmology.h0).abs() < 1e-12);
    }

    #[test]
    fn parallel_round_trip_with_a_different_process_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parallel.cosnap");
        let config = config("kpc");
        let gridsize = 4;
        let eos = EquationOfState::Tabulated {
            independent: Independent::ScaleFactor,
            x: vec![0.1, 0.5, 1.0],
            w: vec![0.3, 0.2, 0.1],
        };

        let saved = ProcessGroup::run(4, |comm| {
            let ctx = RunContext::new(&config, comm);
            let all = halos(12, config.boxsize);
            let (start, count) = partition(12, comm);
            let mut local = ParticleComponent::new("halos", all.species, 12, all.mass);
            for i in start..start + count {
                local.push(all.position(i), all.momentum(i));
            }
            let components = vec![
                Component::from(local),
                Component::from(gas(&ctx.layout, gridsize, eos.clone())),
            ];
            StandardSnapshot::populate(Cow::Owned(components), &SnapshotParams::default(), &ctx)?
                .save(&path, &ctx)
        });
        assert!(saved.iter().all(|r| r.is_ok()));

        let loaded = ProcessGroup::run(2, |comm| {
            let ctx = RunContext::new(&config, comm);
            let snapshot = StandardSnapshot::load(&path, false, &ctx)?;
            Ok::<_, SnapshotError>((ctx.layout, snapshot.into_components()))
        });

        let reference = halos(12, config.boxsize);
        let mut posx = Vec::new();
        for result in loaded {
            let (layout, components) = result.unwrap();
            assert_eq!(components[0].name(), "gas");
            let particles = components[1].as_particles().unwrap();
            assert_eq!(particles.n, 12);
            assert_eq!(particles.n_local(), 6);
            posx.extend_from_slice(&particles.posx);

            let fluid = components[0].as_fluid().unwrap();
            assert_eq!(fluid.eos, eos);
            let expected = gas(&layout, gridsize, eos.clone());
            for ((_, got), (_, want)) in fluid.scalars().zip(expected.scalars()) {
                assert_eq!(got.grid.interior(), want.grid.interior());
            }
        }
        assert_eq!(posx, reference.posx);

        let mut container = Container::open(&path).unwrap();
        assert_eq!(
            container.read_all("components/gas/Jy").unwrap(),
            container.read_all("components/gas/fluidvar_1/fluidscalar_(1,)").unwrap()
        );
        assert!(container.dataset("components/gas/σ").is_err());
    }

    #[test]
    fn particle_count_must_match_the_processes_slices() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overfull.cosnap");
        let config = config("kpc");

        let results = ProcessGroup::run(2, |comm| {
            let ctx = RunContext::new(&config, comm);
            let components = vec![Component::from(halos(3, config.boxsize))];
            StandardSnapshot::populate(Cow::Owned(components), &SnapshotParams::default(), &ctx)?
                .save(&path, &ctx)
        });
        for result in results {
            assert!(matches!(
                result,
                Err(SnapshotError::ParticleCount { n: 3, total: 6, .. })
            ));
        }
    }

    #[test]
    fn grid_not_divisible_by_process_count_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.cosnap");
        let config = config("kpc");

        let results = ProcessGroup::run(2, |comm| {
            let ctx = RunContext::new(&config, comm);
            let fluid = FluidComponent::new(
                "gas",
                Species::BaryonFluid,
                3,
                1,
                EquationOfState::Constant(0.0),
                [1, 3, 3],
            );
            StandardSnapshot::populate(Cow::Owned(vec![fluid.into()]), &SnapshotParams::default(), &ctx)?
                .save(&path, &ctx)
        });
        for result in results {
            assert!(matches!(
                result,
                Err(SnapshotError::GridDivisibility { gridsize: 3, processes: 2, .. })
            ));
        }
    }

    #[test]
    fn foreign_files_are_not_recognized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain text").unwrap();
        assert!(!StandardSnapshot::is_this_type(&path));
        assert!(!StandardSnapshot::is_this_type(&dir.path().join("missing")));

        let corrupt = dir.path().join("corrupt.cosnap");
        let mut raw = crate::core::io::container::MAGIC.to_vec();
        raw.extend_from_slice(&crate::core::io::container::VERSION.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&32u64.to_le_bytes());
        raw.extend_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&corrupt, raw).unwrap();
        assert!(!StandardSnapshot::is_this_type(&corrupt));
    }
}
