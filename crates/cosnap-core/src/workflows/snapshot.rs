use crate::core::models::component::Component;
use crate::core::models::params::SnapshotParams;
use crate::core::parallel::domain::{exchange, populate_ghosts};
use crate::engine::context::RunContext;
use crate::engine::error::{Result, SnapshotError};
use crate::engine::formats::{Snapshot, SnapshotKind};
use crate::engine::validate::{compare_parameters, out_of_bounds_check};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Anything that can be saved as the component list of a snapshot.
///
/// Implemented for a single component as well as for slices and vectors of
/// components, borrowed or owned.
pub trait IntoComponentList<'a> {
    fn into_component_list(self) -> Cow<'a, [Component]>;
}

impl<'a> IntoComponentList<'a> for &'a Component {
    fn into_component_list(self) -> Cow<'a, [Component]> {
        Cow::Borrowed(std::slice::from_ref(self))
    }
}

impl<'a> IntoComponentList<'a> for &'a [Component] {
    fn into_component_list(self) -> Cow<'a, [Component]> {
        Cow::Borrowed(self)
    }
}

impl<'a> IntoComponentList<'a> for &'a Vec<Component> {
    fn into_component_list(self) -> Cow<'a, [Component]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl<'a> IntoComponentList<'a> for Vec<Component> {
    fn into_component_list(self) -> Cow<'a, [Component]> {
        Cow::Owned(self)
    }
}

/// Saves components as a snapshot in the format configured for the run.
///
/// Parameters absent from `params` are taken from the run configuration. The
/// master process creates the destination directory before any process opens
/// the file. Must be called collectively.
///
/// # Arguments
///
/// * `components` - One component or a list of components.
/// * `path` - The destination filename; a format extension may be appended.
/// * `params` - Parameters overriding those of the run.
/// * `ctx` - The run configuration and process group.
///
/// # Return
///
/// The filename actually written.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the components cannot be stored in the
/// configured format or writing fails on any process.
#[instrument(skip_all, name = "snapshot_save", fields(path = %path.display()))]
pub fn save<'a>(
    components: impl IntoComponentList<'a>,
    path: &Path,
    params: &SnapshotParams,
    ctx: &RunContext,
) -> Result<PathBuf> {
    let kind = ctx.config.snapshot_type;
    let snapshot = Snapshot::populate(kind, components.into_component_list(), params, ctx)?;

    if ctx.is_master() {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
    }
    ctx.comm.barrier()?;

    snapshot.save(path, ctx)
}

/// Options controlling what [`load`] does after reading a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Warn about parameters differing from the current run.
    pub compare_params: bool,
    /// Read parameters and component attributes but no component data.
    pub only_params: bool,
    /// Return the component list instead of the snapshot.
    pub only_components: bool,
    /// Redistribute particles to their domains and fill fluid ghost points.
    pub do_exchange: bool,
    /// Convert the loaded snapshot to this format.
    pub as_if: Option<SnapshotKind>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            compare_params: true,
            only_params: false,
            only_components: false,
            do_exchange: true,
            as_if: None,
        }
    }
}

/// The result of a [`load`].
#[derive(Debug)]
pub enum Loaded {
    Snapshot(Snapshot<'static>),
    Components(Vec<Component>),
}

impl Loaded {
    pub fn components(&self) -> &[Component] {
        match self {
            Loaded::Snapshot(snapshot) => snapshot.components(),
            Loaded::Components(components) => components,
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot<'static>> {
        match self {
            Loaded::Snapshot(snapshot) => Some(snapshot),
            Loaded::Components(_) => None,
        }
    }

    pub fn into_components(self) -> Vec<Component> {
        match self {
            Loaded::Snapshot(snapshot) => snapshot.into_components(),
            Loaded::Components(components) => components,
        }
    }
}

/// Loads a snapshot of any registered format. Must be called collectively.
///
/// Particle positions are checked against the snapshot's box before being
/// redistributed; particles exactly on the upper box edge are wrapped to the
/// lower edge.
///
/// # Return
///
/// `None` if `path` is empty, the loaded snapshot (possibly converted per
/// [`LoadOptions::as_if`]) or just its components otherwise.
///
/// # Errors
///
/// Returns [`SnapshotError::SnapshotNotFound`] if the file does not exist,
/// [`SnapshotError::FormatRecognition`] if no format recognizes it,
/// [`SnapshotError::OutOfBounds`] for particles outside the box, and any
/// error raised while reading or redistributing.
#[instrument(skip_all, name = "snapshot_load", fields(path = %path.display()))]
pub fn load(path: &Path, options: &LoadOptions, ctx: &RunContext) -> Result<Option<Loaded>> {
    if path.as_os_str().is_empty() {
        return Ok(None);
    }
    let kind = detect_format(path)?.ok_or_else(|| SnapshotError::FormatRecognition {
        path: path.to_path_buf(),
        known: SnapshotKind::ALL.iter().map(|kind| kind.display_name()).collect(),
    })?;
    debug!(%kind, "Snapshot format detected");

    let mut snapshot = Snapshot::load(kind, path, options.only_params, ctx)?;

    if options.compare_params {
        compare_parameters(snapshot.params(), path, ctx);
    }

    let boxsize = snapshot.params().boxsize.unwrap_or(ctx.config.boxsize);
    let unit = &ctx.config.units.labels().length;
    for component in snapshot.components_mut() {
        out_of_bounds_check(component, boxsize, unit)?;
    }

    if !options.only_params && options.do_exchange {
        let components = snapshot.components_mut();
        let last_particles = components
            .iter()
            .rposition(|component| component.as_particles().is_some());
        for (i, component) in components.iter_mut().enumerate() {
            if let Some(particles) = component.as_particles_mut() {
                let reset = Some(i) == last_particles;
                exchange(particles, ctx.config.boxsize, &ctx.layout, ctx.comm, reset)?;
            }
        }
        for component in components.iter_mut() {
            if let Some(fluid) = component.as_fluid_mut() {
                populate_ghosts(fluid, &ctx.layout, ctx.comm)?;
            }
        }
    }

    if options.only_components {
        return Ok(Some(Loaded::Components(snapshot.into_components())));
    }

    match options.as_if {
        Some(target) if target != kind => {
            debug!(from = %kind, to = %target, "Converting loaded snapshot");
            let params = *snapshot.params();
            let converted =
                Snapshot::populate(target, Cow::Owned(snapshot.into_components()), &params, ctx)?;
            Ok(Some(Loaded::Snapshot(converted)))
        }
        _ => Ok(Some(Loaded::Snapshot(snapshot))),
    }
}

/// Determines the format of a snapshot file by asking every registered
/// format in turn.
///
/// # Return
///
/// The first format recognizing the file, or `None` if none does.
///
/// # Errors
///
/// Returns [`SnapshotError::SnapshotNotFound`] if the file does not exist.
pub fn detect_format(path: &Path) -> Result<Option<SnapshotKind>> {
    if !path.exists() {
        return Err(SnapshotError::SnapshotNotFound(path.to_path_buf()));
    }
    Ok(SnapshotKind::ALL
        .into_iter()
        .find(|kind| kind.is_this_type(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fluid::{EquationOfState, FluidComponent, GHOST_LAYERS};
    use crate::core::models::particles::ParticleComponent;
    use crate::core::models::species::Species;
    use crate::core::parallel::comm::{Communicator, ProcessGroup, SerialComm, Traffic};
    use crate::core::parallel::domain::{DomainLayout, partition};
    use crate::engine::config::{RunConfig, RunConfigBuilder};
    use nalgebra::{Point3, Vector3};
    use tempfile::tempdir;

    fn config(kind: SnapshotKind) -> RunConfig {
        RunConfigBuilder::new()
            .units("kpc", "Gyr", "1e10*m_sun")
            .boxsize(1000.0)
            .hubble_constant(67.7)
            .omega_cdm(0.26)
            .omega_b(0.049)
            .snapshot_type(kind)
            .build()
            .unwrap()
    }

    fn particle_at(i: usize, n: usize, boxsize: f64) -> (Point3<f64>, Vector3<f64>) {
        let t = (i as f64 + 0.5) / n as f64;
        (
            Point3::new(t * boxsize, (1.0 - t) * boxsize, (t * 7.0).fract() * boxsize),
            Vector3::new(t, 2.0 * t, -t),
        )
    }

    fn halos(n: usize, comm: &dyn Communicator, boxsize: f64) -> ParticleComponent {
        let (start, count) = partition(n, comm);
        let mut component = ParticleComponent::new("halos", Species::DarkMatterParticles, n, 1.5);
        for i in start..start + count {
            let (position, momentum) = particle_at(i, n, boxsize);
            component.push(position, momentum);
        }
        component
    }

    fn density(layout: &DomainLayout, gridsize: usize) -> FluidComponent {
        let size = layout.domain_size(gridsize);
        let origin = layout.origin(gridsize, layout.coords);
        let mut fluid = FluidComponent::new(
            "gas",
            Species::BaryonFluid,
            gridsize,
            1,
            EquationOfState::Constant(1.0 / 3.0),
            size,
        );
        let values: Vec<f64> = itertools::iproduct!(0..size[0], 0..size[1], 0..size[2])
            .map(|(i, j, k)| ((origin[0] + i) * 100 + (origin[1] + j) * 10 + origin[2] + k) as f64)
            .collect();
        fluid.fluidvars[0].scalars[0].grid.set_interior(&values);
        fluid
    }

    #[test]
    fn empty_filename_loads_nothing() {
        let config = config(SnapshotKind::Standard);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        assert!(load(Path::new(""), &LoadOptions::default(), &ctx).unwrap().is_none());
    }

    #[test]
    fn formats_are_detected_by_content() {
        let dir = tempdir().unwrap();
        let comm = SerialComm::new();
        let mut saved = Vec::new();
        for kind in SnapshotKind::ALL {
            let config = config(kind);
            let ctx = RunContext::new(&config, &comm);
            let component = Component::from(halos(4, &comm, config.boxsize));
            let path = save(&component, &dir.path().join(kind.name()), &SnapshotParams::default(), &ctx)
                .unwrap();
            saved.push((kind, path));
        }
        assert!(saved[0].1.to_string_lossy().ends_with(".cosnap"));
        for (kind, path) in &saved {
            assert_eq!(detect_format(path).unwrap(), Some(*kind));
        }

        let text = dir.path().join("notes.txt");
        fs::write(&text, "not a snapshot at all").unwrap();
        assert_eq!(detect_format(&text).unwrap(), None);

        let config = config(SnapshotKind::Standard);
        let ctx = RunContext::new(&config, &comm);
        match load(&text, &LoadOptions::default(), &ctx) {
            Err(SnapshotError::FormatRecognition { known, .. }) => {
                assert_eq!(known, vec!["standard", "GADGET2"])
            }
            other => panic!("expected recognition failure, got {:?}", other),
        }
        assert!(matches!(
            detect_format(&dir.path().join("missing")),
            Err(SnapshotError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn save_creates_the_destination_directory() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Standard);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let components = vec![Component::from(halos(2, &comm, config.boxsize))];
        let path = save(
            &components,
            &dir.path().join("output/run1/snapshot_a=1.00"),
            &SnapshotParams::default(),
            &ctx,
        )
        .unwrap();
        assert_eq!(path, dir.path().join("output/run1/snapshot_a=1.00.cosnap"));
        assert!(path.exists());
    }

    #[test]
    fn parallel_load_redistributes_particles_and_fills_ghosts() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Standard);
        let n = 40;
        let gridsize = 4;

        let saved = ProcessGroup::run(2, |comm| {
            let ctx = RunContext::new(&config, comm);
            let components = vec![
                Component::from(halos(n, comm, config.boxsize)),
                Component::from(density(&ctx.layout, gridsize)),
            ];
            save(components, &dir.path().join("mixed"), &SnapshotParams::default(), &ctx)
        });
        let path = saved.into_iter().next().unwrap().unwrap();

        let loaded = ProcessGroup::run(4, |comm| {
            let ctx = RunContext::new(&config, comm);
            let loaded = load(&path, &LoadOptions::default(), &ctx)?;
            let components = loaded.map(Loaded::into_components).unwrap_or_default();
            Ok::<_, SnapshotError>((ctx.layout, components))
        });

        let mut positions = Vec::new();
        for result in loaded {
            let (layout, components) = result.unwrap();

            let particles = components[1].as_particles().unwrap();
            assert_eq!(particles.n, n);
            for i in 0..particles.n_local() {
                let position = particles.position(i);
                assert_eq!(layout.owner_of(&position, config.boxsize), layout.rank());
                positions.push((position.x, position.y, position.z));
            }

            // The lower ghost layer along x mirrors the upper neighbour's last plane.
            let fluid = components[0].as_fluid().unwrap();
            let grid = &fluid.fluidvars[0].scalars[0].grid;
            let size = grid.size();
            let origin = layout.origin(gridsize, layout.coords);
            let x = (origin[0] + gridsize - 1) % gridsize;
            let (y, z) = (origin[1], origin[2]);
            assert_eq!(
                grid.get(GHOST_LAYERS - 1, GHOST_LAYERS, GHOST_LAYERS),
                (x * 100 + y * 10 + z) as f64
            );
            assert_eq!(size, layout.domain_size(gridsize));
        }
        assert_eq!(positions.len(), n);

        let mut expected: Vec<_> = (0..n)
            .map(|i| {
                let (p, _) = particle_at(i, n, config.boxsize);
                (p.x, p.y, p.z)
            })
            .collect();
        let key = |p: &(f64, f64, f64)| p.0;
        positions.sort_by(|a, b| key(a).total_cmp(&key(b)));
        expected.sort_by(|a, b| key(a).total_cmp(&key(b)));
        assert_eq!(positions, expected);
    }

    #[test]
    fn initial_exchange_traffic_is_forgotten() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Gadget2);
        let path = dir.path().join("traffic");

        let saved = ProcessGroup::run(3, |comm| {
            let ctx = RunContext::new(&config, comm);
            save(&Component::from(halos(30, comm, config.boxsize)), &path, &SnapshotParams::default(), &ctx)
        });
        assert!(saved.iter().all(|r| r.is_ok()));

        let traffic = ProcessGroup::run(3, |comm| {
            let ctx = RunContext::new(&config, comm);
            let loaded = load(&path, &LoadOptions::default(), &ctx)?;
            let n_local = loaded
                .as_ref()
                .and_then(|l| l.components()[0].as_particles().map(|p| p.n_local()))
                .unwrap_or(0);
            Ok::<_, SnapshotError>((n_local, comm.traffic()))
        });
        let mut total = 0;
        for result in traffic {
            let (n_local, traffic) = result.unwrap();
            assert_eq!(traffic, Traffic::default());
            total += n_local;
        }
        assert_eq!(total, 30);
    }

    #[test]
    fn particles_on_the_box_edge_wrap_and_outside_ones_fail() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Standard);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let options = LoadOptions {
            do_exchange: false,
            ..Default::default()
        };

        let mut edge = ParticleComponent::new("edge", Species::MatterParticles, 1, 1.0);
        edge.push(Point3::new(config.boxsize, 10.0, 20.0), Vector3::zeros());
        let path = save(&Component::from(edge), &dir.path().join("edge"), &SnapshotParams::default(), &ctx)
            .unwrap();
        let loaded = load(&path, &options, &ctx).unwrap().unwrap();
        let particles = loaded.components()[0].as_particles().unwrap();
        assert_eq!(particles.position(0), Point3::new(0.0, 10.0, 20.0));

        let mut outside = ParticleComponent::new("outside", Species::MatterParticles, 2, 1.0);
        outside.push(Point3::new(1.0, 2.0, 3.0), Vector3::zeros());
        outside.push(Point3::new(1.0, config.boxsize * 1.5, 3.0), Vector3::zeros());
        let path = save(&Component::from(outside), &dir.path().join("outside"), &SnapshotParams::default(), &ctx)
            .unwrap();
        match load(&path, &options, &ctx) {
            Err(SnapshotError::OutOfBounds {
                index, component, ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(component, "outside");
            }
            other => panic!("expected out of bounds error, got {:?}", other),
        }
    }

    #[test]
    fn loading_as_another_format_converts_without_losing_data() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Standard);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let components = vec![Component::from(halos(5, &comm, config.boxsize))];
        let path = save(&components, &dir.path().join("convert"), &SnapshotParams::default(), &ctx)
            .unwrap();

        let options = LoadOptions {
            as_if: Some(SnapshotKind::Gadget2),
            ..Default::default()
        };
        let loaded = load(&path, &options, &ctx).unwrap().unwrap();
        let snapshot = loaded.snapshot().unwrap();
        assert_eq!(snapshot.kind(), SnapshotKind::Gadget2);
        assert_eq!(snapshot.components(), components.as_slice());
        let params = snapshot.params();
        assert_eq!(params.boxsize, Some(config.boxsize));
        assert!((params.omega_m.unwrap() - 0.309).abs() < 1e-12);
        match snapshot {
            Snapshot::Gadget2(gadget) => {
                assert_eq!(gadget.header().npart[1], 5);
                assert_eq!(gadget.ids(), &[0, 1, 2, 3, 4]);
            }
            other => panic!("expected a GADGET2 snapshot, got {:?}", other.kind()),
        }

        let same = LoadOptions {
            as_if: Some(SnapshotKind::Standard),
            ..Default::default()
        };
        let loaded = load(&path, &same, &ctx).unwrap().unwrap();
        assert_eq!(loaded.snapshot().unwrap().kind(), SnapshotKind::Standard);
    }

    #[test]
    fn only_params_and_only_components_shape_the_result() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Gadget2);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let component = Component::from(halos(3, &comm, config.boxsize));
        let path = save(&component, &dir.path().join("gadget"), &SnapshotParams::default(), &ctx)
            .unwrap();

        let options = LoadOptions {
            only_params: true,
            only_components: true,
            ..Default::default()
        };
        match load(&path, &options, &ctx).unwrap().unwrap() {
            Loaded::Components(components) => {
                let particles = components[0].as_particles().unwrap();
                assert_eq!(particles.n, 3);
                assert_eq!(particles.n_local(), 0);
            }
            Loaded::Snapshot(_) => panic!("expected a component list"),
        }
    }

    #[test]
    fn mismatching_parameters_do_not_prevent_loading() {
        let dir = tempdir().unwrap();
        let config = config(SnapshotKind::Standard);
        let comm = SerialComm::new();
        let ctx = RunContext::new(&config, &comm);
        let params = SnapshotParams {
            omega_b: Some(0.2),
            ..Default::default()
        };
        let path = save(Vec::<Component>::new(), &dir.path().join("params"), &params, &ctx).unwrap();
        let loaded = load(&path, &LoadOptions::default(), &ctx).unwrap().unwrap();
        assert_eq!(loaded.snapshot().unwrap().params().omega_b, Some(0.2));
        assert!(loaded.components().is_empty());
    }
}
