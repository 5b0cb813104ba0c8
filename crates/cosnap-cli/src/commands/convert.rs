use super::read_header;
use crate::cli::ConvertArgs;
use crate::config::build_config;
use crate::error::{CliError, Result};
use cosnap::core::models::params::SnapshotParams;
use cosnap::core::parallel::comm::{ProcessGroup, ThreadComm};
use cosnap::engine::config::RunConfig;
use cosnap::engine::context::RunContext;
use cosnap::engine::error::SnapshotError;
use cosnap::workflows::snapshot::{self, LoadOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn run(args: ConvertArgs) -> Result<()> {
    if args.procs == 0 {
        return Err(CliError::Argument(
            "At least one process is needed for the conversion".to_string(),
        ));
    }

    let base = build_config(&args.run)?;
    let header = read_header(&args.input, &base, true)?;
    let params = header
        .snapshot()
        .map(|snapshot| *snapshot.params())
        .unwrap_or_default();
    let config = adopt_snapshot(&base, &params).with_snapshot_type(args.to);

    info!(
        "Converting {:?} to a {} snapshot on {} process(es)",
        &args.input,
        args.to.display_name(),
        args.procs
    );
    let written = convert(&args.input, &args.output, &config, args.procs)?;

    println!(
        "✓ {} snapshot written to: {}",
        args.to.display_name(),
        written.display()
    );
    Ok(())
}

/// The run configuration a conversion executes under: the box and time of
/// the snapshot being converted, everything else from `base`.
fn adopt_snapshot(base: &RunConfig, params: &SnapshotParams) -> RunConfig {
    RunConfig {
        boxsize: params.boxsize.unwrap_or(base.boxsize),
        ..base.with_scale_factor(params.a.unwrap_or(base.a))
    }
}

/// Loads `input` and saves it to `output` in the configured snapshot type,
/// collectively on `procs` processes.
fn convert(input: &Path, output: &Path, config: &RunConfig, procs: usize) -> Result<PathBuf> {
    let outcomes = ProcessGroup::run(procs, |comm: &ThreadComm| {
        convert_on_rank(input, output, config, comm)
    });
    first_failure(outcomes)
}

fn convert_on_rank(
    input: &Path,
    output: &Path,
    config: &RunConfig,
    comm: &ThreadComm,
) -> std::result::Result<PathBuf, SnapshotError> {
    let ctx = RunContext::new(config, comm);
    let options = LoadOptions {
        compare_params: false,
        as_if: Some(config.snapshot_type),
        ..Default::default()
    };
    let loaded = snapshot::load(input, &options, &ctx)?
        .ok_or_else(|| SnapshotError::SnapshotNotFound(input.to_path_buf()))?;
    let params = loaded
        .snapshot()
        .map(|snapshot| *snapshot.params())
        .unwrap_or_default();
    debug!(
        components = loaded.components().len(),
        "Snapshot loaded, saving"
    );
    snapshot::save(loaded.into_components(), output, &params, &ctx)
}

/// Reduces per-rank outcomes to the master's result, preferring the error of
/// the rank that failed over the aborts it caused on the others.
fn first_failure(outcomes: Vec<std::result::Result<PathBuf, SnapshotError>>) -> Result<PathBuf> {
    let mut written = None;
    let mut abort = None;
    for outcome in outcomes {
        match outcome {
            Ok(path) => {
                written.get_or_insert(path);
            }
            Err(e) if e.is_group_abort() => {
                abort.get_or_insert(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    match (abort, written) {
        (Some(e), _) => Err(e.into()),
        (None, Some(path)) => Ok(path),
        (None, None) => Err(CliError::Argument(
            "No process took part in the conversion".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;
    use cosnap::core::models::component::Component;
    use cosnap::core::parallel::comm::{CommError, SerialComm};
    use cosnap::engine::config::RunConfigBuilder;
    use cosnap::engine::formats::SnapshotKind;
    use cosnap::workflows::snapshot::detect_format;
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

    fn load_serial(path: &Path, config: &RunConfig) -> Vec<Component> {
        let comm = SerialComm::new();
        let ctx = RunContext::new(config, &comm);
        snapshot::load(path, &LoadOptions::default(), &ctx)
            .unwrap()
            .unwrap()
            .into_components()
    }

    fn sorted_positions(component: &Component) -> Vec<[f64; 3]> {
        let particles = component.as_particles().unwrap();
        let mut positions: Vec<[f64; 3]> = (0..particles.n_local())
            .map(|i| {
                let p = particles.position(i);
                [p.x, p.y, p.z]
            })
            .collect();
        positions.sort_by(|a, b| a[0].total_cmp(&b[0]));
        positions
    }

    fn assert_close(a: &[[f64; 3]], b: &[[f64; 3]], rel: f64) {
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(b) {
            for k in 0..3 {
                assert!(
                    (p[k] - q[k]).abs() <= rel * q[k].abs().max(1.0),
                    "{:?} != {:?}",
                    p,
                    q
                );
            }
        }
    }

    #[test]
    fn converts_standard_to_gadget2_on_several_processes() {
        let dir = tempdir().unwrap();
        let source_config = config(SnapshotKind::Standard);
        let original = fixtures::halos(6, source_config.boxsize);
        let input = fixtures::write_snapshot(
            &[original.clone()],
            &dir.path().join("snap"),
            &source_config,
            0.5,
        );

        let target = adopt_snapshot(
            &source_config,
            &SnapshotParams {
                a: Some(0.5),
                ..Default::default()
            },
        )
        .with_snapshot_type(SnapshotKind::Gadget2);
        let output = dir.path().join("converted/snap.gadget");
        let written = convert(&input, &output, &target, 2).unwrap();

        assert_eq!(written, output);
        assert_eq!(detect_format(&written).unwrap(), Some(SnapshotKind::Gadget2));

        let components = load_serial(&written, &target);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name(), "GADGET halos");
        assert_eq!(components[0].as_particles().unwrap().n, 6);
        assert_close(
            &sorted_positions(&components[0]),
            &sorted_positions(&original),
            1e-6,
        );
    }

    #[test]
    fn converts_gadget2_to_standard() {
        let dir = tempdir().unwrap();
        let source_config = config(SnapshotKind::Gadget2);
        let original = fixtures::halos(5, source_config.boxsize);
        let input = fixtures::write_snapshot(
            &[original.clone()],
            &dir.path().join("legacy"),
            &source_config,
            1.0,
        );

        let target = source_config.with_snapshot_type(SnapshotKind::Standard);
        let written = convert(&input, &dir.path().join("modern"), &target, 3).unwrap();

        assert_eq!(written.file_name().unwrap(), "modern.cosnap");
        let components = load_serial(&written, &target);
        assert_eq!(components[0].name(), "GADGET halos");
        assert_close(
            &sorted_positions(&components[0]),
            &sorted_positions(&original),
            1e-6,
        );
    }

    #[test]
    fn snapshot_box_and_time_are_adopted() {
        let base = config(SnapshotKind::Standard);
        let params = SnapshotParams {
            a: Some(0.1),
            boxsize: Some(250.0),
            ..Default::default()
        };
        let adopted = adopt_snapshot(&base, &params);
        assert_eq!(adopted.boxsize, 250.0);
        assert_eq!(adopted.a, 0.1);
        assert_eq!(adopted.cosmology, base.cosmology);

        let unchanged = adopt_snapshot(&base, &SnapshotParams::default());
        assert_eq!(unchanged, base);
    }

    #[test]
    fn the_failing_rank_is_reported_over_aborts() {
        let outcomes = vec![
            Err(SnapshotError::from(CommError::GroupAborted { rank: 1 })),
            Err(SnapshotError::UnsupportedComponentCount { count: 2 }),
            Ok(PathBuf::from("snap")),
        ];
        match first_failure(outcomes) {
            Err(CliError::Snapshot(SnapshotError::UnsupportedComponentCount { count })) => {
                assert_eq!(count, 2)
            }
            other => panic!("expected the component count error, got {:?}", other),
        }

        let outcomes = vec![Ok(PathBuf::from("a")), Ok(PathBuf::from("b"))];
        assert_eq!(first_failure(outcomes).unwrap(), PathBuf::from("a"));
    }

    #[test]
    fn zero_processes_are_rejected() {
        let args = ConvertArgs {
            input: PathBuf::from("in"),
            output: PathBuf::from("out"),
            to: SnapshotKind::Gadget2,
            procs: 0,
            run: Default::default(),
        };
        assert!(matches!(run(args), Err(CliError::Argument(_))));
    }
}
