use super::defaults::DefaultsConfig;
use super::file::{FileBoxsize, FileConfig};
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use cosnap::engine::config::{RunConfig, RunConfigBuilder};
use cosnap::engine::formats::SnapshotKind;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Configuration file picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "cosnap.toml";

pub fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            FileConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => FileConfig::default(),
    };

    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let units_file = file_config.units.take().unwrap_or_default();
    let (length, time, mass) = match args.units.as_deref() {
        Some([length, time, mass]) => (length.clone(), time.clone(), mass.clone()),
        Some(other) => {
            return Err(CliError::Argument(format!(
                "--units expects a length, a time and a mass unit, got {} value(s)",
                other.len()
            )));
        }
        None => (
            units_file.length.unwrap_or(defaults.length_unit),
            units_file.time.unwrap_or(defaults.time_unit),
            units_file.mass.unwrap_or(defaults.mass_unit),
        ),
    };

    let snapshot_type = match args.snapshot_type {
        Some(kind) => kind,
        None => file_config
            .snapshot_type
            .as_deref()
            .unwrap_or(defaults.snapshot_type.as_str())
            .parse::<SnapshotKind>()?,
    };

    let cosmology = file_config.cosmology.take().unwrap_or_default();

    let mut builder = RunConfigBuilder::new()
        .units(&length, &time, &mass)
        .hubble_constant(cosmology.h0.unwrap_or(defaults.h0))
        .omega_cdm(cosmology.omega_cdm.unwrap_or(defaults.omega_cdm))
        .omega_b(cosmology.omega_b.unwrap_or(defaults.omega_b))
        .a_begin(cosmology.a_begin.unwrap_or(defaults.a_begin))
        .enable_hubble(cosmology.enable_hubble.unwrap_or(defaults.enable_hubble))
        .snapshot_type(snapshot_type);

    builder = match (args.boxsize.as_deref(), file_config.boxsize) {
        (Some(expr), _) => builder.boxsize_expr(expr),
        (None, Some(FileBoxsize::Internal(value))) => builder.boxsize(value),
        (None, Some(FileBoxsize::Expression(expr))) => builder.boxsize_expr(&expr),
        (None, None) => builder.boxsize_expr(&defaults.boxsize),
    };

    let config = builder.build()?;
    debug!("Final run configuration: {:?}", config);
    Ok(config)
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value))
    })
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "boxsize" => {
                config.boxsize = Some(match value.parse::<f64>() {
                    Ok(number) => FileBoxsize::Internal(number),
                    Err(_) => FileBoxsize::Expression(value.to_string()),
                });
            }
            "snapshot-type" => config.snapshot_type = Some(value.to_string()),
            "units.length" | "units.time" | "units.mass" => {
                let units = config.units.get_or_insert_with(Default::default);
                let slot = match key {
                    "units.length" => &mut units.length,
                    "units.time" => &mut units.time,
                    _ => &mut units.mass,
                };
                *slot = Some(value.to_string());
            }
            "cosmology.h0" => {
                config.cosmology.get_or_insert_with(Default::default).h0 =
                    Some(parse_value(key, value, "float")?);
            }
            "cosmology.omega-cdm" => {
                config.cosmology.get_or_insert_with(Default::default).omega_cdm =
                    Some(parse_value(key, value, "float")?);
            }
            "cosmology.omega-b" => {
                config.cosmology.get_or_insert_with(Default::default).omega_b =
                    Some(parse_value(key, value, "float")?);
            }
            "cosmology.a-begin" => {
                config.cosmology.get_or_insert_with(Default::default).a_begin =
                    Some(parse_value(key, value, "float")?);
            }
            "cosmology.enable-hubble" => {
                config
                    .cosmology
                    .get_or_insert_with(Default::default)
                    .enable_hubble = Some(parse_value(key, value, "boolean")?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}
