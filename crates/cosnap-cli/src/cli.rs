use clap::{Args, Parser, Subcommand};
use cosnap::engine::formats::SnapshotKind;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "cosnap CLI - Inspect and convert snapshots of cosmological particle and fluid simulations.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report which snapshot format a file is written in.
    Detect(DetectArgs),
    /// Print the global parameters and components of a snapshot.
    Info(InfoArgs),
    /// Convert a snapshot to another format, possibly on several processes.
    Convert(ConvertArgs),
}

/// Run parameters shared by every command that reads snapshots.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to a run configuration file in TOML format.
    /// Defaults to `cosnap.toml` in the working directory, if present.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the internal length, time and mass units.
    #[arg(
        long,
        num_args = 3,
        value_names = ["LENGTH", "TIME", "MASS"]
    )]
    pub units: Option<Vec<String>>,

    /// Override the box size, as a length expression (e.g. '500*Mpc').
    #[arg(long, value_name = "EXPR")]
    pub boxsize: Option<String>,

    /// Override the snapshot type used when saving.
    #[arg(long, value_name = "TYPE")]
    pub snapshot_type: Option<SnapshotKind>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S cosmology.h0=70
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE")]
    pub set_values: Vec<String>,
}

/// Arguments for the `detect` subcommand.
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// The snapshot file to probe.
    #[arg(required = true, value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for the `info` subcommand.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// The snapshot file to describe.
    #[arg(required = true, value_name = "FILE")]
    pub file: PathBuf,

    /// Warn about parameters that differ from the run configuration.
    #[arg(long)]
    pub compare: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for the `convert` subcommand.
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// The snapshot to read.
    #[arg(required = true, value_name = "INPUT")]
    pub input: PathBuf,

    /// Where to write the converted snapshot.
    #[arg(required = true, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// The snapshot type to convert to.
    #[arg(short, long, required = true, value_name = "TYPE")]
    pub to: SnapshotKind,

    /// Number of cooperating processes performing the conversion.
    #[arg(short = 'n', long, default_value_t = 1, value_name = "NUM")]
    pub procs: usize,

    #[command(flatten)]
    pub run: RunArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_arguments_are_parsed() {
        let cli = Cli::parse_from([
            "cosnap", "convert", "in.cosnap", "out", "--to", "GADGET2", "-n", "4", "--units", "Mpc",
            "Gyr", "1e10*m_sun", "-S", "cosmology.h0=70",
        ]);
        let Commands::Convert(args) = cli.command else {
            panic!("Expected 'convert' subcommand");
        };
        assert_eq!(args.to, SnapshotKind::Gadget2);
        assert_eq!(args.procs, 4);
        assert_eq!(
            args.run.units,
            Some(vec!["Mpc".to_string(), "Gyr".to_string(), "1e10*m_sun".to_string()])
        );
        assert_eq!(args.run.set_values, ["cosmology.h0=70"]);
    }

    #[test]
    fn unknown_snapshot_type_is_rejected() {
        let result = Cli::try_parse_from(["cosnap", "convert", "a", "b", "--to", "fits"]);
        assert!(result.is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["cosnap", "-q", "-v", "detect", "snap"]);
        assert!(result.is_err());
    }
}
