use super::read_header;
use crate::cli::InfoArgs;
use crate::config::build_config;
use crate::error::Result;
use cosnap::core::utils::format::significant_figures;
use cosnap::engine::config::RunConfig;
use cosnap::workflows::snapshot::Loaded;
use std::fmt::Write;
use std::path::Path;
use tracing::info;

const DIGITS: usize = 7;

pub fn run(args: InfoArgs) -> Result<()> {
    let config = build_config(&args.run)?;
    info!("Reading the header of {:?}", &args.file);
    let loaded = read_header(&args.file, &config, args.compare)?;
    print!("{}", describe(&args.file, &loaded, &config));
    Ok(())
}

/// Renders the parameters and components of a loaded snapshot, converting
/// values back to the units of the run configuration.
fn describe(path: &Path, loaded: &Loaded, config: &RunConfig) -> String {
    let labels = config.units.labels();
    let units = config.units.units();
    let km_s_mpc = units.km / (units.s * units.mpc);

    let mut out = String::new();
    let _ = writeln!(out, "Snapshot: {}", path.display());
    if let Some(snapshot) = loaded.snapshot() {
        let _ = writeln!(out, "Format:   {}", snapshot.kind().display_name());

        let params = snapshot.params();
        let rows = [
            ("a", params.a, None),
            ("boxsize", params.boxsize, Some(labels.length.as_str())),
            (
                "H0",
                params.h0.map(|h0| h0 / km_s_mpc),
                Some("km s⁻¹ Mpc⁻¹"),
            ),
            ("Ωcdm", params.omega_cdm, None),
            ("Ωb", params.omega_b, None),
            ("Ωm", params.omega_m, None),
            ("ΩΛ", params.omega_lambda, None),
        ];
        let _ = writeln!(out, "Parameters:");
        for (name, value, unit) in rows {
            let Some(value) = value else {
                continue;
            };
            let _ = write!(out, "  {:<8}{}", name, significant_figures(value, DIGITS));
            if let Some(unit) = unit {
                let _ = write!(out, " {}", unit);
            }
            out.push('\n');
        }
    }

    let components = loaded.components();
    let _ = writeln!(out, "Components ({}):", components.len());
    for component in components {
        let _ = writeln!(out, "  {}", component.summary());
    }
    out
}
