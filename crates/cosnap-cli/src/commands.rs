pub mod convert;
pub mod detect;
pub mod info;

use crate::error::{CliError, Result};
use cosnap::core::parallel::comm::SerialComm;
use cosnap::engine::config::RunConfig;
use cosnap::engine::context::RunContext;
use cosnap::workflows::snapshot::{self, LoadOptions, Loaded};
use std::path::Path;

/// Reads the global parameters and component attributes of a snapshot on a
/// single process, without any component data.
pub(crate) fn read_header(path: &Path, config: &RunConfig, compare_params: bool) -> Result<Loaded> {
    let comm = SerialComm::new();
    let ctx = RunContext::new(config, &comm);
    let options = LoadOptions {
        compare_params,
        only_params: true,
        do_exchange: false,
        ..Default::default()
    };
    snapshot::load(path, &options, &ctx)?
        .ok_or_else(|| CliError::Argument("No snapshot file given".to_string()))
}
