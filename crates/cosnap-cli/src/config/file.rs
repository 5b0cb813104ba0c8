use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileUnitsConfig {
    pub length: Option<String>,
    pub time: Option<String>,
    pub mass: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileCosmologyConfig {
    /// The Hubble constant in km s⁻¹ Mpc⁻¹.
    pub h0: Option<f64>,
    pub omega_cdm: Option<f64>,
    pub omega_b: Option<f64>,
    pub a_begin: Option<f64>,
    pub enable_hubble: Option<bool>,
}

/// A box size given either as a plain number in internal units or as a
/// length expression such as `"100*Mpc"`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FileBoxsize {
    Internal(f64),
    Expression(String),
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub units: Option<FileUnitsConfig>,
    pub boxsize: Option<FileBoxsize>,
    pub cosmology: Option<FileCosmologyConfig>,
    pub snapshot_type: Option<String>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}
