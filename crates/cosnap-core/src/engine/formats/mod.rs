//! The registered snapshot formats.
//!
//! The set of formats is closed: [`SnapshotKind::ALL`] lists every format in
//! probe order, and [`Snapshot`] holds an instance of any of them.

pub mod gadget2;
pub mod standard;

use super::config::ConfigError;
use super::context::RunContext;
use super::error::Result;
use crate::core::models::component::Component;
use crate::core::models::params::SnapshotParams;
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use gadget2::Gadget2Snapshot;
pub use standard::StandardSnapshot;

/// Identifies one of the registered snapshot formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SnapshotKind {
    /// The self-describing structured container.
    #[default]
    Standard,
    /// The legacy GADGET2 type 2 binary format.
    Gadget2,
}

impl SnapshotKind {
    /// Every registered format, in the order files are probed.
    pub const ALL: [SnapshotKind; 2] = [SnapshotKind::Standard, SnapshotKind::Gadget2];

    /// The identifier used in configuration files and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotKind::Standard => "standard",
            SnapshotKind::Gadget2 => "gadget2",
        }
    }

    /// The properly written name, used in messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            SnapshotKind::Standard => "standard",
            SnapshotKind::Gadget2 => "GADGET2",
        }
    }

    /// The filename extension appended on save (empty if none).
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotKind::Standard => ".cosnap",
            SnapshotKind::Gadget2 => "",
        }
    }

    /// Whether the file at `path` is a snapshot of this format. Never fails.
    pub fn is_this_type(&self, path: &Path) -> bool {
        match self {
            SnapshotKind::Standard => StandardSnapshot::is_this_type(path),
            SnapshotKind::Gadget2 => Gadget2Snapshot::is_this_type(path),
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SnapshotKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SnapshotKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| ConfigError::InvalidParameter {
                name: "snapshot_type",
                reason: format!(
                    "unknown snapshot type \"{}\" (expected one of: {})",
                    s,
                    SnapshotKind::ALL.map(|k| k.name()).join(", ")
                ),
            })
    }
}

/// The distinct, non-empty filename extensions of all registered formats.
pub fn snapshot_extensions() -> Vec<&'static str> {
    let mut extensions: Vec<_> = SnapshotKind::ALL
        .iter()
        .map(|kind| kind.extension())
        .filter(|ext| !ext.is_empty())
        .collect();
    extensions.sort_unstable();
    extensions.dedup();
    extensions
}

/// The operations every snapshot format provides.
///
/// A snapshot either borrows the caller's components (when populated for
/// saving) or owns freshly loaded ones.
pub trait SnapshotFormat<'a>: Sized {
    const KIND: SnapshotKind;

    /// Probes whether the file at `path` is of this format. Never fails.
    fn is_this_type(path: &Path) -> bool;

    /// Builds a snapshot from in-memory components, filling every parameter
    /// absent from `params` from the run configuration. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if the components cannot be represented in this format.
    fn populate(
        components: Cow<'a, [Component]>,
        params: &SnapshotParams,
        ctx: &RunContext,
    ) -> Result<Self>;

    /// Collectively writes the snapshot to disk.
    ///
    /// # Return
    ///
    /// The final filename, which may differ from `path` by an added extension.
    fn save(&self, path: &Path, ctx: &RunContext) -> Result<PathBuf>;

    /// Collectively reads a snapshot from disk.
    ///
    /// With `only_params`, components are built with their global attributes
    /// but without local data.
    fn load(path: &Path, only_params: bool, ctx: &RunContext) -> Result<Self>;

    fn params(&self) -> &SnapshotParams;

    fn components(&self) -> &[Component];

    fn components_mut(&mut self) -> &mut [Component];

    fn into_components(self) -> Vec<Component>;
}

/// A snapshot of any registered format.
#[derive(Debug)]
pub enum Snapshot<'a> {
    Standard(StandardSnapshot<'a>),
    Gadget2(Gadget2Snapshot<'a>),
}

impl<'a> Snapshot<'a> {
    pub fn populate(
        kind: SnapshotKind,
        components: Cow<'a, [Component]>,
        params: &SnapshotParams,
        ctx: &RunContext,
    ) -> Result<Self> {
        Ok(match kind {
            SnapshotKind::Standard => {
                Snapshot::Standard(StandardSnapshot::populate(components, params, ctx)?)
            }
            SnapshotKind::Gadget2 => {
                Snapshot::Gadget2(Gadget2Snapshot::populate(components, params, ctx)?)
            }
        })
    }

    pub fn load(kind: SnapshotKind, path: &Path, only_params: bool, ctx: &RunContext) -> Result<Self> {
        Ok(match kind {
            SnapshotKind::Standard => {
                Snapshot::Standard(StandardSnapshot::load(path, only_params, ctx)?)
            }
            SnapshotKind::Gadget2 => {
                Snapshot::Gadget2(Gadget2Snapshot::load(path, only_params, ctx)?)
            }
        })
    }

    pub fn kind(&self) -> SnapshotKind {
        match self {
            Snapshot::Standard(_) => SnapshotKind::Standard,
            Snapshot::Gadget2(_) => SnapshotKind::Gadget2,
        }
    }

    pub fn save(&self, path: &Path, ctx: &RunContext) -> Result<PathBuf> {
        match self {
            Snapshot::Standard(s) => s.save(path, ctx),
            Snapshot::Gadget2(s) => s.save(path, ctx),
        }
    }

    pub fn params(&self) -> &SnapshotParams {
        match self {
            Snapshot::Standard(s) => s.params(),
            Snapshot::Gadget2(s) => s.params(),
        }
    }

    pub fn components(&self) -> &[Component] {
        match self {
            Snapshot::Standard(s) => s.components(),
            Snapshot::Gadget2(s) => s.components(),
        }
    }

    pub fn components_mut(&mut self) -> &mut [Component] {
        match self {
            Snapshot::Standard(s) => s.components_mut(),
            Snapshot::Gadget2(s) => s.components_mut(),
        }
    }

    pub fn into_components(self) -> Vec<Component> {
        match self {
            Snapshot::Standard(s) => s.into_components(),
            Snapshot::Gadget2(s) => s.into_components(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_their_names() {
        for kind in SnapshotKind::ALL {
            assert_eq!(kind.name().parse::<SnapshotKind>().unwrap(), kind);
        }
        assert_eq!("GADGET2".parse::<SnapshotKind>().unwrap(), SnapshotKind::Gadget2);
        assert!(matches!(
            "hdf4".parse::<SnapshotKind>(),
            Err(ConfigError::InvalidParameter { name: "snapshot_type", .. })
        ));
    }

    #[test]
    fn only_non_empty_extensions_are_listed() {
        assert_eq!(snapshot_extensions(), vec![".cosnap"]);
    }
}
