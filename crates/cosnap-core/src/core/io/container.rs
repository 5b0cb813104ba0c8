//! A self-describing single-file container for hierarchical array data.
//!
//! Layout on disk:
//!
//! | Bytes | Content |
//! |---|---|
//! | `0..8` | magic `COSNAPC\0` |
//! | `8..12` | format version (`u32`, little-endian) |
//! | `12..16` | reserved |
//! | `16..24` | manifest offset (`u64`) |
//! | `24..32` | manifest length (`u64`) |
//! | `32..` | dataset payloads, row-major little-endian `f64` |
//! | manifest offset.. | JSON manifest |
//!
//! The manifest describes groups with typed attributes, datasets with their
//! shape and payload offset, and hard links. Structural operations are
//! collective: every process performs them in the same order and so allocates
//! identical payload offsets, which lets processes write disjoint hyperslabs of
//! a dataset concurrently. The master writes the manifest when the container
//! is closed.
//!
//! The format is specific to this crate and is not HDF5; snapshots stored in it
//! carry the `.cosnap` extension.

use crate::core::parallel::comm::{CommError, Communicator};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

pub const MAGIC: &[u8; 8] = b"COSNAPC\0";
pub const VERSION: u32 = 1;
const HEADER_LEN: u64 = 32;
const VALUE_LEN: u64 = 8;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("Collective operation failed: {0}")]
    Comm(#[from] CommError),
    #[error("File \"{path}\" is not a container (bad magic number)")]
    BadMagic { path: PathBuf },
    #[error(
        "File \"{path}\" is truncated: manifest at {manifest_offset} of length {manifest_len} exceeds {file_len} bytes"
    )]
    Truncated {
        path: PathBuf,
        manifest_offset: u64,
        manifest_len: u64,
        file_len: u64,
    },
    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u32),
    #[error("No group or dataset at \"{0}\"")]
    NotFound(String),
    #[error("An object already exists at \"{0}\"")]
    AlreadyExists(String),
    #[error("Missing attribute \"{name}\" on \"{group}\"")]
    MissingAttribute { group: String, name: String },
    #[error("Attribute \"{name}\" on \"{group}\" is not of type {expected}")]
    AttributeType {
        group: String,
        name: String,
        expected: &'static str,
    },
    #[error("Invalid selection of dataset \"{path}\": {reason}")]
    Selection { path: String, reason: String },
    #[error("Container is open read-only")]
    ReadOnly,
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct GroupEntry {
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
}

/// Location and shape of a dataset's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub path: String,
    pub shape: Vec<usize>,
    pub offset: u64,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values in one row, i.e. one index along the first axis.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Manifest {
    groups: BTreeMap<String, GroupEntry>,
    datasets: BTreeMap<String, Dataset>,
    links: BTreeMap<String, String>,
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl Manifest {
    /// Resolves hard links along every prefix of `path`.
    fn resolve(&self, path: &str) -> String {
        let mut resolved = String::new();
        for part in normalize(path).split('/').filter(|p| !p.is_empty()) {
            resolved = join(&resolved, part);
            if let Some(target) = self.links.get(&resolved) {
                resolved = target.clone();
            }
        }
        resolved
    }

    /// Resolves links in the parent part of `path`, keeping its final name as is.
    fn resolve_parent(&self, path: &str) -> String {
        let path = normalize(path);
        let name = path.rsplit('/').next().unwrap_or("");
        join(&self.resolve(parent_of(&path)), name)
    }

    fn exists(&self, path: &str) -> bool {
        path.is_empty()
            || self.groups.contains_key(path)
            || self.datasets.contains_key(path)
            || self.links.contains_key(path)
    }
}

/// An open container.
///
/// Containers created with [`Container::create`] are writable and must be
/// closed collectively with [`Container::close`]; containers opened with
/// [`Container::open`] are read-only and need no process group.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    file: File,
    manifest: Manifest,
    next_offset: u64,
    writable: bool,
}

impl Container {
    /// Collectively creates (truncating) a container at `path`.
    ///
    /// The master creates the file; the other processes open it once it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] if the file cannot be created or opened, or
    /// if the process group was aborted.
    pub fn create(path: &Path, comm: &dyn Communicator) -> Result<Self, ContainerError> {
        if comm.is_master() {
            let mut file = File::create(path)?;
            write_header(&mut file, 0, 0)?;
        }
        comm.barrier()?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut manifest = Manifest::default();
        manifest.groups.insert(String::new(), GroupEntry::default());
        debug!(rank = comm.rank(), path = %path.display(), "Container created");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            manifest,
            next_offset: HEADER_LEN,
            writable: true,
        })
    }

    /// Opens an existing container read-only.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] if the file is missing, is not a container,
    /// or carries an unreadable manifest.
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ContainerError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        let version = file.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let _reserved = file.read_u32::<LittleEndian>()?;
        let manifest_offset = file.read_u64::<LittleEndian>()?;
        let manifest_len = file.read_u64::<LittleEndian>()?;

        let file_len = file.metadata()?.len();
        let fits = manifest_offset >= HEADER_LEN
            && manifest_offset
                .checked_add(manifest_len)
                .is_some_and(|end| end <= file_len);
        if !fits {
            return Err(ContainerError::Truncated {
                path: path.to_path_buf(),
                manifest_offset,
                manifest_len,
                file_len,
            });
        }

        file.seek(SeekFrom::Start(manifest_offset))?;
        let mut raw = vec![0u8; manifest_len as usize];
        file.read_exact(&mut raw)?;
        let manifest: Manifest = serde_json::from_slice(&raw)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            manifest,
            next_offset: manifest_offset,
            writable: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> Result<(), ContainerError> {
        if self.writable {
            Ok(())
        } else {
            Err(ContainerError::ReadOnly)
        }
    }

    /// Creates a group, along with any missing parent groups.
    pub fn create_group(&mut self, path: &str) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        let mut current = String::new();
        for part in normalize(path).split('/').filter(|p| !p.is_empty()) {
            current = join(&current, part);
            current = self.manifest.resolve(&current);
            if self.manifest.datasets.contains_key(&current) {
                return Err(ContainerError::AlreadyExists(current));
            }
            self.manifest.groups.entry(current.clone()).or_default();
        }
        Ok(())
    }

    /// Sets an attribute on an existing group.
    pub fn set_attr(
        &mut self,
        group: &str,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        let resolved = self.manifest.resolve(group);
        let entry = self
            .manifest
            .groups
            .get_mut(&resolved)
            .ok_or_else(|| ContainerError::NotFound(group.to_string()))?;
        entry.attrs.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Creates a dataset of the given shape, creating its parent groups.
    ///
    /// Payload space is reserved at a deterministic offset, so every process
    /// that performs the same sequence of calls obtains the same layout.
    pub fn create_dataset(
        &mut self,
        path: &str,
        shape: &[usize],
    ) -> Result<Dataset, ContainerError> {
        self.ensure_writable()?;
        self.create_group(parent_of(&normalize(path)))?;
        let path = self.manifest.resolve_parent(path);
        if self.manifest.exists(&path) {
            return Err(ContainerError::AlreadyExists(path));
        }
        let dataset = Dataset {
            path: path.clone(),
            shape: shape.to_vec(),
            offset: self.next_offset,
        };
        self.next_offset += dataset.len() as u64 * VALUE_LEN;
        trace!(path = %path, ?shape, offset = dataset.offset, "Dataset created");
        self.manifest.datasets.insert(path, dataset.clone());
        Ok(dataset)
    }

    /// Creates a hard link `alias` referring to the existing object `target`.
    pub fn link(&mut self, alias: &str, target: &str) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        let target = self.manifest.resolve(target);
        if !self.manifest.exists(&target) {
            return Err(ContainerError::NotFound(target));
        }
        let alias = self.manifest.resolve_parent(alias);
        if self.manifest.exists(&alias) {
            return Err(ContainerError::AlreadyExists(alias));
        }
        self.manifest.links.insert(alias, target);
        Ok(())
    }

    /// Writes `data` as consecutive rows of `dataset`, starting at row `row_start`.
    ///
    /// Rows are indices along the first axis. Processes may write disjoint row
    /// ranges of the same dataset concurrently.
    pub fn write_rows(
        &mut self,
        dataset: &Dataset,
        row_start: usize,
        data: &[f64],
    ) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        let row_len = dataset.row_len();
        let rows = dataset.shape.first().copied().unwrap_or(1);
        if row_len == 0 || data.len() % row_len != 0 || row_start + data.len() / row_len > rows {
            return Err(ContainerError::Selection {
                path: dataset.path.clone(),
                reason: format!(
                    "{} values at row {} do not fit shape {:?}",
                    data.len(),
                    row_start,
                    dataset.shape
                ),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        let offset = dataset.offset + (row_start * row_len) as u64 * VALUE_LEN;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut writer = BufWriter::new(&mut self.file);
        for &value in data {
            writer.write_f64::<LittleEndian>(value)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Collectively finalizes the container.
    ///
    /// Waits for every process to finish writing, then the master writes the
    /// manifest and header.
    pub fn close(mut self, comm: &dyn Communicator) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        self.file.flush()?;
        comm.barrier()?;
        if comm.is_master() {
            let raw = serde_json::to_vec(&self.manifest)?;
            self.file.seek(SeekFrom::Start(self.next_offset))?;
            self.file.write_all(&raw)?;
            self.file.set_len(self.next_offset + raw.len() as u64)?;
            self.file.seek(SeekFrom::Start(0))?;
            write_header(&mut self.file, self.next_offset, raw.len() as u64)?;
            self.file.sync_all()?;
            debug!(path = %self.path.display(), manifest_len = raw.len(), "Container closed");
        }
        comm.barrier()?;
        Ok(())
    }

    fn group_entry(&self, group: &str) -> Result<&GroupEntry, ContainerError> {
        self.manifest
            .groups
            .get(&self.manifest.resolve(group))
            .ok_or_else(|| ContainerError::NotFound(group.to_string()))
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.manifest.groups.contains_key(&self.manifest.resolve(path))
    }

    pub fn has_attr(&self, group: &str, name: &str) -> bool {
        self.group_entry(group)
            .map(|entry| entry.attrs.contains_key(name))
            .unwrap_or(false)
    }

    pub fn attr(&self, group: &str, name: &str) -> Result<&AttrValue, ContainerError> {
        self.group_entry(group)?
            .attrs
            .get(name)
            .ok_or_else(|| ContainerError::MissingAttribute {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    /// Reads a numeric attribute as `f64`; integer attributes are widened.
    pub fn attr_f64(&self, group: &str, name: &str) -> Result<f64, ContainerError> {
        match self.attr(group, name)? {
            AttrValue::Float(value) => Ok(*value),
            AttrValue::Int(value) => Ok(*value as f64),
            AttrValue::Text(_) => Err(self.type_error(group, name, "float")),
        }
    }

    pub fn attr_usize(&self, group: &str, name: &str) -> Result<usize, ContainerError> {
        match self.attr(group, name)? {
            AttrValue::Int(value) if *value >= 0 => Ok(*value as usize),
            _ => Err(self.type_error(group, name, "non-negative integer")),
        }
    }

    pub fn attr_str(&self, group: &str, name: &str) -> Result<&str, ContainerError> {
        match self.attr(group, name)? {
            AttrValue::Text(value) => Ok(value),
            _ => Err(self.type_error(group, name, "text")),
        }
    }

    fn type_error(&self, group: &str, name: &str, expected: &'static str) -> ContainerError {
        ContainerError::AttributeType {
            group: group.to_string(),
            name: name.to_string(),
            expected,
        }
    }

    /// Names of the groups directly below `parent`, in lexicographic order.
    pub fn group_names(&self, parent: &str) -> Result<Vec<String>, ContainerError> {
        let parent = self.manifest.resolve(parent);
        if !self.manifest.groups.contains_key(&parent) {
            return Err(ContainerError::NotFound(parent));
        }
        Ok(self
            .manifest
            .groups
            .keys()
            .filter(|path| !path.is_empty() && parent_of(path) == parent)
            .filter_map(|path| path.rsplit('/').next().map(str::to_string))
            .collect())
    }

    pub fn dataset(&self, path: &str) -> Result<&Dataset, ContainerError> {
        self.manifest
            .datasets
            .get(&self.manifest.resolve(path))
            .ok_or_else(|| ContainerError::NotFound(path.to_string()))
    }

    /// Reads the hyperslab `start[d]..start[d] + count[d]` of a dataset, row-major.
    ///
    /// Runs that are contiguous on disk are read in a single operation.
    pub fn read_block(
        &mut self,
        path: &str,
        start: &[usize],
        count: &[usize],
    ) -> Result<Vec<f64>, ContainerError> {
        let dataset = self.dataset(path)?.clone();
        let rank = dataset.shape.len();
        let fits = rank > 0
            && start.len() == rank
            && count.len() == rank
            && (0..rank).all(|d| start[d] + count[d] <= dataset.shape[d]);
        if !fits {
            return Err(ContainerError::Selection {
                path: dataset.path.clone(),
                reason: format!(
                    "selection {:?}+{:?} does not fit shape {:?}",
                    start, count, dataset.shape
                ),
            });
        }
        let total: usize = count.iter().product();
        let mut out = Vec::with_capacity(total);
        if total == 0 {
            return Ok(out);
        }

        // Axes after `split` are selected whole, so each run spans them contiguously.
        let mut split = rank - 1;
        while split > 0 && start[split] == 0 && count[split] == dataset.shape[split] {
            split -= 1;
        }
        let stride = |d: usize| dataset.shape[d + 1..].iter().product::<usize>();
        let run_len = count[split] * stride(split);

        let mut index = start[..split].to_vec();
        loop {
            let mut flat = start[split] * stride(split);
            for (d, &i) in index.iter().enumerate() {
                flat += i * stride(d);
            }
            self.file
                .seek(SeekFrom::Start(dataset.offset + flat as u64 * VALUE_LEN))?;
            let mut raw = vec![0u8; run_len * VALUE_LEN as usize];
            self.file.read_exact(&mut raw)?;
            let mut cursor = raw.as_slice();
            for _ in 0..run_len {
                out.push(cursor.read_f64::<LittleEndian>()?);
            }

            // Advance the outer multi-index, last axis fastest.
            let mut d = split;
            loop {
                if d == 0 {
                    return Ok(out);
                }
                d -= 1;
                index[d] += 1;
                if index[d] < start[d] + count[d] {
                    break;
                }
                index[d] = start[d];
            }
        }
    }

    /// Reads an entire dataset.
    pub fn read_all(&mut self, path: &str) -> Result<Vec<f64>, ContainerError> {
        let shape = self.dataset(path)?.shape.clone();
        self.read_block(path, &vec![0; shape.len()], &shape)
    }
}

fn write_header(file: &mut File, manifest_offset: u64, manifest_len: u64) -> io::Result<()> {
    file.write_all(MAGIC)?;
    file.write_u32::<LittleEndian>(VERSION)?;
    file.write_u32::<LittleEndian>(0)?;
    file.write_u64::<LittleEndian>(manifest_offset)?;
    file.write_u64::<LittleEndian>(manifest_len)?;
    Ok(())
}
