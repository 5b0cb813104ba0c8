use super::{SnapshotFormat, SnapshotKind};
use crate::core::io::gadget2::{
    self, BlockReader, BlockTag, Gadget2Error, Gadget2Header, HALO_TYPE, HEAD, HEADER_SIZE, ID,
    POS, VEL, block_size, write_block_end, write_block_start,
};
use crate::core::models::component::Component;
use crate::core::models::params::SnapshotParams;
use crate::core::models::particles::{ParticleComponent, ParticleVariable};
use crate::core::models::species::Species;
use crate::core::parallel::domain::{offset_and_total, partition, prefix_offset};
use crate::engine::context::{RunContext, master_info};
use crate::engine::error::{Result, SnapshotError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the component holding the halo particles of a loaded file.
pub const HALO_COMPONENT: &str = "GADGET halos";

/// Solar masses per GADGET2 mass unit, before division by `h`.
const MASS_UNIT_MSUN: f64 = 1e10;

/// A snapshot in the GADGET2 type 2 binary format.
///
/// Only halo (type 1) particles are stored, so the snapshot always holds
/// exactly one particle component. Values are written in single precision.
#[derive(Debug, Clone)]
pub struct Gadget2Snapshot<'a> {
    params: SnapshotParams,
    header: Gadget2Header,
    components: Cow<'a, [Component]>,
    ids: Vec<u32>,
}

/// Unit factors between GADGET2 file values and internal units.
///
/// GADGET2 measures lengths in kpc/h and masses in 1e10 m_sun/h, where `h` is
/// the Hubble parameter in units of 100 km s⁻¹ Mpc⁻¹.
struct LegacyUnits {
    length: f64,
    mass: f64,
    hubble: f64,
    velocity: f64,
}

impl LegacyUnits {
    fn new(ctx: &RunContext, h: f64) -> Self {
        let units = ctx.config.units.units();
        Self {
            length: units.kpc / h,
            mass: MASS_UNIT_MSUN * units.m_sun / h,
            hubble: units.hubble_100(),
            velocity: units.km_per_s(),
        }
    }

    /// Factor converting momenta `m·a²·dx/dt` into GADGET2 velocities
    /// `√a·dx/dt` in km/s.
    fn momentum(&self, mass: f64, a: f64) -> f64 {
        self.velocity * mass * a.powf(1.5)
    }
}

fn check_particle_count(n: usize) -> std::result::Result<(u32, i32), Gadget2Error> {
    match (u32::try_from(n), i32::try_from(n)) {
        (Ok(npart), Ok(nall)) => Ok((npart, nall)),
        _ => Err(Gadget2Error::TooManyParticles(n)),
    }
}

impl<'a> Gadget2Snapshot<'a> {
    /// The header record, as written on save or as read on load.
    pub fn header(&self) -> &Gadget2Header {
        &self.header
    }

    /// The GADGET2 IDs of the local particles.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    fn particles(&self) -> Result<&ParticleComponent> {
        match self.components.first() {
            Some(Component::Particles(particles)) if self.components.len() == 1 => Ok(particles),
            Some(other) if self.components.len() == 1 => {
                Err(SnapshotError::UnsupportedRepresentation {
                    component: other.name().to_string(),
                    representation: other.representation(),
                })
            }
            _ => Err(SnapshotError::UnsupportedComponentCount {
                count: self.components.len(),
            }),
        }
    }

    /// Builds the header from the parameters and the particle component.
    fn build_header(
        params: &SnapshotParams,
        component: &ParticleComponent,
        ctx: &RunContext,
    ) -> Result<Gadget2Header> {
        let (npart, nall) = check_particle_count(component.n)?;
        let h0 = params.h0.unwrap_or(ctx.config.cosmology.h0);
        let a = params.a.unwrap_or(ctx.config.a);
        let h = h0 / ctx.config.units.units().hubble_100();
        let units = LegacyUnits::new(ctx, h);

        let mut header = Gadget2Header {
            time: a,
            redshift: 1.0 / a - 1.0,
            num_files: 1,
            box_size: params.boxsize.unwrap_or(ctx.config.boxsize) / units.length,
            omega0: params.omega_m.unwrap_or_default(),
            omega_lambda: params.omega_lambda.unwrap_or_default(),
            hubble_param: h,
            flag_entr_ics: 1,
            ..Default::default()
        };
        header.npart[HALO_TYPE] = npart;
        header.nall[HALO_TYPE] = nall;
        header.massarr[HALO_TYPE] = component.mass / units.mass;
        Ok(header)
    }

    /// Appends one block to `path` in rank order, one process at a time.
    ///
    /// Rank 0 opens the block and the last rank closes it; `payload` holds
    /// this process's contiguous share of the block's contents.
    fn write_block_in_turns(
        path: &Path,
        tag: BlockTag,
        size: u32,
        payload: &[u8],
        ctx: &RunContext,
    ) -> Result<()> {
        let comm = ctx.comm;
        let last = comm.size() - 1;
        for turn in 0..comm.size() {
            comm.barrier()?;
            if turn != comm.rank() {
                continue;
            }
            debug!(rank = turn, block = %tag, bytes = payload.len(), "Appending block slice");
            let file = OpenOptions::new().append(true).open(path)?;
            let mut writer = BufWriter::new(file);
            if turn == 0 {
                write_block_start(&mut writer, tag, size)?;
            }
            writer.write_all(payload)?;
            if turn == last {
                write_block_end(&mut writer, size)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

/// Interleaves three coordinate arrays as `x0 y0 z0 x1 y1 z1 ...` in single precision.
fn interleave(x: &[f64], y: &[f64], z: &[f64], unit: f64) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(12 * x.len());
    for ((xi, yi), zi) in x.iter().zip(y).zip(z) {
        for value in [xi, yi, zi] {
            bytes.write_f32::<LittleEndian>((value / unit) as f32)?;
        }
    }
    Ok(bytes)
}

fn deinterleave(
    component: &mut ParticleComponent,
    values: &[f32],
    vars: [ParticleVariable; 3],
    unit: f64,
) {
    for (axis, var) in vars.into_iter().enumerate() {
        let data = values
            .iter()
            .skip(axis)
            .step_by(3)
            .map(|&v| f64::from(v) * unit)
            .collect();
        component.populate(data, var);
    }
}

impl<'a> SnapshotFormat<'a> for Gadget2Snapshot<'a> {
    const KIND: SnapshotKind = SnapshotKind::Gadget2;

    fn is_this_type(path: &Path) -> bool {
        gadget2::probe(path)
    }

    fn populate(
        components: Cow<'a, [Component]>,
        params: &SnapshotParams,
        ctx: &RunContext,
    ) -> Result<Self> {
        let config = ctx.config;
        let omega_m = params
            .matter_density()
            .unwrap_or(config.cosmology.omega_m());
        let a = if config.cosmology.enable_hubble {
            params.a.unwrap_or(config.a)
        } else {
            config.a
        };
        let params = SnapshotParams {
            h0: Some(params.h0.unwrap_or(config.cosmology.h0)),
            a: Some(a),
            boxsize: Some(params.boxsize.unwrap_or(config.boxsize)),
            omega_cdm: None,
            omega_b: None,
            omega_m: Some(omega_m),
            omega_lambda: Some(params.omega_lambda.unwrap_or(1.0 - omega_m)),
        };

        let mut snapshot = Self {
            params,
            header: Gadget2Header::default(),
            components,
            ids: Vec::new(),
        };
        let particles = snapshot.particles()?;
        if !matches!(
            particles.species,
            Species::DarkMatterParticles | Species::MatterParticles
        ) {
            return Err(SnapshotError::UnsupportedSpecies {
                component: particles.name.clone(),
                species: particles.species,
            });
        }

        let n_local = particles.n_local();
        let start = prefix_offset(n_local, ctx.comm)?;
        let ids = (start..start + n_local)
            .map(|id| u32::try_from(id).map_err(|_| Gadget2Error::TooManyParticles(id + 1)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let header = Self::build_header(&snapshot.params, particles, ctx)?;
        snapshot.ids = ids;
        snapshot.header = header;
        Ok(snapshot)
    }

    fn save(&self, path: &Path, ctx: &RunContext) -> Result<PathBuf> {
        master_info!(ctx, "Saving GADGET2 snapshot \"{}\" ...", path.display());
        let component = self.particles()?;
        let header = &self.header;

        let (_, total) = offset_and_total(component.n_local(), ctx.comm)?;
        if total != component.n {
            return Err(SnapshotError::ParticleCount {
                component: component.name.clone(),
                n: component.n,
                total,
            });
        }

        if ctx.is_master() {
            let mut writer = BufWriter::new(File::create(path)?);
            write_block_start(&mut writer, HEAD, HEADER_SIZE)?;
            header.write_to(&mut writer)?;
            write_block_end(&mut writer, HEADER_SIZE)?;
            writer.flush()?;
        }
        master_info!(
            ctx,
            "Writing out {} ({} {}) ...",
            component.name,
            component.n,
            component.species
        );

        let vector_size = block_size(12 * component.n)?;
        if vector_size > i32::MAX as u32 && ctx.is_master() {
            warn!(
                bytes = vector_size,
                "Block sizes exceed the signed 32-bit range; readers treating block brackets as signed integers will misread this file"
            );
        }
        let units = LegacyUnits::new(ctx, header.hubble_param);

        let positions = interleave(
            &component.posx,
            &component.posy,
            &component.posz,
            units.length,
        )?;
        Self::write_block_in_turns(path, POS, vector_size, &positions, ctx)?;

        let momenta = interleave(
            &component.momx,
            &component.momy,
            &component.momz,
            units.momentum(component.mass, header.time),
        )?;
        Self::write_block_in_turns(path, VEL, vector_size, &momenta, ctx)?;

        let mut ids = Vec::with_capacity(4 * self.ids.len());
        for &id in &self.ids {
            ids.write_u32::<LittleEndian>(id)?;
        }
        Self::write_block_in_turns(path, ID, block_size(4 * component.n)?, &ids, ctx)?;

        // The file is complete only once the last rank has closed the ID block.
        ctx.comm.barrier()?;
        master_info!(ctx, "done");
        Ok(path.to_path_buf())
    }

    fn load(path: &Path, only_params: bool, ctx: &RunContext) -> Result<Self> {
        if only_params {
            master_info!(ctx, "Loading parameters of snapshot \"{}\" ...", path.display());
        } else {
            master_info!(ctx, "Loading snapshot \"{}\" ...", path.display());
        }
        let mut reader = BlockReader::new(BufReader::new(File::open(path)?));
        let header = reader.read_header()?;

        let h = header.hubble_param;
        let units = LegacyUnits::new(ctx, h);
        let params = SnapshotParams {
            h0: Some(h * units.hubble),
            a: Some(header.time),
            boxsize: Some(header.box_size * units.length),
            omega_cdm: None,
            omega_b: None,
            omega_m: Some(header.omega0),
            omega_lambda: Some(header.omega_lambda),
        };

        let n = header.npart[HALO_TYPE] as usize;
        let mass = header.massarr[HALO_TYPE] * units.mass;
        let mut component =
            ParticleComponent::new(HALO_COMPONENT, Species::DarkMatterParticles, n, mass);
        let mut ids = Vec::new();

        if !only_params {
            master_info!(ctx, "Reading in {} ({} {}) ...", HALO_COMPONENT, n, component.species);
            let (start, count) = partition(n, ctx.comm);
            let blocks = [
                (
                    POS,
                    [ParticleVariable::PosX, ParticleVariable::PosY, ParticleVariable::PosZ],
                    units.length,
                ),
                (
                    VEL,
                    [ParticleVariable::MomX, ParticleVariable::MomY, ParticleVariable::MomZ],
                    units.momentum(mass, header.time),
                ),
            ];
            for (tag, vars, unit) in blocks {
                let size = reader.enter(tag)?;
                if size as usize != 12 * n {
                    return Err(Gadget2Error::Framing(format!(
                        "block \"{}\" holds {} bytes, expected {} for {} particles",
                        tag,
                        size,
                        12 * n,
                        n
                    ))
                    .into());
                }
                reader.skip(12 * start as u64)?;
                let values = reader.read_f32s(3 * count)?;
                deinterleave(&mut component, &values, vars, unit);
            }
            let size = reader.enter(ID)?;
            if size as usize != 4 * n {
                return Err(Gadget2Error::Framing(format!(
                    "block \"{}\" holds {} bytes, expected {} for {} particles",
                    ID,
                    size,
                    4 * n,
                    n
                ))
                .into());
            }
            reader.skip(4 * start as u64)?;
            ids = reader.read_u32s(count)?;
        }
        master_info!(ctx, "done");

        Ok(Self {
            params,
            header,
            components: Cow::Owned(vec![Component::Particles(component)]),
            ids,
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
