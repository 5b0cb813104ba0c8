use super::comm::{CommError, Communicator};
use crate::core::models::fluid::{DomainGrid, FluidComponent, GHOST_LAYERS, PADDING};
use crate::core::models::particles::ParticleComponent;
use itertools::iproduct;
use nalgebra::Point3;
use tracing::{debug, trace};

/// Splits `n` rows as evenly as possible over `size` processes.
///
/// The first `n % size` processes receive one extra row.
///
/// # Return
///
/// The `(start, count)` row range assigned to `rank`.
pub fn fair_partition(n: usize, size: usize, rank: usize) -> (usize, usize) {
    let base = n / size;
    let extra = n % size;
    let count = base + usize::from(rank < extra);
    let start = rank * base + rank.min(extra);
    (start, count)
}

/// The fair partition of `n` rows for the calling process.
pub fn partition(n: usize, comm: &dyn Communicator) -> (usize, usize) {
    fair_partition(n, comm.size(), comm.rank())
}

/// Exclusive prefix sum of the local counts of all processes.
///
/// # Return
///
/// The global index of this process's first local row.
///
/// # Errors
///
/// Returns [`CommError`] if the group was aborted during the all-gather.
pub fn prefix_offset(n_local: usize, comm: &dyn Communicator) -> Result<usize, CommError> {
    offset_and_total(n_local, comm).map(|(start, _)| start)
}

/// Like [`prefix_offset`], additionally returning the sum of `n_local` over
/// all processes.
///
/// # Errors
///
/// Returns [`CommError`] if the group was aborted during the all-gather.
pub fn offset_and_total(
    n_local: usize,
    comm: &dyn Communicator,
) -> Result<(usize, usize), CommError> {
    let counts = comm.allgather_u64(n_local as u64)?;
    let start = counts[..comm.rank()].iter().sum::<u64>() as usize;
    let total = counts.iter().sum::<u64>() as usize;
    Ok((start, total))
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// The cubic domain decomposition of the periodic box over a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainLayout {
    /// Number of domains along each axis; their product is the process count.
    pub subdivisions: [usize; 3],
    /// This process's domain coordinates.
    pub coords: [usize; 3],
}

impl DomainLayout {
    /// Decomposes the box over `size` processes as cubically as possible.
    ///
    /// Prime factors of `size` are handed out largest first, each to the axis
    /// with the fewest subdivisions so far.
    pub fn new(size: usize, rank: usize) -> Self {
        let mut subdivisions = [1usize; 3];
        let mut factors = prime_factors(size.max(1));
        factors.sort_unstable_by(|a, b| b.cmp(a));
        for factor in factors {
            let axis = (0..3)
                .min_by_key(|&axis| subdivisions[axis])
                .unwrap_or(0);
            subdivisions[axis] *= factor;
        }
        let mut layout = Self {
            subdivisions,
            coords: [0; 3],
        };
        layout.coords = layout.coords_of(rank);
        layout
    }

    pub fn from_comm(comm: &dyn Communicator) -> Self {
        Self::new(comm.size(), comm.rank())
    }

    pub fn nprocs(&self) -> usize {
        self.subdivisions.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.rank_of(self.coords)
    }

    pub fn rank_of(&self, coords: [usize; 3]) -> usize {
        let [_, s1, s2] = self.subdivisions;
        coords[0] * s1 * s2 + coords[1] * s2 + coords[2]
    }

    pub fn coords_of(&self, rank: usize) -> [usize; 3] {
        let [_, s1, s2] = self.subdivisions;
        [rank / (s1 * s2), (rank / s2) % s1, rank % s2]
    }

    /// Whether a global grid of `gridsize` points per axis splits evenly over the domains.
    pub fn divides(&self, gridsize: usize) -> bool {
        self.subdivisions.iter().all(|&s| gridsize % s == 0)
    }

    /// The interior size of every domain grid for a global grid of `gridsize` points.
    pub fn domain_size(&self, gridsize: usize) -> [usize; 3] {
        [
            gridsize / self.subdivisions[0],
            gridsize / self.subdivisions[1],
            gridsize / self.subdivisions[2],
        ]
    }

    /// Global grid index of the first interior point of the domain at `coords`.
    pub fn origin(&self, gridsize: usize, coords: [usize; 3]) -> [usize; 3] {
        let size = self.domain_size(gridsize);
        [
            coords[0] * size[0],
            coords[1] * size[1],
            coords[2] * size[2],
        ]
    }

    /// The rank whose domain contains `position`.
    ///
    /// Positions on or beyond the upper box edge are attributed to the last domain.
    pub fn owner_of(&self, position: &Point3<f64>, boxsize: f64) -> usize {
        let mut coords = [0usize; 3];
        for axis in 0..3 {
            let s = self.subdivisions[axis];
            let c = (position[axis] / boxsize * s as f64).floor();
            coords[axis] = if c < 0.0 { 0 } else { (c as usize).min(s - 1) };
        }
        self.rank_of(coords)
    }
}

/// Redistributes a padded domain grid into the unpadded slab of this process.
///
/// Slabs cut the global grid along the first axis into `nprocs` pieces of
/// equal thickness. The returned buffer is row-major with shape
/// `(gridsize / nprocs, gridsize, gridsize)`.
///
/// # Errors
///
/// Returns [`CommError`] if the group was aborted during the exchange.
pub fn slab_decompose(
    grid: &DomainGrid,
    gridsize: usize,
    layout: &DomainLayout,
    comm: &dyn Communicator,
) -> Result<Vec<f64>, CommError> {
    let nprocs = comm.size();
    let thickness = gridsize / nprocs;
    let size = layout.domain_size(gridsize);
    let origin = layout.origin(gridsize, layout.coords);

    let mut send = vec![Vec::new(); nprocs];
    for (i, j, k) in iproduct!(0..size[0], 0..size[1], 0..size[2]) {
        let dest = (origin[0] + i) / thickness;
        send[dest].push(grid.interior_get(i, j, k));
    }

    let received = comm.alltoallv_f64(send)?;

    let slab_start = comm.rank() * thickness;
    let mut slab = vec![0.0; thickness * gridsize * gridsize];
    for (src, buffer) in received.into_iter().enumerate() {
        let src_origin = layout.origin(gridsize, layout.coords_of(src));
        let x_range = src_origin[0].max(slab_start)..(src_origin[0] + size[0]).min(slab_start + thickness);
        let mut values = buffer.into_iter();
        for (x, j, k) in iproduct!(x_range, 0..size[1], 0..size[2]) {
            let (y, z) = (src_origin[1] + j, src_origin[2] + k);
            if let Some(value) = values.next() {
                slab[((x - slab_start) * gridsize + y) * gridsize + z] = value;
            }
        }
    }
    trace!(rank = comm.rank(), slab_start, thickness, "Slab decomposed");
    Ok(slab)
}

/// Moves every particle to the process whose domain contains its position.
///
/// # Arguments
///
/// * `component` - The particle component to redistribute.
/// * `boxsize` - The side length of the periodic box.
/// * `layout` - The domain decomposition.
/// * `comm` - The process group.
/// * `reset_buffers` - Release communication scratch state afterwards.
///
/// # Errors
///
/// Returns [`CommError`] if the group was aborted during the exchange.
pub fn exchange(
    component: &mut ParticleComponent,
    boxsize: f64,
    layout: &DomainLayout,
    comm: &dyn Communicator,
    reset_buffers: bool,
) -> Result<(), CommError> {
    let mut send = vec![Vec::new(); comm.size()];
    for i in 0..component.n_local() {
        let position = component.position(i);
        let momentum = component.momentum(i);
        let dest = layout.owner_of(&position, boxsize);
        send[dest].extend_from_slice(&[
            position.x, position.y, position.z, momentum.x, momentum.y, momentum.z,
        ]);
    }

    let received = comm.alltoallv_f64(send)?;

    component.clear_local();
    for buffer in received {
        for particle in buffer.chunks_exact(6) {
            component.push(
                Point3::new(particle[0], particle[1], particle[2]),
                nalgebra::Vector3::new(particle[3], particle[4], particle[5]),
            );
        }
    }
    debug!(
        rank = comm.rank(),
        component = %component.name,
        n_local = component.n_local(),
        "Particles exchanged"
    );

    if reset_buffers {
        comm.reset_buffers();
    }
    Ok(())
}

/// For one axis, every padded position with the domain coordinate and
/// interior index of the point it mirrors under periodic boundaries.
fn padded_axis(origin: usize, size: usize, subdivisions: usize) -> Vec<(usize, usize, usize)> {
    let gridsize = size * subdivisions;
    (0..size + PADDING)
        .map(|p| {
            let global = (origin + gridsize + p - GHOST_LAYERS) % gridsize;
            (p, global / size, global % size)
        })
        .collect()
}

fn is_interior(p: usize, size: usize) -> bool {
    (GHOST_LAYERS..GHOST_LAYERS + size).contains(&p)
}

/// Every non-interior padded point of the domain at `coords`, paired with the
/// owning rank and the owner's interior index, in a canonical order.
fn ghost_points(
    layout: &DomainLayout,
    gridsize: usize,
    coords: [usize; 3],
) -> Vec<([usize; 3], usize, [usize; 3])> {
    let size = layout.domain_size(gridsize);
    let origin = layout.origin(gridsize, coords);
    let axes: Vec<_> = (0..3)
        .map(|axis| padded_axis(origin[axis], size[axis], layout.subdivisions[axis]))
        .collect();
    iproduct!(axes[0].iter(), axes[1].iter(), axes[2].iter())
        .filter(|(x, y, z)| {
            !(is_interior(x.0, size[0]) && is_interior(y.0, size[1]) && is_interior(z.0, size[2]))
        })
        .map(|(x, y, z)| {
            let owner = layout.rank_of([x.1, y.1, z.1]);
            ([x.0, y.0, z.0], owner, [x.2, y.2, z.2])
        })
        .collect()
}

/// Fills the ghost layers and pseudo points of every fluid scalar with the
/// periodic neighbour values owned by other domains.
///
/// # Errors
///
/// Returns [`CommError`] if the group was aborted during the exchange.
pub fn populate_ghosts(
    component: &mut FluidComponent,
    layout: &DomainLayout,
    comm: &dyn Communicator,
) -> Result<(), CommError> {
    let gridsize = component.gridsize;
    let rank = comm.rank();

    let mut send = vec![Vec::new(); comm.size()];
    for (dest, buffer) in send.iter_mut().enumerate() {
        for (_, owner, local) in ghost_points(layout, gridsize, layout.coords_of(dest)) {
            if owner == rank {
                for (_, scalar) in component.scalars() {
                    buffer.push(scalar.grid.interior_get(local[0], local[1], local[2]));
                }
            }
        }
    }

    let received = comm.alltoallv_f64(send)?;

    let mut cursors: Vec<_> = received.into_iter().map(|b| b.into_iter()).collect();
    for (padded, owner, _) in ghost_points(layout, gridsize, layout.coords) {
        for (_, scalar) in component.scalars_mut() {
            if let Some(value) = cursors[owner].next() {
                scalar.grid.set(padded[0], padded[1], padded[2], value);
            }
        }
    }
    trace!(rank, component = %component.name, "Ghost points populated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fluid::EquationOfState;
    use crate::core::models::species::Species;
    use crate::core::parallel::comm::{ProcessGroup, SerialComm, Traffic};
    use nalgebra::Vector3;

    #[test]
    fn fair_partition_gives_extra_rows_to_the_first_ranks() {
        let ranges: Vec<_> = (0..3).map(|rank| fair_partition(10, 3, rank)).collect();
        assert_eq!(ranges, vec![(0, 4), (4, 3), (7, 3)]);
        assert_eq!(fair_partition(2, 4, 3), (2, 0));
    }

    #[test]
    fn prefix_offset_is_the_exclusive_sum_of_counts() {
        let results = ProcessGroup::run(4, |comm| prefix_offset(comm.rank() + 1, comm));
        let offsets: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(offsets, vec![0, 1, 3, 6]);

        let results = ProcessGroup::run(3, |comm| offset_and_total(2 * comm.rank(), comm));
        let slices: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(slices, vec![(0, 6), (0, 6), (2, 6)]);
    }

    #[test]
    fn layout_is_as_cubic_as_possible() {
        assert_eq!(DomainLayout::new(1, 0).subdivisions, [1, 1, 1]);
        assert_eq!(DomainLayout::new(2, 0).subdivisions, [2, 1, 1]);
        assert_eq!(DomainLayout::new(4, 0).subdivisions, [2, 2, 1]);
        assert_eq!(DomainLayout::new(8, 0).subdivisions, [2, 2, 2]);
        assert_eq!(DomainLayout::new(12, 0).subdivisions, [3, 2, 2]);
    }

    #[test]
    fn rank_and_coords_are_inverse() {
        let layout = DomainLayout::new(12, 7);
        assert_eq!(layout.rank(), 7);
        for rank in 0..12 {
            assert_eq!(layout.rank_of(layout.coords_of(rank)), rank);
        }
    }

    #[test]
    fn owner_of_clamps_to_the_box() {
        let layout = DomainLayout::new(2, 0);
        assert_eq!(layout.owner_of(&Point3::new(1.0, 9.0, 9.0), 10.0), 0);
        assert_eq!(layout.owner_of(&Point3::new(6.0, 0.0, 0.0), 10.0), 1);
        assert_eq!(layout.owner_of(&Point3::new(10.0, 0.0, 0.0), 10.0), 1);
    }

    fn global_value(x: usize, y: usize, z: usize) -> f64 {
        (x * 100 + y * 10 + z) as f64
    }

    fn filled_component(layout: &DomainLayout, gridsize: usize) -> FluidComponent {
        let size = layout.domain_size(gridsize);
        let origin = layout.origin(gridsize, layout.coords);
        let mut component = FluidComponent::new(
            "gas",
            Species::BaryonFluid,
            gridsize,
            1,
            EquationOfState::Constant(0.0),
            size,
        );
        let values: Vec<f64> = iproduct!(0..size[0], 0..size[1], 0..size[2])
            .map(|(i, j, k)| global_value(origin[0] + i, origin[1] + j, origin[2] + k))
            .collect();
        component.fluidvars[0].scalars[0].grid.set_interior(&values);
        component
    }

    #[test]
    fn slab_decompose_reassembles_the_global_grid() {
        let gridsize = 4;
        let results = ProcessGroup::run(4, |comm| {
            let layout = DomainLayout::from_comm(comm);
            let component = filled_component(&layout, gridsize);
            slab_decompose(&component.fluidvars[0].scalars[0].grid, gridsize, &layout, comm)
        });
        for (rank, result) in results.into_iter().enumerate() {
            let slab = result.unwrap();
            let expected: Vec<f64> = iproduct!(rank..rank + 1, 0..gridsize, 0..gridsize)
                .map(|(x, y, z)| global_value(x, y, z))
                .collect();
            assert_eq!(slab, expected);
        }
    }

    #[test]
    fn populate_ghosts_wraps_periodically() {
        let gridsize = 4;
        let results = ProcessGroup::run(2, |comm| {
            let layout = DomainLayout::from_comm(comm);
            let mut component = filled_component(&layout, gridsize);
            populate_ghosts(&mut component, &layout, comm)?;
            Ok::<_, CommError>((layout, component))
        });
        for result in results {
            let (layout, component) = result.unwrap();
            let grid = &component.fluidvars[0].scalars[0].grid;
            let origin = layout.origin(gridsize, layout.coords);
            let [sx, sy, sz] = grid.padded_shape();
            for (i, j, k) in iproduct!(0..sx, 0..sy, 0..sz) {
                let x = (origin[0] + gridsize + i - GHOST_LAYERS) % gridsize;
                let y = (origin[1] + gridsize + j - GHOST_LAYERS) % gridsize;
                let z = (origin[2] + gridsize + k - GHOST_LAYERS) % gridsize;
                assert_eq!(grid.get(i, j, k), global_value(x, y, z));
            }
        }
    }

    #[test]
    fn exchange_moves_particles_to_their_owners() {
        let results = ProcessGroup::run(2, |comm| {
            let layout = DomainLayout::from_comm(comm);
            let mut component =
                ParticleComponent::new("halos", Species::DarkMatterParticles, 4, 1.0);
            if comm.rank() == 0 {
                component.push(Point3::new(1.0, 1.0, 1.0), Vector3::new(1.0, 0.0, 0.0));
                component.push(Point3::new(7.0, 1.0, 1.0), Vector3::new(2.0, 0.0, 0.0));
            } else {
                component.push(Point3::new(2.0, 1.0, 1.0), Vector3::new(3.0, 0.0, 0.0));
                component.push(Point3::new(9.0, 1.0, 1.0), Vector3::new(4.0, 0.0, 0.0));
            }
            exchange(&mut component, 10.0, &layout, comm, true)?;
            Ok::<_, CommError>((component, comm.traffic()))
        });
        let (low, low_traffic) = results[0].as_ref().unwrap();
        let (high, _) = results[1].as_ref().unwrap();
        assert_eq!(low.posx, vec![1.0, 2.0]);
        assert_eq!(low.momx, vec![1.0, 3.0]);
        assert_eq!(high.posx, vec![7.0, 9.0]);
        assert_eq!(*low_traffic, Traffic::default());
    }

    #[test]
    fn serial_exchange_keeps_every_particle() {
        let comm = SerialComm::new();
        let layout = DomainLayout::from_comm(&comm);
        let mut component = ParticleComponent::new("halos", Species::DarkMatterParticles, 1, 1.0);
        component.push(Point3::new(3.0, 4.0, 5.0), Vector3::zeros());
        exchange(&mut component, 10.0, &layout, &comm, false).unwrap();
        assert_eq!(component.position(0), Point3::new(3.0, 4.0, 5.0));
    }
}
