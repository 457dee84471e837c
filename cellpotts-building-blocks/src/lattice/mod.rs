// Imports from this crate
use cellpotts_concepts::*;

// Imports from other crates
use itertools::Itertools;
use num::Integer;
use serde::{Deserialize, Serialize};

mod layer;
pub use layer::*;

/// Largest offset which is searched when building neighborhoods.
///
/// Only distance shells lying completely inside this radius are reported.
const NEIGHBOR_SEARCH_RADIUS: i32 = 5;

/// Regular lattice of one of the supported [LatticeStructure]s.
///
/// ```
/// # use cellpotts_building_blocks::RegularLattice;
/// # use cellpotts_concepts::Lattice;
/// let lattice = RegularLattice::square(10, 10, [true, true])?;
/// assert_eq!(lattice.neighbors(1).len(), 4);
/// assert_eq!(lattice.neighbors(2).len(), 8);
/// # Ok::<(), cellpotts_concepts::SetupError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegularLattice {
    structure: LatticeStructure,
    size: [i32; 3],
    periodic: [bool; 3],
}

impl RegularLattice {
    /// Construct a new lattice and check that its size is valid for the structure.
    pub fn new(
        structure: LatticeStructure,
        size: [i32; 3],
        periodic: [bool; 3],
    ) -> Result<Self, SetupError> {
        let dims = structure.dimensions();
        for (axis, &length) in size.iter().enumerate() {
            if length < 1 {
                return Err(SetupError(format!(
                    "lattice size along axis {axis} must be positive but is {length}"
                )));
            }
            if axis >= dims && length != 1 {
                return Err(SetupError(format!(
                    "{structure:?} lattice must have size 1 along axis {axis}, got {length}"
                )));
            }
        }
        let mut periodic = periodic;
        for p in periodic.iter_mut().skip(dims) {
            *p = false;
        }
        Ok(Self {
            structure,
            size,
            periodic,
        })
    }

    /// One-dimensional chain of `n` nodes.
    pub fn linear(n: i32, periodic: bool) -> Result<Self, SetupError> {
        Self::new(LatticeStructure::Linear, [n, 1, 1], [periodic, false, false])
    }

    /// Two-dimensional square lattice.
    pub fn square(nx: i32, ny: i32, periodic: [bool; 2]) -> Result<Self, SetupError> {
        Self::new(
            LatticeStructure::Square,
            [nx, ny, 1],
            [periodic[0], periodic[1], false],
        )
    }

    /// Two-dimensional hexagonal lattice.
    pub fn hexagonal(nx: i32, ny: i32, periodic: [bool; 2]) -> Result<Self, SetupError> {
        Self::new(
            LatticeStructure::Hexagonal,
            [nx, ny, 1],
            [periodic[0], periodic[1], false],
        )
    }

    /// Three-dimensional cubic lattice.
    pub fn cubic(nx: i32, ny: i32, nz: i32, periodic: [bool; 3]) -> Result<Self, SetupError> {
        Self::new(LatticeStructure::Cubic, [nx, ny, nz], periodic)
    }

    /// Total number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }

    /// Flat index of a node, wrapping periodic axes.
    pub fn index(&self, pos: &NodePos) -> Option<usize> {
        let pos = self.resolve(pos)?;
        Some(
            pos.x as usize
                + self.size[0] as usize * (pos.y as usize + self.size[1] as usize * pos.z as usize),
        )
    }

    /// Inverse of [RegularLattice::index].
    pub fn position(&self, index: usize) -> NodePos {
        let sx = self.size[0] as usize;
        let sy = self.size[1] as usize;
        NodePos::new(
            (index % sx) as i32,
            ((index / sx) % sy) as i32,
            (index / (sx * sy)) as i32,
        )
    }

    /// Neighbor offsets grouped into shells of equal distance, nearest first.
    fn neighbor_shells(&self) -> Vec<Vec<NodePos>> {
        let dims = self.dimensions();
        let range = |axis: usize| {
            if axis < dims {
                -NEIGHBOR_SEARCH_RADIUS..=NEIGHBOR_SEARCH_RADIUS
            } else {
                0..=0
            }
        };
        let offsets = itertools::iproduct!(range(0), range(1), range(2))
            .map(|(x, y, z)| NodePos::new(x, y, z))
            .filter(|offset| *offset != NodePos::zeros())
            .map(|offset| {
                let distance = self.node_to_orth(&offset).norm();
                // Round to suppress floating point noise of the hexagonal geometry
                ((distance * 1e6).round() as i64, offset)
            })
            .filter(|(distance, _)| *distance <= NEIGHBOR_SEARCH_RADIUS as i64 * 1_000_000)
            .sorted_by_key(|(distance, offset)| (*distance, offset.x, offset.y, offset.z));
        let chunks = offsets.chunk_by(|(distance, _)| *distance);
        let shells = chunks
            .into_iter()
            .map(|(_, shell)| shell.map(|(_, offset)| offset).collect())
            .collect();
        shells
    }
}

impl Lattice for RegularLattice {
    fn structure(&self) -> LatticeStructure {
        self.structure
    }

    fn size(&self) -> NodePos {
        NodePos::from(self.size)
    }

    fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    fn to_orth(&self, pos: &OrthPos) -> OrthPos {
        match self.structure {
            LatticeStructure::Hexagonal => {
                OrthPos::new(pos.x + 0.5 * pos.y, pos.y * f64::sqrt(3.0) / 2.0, pos.z)
            }
            _ => *pos,
        }
    }

    fn from_orth(&self, pos: &OrthPos) -> OrthPos {
        match self.structure {
            LatticeStructure::Hexagonal => {
                let y = pos.y * 2.0 / f64::sqrt(3.0);
                OrthPos::new(pos.x - 0.5 * y, y, pos.z)
            }
            _ => *pos,
        }
    }

    fn neighbors(&self, order: usize) -> Vec<NodePos> {
        self.neighbor_shells()
            .into_iter()
            .take(order)
            .flatten()
            .collect()
    }

    fn resolve(&self, pos: &NodePos) -> Option<NodePos> {
        let mut resolved = *pos;
        for axis in 0..3 {
            let length = self.size[axis];
            if self.periodic[axis] {
                resolved[axis] = resolved[axis].mod_floor(&length);
            } else if resolved[axis] < 0 || resolved[axis] >= length {
                return None;
            }
        }
        Some(resolved)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn square_neighborhood_orders() {
        let lattice = RegularLattice::square(20, 20, [true, true]).unwrap();
        let sizes: Vec<_> = (1..=4).map(|o| lattice.neighbors(o).len()).collect();
        assert_eq!(sizes, vec![4, 8, 12, 20]);
    }

    #[test]
    fn hexagonal_and_cubic_neighborhoods() {
        let hex = RegularLattice::hexagonal(20, 20, [true, true]).unwrap();
        assert_eq!(hex.neighbors(1).len(), 6);
        assert_eq!(hex.neighbors(2).len(), 12);
        let cubic = RegularLattice::cubic(10, 10, 10, [true; 3]).unwrap();
        assert_eq!(cubic.neighbors(1).len(), 6);
        assert_eq!(cubic.neighbors(2).len(), 18);
        assert_eq!(cubic.neighbors(3).len(), 26);
        let linear = RegularLattice::linear(10, true).unwrap();
        assert_eq!(linear.neighbors(2).len(), 4);
    }

    #[test]
    fn resolve_wraps_periodic_axes() {
        let lattice = RegularLattice::square(5, 5, [true, false]).unwrap();
        assert_eq!(
            lattice.resolve(&NodePos::new(-1, 2, 0)),
            Some(NodePos::new(4, 2, 0))
        );
        assert_eq!(lattice.resolve(&NodePos::new(1, 5, 0)), None);
        assert_eq!(lattice.index(&NodePos::new(6, 1, 0)), Some(6));
        assert_eq!(lattice.position(6), NodePos::new(1, 1, 0));
    }

    #[test]
    fn hexagonal_orth_round_trip() {
        let lattice = RegularLattice::hexagonal(10, 10, [false, false]).unwrap();
        let p = OrthPos::new(2.0, 3.0, 0.0);
        let back = lattice.from_orth(&lattice.to_orth(&p));
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn periodic_orth_distance_takes_shortest_image() {
        let lattice = RegularLattice::square(10, 10, [true, true]).unwrap();
        let d = lattice.orth_distance(&OrthPos::new(9.0, 0.0, 0.0), &OrthPos::new(0.0, 0.0, 0.0));
        assert_eq!(d, OrthPos::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn boundary_scaling_tables() {
        let lattice = RegularLattice::square(10, 10, [true, true]).unwrap();
        assert_eq!(lattice.boundary_scaling(2, BoundaryScalingMode::Magno), 3.0);
        assert_eq!(
            lattice.boundary_scaling(2, BoundaryScalingMode::NeighborNumber),
            8.0
        );
        assert_eq!(lattice.boundary_scaling(2, BoundaryScalingMode::None), 1.0);
    }

    #[test]
    fn invalid_size_is_rejected() {
        assert!(RegularLattice::new(LatticeStructure::Square, [4, 4, 2], [false; 3]).is_err());
        assert!(RegularLattice::linear(0, false).is_err());
    }
}
