use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Integer coordinate of a node on the simulation lattice.
///
/// Unused dimensions are kept at zero.
pub type NodePos = Vector3<i32>;

/// Position in orthogonal (cartesian) space.
pub type OrthPos = Vector3<f64>;

/// Geometric arrangement of the lattice nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatticeStructure {
    /// One-dimensional chain of nodes
    Linear,
    /// Two-dimensional square grid
    Square,
    /// Two-dimensional hexagonal grid (rows shifted by half a node)
    Hexagonal,
    /// Three-dimensional cubic grid
    Cubic,
}

impl LatticeStructure {
    /// Number of spatial dimensions spanned by this structure.
    pub fn dimensions(&self) -> usize {
        match self {
            LatticeStructure::Linear => 1,
            LatticeStructure::Square | LatticeStructure::Hexagonal => 2,
            LatticeStructure::Cubic => 3,
        }
    }
}

/// How counted neighbor contacts are converted into a physical boundary length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryScalingMode {
    /// Neighborhood-order dependent scaling factors (Magno et al.)
    #[default]
    Magno,
    /// Divide by the number of neighbors in the boundary neighborhood
    NeighborNumber,
    /// Report raw neighbor counts
    None,
}

/// Discrete spatial lattice on which cells live.
///
/// Implementors describe the node layout. Which cell occupies which node is stored
/// elsewhere (see the occupancy layer of the building blocks).
pub trait Lattice: Send + Sync + core::fmt::Debug {
    /// Geometric structure of the lattice.
    fn structure(&self) -> LatticeStructure;

    /// Number of nodes along every axis. Unused axes have size 1.
    fn size(&self) -> NodePos;

    /// Periodicity of every axis.
    fn periodic(&self) -> [bool; 3];

    /// Converts a (possibly fractional) lattice coordinate into orthogonal space.
    fn to_orth(&self, pos: &OrthPos) -> OrthPos;

    /// Inverse of [Lattice::to_orth].
    fn from_orth(&self, pos: &OrthPos) -> OrthPos;

    /// All neighbor offsets up to the given neighborhood order.
    ///
    /// The order counts distinct distance shells: order 1 contains the nearest
    /// neighbors, order 2 additionally the second nearest and so on.
    fn neighbors(&self, order: usize) -> Vec<NodePos>;

    /// Maps a node into the lattice, wrapping periodic axes.
    ///
    /// Returns [None] if the node lies outside a non-periodic axis.
    fn resolve(&self, pos: &NodePos) -> Option<NodePos>;

    /// Number of spatial dimensions.
    fn dimensions(&self) -> usize {
        self.structure().dimensions()
    }

    /// Orthogonal position of a lattice node.
    fn node_to_orth(&self, pos: &NodePos) -> OrthPos {
        self.to_orth(&pos.cast::<f64>())
    }

    /// Shortest orthogonal difference `a - b`, honoring periodic axes.
    fn orth_distance(&self, a: &OrthPos, b: &OrthPos) -> OrthPos {
        let mut delta = self.from_orth(&(a - b));
        let size = self.size();
        for (i, periodic) in self.periodic().into_iter().enumerate() {
            if periodic {
                let length = size[i] as f64;
                if delta[i] > 0.5 * length {
                    delta[i] -= length;
                } else if delta[i] < -0.5 * length {
                    delta[i] += length;
                }
            }
        }
        self.to_orth(&delta)
    }

    /// Factor converting neighbor counts into boundary length for the given order.
    fn boundary_scaling(&self, order: usize, mode: BoundaryScalingMode) -> f64 {
        match mode {
            BoundaryScalingMode::Magno => {
                let table: &[f64] = match self.structure() {
                    LatticeStructure::Linear => &[0.0, 1.0, 2.0, 3.0, 4.0],
                    LatticeStructure::Square => &[0.0, 1.0, 3.0, 5.0, 11.0, 15.0, 18.0, 26.0, 36.0],
                    LatticeStructure::Hexagonal => &[0.0, 2.2, 6.0, 10.4, 22.1, 28.65],
                    LatticeStructure::Cubic => &[0.0, 1.0, 5.0, 9.0, 11.0, 23.0, 39.0, 47.0, 70.0],
                };
                table
                    .get(order)
                    .copied()
                    .unwrap_or_else(|| self.neighbors(order).len() as f64)
            }
            BoundaryScalingMode::NeighborNumber => self.neighbors(order).len() as f64,
            BoundaryScalingMode::None => 1.0,
        }
    }
}
