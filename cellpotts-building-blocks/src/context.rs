use crate::RegularLattice;
use cellpotts_concepts::*;
use serde::{Deserialize, Serialize};

/// Shared settings every cell, layer and mapper of one simulation is built from.
///
/// The context is constructed once and handed to the constructors of all
/// components (usually behind an [Arc](std::sync::Arc)).
/// ```
/// # use cellpotts_building_blocks::*;
/// let lattice = RegularLattice::square(50, 50, [true, true])?;
/// let context = SimulationContext::new(lattice)
///     .with_boundary_order(2)
///     .with_membrane_resolution(20);
/// assert_eq!(context.boundary_order, 2);
/// # Ok::<(), cellpotts_concepts::SetupError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationContext {
    /// The lattice all cells live on
    pub lattice: RegularLattice,
    /// Neighborhood order used to count interface lengths
    pub boundary_order: usize,
    /// Neighborhood order used to decide whether a node lies on the surface of its cell
    pub surface_order: usize,
    /// Conversion of neighbor counts into physical boundary lengths
    pub boundary_scaling: BoundaryScalingMode,
    /// Resolution of membrane lattices
    pub membrane_resolution: usize,
    /// Cell type assigned to detached sub-cells
    pub empty_celltype: CellTypeId,
    /// Seed from which all random number generators are derived
    pub seed: u64,
}

impl SimulationContext {
    /// Context with first-order neighborhoods and a membrane resolution of 20.
    pub fn new(lattice: RegularLattice) -> Self {
        Self {
            lattice,
            boundary_order: 1,
            surface_order: 1,
            boundary_scaling: BoundaryScalingMode::default(),
            membrane_resolution: 20,
            empty_celltype: 0,
            seed: 0,
        }
    }

    /// Set [SimulationContext::boundary_order].
    pub fn with_boundary_order(mut self, order: usize) -> Self {
        self.boundary_order = order;
        self
    }

    /// Set [SimulationContext::surface_order].
    pub fn with_surface_order(mut self, order: usize) -> Self {
        self.surface_order = order;
        self
    }

    /// Set [SimulationContext::boundary_scaling].
    pub fn with_boundary_scaling(mut self, mode: BoundaryScalingMode) -> Self {
        self.boundary_scaling = mode;
        self
    }

    /// Set [SimulationContext::membrane_resolution].
    pub fn with_membrane_resolution(mut self, resolution: usize) -> Self {
        self.membrane_resolution = resolution;
        self
    }

    /// Set [SimulationContext::empty_celltype].
    pub fn with_empty_celltype(mut self, celltype: CellTypeId) -> Self {
        self.empty_celltype = celltype;
        self
    }

    /// Set [SimulationContext::seed].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Factor dividing raw neighbor counts into interface lengths.
    pub fn boundary_length_scaling(&self) -> f64 {
        self.lattice
            .boundary_scaling(self.boundary_order, self.boundary_scaling)
    }

    /// Dimension of the membrane lattice attached to cells on this lattice.
    ///
    /// Cells in a 3D lattice carry spherical (2D) membranes, all others a ring (1D).
    pub fn membrane_dimensions(&self) -> usize {
        if self.lattice.dimensions() == 3 {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_serialization() {
        let lattice = RegularLattice::hexagonal(10, 12, [true, false]).unwrap();
        let context = SimulationContext::new(lattice)
            .with_surface_order(2)
            .with_seed(42);
        let text = serde_json::to_string(&context).unwrap();
        let back: SimulationContext = serde_json::from_str(&text).unwrap();
        assert_eq!(context, back);
        assert_eq!(back.membrane_dimensions(), 1);
    }

    #[test]
    fn scaling_follows_order() {
        let lattice = RegularLattice::cubic(5, 5, 5, [true; 3]).unwrap();
        let context = SimulationContext::new(lattice).with_boundary_order(3);
        assert_eq!(context.boundary_length_scaling(), 9.0);
        assert_eq!(context.membrane_dimensions(), 2);
    }
}
