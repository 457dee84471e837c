use super::RegularLattice;
use crate::SimulationContext;
use cellpotts_concepts::*;

use std::collections::{BTreeMap, HashMap};

/// Ownership of every node of a lattice.
///
/// Nodes outside of a non-periodic lattice are reported as owned by the background
/// cell. The layer produces [Update]s carrying the neighbor statistics of the boundary
/// neighborhood which the shape trackers of all affected cells rely on.
///
/// Every node remembers the position its owner knows it by (see [NodeState]). Copying
/// a node across a periodic boundary extends this position instead of wrapping it.
#[derive(Clone, Debug)]
pub struct CellLayer {
    lattice: RegularLattice,
    owners: Vec<NodeState>,
    background: CellId,
    boundary_neighbors: Vec<NodePos>,
    surface_neighbors: Vec<NodePos>,
}

impl CellLayer {
    /// Layer on the lattice of the context where every node is owned by `background`.
    pub fn new(context: &SimulationContext, background: CellId) -> Self {
        let lattice = context.lattice.clone();
        let boundary_neighbors = lattice.neighbors(context.boundary_order);
        let surface_neighbors = lattice.neighbors(context.surface_order);
        let owners = (0..lattice.n_nodes())
            .map(|index| NodeState {
                cell_id: background,
                pos: lattice.position(index),
            })
            .collect();
        Self {
            owners,
            lattice,
            background,
            boundary_neighbors,
            surface_neighbors,
        }
    }

    /// The underlying lattice.
    pub fn lattice(&self) -> &RegularLattice {
        &self.lattice
    }

    /// Cell owning everything which is not explicitly assigned.
    pub fn background(&self) -> CellId {
        self.background
    }

    /// Neighbor offsets used for interface counting.
    pub fn boundary_neighbors(&self) -> &[NodePos] {
        &self.boundary_neighbors
    }

    /// Neighbor offsets used for surface detection.
    pub fn surface_neighbors(&self) -> &[NodePos] {
        &self.surface_neighbors
    }

    /// Owner of a node.
    pub fn get(&self, pos: &NodePos) -> CellId {
        self.state(pos).cell_id
    }

    /// Owner of a node and the position the owner knows it by.
    pub fn state(&self, pos: &NodePos) -> NodeState {
        self.lattice
            .index(pos)
            .map(|index| self.owners[index])
            .unwrap_or(NodeState {
                cell_id: self.background,
                pos: *pos,
            })
    }

    fn index(&self, pos: &NodePos) -> Result<usize, BoundaryError> {
        self.lattice
            .index(pos)
            .ok_or_else(|| BoundaryError(format!("node {pos:?} lies outside of the lattice")))
    }

    /// Assign a node to a cell without generating an [Update].
    ///
    /// The owner knows the node by `pos` as given.
    pub fn set(&mut self, pos: &NodePos, cell: CellId) -> Result<(), BoundaryError> {
        let index = self.index(pos)?;
        self.owners[index] = NodeState {
            cell_id: cell,
            pos: *pos,
        };
        Ok(())
    }

    /// Number of nodes owned by each cell in the boundary neighborhood of `pos`.
    pub fn boundary_statistics(&self, pos: &NodePos) -> Vec<StencilStatistic> {
        let mut counts = BTreeMap::<CellId, u32>::new();
        for offset in self.boundary_neighbors.iter() {
            *counts.entry(self.get(&(pos + offset))).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(cell, count)| StencilStatistic { cell, count })
            .collect()
    }

    /// Describe that `pos` would change its owner to `new_cell`.
    ///
    /// The new owner knows the node by `pos` as given, which may lie beyond a periodic
    /// boundary.
    pub fn propose(&self, pos: &NodePos, new_cell: CellId) -> Result<Update, BoundaryError> {
        let focus = self
            .lattice
            .resolve(pos)
            .ok_or_else(|| BoundaryError(format!("node {pos:?} lies outside of the lattice")))?;
        let after = NodeState {
            cell_id: new_cell,
            pos: *pos,
        };
        Ok(self.update_at(focus, after))
    }

    /// Describe that the owner of `source` would extend to its neighbor `source + direction`.
    ///
    /// The gaining cell knows the focus by its own position of `source` shifted by
    /// `direction`, thus cells grow across periodic boundaries without wrapping.
    pub fn propose_copy(
        &self,
        source: &NodePos,
        direction: &NodePos,
    ) -> Result<Update, BoundaryError> {
        let source = self.lattice.resolve(source).ok_or_else(|| {
            BoundaryError(format!("source node {source:?} lies outside of the lattice"))
        })?;
        let mut after = self.state(&source);
        after.pos += direction;
        let focus = self.lattice.resolve(&(source + direction)).ok_or_else(|| {
            BoundaryError(format!(
                "node {:?} lies outside of the lattice",
                source + direction
            ))
        })?;
        Ok(self.update_at(focus, after))
    }

    fn update_at(&self, focus: NodePos, after: NodeState) -> Update {
        let before = self.state(&focus);
        // A cell reaching itself around the lattice keeps its position of the node
        let after = match before.cell_id == after.cell_id {
            true => before,
            false => after,
        };
        Update::new(focus, before, after, self.boundary_statistics(&focus))
    }

    /// Write the new owner of an accepted [Update] into the layer.
    pub fn commit(&mut self, update: &Update) -> Result<(), BoundaryError> {
        let index = self.index(&update.focus())?;
        self.owners[index] = *update.focus_state_after();
        Ok(())
    }

    /// Does any surface neighbor of `pos` belong to a different cell?
    pub fn is_surface(&self, pos: &NodePos) -> bool {
        let owner = self.get(pos);
        self.surface_neighbors
            .iter()
            .any(|offset| self.get(&(pos + offset)) != owner)
    }

    /// Raw interface counts of a node set owned by `cell`, computed from scratch.
    pub fn count_interfaces<'a>(
        &self,
        cell: CellId,
        nodes: impl IntoIterator<Item = &'a NodePos>,
    ) -> HashMap<CellId, u32> {
        let mut interfaces = HashMap::new();
        for node in nodes {
            for offset in self.boundary_neighbors.iter() {
                let neighbor = self.get(&(node + offset));
                if neighbor != cell {
                    *interfaces.entry(neighbor).or_default() += 1;
                }
            }
        }
        interfaces
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn layer() -> CellLayer {
        let lattice = RegularLattice::square(10, 10, [false, false]).unwrap();
        CellLayer::new(&SimulationContext::new(lattice), 0)
    }

    #[test]
    fn outside_nodes_are_background() {
        let mut layer = layer();
        assert_eq!(layer.get(&NodePos::new(-1, 3, 0)), 0);
        assert!(layer.set(&NodePos::new(10, 0, 0), 1).is_err());
        layer.set(&NodePos::new(0, 0, 0), 4).unwrap();
        assert_eq!(layer.get(&NodePos::new(0, 0, 0)), 4);
    }

    #[test]
    fn proposal_statistics() {
        let mut layer = layer();
        layer.set(&NodePos::new(4, 5, 0), 1).unwrap();
        layer.set(&NodePos::new(5, 4, 0), 2).unwrap();
        let update = layer.propose(&NodePos::new(5, 5, 0), 1).unwrap();
        assert_eq!(update.focus_state_before().cell_id, 0);
        assert_eq!(
            update.boundary_statistics(),
            &[
                StencilStatistic { cell: 0, count: 2 },
                StencilStatistic { cell: 1, count: 1 },
                StencilStatistic { cell: 2, count: 1 },
            ]
        );
        layer.commit(&update).unwrap();
        assert_eq!(layer.get(&NodePos::new(5, 5, 0)), 1);
        assert!(layer.is_surface(&NodePos::new(5, 5, 0)));
    }

    #[test]
    fn copies_extend_across_periodic_boundaries() {
        let lattice = RegularLattice::square(10, 10, [true, false]).unwrap();
        let mut layer = CellLayer::new(&SimulationContext::new(lattice), 0);
        layer.set(&NodePos::new(9, 4, 0), 3).unwrap();
        let update = layer.propose_copy(&NodePos::new(9, 4, 0), &NodePos::new(1, 0, 0)).unwrap();
        assert_eq!(update.focus(), NodePos::new(0, 4, 0));
        assert_eq!(update.focus_state_before().pos, NodePos::new(0, 4, 0));
        assert_eq!(update.focus_state_after().pos, NodePos::new(10, 4, 0));
        layer.commit(&update).unwrap();
        assert_eq!(layer.get(&NodePos::new(10, 4, 0)), 3);
        assert_eq!(layer.state(&NodePos::new(0, 4, 0)).pos, NodePos::new(10, 4, 0));
        // Copying back keeps the position of the origin
        let update = layer.propose_copy(&NodePos::new(0, 4, 0), &NodePos::new(0, 1, 0)).unwrap();
        assert_eq!(update.focus_state_after().pos, NodePos::new(10, 5, 0));
        assert!(layer.propose_copy(&NodePos::new(0, 9, 0), &NodePos::new(0, 1, 0)).is_err());
    }

    #[test]
    fn interfaces_from_scratch() {
        let mut layer = layer();
        let nodes = [NodePos::new(2, 2, 0), NodePos::new(3, 2, 0)];
        for node in nodes.iter() {
            layer.set(node, 1).unwrap();
        }
        let interfaces = layer.count_interfaces(1, nodes.iter());
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[&0], 6);
    }
}
