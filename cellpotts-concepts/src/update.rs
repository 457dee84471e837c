use crate::NodePos;
use serde::{Deserialize, Serialize};

/// Identifier of a cell. Medium and boundary states are cells as well.
pub type CellId = u32;

/// Placeholder for "no cell".
pub const NO_CELL: CellId = CellId::MAX;

/// Identifier of a cell type.
pub type CellTypeId = u32;

/// Ownership of a single lattice node.
///
/// On periodic lattices `pos` is the position of the node as seen by its owner and may
/// lie outside of the lattice. Cells straddling a periodic boundary thus keep a
/// contiguous node set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Cell owning the node
    pub cell_id: CellId,
    /// Position of the node
    pub pos: NodePos,
}

/// Number of nodes of one cell found in the boundary neighborhood of the update focus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilStatistic {
    /// Owner of the counted nodes
    pub cell: CellId,
    /// Number of neighbors owned by [StencilStatistic::cell]
    pub count: u32,
}

/// What a proposed change means for one particular cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTodo {
    /// The cell gains the focus node
    Add,
    /// The cell loses the focus node
    Remove,
    /// The node moves between two parts of the same (super) cell
    AddAndRemove,
    /// A node adjacent to the cell changes its owner
    Neighborhood,
}

impl UpdateTodo {
    /// The cell gains a node.
    pub fn op_add(&self) -> bool {
        matches!(self, UpdateTodo::Add | UpdateTodo::AddAndRemove)
    }

    /// The cell loses a node.
    pub fn op_remove(&self) -> bool {
        matches!(self, UpdateTodo::Remove | UpdateTodo::AddAndRemove)
    }

    /// Only the neighborhood of the cell changes.
    pub fn op_neighborhood(&self) -> bool {
        matches!(self, UpdateTodo::Neighborhood)
    }
}

/// A proposed change of ownership of a single lattice node.
///
/// The boundary statistics describe the neighborhood of the focus node *before* the
/// change is applied. They are the only information the shape trackers need to keep
/// their interface lengths consistent.
///
/// The losing cell removes [NodeState::pos] of the state before, the gaining cell adds
/// [NodeState::pos] of the state after. Both may differ from the focus on periodic
/// lattices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update {
    focus: NodePos,
    before: NodeState,
    after: NodeState,
    boundary_statistics: Vec<StencilStatistic>,
}

impl Update {
    /// Describe that node `focus` changes its owner from `before` to `after`.
    pub fn new(
        focus: NodePos,
        before: NodeState,
        after: NodeState,
        boundary_statistics: Vec<StencilStatistic>,
    ) -> Self {
        Self {
            focus,
            before,
            after,
            boundary_statistics,
        }
    }

    /// The node being changed, resolved to the lattice.
    pub fn focus(&self) -> NodePos {
        self.focus
    }

    /// Ownership of the focus node before the change.
    pub fn focus_state_before(&self) -> &NodeState {
        &self.before
    }

    /// Ownership of the focus node after the change.
    pub fn focus_state_after(&self) -> &NodeState {
        &self.after
    }

    /// Neighbor counts per owning cell around the focus node.
    pub fn boundary_statistics(&self) -> &[StencilStatistic] {
        &self.boundary_statistics
    }

    /// Which cells have to be informed about this update.
    ///
    /// Returns the losing cell, the gaining cell and all other cells which own a node
    /// in the boundary neighborhood of the focus.
    pub fn affected_cells(&self) -> (CellId, CellId, Vec<CellId>) {
        let neighbors = self
            .boundary_statistics
            .iter()
            .map(|stat| stat.cell)
            .filter(|cell| *cell != self.before.cell_id && *cell != self.after.cell_id)
            .collect();
        (self.before.cell_id, self.after.cell_id, neighbors)
    }
}
