use super::Cell;
use crate::SimulationContext;
use cellpotts_concepts::*;

use std::collections::BTreeMap;
use std::sync::Arc;

/// A composite cell made of several sub-cells which move together.
///
/// The node set of a super cell is the union of the node sets of its sub-cells.
/// Nodes in the [CellLayer](crate::CellLayer) are owned by the sub-cells, thus super
/// cells do not track interfaces.
#[derive(Clone, Debug)]
pub struct SuperCell {
    cell: Cell,
    sub_cells: Vec<CellId>,
    sub_cell_pos: BTreeMap<CellId, usize>,
    centers: Vec<OrthPos>,
    updated_centers: Vec<OrthPos>,
}

impl SuperCell {
    /// Super cell without sub-cells.
    pub fn new(id: CellId, celltype: CellTypeId, context: Arc<SimulationContext>) -> Self {
        let mut cell = Cell::new(id, celltype, context);
        cell.shape_mut().set_interface_tracking(false);
        Self {
            cell,
            sub_cells: Vec::new(),
            sub_cell_pos: BTreeMap::new(),
            centers: Vec::new(),
            updated_centers: Vec::new(),
        }
    }

    /// The cell representing the composite as a whole.
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Mutable access to the cell representing the composite as a whole.
    pub fn cell_mut(&mut self) -> &mut Cell {
        &mut self.cell
    }

    /// Identifier of the super cell.
    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    /// Sub-cells in the order they were added.
    pub fn sub_cells(&self) -> &[CellId] {
        &self.sub_cells
    }

    /// Position of a sub-cell in [SuperCell::sub_cells].
    pub fn sub_cell_position(&self, cell_id: CellId) -> Option<usize> {
        self.sub_cell_pos.get(&cell_id).copied()
    }

    /// Committed centroids of all sub-cells.
    pub fn centers(&self) -> &[OrthPos] {
        &self.centers
    }

    /// Centroids of all sub-cells after the staged update.
    pub fn updated_centers(&self) -> &[OrthPos] {
        &self.updated_centers
    }

    /// Make `cell` a part of this super cell and take over its nodes.
    pub fn add_sub_cell(&mut self, cell: &mut Cell) -> CellId {
        let cell_id = cell.id();
        self.sub_cell_pos.insert(cell_id, self.sub_cells.len());
        self.sub_cells.push(cell_id);
        self.centers.push(cell.center());
        self.updated_centers.clone_from(&self.centers);
        cell.set_super_cell_id(Some(self.id()));
        self.cell.shape_mut().assimilate(cell.nodes().iter());
        cell_id
    }

    /// Detach `cell` from this super cell and turn it into the empty cell type.
    ///
    /// # Panics
    /// If `cell` is not a sub-cell of this super cell.
    pub fn remove_sub_cell(&mut self, cell: &mut Cell, empty_celltype: CellTypeId) {
        let cell_id = cell.id();
        let Some(pos) = self.sub_cell_pos.get(&cell_id).copied() else {
            panic!(
                "{}",
                format_error_message!(
                    "removing an unknown sub-cell",
                    format!(
                        "cell {} is not a sub-cell of super cell {} (sub-cells: {:?})",
                        cell_id,
                        self.id(),
                        self.sub_cells
                    )
                )
            );
        };
        cell.set_celltype(empty_celltype);
        cell.set_super_cell_id(None);
        self.cell.shape_mut().release(cell.nodes().iter());
        self.sub_cells.remove(pos);
        self.centers.remove(pos);
        self.sub_cell_pos = self
            .sub_cells
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        self.updated_centers.clone_from(&self.centers);
    }

    /// Stage the geometry after `update`.
    ///
    /// The sub-cells involved in the update must have staged it before. Their updated
    /// centroids are passed in `sub_cell_centers`.
    pub fn set_update(
        &mut self,
        update: &Update,
        todo: UpdateTodo,
        sub_cell_centers: &[(CellId, OrthPos)],
    ) {
        self.updated_centers.clone_from(&self.centers);
        for (cell_id, center) in sub_cell_centers {
            if let Some(pos) = self.sub_cell_pos.get(cell_id) {
                self.updated_centers[*pos] = *center;
            }
        }
        self.cell.set_update(update, todo);
    }

    /// Commit `update`. The involved sub-cells must have committed it before.
    pub fn apply_update(&mut self, update: &Update, todo: UpdateTodo) {
        self.cell.apply_update(update, todo);
        if todo != UpdateTodo::Neighborhood {
            self.centers.clone_from(&self.updated_centers);
        }
    }
}
