use super::{parse_nodes, Cell, SuperCell};
use crate::{CellLayer, SimulationContext};
use cellpotts_concepts::*;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Table owning all cells and super cells of a simulation.
///
/// Cells refer to each other only by their [CellId]. The storage dispatches every
/// [Update] to all cells it concerns:
/// - the cell losing the node receives [UpdateTodo::Remove]
/// - the cell gaining the node receives [UpdateTodo::Add]
/// - all other cells owning a node in the boundary neighborhood receive
///   [UpdateTodo::Neighborhood]
/// - super cells of the losing and gaining cell receive [UpdateTodo::Remove] and
///   [UpdateTodo::Add], or [UpdateTodo::AddAndRemove] if both belong to the same super cell
///
/// Ids which are not stored (such as the medium) are skipped.
#[derive(Clone, Debug)]
pub struct CellStorage {
    context: Arc<SimulationContext>,
    cells: BTreeMap<CellId, Cell>,
    super_cells: BTreeMap<CellId, SuperCell>,
    next_id: CellId,
}

impl CellStorage {
    /// Empty storage. Ids are handed out starting at 1.
    pub fn new(context: Arc<SimulationContext>) -> Self {
        Self {
            context,
            cells: BTreeMap::new(),
            super_cells: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// The shared simulation context.
    pub fn context(&self) -> &Arc<SimulationContext> {
        &self.context
    }

    fn new_id(&mut self) -> CellId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Create a cell without nodes.
    pub fn create_cell(&mut self, celltype: CellTypeId) -> CellId {
        let id = self.new_id();
        self.cells
            .insert(id, Cell::new(id, celltype, self.context.clone()));
        id
    }

    /// Create a super cell without sub-cells.
    pub fn create_super_cell(&mut self, celltype: CellTypeId) -> CellId {
        let id = self.new_id();
        self.super_cells
            .insert(id, SuperCell::new(id, celltype, self.context.clone()));
        id
    }

    /// Remove a cell from the storage, e.g. after it lost its last node.
    pub fn remove_cell(&mut self, id: CellId) -> Option<Cell> {
        self.cells.remove(&id)
    }

    /// A stored cell.
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    /// Mutable access to a stored cell.
    pub fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    /// A stored super cell.
    pub fn super_cell(&self, id: CellId) -> Option<&SuperCell> {
        self.super_cells.get(&id)
    }

    /// Ids of all stored cells (without super cells).
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    /// Iterate over all stored cells (without super cells).
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Make `cell_id` a part of `super_cell_id`.
    pub fn add_sub_cell(&mut self, super_cell_id: CellId, cell_id: CellId) -> Result<(), IndexError> {
        let super_cell = self
            .super_cells
            .get_mut(&super_cell_id)
            .ok_or_else(|| IndexError(format!("no super cell with id {super_cell_id}")))?;
        let cell = self
            .cells
            .get_mut(&cell_id)
            .ok_or_else(|| IndexError(format!("no cell with id {cell_id}")))?;
        super_cell.add_sub_cell(cell);
        Ok(())
    }

    /// Detach `cell_id` from `super_cell_id`, turning it into the empty cell type.
    pub fn remove_sub_cell(
        &mut self,
        super_cell_id: CellId,
        cell_id: CellId,
    ) -> Result<(), IndexError> {
        let super_cell = self
            .super_cells
            .get_mut(&super_cell_id)
            .ok_or_else(|| IndexError(format!("no super cell with id {super_cell_id}")))?;
        let cell = self
            .cells
            .get_mut(&cell_id)
            .ok_or_else(|| IndexError(format!("no cell with id {cell_id}")))?;
        super_cell.remove_sub_cell(cell, self.context.empty_celltype);
        Ok(())
    }

    fn super_cell_of(&self, id: CellId) -> Option<CellId> {
        self.cells.get(&id).and_then(|cell| cell.super_cell_id())
    }

    /// Stage `update` in all affected cells.
    pub fn set_update(&mut self, update: &Update) {
        self.dispatch(update, true);
    }

    /// Commit `update` in all affected cells.
    pub fn apply_update(&mut self, update: &Update) {
        self.dispatch(update, false);
    }

    fn dispatch(&mut self, update: &Update, stage: bool) {
        let (from, to, others) = update.affected_cells();
        if from == to {
            return;
        }
        let handle = |cell: &mut Cell, todo: UpdateTodo| match stage {
            true => cell.set_update(update, todo),
            false => cell.apply_update(update, todo),
        };
        if let Some(cell) = self.cells.get_mut(&from) {
            handle(cell, UpdateTodo::Remove);
        }
        if let Some(cell) = self.cells.get_mut(&to) {
            handle(cell, UpdateTodo::Add);
        }
        for id in others {
            if let Some(cell) = self.cells.get_mut(&id) {
                handle(cell, UpdateTodo::Neighborhood);
            }
        }

        let super_cells = (self.super_cell_of(from), self.super_cell_of(to));
        let sub_cell_centers: Vec<_> = [from, to]
            .into_iter()
            .filter_map(|id| self.cells.get(&id).map(|c| (id, c.updated_center())))
            .collect();
        let mut handle_super = |id: CellId, todo: UpdateTodo| {
            if let Some(super_cell) = self.super_cells.get_mut(&id) {
                match stage {
                    true => super_cell.set_update(update, todo, &sub_cell_centers),
                    false => super_cell.apply_update(update, todo),
                }
            }
        };
        match super_cells {
            (Some(a), Some(b)) if a == b => handle_super(a, UpdateTodo::AddAndRemove),
            (a, b) => {
                if let Some(a) = a {
                    handle_super(a, UpdateTodo::Remove);
                }
                if let Some(b) = b {
                    handle_super(b, UpdateTodo::Add);
                }
            }
        }
    }

    /// Move node `pos` to `cell` and inform all affected cells.
    pub fn place_node(
        &mut self,
        layer: &mut CellLayer,
        pos: &NodePos,
        cell: CellId,
    ) -> Result<Update, BoundaryError> {
        let update = layer.propose(pos, cell)?;
        self.set_update(&update);
        self.apply_update(&update);
        layer.commit(&update)?;
        Ok(update)
    }

    /// Place all nodes of a node list (see [parse_nodes]) into `cell`.
    pub fn load_nodes(
        &mut self,
        layer: &mut CellLayer,
        cell: CellId,
        text: &str,
    ) -> Result<usize, ParseError> {
        let nodes = parse_nodes(text)?;
        for pos in nodes.iter() {
            self.place_node(layer, pos, cell)
                .map_err(|e| ParseError(format!("unable to put cell {cell} at {pos:?}: {e}")))?;
        }
        Ok(nodes.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RegularLattice;

    fn setup() -> (CellStorage, CellLayer) {
        let lattice = RegularLattice::square(30, 30, [true, true]).unwrap();
        let context = Arc::new(SimulationContext::new(lattice).with_empty_celltype(7));
        let layer = CellLayer::new(&context, 0);
        (CellStorage::new(context), layer)
    }

    #[test]
    fn neighbors_are_informed() {
        let (mut storage, mut layer) = setup();
        let a = storage.create_cell(1);
        let b = storage.create_cell(1);
        storage.place_node(&mut layer, &NodePos::new(5, 5, 0), a).unwrap();
        storage.place_node(&mut layer, &NodePos::new(6, 5, 0), b).unwrap();
        let cell_a = storage.cell(a).unwrap();
        assert_eq!(cell_a.shape().raw_interfaces()[&b], 1);
        assert_eq!(cell_a.shape().raw_interfaces()[&0], 3);
        let cell_b = storage.cell(b).unwrap();
        assert_eq!(cell_b.shape().raw_interfaces()[&a], 1);
        storage.place_node(&mut layer, &NodePos::new(6, 5, 0), a).unwrap();
        assert_eq!(storage.cell(b).unwrap().n_nodes(), 0);
        assert!(!storage.cell(a).unwrap().interfaces().contains_key(&b));
    }

    #[test]
    fn load_nodes_from_text() {
        let (mut storage, mut layer) = setup();
        let a = storage.create_cell(1);
        let n = storage.load_nodes(&mut layer, a, "1 1 0;2 1 0,3 1 0").unwrap();
        assert_eq!(n, 3);
        assert_eq!(storage.cell(a).unwrap().center(), OrthPos::new(2.0, 1.0, 0.0));
        assert_eq!(layer.get(&NodePos::new(3, 1, 0)), a);
        assert!(storage.load_nodes(&mut layer, a, "1;x").is_err());
    }

    #[test]
    fn super_cell_follows_sub_cells() {
        let (mut storage, mut layer) = setup();
        let s = storage.create_super_cell(2);
        let a = storage.create_cell(1);
        let b = storage.create_cell(1);
        storage.place_node(&mut layer, &NodePos::new(1, 1, 0), a).unwrap();
        storage.add_sub_cell(s, a).unwrap();
        storage.add_sub_cell(s, b).unwrap();
        assert_eq!(storage.cell(a).unwrap().super_cell_id(), Some(s));
        storage.place_node(&mut layer, &NodePos::new(3, 1, 0), b).unwrap();
        let super_cell = storage.super_cell(s).unwrap();
        assert_eq!(super_cell.cell().n_nodes(), 2);
        assert_eq!(super_cell.cell().center(), OrthPos::new(2.0, 1.0, 0.0));
        assert_eq!(super_cell.centers()[1], OrthPos::new(3.0, 1.0, 0.0));

        // Moving a node between sub-cells leaves the super cell unchanged
        storage.place_node(&mut layer, &NodePos::new(1, 1, 0), b).unwrap();
        let super_cell = storage.super_cell(s).unwrap();
        assert_eq!(super_cell.cell().n_nodes(), 2);
        assert_eq!(super_cell.centers()[1], OrthPos::new(2.0, 1.0, 0.0));
        assert_eq!(super_cell.centers()[0], OrthPos::zeros());

        storage.remove_sub_cell(s, a).unwrap();
        let super_cell = storage.super_cell(s).unwrap();
        assert_eq!(super_cell.sub_cells(), &[b]);
        assert_eq!(super_cell.sub_cell_position(b), Some(0));
        assert_eq!(storage.cell(a).unwrap().celltype(), 7);
        assert_eq!(storage.cell(a).unwrap().super_cell_id(), None);
    }

    #[test]
    #[should_panic]
    fn removing_unknown_sub_cell_panics() {
        let (mut storage, _) = setup();
        let s = storage.create_super_cell(2);
        let a = storage.create_cell(1);
        let _ = storage.remove_sub_cell(s, a);
    }
}
