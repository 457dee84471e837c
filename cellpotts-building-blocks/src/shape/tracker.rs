use super::EllipsoidShape;
use crate::{CellLayer, MappingMode, MembraneLattice, MembraneMapper, SimulationContext};
use cellpotts_concepts::*;

use nalgebra::{Matrix3, Vector3};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Aggregated geometry of a node set which can be updated node by node.
#[derive(Clone, Debug, Default, PartialEq)]
struct Geometry {
    n_nodes: usize,
    node_sum: Vector3<i64>,
    orth_sum: OrthPos,
    orth_moments: Matrix3<f64>,
    lattice_center: OrthPos,
    center: OrthPos,
    interfaces: HashMap<CellId, u32>,
}

impl Geometry {
    fn add_node(&mut self, lattice: &impl Lattice, pos: &NodePos) {
        let orth = lattice.node_to_orth(pos);
        self.n_nodes += 1;
        self.node_sum += pos.cast::<i64>();
        self.orth_sum += orth;
        self.orth_moments += orth * orth.transpose();
        self.update_center(lattice);
    }

    fn remove_node(&mut self, lattice: &impl Lattice, pos: &NodePos) {
        let orth = lattice.node_to_orth(pos);
        self.n_nodes = self.n_nodes.saturating_sub(1);
        self.node_sum -= pos.cast::<i64>();
        self.orth_sum -= orth;
        self.orth_moments -= orth * orth.transpose();
        self.update_center(lattice);
    }

    fn update_center(&mut self, lattice: &impl Lattice) {
        if self.n_nodes == 0 {
            self.lattice_center = OrthPos::zeros();
            self.center = OrthPos::zeros();
        } else {
            self.lattice_center = self.node_sum.cast::<f64>() / self.n_nodes as f64;
            self.center = lattice.to_orth(&self.lattice_center);
        }
    }

    /// Second moments about the centroid in orthogonal coordinates.
    fn central_moments(&self) -> Matrix3<f64> {
        if self.n_nodes == 0 {
            return Matrix3::zeros();
        }
        self.orth_moments - self.orth_sum * self.orth_sum.transpose() / self.n_nodes as f64
    }

    /// Take over the state of `other`, reusing the interface map if its keys match.
    fn copy_from(&mut self, other: &Geometry) {
        self.n_nodes = other.n_nodes;
        self.node_sum = other.node_sum;
        self.orth_sum = other.orth_sum;
        self.orth_moments = other.orth_moments;
        self.lattice_center = other.lattice_center;
        self.center = other.center;
        let same_keys = self.interfaces.len() == other.interfaces.len()
            && other
                .interfaces
                .keys()
                .all(|key| self.interfaces.contains_key(key));
        if same_keys {
            for (key, value) in other.interfaces.iter() {
                if let Some(v) = self.interfaces.get_mut(key) {
                    *v = *value;
                }
            }
        } else {
            self.interfaces.clone_from(&other.interfaces);
        }
    }

    fn shift_interface(&mut self, cell: CellId, delta: i64) {
        let value = self.interfaces.get(&cell).copied().unwrap_or(0) as i64 + delta;
        if value > 0 {
            self.interfaces.insert(cell, value as u32);
        } else {
            self.interfaces.remove(&cell);
        }
    }

    /// Adjust the interfaces of `cell` according to the boundary statistics of an update.
    fn track_interfaces(&mut self, cell: CellId, update: &Update, todo: UpdateTodo) {
        let before = update.focus_state_before().cell_id;
        let after = update.focus_state_after().cell_id;
        for stat in update.boundary_statistics() {
            let count = stat.count as i64;
            match todo {
                UpdateTodo::Add if stat.cell == cell => self.shift_interface(before, -count),
                UpdateTodo::Add => self.shift_interface(stat.cell, count),
                UpdateTodo::Remove if stat.cell == cell => self.shift_interface(after, count),
                UpdateTodo::Remove => self.shift_interface(stat.cell, -count),
                UpdateTodo::Neighborhood if stat.cell == cell => {
                    self.shift_interface(before, -count);
                    self.shift_interface(after, count);
                }
                UpdateTodo::Neighborhood | UpdateTodo::AddAndRemove => (),
            }
        }
    }
}

/// Keeps the geometry of a cell consistent while single nodes change their owner.
///
/// Changes follow a two-phase protocol.
/// [set_update](ShapeTracker::set_update) stages the geometry the cell would have after
/// the change without touching the committed state.
/// If the change is accepted, [apply_update](ShapeTracker::apply_update) commits the
/// staged values.
/// Derived shapes (ellipsoid, surface nodes and spherical approximation) are computed
/// lazily and cached until the next commit.
#[derive(Clone, Debug)]
pub struct ShapeTracker {
    cell_id: CellId,
    context: Arc<SimulationContext>,
    nodes: HashSet<NodePos>,
    current: Geometry,
    updated: Geometry,
    updated_is_current: bool,
    pending: Option<(UpdateTodo, NodePos)>,
    track_interfaces: bool,
    ellipsoid: OnceLock<EllipsoidShape>,
    surface: OnceLock<Vec<NodePos>>,
    spherical: OnceLock<MembraneLattice>,
}

impl ShapeTracker {
    /// Tracker of an empty cell.
    pub fn new(cell_id: CellId, context: Arc<SimulationContext>) -> Self {
        Self {
            cell_id,
            context,
            nodes: HashSet::new(),
            current: Geometry::default(),
            updated: Geometry::default(),
            updated_is_current: true,
            pending: None,
            track_interfaces: true,
            ellipsoid: OnceLock::new(),
            surface: OnceLock::new(),
            spherical: OnceLock::new(),
        }
    }

    /// Enable or disable tracking of interfaces.
    ///
    /// Composite cells whose nodes are owned by their parts in the [CellLayer] can not
    /// derive their interfaces from boundary statistics and disable tracking.
    pub fn set_interface_tracking(&mut self, enabled: bool) {
        self.track_interfaces = enabled;
        if !enabled {
            self.current.interfaces.clear();
            self.updated.interfaces.clear();
        }
    }

    /// The context this tracker was created with.
    pub fn context(&self) -> &Arc<SimulationContext> {
        &self.context
    }

    /// All committed nodes.
    pub fn nodes(&self) -> &HashSet<NodePos> {
        &self.nodes
    }

    /// Number of committed nodes.
    pub fn n_nodes(&self) -> usize {
        self.current.n_nodes
    }

    /// Centroid in orthogonal coordinates.
    pub fn center(&self) -> OrthPos {
        self.current.center
    }

    /// Centroid in lattice coordinates.
    pub fn lattice_center(&self) -> OrthPos {
        self.current.lattice_center
    }

    /// Sum of all committed node positions.
    pub fn node_sum(&self) -> Vector3<i64> {
        self.current.node_sum
    }

    /// Centroid the cell would have after the staged update.
    pub fn updated_center(&self) -> OrthPos {
        match self.updated_is_current {
            true => self.current.center,
            false => self.updated.center,
        }
    }

    /// Number of nodes the cell would have after the staged update.
    pub fn updated_n_nodes(&self) -> usize {
        match self.updated_is_current {
            true => self.current.n_nodes,
            false => self.updated.n_nodes,
        }
    }

    /// Raw neighbor counts per neighboring cell.
    pub fn raw_interfaces(&self) -> &HashMap<CellId, u32> {
        &self.current.interfaces
    }

    fn scale_interfaces(&self, interfaces: &HashMap<CellId, u32>) -> HashMap<CellId, f64> {
        let scaling = self.context.boundary_length_scaling();
        interfaces
            .iter()
            .map(|(cell, count)| (*cell, *count as f64 / scaling))
            .collect()
    }

    /// Length of the interface to every neighboring cell.
    pub fn interfaces(&self) -> HashMap<CellId, f64> {
        self.scale_interfaces(&self.current.interfaces)
    }

    /// Interface lengths the cell would have after the staged update.
    pub fn updated_interfaces(&self) -> HashMap<CellId, f64> {
        match self.updated_is_current {
            true => self.interfaces(),
            false => self.scale_interfaces(&self.updated.interfaces),
        }
    }

    /// Total length of the cell boundary.
    pub fn interface_length(&self) -> f64 {
        self.current.interfaces.values().map(|c| *c as f64).sum::<f64>()
            / self.context.boundary_length_scaling()
    }

    /// Total boundary length after the staged update.
    pub fn updated_interface_length(&self) -> f64 {
        let interfaces = match self.updated_is_current {
            true => &self.current.interfaces,
            false => &self.updated.interfaces,
        };
        interfaces.values().map(|c| *c as f64).sum::<f64>() / self.context.boundary_length_scaling()
    }

    /// Stage the geometry after `update` without changing the committed state.
    ///
    /// Added nodes are taken from the state after the update, removed nodes from the
    /// state before. An [UpdateTodo::AddAndRemove] only changes the node set of the cell
    /// if both positions differ, i.e. the node moves across a periodic boundary.
    pub fn set_update(&mut self, update: &Update, todo: UpdateTodo) {
        let added = update.focus_state_after().pos;
        let removed = update.focus_state_before().pos;
        if todo == UpdateTodo::AddAndRemove && added == removed {
            return;
        }
        if !self.updated_is_current {
            self.updated.copy_from(&self.current);
        }
        let lattice = &self.context.lattice;
        match todo {
            UpdateTodo::Add => {
                self.updated.add_node(lattice, &added);
                if self.track_interfaces {
                    self.updated.track_interfaces(self.cell_id, update, todo);
                }
            }
            UpdateTodo::Remove => {
                self.updated.remove_node(lattice, &removed);
                if self.updated.n_nodes == 0 {
                    self.updated.interfaces.clear();
                } else if self.track_interfaces {
                    self.updated.track_interfaces(self.cell_id, update, todo);
                }
            }
            UpdateTodo::AddAndRemove => {
                self.updated.remove_node(lattice, &removed);
                self.updated.add_node(lattice, &added);
            }
            UpdateTodo::Neighborhood => {
                if self.track_interfaces {
                    self.updated.track_interfaces(self.cell_id, update, todo);
                }
            }
        }
        self.pending = Some((todo, update.focus()));
        self.updated_is_current = false;
    }

    /// Commit an accepted update.
    ///
    /// Commits the values staged by [set_update](ShapeTracker::set_update). If the update
    /// was not staged before, it is staged first.
    pub fn apply_update(&mut self, update: &Update, todo: UpdateTodo) {
        let added = update.focus_state_after().pos;
        let removed = update.focus_state_before().pos;
        match todo {
            UpdateTodo::AddAndRemove if added == removed => return,
            UpdateTodo::Neighborhood => {
                if self.track_interfaces {
                    self.current.track_interfaces(self.cell_id, update, todo);
                }
                self.updated_is_current = false;
            }
            UpdateTodo::Add | UpdateTodo::Remove | UpdateTodo::AddAndRemove => {
                if self.pending != Some((todo, update.focus())) || self.updated_is_current {
                    self.set_update(update, todo);
                }
                if todo.op_remove() {
                    self.remove_stored(&removed);
                }
                if todo.op_add() {
                    self.nodes.insert(added);
                }
                self.current.copy_from(&self.updated);
                self.updated_is_current = true;
            }
        }
        self.pending = None;
        self.invalidate();
    }

    fn remove_stored(&mut self, pos: &NodePos) {
        if !self.nodes.remove(pos) {
            let mut nodes: Vec<_> = self.nodes.iter().map(|n| [n.x, n.y, n.z]).collect();
            nodes.sort();
            panic!(
                "{}",
                format_error_message!(
                    "removing a node that was not stored",
                    format!(
                        "cell {} does not contain node {:?}; stored nodes: {:?}",
                        self.cell_id, pos, nodes
                    )
                )
            );
        }
    }

    fn invalidate(&mut self) {
        self.ellipsoid = OnceLock::new();
        self.surface = OnceLock::new();
        self.spherical = OnceLock::new();
    }

    /// Add nodes without boundary statistics, e.g. when a composite cell takes over a part.
    pub fn assimilate<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodePos>) {
        for node in nodes {
            if self.nodes.insert(*node) {
                self.current.add_node(&self.context.lattice, node);
            }
        }
        self.updated_is_current = false;
        self.pending = None;
        self.invalidate();
    }

    /// Remove nodes without boundary statistics.
    pub fn release<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodePos>) {
        for node in nodes {
            if !self.nodes.remove(node) {
                panic!(
                    "{}",
                    format_error_message!(
                        "releasing a node that was not stored",
                        format!("cell {} does not contain node {:?}", self.cell_id, node)
                    )
                );
            }
            self.current.remove_node(&self.context.lattice, node);
        }
        self.updated_is_current = false;
        self.pending = None;
        self.invalidate();
    }

    /// Recount the interfaces of all committed nodes.
    pub fn reset_interfaces(&mut self, layer: &CellLayer) {
        if self.track_interfaces {
            self.current.interfaces = layer.count_interfaces(self.cell_id, self.nodes.iter());
            self.updated_is_current = false;
        }
    }

    /// Ellipsoid with the same second moments as the committed nodes.
    pub fn ellipsoid_approx(&self) -> &EllipsoidShape {
        self.ellipsoid.get_or_init(|| {
            EllipsoidShape::from_central_moments(
                self.context.lattice.dimensions(),
                self.current.n_nodes,
                self.current.center,
                &self.current.central_moments(),
            )
        })
    }

    /// Committed nodes with at least one surface neighbor owned by another cell.
    pub fn surface_nodes(&self, layer: &CellLayer) -> &[NodePos] {
        self.surface.get_or_init(|| {
            let mut surface: Vec<_> = self
                .nodes
                .iter()
                .filter(|node| layer.is_surface(node))
                .copied()
                .collect();
            surface.sort_by_key(|n| (n.x, n.y, n.z));
            surface
        })
    }

    /// Distance of the cell surface from the centroid in every direction.
    pub fn spherical_approx(&self, layer: &CellLayer) -> Result<&MembraneLattice, SetupError> {
        if let Some(spherical) = self.spherical.get() {
            return Ok(spherical);
        }
        let mut mapper = MembraneMapper::new(MappingMode::Continuous, false, &self.context)?;
        let center = self.center();
        mapper.attach_to_center(center);
        for node in self.surface_nodes(layer) {
            let orth = self.context.lattice.node_to_orth(node);
            let distance = self.context.lattice.orth_distance(&center, &orth).norm();
            mapper.map(&orth, distance)?;
        }
        mapper.fill_gaps();
        Ok(self.spherical.get_or_init(|| mapper.data().clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RegularLattice;

    fn setup() -> (Arc<SimulationContext>, CellLayer) {
        let lattice = RegularLattice::square(20, 20, [true, true]).unwrap();
        let context = Arc::new(SimulationContext::new(lattice));
        let layer = CellLayer::new(&context, 0);
        (context, layer)
    }

    fn commit(tracker: &mut ShapeTracker, layer: &mut CellLayer, pos: NodePos, cell: CellId) {
        let update = layer.propose(&pos, cell).unwrap();
        let todo = match update.focus_state_after().cell_id == tracker.cell_id {
            true => UpdateTodo::Add,
            false => UpdateTodo::Remove,
        };
        tracker.set_update(&update, todo);
        tracker.apply_update(&update, todo);
        layer.commit(&update).unwrap();
    }

    #[test]
    fn staged_update_does_not_touch_committed_state() {
        let (context, mut layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        commit(&mut tracker, &mut layer, NodePos::new(5, 5, 0), 1);
        let update = layer.propose(&NodePos::new(6, 5, 0), 1).unwrap();
        tracker.set_update(&update, UpdateTodo::Add);
        assert_eq!(tracker.center(), OrthPos::new(5.0, 5.0, 0.0));
        assert_eq!(tracker.updated_center(), OrthPos::new(5.5, 5.0, 0.0));
        assert_eq!(tracker.updated_n_nodes(), 2);
        assert_eq!(tracker.interface_length(), 4.0);
        assert_eq!(tracker.updated_interface_length(), 6.0);
        tracker.apply_update(&update, UpdateTodo::Add);
        layer.commit(&update).unwrap();
        assert_eq!(tracker.center(), OrthPos::new(5.5, 5.0, 0.0));
        assert_eq!(tracker.interfaces()[&0], 6.0);
    }

    #[test]
    fn removing_last_node_clears_interfaces() {
        let (context, mut layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        commit(&mut tracker, &mut layer, NodePos::new(2, 2, 0), 1);
        let update = layer.propose(&NodePos::new(2, 2, 0), 0).unwrap();
        tracker.set_update(&update, UpdateTodo::Remove);
        assert_eq!(tracker.updated_center(), OrthPos::zeros());
        assert!(tracker.updated_interfaces().is_empty());
        tracker.apply_update(&update, UpdateTodo::Remove);
        assert_eq!(tracker.n_nodes(), 0);
        assert!(tracker.raw_interfaces().is_empty());
    }

    #[test]
    fn neighborhood_updates_shift_interfaces() {
        let (context, mut layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        commit(&mut tracker, &mut layer, NodePos::new(5, 5, 0), 1);
        let update = layer.propose(&NodePos::new(6, 5, 0), 2).unwrap();
        tracker.set_update(&update, UpdateTodo::Neighborhood);
        tracker.apply_update(&update, UpdateTodo::Neighborhood);
        layer.commit(&update).unwrap();
        assert_eq!(tracker.raw_interfaces()[&0], 3);
        assert_eq!(tracker.raw_interfaces()[&2], 1);
        assert_eq!(
            tracker.raw_interfaces(),
            &layer.count_interfaces(1, tracker.nodes().iter())
        );
    }

    #[test]
    #[should_panic]
    fn removing_unknown_node_panics() {
        let (context, layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        let update = layer.propose(&NodePos::new(3, 3, 0), 0).unwrap();
        tracker.apply_update(&update, UpdateTodo::Remove);
    }

    #[test]
    fn caches_are_reset_on_commit() {
        let (context, mut layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        for x in 3..8 {
            commit(&mut tracker, &mut layer, NodePos::new(x, 4, 0), 1);
        }
        assert_eq!(tracker.surface_nodes(&layer).len(), 5);
        let major = tracker.ellipsoid_approx().lengths[0];
        commit(&mut tracker, &mut layer, NodePos::new(8, 4, 0), 1);
        assert_eq!(tracker.surface_nodes(&layer).len(), 6);
        assert!(tracker.ellipsoid_approx().lengths[0] > major);
        let spherical = tracker.spherical_approx(&layer).unwrap();
        assert!(spherical.data().iter().all(|d| *d > 0.0 && *d <= 3.0));
    }

    #[test]
    fn cells_straddle_periodic_boundaries() {
        let (context, mut layer) = setup();
        let mut tracker = ShapeTracker::new(1, context);
        commit(&mut tracker, &mut layer, NodePos::new(19, 5, 0), 1);
        let update = layer
            .propose_copy(&NodePos::new(19, 5, 0), &NodePos::new(1, 0, 0))
            .unwrap();
        assert_eq!(update.focus(), NodePos::new(0, 5, 0));
        tracker.set_update(&update, UpdateTodo::Add);
        assert_eq!(tracker.updated_center(), OrthPos::new(19.5, 5.0, 0.0));
        tracker.apply_update(&update, UpdateTodo::Add);
        layer.commit(&update).unwrap();
        assert_eq!(tracker.center(), OrthPos::new(19.5, 5.0, 0.0));
        approx::assert_abs_diff_eq!(tracker.ellipsoid_approx().lengths[0], 2.0, epsilon = 1e-9);
        assert_eq!(
            tracker.raw_interfaces(),
            &layer.count_interfaces(1, tracker.nodes().iter())
        );

        // Losing the node again removes the position the cell knows it by
        let update = layer.propose(&NodePos::new(0, 5, 0), 0).unwrap();
        assert_eq!(update.focus_state_before().pos, NodePos::new(20, 5, 0));
        tracker.set_update(&update, UpdateTodo::Remove);
        tracker.apply_update(&update, UpdateTodo::Remove);
        layer.commit(&update).unwrap();
        assert_eq!(tracker.center(), OrthPos::new(19.0, 5.0, 0.0));
        assert_eq!(tracker.n_nodes(), 1);
    }

    #[test]
    fn assimilate_and_release() {
        let (context, _) = setup();
        let mut tracker = ShapeTracker::new(9, context);
        tracker.set_interface_tracking(false);
        let nodes = [NodePos::new(1, 1, 0), NodePos::new(3, 1, 0)];
        tracker.assimilate(nodes.iter());
        assert_eq!(tracker.center(), OrthPos::new(2.0, 1.0, 0.0));
        tracker.release(nodes[..1].iter());
        assert_eq!(tracker.center(), OrthPos::new(3.0, 1.0, 0.0));
        assert_eq!(tracker.n_nodes(), 1);
    }
}
