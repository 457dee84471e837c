use crate::{CellLayer, EllipsoidShape, MembraneLattice, ShapeTracker, SimulationContext};
use cellpotts_concepts::*;
use itertools::Itertools;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

mod storage;
mod super_cell;

pub use storage::*;
pub use super_cell::*;

/// A cell occupying a set of lattice nodes.
///
/// Besides its geometry, every cell carries named scalar properties and named membrane
/// properties. The geometry is only changed through
/// [set_update](Cell::set_update) followed by [apply_update](Cell::apply_update).
#[derive(Clone, Debug)]
pub struct Cell {
    id: CellId,
    name: String,
    celltype: CellTypeId,
    super_cell_id: Option<CellId>,
    properties: BTreeMap<String, f64>,
    membranes: BTreeMap<String, MembraneLattice>,
    shape: ShapeTracker,
}

impl Cell {
    /// A cell without nodes.
    pub fn new(id: CellId, celltype: CellTypeId, context: Arc<SimulationContext>) -> Self {
        Self {
            id,
            name: id.to_string(),
            celltype,
            super_cell_id: None,
            properties: BTreeMap::new(),
            membranes: BTreeMap::new(),
            shape: ShapeTracker::new(id, context),
        }
    }

    /// Unique identifier.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Display name, the id unless set otherwise.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the display name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Type of the cell.
    pub fn celltype(&self) -> CellTypeId {
        self.celltype
    }

    /// Change the type of the cell.
    pub fn set_celltype(&mut self, celltype: CellTypeId) {
        self.celltype = celltype;
    }

    /// Composite cell this cell is a part of.
    pub fn super_cell_id(&self) -> Option<CellId> {
        self.super_cell_id
    }

    pub(crate) fn set_super_cell_id(&mut self, super_cell_id: Option<CellId>) {
        self.super_cell_id = super_cell_id;
    }

    /// Value of a named property.
    pub fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    /// Set (or create) a named property.
    pub fn set_property(&mut self, name: impl Into<String>, value: f64) {
        self.properties.insert(name.into(), value);
    }

    /// All named properties.
    pub fn properties(&self) -> &BTreeMap<String, f64> {
        &self.properties
    }

    /// Copy all properties of `other` which this cell also defines.
    ///
    /// Properties whose name starts with `_` are intermediates and are not copied.
    pub fn assign_matching_properties(&mut self, other: &Cell) {
        for (name, value) in other.properties.iter() {
            if name.starts_with('_') {
                continue;
            }
            if let Some(v) = self.properties.get_mut(name) {
                *v = *value;
            }
        }
    }

    /// Add a membrane property with the resolution of the simulation context.
    pub fn add_membrane(
        &mut self,
        name: impl Into<String>,
    ) -> Result<&mut MembraneLattice, SetupError> {
        let context = self.shape.context();
        let membrane =
            MembraneLattice::new(context.membrane_resolution, context.membrane_dimensions())?;
        Ok(self.membranes.entry(name.into()).or_insert(membrane))
    }

    /// A named membrane property.
    pub fn membrane(&self, name: &str) -> Option<&MembraneLattice> {
        self.membranes.get(name)
    }

    /// Mutable access to a named membrane property.
    pub fn membrane_mut(&mut self, name: &str) -> Option<&mut MembraneLattice> {
        self.membranes.get_mut(name)
    }

    /// All membrane properties.
    pub fn membranes(&self) -> &BTreeMap<String, MembraneLattice> {
        &self.membranes
    }

    /// The shape tracker of this cell.
    pub fn shape(&self) -> &ShapeTracker {
        &self.shape
    }

    pub(crate) fn shape_mut(&mut self) -> &mut ShapeTracker {
        &mut self.shape
    }

    /// Occupied lattice nodes.
    pub fn nodes(&self) -> &HashSet<NodePos> {
        self.shape.nodes()
    }

    /// Number of occupied nodes.
    pub fn n_nodes(&self) -> usize {
        self.shape.n_nodes()
    }

    /// Centroid in orthogonal coordinates.
    pub fn center(&self) -> OrthPos {
        self.shape.center()
    }

    /// Centroid in lattice coordinates.
    pub fn lattice_center(&self) -> OrthPos {
        self.shape.lattice_center()
    }

    /// Centroid after the staged update.
    pub fn updated_center(&self) -> OrthPos {
        self.shape.updated_center()
    }

    /// Interface length to every neighboring cell.
    pub fn interfaces(&self) -> HashMap<CellId, f64> {
        self.shape.interfaces()
    }

    /// Total boundary length.
    pub fn interface_length(&self) -> f64 {
        self.shape.interface_length()
    }

    /// Nodes at the boundary of the cell.
    pub fn surface_nodes<'a>(&'a self, layer: &CellLayer) -> &'a [NodePos] {
        self.shape.surface_nodes(layer)
    }

    /// Elliptic approximation of the cell shape.
    pub fn ellipsoid(&self) -> &EllipsoidShape {
        self.shape.ellipsoid_approx()
    }

    /// Direction of the longest axis.
    pub fn major_axis(&self) -> OrthPos {
        self.ellipsoid().major_axis()
    }

    /// Direction of the second longest axis.
    pub fn minor_axis(&self) -> OrthPos {
        self.ellipsoid()
            .axes
            .get(1)
            .copied()
            .unwrap_or_else(OrthPos::zeros)
    }

    /// Length of the longest axis.
    pub fn length(&self) -> f64 {
        self.ellipsoid().lengths[0]
    }

    /// Eccentricity of the elliptic approximation.
    pub fn eccentricity(&self) -> f64 {
        self.ellipsoid().eccentricity
    }

    /// Stage the geometry after `update`.
    pub fn set_update(&mut self, update: &Update, todo: UpdateTodo) {
        self.shape.set_update(update, todo);
    }

    /// Commit `update`.
    pub fn apply_update(&mut self, update: &Update, todo: UpdateTodo) {
        self.shape.apply_update(update, todo);
    }

    /// Serialize the node set as `"x y z;x y z;..."` in lexicographic order.
    pub fn save_nodes(&self) -> String {
        let mut nodes: Vec<_> = self.nodes().iter().map(|n| (n.x, n.y, n.z)).collect();
        nodes.sort();
        nodes
            .into_iter()
            .map(|(x, y, z)| format!("{x} {y} {z}"))
            .join(";")
    }
}

/// Parse a node list as written by [Cell::save_nodes].
///
/// Nodes may be separated by `;` or `,`.
/// ```
/// # use cellpotts_building_blocks::parse_nodes;
/// # use cellpotts_concepts::NodePos;
/// let nodes = parse_nodes("1 2 0; 3 4 0,5 6 0")?;
/// assert_eq!(nodes, vec![NodePos::new(1, 2, 0), NodePos::new(3, 4, 0), NodePos::new(5, 6, 0)]);
/// # Ok::<(), cellpotts_concepts::ParseError>(())
/// ```
pub fn parse_nodes(text: &str) -> Result<Vec<NodePos>, ParseError> {
    text.split([';', ','])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let coordinates = token
                .split_whitespace()
                .map(|c| {
                    c.parse::<i32>()
                        .map_err(|e| ParseError(format!("invalid coordinate \"{c}\": {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            match coordinates[..] {
                [x] => Ok(NodePos::new(x, 0, 0)),
                [x, y] => Ok(NodePos::new(x, y, 0)),
                [x, y, z] => Ok(NodePos::new(x, y, z)),
                _ => Err(ParseError(format!("invalid node \"{token}\""))),
            }
        })
        .collect()
}
