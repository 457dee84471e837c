use crate::DelayProperty;
use cellpotts_concepts::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug)]
enum Values {
    Clock,
    Global {
        value: f64,
        buffer: Option<f64>,
    },
    Cell {
        default: f64,
        values: BTreeMap<CellId, f64>,
        buffer: BTreeMap<CellId, f64>,
    },
    Membrane {
        default: f64,
        values: BTreeMap<CellId, Vec<f64>>,
        buffer: BTreeMap<CellId, Vec<(usize, f64)>>,
    },
    Delayed(DelayProperty),
}

#[derive(Debug)]
struct StoredSymbol {
    name: String,
    writable: bool,
    values: Values,
}

impl StoredSymbol {
    fn granularity(&self) -> Granularity {
        match &self.values {
            Values::Clock | Values::Global { .. } => Granularity::Global,
            Values::Cell { .. } => Granularity::Cell,
            Values::Membrane { .. } => Granularity::MembraneNode,
            Values::Delayed(property) => property.granularity(),
        }
    }
}

/// Reference implementation of [Scope] and [ScopeMut].
///
/// Holds global constants and variables, per-cell properties, per-cell membrane
/// properties and delayed properties. The symbol `time` always reports the clock of the
/// store and can not be written.
///
/// ```
/// # use cellpotts_core::SymbolStore;
/// # use cellpotts_concepts::*;
/// let mut store = SymbolStore::new();
/// store.add_cell_property("v", 1.0);
/// store.add_cell(4);
/// store.set_value("v", &SymbolFocus::Cell(4), 2.5)?;
/// assert_eq!(store.value("v", &SymbolFocus::Cell(4))?, 2.5);
/// # Ok::<(), IndexError>(())
/// ```
#[derive(Debug)]
pub struct SymbolStore {
    time: f64,
    start_time: f64,
    symbols: Vec<StoredSymbol>,
    names: HashMap<String, SymbolId>,
    cells: BTreeSet<CellId>,
    membrane_size: [usize; 2],
}

impl Default for SymbolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolStore {
    /// Empty store starting at time zero.
    pub fn new() -> Self {
        let mut store = Self {
            time: 0.0,
            start_time: 0.0,
            symbols: Vec::new(),
            names: HashMap::new(),
            cells: BTreeSet::new(),
            membrane_size: [1, 1],
        };
        store.insert(TIME_SYMBOL, false, Values::Clock);
        store
    }

    /// Use membrane properties with `size[0] x size[1]` nodes.
    pub fn with_membrane_size(mut self, size: [usize; 2]) -> Self {
        self.membrane_size = [size[0].max(1), size[1].max(1)];
        self
    }

    /// Start the clock at `time`.
    pub fn with_start_time(mut self, time: f64) -> Self {
        self.start_time = time;
        self.time = time;
        self
    }

    /// Size of membrane properties.
    pub fn membrane_size(&self) -> [usize; 2] {
        self.membrane_size
    }

    /// Time at which the simulation started.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Advance the clock.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    fn insert(&mut self, name: &str, writable: bool, values: Values) -> SymbolId {
        let symbol = StoredSymbol {
            name: name.to_owned(),
            writable,
            values,
        };
        match self.names.get(name) {
            Some(&id) => {
                self.symbols[id] = symbol;
                id
            }
            None => {
                let id = self.symbols.len();
                self.symbols.push(symbol);
                self.names.insert(name.to_owned(), id);
                id
            }
        }
    }

    /// Read-only global value.
    pub fn add_constant(&mut self, name: &str, value: f64) -> SymbolId {
        self.insert(
            name,
            false,
            Values::Global {
                value,
                buffer: None,
            },
        )
    }

    /// Writable global value.
    pub fn add_variable(&mut self, name: &str, value: f64) -> SymbolId {
        self.insert(
            name,
            true,
            Values::Global {
                value,
                buffer: None,
            },
        )
    }

    /// Writable per-cell value. Every cell starts with `default`.
    pub fn add_cell_property(&mut self, name: &str, default: f64) -> SymbolId {
        let values = self.cells.iter().map(|cell| (*cell, default)).collect();
        self.insert(
            name,
            true,
            Values::Cell {
                default,
                values,
                buffer: BTreeMap::new(),
            },
        )
    }

    /// Writable value on every membrane node of every cell.
    pub fn add_membrane_property(&mut self, name: &str, default: f64) -> SymbolId {
        let n_nodes = self.membrane_size[0] * self.membrane_size[1];
        let values = self
            .cells
            .iter()
            .map(|cell| (*cell, vec![default; n_nodes]))
            .collect();
        self.insert(
            name,
            true,
            Values::Membrane {
                default,
                values,
                buffer: BTreeMap::new(),
            },
        )
    }

    /// Delayed global or per-cell value.
    ///
    /// Histories of all existing foci are initialized at the current time.
    pub fn add_delay_property(&mut self, name: &str, mut property: DelayProperty) -> SymbolId {
        match property.granularity() {
            Granularity::Global => property.init(SymbolFocus::Global, self.time),
            _ => {
                for cell in self.cells.iter() {
                    property.init(SymbolFocus::Cell(*cell), self.time);
                }
            }
        }
        self.insert(name, true, Values::Delayed(property))
    }

    /// Register a cell and give all its properties their default values.
    pub fn add_cell(&mut self, cell: CellId) {
        if !self.cells.insert(cell) {
            return;
        }
        let n_nodes = self.membrane_size[0] * self.membrane_size[1];
        let time = self.time;
        for symbol in self.symbols.iter_mut() {
            match &mut symbol.values {
                Values::Cell {
                    default, values, ..
                } => {
                    values.insert(cell, *default);
                }
                Values::Membrane {
                    default, values, ..
                } => {
                    values.insert(cell, vec![*default; n_nodes]);
                }
                Values::Delayed(property) if property.granularity() == Granularity::Cell => {
                    property.init(SymbolFocus::Cell(cell), time);
                }
                _ => (),
            }
        }
    }

    /// Remove a cell and all its values.
    pub fn remove_cell(&mut self, cell: CellId) {
        if !self.cells.remove(&cell) {
            return;
        }
        for symbol in self.symbols.iter_mut() {
            match &mut symbol.values {
                Values::Cell { values, buffer, .. } => {
                    values.remove(&cell);
                    buffer.remove(&cell);
                }
                Values::Membrane { values, buffer, .. } => {
                    values.remove(&cell);
                    buffer.remove(&cell);
                }
                Values::Delayed(property) => property.remove(&SymbolFocus::Cell(cell)),
                _ => (),
            }
        }
    }

    /// All registered cells in ascending order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.iter().copied()
    }

    /// Delay configuration of a delayed symbol.
    pub fn delay_property(&self, name: &str) -> Option<&DelayProperty> {
        let id = self.names.get(name)?;
        match &self.symbols[*id].values {
            Values::Delayed(property) => Some(property),
            _ => None,
        }
    }

    /// Membrane values of one cell, indexed by `x + size[0] * y`.
    pub fn membrane(&self, name: &str, cell: CellId) -> Option<&[f64]> {
        let id = self.names.get(name)?;
        match &self.symbols[*id].values {
            Values::Membrane { values, .. } => values.get(&cell).map(|v| v.as_slice()),
            _ => None,
        }
    }

    fn id(&self, name: &str) -> Result<SymbolId, IndexError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| IndexError(format!("unknown symbol \"{name}\"")))
    }

    /// Value of a symbol by name.
    pub fn value(&self, name: &str, focus: &SymbolFocus) -> Result<f64, IndexError> {
        self.get(self.id(name)?, focus)
    }

    /// Set the value of a symbol by name.
    pub fn set_value(
        &mut self,
        name: &str,
        focus: &SymbolFocus,
        value: f64,
    ) -> Result<(), IndexError> {
        let id = self.id(name)?;
        self.set(id, focus, value)
    }

    fn symbol(&self, id: SymbolId) -> Result<&StoredSymbol, IndexError> {
        self.symbols
            .get(id)
            .ok_or_else(|| IndexError(format!("unknown symbol id {id}")))
    }

    fn writable_symbol(&mut self, id: SymbolId) -> Result<&mut StoredSymbol, IndexError> {
        let symbol = self
            .symbols
            .get_mut(id)
            .ok_or_else(|| IndexError(format!("unknown symbol id {id}")))?;
        match symbol.writable {
            true => Ok(symbol),
            false => Err(IndexError(format!(
                "symbol \"{}\" is read-only",
                symbol.name
            ))),
        }
    }

    fn node_index(size: [usize; 2], name: &str, focus: &SymbolFocus) -> Result<(CellId, usize), IndexError> {
        match focus {
            SymbolFocus::MembraneNode { cell, node } if node[0] < size[0] && node[1] < size[1] => {
                Ok((*cell, node[0] + size[0] * node[1]))
            }
            _ => Err(IndexError(format!(
                "membrane symbol \"{name}\" can not be resolved at {focus:?}"
            ))),
        }
    }

    fn cell_of(name: &str, focus: &SymbolFocus) -> Result<CellId, IndexError> {
        focus.cell_id().ok_or_else(|| {
            IndexError(format!("cell symbol \"{name}\" can not be resolved at {focus:?}"))
        })
    }

    fn delay_focus(property: &DelayProperty, name: &str, focus: &SymbolFocus) -> Result<SymbolFocus, IndexError> {
        match property.granularity() {
            Granularity::Global => Ok(SymbolFocus::Global),
            _ => Ok(SymbolFocus::Cell(Self::cell_of(name, focus)?)),
        }
    }

    fn missing_cell(name: &str, cell: CellId) -> IndexError {
        IndexError(format!("symbol \"{name}\" has no value for cell {cell}"))
    }
}

impl Scope for SymbolStore {
    fn lookup(&self, name: &str) -> Option<SymbolInfo> {
        let id = *self.names.get(name)?;
        let symbol = &self.symbols[id];
        Some(SymbolInfo {
            id,
            name: symbol.name.clone(),
            granularity: symbol.granularity(),
            writable: symbol.writable,
            delayed: matches!(symbol.values, Values::Delayed(_)),
        })
    }

    fn get(&self, id: SymbolId, focus: &SymbolFocus) -> Result<f64, IndexError> {
        let symbol = self.symbol(id)?;
        let name = &symbol.name;
        match &symbol.values {
            Values::Clock => Ok(self.time),
            Values::Global { value, .. } => Ok(*value),
            Values::Cell { values, .. } => {
                let cell = Self::cell_of(name, focus)?;
                values
                    .get(&cell)
                    .copied()
                    .ok_or_else(|| Self::missing_cell(name, cell))
            }
            Values::Membrane { values, .. } => {
                let (cell, index) = Self::node_index(self.membrane_size, name, focus)?;
                values
                    .get(&cell)
                    .map(|v| v[index])
                    .ok_or_else(|| Self::missing_cell(name, cell))
            }
            Values::Delayed(property) => {
                let key = Self::delay_focus(property, name, focus)?;
                Ok(property.get(&key, self.time, self.start_time))
            }
        }
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn foci(&self, granularity: Granularity) -> Vec<SymbolFocus> {
        match granularity {
            Granularity::Global => vec![SymbolFocus::Global],
            Granularity::Cell => self.cells.iter().map(|c| SymbolFocus::Cell(*c)).collect(),
            Granularity::MembraneNode => {
                let [nx, ny] = self.membrane_size;
                self.cells
                    .iter()
                    .flat_map(|cell| {
                        (0..ny).flat_map(move |y| {
                            (0..nx).map(move |x| SymbolFocus::MembraneNode {
                                cell: *cell,
                                node: [x, y],
                            })
                        })
                    })
                    .collect()
            }
        }
    }
}

impl ScopeMut for SymbolStore {
    fn set(&mut self, id: SymbolId, focus: &SymbolFocus, value: f64) -> Result<(), IndexError> {
        let time = self.time;
        let size = self.membrane_size;
        let symbol = self.writable_symbol(id)?;
        let name = &symbol.name;
        match &mut symbol.values {
            Values::Clock => return Err(IndexError(format!("symbol \"{name}\" is read-only"))),
            Values::Global { value: v, .. } => *v = value,
            Values::Cell { values, .. } => {
                let cell = Self::cell_of(name, focus)?;
                let v = values
                    .get_mut(&cell)
                    .ok_or_else(|| Self::missing_cell(name, cell))?;
                *v = value;
            }
            Values::Membrane { values, .. } => {
                let (cell, index) = Self::node_index(size, name, focus)?;
                let v = values
                    .get_mut(&cell)
                    .ok_or_else(|| Self::missing_cell(name, cell))?;
                v[index] = value;
            }
            Values::Delayed(property) => {
                let key = Self::delay_focus(property, name, focus)?;
                property.set(key, time, value);
            }
        }
        Ok(())
    }

    fn set_buffer(
        &mut self,
        id: SymbolId,
        focus: &SymbolFocus,
        value: f64,
    ) -> Result<(), IndexError> {
        // Delayed symbols record every write in their history
        if matches!(self.symbol(id)?.values, Values::Clock | Values::Delayed(_)) {
            return self.set(id, focus, value);
        }
        let size = self.membrane_size;
        let symbol = self.writable_symbol(id)?;
        let name = &symbol.name;
        match &mut symbol.values {
            Values::Global { buffer, .. } => *buffer = Some(value),
            Values::Cell { values, buffer, .. } => {
                let cell = Self::cell_of(name, focus)?;
                if !values.contains_key(&cell) {
                    return Err(Self::missing_cell(name, cell));
                }
                buffer.insert(cell, value);
            }
            Values::Membrane { values, buffer, .. } => {
                let (cell, index) = Self::node_index(size, name, focus)?;
                if !values.contains_key(&cell) {
                    return Err(Self::missing_cell(name, cell));
                }
                buffer.entry(cell).or_default().push((index, value));
            }
            Values::Clock | Values::Delayed(_) => (),
        }
        Ok(())
    }

    fn apply_buffer(&mut self, id: SymbolId) -> Result<(), IndexError> {
        let symbol = self.writable_symbol(id)?;
        match &mut symbol.values {
            Values::Global { value, buffer } => {
                if let Some(b) = buffer.take() {
                    *value = b;
                }
            }
            Values::Cell { values, buffer, .. } => {
                for (cell, b) in std::mem::take(buffer) {
                    if let Some(v) = values.get_mut(&cell) {
                        *v = b;
                    }
                }
            }
            Values::Membrane { values, buffer, .. } => {
                for (cell, entries) in std::mem::take(buffer) {
                    if let Some(v) = values.get_mut(&cell) {
                        for (index, b) in entries {
                            v[index] = b;
                        }
                    }
                }
            }
            Values::Clock | Values::Delayed(_) => (),
        }
        Ok(())
    }

    fn apply_buffer_at(&mut self, id: SymbolId, focus: &SymbolFocus) -> Result<(), IndexError> {
        let size = self.membrane_size;
        let symbol = self.writable_symbol(id)?;
        let name = &symbol.name;
        match &mut symbol.values {
            Values::Global { value, buffer } => {
                if let Some(b) = buffer.take() {
                    *value = b;
                }
            }
            Values::Cell { values, buffer, .. } => {
                let cell = Self::cell_of(name, focus)?;
                if let (Some(b), Some(v)) = (buffer.remove(&cell), values.get_mut(&cell)) {
                    *v = b;
                }
            }
            Values::Membrane { values, buffer, .. } => {
                let (cell, index) = Self::node_index(size, name, focus)?;
                if let (Some(entries), Some(v)) = (buffer.get_mut(&cell), values.get_mut(&cell)) {
                    entries.retain(|(i, b)| match *i == index {
                        true => {
                            v[index] = *b;
                            false
                        }
                        false => true,
                    });
                }
            }
            Values::Clock | Values::Delayed(_) => (),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn time_is_read_only() {
        let mut store = SymbolStore::new().with_start_time(2.0);
        let info = store.lookup(TIME_SYMBOL).unwrap();
        assert!(!info.writable);
        assert_eq!(store.get(info.id, &SymbolFocus::Global).unwrap(), 2.0);
        store.set_time(3.0);
        assert_eq!(store.value(TIME_SYMBOL, &SymbolFocus::Cell(1)).unwrap(), 3.0);
        assert!(store.set(info.id, &SymbolFocus::Global, 1.0).is_err());
        let k = store.add_constant("k", 1.0);
        assert!(store.set(k, &SymbolFocus::Global, 2.0).is_err());
    }

    #[test]
    fn cell_values_and_buffers() {
        let mut store = SymbolStore::new();
        store.add_cell(1);
        let v = store.add_cell_property("v", 0.5);
        store.add_cell(2);
        assert_eq!(store.value("v", &SymbolFocus::Cell(1)).unwrap(), 0.5);
        assert_eq!(store.value("v", &SymbolFocus::Cell(2)).unwrap(), 0.5);
        assert!(store.value("v", &SymbolFocus::Global).is_err());
        assert!(store.value("v", &SymbolFocus::Cell(3)).is_err());

        store.set_buffer(v, &SymbolFocus::Cell(1), 4.0).unwrap();
        store.set_buffer(v, &SymbolFocus::Cell(2), 5.0).unwrap();
        assert_eq!(store.value("v", &SymbolFocus::Cell(1)).unwrap(), 0.5);
        store.apply_buffer_at(v, &SymbolFocus::Cell(1)).unwrap();
        assert_eq!(store.value("v", &SymbolFocus::Cell(1)).unwrap(), 4.0);
        assert_eq!(store.value("v", &SymbolFocus::Cell(2)).unwrap(), 0.5);
        store.apply_buffer(v).unwrap();
        assert_eq!(store.value("v", &SymbolFocus::Cell(2)).unwrap(), 5.0);

        store.remove_cell(1);
        assert_eq!(store.cells().collect::<Vec<_>>(), vec![2]);
        assert!(store.value("v", &SymbolFocus::Cell(1)).is_err());
    }

    #[test]
    fn membrane_layout() {
        let mut store = SymbolStore::new().with_membrane_size([4, 3]);
        let m = store.add_membrane_property("m", 1.0);
        store.add_cell(7);
        let foci = store.foci(Granularity::MembraneNode);
        assert_eq!(foci.len(), 12);
        assert_eq!(foci[1], SymbolFocus::MembraneNode { cell: 7, node: [1, 0] });
        let focus = SymbolFocus::MembraneNode { cell: 7, node: [2, 1] };
        store.set(m, &focus, 3.0).unwrap();
        assert_eq!(store.membrane("m", 7).unwrap()[6], 3.0);
        assert_eq!(store.get(m, &focus).unwrap(), 3.0);
        assert!(store.get(m, &SymbolFocus::Cell(7)).is_err());
        let outside = SymbolFocus::MembraneNode { cell: 7, node: [4, 0] };
        assert!(store.get(m, &outside).is_err());
    }

    #[test]
    fn delayed_symbols_record_writes() {
        let mut store = SymbolStore::new();
        store.add_cell(1);
        let property = DelayProperty::new(Granularity::Cell, "10", 1.0).unwrap();
        let d = store.add_delay_property("d", property);
        assert!(store.lookup("d").unwrap().delayed);
        let focus = SymbolFocus::Cell(1);
        // Before the start time the initial value is reported
        assert_eq!(store.get(d, &focus).unwrap(), 10.0);
        store.set_time(0.5);
        store.set(d, &focus, 2.0).unwrap();
        store.set_time(1.0);
        store.set_buffer(d, &focus, 3.0).unwrap();
        store.set_time(1.5);
        assert_eq!(store.get(d, &focus).unwrap(), 2.0);
        store.set_time(2.0);
        assert_eq!(store.get(d, &focus).unwrap(), 3.0);
        store.add_cell(2);
        assert!(store.delay_property("d").unwrap().history(&SymbolFocus::Cell(2)).is_some());
    }
}
