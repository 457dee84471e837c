use crate::{CellId, IndexError};
use serde::{Deserialize, Serialize};

/// Name of the symbol carrying the simulation clock.
pub const TIME_SYMBOL: &str = "time";

/// The kind of focus a symbol is bound to.
///
/// Variants are ordered from coarse to fine. A symbol can be read at every focus
/// which is at least as fine as its own granularity.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Granularity {
    /// One value for the whole simulation
    Global,
    /// One value per cell
    Cell,
    /// One value per node of the membrane lattice of every cell
    MembraneNode,
}

/// An evaluation context at which a symbol is read or written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SymbolFocus {
    /// The global scope
    Global,
    /// A specific cell
    Cell(CellId),
    /// A node of the membrane lattice of a specific cell
    MembraneNode {
        /// Owning cell
        cell: CellId,
        /// Index of the membrane node `[x, y]`
        node: [usize; 2],
    },
}

impl SymbolFocus {
    /// Granularity of this focus.
    pub fn granularity(&self) -> Granularity {
        match self {
            SymbolFocus::Global => Granularity::Global,
            SymbolFocus::Cell(_) => Granularity::Cell,
            SymbolFocus::MembraneNode { .. } => Granularity::MembraneNode,
        }
    }

    /// The cell this focus refers to, if any.
    pub fn cell_id(&self) -> Option<CellId> {
        match self {
            SymbolFocus::Global => None,
            SymbolFocus::Cell(cell) => Some(*cell),
            SymbolFocus::MembraneNode { cell, .. } => Some(*cell),
        }
    }

    /// Can a symbol of the given granularity be resolved at this focus?
    pub fn resolves(&self, granularity: Granularity) -> bool {
        granularity <= self.granularity()
    }
}

/// Identifier of a symbol within one [Scope].
pub type SymbolId = usize;

/// Description of a symbol as provided by a [Scope].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Handle used for subsequent reads and writes
    pub id: SymbolId,
    /// Name under which the symbol was found
    pub name: String,
    /// Focus kind the symbol is bound to
    pub granularity: Granularity,
    /// Whether the symbol accepts writes
    pub writable: bool,
    /// Whether the symbol reports a delayed value from its history
    pub delayed: bool,
}

/// Read access to named symbols.
///
/// Symbols are looked up once by name and then addressed by their [SymbolId].
pub trait Scope: Sync {
    /// Find a symbol by name.
    fn lookup(&self, name: &str) -> Option<SymbolInfo>;

    /// Value of a symbol at the given focus.
    fn get(&self, id: SymbolId, focus: &SymbolFocus) -> Result<f64, IndexError>;

    /// Current simulation time.
    fn time(&self) -> f64;

    /// All foci of the given granularity.
    fn foci(&self, granularity: Granularity) -> Vec<SymbolFocus>;
}

/// Write access to named symbols.
pub trait ScopeMut: Scope {
    /// Set the live value of a symbol.
    fn set(&mut self, id: SymbolId, focus: &SymbolFocus, value: f64) -> Result<(), IndexError>;

    /// Store a value which becomes visible after [ScopeMut::apply_buffer].
    fn set_buffer(
        &mut self,
        id: SymbolId,
        focus: &SymbolFocus,
        value: f64,
    ) -> Result<(), IndexError>;

    /// Move all buffered values of a symbol into its live values.
    fn apply_buffer(&mut self, id: SymbolId) -> Result<(), IndexError>;

    /// Move the buffered value of a symbol at one focus into its live value.
    fn apply_buffer_at(&mut self, id: SymbolId, focus: &SymbolFocus) -> Result<(), IndexError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn granularity_resolution() {
        let membrane = SymbolFocus::MembraneNode {
            cell: 3,
            node: [1, 2],
        };
        assert!(membrane.resolves(Granularity::Global));
        assert!(membrane.resolves(Granularity::Cell));
        assert!(!SymbolFocus::Cell(3).resolves(Granularity::MembraneNode));
        assert_eq!(membrane.cell_id(), Some(3));
        assert_eq!(SymbolFocus::Global.cell_id(), None);
    }

    #[test]
    fn focus_serialization() {
        let focus = SymbolFocus::Cell(12);
        let text = serde_json::to_string(&focus).unwrap();
        let back: SymbolFocus = serde_json::from_str(&text).unwrap();
        assert_eq!(focus, back);
    }
}
