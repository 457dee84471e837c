#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
//! # cellpotts - Building Blocks
//!
//! Concrete lattices, cells and shape descriptors for Cellular Potts simulations.
//!
//! Cells occupy nodes of a [RegularLattice]. Which cell owns which node is stored in a
//! [CellLayer]. Every change of ownership is described by an
//! [Update](cellpotts_concepts::Update) which the [CellStorage] first stages and then
//! commits in all affected cells.
//! ```
//! # use cellpotts_building_blocks::prelude::*;
//! # use std::sync::Arc;
//! let lattice = RegularLattice::square(20, 20, [true, true])?;
//! let context = Arc::new(SimulationContext::new(lattice));
//! let mut layer = CellLayer::new(&context, 0);
//! let mut storage = CellStorage::new(context);
//!
//! let cell = storage.create_cell(1);
//! for x in 2..6 {
//!     storage.place_node(&mut layer, &NodePos::new(x, 3, 0), cell)?;
//! }
//! let cell = storage.cell(cell).unwrap();
//! assert_eq!(cell.center(), OrthPos::new(3.5, 3.0, 0.0));
//! assert_eq!(cell.interface_length(), 10.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//! Derived shapes such as the [EllipsoidShape] or the spherical approximation
//! (a [MembraneLattice] filled by a [MembraneMapper]) are computed lazily.

/// Cells, composite cells and their storage
pub mod cell;

/// Shared settings of one simulation
pub mod context;

/// Regular lattices and the node ownership layer
pub mod lattice;

pub mod membrane;

/// Incremental shape tracking
pub mod shape;

/// Handy re-exports of every building block.
pub mod prelude;

pub use crate::cell::*;
pub use crate::context::*;
pub use crate::lattice::*;
pub use crate::membrane::*;
pub use crate::shape::*;
