#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! [cellpotts](crate) simulates biological cells on a discrete lattice following the
//! Cellular Potts Model.
//! Every cell is a set of lattice nodes. Its shape changes one node at a time and is
//! tracked incrementally. Continuous quantities attached to the simulation, its cells or
//! their membranes evolve according to systems of ordinary or stochastic differential
//! equations.
//!
//! The functionality is split into three crates which are re-exported here.
//! - [concepts] defines lattices, updates, symbols and errors shared by all parts.
//! - [building_blocks] provides concrete lattices, cells, shape trackers and the membrane
//!   mapper.
//! - [core] compiles and evaluates systems of equations.
//!
//! ```
//! use cellpotts::prelude::*;
//! let mut store = SymbolStore::new();
//! store.add_variable("y", 1.0);
//! let description = SystemDescription::new(
//!     SystemKind::Continuous,
//!     SolverSpec::new(SolverMethod::RungeKutta4, 0.1),
//! )
//! .with(Declaration::DiffEqn {
//!     symbol: "y".into(),
//!     expression: "-y".into(),
//! });
//! let system = System::new(&description, &store)?;
//! for _ in 0..10 {
//!     system.execute_time_step(&mut store)?;
//! }
//! let y = store.value("y", &SymbolFocus::Global)?;
//! assert!((y - (-1f64).exp()).abs() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use cellpotts_building_blocks as building_blocks;

pub use cellpotts_concepts as concepts;

pub use cellpotts_core as core;

/// Re-exports the default simulation types and traits.
pub mod prelude;
