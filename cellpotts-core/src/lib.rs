#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate evaluates systems of equations attached to the symbols of a Cellular Potts
//! simulation.
//!
//! ## Systems
//! A [System] is compiled once from a [SystemDescription]: a list of intermediates,
//! functions, differential equations, rules and equations together with the settings of
//! its [SystemSolver]. Every declaration is resolved against a [Scope](cellpotts_concepts::Scope) which provides the
//! symbols of the simulation.
//! Afterwards the system is evaluated at every [SymbolFocus](cellpotts_concepts::SymbolFocus)
//! of its granularity, either sequentially or in parallel with one solver per worker
//! thread.
//!
//! ## Solvers
//! Differential equations are integrated with explicit Runge-Kutta methods of fixed
//! (Euler, Heun, RK4, RK 3/8) or adaptive step size (Bogacki-Shampine, Cash-Karp,
//! Dormand-Prince). Normal distributed noise is integrated with the Euler-Maruyama
//! scheme.
//!
//! ## Symbols
//! The [SymbolStore] is a plain implementation of [Scope](cellpotts_concepts::Scope) and
//! [ScopeMut](cellpotts_concepts::ScopeMut) holding global, per-cell, per-membrane-node and
//! delayed values.
//! Delayed symbols keep a [DelayHistory] of their past values.

mod cache;
mod config;
mod delay;
mod errors;
mod expression;
mod store;
mod system;

#[cfg(feature = "tracing")]
pub mod logging;

pub use cache::*;
pub use config::*;
pub use delay::*;
pub use errors::*;
pub use expression::*;
pub use store::*;
pub use system::*;

#[doc(hidden)]
pub use rayon;

#[cfg(feature = "tracing")]
#[doc(hidden)]
pub use tracing;
