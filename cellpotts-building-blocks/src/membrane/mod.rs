//! Membrane lattices attached to cells and the mapping of samples onto them.
mod lattice;
mod mapper;

pub use lattice::*;
pub use mapper::*;
