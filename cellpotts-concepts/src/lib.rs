#![warn(missing_docs)]
//! This crate contains the concepts shared by all parts of a Cellular Potts
//! simulation built with `cellpotts`.
//!
//! A simulation consists of a discrete [Lattice] whose nodes are owned by cells.
//! Changes of ownership are proposed as an [Update] which every affected cell
//! first stages and later commits.
//! Continuous quantities are addressed as named symbols inside a [Scope] and
//! evaluated at a [SymbolFocus].

mod errors;
mod lattice;
mod symbol;
mod update;

pub use errors::*;
pub use lattice::*;
pub use symbol::*;
pub use update::*;
