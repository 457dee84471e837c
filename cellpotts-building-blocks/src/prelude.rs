pub use crate::cell::*;
pub use crate::context::*;
pub use crate::lattice::*;
pub use crate::membrane::*;
pub use crate::shape::*;

pub use cellpotts_concepts::*;
