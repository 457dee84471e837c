pub use cellpotts_building_blocks::*;
pub use cellpotts_concepts::*;
pub use cellpotts_core::*;
