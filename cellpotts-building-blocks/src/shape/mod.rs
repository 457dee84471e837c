mod ellipsoid;
mod tracker;

pub use ellipsoid::*;
pub use tracker::*;
