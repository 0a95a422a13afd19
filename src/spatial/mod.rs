//! Polygon layers: loading, coordinate reference normalization and
//! point-in-polygon lookup.

pub mod crs;
pub mod index;
pub mod layers;

pub use crs::Crs;
pub use index::PolygonIndex;
pub use layers::{load_layer, LayerFeature};
