//! I/O modules for scene archives, metadata, rasters and field tables

pub mod archive;
pub mod scene;
pub mod raster;
pub mod records;

pub use scene::{Scene, SceneMetadata, SceneRepository};
