//! fieldmap: agricultural field boundaries from multi-year Landsat archives
//!
//! Scenes are opened from their archives, one band pair is stacked over a
//! projected window across years and compressed into a normalized
//! vegetation-difference composite. The composite is thresholded into a
//! field mask, straight road lines that merge neighboring fields are burned
//! out, and the remaining regions are labeled into field records.

pub mod types;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionTime, BandCorrection, FieldError, FieldRecord, FieldResult, GeoTransform,
    GeodeticPoint, Hemisphere, LabelImage, PixelIndex, ProjectedPoint, Window,
};

pub use io::{Scene, SceneRepository};
pub use self::core::{
    CompositeIndex, CoordinateFrame, FieldMaskBuilder, RegionLabeler, RoadLineRemover,
    TemporalCompositor,
};
pub use pipeline::{FieldPipeline, PipelineConfig};
