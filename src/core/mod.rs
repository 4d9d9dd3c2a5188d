//! Core field extraction modules

pub mod coordinates;
pub mod morphology;
pub mod temporal;
pub mod field_mask;
pub mod road_lines;
pub mod regions;
pub mod sampling;

// Re-export main types
pub use coordinates::{CoordinateFrame, Ellipsoid};
pub use temporal::{CompositeIndex, CompositeParams, TemporalCompositor, TemporalStack};
pub use field_mask::{Cutoff, FieldMaskBuilder, MaskParams};
pub use road_lines::{LineCandidate, RoadLineParams, RoadLineRemover};
pub use regions::{Connectivity, LabeledFields, RegionLabeler, RegionParams};
pub use sampling::FieldBandSample;
