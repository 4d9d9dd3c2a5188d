use chrono::{Datelike, NaiveDateTime, Timelike};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Radiance value after radiometric correction
pub type Radiance = f32;

/// 2D radiance array (row x col) for one band of one scene
pub type RadianceImage = Array2<Radiance>;

/// 3D stack of radiance frames (time x row x col)
pub type TemporalCube = Array3<Radiance>;

/// Labeled field mask: 0 is background, every positive value is a field
pub type LabelImage = Array2<u32>;

/// Plain binary mask
pub type BinaryMask = Array2<bool>;

/// Label value reserved for background pixels
pub const BACKGROUND: u32 = 0;

/// Point in projected (UTM) coordinates, meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub easting: f64,
    pub northing: f64,
}

impl ProjectedPoint {
    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }
}

/// Integer pixel location inside a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelIndex {
    pub row: usize,
    pub col: usize,
}

/// Geodetic coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// UTM hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Hemisphere {
    #[default]
    North,
    South,
}

/// Rectangular region of interest given by its projected NW and SE corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub nw: ProjectedPoint,
    pub se: ProjectedPoint,
}

impl Window {
    pub fn new(nw: ProjectedPoint, se: ProjectedPoint) -> FieldResult<Self> {
        if se.easting <= nw.easting || se.northing >= nw.northing {
            return Err(FieldError::InvalidWindow(format!(
                "SE corner ({}, {}) is not south-east of NW corner ({}, {})",
                se.easting, se.northing, nw.easting, nw.northing
            )));
        }
        Ok(Self { nw, se })
    }

    /// Suffix used in output file names: `<nwE>_<nwN>_<seE>_<seN>`
    pub fn file_suffix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.nw.easting.round() as i64,
            self.nw.northing.round() as i64,
            self.se.easting.round() as i64,
            self.se.northing.round() as i64,
        )
    }
}

/// Affine georeferencing of a north-up raster, GDAL ordering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with its top-left pixel corner at `origin`
    pub fn north_up(origin: ProjectedPoint, pixel_size: f64) -> Self {
        Self {
            top_left_x: origin.easting,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y: origin.northing,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// North-up transform anchored at the window's NW corner
    pub fn from_window(window: &Window, pixel_size: f64) -> Self {
        Self::north_up(window.nw, pixel_size)
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_gdal(t: [f64; 6]) -> Self {
        Self {
            top_left_x: t[0],
            pixel_width: t[1],
            rotation_x: t[2],
            top_left_y: t[3],
            rotation_y: t[4],
            pixel_height: t[5],
        }
    }
}

/// The four projected corners of a scene; they need not be axis aligned
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneCorners {
    pub nw: ProjectedPoint,
    pub ne: ProjectedPoint,
    pub sw: ProjectedPoint,
    pub se: ProjectedPoint,
}

/// Linear radiometric correction for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandCorrection {
    pub slope: f64,
    pub intercept: f64,
}

impl BandCorrection {
    pub fn apply(&self, raw: f32) -> Radiance {
        (self.slope * raw as f64 + self.intercept) as Radiance
    }
}

/// Scene acquisition time, minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AcquisitionTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl From<NaiveDateTime> for AcquisitionTime {
    fn from(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
        }
    }
}

/// One connected field region that passed the area filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub label: u32,
    pub area: usize,
    pub centroid_row: f64,
    pub centroid_col: f64,
    pub nw_row: usize,
    pub nw_col: usize,
    /// Exclusive
    pub se_row: usize,
    /// Exclusive
    pub se_col: usize,
}

/// Error types for field extraction
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("No metadata file found in archive {archive}")]
    MetadataNotFound { archive: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Pixel ({row}, {col}) is outside the {rows}x{cols} raster")]
    CoordinateOutOfBounds {
        row: i64,
        col: i64,
        rows: usize,
        cols: usize,
    },

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Empty temporal stack: {0}")]
    EmptyStack(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<zip::result::ZipError> for FieldError {
    fn from(e: zip::result::ZipError) -> Self {
        FieldError::Archive(e.to_string())
    }
}

/// Result type for field extraction
pub type FieldResult<T> = Result<T, FieldError>;
