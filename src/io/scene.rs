use crate::core::coordinates::CoordinateFrame;
use crate::io::archive::{archive_stem, extract_archive, list_files};
use crate::types::{
    AcquisitionTime, BandCorrection, FieldError, FieldResult, GeoTransform, Hemisphere,
    PixelIndex, ProjectedPoint, RadianceImage, SceneCorners,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Suffix identifying the metadata file inside a scene archive
pub const METADATA_SUFFIX: &str = "_MTL.txt";

/// Flat `GROUP/KEY -> value` view of a scene metadata file
#[derive(Debug, Clone, Default)]
pub struct SceneMetadata {
    values: HashMap<String, String>,
}

impl SceneMetadata {
    /// Parse `GROUP = X` / `KEY = "VALUE"` / `END_GROUP` text.
    ///
    /// Lines that do not split into exactly two tokens on `=` are ignored.
    pub fn parse(content: &str) -> Self {
        let mut values = HashMap::new();
        let mut group = String::from("NONE");

        for line in content.lines() {
            let tokens: Vec<&str> = line.split('=').collect();
            if tokens.len() != 2 {
                continue;
            }
            let key = tokens[0].trim_matches(|c: char| c == ' ' || c == '"' || c.is_whitespace());
            let value = tokens[1].trim_matches(|c: char| c == ' ' || c == '"' || c.is_whitespace());

            match key {
                "GROUP" => group = value.to_string(),
                "END_GROUP" => group = String::from("NONE"),
                _ => {
                    values.insert(format!("{}/{}", group, key), value.to_string());
                }
            }
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Required string value
    pub fn require(&self, key: &str) -> FieldResult<&str> {
        self.get(key)
            .ok_or_else(|| FieldError::Metadata(format!("Missing metadata key {}", key)))
    }

    /// Required numeric value
    pub fn require_f64(&self, key: &str) -> FieldResult<f64> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| {
            FieldError::Metadata(format!("Metadata key {} is not numeric: {}", key, raw))
        })
    }

    pub fn require_usize(&self, key: &str) -> FieldResult<usize> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| {
            FieldError::Metadata(format!("Metadata key {} is not an integer: {}", key, raw))
        })
    }

    /// Per-band radiance rescaling, probed from band 1 until a key is absent
    pub fn band_corrections(&self) -> FieldResult<Vec<BandCorrection>> {
        let mut corrections = Vec::new();
        for band in 1.. {
            let slope_key = format!("RADIOMETRIC_RESCALING/RADIANCE_MULT_BAND_{}", band);
            let intercept_key = format!("RADIOMETRIC_RESCALING/RADIANCE_ADD_BAND_{}", band);
            if self.get(&slope_key).is_none() || self.get(&intercept_key).is_none() {
                break;
            }
            corrections.push(BandCorrection {
                slope: self.require_f64(&slope_key)?,
                intercept: self.require_f64(&intercept_key)?,
            });
        }
        Ok(corrections)
    }

    fn corner(&self, name: &str) -> FieldResult<ProjectedPoint> {
        Ok(ProjectedPoint {
            easting: self.require_f64(&format!(
                "PRODUCT_METADATA/CORNER_{}_PROJECTION_X_PRODUCT",
                name
            ))?,
            northing: self.require_f64(&format!(
                "PRODUCT_METADATA/CORNER_{}_PROJECTION_Y_PRODUCT",
                name
            ))?,
        })
    }

    fn acquisition_time(&self) -> FieldResult<AcquisitionTime> {
        let date_str = self.require("PRODUCT_METADATA/DATE_ACQUIRED")?;
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
            FieldError::Metadata(format!("Invalid acquisition date '{}': {}", date_str, e))
        })?;

        // Only hours and minutes are kept; drop the fractional seconds and zone suffix
        let time = self
            .get("PRODUCT_METADATA/SCENE_CENTER_TIME")
            .and_then(|t| t.get(..5))
            .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
            .unwrap_or_else(|| {
                log::warn!("No usable scene center time, using midnight");
                NaiveTime::default()
            });

        Ok(NaiveDateTime::new(date, time).into())
    }
}

/// One opened scene: metadata, coordinate frame, band corrections
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub frame: CoordinateFrame,
    pub corrections: Vec<BandCorrection>,
    pub acquisition: AcquisitionTime,
    pub metadata: SceneMetadata,
    directory: PathBuf,
}

impl Scene {
    /// Build a scene from parsed metadata and its extracted directory
    pub fn from_metadata(metadata: SceneMetadata, directory: PathBuf) -> FieldResult<Self> {
        let id = metadata
            .require("METADATA_FILE_INFO/LANDSAT_SCENE_ID")?
            .to_string();

        let corners = SceneCorners {
            nw: metadata.corner("UL")?,
            ne: metadata.corner("UR")?,
            sw: metadata.corner("LL")?,
            se: metadata.corner("LR")?,
        };
        let pixel_size = metadata.require_f64("PROJECTION_PARAMETERS/GRID_CELL_SIZE_REFLECTIVE")?;
        let rows = metadata.require_usize("PRODUCT_METADATA/REFLECTIVE_LINES")?;
        let cols = metadata.require_usize("PRODUCT_METADATA/REFLECTIVE_SAMPLES")?;

        let mut frame = CoordinateFrame::new(corners, pixel_size, rows, cols)?;
        if let Some(zone) = metadata
            .get("PROJECTION_PARAMETERS/UTM_ZONE")
            .and_then(|z| z.parse::<i32>().ok())
        {
            // Negative zones denote the southern hemisphere
            let hemisphere = if zone < 0 { Hemisphere::South } else { Hemisphere::North };
            frame = frame.with_zone(zone.unsigned_abs() as u8, hemisphere);
        }

        let corrections = metadata.band_corrections()?;
        let acquisition = metadata.acquisition_time()?;

        log::debug!(
            "Scene {}: {}x{} px at {} m, {} corrected bands",
            id,
            rows,
            cols,
            pixel_size,
            corrections.len()
        );

        Ok(Self {
            id,
            frame,
            corrections,
            acquisition,
            metadata,
            directory,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn band_count(&self) -> usize {
        self.corrections.len()
    }

    pub fn correction(&self, band: usize) -> FieldResult<BandCorrection> {
        band.checked_sub(1)
            .and_then(|i| self.corrections.get(i))
            .copied()
            .ok_or_else(|| {
                FieldError::Metadata(format!(
                    "No radiometric correction for band {} in scene {}",
                    band, self.id
                ))
            })
    }

    pub fn projected_to_pixel(&self, point: ProjectedPoint) -> FieldResult<PixelIndex> {
        self.frame.projected_to_pixel(point)
    }

    /// Georeferencing of a sub-image whose NW corner is `nw`: the crop
    /// starts on the pixel containing `nw`, not at `nw` itself
    pub fn crop_transform(&self, nw: ProjectedPoint) -> FieldResult<GeoTransform> {
        let origin = self.frame.pixel_origin(nw)?;
        Ok(GeoTransform::north_up(origin, self.frame.pixel_size))
    }

    /// Raster file holding `band`
    pub fn band_path(&self, band: usize) -> FieldResult<PathBuf> {
        if let Some(name) = self
            .metadata
            .get(&format!("PRODUCT_METADATA/FILE_NAME_BAND_{}", band))
        {
            let path = self.directory.join(name);
            if path.is_file() {
                return Ok(path);
            }
        }

        let suffix = format!("_B{}.TIF", band);
        list_files(&self.directory)?
            .into_iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_ascii_uppercase().ends_with(&suffix))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                FieldError::Metadata(format!("No raster for band {} in scene {}", band, self.id))
            })
    }

    /// Radiance sub-image covering the projected rectangle `nw`..`se`.
    ///
    /// The crop is half-open in pixel space. With `convert` false the raw
    /// digital numbers are returned.
    pub fn get_band_subimage(
        &self,
        band: usize,
        nw: ProjectedPoint,
        se: ProjectedPoint,
        convert: bool,
    ) -> FieldResult<RadianceImage> {
        let path = self.band_path(band)?;
        let dataset = gdal::Dataset::open(&path)?;
        let (width, height) = dataset.raster_size();

        // The raster itself may differ from the reflective size in the metadata
        let mut frame = self.frame.clone();
        frame.rows = height;
        frame.cols = width;
        let top_left = frame.projected_to_pixel(nw)?;
        let bottom_right = frame.projected_to_pixel(se)?;

        if bottom_right.row <= top_left.row || bottom_right.col <= top_left.col {
            return Err(FieldError::InvalidWindow(format!(
                "Empty pixel window {:?}..{:?} in scene {}",
                top_left, bottom_right, self.id
            )));
        }

        let rows = bottom_right.row - top_left.row;
        let cols = bottom_right.col - top_left.col;
        log::debug!(
            "Reading band {} of {}: rows {}..{}, cols {}..{}",
            band,
            self.id,
            top_left.row,
            bottom_right.row,
            top_left.col,
            bottom_right.col
        );

        let rasterband = dataset.rasterband(1)?;
        let buffer = rasterband.read_as::<f32>(
            (top_left.col as isize, top_left.row as isize),
            (cols, rows),
            (cols, rows),
            None,
        )?;

        let mut image = Array2::from_shape_vec((rows, cols), buffer.data)
            .map_err(|e| FieldError::Processing(format!("Failed to reshape band data: {}", e)))?;

        if convert {
            let correction = self.correction(band)?;
            image.mapv_inplace(|raw| correction.apply(raw));
        }

        Ok(image)
    }
}

/// Opens scene archives into a working directory.
///
/// Each archive is extracted at most once; concurrent `open` calls for the
/// same archive are serialized on a per-archive lock. A temporary repository
/// removes its working directory when closed or dropped.
pub struct SceneRepository {
    work_dir: PathBuf,
    temp_dir: Option<TempDir>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SceneRepository {
    /// Repository backed by a caller-owned, persistent working directory
    pub fn with_work_dir<P: AsRef<Path>>(work_dir: P) -> FieldResult<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        fs::create_dir_all(&work_dir)?;
        Ok(Self {
            work_dir,
            temp_dir: None,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Repository backed by a temporary working directory
    pub fn temporary() -> FieldResult<Self> {
        let temp_dir = tempfile::Builder::new().prefix("fieldmap_scenes").tempdir()?;
        Ok(Self {
            work_dir: temp_dir.path().to_path_buf(),
            temp_dir: Some(temp_dir),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Default persistent cache location
    pub fn default_work_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fieldmap_scenes")
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Release the repository, deleting a temporary working directory
    pub fn close(self) -> FieldResult<()> {
        if let Some(temp_dir) = self.temp_dir {
            log::debug!("Removing working directory {}", temp_dir.path().display());
            temp_dir.close()?;
        }
        Ok(())
    }

    fn archive_lock(&self, key: &str) -> FieldResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| FieldError::Processing("Archive lock table poisoned".to_string()))?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Extract (if needed) and parse one scene archive
    pub fn open<P: AsRef<Path>>(&self, archive_path: P) -> FieldResult<Scene> {
        let archive_path = archive_path.as_ref();
        if !archive_path.exists() {
            return Err(FieldError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", archive_path.display()),
            )));
        }

        let key = archive_stem(archive_path)?;
        let scene_dir = self.work_dir.join(&key);

        {
            let lock = self.archive_lock(&key)?;
            let _guard = lock
                .lock()
                .map_err(|_| FieldError::Processing(format!("Lock for {} poisoned", key)))?;
            extract_archive(archive_path, &scene_dir)?;
        }

        let metadata_path = list_files(&scene_dir)?
            .into_iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(METADATA_SUFFIX))
                    .unwrap_or(false)
            });

        let metadata_path = match metadata_path {
            Some(path) => path,
            None => {
                log::error!(
                    "Could not find metadata file in archive {}, scene is unusable",
                    archive_path.display()
                );
                return Err(FieldError::MetadataNotFound {
                    archive: archive_path.display().to_string(),
                });
            }
        };

        let content = fs::read_to_string(&metadata_path)?;
        let metadata = SceneMetadata::parse(&content);
        log::debug!(
            "Parsed {} metadata entries from {}",
            metadata.len(),
            metadata_path.display()
        );

        let directory = metadata_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| scene_dir.clone());
        Scene::from_metadata(metadata, directory)
    }
}
