//! End-to-end field extraction: collect, composite, threshold, sever roads,
//! label, persist.

use crate::core::coordinates::window_to_geodetic;
use crate::core::field_mask::{FieldMaskBuilder, MaskParams};
use crate::core::regions::{LabeledFields, RegionLabeler, RegionParams};
use crate::core::road_lines::{RoadLineParams, RoadLineRemover};
use crate::core::sampling::{sample_scene, FieldBandSample};
use crate::core::temporal::{
    find_archives, pair_stacks, CompositeIndex, CompositeParams, TemporalCompositor,
};
use crate::io::raster::{utm_epsg, write_composite, write_label_mask};
use crate::io::records::{write_records_csv, write_samples_csv};
use crate::io::scene::SceneRepository;
use crate::types::{
    FieldError, FieldResult, GeoTransform, Hemisphere, LabelImage, ProjectedPoint, Window,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One band and the acquisition years to draw it from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSelection {
    pub band: usize,
    pub years: Vec<i32>,
}

/// Everything a pipeline run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Region of interest in projected meters
    pub window: Window,
    pub utm_zone: Option<u8>,
    pub hemisphere: Hemisphere,
    /// Output pixel size in meters, used for georeferencing
    pub pixel_size: f64,
    /// `a` in `(a - b) / (a + b)`
    pub numerator: BandSelection,
    /// `b` in `(a - b) / (a + b)`
    pub denominator: BandSelection,
    pub archive_dir: PathBuf,
    /// Persistent extraction cache; a temporary directory is used when unset
    pub work_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Bands to sample per field and scene; empty disables sampling
    pub sample_bands: Vec<usize>,
    pub composite: CompositeParams,
    pub mask: MaskParams,
    pub roads: RoadLineParams,
    pub regions: RegionParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: Window {
                nw: ProjectedPoint::new(396_210.0, 4_175_310.0),
                se: ProjectedPoint::new(404_460.0, 4_167_150.0),
            },
            utm_zone: Some(13),
            hemisphere: Hemisphere::North,
            pixel_size: 30.0,
            numerator: BandSelection {
                band: 4,
                years: (2000..=2011).collect(),
            },
            denominator: BandSelection {
                band: 3,
                years: (2000..=2009).collect(),
            },
            archive_dir: PathBuf::from("scenes"),
            work_dir: None,
            output_dir: PathBuf::from("output"),
            sample_bands: Vec::new(),
            composite: CompositeParams::default(),
            mask: MaskParams::default(),
            roads: RoadLineParams::default(),
            regions: RegionParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> FieldResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FieldError::Config(format!("Invalid pipeline configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FieldResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::info!("Loading configuration from {}", path.as_ref().display());
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> FieldResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FieldError::Config(format!("Cannot serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> FieldResult<()> {
        Window::new(self.window.nw, self.window.se)?;
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(FieldError::Config(format!(
                "Pixel size must be positive, got {}",
                self.pixel_size
            )));
        }
        for selection in [&self.numerator, &self.denominator] {
            if selection.band == 0 {
                return Err(FieldError::Config("Band numbers start at 1".to_string()));
            }
            if selection.years.is_empty() {
                return Err(FieldError::Config(format!(
                    "No acquisition years selected for band {}",
                    selection.band
                )));
            }
        }
        if let Some(zone) = self.utm_zone {
            if !(1..=60).contains(&zone) {
                return Err(FieldError::Config(format!("Invalid UTM zone {}", zone)));
            }
        }
        if self.mask.closing_size == 0 {
            return Err(FieldError::Config("Closing size must be positive".to_string()));
        }
        if self.roads.strides.iter().any(|&s| s == 0) {
            return Err(FieldError::Config("Tile strides must be positive".to_string()));
        }
        if self.regions.min_area > self.regions.max_area {
            return Err(FieldError::Config(format!(
                "Minimum field area {} exceeds maximum {}",
                self.regions.min_area, self.regions.max_area
            )));
        }
        Ok(())
    }

    pub fn epsg(&self) -> Option<u32> {
        self.utm_zone
            .map(|zone| utm_epsg(zone, self.hemisphere == Hemisphere::South))
    }

    /// Georeferencing assumed when no scene supplied one: the window's
    /// NW corner at the configured pixel size
    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::from_window(&self.window, self.pixel_size)
    }

    /// `<stem>_<nwE>_<nwN>_<seE>_<seN>.<ext>` inside the output directory
    pub fn output_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.{}", stem, self.window.file_suffix(), extension))
    }
}

/// Field mask before and after road removal, plus the labeled result
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub thresholded: LabelImage,
    pub lines_burned: usize,
    pub fields: LabeledFields,
}

/// Composite index plus where its frames came from
#[derive(Debug, Clone)]
pub struct TemporalComposite {
    pub index: CompositeIndex,
    /// Georeferencing of the cropped scene pixels
    pub transform: GeoTransform,
    pub frames_used: usize,
    pub excluded: Vec<(PathBuf, String)>,
}

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct FieldMapResult {
    pub composite: CompositeIndex,
    pub transform: GeoTransform,
    pub segmentation: Segmentation,
    pub frames_used: usize,
    pub excluded: Vec<(PathBuf, String)>,
    pub samples: Vec<FieldBandSample>,
}

/// Files written by [`FieldPipeline::write_outputs`]
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub composite: PathBuf,
    pub field_mask: PathBuf,
    pub field_props: PathBuf,
    pub field_samples: Option<PathBuf>,
}

pub struct FieldPipeline {
    config: PipelineConfig,
    repository: SceneRepository,
}

impl FieldPipeline {
    pub fn new(config: PipelineConfig) -> FieldResult<Self> {
        config.validate()?;
        let repository = match &config.work_dir {
            Some(dir) => SceneRepository::with_work_dir(dir)?,
            None => SceneRepository::temporary()?,
        };
        Ok(Self { config, repository })
    }

    pub fn with_repository(config: PipelineConfig, repository: SceneRepository) -> FieldResult<Self> {
        config.validate()?;
        Ok(Self { config, repository })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Collect both bands and compress them into the composite index
    pub fn build_composite(&self) -> FieldResult<TemporalComposite> {
        let config = &self.config;
        let archives = find_archives(&config.archive_dir)?;
        log::info!(
            "Found {} archives in {}",
            archives.len(),
            config.archive_dir.display()
        );

        let compositor = TemporalCompositor::new(config.composite.clone());
        let numerator = compositor.collect(
            &self.repository,
            config.numerator.band,
            &config.window,
            &archives,
            &config.numerator.years,
        )?;
        let denominator = compositor.collect(
            &self.repository,
            config.denominator.band,
            &config.window,
            &archives,
            &config.denominator.years,
        )?;

        let (numerator, denominator) = pair_stacks(&numerator, &denominator)?;
        log::info!(
            "Compressing {} paired frames of {:?}",
            numerator.len(),
            numerator.frame_shape()
        );

        let mut excluded = numerator.excluded.clone();
        for skip in &denominator.excluded {
            if !excluded.contains(skip) {
                excluded.push(skip.clone());
            }
        }

        let transform = numerator
            .transform
            .unwrap_or_else(|| config.geo_transform());
        if transform.top_left_x != config.window.nw.easting
            || transform.top_left_y != config.window.nw.northing
        {
            log::info!(
                "Window snapped to pixel grid at ({}, {})",
                transform.top_left_x,
                transform.top_left_y
            );
        }

        let index = compositor.compress(&numerator, &denominator)?;
        Ok(TemporalComposite {
            index,
            transform,
            frames_used: numerator.len(),
            excluded,
        })
    }

    /// Threshold, sever roads and label a composite
    pub fn segment(&self, composite: &CompositeIndex) -> FieldResult<Segmentation> {
        let mask_builder = FieldMaskBuilder::new(self.config.mask.clone());
        let remover = RoadLineRemover::new(self.config.roads.clone());
        let labeler = RegionLabeler::new(self.config.regions.clone());

        let thresholded = mask_builder.threshold(composite)?;
        let mut field_mask = thresholded.clone();
        let lines_burned = remover.remove_roads(&mut field_mask, &mask_builder)?;
        let fields = labeler.label(&field_mask)?;

        Ok(Segmentation {
            thresholded,
            lines_burned,
            fields,
        })
    }

    /// Per-field statistics for every scene of the configured years
    pub fn sample_fields(&self, labels: &LabelImage) -> FieldResult<Vec<FieldBandSample>> {
        let years: Vec<i32> = self
            .config
            .numerator
            .years
            .iter()
            .chain(self.config.denominator.years.iter())
            .copied()
            .collect();
        let archives: Vec<PathBuf> = find_archives(&self.config.archive_dir)?
            .into_iter()
            .filter(|p| {
                crate::io::archive::archive_year(p)
                    .map(|y| years.contains(&y))
                    .unwrap_or(false)
            })
            .collect();

        let mut samples = Vec::new();
        for archive in &archives {
            let scene = match self.repository.open(archive) {
                Ok(scene) => scene,
                Err(e @ FieldError::MetadataNotFound { .. }) => {
                    log::warn!("Skipping {} for sampling: {}", archive.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match sample_scene(&scene, &self.config.window, labels, &self.config.sample_bands) {
                Ok(mut scene_samples) => samples.append(&mut scene_samples),
                Err(e @ FieldError::CoordinateOutOfBounds { .. }) => {
                    log::warn!("Scene {} does not cover the window: {}", scene.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(samples)
    }

    pub fn run(&self) -> FieldResult<FieldMapResult> {
        let start_time = Instant::now();
        let config = &self.config;
        log::info!("Extracting fields in window {}", config.window.file_suffix());
        if let Some(zone) = config.utm_zone {
            let (nw, se) = window_to_geodetic(&config.window, zone, config.hemisphere);
            log::info!(
                "Window spans lat {:.5}..{:.5}, lon {:.5}..{:.5}",
                se.latitude,
                nw.latitude,
                nw.longitude,
                se.longitude
            );
        }

        log::info!("Step 1: Temporal composite");
        let TemporalComposite {
            index: composite,
            transform,
            frames_used,
            excluded,
        } = self.build_composite()?;

        log::info!("Step 2: Field mask, road removal and labeling");
        let segmentation = self.segment(&composite)?;

        let samples = if config.sample_bands.is_empty() {
            Vec::new()
        } else {
            log::info!("Step 3: Per-field sampling");
            self.sample_fields(&segmentation.fields.mask)?
        };

        log::info!(
            "Found {} fields from {} frames in {:?}",
            segmentation.fields.records.len(),
            frames_used,
            start_time.elapsed()
        );

        Ok(FieldMapResult {
            composite,
            transform,
            segmentation,
            frames_used,
            excluded,
            samples,
        })
    }

    pub fn write_outputs(&self, result: &FieldMapResult) -> FieldResult<OutputPaths> {
        let config = &self.config;
        std::fs::create_dir_all(&config.output_dir)?;
        let transform = result.transform;
        let epsg = config.epsg();

        let paths = OutputPaths {
            composite: config.output_path("composite", "tif"),
            field_mask: config.output_path("field_mask", "tif"),
            field_props: config.output_path("field_props", "csv"),
            field_samples: if result.samples.is_empty() {
                None
            } else {
                Some(config.output_path("field_samples", "csv"))
            },
        };

        write_composite(&result.composite, &transform, epsg, &paths.composite)?;
        write_label_mask(&result.segmentation.fields.mask, &transform, epsg, &paths.field_mask)?;
        write_records_csv(&paths.field_props, &result.segmentation.fields.records)?;
        if let Some(path) = &paths.field_samples {
            write_samples_csv(path, &result.samples)?;
        }
        Ok(paths)
    }

    /// Release the scene repository
    pub fn finish(self) -> FieldResult<()> {
        self.repository.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.epsg(), Some(32613));
        assert_eq!(
            config.output_path("field_mask", "tif"),
            PathBuf::from("output/field_mask_396210_4175310_404460_4167150.tif")
        );
    }

    #[test]
    fn test_config_json_fills_defaults() {
        let json = r#"{
            "window": {
                "nw": {"easting": 400000.0, "northing": 4170000.0},
                "se": {"easting": 401500.0, "northing": 4168500.0}
            },
            "archive_dir": "/data/landsat",
            "roads": {"strides": [50]}
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.archive_dir, PathBuf::from("/data/landsat"));
        assert_eq!(config.roads.strides, vec![50]);
        assert_eq!(config.roads.min_distance, 20);
        assert_eq!(config.mask.closing_size, 50);
        assert_eq!(config.numerator.band, 4);
    }

    #[test]
    fn test_config_rejects_inverted_window() {
        let json = r#"{
            "window": {
                "nw": {"easting": 401500.0, "northing": 4170000.0},
                "se": {"easting": 400000.0, "northing": 4168500.0}
            }
        }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(FieldError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PipelineConfig::default();
        let parsed = PipelineConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed.window, config.window);
        assert_eq!(parsed.denominator, config.denominator);
        assert_eq!(parsed.regions.max_area, usize::MAX);
    }
}
