use crate::io::archive::{archive_year, ArchiveKind};
use crate::io::scene::SceneRepository;
use crate::types::{
    AcquisitionTime, FieldError, FieldResult, GeoTransform, RadianceImage, TemporalCube, Window,
};
use ndarray::{s, Array2, Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Composite normalization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeParams {
    /// Largest absolute value of the normalized composite
    pub normalization_ceiling: f32,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            normalization_ceiling: 1.0,
        }
    }
}

/// One collected frame: scene id, acquisition time, radiance
pub type Frame = (String, AcquisitionTime, RadianceImage);

/// Time-ordered frames of one band over one window
#[derive(Debug, Clone)]
pub struct TemporalStack {
    pub band: usize,
    /// time x row x col
    pub frames: TemporalCube,
    pub acquisitions: Vec<AcquisitionTime>,
    pub scene_ids: Vec<String>,
    /// Archives left out of the stack and why
    pub excluded: Vec<(PathBuf, String)>,
    /// Georeferencing of the frames' pixel grid, when read from scenes
    pub transform: Option<GeoTransform>,
}

impl TemporalStack {
    /// Stack frames after truncating them to their common row/col extent
    pub fn from_frames(
        band: usize,
        frames: Vec<Frame>,
    ) -> FieldResult<Self> {
        if frames.is_empty() {
            return Err(FieldError::EmptyStack(format!("No frames for band {}", band)));
        }

        let rows = frames.iter().map(|(_, _, f)| f.nrows()).min().unwrap_or(0);
        let cols = frames.iter().map(|(_, _, f)| f.ncols()).min().unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(FieldError::EmptyStack(format!(
                "Frames for band {} share no pixels",
                band
            )));
        }

        let mut cube = Array3::<f32>::zeros((frames.len(), rows, cols));
        let mut acquisitions = Vec::with_capacity(frames.len());
        let mut scene_ids = Vec::with_capacity(frames.len());
        for (t, (id, acquisition, frame)) in frames.into_iter().enumerate() {
            if frame.dim() != (rows, cols) {
                log::debug!(
                    "Truncating frame {} from {:?} to {:?}",
                    id,
                    frame.dim(),
                    (rows, cols)
                );
            }
            cube.slice_mut(s![t, .., ..])
                .assign(&frame.slice(s![..rows, ..cols]));
            acquisitions.push(acquisition);
            scene_ids.push(id);
        }

        Ok(Self {
            band,
            frames: cube,
            acquisitions,
            scene_ids,
            excluded: Vec::new(),
            transform: None,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (rows, cols) shared by every frame
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.frames.dim();
        (rows, cols)
    }

    pub fn frame(&self, t: usize) -> ArrayView2<'_, f32> {
        self.frames.index_axis(Axis(0), t)
    }

    /// Frames whose scene appears in `scene_ids`, in this stack's order
    pub fn retain_scenes(&self, scene_ids: &[String]) -> FieldResult<Self> {
        let keep: Vec<usize> = self
            .scene_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| scene_ids.contains(id))
            .map(|(t, _)| t)
            .collect();
        if keep.is_empty() {
            return Err(FieldError::EmptyStack(format!(
                "No band {} frames remain after pairing scenes",
                self.band
            )));
        }
        Ok(Self {
            band: self.band,
            frames: self.frames.select(Axis(0), &keep),
            acquisitions: keep.iter().map(|&t| self.acquisitions[t]).collect(),
            scene_ids: keep.iter().map(|&t| self.scene_ids[t].clone()).collect(),
            excluded: self.excluded.clone(),
            transform: self.transform,
        })
    }
}

/// Restrict two stacks to the scenes they share so frames pair up by index
pub fn pair_stacks(a: &TemporalStack, b: &TemporalStack) -> FieldResult<(TemporalStack, TemporalStack)> {
    let common: Vec<String> = a
        .scene_ids
        .iter()
        .filter(|id| b.scene_ids.contains(id))
        .cloned()
        .collect();
    let a = a.retain_scenes(&common)?;
    let b = b.retain_scenes(&a.scene_ids)?;
    if a.scene_ids != b.scene_ids {
        return Err(FieldError::ShapeMismatch(format!(
            "Bands {} and {} list shared scenes in different orders",
            a.band, b.band
        )));
    }
    Ok((a, b))
}

/// Normalized time-averaged vegetation-difference image
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    pub values: Array2<f32>,
    pub ceiling: f32,
}

impl CompositeIndex {
    /// Linear fixed-point encoding mapping `[-ceiling, ceiling]` onto `[0, 65535]`
    pub fn to_fixed_point(&self) -> Array2<u16> {
        let scale = u16::MAX as f32 / (2.0 * self.ceiling);
        self.values.mapv(|v| {
            let encoded = ((v + self.ceiling) * scale).round();
            encoded.clamp(0.0, u16::MAX as f32) as u16
        })
    }

    /// Inverse of [`CompositeIndex::to_fixed_point`]
    pub fn from_fixed_point(encoded: &Array2<u16>, ceiling: f32) -> Self {
        let scale = (2.0 * ceiling) / u16::MAX as f32;
        Self {
            values: encoded.mapv(|e| e as f32 * scale - ceiling),
            ceiling,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// All scene archives in `directory`, sorted by name
pub fn find_archives<P: AsRef<Path>>(directory: P) -> FieldResult<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = std::fs::read_dir(directory.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && ArchiveKind::from_path(p).is_some())
        .collect();
    archives.sort();
    Ok(archives)
}

/// Builds temporal stacks and compresses them into a composite index
pub struct TemporalCompositor {
    params: CompositeParams,
}

impl TemporalCompositor {
    pub fn new(params: CompositeParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(CompositeParams::default())
    }

    /// Collect sub-images of `band` over `window` from every archive whose
    /// name encodes one of `years`.
    ///
    /// Scenes without metadata or not covering the window are excluded and
    /// listed in [`TemporalStack::excluded`]; any other failure aborts.
    pub fn collect(
        &self,
        repository: &SceneRepository,
        band: usize,
        window: &Window,
        archives: &[PathBuf],
        years: &[i32],
    ) -> FieldResult<TemporalStack> {
        let selected: Vec<&PathBuf> = archives
            .iter()
            .filter(|p| archive_year(p).map(|y| years.contains(&y)).unwrap_or(false))
            .collect();

        log::info!(
            "Collecting band {} from {} of {} archives (years {:?})",
            band,
            selected.len(),
            archives.len(),
            years
        );
        let start_time = std::time::Instant::now();

        type Read = Result<(Frame, GeoTransform), (PathBuf, String)>;
        let read_one = |archive: &&PathBuf| -> FieldResult<Read> {
            let scene = match repository.open(archive) {
                Ok(scene) => scene,
                Err(e @ FieldError::MetadataNotFound { .. }) => {
                    return Ok(Err(((*archive).clone(), e.to_string())))
                }
                Err(e) => return Err(e),
            };
            match scene.get_band_subimage(band, window.nw, window.se, true) {
                Ok(image) => {
                    let transform = scene.crop_transform(window.nw)?;
                    Ok(Ok(((scene.id.clone(), scene.acquisition, image), transform)))
                }
                Err(e @ FieldError::CoordinateOutOfBounds { .. }) => {
                    log::warn!("Scene {} does not cover the window: {}", scene.id, e);
                    Ok(Err(((*archive).clone(), e.to_string())))
                }
                Err(e) => Err(e),
            }
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = selected
            .par_iter()
            .map(read_one)
            .collect::<FieldResult<Vec<_>>>()?;

        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = selected
            .iter()
            .map(read_one)
            .collect::<FieldResult<Vec<_>>>()?;

        let mut frames = Vec::new();
        let mut transform = None;
        let mut excluded = Vec::new();
        for result in results {
            match result {
                Ok((frame, frame_transform)) => {
                    transform.get_or_insert(frame_transform);
                    frames.push(frame);
                }
                Err(skip) => excluded.push(skip),
            }
        }

        if !excluded.is_empty() {
            log::warn!("Excluded {} scene(s) from band {} stack", excluded.len(), band);
        }

        let mut stack = TemporalStack::from_frames(band, frames)?;
        stack.excluded = excluded;
        stack.transform = transform;

        log::info!(
            "Band {} stack: {} frames of {:?} in {:?}",
            band,
            stack.len(),
            stack.frame_shape(),
            start_time.elapsed()
        );
        Ok(stack)
    }

    /// Time average of `(a - b) / (a + b)`, recentered on the midpoint of
    /// its range and scaled so the largest magnitude equals the ceiling
    pub fn compress(&self, a: &TemporalStack, b: &TemporalStack) -> FieldResult<CompositeIndex> {
        if a.len() != b.len() {
            return Err(FieldError::ShapeMismatch(format!(
                "Band {} has {} frames but band {} has {}",
                a.band,
                a.len(),
                b.band,
                b.len()
            )));
        }
        if a.is_empty() {
            return Err(FieldError::EmptyStack("Nothing to compress".to_string()));
        }

        let (a_rows, a_cols) = a.frame_shape();
        let (b_rows, b_cols) = b.frame_shape();
        let (rows, cols) = (a_rows.min(b_rows), a_cols.min(b_cols));
        let a_view = a.frames.slice(s![.., ..rows, ..cols]);
        let b_view = b.frames.slice(s![.., ..rows, ..cols]);

        let mut sums = Array2::<f64>::zeros((rows, cols));
        let mut counts = Array2::<u32>::zeros((rows, cols));
        for (fa, fb) in a_view.outer_iter().zip(b_view.outer_iter()) {
            Zip::from(&mut sums)
                .and(&mut counts)
                .and(&fa)
                .and(&fb)
                .for_each(|sum, count, &va, &vb| {
                    let ratio = (va as f64 - vb as f64) / (va as f64 + vb as f64);
                    if ratio.is_finite() {
                        *sum += ratio;
                        *count += 1;
                    }
                });
        }

        let average = Zip::from(&sums).and(&counts).map_collect(|&sum, &count| {
            if count > 0 {
                (sum / count as f64) as f32
            } else {
                f32::NAN
            }
        });

        self.normalize(average)
    }

    /// Recenter on the midpoint of (min, max) and rescale to the ceiling.
    /// Pixels without data land on zero.
    pub fn normalize(&self, average: Array2<f32>) -> FieldResult<CompositeIndex> {
        let ceiling = self.params.normalization_ceiling;
        if !(ceiling.is_finite() && ceiling > 0.0) {
            return Err(FieldError::Config(format!(
                "Normalization ceiling must be positive, got {}",
                ceiling
            )));
        }

        let (min, max) = average
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if !min.is_finite() {
            return Err(FieldError::Processing(
                "Composite contains no valid pixels".to_string(),
            ));
        }

        let center = (min + max) / 2.0;
        let shifted = average.mapv(|v| v - center);
        let extent = shifted
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, &v| acc.max(v.abs()));
        if extent == 0.0 {
            return Err(FieldError::Processing(
                "Composite has no contrast to normalize".to_string(),
            ));
        }

        log::debug!(
            "Composite range [{:.4}, {:.4}], center {:.4}, extent {:.4}",
            min,
            max,
            center,
            extent
        );

        let values = shifted.mapv(|v| {
            if v.is_finite() {
                (v / extent) * ceiling
            } else {
                0.0
            }
        });
        Ok(CompositeIndex { values, ceiling })
    }
}
