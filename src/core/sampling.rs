//! Per-field radiance statistics for individual scenes

use crate::io::scene::Scene;
use crate::types::{AcquisitionTime, FieldResult, LabelImage, RadianceImage, Window, BACKGROUND};
use serde::{Deserialize, Serialize};

/// Mean and variance of one band over one field in one scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBandSample {
    pub label: u32,
    pub band: usize,
    pub scene_id: String,
    pub acquisition: AcquisitionTime,
    pub pixels: usize,
    pub mean: f64,
    /// Population variance
    pub variance: f64,
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

/// Statistics of `image` over each label of `labels`.
///
/// Only the overlapping extent of the two rasters is used, and non-finite
/// radiances are skipped. Output is ordered by label.
pub fn band_statistics(
    image: &RadianceImage,
    labels: &LabelImage,
    band: usize,
    scene_id: &str,
    acquisition: AcquisitionTime,
) -> Vec<FieldBandSample> {
    let rows = image.nrows().min(labels.nrows());
    let cols = image.ncols().min(labels.ncols());
    let max_label = labels.iter().copied().max().unwrap_or(BACKGROUND) as usize;
    let mut acc = vec![Accumulator::default(); max_label + 1];

    for r in 0..rows {
        for c in 0..cols {
            let label = labels[[r, c]];
            let value = image[[r, c]];
            if label == BACKGROUND || !value.is_finite() {
                continue;
            }
            let slot = &mut acc[label as usize];
            let v = value as f64;
            slot.count += 1;
            slot.sum += v;
            slot.sum_sq += v * v;
        }
    }

    acc.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, a)| a.count > 0)
        .map(|(label, a)| {
            let n = a.count as f64;
            let mean = a.sum / n;
            FieldBandSample {
                label: label as u32,
                band,
                scene_id: scene_id.to_string(),
                acquisition,
                pixels: a.count,
                mean,
                variance: (a.sum_sq / n - mean * mean).max(0.0),
            }
        })
        .collect()
}

/// Sample every requested band of `scene` over the labeled fields.
/// An empty `bands` slice samples all corrected bands.
pub fn sample_scene(
    scene: &Scene,
    window: &Window,
    labels: &LabelImage,
    bands: &[usize],
) -> FieldResult<Vec<FieldBandSample>> {
    let all: Vec<usize> = (1..=scene.band_count()).collect();
    let bands = if bands.is_empty() { &all[..] } else { bands };

    let mut samples = Vec::new();
    for &band in bands {
        let image = scene.get_band_subimage(band, window.nw, window.se, true)?;
        if image.dim() != labels.dim() {
            log::debug!(
                "Band {} of {} is {:?}, mask is {:?}; sampling the overlap",
                band,
                scene.id,
                image.dim(),
                labels.dim()
            );
        }
        samples.extend(band_statistics(
            &image,
            labels,
            band,
            &scene.id,
            scene.acquisition,
        ));
    }

    log::info!(
        "Sampled {} bands of scene {}: {} field statistics",
        bands.len(),
        scene.id,
        samples.len()
    );
    Ok(samples)
}
