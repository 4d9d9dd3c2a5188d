//! Connected-component labeling of the field mask with speck and area filtering.

use crate::types::{FieldError, FieldRecord, FieldResult, LabelImage, BACKGROUND};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Pixel neighborhood used to join foreground pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbors only
    #[default]
    Four,
    /// Edge and corner neighbors
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// Region filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    /// Components smaller than this are specks and always removed
    pub min_speck_size: usize,
    /// Inclusive area band a component must fall in to become a field
    pub min_area: usize,
    pub max_area: usize,
    pub connectivity: Connectivity,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            min_speck_size: 100,
            min_area: 100,
            max_area: usize::MAX,
            connectivity: Connectivity::Four,
        }
    }
}

/// Result of labeling: relabeled mask plus one record per kept field
#[derive(Debug, Clone)]
pub struct LabeledFields {
    pub mask: LabelImage,
    pub records: Vec<FieldRecord>,
}

#[derive(Debug)]
struct Component {
    pixels: Vec<(usize, usize)>,
}

impl Component {
    fn record(&self, label: u32) -> FieldRecord {
        let area = self.pixels.len();
        let (mut sum_row, mut sum_col) = (0.0f64, 0.0f64);
        let (mut nw_row, mut nw_col) = (usize::MAX, usize::MAX);
        let (mut max_row, mut max_col) = (0usize, 0usize);
        for &(r, c) in &self.pixels {
            sum_row += r as f64;
            sum_col += c as f64;
            nw_row = nw_row.min(r);
            nw_col = nw_col.min(c);
            max_row = max_row.max(r);
            max_col = max_col.max(c);
        }
        FieldRecord {
            label,
            area,
            centroid_row: sum_row / area as f64,
            centroid_col: sum_col / area as f64,
            nw_row,
            nw_col,
            se_row: max_row + 1,
            se_col: max_col + 1,
        }
    }
}

/// Assigns field labels and emits field records
pub struct RegionLabeler {
    params: RegionParams,
}

impl RegionLabeler {
    pub fn new(params: RegionParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(RegionParams::default())
    }

    /// Flood-fill components in raster order of their first pixel
    fn components(&self, mask: &LabelImage) -> Vec<Component> {
        let (rows, cols) = mask.dim();
        let offsets = self.params.connectivity.offsets();
        let mut visited = ndarray::Array2::<bool>::from_elem((rows, cols), false);
        let mut components = Vec::new();
        let mut queue = VecDeque::new();

        for row in 0..rows {
            for col in 0..cols {
                if visited[[row, col]] || mask[[row, col]] == BACKGROUND {
                    continue;
                }
                visited[[row, col]] = true;
                queue.push_back((row, col));
                let mut pixels = Vec::new();

                while let Some((r, c)) = queue.pop_front() {
                    pixels.push((r, c));
                    for &(dr, dc) in offsets {
                        let rr = r as isize + dr;
                        let cc = c as isize + dc;
                        if rr < 0 || cc < 0 || rr as usize >= rows || cc as usize >= cols {
                            continue;
                        }
                        let (rr, cc) = (rr as usize, cc as usize);
                        if !visited[[rr, cc]] && mask[[rr, cc]] != BACKGROUND {
                            visited[[rr, cc]] = true;
                            queue.push_back((rr, cc));
                        }
                    }
                }
                components.push(Component { pixels });
            }
        }
        components
    }

    /// Label every connected component of non-background pixels.
    /// Specks and components outside the area band become background;
    /// survivors are numbered 1.. consecutively.
    pub fn label(&self, mask: &LabelImage) -> FieldResult<LabeledFields> {
        let RegionParams {
            min_speck_size,
            min_area,
            max_area,
            ..
        } = self.params;
        if min_area > max_area {
            return Err(FieldError::Config(format!(
                "Minimum field area {} exceeds maximum {}",
                min_area, max_area
            )));
        }

        let components = self.components(mask);
        let found = components.len();
        let mut labeled = LabelImage::from_elem(mask.dim(), BACKGROUND);
        let mut records = Vec::new();
        let (mut specks, mut out_of_band) = (0usize, 0usize);

        for component in &components {
            let area = component.pixels.len();
            if area < min_speck_size {
                specks += 1;
                continue;
            }
            if area < min_area || area > max_area {
                out_of_band += 1;
                continue;
            }
            let label = u32::try_from(records.len() + 1).map_err(|_| {
                FieldError::Processing("Too many fields for 32-bit labels".to_string())
            })?;
            for &(r, c) in &component.pixels {
                labeled[[r, c]] = label;
            }
            records.push(component.record(label));
        }

        log::info!(
            "Labeled {} components: {} fields kept, {} specks and {} out-of-band regions removed",
            found,
            records.len(),
            specks,
            out_of_band
        );

        Ok(LabeledFields {
            mask: labeled,
            records,
        })
    }
}
