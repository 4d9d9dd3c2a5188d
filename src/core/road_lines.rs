//! Road removal: tiled Hough line detection over the between-fields mask,
//! with near-axis lines burned into the field mask as background.

use crate::core::field_mask::FieldMaskBuilder;
use crate::types::{BinaryMask, FieldError, FieldResult, LabelImage, BACKGROUND};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Line detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadLineParams {
    /// Tile sizes in pixels, applied smallest first
    pub strides: Vec<usize>,
    /// Radians from an axis within which a line counts as a road
    pub angle_tolerance: f64,
    /// Peak suppression half-width in distance bins
    pub min_distance: usize,
    /// Peak suppression half-width in angle bins
    pub min_angle: usize,
    /// Minimum votes as a fraction of the tile's strongest cell
    pub peak_threshold: f64,
    /// Number of angles sampled over [-pi/2, pi/2)
    pub angle_bins: usize,
}

impl Default for RoadLineParams {
    fn default() -> Self {
        Self {
            strides: vec![100, 200, 400],
            angle_tolerance: 0.1,
            min_distance: 20,
            min_angle: 10,
            peak_threshold: 0.5,
            angle_bins: 180,
        }
    }
}

/// A detected line `distance = col * cos(angle) + row * sin(angle)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineCandidate {
    pub distance: f64,
    pub angle: f64,
    pub votes: u32,
}

impl LineCandidate {
    pub fn is_near_axis(&self, tolerance: f64) -> bool {
        is_near_axis(self.angle, tolerance)
    }
}

/// True when `angle` is strictly within `tolerance` of 0 or of +-pi/2
pub fn is_near_axis(angle: f64, tolerance: f64) -> bool {
    let a = angle.abs();
    a < tolerance || a > FRAC_PI_2 - tolerance
}

/// Hough vote accumulator, indexed (distance bin, angle bin)
#[derive(Debug, Clone)]
pub struct HoughAccumulator {
    pub votes: Array2<u32>,
    pub angles: Vec<f64>,
    /// Distance of bin 0; bin `i` is `offset + i`
    pub offset: isize,
}

impl HoughAccumulator {
    /// Vote every set pixel of `mask` into `angle_bins` angles
    pub fn from_mask(mask: ArrayView2<bool>, angle_bins: usize) -> Self {
        let (rows, cols) = mask.dim();
        let diag = ((rows * rows + cols * cols) as f64).sqrt().ceil() as isize;
        let angles: Vec<f64> = (0..angle_bins)
            .map(|i| -FRAC_PI_2 + PI * (i as f64 / angle_bins as f64))
            .collect();
        let trig: Vec<(f64, f64)> = angles.iter().map(|a| a.sin_cos()).collect();

        let mut votes = Array2::<u32>::zeros(((2 * diag + 1) as usize, angle_bins));
        for ((row, col), &set) in mask.indexed_iter() {
            if !set {
                continue;
            }
            for (j, &(sin, cos)) in trig.iter().enumerate() {
                let rho = (col as f64 * cos + row as f64 * sin).round() as isize;
                votes[[(rho + diag) as usize, j]] += 1;
            }
        }

        Self {
            votes,
            angles,
            offset: -diag,
        }
    }

    /// Strongest cells, greedily, each suppressing its neighborhood of
    /// `min_distance` distance bins and `min_angle` angle bins.
    ///
    /// Only local maxima over that same neighborhood are candidates.
    pub fn peaks(&self, min_distance: usize, min_angle: usize, threshold: f64) -> Vec<LineCandidate> {
        let max_votes = self.votes.iter().copied().max().unwrap_or(0);
        if max_votes == 0 {
            return Vec::new();
        }
        let floor = (threshold * max_votes as f64).max(1.0);
        let neighborhood = running_max(
            &running_max(&self.votes, Axis(1), min_angle),
            Axis(0),
            min_distance,
        );

        let mut cells: Vec<(u32, usize, usize)> = self
            .votes
            .indexed_iter()
            .filter(|((d, a), &v)| v as f64 >= floor && v == neighborhood[[*d, *a]])
            .map(|((d, a), &v)| (v, d, a))
            .collect();
        // Strongest first; ties resolved by position for determinism
        cells.sort_by(|x, y| y.0.cmp(&x.0).then(x.2.cmp(&y.2)).then(x.1.cmp(&y.1)));

        let (n_dist, n_angle) = self.votes.dim();
        let mut suppressed = Array2::<bool>::from_elem((n_dist, n_angle), false);
        let mut peaks = Vec::new();

        for (v, d, a) in cells {
            if suppressed[[d, a]] {
                continue;
            }
            peaks.push(LineCandidate {
                distance: (self.offset + d as isize) as f64,
                angle: self.angles[a],
                votes: v,
            });
            let d0 = d.saturating_sub(min_distance);
            let d1 = (d + min_distance + 1).min(n_dist);
            let a0 = a.saturating_sub(min_angle);
            let a1 = (a + min_angle + 1).min(n_angle);
            suppressed.slice_mut(s![d0..d1, a0..a1]).fill(true);
        }

        peaks
    }
}

/// Maximum over `±half` cells along `axis`, clipped at the edges
fn running_max(votes: &Array2<u32>, axis: Axis, half: usize) -> Array2<u32> {
    let mut out = votes.clone();
    for (src, mut dst) in votes.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = src.len();
        for i in 0..n {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            dst[i] = src.slice(s![lo..hi]).iter().copied().max().unwrap_or(0);
        }
    }
    out
}

/// Bresenham rasterization, endpoints included
pub fn bresenham(r0: isize, c0: isize, r1: isize, c1: isize) -> Vec<(isize, isize)> {
    let dr = (r1 - r0).abs();
    let dc = (c1 - c0).abs();
    let sr = if r0 < r1 { 1 } else { -1 };
    let sc = if c0 < c1 { 1 } else { -1 };
    let mut err = dc - dr;
    let (mut r, mut c) = (r0, c0);
    let mut points = Vec::with_capacity((dr.max(dc) + 1) as usize);

    loop {
        points.push((r, c));
        if r == r1 && c == c1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dr {
            err -= dr;
            c += sc;
        }
        if e2 < dc {
            err += dc;
            r += sr;
        }
    }
    points
}

/// Burn `line` into `tile`, clipped to the tile bounds. Returns pixels changed.
pub fn draw_line(mut tile: ArrayViewMut2<u32>, line: &LineCandidate, value: u32) -> usize {
    let (rows, cols) = tile.dim();
    if rows == 0 || cols == 0 {
        return 0;
    }
    let (sin, cos) = line.angle.sin_cos();

    let (r0, c0, r1, c1) = if line.angle.abs() < FRAC_PI_4 {
        // Mostly vertical: solve for the column at the first and last row
        let last = (rows - 1) as f64;
        (
            0.0,
            line.distance / cos,
            last,
            (line.distance - last * sin) / cos,
        )
    } else {
        // Mostly horizontal: solve for the row at the first and last column
        let last = (cols - 1) as f64;
        (
            line.distance / sin,
            0.0,
            (line.distance - last * cos) / sin,
            last,
        )
    };

    let mut changed = 0;
    for (r, c) in bresenham(
        r0.round() as isize,
        c0.round() as isize,
        r1.round() as isize,
        c1.round() as isize,
    ) {
        if r < 0 || c < 0 || r as usize >= rows || c as usize >= cols {
            continue;
        }
        let px = &mut tile[[r as usize, c as usize]];
        if *px != value {
            *px = value;
            changed += 1;
        }
    }
    changed
}

/// Half-open pixel rectangle of one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub row0: usize,
    pub row1: usize,
    pub col0: usize,
    pub col1: usize,
}

fn axis_spans(extent: usize, stride: usize) -> Vec<(usize, usize)> {
    let count = (extent / stride).max(1);
    let size = extent / count;
    (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == count { extent } else { start + size };
            (start, end)
        })
        .collect()
}

/// Split a `rows` x `cols` raster into tiles of roughly `stride` pixels.
/// The last tile on each axis absorbs the remainder.
pub fn tile_grid(rows: usize, cols: usize, stride: usize) -> Vec<Tile> {
    let row_spans = axis_spans(rows, stride);
    let col_spans = axis_spans(cols, stride);
    let mut tiles = Vec::with_capacity(row_spans.len() * col_spans.len());
    for &(row0, row1) in &row_spans {
        for &(col0, col1) in &col_spans {
            tiles.push(Tile { row0, row1, col0, col1 });
        }
    }
    tiles
}

/// Severs fields merged across roads
pub struct RoadLineRemover {
    params: RoadLineParams,
}

impl RoadLineRemover {
    pub fn new(params: RoadLineParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(RoadLineParams::default())
    }

    /// Near-axis lines found in one tile of the between-fields mask
    pub fn detect_lines(&self, tile: ArrayView2<bool>) -> Vec<LineCandidate> {
        let accumulator = HoughAccumulator::from_mask(tile, self.params.angle_bins);
        accumulator
            .peaks(
                self.params.min_distance,
                self.params.min_angle,
                self.params.peak_threshold,
            )
            .into_iter()
            .filter(|line| line.is_near_axis(self.params.angle_tolerance))
            .collect()
    }

    /// One stride pass: detect per tile, then burn every kept line.
    /// Returns the number of lines burned.
    pub fn apply_pass(
        &self,
        field_mask: &mut LabelImage,
        between: &BinaryMask,
        stride: usize,
    ) -> FieldResult<usize> {
        if stride == 0 {
            return Err(FieldError::Config("Tile stride must be positive".to_string()));
        }
        if field_mask.dim() != between.dim() {
            return Err(FieldError::ShapeMismatch(format!(
                "Field mask {:?} and between-fields mask {:?} differ",
                field_mask.dim(),
                between.dim()
            )));
        }

        let (rows, cols) = field_mask.dim();
        let tiles = tile_grid(rows, cols, stride);

        let detect = |tile: &Tile| {
            let view = between.slice(s![tile.row0..tile.row1, tile.col0..tile.col1]);
            (*tile, self.detect_lines(view))
        };

        #[cfg(feature = "parallel")]
        let detections: Vec<(Tile, Vec<LineCandidate>)> = tiles.par_iter().map(detect).collect();

        #[cfg(not(feature = "parallel"))]
        let detections: Vec<(Tile, Vec<LineCandidate>)> = tiles.iter().map(detect).collect();

        let mut burned = 0;
        let mut pixels = 0;
        for (tile, lines) in &detections {
            for line in lines {
                let view = field_mask.slice_mut(s![tile.row0..tile.row1, tile.col0..tile.col1]);
                pixels += draw_line(view, line, BACKGROUND);
                burned += 1;
            }
        }

        log::info!(
            "Stride {}: {} tiles, {} road lines burned ({} pixels cleared)",
            stride,
            tiles.len(),
            burned,
            pixels
        );
        Ok(burned)
    }

    /// Run every stride pass in increasing order. Each pass recomputes the
    /// between-fields mask from the mask left by the previous pass.
    pub fn remove_roads(
        &self,
        field_mask: &mut LabelImage,
        mask_builder: &FieldMaskBuilder,
    ) -> FieldResult<usize> {
        let mut strides = self.params.strides.clone();
        strides.sort_unstable();

        let mut total = 0;
        for stride in strides {
            let between = mask_builder.between_fields(field_mask)?;
            total += self.apply_pass(field_mask, &between, stride)?;
        }
        Ok(total)
    }
}
