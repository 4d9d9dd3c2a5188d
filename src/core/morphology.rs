//! Grey and binary morphology on 2D rasters.
//!
//! Out-of-bounds neighbors are ignored, which makes erosion treat the border
//! as foreground and dilation treat it as background.

use crate::types::{BinaryMask, FieldError, FieldResult};
use ndarray::{Array2, Axis, Zip};
use num_traits::Float;

/// Flat structuring element
#[derive(Debug, Clone, PartialEq)]
pub struct StructuringElement {
    /// (row, col) offsets relative to the origin
    offsets: Vec<(isize, isize)>,
}

impl StructuringElement {
    /// Disk of the given radius (Euclidean distance <= radius)
    pub fn disk(radius: usize) -> Self {
        let r = radius as isize;
        let mut offsets = Vec::new();
        for dr in -r..=r {
            for dc in -r..=r {
                if dr * dr + dc * dc <= r * r {
                    offsets.push((dr, dc));
                }
            }
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn reflected(&self) -> Self {
        Self {
            offsets: self.offsets.iter().map(|&(r, c)| (-r, -c)).collect(),
        }
    }
}

fn rank_filter<T, F>(image: &Array2<T>, element: &StructuringElement, pick: F) -> Array2<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Send + Sync,
{
    let (rows, cols) = image.dim();
    let mut output = image.clone();

    let apply = |(r, c): (usize, usize), out: &mut T| {
        let mut acc = image[[r, c]];
        for &(dr, dc) in &element.offsets {
            let rr = r as isize + dr;
            let cc = c as isize + dc;
            if rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols {
                acc = pick(acc, image[[rr as usize, cc as usize]]);
            }
        }
        *out = acc;
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(|idx, out| apply(idx, out));

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(|idx, out| apply(idx, out));

    output
}

/// Grey erosion (minimum over the element)
pub fn erode<T>(image: &Array2<T>, element: &StructuringElement) -> Array2<T>
where
    T: Copy + PartialOrd + Send + Sync,
{
    rank_filter(image, element, |a, b| if b < a { b } else { a })
}

/// Grey dilation (maximum over the element)
pub fn dilate<T>(image: &Array2<T>, element: &StructuringElement) -> Array2<T>
where
    T: Copy + PartialOrd + Send + Sync,
{
    rank_filter(image, element, |a, b| if b > a { b } else { a })
}

/// Grey opening
pub fn opening<T>(image: &Array2<T>, element: &StructuringElement) -> Array2<T>
where
    T: Copy + PartialOrd + Send + Sync,
{
    dilate(&erode(image, element), &element.reflected())
}

/// White top-hat: image minus its opening
pub fn white_tophat<T>(image: &Array2<T>, element: &StructuringElement) -> Array2<T>
where
    T: Float + Send + Sync,
{
    let opened = opening(image, element);
    image - &opened
}

/// Sliding-window OR (`dilate`) or AND (`erode`) along one axis.
/// The window covers `before` elements before and `after` elements after.
fn binary_sweep(mask: &BinaryMask, axis: Axis, before: usize, after: usize, dilate: bool) -> BinaryMask {
    let mut output = mask.clone();

    let sweep_lane = |input: ndarray::ArrayView1<bool>, mut out: ndarray::ArrayViewMut1<bool>| {
        let len = input.len();
        // Prefix counts of set pixels
        let mut prefix = vec![0usize; len + 1];
        for (i, &v) in input.iter().enumerate() {
            prefix[i + 1] = prefix[i] + v as usize;
        }
        for i in 0..len {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(len);
            let set = prefix[hi] - prefix[lo];
            out[i] = if dilate { set > 0 } else { set == hi - lo };
        }
    };

    #[cfg(feature = "parallel")]
    Zip::from(mask.lanes(axis))
        .and(output.lanes_mut(axis))
        .par_for_each(sweep_lane);

    #[cfg(not(feature = "parallel"))]
    Zip::from(mask.lanes(axis))
        .and(output.lanes_mut(axis))
        .for_each(sweep_lane);

    output
}

/// Binary dilation with a `height` x `width` rectangle
pub fn binary_dilate_rect(mask: &BinaryMask, height: usize, width: usize) -> BinaryMask {
    let (h0, w0) = (height.saturating_sub(1) / 2, width.saturating_sub(1) / 2);
    let (h1, w1) = (height.saturating_sub(1) - h0, width.saturating_sub(1) - w0);
    let rows_done = binary_sweep(mask, Axis(0), h0, h1, true);
    binary_sweep(&rows_done, Axis(1), w0, w1, true)
}

/// Binary erosion with a `height` x `width` rectangle (reflected origin)
pub fn binary_erode_rect(mask: &BinaryMask, height: usize, width: usize) -> BinaryMask {
    let (h0, w0) = (height.saturating_sub(1) / 2, width.saturating_sub(1) / 2);
    let (h1, w1) = (height.saturating_sub(1) - h0, width.saturating_sub(1) - w0);
    let rows_done = binary_sweep(mask, Axis(0), h1, h0, false);
    binary_sweep(&rows_done, Axis(1), w1, w0, false)
}

/// Binary closing with a `height` x `width` rectangle
pub fn binary_close_rect(mask: &BinaryMask, height: usize, width: usize) -> BinaryMask {
    binary_erode_rect(&binary_dilate_rect(mask, height, width), height, width)
}

/// Value at the given percentile (0..=100) of the finite values in `image`
pub fn percentile<T: Float>(image: &Array2<T>, pct: f64) -> Option<T> {
    let mut values: Vec<T> = image.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pct = pct.clamp(0.0, 100.0);
    let idx = ((pct / 100.0) * (values.len() - 1) as f64).round() as usize;
    Some(values[idx])
}

/// Count of set pixels
pub fn count_set(mask: &BinaryMask) -> usize {
    mask.iter().filter(|&&v| v).count()
}

/// Pixels set in `a` but not in `b`
pub fn and_not(a: &BinaryMask, b: &BinaryMask) -> FieldResult<BinaryMask> {
    if a.dim() != b.dim() {
        return Err(FieldError::ShapeMismatch(format!(
            "Mask shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    let mut out = BinaryMask::from_elem(a.dim(), false);

    #[cfg(feature = "parallel")]
    Zip::from(&mut out).and(a).and(b).par_for_each(|o, &x, &y| *o = x && !y);

    #[cfg(not(feature = "parallel"))]
    Zip::from(&mut out).and(a).and(b).for_each(|o, &x, &y| *o = x && !y);

    Ok(out)
}
