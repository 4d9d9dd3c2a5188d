//! Field/background segmentation of the composite index and the
//! between-fields gap mask.

use crate::core::morphology::{
    and_not, binary_close_rect, count_set, percentile, white_tophat, StructuringElement,
};
use crate::core::temporal::CompositeIndex;
use crate::types::{BinaryMask, FieldError, FieldResult, LabelImage, BACKGROUND};
use serde::{Deserialize, Serialize};

/// Threshold applied to the enhanced composite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Cutoff {
    /// Absolute value in composite units
    Fixed(f32),
    /// Percentile (0..=100) of the enhanced image
    Percentile(f64),
}

/// Field mask parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskParams {
    /// Disk radius of the top-hat enhancement; `None` skips it
    pub tophat_radius: Option<usize>,
    pub cutoff: Cutoff,
    /// Side of the square element approximating the cultivated area
    pub closing_size: usize,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            tophat_radius: Some(14),
            // Two steps of the 16-bit composite encoding
            cutoff: Cutoff::Fixed(2.0 / u16::MAX as f32),
            closing_size: 50,
        }
    }
}

/// Turns a composite index into field and between-fields masks
pub struct FieldMaskBuilder {
    params: MaskParams,
}

impl FieldMaskBuilder {
    pub fn new(params: MaskParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(MaskParams::default())
    }

    pub fn params(&self) -> &MaskParams {
        &self.params
    }

    /// Local-contrast enhancement followed by the cutoff: pixels at or
    /// above the cutoff become field (1), everything else background.
    ///
    /// The top-hat only sees the vegetated half of the composite: negative
    /// values are clipped to zero first, so texture in bare background never
    /// reaches the cutoff.
    pub fn threshold(&self, composite: &CompositeIndex) -> FieldResult<LabelImage> {
        let enhanced = match self.params.tophat_radius {
            Some(radius) => {
                log::info!("Applying top-hat enhancement, disk radius {}", radius);
                let vegetated = composite.values.mapv(|v| v.max(0.0));
                white_tophat(&vegetated, &StructuringElement::disk(radius))
            }
            None => composite.values.clone(),
        };

        let cutoff = match self.params.cutoff {
            Cutoff::Fixed(value) => value,
            Cutoff::Percentile(pct) => percentile(&enhanced, pct).ok_or_else(|| {
                FieldError::Processing("Cannot take a percentile of an empty image".to_string())
            })?,
        };

        let mask: LabelImage = enhanced.mapv(|v| if v >= cutoff { 1 } else { BACKGROUND });
        let field_pixels = mask.iter().filter(|&&v| v != BACKGROUND).count();
        log::info!(
            "Threshold {:.6}: {} of {} pixels are field",
            cutoff,
            field_pixels,
            mask.len()
        );
        Ok(mask)
    }

    /// Gaps inside the cultivated area: the closing of the field mask minus
    /// the field mask itself
    pub fn between_fields(&self, field_mask: &LabelImage) -> FieldResult<BinaryMask> {
        let size = self.params.closing_size;
        if size == 0 {
            return Err(FieldError::Config("Closing size must be positive".to_string()));
        }
        let fields: BinaryMask = field_mask.mapv(|v| v != BACKGROUND);
        let cultivated = binary_close_rect(&fields, size, size);
        let between = and_not(&cultivated, &fields)?;
        log::debug!(
            "Between-fields mask: {} pixels ({}x{} closing)",
            count_set(&between),
            size,
            size
        );
        Ok(between)
    }
}
