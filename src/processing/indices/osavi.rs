// src/processing/indices/osavi.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Optimized Soil Adjusted Vegetation Index (OSAVI) calculator
pub struct OSAVI {
    nir_index: usize,
    red_index: usize,
    name: String,
}

impl OSAVI {
    pub fn new(nir_index: usize, red_index: usize, name: Option<String>) -> Self {
        Self {
            nir_index,
            red_index,
            name: name.unwrap_or_else(|| "OSAVI".to_string()),
        }
    }
}

impl IndexCalculator for OSAVI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        // Fixed soil adjustment factor for OSAVI
        const L: f32 = 0.16;

        // OSAVI = (NIR - RED) / (NIR + RED + L)
        per_pixel(inputs, &[self.nir_index, self.red_index], &self.name, |v| {
            ratio(v[0] - v[1], v[0] + v[1] + L)
        })
    }

    fn required_bands(&self) -> usize {
        2 // OSAVI requires exactly 2 bands (NIR, RED)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn needs_input_scaling(&self) -> bool {
        true // OSAVI has constant L=0.16 that requires proper reflectance values
    }
}
