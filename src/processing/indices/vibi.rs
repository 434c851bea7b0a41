// src/processing/indices/vibi.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Vegetation Index Built-up Index: NDVI / (NDVI + NDBI)
pub struct VIBI {
    red_index: usize,
    nir_index: usize,
    swir_index: usize,
    name: String,
}

impl VIBI {
    pub fn new(red_index: usize, nir_index: usize, swir_index: usize, name: Option<String>) -> Self {
        Self {
            red_index,
            nir_index,
            swir_index,
            name: name.unwrap_or_else(|| "VIBI".to_string()),
        }
    }
}

impl IndexCalculator for VIBI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        let bands = [self.red_index, self.nir_index, self.swir_index];
        per_pixel(inputs, &bands, &self.name, |v| {
            let (red, nir, swir) = (v[0], v[1], v[2]);
            let ndvi = ratio(nir - red, nir + red)?;
            let ndbi = ratio(swir - nir, swir + nir)?;
            ratio(ndvi, ndvi + ndbi)
        })
    }

    fn required_bands(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        &self.name
    }
}
