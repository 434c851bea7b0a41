// src/processing/indices/pisi.rs
use anyhow::Result;

use super::per_pixel;
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Perpendicular Impervious Surface Index: 0.8192*BLUE - 0.5735*NIR + 0.0750
pub struct PISI {
    blue_index: usize,
    nir_index: usize,
    name: String,
}

impl PISI {
    pub fn new(blue_index: usize, nir_index: usize, name: Option<String>) -> Self {
        Self {
            blue_index,
            nir_index,
            name: name.unwrap_or_else(|| "PISI".to_string()),
        }
    }
}

impl IndexCalculator for PISI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        per_pixel(inputs, &[self.blue_index, self.nir_index], &self.name, |v| {
            Some(0.8192 * v[0] - 0.5735 * v[1] + 0.0750)
        })
    }

    fn required_bands(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn needs_input_scaling(&self) -> bool {
        true // additive offset assumes reflectance
    }
}
