// src/processing/indices/ocvi.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

pub const DEFAULT_OCVI_EXPONENT: f32 = 1.16;

/// Optimized Chlorophyll Vegetation Index: (NIR / GREEN) * (RED / GREEN)^c
pub struct OCVI {
    green_index: usize,
    red_index: usize,
    nir_index: usize,
    exponent: f32,
    name: String,
}

impl OCVI {
    pub fn new(
        green_index: usize,
        red_index: usize,
        nir_index: usize,
        exponent: f32,
        name: Option<String>,
    ) -> Self {
        Self {
            green_index,
            red_index,
            nir_index,
            exponent,
            name: name.unwrap_or_else(|| "OCVI".to_string()),
        }
    }
}

impl IndexCalculator for OCVI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        let bands = [self.green_index, self.red_index, self.nir_index];
        let c = self.exponent;
        per_pixel(inputs, &bands, &self.name, |v| {
            let (green, red, nir) = (v[0], v[1], v[2]);
            Some(ratio(nir, green)? * ratio(red, green)?.powf(c))
        })
    }

    fn required_bands(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        &self.name
    }
}
