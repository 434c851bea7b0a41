// src/processing/indices/psri.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Plant Senescence Reflectance Index: (RED - BLUE) / RED-EDGE 2
pub struct PSRI {
    blue_index: usize,
    red_index: usize,
    red_edge_index: usize,
    name: String,
}

impl PSRI {
    pub fn new(blue_index: usize, red_index: usize, red_edge_index: usize, name: Option<String>) -> Self {
        Self {
            blue_index,
            red_index,
            red_edge_index,
            name: name.unwrap_or_else(|| "PSRI".to_string()),
        }
    }
}

impl IndexCalculator for PSRI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        let bands = [self.blue_index, self.red_index, self.red_edge_index];
        per_pixel(inputs, &bands, &self.name, |v| ratio(v[1] - v[0], v[2]))
    }

    fn required_bands(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        &self.name
    }
}
