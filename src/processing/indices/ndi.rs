// src/processing/indices/ndi.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Normalized Difference Index (NDI) calculator: (A - B) / (A + B)
///
/// NDBI, NDSoil, NHFD, NSDS, UI, VGNIRBI, VRNIRBI and NRFIr are all NDIs
/// over different Sentinel-2 band pairs, see [`super::IndexKind`].
pub struct NDI {
    band_a_index: usize,
    band_b_index: usize,
    name: String,
}

impl NDI {
    pub fn new(band_a_index: usize, band_b_index: usize, name: Option<String>) -> Self {
        Self {
            band_a_index,
            band_b_index,
            name: name.unwrap_or_else(|| "NDI".to_string()),
        }
    }
}

impl IndexCalculator for NDI {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        per_pixel(inputs, &[self.band_a_index, self.band_b_index], &self.name, |v| {
            ratio(v[0] - v[1], v[0] + v[1])
        })
    }

    fn required_bands(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        &self.name
    }
}
