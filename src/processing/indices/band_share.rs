// src/processing/indices/band_share.rs
use anyhow::Result;

use super::{per_pixel, ratio};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Which band is put over the visible/NIR sum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOf {
    Green,
    Red,
    Nir,
}

/// Normalised band share: X / (NIR + GREEN + RED) (NormG, NormR, NormNIR)
pub struct BandShare {
    green_index: usize,
    red_index: usize,
    nir_index: usize,
    share_of: ShareOf,
    name: String,
}

impl BandShare {
    pub fn new(
        green_index: usize,
        red_index: usize,
        nir_index: usize,
        share_of: ShareOf,
        name: Option<String>,
    ) -> Self {
        let default_name = match share_of {
            ShareOf::Green => "NormG",
            ShareOf::Red => "NormR",
            ShareOf::Nir => "NormNIR",
        };
        Self {
            green_index,
            red_index,
            nir_index,
            share_of,
            name: name.unwrap_or_else(|| default_name.to_string()),
        }
    }
}

impl IndexCalculator for BandShare {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        let bands = [self.green_index, self.red_index, self.nir_index];
        let share_of = self.share_of;
        per_pixel(inputs, &bands, &self.name, |v| {
            let (g, r, n) = (v[0], v[1], v[2]);
            let numerator = match share_of {
                ShareOf::Green => g,
                ShareOf::Red => r,
                ShareOf::Nir => n,
            };
            ratio(numerator, n + g + r)
        })
    }

    fn required_bands(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        &self.name
    }
}
