// src/processing/indices/mod.rs
pub mod band_share;
pub mod ndi;
pub mod ocvi;
pub mod osavi;
pub mod pisi;
pub mod psri;
pub mod vibi;

// Re-export indices
pub use band_share::{BandShare, ShareOf};
pub use ndi::NDI;
pub use ocvi::{DEFAULT_OCVI_EXPONENT, OCVI};
pub use osavi::OSAVI;
pub use pisi::PISI;
pub use psri::PSRI;
pub use vibi::VIBI;

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use gdal::raster::Buffer;
use rayon::prelude::*;

use crate::processing::parallel::{IndexCalculator, NODATA_VALUE_FLOAT};
use crate::utils::gdal_ext::TypedBuffer;

/// Spectral indices of the PUSA toolbox, computed from Sentinel-2 bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexKind {
    /// Generic normalized difference (A-B)/(A+B)
    Ndi,
    /// Normalized Difference Built-up Index
    Ndbi,
    /// Normalized Difference Soil index
    Ndsoil,
    /// Normalized Humidity-Free Difference
    Nhfd,
    /// Normalized SWIR Difference Soil
    Nsds,
    /// Urban Index
    Ui,
    /// Visible Green/NIR Built-up Index
    Vgnirbi,
    /// Visible Red/NIR Built-up Index
    Vrnirbi,
    /// Normalized Red/SWIR2 Index
    Nrfir,
    /// Normalized green
    Normg,
    /// Normalized NIR
    Normnir,
    /// Normalized red
    Normr,
    /// Perpendicular Impervious Surface Index
    Pisi,
    /// Vegetation Index Built-up Index
    Vibi,
    /// Optimized Chlorophyll Vegetation Index
    Ocvi,
    /// Optimized Soil Adjusted Vegetation Index
    Osavi,
    /// Plant Senescence Reflectance Index
    Psri,
}

impl IndexKind {
    /// Case-insensitive lookup by index name, e.g. `"NDSoil"`
    pub fn by_name(name: &str) -> Option<Self> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|kind| kind.label().eq_ignore_ascii_case(name))
    }

    pub fn label(self) -> &'static str {
        match self {
            IndexKind::Ndi => "NDI",
            IndexKind::Ndbi => "NDBI",
            IndexKind::Ndsoil => "NDSoil",
            IndexKind::Nhfd => "NHFD",
            IndexKind::Nsds => "NSDS",
            IndexKind::Ui => "UI",
            IndexKind::Vgnirbi => "VGNIRBI",
            IndexKind::Vrnirbi => "VRNIRBI",
            IndexKind::Nrfir => "NRFIr",
            IndexKind::Normg => "NormG",
            IndexKind::Normnir => "NormNIR",
            IndexKind::Normr => "NormR",
            IndexKind::Pisi => "PISI",
            IndexKind::Vibi => "VIBI",
            IndexKind::Ocvi => "OCVI",
            IndexKind::Osavi => "OSAVI",
            IndexKind::Psri => "PSRI",
        }
    }

    /// Input bands in the order they must be supplied
    pub fn bands(self) -> &'static [&'static str] {
        match self {
            IndexKind::Ndi => &["A", "B"],
            IndexKind::Ndbi => &["B11", "B8"],
            IndexKind::Ndsoil => &["B12", "B3"],
            IndexKind::Nhfd => &["B5", "B1"],
            IndexKind::Nsds => &["B11", "B12"],
            IndexKind::Ui => &["B12", "B8"],
            IndexKind::Vgnirbi => &["B3", "B8"],
            IndexKind::Vrnirbi => &["B4", "B8"],
            IndexKind::Nrfir => &["B4", "B12"],
            IndexKind::Normg | IndexKind::Normnir | IndexKind::Normr => &["B3", "B4", "B8"],
            IndexKind::Pisi => &["B2", "B8"],
            IndexKind::Vibi => &["B4", "B8", "B11"],
            IndexKind::Ocvi => &["B3", "B4", "B8"],
            IndexKind::Osavi => &["B8", "B4"],
            IndexKind::Psri => &["B2", "B4", "B6"],
        }
    }

    pub fn calculator(self, ocvi_exponent: f32) -> Box<dyn IndexCalculator> {
        let name = Some(self.label().to_string());
        match self {
            IndexKind::Ndi
            | IndexKind::Ndbi
            | IndexKind::Ndsoil
            | IndexKind::Nhfd
            | IndexKind::Nsds
            | IndexKind::Ui
            | IndexKind::Vgnirbi
            | IndexKind::Vrnirbi
            | IndexKind::Nrfir => Box::new(NDI::new(0, 1, name)),
            IndexKind::Normg => Box::new(BandShare::new(0, 1, 2, ShareOf::Green, name)),
            IndexKind::Normr => Box::new(BandShare::new(0, 1, 2, ShareOf::Red, name)),
            IndexKind::Normnir => Box::new(BandShare::new(0, 1, 2, ShareOf::Nir, name)),
            IndexKind::Pisi => Box::new(PISI::new(0, 1, name)),
            IndexKind::Vibi => Box::new(VIBI::new(0, 1, 2, name)),
            IndexKind::Ocvi => Box::new(OCVI::new(0, 1, 2, ocvi_exponent, name)),
            IndexKind::Osavi => Box::new(OSAVI::new(0, 1, name)),
            IndexKind::Psri => Box::new(PSRI::new(0, 1, 2, name)),
        }
    }
}

/// Division that yields no value for a zero denominator
pub(crate) fn ratio(numerator: f32, denominator: f32) -> Option<f32> {
    (denominator != 0.0).then(|| numerator / denominator)
}

/// Apply `formula` to every pixel of the selected bands in parallel.
///
/// Pixels where any selected band is nodata, or where the formula returns
/// `None` or a non-finite value, are written as nodata.
pub(crate) fn per_pixel<F>(
    inputs: &[TypedBuffer],
    band_indices: &[usize],
    name: &str,
    formula: F,
) -> Result<TypedBuffer>
where
    F: Fn(&[f32]) -> Option<f32> + Sync,
{
    let bands = band_indices
        .iter()
        .map(|&i| {
            inputs
                .get(i)
                .and_then(TypedBuffer::as_f32)
                .ok_or_else(|| anyhow!("{}: missing float32 input band {}", name, i))
        })
        .collect::<Result<Vec<&Buffer<f32>>>>()?;

    let shape = bands
        .first()
        .map(|b| b.shape())
        .ok_or_else(|| anyhow!("{}: no input bands selected", name))?;
    if let Some(band) = bands.iter().find(|b| b.shape() != shape) {
        return Err(anyhow!(
            "{}: input bands differ in size: {:?} vs {:?}",
            name,
            shape,
            band.shape()
        ));
    }

    let mut result_data = vec![0.0f32; shape.0 * shape.1];
    result_data.par_iter_mut().enumerate().for_each_init(
        || Vec::with_capacity(bands.len()),
        |values, (i, result)| {
            values.clear();
            values.extend(bands.iter().map(|b| b.data()[i]));

            *result = if values.iter().any(|&v| v == NODATA_VALUE_FLOAT) {
                NODATA_VALUE_FLOAT
            } else {
                formula(values.as_slice())
                    .filter(|v| v.is_finite())
                    .unwrap_or(NODATA_VALUE_FLOAT)
            };
        },
    );

    Ok(TypedBuffer::F32(Buffer::new(shape, result_data)))
}
