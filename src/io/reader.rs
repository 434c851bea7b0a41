// src/io/reader.rs
use anyhow::{anyhow, Context, Result};
use gdal::raster::Buffer;
use gdal::Dataset;
use std::path::Path;
use tracing::debug;

use crate::processing::parallel::NODATA_VALUE_FLOAT;
use crate::utils::gdal_ext::TypedBuffer;

/// Georeferencing copied from the first input onto the output
#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub projection: String,
    pub geo_transform: Option<[f64; 6]>,
    pub width: usize,
    pub height: usize,
}

impl GeoInfo {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let (width, height) = dataset.raster_size();
        Self {
            projection: dataset.projection(),
            geo_transform: dataset.geo_transform().ok(),
            width,
            height,
        }
    }
}

/// Replace NaN and the band's own nodata value with the pipeline's nodata value
pub fn mask_nodata(buffer: &mut Buffer<f32>, nodata: Option<f64>) {
    for value in buffer.data_mut() {
        if value.is_nan() || nodata == Some(*value as f64) {
            *value = NODATA_VALUE_FLOAT;
        }
    }
}

/// Read band 1 of every input whole. All inputs must share one size.
pub fn read_bands<P: AsRef<Path>>(paths: &[P]) -> Result<(Vec<TypedBuffer>, GeoInfo)> {
    let first = paths.first().ok_or_else(|| anyhow!("no input bands given"))?;
    let first_ds = Dataset::open(first.as_ref())
        .with_context(|| format!("failed to open {}", first.as_ref().display()))?;
    let geo_info = GeoInfo::from_dataset(&first_ds);
    let size = (geo_info.width, geo_info.height);

    let mut bands = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if dataset.raster_size() != size {
            return Err(anyhow!(
                "{} is {:?} pixels, expected {:?}",
                path.display(),
                dataset.raster_size(),
                size
            ));
        }

        let band = dataset.rasterband(1)?;
        let mut buffer = band.read_as::<f32>((0, 0), size, size, None)?;
        mask_nodata(&mut buffer, band.no_data_value());
        debug!(path = %path.display(), width = size.0, height = size.1, "band read");
        bands.push(TypedBuffer::F32(buffer));
    }

    Ok((bands, geo_info))
}
