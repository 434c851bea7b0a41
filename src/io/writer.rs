// src/io/writer.rs
use anyhow::{anyhow, Result};
use gdal::raster::{Buffer, RasterCreationOptions};
use gdal::{Dataset, DriverManager, DriverType, Metadata};

use super::reader::GeoInfo;
use crate::processing::parallel::NODATA_VALUE_FLOAT;
use crate::utils::fixed_point::{to_fixed_point, NODATA_VALUE_INT};
use crate::utils::gdal_ext::TypedBuffer;

/// Pixel encoding of the output band
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputEncoding {
    Float32,
    /// int16 holding `value * scale_factor`
    FixedPoint { scale_factor: i32 },
}

/// How the output raster is created
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub encoding: OutputEncoding,
    pub compress: String,
    pub compress_level: u8,
    pub tiled: bool,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            encoding: OutputEncoding::Float32,
            compress: "DEFLATE".to_string(),
            compress_level: 6,
            tiled: true,
        }
    }
}

impl OutputSpec {
    pub fn from_flags(
        use_float: bool,
        scale_factor: i32,
        compress: &str,
        compress_level: u8,
        tiled: bool,
    ) -> Self {
        let encoding = if use_float {
            OutputEncoding::Float32
        } else {
            OutputEncoding::FixedPoint { scale_factor }
        };
        Self {
            encoding,
            compress: compress.to_string(),
            compress_level,
            tiled,
        }
    }

    /// Same settings with float32 pixels. Model outputs are unbounded
    /// physical quantities and are never written as fixed-point.
    pub fn float32(self) -> Self {
        Self {
            encoding: OutputEncoding::Float32,
            ..self
        }
    }

    /// GDAL creation options for this spec
    pub fn creation_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        let compress = self.compress.to_uppercase();

        // Add compression if not NONE
        if compress != "NONE" {
            options.push(format!("COMPRESS={}", compress));

            // Add compression level for supported algorithms
            match compress.as_str() {
                "DEFLATE" => options.push(format!("ZLEVEL={}", self.compress_level.min(9))),
                "ZSTD" => options.push(format!("ZSTD_LEVEL={}", self.compress_level.min(22))),
                _ => {}
            }
        }

        if self.tiled {
            options.push("TILED=YES".to_string());
        }

        // Always use multi-threading
        options.push("NUM_THREADS=ALL_CPUS".to_string());
        options
    }
}

/// Create the single-band output raster, georeferenced like the input
pub fn create_output(
    output_path: &str,
    geo_info: &GeoInfo,
    spec: &OutputSpec,
    band_name: &str,
) -> Result<Dataset> {
    let driver = DriverManager::get_output_driver_for_dataset_name(output_path, DriverType::Raster)
        .ok_or_else(|| anyhow!("unknown output format for {}", output_path))?;
    let creation_options = RasterCreationOptions::from_iter(spec.creation_options());

    let mut output = match spec.encoding {
        OutputEncoding::FixedPoint { .. } => driver.create_with_band_type_with_options::<i16, _>(
            output_path,
            geo_info.width,
            geo_info.height,
            1,
            &creation_options,
        )?,
        OutputEncoding::Float32 => driver.create_with_band_type_with_options::<f32, _>(
            output_path,
            geo_info.width,
            geo_info.height,
            1,
            &creation_options,
        )?,
    };

    output.set_projection(&geo_info.projection)?;
    if let Some(geo_transform) = &geo_info.geo_transform {
        output.set_geo_transform(geo_transform)?;
    }

    {
        let mut band = output.rasterband(1)?;
        match spec.encoding {
            OutputEncoding::FixedPoint { scale_factor } => {
                band.set_no_data_value(Some(NODATA_VALUE_INT as f64))?;
                band.set_metadata_item("SCALE", &format!("{}", 1.0 / scale_factor as f64), "")?;
                band.set_metadata_item("OFFSET", "0", "")?;
                band.set_description(&format!("{} (scaled by {})", band_name, scale_factor))?;
            }
            OutputEncoding::Float32 => {
                band.set_no_data_value(Some(NODATA_VALUE_FLOAT as f64))?;
                band.set_description(band_name)?;
            }
        }
    }

    Ok(output)
}

/// Write a float result block at `offset`, encoding it as configured
pub fn write_block(
    output: &Dataset,
    offset: (isize, isize),
    result: &TypedBuffer,
    spec: &OutputSpec,
) -> Result<()> {
    let data = result
        .as_f32()
        .ok_or_else(|| anyhow!("expected a float32 result block"))?;
    let shape = data.shape();
    let encoded = match spec.encoding {
        OutputEncoding::FixedPoint { scale_factor } => TypedBuffer::I16(Buffer::new(
            shape,
            to_fixed_point(data.data(), scale_factor, NODATA_VALUE_INT),
        )),
        OutputEncoding::Float32 => TypedBuffer::F32(Buffer::new(shape, data.data().to_vec())),
    };

    let mut band = output.rasterband(1)?;
    match encoded {
        TypedBuffer::I16(mut buffer) => band.write(offset, shape, &mut buffer)?,
        TypedBuffer::F32(mut buffer) => band.write(offset, shape, &mut buffer)?,
    }
    Ok(())
}
