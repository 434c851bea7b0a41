//! Posterior-mean evaluation of the GPR models over raster pixels.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use gdal::raster::Buffer;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use tracing::debug;

use super::store::{Kernel, ModelParameterSet};
use crate::error::{ModelError, ModelResult};
use crate::processing::parallel::{IndexCalculator, NODATA_VALUE_FLOAT};
use crate::utils::gdal_ext::TypedBuffer;

/// Smallest value a prediction may take; the retrieved quantities are
/// physically non-negative. Nodata pixels are the exception and stay at
/// the nodata value `-999`.
pub const PREDICTION_FLOOR: f64 = 1e-5;

/// Evaluates one model's posterior mean per pixel.
///
/// With normalised features `n = (x - mx) / sx` and weighted features
/// `w = n * hyp_ell`, the prediction is
///
/// ```text
/// hyp_sig * exp(-0.5 * w.n) * sum_i alpha_i * exp(X_i.w - 0.5 * XDX_i) + mean_model
/// ```
///
/// floored at [`PREDICTION_FLOOR`]. The unweighted kernel uses `w = n`, no
/// self term and unit scale.
#[derive(Debug, Clone)]
pub struct GaussianProcessPredictor {
    params: Arc<ModelParameterSet>,
}

impl GaussianProcessPredictor {
    pub fn new(params: Arc<ModelParameterSet>) -> ModelResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ModelParameterSet {
        &self.params
    }

    /// Output band name (`CWC`, `CCC` or `LAI`).
    pub fn band_name(&self) -> &'static str {
        self.params.model.band_name()
    }

    /// Predict every row of `features` (pixels x bands).
    pub fn predict(&self, features: ArrayView2<f64>) -> ModelResult<Array1<f64>> {
        let bands = features.ncols();
        if bands != self.params.n_features() {
            return Err(ModelError::DimensionMismatch {
                model: self.params.model,
                detail: format!(
                    "raster has {} bands but the model expects {}",
                    bands,
                    self.params.n_features()
                ),
            });
        }

        let mut out = Array1::zeros(features.nrows());
        Zip::from(&mut out)
            .and(features.rows())
            .par_for_each(|value, pixel| *value = self.predict_pixel(pixel));
        Ok(out)
    }

    /// Posterior mean for a single feature vector. Pixels holding nodata or
    /// non-finite values yield nodata.
    pub fn predict_pixel(&self, pixel: ArrayView1<f64>) -> f64 {
        let nodata = NODATA_VALUE_FLOAT as f64;
        if pixel.iter().any(|&v| !v.is_finite() || v == nodata) {
            return nodata;
        }

        let p = &*self.params;
        let normalized = (&pixel - &p.mx) / &p.sx;
        let (weighted, self_term, signal) = match &p.kernel {
            Kernel::Weighted { hyp_ell, hyp_sig } => {
                let weighted = &normalized * hyp_ell;
                let q = -0.5 * weighted.dot(&normalized);
                (weighted, q, *hyp_sig)
            }
            Kernel::Unweighted => (normalized, 0.0, 1.0),
        };

        // exp(q) is folded into every kernel term so large exponents cancel
        let cross = p.x_train.dot(&weighted);
        let sum = Zip::from(&cross)
            .and(&p.xdx_pre_calc)
            .and(&p.alpha)
            .fold(0.0, |acc, &c, &xdx, &a| {
                acc + a * (self_term + c - 0.5 * xdx).exp()
            });

        let mean = signal * sum + p.mean_model;
        if mean.is_nan() {
            nodata
        } else if mean < PREDICTION_FLOOR {
            PREDICTION_FLOOR
        } else {
            mean
        }
    }
}

impl IndexCalculator for GaussianProcessPredictor {
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer> {
        let bands: Vec<&Buffer<f32>> = inputs
            .iter()
            .map(|input| {
                input
                    .as_f32()
                    .ok_or_else(|| anyhow!("{} expects float32 input bands", self.band_name()))
            })
            .collect::<Result<_>>()?;

        let shape = bands
            .first()
            .map(|b| b.shape())
            .ok_or_else(|| anyhow!("no input bands"))?;
        if let Some(b) = bands.iter().find(|b| b.shape() != shape) {
            return Err(anyhow!(
                "input bands differ in size: {:?} vs {:?}",
                shape,
                b.shape()
            ));
        }

        let pixels = shape.0 * shape.1;
        let features = Array2::from_shape_fn((pixels, bands.len()), |(p, b)| {
            bands[b].data()[p] as f64
        });
        debug!(model = %self.params.model, pixels, bands = bands.len(), "evaluating GPR block");

        let predicted = self.predict(features.view())?;
        let data: Vec<f32> = predicted.iter().map(|&v| v as f32).collect();
        Ok(TypedBuffer::F32(Buffer::new(shape, data)))
    }

    fn required_bands(&self) -> usize {
        self.params.n_features()
    }

    fn name(&self) -> &str {
        self.band_name()
    }

    fn needs_input_scaling(&self) -> bool {
        true // trained on surface reflectance
    }
}
