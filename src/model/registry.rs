use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::predictor::GaussianProcessPredictor;
use super::store::{ModelId, ModelParameterStore};
use crate::error::{ModelError, ModelResult};
use crate::processing::parallel::IndexCalculator;
use crate::utils::gdal_ext::TypedBuffer;

/// Entry point for biophysical parameter retrieval.
///
/// Holds the current [`ModelParameterStore`]. Loading a new source builds a
/// complete store first and then swaps it in, so a prediction always sees
/// one consistent set of parameters.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    store: RwLock<Option<Arc<ModelParameterStore>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` and replace any previously loaded parameters.
    pub fn initialize(&self, source: &str) -> Arc<ModelParameterStore> {
        let store = Arc::new(ModelParameterStore::from_source(source));

        let diagnostics = store.diagnostics().count();
        if diagnostics > 0 {
            warn!(diagnostics, "some model parameters could not be parsed");
        }
        for model in ModelId::ALL {
            if let Err(e) = store.parameter_set(model) {
                warn!(%model, error = %e, "model unavailable");
            }
        }
        info!(variables = store.len(), "model parameters loaded");

        *self.store.write() = Some(Arc::clone(&store));
        store
    }

    pub fn initialize_from_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> ModelResult<Arc<ModelParameterStore>> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.initialize(&source))
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read().is_some()
    }

    /// Snapshot of the current store.
    pub fn store(&self) -> ModelResult<Arc<ModelParameterStore>> {
        self.store
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(ModelError::NotInitialized)
    }

    /// Predictor for a request name (`Cw`, `Ccc`, anything else is LAI).
    pub fn predictor(&self, parameter: &str) -> ModelResult<GaussianProcessPredictor> {
        let model = ModelId::from_request(parameter);
        let params = self.store()?.parameter_set(model)?;
        GaussianProcessPredictor::new(params)
    }

    /// Predict `parameter` over a stack of input bands.
    pub fn predict(&self, parameter: &str, bands: &[TypedBuffer]) -> anyhow::Result<TypedBuffer> {
        let predictor = self.predictor(parameter)?;
        predictor.calculate(bands)
    }
}
