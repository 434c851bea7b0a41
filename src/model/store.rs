//! Typed storage for the parameters of the GPR retrieval models.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use super::parser::{parse_declarations, Diagnostic, Literal, ParsedValue};
use crate::error::{ModelError, ModelResult};

/// Parameter names shared by every model; the script suffixes them with the
/// model id (`X_train_Cw`, `alpha_coefficients_GREEN`, ...).
pub const PARAMETER_NAMES: [&str; 9] = [
    "X_train",
    "mx",
    "sx",
    "mean_model",
    "hyp_ell",
    "hyp_sign",
    "hyp_sig",
    "XDX_pre_calc",
    "alpha_coefficients",
];

/// The three retrieval models embedded in the legacy script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelId {
    /// Canopy water content
    Cw,
    /// Canopy chlorophyll content
    Ccc,
    /// Green leaf area index
    Green,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [ModelId::Cw, ModelId::Ccc, ModelId::Green];

    /// Resolve a request name. `Cw` and `Ccc` select their models, anything
    /// else falls through to leaf area index.
    pub fn from_request(name: &str) -> Self {
        match name {
            "Cw" => ModelId::Cw,
            "Ccc" => ModelId::Ccc,
            _ => ModelId::Green,
        }
    }

    /// Variable suffix used in the script.
    pub fn suffix(self) -> &'static str {
        match self {
            ModelId::Cw => "Cw",
            ModelId::Ccc => "CCC",
            ModelId::Green => "GREEN",
        }
    }

    /// Name of the band the model produces.
    pub fn band_name(self) -> &'static str {
        match self {
            ModelId::Cw => "CWC",
            ModelId::Ccc => "CCC",
            ModelId::Green => "LAI",
        }
    }

    pub fn variable(self, name: &str) -> String {
        format!("{}_{}", name, self.suffix())
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Every variable name the store looks for in a model source.
pub fn target_variables() -> Vec<String> {
    ModelId::ALL
        .iter()
        .flat_map(|model| PARAMETER_NAMES.iter().map(move |name| model.variable(name)))
        .collect()
}

/// A parsed value converted to its numeric shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Matrix(Array2<f64>),
    Vector(Array1<f64>),
    Scalar(f64),
    Invalid(Diagnostic),
}

impl Tensor {
    /// Nested lists become matrices, flat lists vectors, bare numbers
    /// scalars. Ragged or non-numeric data is kept as [`Tensor::Invalid`].
    pub fn from_parsed(value: &ParsedValue) -> Self {
        let literal = match value {
            Ok(literal) => literal,
            Err(diag) => return Tensor::Invalid(diag.clone()),
        };

        match literal {
            Literal::Number(x) => Tensor::Scalar(*x),
            Literal::List(items) if items.iter().any(|i| matches!(i, Literal::List(_))) => {
                matrix_from_rows(items)
            }
            Literal::List(items) => match numbers(items) {
                Some(values) => Tensor::Vector(Array1::from(values)),
                None => invalid(literal, "list contains non-numeric entries"),
            },
            Literal::Other(_) => invalid(literal, "expected a number or a numeric list"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Tensor::Matrix(_) => "matrix",
            Tensor::Vector(_) => "vector",
            Tensor::Scalar(_) => "scalar",
            Tensor::Invalid(_) => "invalid",
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Tensor::Matrix(m) => m.shape().to_vec(),
            Tensor::Vector(v) => vec![v.len()],
            Tensor::Scalar(_) | Tensor::Invalid(_) => vec![],
        }
    }
}

fn numbers(items: &[Literal]) -> Option<Vec<f64>> {
    items.iter().map(Literal::as_number).collect()
}

fn invalid(literal: &Literal, error: &str) -> Tensor {
    Tensor::Invalid(Diagnostic {
        raw: format!("{:?}", literal),
        error: error.to_string(),
    })
}

fn matrix_from_rows(rows: &[Literal]) -> Tensor {
    let parsed: Option<Vec<Vec<f64>>> = rows
        .iter()
        .map(|row| row.as_list().and_then(numbers))
        .collect();
    let Some(parsed) = parsed else {
        return Tensor::Invalid(Diagnostic {
            raw: format!("{} rows", rows.len()),
            error: "matrix rows must be lists of numbers".to_string(),
        });
    };

    let cols = parsed.first().map_or(0, Vec::len);
    if let Some(bad) = parsed.iter().position(|row| row.len() != cols) {
        return Tensor::Invalid(Diagnostic {
            raw: format!("{} rows", parsed.len()),
            error: format!(
                "ragged matrix: row {} has {} columns, expected {}",
                bad,
                parsed[bad].len(),
                cols
            ),
        });
    }

    let rows = parsed.len();
    let flat: Vec<f64> = parsed.into_iter().flatten().collect();
    match Array2::from_shape_vec((rows, cols), flat) {
        Ok(m) => Tensor::Matrix(m),
        Err(e) => Tensor::Invalid(Diagnostic {
            raw: format!("{}x{}", rows, cols),
            error: e.to_string(),
        }),
    }
}

/// Kernel weighting used by a model.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// Per-feature length-scale weights and signal variance.
    Weighted { hyp_ell: Array1<f64>, hyp_sig: f64 },
    /// Unit weights, unit scale and no self term. The green LAI model in the
    /// legacy script ships without hyperparameters and is evaluated this way.
    Unweighted,
}

/// Everything needed to evaluate one GPR model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameterSet {
    pub model: ModelId,
    /// Training points x features.
    pub x_train: Array2<f64>,
    pub mx: Array1<f64>,
    pub sx: Array1<f64>,
    pub kernel: Kernel,
    /// Noise variance. Not used for the posterior mean.
    pub hyp_sign: Option<f64>,
    pub xdx_pre_calc: Array1<f64>,
    pub alpha: Array1<f64>,
    pub mean_model: f64,
}

impl ModelParameterSet {
    pub fn n_training(&self) -> usize {
        self.x_train.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x_train.ncols()
    }

    /// Check that all parameters agree with the shape of `x_train`.
    pub fn validate(&self) -> ModelResult<()> {
        let model = self.model;
        if self.x_train.is_empty() {
            return Err(ModelError::NotInitialized);
        }

        let (n_train, n_feat) = self.x_train.dim();
        let mismatch = |detail: String| ModelError::DimensionMismatch { model, detail };

        if self.alpha.len() != n_train {
            return Err(mismatch(format!(
                "X_train has {} rows but alpha_coefficients has {} entries",
                n_train,
                self.alpha.len()
            )));
        }
        if self.xdx_pre_calc.len() != n_train {
            return Err(mismatch(format!(
                "X_train has {} rows but XDX_pre_calc has {} entries",
                n_train,
                self.xdx_pre_calc.len()
            )));
        }

        let mut per_feature = vec![("mx", self.mx.len()), ("sx", self.sx.len())];
        if let Kernel::Weighted { hyp_ell, .. } = &self.kernel {
            per_feature.push(("hyp_ell", hyp_ell.len()));
        }
        for (name, len) in per_feature {
            if len != n_feat {
                return Err(mismatch(format!(
                    "X_train has {} features but {} has {} entries",
                    n_feat, name, len
                )));
            }
        }

        if self.sx.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(ModelError::InvalidParameter {
                name: model.variable("sx"),
                model,
                reason: "scale factors must be finite and non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Immutable collection of parsed parameters for all models.
#[derive(Debug, Default)]
pub struct ModelParameterStore {
    tensors: HashMap<String, Tensor>,
    sets: HashMap<ModelId, ModelResult<Arc<ModelParameterSet>>>,
}

impl ModelParameterStore {
    /// Parse a model source and build the parameter sets of every model.
    pub fn from_source(text: &str) -> Self {
        Self::from_parsed(parse_declarations(text, target_variables()))
    }

    pub fn from_parsed(values: BTreeMap<String, ParsedValue>) -> Self {
        let tensors: HashMap<String, Tensor> = values
            .iter()
            .map(|(name, value)| (name.clone(), Tensor::from_parsed(value)))
            .collect();

        for (name, tensor) in &tensors {
            match tensor {
                Tensor::Invalid(diag) => warn!(%name, %diag, "model parameter kept as diagnostic"),
                _ => debug!(%name, kind = tensor.kind(), shape = ?tensor.shape(), "model parameter loaded"),
            }
        }

        let mut store = Self {
            tensors,
            sets: HashMap::new(),
        };
        let sets: HashMap<_, _> = ModelId::ALL
            .iter()
            .map(|&model| (model, store.build_set(model).map(Arc::new)))
            .collect();
        store.sets = sets;
        store
    }

    /// Look up a parameter by its unsuffixed name, e.g. `get("X_train", ModelId::Cw)`.
    pub fn get(&self, name: &str, model: ModelId) -> ModelResult<&Tensor> {
        match self.tensors.get(&model.variable(name)) {
            None => Err(ModelError::NotFound {
                name: name.to_string(),
                model,
            }),
            Some(Tensor::Invalid(diag)) => Err(ModelError::Malformed {
                name: name.to_string(),
                model,
                reason: diag.to_string(),
            }),
            Some(tensor) => Ok(tensor),
        }
    }

    /// The validated parameter set of `model`, or the reason it is unusable.
    pub fn parameter_set(&self, model: ModelId) -> ModelResult<Arc<ModelParameterSet>> {
        self.sets
            .get(&model)
            .cloned()
            .unwrap_or(Err(ModelError::NotInitialized))
    }

    /// Variables that were declared but could not be parsed.
    pub fn diagnostics(&self) -> impl Iterator<Item = (&str, &Diagnostic)> {
        self.tensors.iter().filter_map(|(name, tensor)| match tensor {
            Tensor::Invalid(diag) => Some((name.as_str(), diag)),
            _ => None,
        })
    }

    /// All variables found in the source, sorted by name.
    pub fn variables(&self) -> Vec<(&str, &Tensor)> {
        let mut vars: Vec<_> = self
            .tensors
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));
        vars
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    fn build_set(&self, model: ModelId) -> ModelResult<ModelParameterSet> {
        let x_train = self.matrix("X_train", model)?;
        let n_feat = x_train.ncols();

        // The green model falls back to the water content normalisation,
        // one statistic at a time
        let stats_model = |name: &str| match model {
            ModelId::Green if !self.has(name, model) => ModelId::Cw,
            _ => model,
        };
        let mx = self.vector("mx", stats_model("mx"), n_feat)?;
        let sx = self.vector("sx", stats_model("sx"), n_feat)?;

        let kernel = match (model, self.has("hyp_ell", model), self.has("hyp_sig", model)) {
            (ModelId::Green, false, false) => Kernel::Unweighted,
            (ModelId::Green, ell, sig) if ell != sig => {
                let declared = if ell { "hyp_ell" } else { "hyp_sig" };
                warn!(%model, declared, "partial kernel hyperparameters ignored, using unweighted kernel");
                Kernel::Unweighted
            }
            _ => Kernel::Weighted {
                hyp_ell: self.vector("hyp_ell", model, n_feat)?,
                hyp_sig: self.scalar("hyp_sig", model)?,
            },
        };

        // Noise variance does not enter the posterior mean
        let hyp_sign = match self.scalar("hyp_sign", model) {
            Ok(value) => Some(value),
            Err(ModelError::NotFound { .. }) => None,
            Err(e) => {
                warn!(%model, error = %e, "hyp_sign unusable, ignored");
                None
            }
        };

        let set = ModelParameterSet {
            model,
            xdx_pre_calc: self.vector("XDX_pre_calc", model, x_train.nrows())?,
            alpha: self.vector("alpha_coefficients", model, x_train.nrows())?,
            mean_model: self.scalar("mean_model", model)?,
            x_train,
            mx,
            sx,
            kernel,
            hyp_sign,
        };
        set.validate()?;
        Ok(set)
    }

    fn has(&self, name: &str, model: ModelId) -> bool {
        self.tensors.contains_key(&model.variable(name))
    }

    fn matrix(&self, name: &str, model: ModelId) -> ModelResult<Array2<f64>> {
        match self.get(name, model)? {
            Tensor::Matrix(m) => Ok(m.clone()),
            other => Err(ModelError::InvalidParameter {
                name: model.variable(name),
                model,
                reason: format!("expected a 2-D array, found a {}", other.kind()),
            }),
        }
    }

    /// A per-entry vector of length `len`; a scalar is broadcast. Length
    /// disagreements are reported by [`ModelParameterSet::validate`].
    fn vector(&self, name: &str, model: ModelId, len: usize) -> ModelResult<Array1<f64>> {
        match self.get(name, model)? {
            Tensor::Vector(v) => Ok(v.clone()),
            Tensor::Scalar(x) => Ok(Array1::from_elem(len, *x)),
            other => Err(ModelError::InvalidParameter {
                name: model.variable(name),
                model,
                reason: format!("expected a 1-D array, found a {}", other.kind()),
            }),
        }
    }

    fn scalar(&self, name: &str, model: ModelId) -> ModelResult<f64> {
        match self.get(name, model)? {
            Tensor::Scalar(x) => Ok(*x),
            Tensor::Vector(v) if v.len() == 1 => Ok(v[0]),
            other => Err(ModelError::InvalidParameter {
                name: model.variable(name),
                model,
                reason: format!("expected a scalar, found a {} of shape {:?}", other.kind(), other.shape()),
            }),
        }
    }
}
