// src/model/mod.rs
pub mod parser;
pub mod predictor;
pub mod registry;
pub mod store;

pub use parser::{parse_declarations, Diagnostic, Literal, ParsedValue, RawDeclaration};
pub use predictor::{GaussianProcessPredictor, PREDICTION_FLOOR};
pub use registry::ModelRegistry;
pub use store::{Kernel, ModelId, ModelParameterSet, ModelParameterStore, Tensor};
