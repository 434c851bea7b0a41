// src/batch.rs
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::io::OutputSpec;
use crate::model::ModelRegistry;
use crate::processing::indices::{IndexKind, DEFAULT_OCVI_EXPONENT};
use crate::processing::{ParallelProcessor, ProcessOptions, ProcessSummary};

#[derive(Deserialize, Serialize, Debug)]
pub struct BatchConfig {
    #[serde(default)]
    pub global: GlobalParams,
    pub operations: Vec<Operation>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct GlobalParams {
    #[serde(default = "default_compress")]
    pub compress: String,
    #[serde(default = "default_compress_level")]
    pub compress_level: u8,
    #[serde(default)]
    pub float: bool,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: i32,
    #[serde(default = "default_true")]
    pub tiled: bool,
    #[serde(default = "default_input_scale_factor")]
    pub input_scale_factor: f32,
    /// Script holding the GPR model declarations, needed by `model` operations
    #[serde(default)]
    pub model_source: Option<String>,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            compress: default_compress(),
            compress_level: default_compress_level(),
            float: false,
            scale_factor: default_scale_factor(),
            tiled: true,
            input_scale_factor: default_input_scale_factor(),
            model_source: None,
        }
    }
}

fn default_compress() -> String {
    "DEFLATE".to_string()
}

fn default_compress_level() -> u8 {
    6
}

fn default_scale_factor() -> i32 {
    10000
}

fn default_input_scale_factor() -> f32 {
    10000.0
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug)]
pub struct Operation {
    /// `model` or the name of a spectral index
    #[serde(rename = "type")]
    pub op_type: String,
    pub params: OperationParams,
    pub output: String,
    pub float: Option<bool>,
    pub scale_factor: Option<i32>,
    pub compress: Option<String>,
    pub compress_level: Option<u8>,
    pub tiled: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(untagged)]
pub enum OperationParams {
    ModelParams {
        parameter: String,
        bands: Vec<String>,
    },
    IndexParams {
        bands: Vec<String>,
        ocvi_exponent: Option<f32>,
    },
}

impl BatchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid batch configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content)
    }
}

impl Operation {
    /// Output settings with operation-specific overrides applied
    pub fn process_options(&self, global: &GlobalParams) -> ProcessOptions {
        let output = OutputSpec::from_flags(
            self.float.unwrap_or(global.float),
            self.scale_factor.unwrap_or(global.scale_factor),
            self.compress.as_deref().unwrap_or(&global.compress),
            self.compress_level.unwrap_or(global.compress_level),
            self.tiled.unwrap_or(global.tiled),
        );
        ProcessOptions {
            output,
            input_scale_factor: global.input_scale_factor,
        }
    }
}

pub fn process_batch(config_path: &Path) -> Result<Vec<ProcessSummary>> {
    let config = BatchConfig::load(config_path)?;
    let processor = ParallelProcessor::new(None);
    let registry = ModelRegistry::new();

    info!(operations = config.operations.len(), "starting batch processing");

    let mut summaries = Vec::with_capacity(config.operations.len());
    for (i, op) in config.operations.iter().enumerate() {
        info!(
            "[{}/{}] Processing {} -> {}",
            i + 1,
            config.operations.len(),
            op.op_type,
            op.output
        );
        let options = op.process_options(&config.global);

        let summary = match (&op.params, op.op_type.to_lowercase().as_str()) {
            (OperationParams::ModelParams { parameter, bands }, "model") => {
                if !registry.is_initialized() {
                    let source = config.global.model_source.as_ref().ok_or_else(|| {
                        anyhow!("model operations require global.model_source")
                    })?;
                    registry.initialize_from_path(source)?;
                }
                let predictor = registry.predictor(parameter)?;
                let options = ProcessOptions {
                    output: options.output.float32(),
                    ..options
                };
                processor.process(&predictor, bands, &op.output, &options)?
            }
            (OperationParams::IndexParams { bands, ocvi_exponent }, name) => {
                let kind = IndexKind::by_name(name)
                    .ok_or_else(|| anyhow!("Unknown operation type: {}", op.op_type))?;
                let calculator = kind.calculator(ocvi_exponent.unwrap_or(DEFAULT_OCVI_EXPONENT));
                processor.process(calculator.as_ref(), bands, &op.output, &options)?
            }
            _ => {
                return Err(anyhow!(
                    "Invalid parameters for {} operation",
                    op.op_type
                ))
            }
        };
        summaries.push(summary);
    }

    info!("batch processing complete");
    Ok(summaries)
}
