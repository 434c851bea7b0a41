// tests/model_tests.rs
use std::io::Write;
use std::sync::Arc;

use gdal::raster::Buffer;
use ndarray::{array, Array1, Array2};
use serde_json::json;

use pusa_calc::batch::{BatchConfig, OperationParams};
use pusa_calc::io::OutputEncoding;
use pusa_calc::model::parser::find_declaration;
use pusa_calc::model::{
    parse_declarations, GaussianProcessPredictor, Kernel, Literal, ModelId, ModelParameterSet,
    ModelParameterStore, ModelRegistry, Tensor, PREDICTION_FLOOR,
};
use pusa_calc::processing::{evaluate, IndexCalculator, ProcessSummary};
use pusa_calc::utils::fixed_point::to_fixed_point;
use pusa_calc::utils::gdal_ext::TypedBuffer;
use pusa_calc::ModelError;

/// Two-feature water content model with two training points, plus a green
/// model without its own normalisation or hyperparameters.
const MODEL_SOURCE: &str = r#"
// PUSA eCMS retrieval models
var X_train_Cw = ee.Array([[0.0, 0.0],
                           [1.0, 1.0],]);
var mx_Cw = ee.Image([0.5, 0.5]);
var sx_Cw = ee.Image([0.25, 0.25]).multiply(2.0);
var hyp_ell_Cw = ee.Image([1.0, 1.0]);
var hyp_sig_Cw = 2.0;
var XDX_pre_calc_Cw = ee.Image([0.0, 2.0]);
var alpha_coefficients_Cw = ee.Image([1.0, 0.5]);
var mean_model_Cw = 0.1;

var X_train_GREEN = ee.Array([[1.0, 0.0]]);
var XDX_pre_calc_GREEN = ee.Image([1.0]);
var alpha_coefficients_GREEN = ee.Image([2.0]);
var mean_model_GREEN = 0.5;
"#;

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() < tolerance,
        "Expected {}, got {}",
        expected,
        actual
    );
}

fn numbers(values: &[f64]) -> Literal {
    Literal::List(values.iter().map(|&v| Literal::Number(v)).collect())
}

fn unit_model(x_train: Array2<f64>, xdx: Array1<f64>, alpha: Array1<f64>) -> ModelParameterSet {
    let features = x_train.ncols();
    ModelParameterSet {
        model: ModelId::Ccc,
        x_train,
        mx: Array1::zeros(features),
        sx: Array1::ones(features),
        kernel: Kernel::Weighted {
            hyp_ell: Array1::ones(features),
            hyp_sig: 1.0,
        },
        hyp_sign: None,
        xdx_pre_calc: xdx,
        alpha,
        mean_model: 0.0,
    }
}

#[test]
fn test_multiplier_reaches_every_leaf() {
    let nested = Literal::List(vec![
        Literal::Number(1.0),
        Literal::List(vec![Literal::Number(-2.0), Literal::Other(json!("n/a"))]),
        Literal::List(vec![Literal::List(vec![Literal::Number(0.5)])]),
    ]);

    let scaled = nested.scaled(3.0);

    let expected = Literal::List(vec![
        Literal::Number(3.0),
        Literal::List(vec![Literal::Number(-6.0), Literal::Other(json!("n/a"))]),
        Literal::List(vec![Literal::List(vec![Literal::Number(1.5)])]),
    ]);
    assert_eq!(scaled, expected);
}

#[test]
fn test_multiply_suffix_scales_values() {
    let text = "var mx_Cw = [1.0, 2.0];\nvar sx_Cw = [1.0, 1.0].multiply(2.0);";
    let parsed = parse_declarations(text, ["mx_Cw", "sx_Cw"]);

    assert_eq!(parsed["mx_Cw"], Ok(numbers(&[1.0, 2.0])));
    assert_eq!(parsed["sx_Cw"], Ok(numbers(&[2.0, 2.0])));
}

#[test]
fn test_trailing_comma_is_ignored() {
    let parsed = parse_declarations("var a = [1, 2, 3,]; var b = [1, 2, 3];", ["a", "b"]);
    assert_eq!(parsed["a"], parsed["b"]);
    assert_eq!(parsed["a"], Ok(numbers(&[1.0, 2.0, 3.0])));
}

#[test]
fn test_malformed_declaration_is_contained() {
    let text = r#"
        var first = ee.Array([[1, 2], [3, 4]]);
        var broken = [1.0, 2.0;
        var third = 1.5e-3;
    "#;
    let parsed = parse_declarations(text, ["first", "broken", "third", "absent"]);

    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed.values().filter(|v| v.is_err()).count(), 1);
    let diag = parsed["broken"].as_ref().unwrap_err();
    assert!(diag.raw.contains("[1.0, 2.0"));
    assert_eq!(parsed["third"], Ok(Literal::Number(1.5e-3)));
    assert!(!parsed.contains_key("absent"));
}

#[test]
fn test_js_number_forms() {
    let parsed = parse_declarations("var v = [+1, .5, -.25, 2., 1.e2, 3E-1];", ["v"]);
    assert_eq!(parsed["v"], Ok(numbers(&[1.0, 0.5, -0.25, 2.0, 100.0, 0.3])));
}

#[test]
fn test_declaration_without_var_and_first_match() {
    let text = "hyp_sig_Cw = 4.0;\nvar hyp_sig_Cw = 5.0;\nvar mean_model_Cw = 1; var mean_model_Cw = 2;";

    // `var` declarations are preferred, otherwise the first bare assignment
    let sig = find_declaration(text, "hyp_sig_Cw").unwrap();
    assert_eq!(sig.value_text, "5.0");
    let mean = find_declaration(text, "mean_model_Cw").unwrap();
    assert_eq!(mean.value_text, "1");

    let bare = find_declaration("  alpha = [1, 2];", "alpha").unwrap();
    assert_eq!(bare.evaluate(), Ok(numbers(&[1.0, 2.0])));
}

#[test]
fn test_invalid_multiplier_is_a_diagnostic() {
    let parsed = parse_declarations("var v = ee.Image([1, 2]).multiply(scale);", ["v"]);
    let diag = parsed["v"].as_ref().unwrap_err();
    assert!(diag.error.contains("multiply"));
}

#[test]
fn test_tensor_classification() {
    let matrix = Tensor::from_parsed(&Ok(Literal::List(vec![numbers(&[1.0, 2.0]), numbers(&[3.0, 4.0])])));
    assert_eq!(matrix, Tensor::Matrix(array![[1.0, 2.0], [3.0, 4.0]]));

    let vector = Tensor::from_parsed(&Ok(numbers(&[1.0, 2.0, 3.0])));
    assert_eq!(vector, Tensor::Vector(array![1.0, 2.0, 3.0]));

    assert_eq!(Tensor::from_parsed(&Ok(Literal::Number(0.5))), Tensor::Scalar(0.5));

    let ragged = Tensor::from_parsed(&Ok(Literal::List(vec![numbers(&[1.0, 2.0]), numbers(&[3.0])])));
    assert_eq!(ragged.kind(), "invalid");
}

#[test]
fn test_store_lookup() {
    let store = ModelParameterStore::from_source(MODEL_SOURCE);

    match store.get("X_train", ModelId::Cw).unwrap() {
        Tensor::Matrix(m) => assert_eq!(m.dim(), (2, 2)),
        other => panic!("expected a matrix, got {:?}", other),
    }
    assert_eq!(store.get("sx", ModelId::Cw).unwrap(), &Tensor::Vector(array![0.5, 0.5]));
    assert_eq!(store.get("hyp_sig", ModelId::Cw).unwrap(), &Tensor::Scalar(2.0));

    // hyp_sign is not declared, the model is still usable
    assert!(matches!(
        store.get("hyp_sign", ModelId::Cw),
        Err(ModelError::NotFound { .. })
    ));
    let set = store.parameter_set(ModelId::Cw).unwrap();
    assert_eq!(set.hyp_sign, None);
    assert_eq!(set.n_training(), 2);
    assert_eq!(set.n_features(), 2);

    // CCC is not declared at all
    assert!(matches!(
        store.parameter_set(ModelId::Ccc),
        Err(ModelError::NotFound { .. })
    ));
}

#[test]
fn test_dimension_mismatch_is_rejected() {
    let source = MODEL_SOURCE.replace(
        "var alpha_coefficients_Cw = ee.Image([1.0, 0.5]);",
        "var alpha_coefficients_Cw = ee.Image([1.0, 0.5, 0.25]);",
    );
    let store = ModelParameterStore::from_source(&source);
    assert!(matches!(
        store.parameter_set(ModelId::Cw),
        Err(ModelError::DimensionMismatch { model: ModelId::Cw, .. })
    ));
}

#[test]
fn test_malformed_parameter_surfaces_on_use() {
    let source = MODEL_SOURCE.replace("var hyp_sig_Cw = 2.0;", "var hyp_sig_Cw = [2.0;");
    let store = ModelParameterStore::from_source(&source);

    assert_eq!(store.diagnostics().count(), 1);
    assert!(matches!(
        store.parameter_set(ModelId::Cw),
        Err(ModelError::Malformed { .. })
    ));
    // the green model does not depend on it
    assert!(store.parameter_set(ModelId::Green).is_ok());
}

#[test]
fn test_unusable_noise_variance_is_ignored() {
    for declaration in ["[1.0, 2.0;", "ee.Image([0.01, 0.02]);"] {
        let source = format!("{}\nvar hyp_sign_Cw = {}\n", MODEL_SOURCE, declaration);
        let store = ModelParameterStore::from_source(&source);

        let set = store.parameter_set(ModelId::Cw).unwrap();
        assert_eq!(set.hyp_sign, None, "hyp_sign_Cw = {}", declaration);
    }

    let malformed = ModelParameterStore::from_source(&format!("{}\nvar hyp_sign_Cw = [1.0, 2.0;", MODEL_SOURCE));
    assert!(matches!(
        malformed.get("hyp_sign", ModelId::Cw),
        Err(ModelError::Malformed { .. })
    ));
    assert_eq!(malformed.diagnostics().count(), 1);

    let valid = ModelParameterStore::from_source(&format!("{}\nvar hyp_sign_Cw = 0.01;", MODEL_SOURCE));
    assert_eq!(valid.parameter_set(ModelId::Cw).unwrap().hyp_sign, Some(0.01));
}

#[test]
fn test_green_statistics_fall_back_separately() {
    let source = format!("{}\nvar mx_GREEN = ee.Image([0.0, 0.0]);", MODEL_SOURCE);
    let store = ModelParameterStore::from_source(&source);
    let set = store.parameter_set(ModelId::Green).unwrap();

    assert_eq!(set.mx, array![0.0, 0.0]);
    assert_eq!(set.sx, array![0.5, 0.5]);

    let predictor = GaussianProcessPredictor::new(set).unwrap();
    let predicted = predictor.predict(array![[1.0, 0.5]].view()).unwrap();
    // 2 * e^(2 - 0.5) + 0.5
    assert_close(predicted[0], 9.463_38, 1e-4);
}

#[test]
fn test_partial_green_hyperparameters_use_unweighted_kernel() {
    let source = format!("{}\nvar hyp_sig_GREEN = 3.0;", MODEL_SOURCE);
    let store = ModelParameterStore::from_source(&source);
    assert_eq!(store.parameter_set(ModelId::Green).unwrap().kernel, Kernel::Unweighted);

    let source = format!(
        "{}\nvar hyp_sig_GREEN = 3.0;\nvar hyp_ell_GREEN = ee.Image([1.0, 1.0]);",
        MODEL_SOURCE
    );
    let store = ModelParameterStore::from_source(&source);
    assert!(matches!(
        store.parameter_set(ModelId::Green).unwrap().kernel,
        Kernel::Weighted { hyp_sig, .. } if hyp_sig == 3.0
    ));
}

#[test]
fn test_unit_value_at_zero_distance() {
    let point = array![1.0, -2.0];
    let xdx = array![point.dot(&point)];
    let x_train = point.clone().insert_axis(ndarray::Axis(0));
    let model = unit_model(x_train, xdx, array![1.0]);
    let predictor = GaussianProcessPredictor::new(Arc::new(model)).unwrap();

    let predicted = predictor.predict(point.insert_axis(ndarray::Axis(0)).view()).unwrap();
    assert_close(predicted[0], 1.0, 1e-12);
}

#[test]
fn test_water_content_prediction() {
    let store = ModelParameterStore::from_source(MODEL_SOURCE);
    let predictor = GaussianProcessPredictor::new(store.parameter_set(ModelId::Cw).unwrap()).unwrap();
    assert_eq!(predictor.name(), "CWC");

    let predicted = predictor.predict(array![[0.5, 0.5], [1.0, 1.0]].view()).unwrap();
    // 2 * (1 + 0.5 * e^-1) + 0.1
    assert_close(predicted[0], 2.467_88, 1e-4);
    // 2 * (e^-1 + 0.5) + 0.1
    assert_close(predicted[1], 1.835_76, 1e-4);
}

#[test]
fn test_leaf_area_uses_unweighted_kernel() {
    let store = ModelParameterStore::from_source(MODEL_SOURCE);
    let set = store.parameter_set(ModelId::Green).unwrap();
    assert_eq!(set.kernel, Kernel::Unweighted);
    // normalisation falls back to the water content statistics
    assert_eq!(set.mx, array![0.5, 0.5]);

    let predictor = GaussianProcessPredictor::new(set).unwrap();
    assert_eq!(predictor.name(), "LAI");
    let predicted = predictor.predict(array![[1.0, 0.5]].view()).unwrap();
    // 2 * e^(1 - 0.5) + 0.5
    assert_close(predicted[0], 3.797_44, 1e-4);
}

#[test]
fn test_predictions_are_floored() {
    let model = unit_model(array![[0.0, 0.0], [1.0, 0.0]], array![0.0, 1.0], array![-10.0, 1e-9]);
    let predictor = GaussianProcessPredictor::new(Arc::new(model)).unwrap();

    let features = array![[0.0, 0.0], [5.0, 5.0], [-3.0, 2.0], [0.2, 0.1]];
    let predicted = predictor.predict(features.view()).unwrap();
    assert!(predicted.iter().all(|&v| v >= PREDICTION_FLOOR));
    assert_eq!(predicted[0], PREDICTION_FLOOR);
}

#[test]
fn test_nodata_pixels_stay_nodata() {
    let store = ModelParameterStore::from_source(MODEL_SOURCE);
    let predictor = GaussianProcessPredictor::new(store.parameter_set(ModelId::Cw).unwrap()).unwrap();

    let predicted = predictor
        .predict(array![[-999.0, 0.5], [f64::NAN, 0.5]].view())
        .unwrap();
    assert_eq!(predicted[0], -999.0);
    assert_eq!(predicted[1], -999.0);
}

#[test]
fn test_band_count_must_match_model() {
    let store = ModelParameterStore::from_source(MODEL_SOURCE);
    let predictor = GaussianProcessPredictor::new(store.parameter_set(ModelId::Cw).unwrap()).unwrap();

    let result = predictor.predict(array![[0.5, 0.5, 0.5]].view());
    assert!(matches!(result, Err(ModelError::DimensionMismatch { .. })));
}

#[test]
fn test_registry_requires_initialization() {
    let registry = ModelRegistry::new();
    assert!(!registry.is_initialized());
    assert!(matches!(registry.predictor("Cw"), Err(ModelError::NotInitialized)));

    let bands = vec![TypedBuffer::F32(Buffer::new((1, 1), vec![0.5]))];
    assert!(registry.predict("Cw", &bands).is_err());
}

#[test]
fn test_registry_dispatch_and_predict() {
    let registry = ModelRegistry::new();
    registry.initialize(MODEL_SOURCE);

    assert_eq!(registry.predictor("Cw").unwrap().name(), "CWC");
    assert_eq!(registry.predictor("anything").unwrap().name(), "LAI");
    assert!(matches!(registry.predictor("Ccc"), Err(ModelError::NotFound { .. })));

    let bands = vec![
        TypedBuffer::F32(Buffer::new((2, 1), vec![0.5, 1.0])),
        TypedBuffer::F32(Buffer::new((2, 1), vec![0.5, 1.0])),
    ];
    let result = registry.predict("Cw", &bands).unwrap();
    let values = result.as_f32().unwrap().data();
    assert_close(values[0] as f64, 2.467_88, 1e-4);
    assert_close(values[1] as f64, 1.835_76, 1e-4);
}

#[test]
fn test_reinitialization_swaps_whole_store() {
    let registry = ModelRegistry::new();
    registry.initialize(MODEL_SOURCE);
    let before = registry.store().unwrap().parameter_set(ModelId::Cw).unwrap();

    registry.initialize(&MODEL_SOURCE.replace("var mean_model_Cw = 0.1;", "var mean_model_Cw = 0.7;"));
    let after = registry.store().unwrap().parameter_set(ModelId::Cw).unwrap();

    assert_eq!(before.mean_model, 0.1);
    assert_eq!(after.mean_model, 0.7);
}

#[test]
fn test_initialize_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MODEL_SOURCE.as_bytes()).unwrap();

    let registry = ModelRegistry::new();
    let store = registry.initialize_from_path(file.path()).unwrap();
    assert!(store.parameter_set(ModelId::Cw).is_ok());
    assert!(registry.is_initialized());

    let missing = ModelRegistry::new().initialize_from_path("/nonexistent/model.js");
    assert!(matches!(missing, Err(ModelError::Io { .. })));
}

#[test]
fn test_input_scaling_before_prediction() {
    let registry = ModelRegistry::new();
    registry.initialize(MODEL_SOURCE);
    let predictor = registry.predictor("Cw").unwrap();

    // Sentinel-2 digital numbers, divided by 10000 into reflectance
    let bands = vec![
        TypedBuffer::F32(Buffer::new((2, 1), vec![5000.0, 10000.0])),
        TypedBuffer::F32(Buffer::new((2, 1), vec![5000.0, 10000.0])),
    ];
    let result = evaluate(&predictor, bands, 10000.0).unwrap();
    let values = result.as_f32().unwrap().data();
    assert_close(values[0] as f64, 2.467_88, 1e-4);
    assert_close(values[1] as f64, 1.835_76, 1e-4);
}

#[test]
fn test_summary_ignores_nodata() {
    let mut summary = ProcessSummary::new("CWC");
    summary.accumulate(&TypedBuffer::F32(Buffer::new((3, 1), vec![1.0, 2.0, -999.0])));
    summary.accumulate(&TypedBuffer::F32(Buffer::new((1, 1), vec![3.0])));

    assert_eq!(summary.valid_pixels, 3);
    assert_close(summary.mean.unwrap(), 2.0, 1e-12);
    assert_eq!(summary.min, Some(1.0));
    assert_eq!(summary.max, Some(3.0));

    let empty = ProcessSummary::new("LAI");
    assert_eq!(empty.mean, None);
}

#[test]
fn test_fixed_point_conversion() {
    let fixed = to_fixed_point(&[0.5, -999.0, 10.0, f32::NAN, -0.25], 10000, -10000);
    assert_eq!(fixed, vec![5000, -10000, 32767, -10000, -2500]);
}

#[test]
fn test_batch_config() {
    let config = BatchConfig::from_json(
        r#"{
            "global": { "model_source": "models/pusa.js", "float": false },
            "operations": [
                { "type": "model", "params": { "parameter": "Cw", "bands": ["b3.tif", "b4.tif"] }, "output": "cwc.tif" },
                { "type": "NDBI", "params": { "bands": ["b11.tif", "b8.tif"] }, "output": "ndbi.tif", "float": true }
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(config.global.model_source.as_deref(), Some("models/pusa.js"));
    assert_eq!(config.global.scale_factor, 10000);
    assert!(matches!(
        &config.operations[0].params,
        OperationParams::ModelParams { parameter, .. } if parameter == "Cw"
    ));
    assert!(matches!(
        &config.operations[1].params,
        OperationParams::IndexParams { bands, ocvi_exponent: None } if bands.len() == 2
    ));

    let model_options = config.operations[0].process_options(&config.global);
    assert_eq!(
        model_options.output.encoding,
        OutputEncoding::FixedPoint { scale_factor: 10000 }
    );
    let index_options = config.operations[1].process_options(&config.global);
    assert_eq!(index_options.output.encoding, OutputEncoding::Float32);
}
