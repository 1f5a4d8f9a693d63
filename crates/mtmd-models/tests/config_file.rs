use std::io::Write;

use mtmd_models::{build_model, FeatureColumn, MmoeConfig, ModelError, ModelKind, MultiTaskModel};
use tempfile::NamedTempFile;

const SCHEMA: &str = r#"[
    {"type": "sparse", "name": "user_id", "vocabulary_size": 20, "embedding_dim": 4},
    {"type": "sparse", "name": "site", "vocabulary_size": 3, "embedding_dim": 4},
    {"type": "var_len_sparse",
     "sparse": {"name": "tags", "vocabulary_size": 10, "embedding_dim": 4},
     "maxlen": 2, "combiner": "sum"},
    {"type": "dense", "name": "score", "dimension": 1}
]"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_config_file_and_builds_model() {
    let file = write_temp(
        r#"{
            "num_domains": 2,
            "domain_column": "site",
            "num_experts": 4,
            "expert_dnn_hidden_units": [16, 8],
            "gate_dnn_hidden_units": [],
            "tower_dnn_hidden_units": [4],
            "task_names": ["ctr", "cvr"],
            "task_types": ["binary", "binary"],
            "lhuc_hidden_units": 8,
            "att_head_num": 2,
            "seed": 7
        }"#,
    );
    let config = MmoeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.num_experts, 4);
    assert!(config.gate_dnn_hidden_units.is_empty());
    assert_eq!(config.l2_reg_embedding, 1e-5);

    let columns: Vec<FeatureColumn> = serde_json::from_str(SCHEMA).unwrap();
    let model = build_model(ModelKind::MmoeMtAtt, &columns, &config).unwrap();
    let x = mtmd_layers::Tensor::from_data(
        &[2, 5],
        vec![3.0, 1.0, 4.0, 0.0, 0.9, 19.0, 2.0, 1.0, 2.0, -0.4],
    );
    assert_eq!(model.forward(&x).unwrap().shape(), &[2, 2]);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    match MmoeConfig::from_file(&path) {
        Err(ModelError::Io { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected I/O error, got {:?}", other),
    }
}

#[test]
fn malformed_file_is_parse_error() {
    let file = write_temp(r#"{"num_domains": "three", "domain_column": "site"}"#);
    assert!(matches!(
        MmoeConfig::from_file(file.path()),
        Err(ModelError::Parse(_))
    ));
}

#[test]
fn config_roundtrips_through_json() {
    let config = MmoeConfig::new(5, "site")
        .with_flag("usetrans")
        .with_dropout(0.1);
    let json = serde_json::to_string_pretty(&config).unwrap();
    let file = write_temp(&json);
    assert_eq!(MmoeConfig::from_file(file.path()).unwrap(), config);
}
