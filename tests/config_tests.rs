// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use frame_recorder::config::{Config, OutputFormat, TransitionMode};
use frame_recorder::errors::ConfigError;
use std::path::PathBuf;

fn scratch_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("frame-recorder-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn test_config_default() {
    // Defaults must pass validation
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.transition_mode, TransitionMode::AsyncSemi);
    assert_eq!(config.output_format, OutputFormat::Png);
    assert!(
        config.enable_weight_redistribution,
        "Weight redistribution should be enabled by default"
    );
}

#[test]
fn test_load_full_file() {
    let path = scratch_file("envRecorder.json");
    std::fs::write(
        &path,
        r#"{
            "CaptureTargetFramerate": 60,
            "Timescale": 2,
            "IsDebug": false,
            "FrameChunkSize": 50,
            "StageWeights": [1, 2, 2, 3, 1],
            "TransitionMode": "SyncFull",
            "EnableWeightRedistribution": false,
            "OutputFormat": "Jpeg"
        }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.frame_chunk_size, 50);
    assert_eq!(config.stage_weights, [1, 2, 2, 3, 1]);
    assert_eq!(config.transition_mode, TransitionMode::SyncFull);
    assert_eq!(config.output_format.extension(), "jpg");
    assert_eq!(config.initial_weights().downstream_total(), 8);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_load_rejects_invalid_values() {
    let path = scratch_file("envRecorder.json");
    std::fs::write(&path, r#"{ "FrameChunkSize": 0 }"#).unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "FrameChunkSize",
            ..
        }
    ));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_load_rejects_malformed_json() {
    let path = scratch_file("envRecorder.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));
    assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    assert!(matches!(Config::load(&path), Err(ConfigError::Read { .. })));
}

#[test]
fn test_config_roundtrips_through_json() {
    // The `config` command prints this; it must load back unchanged
    let config = Config {
        timescale: 8,
        ..Config::default()
    };
    let json = serde_json::to_string_pretty(&config).unwrap();
    assert!(json.contains("\"CaptureTargetFramerate\""));
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}
