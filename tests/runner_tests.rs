//! Runner and Registry Tests
//!
//! Tests for:
//! - Output path generation: prefix/suffix, extension policy per media kind
//! - Conflict policy: overwrite, skip, rename probing
//! - Provider chain construction: CPU terminal fallback, unknown names
//! - Session registry: key canonicalisation, missing-model error, empty
//!   pool cleanup

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use visage::config::{ConflictPolicy, InferenceConfig, OutputConfig};
use visage::errors::ErrorCode;
use visage::inference::{provider_chain, ProviderKind, SessionKey, SessionOptions};
use visage::runner::{apply_conflict_policy, generate_output_path};
use visage::SessionRegistry;

fn output_config(dir: &TempDir) -> OutputConfig {
    OutputConfig {
        path: dir.path().join("out").display().to_string(),
        prefix: "p_".to_string(),
        suffix: "_s".to_string(),
        image_format: "jpg".to_string(),
        image_quality: 90,
        video_encoder: "libx264".to_string(),
        video_quality: 80,
        audio_policy: Default::default(),
        conflict_policy: ConflictPolicy::Overwrite,
    }
}

// ============================================================================
// Output naming
// ============================================================================

#[test]
fn image_output_takes_configured_format() {
    let dir = TempDir::new().unwrap();
    let path = generate_output_path(
        &PathBuf::from("/media/woman.png"),
        &output_config(&dir),
        true,
    )
    .unwrap();
    assert_eq!(path.file_name().unwrap(), "p_woman_s.jpg");
    assert!(path.parent().unwrap().exists(), "output dir created");
}

#[test]
fn video_output_keeps_container_extension() {
    let dir = TempDir::new().unwrap();
    let path = generate_output_path(
        &PathBuf::from("/media/clip.mkv"),
        &output_config(&dir),
        false,
    )
    .unwrap();
    assert_eq!(path.file_name().unwrap(), "p_clip_s.mkv");
}

#[test]
fn overwrite_policy_returns_existing_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.png");
    fs::write(&path, b"x").unwrap();
    assert_eq!(
        apply_conflict_policy(path.clone(), ConflictPolicy::Overwrite),
        Some(path)
    );
}

#[test]
fn skip_policy_drops_existing_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.png");
    fs::write(&path, b"x").unwrap();
    assert_eq!(apply_conflict_policy(path, ConflictPolicy::Skip), None);
}

#[test]
fn rename_policy_probes_free_suffixes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.png");
    fs::write(&path, b"x").unwrap();
    fs::write(dir.path().join("out-1.png"), b"x").unwrap();

    let renamed = apply_conflict_policy(path, ConflictPolicy::Rename).unwrap();
    assert_eq!(renamed.file_name().unwrap(), "out-2.png");
}

#[test]
fn missing_path_passes_any_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.png");
    for policy in [
        ConflictPolicy::Overwrite,
        ConflictPolicy::Skip,
        ConflictPolicy::Rename,
    ] {
        assert_eq!(apply_conflict_policy(path.clone(), policy), Some(path.clone()));
    }
}

// ============================================================================
// Provider chain
// ============================================================================

#[test]
fn provider_chain_appends_cpu_fallback() {
    let config = InferenceConfig {
        device_id: 0,
        providers: vec!["tensorrt".to_string(), "cuda".to_string()],
        workspace_limit_bytes: 0,
    };
    assert_eq!(
        provider_chain(&config),
        vec![ProviderKind::TensorRt, ProviderKind::Cuda, ProviderKind::Cpu]
    );
}

#[test]
fn provider_chain_drops_unknown_and_duplicate_names() {
    let config = InferenceConfig {
        device_id: 0,
        providers: vec![
            "quantum".to_string(),
            "cuda".to_string(),
            "CUDA".to_string(),
            "cpu".to_string(),
        ],
        workspace_limit_bytes: 0,
    };
    assert_eq!(
        provider_chain(&config),
        vec![ProviderKind::Cuda, ProviderKind::Cpu]
    );
}

// ============================================================================
// Session registry
// ============================================================================

#[test]
fn session_key_canonicalises_path_spelling() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.onnx");
    fs::write(&model, b"onnx").unwrap();

    let direct = SessionKey::new(&model, SessionOptions::default());
    let dotted = SessionKey::new(
        dir.path().join(".").join("model.onnx"),
        SessionOptions::default(),
    );
    assert_eq!(direct, dotted);
}

#[test]
fn distinct_options_make_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.onnx");
    fs::write(&model, b"onnx").unwrap();

    let cpu = SessionKey::new(&model, SessionOptions::default());
    let mut fp16_options = SessionOptions::default();
    fp16_options.fp16 = true;
    let fp16 = SessionKey::new(&model, fp16_options);
    assert_ne!(cpu, fp16);
}

#[test]
fn missing_model_fails_with_model_not_found() {
    let registry = SessionRegistry::new();
    let key = SessionKey::new("/nonexistent/model.onnx", SessionOptions::default());
    let err = registry.get_session(&key).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModelNotFound);
    assert_eq!(err.code().exit_code(), 301);
}

#[test]
fn cleanup_on_empty_pool_frees_nothing() {
    let registry = SessionRegistry::new();
    assert_eq!(registry.cleanup_expired(Duration::ZERO), 0);
    assert_eq!(registry.session_count(), 0);
    registry.clear();
}
