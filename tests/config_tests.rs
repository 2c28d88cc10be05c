//! Configuration Tests
//!
//! Tests for:
//! - Validation: version gate, required fields, path existence, ranges,
//!   error-code mapping
//! - Fingerprinting: stability, sensitivity to step parameters, disabled
//!   steps excluded
//! - Serde round trip of the task config

use std::fs;

use tempfile::TempDir;

use visage::config::{
    config_fingerprint, AudioPolicy, ConflictPolicy, FaceSelectorConfig, IoConfig, OutputConfig,
    PipelineStep, StepKind, StepParams, TaskConfig, TaskInfo, CONFIG_VERSION,
};
use visage::errors::ErrorCode;

/// A valid config over real temp files.
fn valid_config(dir: &TempDir) -> TaskConfig {
    let source = dir.path().join("source.png");
    let target = dir.path().join("target.jpg");
    fs::write(&source, b"x").unwrap();
    fs::write(&target, b"x").unwrap();

    TaskConfig {
        config_version: CONFIG_VERSION.to_string(),
        task_info: TaskInfo {
            id: "task_1".to_string(),
            enable_resume: false,
        },
        io: IoConfig {
            source_paths: vec![source.display().to_string()],
            target_paths: vec![target.display().to_string()],
            output: OutputConfig {
                path: dir.path().join("out").display().to_string(),
                prefix: String::new(),
                suffix: String::new(),
                image_format: "png".to_string(),
                image_quality: 100,
                video_encoder: "libx264".to_string(),
                video_quality: 80,
                audio_policy: AudioPolicy::Copy,
                conflict_policy: ConflictPolicy::Overwrite,
            },
        },
        face_analysis: Default::default(),
        resource: Default::default(),
        pipeline: vec![PipelineStep {
            step: StepKind::FaceSwapper,
            enabled: true,
            params: StepParams::FaceSwapper {
                model: "inswapper_128_fp16".to_string(),
                face_selector: FaceSelectorConfig::default(),
                mask_padding: [0, 0, 0, 0],
                mask_blur: 0.3,
                occlusion_mask: false,
                region_mask: false,
            },
        }],
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn valid_config_passes() {
    let dir = TempDir::new().unwrap();
    valid_config(&dir).validate().unwrap();
}

#[test]
fn version_mismatch_maps_to_e204() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.config_version = "0.9".to_string();

    let err = config.validate().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigVersionMismatch);
    assert_eq!(err.code().exit_code(), 204);
    assert_eq!(err.code().tag(), "E204");
}

#[test]
fn missing_sources_map_to_e205() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.io.source_paths.clear();

    let err = config.validate().unwrap_err();
    assert_eq!(err.code(), ErrorCode::RequiredFieldMissing);
    assert_eq!(err.code().exit_code(), 205);
}

#[test]
fn nonexistent_target_maps_to_e206() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.io.target_paths = vec!["/does/not/exist.mp4".to_string()];

    let err = config.validate().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);
    assert_eq!(err.code().exit_code(), 206);
}

#[test]
fn bad_task_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.task_info.id = "bad id!".to_string();
    assert_eq!(
        config.validate().unwrap_err().code(),
        ErrorCode::ParameterOutOfRange
    );
}

#[test]
fn out_of_range_quality_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.io.output.video_quality = 101;
    assert_eq!(
        config.validate().unwrap_err().code(),
        ErrorCode::ParameterOutOfRange
    );
}

#[test]
fn unknown_image_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.io.output.image_format = "tiff".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn step_blend_out_of_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.pipeline.push(PipelineStep {
        step: StepKind::FaceEnhancer,
        enabled: true,
        params: StepParams::FaceEnhancer {
            model: "gfpgan_1.4".to_string(),
            blend: 1.5,
            face_selector: FaceSelectorConfig::default(),
        },
    });
    assert_eq!(
        config.validate().unwrap_err().code(),
        ErrorCode::ParameterOutOfRange
    );
}

#[test]
fn zero_queue_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = valid_config(&dir);
    config.resource.max_queue_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn model_error_codes_share_e301() {
    assert_eq!(ErrorCode::ModelNotFound.exit_code(), 301);
    assert_eq!(ErrorCode::ModelLoadFailed.exit_code(), 301);
    assert_eq!(ErrorCode::VideoOpenFailed.exit_code(), 402);
    assert_eq!(ErrorCode::OutputWriteFailed.exit_code(), 406);
    assert_eq!(ErrorCode::TaskCancelled.exit_code(), 407);
    assert_eq!(ErrorCode::Ok.exit_code(), 0);
}

// ============================================================================
// Fingerprinting
// ============================================================================

#[test]
fn fingerprint_is_stable_across_clones() {
    let dir = TempDir::new().unwrap();
    let config = valid_config(&dir);
    assert_eq!(config_fingerprint(&config), config_fingerprint(&config.clone()));
    assert_eq!(config_fingerprint(&config).len(), 40, "hex SHA-1");
}

#[test]
fn changing_a_step_model_changes_the_fingerprint() {
    let dir = TempDir::new().unwrap();
    let base = valid_config(&dir);
    let mut changed = base.clone();
    if let StepParams::FaceSwapper { model, .. } = &mut changed.pipeline[0].params {
        *model = "inswapper_128".to_string();
    }
    assert_ne!(config_fingerprint(&base), config_fingerprint(&changed));
}

#[test]
fn changing_video_quality_changes_the_fingerprint() {
    let dir = TempDir::new().unwrap();
    let base = valid_config(&dir);
    let mut changed = base.clone();
    changed.io.output.video_quality = 50;
    assert_ne!(config_fingerprint(&base), config_fingerprint(&changed));
}

#[test]
fn disabled_steps_do_not_feed_the_fingerprint() {
    let dir = TempDir::new().unwrap();
    let base = valid_config(&dir);

    let mut with_disabled = base.clone();
    with_disabled.pipeline.push(PipelineStep {
        step: StepKind::FrameEnhancer,
        enabled: false,
        params: StepParams::FrameEnhancer {
            model: "real_esrgan_x2_fp16".to_string(),
            blend: 0.8,
        },
    });
    assert_eq!(
        config_fingerprint(&base),
        config_fingerprint(&with_disabled)
    );
}

// ============================================================================
// Serde
// ============================================================================

#[test]
fn task_config_round_trips_through_json() {
    let dir = TempDir::new().unwrap();
    let config = valid_config(&dir);
    let json = serde_json::to_string(&config).unwrap();
    let back: TaskConfig = serde_json::from_str(&json).unwrap();
    back.validate().unwrap();
    assert_eq!(config_fingerprint(&config), config_fingerprint(&back));
}

#[test]
fn step_params_defaults_apply_on_deserialize() {
    let json = r#"{
        "step": "face_enhancer",
        "params": { "kind": "face_enhancer", "model": "gfpgan_1.4" }
    }"#;
    let step: PipelineStep = serde_json::from_str(json).unwrap();
    assert!(step.enabled, "steps default to enabled");
    if let StepParams::FaceEnhancer { blend, .. } = step.params {
        assert!((blend - 0.8).abs() < 1e-6, "enhancer blend defaults to 0.8");
    } else {
        panic!("wrong variant");
    }
}

#[test]
fn expression_restore_factor_defaults() {
    let json = r#"{
        "step": "expression_restorer",
        "params": { "kind": "expression_restorer" }
    }"#;
    let step: PipelineStep = serde_json::from_str(json).unwrap();
    if let StepParams::ExpressionRestorer { restore_factor, .. } = step.params {
        assert!((restore_factor - 0.96).abs() < 1e-6);
    } else {
        panic!("wrong variant");
    }
}
