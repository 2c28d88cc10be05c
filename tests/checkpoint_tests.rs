//! Checkpoint Tests
//!
//! Tests for:
//! - Save/load round trip and file naming
//! - Config-hash validation: mismatching records are discarded
//! - Monotonic advance: a stale record never regresses the stored one
//! - Cleanup on success
//! - Atomic write leaves no temp files behind

use tempfile::TempDir;

use visage::runner::{CheckpointManager, CheckpointRecord};

fn record(frame: i64, hash: &str) -> CheckpointRecord {
    CheckpointRecord {
        task_id: "job_42".to_string(),
        config_hash: hash.to_string(),
        last_completed_frame: frame,
        total_frames: 300,
        output_path: "out/video.mp4".to_string(),
    }
}

#[test]
fn save_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());

    manager.save(&record(99, "abc123")).unwrap();
    let loaded = manager.load("job_42", "abc123").expect("record exists");
    assert_eq!(loaded, record(99, "abc123"));

    assert!(manager.record_path("job_42").ends_with("job_42.ckpt"));
    assert!(manager.record_path("job_42").exists());
}

#[test]
fn missing_checkpoint_loads_none() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());
    assert!(manager.load("job_42", "abc123").is_none());
}

#[test]
fn hash_mismatch_discards_the_record() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());

    manager.save(&record(150, "old_hash")).unwrap();
    assert!(
        manager.load("job_42", "new_hash").is_none(),
        "a record from a different configuration must be ignored"
    );
    assert!(
        !manager.record_path("job_42").exists(),
        "the stale record is removed so the restart is observable"
    );
}

#[test]
fn checkpoints_only_advance() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());

    manager.save(&record(200, "h")).unwrap();
    manager.save(&record(100, "h")).unwrap();

    let loaded = manager.load("job_42", "h").unwrap();
    assert_eq!(loaded.last_completed_frame, 200);
}

#[test]
fn cleanup_removes_the_record() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());

    manager.save(&record(10, "h")).unwrap();
    manager.cleanup("job_42");
    assert!(!manager.record_path("job_42").exists());
    assert!(manager.load("job_42", "h").is_none());

    // idempotent on a missing record
    manager.cleanup("job_42");
}

#[test]
fn atomic_save_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());
    for frame in [0, 100, 200] {
        manager.save(&record(frame, "h")).unwrap();
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["job_42.ckpt".to_string()]);
}

#[test]
fn unreadable_record_is_discarded() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path());
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(manager.record_path("job_42"), "not json").unwrap();

    assert!(manager.load("job_42", "h").is_none());
    assert!(!manager.record_path("job_42").exists());
}
