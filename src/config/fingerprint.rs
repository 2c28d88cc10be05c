//! Configuration fingerprinting for checkpoint validation.

use std::fmt::Write;

use sha1::{Digest, Sha1};

use super::TaskConfig;

/// Computes the hex SHA-1 fingerprint of the options that affect frame
/// content.
///
/// A resume checkpoint is only honoured when the stored fingerprint matches
/// the current task's, so every option whose change would alter output
/// frames must feed the digest: identity, input/output paths, encoder
/// settings and each enabled step with its full parameter set. Disabled
/// steps are excluded so toggling a step off and on produces the same
/// fingerprint as removing it.
#[must_use]
pub fn config_fingerprint(config: &TaskConfig) -> String {
    let mut hasher = Sha1::new();

    hasher.update(config.task_info.id.as_bytes());
    for path in &config.io.source_paths {
        hasher.update(path.as_bytes());
    }
    for path in &config.io.target_paths {
        hasher.update(path.as_bytes());
    }
    hasher.update(config.io.output.path.as_bytes());
    hasher.update(config.io.output.video_encoder.as_bytes());
    hasher.update(config.io.output.video_quality.to_le_bytes());

    for step in config.enabled_steps() {
        // serde_json emits struct fields in declaration order, which makes
        // the serialised form a stable canonical encoding.
        let params = serde_json::to_string(&step.params).unwrap_or_default();
        hasher.update(params.as_bytes());
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
