//! Output path generation and collision handling.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ConflictPolicy, OutputConfig};
use crate::errors::Result;

/// Builds the output path for a target: `<dir>/<prefix><stem><suffix>.<ext>`.
///
/// Still-image targets take the configured image format as extension;
/// video targets keep their own container extension.
pub fn generate_output_path(
    target: &Path,
    output: &OutputConfig,
    is_image: bool,
) -> Result<PathBuf> {
    let dir = PathBuf::from(&output.path);
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }

    let stem = target
        .file_stem()
        .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().into_owned());
    let extension = if is_image {
        output.image_format.clone()
    } else {
        target
            .extension()
            .map_or_else(|| "mp4".to_string(), |e| e.to_string_lossy().into_owned())
    };

    let name = format!("{}{stem}{}.{extension}", output.prefix, output.suffix);
    Ok(dir.join(name))
}

/// Applies the conflict policy to an intended output path.
///
/// Returns `None` when the policy is `Skip` and the file already exists;
/// `Rename` probes `-1`, `-2`, … suffixes until a free name is found.
#[must_use]
pub fn apply_conflict_policy(path: PathBuf, policy: ConflictPolicy) -> Option<PathBuf> {
    if !path.exists() {
        return Some(path);
    }
    match policy {
        ConflictPolicy::Overwrite => Some(path),
        ConflictPolicy::Skip => {
            log::info!("Output {} exists; skipping target", path.display());
            None
        }
        ConflictPolicy::Rename => {
            let stem = path
                .file_stem()
                .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned());
            let parent = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);

            for index in 1.. {
                let name = match &extension {
                    Some(ext) => format!("{stem}-{index}.{ext}"),
                    None => format!("{stem}-{index}"),
                };
                let candidate = parent.join(name);
                if !candidate.exists() {
                    return Some(candidate);
                }
            }
            unreachable!("rename probe terminates at the first free index")
        }
    }
}
