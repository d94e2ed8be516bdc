//! `basename`-style file-name sanitization and output-directory
//! confinement (used by C8's chunk reception, per §4.8 step 2 and the
//! `PathEscape` invariant of §8 property 6).

use std::path::{Path, PathBuf};

use crate::error::{Result, SessionError};

/// Reduce `raw` to its final path component, rejecting anything that isn't
/// a plain, non-empty file name once reduced.
///
/// `Path::file_name` already discards any leading `..`/`.`/directory
/// components, so a value like `"../../etc/passwd"` sanitizes down to
/// `"passwd"`; a value that terminates in `..` (or is empty) has no
/// `file_name` at all and is rejected outright.
pub fn sanitize_basename(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?.to_string();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

/// Sanitize `file_name` and resolve it to a path inside `output_dir`,
/// verifying the result cannot canonically escape `output_dir`.
///
/// `output_dir` must already exist. The returned path may not exist yet
/// (that's the caller's job to create).
pub fn resolve_output_path(
    output_dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let basename = sanitize_basename(file_name)
        .ok_or_else(|| SessionError::PathEscape(file_name.to_string()))?;

    let candidate = output_dir.join(&basename);

    let canonical_dir = output_dir
        .canonicalize()
        .map_err(|e| SessionError::PathEscape(format!("{file_name}: {e}")))?;

    // The candidate doesn't exist yet, so canonicalize its parent (which is
    // always `output_dir` itself, since `basename` has no path separators)
    // and confirm that still lands inside `canonical_dir`.
    let parent_dir = candidate.parent().unwrap_or(output_dir);
    let canonical_parent = parent_dir
        .canonicalize()
        .map_err(|e| SessionError::PathEscape(format!("{file_name}: {e}")))?;

    if canonical_parent != canonical_dir {
        return Err(SessionError::PathEscape(file_name.to_string()));
    }

    Ok(canonical_dir.join(&basename))
}
