//! Recursive file/directory metadata tree offered in a transfer.

use std::{
    fs,
    io::{BufReader, Read},
    path::Path,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ManifestError, Result};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A single file or directory entry in an offered tree.
///
/// Leaves (`is_directory == false`) carry a content hash computed once at
/// construction time; directories carry only structural data and an empty
/// hash. `FileNode` is immutable once built — mutating a transfer means
/// building a new manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the root(s) passed to [`build_manifest`], with `/`
    /// separators, preserved verbatim (no normalization beyond joining).
    pub relative_path: String,
    pub is_directory: bool,
    /// Byte size; always 0 for directories.
    pub size: u64,
    /// Lowercase hex SHA-256 of the file contents; empty for directories.
    pub sha256_hex: String,
    /// Ordered children, sorted by `relative_path` for determinism.
    pub children: Vec<FileNode>,
}

/// Walk each of `paths` and build an ordered, sorted file tree.
///
/// Files are hashed via a streaming SHA-256 read; directories recurse
/// depth-first with entries sorted by name so the resulting tree — and
/// hence its canonical encoding — is independent of directory-read order.
/// Symlinks are skipped with a `warn` log entry rather than followed, to
/// avoid a crafted symlink smuggling content from outside the offered tree.
pub fn build_manifest<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<FileNode>> {
    let mut nodes = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        nodes.push(build_node(path, name)?);
    }
    nodes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(nodes)
}

fn build_node(path: &Path, relative_path: String) -> Result<FileNode> {
    let metadata = fs::symlink_metadata(path).map_err(|source| {
        ManifestError::Io {
            path: path.display().to_string(),
            source,
        }
    })?;

    if metadata.is_symlink() {
        tracing::warn!(path = %path.display(), "skipping symlink in manifest");
        return Ok(FileNode {
            relative_path,
            is_directory: false,
            size: 0,
            sha256_hex: String::new(),
            children: Vec::new(),
        });
    }

    if metadata.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(path)
            .map_err(|source| ManifestError::Io {
                path: path.display().to_string(),
                source,
            })?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let child_name = entry.file_name().to_string_lossy().into_owned();
            let child_relative = format!("{relative_path}/{child_name}");
            children.push(build_node(&entry.path(), child_relative)?);
        }

        Ok(FileNode {
            relative_path,
            is_directory: true,
            size: 0,
            sha256_hex: String::new(),
            children,
        })
    } else {
        let (size, sha256_hex) = hash_file(path)?;
        Ok(FileNode {
            relative_path,
            is_directory: false,
            size,
            sha256_hex,
            children: Vec::new(),
        })
    }
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let file = fs::File::open(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buf).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        total += read as u64;
    }

    Ok((total, hex::encode(hasher.finalize())))
}

/// Total byte size of every leaf under `nodes`, recursively.
pub fn total_size(nodes: &[FileNode]) -> u64 {
    nodes
        .iter()
        .map(|n| {
            if n.is_directory {
                total_size(&n.children)
            } else {
                n.size
            }
        })
        .sum()
}

/// Flatten a tree into its leaf (file, not directory) nodes, depth-first.
pub fn leaves(nodes: &[FileNode]) -> Vec<&FileNode> {
    let mut out = Vec::new();
    collect_leaves(nodes, &mut out);
    out
}

fn collect_leaves<'a>(nodes: &'a [FileNode], out: &mut Vec<&'a FileNode>) {
    for node in nodes {
        if node.is_directory {
            collect_leaves(&node.children, out);
        } else {
            out.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builds_flat_file_manifest() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("hello.txt");
        fs::write(&file_path, b"hello world").unwrap();

        let manifest = build_manifest(&[file_path]).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].relative_path, "hello.txt");
        assert_eq!(manifest[0].size, 11);
        assert_eq!(
            manifest[0].sha256_hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn recurses_directories_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"a").unwrap();

        let manifest = build_manifest(&[dir.path().join("sub")]).unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(manifest[0].is_directory);
        let names: Vec<_> = manifest[0]
            .children
            .iter()
            .map(|c| c.relative_path.clone())
            .collect();
        assert_eq!(names, vec!["sub/a.txt", "sub/b.txt"]);
    }

    #[test]
    fn total_size_sums_leaves_only() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"abc").unwrap();
        fs::write(dir.path().join("top.txt"), b"de").unwrap();

        let manifest =
            build_manifest(&[dir.path().join("sub"), dir.path().join("top.txt")])
                .unwrap();
        assert_eq!(total_size(&manifest), 5);
        assert_eq!(leaves(&manifest).len(), 2);
    }
}
