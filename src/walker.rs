//! File tree enumeration for a materialized repository.
//!
//! Walks the workspace depth-first (sorted by name, symlinks not followed,
//! depth bounded) and yields an ordered list of [`FileNode`]s. Ignored
//! directories are pruned without descending into them; ignored file names
//! are dropped. [`select_files`] then applies the extension ignore list that
//! decides which files reach the chunker.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::IngestConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry of the repository tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Relative to the walk root, `/`-separated.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub kind: NodeKind,
}

/// Directory and file-name filters applied during the walk.
#[derive(Debug, Clone)]
pub struct WalkFilter {
    ignored_dirs: HashSet<String>,
    ignored_files: HashSet<String>,
    max_depth: usize,
}

impl WalkFilter {
    pub fn new(ignored_dirs: &[String], ignored_files: &[String], max_depth: usize) -> Self {
        Self {
            ignored_dirs: ignored_dirs.iter().cloned().collect(),
            ignored_files: ignored_files.iter().cloned().collect(),
            max_depth,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            &config.ignored_dirs,
            &config.ignored_files,
            config.max_depth,
        )
    }

    /// Names are matched against both sets regardless of entry type.
    fn is_ignored_name(&self, name: &str) -> bool {
        self.ignored_dirs.contains(name) || self.ignored_files.contains(name)
    }
}

/// Enumerate `root` depth-first, skipping ignored directories and files.
///
/// Returned order is the traversal order: a directory appears immediately
/// before its contents, and siblings are sorted by name.
pub fn walk_tree(root: &Path, filter: &WalkFilter) -> Result<Vec<FileNode>> {
    let mut nodes = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(filter.max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !filter.is_ignored_name(&name)
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let file_type = entry.file_type();

        // Symlinks are neither followed nor indexed.
        let kind = if file_type.is_dir() {
            NodeKind::Directory
        } else if file_type.is_file() {
            NodeKind::File
        } else {
            continue;
        };

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        nodes.push(FileNode {
            path: normalize_relative(&relative.to_string_lossy()),
            name: entry.file_name().to_string_lossy().to_string(),
            kind,
        });
    }

    Ok(nodes)
}

/// Keep only the files of a tree listing, preserving order.
pub fn flatten_files(nodes: Vec<FileNode>) -> Vec<FileNode> {
    nodes
        .into_iter()
        .filter(|n| n.kind == NodeKind::File)
        .collect()
}

/// Apply the ingestion-time path and extension filters.
pub fn select_files(files: Vec<FileNode>, config: &IngestConfig) -> Vec<FileNode> {
    files
        .into_iter()
        .filter(|f| is_selected_path(&f.path, config))
        .collect()
}

/// Whether a relative path would be chunked at ingestion time.
///
/// Shared with the remote file counter so the file ceiling is measured
/// against the same set of files that ingestion would process.
pub fn is_selected_path(path: &str, config: &IngestConfig) -> bool {
    let mut segments = path.split('/').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if config.ignored_dirs.iter().any(|d| d == segment) {
            return false;
        }
        if is_last && config.ignored_files.iter().any(|f| f == segment) {
            return false;
        }
    }

    match extension_of(path) {
        Some(ext) => {
            let dotted = format!(".{}", ext);
            !config
                .ignored_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&dotted))
        }
        None => true,
    }
}

/// Lower-cased extension of the final path component, without the dot.
///
/// Dotfiles such as `.gitignore` count as having extension `gitignore`.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Convert a path to forward slashes with no leading slash.
pub fn normalize_relative(path: &str) -> String {
    let forward = path.replace('\\', "/");
    forward.trim_start_matches('/').to_string()
}
