#![forbid(unsafe_code)]

//! Lightweight repository structure scan used to seed generation prompts.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CodeforgeError;

/// Directories never worth descending into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
];

/// Marker files that identify the project's toolchain.
const PROJECT_MARKERS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "Dockerfile",
    "docker-compose.yml",
    "Makefile",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    pub total_files: usize,
    /// File counts keyed by extension, e.g. "py" -> 14.
    pub files_by_extension: BTreeMap<String, usize>,
    pub test_files: Vec<String>,
    pub project_markers: Vec<String>,
    pub top_level_dirs: Vec<String>,
}

impl RepositoryAnalysis {
    /// Placeholder used before the workspace exists.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// One-paragraph description fed into agent prompts.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.total_files == 0 {
            return "repository not yet analyzed".to_owned();
        }
        let mut out = format!("{} files", self.total_files);
        let mut kinds: Vec<(&String, &usize)> = self.files_by_extension.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        if let Some((ext, count)) = kinds.first() {
            let _ = write!(out, ", mostly .{ext} ({count})");
        }
        if !self.project_markers.is_empty() {
            let _ = write!(out, "; markers: {}", self.project_markers.join(", "));
        }
        let _ = write!(out, "; {} test file(s)", self.test_files.len());
        out
    }
}

/// Scans a checked-out workspace.
///
/// Depth-limited walk; the result feeds prompt construction, not
/// anything that needs to be exhaustive.
pub fn scan(root: &Path) -> Result<RepositoryAnalysis, CodeforgeError> {
    let mut analysis = RepositoryAnalysis::default();
    walk(root, root, 0, &mut analysis)?;
    analysis.test_files.sort();
    analysis.project_markers.sort();
    analysis.top_level_dirs.sort();
    Ok(analysis)
}

const MAX_DEPTH: usize = 6;

fn walk(
    root: &Path,
    dir: &Path,
    depth: usize,
    analysis: &mut RepositoryAnalysis,
) -> Result<(), CodeforgeError> {
    if depth > MAX_DEPTH {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir).map_err(|source| CodeforgeError::IoPath {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| CodeforgeError::IoPath {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if path.is_dir() {
            if SKIP_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                continue;
            }
            if depth == 0 {
                analysis.top_level_dirs.push(name.clone());
            }
            walk(root, &path, depth + 1, analysis)?;
            continue;
        }

        analysis.total_files += 1;
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            *analysis
                .files_by_extension
                .entry(ext.to_lowercase())
                .or_insert(0) += 1;
        }
        if depth == 0 && PROJECT_MARKERS.contains(&name.as_str()) {
            analysis.project_markers.push(name.clone());
        }

        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if is_test_file(&name) {
            analysis.test_files.push(rel);
        }
    }
    Ok(())
}

fn is_test_file(name: &str) -> bool {
    name.starts_with("test_")
        || name.ends_with("_test.py")
        || name.ends_with("_test.go")
        || name.ends_with(".test.js")
        || name.ends_with(".test.ts")
        || name.ends_with("_test.rs")
}
