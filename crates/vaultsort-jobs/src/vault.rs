//! Vault enumeration.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use vaultsort_core::{AuxiliaryContext, Error, PipelineConfig, Result, TaskInput};

use crate::linker::{frontmatter_tags, split_frontmatter};

/// Which files under the vault root count as notes.
#[derive(Debug, Clone)]
pub struct VaultFilter {
    /// Lowercase extensions without the dot.
    pub extensions: HashSet<String>,
    /// Directory names skipped anywhere in the tree.
    pub exclude_dirs: HashSet<String>,
    /// Absolute directories skipped (review queue, MOC index).
    pub exclude_paths: Vec<PathBuf>,
    pub include_hidden: bool,
}

impl Default for VaultFilter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl VaultFilter {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut exclude_paths = vec![config.review_dir(), config.state_dir()];
        if let Some(moc) = config.moc_dir() {
            exclude_paths.push(moc);
        }
        // Walk entries are canonical; compare against canonical forms.
        let exclude_paths = exclude_paths
            .into_iter()
            .map(|p| std::fs::canonicalize(&p).unwrap_or(p))
            .collect();
        Self {
            extensions: config
                .vault
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: config.vault.exclude_dirs.iter().cloned().collect(),
            exclude_paths,
            include_hidden: false,
        }
    }

    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    fn is_note(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| self.extensions.contains(&e.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Whether the walk should descend into / yield `entry`.
    fn admits(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if !self.include_hidden && name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() {
            if self.exclude_dirs.contains(name.as_ref()) {
                return false;
            }
            if self.exclude_paths.iter().any(|p| p == entry.path()) {
                return false;
            }
        }
        true
    }
}

/// Absolute paths of every note under `root`, sorted.
///
/// The root is canonicalized first, so the same vault always yields the
/// same keys however it was named.
pub fn list_note_paths(root: &Path, filter: &VaultFilter) -> Result<Vec<PathBuf>> {
    let root = match std::fs::canonicalize(root) {
        Ok(r) if r.is_dir() => r,
        _ => {
            return Err(Error::Config(format!(
                "Vault root is not a directory: {}",
                root.display()
            )))
        }
    };
    let root = root.as_path();

    let mut paths = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| filter.admits(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable vault entry");
                continue;
            }
        };
        if entry.file_type().is_file() && filter.is_note(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    debug!(root = %root.display(), count = paths.len(), "Listed vault notes");
    Ok(paths)
}

/// Read every note under `root` into a [`TaskInput`], sorted by path.
///
/// Files that cannot be read are logged and left out.
pub fn scan_vault(root: &Path, filter: &VaultFilter) -> Result<Vec<TaskInput>> {
    let paths = list_note_paths(root, filter)?;
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read(&path) {
            Ok(content) => inputs.push(TaskInput::new(path, content)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable note"),
        }
    }
    info!(root = %root.display(), input_count = inputs.len(), "Vault scanned");
    Ok(inputs)
}

/// Gather the vault's existing taxonomy for prompt context.
///
/// Categories come from MOC file stems, candidate related notes from note
/// titles, and known tags from the notes' frontmatter.
pub fn collect_context(inputs: &[TaskInput], moc_dir: Option<&Path>) -> AuxiliaryContext {
    let mut categories = BTreeSet::new();
    if let Some(dir) = moc_dir {
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == "md") {
                        if let Some(stem) = path.file_stem() {
                            categories.insert(stem.to_string_lossy().into_owned());
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Cannot read MOC directory"),
        }
    }

    let mut titles = BTreeSet::new();
    let mut tags = BTreeSet::new();
    for input in inputs {
        titles.insert(input.title());
        let text = input.text();
        if let (Some(front), _) = split_frontmatter(&text) {
            tags.extend(frontmatter_tags(front));
        }
    }

    AuxiliaryContext {
        categories: categories.into_iter().collect(),
        candidate_related: titles.into_iter().collect(),
        known_tags: tags.into_iter().collect(),
    }
}
