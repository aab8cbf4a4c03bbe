//! Note linkers: write a classification back into the vault.
//!
//! [`FrontmatterLinker`] sets `moc`, `tags`, `related`, `confidence`, and
//! `classified_at` in the note's YAML frontmatter, keeping every other key,
//! and lists the note in `<moc_dir>/<category>.md`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_yaml::{Mapping, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vaultsort_core::{ClassificationResult, Error, Fingerprint, NoteLinker, Result, TaskInput};
use vaultsort_store::persist::write_bytes_atomic;

use crate::review::sanitize_file_stem;

/// Annotates notes in place and maintains MOC index files.
pub struct FrontmatterLinker {
    moc_dir: Option<PathBuf>,
    /// Serializes read-modify-write of MOC files across workers.
    moc_lock: Mutex<()>,
}

impl FrontmatterLinker {
    pub fn new(moc_dir: Option<PathBuf>) -> Self {
        Self {
            moc_dir,
            moc_lock: Mutex::new(()),
        }
    }

    /// Append `- [[title]]` to the category's MOC file unless already listed.
    async fn add_to_moc(&self, dir: &Path, category: &str, title: &str) -> Result<bool> {
        let _guard = self.moc_lock.lock().await;
        let path = dir.join(format!("{}.md", sanitize_file_stem(category)));
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => format!("# {}\n\n", category),
            Err(e) => return Err(e.into()),
        };

        let link = format!("[[{}]]", title);
        if existing.contains(&link) {
            return Ok(false);
        }
        let mut updated = existing;
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&format!("- {}\n", link));
        write_file(path.clone(), updated.into_bytes()).await?;
        debug!(moc = %path.display(), note = title, "Linked note into MOC");
        Ok(true)
    }
}

#[async_trait]
impl NoteLinker for FrontmatterLinker {
    async fn link(
        &self,
        input: &TaskInput,
        result: &ClassificationResult,
    ) -> Result<Option<Fingerprint>> {
        // Never overwrite edits made after the scan.
        let on_disk = tokio::fs::read(&input.path).await?;
        if Fingerprint::of(&on_disk) != input.fingerprint() {
            warn!(path = %input.path.display(), "Note edited since scan, not linking");
            return Err(Error::NoteChanged(input.path.display().to_string()));
        }

        let original = input.text();
        let annotated = annotate(&original, result)?;

        let rewritten = if annotated != original {
            let bytes = annotated.into_bytes();
            let fingerprint = Fingerprint::of(&bytes);
            write_file(input.path.clone(), bytes).await?;
            Some(fingerprint)
        } else {
            None
        };

        if let Some(dir) = &self.moc_dir {
            self.add_to_moc(dir, &result.category, &input.title()).await?;
        }

        info!(
            path = %input.path.display(),
            category = %result.category,
            rewritten = rewritten.is_some(),
            "Note linked"
        );
        Ok(rewritten)
    }
}

/// Leaves the vault untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLinker;

#[async_trait]
impl NoteLinker for NoopLinker {
    async fn link(
        &self,
        input: &TaskInput,
        result: &ClassificationResult,
    ) -> Result<Option<Fingerprint>> {
        debug!(path = %input.path.display(), category = %result.category, "Dry run, note not modified");
        Ok(None)
    }
}

async fn write_file(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &bytes))
        .await
        .map_err(|e| Error::Internal(format!("write task failed: {}", e)))?
}

/// Split a note into its YAML frontmatter (without delimiters) and body.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        Some(r) => r,
        None => return (None, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

/// Return `text` with the classification merged into its frontmatter.
pub fn annotate(text: &str, result: &ClassificationResult) -> Result<String> {
    let (front, body) = split_frontmatter(text);
    let mut map = match front {
        Some(yaml) if !yaml.trim().is_empty() => {
            serde_yaml::from_str::<Mapping>(yaml).map_err(|e| {
                Error::Serialization(format!("frontmatter is not a YAML mapping: {}", e))
            })?
        }
        _ => Mapping::new(),
    };

    map.insert(
        key("moc"),
        Value::String(format!("[[{}]]", result.category)),
    );

    let mut tags = existing_tags(map.get(key("tags")));
    for tag in &result.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    if !tags.is_empty() {
        map.insert(key("tags"), string_seq(tags));
    }

    if !result.related.is_empty() {
        let related = result
            .related
            .iter()
            .map(|r| format!("[[{}]]", r))
            .collect();
        map.insert(key("related"), string_seq(related));
    }

    let confidence = (result.confidence * 100.0).round() / 100.0;
    map.insert(key("confidence"), Value::from(confidence));

    // Keep the timestamp from a previous identical annotation so re-linking
    // the same result does not rewrite the note.
    let unchanged = front.is_some_and(|yaml| same_annotation(&map, yaml));
    if !unchanged {
        map.insert(key("classified_at"), Value::String(Utc::now().to_rfc3339()));
    }

    let yaml = serde_yaml::to_string(&map)?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}

fn same_annotation(merged: &Mapping, previous_yaml: &str) -> bool {
    let Ok(previous) = serde_yaml::from_str::<Mapping>(previous_yaml) else {
        return false;
    };
    if !previous.contains_key(key("classified_at")) {
        return false;
    }
    ["moc", "tags", "related", "confidence"]
        .iter()
        .all(|k| previous.get(key(k)) == merged.get(key(k)))
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn string_seq(items: Vec<String>) -> Value {
    Value::Sequence(items.into_iter().map(Value::String).collect())
}

/// Tags listed in a frontmatter block; empty when it does not parse.
pub fn frontmatter_tags(yaml: &str) -> Vec<String> {
    serde_yaml::from_str::<Mapping>(yaml)
        .map(|map| existing_tags(map.get(key("tags"))))
        .unwrap_or_default()
}

fn existing_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
