//! Review sinks for low-confidence classifications.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use vaultsort_core::{Result, ReviewItem, ReviewSink};

/// Writes one Markdown file per review item into a directory.
///
/// File names combine the note stem and the queue timestamp, so repeated
/// reviews of the same note never overwrite each other.
pub struct DirectoryReviewSink {
    dir: PathBuf,
}

/// Frontmatter block of a review artifact.
#[derive(Serialize)]
struct ReviewFrontmatter<'a> {
    source: &'a str,
    suggested_moc: &'a str,
    confidence: f64,
    reason: &'a str,
    tags: &'a [String],
    related: &'a [String],
    queued_at: String,
}

impl DirectoryReviewSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(item: &ReviewItem) -> String {
        let stem = Path::new(&item.path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "note".to_string());
        format!(
            "{}-{}.md",
            sanitize_file_stem(&stem),
            item.queued_at.format("%Y%m%dT%H%M%S%.3f")
        )
    }

    fn render(item: &ReviewItem) -> Result<String> {
        let front = ReviewFrontmatter {
            source: &item.path,
            suggested_moc: &item.result.category,
            confidence: item.confidence,
            reason: &item.reason,
            tags: &item.result.tags,
            related: &item.result.related,
            queued_at: item.queued_at.to_rfc3339(),
        };
        let yaml = serde_yaml::to_string(&front)?;
        let mut out = format!("---\n{}---\n\n# Review: {}\n\n", yaml, item.path);
        out.push_str(&format!(
            "Suggested MOC **{}** with confidence {:.2}.\n",
            item.result.category, item.confidence
        ));
        if !item.result.rationale.is_empty() {
            out.push_str(&format!("\n> {}\n", item.result.rationale));
        }
        Ok(out)
    }
}

#[async_trait]
impl ReviewSink for DirectoryReviewSink {
    async fn submit(&self, item: ReviewItem) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(&item));
        let body = Self::render(&item)?;
        tokio::fs::write(&path, body).await?;
        info!(
            path = %item.path,
            confidence = item.confidence,
            artifact = %path.display(),
            "Queued note for review"
        );
        Ok(())
    }
}

/// Collects review items in memory.
#[derive(Default)]
pub struct MemoryReviewSink {
    items: Mutex<Vec<ReviewItem>>,
}

impl MemoryReviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<ReviewItem> {
        vaultsort_store::persist::lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        vaultsort_store::persist::lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReviewSink for MemoryReviewSink {
    async fn submit(&self, item: ReviewItem) -> Result<()> {
        debug!(path = %item.path, "Review item recorded");
        vaultsort_store::persist::lock(&self.items).push(item);
        Ok(())
    }
}

/// Replace characters that are unsafe in file names.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
