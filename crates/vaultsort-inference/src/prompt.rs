//! Prompt assembly for note classification.

use vaultsort_core::{AuxiliaryContext, ProviderRequest};

use crate::classifier::ClassifyInput;

/// System instructions sent with every classification request.
pub const SYSTEM_PROMPT: &str = "You organize a personal knowledge vault. \
Assign the note to exactly one Map of Content (MOC) category, suggest tags, \
and name related notes. Prefer existing categories and tags when they fit. \
Respond with a single JSON object with the keys \
\"category\" (string), \"confidence\" (number between 0 and 1), \
\"rationale\" (one sentence), \"tags\" (array of strings), and \
\"related\" (array of note titles).";

/// Longest list of context items forwarded per kind.
const MAX_CONTEXT_ITEMS: usize = 200;

/// Sampling parameters applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: vaultsort_core::defaults::TEMPERATURE,
            max_tokens: vaultsort_core::defaults::MAX_OUTPUT_TOKENS,
        }
    }
}

/// Build the provider request for one note.
///
/// Content longer than `max_content_chars` is cut at a character boundary.
pub fn build_request(
    input: &ClassifyInput,
    context: &AuxiliaryContext,
    max_content_chars: usize,
    sampling: Sampling,
) -> ProviderRequest {
    let mut prompt = String::new();

    if !context.categories.is_empty() {
        push_list(&mut prompt, "Existing categories", &context.categories);
    }
    if !context.known_tags.is_empty() {
        push_list(&mut prompt, "Tags already in use", &context.known_tags);
    }
    if !context.candidate_related.is_empty() {
        push_list(&mut prompt, "Candidate related notes", &context.candidate_related);
    }

    prompt.push_str("Note title: ");
    prompt.push_str(&input.title);
    prompt.push_str("\n\nNote content:\n");
    let (content, truncated) = truncate_chars(&input.content, max_content_chars);
    prompt.push_str(content);
    if truncated {
        prompt.push_str("\n[... truncated]");
    }
    prompt.push('\n');

    ProviderRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        temperature: sampling.temperature,
        max_tokens: sampling.max_tokens,
        json_mode: true,
    }
}

fn push_list(prompt: &mut String, heading: &str, items: &[String]) {
    prompt.push_str(heading);
    prompt.push_str(": ");
    let shown: Vec<&str> = items
        .iter()
        .take(MAX_CONTEXT_ITEMS)
        .map(String::as_str)
        .collect();
    prompt.push_str(&shown.join(", "));
    prompt.push_str("\n\n");
}

fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
