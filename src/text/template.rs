//! Template processing: one multiline template in, bounded message chunks out.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::text::{graphemes, ZERO_WIDTH_JOINER};

/// Convert a template into an ordered sequence of sendable chunks.
///
/// Lines are processed independently: optional zero-width noise first, then
/// greedy grouping into chunks of at most `max_len` grapheme clusters.
/// Chunks are recomputed every round, so noise positions differ per round.
/// Empty and whitespace-only chunks are dropped. `max_len < 1` clamps to 1.
pub fn process(template: &str, max_len: usize, inject_noise: bool) -> Vec<String> {
    let max_len = max_len.max(1);

    template
        .split('\n')
        .flat_map(|line| {
            let line = if inject_noise && !line.trim().is_empty() {
                inject_noise_char(line)
            } else {
                line.to_string()
            };
            split_line(&line, max_len)
        })
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

/// Greedily group a line's grapheme clusters into chunks of ≤ `max_len`.
fn split_line(line: &str, max_len: usize) -> Vec<String> {
    let clusters = graphemes(line);
    clusters
        .chunks(max_len)
        .map(|chunk| chunk.concat())
        .collect()
}

/// Insert one zero-width joiner at a uniformly random grapheme boundary,
/// position in `[0, len]` inclusive.
fn inject_noise_char(line: &str) -> String {
    let position = rand::thread_rng().gen_range(0..=graphemes(line).len());
    insert_at_boundary(line, position)
}

/// Insert the noise character at grapheme boundary `position`.
fn insert_at_boundary(line: &str, position: usize) -> String {
    let clusters = graphemes(line);
    let mut out = String::with_capacity(line.len() + ZERO_WIDTH_JOINER.len_utf8());
    for (i, cluster) in clusters.iter().enumerate() {
        if i == position {
            out.push(ZERO_WIDTH_JOINER);
        }
        out.push_str(cluster);
    }
    if position >= clusters.len() {
        out.push(ZERO_WIDTH_JOINER);
    }
    out
}

/// Ordered list of user-authored templates with exactly one active by index.
///
/// Mutated by the surrounding application through the engine's settings
/// actions; the dispatch loop only ever reads a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSet {
    templates: Vec<String>,
    active: usize,
}

impl TemplateSet {
    /// Build from persisted parts, clamping an out-of-range index.
    pub fn new(templates: Vec<String>, active: usize) -> Self {
        let active = if templates.is_empty() {
            0
        } else {
            active.min(templates.len() - 1)
        };
        Self { templates, active }
    }

    /// Text of the active template, empty if none exist.
    pub fn active_text(&self) -> &str {
        self.templates
            .get(self.active)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn all(&self) -> &[String] {
        &self.templates
    }

    /// Select the active template by index.
    pub fn select(&mut self, index: usize) -> Result<(), ValidationError> {
        if index >= self.templates.len() {
            return Err(ValidationError::TemplateIndex(index));
        }
        self.active = index;
        Ok(())
    }

    /// Replace the active template's text, creating the first slot if empty.
    pub fn set_active_text(&mut self, text: impl Into<String>) {
        if self.templates.is_empty() {
            self.templates.push(text.into());
            self.active = 0;
        } else {
            self.templates[self.active] = text.into();
        }
    }

    /// Append a blank template and make it active.
    pub fn add(&mut self) {
        self.templates.push(String::new());
        self.active = self.templates.len() - 1;
    }

    /// Remove the active template. Kept as a no-op while only one remains,
    /// so there is always an active slot.
    pub fn remove_active(&mut self) {
        if self.templates.len() > 1 {
            self.templates.remove(self.active);
            self.active = self.active.saturating_sub(1);
        }
    }
}
