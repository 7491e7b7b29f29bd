//! Document shapes shared by the diff engine and the conflict resolver
//!
//! Files in a configuration tree come in three shapes, chosen by extension:
//!
//! | Extension            | Kind                          |
//! |----------------------|-------------------------------|
//! | `.json`              | [`DocumentKind::Structured`]  |
//! | `.md`, `.markdown`   | [`DocumentKind::Sectioned`]   |
//! | anything else        | [`DocumentKind::Text`]        |
//!
//! Sectioned documents are split at header lines (a trimmed line starting
//! with `#`). Text before the first header forms the [`PREAMBLE`] section.
//! Header-like lines inside fenced code blocks are part of the body, and a
//! repeated header gets a ` (n)` suffix so every section key is unique.

use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Key of the text before the first header
pub const PREAMBLE: &str = "preamble";

/// How a file is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Key/value document (JSON)
    Structured,
    /// Header-structured document (Markdown)
    Sectioned,
    /// Anything else
    Text,
}

impl DocumentKind {
    /// Classify a file by its extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => DocumentKind::Structured,
            Some("md") | Some("markdown") => DocumentKind::Sectioned,
            _ => DocumentKind::Text,
        }
    }
}

/// One section of a sectioned document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Unique key: the trimmed header line, or [`PREAMBLE`]
    pub key: String,
    /// Raw header line; `None` for the preamble
    pub header: Option<String>,
    /// Body lines without the header
    pub lines: Vec<String>,
}

impl Section {
    /// Body joined with newlines
    pub fn body(&self) -> String {
        self.lines.join("\n")
    }

    /// Header text without the leading `#` marks
    pub fn title(&self) -> String {
        match &self.header {
            Some(header) => strip_header(header).to_string(),
            None => PREAMBLE.to_string(),
        }
    }
}

/// A sectioned document that can be edited section by section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionedDocument {
    sections: Vec<Section>,
    trailing_newline: bool,
}

impl SectionedDocument {
    /// Split `content` into sections
    ///
    /// An empty preamble is dropped.
    pub fn parse(content: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        let mut current = Section {
            key: PREAMBLE.to_string(),
            header: None,
            lines: Vec::new(),
        };
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut in_fence = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if is_fence(trimmed) {
                in_fence = !in_fence;
            }
            if !in_fence && trimmed.starts_with('#') && !is_fence(trimmed) {
                let finished = std::mem::replace(
                    &mut current,
                    Section {
                        key: unique_key(trimmed, &mut seen),
                        header: Some(line.to_string()),
                        lines: Vec::new(),
                    },
                );
                if finished.header.is_some() || !finished.lines.is_empty() {
                    sections.push(finished);
                }
                continue;
            }
            current.lines.push(line.to_string());
        }
        if current.header.is_some() || !current.lines.is_empty() {
            sections.push(current);
        }

        Self {
            sections,
            trailing_newline: content.ends_with('\n'),
        }
    }

    /// Sections in document order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Look up a section by key
    pub fn get(&self, key: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.key == key)
    }

    /// Section bodies keyed by section key
    pub fn bodies(&self) -> HashMap<&str, String> {
        self.sections
            .iter()
            .map(|s| (s.key.as_str(), s.body()))
            .collect()
    }

    /// 0-based document line index of each section's first body line
    pub fn body_offsets(&self) -> HashMap<&str, usize> {
        let mut offsets = HashMap::with_capacity(self.sections.len());
        let mut line = 0;
        for section in &self.sections {
            if section.header.is_some() {
                line += 1;
            }
            offsets.insert(section.key.as_str(), line);
            line += section.lines.len();
        }
        offsets
    }

    /// Replace the body of a section, appending the section if it is absent
    ///
    /// A missing preamble is inserted at the top; any other missing section is
    /// appended with `key` as its header line.
    pub fn replace_body(&mut self, key: &str, body: &str) {
        let lines: Vec<String> = body.lines().map(str::to_string).collect();
        if let Some(section) = self.sections.iter_mut().find(|s| s.key == key) {
            section.lines = lines;
            return;
        }

        if key == PREAMBLE {
            self.sections.insert(
                0,
                Section {
                    key: key.to_string(),
                    header: None,
                    lines,
                },
            );
            return;
        }

        if let Some(last) = self.sections.last_mut() {
            if last.lines.last().is_some_and(|l| !l.trim().is_empty()) || last.lines.is_empty() {
                last.lines.push(String::new());
            }
        }
        self.sections.push(Section {
            key: key.to_string(),
            header: Some(key.to_string()),
            lines,
        });
        self.trailing_newline = true;
    }

    /// Render the document back to text
    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        for section in &self.sections {
            if let Some(header) = &section.header {
                lines.push(header);
            }
            lines.extend(section.lines.iter().map(String::as_str));
        }
        let mut out = lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn is_fence(trimmed: &str) -> bool {
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn unique_key(header: &str, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(header.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        header.to_string()
    } else {
        format!("{} ({})", header, count)
    }
}

fn strip_header(line: &str) -> &str {
    line.trim().trim_start_matches('#').trim()
}

/// Locator named by a single line, if it names one
///
/// - Markdown header → header text
/// - `@include X` → `Include: X`
/// - Unindented `key:` line → `key`
pub fn detect_locator(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('#') {
        let title = strip_header(trimmed);
        return (!title.is_empty()).then(|| title.to_string());
    }

    if let Some(pos) = trimmed.find("@include") {
        let target = trimmed[pos + "@include".len()..]
            .split_whitespace()
            .next()
            .map(|t| t.split('#').next().unwrap_or(t))
            .filter(|t| !t.is_empty());
        if let Some(target) = target {
            return Some(format!("Include: {}", target));
        }
    }

    let unindented = !line.starts_with(' ') && !line.starts_with('\t');
    if unindented && trimmed.ends_with(':') && trimmed.len() > 1 {
        return Some(trimmed.trim_end_matches(':').to_string());
    }

    None
}

/// Nearest locator at or above `index`
pub fn enclosing_locator(lines: &[&str], index: usize) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let start = index.min(lines.len() - 1);
    lines[..=start].iter().rev().find_map(|line| detect_locator(line))
}

/// Jaccard similarity of the word sets of two texts
///
/// Two empty texts are identical (1.0).
pub fn word_similarity(a: &str, b: &str) -> f64 {
    jaccard(
        a.split_whitespace().collect(),
        b.split_whitespace().collect(),
    )
}

/// Jaccard similarity of the line sets of two texts
pub fn line_similarity(a: &str, b: &str) -> f64 {
    jaccard(a.lines().collect(), b.lines().collect())
}

fn jaccard(a: HashSet<&str>, b: HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}
