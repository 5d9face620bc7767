//! Input descriptors and result types shared by the library and the CLI.

use crate::error::NoteIssue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One entry of the ordered note selection handed to the assembler.
///
/// Matches the shape produced by a file-selection front end:
/// `{ "name": "Intro.md", "path": "/vault/Intro.md", "relative_path": "Intro.md", "included": true }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDescriptor {
    /// File name including the `.md` extension.
    pub name: String,
    /// Absolute path of the note.
    pub path: PathBuf,
    /// Path relative to the vault root.
    #[serde(default)]
    pub relative_path: PathBuf,
    /// Excluded notes stay in the list but are skipped.
    #[serde(default = "default_included", alias = "is_included")]
    pub included: bool,
}

fn default_included() -> bool {
    true
}

impl NoteDescriptor {
    /// Describe a note at `path` inside `vault_root`, included by default.
    pub fn from_path(vault_root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_path = path
            .strip_prefix(vault_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&name));
        Self {
            name,
            path,
            relative_path,
            included: true,
        }
    }

    /// File name without the `.md` extension; used for synthesised headings.
    pub fn display_name(&self) -> &str {
        self.name.strip_suffix(".md").unwrap_or(&self.name)
    }
}

/// One normalised note of the assembled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based position among the included notes.
    pub index: usize,
    /// Display name (file name without extension).
    pub name: String,
    /// Absolute path of the source note.
    pub source: PathBuf,
    /// Normalised markdown, including a synthesised heading when applicable.
    /// Empty when the note could not be read.
    pub markdown: String,
    /// Non-fatal problems met while normalising this note.
    pub issues: Vec<NoteIssue>,
    /// Set when the note itself could not be read; such chapters are left
    /// out of the combined document.
    pub error: Option<String>,
}

impl Chapter {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters collected over a whole export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStats {
    /// Notes in the selection, included or not.
    pub selected_notes: usize,
    /// Included notes that became chapters.
    pub exported_chapters: usize,
    /// Included notes that were missing or unreadable.
    pub failed_chapters: usize,
    /// Images copied into the asset directory.
    pub staged_images: usize,
    /// Total non-fatal issues across all chapters.
    pub issues: usize,
    /// Time spent in the normalisation engine.
    pub assemble_duration_ms: u64,
    /// Time spent waiting for the external compiler.
    pub compile_duration_ms: u64,
    /// Wall-clock time of the whole export.
    pub total_duration_ms: u64,
}

/// Result of a full export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOutput {
    /// Where the packaged book (or combined markdown) was written.
    pub output_path: PathBuf,
    /// Chapters in caller order.
    pub chapters: Vec<Chapter>,
    pub stats: ExportStats,
}

/// Result of a markdown-only run (no compiler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownOutput {
    /// Successful chapters joined with the configured separator.
    pub markdown: String,
    pub chapters: Vec<Chapter>,
    pub stats: ExportStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_from_path() {
        let d = NoteDescriptor::from_path(Path::new("/vault"), "/vault/Books/Dune.md");
        assert_eq!(d.name, "Dune.md");
        assert_eq!(d.relative_path, PathBuf::from("Books/Dune.md"));
        assert_eq!(d.display_name(), "Dune");
        assert!(d.included);
    }

    #[test]
    fn descriptor_deserialises_selection_entry() {
        let json = r#"{"name": "Intro.md", "path": "/v/Intro.md", "is_included": false}"#;
        let d: NoteDescriptor = serde_json::from_str(json).unwrap();
        assert!(!d.included);
        assert_eq!(d.relative_path, PathBuf::new());

        let json = r#"{"name": "Intro.md", "path": "/v/Intro.md"}"#;
        let d: NoteDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.included, "included defaults to true");
    }
}
