//! Error types for the vault2epub library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExportError`] — **Fatal**: the export cannot proceed at all (missing
//!   vault, empty selection, the external compiler exited non-zero). Returned
//!   as `Err(ExportError)` from the top-level `export*` functions.
//!
//! * [`NoteIssue`] — **Non-fatal**: one embed, link target or image could not
//!   be resolved, or one file could not be read. The engine substitutes an
//!   inline placeholder and keeps going; the issue is stored in
//!   [`crate::output::Chapter::issues`] so callers can report it afterwards.
//!
//! Completeness of the book wins over strictness: a missing image never
//! costs the reader the rest of the chapter.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the vault2epub library.
///
/// Per-note failures use [`NoteIssue`] and are stored in
/// [`crate::output::Chapter`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExportError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Vault root does not exist.
    #[error("Vault not found: '{path}'\nCheck the path exists and is readable.")]
    VaultNotFound { path: PathBuf },

    /// Vault root exists but is a file.
    #[error("Vault path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The caller supplied no note descriptors at all.
    #[error("No notes selected for export")]
    NoNotesSelected,

    /// Every selected note was excluded, missing or unreadable.
    #[error("Nothing to export: none of the {selected} selected notes could be read")]
    NothingToExport { selected: usize },

    /// A selection file could not be parsed.
    #[error("Invalid note selection '{path}': {detail}")]
    InvalidSelection { path: PathBuf, detail: String },

    // ── Compiler errors ───────────────────────────────────────────────────
    /// The compiler binary could not be launched (usually not installed).
    #[error("Failed to launch '{program}': {source}\nInstall it or point --compiler-path at the binary.")]
    CompilerNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The compiler exited with a non-zero status.
    #[error("{program} failed (exit code {}):\n{stderr}", exit_code(.code))]
    CompilerFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The compiler did not finish in time and was killed.
    #[error("{program} timed out after {secs}s")]
    CompilerTimeout { program: String, secs: u64 },

    /// The compiler reported success but produced no output file.
    #[error("{program} exited successfully but did not create '{path}'")]
    CompilerOutputMissing { program: String, path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The scoped working directory could not be created or written.
    #[error("Failed to prepare working directory: {source}")]
    Workspace {
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal problem found while normalising one note.
///
/// The offending reference is replaced by placeholder text in the output;
/// this value records what happened and where.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NoteIssue {
    /// `![[target]]` named a note that does not exist in the vault.
    #[error("{note}: embedded note not found: {target}")]
    NoteNotFound { note: PathBuf, target: String },

    /// `![[image.png]]` could not be located anywhere in the vault.
    #[error("{note}: image not found: {target}")]
    ImageNotFound { note: PathBuf, target: String },

    /// The embed target is already being expanded further up the chain.
    #[error("{note}: circular embed of {target} skipped")]
    CycleDetected { note: PathBuf, target: String },

    /// Embeds nest deeper than the configured limit.
    #[error("{note}: embed depth limit {limit} reached at {target}")]
    DepthExceeded {
        note: PathBuf,
        target: String,
        limit: usize,
    },

    /// Reading, decoding or copying a file failed.
    #[error("{path}: {detail}")]
    Io { path: PathBuf, detail: String },
}

fn exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

impl NoteIssue {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        NoteIssue::Io {
            path: path.into(),
            detail: err.to_string(),
        }
    }
}
