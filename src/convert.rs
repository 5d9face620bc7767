//! Export entry points.
//!
//! [`export`] runs the whole pipeline: assemble chapters from the vault, hand
//! them to the external compiler and copy the finished book into place.
//! [`render_markdown`] stops after assembly and returns the combined markdown
//! with its images staged next to it, for callers that run their own
//! compiler or just want clean markdown.

use crate::assemble;
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::output::{Chapter, ExportOutput, ExportStats, MarkdownOutput, NoteDescriptor};
use crate::pipeline::attach::AssetDirectory;
use crate::pipeline::compile::{self, CompilerCommand};
use crate::pipeline::input::Vault;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

/// Export the selected notes of a vault as an EPUB.
///
/// # Arguments
/// * `vault_root` — Root directory of the vault
/// * `notes` — Ordered selection; excluded entries are skipped
/// * `output_path` — Where the book should be written
/// * `config` — Export configuration
///
/// # Returns
/// `Ok(ExportOutput)` on success, even if some notes were missing or some
/// embeds could not be resolved (see `output.stats` and `Chapter::issues`).
/// When `output_path` already exists and `config.overwrite` is false, the
/// book is written to the first free `name_N.ext` instead; the path actually
/// used is in `output.output_path`.
///
/// # Errors
/// Returns `Err(ExportError)` only for fatal errors:
/// - vault missing or not a directory
/// - empty selection, or no selected note could be read
/// - the compiler could not be launched, failed, timed out or wrote nothing
/// - the output file could not be written
pub async fn export(
    vault_root: impl AsRef<Path>,
    notes: &[NoteDescriptor],
    output_path: impl AsRef<Path>,
    config: &ExportConfig,
) -> Result<ExportOutput, ExportError> {
    let total_start = Instant::now();
    let output_path = output_path.as_ref();

    // ── Step 1: Validate input ───────────────────────────────────────────
    let vault = Vault::open(vault_root)?;
    if notes.is_empty() {
        return Err(ExportError::NoNotesSelected);
    }
    info!(
        "Exporting {} notes from {} to {}",
        notes.len(),
        vault.root().display(),
        output_path.display()
    );

    // ── Step 2: Scoped workspace ─────────────────────────────────────────
    // Removed on every return path, including compiler failures. The
    // assembly task holds its own handle, so a dropped export future cannot
    // delete the directory while images are still being copied into it.
    let workspace = Arc::new(create_workspace(config)?);
    let workdir = workspace.path().to_path_buf();
    debug!("Workspace: {}", workdir.display());

    // ── Step 3: Assemble chapters ────────────────────────────────────────
    let assemble_start = Instant::now();
    let (chapters, staged_images) = assemble_blocking(&vault, notes, &workspace, config).await?;
    let assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;
    ensure_some_chapter(&chapters, notes.len())?;

    // ── Step 4: Write compiler inputs ────────────────────────────────────
    let inputs = compile::write_inputs(config, &workdir, &chapters)?;

    // ── Step 5: Run the compiler ─────────────────────────────────────────
    let book = workdir.join("book.epub");
    let command = CompilerCommand::build(config, &workdir, &inputs, &book);
    if let Some(ref cb) = config.progress_callback {
        cb.on_compile_start(&command.program_name());
    }
    let compile_start = Instant::now();
    command.run(&workdir, config.compile_timeout_secs).await?;
    let compile_duration_ms = compile_start.elapsed().as_millis() as u64;
    info!("Compiled book in {}ms", compile_duration_ms);

    // ── Step 6: Copy to destination ──────────────────────────────────────
    let final_path = unique_output_path(output_path, config.overwrite);
    copy_atomic(&book, &final_path).await?;

    let mut stats = chapter_stats(notes.len(), &chapters, staged_images);
    stats.assemble_duration_ms = assemble_duration_ms;
    stats.compile_duration_ms = compile_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Export complete: {}/{} chapters, {} images → {} ({}ms)",
        stats.exported_chapters,
        stats.exported_chapters + stats.failed_chapters,
        stats.staged_images,
        final_path.display(),
        stats.total_duration_ms
    );

    Ok(ExportOutput {
        output_path: final_path,
        chapters,
        stats,
    })
}

/// Synchronous wrapper around [`export`].
///
/// Creates a temporary tokio runtime internally.
pub fn export_sync(
    vault_root: impl AsRef<Path>,
    notes: &[NoteDescriptor],
    output_path: impl AsRef<Path>,
    config: &ExportConfig,
) -> Result<ExportOutput, ExportError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExportError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(export(vault_root, notes, output_path, config))
}

/// Run only the normalisation engine and return the combined markdown.
///
/// Images are staged under `asset_root/<asset_dir_name>`, so the markdown is
/// valid when written directly into `asset_root`. No compiler is involved.
pub fn render_markdown(
    vault_root: impl AsRef<Path>,
    notes: &[NoteDescriptor],
    asset_root: impl AsRef<Path>,
    config: &ExportConfig,
) -> Result<MarkdownOutput, ExportError> {
    let total_start = Instant::now();
    let vault = Vault::open(vault_root)?;
    if notes.is_empty() {
        return Err(ExportError::NoNotesSelected);
    }

    let mut assets = asset_directory(asset_root.as_ref(), config);
    let chapters = assemble::assemble(&vault, notes, config, &mut assets);
    ensure_some_chapter(&chapters, notes.len())?;

    let markdown = assemble::combine(&chapters, &config.chapter_separator);
    let mut stats = chapter_stats(notes.len(), &chapters, assets.staged_count());
    stats.assemble_duration_ms = total_start.elapsed().as_millis() as u64;
    stats.total_duration_ms = stats.assemble_duration_ms;

    Ok(MarkdownOutput {
        markdown,
        chapters,
        stats,
    })
}

/// `path` itself, or the first `stem_N.ext` that does not exist yet.
pub fn unique_output_path(path: &Path, overwrite: bool) -> PathBuf {
    if overwrite || !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    (1..)
        .map(|n| match &ext {
            Some(ext) => parent.join(format!("{stem}_{n}.{ext}")),
            None => parent.join(format!("{stem}_{n}")),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn asset_directory(root: &Path, config: &ExportConfig) -> AssetDirectory {
    let name = &config.normalize.asset_dir_name;
    AssetDirectory::new(root.join(name), name.clone(), config.normalize.image_naming)
}

fn create_workspace(config: &ExportConfig) -> Result<TempDir, ExportError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("vault2epub-");
    match &config.workspace_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|source| ExportError::Workspace { source })
}

/// Run the synchronous engine on the blocking pool.
///
/// The task keeps `workspace` alive until it finishes, even if the caller
/// stops waiting for it.
async fn assemble_blocking(
    vault: &Vault,
    notes: &[NoteDescriptor],
    workspace: &Arc<TempDir>,
    config: &ExportConfig,
) -> Result<(Vec<Chapter>, usize), ExportError> {
    let vault = vault.clone();
    let notes = notes.to_vec();
    let config = config.clone();
    let workspace = Arc::clone(workspace);

    tokio::task::spawn_blocking(move || {
        let mut assets = asset_directory(workspace.path(), &config);
        let chapters = assemble::assemble(&vault, &notes, &config, &mut assets);
        let staged = assets.staged_count();
        drop(workspace);
        (chapters, staged)
    })
    .await
    .map_err(|e| ExportError::Internal(format!("assembly task failed: {e}")))
}

fn ensure_some_chapter(chapters: &[Chapter], selected: usize) -> Result<(), ExportError> {
    if chapters.iter().any(Chapter::is_ok) {
        Ok(())
    } else {
        Err(ExportError::NothingToExport { selected })
    }
}

fn chapter_stats(selected: usize, chapters: &[Chapter], staged_images: usize) -> ExportStats {
    let exported = chapters.iter().filter(|c| c.is_ok()).count();
    ExportStats {
        selected_notes: selected,
        exported_chapters: exported,
        failed_chapters: chapters.len() - exported,
        staged_images,
        issues: chapters.iter().map(|c| c.issues.len()).sum(),
        ..ExportStats::default()
    }
}

/// Copy `from` to `to` via a temporary sibling and a rename, so `to` never
/// holds a partial file.
async fn copy_atomic(from: &Path, to: &Path) -> Result<(), ExportError> {
    let write_err = |source| ExportError::OutputWriteFailed {
        path: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let file_name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    let tmp_path = to.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::copy(from, &tmp_path).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, to).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}
