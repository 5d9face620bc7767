//! CLI binary for vault2epub.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExportConfig`, picks the notes to export and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vault2epub::{
    export, find_note, render_markdown, unique_output_path, Chapter, ChapterSeparator,
    CompilerKind, EmbedStyle, ExportConfig, ExportError, ExportProgressCallback, ImageNaming,
    NoteDescriptor, ProgressCallback, Vault,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the vault is scanned, a bar
/// while chapters are assembled, and a spinner again while the compiler runs.
struct CliProgressCallback {
    bar: ProgressBar,
    chapter_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Scanning vault…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chapter_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} notes  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Assembling");
    }

    fn elapsed_secs(&self) -> f64 {
        self.chapter_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExportProgressCallback for CliProgressCallback {
    fn on_export_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Assembling {total} notes…"))
        ));
    }

    fn on_chapter_start(&self, _index: usize, _total: usize, name: &str) {
        if let Ok(mut t) = self.chapter_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_chapter_complete(&self, index: usize, total: usize, name: &str, markdown_len: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chapter_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}",
            red("✗"),
            index,
            total,
            name,
            red(error),
        ));
        self.bar.inc(1);
    }

    fn on_export_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        let mark = if failed == 0 { green("✔") } else { yellow("⚠") };
        self.bar.println(format!(
            "{} {}/{} notes assembled{}",
            mark,
            bold(&success_count.to_string()),
            total,
            if failed > 0 {
                format!("  ({} skipped)", red(&failed.to_string()))
            } else {
                String::new()
            }
        ));
        self.bar.set_style(Self::spinner_style());
        self.bar.set_prefix("Packaging");
        self.bar.set_message("");
    }

    fn on_compile_start(&self, program: &str) {
        self.bar.set_message(format!("running {program}…"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every note in the vault, default title, pandoc
  vault2epub ~/Vault

  # A folder of the vault, with a title and an explicit output file
  vault2epub ~/Vault --folder Books/Dune --title "Dune Notes" -o dune.epub

  # Specific notes, in this order
  vault2epub ~/Vault Introduction "Chapter 1" "Chapter 2"

  # Ordered selection exported by another tool
  vault2epub ~/Vault --selection selection.json

  # Calibre instead of pandoc, page breaks between chapters
  vault2epub ~/Vault --compiler ebook-convert --separator pagebreak

  # Clean markdown only (images staged next to it), no compiler needed
  vault2epub ~/Vault --markdown-only -o book.md

  # List the notes that would be exported
  vault2epub ~/Vault --list

SELECTION FILE:
  A JSON array of notes, exported in array order:
    [{"name": "Intro.md", "path": "/home/me/Vault/Intro.md", "included": true}, ...]
  Entries with "included": false (or "is_included": false) are skipped.

ENVIRONMENT VARIABLES:
  Every flag can also be set as VAULT2EPUB_<FLAG>, e.g. VAULT2EPUB_TITLE,
  VAULT2EPUB_COMPILER, VAULT2EPUB_COMPILER_PATH, VAULT2EPUB_TIMEOUT.
  RUST_LOG overrides the log filter (e.g. RUST_LOG=vault2epub=debug).

SETUP:
  pandoc:         https://pandoc.org/installing.html
  ebook-convert:  ships with Calibre (https://calibre-ebook.com)
"#;

/// Convert a vault of Obsidian-flavoured markdown notes into an EPUB.
#[derive(Parser, Debug)]
#[command(
    name = "vault2epub",
    version,
    about = "Convert an Obsidian vault (or part of it) into an EPUB",
    long_about = "Normalise Obsidian-flavoured notes (front matter, wiki links, embeds, tags, \
callouts), inline embedded notes recursively, stage images, and package the result with \
pandoc or Calibre's ebook-convert.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Vault root directory.
    #[arg(env = "VAULT2EPUB_VAULT")]
    vault: PathBuf,

    /// Notes to export, by name (e.g. "Intro" or "Books/Dune"), in order.
    notes: Vec<String>,

    /// Export every note under this folder (relative to the vault).
    #[arg(long, env = "VAULT2EPUB_FOLDER")]
    folder: Option<PathBuf>,

    /// JSON file with an ordered note selection.
    #[arg(long, env = "VAULT2EPUB_SELECTION", conflicts_with = "notes")]
    selection: Option<PathBuf>,

    /// Output file. Default: "<title>.epub" (or ".md" with --markdown-only).
    #[arg(short, long, env = "VAULT2EPUB_OUTPUT")]
    output: Option<PathBuf>,

    /// Book title.
    #[arg(long, env = "VAULT2EPUB_TITLE", default_value = "My Notes")]
    title: String,

    /// Book language code.
    #[arg(long, env = "VAULT2EPUB_LANGUAGE", default_value = "en")]
    language: String,

    /// Compiler backend.
    #[arg(long, env = "VAULT2EPUB_COMPILER", value_enum, default_value = "pandoc")]
    compiler: CompilerArg,

    /// Path to the compiler binary (default: looked up on PATH).
    #[arg(long, env = "VAULT2EPUB_COMPILER_PATH")]
    compiler_path: Option<PathBuf>,

    /// Extra argument passed to the compiler (repeatable).
    #[arg(long = "compiler-arg", allow_hyphen_values = true)]
    compiler_args: Vec<String>,

    /// Staged image names: generated (image_1.png …) or original.
    #[arg(long, env = "VAULT2EPUB_IMAGE_NAMING", value_enum, default_value = "generated")]
    image_naming: ImageNamingArg,

    /// Embedded notes: plain (inline) or marked (rules + caption).
    #[arg(long, env = "VAULT2EPUB_EMBED_STYLE", value_enum, default_value = "plain")]
    embed_style: EmbedStyleArg,

    /// Chapter separator: none, hr, pagebreak, or custom string.
    #[arg(long, env = "VAULT2EPUB_SEPARATOR", default_value = "none")]
    separator: String,

    /// Do not prefix "# <note name>" to notes without a heading.
    #[arg(long, env = "VAULT2EPUB_NO_HEADINGS")]
    no_headings: bool,

    /// Index the vault once instead of searching it for every embed.
    #[arg(long, env = "VAULT2EPUB_INDEX")]
    index: bool,

    /// Maximum embed nesting.
    #[arg(long, env = "VAULT2EPUB_MAX_DEPTH", default_value_t = 16)]
    max_depth: usize,

    /// Write combined markdown and images instead of running a compiler.
    #[arg(long, env = "VAULT2EPUB_MARKDOWN_ONLY")]
    markdown_only: bool,

    /// Replace the output file if it exists (default: pick name_1, name_2, …).
    #[arg(long, env = "VAULT2EPUB_OVERWRITE")]
    overwrite: bool,

    /// Compiler timeout in seconds.
    #[arg(long, env = "VAULT2EPUB_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// List the notes that would be exported, then exit.
    #[arg(long)]
    list: bool,

    /// Print a JSON report (chapters, issues, stats) to stdout.
    #[arg(long, env = "VAULT2EPUB_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "VAULT2EPUB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VAULT2EPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VAULT2EPUB_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CompilerArg {
    Pandoc,
    EbookConvert,
}

impl From<CompilerArg> for CompilerKind {
    fn from(v: CompilerArg) -> Self {
        match v {
            CompilerArg::Pandoc => CompilerKind::Pandoc,
            CompilerArg::EbookConvert => CompilerKind::EbookConvert,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImageNamingArg {
    Generated,
    Original,
}

impl From<ImageNamingArg> for ImageNaming {
    fn from(v: ImageNamingArg) -> Self {
        match v {
            ImageNamingArg::Generated => ImageNaming::Generated,
            ImageNamingArg::Original => ImageNaming::Original,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EmbedStyleArg {
    Plain,
    Marked,
}

impl From<EmbedStyleArg> for EmbedStyle {
    fn from(v: EmbedStyleArg) -> Self {
        match v {
            EmbedStyleArg::Plain => EmbedStyle::Plain,
            EmbedStyleArg::Marked => EmbedStyle::Marked,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Select notes ─────────────────────────────────────────────────────
    let vault = Vault::open(&cli.vault).context("Cannot open vault")?;
    let notes = select_notes(&cli, &vault)?;

    if cli.list {
        print_selection(&cli, &notes)?;
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = if show_progress {
        Some(CliProgressCallback::new_dynamic())
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress.clone().map(|p| p as ProgressCallback),
    )?;

    // ── Run export ───────────────────────────────────────────────────────
    let result = if cli.markdown_only {
        run_markdown_only(&cli, &vault, &notes, &config)
    } else {
        run_export(&cli, &vault, &notes, &config).await
    };
    if let Some(ref p) = progress {
        p.finish();
    }
    let report = result?;

    if !cli.quiet && !cli.json {
        print_issues(&report.chapters);
        eprintln!(
            "{}  {}/{} notes  {} images  {}ms  →  {}",
            if report.failed == 0 { green("✔") } else { yellow("⚠") },
            report.exported,
            report.exported + report.failed,
            report.images,
            report.total_ms,
            bold(&report.path.display().to_string()),
        );
    }
    Ok(())
}

/// What the summary line needs from either run mode.
struct Report {
    path: PathBuf,
    chapters: Vec<Chapter>,
    exported: usize,
    failed: usize,
    images: usize,
    total_ms: u64,
}

async fn run_export(
    cli: &Cli,
    vault: &Vault,
    notes: &[NoteDescriptor],
    config: &ExportConfig,
) -> Result<Report> {
    let out = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.title, "epub"));

    let output = export(vault.root(), notes, &out, config)
        .await
        .map_err(explain)
        .context("Export failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    }

    Ok(Report {
        path: output.output_path,
        exported: output.stats.exported_chapters,
        failed: output.stats.failed_chapters,
        images: output.stats.staged_images,
        total_ms: output.stats.total_duration_ms,
        chapters: output.chapters,
    })
}

fn run_markdown_only(
    cli: &Cli,
    vault: &Vault,
    notes: &[NoteDescriptor],
    config: &ExportConfig,
) -> Result<Report> {
    let requested = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.title, "md"));
    let out = unique_output_path(&requested, cli.overwrite);
    let asset_root = out
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let output = tokio::task::block_in_place(|| {
        render_markdown(vault.root(), notes, &asset_root, config)
    })
    .context("Export failed")?;

    std::fs::create_dir_all(&asset_root)
        .with_context(|| format!("Failed to create {}", asset_root.display()))?;
    std::fs::write(&out, &output.markdown)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    }

    Ok(Report {
        path: out,
        exported: output.stats.exported_chapters,
        failed: output.stats.failed_chapters,
        images: output.stats.staged_images,
        total_ms: output.stats.total_duration_ms,
        chapters: output.chapters,
    })
}

/// Map CLI args to `ExportConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExportConfig> {
    let mut builder = ExportConfig::builder()
        .title(cli.title.clone())
        .language(cli.language.clone())
        .compiler(cli.compiler.into())
        .image_naming(cli.image_naming.into())
        .embed_style(cli.embed_style.into())
        .chapter_separator(parse_separator(&cli.separator))
        .synthesize_headings(!cli.no_headings)
        .use_note_index(cli.index)
        .max_embed_depth(cli.max_depth)
        .compile_timeout_secs(cli.timeout)
        .overwrite(cli.overwrite);

    if let Some(ref path) = cli.compiler_path {
        builder = builder.compiler_program(path.clone());
    }
    for arg in &cli.compiler_args {
        builder = builder.compiler_arg(arg.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Notes come from `--selection`, else positional names, else the folder scan.
fn select_notes(cli: &Cli, vault: &Vault) -> Result<Vec<NoteDescriptor>> {
    if let Some(ref path) = cli.selection {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read selection {}", path.display()))?;
        let notes: Vec<NoteDescriptor> =
            serde_json::from_str(&text).map_err(|e| ExportError::InvalidSelection {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        return Ok(notes);
    }

    if !cli.notes.is_empty() {
        return cli
            .notes
            .iter()
            .map(|name| {
                find_note(name, vault.root())
                    .map(|path| NoteDescriptor::from_path(vault.root(), path))
                    .with_context(|| format!("Note not found in vault: {name}"))
            })
            .collect();
    }

    let notes = vault.discover_notes(cli.folder.as_deref());
    if notes.is_empty() {
        anyhow::bail!(
            "No notes found under {}",
            cli.folder
                .as_deref()
                .map(|f| vault.root().join(f))
                .unwrap_or_else(|| vault.root().to_path_buf())
                .display()
        );
    }
    Ok(notes)
}

fn print_selection(cli: &Cli, notes: &[NoteDescriptor]) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(notes).context("Failed to serialise selection")?
        );
    } else {
        for note in notes {
            let mark = if note.included { " " } else { "-" };
            println!("{} {}", mark, note.relative_path.display());
        }
    }
    Ok(())
}

fn print_issues(chapters: &[Chapter]) {
    for chapter in chapters {
        if let Some(ref e) = chapter.error {
            eprintln!("  {} {}: {}", red("✗"), chapter.name, e);
        }
        for issue in &chapter.issues {
            eprintln!("  {} {}", yellow("⚠"), dim(&issue.to_string()));
        }
    }
}

/// Add an install hint when the compiler is missing.
fn explain(e: ExportError) -> anyhow::Error {
    match e {
        ExportError::CompilerNotFound { .. } => {
            anyhow::Error::new(e).context("Is the compiler installed? See --help for setup")
        }
        other => anyhow::Error::new(other),
    }
}

fn default_output(title: &str, ext: &str) -> PathBuf {
    let stem: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    PathBuf::from(format!("{}.{}", stem.trim(), ext))
}

/// Parse `--separator` string into `ChapterSeparator`.
fn parse_separator(s: &str) -> ChapterSeparator {
    match s.to_lowercase().as_str() {
        "none" => ChapterSeparator::None,
        "hr" | "***" => ChapterSeparator::HorizontalRule,
        "pagebreak" | "page-break" => ChapterSeparator::PageBreak,
        _ => ChapterSeparator::Custom(s.to_string()),
    }
}
