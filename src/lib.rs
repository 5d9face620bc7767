//! # vault2epub
//!
//! Turn a vault of Obsidian-flavoured markdown notes into an EPUB.
//!
//! ## Why this crate?
//!
//! Handing a vault straight to pandoc produces a broken book: front matter
//! turns into stray YAML, `[[links]]` and `![[embeds]]` are printed literally,
//! images live in attachment folders the compiler never looks at, and a note
//! that embeds itself (directly or through a chain) never terminates in naive
//! tooling. This crate normalises every selected note into plain markdown,
//! inlines embedded notes recursively with cycle detection, stages images next
//! to the markdown, and only then calls the compiler.
//!
//! ## Pipeline Overview
//!
//! ```text
//! vault + selection
//!  │
//!  ├─ 1. Input     validate vault, discover or accept the note selection
//!  ├─ 2. Assemble  per note: read → normalise → expand embeds (spawn_blocking)
//!  │                 └─ resolve notes, locate + stage images
//!  ├─ 3. Compile   pandoc / ebook-convert in a scoped temp workspace
//!  └─ 4. Output    atomic copy of the book + per-chapter issues and stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vault2epub::{export, ExportConfig, Vault};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let vault = Vault::open("/home/me/Vault")?;
//!     let notes = vault.discover_notes(None);
//!     let config = ExportConfig::builder().title("My Vault").build()?;
//!     let output = export(vault.root(), &notes, "My Vault.epub", &config).await?;
//!     eprintln!("{} chapters → {}",
//!         output.stats.exported_chapters,
//!         output.output_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vault2epub` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vault2epub = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Compiler
//!
//! | Backend | Install | Notes |
//! |---------|---------|-------|
//! | `pandoc` | `apt install pandoc` | Default. One input file per chapter |
//! | `ebook-convert` | Calibre | One combined file; chapters split at `<h1>`, richer TOC options |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble, combine};
pub use config::{
    ChapterSeparator, CompilerKind, EmbedStyle, ExportConfig, ExportConfigBuilder, ImageNaming,
    NormalizeOptions,
};
pub use convert::{export, export_sync, render_markdown, unique_output_path};
pub use error::{ExportError, NoteIssue};
pub use output::{Chapter, ExportOutput, ExportStats, MarkdownOutput, NoteDescriptor};
pub use pipeline::attach::AssetDirectory;
pub use pipeline::embed::Session;
pub use pipeline::input::Vault;
pub use pipeline::normalize::{normalize, normalize_note};
pub use pipeline::resolve::{find_note, NoteIndex};
pub use progress::{ExportProgressCallback, NoopProgressCallback, ProgressCallback};
