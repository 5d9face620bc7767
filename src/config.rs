//! Configuration types for vault export.
//!
//! All export behaviour is controlled through [`ExportConfig`], built via its
//! [`ExportConfigBuilder`]. Keeping every knob in one struct makes it easy to
//! share a config between the blocking engine thread and the async compiler
//! driver, and to log exactly which policies produced a given book.
//!
//! The engine itself only reads [`NormalizeOptions`], a small `Clone` subset;
//! packaging settings (title, compiler, timeout) never reach the normaliser.

use crate::error::ExportError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a vault export.
///
/// Built via [`ExportConfig::builder()`] or using [`ExportConfig::default()`].
///
/// # Example
/// ```rust
/// use vault2epub::{ExportConfig, ImageNaming};
///
/// let config = ExportConfig::builder()
///     .title("Field Notes")
///     .image_naming(ImageNaming::Original)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExportConfig {
    /// Book title passed to the compiler as metadata. Default: "My Notes".
    pub title: String,

    /// Book language code (`en`, `ru`, …). Default: "en".
    pub language: String,

    /// Everything the content normaliser and embed expander need.
    pub normalize: NormalizeOptions,

    /// Separator inserted between chapters in combined output. Default: none.
    pub chapter_separator: ChapterSeparator,

    /// Prefix `# {note name}` to chapters that do not start with a heading. Default: true.
    pub synthesize_headings: bool,

    /// Build a name → path index once per export instead of walking the vault
    /// for every embed. Default: false.
    ///
    /// Worth enabling for large vaults with many embeds; the first-match
    /// semantics are identical to the walking resolver.
    pub use_note_index: bool,

    /// Which external compiler packages the book. Default: [`CompilerKind::Pandoc`].
    pub compiler: CompilerKind,

    /// Explicit compiler binary. If None, the backend's default program name
    /// is looked up on `PATH`.
    pub compiler_program: Option<PathBuf>,

    /// Extra arguments appended verbatim to the compiler command line.
    pub compiler_args: Vec<String>,

    /// Seconds the compiler may run before it is killed. Default: 300.
    pub compile_timeout_secs: u64,

    /// Replace an existing output file instead of picking `name_1.epub`. Default: false.
    pub overwrite: bool,

    /// Directory in which the per-export scratch workspace is created.
    /// Default: the system temp directory.
    pub workspace_dir: Option<PathBuf>,

    /// Optional per-chapter progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            title: "My Notes".to_string(),
            language: "en".to_string(),
            normalize: NormalizeOptions::default(),
            chapter_separator: ChapterSeparator::default(),
            synthesize_headings: true,
            use_note_index: false,
            compiler: CompilerKind::default(),
            compiler_program: None,
            compiler_args: Vec::new(),
            compile_timeout_secs: 300,
            overwrite: false,
            workspace_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("title", &self.title)
            .field("language", &self.language)
            .field("normalize", &self.normalize)
            .field("chapter_separator", &self.chapter_separator)
            .field("synthesize_headings", &self.synthesize_headings)
            .field("use_note_index", &self.use_note_index)
            .field("compiler", &self.compiler)
            .field("compiler_program", &self.compiler_program)
            .field("compiler_args", &self.compiler_args)
            .field("compile_timeout_secs", &self.compile_timeout_secs)
            .field("overwrite", &self.overwrite)
            .field("workspace_dir", &self.workspace_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExportProgressCallback>"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = title.into();
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn image_naming(mut self, naming: ImageNaming) -> Self {
        self.config.normalize.image_naming = naming;
        self
    }

    pub fn embed_style(mut self, style: EmbedStyle) -> Self {
        self.config.normalize.embed_style = style;
        self
    }

    pub fn asset_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.normalize.asset_dir_name = name.into();
        self
    }

    pub fn max_embed_depth(mut self, depth: usize) -> Self {
        self.config.normalize.max_embed_depth = depth.max(1);
        self
    }

    pub fn front_matter_lookahead(mut self, lines: usize) -> Self {
        self.config.normalize.front_matter_lookahead = lines;
        self
    }

    pub fn front_matter_fallback_lines(mut self, lines: usize) -> Self {
        self.config.normalize.front_matter_fallback_lines = lines;
        self
    }

    pub fn chapter_separator(mut self, sep: ChapterSeparator) -> Self {
        self.config.chapter_separator = sep;
        self
    }

    pub fn synthesize_headings(mut self, v: bool) -> Self {
        self.config.synthesize_headings = v;
        self
    }

    pub fn use_note_index(mut self, v: bool) -> Self {
        self.config.use_note_index = v;
        self
    }

    pub fn compiler(mut self, kind: CompilerKind) -> Self {
        self.config.compiler = kind;
        self
    }

    pub fn compiler_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.compiler_program = Some(program.into());
        self
    }

    pub fn compiler_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.compiler_args.push(arg.into());
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs;
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, ExportError> {
        let c = &self.config;
        if c.title.trim().is_empty() {
            return Err(ExportError::InvalidConfig("Title must not be empty".into()));
        }
        if c.compile_timeout_secs == 0 {
            return Err(ExportError::InvalidConfig(
                "Compile timeout must be ≥ 1 second".into(),
            ));
        }
        let asset = &c.normalize.asset_dir_name;
        if asset.is_empty() || asset.contains(['/', '\\']) || asset.starts_with('.') {
            return Err(ExportError::InvalidConfig(format!(
                "Asset directory name must be a plain folder name, got {asset:?}"
            )));
        }
        if c.normalize.front_matter_lookahead < 2 {
            return Err(ExportError::InvalidConfig(
                "Front-matter lookahead must cover at least 2 lines".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Knobs read by the normaliser and the embed expander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// How staged images are named. Default: [`ImageNaming::Generated`].
    pub image_naming: ImageNaming,

    /// How expanded note embeds are framed. Default: [`EmbedStyle::Plain`].
    pub embed_style: EmbedStyle,

    /// Folder name of the asset directory, used in image references. Default: "images".
    pub asset_dir_name: String,

    /// Maximum embed nesting before expansion stops. Default: 16.
    ///
    /// Cycles are caught by the visited set long before this; the limit only
    /// bounds very deep acyclic chains.
    pub max_embed_depth: usize,

    /// Lines searched for a closing `---` before heuristic recovery. Default: 100.
    pub front_matter_lookahead: usize,

    /// Lines dropped when an unterminated front matter block has no
    /// recognisable end. Default: 50.
    pub front_matter_fallback_lines: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            image_naming: ImageNaming::default(),
            embed_style: EmbedStyle::default(),
            asset_dir_name: "images".to_string(),
            max_embed_depth: 16,
            front_matter_lookahead: 100,
            front_matter_fallback_lines: 50,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Naming policy for images copied into the asset directory.
///
/// | Policy | Staged name | Trade-off |
/// |--------|-------------|-----------|
/// | `Generated` | `image_1.png`, `image_2.jpg`, … | never collides across notes |
/// | `Original`  | `diagram.png` | readable, but same-named images overwrite each other |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageNaming {
    /// Short collision-safe names. (default)
    #[default]
    Generated,
    /// Keep the attachment's own file name.
    Original,
}

/// How the content of an embedded note is framed in its host note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbedStyle {
    /// Blank lines only; the embed reads as part of the host note. (default)
    #[default]
    Plain,
    /// Horizontal rules around the embed plus an "Embedded from" caption.
    Marked,
}

impl EmbedStyle {
    /// Wrap normalised embed content for substitution into the host note.
    pub fn wrap(&self, target: &str, content: &str) -> String {
        match self {
            EmbedStyle::Plain => format!("\n\n{content}\n\n"),
            EmbedStyle::Marked => {
                format!("\n\n***\n**Embedded from: {target}**\n\n{content}\n\n***\n\n")
            }
        }
    }
}

/// External program that packages the assembled markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompilerKind {
    /// `pandoc`, one input file per chapter. (default)
    #[default]
    Pandoc,
    /// Calibre's `ebook-convert`, one combined input file.
    EbookConvert,
}

impl CompilerKind {
    /// Program name looked up on `PATH` when no explicit binary is configured.
    pub fn default_program(&self) -> &'static str {
        match self {
            CompilerKind::Pandoc => "pandoc",
            CompilerKind::EbookConvert => "ebook-convert",
        }
    }
}

/// How to separate chapters in combined markdown output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChapterSeparator {
    /// Chapters joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n***\n\n"
    HorizontalRule,
    /// Raw-HTML page break understood by EPUB readers.
    PageBreak,
    /// Custom string inserted between chapters.
    Custom(String),
}

impl ChapterSeparator {
    /// Render the separator string placed before a chapter.
    pub fn render(&self) -> String {
        match self {
            ChapterSeparator::None => "\n\n".to_string(),
            ChapterSeparator::HorizontalRule => "\n\n***\n\n".to_string(),
            ChapterSeparator::PageBreak => {
                "\n\n<div style=\"page-break-after: always;\"></div>\n\n".to_string()
            }
            ChapterSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
