//! External compiler driver: chapters on disk → packaged EPUB.
//!
//! Two backends are supported:
//!
//! | Backend | Input | Chapters split by |
//! |---------|-------|-------------------|
//! | `pandoc` | one `NNN_name.md` per chapter | each input file |
//! | `ebook-convert` (Calibre) | a single `combined.md` | every `<h1>` |
//!
//! Both run with the workspace as current directory so the relative
//! `images/…` references written by the attachment locator resolve.
//!
//! The child process is bounded by a timeout and killed on expiry. Its
//! stderr is captured and surfaced verbatim on failure: that text is the only
//! useful diagnostic when pandoc rejects a document.

use crate::assemble;
use crate::config::{CompilerKind, ExportConfig};
use crate::error::ExportError;
use crate::output::Chapter;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// File name of the single input handed to `ebook-convert`.
pub const COMBINED_FILE: &str = "combined.md";

/// A fully prepared compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Where the compiler is told to write the book.
    pub output: PathBuf,
}

impl CompilerCommand {
    /// Build the command line for `config.compiler` over already written `inputs`.
    pub fn build(config: &ExportConfig, workdir: &Path, inputs: &[PathBuf], output: &Path) -> Self {
        let program = config
            .compiler_program
            .clone()
            .unwrap_or_else(|| PathBuf::from(config.compiler.default_program()));

        let mut args: Vec<OsString> = Vec::new();
        match config.compiler {
            CompilerKind::Pandoc => {
                let date = chrono::Local::now().format("%Y-%m-%d");
                args.extend(
                    ["--from", "markdown", "--to", "epub", "--output"].map(OsString::from),
                );
                args.push(output.into());
                args.push("--metadata".into());
                args.push(format!("title={}", config.title).into());
                args.push("--metadata".into());
                args.push(format!("date={date}").into());
                args.push("--metadata".into());
                args.push(format!("lang={}", config.language).into());
                args.push("--resource-path".into());
                args.push(workdir.into());
                args.extend(inputs.iter().map(OsString::from));
            }
            CompilerKind::EbookConvert => {
                args.extend(inputs.iter().map(OsString::from));
                args.push(output.into());
                args.push("--title".into());
                args.push(config.title.clone().into());
                args.push("--language".into());
                args.push(config.language.clone().into());
                args.extend(
                    [
                        "--enable-heuristics",
                        "--markdown-extensions",
                        "markdown.extensions.extra,markdown.extensions.nl2br,markdown.extensions.sane_lists",
                        "--chapter",
                        "//h:h1",
                        "--chapter-mark",
                        "pagebreak",
                        "--page-breaks-before",
                        "//h:h1",
                        "--level1-toc",
                        "//h:h1",
                        "--level2-toc",
                        "//h:h2",
                        "--level3-toc",
                        "//h:h3",
                        "--toc-title",
                        "Contents",
                        "--max-toc-links",
                        "1000",
                    ]
                    .map(OsString::from),
                );
            }
        }
        args.extend(config.compiler_args.iter().map(OsString::from));

        Self {
            program,
            args,
            output: output.to_path_buf(),
        }
    }

    /// Name used in logs and error messages.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run the compiler in `workdir`, killing it after `timeout_secs`.
    pub async fn run(&self, workdir: &Path, timeout_secs: u64) -> Result<(), ExportError> {
        let program = self.program_name();
        info!("Running {} ({} args)", program, self.args.len());
        debug!("Compiler command: {} {:?}", program, self.args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| ExportError::CompilerTimeout {
                program: program.clone(),
                secs: timeout_secs,
            })?
            .map_err(|source| ExportError::CompilerNotFound {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExportError::CompilerFailed {
                program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{} output:\n{}", program, stdout.trim_end());
        }

        if !self.output.is_file() {
            return Err(ExportError::CompilerOutputMissing {
                program,
                path: self.output.clone(),
            });
        }
        Ok(())
    }
}

/// Write the compiler inputs for `config.compiler` into `workdir`.
///
/// Only successful chapters are written. Returns the input paths in the order
/// they must appear on the command line.
pub fn write_inputs(
    config: &ExportConfig,
    workdir: &Path,
    chapters: &[Chapter],
) -> Result<Vec<PathBuf>, ExportError> {
    let write = |path: &Path, text: &str| {
        std::fs::write(path, text).map_err(|source| ExportError::Workspace { source })
    };

    match config.compiler {
        CompilerKind::Pandoc => {
            let mut inputs = Vec::new();
            for chapter in chapters.iter().filter(|c| c.is_ok()) {
                let path = workdir.join(chapter_file_name(chapter.index, &chapter.name));
                write(&path, &format!("{}\n", chapter.markdown))?;
                inputs.push(path);
            }
            debug!("Wrote {} chapter files", inputs.len());
            Ok(inputs)
        }
        CompilerKind::EbookConvert => {
            let path = workdir.join(COMBINED_FILE);
            let combined = assemble::combine(chapters, &config.chapter_separator);
            write(&path, &combined)?;
            debug!("Wrote {} ({} bytes)", path.display(), combined.len());
            Ok(vec![path])
        }
    }
}

/// `NNN_name.md`, with anything but letters, digits, `-` and `_` replaced.
pub fn chapter_file_name(index: usize, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{index:03}_{safe}.md")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chapter(index: usize, name: &str, markdown: &str) -> Chapter {
        Chapter {
            index,
            name: name.into(),
            source: PathBuf::from(format!("/v/{name}.md")),
            markdown: markdown.into(),
            issues: Vec::new(),
            error: None,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_chapter_file_name() {
        assert_eq!(chapter_file_name(1, "Intro"), "001_Intro.md");
        assert_eq!(chapter_file_name(12, "A/B c?"), "012_A_B_c_.md");
        assert_eq!(chapter_file_name(3, "Глава"), "003_Глава.md");
    }

    #[test]
    fn test_pandoc_command() {
        let config = ExportConfig::builder()
            .title("Field Notes")
            .language("de")
            .compiler_arg("--toc")
            .build()
            .unwrap();
        let inputs = vec![PathBuf::from("/w/001_A.md"), PathBuf::from("/w/002_B.md")];
        let cmd = CompilerCommand::build(&config, Path::new("/w"), &inputs, Path::new("/w/out.epub"));
        let args = strings(&cmd.args);

        assert_eq!(cmd.program, PathBuf::from("pandoc"));
        assert_eq!(&args[..6], ["--from", "markdown", "--to", "epub", "--output", "/w/out.epub"]);
        assert!(args.contains(&"title=Field Notes".to_string()));
        assert!(args.contains(&"lang=de".to_string()));
        assert!(args.iter().any(|a| a.starts_with("date=")));
        let rp = args.iter().position(|a| a == "--resource-path").unwrap();
        assert_eq!(args[rp + 1], "/w");
        assert_eq!(args[args.len() - 3..], ["/w/001_A.md", "/w/002_B.md", "--toc"]);
    }

    #[test]
    fn test_ebook_convert_command() {
        let config = ExportConfig::builder()
            .compiler(CompilerKind::EbookConvert)
            .compiler_program("/opt/calibre/ebook-convert")
            .build()
            .unwrap();
        let inputs = vec![PathBuf::from("/w/combined.md")];
        let cmd = CompilerCommand::build(&config, Path::new("/w"), &inputs, Path::new("/w/b.epub"));
        let args = strings(&cmd.args);

        assert_eq!(cmd.program_name(), "/opt/calibre/ebook-convert");
        assert_eq!(&args[..2], ["/w/combined.md", "/w/b.epub"]);
        let chap = args.iter().position(|a| a == "--chapter").unwrap();
        assert_eq!(args[chap + 1], "//h:h1");
        assert!(args.contains(&"--level2-toc".to_string()));
    }

    #[test]
    fn test_write_inputs_pandoc_skips_failed() {
        let dir = TempDir::new().unwrap();
        let mut failed = chapter(2, "Gone", "");
        failed.error = Some("missing".into());
        let chapters = vec![chapter(1, "One", "# One"), failed, chapter(3, "Three", "# Three")];

        let inputs = write_inputs(&ExportConfig::default(), dir.path(), &chapters).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].ends_with("001_One.md"));
        assert!(inputs[1].ends_with("003_Three.md"));
        assert_eq!(std::fs::read_to_string(&inputs[0]).unwrap(), "# One\n");
    }

    #[test]
    fn test_write_inputs_combined() {
        let dir = TempDir::new().unwrap();
        let config = ExportConfig::builder()
            .compiler(CompilerKind::EbookConvert)
            .build()
            .unwrap();
        let chapters = vec![chapter(1, "One", "# One"), chapter(2, "Two", "# Two")];
        let inputs = write_inputs(&config, dir.path(), &chapters).unwrap();
        assert_eq!(inputs, vec![dir.path().join(COMBINED_FILE)]);
        let text = std::fs::read_to_string(&inputs[0]).unwrap();
        assert!(text.contains("# One") && text.contains("# Two"));
    }

    fn raw_command(program: &str, args: &[&str], output: &Path) -> CompilerCommand {
        CompilerCommand {
            program: PathBuf::from(program),
            args: args.iter().map(OsString::from).collect(),
            output: output.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let cmd = raw_command("vault2epub-no-such-compiler", &[], &dir.path().join("x.epub"));
        let err = cmd.run(dir.path(), 5).await.unwrap_err();
        assert!(matches!(err, ExportError::CompilerNotFound { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let cmd = raw_command(
            "sh",
            &["-c", "echo 'pandoc: bad input' >&2; exit 3"],
            &dir.path().join("x.epub"),
        );
        match cmd.run(dir.path(), 5).await {
            Err(ExportError::CompilerFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "pandoc: bad input\n");
            }
            other => panic!("expected CompilerFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let cmd = raw_command("sleep", &["10"], &dir.path().join("x.epub"));
        let err = cmd.run(dir.path(), 1).await.unwrap_err();
        assert!(matches!(err, ExportError::CompilerTimeout { secs: 1, .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output() {
        let dir = TempDir::new().unwrap();
        let cmd = raw_command("true", &[], &dir.path().join("x.epub"));
        let err = cmd.run(dir.path(), 5).await.unwrap_err();
        assert!(matches!(err, ExportError::CompilerOutputMissing { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_with_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("x.epub");
        let cmd = raw_command("sh", &["-c", "printf epub > x.epub"], &out);
        cmd.run(dir.path(), 5).await.unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "epub");
    }
}
