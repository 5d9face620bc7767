//! Chapter assembly: ordered note selection → normalised chapters.
//!
//! This is the synchronous heart of an export. It runs on a blocking thread
//! (see [`crate::convert`]) and touches the filesystem only to read notes and
//! copy images into the shared [`AssetDirectory`].

use crate::config::{ChapterSeparator, ExportConfig};
use crate::output::{Chapter, NoteDescriptor};
use crate::pipeline::attach::AssetDirectory;
use crate::pipeline::embed::Session;
use crate::pipeline::input::Vault;
use crate::pipeline::resolve::{NoteIndex, NoteLookup};
use crate::progress::{ExportProgressCallback, NoopProgressCallback};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Normalise every included note of `notes`, in caller order.
///
/// Excluded descriptors are skipped silently. Missing or unreadable notes
/// become failed chapters (`error` set, empty markdown) and the run goes on.
pub fn assemble(
    vault: &Vault,
    notes: &[NoteDescriptor],
    config: &ExportConfig,
    assets: &mut AssetDirectory,
) -> Vec<Chapter> {
    let noop = NoopProgressCallback;
    let progress: &dyn ExportProgressCallback = match &config.progress_callback {
        Some(cb) => cb.as_ref(),
        None => &noop,
    };

    let included: Vec<&NoteDescriptor> = notes.iter().filter(|n| n.included).collect();
    let total = included.len();
    debug!("Assembling {} of {} selected notes", total, notes.len());
    progress.on_export_start(total);

    let lookup = if config.use_note_index {
        NoteLookup::Indexed(NoteIndex::build(vault.root()))
    } else {
        NoteLookup::Scan
    };

    let mut chapters = Vec::with_capacity(total);
    for (i, note) in included.into_iter().enumerate() {
        let index = i + 1;
        let name = note.display_name().to_string();
        progress.on_chapter_start(index, total, &name);

        let path = if note.path.is_absolute() {
            note.path.clone()
        } else {
            vault.root().join(&note.path)
        };

        let chapter = match read_note(&path) {
            Ok(raw) => {
                let mut session =
                    Session::new(vault.root(), &config.normalize, &lookup, assets);
                let body = session.normalize_root(&raw, &path);
                let issues = session.into_issues();
                let markdown = with_heading(&name, body, config.synthesize_headings);
                progress.on_chapter_complete(index, total, &name, markdown.len());
                Chapter {
                    index,
                    name,
                    source: path,
                    markdown,
                    issues,
                    error: None,
                }
            }
            Err(message) => {
                warn!("Skipping note {}: {}", path.display(), message);
                progress.on_chapter_error(index, total, &name, &message);
                Chapter {
                    index,
                    name,
                    source: path,
                    markdown: String::new(),
                    issues: Vec::new(),
                    error: Some(message),
                }
            }
        };
        chapters.push(chapter);
    }

    let ok = chapters.iter().filter(|c| c.is_ok()).count();
    info!("Assembled {}/{} chapters", ok, total);
    progress.on_export_complete(total, ok);
    chapters
}

fn read_note(path: &Path) -> Result<String, String> {
    if !path.is_file() {
        return Err("note not found".to_string());
    }
    fs::read_to_string(path).map_err(|e| e.to_string())
}

/// Prefix `# name` unless the chapter already opens with a heading.
fn with_heading(name: &str, body: String, synthesize: bool) -> String {
    if !synthesize || body.trim_start().starts_with('#') {
        body
    } else if body.is_empty() {
        format!("# {name}")
    } else {
        format!("# {name}\n\n{body}")
    }
}

/// Join the successful chapters into one markdown document.
pub fn combine(chapters: &[Chapter], separator: &ChapterSeparator) -> String {
    let sep = separator.render();
    let mut out = chapters
        .iter()
        .filter(|c| c.is_ok())
        .map(|c| c.markdown.as_str())
        .collect::<Vec<_>>()
        .join(&sep);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageNaming;
    use crate::progress::ExportProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn vault(files: &[(&str, &str)]) -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        for (rel, body) in files {
            let p = dir.path().join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, body).unwrap();
        }
        let v = Vault::open(dir.path()).unwrap();
        (dir, v)
    }

    fn assets(dir: &TempDir) -> AssetDirectory {
        AssetDirectory::new(dir.path().join("images"), "images", ImageNaming::Generated)
    }

    fn descriptor(v: &Vault, rel: &str) -> NoteDescriptor {
        NoteDescriptor::from_path(v.root(), v.root().join(rel))
    }

    #[test]
    fn synthesises_headings_when_missing() {
        assert_eq!(with_heading("Intro", "text".into(), true), "# Intro\n\ntext");
        assert_eq!(with_heading("Intro", "# Own".into(), true), "# Own");
        assert_eq!(with_heading("Intro", "text".into(), false), "text");
        assert_eq!(with_heading("Empty", String::new(), true), "# Empty");
    }

    #[test]
    fn caller_order_and_exclusions() {
        let (_d, v) = vault(&[("a.md", "alpha"), ("b.md", "# Bee\nbeta"), ("c.md", "gamma")]);
        let out = TempDir::new().unwrap();
        let mut skipped = descriptor(&v, "a.md");
        skipped.included = false;
        let notes = vec![descriptor(&v, "c.md"), skipped, descriptor(&v, "b.md")];

        let chapters = assemble(&v, &notes, &ExportConfig::default(), &mut assets(&out));
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].index, 1);
        assert_eq!(chapters[0].markdown, "# c\n\ngamma");
        assert_eq!(chapters[1].markdown, "# Bee\nbeta");
    }

    #[test]
    fn missing_note_becomes_failed_chapter() {
        let (_d, v) = vault(&[("a.md", "alpha")]);
        let out = TempDir::new().unwrap();
        let notes = vec![descriptor(&v, "gone.md"), descriptor(&v, "a.md")];

        let chapters = assemble(&v, &notes, &ExportConfig::default(), &mut assets(&out));
        assert_eq!(chapters.len(), 2);
        assert!(!chapters[0].is_ok());
        assert!(chapters[1].is_ok());
        assert_eq!(combine(&chapters, &ChapterSeparator::None), "# a\n\nalpha\n");
    }

    #[test]
    fn relative_descriptor_paths_resolve_against_vault() {
        let (_d, v) = vault(&[("sub/n.md", "body")]);
        let out = TempDir::new().unwrap();
        let notes = vec![NoteDescriptor {
            name: "n.md".into(),
            path: PathBuf::from("sub/n.md"),
            relative_path: PathBuf::from("sub/n.md"),
            included: true,
        }];
        let chapters = assemble(&v, &notes, &ExportConfig::default(), &mut assets(&out));
        assert!(chapters[0].is_ok());
    }

    #[test]
    fn images_are_shared_across_chapters() {
        let (_d, v) = vault(&[
            ("a.md", "![[pic.png]]"),
            ("b.md", "![[pic.png]] ![[other.gif]]"),
            ("Attachments/pic.png", "p"),
            ("Attachments/other.gif", "g"),
        ]);
        let out = TempDir::new().unwrap();
        let mut assets = assets(&out);
        let notes = vec![descriptor(&v, "a.md"), descriptor(&v, "b.md")];
        let chapters = assemble(&v, &notes, &ExportConfig::default(), &mut assets);

        assert!(chapters[0].markdown.contains("images/image_1.png"));
        assert!(chapters[1].markdown.contains("images/image_1.png"));
        assert!(chapters[1].markdown.contains("images/image_2.gif"));
        assert_eq!(assets.staged_count(), 2);
    }

    #[test]
    fn combine_with_separators() {
        let chapter = |i: usize, md: &str| Chapter {
            index: i,
            name: format!("c{i}"),
            source: PathBuf::new(),
            markdown: md.into(),
            issues: Vec::new(),
            error: None,
        };
        let chapters = vec![chapter(1, "# A"), chapter(2, "# B")];
        assert_eq!(combine(&chapters, &ChapterSeparator::None), "# A\n\n# B\n");
        assert_eq!(
            combine(&chapters, &ChapterSeparator::HorizontalRule),
            "# A\n\n***\n\n# B\n"
        );
    }

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        finished_ok: AtomicUsize,
    }

    impl ExportProgressCallback for Recorder {
        fn on_chapter_start(&self, _: usize, _: usize, _: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_chapter_complete(&self, _: usize, _: usize, _: &str, _: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_chapter_error(&self, _: usize, _: usize, _: &str, _: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_export_complete(&self, _: usize, ok: usize) {
            self.finished_ok.store(ok, Ordering::SeqCst);
        }
    }

    #[test]
    fn progress_events() {
        let (_d, v) = vault(&[("a.md", "alpha")]);
        let out = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let config = ExportConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let notes = vec![descriptor(&v, "a.md"), descriptor(&v, "missing.md")];
        assemble(&v, &notes, &config, &mut assets(&out));

        assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.finished_ok.load(Ordering::SeqCst), 1);
    }
}
