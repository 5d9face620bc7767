//! Recursive embed expansion.
//!
//! `![[target]]` is replaced in one left-to-right pass over the note. Image
//! targets go to the attachment locator; note targets are resolved, read and
//! normalised in full (which re-enters this module for their own embeds) and
//! the result is spliced in.
//!
//! Cycle safety comes from [`Session`]'s visited set: a note's path is
//! inserted before its embeds are expanded and removed afterwards, so the set
//! always holds exactly the chain from the top-level note to the current one.
//! A note may therefore be embedded twice by siblings, but never inside
//! itself.

use crate::config::NormalizeOptions;
use crate::error::NoteIssue;
use crate::pipeline::attach::{self, AssetDirectory};
use crate::pipeline::normalize::{self, RE_EMBED};
use crate::pipeline::resolve::NoteLookup;
use regex::Captures;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a `[[…]]` token points at, judged from its target alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Image,
    Note,
}

/// One parsed `[[…]]` / `![[…]]` token.
///
/// `Note#Section|Alias` splits into target `Note`, section `Section` and
/// alias `Alias`; `img.png|300` keeps `img.png` and treats `300` as the alias
/// (Obsidian's size hint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub section: Option<String>,
    pub alias: Option<String>,
    pub embed: bool,
    pub kind: ReferenceKind,
}

impl Reference {
    pub fn parse(inner: &str, embed: bool) -> Self {
        let (path_part, alias) = match inner.split_once('|') {
            Some((p, a)) => (p, Some(a.trim().to_string()).filter(|a| !a.is_empty())),
            None => (inner, None),
        };
        let (target, section) = match path_part.split_once('#') {
            Some((t, s)) => (t, Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            None => (path_part, None),
        };
        let target = target.trim().to_string();
        let kind = if attach::is_image(&target) {
            ReferenceKind::Image
        } else {
            ReferenceKind::Note
        };
        Self {
            target,
            section,
            alias,
            embed,
            kind,
        }
    }

    /// Text shown for a plain link: the alias if any, else the written target.
    pub fn display_text(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.section {
            Some(section) if self.target.is_empty() => section.clone(),
            Some(section) => format!("{}#{}", self.target, section),
            None => self.target.clone(),
        }
    }
}

/// Mutable state for normalising one top-level note.
///
/// Each chapter gets a fresh session; the asset directory and the lookup
/// strategy are borrowed from the export and shared between sessions.
pub struct Session<'a> {
    vault_root: &'a Path,
    options: &'a NormalizeOptions,
    lookup: &'a NoteLookup,
    assets: &'a mut AssetDirectory,
    visited: HashSet<PathBuf>,
    depth: usize,
    issues: Vec<NoteIssue>,
}

impl<'a> Session<'a> {
    pub fn new(
        vault_root: &'a Path,
        options: &'a NormalizeOptions,
        lookup: &'a NoteLookup,
        assets: &'a mut AssetDirectory,
    ) -> Self {
        Self {
            vault_root,
            options,
            lookup,
            assets,
            visited: HashSet::new(),
            depth: 0,
            issues: Vec::new(),
        }
    }

    pub fn options(&self) -> &NormalizeOptions {
        self.options
    }

    pub fn issues(&self) -> &[NoteIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<NoteIssue> {
        self.issues
    }

    /// Normalise a top-level note, marking it visited for the duration so a
    /// note that embeds its own ancestor is caught at the first repeat.
    pub fn normalize_root(&mut self, raw: &str, note_path: &Path) -> String {
        let key = canonical(note_path);
        self.visited.insert(key.clone());
        let out = normalize::normalize_note(raw, note_path, self);
        self.visited.remove(&key);
        out
    }

    fn record(&mut self, issue: NoteIssue) {
        self.issues.push(issue);
    }

    fn expand_reference(&mut self, inner: &str, note_path: &Path) -> String {
        let reference = Reference::parse(inner, true);
        match reference.kind {
            ReferenceKind::Image => self.expand_image(&reference.target, note_path),
            ReferenceKind::Note => self.expand_note(&reference.target, note_path),
        }
    }

    fn expand_image(&mut self, image: &str, note_path: &Path) -> String {
        let (text, issue) = attach::locate_and_stage(image, note_path, self.vault_root, self.assets);
        if let Some(issue) = issue {
            self.record(issue);
        }
        text
    }

    fn expand_note(&mut self, target: &str, note_path: &Path) -> String {
        let Some(found) = self.lookup.find(target, self.vault_root) else {
            warn!("Embedded note not found: '{}' (in {})", target, note_path.display());
            self.record(NoteIssue::NoteNotFound {
                note: note_path.to_path_buf(),
                target: target.to_string(),
            });
            return format!("*[Embedded note not found: {target}]*");
        };

        let key = canonical(&found);
        if self.visited.contains(&key) {
            warn!("Circular embed skipped: '{}' (in {})", target, note_path.display());
            self.record(NoteIssue::CycleDetected {
                note: note_path.to_path_buf(),
                target: target.to_string(),
            });
            return format!("*[Circular embed skipped: {target}]*");
        }

        let limit = self.options.max_embed_depth;
        if self.depth >= limit {
            warn!("Embed depth limit {} reached at '{}'", limit, target);
            self.record(NoteIssue::DepthExceeded {
                note: note_path.to_path_buf(),
                target: target.to_string(),
                limit,
            });
            return format!("*[Embed depth limit reached: {target}]*");
        }

        let raw = match fs::read_to_string(&found) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to embed {}: {}", found.display(), e);
                self.record(NoteIssue::io(&found, &e));
                return format!("*[Failed to embed: {target}]*");
            }
        };

        debug!("Expanding embed '{}' from {}", target, found.display());
        self.visited.insert(key.clone());
        self.depth += 1;
        let content = normalize::normalize_note(&raw, &found, self);
        self.depth -= 1;
        self.visited.remove(&key);

        self.options.embed_style.wrap(target, &content)
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Replace every `![[…]]` in `text` (written in the note at `note_path`).
pub fn expand(text: &str, note_path: &Path, session: &mut Session<'_>) -> String {
    RE_EMBED
        .replace_all(text, |caps: &Captures| {
            session.expand_reference(&caps[1], note_path)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedStyle, ImageNaming};
    use crate::pipeline::resolve::NoteIndex;
    use tempfile::TempDir;

    struct Fixture {
        vault: TempDir,
        out: TempDir,
        options: NormalizeOptions,
        lookup: NoteLookup,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let vault = TempDir::new().unwrap();
            for (rel, body) in files {
                let p = vault.path().join(rel);
                fs::create_dir_all(p.parent().unwrap()).unwrap();
                fs::write(p, body).unwrap();
            }
            Self {
                vault,
                out: TempDir::new().unwrap(),
                options: NormalizeOptions::default(),
                lookup: NoteLookup::Scan,
            }
        }

        fn root(&self) -> PathBuf {
            self.vault.path().canonicalize().unwrap()
        }

        fn assets(&self) -> AssetDirectory {
            AssetDirectory::new(self.out.path().join("images"), "images", ImageNaming::Generated)
        }

        fn run(&self, note: &str) -> (String, Vec<NoteIssue>) {
            let root = self.root();
            let path = root.join(note);
            let raw = fs::read_to_string(&path).unwrap();
            let mut assets = self.assets();
            let mut session = Session::new(&root, &self.options, &self.lookup, &mut assets);
            let out = session.normalize_root(&raw, &path);
            (out, session.into_issues())
        }
    }

    #[test]
    fn parse_reference_suffixes() {
        let r = Reference::parse("Note#Section|Alias", true);
        assert_eq!(r.target, "Note");
        assert_eq!(r.section.as_deref(), Some("Section"));
        assert_eq!(r.alias.as_deref(), Some("Alias"));
        assert_eq!(r.kind, ReferenceKind::Note);
        assert_eq!(r.display_text(), "Alias");

        let r = Reference::parse("img.PNG|300", true);
        assert_eq!(r.target, "img.PNG");
        assert_eq!(r.kind, ReferenceKind::Image);

        assert_eq!(Reference::parse("Note#Part", false).display_text(), "Note#Part");
        assert_eq!(Reference::parse("#Part", false).display_text(), "Part");
        assert_eq!(Reference::parse(" Spaced ", false).display_text(), "Spaced");
    }

    #[test]
    fn expands_nested_note() {
        let fx = Fixture::new(&[
            ("A.md", "Start\n![[B]]\nEnd"),
            ("sub/B.md", "---\ntags: x\n---\nMiddle [[C]]"),
        ]);
        let (out, issues) = fx.run("A.md");
        assert_eq!(out, "Start\n\nMiddle **C**\n\nEnd");
        assert!(issues.is_empty());
    }

    #[test]
    fn two_cycle_terminates_with_placeholder() {
        let fx = Fixture::new(&[("A.md", "A text ![[B]]"), ("B.md", "B text ![[A]]")]);
        let (out, issues) = fx.run("A.md");
        assert!(out.contains("A text"));
        assert!(out.contains("B text"));
        assert!(out.contains("*[Circular embed skipped: A]*"), "got: {out}");
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], NoteIssue::CycleDetected { target, .. } if target == "A"));
    }

    #[test]
    fn self_embed_is_a_cycle() {
        let fx = Fixture::new(&[("Loop.md", "Me ![[Loop]]")]);
        let (out, _) = fx.run("Loop.md");
        assert_eq!(out, "Me *[Circular embed skipped: Loop]*");
    }

    #[test]
    fn sibling_embedded_twice() {
        let fx = Fixture::new(&[
            ("Host.md", "![[Part]]\n\n![[Part]]"),
            ("Part.md", "piece"),
        ]);
        let (out, issues) = fx.run("Host.md");
        assert_eq!(out.matches("piece").count(), 2);
        assert!(issues.is_empty());
    }

    #[test]
    fn missing_note_placeholder() {
        let fx = Fixture::new(&[("A.md", "x ![[Ghost]] y")]);
        let (out, issues) = fx.run("A.md");
        assert_eq!(out, "x *[Embedded note not found: Ghost]* y");
        assert!(matches!(&issues[0], NoteIssue::NoteNotFound { .. }));
    }

    #[test]
    fn depth_limit() {
        let mut fx = Fixture::new(&[
            ("N1.md", "one ![[N2]]"),
            ("N2.md", "two ![[N3]]"),
            ("N3.md", "three"),
        ]);
        fx.options.max_embed_depth = 1;
        let (out, issues) = fx.run("N1.md");
        assert!(out.contains("two"));
        assert!(out.contains("*[Embed depth limit reached: N3]*"));
        assert!(matches!(&issues[0], NoteIssue::DepthExceeded { limit: 1, .. }));
    }

    #[test]
    fn unreadable_embed() {
        let fx = Fixture::new(&[("A.md", "![[Bin]]")]);
        fs::write(fx.vault.path().join("Bin.md"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();
        let (out, issues) = fx.run("A.md");
        assert_eq!(out, "*[Failed to embed: Bin]*");
        assert!(matches!(&issues[0], NoteIssue::Io { .. }));
    }

    #[test]
    fn marked_style() {
        let mut fx = Fixture::new(&[("A.md", "![[B]]"), ("B.md", "inner")]);
        fx.options.embed_style = EmbedStyle::Marked;
        let (out, _) = fx.run("A.md");
        assert_eq!(out, "***\n**Embedded from: B**\n\ninner\n\n***");
    }

    #[test]
    fn section_embed_resolves_whole_note() {
        let fx = Fixture::new(&[("A.md", "![[B#Part|alias]]"), ("B.md", "# Part\nbody")]);
        let (out, _) = fx.run("A.md");
        assert_eq!(out, "# Part\nbody");
    }

    #[test]
    fn image_embed_is_staged() {
        let fx = Fixture::new(&[("A.md", "pic ![[shot.png|200]]"), ("_Attachments/shot.png", "png")]);
        let (out, issues) = fx.run("A.md");
        assert_eq!(out, "pic ![shot.png](images/image_1.png)");
        assert!(issues.is_empty());
        assert!(fx.out.path().join("images/image_1.png").is_file());
    }

    #[test]
    fn nested_image_is_located_from_embedded_note() {
        let fx = Fixture::new(&[
            ("A.md", "![[B]]"),
            ("deep/B.md", "![[local.jpg]]"),
            ("deep/local.jpg", "jpg"),
        ]);
        let (out, _) = fx.run("A.md");
        assert_eq!(out, "![local.jpg](images/image_1.jpg)");
    }

    #[test]
    fn indexed_lookup_behaves_like_scan() {
        let mut fx = Fixture::new(&[("A.md", "a ![[B]]"), ("B.md", "b ![[A]]")]);
        let scanned = fx.run("A.md");
        fx.lookup = NoteLookup::Indexed(NoteIndex::build(&fx.root()));
        assert_eq!(fx.run("A.md"), scanned);
    }
}
