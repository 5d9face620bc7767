//! Reference resolution: bare note name → note file inside the vault.
//!
//! There is no index by default. Each lookup walks the vault (exclusion rule
//! applied, sorted order) and returns the first file whose name equals the
//! target. When the same embeds are resolved many times per export,
//! [`NoteIndex`] does one walk up front and answers from a map with the same
//! first-match semantics.
//!
//! Two notes with the same file name in different folders are ambiguous; the
//! one earlier in sorted walk order wins.

use crate::pipeline::input::{self, NOTE_EXTENSION};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append `.md` to `name` unless it already carries it.
pub fn note_file_name(name: &str) -> String {
    let suffix = format!(".{NOTE_EXTENSION}");
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Locate the note called `name` under `vault_root`.
///
/// A name containing `/` (`Books/Dune`) is first tried as a vault-relative
/// path; otherwise, or if that file does not exist, only its last component is
/// matched against file names. Absolute names and names with `..` never
/// resolve, and neither does a path that leaves the vault through a symlink.
pub fn find_note(name: &str, vault_root: &Path) -> Option<PathBuf> {
    let target = note_file_name(name.trim());
    if !input::is_confined(&target) {
        debug!("Refusing note target outside the vault: '{}'", name);
        return None;
    }

    if let Some(found) = try_relative(&target, vault_root) {
        return Some(found);
    }

    let file_name = file_component(&target);
    let found = input::walk(vault_root)
        .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
        .map(|e| e.into_path());

    match &found {
        Some(p) => debug!("Resolved note '{}' → {}", name, p.display()),
        None => debug!("Note '{}' not found under {}", name, vault_root.display()),
    }
    found
}

fn try_relative(target: &str, vault_root: &Path) -> Option<PathBuf> {
    if !target.contains('/') {
        return None;
    }
    let candidate = vault_root.join(target);
    if !candidate.is_file() {
        return None;
    }
    input::inside_vault(candidate, vault_root)
}

fn file_component(target: &str) -> &str {
    target.rsplit('/').next().unwrap_or(target)
}

/// Precomputed file name → path map for one vault.
#[derive(Debug, Clone, Default)]
pub struct NoteIndex {
    root: PathBuf,
    by_name: HashMap<String, PathBuf>,
}

impl NoteIndex {
    /// Walk `vault_root` once and remember the first note for every file name.
    pub fn build(vault_root: &Path) -> Self {
        let mut by_name = HashMap::new();
        for entry in input::walk(vault_root) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            by_name.entry(name).or_insert_with(|| entry.into_path());
        }
        debug!("Indexed {} files under {}", by_name.len(), vault_root.display());
        Self {
            root: vault_root.to_path_buf(),
            by_name,
        }
    }

    /// Same contract as [`find_note`], answered from the index.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let target = note_file_name(name.trim());
        if !input::is_confined(&target) {
            return None;
        }
        try_relative(&target, &self.root)
            .or_else(|| self.by_name.get(file_component(&target)).cloned())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Lookup strategy used by a session.
#[derive(Debug, Clone, Default)]
pub enum NoteLookup {
    /// Walk the vault for every lookup. (default)
    #[default]
    Scan,
    /// Answer from a prebuilt index.
    Indexed(NoteIndex),
}

impl NoteLookup {
    pub fn find(&self, name: &str, vault_root: &Path) -> Option<PathBuf> {
        match self {
            NoteLookup::Scan => find_note(name, vault_root),
            NoteLookup::Indexed(index) => index.find(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("A")).unwrap();
        fs::create_dir_all(root.join("B/Deep")).unwrap();
        fs::create_dir_all(root.join("Attachments")).unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::write(root.join("B/Deep/Target.md"), "deep").unwrap();
        fs::write(root.join("A/Twin.md"), "first").unwrap();
        fs::write(root.join("B/Twin.md"), "second").unwrap();
        fs::write(root.join("Attachments/Hidden.md"), "no").unwrap();
        fs::write(root.join(".trash/Deleted.md"), "no").unwrap();
        dir
    }

    #[test]
    fn appends_extension() {
        assert_eq!(note_file_name("Note"), "Note.md");
        assert_eq!(note_file_name("Note.md"), "Note.md");
        assert_eq!(note_file_name("v1.2"), "v1.2.md");
    }

    #[test]
    fn finds_nested_note() {
        let dir = vault();
        let found = find_note("Target", dir.path()).unwrap();
        assert!(found.ends_with("B/Deep/Target.md"));
        assert_eq!(find_note("Target.md", dir.path()), Some(found));
    }

    #[test]
    fn skips_attachment_and_hidden_folders() {
        let dir = vault();
        assert_eq!(find_note("Hidden", dir.path()), None);
        assert_eq!(find_note("Deleted", dir.path()), None);
    }

    #[test]
    fn duplicates_resolve_in_sorted_order() {
        let dir = vault();
        let found = find_note("Twin", dir.path()).unwrap();
        assert!(found.ends_with("A/Twin.md"), "got {}", found.display());
    }

    #[test]
    fn path_qualified_name() {
        let dir = vault();
        let found = find_note("B/Twin", dir.path()).unwrap();
        assert!(found.ends_with("B/Twin.md"));
        // Unknown folder falls back to the bare file name.
        let found = find_note("Elsewhere/Target", dir.path()).unwrap();
        assert!(found.ends_with("Target.md"));
    }

    #[test]
    fn names_leaving_the_vault_do_not_resolve() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("Vault");
        fs::create_dir_all(root.join("Sub")).unwrap();
        fs::write(root.join("Sub/Inner.md"), "in").unwrap();
        fs::write(outer.path().join("secret.md"), "TOP SECRET").unwrap();
        let index = NoteIndex::build(&root);
        let absolute = outer.path().join("secret").display().to_string();

        for name in ["../secret", "Sub/../../secret", absolute.as_str()] {
            assert_eq!(find_note(name, &root), None, "resolved {name}");
            assert_eq!(index.find(name), None, "index resolved {name}");
        }
        assert!(find_note("Sub/Inner", &root).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_path_outside_vault_is_ignored() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("Vault");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(outer.path().join("Private")).unwrap();
        fs::write(outer.path().join("Private/secret.md"), "TOP SECRET").unwrap();
        std::os::unix::fs::symlink(outer.path().join("Private"), root.join("Shared")).unwrap();

        assert_eq!(find_note("Shared/secret", &root), None);
    }

    #[test]
    fn index_agrees_with_scan() {
        let dir = vault();
        let index = NoteIndex::build(dir.path());
        assert!(!index.is_empty());
        for name in ["Target", "Twin", "B/Twin", "Hidden", "Missing"] {
            assert_eq!(
                index.find(name),
                find_note(name, dir.path()),
                "disagreement on {name}"
            );
        }
    }

    #[test]
    fn lookup_dispatch() {
        let dir = vault();
        let scan = NoteLookup::Scan;
        let indexed = NoteLookup::Indexed(NoteIndex::build(dir.path()));
        assert_eq!(
            scan.find("Target", dir.path()),
            indexed.find("Target", dir.path())
        );
    }
}
