//! Input resolution: validate the vault root and enumerate its notes.
//!
//! Every directory walk in the crate goes through [`walk`], so the
//! attachment exclusion rule is applied identically to note discovery, note
//! lookup by name and the attachment full scan. Walks are sorted by file name;
//! "first match" therefore means the same file on every run and platform.

use crate::error::ExportError;
use crate::output::NoteDescriptor;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Extension of note files.
pub const NOTE_EXTENSION: &str = "md";

/// A validated vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    /// Validate `path` and canonicalise it into a vault root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExportError::VaultNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_dir() {
            return Err(ExportError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        let root = path
            .canonicalize()
            .map_err(|_| ExportError::VaultNotFound {
                path: path.to_path_buf(),
            })?;
        debug!("Resolved vault root: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every note under `folder` (default: the vault root).
    ///
    /// Hidden and attachment folders are skipped, as are notes whose own name
    /// ends in `Attachment`/`Attachments`. Results are sorted by relative path
    /// and marked included.
    pub fn discover_notes(&self, folder: Option<&Path>) -> Vec<NoteDescriptor> {
        let start = match folder {
            Some(f) if f.is_absolute() => f.to_path_buf(),
            Some(f) => self.root.join(f),
            None => self.root.clone(),
        };
        if !start.is_dir() {
            debug!("Folder {} does not exist; no notes", start.display());
            return Vec::new();
        }

        let mut notes: Vec<NoteDescriptor> = walk(&start)
            .filter(|e| e.file_type().is_file() && is_note_file(e.path()))
            .map(|e| NoteDescriptor::from_path(&self.root, e.into_path()))
            .collect();
        notes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!("Discovered {} notes under {}", notes.len(), start.display());
        notes
    }
}

/// Whether a directory is skipped by every vault walk.
///
/// Hidden folders (`.obsidian`, `.trash`, …) and attachment folders
/// (`Attachments`, `_Attachment`, `Note_Attachments`, …) never contain notes.
pub fn is_excluded_dir_name(name: &str) -> bool {
    name.starts_with('.') || name.ends_with("Attachment") || name.ends_with("Attachments")
}

/// Whether `path` names a note that takes part in discovery.
pub fn is_note_file(path: &Path) -> bool {
    let is_md = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case(NOTE_EXTENSION))
        .unwrap_or(false);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    is_md && !stem.ends_with("Attachment") && !stem.ends_with("Attachments")
}

/// Whether a link or embed target names something below the vault root:
/// not absolute and free of `..` components.
pub fn is_confined(target: &str) -> bool {
    !target.starts_with(['/', '\\'])
        && Path::new(target)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `path` itself if it resolves, symlinks included, to a file under
/// `vault_root`; None otherwise.
pub fn inside_vault(path: PathBuf, vault_root: &Path) -> Option<PathBuf> {
    let resolved = path.canonicalize().ok()?;
    let root = vault_root.canonicalize().ok()?;
    if resolved.starts_with(&root) {
        Some(path)
    } else {
        debug!("Ignoring {} outside vault {}", path.display(), root.display());
        None
    }
}

/// Sorted recursive walk below `root` honouring the exclusion rule.
///
/// Unreadable subtrees are logged and skipped; the walk itself never fails.
pub fn walk(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !is_excluded_dir_name(&e.file_name().to_string_lossy())
        })
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("Skipping unreadable vault entry: {}", err);
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Books/Sci-Fi")).unwrap();
        fs::create_dir_all(root.join(".obsidian")).unwrap();
        fs::create_dir_all(root.join("Attachments")).unwrap();
        fs::create_dir_all(root.join("Books/Dune_Attachments")).unwrap();
        fs::write(root.join("Index.md"), "# Index").unwrap();
        fs::write(root.join("Books/Dune.md"), "Dune").unwrap();
        fs::write(root.join("Books/Sci-Fi/Hyperion.md"), "Hyperion").unwrap();
        fs::write(root.join("Books/Dune_Attachments/Notes.md"), "hidden").unwrap();
        fs::write(root.join(".obsidian/workspace.md"), "hidden").unwrap();
        fs::write(root.join("Attachments/Readme.md"), "hidden").unwrap();
        fs::write(root.join("Books/Map_Attachment.md"), "hidden").unwrap();
        fs::write(root.join("Books/cover.png"), [0u8; 4]).unwrap();
        dir
    }

    #[test]
    fn exclusion_rule() {
        assert!(is_excluded_dir_name(".obsidian"));
        assert!(is_excluded_dir_name("Attachments"));
        assert!(is_excluded_dir_name("Attachment"));
        assert!(is_excluded_dir_name("_Attachments"));
        assert!(is_excluded_dir_name("Dune_Attachment"));
        assert!(!is_excluded_dir_name("Books"));
        assert!(!is_excluded_dir_name("AttachmentsArchive"));
    }

    #[test]
    fn open_rejects_missing_and_files() {
        let dir = vault();
        assert!(matches!(
            Vault::open(dir.path().join("nope")),
            Err(ExportError::VaultNotFound { .. })
        ));
        assert!(matches!(
            Vault::open(dir.path().join("Index.md")),
            Err(ExportError::NotADirectory { .. })
        ));
        assert!(Vault::open(dir.path()).is_ok());
    }

    #[test]
    fn discover_skips_excluded_folders_and_files() {
        let dir = vault();
        let v = Vault::open(dir.path()).unwrap();
        let names: Vec<String> = v
            .discover_notes(None)
            .iter()
            .map(|n| n.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            names,
            vec!["Books/Dune.md", "Books/Sci-Fi/Hyperion.md", "Index.md"]
        );
    }

    #[test]
    fn discover_from_subfolder() {
        let dir = vault();
        let v = Vault::open(dir.path()).unwrap();
        let notes = v.discover_notes(Some(Path::new("Books/Sci-Fi")));
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].name, "Hyperion.md");
        assert_eq!(
            notes[0].relative_path,
            PathBuf::from("Books").join("Sci-Fi").join("Hyperion.md")
        );
    }

    #[test]
    fn confined_targets() {
        assert!(is_confined("Note.md"));
        assert!(is_confined("Books/Dune.md"));
        assert!(is_confined("./Books/Dune.md"));
        assert!(is_confined("v1..2.md"));
        assert!(!is_confined("../secret.md"));
        assert!(!is_confined("Books/../../secret.md"));
        assert!(!is_confined("/etc/passwd"));
        assert!(!is_confined("\\server\\share.png"));
    }

    #[test]
    fn inside_vault_checks_resolved_path() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("Vault");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("In.md"), "in").unwrap();
        fs::write(outer.path().join("Out.md"), "out").unwrap();

        assert!(inside_vault(root.join("In.md"), &root).is_some());
        assert!(inside_vault(root.join("../Out.md"), &root).is_none());
        assert!(inside_vault(outer.path().join("Out.md"), &root).is_none());
        assert!(inside_vault(root.join("Missing.md"), &root).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn inside_vault_rejects_symlink_escape() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("Vault");
        fs::create_dir_all(&root).unwrap();
        fs::write(outer.path().join("Out.md"), "out").unwrap();
        std::os::unix::fs::symlink(outer.path().join("Out.md"), root.join("Link.md")).unwrap();

        assert!(inside_vault(root.join("Link.md"), &root).is_none());
    }

    #[test]
    fn discover_missing_folder_is_empty() {
        let dir = vault();
        let v = Vault::open(dir.path()).unwrap();
        assert!(v.discover_notes(Some(Path::new("Nope"))).is_empty());
    }
}
