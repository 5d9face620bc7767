//! Attachment location and staging.
//!
//! `![[diagram.png]]` names an image by file name only; where it actually
//! lives depends on the user's attachment settings. The locator probes the
//! usual places in a fixed priority order and falls back to a full vault
//! scan:
//!
//! 1. the referring note's own directory
//! 2. `_Attachments`, `_Attachment`, `Attachments`, `Attachment` next to the note
//! 3. the same four folders directly under the vault root
//! 4. any file of that name in the vault (sorted walk, exclusion rule applied)
//!
//! Absolute names, names containing `..` and candidates that resolve outside
//! the vault through a symlink are never returned.
//!
//! A hit is copied into the export's [`AssetDirectory`] and referenced by a
//! path relative to the markdown that the compiler sees.

use crate::config::ImageNaming;
use crate::error::NoteIssue;
use crate::pipeline::input;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions treated as images by `![[…]]` (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg", "webp"];

/// Attachment folder names probed next to the note and under the vault root.
const ATTACHMENT_DIRS: &[&str] = &["_Attachments", "_Attachment", "Attachments", "Attachment"];

/// Whether an embed target names an image rather than a note.
pub fn is_image(target: &str) -> bool {
    Path::new(target)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Find the file behind `image` as referenced from `note_path`.
pub fn locate(image: &str, note_path: &Path, vault_root: &Path) -> Option<PathBuf> {
    let image = image.trim();
    if image.is_empty() || !input::is_confined(image) {
        return None;
    }

    let note_dir = note_path.parent().unwrap_or(vault_root);
    let candidates = std::iter::once(note_dir.join(image))
        .chain(ATTACHMENT_DIRS.iter().map(|d| note_dir.join(d).join(image)))
        .chain(ATTACHMENT_DIRS.iter().map(|d| vault_root.join(d).join(image)));

    for candidate in candidates.filter(|c| c.is_file()) {
        if let Some(found) = input::inside_vault(candidate, vault_root) {
            debug!("Located '{}' at {}", image, found.display());
            return Some(found);
        }
    }

    let file_name = Path::new(image)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())?;
    let found = input::walk(vault_root)
        .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
        .map(|e| e.into_path());
    if let Some(p) = &found {
        debug!("Located '{}' by vault scan at {}", image, p.display());
    }
    found
}

/// Output folder receiving staged copies of every image referenced by an export.
///
/// One instance is shared by all chapters of an export, so generated names
/// are unique across the whole book and an image embedded by several notes is
/// copied once.
#[derive(Debug)]
pub struct AssetDirectory {
    dir: PathBuf,
    ref_prefix: String,
    naming: ImageNaming,
    next_id: usize,
    staged: HashMap<PathBuf, String>,
}

impl AssetDirectory {
    /// `dir` is created lazily on the first copy. `ref_prefix` is the folder
    /// name used inside markdown references (normally `dir`'s last component).
    pub fn new(dir: impl Into<PathBuf>, ref_prefix: impl Into<String>, naming: ImageNaming) -> Self {
        Self {
            dir: dir.into(),
            ref_prefix: ref_prefix.into(),
            naming,
            next_id: 1,
            staged: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Number of distinct source images copied so far.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Copy `source` into the directory and return its staged file name.
    ///
    /// A source that was already staged keeps its first name and is not
    /// copied again.
    pub fn stage(&mut self, source: &Path) -> io::Result<String> {
        if let Some(name) = self.staged.get(source) {
            return Ok(name.clone());
        }

        fs::create_dir_all(&self.dir)?;
        let name = match self.naming {
            ImageNaming::Generated => self.next_generated_name(source),
            ImageNaming::Original => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "image has no file name"))?,
        };

        fs::copy(source, self.dir.join(&name))?;
        debug!("Staged {} as {}", source.display(), name);
        self.staged.insert(source.to_path_buf(), name.clone());
        Ok(name)
    }

    /// Markdown reference to a staged file.
    pub fn reference(&self, alt: &str, staged: &str) -> String {
        format!("![{}]({}/{})", alt, self.ref_prefix, staged)
    }

    fn next_generated_name(&mut self, source: &Path) -> String {
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "img".to_string());
        loop {
            let name = format!("image_{}.{}", self.next_id, ext);
            self.next_id += 1;
            // The directory may already hold files from an earlier run.
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }
}

/// Placeholder substituted for an image that cannot be located or copied.
pub fn not_found_marker(image: &str) -> String {
    format!("*[Image not found: {image}]*")
}

/// Locate `image`, stage it and return the markdown reference.
///
/// Never fails the expansion: a miss or a copy error yields the not-found
/// marker together with the issue to record.
pub fn locate_and_stage(
    image: &str,
    note_path: &Path,
    vault_root: &Path,
    assets: &mut AssetDirectory,
) -> (String, Option<NoteIssue>) {
    let Some(source) = locate(image, note_path, vault_root) else {
        warn!("Image not found: '{}' (referenced from {})", image, note_path.display());
        let issue = NoteIssue::ImageNotFound {
            note: note_path.to_path_buf(),
            target: image.to_string(),
        };
        return (not_found_marker(image), Some(issue));
    };

    match assets.stage(&source) {
        Ok(staged) => (assets.reference(image, &staged), None),
        Err(e) => {
            warn!("Failed to copy image {}: {}", source.display(), e);
            (not_found_marker(image), Some(NoteIssue::io(source, &e)))
        }
    }
}
