//! Progress-callback trait for per-chapter export events.
//!
//! Inject an [`Arc<dyn ExportProgressCallback>`] via
//! [`crate::config::ExportConfigBuilder::progress_callback`] to receive events
//! as the engine normalises each selected note and hands the result to the
//! compiler.
//!
//! The engine runs on a blocking thread while the caller usually lives on an
//! async runtime, so the trait is `Send + Sync` and every method has a no-op
//! default.
//!
//! # Example
//!
//! ```rust
//! use vault2epub::{ExportConfig, ExportProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExportProgressCallback for CountingCallback {
//!     fn on_chapter_complete(&self, index: usize, total: usize, name: &str, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ({} bytes)", index, total, name, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ExportConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExportProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the export pipeline as it processes each chapter.
pub trait ExportProgressCallback: Send + Sync {
    /// Called once before the first note is read.
    ///
    /// `total` counts included notes only.
    fn on_export_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a note is read and normalised.
    ///
    /// `index` is 1-based.
    fn on_chapter_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a note was normalised into a chapter.
    fn on_chapter_complete(&self, index: usize, total: usize, name: &str, markdown_len: usize) {
        let _ = (index, total, name, markdown_len);
    }

    /// Called when a note was skipped (missing or unreadable).
    fn on_chapter_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called right before the external compiler is launched.
    fn on_compile_start(&self, program: &str) {
        let _ = program;
    }

    /// Called once after all chapters have been attempted.
    fn on_export_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExportProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExportConfig`].
pub type ProgressCallback = Arc<dyn ExportProgressCallback>;
