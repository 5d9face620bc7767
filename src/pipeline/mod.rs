//! Pipeline stages for vault-to-book conversion.
//!
//! Each submodule implements one step. The engine stages (`input` through
//! `embed`) are synchronous and free of global state; only `compile` is async.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ◀──▶ embed ──▶ compile
//! (vault)   (cleanup)      │  ▲      (pandoc / ebook-convert)
//!                          ▼  │
//!                    resolve  attach
//!                    (notes)  (images)
//! ```
//!
//! 1. [`input`]     — validate the vault root, discover notes, and own the
//!    directory walk every other stage uses
//! 2. [`resolve`]   — bare note name → note file
//! 3. [`attach`]    — image name → located file → staged copy
//! 4. [`normalize`] — strip front matter and vault syntax; rewrite links and tags
//! 5. [`embed`]     — recursive `![[…]]` expansion with cycle detection
//! 6. [`compile`]   — run the external compiler with a timeout

pub mod attach;
pub mod compile;
pub mod embed;
pub mod input;
pub mod normalize;
pub mod resolve;
