//! Content normalisation: Obsidian-flavoured markdown → plain markdown.
//!
//! ## What gets removed or rewritten
//!
//! Vault notes carry syntax that a document compiler either misreads or
//! renders as noise:
//!
//! - YAML front matter (`---` … `---`), sometimes left unterminated
//! - leftover `key: value` metadata and plugin option blocks (`title:`,
//!   `style:`, `minLevel:` …) that a table-of-contents plugin writes inline
//! - stray `---` lines that pandoc would try to parse as another YAML block
//! - callout headers such as `> [!note] Title`
//! - `![[embeds]]`, `[[wiki links]]` and `#tags`
//!
//! ## Rule order
//!
//! Every rule is a pure `&str → String` pass over the whole document. Order
//! matters: hygiene first so a BOM cannot hide the opening `---`, front matter
//! before any other metadata rule, embeds before links (an embed is a link
//! with a `!` in front), and whitespace last so removed blocks leave no holes.
//!
//! [`normalize`] runs without path context and turns every embed into a
//! placeholder. [`normalize_note`] resolves embeds through a
//! [`Session`], which re-enters [`normalize_note`] for embedded notes.

use crate::config::NormalizeOptions;
use crate::pipeline::embed::{self, Reference, Session};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::path::Path;

/// Normalise `raw` without path context.
///
/// Embeds cannot be resolved here and become `*[Image: target]*`.
pub fn normalize(raw: &str, opts: &NormalizeOptions) -> String {
    let s = strip_vault_metadata(raw, opts);
    let s = replace_embeds_with_placeholders(&s);
    finish(&s)
}

/// Normalise the note at `note_path`, expanding its embeds through `session`.
pub fn normalize_note(raw: &str, note_path: &Path, session: &mut Session<'_>) -> String {
    let s = strip_vault_metadata(raw, session.options());
    let s = embed::expand(&s, note_path, session);
    finish(&s)
}

/// Steps 0–3: hygiene, front matter, residual metadata, callouts.
fn strip_vault_metadata(raw: &str, opts: &NormalizeOptions) -> String {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let s = strip_front_matter(
        &s,
        opts.front_matter_lookahead,
        opts.front_matter_fallback_lines,
    );
    let s = strip_residual_metadata(&s);
    let s = strip_plugin_blocks(&s);
    let s = strip_rule_lines(&s);
    strip_callouts(&s)
}

/// Steps 4 (links, tags) and 5 (whitespace).
fn finish(expanded: &str) -> String {
    let s = rewrite_links(expanded);
    let s = rewrite_tags(&s);
    collapse_blank_lines(&s)
}

// ── Rule 0: Text hygiene ─────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 1: Front matter ─────────────────────────────────────────────────────
//
// A closed block is dropped whole. An unterminated one (a common result of
// hand-edited or synced notes) is cut at the first heading or first line that
// does not look like metadata. If the whole lookahead window looks like
// metadata, a fixed prefix is dropped and rule 2 mops up.

static RE_METADATA_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\p{L}\p{N}_][\p{L}\p{N}_ -]*\s*:(?:\s|$)").unwrap());

fn is_list_continuation(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ") || t == "-"
}

fn looks_like_metadata(line: &str) -> bool {
    line.trim().is_empty() || RE_METADATA_LINE.is_match(line) || is_list_continuation(line)
}

fn strip_front_matter(input: &str, lookahead: usize, fallback_lines: usize) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let Some(open) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return input.to_string();
    };
    if lines[open].trim() != "---" {
        return input.to_string();
    }

    let window_end = lines.len().min(open + 1 + lookahead);
    let body = open + 1;

    if let Some(close) = (body..window_end).find(|&i| lines[i].trim() == "---") {
        return lines[close + 1..].join("\n");
    }

    let cut = (body..window_end).find(|&i| {
        let t = lines[i].trim();
        t.starts_with('#') || !looks_like_metadata(lines[i])
    });
    match cut {
        Some(i) => lines[i..].join("\n"),
        None if lines.len() > open + fallback_lines => lines[open + fallback_lines..].join("\n"),
        None => lines[body..].join("\n"),
    }
}

// ── Rule 2a: Residual metadata at the top ────────────────────────────────────

const METADATA_KEYS: &[&str] = &[
    "title",
    "date",
    "tags",
    "author",
    "aliases",
    "description",
    "created",
    "updated",
    "cssclass",
    "publish",
    "draft",
    "category",
    "categories",
    "summary",
    "keywords",
    "cover",
    "lang",
    "source",
    "type",
    "источник",
    "тип",
    "теги",
    "дата создания",
    "дата обновления",
];

fn is_known_metadata_line(line: &str) -> bool {
    let Some((key, _)) = line.trim().split_once(':') else {
        return false;
    };
    let key = key.trim().to_lowercase();
    METADATA_KEYS.contains(&key.as_str())
}

fn strip_residual_metadata(input: &str) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let mut cut = 0;
    let mut in_entry = false;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            in_entry = false;
        } else if is_known_metadata_line(line) {
            in_entry = true;
        } else if !(in_entry && is_list_continuation(line)) {
            break;
        }
        cut = i + 1;
    }

    if cut == 0 {
        input.to_string()
    } else {
        lines[cut..].join("\n")
    }
}

// ── Rule 2b: Plugin metadata blocks ──────────────────────────────────────────

static RE_PLUGIN_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:title|style|minLevel|maxLevel|includeLinks|debugInConsole):").unwrap()
});

/// Drop each plugin option line and everything after it up to the next blank
/// line, heading or code fence. A fenced block left empty is dropped too.
fn strip_plugin_blocks(input: &str) -> String {
    let mut kept = Vec::new();
    let mut skipping = false;

    for line in input.split('\n') {
        let t = line.trim();
        if skipping {
            if t.is_empty() || t.starts_with('#') || t.starts_with("```") {
                skipping = false;
            } else {
                continue;
            }
        }
        if RE_PLUGIN_BLOCK.is_match(t) {
            skipping = true;
            continue;
        }
        kept.push(line);
    }

    let mut out = Vec::with_capacity(kept.len());
    let mut i = 0;
    while i < kept.len() {
        let opens_fence = kept[i].trim_start().starts_with("```");
        if opens_fence && kept.get(i + 1).is_some_and(|l| l.trim() == "```") {
            i += 2;
            continue;
        }
        out.push(kept[i]);
        i += 1;
    }
    out.join("\n")
}

// ── Rule 2c: Stray `---` lines ───────────────────────────────────────────────

fn strip_rule_lines(input: &str) -> String {
    input
        .split('\n')
        .filter(|l| l.trim() != "---")
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Callout headers ──────────────────────────────────────────────────

static RE_CALLOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:>\s*)*\[![^\]\s]+\][+-]?(?:\s.*)?$").unwrap());

fn strip_callouts(input: &str) -> String {
    input
        .split('\n')
        .filter(|l| !RE_CALLOUT.is_match(l))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Embeds, links, tags ──────────────────────────────────────────────

pub(crate) static RE_EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[([^\]]+)\]\]").unwrap());

static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());

static RE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(^|\s)#([\p{L}\p{N}_/-]+)").unwrap());

fn replace_embeds_with_placeholders(input: &str) -> String {
    RE_EMBED
        .replace_all(input, |caps: &Captures| format!("*[Image: {}]*", &caps[1]))
        .into_owned()
}

fn rewrite_links(input: &str) -> String {
    RE_LINK
        .replace_all(input, |caps: &Captures| {
            format!("**{}**", Reference::parse(&caps[1], false).display_text())
        })
        .into_owned()
}

/// `#tag` → `**#tag**`, only at start of line or after whitespace, so
/// headings, URL fragments and already-emphasised tags are left alone.
/// Lines inside fenced code blocks are copied untouched.
fn rewrite_tags(input: &str) -> String {
    let mut in_fence = false;
    input
        .split('\n')
        .map(|line| {
            let t = line.trim_start();
            if t.starts_with("```") || t.starts_with("~~~") {
                in_fence = !in_fence;
                return Cow::Borrowed(line);
            }
            if in_fence {
                Cow::Borrowed(line)
            } else {
                RE_TAG.replace_all(line, "$1**#$2**")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Whitespace ───────────────────────────────────────────────────────

fn collapse_blank_lines(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for line in input.split('\n') {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        out.push(if blank { "" } else { line });
        previous_blank = blank;
    }
    out.join("\n").trim().to_string()
}
