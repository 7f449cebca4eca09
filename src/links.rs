//! Wiki-link extraction and resolution.
//!
//! Documents reference each other with `[[target]]` or `[[target|display]]`
//! tokens. A [`LinkMap`] maps lowercased titles and extension-less paths to
//! documents; [`resolve`] walks the tokens of one document once, producing
//! both the ordered link list and the Markdown with every token rewritten as
//! an anchor, so the stored links and the rendered HTML never disagree.

use pulldown_cmark::{CowStr, Event, Parser, Tag, TagEnd, TextMergeStream};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::markdown::{escape_html, parser_options, render_events};
use crate::models::{DocRef, Link};

static LINK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]\n]*)\]\]").expect("valid link token regex"));

/// Case-insensitive lookup from link keys to documents.
///
/// Each document contributes two keys: its title and its path without the
/// file extension. Later inserts win on key collisions.
#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    entries: HashMap<String, DocRef>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_docs<I: IntoIterator<Item = DocRef>>(docs: I) -> Self {
        let mut map = Self::new();
        for doc in docs {
            map.insert(doc);
        }
        map
    }

    pub fn insert(&mut self, doc: DocRef) {
        let title_key = normalize_key(&doc.title);
        let path_key = normalize_key(strip_extension(&doc.path));
        if !title_key.is_empty() {
            self.entries.insert(title_key, doc.clone());
        }
        if !path_key.is_empty() {
            self.entries.insert(path_key, doc);
        }
    }

    pub fn extend(&mut self, other: LinkMap) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, key: &str) -> Option<&DocRef> {
        self.entries.get(&normalize_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// `notes/setup.md` → `notes/setup`. Dots in directory names are kept.
pub fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

/// Canonical URL of a document under `base_url`.
pub fn canonical_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        strip_extension(path)
    )
}

/// A link token as it appears in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub target: String,
    pub display: String,
}

/// A link token after lookup. `target` is `None` for a missing link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub target_path: String,
    pub link_text: String,
    pub target: Option<DocRef>,
}

/// Output of a resolution pass over one document.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Links in order of first textual occurrence, duplicates kept.
    pub links: Vec<ResolvedLink>,
    /// Rendered HTML with anchors in place of link tokens.
    pub html: String,
}

impl Resolution {
    /// Link rows owned by `source_id`.
    pub fn to_links(&self, source_id: &str) -> Vec<Link> {
        self.links
            .iter()
            .map(|l| Link {
                source_id: source_id.to_string(),
                target_id: l.target.as_ref().map(|d| d.id.clone()),
                target_path: l.target_path.clone(),
                link_text: l.link_text.clone(),
            })
            .collect()
    }
}

fn parse_token(inner: &str) -> Option<RawLink> {
    let (target, display) = match inner.split_once('|') {
        Some((t, d)) => (t.trim(), d.trim()),
        None => (inner.trim(), ""),
    };
    if target.is_empty() {
        return None;
    }
    let display = if display.is_empty() { target } else { display };
    Some(RawLink {
        target: target.to_string(),
        display: display.to_string(),
    })
}

/// All link tokens in `text`, in order. Tokens with an empty target and
/// tokens inside code spans or code blocks are skipped.
pub fn extract_links(text: &str) -> Vec<RawLink> {
    resolve(text, &LinkMap::new(), "")
        .links
        .into_iter()
        .map(|l| RawLink {
            target: l.target_path,
            display: l.link_text,
        })
        .collect()
}

/// Resolve every link token in `content` against `map` and render the
/// document to HTML in the same pass.
///
/// Tokens are looked for in text events only, so code spans and code
/// blocks keep their `[[...]]` literally and produce no links.
pub fn resolve(content: &str, map: &LinkMap, base_url: &str) -> Resolution {
    let mut links = Vec::new();
    let mut events = Vec::new();
    let mut in_code_block = false;

    let parser = Parser::new_ext(content, parser_options());
    for event in TextMergeStream::new(parser) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                events.push(event);
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                events.push(event);
            }
            Event::Text(text) if !in_code_block && text.contains("[[") => {
                rewrite_text(&text, map, base_url, &mut links, &mut events);
            }
            other => events.push(other),
        }
    }

    let html = render_events(events.into_iter(), content.len());
    Resolution { links, html }
}

/// Split one text event around its link tokens, emitting an anchor for each.
fn rewrite_text(
    text: &str,
    map: &LinkMap,
    base_url: &str,
    links: &mut Vec<ResolvedLink>,
    events: &mut Vec<Event<'_>>,
) {
    let mut last = 0;
    for caps in LINK_TOKEN.captures_iter(text) {
        let Some(raw) = parse_token(&caps[1]) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            events.push(Event::Text(CowStr::from(text[last..whole.start()].to_string())));
        }

        let target = map.get(&raw.target).cloned();
        let anchor = match &target {
            Some(doc) => format!(
                "<a href=\"{}\" class=\"wiki-link\">{}</a>",
                escape_html(&canonical_url(base_url, &doc.path)),
                escape_html(&raw.display)
            ),
            None => format!(
                "<a href=\"{}\" class=\"wiki-link missing\">{}</a>",
                escape_html(&canonical_url(base_url, &raw.target)),
                escape_html(&raw.display)
            ),
        };
        events.push(Event::InlineHtml(CowStr::from(anchor)));
        links.push(ResolvedLink {
            target_path: raw.target,
            link_text: raw.display,
            target,
        });
        last = whole.end();
    }
    if last < text.len() {
        events.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}
