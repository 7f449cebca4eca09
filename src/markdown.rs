//! Markdown parsing: frontmatter, titles and HTML rendering.

use pulldown_cmark::{html, Event, Options};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// YAML frontmatter. Only `title` is interpreted; every other key is kept
/// verbatim.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Frontmatter {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A Markdown file split into metadata and body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub title: String,
    /// Body with the frontmatter block removed.
    pub content: String,
    pub frontmatter: Frontmatter,
}

/// Parse a raw file. Title precedence: frontmatter `title`, first `# `
/// heading, file stem of `path`.
pub fn parse_document(path: &str, raw: &str) -> ParsedDocument {
    let (frontmatter, content) = split_frontmatter(raw);

    let title = frontmatter
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| first_heading(content))
        .unwrap_or_else(|| fallback_title(path));

    ParsedDocument {
        title,
        content: content.to_string(),
        frontmatter,
    }
}

/// Split a `---` delimited frontmatter block off the front of `raw`.
///
/// Missing or malformed frontmatter yields a default [`Frontmatter`]; in the
/// malformed case the body still has the block removed.
pub fn split_frontmatter(raw: &str) -> (Frontmatter, &str) {
    let rest = match raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (Frontmatter::default(), raw),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let fm = if yaml.trim().is_empty() {
                Frontmatter::default()
            } else {
                serde_yaml::from_str(yaml).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "ignoring malformed frontmatter");
                    Frontmatter::default()
                })
            };
            return (fm, body);
        }
        offset += line.len();
    }

    // Unterminated block: treat the whole file as body.
    (Frontmatter::default(), raw)
}

fn first_heading(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let heading = line.trim_start().strip_prefix("# ")?.trim();
        (!heading.is_empty()).then(|| heading.to_string())
    })
}

fn fallback_title(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Parser options shared by every rendering pass.
pub fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Render a stream of Markdown events to HTML.
pub fn render_events<'a, I>(events: I, size_hint: usize) -> String
where
    I: Iterator<Item = Event<'a>>,
{
    let mut out = String::with_capacity(size_hint * 3 / 2);
    html::push_html(&mut out, events);
    out
}

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
