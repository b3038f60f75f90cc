//! Markdown documents with a YAML front matter header.
//!
//! ```text
//! ---
//! id: V1StGXR8_Z5j
//! title: Weekly Sync
//! tags: [meetings]
//! status: draft
//! ---
//! Body text with a [[Wiki Link]] and [[other note|an alias]].
//! ```
//!
//! `id`, `title` and `tags` map onto [`Node`] fields. Every other header key is kept verbatim in
//! `properties`. The body becomes `content` unchanged, so a document round-trips through
//! [`MarkdownParser::serialize`].

use once_cell::sync::Lazy;
use pulldown_cmark::{Event as MdEvent, HeadingLevel, Options, Parser as MdParser, Tag, TagEnd};
use regex::Regex;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::{BTreeMap, HashSet};

use crate::{
    codec::{DocumentParser, ParseContext},
    error::RouxError,
    paths::{has_extension, normalize_separators},
    properties::{Node, RESERVED_KEYS},
};

const DELIMITER: &str = "---";

/// `[[target]]`, `[[target|alias]]` and `[[target#heading]]`. Group 1 is the target.
static WIKILINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[([^\[\]|#]+)(?:#[^\[\]|]*)?(?:\|[^\[\]]*)?\]\]").expect("wikilink regex")
});

pub fn build_options() -> Options {
    let mut md_options = Options::empty();
    md_options.insert(Options::ENABLE_GFM);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options
}

/// Split `content` into its front matter header and body. Returns `None` for the header when the
/// document does not open with a `---` line or the block is never closed.
pub fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\r\n")
        .or_else(|| content.strip_prefix("---\n"))
    else {
        return (None, content);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(header), body);
        }
        offset += line.len();
    }
    (None, content)
}

fn parse_header(header: Option<&str>) -> Result<Mapping, RouxError> {
    let Some(header) = header else {
        return Ok(Mapping::new());
    };
    match serde_yaml::from_str::<YamlValue>(header) {
        Ok(YamlValue::Mapping(map)) => Ok(map),
        Ok(YamlValue::Null) => Ok(Mapping::new()),
        Ok(other) => Err(RouxError::Parse(format!(
            "front matter must be a mapping, found {other:?}"
        ))),
        Err(e) => Err(RouxError::Parse(format!("invalid front matter: {e}"))),
    }
}

fn scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Tags from a string or a list of scalars; blanks dropped, case-insensitive duplicates removed.
fn parse_tags(value: Option<&YamlValue>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(YamlValue::Sequence(items)) => items.iter().filter_map(scalar_string).collect(),
        Some(other) => scalar_string(other).into_iter().collect(),
        None => Vec::new(),
    };
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}

/// First level-one heading of `body`, as plain text.
pub fn first_heading(body: &str) -> Option<String> {
    let mut in_h1 = false;
    let mut title = String::new();
    for event in MdParser::new_ext(body, build_options()) {
        match event {
            MdEvent::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) => in_h1 = true,
            MdEvent::End(TagEnd::Heading(HeadingLevel::H1)) => {
                let title = title.trim();
                if !title.is_empty() {
                    return Some(title.to_string());
                }
                in_h1 = false;
            }
            MdEvent::Text(text) | MdEvent::Code(text) if in_h1 => title.push_str(&text),
            _ => {}
        }
    }
    None
}

/// Normalized wikilink targets of `body` in document order, first occurrence kept.
pub fn extract_links(body: &str, default_extension: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WIKILINK
        .captures_iter(body)
        .filter_map(|cap| {
            let target = normalize_separators(cap[1].trim()).to_lowercase();
            if target.is_empty() {
                return None;
            }
            let target = if has_extension(&target) {
                target
            } else {
                format!("{target}.{default_extension}")
            };
            seen.insert(target.clone()).then_some(target)
        })
        .collect()
}

fn render(header: &Mapping, body: &str) -> Result<String, RouxError> {
    let yaml = if header.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(header)?
    };
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

#[derive(Debug, Clone)]
pub struct MarkdownParser {
    default_link_extension: String,
}

impl Default for MarkdownParser {
    fn default() -> Self {
        MarkdownParser::new(crate::config::DEFAULT_LINK_EXTENSION)
    }
}

impl MarkdownParser {
    pub fn new(default_link_extension: &str) -> Self {
        MarkdownParser {
            default_link_extension: default_link_extension
                .trim_start_matches('.')
                .to_lowercase(),
        }
    }
}

impl DocumentParser for MarkdownParser {
    fn parse(&self, content: &str, ctx: &ParseContext<'_>) -> Result<Node, RouxError> {
        let (header, body) = split_front_matter(content);
        let mut header = parse_header(header)?;

        let id = header
            .get("id")
            .and_then(scalar_string)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ctx.provisional_id());
        let title = header
            .get("title")
            .and_then(scalar_string)
            .filter(|t| !t.trim().is_empty())
            .or_else(|| first_heading(body))
            .unwrap_or_else(|| ctx.stem());
        let tags = parse_tags(header.get("tags"));

        for key in RESERVED_KEYS {
            header.remove(key);
        }
        let mut properties = BTreeMap::new();
        for (key, value) in header {
            let Some(key) = scalar_string(&key) else {
                tracing::debug!(
                    "[MarkdownParser] Skipping non-scalar front matter key in {}",
                    ctx.relative_path
                );
                continue;
            };
            let value = serde_json::to_value(&value).map_err(|e| {
                RouxError::Parse(format!("front matter key '{key}' is not representable: {e}"))
            })?;
            properties.insert(key, value);
        }

        Ok(Node {
            id,
            title,
            content: body.to_string(),
            tags,
            outgoing_links: extract_links(body, &self.default_link_extension),
            properties,
            source_ref: Some(ctx.source_ref()),
        })
    }

    fn serialize(&self, node: &Node) -> Result<String, RouxError> {
        let mut header = Mapping::new();
        header.insert("id".into(), node.id.clone().into());
        header.insert("title".into(), node.title.clone().into());
        header.insert(
            "tags".into(),
            YamlValue::Sequence(node.tags.iter().cloned().map(YamlValue::from).collect()),
        );
        for (key, value) in node.properties.iter() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            header.insert(key.clone().into(), serde_yaml::to_value(value)?);
        }
        render(&header, &node.content)
    }

    fn write_id(&self, content: &str, id: &str) -> Result<Option<String>, RouxError> {
        let (raw_header, body) = split_front_matter(content);
        let existing = parse_header(raw_header)?;
        let mut header = Mapping::new();
        header.insert("id".into(), id.into());
        for (key, value) in existing {
            if key.as_str() != Some("id") {
                header.insert(key, value);
            }
        }
        render(&header, body).map(Some)
    }
}
