//! Minimal HTML tag processor.
//!
//! Walks start tags in document order, reads and writes attributes, and
//! serializes the document back with every byte outside modified attributes
//! left exactly as it was. It is not a parser: there is no tree, no
//! normalization, and no recovery beyond what is needed to find tag
//! boundaries. Comments, declarations, processing instructions and the
//! contents of raw-text elements (`script`, `style`, `textarea`, `title`)
//! are skipped. An unterminated tag ends the scan.

mod entities;

pub use entities::{decode_attribute, escape_attribute};

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// Elements whose contents are never scanned for tags.
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?(?:-->|\z)|<![^>]*>?|<\?[^>]*>?|</[a-zA-Z][^>]*>?|<([a-zA-Z][a-zA-Z0-9:-]*)")
        .expect("html token regex")
});

/// Value of an attribute as read from markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Present without a value, e.g. `<a href>`
    Boolean,
    /// Present with a (decoded) value
    Text(String),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(text) => Some(text),
            AttributeValue::Boolean => None,
        }
    }
}

#[derive(Debug)]
struct Attribute {
    name: String,
    /// Whole attribute, name through end of value
    span: Range<usize>,
    /// Raw value without quotes, if the attribute has one
    value: Option<Range<usize>>,
    replacement: Option<String>,
}

#[derive(Debug)]
struct Tag {
    name: String,
    /// Byte offset just before the closing `>` or `/>`
    insert_at: usize,
    attributes: Vec<Attribute>,
    appended: Vec<(String, String)>,
}

/// Cursor over the start tags of a document.
#[derive(Debug)]
pub struct TagProcessor<'a> {
    html: &'a str,
    tags: Vec<Tag>,
    current: Option<usize>,
    next: usize,
}

impl<'a> TagProcessor<'a> {
    pub fn new(html: &'a str) -> Self {
        TagProcessor {
            html,
            tags: scan(html),
            current: None,
            next: 0,
        }
    }

    /// Advance to the next start tag named `name` (ASCII case-insensitive).
    pub fn next_tag(&mut self, name: &str) -> bool {
        while self.next < self.tags.len() {
            let index = self.next;
            self.next += 1;
            if self.tags[index].name.eq_ignore_ascii_case(name) {
                self.current = Some(index);
                return true;
            }
        }
        self.current = None;
        false
    }

    /// Lowercased name of the current tag.
    pub fn tag_name(&self) -> Option<&str> {
        self.current.map(|i| self.tags[i].name.as_str())
    }

    /// Read an attribute of the current tag. The first occurrence wins.
    pub fn get_attribute(&self, name: &str) -> Option<AttributeValue> {
        let tag = &self.tags[self.current?];
        if let Some(attr) = find_attribute(tag, name) {
            if let Some(replacement) = &attr.replacement {
                return Some(AttributeValue::Text(replacement.clone()));
            }
            return Some(match &attr.value {
                Some(range) => {
                    AttributeValue::Text(decode_attribute(&self.html[range.clone()]).into_owned())
                }
                None => AttributeValue::Boolean,
            });
        }
        tag.appended
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| AttributeValue::Text(v.clone()))
    }

    /// Set an attribute of the current tag to `value` (unescaped).
    ///
    /// Returns `false` if there is no current tag.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        let tag = &mut self.tags[index];
        if let Some(attr) = tag
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            attr.replacement = Some(value.to_string());
            return true;
        }
        match tag
            .appended
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => tag
                .appended
                .push((name.to_ascii_lowercase(), value.to_string())),
        }
        true
    }

    /// Whether any attribute was changed.
    pub fn is_modified(&self) -> bool {
        self.tags.iter().any(|t| {
            !t.appended.is_empty() || t.attributes.iter().any(|a| a.replacement.is_some())
        })
    }

    /// Serialize the document with all changes applied.
    pub fn get_updated_html(&self) -> String {
        let mut out = String::with_capacity(self.html.len() + 64);
        let mut cursor = 0;

        for tag in &self.tags {
            for attr in &tag.attributes {
                let Some(replacement) = &attr.replacement else {
                    continue;
                };
                out.push_str(&self.html[cursor..attr.span.start]);
                out.push_str(&self.html[attr.span.start..attr.span.start + attr.name.len()]);
                out.push_str("=\"");
                out.push_str(&escape_attribute(replacement));
                out.push('"');
                cursor = attr.span.end;
            }
            if !tag.appended.is_empty() {
                out.push_str(&self.html[cursor..tag.insert_at]);
                for (name, value) in &tag.appended {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                cursor = tag.insert_at;
            }
        }

        out.push_str(&self.html[cursor..]);
        out
    }
}

fn find_attribute<'t>(tag: &'t Tag, name: &str) -> Option<&'t Attribute> {
    tag.attributes
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
}

/// Collect every start tag in `html`.
fn scan(html: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(caps) = TOKEN_REGEX.captures_at(html, pos) {
        let whole = caps.get(0).map_or(pos..pos, |m| m.range());
        let Some(name) = caps.get(1) else {
            // Comment, declaration, processing instruction or end tag.
            pos = whole.end.max(pos + 1);
            continue;
        };

        let Some((tag, end)) = parse_start_tag(html, name.as_str(), name.end()) else {
            break;
        };
        pos = end;

        if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
            pos = find_raw_text_end(html, pos, &tag.name);
        }
        tags.push(tag);
    }

    tags
}

/// Parse attributes after a tag name. Returns the tag and the offset just
/// past its `>`, or `None` if the tag never closes.
fn parse_start_tag(html: &str, name: &str, mut pos: usize) -> Option<(Tag, usize)> {
    let bytes = html.as_bytes();
    let mut attributes = Vec::new();

    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b'/') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        if bytes[pos] == b'>' {
            let insert_at = if pos > 0 && bytes[pos - 1] == b'/' { pos - 1 } else { pos };
            let tag = Tag {
                name: name.to_ascii_lowercase(),
                insert_at,
                attributes,
                appended: Vec::new(),
            };
            return Some((tag, pos + 1));
        }

        let name_start = pos;
        // A leading '=' belongs to the name.
        pos += 1;
        while pos < bytes.len()
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'/' | b'>' | b'=')
        {
            pos += 1;
        }
        let attr_name = &html[name_start..pos];
        let mut span_end = pos;

        let mut after = pos;
        while after < bytes.len() && bytes[after].is_ascii_whitespace() {
            after += 1;
        }

        let mut value = None;
        if after < bytes.len() && bytes[after] == b'=' {
            after += 1;
            while after < bytes.len() && bytes[after].is_ascii_whitespace() {
                after += 1;
            }
            if after >= bytes.len() {
                return None;
            }
            match bytes[after] {
                quote @ (b'"' | b'\'') => {
                    let close = html[after + 1..].find(quote as char)? + after + 1;
                    value = Some(after + 1..close);
                    span_end = close + 1;
                }
                b'>' => {
                    // `name=>`: empty unquoted value.
                    value = Some(after..after);
                    span_end = after;
                }
                _ => {
                    let start = after;
                    while after < bytes.len()
                        && !bytes[after].is_ascii_whitespace()
                        && bytes[after] != b'>'
                    {
                        after += 1;
                    }
                    value = Some(start..after);
                    span_end = after;
                }
            }
            pos = span_end;
        }

        attributes.push(Attribute {
            name: attr_name.to_ascii_lowercase(),
            span: name_start..span_end,
            value,
            replacement: None,
        });
    }
}

/// Offset of the `</name` that closes a raw-text element, or the end of input.
fn find_raw_text_end(html: &str, from: usize, name: &str) -> usize {
    let closing = format!("</{name}");
    let haystack = &html.as_bytes()[from..];
    haystack
        .windows(closing.len())
        .position(|w| w.eq_ignore_ascii_case(closing.as_bytes()))
        .map_or(html.len(), |i| from + i)
}
