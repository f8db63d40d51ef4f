//! Character reference decoding and attribute escaping.
//!
//! Decoding covers numeric references and the named references `&amp;`,
//! `&lt;`, `&gt;`, `&quot;`, `&apos;` and `&nbsp;`, each with its trailing
//! semicolon. Any other named reference, and legacy forms without the
//! semicolon such as `&amp`, stay verbatim. An href written with those forms
//! is therefore signed over a string that differs from what a browser would
//! resolve, and its redirect will not validate.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static CHAR_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[xX]([0-9a-fA-F]{1,6})|#([0-9]{1,7})|([a-zA-Z][a-zA-Z0-9]*));")
        .expect("character reference regex")
});

fn named_reference(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => return None,
    })
}

/// Decode character references in an attribute value.
///
/// Unknown named references and invalid code points are kept verbatim.
pub fn decode_attribute(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    CHAR_REF_REGEX.replace_all(raw, |caps: &Captures<'_>| {
        let decoded = if let Some(hex) = caps.get(1) {
            u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = caps.get(2) {
            dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
        } else {
            caps.get(3).and_then(|name| named_reference(name.as_str()))
        };
        match decoded {
            Some('\0') | None => caps[0].to_string(),
            Some(c) => c.to_string(),
        }
    })
}

/// Escape a value for a double-quoted attribute.
pub fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(&['&', '"', '\'', '<', '>'][..]) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_named_and_numeric() {
        assert_eq!(
            decode_attribute("a&amp;b&lt;c&gt;&quot;&#39;&#x41;&#66;"),
            "a&b<c>\"'AB"
        );
    }

    #[test]
    fn test_decode_keeps_unknown() {
        assert_eq!(decode_attribute("&bogus; &amp &#0; &#x110000;"), "&bogus; &amp &#0; &#x110000;");
    }

    #[test]
    fn test_decode_leaves_legacy_and_unsupported_names() {
        assert_eq!(decode_attribute("?a=1&ampb=2&copy;"), "?a=1&ampb=2&copy;");
    }

    #[test]
    fn test_decode_borrowed_without_ampersand() {
        assert!(matches!(decode_attribute("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape_attribute(r#"https://x.test/?a=1&b="2"<'>"#),
            "https://x.test/?a=1&amp;b=&quot;2&quot;&lt;&#039;&gt;"
        );
        assert!(matches!(escape_attribute("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_then_decode_is_identity() {
        let value = r#"https://example.com/?q="x"&y=<z>'"#;
        assert_eq!(decode_attribute(&escape_attribute(value)), value);
    }
}
