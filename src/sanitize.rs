//! Strict URL canonicalization.
//!
//! A destination is acceptable only if [`canonicalize`] returns it
//! unchanged. Canonicalization drops characters that have no business in a
//! URL (whitespace, control characters, quotes, angle brackets), strips
//! encoded CR/LF, repairs `;//` and refuses anything outside `http`/`https`.

use std::sync::LazyLock;

use regex::Regex;

/// Schemes a destination may use.
pub const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

const REFERENCE_PREFIXES: &[char] = &['/', '#', '?'];
const BRACKETS: &[char] = &['[', ']'];

static DISALLOWED_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9\-~+_.?#=!&;,/:%@$|*'()\[\]\x{80}-\x{10FFFF}]")
        .expect("disallowed url chars regex")
});
static ENCODED_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%0[dDaA]").expect("encoded newline regex"));
static SCHEME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.\-]*):").expect("scheme regex"));

/// Canonicalize `url`. Returns an empty string for unusable input.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim_start();
    if url.is_empty() {
        return String::new();
    }

    let url = url.replace(' ', "%20");
    let mut url = DISALLOWED_CHARS.replace_all(&url, "").into_owned();
    if url.is_empty() {
        return url;
    }

    // Removing one encoded newline may reveal another.
    while ENCODED_NEWLINE.is_match(&url) {
        url = ENCODED_NEWLINE.replace_all(&url, "").into_owned();
    }

    let mut url = url.replace(";//", "://");

    if !url.contains(':') && !url.starts_with(REFERENCE_PREFIXES) {
        url = format!("http://{url}");
    }

    if !has_valid_brackets(&url) {
        return String::new();
    }

    match SCHEME_REGEX.captures(&url) {
        Some(caps) => {
            let scheme = caps[1].to_ascii_lowercase();
            if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
                return String::new();
            }
        }
        None => {
            // A colon with no valid scheme in front of it.
            if url.contains(':') && !url.starts_with(REFERENCE_PREFIXES) {
                return String::new();
            }
        }
    }

    url
}

/// Whether `url` survives canonicalization byte-for-byte and has well-formed
/// percent escapes.
pub fn is_canonical(url: &str) -> bool {
    !url.is_empty() && has_valid_percent_escapes(url) && canonicalize(url) == url
}

/// Square brackets are only meaningful around an IPv6 host.
fn has_valid_brackets(url: &str) -> bool {
    if !url.contains(BRACKETS) {
        return true;
    }
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    let authority_end = rest.find(&['/', '?', '#'][..]).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    if tail.contains(BRACKETS) {
        return false;
    }
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    match (host.find('['), host.find(']')) {
        (Some(0), Some(close)) => {
            host[1..close].bytes().all(|b| b.is_ascii_hexdigit() || b == b':' || b == b'.')
                && host[close + 1..].bytes().all(|b| b == b':' || b.is_ascii_digit())
                && host.matches('[').count() == 1
                && host.matches(']').count() == 1
        }
        _ => false,
    }
}

fn has_valid_percent_escapes(url: &str) -> bool {
    let bytes = url.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}
