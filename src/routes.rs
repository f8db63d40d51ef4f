//! Verified-redirect route matching and URL construction.
//!
//! Two addressing schemes reach the endpoint:
//!
//! - path-embedded: `/<prefix>/<checksum>/<raw destination>`, where the
//!   destination is the literal, undecoded remainder of the request target;
//! - query-embedded: `?<checksum param>=<checksum>&<destination param>=<encoded destination>`.
//!
//! Both resolve into the same [`RouteParams`] and then into one
//! [`SignedRedirectRequest`]; the scheme carries no trust of its own.

use std::collections::HashMap;

use regex::Regex;
use url::{form_urlencoded, Url};

use crate::config::{ConfigError, RedirectConfig};
use crate::signer::Checksum;

/// Which addressing scheme produced a set of route parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingScheme {
    PathEmbedded,
    QueryEmbedded,
}

/// A `(destination, checksum)` pair taken from an inbound request.
///
/// Untrusted until validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRedirectRequest {
    pub destination: String,
    pub checksum: String,
}

/// Parameters resolved for one request.
///
/// This is the per-request routing context that both validation stages read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    values: HashMap<String, String>,
    scheme: Option<AddressingScheme>,
}

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw query string (without the leading `?`).
    ///
    /// Repeated keys keep the last value.
    pub fn from_query(query: &str) -> Self {
        let values = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect::<HashMap<_, _>>();
        RouteParams {
            values,
            scheme: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    /// Scheme that matched, if the redirect route matched at all.
    pub fn scheme(&self) -> Option<AddressingScheme> {
        self.scheme
    }
}

/// Recognizes verified-redirect requests and builds signed URLs.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    prefix: String,
    checksum_param: String,
    destination_param: String,
    site_root: String,
    site_path: String,
    descriptive_paths: bool,
    pattern: Regex,
}

impl RouteMatcher {
    pub fn new(config: &RedirectConfig) -> Result<Self, ConfigError> {
        let pattern_source = route_pattern(&config.route_prefix);
        let pattern = Regex::new(&pattern_source).map_err(|e| ConfigError::ValidationError {
            path: "embedRedirects.routePrefix".to_string(),
            message: e.to_string(),
        })?;
        let site_root = config.site_root();
        let site_path = Url::parse(&site_root)
            .map(|u| u.path().trim_matches('/').to_string())
            .unwrap_or_default();

        Ok(RouteMatcher {
            prefix: config.route_prefix.clone(),
            checksum_param: config.checksum_param.clone(),
            destination_param: config.destination_param.clone(),
            site_root,
            site_path,
            descriptive_paths: config.descriptive_paths,
            pattern,
        })
    }

    /// The registered route pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn checksum_param(&self) -> &str {
        &self.checksum_param
    }

    pub fn destination_param(&self) -> &str {
        &self.destination_param
    }

    /// Resolve route parameters for a request target (`/path?query`).
    ///
    /// The path pattern is tried first against the raw target with the site
    /// path and leading slash removed. If it matches, the whole remainder,
    /// query included, is the destination. Otherwise the query string is
    /// decoded as ordinary parameters.
    pub fn resolve(&self, request_target: &str) -> RouteParams {
        let relative = self.relative_target(request_target);

        if let Some(caps) = self.pattern.captures(relative) {
            let mut params = RouteParams::new();
            params.insert(self.checksum_param.clone(), &caps[1]);
            params.insert(self.destination_param.clone(), &caps[2]);
            params.scheme = Some(AddressingScheme::PathEmbedded);
            return params;
        }

        let query = request_target
            .split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default();
        let mut params = RouteParams::from_query(query);
        if self.extract(&params).is_some() {
            params.scheme = Some(AddressingScheme::QueryEmbedded);
        }
        params
    }

    /// Pull the signed pair out of resolved parameters.
    ///
    /// `None` unless both the checksum and destination are present.
    pub fn extract(&self, params: &RouteParams) -> Option<SignedRedirectRequest> {
        let checksum = params.get(&self.checksum_param)?;
        let destination = params.get(&self.destination_param)?;
        Some(SignedRedirectRequest {
            destination: destination.to_string(),
            checksum: checksum.to_string(),
        })
    }

    /// Scheme used when building a link for `destination`.
    pub fn scheme_for(&self, destination: &str) -> AddressingScheme {
        if self.descriptive_paths && is_path_safe(destination) {
            AddressingScheme::PathEmbedded
        } else {
            AddressingScheme::QueryEmbedded
        }
    }

    /// Build the signed redirect URL for `destination`.
    pub fn build_url(&self, checksum: &Checksum, destination: &str) -> String {
        match self.scheme_for(destination) {
            AddressingScheme::PathEmbedded => format!(
                "{}{}/{}/{}",
                self.site_root, self.prefix, checksum, destination
            ),
            AddressingScheme::QueryEmbedded => {
                let separator = if self.site_root.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}{}={}&{}={}",
                    self.site_root,
                    separator,
                    self.checksum_param,
                    checksum,
                    self.destination_param,
                    urlencoding::encode(destination)
                )
            }
        }
    }

    fn relative_target<'a>(&self, request_target: &'a str) -> &'a str {
        let target = request_target.trim_start_matches('/');
        if self.site_path.is_empty() {
            return target;
        }
        target
            .strip_prefix(self.site_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(target)
    }
}

/// Route pattern for a prefix: `^<prefix>/([0-9a-zA-Z]+?)/(.*)$`.
pub fn route_pattern(prefix: &str) -> String {
    format!("^{}/([0-9a-zA-Z]+?)/(.*)$", regex::escape(prefix))
}

/// Whether `destination` reaches the server unchanged when appended raw to a
/// request path.
///
/// Browsers drop fragments, resolve dot segments and percent-encode some
/// characters before sending a request, any of which would break the
/// checksum.
fn is_path_safe(destination: &str) -> bool {
    let bytes_ok = destination.bytes().all(|b| {
        (0x21..=0x7e).contains(&b)
            && !matches!(
                b,
                b'"' | b'#' | b'<' | b'>' | b'`' | b'{' | b'}' | b'\\' | b'\''
            )
    });
    if !bytes_ok {
        return false;
    }

    let path = destination.split('?').next().unwrap_or_default();
    !path.split('/').any(|segment| {
        let segment = segment.to_ascii_lowercase().replace("%2e", ".");
        segment == "." || segment == ".."
    })
}
