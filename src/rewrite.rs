//! Outbound link rewriting.
//!
//! Replaces the `href` of every eligible anchor in rendered content with a
//! signed redirect URL pointing back at the local site. Rewritten links are
//! same-origin, so running the rewriter over its own output changes nothing.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, trace};
use url::Url;

use crate::error::{ConfigurationError, ParseSkip};
use crate::html::{AttributeValue, TagProcessor};
use crate::routes::RouteMatcher;
use crate::sanitize;
use crate::signer::Signer;

/// What the host is rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Whether the content is rendered inside an embeddable view
    pub is_embed: bool,
}

impl RenderContext {
    pub fn embed() -> Self {
        RenderContext { is_embed: true }
    }

    pub fn page() -> Self {
        RenderContext { is_embed: false }
    }
}

/// Decides whether links in a render should be rewritten.
pub trait EmbedPolicy: Send + Sync {
    fn should_rewrite(&self, context: &RenderContext) -> bool;
}

impl<F> EmbedPolicy for F
where
    F: Fn(&RenderContext) -> bool + Send + Sync,
{
    fn should_rewrite(&self, context: &RenderContext) -> bool {
        self(context)
    }
}

/// Rewrites exactly when rendering an embed view.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedViewsOnly;

impl EmbedPolicy for EmbedViewsOnly {
    fn should_rewrite(&self, context: &RenderContext) -> bool {
        context.is_embed
    }
}

/// Rewrites anchors to go through the verified redirect endpoint.
pub struct ContentRewriter {
    matcher: Arc<RouteMatcher>,
    signer: Arc<Signer>,
    site_host: Option<String>,
    policy: Arc<dyn EmbedPolicy>,
}

impl ContentRewriter {
    pub fn new(matcher: Arc<RouteMatcher>, signer: Arc<Signer>, site_host: Option<String>) -> Self {
        Self::with_policy(matcher, signer, site_host, Arc::new(EmbedViewsOnly))
    }

    pub fn with_policy(
        matcher: Arc<RouteMatcher>,
        signer: Arc<Signer>,
        site_host: Option<String>,
        policy: Arc<dyn EmbedPolicy>,
    ) -> Self {
        ContentRewriter {
            matcher,
            signer,
            site_host: site_host.map(|h| h.to_ascii_lowercase()),
            policy,
        }
    }

    /// Rewrite `content` for one render.
    ///
    /// Content is borrowed back unchanged when the policy declines, when it
    /// has no `href=` at all, or when no anchor qualifies. Only a salt
    /// failure is an error; a bad href just stays as it is.
    pub fn rewrite<'a>(
        &self,
        content: &'a str,
        context: &RenderContext,
    ) -> Result<Cow<'a, str>, ConfigurationError> {
        if !self.policy.should_rewrite(context) {
            return Ok(Cow::Borrowed(content));
        }
        if !content.contains("href=") {
            return Ok(Cow::Borrowed(content));
        }

        let mut processor = TagProcessor::new(content);
        let mut rewritten = 0usize;

        while processor.next_tag("a") {
            let href = match processor.get_attribute("href") {
                Some(AttributeValue::Text(href)) => href,
                _ => {
                    trace!(target: "rewrite", reason = %ParseSkip::NoHref, "skipping anchor");
                    continue;
                }
            };

            if let Err(reason) = self.check_href(&href) {
                trace!(target: "rewrite", %reason, "skipping anchor");
                continue;
            }

            let checksum = self.signer.sign(&href)?;
            let signed = self.matcher.build_url(&checksum, &href);
            processor.set_attribute("href", &signed);
            rewritten += 1;
        }

        if rewritten == 0 {
            return Ok(Cow::Borrowed(content));
        }
        debug!(target: "rewrite", links = rewritten, "rewrote outbound links");
        Ok(Cow::Owned(processor.get_updated_html()))
    }

    /// Decide whether an href is an external http(s) link.
    fn check_href(&self, href: &str) -> Result<(), ParseSkip> {
        let host = Url::parse(href)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .filter(|h| !h.is_empty())
            .ok_or(ParseSkip::NoHost)?;

        if self.site_host.as_deref() == Some(host.as_str()) {
            return Err(ParseSkip::SameOrigin);
        }
        if !(href.starts_with("http://") || href.starts_with("https://")) {
            return Err(ParseSkip::UnsupportedScheme);
        }
        // The endpoint rejects anything canonicalization would change.
        if !sanitize::is_canonical(href) {
            return Err(ParseSkip::NotCanonical);
        }
        Ok(())
    }
}
