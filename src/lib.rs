//! Signed outbound redirects for embedded content.
//!
//! Outbound links in embeddable views are rewritten to a same-origin
//! "verified redirect" endpoint that carries the real destination and a
//! keyed checksum. The endpoint only redirects when the checksum matches, so
//! it cannot be used as an open redirect.
//!
//! [`EmbedRedirects`] wires every component from one [`RedirectConfig`] and
//! one [`OptionStore`]; [`server`] exposes it to axum.

pub mod config;
pub mod error;
pub mod html;
pub mod logging;
pub mod redirect;
pub mod rewrite;
pub mod routes;
pub mod salt;
pub mod sanitize;
pub mod server;
pub mod signer;
pub mod validator;

use std::borrow::Cow;
use std::sync::Arc;

pub use config::{ConfigError, EnvironmentType, RedirectConfig};
pub use error::{ConfigurationError, ParseSkip, ValidationFailure};
pub use redirect::{Redirect, RedirectCodePolicy, RedirectEmitter};
pub use rewrite::{ContentRewriter, EmbedPolicy, RenderContext};
pub use routes::{AddressingScheme, RouteMatcher, RouteParams, SignedRedirectRequest};
pub use salt::{FileOptionStore, MemoryOptionStore, OptionStore, SaltStore};
pub use signer::{Checksum, Signer};
pub use validator::{RedirectState, RedirectValidator, RequestContext, Verdict};

/// The assembled redirect subsystem.
pub struct EmbedRedirects {
    config: RedirectConfig,
    salts: Arc<SaltStore>,
    signer: Arc<Signer>,
    matcher: Arc<RouteMatcher>,
    emitter: Arc<RedirectEmitter>,
    validator: RedirectValidator,
    rewriter: ContentRewriter,
}

impl EmbedRedirects {
    /// Build every component with the default policies.
    pub fn new(config: RedirectConfig, store: Arc<dyn OptionStore>) -> Result<Self, ConfigError> {
        config.validate()?;

        let salts = Arc::new(SaltStore::new(store, config.salt_option.clone()));
        let signer = Arc::new(Signer::with_length(salts.clone(), config.checksum_length));
        let matcher = Arc::new(RouteMatcher::new(&config)?);
        let emitter = Arc::new(RedirectEmitter::new(config.environment));
        let site_host = config.site_host();

        let validator = RedirectValidator::new(
            matcher.clone(),
            signer.clone(),
            emitter.clone(),
            site_host.clone(),
        );
        let rewriter = ContentRewriter::new(matcher.clone(), signer.clone(), site_host);

        Ok(EmbedRedirects {
            config,
            salts,
            signer,
            matcher,
            emitter,
            validator,
            rewriter,
        })
    }

    /// Replace the redirect status code policy.
    pub fn with_redirect_policy(mut self, policy: Arc<dyn RedirectCodePolicy>) -> Self {
        self.emitter = Arc::new(RedirectEmitter::with_policy(self.config.environment, policy));
        self.validator = RedirectValidator::new(
            self.matcher.clone(),
            self.signer.clone(),
            self.emitter.clone(),
            self.config.site_host(),
        );
        self
    }

    /// Replace the policy deciding when content is rewritten.
    pub fn with_embed_policy(mut self, policy: Arc<dyn EmbedPolicy>) -> Self {
        self.rewriter = ContentRewriter::with_policy(
            self.matcher.clone(),
            self.signer.clone(),
            self.config.site_host(),
            policy,
        );
        self
    }

    pub fn config(&self) -> &RedirectConfig {
        &self.config
    }

    pub fn salts(&self) -> &SaltStore {
        &self.salts
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    pub fn emitter(&self) -> &RedirectEmitter {
        &self.emitter
    }

    pub fn validator(&self) -> &RedirectValidator {
        &self.validator
    }

    pub fn rewriter(&self) -> &ContentRewriter {
        &self.rewriter
    }

    /// Resolve a request target (`/path?query`) into a fresh request context.
    pub fn request_context(&self, request_target: &str) -> RequestContext {
        RequestContext::new(self.matcher.resolve(request_target))
    }

    /// Content-render hook.
    pub fn rewrite_content<'a>(
        &self,
        html: &'a str,
        context: &RenderContext,
    ) -> Result<Cow<'a, str>, ConfigurationError> {
        self.rewriter.rewrite(html, context)
    }

    pub fn sign(&self, destination: &str) -> Result<Checksum, ConfigurationError> {
        self.signer.sign(destination)
    }

    /// Signed redirect URL for `destination`, in the configured addressing scheme.
    pub fn signed_url(&self, destination: &str) -> Result<String, ConfigurationError> {
        let checksum = self.signer.sign(destination)?;
        Ok(self.matcher.build_url(&checksum, destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirects() -> EmbedRedirects {
        let config = RedirectConfig {
            site_url: "https://site.test/blog".to_string(),
            ..RedirectConfig::default()
        };
        EmbedRedirects::new(config, Arc::new(MemoryOptionStore::new())).unwrap()
    }

    #[test]
    fn test_salt_created_on_first_sign() {
        let redirects = redirects();
        let first = redirects.sign("https://example.com/").unwrap();
        let second = redirects.sign("https://example.com/").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 10);
    }

    #[test]
    fn test_signed_url_under_site_path() {
        let redirects = redirects();
        let url = redirects.signed_url("https://example.com/").unwrap();
        assert!(url.starts_with("https://site.test/blog/verified-redirect/"));

        let target = url.trim_start_matches("https://site.test");
        let mut ctx = redirects.request_context(target);
        redirects.validator().parse_request(&mut ctx).unwrap();
        assert!(ctx.has_pending_redirect());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RedirectConfig {
            site_url: "not a url".to_string(),
            ..RedirectConfig::default()
        };
        assert!(EmbedRedirects::new(config, Arc::new(MemoryOptionStore::new())).is_err());
    }

    #[test]
    fn test_zero_checksum_length_never_accepts_empty_checksum() {
        let config = RedirectConfig {
            site_url: "https://news.test/".to_string(),
            checksum_length: 0,
            ..RedirectConfig::default()
        };
        assert!(matches!(
            EmbedRedirects::new(config, Arc::new(MemoryOptionStore::new())),
            Err(ConfigError::ValidationError { .. })
        ));

        let redirects = redirects();
        let mut ctx = redirects
            .request_context("/?pwcc-er-checksum=&verified-redirect=https%3A%2F%2Fevil.test%2F");
        redirects.validator().parse_request(&mut ctx).unwrap();
        assert!(ctx.is_not_found());
        assert!(redirects.validator().send_headers(&mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_redirect_policy_override() {
        let redirects = redirects().with_redirect_policy(Arc::new(|_: u16| 307));
        let checksum = redirects.sign("https://example.com/").unwrap();
        let mut ctx =
            redirects.request_context(&format!("/blog/verified-redirect/{checksum}/https://example.com/"));
        redirects.validator().parse_request(&mut ctx).unwrap();
        let redirect = redirects.validator().send_headers(&mut ctx).unwrap().unwrap();
        assert_eq!(redirect.status, 307);
    }

    #[test]
    fn test_embed_policy_override() {
        let redirects = redirects().with_embed_policy(Arc::new(|_: &RenderContext| false));
        let html = r#"<a href="https://example.com/">x</a>"#;
        assert_eq!(
            redirects.rewrite_content(html, &RenderContext::embed()).unwrap(),
            html
        );
    }
}
