//! Two-stage validation of verified-redirect requests.
//!
//! Stage 1 runs when the request is routed. Stage 2 runs again, from the
//! request's resolved parameters, when response headers are about to be
//! sent, since other code may have touched those parameters in between.
//!
//! ```text
//! Unvalidated ──stage 1──▶ Rejected            (404)
//!             └─────────▶ PendingRedirect ──stage 2──▶ NotFound    (nothing sent)
//!                                        └──────────▶ Redirected  (3xx)
//! ```
//!
//! Every failure looks the same to the client. The reason is only logged.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::error::{ConfigurationError, ValidationFailure};
use crate::redirect::{Redirect, RedirectEmitter};
use crate::routes::{RouteMatcher, RouteParams, SignedRedirectRequest};
use crate::sanitize;
use crate::signer::Signer;

/// Where a request is in the validation state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectState {
    /// Not examined yet, or not a redirect request at all
    Unvalidated,
    /// Stage 1 failed; the request is a 404
    Rejected(ValidationFailure),
    /// Stage 1 passed; a redirect is scheduled for header time
    PendingRedirect,
    /// Stage 2 failed; no redirect is sent
    NotFound(ValidationFailure),
    /// Stage 2 passed and the redirect was emitted
    Redirected(Redirect),
}

/// Outcome of validating one signed pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(ValidationFailure),
}

/// Per-request state shared by both stages.
///
/// Owned by the host for the lifetime of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Resolved route parameters; the only input to either stage
    pub params: RouteParams,
    state: RedirectState,
    not_found: bool,
    skip_main_query: bool,
}

impl RequestContext {
    pub fn new(params: RouteParams) -> Self {
        RequestContext {
            params,
            state: RedirectState::Unvalidated,
            not_found: false,
            skip_main_query: false,
        }
    }

    pub fn state(&self) -> &RedirectState {
        &self.state
    }

    /// Whether the request must be answered as "not found".
    pub fn is_not_found(&self) -> bool {
        self.not_found
    }

    /// Whether the host should skip its default content query.
    pub fn main_query_suppressed(&self) -> bool {
        self.skip_main_query
    }

    /// Whether stage 2 has work to do.
    pub fn has_pending_redirect(&self) -> bool {
        self.state == RedirectState::PendingRedirect
    }
}

/// Runs the two validation stages.
pub struct RedirectValidator {
    matcher: Arc<RouteMatcher>,
    signer: Arc<Signer>,
    emitter: Arc<RedirectEmitter>,
    site_host: Option<String>,
}

impl RedirectValidator {
    pub fn new(
        matcher: Arc<RouteMatcher>,
        signer: Arc<Signer>,
        emitter: Arc<RedirectEmitter>,
        site_host: Option<String>,
    ) -> Self {
        RedirectValidator {
            matcher,
            signer,
            emitter,
            site_host: site_host.map(|h| h.to_ascii_lowercase()),
        }
    }

    /// Stage 1, at route-resolution time.
    ///
    /// Requests without both parameters are left alone. Otherwise the main
    /// query is suppressed and the request becomes either `Rejected` (404) or
    /// `PendingRedirect`.
    pub fn parse_request(&self, ctx: &mut RequestContext) -> Result<(), ConfigurationError> {
        let Some(request) = self.matcher.extract(&ctx.params) else {
            return Ok(());
        };

        // The redirect endpoint never lists content.
        ctx.skip_main_query = true;

        match self.validate(&request)? {
            Verdict::Valid => {
                ctx.state = RedirectState::PendingRedirect;
            }
            Verdict::Invalid(reason) => {
                debug!(target: "redirect", %reason, stage = 1, "rejecting redirect request");
                ctx.not_found = true;
                ctx.state = RedirectState::Rejected(reason);
            }
        }
        Ok(())
    }

    /// Stage 2, at response-header time.
    ///
    /// Re-extracts and re-validates from the context. Returns the redirect to
    /// send, or `None` if nothing is pending or validation now fails.
    pub fn send_headers(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<Redirect>, ConfigurationError> {
        if !ctx.has_pending_redirect() {
            return Ok(None);
        }

        let verdict = match self.matcher.extract(&ctx.params) {
            Some(request) => match self.validate(&request)? {
                Verdict::Valid => {
                    let redirect = self.emitter.emit(&request.destination);
                    ctx.state = RedirectState::Redirected(redirect.clone());
                    return Ok(Some(redirect));
                }
                invalid => invalid,
            },
            None => Verdict::Invalid(ValidationFailure::MissingParameters),
        };

        if let Verdict::Invalid(reason) = verdict {
            debug!(target: "redirect", %reason, stage = 2, "abandoning redirect");
            ctx.state = RedirectState::NotFound(reason);
        }
        Ok(None)
    }

    /// Check one signed pair: strict URL syntax, then the checksum.
    pub fn validate(&self, request: &SignedRedirectRequest) -> Result<Verdict, ConfigurationError> {
        if let Err(reason) = self.check_destination(&request.destination) {
            return Ok(Verdict::Invalid(reason));
        }

        if self.signer.verify(&request.destination, &request.checksum)? {
            Ok(Verdict::Valid)
        } else {
            Ok(Verdict::Invalid(ValidationFailure::ChecksumMismatch))
        }
    }

    fn check_destination(&self, destination: &str) -> Result<(), ValidationFailure> {
        if destination.is_empty() {
            return Err(ValidationFailure::EmptyDestination);
        }
        if !sanitize::is_canonical(destination) {
            return Err(ValidationFailure::NotCanonical);
        }

        let parsed = Url::parse(destination).map_err(|_| ValidationFailure::UnsupportedScheme)?;
        if !sanitize::ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Err(ValidationFailure::UnsupportedScheme);
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(ValidationFailure::MissingHost)?;

        if self
            .site_host
            .as_deref()
            .is_some_and(|site| site == host.to_ascii_lowercase())
        {
            return Err(ValidationFailure::SameOrigin);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentType, RedirectConfig};
    use crate::salt::{MemoryOptionStore, SaltStore};

    struct Fixture {
        validator: RedirectValidator,
        matcher: Arc<RouteMatcher>,
        signer: Arc<Signer>,
    }

    fn fixture(environment: EnvironmentType) -> Fixture {
        let config = RedirectConfig {
            site_url: "https://site.test/".to_string(),
            environment,
            ..Default::default()
        };
        let store = Arc::new(MemoryOptionStore::new());
        let salts = Arc::new(SaltStore::new(store, "salt"));
        let signer = Arc::new(Signer::new(salts));
        let matcher = Arc::new(RouteMatcher::new(&config).unwrap());
        let emitter = Arc::new(RedirectEmitter::new(environment));
        let validator = RedirectValidator::new(
            matcher.clone(),
            signer.clone(),
            emitter,
            config.site_host(),
        );
        Fixture {
            validator,
            matcher,
            signer,
        }
    }

    fn context(f: &Fixture, target: &str) -> RequestContext {
        RequestContext::new(f.matcher.resolve(target))
    }

    fn query_target(checksum: &str, destination: &str) -> String {
        format!(
            "/?pwcc-er-checksum={checksum}&verified-redirect={}",
            urlencoding::encode(destination)
        )
    }

    #[test]
    fn test_unrelated_request_is_untouched() {
        let f = fixture(EnvironmentType::Production);
        let mut ctx = context(&f, "/about/");
        f.validator.parse_request(&mut ctx).unwrap();
        assert_eq!(ctx.state(), &RedirectState::Unvalidated);
        assert!(!ctx.is_not_found());
        assert!(!ctx.main_query_suppressed());
        assert_eq!(f.validator.send_headers(&mut ctx).unwrap(), None);
    }

    #[test]
    fn test_valid_request_redirects() {
        let f = fixture(EnvironmentType::Development);
        let dest = "https://example.com/";
        let checksum = f.signer.sign(dest).unwrap();

        let mut ctx = context(&f, &query_target(checksum.as_str(), dest));
        f.validator.parse_request(&mut ctx).unwrap();
        assert_eq!(ctx.state(), &RedirectState::PendingRedirect);
        assert!(ctx.main_query_suppressed());
        assert!(!ctx.is_not_found());

        let redirect = f.validator.send_headers(&mut ctx).unwrap().unwrap();
        assert_eq!(redirect.location, dest);
        assert_eq!(redirect.status, 302);
        assert!(matches!(ctx.state(), RedirectState::Redirected(_)));
    }

    #[test]
    fn test_production_uses_permanent_redirect() {
        let f = fixture(EnvironmentType::Production);
        let dest = "https://example.com/";
        let checksum = f.signer.sign(dest).unwrap();
        let mut ctx = context(&f, &format!("/verified-redirect/{checksum}/{dest}"));
        f.validator.parse_request(&mut ctx).unwrap();
        let redirect = f.validator.send_headers(&mut ctx).unwrap().unwrap();
        assert_eq!(redirect.status, 301);
    }

    #[test]
    fn test_bad_checksum_is_rejected() {
        let f = fixture(EnvironmentType::Production);
        let mut ctx = context(
            &f,
            "/verified-redirect/1234567890/?verified-redirect=http%3A%2F%2Fexample.org%2F",
        );
        f.validator.parse_request(&mut ctx).unwrap();
        assert!(ctx.is_not_found());
        assert!(ctx.main_query_suppressed());
        assert!(matches!(ctx.state(), RedirectState::Rejected(_)));
        assert_eq!(f.validator.send_headers(&mut ctx).unwrap(), None);
    }

    #[test]
    fn test_failure_reasons() {
        let f = fixture(EnvironmentType::Production);
        let cases = [
            ("", ValidationFailure::EmptyDestination),
            ("https://example.com/a b", ValidationFailure::NotCanonical),
            ("https://example.com/%zz", ValidationFailure::NotCanonical),
            ("javascript:alert(1)", ValidationFailure::NotCanonical),
            ("/relative/path", ValidationFailure::UnsupportedScheme),
            ("https://site.test/page", ValidationFailure::SameOrigin),
            ("https://SITE.test/page", ValidationFailure::SameOrigin),
            ("https://example.com/", ValidationFailure::ChecksumMismatch),
        ];
        for (destination, expected) in cases {
            // Sign where possible so only the destination checks can fail.
            let checksum = f.signer.sign(destination).unwrap();
            let request = SignedRedirectRequest {
                destination: destination.to_string(),
                checksum: if expected == ValidationFailure::ChecksumMismatch {
                    "0000000000".to_string()
                } else {
                    checksum.into_string()
                },
            };
            assert_eq!(
                f.validator.validate(&request).unwrap(),
                Verdict::Invalid(expected),
                "{destination:?}"
            );
        }
    }

    #[test]
    fn test_checksum_case_is_ignored() {
        let f = fixture(EnvironmentType::Production);
        let dest = "https://example.com/";
        let checksum = f.signer.sign(dest).unwrap().as_str().to_ascii_uppercase();
        let request = SignedRedirectRequest {
            destination: dest.to_string(),
            checksum,
        };
        assert_eq!(f.validator.validate(&request).unwrap(), Verdict::Valid);
    }

    #[test]
    fn test_both_schemes_validate_identically() {
        let f = fixture(EnvironmentType::Production);
        let dest = "https://example.com/a?b=c";
        let good = f.signer.sign(dest).unwrap().into_string();

        for checksum in [good.as_str(), "abcdef0123"] {
            let mut by_path = context(&f, &format!("/verified-redirect/{checksum}/{dest}"));
            let mut by_query = context(&f, &query_target(checksum, dest));
            f.validator.parse_request(&mut by_path).unwrap();
            f.validator.parse_request(&mut by_query).unwrap();
            assert_eq!(by_path.state(), by_query.state());
            assert_eq!(by_path.is_not_found(), by_query.is_not_found());
        }
    }

    #[test]
    fn test_mutation_between_stages_is_caught() {
        let f = fixture(EnvironmentType::Production);
        let dest = "https://example.com/";
        let checksum = f.signer.sign(dest).unwrap();
        let mut ctx = context(&f, &query_target(checksum.as_str(), dest));
        f.validator.parse_request(&mut ctx).unwrap();
        assert!(ctx.has_pending_redirect());

        ctx.params.insert("verified-redirect", "https://evil.example/");
        assert_eq!(f.validator.send_headers(&mut ctx).unwrap(), None);
        assert_eq!(
            ctx.state(),
            &RedirectState::NotFound(ValidationFailure::ChecksumMismatch)
        );
    }

    #[test]
    fn test_removed_parameters_between_stages() {
        let f = fixture(EnvironmentType::Production);
        let dest = "https://example.com/";
        let checksum = f.signer.sign(dest).unwrap();
        let mut ctx = context(&f, &query_target(checksum.as_str(), dest));
        f.validator.parse_request(&mut ctx).unwrap();

        ctx.params.remove("pwcc-er-checksum");
        assert_eq!(f.validator.send_headers(&mut ctx).unwrap(), None);
        assert_eq!(
            ctx.state(),
            &RedirectState::NotFound(ValidationFailure::MissingParameters)
        );
    }
}
