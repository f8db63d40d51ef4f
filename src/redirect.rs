//! Redirect emission.
//!
//! Production and staging default to a permanent redirect (301), every other
//! tier to a temporary one (302). A single [`RedirectCodePolicy`] may replace
//! the default; the caller is responsible for keeping it a 3xx code.

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use crate::config::EnvironmentType;

/// Label attached to every emitted redirect.
pub const REDIRECT_LABEL: &str = "verified-redirect";

/// Header carrying [`REDIRECT_LABEL`].
pub const X_REDIRECT_BY: &str = "x-redirect-by";

/// Permanent redirect code for production-like tiers.
pub const PERMANENT_REDIRECT: u16 = 301;

/// Temporary redirect code for other tiers.
pub const TEMPORARY_REDIRECT: u16 = 302;

/// Overrides the redirect status code.
///
/// Receives the tier default and returns the code to send. No range check is
/// applied to the result.
pub trait RedirectCodePolicy: Send + Sync {
    fn redirect_code(&self, default_code: u16) -> u16;
}

impl<F> RedirectCodePolicy for F
where
    F: Fn(u16) -> u16 + Send + Sync,
{
    fn redirect_code(&self, default_code: u16) -> u16 {
        self(default_code)
    }
}

/// Keeps the tier default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierDefault;

impl RedirectCodePolicy for TierDefault {
    fn redirect_code(&self, default_code: u16) -> u16 {
        default_code
    }
}

/// A redirect ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Destination, exactly as validated
    pub location: String,
    /// Status code chosen by the policy
    pub status: u16,
    /// Diagnostic label sent as `X-Redirect-By`
    pub redirected_by: &'static str,
}

impl IntoResponse for Redirect {
    fn into_response(self) -> Response {
        let status = match StatusCode::from_u16(self.status) {
            Ok(status) => status,
            Err(_) => {
                error!(
                    target: "redirect",
                    status = self.status,
                    "redirect policy returned an invalid status code"
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let Ok(location) = HeaderValue::from_str(&self.location) else {
            error!(target: "redirect", "validated destination is not a valid header value");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        (
            status,
            [
                (header::LOCATION, location),
                (
                    HeaderName::from_static(X_REDIRECT_BY),
                    HeaderValue::from_static(self.redirected_by),
                ),
            ],
        )
            .into_response()
    }
}

/// Chooses the status code and produces the final [`Redirect`].
#[derive(Clone)]
pub struct RedirectEmitter {
    environment: EnvironmentType,
    policy: Arc<dyn RedirectCodePolicy>,
}

impl RedirectEmitter {
    pub fn new(environment: EnvironmentType) -> Self {
        Self::with_policy(environment, Arc::new(TierDefault))
    }

    pub fn with_policy(environment: EnvironmentType, policy: Arc<dyn RedirectCodePolicy>) -> Self {
        RedirectEmitter {
            environment,
            policy,
        }
    }

    /// Status code used before the policy runs.
    pub fn default_code(&self) -> u16 {
        if self.environment.is_production_like() {
            PERMANENT_REDIRECT
        } else {
            TEMPORARY_REDIRECT
        }
    }

    /// Build the redirect for an already validated destination.
    ///
    /// Returning the value ends request handling: the host sends it as the
    /// response and runs nothing further for this request.
    pub fn emit(&self, destination: &str) -> Redirect {
        let status = self.policy.redirect_code(self.default_code());
        info!(target: "redirect", status, "emitting verified redirect");
        Redirect {
            location: destination.to_string(),
            status,
            redirected_by: REDIRECT_LABEL,
        }
    }
}
