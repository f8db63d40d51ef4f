//! Error taxonomy shared across the redirect subsystem.
//!
//! Only [`ConfigurationError`] ever propagates to callers. Validation
//! failures and rewrite skips are internal: they are logged and then
//! collapse into "not found" or "leave the link alone".

use thiserror::Error;

/// The signing salt could not be read, generated or persisted.
///
/// Fatal to the whole subsystem. Callers must not fall back to an unkeyed
/// or constant salt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("option storage failed for {key}: {message}")]
    Storage { key: String, message: String },

    #[error("random number generation failed: {0}")]
    Random(String),
}

/// Reasons a signed redirect request is rejected.
///
/// Every variant results in the same 404 for the client; the variant is
/// only visible in logs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("checksum or destination parameter missing")]
    MissingParameters,

    #[error("destination is empty")]
    EmptyDestination,

    #[error("destination changes when canonicalized")]
    NotCanonical,

    #[error("destination scheme is not http or https")]
    UnsupportedScheme,

    #[error("destination has no host")]
    MissingHost,

    #[error("destination is same-origin with the local site")]
    SameOrigin,

    #[error("checksum does not match destination")]
    ChecksumMismatch,
}

/// Reasons an anchor is left untouched by the content rewriter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSkip {
    #[error("href missing or not a string")]
    NoHref,

    #[error("href has no parseable host")]
    NoHost,

    #[error("href points at the local site")]
    SameOrigin,

    #[error("href scheme is not http or https")]
    UnsupportedScheme,

    #[error("href would not survive redirect validation")]
    NotCanonical,
}
