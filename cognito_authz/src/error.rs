//! Common errors

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::jwk::KeyId;

/// The stable reason code attached to every denial
///
/// Reason codes are intended for logs and metrics. Clients only ever see the
/// HTTP status derived from a decision, never the specific code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReasonCode {
    /// No bearer token was presented
    MissingToken,
    /// The token could not be decoded, or a claim had the wrong shape
    MalformedToken,
    /// No published key matches the token's `kid`
    UnknownSigningKey,
    /// The signature did not verify, or the algorithm was refused
    SignatureInvalid,
    /// The `iss` claim is not the expected issuer
    IssuerMismatch,
    /// Neither `aud` nor `client_id` names the expected audience
    AudienceMismatch,
    /// The token is past its `exp`
    Expired,
    /// The token is before its `nbf`
    NotYetValid,
    /// The identity provider's metadata or keys could not be fetched
    DiscoveryFetchFailed,
    /// The principal lacks the role the route requires
    InsufficientRole,
    /// The principal lacks a scope the route's policy requires
    InsufficientScope,
    /// The route names a policy that was never registered
    UnknownPolicy,
}

impl ReasonCode {
    /// The reason code in `snake_case`, suitable for log fields
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::UnknownSigningKey => "unknown_signing_key",
            Self::SignatureInvalid => "signature_invalid",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::DiscoveryFetchFailed => "discovery_fetch_failed",
            Self::InsufficientRole => "insufficient_role",
            Self::InsufficientScope => "insufficient_scope",
            Self::UnknownPolicy => "unknown_policy",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provided name could not be matched with supported algorithms
#[derive(Debug, Error)]
#[error("'{alg}' does not match supported algorithms")]
pub struct UnknownAlgorithm {
    alg: String,
}

#[inline]
pub(crate) fn unknown_algorithm(alg: impl Into<String>) -> UnknownAlgorithm {
    UnknownAlgorithm { alg: alg.into() }
}

/// A JWK that cannot be used to verify signatures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("key rejected: {reason}")]
pub struct KeyRejected {
    reason: &'static str,
}

pub(crate) const fn key_rejected(reason: &'static str) -> KeyRejected {
    KeyRejected { reason }
}

/// An error occurring while verifying a signature with a JWK
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum JwkVerifyError {
    /// The key cannot be used with the algorithm declared by the token
    #[error("key incompatible with algorithm '{0}'")]
    IncompatibleAlgorithm(crate::jwa::Algorithm),

    /// The token declared an algorithm that is never accepted
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    /// The signature did not match
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// A failure to obtain the identity provider's metadata or signing keys
///
/// This type is `Clone` so that the outcome of a single shared fetch can be
/// handed to every caller that waited on it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The request could not be sent or the response could not be read
    #[error("request to {url} failed: {message}")]
    Request {
        /// The requested URL
        url: String,
        /// Description of the transport failure
        message: String,
    },

    /// The endpoint answered with a non-success status
    #[error("{url} responded with HTTP {status}")]
    Status {
        /// The requested URL
        url: String,
        /// The HTTP status code
        status: u16,
    },

    /// The response body was not the expected JSON document
    #[error("invalid document from {url}: {message}")]
    InvalidDocument {
        /// The requested URL
        url: String,
        /// Description of the parse failure
        message: String,
    },

    /// The discovery document advertises a different issuer
    #[error("discovery document issuer '{found}' does not match '{expected}'")]
    IssuerMismatch {
        /// The configured issuer
        expected: String,
        /// The issuer named by the document
        found: String,
    },

    /// The key set contained no usable signing keys
    #[error("no usable signing keys published at {url}")]
    EmptyKeySet {
        /// The JWKS URL
        url: String,
    },

    /// The fetch did not complete in time
    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout {
        /// The URL being fetched when time ran out
        url: String,
        /// The configured time limit
        timeout: Duration,
    },
}

/// The reason a bearer token was not accepted
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The token is not a well-formed JWT or carries malformed claims
    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    /// No key in the current key set matches the token's `kid`
    #[error("no signing key found for kid {kid:?}")]
    UnknownSigningKey {
        /// The key ID requested by the token, if any
        kid: Option<KeyId>,
    },

    /// The signature is invalid or the declared algorithm was refused
    #[error("signature rejected")]
    SignatureInvalid(#[source] JwkVerifyError),

    /// The `iss` claim is missing or differs from the expected issuer
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// Neither `aud` nor `client_id` matches the expected audience
    #[error("audience mismatch")]
    AudienceMismatch,

    /// The token has expired
    #[error("token expired")]
    Expired,

    /// The token is not yet valid
    #[error("token not yet valid")]
    NotYetValid,

    /// Signing keys could not be obtained
    #[error("signing keys unavailable")]
    DiscoveryFetchFailed(#[from] DiscoveryError),
}

impl ValidationError {
    /// The reason code for this error
    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::MalformedToken(_) => ReasonCode::MalformedToken,
            Self::UnknownSigningKey { .. } => ReasonCode::UnknownSigningKey,
            Self::SignatureInvalid(_) => ReasonCode::SignatureInvalid,
            Self::IssuerMismatch => ReasonCode::IssuerMismatch,
            Self::AudienceMismatch => ReasonCode::AudienceMismatch,
            Self::Expired => ReasonCode::Expired,
            Self::NotYetValid => ReasonCode::NotYetValid,
            Self::DiscoveryFetchFailed(_) => ReasonCode::DiscoveryFetchFailed,
        }
    }
}

impl From<JwkVerifyError> for ValidationError {
    #[inline]
    fn from(err: JwkVerifyError) -> Self {
        Self::SignatureInvalid(err)
    }
}

/// A scope policy that cannot be registered or resolved
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Policy names must be non-empty
    #[error("policy name must not be empty")]
    EmptyName,

    /// A policy must require at least one scope
    #[error("policy '{0}' does not require any scopes")]
    EmptyScope(String),

    /// One of the required scopes is not a valid scope token
    #[error("policy '{policy}' requires an invalid scope")]
    InvalidScope {
        /// The policy being registered
        policy: String,
        /// The underlying scope error
        #[source]
        source: crate::scope::InvalidScopeToken,
    },

    /// A policy with this name already exists
    #[error("policy '{0}' is already registered")]
    Duplicate(String),

    /// No policy with this name has been registered
    #[error("policy '{0}' is not registered")]
    UnknownPolicy(String),
}

impl PolicyError {
    /// The reason code for this error
    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        ReasonCode::UnknownPolicy
    }
}
