//! Bearer token validation and scope-based authorization
//!
//! Tokens are JWTs minted by an OpenID Connect provider such as an Amazon
//! Cognito user pool. The provider's discovery document and signing keys are
//! fetched on demand and cached; see [`DiscoveryCache`]. A [`TokenValidator`]
//! checks the signature, issuer, audience and lifetime of a token, and an
//! [`Authorizer`] turns an `Authorization` header into an
//! [`AuthorizationDecision`] by also checking roles and named
//! [scope policies][ScopePolicy].
//!
//! ```no_run
//! use cognito_authz::{AuthConfig, Authorizer, RouteRequirement};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_file("authz.json")?;
//! let authorizer = Authorizer::from_config(&config)?;
//!
//! let route = RouteRequirement::authenticated().with_policy("WritePhotos");
//! let decision = authorizer
//!     .authorize_route(Some("Bearer eyJ..."), &route)
//!     .await;
//!
//! if let Some(response) = decision.error_response::<()>() {
//!     println!("denied with {}", response.status());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! This crate does not enable TLS support in `reqwest` unless the
//! `default-tls` (on by default) or `rustls-tls` feature is selected.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authorizer;
pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jwa;
pub mod jwk;
pub mod jwt;
pub mod policy;
pub mod principal;
pub mod response;
pub mod scope;
pub mod validator;

#[cfg(test)]
mod test_util;

pub use authorizer::{bearer_token, AuthorizationDecision, Authorizer, Outcome, RouteRequirement};
pub use claims::{Audience, AudienceRef, Issuer, IssuerRef, ValidatedClaims};
pub use crate::config::{AuthConfig, ConfigError};
pub use discovery::{CacheOptions, DiscoveryCache, DiscoveryDocument, HttpFetcher, MetadataFetcher};
pub use error::{DiscoveryError, PolicyError, ReasonCode, ValidationError};
pub use jwa::Algorithm;
pub use jwk::{Jwks, KeyId, KeyIdRef, SigningKey};
pub use policy::{InsufficientScope, PolicyOutcome, PolicyRegistry, ScopePolicy};
pub use principal::ClaimsPrincipal;
pub use scope::{Scope, ScopeToken, ScopeTokenRef};
pub use validator::TokenValidator;

pub use cognito_authz_clock as clock;
