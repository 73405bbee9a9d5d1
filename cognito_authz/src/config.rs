//! Application settings
//!
//! Settings are read from a JSON, TOML or YAML file, with environment
//! variables layered on top. With the default prefix, `COGNITO_AUTHZ_AUDIENCE`
//! overrides `audience` and `COGNITO_AUTHZ_DISCOVERY__TTL_SECS` overrides
//! `discovery.ttl_secs`.

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    authorizer::RouteRequirement,
    claims::Issuer,
    discovery::CacheOptions,
    error::PolicyError,
    policy::PolicyRegistry,
    validator::DEFAULT_ROLE_CLAIM,
};

/// The environment prefix used by [`AuthConfig::from_file`]
pub const DEFAULT_ENV_PREFIX: &str = "COGNITO_AUTHZ";

/// Errors raised while loading or checking settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings could not be read or deserialized
    #[error("failed to load settings")]
    Load(#[from] config::ConfigError),
    /// Neither an issuer nor a Cognito user pool was configured
    #[error("no issuer or Cognito user pool configured")]
    MissingIssuer,
    /// The issuer is not an acceptable URL
    #[error("invalid issuer '{issuer}': {reason}")]
    InvalidIssuer {
        /// The configured issuer
        issuer: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The audience is empty
    #[error("audience must not be empty")]
    EmptyAudience,
    /// A policy or route requirement is invalid
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The HTTP client for discovery could not be built
    #[error("failed to build HTTP client")]
    HttpClient(#[from] reqwest::Error),
}

/// An Amazon Cognito user pool
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CognitoPool {
    /// The AWS region hosting the pool, such as `us-east-1`
    pub region: String,
    /// The pool identifier, such as `us-east-1_AbCdEfGhI`
    pub user_pool_id: String,
}

impl CognitoPool {
    /// The issuer URL of tokens minted by this pool
    #[must_use]
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }
}

/// A named scope policy
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PolicySettings {
    /// The policy name routes refer to
    pub name: String,
    /// Scopes that must all be granted
    pub scopes: Vec<String>,
}

/// The requirement of one protected route
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RouteSettings {
    /// The route, for diagnostics
    pub path: String,
    /// A role the caller must belong to
    #[serde(default)]
    pub role: Option<String>,
    /// A policy the caller must satisfy
    #[serde(default)]
    pub policy: Option<String>,
}

impl RouteSettings {
    /// The requirement this route imposes
    pub fn requirement(&self) -> RouteRequirement {
        RouteRequirement {
            role: self.role.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Discovery cache tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// How long a fetched document is served, in seconds
    pub ttl_secs: u64,
    /// The time allowed for a complete fetch, in seconds
    pub timeout_secs: u64,
    /// The minimum spacing between forced refreshes, and the backoff after a
    /// failed one, in seconds
    pub min_refresh_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        let defaults = CacheOptions::default();
        Self {
            ttl_secs: defaults.ttl().as_secs(),
            timeout_secs: defaults.fetch_timeout().as_secs(),
            min_refresh_secs: defaults.min_refresh_interval().as_secs(),
        }
    }
}

fn default_role_claim() -> String {
    DEFAULT_ROLE_CLAIM.to_owned()
}

/// Settings for an [`Authorizer`][crate::Authorizer]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    /// The expected token issuer
    ///
    /// Takes precedence over `cognito`.
    #[serde(default)]
    pub issuer: Option<String>,
    /// A Cognito user pool from which the issuer is derived
    #[serde(default)]
    pub cognito: Option<CognitoPool>,
    /// The expected audience, usually the app client ID
    pub audience: String,
    /// Named scope policies
    #[serde(default)]
    pub policies: Vec<PolicySettings>,
    /// Protected routes and their requirements
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
    /// The claim carrying the caller's roles
    #[serde(default = "default_role_claim")]
    pub role_claim: String,
    /// Clock skew tolerated on `exp` and `nbf`, in seconds
    #[serde(default)]
    pub leeway_secs: u64,
    /// Discovery cache tuning
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

impl AuthConfig {
    /// Loads settings from `path`, overridden by `COGNITO_AUTHZ_*` variables
    ///
    /// The file format is chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Loads settings from `path`, overridden by variables with `env_prefix`
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// The expected issuer
    pub fn issuer(&self) -> Result<Issuer, ConfigError> {
        match (&self.issuer, &self.cognito) {
            (Some(issuer), _) => Ok(Issuer::new(issuer.clone())),
            (None, Some(pool)) => Ok(Issuer::new(pool.issuer())),
            (None, None) => Err(ConfigError::MissingIssuer),
        }
    }

    /// The expected audience
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// The claim carrying the caller's roles
    #[must_use]
    pub fn role_claim(&self) -> &str {
        &self.role_claim
    }

    /// Clock skew tolerated on `exp` and `nbf`
    #[must_use]
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }

    /// Discovery cache options
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_ttl(Duration::from_secs(self.discovery.ttl_secs))
            .with_fetch_timeout(Duration::from_secs(self.discovery.timeout_secs))
            .with_min_refresh_interval(Duration::from_secs(self.discovery.min_refresh_secs))
    }

    /// Builds the policy registry
    pub fn policy_registry(&self) -> Result<PolicyRegistry, PolicyError> {
        let mut registry = PolicyRegistry::new();
        for policy in &self.policies {
            registry.register(policy.name.as_str(), &policy.scopes)?;
        }
        Ok(registry)
    }

    /// The requirements of every configured route
    pub fn route_requirements(&self) -> Vec<RouteRequirement> {
        self.routes.iter().map(RouteSettings::requirement).collect()
    }

    /// Checks the settings for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = self.issuer()?;
        validate_issuer_url(issuer.as_str())?;

        if self.audience.trim().is_empty() {
            return Err(ConfigError::EmptyAudience);
        }

        let registry = self.policy_registry()?;
        for route in &self.routes {
            if let Some(policy) = &route.policy {
                registry.ensure_registered(policy)?;
            }
        }

        Ok(())
    }
}

fn validate_issuer_url(issuer: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidIssuer {
        issuer: issuer.to_owned(),
        reason,
    };

    let url = url::Url::parse(issuer).map_err(|_| invalid("not a URL"))?;

    let is_localhost = matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    );
    if url.scheme() != "https" && !(url.scheme() == "http" && is_localhost) {
        return Err(invalid("must use HTTPS"));
    }
    if url.query().is_some() {
        return Err(invalid("must not have a query string"));
    }
    if url.fragment().is_some() {
        return Err(invalid("must not have a fragment"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("must not have userinfo"));
    }

    Ok(())
}
