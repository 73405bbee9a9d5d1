//! Authorization decisions for inbound requests

use std::sync::Arc;

use http::{Response, StatusCode};

use crate::{
    claims::{Audience, AudienceRef},
    config::{AuthConfig, ConfigError},
    discovery::DiscoveryCache,
    error::{PolicyError, ReasonCode},
    policy::PolicyRegistry,
    principal::ClaimsPrincipal,
    response,
    scope::Scope,
    validator::TokenValidator,
};

const BEARER: &str = "bearer";

/// Extracts the token from an `Authorization` header value
///
/// Surrounding whitespace is ignored, as is a leading `Bearer` scheme in any
/// case. The scheme is only recognized as a whole word, so a value such as
/// `Bearerabc` is kept intact. Returns `None` when nothing remains.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let value = header.trim();

    let token = match value.get(..BEARER.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER) => {
            let rest = &value[BEARER.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim_start()
            } else {
                value
            }
        }
        _ => value,
    };

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// The kind of decision reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The request may proceed
    Allow,
    /// The caller could not be identified
    DenyUnauthenticated,
    /// The caller was identified but lacks permission
    DenyForbidden,
}

/// The result of authorizing a request
#[derive(Clone, Debug)]
#[must_use]
pub enum AuthorizationDecision {
    /// The request may proceed on behalf of the principal
    Allow(ClaimsPrincipal),

    /// No valid token was presented
    DenyUnauthenticated {
        /// Why the token was not accepted
        reason: ReasonCode,
    },

    /// A valid token was presented but does not grant access
    DenyForbidden {
        /// Why access was refused
        reason: ReasonCode,
        /// The identified caller
        principal: ClaimsPrincipal,
        /// The scope the route's policy requires, when a policy refused access
        required_scope: Option<Scope>,
    },
}

impl AuthorizationDecision {
    /// The outcome tag
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Allow(_) => Outcome::Allow,
            Self::DenyUnauthenticated { .. } => Outcome::DenyUnauthenticated,
            Self::DenyForbidden { .. } => Outcome::DenyForbidden,
        }
    }

    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// The reason for a denial
    #[must_use]
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Self::Allow(_) => None,
            Self::DenyUnauthenticated { reason } | Self::DenyForbidden { reason, .. } => {
                Some(*reason)
            }
        }
    }

    /// The identified caller, present unless the request was unauthenticated
    #[must_use]
    pub fn principal(&self) -> Option<&ClaimsPrincipal> {
        match self {
            Self::Allow(principal) | Self::DenyForbidden { principal, .. } => Some(principal),
            Self::DenyUnauthenticated { .. } => None,
        }
    }

    /// The HTTP status the surrounding layer should respond with
    ///
    /// `200 OK` means the request should be handed on to its handler.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Allow(_) => StatusCode::OK,
            Self::DenyUnauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::DenyForbidden { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// A ready-made challenge response for a denial
    ///
    /// Reason codes are deliberately not disclosed to the client.
    pub fn error_response<Body: Default>(&self) -> Option<Response<Body>> {
        match self {
            Self::Allow(_) => None,
            Self::DenyUnauthenticated { .. } => Some(response::unauthorized("")),
            Self::DenyForbidden { required_scope, .. } => {
                Some(response::forbidden("", required_scope.as_ref()))
            }
        }
    }
}

/// What a protected route requires of its callers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct RouteRequirement {
    /// A role the caller must belong to
    pub role: Option<String>,
    /// A named scope policy the caller must satisfy
    pub policy: Option<String>,
}

impl RouteRequirement {
    /// Requires only a valid token
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Also requires membership in `role`
    pub fn with_role(self, role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..self
        }
    }

    /// Also requires the named policy to allow access
    pub fn with_policy(self, policy: impl Into<String>) -> Self {
        Self {
            policy: Some(policy.into()),
            ..self
        }
    }
}

/// Authenticates bearer tokens and authorizes them against route requirements
#[derive(Clone, Debug)]
pub struct Authorizer {
    validator: TokenValidator,
    policies: Arc<PolicyRegistry>,
    audience: Audience,
}

impl Authorizer {
    /// Constructs an authorizer
    ///
    /// The expected issuer is the one the validator's discovery cache serves.
    #[must_use]
    pub fn new(validator: TokenValidator, policies: PolicyRegistry, audience: Audience) -> Self {
        Self {
            validator,
            policies: Arc::new(policies),
            audience,
        }
    }

    /// Builds an authorizer from validated configuration
    ///
    /// Every configured route requirement is checked, so that a route naming
    /// an unregistered policy aborts startup.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = DiscoveryCache::over_http(config.issuer()?, config.cache_options())?;
        let validator = TokenValidator::new(cache)
            .with_leeway(config.leeway())
            .with_role_claim(config.role_claim());

        let authorizer = Self::new(
            validator,
            config.policy_registry()?,
            Audience::new(config.audience().to_owned()),
        );
        authorizer.check_requirements(&config.route_requirements())?;

        Ok(authorizer)
    }

    /// Verifies that every policy named by `requirements` is registered
    pub fn check_requirements<'a, I>(&self, requirements: I) -> Result<(), PolicyError>
    where
        I: IntoIterator<Item = &'a RouteRequirement>,
    {
        for requirement in requirements {
            if let Some(policy) = &requirement.policy {
                self.policies.ensure_registered(policy)?;
            }
        }
        Ok(())
    }

    /// The token validator
    #[must_use]
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// The registered policies
    #[must_use]
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// The expected audience
    #[must_use]
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    /// Authorizes a request against a route requirement
    pub async fn authorize_route(
        &self,
        authorization: Option<&str>,
        requirement: &RouteRequirement,
    ) -> AuthorizationDecision {
        self.authorize(
            authorization,
            requirement.role.as_deref(),
            requirement.policy.as_deref(),
        )
        .await
    }

    /// Authorizes a request given its `Authorization` header value
    #[tracing::instrument(skip(self, authorization))]
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        required_role: Option<&str>,
        required_policy: Option<&str>,
    ) -> AuthorizationDecision {
        let Some(token) = authorization.and_then(bearer_token) else {
            tracing::debug!(reason = %ReasonCode::MissingToken, "request denied");
            return AuthorizationDecision::DenyUnauthenticated {
                reason: ReasonCode::MissingToken,
            };
        };

        let issuer = self.validator.cache().issuer();
        let claims = match self.validator.validate(token, issuer, &self.audience).await {
            Ok(claims) => claims,
            Err(err) => {
                let reason = err.reason();
                tracing::debug!(%reason, error = %err, "request denied");
                return AuthorizationDecision::DenyUnauthenticated { reason };
            }
        };

        let principal = ClaimsPrincipal::new(claims);

        if let Some(role) = required_role {
            if !principal.has_role(role) {
                tracing::debug!(
                    reason = %ReasonCode::InsufficientRole,
                    sub = %principal.subject(),
                    "request denied",
                );
                return AuthorizationDecision::DenyForbidden {
                    reason: ReasonCode::InsufficientRole,
                    principal,
                    required_scope: None,
                };
            }
        }

        if let Some(name) = required_policy {
            let policy = match self.policies.ensure_registered(name) {
                Ok(policy) => policy,
                Err(err) => {
                    tracing::error!(error = %err, "route references an unregistered policy");
                    return AuthorizationDecision::DenyForbidden {
                        reason: err.reason(),
                        principal,
                        required_scope: None,
                    };
                }
            };

            if let Err(err) = policy.evaluate(&principal) {
                tracing::debug!(
                    reason = %ReasonCode::InsufficientScope,
                    sub = %principal.subject(),
                    error = %err,
                    "request denied",
                );
                return AuthorizationDecision::DenyForbidden {
                    reason: ReasonCode::InsufficientScope,
                    principal,
                    required_scope: Some(policy.required().clone()),
                };
            }
        }

        AuthorizationDecision::Allow(principal)
    }
}

#[cfg(test)]
mod tests {
    use cognito_authz_clock::TestClock;
    use color_eyre::Result;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        claims::Issuer,
        discovery::{CacheOptions, MetadataFetcher},
        test_util::{id_token_claims, FakeFetcher, TestKey, AUDIENCE, ISSUER, NOW},
    };

    const BASIC: &str = "com.example.photos/basic";
    const READ: &str = "com.example.photos/read";
    const WRITE: &str = "com.example.photos/write";

    fn authorizer(key: &TestKey) -> Result<Authorizer> {
        let fetcher: Arc<dyn MetadataFetcher> =
            Arc::new(FakeFetcher::new(ISSUER, vec![key.jwk()]));
        let cache = DiscoveryCache::new(
            Issuer::from_static(ISSUER),
            fetcher,
            Arc::new(TestClock::new(NOW)),
            CacheOptions::default(),
        );

        let mut policies = PolicyRegistry::new();
        policies.register("ReadPhotos", [BASIC, READ])?;
        policies.register("WritePhotos", [BASIC, WRITE])?;

        Ok(Authorizer::new(
            TokenValidator::new(cache),
            policies,
            Audience::from_static(AUDIENCE),
        ))
    }

    fn access_token(key: &TestKey, scope: &str) -> String {
        let mut claims = id_token_claims();
        if let Some(map) = claims.as_object_mut() {
            map.remove("aud");
            map.insert("client_id".into(), json!(AUDIENCE));
            map.insert("token_use".into(), json!("access"));
            map.insert("scope".into(), json!(scope));
        }
        format!("Bearer {}", key.token(&claims))
    }

    #[test]
    fn strips_bearer_scheme() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("  bEaReR \t abc.def.ghi  "), Some("abc.def.ghi"));
        assert_eq!(bearer_token("abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearerabc.def.ghi"), Some("Bearerabc.def.ghi"));
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer    "), None);
        assert_eq!(bearer_token("   "), None);
        assert_eq!(bearer_token("Béarer x"), Some("Béarer x"));
    }

    #[tokio::test]
    async fn admin_role_is_allowed() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;
        let header = format!("Bearer {}", key.token(&id_token_claims()));

        let decision = authz.authorize(Some(&header), Some("Admin"), None).await;
        assert_eq!(decision.outcome(), Outcome::Allow);
        assert_eq!(decision.status_code(), StatusCode::OK);
        assert_eq!(decision.principal().map(ClaimsPrincipal::name), Some("alice"));
        assert!(decision.error_response::<()>().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_role_is_forbidden() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;
        let header = format!("Bearer {}", key.token(&id_token_claims()));

        let decision = authz.authorize(Some(&header), Some("Auditors"), None).await;
        assert_eq!(decision.outcome(), Outcome::DenyForbidden);
        assert_eq!(decision.reason(), Some(ReasonCode::InsufficientRole));
        assert!(decision.principal().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn write_without_write_scope_is_forbidden() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;
        let header = access_token(&key, &format!("{BASIC} {READ}"));

        let decision = authz.authorize(Some(&header), None, Some("WritePhotos")).await;
        assert_eq!(decision.outcome(), Outcome::DenyForbidden);
        assert_eq!(decision.reason(), Some(ReasonCode::InsufficientScope));
        assert_eq!(decision.status_code(), StatusCode::FORBIDDEN);

        let resp = decision
            .error_response::<()>()
            .expect("forbidden has a response");
        assert_eq!(
            resp.headers().get(http::header::WWW_AUTHENTICATE),
            Some(&http::HeaderValue::from_static(
                r#"Bearer error="insufficient_scope" scope="com.example.photos/basic com.example.photos/write""#
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn mixed_case_scopes_satisfy_policy() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;
        let header = access_token(&key, "COM.EXAMPLE.PHOTOS/Basic com.example.photos/READ");

        let decision = authz
            .authorize_route(
                Some(&header),
                &RouteRequirement::authenticated().with_policy("ReadPhotos"),
            )
            .await;
        assert!(decision.is_allowed());
        Ok(())
    }

    #[tokio::test]
    async fn missing_header_is_unauthenticated() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;

        for header in [None, Some(""), Some("Bearer "), Some("   ")] {
            let decision = authz.authorize(header, Some("Admin"), Some("ReadPhotos")).await;
            assert_eq!(decision.outcome(), Outcome::DenyUnauthenticated);
            assert_eq!(decision.reason(), Some(ReasonCode::MissingToken));
            assert_eq!(decision.status_code(), StatusCode::UNAUTHORIZED);
            assert!(decision.principal().is_none());
        }
        Ok(())
    }

    #[tokio::test]
    async fn invalid_token_keeps_specific_reason() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;

        let decision = authz.authorize(Some("Bearer a.b"), None, None).await;
        assert_eq!(decision.reason(), Some(ReasonCode::MalformedToken));

        let expired = {
            let mut claims = id_token_claims();
            claims["exp"] = json!(NOW.0);
            format!("Bearer {}", key.token(&claims))
        };
        let decision = authz.authorize(Some(&expired), None, None).await;
        assert_eq!(decision.outcome(), Outcome::DenyUnauthenticated);
        assert_eq!(decision.reason(), Some(ReasonCode::Expired));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unregistered_policy_fails_closed() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;
        let header = access_token(&key, &format!("{BASIC} {READ} {WRITE}"));

        let decision = authz.authorize(Some(&header), None, Some("DeletePhotos")).await;
        assert_eq!(decision.outcome(), Outcome::DenyForbidden);
        assert_eq!(decision.reason(), Some(ReasonCode::UnknownPolicy));
        assert!(logs_contain("route references an unregistered policy"));
        Ok(())
    }

    #[test]
    fn startup_check_rejects_unknown_policy() -> Result<()> {
        let key = TestKey::p256("k1");
        let authz = authorizer(&key)?;

        let routes = [
            RouteRequirement::authenticated().with_role("Admin"),
            RouteRequirement::authenticated().with_policy("ReadPhotos"),
        ];
        authz.check_requirements(&routes)?;

        let bad = [RouteRequirement::authenticated().with_policy("DeletePhotos")];
        assert!(matches!(
            authz.check_requirements(&bad),
            Err(PolicyError::UnknownPolicy(_))
        ));
        Ok(())
    }
}
