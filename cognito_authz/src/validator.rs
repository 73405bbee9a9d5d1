//! Bearer token validation

use std::{sync::Arc, time::Duration};

use cognito_authz_clock::Clock;

use crate::{
    claims::{AudienceRef, ClaimSet, IssuerRef, ValidatedClaims},
    discovery::{DiscoveryCache, DiscoveryDocument},
    error::{JwkVerifyError, ValidationError},
    jwa::Algorithm,
    jwk::KeyIdRef,
    jwt,
};

/// The groups claim used by Amazon Cognito
pub const DEFAULT_ROLE_CLAIM: &str = "cognito:groups";

/// Verifies bearer tokens against the identity provider's published keys
///
/// Validation proceeds through a fixed sequence of checks and stops at the
/// first failure:
///
/// 1. the token must decode as a compact JWT;
/// 2. its `kid` must name a published key, after at most one forced refresh
///    of the key set;
/// 3. the signature must verify under that key with the declared algorithm;
/// 4. `iss` must equal the expected issuer;
/// 5. `aud` or `client_id` must equal the expected audience;
/// 6. the current time must fall within `nbf` and `exp`.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    cache: DiscoveryCache,
    clock: Arc<dyn Clock>,
    leeway: Duration,
    role_claim: String,
}

impl TokenValidator {
    /// Constructs a validator using the cache's clock and no leeway
    #[must_use]
    pub fn new(cache: DiscoveryCache) -> Self {
        let clock = cache.clock();
        Self {
            cache,
            clock,
            leeway: Duration::ZERO,
            role_claim: DEFAULT_ROLE_CLAIM.to_owned(),
        }
    }

    /// Uses a different clock for lifetime checks
    #[must_use]
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    /// Allows a grace period on either side of `nbf` and `exp`
    #[must_use]
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// Reads roles from a claim other than `cognito:groups`
    #[must_use]
    pub fn with_role_claim(self, role_claim: impl Into<String>) -> Self {
        Self {
            role_claim: role_claim.into(),
            ..self
        }
    }

    /// The discovery cache backing this validator
    #[must_use]
    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Validates a compact JWT
    pub async fn validate(
        &self,
        raw: &str,
        expected_issuer: &IssuerRef,
        expected_audience: &AudienceRef,
    ) -> Result<ValidatedClaims, ValidationError> {
        let token = jwt::decode(raw)?;

        let Some(kid) = token.kid() else {
            tracing::debug!("token has no key ID");
            return Err(ValidationError::UnknownSigningKey { kid: None });
        };

        let doc = self.resolve_snapshot(kid).await?;
        let Some(key) = doc.key(kid) else {
            return Err(ValidationError::UnknownSigningKey {
                kid: Some(kid.to_owned()),
            });
        };

        let alg = match token.alg().map(str::parse::<Algorithm>) {
            Some(Ok(alg)) => alg,
            _ => {
                tracing::debug!(%kid, alg = ?token.alg(), "refusing token algorithm");
                return Err(ValidationError::SignatureInvalid(
                    JwkVerifyError::UnsupportedAlgorithm,
                ));
            }
        };

        if let Err(err) = key.verify(alg, token.signing_input(), token.signature()) {
            tracing::debug!(%kid, %alg, error = %err, "signature rejected");
            return Err(err.into());
        }

        let claims = ClaimSet::parse(token.into_payload(), &self.role_claim)?;

        if claims.iss() != Some(expected_issuer) {
            tracing::debug!(iss = ?claims.iss(), "issuer mismatch");
            return Err(ValidationError::IssuerMismatch);
        }

        let audience_matches = claims.aud().contains(expected_audience)
            || claims.client_id() == Some(expected_audience);
        if !audience_matches {
            tracing::debug!("audience mismatch");
            return Err(ValidationError::AudienceMismatch);
        }

        self.check_lifetime(&claims)?;

        claims.into_validated()
    }

    /// Finds a snapshot containing `kid`, refreshing at most once
    async fn resolve_snapshot(
        &self,
        kid: &KeyIdRef,
    ) -> Result<Arc<DiscoveryDocument>, ValidationError> {
        let doc = self.cache.get().await?;
        if doc.key(kid).is_some() {
            return Ok(doc);
        }

        tracing::debug!(%kid, "key not in cached set; forcing refresh");
        match self.cache.force_refresh().await {
            Ok(refreshed) => Ok(refreshed),
            Err(err) => {
                tracing::debug!(%kid, error = %err, "refresh for unknown key failed");
                Ok(doc)
            }
        }
    }

    fn check_lifetime(&self, claims: &ClaimSet) -> Result<(), ValidationError> {
        let now = self.clock.now();

        let Some(exp) = claims.exp() else {
            return Err(ValidationError::Expired);
        };
        if now >= exp.saturating_add(self.leeway) {
            tracing::debug!(%now, %exp, "token expired");
            return Err(ValidationError::Expired);
        }

        if let Some(nbf) = claims.nbf() {
            if now < nbf.saturating_sub(self.leeway) {
                tracing::debug!(%now, %nbf, "token not yet valid");
                return Err(ValidationError::NotYetValid);
            }
        }

        Ok(())
    }
}
