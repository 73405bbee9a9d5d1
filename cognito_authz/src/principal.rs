//! The authenticated caller

use serde_json::Value;

use crate::{
    claims::{SubjectRef, ValidatedClaims},
    scope::Scope,
};

/// A caller whose token has been fully validated
///
/// A principal can only be built from [`ValidatedClaims`], so holding one is
/// proof that the signature, issuer, audience and lifetime checks passed.
#[derive(Clone, Debug)]
pub struct ClaimsPrincipal {
    claims: ValidatedClaims,
}

impl ClaimsPrincipal {
    /// Wraps validated claims
    #[must_use]
    pub fn new(claims: ValidatedClaims) -> Self {
        Self { claims }
    }

    /// Whether the caller belongs to `role`, ignoring case
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.claims.roles().contains(role)
    }

    /// Whether the caller was granted every one of `scopes`, ignoring case
    ///
    /// An empty list is trivially satisfied.
    #[must_use]
    pub fn has_all_scopes<I, S>(&self, scopes: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let granted = self.claims.scope();
        scopes.into_iter().all(|s| granted.contains(s.as_ref()))
    }

    /// Whether the caller's granted scope is a superset of `required`
    #[must_use]
    pub fn satisfies(&self, required: &Scope) -> bool {
        self.claims.scope().contains_all(required)
    }

    /// The `sub` claim
    #[must_use]
    pub fn subject(&self) -> &SubjectRef {
        self.claims.subject()
    }

    /// A display name: the user name if present, otherwise the subject
    #[must_use]
    pub fn name(&self) -> &str {
        self.claims
            .username()
            .unwrap_or_else(|| self.claims.subject().as_str())
    }

    /// The underlying claims
    #[must_use]
    pub fn claims(&self) -> &ValidatedClaims {
        &self.claims
    }

    /// Every claim as a `(name, value)` pair of strings
    ///
    /// Array claims yield one pair per element. String values are given
    /// without quotes; other values are given in their JSON form.
    pub fn claim_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.claims.raw().len());
        for (name, value) in self.claims.raw() {
            match value {
                Value::Array(items) => {
                    pairs.extend(items.iter().map(|v| (name.clone(), claim_text(v))));
                }
                v => pairs.push((name.clone(), claim_text(v))),
            }
        }
        pairs
    }
}

fn claim_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

impl From<ValidatedClaims> for ClaimsPrincipal {
    fn from(claims: ValidatedClaims) -> Self {
        Self::new(claims)
    }
}
