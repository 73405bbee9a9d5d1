//! Named scope policies

use ahash::AHashMap;
use thiserror::Error;

use crate::{
    error::PolicyError,
    principal::ClaimsPrincipal,
    scope::{Scope, ScopeToken},
};

/// Indicates the requester held insufficient scope to be granted access
/// to a controlled resource
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("insufficient scope; requires '{required}'")]
pub struct InsufficientScope {
    required: Scope,
}

impl InsufficientScope {
    /// The scope the policy requires
    #[must_use]
    pub fn required(&self) -> &Scope {
        &self.required
    }
}

/// The result of evaluating a policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Every required scope was granted
    Allow,
    /// At least one required scope was missing
    DenyForbidden,
}

/// A named, non-empty set of scopes that must all be granted
///
/// # Examples
///
/// ```
/// use cognito_authz::ScopePolicy;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = ScopePolicy::new(
///     "WritePhotos",
///     ["com.example.photos/basic", "com.example.photos/write"],
/// )?;
///
/// assert_eq!(policy.name(), "WritePhotos");
/// assert_eq!(
///     policy.required().to_string(),
///     "com.example.photos/basic com.example.photos/write",
/// );
///
/// assert!(ScopePolicy::new("Nothing", Vec::<String>::new()).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct ScopePolicy {
    name: String,
    required: Scope,
}

impl ScopePolicy {
    /// Constructs a policy, normalizing the scope tokens to lower case
    pub fn new<I, S>(name: impl Into<String>, scopes: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }

        let required = scopes
            .into_iter()
            .map(|s| ScopeToken::normalize(s.as_ref()))
            .collect::<Result<Scope, _>>()
            .map_err(|source| PolicyError::InvalidScope {
                policy: name.clone(),
                source,
            })?;

        if required.is_empty() {
            return Err(PolicyError::EmptyScope(name));
        }

        Ok(Self { name, required })
    }

    /// The policy name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scopes a caller must hold
    #[must_use]
    pub fn required(&self) -> &Scope {
        &self.required
    }

    /// Checks the caller's granted scope against the policy
    pub fn evaluate(&self, principal: &ClaimsPrincipal) -> Result<(), InsufficientScope> {
        if principal.satisfies(&self.required) {
            Ok(())
        } else {
            Err(InsufficientScope {
                required: self.required.clone(),
            })
        }
    }
}

/// The set of policies known to the application
///
/// Policies are registered at startup and not changed afterwards.
#[derive(Clone, Debug, Default)]
pub struct PolicyRegistry {
    policies: AHashMap<String, ScopePolicy>,
}

impl PolicyRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy under `name`
    ///
    /// Fails if the name is empty, the scope set is empty or invalid, or a
    /// policy with the same name already exists.
    pub fn register<I, S>(
        &mut self,
        name: impl Into<String>,
        scopes: I,
    ) -> Result<(), PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(ScopePolicy::new(name, scopes)?)
    }

    /// Adds an already constructed policy
    pub fn insert(&mut self, policy: ScopePolicy) -> Result<(), PolicyError> {
        if self.policies.contains_key(policy.name()) {
            return Err(PolicyError::Duplicate(policy.name));
        }

        tracing::debug!(
            policy = %policy.name,
            required = %policy.required,
            "registered scope policy",
        );
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Looks up a policy by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScopePolicy> {
        self.policies.get(name)
    }

    /// Looks up a policy that must exist
    pub fn ensure_registered(&self, name: &str) -> Result<&ScopePolicy, PolicyError> {
        self.get(name)
            .ok_or_else(|| PolicyError::UnknownPolicy(name.to_owned()))
    }

    /// Evaluates the named policy for `principal`
    pub fn evaluate(
        &self,
        principal: &ClaimsPrincipal,
        name: &str,
    ) -> Result<PolicyOutcome, PolicyError> {
        let policy = self.ensure_registered(name)?;
        Ok(match policy.evaluate(principal) {
            Ok(()) => PolicyOutcome::Allow,
            Err(_) => PolicyOutcome::DenyForbidden,
        })
    }

    /// The names of all registered policies
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// The number of registered policies
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no policies are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;
    use crate::principal::tests::principal;

    fn photo_policies() -> Result<PolicyRegistry> {
        let mut registry = PolicyRegistry::new();
        registry.register(
            "ReadPhotos",
            ["com.example.photos/basic", "com.example.photos/read"],
        )?;
        registry.register(
            "WritePhotos",
            ["com.example.photos/basic", "com.example.photos/write"],
        )?;
        Ok(registry)
    }

    fn with_scope(scope: &str) -> ClaimsPrincipal {
        principal(json!({ "sub": "s", "iss": "i", "exp": 1, "scope": scope }))
    }

    #[test]
    fn and_semantics() -> Result<()> {
        let registry = photo_policies()?;

        let basic = with_scope("com.example.photos/basic");
        let all = with_scope(
            "com.example.photos/basic com.example.photos/read com.example.photos/write",
        );

        assert_eq!(
            registry.evaluate(&basic, "ReadPhotos")?,
            PolicyOutcome::DenyForbidden
        );
        assert_eq!(registry.evaluate(&all, "ReadPhotos")?, PolicyOutcome::Allow);
        assert_eq!(registry.evaluate(&all, "WritePhotos")?, PolicyOutcome::Allow);
        Ok(())
    }

    #[test]
    fn scope_case_is_ignored() -> Result<()> {
        let mut registry = PolicyRegistry::new();
        registry.register("BasicRead", ["basic", "READ"])?;

        let p = with_scope("Basic Read");
        assert_eq!(registry.evaluate(&p, "BasicRead")?, PolicyOutcome::Allow);
        Ok(())
    }

    #[test]
    fn insufficient_scope_names_requirement() -> Result<()> {
        let registry = photo_policies()?;
        let policy = registry.ensure_registered("WritePhotos")?;

        let err = policy
            .evaluate(&with_scope("com.example.photos/basic"))
            .expect_err("write scope is missing");
        assert_eq!(err.required(), policy.required());
        Ok(())
    }

    #[test]
    fn rejects_bad_registrations() -> Result<()> {
        let mut registry = photo_policies()?;

        assert!(matches!(
            registry.register("", ["basic"]),
            Err(PolicyError::EmptyName)
        ));
        assert!(matches!(
            registry.register("None", Vec::<&str>::new()),
            Err(PolicyError::EmptyScope(_))
        ));
        assert!(matches!(
            registry.register("Quoted", ["\"basic\""]),
            Err(PolicyError::InvalidScope { .. })
        ));
        assert!(matches!(
            registry.register("ReadPhotos", ["other"]),
            Err(PolicyError::Duplicate(_))
        ));
        assert_eq!(registry.len(), 2);
        Ok(())
    }

    #[test]
    fn unknown_policy_is_an_error() -> Result<()> {
        let registry = photo_policies()?;
        assert!(matches!(
            registry.evaluate(&with_scope("basic"), "DeletePhotos"),
            Err(PolicyError::UnknownPolicy(name)) if name == "DeletePhotos"
        ));
        Ok(())
    }
}
