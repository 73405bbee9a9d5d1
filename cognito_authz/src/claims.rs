//! Claims carried by identity and access tokens

use ahash::AHashSet;
use aliri_braid::braid;
use cognito_authz_clock::UnixTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::ValidationError, scope::Scope};

/// An audience
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// An issuer of JWTs
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// The subject of a JWT
#[braid(serde, ref_doc = "A borrowed reference to a [`Subject`]")]
pub struct Subject;

/// A type representing one or more items, primarily for deserialization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single item
    One(T),

    /// Zero or more items, serialized as an array
    Many(Vec<T>),
}

/// A set of zero or more [`Audience`]s
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany<Audience>")]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// An empty audience set
    #[inline]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Indicates whether the audience set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates through references to the audiences in the set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// Whether `aud` is one of the audiences
    #[must_use]
    pub fn contains(&self, aud: &AudienceRef) -> bool {
        self.iter().any(|a| a == aud)
    }

    /// Reads an `aud` claim, treating `null` or any shape other than a string
    /// or an array as no audience at all
    ///
    /// Non-string array entries are skipped.
    fn from_claim(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => Self(vec![Audience::new(s.clone())]),
            Some(Value::Array(items)) => Self(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| Audience::new(s.to_owned()))
                    .collect(),
            ),
            _ => Self::empty(),
        }
    }
}

fn lenient_audiences<'de, D>(deserializer: D) -> Result<Audiences, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(Audiences::from_claim(value.as_ref()))
}

impl From<OneOrMany<Audience>> for Audiences {
    #[inline]
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

/// The group memberships of a principal
///
/// Roles are held lower-cased so that membership checks ignore case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Roles(AHashSet<String>);

impl Roles {
    /// Whether the principal holds `role`, compared case-insensitively
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(&role.to_lowercase())
    }

    /// Iterates through the (lower-cased) roles
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The number of roles
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no roles
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_claim(value: Option<&Value>) -> Option<Self> {
        let roles = match value {
            None | Some(Value::Null) => AHashSet::new(),
            Some(Value::String(s)) => std::iter::once(s.to_lowercase()).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_lowercase))
                .collect::<Option<_>>()?,
            Some(_) => return None,
        };

        Some(Self(roles))
    }
}

impl<S: AsRef<str>> FromIterator<S> for Roles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| s.as_ref().to_lowercase()).collect())
    }
}

/// The kind of token, from the `token_use` claim
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    /// An OIDC identity token; names its client in `aud`
    Id,
    /// An OAuth2 access token; names its client in `client_id`
    Access,
}

/// The claims the engine inspects, parsed from an untrusted payload
#[derive(Debug, Deserialize)]
struct KnownClaims {
    #[serde(default)]
    iss: Option<Issuer>,
    #[serde(default, deserialize_with = "lenient_audiences")]
    aud: Audiences,
    #[serde(default)]
    client_id: Option<Audience>,
    #[serde(default)]
    sub: Option<Subject>,
    #[serde(default)]
    exp: Option<UnixTime>,
    #[serde(default)]
    nbf: Option<UnixTime>,
    #[serde(default)]
    iat: Option<UnixTime>,
    #[serde(default)]
    token_use: Option<TokenUse>,
    #[serde(default, rename = "cognito:username")]
    cognito_username: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    scope: Scope,
}

/// Typed claims that have not yet been checked against expectations
#[derive(Debug)]
pub(crate) struct ClaimSet {
    known: KnownClaims,
    roles: Roles,
    raw: Map<String, Value>,
}

impl ClaimSet {
    /// Parses the claims of a decoded token
    ///
    /// Fails if a recognized claim has the wrong shape.
    pub(crate) fn parse(
        payload: Map<String, Value>,
        role_claim: &str,
    ) -> Result<Self, ValidationError> {
        let roles = Roles::from_claim(payload.get(role_claim))
            .ok_or(ValidationError::MalformedToken("roles claim is not a string list"))?;

        let payload = Value::Object(payload);
        let known = KnownClaims::deserialize(&payload)
            .map_err(|_| ValidationError::MalformedToken("claims have unexpected types"))?;

        let Value::Object(raw) = payload else {
            return Err(ValidationError::MalformedToken("payload is not an object"));
        };

        Ok(Self { known, roles, raw })
    }

    pub(crate) fn iss(&self) -> Option<&IssuerRef> {
        self.known.iss.as_deref()
    }

    pub(crate) fn aud(&self) -> &Audiences {
        &self.known.aud
    }

    pub(crate) fn client_id(&self) -> Option<&AudienceRef> {
        self.known.client_id.as_deref()
    }

    pub(crate) fn exp(&self) -> Option<UnixTime> {
        self.known.exp
    }

    pub(crate) fn nbf(&self) -> Option<UnixTime> {
        self.known.nbf
    }

    /// Completes the claims once every check has passed
    pub(crate) fn into_validated(self) -> Result<ValidatedClaims, ValidationError> {
        let k = self.known;

        let Some(issuer) = k.iss else {
            return Err(ValidationError::IssuerMismatch);
        };
        let Some(expires_at) = k.exp else {
            return Err(ValidationError::Expired);
        };
        let Some(subject) = k.sub else {
            return Err(ValidationError::MalformedToken("missing subject claim"));
        };

        Ok(ValidatedClaims {
            subject,
            issuer,
            audiences: k.aud,
            client_id: k.client_id,
            expires_at,
            not_before: k.nbf,
            issued_at: k.iat,
            token_use: k.token_use,
            username: k.cognito_username.or(k.username),
            roles: self.roles,
            scope: k.scope,
            raw: self.raw,
        })
    }
}

/// Claims from a token whose signature, issuer, audience and lifetime have
/// all been verified
///
/// Only produced by the [`TokenValidator`](crate::TokenValidator).
#[derive(Clone, Debug)]
pub struct ValidatedClaims {
    subject: Subject,
    issuer: Issuer,
    audiences: Audiences,
    client_id: Option<Audience>,
    expires_at: UnixTime,
    not_before: Option<UnixTime>,
    issued_at: Option<UnixTime>,
    token_use: Option<TokenUse>,
    username: Option<String>,
    roles: Roles,
    scope: Scope,
    raw: Map<String, Value>,
}

impl ValidatedClaims {
    /// The `sub` claim
    #[must_use]
    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    /// The `iss` claim
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The `aud` claim
    pub fn audiences(&self) -> &Audiences {
        &self.audiences
    }

    /// The `client_id` claim
    #[must_use]
    pub fn client_id(&self) -> Option<&AudienceRef> {
        self.client_id.as_deref()
    }

    /// The `exp` claim
    #[must_use]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// The `nbf` claim
    #[must_use]
    pub fn not_before(&self) -> Option<UnixTime> {
        self.not_before
    }

    /// The `iat` claim
    #[must_use]
    pub fn issued_at(&self) -> Option<UnixTime> {
        self.issued_at
    }

    /// The `token_use` claim
    #[must_use]
    pub fn token_use(&self) -> Option<TokenUse> {
        self.token_use
    }

    /// The user name, from `cognito:username` or `username`
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Roles from the configured groups claim
    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    /// Granted scopes
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Every claim in the payload, including those not modeled above
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}
