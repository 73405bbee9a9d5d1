//! OAuth2 scopes
//!
//! Scope tokens are compared case-insensitively. Rather than folding case at
//! every comparison, tokens are lower-cased once when they enter a [`Scope`],
//! so that set containment can be a plain hash-set superset check.

use std::{collections::hash_set, fmt, str::FromStr};

use ahash::AHashSet;
use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An invalid scope token
#[derive(Debug, Error)]
pub enum InvalidScopeToken {
    /// The scope token was the empty string
    #[error("scope token cannot be empty")]
    EmptyString,
    /// The scope token contained an invalid byte
    #[error("invalid scope token byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the scope token where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
    /// The scope token was not in its lower-case form
    #[error("scope token must be lower-case; uppercase byte at position {position}")]
    NotLowercase {
        /// The index of the first uppercase byte
        position: usize,
    },
}

/// A normalized OAuth2 scope token
///
/// A scope token, as defined in [RFC 6749, Section 3.3][RFC6749 3.3], must
/// be composed of printable ASCII characters excluding ` ` (space), `"`
/// (double quote), and `\` (backslash). In addition, this type only holds the
/// lower-case form of a token. Use [`ScopeToken::normalize`] to accept input
/// in any case.
///
///   [RFC6749 3.3]: (https://datatracker.ietf.org/doc/html/rfc6749#section-3.3)
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed reference to a normalized [`ScopeToken`]"
)]
pub struct ScopeToken;

impl aliri_braid::Validator for ScopeToken {
    type Error = InvalidScopeToken;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            return Err(InvalidScopeToken::EmptyString);
        }

        for (position, &value) in s.as_bytes().iter().enumerate() {
            if value <= 0x20 || value == 0x22 || value == 0x5C || 0x7F <= value {
                return Err(InvalidScopeToken::InvalidByte { position, value });
            }
            if value.is_ascii_uppercase() {
                return Err(InvalidScopeToken::NotLowercase { position });
            }
        }

        Ok(())
    }
}

aliri_braid::from_infallible!(InvalidScopeToken);

impl ScopeToken {
    /// Lower-cases and validates a scope token
    pub fn normalize(s: &str) -> Result<Self, InvalidScopeToken> {
        Self::new(s.to_ascii_lowercase())
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum ScopeDto {
    String(String),
    Array(Vec<String>),
}

impl TryFrom<Option<ScopeDto>> for Scope {
    type Error = InvalidScopeToken;

    fn try_from(dto: Option<ScopeDto>) -> Result<Self, Self::Error> {
        match dto {
            Some(ScopeDto::String(s)) => Self::try_from(s.as_str()),
            Some(ScopeDto::Array(arr)) => arr.iter().map(|s| ScopeToken::normalize(s)).collect(),
            None => Ok(Self::empty()),
        }
    }
}

impl From<Scope> for ScopeDto {
    fn from(s: Scope) -> Self {
        ScopeDto::String(s.to_string())
    }
}

/// A set of OAuth2 scope tokens
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Option<ScopeDto>", into = "ScopeDto")]
pub struct Scope(AHashSet<ScopeToken>);

impl Scope {
    /// Produces an empty scope
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(AHashSet::new())
    }

    /// Adds a scope token to the scope
    #[inline]
    pub fn insert(&mut self, scope_token: ScopeToken) {
        self.0.insert(scope_token);
    }

    /// Produces an iterator of the scope tokens in this set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ScopeTokenRef> {
        self.into_iter()
    }

    /// Whether the scope holds the given token, compared case-insensitively
    #[must_use]
    pub fn contains(&self, scope_token: &str) -> bool {
        ScopeToken::normalize(scope_token).map_or(false, |t| self.0.contains(&t))
    }

    /// Checks to see whether this scope contains all of
    /// the scope tokens in `subset`.
    #[inline]
    #[must_use]
    pub fn contains_all(&self, subset: &Scope) -> bool {
        self.0.is_superset(&subset.0)
    }

    /// The number of scope tokens
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the scope has no tokens
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Scope {
    /// Writes the tokens space-delimited, in sorted order
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        tokens.sort_unstable();

        let mut first = true;
        for t in tokens {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(t)?;
            first = false;
        }
        Ok(())
    }
}

impl IntoIterator for Scope {
    type Item = ScopeToken;
    type IntoIter = <AHashSet<ScopeToken> as IntoIterator>::IntoIter;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An iterator over a set of borrowed scope tokens
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: hash_set::Iter<'a, ScopeToken>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ScopeTokenRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|x| x.as_ref())
    }
}

impl<'a> IntoIterator for &'a Scope {
    type Item = &'a ScopeTokenRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Iter {
            iter: self.0.iter(),
        }
    }
}

impl Extend<ScopeToken> for Scope {
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = ScopeToken>,
    {
        self.0.extend(iter)
    }
}

impl FromIterator<ScopeToken> for Scope {
    #[inline]
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = ScopeToken>,
    {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<&'_ str> for Scope {
    type Error = InvalidScopeToken;

    /// Parses a space-delimited scope string, in any case
    #[inline]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.split_whitespace().map(ScopeToken::normalize).collect()
    }
}

impl FromStr for Scope {
    type Err = InvalidScopeToken;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}
