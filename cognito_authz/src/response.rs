//! HTTP responses for denied requests
//!
//! Challenges follow [RFC 6750, Section 3][RFC6750 3].
//!
//!   [RFC6750 3]: https://datatracker.ietf.org/doc/html/rfc6750#section-3

use http::{header, HeaderValue, Response, StatusCode};

use crate::scope::Scope;

const INVALID_TOKEN: &str = r#"Bearer error="invalid_token""#;
const INSUFFICIENT_SCOPE: &str = r#"Bearer error="insufficient_scope""#;

/// Build a `401 Unauthorized` response with the appropriate `www-authenticate`
/// header
///
/// The description provided will be automatically escaped to make sure it
/// is header-friendly.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn unauthorized<Body: Default>(description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        challenge(INVALID_TOKEN, description, None),
    );
    resp
}

/// Build a `403 Forbidden` response with the appropriate `www-authenticate`
/// header
///
/// When the scope required by the route is known, it is advertised:
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// www-authenticate: Bearer error="insufficient_scope" scope="{required}"
/// ```
///
/// `error_description` is added if `description` is non-empty.
pub fn forbidden<Body: Default>(description: &str, required: Option<&Scope>) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::FORBIDDEN;
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        challenge(
            INSUFFICIENT_SCOPE,
            description,
            required.filter(|s| !s.is_empty()),
        ),
    );
    resp
}

// Scope tokens are printable ASCII without `\` or `"`, so a scope never needs
// escaping.
fn challenge(prefix: &'static str, description: &str, scope: Option<&Scope>) -> HeaderValue {
    if description.is_empty() && scope.is_none() {
        return HeaderValue::from_static(prefix);
    }

    let mut value = String::from(prefix);
    if !description.is_empty() {
        value.push_str(&format!(
            r#" error_description="{}""#,
            description.escape_default()
        ));
    }
    if let Some(scope) = scope {
        value.push_str(&format!(r#" scope="{scope}""#));
    }

    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(prefix))
}
