#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cognito_authz::{
    clock::{TestClock, UnixTime},
    Audience, Authorizer, CacheOptions, DiscoveryCache, HttpFetcher, Issuer, PolicyRegistry,
    TokenValidator,
};
use once_cell::sync::Lazy;
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate, Times,
};

pub const AUDIENCE: &str = "photo-app-client";
pub const NOW: UnixTime = UnixTime(1_700_000_000);

pub const BASIC: &str = "com.example.photos/basic";
pub const READ: &str = "com.example.photos/read";
pub const WRITE: &str = "com.example.photos/write";

pub static PRIMARY: Lazy<RsaKey> = Lazy::new(|| RsaKey::generate("primary"));
pub static ROTATED: Lazy<RsaKey> = Lazy::new(|| RsaKey::generate("rotated"));

/// An RSA-2048 key pair signing RS256 tokens
pub struct RsaKey {
    kid: String,
    rsa: Rsa<Private>,
    pkey: PKey<Private>,
}

impl RsaKey {
    fn generate(kid: &str) -> Self {
        let rsa = Rsa::generate(2048).expect("RSA key generation");
        let pkey = PKey::from_rsa(rsa.clone()).expect("valid RSA key");
        Self {
            kid: kid.to_owned(),
            rsa,
            pkey,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public key as published in a JWKS
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(self.rsa.n().to_vec()),
            "e": URL_SAFE_NO_PAD.encode(self.rsa.e().to_vec()),
        })
    }

    pub fn sign(&self, header: &Value, claims: &Value) -> String {
        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
        );

        let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey).expect("signer");
        signer.update(message.as_bytes()).expect("signing input");
        let signature = signer.sign_to_vec().expect("signature");

        format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature))
    }

    pub fn token(&self, claims: &Value) -> String {
        self.sign(
            &json!({ "alg": "RS256", "kid": self.kid, "typ": "JWT" }),
            claims,
        )
    }

    pub fn bearer(&self, claims: &Value) -> String {
        format!("Bearer {}", self.token(claims))
    }
}

/// An identity provider serving discovery metadata and keys
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// Serves the discovery document, expecting `times` requests
    pub async fn serve_configuration(&self, times: impl Into<Times>) {
        self.serve_configuration_after(times, Duration::ZERO).await;
    }

    pub async fn serve_configuration_after(&self, times: impl Into<Times>, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "issuer": self.issuer(),
                        "jwks_uri": format!("{}/jwks", self.issuer()),
                        "id_token_signing_alg_values_supported": ["RS256"],
                    }))
                    .set_delay(delay),
            )
            .expect(times)
            .named("discovery document")
            .mount(&self.server)
            .await;
    }

    /// Serves `keys` as the JWKS, expecting `times` requests
    pub async fn serve_keys(&self, keys: &[&RsaKey], times: impl Into<Times>) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(keys)))
            .expect(times)
            .named("key set")
            .mount(&self.server)
            .await;
    }

    /// Serves `keys` for the next request only, then falls through to later mocks
    pub async fn serve_keys_once(&self, keys: &[&RsaKey]) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(keys)))
            .up_to_n_times(1)
            .expect(1)
            .named("initial key set")
            .mount(&self.server)
            .await;
    }

    pub async fn cache(&self, clock: &TestClock, options: CacheOptions) -> DiscoveryCache {
        let fetcher = HttpFetcher::new(options.fetch_timeout()).expect("HTTP client");
        DiscoveryCache::new(
            Issuer::new(self.issuer()),
            Arc::new(fetcher),
            Arc::new(clock.clone()),
            options,
        )
    }

    pub async fn authorizer(&self, clock: &TestClock, options: CacheOptions) -> Authorizer {
        let mut policies = PolicyRegistry::new();
        policies
            .register("ReadPhotos", [BASIC, READ])
            .expect("valid policy");
        policies
            .register("WritePhotos", [BASIC, WRITE])
            .expect("valid policy");

        Authorizer::new(
            TokenValidator::new(self.cache(clock, options).await),
            policies,
            Audience::from_static(AUDIENCE),
        )
    }
}

fn key_set(keys: &[&RsaKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Claims of a Cognito ID token for an administrator
pub fn id_token_claims(issuer: &str) -> Value {
    json!({
        "sub": "0b5e4c1a-alice",
        "iss": issuer,
        "aud": AUDIENCE,
        "token_use": "id",
        "cognito:username": "alice",
        "cognito:groups": ["Admin"],
        "iat": NOW.0,
        "exp": NOW.0 + 3600,
    })
}

/// Claims of a Cognito access token granting `scope`
///
/// Access tokens carry the app client in `client_id` rather than `aud`.
pub fn access_token_claims(issuer: &str, scope: &str) -> Value {
    json!({
        "sub": "7f3a9d22-bob",
        "iss": issuer,
        "client_id": AUDIENCE,
        "token_use": "access",
        "username": "bob",
        "scope": scope,
        "iat": NOW.0,
        "exp": NOW.0 + 3600,
    })
}
