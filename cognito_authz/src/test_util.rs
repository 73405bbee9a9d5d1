//! Signing keys and a scripted metadata source for unit tests

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cognito_authz_clock::UnixTime;
use ring::{
    rand::SystemRandom,
    signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING},
};
use serde_json::{json, Value};

use crate::{
    discovery::{MetadataFetcher, OpenIdConfiguration},
    error::DiscoveryError,
    jwa::{Algorithm, Curve},
    jwk::{Jwks, SigningKey},
};

pub(crate) const ISSUER: &str = "https://idp.example.com/pool";
pub(crate) const AUDIENCE: &str = "app-client";
pub(crate) const NOW: UnixTime = UnixTime(1_700_000_000);

/// A P-256 key pair that signs ES256 tokens
#[derive(Debug)]
pub(crate) struct TestKey {
    kid: String,
    pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl TestKey {
    pub(crate) fn p256(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("key generation");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .expect("valid pkcs8");

        Self {
            kid: kid.to_owned(),
            pair,
            rng,
        }
    }

    /// The public half, as it would be published
    pub(crate) fn jwk(&self) -> SigningKey {
        let point = self.pair.public_key().as_ref();
        SigningKey::ec(self.kid.as_str(), Curve::P256, &point[1..33], &point[33..])
            .and_then(|k| k.with_algorithm(Algorithm::ES256))
            .expect("valid public key")
    }

    pub(crate) fn sign(&self, header: &Value, claims: &Value) -> String {
        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
        );
        let sig = self
            .pair
            .sign(&self.rng, message.as_bytes())
            .expect("signing");

        format!("{message}.{}", URL_SAFE_NO_PAD.encode(sig.as_ref()))
    }

    pub(crate) fn token(&self, claims: &Value) -> String {
        let header = json!({ "alg": "ES256", "typ": "JWT", "kid": self.kid });
        self.sign(&header, claims)
    }
}

/// Claims for a valid ID token issued at [`NOW`] and living ten minutes
pub(crate) fn id_token_claims() -> Value {
    json!({
        "sub": "8d6e2a10-user",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "token_use": "id",
        "cognito:username": "alice",
        "cognito:groups": ["Admin"],
        "iat": NOW.0,
        "exp": NOW.0 + 600,
    })
}

/// A metadata source that serves a fixed issuer and a replaceable key set
#[derive(Debug)]
pub(crate) struct FakeFetcher {
    issuer: String,
    keys: Mutex<Vec<SigningKey>>,
    failure: Mutex<Option<DiscoveryError>>,
    delay: Duration,
    configuration_fetches: AtomicUsize,
    key_set_fetches: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn new(issuer: &str, keys: Vec<SigningKey>) -> Self {
        Self {
            issuer: issuer.to_owned(),
            keys: Mutex::new(keys),
            failure: Mutex::new(None),
            delay: Duration::ZERO,
            configuration_fetches: AtomicUsize::new(0),
            key_set_fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub(crate) fn set_keys(&self, keys: Vec<SigningKey>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub(crate) fn fail_with(&self, failure: Option<DiscoveryError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub(crate) fn configuration_fetches(&self) -> usize {
        self.configuration_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn key_set_fetches(&self) -> usize {
        self.key_set_fetches.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Result<(), DiscoveryError> {
        match &*self.failure.lock().unwrap() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    async fn fetch_configuration(
        &self,
        _url: &str,
    ) -> Result<OpenIdConfiguration, DiscoveryError> {
        self.configuration_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.failure()?;

        Ok(OpenIdConfiguration {
            issuer: Some(self.issuer.clone()),
            jwks_uri: format!("{}/jwks", self.issuer.trim_end_matches('/')),
        })
    }

    async fn fetch_key_set(&self, _url: &str) -> Result<Jwks, DiscoveryError> {
        self.key_set_fetches.fetch_add(1, Ordering::SeqCst);
        self.failure()?;

        let keys = self.keys.lock().unwrap().clone();
        Ok(keys.into_iter().collect())
    }
}
