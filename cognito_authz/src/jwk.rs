//! Public signing keys published by the identity provider
//!
//! Keys arrive as JSON Web Keys ([RFC7517][]). Only the verification half of
//! asymmetric keys is modeled: RSA and EC P-256/P-384 keys that are marked for
//! signature use (or carry no usage at all).
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use aliri_braid::braid;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::signature::{RsaPublicKeyComponents, UnparsedPublicKey};
use serde::Deserialize;

use crate::{
    error::{self, JwkVerifyError, KeyRejected},
    jwa::{Algorithm, Curve, Family},
};

const MIN_RSA_MODULUS_BITS: usize = 2048;

/// An identifier for a JWK
#[braid(serde, ref_doc = "A borrowed reference to JWK identifier ([`KeyId`])")]
pub struct KeyId;

/// Public key material
#[derive(Clone, Debug, PartialEq, Eq)]
enum Material {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ec { curve: Curve, point: Vec<u8> },
}

impl Material {
    fn family(&self) -> Family {
        match self {
            Self::Rsa { .. } => Family::Rsa,
            Self::Ec { curve, .. } => Family::Ec(*curve),
        }
    }
}

/// An identified public key usable for signature verification
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JwkDto")]
#[must_use]
pub struct SigningKey {
    key_id: KeyId,
    algorithm: Option<Algorithm>,
    material: Material,
}

impl SigningKey {
    /// Constructs an RSA key from its big-endian modulus and exponent
    pub fn rsa(
        key_id: impl Into<String>,
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<Self, KeyRejected> {
        let modulus = strip_leading_zeros(modulus);
        let exponent = strip_leading_zeros(exponent);

        let bits = modulus
            .first()
            .map_or(0, |b| modulus.len() * 8 - b.leading_zeros() as usize);
        if bits < MIN_RSA_MODULUS_BITS {
            return Err(error::key_rejected("key modulus must be at least 2048 bits"));
        }

        if exponent.is_empty() {
            return Err(error::key_rejected("key exponent must not be zero"));
        }

        Ok(Self {
            key_id: KeyId::new(key_id.into()),
            algorithm: None,
            material: Material::Rsa {
                modulus: modulus.to_vec(),
                exponent: exponent.to_vec(),
            },
        })
    }

    /// Constructs an EC key from its affine coordinates
    pub fn ec(
        key_id: impl Into<String>,
        curve: Curve,
        x: &[u8],
        y: &[u8],
    ) -> Result<Self, KeyRejected> {
        let len = curve.coordinate_len();
        if x.len() != len || y.len() != len {
            return Err(error::key_rejected("coordinate length does not match curve"));
        }

        let mut point = Vec::with_capacity(1 + 2 * len);
        point.push(0x04);
        point.extend_from_slice(x);
        point.extend_from_slice(y);

        Ok(Self {
            key_id: KeyId::new(key_id.into()),
            algorithm: None,
            material: Material::Ec { curve, point },
        })
    }

    /// Pins the key to a single algorithm
    pub fn with_algorithm(mut self, alg: Algorithm) -> Result<Self, KeyRejected> {
        if alg.family() != self.material.family() {
            return Err(error::key_rejected("algorithm does not match key type"));
        }

        self.algorithm = Some(alg);
        Ok(self)
    }

    /// The key ID
    #[must_use]
    pub fn key_id(&self) -> &KeyIdRef {
        &self.key_id
    }

    /// The algorithm the key is pinned to, if any
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether the key may verify signatures made with `alg`
    ///
    /// A pinned key accepts only its own algorithm. An unpinned key accepts
    /// any algorithm of its family.
    #[must_use]
    pub fn is_compatible(&self, alg: Algorithm) -> bool {
        match self.algorithm {
            Some(pinned) => pinned == alg,
            None => alg.family() == self.material.family(),
        }
    }

    /// Verifies `signature` over `message`
    pub fn verify(
        &self,
        alg: Algorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), JwkVerifyError> {
        if !self.is_compatible(alg) {
            return Err(JwkVerifyError::IncompatibleAlgorithm(alg));
        }

        let verified = match &self.material {
            Material::Rsa { modulus, exponent } => {
                let params = alg
                    .rsa_parameters()
                    .ok_or(JwkVerifyError::IncompatibleAlgorithm(alg))?;
                RsaPublicKeyComponents {
                    n: modulus,
                    e: exponent,
                }
                .verify(params, message, signature)
            }
            Material::Ec { point, .. } => {
                let params = alg
                    .ecdsa_parameters()
                    .ok_or(JwkVerifyError::IncompatibleAlgorithm(alg))?;
                UnparsedPublicKey::new(params, point).verify(message, signature)
            }
        };

        verified.map_err(|_| JwkVerifyError::SignatureMismatch)
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[derive(Deserialize)]
struct JwkDto {
    kty: String,
    #[serde(default)]
    kid: Option<KeyId>,
    #[serde(rename = "use", default)]
    usage: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

fn decode_param(value: Option<&str>) -> Result<Vec<u8>, KeyRejected> {
    let value = value.ok_or(error::key_rejected("missing key parameter"))?;
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| error::key_rejected("key parameter is not base64url"))
}

impl TryFrom<JwkDto> for SigningKey {
    type Error = KeyRejected;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        if matches!(dto.usage.as_deref(), Some(u) if u != "sig") {
            return Err(error::key_rejected("key is not intended for signatures"));
        }

        let kid = dto.kid.ok_or(error::key_rejected("key has no identifier"))?;

        let key = match dto.kty.as_str() {
            "RSA" => {
                let n = decode_param(dto.n.as_deref())?;
                let e = decode_param(dto.e.as_deref())?;
                Self::rsa(kid.take(), &n, &e)?
            }
            "EC" => {
                let curve = match dto.crv.as_deref() {
                    Some("P-256") => Curve::P256,
                    Some("P-384") => Curve::P384,
                    _ => return Err(error::key_rejected("unsupported curve")),
                };
                let x = decode_param(dto.x.as_deref())?;
                let y = decode_param(dto.y.as_deref())?;
                Self::ec(kid.take(), curve, &x, &y)?
            }
            _ => return Err(error::key_rejected("unsupported key type")),
        };

        match dto.alg {
            Some(alg) => {
                let alg = alg
                    .parse()
                    .map_err(|_| error::key_rejected("unsupported algorithm"))?;
                key.with_algorithm(alg)
            }
            None => Ok(key),
        }
    }
}

/// A JSON Web Key Set (JWKS)
///
/// Entries that cannot be used for verification are dropped, with a warning,
/// while the set is deserialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Jwks {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<SigningKey>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: SigningKey) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Finds the key with the given ID
    #[must_use]
    pub fn get(&self, kid: &KeyIdRef) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.key_id() == kid)
    }

    /// The number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no usable keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<SigningKey> for Jwks {
    fn from_iter<T: IntoIterator<Item = SigningKey>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<SigningKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeJwksVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeJwksVisitor {
        type Value = Vec<SigningKey>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeJwk::Jwk(jwk) => values.push(jwk),
                    MaybeJwk::Unknown(key) => {
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kid = ?key.kid,
                            jwk.kty = ?key.kty,
                            jwk.alg = ?key.alg,
                            "ignoring unusable JWK"
                        );
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(SigningKey),
        Unknown(JwkLike),
    }

    #[derive(Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kid: Option<serde_json::Value>,
        #[serde(default)]
        kty: Option<serde_json::Value>,
        #[serde(default)]
        alg: Option<serde_json::Value>,
    }

    deserializer.deserialize_seq(MaybeJwksVisitor)
}
