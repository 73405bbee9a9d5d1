//! Decoding of compact JWTs
//!
//! Decoding only takes a token apart. Nothing produced here is trusted until
//! the signature and claims have been checked by the
//! [`TokenValidator`](crate::TokenValidator).

use std::fmt;

use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD},
        DecodePaddingMode,
    },
    Engine as _,
};
use serde_json::{Map, Value};

use crate::{error::ValidationError, jwk::KeyIdRef};

/// Signatures are opaque bytes, so stray low bits in the final character are
/// left for the verifier to reject rather than treated as a decoding error.
const SIGNATURE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// A decoded but unverified JWT
///
/// By default, this type holds potentially sensitive information. To prevent
/// unintentional disclosure, neither its `Display` nor its `Debug` output
/// reveal the token or its signature.
#[derive(Clone)]
pub struct RawToken {
    compact: String,
    message_len: usize,
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signature: Vec<u8>,
}

/// Splits a compact JWT into its three parts and decodes them
///
/// The token must consist of exactly three non-empty base64url segments
/// separated by `.`, and the header and payload must each decode to a JSON
/// object. No signature or claim is checked.
pub fn decode(raw: &str) -> Result<RawToken, ValidationError> {
    let mut segments = raw.split('.');
    let (h_str, p_str, s_str) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
            (h, p, s)
        }
        _ => {
            return Err(ValidationError::MalformedToken(
                "expected three non-empty segments",
            ))
        }
    };

    let header = decode_object(h_str)
        .ok_or(ValidationError::MalformedToken("header is not a base64url JSON object"))?;
    let payload = decode_object(p_str)
        .ok_or(ValidationError::MalformedToken("payload is not a base64url JSON object"))?;
    let signature = SIGNATURE_ENGINE
        .decode(s_str)
        .map_err(|_| ValidationError::MalformedToken("signature is not base64url"))?;

    Ok(RawToken {
        compact: raw.to_owned(),
        message_len: h_str.len() + 1 + p_str.len(),
        header,
        payload,
        signature,
    })
}

fn decode_object(segment: &str) -> Option<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

impl RawToken {
    /// The `kid` header parameter, if present
    #[must_use]
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.header
            .get("kid")
            .and_then(Value::as_str)
            .map(KeyIdRef::from_str)
    }

    /// The `alg` header parameter, if present
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// The untrusted JOSE header
    #[must_use]
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// The untrusted claims
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The bytes covered by the signature (`header.payload`)
    #[must_use]
    pub fn signing_input(&self) -> &[u8] {
        &self.compact.as_bytes()[..self.message_len]
    }

    /// The decoded signature
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub(crate) fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

impl fmt::Display for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(concat!("***", "JWT", "***"))
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RawToken")
            .field("header", &self.header)
            .field("signature", &format_args!("***"))
            .finish_non_exhaustive()
    }
}
