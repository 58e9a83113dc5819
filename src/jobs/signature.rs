//! Trigger signatures
//!
//! A processing trigger carries an HS256 JWT whose `body` claim is the
//! base64url SHA-256 digest of the raw request body. Verification tries the
//! current signing key first, then the next one, so keys can rotate while
//! triggers are in flight.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::SigningConfig;
use crate::types::{ChaplinError, Result};

type HmacSha256 = Hmac<Sha256>;

const ISSUER: &str = "Upstash";
const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    #[serde(default)]
    sub: String,
    exp: i64,
    nbf: i64,
    #[serde(default)]
    iat: i64,
    #[serde(default)]
    jti: String,
    body: String,
}

fn body_digest(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| ChaplinError::Signature(format!("malformed token segment: {}", e)))
}

fn mac_for(key: &SecretString) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .map_err(|e| ChaplinError::Signature(format!("unusable signing key: {}", e)))
}

// =============================================================================
// Verification
// =============================================================================

/// Checks trigger signatures against a current/next key pair
pub struct SignatureVerifier {
    current: SecretString,
    next: Option<SecretString>,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(current: impl Into<String>, next: Option<String>) -> Self {
        Self {
            current: SecretString::from(current.into()),
            next: next.filter(|k| !k.trim().is_empty()).map(SecretString::from),
            tolerance: Duration::ZERO,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        let current = config
            .current_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChaplinError::Config("signing.current_key is not set".to_string()))?;
        Ok(Self::new(current, config.next_key.clone())
            .with_tolerance(Duration::from_secs(config.clock_tolerance_secs)))
    }

    /// Accept `signature` for `body` if either key validates it
    pub fn verify(&self, signature: &str, body: &[u8]) -> Result<()> {
        self.verify_at(signature, body, Utc::now().timestamp())
    }

    fn verify_at(&self, signature: &str, body: &[u8], now: i64) -> Result<()> {
        match self.verify_with(&self.current, signature, body, now) {
            Ok(()) => Ok(()),
            Err(err) => match &self.next {
                Some(next) => {
                    debug!(error = %err, "Current signing key rejected trigger, trying next key");
                    self.verify_with(next, signature, body, now)
                }
                None => Err(err),
            },
        }
    }

    fn verify_with(&self, key: &SecretString, token: &str, body: &[u8], now: i64) -> Result<()> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ChaplinError::Signature("token must have three segments".to_string()));
        };

        let mut mac = mac_for(key)?;
        mac.update(format!("{}.{}", header, payload).as_bytes());
        mac.verify_slice(&decode_segment(sig)?)
            .map_err(|_| ChaplinError::Signature("signature mismatch".to_string()))?;

        let claims: Claims = serde_json::from_slice(&decode_segment(payload)?)
            .map_err(|e| ChaplinError::Signature(format!("malformed claims: {}", e)))?;

        if claims.iss != ISSUER {
            return Err(ChaplinError::Signature(format!(
                "unexpected issuer '{}'",
                claims.iss
            )));
        }

        let tolerance = self.tolerance.as_secs() as i64;
        if now > claims.exp + tolerance {
            return Err(ChaplinError::Signature("token has expired".to_string()));
        }
        if now + tolerance < claims.nbf {
            return Err(ChaplinError::Signature("token is not yet valid".to_string()));
        }

        if claims.body.trim_end_matches('=') != body_digest(body) {
            return Err(ChaplinError::Signature("body hash does not match".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Signing
// =============================================================================

/// Produce a trigger signature for `body`, valid for `ttl`
///
/// `subject` is the destination the trigger is addressed to.
pub fn sign_trigger(key: &str, subject: &str, body: &[u8], ttl: Duration) -> Result<String> {
    sign_trigger_at(key, subject, body, ttl, Utc::now().timestamp())
}

fn sign_trigger_at(key: &str, subject: &str, body: &[u8], ttl: Duration, now: i64) -> Result<String> {
    let claims = Claims {
        iss: ISSUER.to_string(),
        sub: subject.to_string(),
        exp: now + ttl.as_secs() as i64,
        nbf: now,
        iat: now,
        jti: uuid::Uuid::new_v4().to_string(),
        body: body_digest(body),
    };

    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

    let mut mac = mac_for(&SecretString::from(key.to_string()))?;
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}.{}", header, payload, sig))
}
