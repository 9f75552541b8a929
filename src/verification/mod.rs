//! Token verification.
//!
//! All cryptography is delegated to `jsonwebtoken`; this module wraps it in
//! the [`JwtVerifier`] boundary the authentication engine consumes, with key
//! material supplied either statically (PEM / secret files) or through a
//! [`KeyProvider`] such as the cached JWKS resolver.

pub mod jwks;
pub mod keys;

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde_json::{Map, Value};

use crate::error::VerificationError;

/// A decoding key together with the signature algorithms it may verify.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithms: Vec<Algorithm>,
}

impl VerificationKey {
    pub fn new(key: DecodingKey, algorithms: Vec<Algorithm>) -> Self {
        Self { key, algorithms }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // DecodingKey holds secret material, never print it
        f.debug_struct("VerificationKey")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// A successfully verified token: its header plus the full claims map.
///
/// Claims are kept as an opaque JSON map; the engine only ever reads
/// individual named claims from it.
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    header: Header,
    claims: Map<String, Value>,
}

impl VerifiedJwt {
    pub fn new(header: Header, claims: Map<String, Value>) -> Self {
        Self { header, claims }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// A named claim as a string, if present and a string.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// The standard `sub` claim.
    pub fn subject(&self) -> Option<&str> {
        self.claim_str("sub")
    }
}

/// Verifies a raw bearer token, yielding its claims on success.
///
/// Implementations fail with a typed [`VerificationError`] on any
/// structural, cryptographic or temporal problem.
#[async_trait::async_trait]
pub trait JwtVerifier: Send + Sync {
    async fn verify(&self, raw_jwt: &str) -> Result<VerifiedJwt, VerificationError>;
}

/// Supplies the decoding key for a token, optionally using the key ID from
/// the token header.
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    async fn key_for(&self, kid: Option<&str>) -> Result<VerificationKey, VerificationError>;
}

/// A key provider backed by a single statically loaded key.
pub struct StaticKeyProvider {
    key: VerificationKey,
}

impl StaticKeyProvider {
    pub fn new(key: VerificationKey) -> Self {
        Self { key }
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn key_for(&self, _kid: Option<&str>) -> Result<VerificationKey, VerificationError> {
        Ok(self.key.clone())
    }
}

enum KeySelection {
    Static(VerificationKey),
    Provider(Arc<dyn KeyProvider>),
}

/// A verifier that checks the token is cryptographically signed and has not
/// been tampered with, and that its temporal claims (`exp`, `nbf`) hold.
pub struct SignedJwtVerifier {
    keys: KeySelection,
    clock_skew_seconds: Option<u64>,
    description: String,
}

impl SignedJwtVerifier {
    /// Creates a verifier over a single static key.
    pub fn from_key(key: VerificationKey) -> Self {
        let description = format!("method=static-key, algorithms={:?}", key.algorithms);
        Self {
            keys: KeySelection::Static(key),
            clock_skew_seconds: None,
            description,
        }
    }

    /// Creates a verifier that resolves keys through the given provider,
    /// e.g. a cached JWKS resolver.
    pub fn from_provider(provider: Arc<dyn KeyProvider>, description: impl Into<String>) -> Self {
        Self {
            keys: KeySelection::Provider(provider),
            clock_skew_seconds: None,
            description: format!("method=provider, {}", description.into()),
        }
    }

    /// Allowed clock skew in seconds when validating `exp`/`nbf`.
    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = Some(seconds);
        self
    }

    fn validation(&self, key: &VerificationKey) -> Validation {
        let mut validation = Validation::new(key.algorithms[0]);
        validation.algorithms = key.algorithms.clone();
        // Temporal claims are validated when present but not required, and
        // no issuer/audience requirements are imposed at this layer
        validation.required_spec_claims = Default::default();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        if let Some(skew) = self.clock_skew_seconds {
            validation.leeway = skew;
        }
        validation
    }
}

#[async_trait::async_trait]
impl JwtVerifier for SignedJwtVerifier {
    async fn verify(&self, raw_jwt: &str) -> Result<VerifiedJwt, VerificationError> {
        let header = jsonwebtoken::decode_header(raw_jwt)
            .map_err(|e| VerificationError::MalformedToken(e.to_string()))?;

        let key = match &self.keys {
            KeySelection::Static(key) => key.clone(),
            KeySelection::Provider(provider) => provider.key_for(header.kid.as_deref()).await?,
        };
        if key.algorithms.is_empty() {
            return Err(VerificationError::InvalidKey(
                "key permits no signature algorithms".into(),
            ));
        }

        let validation = self.validation(&key);
        let data = jsonwebtoken::decode::<Map<String, Value>>(raw_jwt, &key.key, &validation)?;
        Ok(VerifiedJwt::new(data.header, data.claims))
    }
}

impl fmt::Display for SignedJwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedJwtVerifier{{{}}}", self.description)
    }
}
