//! JWKS (JSON Web Key Set) fetching and per-key-ID caching.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use serde::Deserialize;
use url::Url;

use crate::error::VerificationError;
use crate::verification::{KeyProvider, VerificationKey};

/// Default time to keep resolved keys before refetching the key set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache key used for tokens that carry no `kid` header. Not a legal key ID
/// per RFC 7517 so it cannot collide with a real one.
const NO_KID: &str = "";

/// A key provider that resolves keys from a remote JWKS document, caching
/// each resolved key by its key ID.
///
/// A cache miss fetches the whole key set and repopulates an entry for every
/// key it contains, so one fetch serves subsequent lookups of any key until
/// the TTL expires. Tokens without a `kid` resolve to the first key in the
/// set, cached under a sentinel entry.
pub struct CachedJwksKeyResolver {
    jwks_url: Url,
    cache: Cache<String, Arc<VerificationKey>>,
    http_client: reqwest::Client,
}

impl CachedJwksKeyResolver {
    /// Create a resolver with the default cache TTL.
    pub fn new(jwks_url: Url) -> Self {
        Self::with_ttl(jwks_url, DEFAULT_CACHE_TTL)
    }

    /// Create a resolver whose cached keys expire after `ttl`.
    pub fn with_ttl(jwks_url: Url, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(100)
            .build();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to create HTTP client");

        Self {
            jwks_url,
            cache,
            http_client,
        }
    }

    pub fn jwks_url(&self) -> &Url {
        &self.jwks_url
    }

    /// Fetch the key set from the remote URL.
    async fn fetch_jwks(&self) -> Result<Jwks, VerificationError> {
        tracing::debug!("fetching JWKS from {}", self.jwks_url);

        let response = self
            .http_client
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| VerificationError::KeyResolution(format!("failed to fetch JWKS: {}", e)))?;

        if !response.status().is_success() {
            return Err(VerificationError::KeyResolution(format!(
                "JWKS fetch failed with status: {}",
                response.status()
            )));
        }

        response
            .json::<Jwks>()
            .await
            .map_err(|e| VerificationError::KeyResolution(format!("failed to parse JWKS: {}", e)))
    }

    /// Fetch the key set and repopulate the cache from it, returning the
    /// entry for `cache_key` if the set contains it.
    async fn refresh(&self, cache_key: &str) -> Result<Option<Arc<VerificationKey>>, VerificationError> {
        let jwks = self.fetch_jwks().await?;

        let mut resolved = None;
        for (index, jwk) in jwks.keys.iter().enumerate() {
            let key = match jwk.to_verification_key() {
                Ok(key) => Arc::new(key),
                Err(e) => {
                    tracing::warn!("skipping unusable key in JWKS: {}", e);
                    continue;
                }
            };

            if let Some(kid) = &jwk.kid {
                self.cache.insert(kid.clone(), key.clone()).await;
                if kid == cache_key {
                    resolved = Some(key.clone());
                }
            }
            if index == 0 {
                self.cache.insert(NO_KID.to_string(), key.clone()).await;
                if cache_key == NO_KID {
                    resolved = Some(key);
                }
            }
        }

        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl KeyProvider for CachedJwksKeyResolver {
    async fn key_for(&self, kid: Option<&str>) -> Result<VerificationKey, VerificationError> {
        let cache_key = kid.unwrap_or(NO_KID);

        if let Some(key) = self.cache.get(cache_key).await {
            tracing::debug!(kid = ?kid, "JWKS cache hit");
            return Ok((*key).clone());
        }

        tracing::debug!(kid = ?kid, "JWKS cache miss");
        match self.refresh(cache_key).await? {
            Some(key) => Ok((*key).clone()),
            None => Err(VerificationError::KeyNotFound {
                kid: kid.map(str::to_string),
            }),
        }
    }
}

/// JSON Web Key Set.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256").
    pub alg: Option<String>,
    /// Key use (e.g., "sig").
    #[serde(rename = "use")]
    pub use_: Option<String>,

    // RSA key components
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA exponent (base64url).
    pub e: Option<String>,

    // EC key components
    /// EC curve (e.g., "P-256").
    pub crv: Option<String>,
    /// EC x coordinate (base64url).
    pub x: Option<String>,
    /// EC y coordinate (base64url).
    pub y: Option<String>,
}

impl Jwk {
    /// Convert this JWK into a decoding key plus its permitted algorithms.
    ///
    /// When the key declares an `alg` only that algorithm is permitted,
    /// otherwise the full family implied by the key type is.
    pub fn to_verification_key(&self) -> Result<VerificationKey, VerificationError> {
        let key = match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_ref().ok_or_else(|| {
                    VerificationError::InvalidKey("RSA key missing 'n'".to_string())
                })?;
                let e = self.e.as_ref().ok_or_else(|| {
                    VerificationError::InvalidKey("RSA key missing 'e'".to_string())
                })?;

                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| VerificationError::InvalidKey(format!("invalid RSA key: {}", e)))?
            }
            "EC" => {
                let x = self.x.as_ref().ok_or_else(|| {
                    VerificationError::InvalidKey("EC key missing 'x'".to_string())
                })?;
                let y = self.y.as_ref().ok_or_else(|| {
                    VerificationError::InvalidKey("EC key missing 'y'".to_string())
                })?;

                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| VerificationError::InvalidKey(format!("invalid EC key: {}", e)))?
            }
            "OKP" => {
                let x = self.x.as_ref().ok_or_else(|| {
                    VerificationError::InvalidKey("OKP key missing 'x'".to_string())
                })?;

                DecodingKey::from_ed_components(x)
                    .map_err(|e| VerificationError::InvalidKey(format!("invalid OKP key: {}", e)))?
            }
            other => {
                return Err(VerificationError::InvalidKey(format!(
                    "unsupported key type: {}",
                    other
                )));
            }
        };

        Ok(VerificationKey::new(key, self.algorithms()?))
    }

    fn algorithms(&self) -> Result<Vec<Algorithm>, VerificationError> {
        if let Some(alg) = &self.alg {
            let algorithm = alg.parse::<Algorithm>().map_err(|_| {
                VerificationError::UnsupportedFeature(format!("unrecognised JWK algorithm {:?}", alg))
            })?;
            return Ok(vec![algorithm]);
        }

        match self.kty.as_str() {
            "RSA" => Ok(vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512]),
            "EC" => match self.crv.as_deref() {
                Some("P-384") => Ok(vec![Algorithm::ES384]),
                _ => Ok(vec![Algorithm::ES256]),
            },
            "OKP" => Ok(vec![Algorithm::EdDSA]),
            other => Err(VerificationError::InvalidKey(format!(
                "unsupported key type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_jwk(kty: &str) -> Jwk {
        Jwk {
            kty: kty.to_string(),
            kid: None,
            alg: None,
            use_: None,
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        }
    }

    #[test]
    fn test_jwk_rsa_missing_components() {
        let jwk = bare_jwk("RSA");
        assert!(matches!(
            jwk.to_verification_key(),
            Err(VerificationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_jwk_unsupported_type() {
        let jwk = bare_jwk("oct");
        assert!(matches!(
            jwk.to_verification_key(),
            Err(VerificationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_jwk_rsa_default_algorithms() {
        // RFC 7517 appendix A.1 public key
        let jwk = Jwk {
            n: Some(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAt\
                 VT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn6\
                 4tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FD\
                 W2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n9\
                 1CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINH\
                 aQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
                    .to_string(),
            ),
            e: Some("AQAB".to_string()),
            ..bare_jwk("RSA")
        };

        let key = jwk.to_verification_key().unwrap();
        assert_eq!(
            key.algorithms,
            vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512]
        );
    }

    #[test]
    fn test_jwk_explicit_alg_narrows_algorithms() {
        let jwk = Jwk {
            alg: Some("RS512".to_string()),
            n: Some(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAt\
                 VT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn6\
                 4tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FD\
                 W2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n9\
                 1CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINH\
                 aQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
                    .to_string(),
            ),
            e: Some("AQAB".to_string()),
            ..bare_jwk("RSA")
        };

        let key = jwk.to_verification_key().unwrap();
        assert_eq!(key.algorithms, vec![Algorithm::RS512]);
    }

    #[test]
    fn test_jwk_unrecognised_alg_rejected() {
        let jwk = Jwk {
            alg: Some("RSA-OAEP".to_string()),
            n: Some("AQAB".to_string()),
            e: Some("AQAB".to_string()),
            ..bare_jwk("RSA")
        };
        assert!(matches!(
            jwk.to_verification_key(),
            Err(VerificationError::UnsupportedFeature(_))
        ));
    }
}
