//! Loading verification key material from disk.

use std::path::Path;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey};

use crate::error::ConfigurationError;
use crate::verification::VerificationKey;

/// Parses a signature algorithm name, e.g. `RS256` or `ES384`.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, ConfigurationError> {
    Algorithm::from_str(name.trim()).map_err(|_| {
        ConfigurationError::Invalid(format!("unrecognised key algorithm {:?}", name))
    })
}

/// Loads an asymmetric public key from a PEM file.
///
/// The algorithm determines how the PEM is interpreted; HMAC algorithms are
/// rejected since they have no public key form.
pub fn load_public_key(
    path: impl AsRef<Path>,
    algorithm: Algorithm,
) -> Result<VerificationKey, ConfigurationError> {
    let path = path.as_ref();
    let pem = std::fs::read(path).map_err(|e| {
        ConfigurationError::KeyLoad(format!("cannot read {}: {}", path.display(), e))
    })?;

    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(&pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            return Err(ConfigurationError::Invalid(format!(
                "algorithm {:?} is symmetric and has no public key",
                algorithm
            )));
        }
    }
    .map_err(|e| {
        ConfigurationError::KeyLoad(format!("cannot parse {}: {}", path.display(), e))
    })?;

    Ok(VerificationKey::new(key, vec![algorithm]))
}

/// Loads an HMAC secret from a file.
///
/// The file contents are used as the raw secret, with surrounding whitespace
/// trimmed so a trailing newline does not become part of the key. The
/// resulting key accepts any HMAC-SHA2 algorithm.
pub fn load_secret_key(path: impl AsRef<Path>) -> Result<VerificationKey, ConfigurationError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|e| {
        ConfigurationError::KeyLoad(format!("cannot read {}: {}", path.display(), e))
    })?;

    let secret = trim_ascii_whitespace(&raw);
    if secret.is_empty() {
        return Err(ConfigurationError::KeyLoad(format!(
            "secret key file {} is empty",
            path.display()
        )));
    }

    Ok(VerificationKey::new(
        DecodingKey::from_secret(secret),
        vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
    ))
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
