use thiserror::Error;

/// Failure reasons for verifying a single candidate token.
///
/// These are per-candidate failures: the authentication engine recovers each
/// of them into an RFC 6750 challenge and moves on to the next candidate
/// rather than aborting the request. Only [`VerificationError::Internal`] is
/// treated as a server fault.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("invalid or weak verification key: {0}")]
    InvalidKey(String),

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unsupported token feature: {0}")]
    UnsupportedFeature(String),

    #[error("token expired: {0}")]
    Expired(String),

    #[error("token not yet valid")]
    Premature,

    #[error("no verification key found for key id {kid:?}")]
    KeyNotFound { kid: Option<String> },

    #[error("failed to resolve verification keys: {0}")]
    KeyResolution(String),

    #[error("token verification failed: {0}")]
    Other(String),

    /// A fault in the verifier itself rather than in the presented token.
    /// Routed to the engine's error hook as an HTTP 500, never to a challenge.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::MalformedToken(err.to_string()),
            ErrorKind::InvalidSignature => Self::BadSignature(err.to_string()),
            ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat => Self::InvalidKey(err.to_string()),
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnsupportedFeature(err.to_string())
            }
            ErrorKind::ExpiredSignature => Self::Expired(err.to_string()),
            ErrorKind::ImmatureSignature => Self::Premature,
            _ => Self::Other(err.to_string()),
        }
    }
}

/// Startup/deployment faults.
///
/// Raised while building sources, exclusions, verifiers or while freezing
/// filter configuration. These are deliberately a separate type from
/// [`VerificationError`]: a misconfigured filter should fail loudly at
/// initialisation, not be reported to clients as an authentication challenge.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("attribute {attribute} holds a value of the wrong type")]
    WrongAttributeType { attribute: &'static str },

    #[error("no JWT verifier has been configured")]
    MissingVerifier,

    #[error("failed to load key material: {0}")]
    KeyLoad(String),

    #[error("exclusion pattern {pattern:?} excludes all paths")]
    ExcludesEverything { pattern: String },

    #[error("invalid exclusion pattern {pattern:?}: {reason}")]
    InvalidExclusion { pattern: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonwebtoken_expired_maps_to_expired() {
        let err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
        assert!(matches!(VerificationError::from(err), VerificationError::Expired(_)));
    }

    #[test]
    fn test_jsonwebtoken_immature_maps_to_premature() {
        let err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ImmatureSignature);
        assert!(matches!(VerificationError::from(err), VerificationError::Premature));
    }

    #[test]
    fn test_jsonwebtoken_invalid_token_maps_to_malformed() {
        let err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);
        assert!(matches!(
            VerificationError::from(err),
            VerificationError::MalformedToken(_)
        ));
    }

    #[test]
    fn test_jsonwebtoken_bad_signature_maps_to_bad_signature() {
        let err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        assert!(matches!(
            VerificationError::from(err),
            VerificationError::BadSignature(_)
        ));
    }
}
