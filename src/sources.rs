//! Token sources: where a candidate bearer token may be found in a request.

use std::fmt;

use crate::error::ConfigurationError;

/// The `Authorization` header.
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// The custom API key header accepted alongside `Authorization`.
pub const HEADER_API_KEY: &str = "X-API-Key";

/// The `Bearer` authentication scheme, used both as the required prefix on
/// the `Authorization` header and as the challenge scheme.
pub const AUTH_SCHEME_BEARER: &str = "Bearer";

/// An HTTP header based token source.
///
/// Names the header a candidate token may be read from plus an optional
/// prefix the header value must start with (e.g. `Bearer` on the
/// `Authorization` header) which is stripped to yield the actual token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSource {
    header: String,
    prefix: Option<String>,
}

impl HeaderSource {
    /// Creates a new header source.
    ///
    /// `prefix` may be `None` if the header carries the token directly with
    /// no scheme prefix. A blank header name is a configuration error.
    pub fn new(
        header: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let header = header.into();
        if header.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "token source header name cannot be blank".into(),
            ));
        }
        let prefix = prefix.filter(|p| !p.trim().is_empty());
        Ok(Self { header, prefix })
    }

    /// The standard `Authorization: Bearer <token>` source.
    pub fn authorization_bearer() -> Self {
        Self {
            header: HEADER_AUTHORIZATION.into(),
            prefix: Some(AUTH_SCHEME_BEARER.into()),
        }
    }

    /// The `X-API-Key: <token>` source, which carries the token with no prefix.
    pub fn api_key() -> Self {
        Self {
            header: HEADER_API_KEY.into(),
            prefix: None,
        }
    }

    /// Header the token should be sourced from.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Prefix required on the header value, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Extracts the raw token from a header value.
    ///
    /// If a prefix is configured the value must start with it
    /// (case-insensitive) or no token is yielded. The remainder is trimmed;
    /// blank remainders yield no token.
    pub fn raw_token(&self, raw_value: &str) -> Option<String> {
        let stripped = match &self.prefix {
            Some(prefix) => {
                let head = raw_value.get(..prefix.len())?;
                if !head.eq_ignore_ascii_case(prefix) {
                    return None;
                }
                &raw_value[prefix.len()..]
            }
            None => raw_value,
        };
        let token = stripped.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

impl fmt::Display for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}: {} <jwt>", self.header, prefix),
            None => write!(f, "{}: <jwt>", self.header),
        }
    }
}

/// The sources consulted when none are explicitly configured:
/// `Authorization: Bearer <jwt>` then `X-API-Key: <jwt>`.
pub fn default_header_sources() -> Vec<HeaderSource> {
    vec![HeaderSource::authorization_bearer(), HeaderSource::api_key()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_header_rejected() {
        assert!(HeaderSource::new("", None).is_err());
        assert!(HeaderSource::new("   ", None).is_err());
    }

    #[test]
    fn test_blank_prefix_treated_as_none() {
        let source = HeaderSource::new("X-Custom", Some("  ".into())).unwrap();
        assert_eq!(source.prefix(), None);
        assert_eq!(source.raw_token("abc"), Some("abc".into()));
    }

    #[test]
    fn test_raw_token_with_prefix() {
        let source = HeaderSource::authorization_bearer();
        assert_eq!(source.raw_token("Bearer abc123"), Some("abc123".into()));
        // Prefix match is case-insensitive
        assert_eq!(source.raw_token("bearer abc123"), Some("abc123".into()));
        assert_eq!(source.raw_token("BEARER abc123"), Some("abc123".into()));
    }

    #[test]
    fn test_raw_token_missing_prefix_yields_none() {
        let source = HeaderSource::authorization_bearer();
        assert_eq!(source.raw_token("abc123"), None);
        assert_eq!(source.raw_token("Basic abc123"), None);
    }

    #[test]
    fn test_raw_token_blank_after_strip_yields_none() {
        let source = HeaderSource::authorization_bearer();
        assert_eq!(source.raw_token("Bearer"), None);
        assert_eq!(source.raw_token("Bearer   "), None);
    }

    #[test]
    fn test_raw_token_without_prefix() {
        let source = HeaderSource::api_key();
        assert_eq!(source.raw_token("  abc123  "), Some("abc123".into()));
        assert_eq!(source.raw_token(""), None);
        assert_eq!(source.raw_token("   "), None);
    }

    #[test]
    fn test_raw_token_shorter_than_prefix() {
        let source = HeaderSource::authorization_bearer();
        assert_eq!(source.raw_token("Bear"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            HeaderSource::authorization_bearer().to_string(),
            "Authorization: Bearer <jwt>"
        );
        assert_eq!(HeaderSource::api_key().to_string(), "X-API-Key: <jwt>");
    }

    #[test]
    fn test_default_sources() {
        let sources = default_header_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].header(), HEADER_AUTHORIZATION);
        assert_eq!(sources[1].header(), HEADER_API_KEY);
    }
}
