//! Authentication challenges and RFC 6750 challenge header construction.

use std::fmt;

use crate::sources::{HeaderSource, AUTH_SCHEME_BEARER};
use crate::verification::VerifiedJwt;

/// The `WWW-Authenticate` response header.
pub const HEADER_WWW_AUTHENTICATE: &str = "WWW-Authenticate";

/// OAuth2 `invalid_request` error code (RFC 6750 §3.1).
pub const ERROR_INVALID_REQUEST: &str = "invalid_request";

/// OAuth2 `invalid_token` error code (RFC 6750 §3.1).
pub const ERROR_INVALID_TOKEN: &str = "invalid_token";

/// The `realm` challenge parameter.
pub const CHALLENGE_PARAMETER_REALM: &str = "realm";

/// The `error` challenge parameter.
pub const CHALLENGE_PARAMETER_ERROR: &str = "error";

/// The `error_description` challenge parameter.
pub const CHALLENGE_PARAMETER_ERROR_DESCRIPTION: &str = "error_description";

/// One reason a request failed to authenticate.
///
/// Several challenges may accumulate while processing a request (one per
/// failed candidate token); only the first recorded one is surfaced to the
/// client. The error code and description may be empty but are never absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub status_code: u16,
    pub error_code: String,
    pub error_description: String,
}

impl Challenge {
    pub fn new(
        status_code: u16,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            error_description: error_description.into(),
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.status_code, self.error_code, self.error_description
        )
    }
}

/// A possible token found in a request, prior to any verification.
///
/// One candidate is created per header occurrence matching a configured
/// source. `value` is the raw header value; `None` marks a header that was
/// present but unreadable (e.g. invalid encoding).
#[derive(Debug, Clone)]
pub struct TokenCandidate {
    pub source: HeaderSource,
    pub value: Option<String>,
}

impl TokenCandidate {
    pub fn new(source: HeaderSource, value: Option<String>) -> Self {
        Self { source, value }
    }

    /// Resolves the actual token from the raw header value via the source's
    /// prefix-stripping rules.
    pub fn raw_token(&self) -> Option<String> {
        self.value.as_deref().and_then(|v| self.source.raw_token(v))
    }
}

/// A candidate token that passed cryptographic verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub candidate: TokenCandidate,
    pub jwt: VerifiedJwt,
}

impl VerifiedToken {
    pub fn new(candidate: TokenCandidate, jwt: VerifiedJwt) -> Self {
        Self { candidate, jwt }
    }
}

/// Removes characters from a challenge parameter value that could enable
/// HTTP response splitting or escape the quoted-string: CR, LF, `"` and `\`.
pub fn sanitize_header_parameter_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '"' | '\\'))
        .collect()
}

/// Removes CR/LF from a fully assembled header value.
pub fn sanitize_header(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Builds an RFC 6750 `WWW-Authenticate` challenge header value.
///
/// Produces `Bearer realm="...", error="...", error_description="..."`,
/// emitting only the non-blank parameters. Each parameter value is sanitized
/// individually and the assembled header is sanitized again as a whole.
pub fn build_challenge_header(realm: &str, error_code: &str, error_description: &str) -> String {
    let mut params = Vec::new();
    for (name, value) in [
        (CHALLENGE_PARAMETER_REALM, realm),
        (CHALLENGE_PARAMETER_ERROR, error_code),
        (CHALLENGE_PARAMETER_ERROR_DESCRIPTION, error_description),
    ] {
        if !value.trim().is_empty() {
            params.push(format!("{}=\"{}\"", name, sanitize_header_parameter_value(value)));
        }
    }

    let header = if params.is_empty() {
        AUTH_SCHEME_BEARER.to_string()
    } else {
        format!("{} {}", AUTH_SCHEME_BEARER, params.join(", "))
    };
    sanitize_header(&header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_challenge() {
        assert_eq!(build_challenge_header("", "", ""), "Bearer");
        assert_eq!(build_challenge_header("  ", "", "  "), "Bearer");
    }

    #[test]
    fn test_realm_only() {
        assert_eq!(build_challenge_header("api", "", ""), "Bearer realm=\"api\"");
    }

    #[test]
    fn test_full_challenge() {
        assert_eq!(
            build_challenge_header("api", ERROR_INVALID_TOKEN, "Token expired"),
            "Bearer realm=\"api\", error=\"invalid_token\", error_description=\"Token expired\""
        );
    }

    #[test]
    fn test_error_without_realm() {
        assert_eq!(
            build_challenge_header("", ERROR_INVALID_REQUEST, ""),
            "Bearer error=\"invalid_request\""
        );
    }

    #[test]
    fn test_header_injection_stripped() {
        let header = build_challenge_header("api\r\nSet-Cookie: evil=1", "", "");
        assert!(!header.contains('\r'));
        assert!(!header.contains('\n'));
        assert_eq!(header, "Bearer realm=\"apiSet-Cookie: evil=1\"");
    }

    #[test]
    fn test_quotes_and_escapes_stripped_from_parameter_values() {
        let header = build_challenge_header("a\"b", "", "");
        assert_eq!(header, "Bearer realm=\"ab\"");

        let header = build_challenge_header("a\\b", "", "");
        assert_eq!(header, "Bearer realm=\"ab\"");
    }

    #[test]
    fn test_candidate_raw_token() {
        let candidate = TokenCandidate::new(
            HeaderSource::authorization_bearer(),
            Some("Bearer abc".into()),
        );
        assert_eq!(candidate.raw_token(), Some("abc".into()));

        let unreadable = TokenCandidate::new(HeaderSource::authorization_bearer(), None);
        assert_eq!(unreadable.raw_token(), None);
    }

    #[test]
    fn test_challenge_display() {
        let challenge = Challenge::new(401, ERROR_INVALID_TOKEN, "Token expired: x");
        assert_eq!(challenge.to_string(), "401 invalid_token (Token expired: x)");
    }
}
