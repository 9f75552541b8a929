//! The authentication engine: the framework-independent core algorithm.
//!
//! [`JwtAuthenticationEngine`] is a trait whose required methods are the
//! framework hooks (reading headers, writing a challenge response) and whose
//! provided [`authenticate`](JwtAuthenticationEngine::authenticate) method is
//! the complete collect-then-decide algorithm: verify every candidate token
//! first, then accept the first verified one that yields a username,
//! otherwise reply with the first challenge recorded.

use crate::challenges::{
    Challenge, TokenCandidate, VerifiedToken, ERROR_INVALID_REQUEST, ERROR_INVALID_TOKEN,
};
use crate::error::VerificationError;
use crate::sources::{default_header_sources, HeaderSource};
use crate::verification::{JwtVerifier, VerifiedJwt};

/// Request attribute recording which source the accepted token came from.
pub const REQUEST_ATTRIBUTE_SOURCE: &str = "tokengate.source";

/// Request attribute recording the accepted token in raw form.
pub const REQUEST_ATTRIBUTE_RAW_JWT: &str = "tokengate.raw";

/// Request attribute recording the verified token.
pub const REQUEST_ATTRIBUTE_VERIFIED_JWT: &str = "tokengate.verified";

/// A value stored on a request after successful authentication.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Source(HeaderSource),
    Text(String),
    Jwt(VerifiedJwt),
}

/// Maps a verification failure to the challenge reported to the client.
///
/// Returns `None` for [`VerificationError::Internal`], which is a server
/// fault and must not surface as an authentication challenge.
pub fn challenge_for(err: &VerificationError) -> Option<Challenge> {
    let challenge = match err {
        VerificationError::InvalidKey(msg) => Challenge::new(
            401,
            ERROR_INVALID_TOKEN,
            format!("Invalid/weak key: {}", msg),
        ),
        VerificationError::BadSignature(msg) => Challenge::new(
            401,
            ERROR_INVALID_TOKEN,
            format!("Token failed signature verification: {}", msg),
        ),
        VerificationError::MalformedToken(msg) => Challenge::new(
            401,
            ERROR_INVALID_TOKEN,
            format!("Token is malformed: {}", msg),
        ),
        VerificationError::UnsupportedFeature(msg) => Challenge::new(
            400,
            ERROR_INVALID_REQUEST,
            format!("Token uses an unsupported JWT feature: {}", msg),
        ),
        VerificationError::Expired(msg) => Challenge::new(
            401,
            ERROR_INVALID_TOKEN,
            format!("Token expired: {}", msg),
        ),
        VerificationError::Premature => Challenge::new(
            401,
            ERROR_INVALID_TOKEN,
            "Token is not yet valid, are server clocks out of sync?",
        ),
        VerificationError::KeyNotFound { .. }
        | VerificationError::KeyResolution(_)
        | VerificationError::Other(_) => {
            Challenge::new(401, ERROR_INVALID_TOKEN, format!("JWT error: {}", err))
        }
        VerificationError::Internal(_) => return None,
    };
    Some(challenge)
}

/// Framework adapter plus the authentication algorithm itself.
///
/// Implementors supply the request/response hooks; the provided
/// [`authenticate`](Self::authenticate) method never needs overriding.
#[async_trait::async_trait]
pub trait JwtAuthenticationEngine: Send + Sync {
    /// The framework's request type. Only `Send` is required: the provided
    /// algorithm never shares a request across tasks, and axum request
    /// bodies are not `Sync`.
    type Request: Send;
    /// The framework's response type.
    type Response: Send;

    /// Whether the request carries any of the headers tokens may be sourced
    /// from. Requests without any are challenged immediately.
    fn has_required_parameters(&self, request: &Self::Request) -> bool;

    /// Every candidate token present on the request, in source priority
    /// order. One candidate per matching header occurrence.
    fn extract_tokens(&self, request: &Self::Request) -> Vec<TokenCandidate>;

    /// The username carried by a verified token, if any.
    fn extract_username(&self, jwt: &VerifiedJwt) -> Option<String>;

    /// The realm reported in challenges for this request.
    fn challenge_realm(&self, request: &Self::Request) -> String;

    /// The request URL, for logging.
    fn request_url(&self, request: &Self::Request) -> String;

    /// Stores an attribute on the request for downstream consumers.
    fn set_request_attribute(
        &self,
        request: &mut Self::Request,
        name: &str,
        value: AttributeValue,
    );

    /// Final adaptation of an authenticated request, e.g. attaching the
    /// authenticated identity the way the framework expects.
    fn prepare_request(
        &self,
        request: Self::Request,
        jwt: &VerifiedJwt,
        username: &str,
    ) -> Self::Request;

    /// Writes an authentication challenge to the response.
    fn send_challenge(
        &self,
        request: &Self::Request,
        response: &mut Self::Response,
        challenge: &Challenge,
    );

    /// Reports a server fault (HTTP 500) to the response.
    fn send_error(&self, response: &mut Self::Response, err: &VerificationError);

    /// Authenticates a request.
    ///
    /// Returns the prepared request on success. On failure the appropriate
    /// challenge or error has been written to `response` and `None` is
    /// returned; the caller must not continue processing the request.
    async fn authenticate(
        &self,
        request: Self::Request,
        response: &mut Self::Response,
        verifier: &dyn JwtVerifier,
    ) -> Option<Self::Request> {
        if !self.has_required_parameters(&request) {
            self.send_challenge(&request, response, &Challenge::new(401, "", ""));
            return None;
        }

        let candidates = self.extract_tokens(&request);
        if candidates.is_empty() {
            self.send_challenge(
                &request,
                response,
                &Challenge::new(400, ERROR_INVALID_REQUEST, "No Bearer token(s) provided"),
            );
            return None;
        }

        // Phase one: verify every candidate, remembering why each failed.
        // Only the first recorded challenge is reported if none succeeds.
        let mut challenges: Vec<Challenge> = Vec::new();
        let mut verified: Vec<(String, VerifiedToken)> = Vec::new();
        for candidate in candidates {
            let raw_jwt = match candidate.raw_token() {
                Some(token) => token,
                None => {
                    challenges.push(Challenge::new(
                        400,
                        ERROR_INVALID_REQUEST,
                        "No Bearer token(s) provided",
                    ));
                    continue;
                }
            };

            match verifier.verify(&raw_jwt).await {
                Ok(jwt) => verified.push((raw_jwt, VerifiedToken::new(candidate, jwt))),
                Err(err) => match challenge_for(&err) {
                    Some(challenge) => challenges.push(challenge),
                    None => {
                        tracing::error!(
                            url = %self.request_url(&request),
                            "unexpected error verifying token: {}", err
                        );
                        self.send_error(response, &err);
                        return None;
                    }
                },
            }
        }

        // Phase two: the first verified token that yields a username wins.
        // Username challenges are recorded after every verification one.
        for (raw_jwt, token) in verified {
            let username = match self.extract_username(&token.jwt) {
                Some(username) if !username.trim().is_empty() => username,
                _ => {
                    challenges.push(Challenge::new(
                        401,
                        ERROR_INVALID_TOKEN,
                        "Failed to find a username for the user",
                    ));
                    continue;
                }
            };

            tracing::info!(
                url = %self.request_url(&request),
                source = %token.candidate.source,
                "authenticated request for user {}", username
            );

            let mut request = request;
            self.set_request_attribute(
                &mut request,
                REQUEST_ATTRIBUTE_SOURCE,
                AttributeValue::Source(token.candidate.source.clone()),
            );
            self.set_request_attribute(
                &mut request,
                REQUEST_ATTRIBUTE_RAW_JWT,
                AttributeValue::Text(raw_jwt),
            );
            self.set_request_attribute(
                &mut request,
                REQUEST_ATTRIBUTE_VERIFIED_JWT,
                AttributeValue::Jwt(token.jwt.clone()),
            );
            return Some(self.prepare_request(request, &token.jwt, &username));
        }

        let summary = challenges
            .iter()
            .map(Challenge::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        tracing::warn!(
            url = %self.request_url(&request),
            "request failed authentication: {}", summary
        );

        // challenges is non-empty: every candidate that did not authenticate
        // recorded exactly one entry across the two phases
        let first = challenges.remove(0);
        self.send_challenge(&request, response, &first);
        None
    }
}

/// Shared header-based token extraction, reused by concrete engines.
///
/// Holds the configured token sources, optional realm and username claim
/// search order.
#[derive(Debug, Clone)]
pub struct HeaderTokenExtractor {
    sources: Vec<HeaderSource>,
    realm: Option<String>,
    username_claims: Vec<String>,
}

impl HeaderTokenExtractor {
    pub fn new(
        sources: Vec<HeaderSource>,
        realm: Option<String>,
        username_claims: Vec<String>,
    ) -> Self {
        let sources = if sources.is_empty() {
            default_header_sources()
        } else {
            sources
        };
        Self {
            sources,
            realm: realm.filter(|r| !r.trim().is_empty()),
            username_claims,
        }
    }

    pub fn sources(&self) -> &[HeaderSource] {
        &self.sources
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn username_claims(&self) -> &[String] {
        &self.username_claims
    }

    /// The username for a verified token: the first configured claim that is
    /// present as a non-blank string, falling back to the standard `sub`
    /// claim.
    pub fn username_from(&self, jwt: &VerifiedJwt) -> Option<String> {
        for claim in &self.username_claims {
            if let Some(value) = jwt.claim_str(claim) {
                if !value.trim().is_empty() {
                    return Some(value.to_string());
                }
            }
        }
        jwt.subject()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    /// The challenge realm: the configured realm if any, otherwise the
    /// request URI.
    pub fn challenge_realm(&self, request_uri: &str) -> String {
        match &self.realm {
            Some(realm) => realm.clone(),
            None => request_uri.to_string(),
        }
    }
}

impl Default for HeaderTokenExtractor {
    fn default() -> Self {
        Self::new(Vec::new(), None, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::challenges::build_challenge_header;
    use crate::verification::test_support::{hmac_verifier, sign_token};

    /// Minimal in-memory engine for exercising the algorithm without a
    /// framework.
    struct MapEngine {
        extractor: HeaderTokenExtractor,
    }

    #[derive(Default)]
    struct MapRequest {
        headers: Vec<(String, String)>,
        attributes: HashMap<String, AttributeValue>,
        remote_user: Option<String>,
    }

    impl MapRequest {
        fn with_headers(headers: &[(&str, &str)]) -> Self {
            Self {
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct MapResponse {
        status: Option<u16>,
        www_authenticate: Option<String>,
    }

    #[async_trait::async_trait]
    impl JwtAuthenticationEngine for MapEngine {
        type Request = MapRequest;
        type Response = MapResponse;

        fn has_required_parameters(&self, request: &MapRequest) -> bool {
            self.extractor.sources().iter().any(|source| {
                request
                    .headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(source.header()))
            })
        }

        fn extract_tokens(&self, request: &MapRequest) -> Vec<TokenCandidate> {
            let mut candidates = Vec::new();
            for source in self.extractor.sources() {
                for (name, value) in &request.headers {
                    if name.eq_ignore_ascii_case(source.header()) {
                        candidates.push(TokenCandidate::new(source.clone(), Some(value.clone())));
                    }
                }
            }
            candidates
        }

        fn extract_username(&self, jwt: &VerifiedJwt) -> Option<String> {
            self.extractor.username_from(jwt)
        }

        fn challenge_realm(&self, _request: &MapRequest) -> String {
            self.extractor.challenge_realm("/test")
        }

        fn request_url(&self, _request: &MapRequest) -> String {
            "/test".to_string()
        }

        fn set_request_attribute(
            &self,
            request: &mut MapRequest,
            name: &str,
            value: AttributeValue,
        ) {
            request.attributes.insert(name.to_string(), value);
        }

        fn prepare_request(
            &self,
            mut request: MapRequest,
            _jwt: &VerifiedJwt,
            username: &str,
        ) -> MapRequest {
            request.remote_user = Some(username.to_string());
            request
        }

        fn send_challenge(
            &self,
            request: &MapRequest,
            response: &mut MapResponse,
            challenge: &Challenge,
        ) {
            response.status = Some(challenge.status_code);
            response.www_authenticate = Some(build_challenge_header(
                &self.challenge_realm(request),
                &challenge.error_code,
                &challenge.error_description,
            ));
        }

        fn send_error(&self, response: &mut MapResponse, _err: &VerificationError) {
            response.status = Some(500);
        }
    }

    fn engine() -> MapEngine {
        MapEngine {
            extractor: HeaderTokenExtractor::default(),
        }
    }

    #[tokio::test]
    async fn test_no_auth_headers_yields_bare_401() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();

        let result = engine()
            .authenticate(MapRequest::default(), &mut response, &verifier)
            .await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(401));
        assert_eq!(response.www_authenticate.as_deref(), Some("Bearer realm=\"/test\""));
    }

    #[tokio::test]
    async fn test_header_without_token_yields_invalid_request() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        // Wrong scheme, so no candidate token can be resolved from it
        let request = MapRequest::with_headers(&[("Authorization", "Basic dXNlcjpwdw==")]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(400));
        let header = response.www_authenticate.unwrap();
        assert!(header.contains("error=\"invalid_request\""), "got {}", header);
    }

    #[tokio::test]
    async fn test_valid_token_authenticates() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let token = sign_token(Some("alice"), 3600, None);
        let request =
            MapRequest::with_headers(&[("Authorization", &format!("Bearer {}", token))]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        let request = result.expect("request should authenticate");
        assert_eq!(request.remote_user.as_deref(), Some("alice"));
        assert!(request.attributes.contains_key(REQUEST_ATTRIBUTE_SOURCE));
        assert!(request.attributes.contains_key(REQUEST_ATTRIBUTE_RAW_JWT));
        assert!(request.attributes.contains_key(REQUEST_ATTRIBUTE_VERIFIED_JWT));
        assert_eq!(response.status, None);
    }

    #[tokio::test]
    async fn test_expired_token_yields_invalid_token() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let token = sign_token(Some("alice"), -3600, None);
        let request =
            MapRequest::with_headers(&[("Authorization", &format!("Bearer {}", token))]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(401));
        let header = response.www_authenticate.unwrap();
        assert!(header.contains("error=\"invalid_token\""), "got {}", header);
        assert!(header.contains("Token expired"), "got {}", header);
    }

    #[tokio::test]
    async fn test_later_valid_candidate_wins_over_earlier_invalid() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let expired = sign_token(Some("alice"), -3600, None);
        let valid = sign_token(Some("bob"), 3600, None);
        let request = MapRequest::with_headers(&[
            ("Authorization", "Bearer garbage"),
            ("Authorization", &format!("Bearer {}", expired)),
            ("X-API-Key", &valid),
        ]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        let request = result.expect("third candidate should authenticate");
        assert_eq!(request.remote_user.as_deref(), Some("bob"));
        assert_eq!(response.status, None);
    }

    #[tokio::test]
    async fn test_first_challenge_wins_when_all_fail() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let expired = sign_token(Some("alice"), -3600, None);
        // First candidate is expired (401), second is malformed (401, different
        // description); the reported challenge must be the first
        let request = MapRequest::with_headers(&[
            ("Authorization", &format!("Bearer {}", expired)),
            ("X-API-Key", "garbage"),
        ]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(401));
        let header = response.www_authenticate.unwrap();
        assert!(header.contains("Token expired"), "got {}", header);
    }

    #[tokio::test]
    async fn test_verification_challenges_precede_username_challenges() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let no_subject = sign_token(None, 3600, None);
        // The first candidate verifies but yields no username; the second is
        // blank. The blank token's 400 is recorded during verification, ahead
        // of the username challenge appended afterwards, so it is the one
        // surfaced
        let request = MapRequest::with_headers(&[
            ("Authorization", &format!("Bearer {}", no_subject)),
            ("X-API-Key", "   "),
        ]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(400));
        let header = response.www_authenticate.unwrap();
        assert!(header.contains("error=\"invalid_request\""), "got {}", header);
    }

    #[tokio::test]
    async fn test_token_without_username_challenged() {
        let verifier = hmac_verifier();
        let mut response = MapResponse::default();
        let token = sign_token(None, 3600, None);
        let request =
            MapRequest::with_headers(&[("Authorization", &format!("Bearer {}", token))]);

        let result = engine().authenticate(request, &mut response, &verifier).await;

        assert!(result.is_none());
        assert_eq!(response.status, Some(401));
        let header = response.www_authenticate.unwrap();
        assert!(header.contains("Failed to find a username"), "got {}", header);
    }

    #[test]
    fn test_username_claim_order() {
        let extractor = HeaderTokenExtractor::new(
            Vec::new(),
            None,
            vec!["email".to_string(), "preferred_username".to_string()],
        );

        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!("subject-id"));
        claims.insert("preferred_username".into(), json!("al"));
        claims.insert("email".into(), json!("alice@example.org"));
        let jwt = VerifiedJwt::new(Default::default(), claims);
        assert_eq!(extractor.username_from(&jwt).as_deref(), Some("alice@example.org"));

        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!("subject-id"));
        claims.insert("email".into(), json!("  "));
        let jwt = VerifiedJwt::new(Default::default(), claims);
        // Blank claim values are skipped, falling back to sub
        assert_eq!(extractor.username_from(&jwt).as_deref(), Some("subject-id"));

        let jwt = VerifiedJwt::new(Default::default(), serde_json::Map::new());
        assert_eq!(extractor.username_from(&jwt), None);
    }

    #[test]
    fn test_challenge_realm_fallback() {
        let extractor = HeaderTokenExtractor::default();
        assert_eq!(extractor.challenge_realm("/reads/1"), "/reads/1");

        let extractor =
            HeaderTokenExtractor::new(Vec::new(), Some("api".to_string()), Vec::new());
        assert_eq!(extractor.challenge_realm("/reads/1"), "api");
    }

    #[test]
    fn test_internal_error_has_no_challenge() {
        assert!(challenge_for(&VerificationError::Internal("boom".into())).is_none());
        assert!(challenge_for(&VerificationError::Premature).is_some());
    }
}
