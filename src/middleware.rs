//! Axum bindings: the concrete engine, the filter middleware and the
//! authenticated-user extractor.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::challenges::{build_challenge_header, Challenge, TokenCandidate};
use crate::config::{
    allows_multiple_configs, configure_engine, configure_path_exclusions,
    configure_token_extractor, configure_verifier, default_verification_providers,
    EngineProvider, ParameterSource, VerificationProvider,
};
use crate::engine::{AttributeValue, HeaderTokenExtractor, JwtAuthenticationEngine};
use crate::error::VerificationError;
use crate::filter::{AttributeStore, FrozenFilterConfiguration, MemoryAttributeStore};
use crate::verification::VerifiedJwt;

/// Attributes stored on a request by the engine, keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes(HashMap<String, AttributeValue>);

impl RequestAttributes {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }
}

/// The authenticated identity attached to a request that passed the filter.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub jwt: VerifiedJwt,
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// The axum engine: sources tokens from request headers and writes RFC 6750
/// challenges to the response.
pub struct AxumAuthenticationEngine {
    extractor: HeaderTokenExtractor,
}

impl AxumAuthenticationEngine {
    pub fn new(extractor: HeaderTokenExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &HeaderTokenExtractor {
        &self.extractor
    }
}

#[async_trait::async_trait]
impl JwtAuthenticationEngine for AxumAuthenticationEngine {
    type Request = Request;
    type Response = Response;

    fn has_required_parameters(&self, request: &Request) -> bool {
        self.extractor
            .sources()
            .iter()
            .any(|source| request.headers().contains_key(source.header()))
    }

    fn extract_tokens(&self, request: &Request) -> Vec<TokenCandidate> {
        let mut candidates = Vec::new();
        for source in self.extractor.sources() {
            for value in request.headers().get_all(source.header()) {
                // A header value that is not valid visible ASCII still counts
                // as a candidate so it is challenged rather than ignored
                let value = value.to_str().ok().map(str::to_string);
                candidates.push(TokenCandidate::new(source.clone(), value));
            }
        }
        candidates
    }

    fn extract_username(&self, jwt: &VerifiedJwt) -> Option<String> {
        self.extractor.username_from(jwt)
    }

    fn challenge_realm(&self, request: &Request) -> String {
        self.extractor.challenge_realm(request.uri().path())
    }

    fn request_url(&self, request: &Request) -> String {
        request.uri().to_string()
    }

    fn set_request_attribute(&self, request: &mut Request, name: &str, value: AttributeValue) {
        if request.extensions().get::<RequestAttributes>().is_none() {
            request.extensions_mut().insert(RequestAttributes::default());
        }
        if let Some(attributes) = request.extensions_mut().get_mut::<RequestAttributes>() {
            attributes.0.insert(name.to_string(), value);
        }
    }

    fn prepare_request(&self, mut request: Request, jwt: &VerifiedJwt, username: &str) -> Request {
        request.extensions_mut().insert(AuthenticatedUser {
            username: username.to_string(),
            jwt: jwt.clone(),
        });
        request
    }

    fn send_challenge(&self, request: &Request, response: &mut Response, challenge: &Challenge) {
        let header = build_challenge_header(
            &self.challenge_realm(request),
            &challenge.error_code,
            &challenge.error_description,
        );

        *response.status_mut() = StatusCode::from_u16(challenge.status_code)
            .unwrap_or(StatusCode::UNAUTHORIZED);
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_str(&header)
                .unwrap_or_else(|_| HeaderValue::from_static("Bearer")),
        );
    }

    fn send_error(&self, response: &mut Response, err: &VerificationError) {
        tracing::error!("authentication failed with server fault: {}", err);
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    }
}

/// The built-in engine provider: an [`AxumAuthenticationEngine`] over the
/// configured header sources, realm and username claims.
pub struct HeaderEngineProvider;

impl EngineProvider<AxumAuthenticationEngine> for HeaderEngineProvider {
    fn priority(&self) -> i32 {
        0
    }

    fn configure(
        &self,
        params: &dyn ParameterSource,
    ) -> Result<Option<Arc<AxumAuthenticationEngine>>, crate::error::ConfigurationError> {
        let extractor = configure_token_extractor(params)?;
        Ok(Some(Arc::new(AxumAuthenticationEngine::new(extractor))))
    }
}

/// The built-in engine providers, in registration order.
pub fn default_engine_providers() -> Vec<Arc<dyn EngineProvider<AxumAuthenticationEngine>>> {
    vec![Arc::new(HeaderEngineProvider)]
}

struct FilterInner {
    params: HashMap<String, String>,
    store: Arc<dyn AttributeStore>,
    engine_providers: Vec<Arc<dyn EngineProvider<AxumAuthenticationEngine>>>,
    verification_providers: Vec<Arc<dyn VerificationProvider>>,
    config: FrozenFilterConfiguration<AxumAuthenticationEngine>,
}

/// The authentication filter, used as axum middleware state.
///
/// Configuration resolves lazily on the first request and is then frozen
/// for the filter's lifetime, regardless of later changes to the parameters
/// or the shared attribute store.
///
/// ```ignore
/// let filter = JwtAuthFilter::new(params);
/// let app = Router::new()
///     .route("/protected", get(handler))
///     .layer(middleware::from_fn_with_state(filter, jwt_auth_middleware));
/// ```
#[derive(Clone)]
pub struct JwtAuthFilter {
    inner: Arc<FilterInner>,
}

impl JwtAuthFilter {
    /// Creates a filter with a private attribute store and the built-in
    /// verification providers.
    pub fn new(params: HashMap<String, String>) -> Self {
        Self::with_store(params, Arc::new(MemoryAttributeStore::new()))
    }

    /// Creates a filter sharing `store` with other filter instances.
    pub fn with_store(params: HashMap<String, String>, store: Arc<dyn AttributeStore>) -> Self {
        Self::with_providers(
            params,
            store,
            default_engine_providers(),
            default_verification_providers(),
        )
    }

    /// Creates a filter with custom providers, consulted in priority order
    /// ahead of or behind the built-in ones depending on the priorities they
    /// report.
    pub fn with_providers(
        params: HashMap<String, String>,
        store: Arc<dyn AttributeStore>,
        engine_providers: Vec<Arc<dyn EngineProvider<AxumAuthenticationEngine>>>,
        verification_providers: Vec<Arc<dyn VerificationProvider>>,
    ) -> Self {
        let allow_multiple = allows_multiple_configs(&params);
        Self {
            inner: Arc::new(FilterInner {
                params,
                store,
                engine_providers,
                verification_providers,
                config: FrozenFilterConfiguration::new(allow_multiple),
            }),
        }
    }

    /// Processes one request: pass through excluded paths, otherwise
    /// authenticate and either continue the chain or answer with the
    /// challenge the engine produced.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let inner = &self.inner;

        let exclusions = match inner.config.try_freeze_exclusions(&*inner.store, || {
            configure_path_exclusions(&inner.params).map(Arc::new)
        }) {
            Ok(exclusions) => exclusions,
            Err(e) => return configuration_failure(&e),
        };
        if crate::exclusions::is_excluded(&exclusions, request.uri().path()) {
            tracing::debug!(path = request.uri().path(), "path excluded from authentication");
            return next.run(request).await;
        }

        let engine = match inner.config.try_freeze_engine(&*inner.store, || {
            configure_engine(&inner.params, &inner.engine_providers)
        }) {
            Ok(engine) => engine,
            Err(e) => return configuration_failure(&e),
        };

        let verifier = match inner.config.try_freeze_verifier(&*inner.store, || {
            configure_verifier(&inner.params, &inner.verification_providers)
        }) {
            Ok(verifier) => verifier,
            Err(e) => return configuration_failure(&e),
        };

        inner.config.warn_if_modified(&*inner.store);

        let mut response = Response::new(Body::empty());
        match engine.authenticate(request, &mut response, verifier.as_ref()).await {
            Some(request) => next.run(request).await,
            None => response,
        }
    }
}

fn configuration_failure(err: &crate::error::ConfigurationError) -> Response {
    tracing::error!("authentication filter misconfigured: {}", err);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Middleware entry point for `axum::middleware::from_fn_with_state`.
pub async fn jwt_auth_middleware(
    State(filter): State<JwtAuthFilter>,
    request: Request,
    next: Next,
) -> Response {
    filter.handle(request, next).await
}
