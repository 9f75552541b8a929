//! Parameter-driven configuration.
//!
//! Deployments supply string parameters (from whatever configuration surface
//! the host application has); this module turns them into token extractors,
//! verifiers and path exclusions. Verifier construction goes through
//! [`VerificationProvider`]s consulted in explicit priority order, so a
//! deployment can register a custom provider ahead of the default one.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::engine::HeaderTokenExtractor;
use crate::error::ConfigurationError;
use crate::exclusions::PathExclusion;
use crate::sources::{default_header_sources, HeaderSource};
use crate::verification::jwks::CachedJwksKeyResolver;
use crate::verification::keys::{load_public_key, load_secret_key, parse_algorithm};
use crate::verification::{JwtVerifier, SignedJwtVerifier};

/// Comma-separated list of headers tokens may be sourced from.
pub const PARAM_HEADER_NAMES: &str = "jwt.headers.names";

/// Comma-separated list of prefixes, parallel to [`PARAM_HEADER_NAMES`].
pub const PARAM_HEADER_PREFIXES: &str = "jwt.headers.prefixes";

/// Whether to fall back to the default header sources when none configured.
pub const PARAM_USE_DEFAULT_HEADERS: &str = "jwt.headers.use-defaults";

/// The realm reported in authentication challenges.
pub const PARAM_REALM: &str = "jwt.realm";

/// Comma-separated list of claims to try, in order, for the username.
pub const PARAM_USERNAME_CLAIMS: &str = "jwt.username.claims";

/// Comma-separated list of path exclusion patterns.
pub const PARAM_PATH_EXCLUSIONS: &str = "jwt.path-exclusions";

/// Path to a PEM file holding the public verification key.
pub const PARAM_PUBLIC_KEY: &str = "jwt.public-key";

/// Signature algorithm for [`PARAM_PUBLIC_KEY`], e.g. `RS256`.
pub const PARAM_KEY_ALGORITHM: &str = "jwt.key-algorithm";

/// Path to a file holding an HMAC secret.
pub const PARAM_SECRET_KEY: &str = "jwt.secret-key";

/// URL of a JWKS document to resolve verification keys from.
pub const PARAM_JWKS_URL: &str = "jwt.jwks-url";

/// Allowed clock skew in seconds when validating temporal claims.
pub const PARAM_ALLOWED_CLOCK_SKEW: &str = "jwt.allowed-clock-skew";

/// Minutes to cache keys resolved from a JWKS document.
pub const PARAM_JWKS_CACHE_KEYS_FOR: &str = "jwt.jwks.cache-keys-for";

/// Whether several differently-configured filter instances are expected in
/// one deployment, which suppresses configuration reuse warnings.
pub const PARAM_ALLOW_MULTIPLE_CONFIGS: &str = "jwt.configs.allow-multiple";

const DEFAULT_JWKS_CACHE_MINUTES: u64 = 15;

/// Source of named string parameters.
pub trait ParameterSource: Send + Sync {
    fn parameter(&self, name: &str) -> Option<String>;
}

impl ParameterSource for HashMap<String, String> {
    fn parameter(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Parses an optional typed parameter, warning and falling back to the
/// default when the raw value does not parse.
pub fn parse_parameter<T: FromStr>(params: &dyn ParameterSource, name: &str, default: T) -> T {
    match params.parameter(name) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    "ignoring parameter {} with unparseable value {:?}",
                    name,
                    raw
                );
                default
            }
        },
        None => default,
    }
}

/// Splits a comma-separated parameter into trimmed non-blank entries.
pub fn parse_list(params: &dyn ParameterSource, name: &str) -> Vec<String> {
    params
        .parameter(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Builds a verifier from deployment parameters.
///
/// Providers are consulted highest priority first; the first to return a
/// verifier wins. Returning `Ok(None)` means the provider's parameters are
/// absent and the next provider should be tried.
pub trait VerificationProvider: Send + Sync {
    fn priority(&self) -> i32;

    fn configure(
        &self,
        params: &dyn ParameterSource,
    ) -> Result<Option<Arc<dyn JwtVerifier>>, ConfigurationError>;
}

/// The built-in provider: JWKS URL, then HMAC secret, then public key, in
/// that precedence order.
pub struct DefaultVerificationProvider;

impl VerificationProvider for DefaultVerificationProvider {
    fn priority(&self) -> i32 {
        0
    }

    fn configure(
        &self,
        params: &dyn ParameterSource,
    ) -> Result<Option<Arc<dyn JwtVerifier>>, ConfigurationError> {
        let clock_skew = parse_parameter(params, PARAM_ALLOWED_CLOCK_SKEW, 0u64);

        let verifier = if let Some(raw_url) = params.parameter(PARAM_JWKS_URL) {
            let jwks_url = Url::parse(raw_url.trim()).map_err(|e| {
                ConfigurationError::Invalid(format!("invalid JWKS URL {:?}: {}", raw_url, e))
            })?;
            let cache_minutes =
                parse_parameter(params, PARAM_JWKS_CACHE_KEYS_FOR, DEFAULT_JWKS_CACHE_MINUTES);
            let resolver = CachedJwksKeyResolver::with_ttl(
                jwks_url.clone(),
                Duration::from_secs(cache_minutes.saturating_mul(60)),
            );
            SignedJwtVerifier::from_provider(Arc::new(resolver), format!("jwks-url={}", jwks_url))
        } else if let Some(path) = params.parameter(PARAM_SECRET_KEY) {
            SignedJwtVerifier::from_key(load_secret_key(path.trim())?)
        } else if let Some(path) = params.parameter(PARAM_PUBLIC_KEY) {
            let algorithm_name = params.parameter(PARAM_KEY_ALGORITHM).ok_or_else(|| {
                ConfigurationError::Invalid(format!(
                    "{} requires {} to also be set",
                    PARAM_PUBLIC_KEY, PARAM_KEY_ALGORITHM
                ))
            })?;
            let algorithm = parse_algorithm(&algorithm_name)?;
            SignedJwtVerifier::from_key(load_public_key(path.trim(), algorithm)?)
        } else {
            return Ok(None);
        };

        let verifier = if clock_skew > 0 {
            verifier.with_clock_skew(clock_skew)
        } else {
            verifier
        };
        tracing::info!("configured JWT verifier: {}", verifier);
        Ok(Some(Arc::new(verifier)))
    }
}

/// The built-in providers, in registration order.
pub fn default_verification_providers() -> Vec<Arc<dyn VerificationProvider>> {
    vec![Arc::new(DefaultVerificationProvider)]
}

/// Builds an authentication engine from deployment parameters.
///
/// Same contract as [`VerificationProvider`]: providers are consulted
/// highest priority first and `Ok(None)` means "not mine, try the next".
/// Generic over the engine type since engines are framework specific.
pub trait EngineProvider<E>: Send + Sync {
    fn priority(&self) -> i32;

    fn configure(
        &self,
        params: &dyn ParameterSource,
    ) -> Result<Option<Arc<E>>, ConfigurationError>;
}

/// Builds the engine by consulting `providers` highest priority first.
pub fn configure_engine<E>(
    params: &dyn ParameterSource,
    providers: &[Arc<dyn EngineProvider<E>>],
) -> Result<Arc<E>, ConfigurationError> {
    let mut providers: Vec<_> = providers.iter().collect();
    providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));

    for provider in providers {
        if let Some(engine) = provider.configure(params)? {
            return Ok(engine);
        }
    }
    Err(ConfigurationError::Invalid(
        "no engine provider produced an authentication engine".into(),
    ))
}

/// Builds the verifier by consulting `providers` highest priority first.
pub fn configure_verifier(
    params: &dyn ParameterSource,
    providers: &[Arc<dyn VerificationProvider>],
) -> Result<Arc<dyn JwtVerifier>, ConfigurationError> {
    let mut providers: Vec<_> = providers.iter().collect();
    providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));

    for provider in providers {
        if let Some(verifier) = provider.configure(params)? {
            return Ok(verifier);
        }
    }
    Err(ConfigurationError::MissingVerifier)
}

/// Builds the token extractor from deployment parameters.
///
/// Header names and prefixes are parallel comma-separated lists; a prefix
/// entry may be blank for a header carrying the token directly. When no
/// headers are configured the defaults apply unless explicitly disabled.
pub fn configure_token_extractor(
    params: &dyn ParameterSource,
) -> Result<HeaderTokenExtractor, ConfigurationError> {
    let names = parse_list(params, PARAM_HEADER_NAMES);
    let prefixes: Vec<String> = params
        .parameter(PARAM_HEADER_PREFIXES)
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    if !prefixes.is_empty() && prefixes.len() != names.len() {
        return Err(ConfigurationError::Invalid(format!(
            "{} has {} entries but {} has {}",
            PARAM_HEADER_NAMES,
            names.len(),
            PARAM_HEADER_PREFIXES,
            prefixes.len()
        )));
    }

    let mut sources = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let prefix = prefixes.get(i).filter(|p| !p.is_empty()).cloned();
        sources.push(HeaderSource::new(name.clone(), prefix)?);
    }

    if sources.is_empty() {
        if parse_parameter(params, PARAM_USE_DEFAULT_HEADERS, true) {
            sources = default_header_sources();
        } else {
            return Err(ConfigurationError::Invalid(format!(
                "no token sources: {} is empty and {} is false",
                PARAM_HEADER_NAMES, PARAM_USE_DEFAULT_HEADERS
            )));
        }
    }

    Ok(HeaderTokenExtractor::new(
        sources,
        params.parameter(PARAM_REALM),
        parse_list(params, PARAM_USERNAME_CLAIMS),
    ))
}

/// Builds the path exclusions from deployment parameters.
pub fn configure_path_exclusions(
    params: &dyn ParameterSource,
) -> Result<Vec<PathExclusion>, ConfigurationError> {
    match params.parameter(PARAM_PATH_EXCLUSIONS) {
        Some(raw) => PathExclusion::parse_patterns(&raw),
        None => Ok(Vec::new()),
    }
}

/// Whether this deployment expects several differently-configured filter
/// instances.
pub fn allows_multiple_configs(params: &dyn ParameterSource) -> bool {
    parse_parameter(params, PARAM_ALLOW_MULTIPLE_CONFIGS, false)
}
