//! Bearer token authentication for HTTP services: token extraction from
//! configurable header sources, JWT verification against static keys or a
//! cached JWKS, path exclusions and RFC 6750 challenge responses, plus an
//! axum middleware binding.

pub mod challenges;
pub mod config;
pub mod engine;
pub mod error;
pub mod exclusions;
pub mod filter;
pub mod middleware;
pub mod sources;
pub mod verification;

pub use challenges::{Challenge, TokenCandidate, VerifiedToken};
pub use engine::{HeaderTokenExtractor, JwtAuthenticationEngine};
pub use error::{ConfigurationError, VerificationError};
pub use exclusions::PathExclusion;
pub use filter::FrozenFilterConfiguration;
pub use middleware::{
    jwt_auth_middleware, AuthenticatedUser, AxumAuthenticationEngine, JwtAuthFilter,
};
pub use sources::HeaderSource;
pub use verification::{JwtVerifier, SignedJwtVerifier, VerifiedJwt};
