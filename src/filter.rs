//! Freeze-once filter configuration.
//!
//! A filter's engine, verifier and path exclusions are resolved lazily on
//! first use and then frozen: later requests always see the same instances,
//! even if the shared attribute store is modified afterwards. Freezing is a
//! compare-and-set on a once cell, so concurrent first requests race safely
//! and all observe a single winner. Modifications to the store after
//! freezing are detected by reference identity and logged, since they are
//! almost always a deployment mistake.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::engine::JwtAuthenticationEngine;
use crate::error::ConfigurationError;
use crate::exclusions::{self, PathExclusion};
use crate::verification::JwtVerifier;

/// Shared attribute holding the configured engine (an `Arc<E>`).
pub const ATTRIBUTE_ENGINE: &str = "tokengate.engine";

/// Shared attribute holding the configured verifier (an `Arc<dyn JwtVerifier>`).
pub const ATTRIBUTE_VERIFIER: &str = "tokengate.verifier";

/// Shared attribute holding the path exclusions (an `Arc<Vec<PathExclusion>>`).
pub const ATTRIBUTE_PATH_EXCLUSIONS: &str = "tokengate.path-exclusions";

/// A type-erased attribute value shared between filter instances.
pub type SharedAttribute = Arc<dyn Any + Send + Sync>;

/// Named attributes shared across filter instances, typically application
/// scoped. The host application decides what backs this.
pub trait AttributeStore: Send + Sync {
    fn attribute(&self, name: &str) -> Option<SharedAttribute>;
    fn set_attribute(&self, name: &str, value: SharedAttribute);
}

/// An in-memory attribute store.
#[derive(Default)]
pub struct MemoryAttributeStore {
    attributes: RwLock<HashMap<String, SharedAttribute>>,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn attribute(&self, name: &str) -> Option<SharedAttribute> {
        self.attributes.read().ok()?.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: SharedAttribute) {
        if let Ok(mut attributes) = self.attributes.write() {
            attributes.insert(name.to_string(), value);
        }
    }
}

fn downcast<T: Clone + 'static>(
    attribute: &SharedAttribute,
    name: &'static str,
) -> Result<T, ConfigurationError> {
    attribute
        .downcast_ref::<T>()
        .cloned()
        .ok_or(ConfigurationError::WrongAttributeType { attribute: name })
}

/// The frozen configuration of one filter instance.
///
/// Each slot resolves in the same way: an already-frozen value wins, then a
/// compatible value found in the shared store, then a freshly built one
/// (which is also published to the store for other filter instances).
pub struct FrozenFilterConfiguration<E: JwtAuthenticationEngine + 'static> {
    engine: OnceLock<Arc<E>>,
    verifier: OnceLock<Arc<dyn JwtVerifier>>,
    exclusions: OnceLock<Arc<Vec<PathExclusion>>>,
    /// Suppresses modification warnings for deployments that intentionally
    /// run several differently-configured filter instances.
    allow_multiple_configs: bool,
}

impl<E: JwtAuthenticationEngine + 'static> FrozenFilterConfiguration<E> {
    pub fn new(allow_multiple_configs: bool) -> Self {
        Self {
            engine: OnceLock::new(),
            verifier: OnceLock::new(),
            exclusions: OnceLock::new(),
            allow_multiple_configs,
        }
    }

    fn freeze<T: Clone + Send + Sync + 'static>(
        slot: &OnceLock<T>,
        store: &dyn AttributeStore,
        attribute: &'static str,
        build: impl FnOnce() -> Result<T, ConfigurationError>,
    ) -> Result<T, ConfigurationError> {
        if let Some(frozen) = slot.get() {
            return Ok(frozen.clone());
        }

        let value = match store.attribute(attribute) {
            Some(shared) => downcast::<T>(&shared, attribute)?,
            None => {
                let built = build()?;
                store.set_attribute(attribute, Arc::new(built.clone()));
                built
            }
        };

        // Lost races keep the winner's value
        let _ = slot.set(value);
        Ok(slot.get().cloned().unwrap_or_else(|| unreachable!()))
    }

    /// Resolves and freezes the engine, building it only when the shared
    /// store has none.
    pub fn try_freeze_engine(
        &self,
        store: &dyn AttributeStore,
        build: impl FnOnce() -> Result<Arc<E>, ConfigurationError>,
    ) -> Result<Arc<E>, ConfigurationError> {
        Self::freeze(&self.engine, store, ATTRIBUTE_ENGINE, build)
    }

    /// Resolves and freezes the verifier.
    pub fn try_freeze_verifier(
        &self,
        store: &dyn AttributeStore,
        build: impl FnOnce() -> Result<Arc<dyn JwtVerifier>, ConfigurationError>,
    ) -> Result<Arc<dyn JwtVerifier>, ConfigurationError> {
        Self::freeze(&self.verifier, store, ATTRIBUTE_VERIFIER, build)
    }

    /// Resolves and freezes the path exclusions.
    pub fn try_freeze_exclusions(
        &self,
        store: &dyn AttributeStore,
        build: impl FnOnce() -> Result<Arc<Vec<PathExclusion>>, ConfigurationError>,
    ) -> Result<Arc<Vec<PathExclusion>>, ConfigurationError> {
        Self::freeze(&self.exclusions, store, ATTRIBUTE_PATH_EXCLUSIONS, build)
    }

    pub fn engine(&self) -> Option<&Arc<E>> {
        self.engine.get()
    }

    pub fn verifier(&self) -> Option<&Arc<dyn JwtVerifier>> {
        self.verifier.get()
    }

    pub fn exclusions(&self) -> Option<&Arc<Vec<PathExclusion>>> {
        self.exclusions.get()
    }

    /// Whether the frozen exclusions exempt the given path.
    pub fn is_excluded_path(&self, path: &str) -> bool {
        self.exclusions
            .get()
            .is_some_and(|exclusions| exclusions::is_excluded(exclusions, path))
    }

    /// Whether the store now holds a different engine than the frozen one.
    pub fn engine_modified(&self, store: &dyn AttributeStore) -> bool {
        match (self.engine.get(), store.attribute(ATTRIBUTE_ENGINE)) {
            (Some(frozen), Some(shared)) => match shared.downcast_ref::<Arc<E>>() {
                Some(current) => !Arc::ptr_eq(frozen, current),
                None => true,
            },
            _ => false,
        }
    }

    /// Whether the store now holds a different verifier than the frozen one.
    pub fn verifier_modified(&self, store: &dyn AttributeStore) -> bool {
        match (self.verifier.get(), store.attribute(ATTRIBUTE_VERIFIER)) {
            (Some(frozen), Some(shared)) => {
                match shared.downcast_ref::<Arc<dyn JwtVerifier>>() {
                    Some(current) => !Arc::ptr_eq(frozen, current),
                    None => true,
                }
            }
            _ => false,
        }
    }

    /// Whether the store now holds different exclusions than the frozen ones.
    pub fn exclusions_modified(&self, store: &dyn AttributeStore) -> bool {
        match (self.exclusions.get(), store.attribute(ATTRIBUTE_PATH_EXCLUSIONS)) {
            (Some(frozen), Some(shared)) => {
                match shared.downcast_ref::<Arc<Vec<PathExclusion>>>() {
                    Some(current) => !Arc::ptr_eq(frozen, current),
                    None => true,
                }
            }
            _ => false,
        }
    }

    /// Logs a warning for every frozen slot whose shared attribute has been
    /// swapped out since freezing. Suppressed when multiple configurations
    /// are expected.
    pub fn warn_if_modified(&self, store: &dyn AttributeStore) {
        if self.allow_multiple_configs {
            return;
        }
        if self.engine_modified(store) {
            tracing::warn!(
                "shared attribute {} changed after this filter froze its engine; \
                 the original engine remains in use",
                ATTRIBUTE_ENGINE
            );
        }
        if self.verifier_modified(store) {
            tracing::warn!(
                "shared attribute {} changed after this filter froze its verifier; \
                 the original verifier remains in use",
                ATTRIBUTE_VERIFIER
            );
        }
        if self.exclusions_modified(store) {
            tracing::warn!(
                "shared attribute {} changed after this filter froze its path \
                 exclusions; the original exclusions remain in use",
                ATTRIBUTE_PATH_EXCLUSIONS
            );
        }
    }
}
