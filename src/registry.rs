//! Named strategy registry.
//!
//! A [`StrategyRegistry`] maps `(capability type, strategy name)` to a shared
//! implementation instance. Capability types are zero-sized marker types that
//! implement [`Capability`], so a lookup always returns the trait object the
//! capability promises and never a value of some other family.
//!
//! Registration happens once, at startup, from an explicit composition root.
//! Lookups afterwards are read-only and may run from any number of threads.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strategy_ratelimit::registry::{Capability, StrategyRegistry};
//!
//! trait Translator: Send + Sync {
//!     fn translate(&self, text: &str) -> String;
//! }
//!
//! struct TranslationBackend;
//!
//! impl Capability for TranslationBackend {
//!     const NAME: &'static str = "translation backend";
//!     type Strategy = dyn Translator;
//! }
//!
//! let registry = StrategyRegistry::new();
//! registry.register::<TranslationBackend>("upper", Arc::new(Upper))?;
//! let backend = registry.resolve::<TranslationBackend>("upper")?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{RateLimitError, Result};

/// A family of interchangeable behaviours.
///
/// Implemented by marker types. `Strategy` is usually a `dyn Trait`.
pub trait Capability: 'static {
    /// Human readable capability name, used in errors and logs.
    const NAME: &'static str;

    /// The implementation type stored for this capability.
    type Strategy: ?Sized + Send + Sync + 'static;
}

/// What happens when a `(capability, name)` pair is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail with [`RateLimitError::DuplicateStrategy`] and keep the first binding.
    #[default]
    Reject,
    /// Replace the previous binding with the new one.
    Replace,
}

type Bindings = HashMap<String, Box<dyn Any + Send + Sync>>;

/// Process-wide table of named strategies.
///
/// Share it as `Arc<StrategyRegistry>` from the composition root.
pub struct StrategyRegistry {
    tables: RwLock<HashMap<TypeId, Bindings>>,
    duplicate_policy: DuplicatePolicy,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.len())
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Create an empty registry that rejects duplicate registrations.
    pub fn new() -> Self {
        Self::with_duplicate_policy(DuplicatePolicy::Reject)
    }

    /// Create an empty registry with an explicit duplicate policy.
    pub fn with_duplicate_policy(duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            duplicate_policy,
        }
    }

    /// The duplicate policy in effect.
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Bind `name` to `strategy` under capability `C`.
    ///
    /// Names are case-sensitive.
    pub fn register<C: Capability>(
        &self,
        name: impl Into<String>,
        strategy: Arc<C::Strategy>,
    ) -> Result<()> {
        let name = name.into();
        let mut tables = self.tables.write();
        let bindings = tables.entry(TypeId::of::<C>()).or_default();

        if bindings.contains_key(&name) {
            match self.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(capability = C::NAME, name = %name, "Rejected duplicate strategy registration");
                    return Err(RateLimitError::DuplicateStrategy {
                        capability: C::NAME,
                        name,
                    });
                }
                DuplicatePolicy::Replace => {
                    debug!(capability = C::NAME, name = %name, "Replacing registered strategy");
                }
            }
        } else {
            debug!(capability = C::NAME, name = %name, "Registered strategy");
        }

        bindings.insert(name, Box::new(strategy));
        Ok(())
    }

    /// Look up the strategy bound to `name` under capability `C`.
    ///
    /// Fails with [`RateLimitError::NoSuchStrategy`] when nothing is bound.
    pub fn resolve<C: Capability>(&self, name: &str) -> Result<Arc<C::Strategy>> {
        self.lookup::<C>(name)
            .ok_or_else(|| RateLimitError::NoSuchStrategy {
                capability: C::NAME,
                name: name.to_string(),
            })
    }

    /// Look up `name`, returning `fallback` when nothing is bound.
    ///
    /// Only for call sites that have a documented default behaviour.
    pub fn resolve_or_default<C: Capability>(
        &self,
        name: &str,
        fallback: Arc<C::Strategy>,
    ) -> Arc<C::Strategy> {
        self.lookup::<C>(name).unwrap_or_else(|| {
            debug!(capability = C::NAME, name, "Strategy not registered, using fallback");
            fallback
        })
    }

    /// Whether `name` is bound under capability `C`.
    pub fn contains<C: Capability>(&self, name: &str) -> bool {
        self.tables
            .read()
            .get(&TypeId::of::<C>())
            .is_some_and(|bindings| bindings.contains_key(name))
    }

    /// Registered names for capability `C`, sorted.
    pub fn names<C: Capability>(&self) -> Vec<String> {
        let tables = self.tables.read();
        let mut names: Vec<String> = tables
            .get(&TypeId::of::<C>())
            .map(|bindings| bindings.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Total number of bindings across all capabilities.
    pub fn len(&self) -> usize {
        self.tables.read().values().map(HashMap::len).sum()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup<C: Capability>(&self, name: &str) -> Option<Arc<C::Strategy>> {
        let tables = self.tables.read();
        tables
            .get(&TypeId::of::<C>())?
            .get(name)?
            .downcast_ref::<Arc<C::Strategy>>()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct Hola;
    impl Greeter for Hola {
        fn greet(&self) -> String {
            "hola".into()
        }
    }

    struct Greeting;
    impl Capability for Greeting {
        const NAME: &'static str = "greeting";
        type Strategy = dyn Greeter;
    }

    struct Farewell;
    impl Capability for Farewell {
        const NAME: &'static str = "farewell";
        type Strategy = dyn Greeter;
    }

    #[test]
    fn test_resolve_returns_registered_instance() {
        let registry = StrategyRegistry::new();
        let hello: Arc<dyn Greeter> = Arc::new(Hello);
        registry.register::<Greeting>("en", hello.clone()).unwrap();

        let resolved = registry.resolve::<Greeting>("en").unwrap();
        assert!(Arc::ptr_eq(&resolved, &hello));
        assert_eq!(resolved.greet(), "hello");
    }

    #[test]
    fn test_resolve_missing_fails() {
        let registry = StrategyRegistry::new();
        registry.register::<Greeting>("en", Arc::new(Hello)).unwrap();

        let err = registry.resolve::<Greeting>("fr").err().unwrap();
        assert!(matches!(
            err,
            RateLimitError::NoSuchStrategy { capability: "greeting", ref name } if name == "fr"
        ));
    }

    #[test]
    fn test_capabilities_are_separate_namespaces() {
        let registry = StrategyRegistry::new();
        registry.register::<Greeting>("en", Arc::new(Hello)).unwrap();
        registry.register::<Farewell>("en", Arc::new(Hola)).unwrap();

        assert_eq!(registry.resolve::<Greeting>("en").unwrap().greet(), "hello");
        assert_eq!(registry.resolve::<Farewell>("en").unwrap().greet(), "hola");
        assert!(registry.resolve::<Farewell>("es").is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let registry = StrategyRegistry::new();
        registry.register::<Greeting>("en", Arc::new(Hello)).unwrap();

        assert!(registry.contains::<Greeting>("en"));
        assert!(!registry.contains::<Greeting>("EN"));
        assert!(registry.resolve::<Greeting>("EN").is_err());
    }

    #[test]
    fn test_duplicate_rejected_keeps_first() {
        let registry = StrategyRegistry::new();
        let first: Arc<dyn Greeter> = Arc::new(Hello);
        registry.register::<Greeting>("x", first.clone()).unwrap();

        for _ in 0..3 {
            let err = registry.register::<Greeting>("x", Arc::new(Hola)).unwrap_err();
            assert!(matches!(err, RateLimitError::DuplicateStrategy { .. }));
        }
        assert!(Arc::ptr_eq(&registry.resolve::<Greeting>("x").unwrap(), &first));
    }

    #[test]
    fn test_duplicate_replace_keeps_last() {
        let registry = StrategyRegistry::with_duplicate_policy(DuplicatePolicy::Replace);
        registry.register::<Greeting>("x", Arc::new(Hello)).unwrap();

        let last: Arc<dyn Greeter> = Arc::new(Hola);
        registry.register::<Greeting>("x", last.clone()).unwrap();

        assert!(Arc::ptr_eq(&registry.resolve::<Greeting>("x").unwrap(), &last));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_or_default() {
        let registry = StrategyRegistry::new();
        registry.register::<Greeting>("en", Arc::new(Hello)).unwrap();
        let fallback: Arc<dyn Greeter> = Arc::new(Hola);

        let found = registry.resolve_or_default::<Greeting>("en", fallback.clone());
        assert_eq!(found.greet(), "hello");

        let defaulted = registry.resolve_or_default::<Greeting>("de", fallback.clone());
        assert!(Arc::ptr_eq(&defaulted, &fallback));
    }

    #[test]
    fn test_names_sorted() {
        let registry = StrategyRegistry::new();
        registry.register::<Greeting>("b", Arc::new(Hello)).unwrap();
        registry.register::<Greeting>("a", Arc::new(Hola)).unwrap();

        assert_eq!(registry.names::<Greeting>(), vec!["a", "b"]);
        assert!(registry.names::<Farewell>().is_empty());
    }
}
