//! Integration tests for the strategy registry with several capability types.

use std::sync::Arc;
use std::thread;

use strategy_ratelimit::{
    Capability, DuplicatePolicy, Quota, RateLimitAlgorithm, RateLimitError, RateLimiter,
    StrategyRegistry, Unrestricted,
};

trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> String;
}

struct Upper;
struct Reverse;

impl Translator for Upper {
    fn translate(&self, text: &str) -> String {
        text.to_uppercase()
    }
}

impl Translator for Reverse {
    fn translate(&self, text: &str) -> String {
        text.chars().rev().collect()
    }
}

struct TranslationBackend;

impl Capability for TranslationBackend {
    const NAME: &'static str = "translation backend";
    type Strategy = dyn Translator;
}

trait TableCreation: Send + Sync {
    fn ddl(&self, table: &str) -> Option<String>;
}

struct CreateIfMissing;

/// Fallback for unsupported selections: produces nothing.
struct Unsupported;

impl TableCreation for CreateIfMissing {
    fn ddl(&self, table: &str) -> Option<String> {
        Some(format!("CREATE TABLE IF NOT EXISTS {table}"))
    }
}

impl TableCreation for Unsupported {
    fn ddl(&self, _table: &str) -> Option<String> {
        None
    }
}

struct TableCreationStrategy;

impl Capability for TableCreationStrategy {
    const NAME: &'static str = "table-creation strategy";
    type Strategy = dyn TableCreation;
}

#[test]
fn test_resolve_returns_registered_instance() {
    let registry = StrategyRegistry::new();
    let upper: Arc<dyn Translator> = Arc::new(Upper);
    registry.register::<TranslationBackend>("upper", upper.clone()).unwrap();
    registry.register::<TranslationBackend>("reverse", Arc::new(Reverse) as Arc<dyn Translator>).unwrap();

    let resolved = registry.resolve::<TranslationBackend>("upper").unwrap();
    assert!(Arc::ptr_eq(&resolved, &upper));
    assert_eq!(resolved.translate("hola"), "HOLA");

    let resolved = registry.resolve::<TranslationBackend>("reverse").unwrap();
    assert_eq!(resolved.translate("abc"), "cba");
}

#[test]
fn test_never_registered_names_fail() {
    let registry = StrategyRegistry::new();
    registry.register::<TranslationBackend>("upper", Arc::new(Upper) as Arc<dyn Translator>).unwrap();

    for name in ["", "Upper", "UPPER", "upper ", "lower", "reverse"] {
        match registry.resolve::<TranslationBackend>(name) {
            Err(RateLimitError::NoSuchStrategy { capability, name: missing }) => {
                assert_eq!(capability, "translation backend");
                assert_eq!(missing, name);
            }
            Err(other) => panic!("unexpected error for '{name}': {other}"),
            Ok(_) => panic!("'{name}' should not resolve"),
        }
    }
}

#[test]
fn test_capabilities_do_not_see_each_other() {
    let registry = StrategyRegistry::new();
    registry.register::<TranslationBackend>("default", Arc::new(Upper) as Arc<dyn Translator>).unwrap();

    assert!(registry.contains::<TranslationBackend>("default"));
    assert!(!registry.contains::<TableCreationStrategy>("default"));
    assert!(registry.resolve::<TableCreationStrategy>("default").is_err());

    // Same name under another capability is not a duplicate.
    registry
        .register::<TableCreationStrategy>("default", Arc::new(CreateIfMissing) as Arc<dyn TableCreation>)
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_fallback_only_when_asked_for() {
    let registry = StrategyRegistry::new();
    registry
        .register::<TableCreationStrategy>("create", Arc::new(CreateIfMissing) as Arc<dyn TableCreation>)
        .unwrap();

    let fallback: Arc<dyn TableCreation> = Arc::new(Unsupported);
    let strategy = registry.resolve_or_default::<TableCreationStrategy>("drop_and_create", fallback);
    assert_eq!(strategy.ddl("users"), None);

    let strategy = registry.resolve_or_default::<TableCreationStrategy>("create", Arc::new(Unsupported) as Arc<dyn TableCreation>);
    assert_eq!(strategy.ddl("users").as_deref(), Some("CREATE TABLE IF NOT EXISTS users"));

    assert!(registry.resolve::<TableCreationStrategy>("drop_and_create").is_err());
}

#[test]
fn test_duplicate_policies_are_deterministic() {
    let reject = StrategyRegistry::new();
    let first: Arc<dyn Translator> = Arc::new(Upper);
    reject.register::<TranslationBackend>("t", first.clone()).unwrap();
    for _ in 0..10 {
        let err = reject
            .register::<TranslationBackend>("t", Arc::new(Reverse) as Arc<dyn Translator>)
            .unwrap_err();
        assert!(matches!(err, RateLimitError::DuplicateStrategy { .. }));
        assert!(Arc::ptr_eq(&reject.resolve::<TranslationBackend>("t").unwrap(), &first));
    }

    let replace = StrategyRegistry::with_duplicate_policy(DuplicatePolicy::Replace);
    for _ in 0..10 {
        let latest: Arc<dyn Translator> = Arc::new(Reverse);
        replace.register::<TranslationBackend>("t", latest.clone()).unwrap();
        assert!(Arc::ptr_eq(&replace.resolve::<TranslationBackend>("t").unwrap(), &latest));
    }
    assert_eq!(replace.len(), 1);
}

#[test]
fn test_concurrent_readers() {
    let registry = Arc::new(StrategyRegistry::new());
    registry.register::<TranslationBackend>("upper", Arc::new(Upper) as Arc<dyn Translator>).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let backend = registry.resolve::<TranslationBackend>("upper").unwrap();
                    assert_eq!(backend.translate("a"), "A");
                    assert!(registry.resolve::<TranslationBackend>(&format!("missing-{i}")).is_err());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_unrestricted_limiter_as_explicit_fallback() {
    let registry = StrategyRegistry::new();
    let limiter: Arc<dyn RateLimiter> =
        registry.resolve_or_default::<RateLimitAlgorithm>("not_configured", Arc::new(Unrestricted) as Arc<dyn RateLimiter>);

    let quota = Quota::per_second(1);
    let decisions = tokio_test::block_on(async {
        let mut decisions = Vec::new();
        for _ in 0..3 {
            decisions.push(limiter.acquire("k", &quota).await.unwrap());
        }
        decisions
    });

    assert!(decisions.iter().all(|d| d.is_allowed()));
    assert_eq!(decisions[0].info().algorithm, Some("unrestricted"));
}
