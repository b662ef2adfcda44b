use relaykit::cache::{CacheConfig, InMemorySharedStore, LayeredCache, SharedStore};
use relaykit::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use relaykit::circuit_breaker_registry::{CircuitBreakerRegistry, RegistryError};
use relaykit::presets;
use std::sync::Arc;

#[derive(Debug)]
struct Bounced;

impl std::fmt::Display for Bounced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "550 mailbox unavailable")
    }
}

impl std::error::Error for Bounced {}

fn opts(threshold: usize) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder().failure_threshold(threshold).build().unwrap()
}

#[tokio::test]
async fn same_name_returns_same_instance_with_first_config() {
    let registry = CircuitBreakerRegistry::new();

    let a = registry.get_circuit_breaker("providerX", Some(opts(2))).await;
    let b = registry.get_circuit_breaker("providerX", Some(opts(7))).await;

    assert!(a.same_instance(&b));
    assert_eq!(b.config().failure_threshold(), 2);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn concurrent_creation_yields_one_breaker() {
    let registry = CircuitBreakerRegistry::new();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_circuit_breaker("shared", None).await })
        })
        .collect();

    let mut breakers = Vec::new();
    for handle in handles {
        breakers.push(handle.await.unwrap());
    }
    assert!(breakers.windows(2).all(|w| w[0].same_instance(&w[1])));
    assert_eq!(registry.names(), vec!["shared".to_string()]);
}

#[tokio::test]
async fn health_reflects_open_breakers() {
    let registry = CircuitBreakerRegistry::with_email_providers().await;
    assert_eq!(registry.names(), vec!["resend", "sendgrid", "smtp"]);
    assert!(registry.get_health_status().healthy);

    let resend = registry.get(presets::RESEND).unwrap();
    for _ in 0..resend.config().failure_threshold() {
        let _ = resend.execute(|| async { Err::<(), _>(Bounced) }).await;
    }

    let health = registry.get_health_status();
    assert!(!health.healthy);
    assert_eq!(health.open, vec!["resend".to_string()]);
    assert_eq!(health.breakers[presets::SMTP], CircuitState::Closed);
    assert_eq!(registry.log_unhealthy(), vec!["resend".to_string()]);

    let stats = registry.get_all_stats();
    assert_eq!(stats[presets::RESEND].failure_count, resend.config().failure_threshold());

    registry.reset_all();
    assert!(registry.get_health_status().healthy);
}

#[tokio::test]
async fn unknown_names_are_reported() {
    let registry = CircuitBreakerRegistry::new();
    assert_eq!(
        registry.force_open("nope"),
        Err(RegistryError::NotFound { name: "nope".into() })
    );
    assert!(registry.reset("nope").is_err());
    assert!(registry.get("nope").is_none());
}

#[tokio::test]
async fn register_keeps_first_instance() {
    let registry = CircuitBreakerRegistry::new();
    let first = registry.register(CircuitBreaker::new("sms", opts(1)));
    let second = registry.register(CircuitBreaker::new("sms", opts(9)));
    assert!(first.same_instance(&second));
}

#[tokio::test]
async fn open_state_survives_restart_through_shared_cache() {
    let store: Arc<dyn SharedStore> = Arc::new(InMemorySharedStore::new());

    let before = CircuitBreakerRegistry::with_snapshot_cache(
        LayeredCache::builder(CacheConfig::default()).shared_store(store.clone()).build(),
    );
    let breaker = before.get_circuit_breaker("sendgrid", Some(opts(1))).await;
    let _ = breaker.execute(|| async { Err::<(), _>(Bounced) }).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // Fresh process: new registry and new in-process cache, same shared store.
    let after = CircuitBreakerRegistry::with_snapshot_cache(
        LayeredCache::builder(CacheConfig::default()).shared_store(store).build(),
    );
    let restored = after.get_circuit_breaker("sendgrid", Some(opts(1))).await;
    assert_eq!(restored.state(), CircuitState::Open);
    assert_eq!(restored.failure_count(), 1);
}
