use super::CircuitBreaker;
use crate::error::BreakerError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Tower layer guarding a service with a shared [`CircuitBreaker`].
///
/// Every service produced by the layer reports into the same breaker, so a
/// registry-owned breaker can protect several clients of one provider.
#[derive(Clone, Debug)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
}

impl CircuitBreakerLayer {
    /// Layer reporting into `breaker`.
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService { inner: service, breaker: self.breaker.clone() }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
#[derive(Clone, Debug)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S> CircuitBreakerService<S> {
    /// Breaker guarding this service.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<S, Req> Service<Req> for CircuitBreakerService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BreakerError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(BreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Take the instance that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let breaker = self.breaker.clone();
        Box::pin(async move { breaker.execute(move || inner.call(req)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::clock::ManualClock;
    use std::fmt;
    use std::time::Duration;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    #[derive(Debug)]
    struct Bounce;

    impl fmt::Display for Bounce {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "mailbox unavailable")
        }
    }

    impl std::error::Error for Bounce {}

    #[tokio::test]
    async fn layer_passes_through_success() {
        let breaker = CircuitBreaker::new("smtp", CircuitBreakerConfig::default());
        let svc = CircuitBreakerLayer::new(breaker.clone())
            .layer(service_fn(|n: u32| async move { Ok::<_, Bounce>(n * 2) }));
        assert_eq!(svc.oneshot(21).await.unwrap(), 42);
        assert_eq!(breaker.stats().success_count, 1);
    }

    #[tokio::test]
    async fn layer_trips_and_rejects_without_calling_inner() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .volume_threshold(2)
            .recovery_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let breaker = CircuitBreaker::builder("smtp", config).clock(ManualClock::new()).build();

        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = ServiceBuilder::new().layer(CircuitBreakerLayer::new(breaker.clone())).service(
            service_fn(move |fail: bool| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if fail {
                        Err(Bounce)
                    } else {
                        Ok("250 OK")
                    }
                }
            }),
        );

        for _ in 0..2 {
            let err = svc.clone().oneshot(true).await.unwrap_err();
            assert!(err.is_inner());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = svc.clone().oneshot(false).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
