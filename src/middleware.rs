//! The simulator middleware.

use crate::config::Config;
use crate::duration::HumanDuration;
use crate::effect::{self, Sleeper, TokioSleeper};
use crate::error::Error;
use crate::random::{ChaCha8Source, RandProvider};
use crate::request::RequestDescriptor;
use crate::response::ResponseSink;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What the middleware did with one request.
///
/// Handed to the next handler and returned from [`Middleware::handle`].
/// Requests that never went through the middleware are described by
/// [`MatchOutcome::UNMATCHED`], which is also the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Index of the matched resource
    pub matched: Option<usize>,
    /// Delay that was applied
    pub delay: Duration,
    /// Whether the response was replaced (the next handler did not run)
    pub replaced: bool,
}

impl MatchOutcome {
    pub const UNMATCHED: MatchOutcome = MatchOutcome {
        matched: None,
        delay: Duration::ZERO,
        replaced: false,
    };
}

/// Next stage of request handling.
#[async_trait]
pub trait Handler<S: ResponseSink>: Send + Sync {
    async fn serve(
        &self,
        request: &RequestDescriptor,
        outcome: MatchOutcome,
        response: &mut S,
    ) -> Result<(), S::Error>;
}

/// HTTP simulator middleware.
///
/// Matches each request against the current configuration snapshot, applies
/// the matched resource's effect, and forwards to `next` unless the response
/// was replaced.
pub struct Middleware<H> {
    next: H,
    config: ArcSwap<Config>,
    rand: Arc<dyn RandProvider>,
    sleeper: Arc<dyn Sleeper>,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests that matched a resource.
    requests_matched: AtomicU64,
    /// Total requests answered with a replacement.
    requests_replaced: AtomicU64,
}

impl<H> Middleware<H> {
    /// Create a middleware with an entropy-seeded random source and real
    /// sleeps.
    pub fn new(next: H, config: Config) -> Self {
        let source = ChaCha8Source::from_entropy();
        info!(
            resources = config.resources.len(),
            seed = %source.seed(),
            "HTTP simulator initialized"
        );
        Self {
            next,
            config: ArcSwap::from_pointee(config),
            rand: Arc::new(source),
            sleeper: Arc::new(TokioSleeper),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_replaced: AtomicU64::new(0),
        }
    }

    /// Replace the random source, e.g. with a fixed-seed one for tests.
    pub fn with_rand(mut self, rand: Arc<dyn RandProvider>) -> Self {
        self.rand = rand;
        self
    }

    /// Replace the sleeper, e.g. with a [`crate::effect::MeasuringSleeper`].
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Publish a new configuration.
    ///
    /// Safe to call while requests are in flight: those keep the snapshot
    /// they started with.
    pub fn set_config(&self, config: Config) {
        info!(resources = config.resources.len(), "Configuration published");
        self.config.store(Arc::new(config));
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Load, validate and publish a configuration file. The current
    /// configuration stays active if this fails.
    pub fn reload_from_file(&self, path: &Path) -> Result<(), Error> {
        match Config::from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration reloaded");
                self.set_config(config);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to reload configuration");
                Err(e)
            }
        }
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests replaced.
    pub fn total_replaced(&self) -> u64 {
        self.requests_replaced.load(Ordering::Relaxed)
    }

    /// Run one request through the simulator.
    ///
    /// Returns the outcome, which is also what `next` received if it ran.
    pub async fn handle<S>(
        &self,
        request: &RequestDescriptor,
        response: &mut S,
    ) -> Result<MatchOutcome, S::Error>
    where
        S: ResponseSink,
        H: Handler<S>,
    {
        self.handle_with(request, MatchOutcome::UNMATCHED, response)
            .await
    }

    /// Like [`Middleware::handle`], but an unmatched request forwards
    /// `inherited` instead of [`MatchOutcome::UNMATCHED`].
    async fn handle_with<S>(
        &self,
        request: &RequestDescriptor,
        inherited: MatchOutcome,
        response: &mut S,
    ) -> Result<MatchOutcome, S::Error>
    where
        S: ResponseSink,
        H: Handler<S>,
    {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        // One snapshot for the whole request.
        let config = self.config.load_full();

        let mut outcome = inherited;
        if let Some(index) = config.match_request(request) {
            self.requests_matched.fetch_add(1, Ordering::Relaxed);
            outcome = MatchOutcome {
                matched: Some(index),
                ..MatchOutcome::UNMATCHED
            };
            debug!(
                resource = index,
                method = %request.method(),
                path = %request.path(),
                "Request matched resource"
            );

            if let Some(effect) = &config.resources[index].effect {
                let applied =
                    effect::apply(effect, response, self.rand.as_ref(), self.sleeper.as_ref())
                        .await?;
                outcome.delay = applied.delay;
                outcome.replaced = applied.replaced;
            }
        }

        if outcome.replaced {
            self.requests_replaced.fetch_add(1, Ordering::Relaxed);
            return Ok(outcome);
        }

        debug!(
            matched = ?outcome.matched,
            delay = %HumanDuration(outcome.delay),
            "Forwarding request"
        );
        self.next.serve(request, outcome, response).await?;
        Ok(outcome)
    }
}

/// Middlewares nest. A request this middleware does not match keeps the
/// outcome of the enclosing one.
#[async_trait]
impl<S, H> Handler<S> for Middleware<H>
where
    S: ResponseSink,
    H: Handler<S>,
{
    async fn serve(
        &self,
        request: &RequestDescriptor,
        outcome: MatchOutcome,
        response: &mut S,
    ) -> Result<(), S::Error> {
        self.handle_with(request, outcome, response)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl<S, H> Handler<S> for Arc<H>
where
    S: ResponseSink,
    H: Handler<S> + ?Sized,
{
    async fn serve(
        &self,
        request: &RequestDescriptor,
        outcome: MatchOutcome,
        response: &mut S,
    ) -> Result<(), S::Error> {
        (**self).serve(request, outcome, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DurationRange, Effect, HttpMethod, Replace, Resource, StatusCode};
    use crate::effect::MeasuringSleeper;
    use crate::glob::GlobExpression;
    use crate::random::Seed;
    use crate::response::ResponseRecorder;
    use std::sync::Mutex;

    const SEED: &str = "fedcba9876543210fedcba9876543210";

    /// Next handler that records what it was called with.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<MatchOutcome>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<MatchOutcome> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<S: ResponseSink> Handler<S> for Recorder {
        async fn serve(
            &self,
            _request: &RequestDescriptor,
            outcome: MatchOutcome,
            _response: &mut S,
        ) -> Result<(), S::Error> {
            self.calls.lock().unwrap().push(outcome);
            Ok(())
        }
    }

    type Simulator = (Arc<MeasuringSleeper>, Arc<Recorder>, Middleware<Arc<Recorder>>);

    fn simulator(config: Config) -> Simulator {
        config.validate().unwrap();
        let sleeper = Arc::new(MeasuringSleeper::new());
        let next = Arc::new(Recorder::default());
        let rand = Arc::new(ChaCha8Source::new(Seed::from_bytes(SEED).unwrap()));
        let middleware = Middleware::new(next.clone(), config)
            .with_rand(rand)
            .with_sleeper(sleeper.clone());
        (sleeper, next, middleware)
    }

    fn delay_1s_2s() -> Option<DurationRange> {
        Some(DurationRange::new(Duration::from_secs(1), Duration::from_secs(2)))
    }

    #[test]
    fn test_outcome_default() {
        assert_eq!(MatchOutcome::default(), MatchOutcome::UNMATCHED);
        assert_eq!(MatchOutcome::default().matched, None);
        assert_eq!(MatchOutcome::default().delay, Duration::ZERO);
        assert!(!MatchOutcome::default().replaced);
    }

    #[tokio::test]
    async fn test_handle_delay() {
        let expected_delay = Duration::from_nanos(1_394_636_475);
        let config = Config {
            resources: vec![Resource {
                effect: Some(Effect {
                    delay: delay_1s_2s(),
                    replace: None,
                }),
                ..Default::default()
            }],
        };
        let (sleeper, next, sim) = simulator(config);
        let mut rec = ResponseRecorder::new();

        let outcome = sim
            .handle(&RequestDescriptor::new("GET", "/"), &mut rec)
            .await
            .unwrap();

        let expected = MatchOutcome {
            matched: Some(0),
            delay: expected_delay,
            replaced: false,
        };
        assert_eq!(outcome, expected);
        assert_eq!(next.calls(), vec![expected]);
        assert_eq!(sleeper.cumulative(), expected_delay);
        assert!(rec.headers().is_empty());
        assert_eq!(rec.status(), StatusCode::OK);
        assert!(!rec.is_committed());
        assert!(rec.body().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_delay_really_waits() {
        let config = Config {
            resources: vec![Resource {
                effect: Some(Effect {
                    delay: delay_1s_2s(),
                    replace: None,
                }),
                ..Default::default()
            }],
        };
        let next = Arc::new(Recorder::default());
        let sim = Middleware::new(next.clone(), config);
        let mut rec = ResponseRecorder::new();

        let start = tokio::time::Instant::now();
        let outcome = sim
            .handle(&RequestDescriptor::new("GET", "/"), &mut rec)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(outcome.delay >= Duration::from_secs(1));
        assert!(outcome.delay <= Duration::from_secs(2));
        assert!(elapsed >= outcome.delay);
        assert_eq!(next.calls().len(), 1);
        assert_eq!(rec, ResponseRecorder::new());
    }

    #[tokio::test]
    async fn test_handle_replace() {
        let config = Config {
            resources: vec![Resource {
                effect: Some(Effect {
                    delay: delay_1s_2s(),
                    replace: Some(
                        Replace::new(500)
                            .with_body("replaced body")
                            .with_header("X-CustomAdd", "added")
                            .with_header("X-CustomReplace", "replaced"),
                    ),
                }),
                ..Default::default()
            }],
        };
        let (sleeper, next, sim) = simulator(config);
        let mut rec = ResponseRecorder::new();

        let outcome = sim
            .handle(&RequestDescriptor::new("GET", "/"), &mut rec)
            .await
            .unwrap();

        assert!(outcome.replaced);
        assert!(next.calls().is_empty());
        assert_eq!(sleeper.cumulative(), Duration::from_nanos(1_394_636_475));
        assert_eq!(rec.headers().len(), 2);
        assert_eq!(rec.header("X-CustomAdd"), Some("added"));
        assert_eq!(rec.header("X-CustomReplace"), Some("replaced"));
        assert_eq!(rec.status(), StatusCode::from(500));
        assert_eq!(rec.body_string(), "replaced body");
        assert_eq!(sim.total_replaced(), 1);
    }

    #[tokio::test]
    async fn test_handle_replace_status_code_only() {
        let config = Config {
            resources: vec![Resource {
                effect: Some(Effect {
                    delay: None,
                    replace: Some(Replace::new(204)),
                }),
                ..Default::default()
            }],
        };
        let (sleeper, next, sim) = simulator(config);
        let mut rec = ResponseRecorder::new();

        sim.handle(&RequestDescriptor::new("GET", "/"), &mut rec)
            .await
            .unwrap();

        assert!(next.calls().is_empty());
        assert_eq!(sleeper.cumulative(), Duration::ZERO);
        assert!(rec.headers().is_empty());
        assert_eq!(rec.status(), StatusCode::from(204));
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_handle_specific_resource() {
        let yaml = r#"
resources:
  - path: /specific
    methods: [DELETE]
    effect:
      replace:
        status-code: 404
        body: "Specific resource not found"
        headers:
          Content-Type: text/plain
"#;
        let (_, next, sim) = simulator(Config::from_yaml(yaml).unwrap());

        let mut rec = ResponseRecorder::new();
        let outcome = sim
            .handle(&RequestDescriptor::new("DELETE", "/specific"), &mut rec)
            .await
            .unwrap();
        assert_eq!(outcome.matched, Some(0));
        assert_eq!(rec.status(), StatusCode::from(404));
        assert_eq!(rec.body_string(), "Specific resource not found");
        assert_eq!(rec.header("Content-Type"), Some("text/plain"));
        assert!(next.calls().is_empty());

        // Other methods pass through untouched.
        let mut rec = ResponseRecorder::new();
        let outcome = sim
            .handle(&RequestDescriptor::new("GET", "/specific"), &mut rec)
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::UNMATCHED);
        assert_eq!(next.calls(), vec![MatchOutcome::UNMATCHED]);
        assert_eq!(rec, ResponseRecorder::new());
    }

    #[tokio::test]
    async fn test_handle_no_match() {
        let config = Config {
            resources: vec![Resource {
                methods: vec![HttpMethod::from("DELETE")],
                effect: Some(Effect {
                    delay: delay_1s_2s(),
                    replace: Some(Replace::new(500).with_body("replaced body")),
                }),
                ..Default::default()
            }],
        };
        let (sleeper, next, sim) = simulator(config);
        let mut rec = ResponseRecorder::new();
        let request =
            RequestDescriptor::new("GET", "/").with_header("X-CustomReplace", "old value");

        let outcome = sim.handle(&request, &mut rec).await.unwrap();

        assert_eq!(outcome, MatchOutcome::UNMATCHED);
        assert_eq!(next.calls(), vec![MatchOutcome::UNMATCHED]);
        assert_eq!(sleeper.cumulative(), Duration::ZERO);
        assert_eq!(rec.status(), StatusCode::OK);
        assert!(rec.body().is_empty());
        assert_eq!(sim.total_requests(), 1);
        assert_eq!(sim.total_matched(), 0);
    }

    #[tokio::test]
    async fn test_handle_match_without_effect() {
        let config = Config {
            resources: vec![
                Resource {
                    path: GlobExpression::new("/health").unwrap(),
                    ..Default::default()
                },
                Resource {
                    effect: Some(Effect {
                        delay: None,
                        replace: Some(Replace::new(503)),
                    }),
                    ..Default::default()
                },
            ],
        };
        let (_, next, sim) = simulator(config);
        let mut rec = ResponseRecorder::new();

        let outcome = sim
            .handle(&RequestDescriptor::new("GET", "/health"), &mut rec)
            .await
            .unwrap();

        // The first resource shadows the catch-all behind it.
        let expected = MatchOutcome {
            matched: Some(0),
            ..MatchOutcome::UNMATCHED
        };
        assert_eq!(outcome, expected);
        assert_eq!(next.calls(), vec![expected]);
        assert!(!rec.is_committed());
    }

    #[tokio::test]
    async fn test_set_config_idempotent() {
        let config = Config::from_yaml(
            "resources:\n  - methods: [POST]\n    effect: { replace: { status-code: 429 } }\n",
        )
        .unwrap();
        let (_, _, sim) = simulator(Config::default());

        sim.set_config(config.clone());
        let mut first = ResponseRecorder::new();
        let a = sim.handle(&RequestDescriptor::new("POST", "/"), &mut first).await.unwrap();

        sim.set_config(config.clone());
        let mut second = ResponseRecorder::new();
        let b = sim.handle(&RequestDescriptor::new("POST", "/"), &mut second).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(first, second);
        assert_eq!(*sim.config(), config);
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let (_, _, sim) = simulator(Config::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("httpsim.yaml");

        std::fs::write(&path, "resources:\n  - path: /a\n").unwrap();
        sim.reload_from_file(&path).unwrap();
        assert_eq!(sim.config().resources.len(), 1);

        // A broken file leaves the previous snapshot in place.
        std::fs::write(&path, "resources:\n  - effect: {}\n").unwrap();
        assert!(sim.reload_from_file(&path).is_err());
        assert_eq!(sim.config().resources.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_middleware() {
        let inner_config = Config::from_yaml(
            "resources:\n  - path: /inner\n    effect: { replace: { status-code: 418 } }\n",
        )
        .unwrap();
        let next = Arc::new(Recorder::default());
        let inner = Middleware::new(next.clone(), inner_config)
            .with_sleeper(Arc::new(MeasuringSleeper::new()));
        let outer = Middleware::new(inner, Config::default());

        let mut rec = ResponseRecorder::new();
        let outcome = outer
            .handle(&RequestDescriptor::new("GET", "/inner"), &mut rec)
            .await
            .unwrap();

        assert_eq!(outcome, MatchOutcome::UNMATCHED);
        assert_eq!(rec.status(), StatusCode::from(418));
        assert!(next.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nested_middleware_keeps_outer_outcome() {
        let outer_config = Config::from_yaml(
            "resources:\n  - path: /x\n    effect: { delay: { min: 1s, max: 1s } }\n",
        )
        .unwrap();
        let inner_config = Config::from_yaml(
            "resources:\n  - path: /y\n    effect: { replace: { status-code: 418 } }\n",
        )
        .unwrap();
        let next = Arc::new(Recorder::default());
        let inner = Middleware::new(next.clone(), inner_config)
            .with_sleeper(Arc::new(MeasuringSleeper::new()));
        let outer =
            Middleware::new(inner, outer_config).with_sleeper(Arc::new(MeasuringSleeper::new()));

        let mut rec = ResponseRecorder::new();
        let outcome = outer
            .handle(&RequestDescriptor::new("GET", "/x"), &mut rec)
            .await
            .unwrap();

        let expected = MatchOutcome {
            matched: Some(0),
            delay: Duration::from_secs(1),
            replaced: false,
        };
        assert_eq!(outcome, expected);
        // The inner middleware matched nothing, so the outer outcome reaches
        // the handler untouched.
        assert_eq!(next.calls(), vec![expected]);
        assert!(!rec.is_committed());
    }

    #[tokio::test]
    async fn test_nested_middleware_inner_match_wins() {
        let outer_config = Config::from_yaml(
            "resources:\n  - effect: { delay: { min: 1s, max: 1s } }\n",
        )
        .unwrap();
        let inner_config = Config::from_yaml(
            "resources:\n  - path: /a\n  - path: /x\n    effect: { delay: { min: 2s, max: 2s } }\n",
        )
        .unwrap();
        let next = Arc::new(Recorder::default());
        let inner = Middleware::new(next.clone(), inner_config)
            .with_sleeper(Arc::new(MeasuringSleeper::new()));
        let outer =
            Middleware::new(inner, outer_config).with_sleeper(Arc::new(MeasuringSleeper::new()));

        let mut rec = ResponseRecorder::new();
        outer
            .handle(&RequestDescriptor::new("GET", "/x"), &mut rec)
            .await
            .unwrap();

        let expected = MatchOutcome {
            matched: Some(1),
            delay: Duration::from_secs(2),
            replaced: false,
        };
        assert_eq!(next.calls(), vec![expected]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconfiguration_sees_whole_snapshots() {
        let config_a = Config::from_yaml(
            r#"
resources:
  - path: /x
    effect: { replace: { status-code: 500, body: "a", headers: { X-Snapshot: a } } }
"#,
        )
        .unwrap();
        let config_b = Config::from_yaml(
            r#"
resources:
  - path: /y
    effect: { replace: { status-code: 503, body: "b" } }
  - path: /x
    effect: { replace: { status-code: 502, body: "b", headers: { X-Snapshot: b } } }
"#,
        )
        .unwrap();

        let (_, _, sim) = simulator(config_a.clone());
        let sim = Arc::new(sim);

        let writer = {
            let sim = sim.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let next = if i % 2 == 0 { config_b.clone() } else { config_a.clone() };
                    sim.set_config(next);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let sim = sim.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let mut rec = ResponseRecorder::new();
                    let outcome = sim
                        .handle(&RequestDescriptor::new("GET", "/x"), &mut rec)
                        .await
                        .unwrap();
                    let seen = (
                        outcome.matched,
                        rec.status().as_i64(),
                        rec.body_string(),
                        rec.header("X-Snapshot").map(str::to_string),
                    );
                    let a = (Some(0), 500, "a".to_string(), Some("a".to_string()));
                    let b = (Some(1), 502, "b".to_string(), Some("b".to_string()));
                    assert!(seen == a || seen == b, "torn snapshot: {seen:?}");
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(sim.total_requests(), 800);
        assert_eq!(sim.total_replaced(), 800);
    }
}
