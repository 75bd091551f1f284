use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{extract::State, routing::get, Router};
use deploycheck::probe::base_uri;
use deploycheck::runtime::RuntimeError;
use deploycheck::{
    ActivationContext, ActivationOutcome, Activator, Event, LocalModuleRuntime, ModuleDescriptor,
    ModuleRuntime, ScenarioError, ScenarioSettings, WebAppScenario,
};
use tokio_util::sync::CancellationToken;

const LOCATION: &str = "file:///helloworld.war";

/// Per-path hit counters of the fake web application.
#[derive(Default)]
struct Hits {
    helloworld: AtomicUsize,
    another: AtomicUsize,
    additional: AtomicUsize,
}

struct FakeApp {
    hits: Arc<Hits>,
    port: u16,
    cancel: CancellationToken,
}

impl Drop for FakeApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Serve the three resources under `/helloworld`; `another_body` replaces
/// the body of the second one.
async fn spawn_fake_app(another_body: &'static str) -> FakeApp {
    let hits = Arc::new(Hits::default());
    let resources = Router::new()
        .route(
            "/webresources/helloworld",
            get(|State(h): State<Arc<Hits>>| async move {
                h.helloworld.fetch_add(1, Ordering::SeqCst);
                "Hello World"
            }),
        )
        .route(
            "/webresources/another",
            get(move |State(h): State<Arc<Hits>>| async move {
                h.another.fetch_add(1, Ordering::SeqCst);
                another_body
            }),
        )
        .route(
            "/webresources/additional",
            get(|State(h): State<Arc<Hits>>| async move {
                h.additional.fetch_add(1, Ordering::SeqCst);
                "Additional Bundle!"
            }),
        );
    let app = Router::new()
        .nest("/helloworld", resources)
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    FakeApp { hits, port, cancel }
}

/// Posts the deployment event when started, unless told to stay silent.
struct Announcer {
    announce: bool,
}

#[async_trait]
impl Activator for Announcer {
    async fn start(&self, ctx: &ActivationContext) -> anyhow::Result<()> {
        if self.announce {
            ctx.events.post_event(Event::new("jersey/test/DEPLOYED")?);
        }
        Ok(())
    }

    async fn stop(&self, _ctx: &ActivationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Activator for Failing {
    async fn start(&self, _ctx: &ActivationContext) -> anyhow::Result<()> {
        anyhow::bail!("unresolved requirement")
    }

    async fn stop(&self, _ctx: &ActivationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

fn runtime_with_app(announce: bool) -> Arc<LocalModuleRuntime> {
    let runtime = Arc::new(LocalModuleRuntime::default());
    runtime.register_location(
        LOCATION,
        ModuleDescriptor::new("org.example.war-bundle", "1.0.0"),
        Some(Arc::new(Announcer { announce })),
    );
    runtime
}

fn scenario(runtime: &Arc<LocalModuleRuntime>, port: u16) -> WebAppScenario {
    let base = base_uri("127.0.0.1", port, "/helloworld").unwrap();
    WebAppScenario::new(
        runtime.clone(),
        Arc::new(runtime.events().clone()),
        ScenarioSettings::new(base, LOCATION),
    )
}

#[tokio::test]
async fn all_bodies_match() {
    let app = spawn_fake_app("Another").await;
    let runtime = runtime_with_app(true);

    let report = scenario(&runtime, app.port).run().await.unwrap();

    assert_eq!(report.deployed.symbolic_name, "org.example.war-bundle");
    assert_eq!(
        report.responses.iter().map(|r| r.step).collect::<Vec<_>>(),
        [1, 2, 3]
    );
    assert!(report.responses[0]
        .url
        .ends_with("/helloworld/webresources/helloworld"));
    assert_eq!(app.hits.helloworld.load(Ordering::SeqCst), 1);
    assert_eq!(app.hits.another.load(Ordering::SeqCst), 1);
    assert_eq!(app.hits.additional.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.events().subscription_count(), 0);
}

#[tokio::test]
async fn missing_deployment_event_times_out() {
    let app = spawn_fake_app("Another").await;
    let runtime = runtime_with_app(false);
    let max_wait = Duration::from_secs(1);
    let scenario = WebAppScenario::new(
        runtime.clone(),
        Arc::new(runtime.events().clone()),
        ScenarioSettings::new(base_uri("127.0.0.1", app.port, "/helloworld").unwrap(), LOCATION)
            .with_max_wait(max_wait),
    );

    let started = Instant::now();
    let err = scenario.run().await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        ScenarioError::DeploymentTimeout { topic, waited } => {
            assert_eq!(topic, "jersey/test/DEPLOYED");
            assert_eq!(waited, max_wait);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= max_wait);
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(app.hits.helloworld.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.events().subscription_count(), 0);
}

#[tokio::test]
async fn mismatch_stops_at_the_failing_step() {
    let app = spawn_fake_app("Wrong").await;
    let runtime = runtime_with_app(true);

    let err = scenario(&runtime, app.port).run().await.unwrap_err();

    match err {
        ScenarioError::ResponseMismatch {
            step,
            path,
            expected,
            actual,
            ..
        } => {
            assert_eq!(step, 2);
            assert_eq!(path, "webresources/another");
            assert_eq!(expected, "Another");
            assert_eq!(actual, "Wrong");
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(app.hits.helloworld.load(Ordering::SeqCst), 1);
    assert_eq!(app.hits.another.load(Ordering::SeqCst), 1);
    assert_eq!(app.hits.additional.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_location_is_an_install_error() {
    let runtime = Arc::new(LocalModuleRuntime::default());

    let err = scenario(&runtime, 1).run().await.unwrap_err();

    let install = match err {
        ScenarioError::Install(install) => install,
        other => panic!("expected install error, got {other:?}"),
    };
    assert_eq!(install.location, LOCATION);
    assert!(matches!(
        install.source.downcast_ref::<RuntimeError>(),
        Some(RuntimeError::UnknownLocation(_))
    ));
    assert_eq!(runtime.events().subscription_count(), 0);
}

#[tokio::test]
async fn failing_secondary_module_is_not_fatal() {
    let app = spawn_fake_app("Another").await;
    let runtime = runtime_with_app(true);
    runtime.register_location(
        "file:///broken.jar",
        ModuleDescriptor::new("org.example.broken", "0.1"),
        Some(Arc::new(Failing)),
    );
    runtime.install("file:///broken.jar").await.unwrap();

    let report = scenario(&runtime, app.port).run().await.unwrap();

    let failed: Vec<_> = report
        .activation
        .failures()
        .map(|r| r.module.symbolic_name.as_str())
        .collect();
    assert_eq!(failed, ["org.example.broken"]);
    assert!(report
        .activation
        .records
        .iter()
        .any(|r| r.module.location == LOCATION && r.outcome == ActivationOutcome::AlreadyActive));
    assert!(report.activation.render().contains("*FAILED*"));
}

#[tokio::test]
async fn unreachable_application_is_a_request_error() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let runtime = runtime_with_app(true);

    let err = scenario(&runtime, port).run().await.unwrap_err();

    assert!(matches!(err, ScenarioError::Request { step: 1, .. }), "{err:?}");
}
