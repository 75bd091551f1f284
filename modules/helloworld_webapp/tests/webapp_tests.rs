use std::sync::Arc;
use std::time::Duration;

use deploycheck::deploycheck_bootstrap::{
    AppConfig, BUNDLE_LOCATION_PROPERTY, CONTAINER_PORT_PROPERTY,
};
use deploycheck::options::configuration;
use deploycheck::{
    DeploymentGate, EventSource, GateHandler, LocalModuleRuntime, ModuleRuntime, ModuleState,
    ScenarioSettings, WebAppScenario,
};
use helloworld_webapp::{register, HelloWorldConfig};

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for(port: u16) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.host = "127.0.0.1".into();
    cfg.properties
        .insert(CONTAINER_PORT_PROPERTY.into(), port.to_string());
    cfg
}

#[tokio::test]
async fn scenario_passes_against_the_web_application() {
    let port = free_port().await;
    let cfg = config_for(port);
    let options = configuration(&cfg, Vec::new()).unwrap();
    let location = options
        .system_property(BUNDLE_LOCATION_PROPERTY)
        .unwrap()
        .to_string();

    let runtime = Arc::new(LocalModuleRuntime::default());
    let activator = register(&runtime, location.clone(), HelloWorldConfig::default());
    runtime.apply_options(&options).await.unwrap();

    let settings = ScenarioSettings::from_config(&cfg, &*runtime).unwrap();
    let scenario = WebAppScenario::new(
        runtime.clone(),
        Arc::new(runtime.events().clone()),
        settings,
    );

    let report = scenario.run().await.unwrap();

    assert_eq!(report.deployed.location, location);
    assert_eq!(
        report.deployed.symbolic_name,
        "org.glassfish.jersey.examples.osgi-helloworld-webapp.war-bundle"
    );
    let bodies: Vec<_> = report.responses.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, ["Hello World", "Another", "Additional Bundle!"]);
    assert_eq!(report.activation.failures().count(), 0);
    assert_eq!(activator.local_addr().map(|a| a.port()), Some(port));

    runtime.shutdown().await;
    assert!(activator.local_addr().is_none());
    assert!(runtime
        .modules()
        .iter()
        .skip(1)
        .all(|m| m.state() == ModuleState::Installed));
}

#[tokio::test]
async fn resources_served_under_context_path_until_stopped() {
    let runtime = LocalModuleRuntime::default();
    runtime.set_property("org.osgi.service.http.port", "0");
    let gate = Arc::new(DeploymentGate::new());
    runtime
        .events()
        .subscribe(
            &["jersey/test/DEPLOYED"],
            Arc::new(GateHandler::new("test", gate.clone())),
        )
        .unwrap();

    let config = HelloWorldConfig {
        context_path: "/hw".into(),
        ..Default::default()
    };
    let activator = register(&runtime, "file:///hw.war", config);
    let module = runtime.install("file:///hw.war").await.unwrap();
    module.start().await.unwrap();
    gate.await_ready(Duration::from_secs(5)).await.unwrap();

    let addr = activator.local_addr().unwrap();
    let client = reqwest::Client::new();
    let get = |path: &str| {
        let client = client.clone();
        let url = format!("http://{addr}{path}");
        async move { client.get(url).send().await }
    };

    let resp = get("/hw/webresources/another").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "Another");

    let resp = get("/helloworld/webresources/another").await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    module.stop().await.unwrap();
    assert!(activator.local_addr().is_none());
    assert!(get("/hw/webresources/another").await.is_err());
}

#[tokio::test]
async fn second_instance_on_a_taken_port_fails_to_start() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let runtime = LocalModuleRuntime::default();
    runtime.set_property("org.osgi.service.http.port", port.to_string());
    register(&runtime, "loc", HelloWorldConfig::default());

    let module = runtime.install("loc").await.unwrap();
    let err = module.start().await.unwrap_err();
    assert!(format!("{err:#}").contains("failed to bind"));
    assert_eq!(module.state(), ModuleState::Installed);
}
