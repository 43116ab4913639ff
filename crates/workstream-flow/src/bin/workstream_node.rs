//! All-in-one workstream node.
//!
//! Runs the validator, the orchestrator, and the built-in workers as
//! consumer loops over a shared in-memory substrate. Useful for demos and
//! smoke testing: seed an intake request with `WORKSTREAM_SEED_REQUEST` and
//! watch the backlog drain.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use workstream_core::observability::init_logging;
use workstream_core::ProjectId;

use workstream_flow::config::Settings;
use workstream_flow::consumer::{EventHandler, StreamConsumer};
use workstream_flow::envelope::{Envelope, EventPayload, InitialRequestPayload};
use workstream_flow::error::Result;
use workstream_flow::orchestrator::Orchestrator;
use workstream_flow::publish::StreamPublisher;
use workstream_flow::schema::SchemaRegistry;
use workstream_flow::substrate::memory::InMemorySubstrate;
use workstream_flow::validator::{ValidatorService, VALIDATOR_GROUP};
use workstream_flow::worker::agents::{ReportAgent, RequirementsAgent, TimeMetricsAgent};
use workstream_flow::worker::{WorkerAgent, WorkerRuntime};

fn install_metrics_exporter(settings: &Settings) {
    if let Some(addr) = settings.metrics_addr {
        let result = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install();
        match result {
            Ok(()) => info!(%addr, "prometheus exporter listening"),
            Err(error) => warn!(%error, "prometheus exporter failed to start"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    init_logging(settings.log_format);
    install_metrics_exporter(&settings);

    let registry = Arc::new(SchemaRegistry::load(&settings.schema_dir)?);
    let substrate = Arc::new(InMemorySubstrate::new());
    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    // Validator loop.
    let validator = ValidatorService::new(
        substrate.clone(),
        registry.clone(),
        settings.consumer_config(VALIDATOR_GROUP, &settings.consumer_name),
    );
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { validator.run(cancel).await });
    }

    // Orchestrator loop.
    let orchestrator: Arc<dyn EventHandler> =
        Arc::new(Orchestrator::new(substrate.clone(), &settings));
    let orchestrator_consumer = StreamConsumer::new(
        substrate.clone(),
        registry.clone(),
        orchestrator,
        settings.consumer_config("orchestrator", &settings.consumer_name),
    );
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { orchestrator_consumer.run(cancel).await });
    }

    // Worker loops, one per built-in agent.
    let agents: Vec<Arc<dyn WorkerAgent>> = vec![
        Arc::new(RequirementsAgent),
        Arc::new(TimeMetricsAgent),
        Arc::new(ReportAgent),
    ];
    for agent in agents {
        let runtime = WorkerRuntime::new(substrate.clone(), settings.stream_name.clone(), agent);
        let group = runtime.consumer_group();
        let handler: Arc<dyn EventHandler> = Arc::new(runtime);
        let consumer = StreamConsumer::new(
            substrate.clone(),
            registry.clone(),
            handler,
            settings.consumer_config(&group, &settings.consumer_name),
        );
        let cancel = cancel.clone();
        tasks.spawn(async move { consumer.run(cancel).await });
    }

    // Optional demo intake.
    if let Ok(request_text) = std::env::var("WORKSTREAM_SEED_REQUEST") {
        let publisher = StreamPublisher::new(substrate.clone(), settings.stream_name.clone());
        let envelope = Envelope::build(
            EventPayload::InitialRequestReceived(InitialRequestPayload {
                project_id: ProjectId::generate(),
                request_text,
            }),
            "node_seed",
        );
        publisher.publish(&envelope).await?;
        info!(event_id = %envelope.event_id, "seeded intake request");
    }

    info!("workstream node running; press ctrl-c to stop");
    if let Err(signal_error) = tokio::signal::ctrl_c().await {
        error!(%signal_error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, "service loop ended with error"),
            Err(join_error) => warn!(%join_error, "service task panicked"),
        }
    }

    Ok(())
}
