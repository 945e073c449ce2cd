//! Consume profile events from RabbitMQ, enrich them with their roadmap and publish the results.
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use roadmap_common::amqp::{AmqpBroker, Ingress};
use roadmap_common::health::{ComponentStatus, HealthRegistry};
use roadmap_common::metrics::{serve, setup_metrics_recorder, setup_metrics_router};
use roadmap_common::postgres::PgStore;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roadmap_worker::config::Config;
use roadmap_worker::error::WorkerError;
use roadmap_worker::service::{Collaborators, Service};
use roadmap_worker::signals::{Shutdown, ShutdownSignals};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness
        .register(
            "consumer".to_string(),
            time::Duration::seconds(config.liveness_deadline_secs),
        )
        .await;

    let recorder_handle =
        setup_metrics_recorder().map_err(|e| WorkerError::MetricsError(e.to_string()))?;
    let router = setup_metrics_router(recorder_handle, liveness.clone());
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve metrics: {}", e);
        }
    });

    let store = Arc::new(
        PgStore::new(
            &config.postgres.database_url(),
            config.max_pg_connections,
        )
        .await
        .map_err(WorkerError::StoreError)?,
    );
    if config.run_migrations {
        store.migrate().await.map_err(WorkerError::StoreError)?;
    }

    let broker = AmqpBroker::connect(&config.rabbitmq_url, config.topology())
        .await
        .map_err(WorkerError::BrokerError)?;
    broker.declare().await.map_err(WorkerError::BrokerError)?;
    let publisher = Arc::new(broker.publisher());

    let service = Service::new(
        config.service_options(),
        Collaborators {
            source: store.clone(),
            results: publisher.clone(),
            store: store.clone(),
            stats: publisher,
        },
    );

    // Without a cache there is nothing useful the workers could do.
    service.start().await?;

    let mut consumer = broker
        .consume(&config.consumer_tag)
        .await
        .map_err(WorkerError::BrokerError)?;

    let mut shutdown = ShutdownSignals::install().expect("failed to install signal handlers");
    let mut hangup = signal(SignalKind::hangup()).expect("failed to listen for SIGHUP");
    let mut heartbeat = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            received = shutdown.recv() => {
                match received {
                    Shutdown::Interrupt => info!("received SIGINT, shutting down"),
                    Shutdown::Terminate => info!("received SIGTERM, shutting down"),
                }
                break;
            }
            _ = hangup.recv() => {
                match service.reload_cache().await {
                    Ok(entries) => info!(entries, "roadmap cache reloaded"),
                    Err(e) => error!("failed to reload roadmap cache: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                if broker.is_connected() {
                    consumer_liveness.report_healthy().await;
                } else {
                    consumer_liveness.report_status(ComponentStatus::Unhealthy).await;
                }
            }
            delivery = consumer.next() => match delivery {
                Some(Ok(Ingress::Event(event))) => {
                    if let Err(e) = service.submit(event).await {
                        warn!(profile_id = event.profile_id, "failed to submit event: {}", e);
                        break;
                    }
                }
                Some(Ok(Ingress::Malformed(e))) => {
                    metrics::counter!("roadmap_ingress_malformed_total").increment(1);
                    warn!("failed to decode profile event: {}", e);
                }
                Some(Err(e)) => {
                    error!("failed to receive from RabbitMQ: {}", e);
                    break;
                }
                None => {
                    info!("RabbitMQ consumer was cancelled");
                    break;
                }
            }
        }
    }

    let snapshot = service.stop().await?;
    info!(count = snapshot.count, "roadmap worker stopped");

    if let Err(e) = broker.close().await {
        warn!("failed to close RabbitMQ connection: {}", e);
    }
    store.close().await;

    Ok(())
}
