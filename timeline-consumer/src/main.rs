//! Consume raw activity events from Kafka and materialize them into the timeline table.
use std::sync::Arc;

use common_kafka::kafka_consumer::KafkaSubscriber;
use envconfig::Envconfig;
use eyre::Result;
use timeline_common::metrics::{serve, setup_metrics_routes};
use timeline_common::store::{PgTimelineStore, MIGRATOR};
use timeline_common::TimelineStore;
use timeline_consumer::config::Config;
use timeline_consumer::error::ConsumerError;
use timeline_consumer::observer::TracingObserver;
use timeline_consumer::pipeline::PipelineDriver;
use timeline_consumer::probes::{self, ProbeContext};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = if json {
        fmt::layer().json().with_filter(filter).boxed()
    } else {
        fmt::layer().with_filter(filter).boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().map_err(ConsumerError::from)?;
    setup_tracing(config.log_json);
    info!("Starting up...");

    let store = PgTimelineStore::new(&config.database_url, config.max_pg_connections)
        .await
        .map_err(ConsumerError::from)?;
    if config.run_migrations {
        MIGRATOR
            .run(store.pool())
            .await
            .map_err(ConsumerError::from)?;
        info!("applied database migrations");
    }
    let store: Arc<dyn TimelineStore> = Arc::new(store);

    let shutdown = CancellationToken::new();
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };
        info!("Shutting down gracefully...");
        on_signal.cancel();
    });

    // Kafka is optional: without it the service still serves probes, the timeline just
    // stops receiving new entries.
    let subscriber = if config.kafka.is_configured() {
        match KafkaSubscriber::new(&config.kafka, &config.consumer) {
            Ok(subscriber) => Some(subscriber),
            Err(e) => {
                error!("failed to create kafka subscriber, pipeline disabled: {}", e);
                None
            }
        }
    } else {
        warn!("KAFKA_HOSTS is empty, pipeline disabled");
        None
    };

    let pipeline = subscriber.map(|subscriber| {
        PipelineDriver::new(subscriber, store.clone(), Arc::new(TracingObserver))
            .with_fetch_backoff(config.fetch_backoff_ms.0)
            .with_materialize_timeout(config.materialize_timeout_ms.map(|timeout| timeout.0))
    });

    let router = probes::router(ProbeContext {
        store: store.clone(),
        pipeline: pipeline.as_ref().map(PipelineDriver::state),
        shutdown: shutdown.clone(),
    });
    let router = setup_metrics_routes(router).map_err(ConsumerError::from)?;

    let bind = config.bind();
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(ConsumerError::from)?;
    info!("serving probes on {}", bind);
    let server = tokio::spawn(serve(listener, router, shutdown.clone().cancelled_owned()));

    if let Some(pipeline) = pipeline {
        let stats = tokio::spawn(pipeline.run(shutdown.clone())).await?;
        info!(?stats, "pipeline finished");
    }

    // The probe server outlives the pipeline and only stops on a signal.
    server.await?.map_err(ConsumerError::from)?;
    Ok(())
}
