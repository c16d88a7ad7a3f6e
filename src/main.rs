use actix::prelude::*;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coin_ledger::config::LedgerConfig;
use coin_ledger::domain::account::{AccountCommand, AccountCommandHandler, AccountQueryHandler};
use coin_ledger::event_sourcing::{EventStore, ScyllaBackend};
use coin_ledger::metrics::{self, Metrics};
use coin_ledger::outbox::{KafkaTransport, OutboxPublisher, OutboxSupervisor, PgOutboxRepository, Shutdown};
use coin_ledger::utils::{retry_with_backoff, RetryConfig};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coin_ledger=debug"))
        )
        .init();

    let config = LedgerConfig::from_env()?;
    tracing::info!(
        scylla = %config.scylla.known_node,
        kafka = %config.kafka.brokers,
        topic = %config.kafka.topic,
        "Starting coin ledger"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    // === 2. Event store on ScyllaDB ===
    tracing::info!("Connecting to ScyllaDB...");
    let node = config.scylla.known_node.clone();
    let session: Session = retry_with_backoff(RetryConfig::startup(), |_| {
        let node = node.clone();
        async move { SessionBuilder::new().known_node(node).build().await }
    })
    .await
    .into_result()?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                config.scylla.keyspace
            ),
            &[],
        )
        .await?;
    session.use_keyspace(&config.scylla.keyspace, false).await?;

    let event_store = Arc::new(EventStore::new(Arc::new(ScyllaBackend::new(Arc::new(session)))));

    // === 3. Outbox on Postgres, delivered to Kafka ===
    tracing::info!("Connecting to Postgres...");
    let url = config.postgres.url.clone();
    let max_connections = config.postgres.max_connections;
    let pool = retry_with_backoff(RetryConfig::startup(), |_| {
        let url = url.clone();
        async move { PgPoolOptions::new().max_connections(max_connections).connect(&url).await }
    })
    .await
    .into_result()?;

    let transport = Arc::new(KafkaTransport::new(&config.kafka, Some(metrics.clone()))?);
    let publisher = Arc::new(
        OutboxPublisher::new(
            Arc::new(PgOutboxRepository::new(pool)),
            transport,
            config.outbox.to_outbox_config(),
        )
        .with_metrics(metrics.clone()),
    );
    let supervisor = OutboxSupervisor::new(publisher.clone()).start();

    // === 4. Account handlers ===
    let commands = AccountCommandHandler::new(event_store.clone(), config.account_policy)
        .with_outbox(publisher)
        .with_metrics(metrics);
    let queries = AccountQueryHandler::new(event_store);

    // === 5. Smoke transfer between two fresh accounts ===
    let alice = format!("acc-{}", uuid::Uuid::new_v4());
    let bob = format!("acc-{}", uuid::Uuid::new_v4());
    commands.handle(&alice, AccountCommand::CreateAccount { initial_coins: 100 }).await?;
    commands
        .handle(&alice, AccountCommand::TransferCoins { to_account_id: bob.clone(), amount: 25 })
        .await?;
    tracing::info!(
        from_balance = queries.get_balance(&alice).await?,
        to_balance = queries.get_balance(&bob).await?,
        "Smoke transfer committed"
    );

    tracing::info!("Coin ledger ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    supervisor.send(Shutdown).await?;

    Ok(())
}
