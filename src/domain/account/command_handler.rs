use serde_json::Value;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::EventEnvelope;
use crate::event_sourcing::store::{EventStore, StreamOperation};
use crate::metrics::Metrics;
use crate::outbox::OutboxPublisher;

use super::aggregate::{Account, AccountAggregate};
use super::commands::AccountCommand;
use super::errors::AccountError;
use super::value_objects::AccountPolicy;

// ============================================================================
// Account Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Event Store → Outbox
//
// Transfers touch two streams and are committed with one
// `save_transaction`. Conflicts are returned to the caller untouched; the
// caller decides whether to retry the whole command.
//
// ============================================================================

pub struct AccountCommandHandler {
    event_store: Arc<EventStore>,
    policy: AccountPolicy,
    outbox: Option<Arc<OutboxPublisher>>,
    metrics: Option<Arc<Metrics>>,
}

impl AccountCommandHandler {
    pub fn new(event_store: Arc<EventStore>, policy: AccountPolicy) -> Self {
        Self {
            event_store,
            policy,
            outbox: None,
            metrics: None,
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<OutboxPublisher>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parse a named command and run it against `stream_id`.
    pub async fn execute(&self, command_name: &str, stream_id: &str, payload: &Value) -> LedgerResult<Vec<EventEnvelope>> {
        let command = AccountCommand::from_request(command_name, payload)?;
        self.handle(stream_id, command).await
    }

    /// Run a command and return the events it committed.
    pub async fn handle(&self, stream_id: &str, command: AccountCommand) -> LedgerResult<Vec<EventEnvelope>> {
        let name = command.name();
        let result = match command {
            AccountCommand::TransferCoins { to_account_id, amount } => {
                self.transfer(stream_id, &to_account_id, amount).await
            }
            other => self.handle_single(stream_id, other).await,
        };

        self.observe(name, stream_id, &result);

        let events = result?;
        self.stage(&events).await;
        Ok(events)
    }

    async fn load(&self, stream_id: &str) -> LedgerResult<AccountAggregate> {
        let root = self.event_store.load_aggregate::<Account>(stream_id).await?;
        Ok(AccountAggregate::from_root(root, self.policy))
    }

    async fn handle_single(&self, stream_id: &str, command: AccountCommand) -> LedgerResult<Vec<EventEnvelope>> {
        let mut account = self.load(stream_id).await?;

        match command {
            AccountCommand::CreateAccount { initial_coins } => account.create(initial_coins)?,
            AccountCommand::AddCoins { amount } => account.add_coins(amount)?,
            AccountCommand::DeductCoins { amount } => account.deduct_coins(amount)?,
            AccountCommand::SetCoins { coins } => account.set_coins(coins)?,
            AccountCommand::DeleteAccount => account.delete()?,
            AccountCommand::TransferCoins { .. } => {
                return Err(LedgerError::invalid_argument("transfers span two streams"));
            }
        };

        let events = account.uncommitted().to_vec();
        self.event_store.save_aggregate(account.root_mut()).await?;
        Ok(events)
    }

    async fn transfer(&self, from_id: &str, to_id: &str, amount: i64) -> LedgerResult<Vec<EventEnvelope>> {
        if from_id == to_id {
            return Err(AccountError::SelfTransfer(from_id.to_string()).into());
        }

        let mut source = self.load(from_id).await?;
        let mut destination = self.load(to_id).await?;

        source.transfer_out(to_id, amount)?;
        destination.receive(from_id, amount)?;

        let operations = [
            StreamOperation::new(from_id, source.uncommitted().to_vec()),
            StreamOperation::new(to_id, destination.uncommitted().to_vec()),
        ];
        self.event_store.save_transaction(&operations).await?;

        source.root_mut().mark_committed();
        destination.root_mut().mark_committed();

        tracing::info!(
            from_account = %from_id,
            to_account = %to_id,
            amount = amount,
            "Transfer committed"
        );

        let [debit, credit] = operations;
        let mut events = debit.events;
        events.extend(credit.events);
        Ok(events)
    }

    /// Hand committed events to the outbox. The commit already happened, so
    /// a staging failure is logged and not returned.
    async fn stage(&self, events: &[EventEnvelope]) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        if let Err(e) = outbox.publish_many(events).await {
            tracing::error!(
                error = %e,
                event_count = events.len(),
                "Failed to stage committed events in outbox"
            );
        }
    }

    fn observe(&self, command: &str, stream_id: &str, result: &LedgerResult<Vec<EventEnvelope>>) {
        match result {
            Ok(events) => {
                tracing::info!(
                    command = command,
                    stream_id = %stream_id,
                    event_count = events.len(),
                    "Command handled"
                );
            }
            Err(e) if e.is_concurrency_conflict() => {
                tracing::warn!(command = command, stream_id = %stream_id, error = %e, "Command lost a concurrency race");
            }
            Err(e) => {
                tracing::debug!(command = command, stream_id = %stream_id, error = %e, "Command rejected");
            }
        }

        let Some(metrics) = &self.metrics else {
            return;
        };
        match result {
            Ok(_) => metrics.record_command(command, "ok"),
            Err(e) => {
                metrics.record_command(command, e.kind());
                if e.is_concurrency_conflict() {
                    metrics.record_conflict(command);
                }
                if matches!(e, LedgerError::Transaction { .. }) {
                    metrics.record_rollback();
                }
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
