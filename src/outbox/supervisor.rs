use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use super::publisher::{OutboxPublisher, ProcessingReport};

// ============================================================================
// Outbox Supervisor Actor
// ============================================================================
//
// Owns the two background loops of the outbox:
// - processing: drain due records every `processing_interval`
// - cleanup: delete old PUBLISHED records every `cleanup_interval`
//
// Both run as context intervals, so stopping the actor cancels them. A tick
// that arrives while the previous drain is still running is skipped.
//
// ============================================================================

pub struct OutboxSupervisor {
    publisher: Arc<OutboxPublisher>,
    processing: bool,
    processing_interval: Duration,
    cleanup_interval: Duration,
    retention: Duration,
    batch_size: usize,
}

impl OutboxSupervisor {
    pub fn new(publisher: Arc<OutboxPublisher>) -> Self {
        let config = publisher.config().clone();
        Self {
            publisher,
            processing: false,
            processing_interval: config.processing_interval,
            cleanup_interval: config.cleanup_interval,
            retention: config.retention,
            batch_size: config.batch_size,
        }
    }

    /// Start one drain unless a drain is already running.
    fn begin_drain(&mut self) -> Option<ResponseActFuture<Self, Result<ProcessingReport, String>>> {
        if self.processing {
            return None;
        }
        self.processing = true;

        let publisher = self.publisher.clone();
        let limit = self.batch_size;

        let drain = async move { publisher.process_pending(limit).await }
            .into_actor(self)
            .map(|result, act, _ctx| {
                act.processing = false;
                result.map_err(|e| {
                    tracing::error!(error = %e, "Outbox drain failed");
                    e.to_string()
                })
            });

        Some(Box::pin(drain))
    }

    fn tick(&mut self, ctx: &mut Context<Self>) {
        match self.begin_drain() {
            Some(drain) => {
                ctx.spawn(drain.map(|_, _, _| ()));
            }
            None => tracing::debug!("Previous outbox drain still running, skipping tick"),
        }
    }

    fn cleanup(&mut self, ctx: &mut Context<Self>) {
        let publisher = self.publisher.clone();
        let retention = self.retention;

        ctx.spawn(
            async move {
                if let Err(e) = publisher.cleanup_published(retention).await {
                    tracing::error!(error = %e, "Outbox cleanup failed");
                }
            }
            .into_actor(self),
        );
    }
}

impl Actor for OutboxSupervisor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            processing_interval_ms = self.processing_interval.as_millis() as u64,
            cleanup_interval_ms = self.cleanup_interval.as_millis() as u64,
            "OutboxSupervisor started"
        );

        ctx.run_interval(self.processing_interval, |act, ctx| act.tick(ctx));
        ctx.run_interval(self.cleanup_interval, |act, ctx| act.cleanup(ctx));
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("OutboxSupervisor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Drain now instead of waiting for the next tick. Rejected while a drain
/// is in flight.
#[derive(Message)]
#[rtype(result = "Result<ProcessingReport, String>")]
pub struct ProcessNow;

impl Handler<ProcessNow> for OutboxSupervisor {
    type Result = ResponseActFuture<Self, Result<ProcessingReport, String>>;

    fn handle(&mut self, _msg: ProcessNow, _ctx: &mut Self::Context) -> Self::Result {
        match self.begin_drain() {
            Some(drain) => drain,
            None => Box::pin(fut::ready(Err("outbox drain already in progress".to_string()))),
        }
    }
}

/// Stop both loops and the actor. Records left in PROCESSING stay there.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for OutboxSupervisor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        tracing::info!("OutboxSupervisor received shutdown signal");
        ctx.stop();
    }
}
