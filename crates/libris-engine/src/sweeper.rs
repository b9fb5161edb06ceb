//! # Expiration Sweeper
//!
//! Periodic task that expires lapsed reservations and then reconciles every
//! queue, which also recovers fulfillment signals the worker never saw.
//!
//! ```text
//! every sweep_interval ──► expire_reservations() ──► reconcile()
//! sweep_now()          ──┘
//! ```

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::{EngineError, EngineResult};
use crate::fulfillment::FulfillmentCoordinator;
use crate::reservations::ReservationQueueManager;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub fulfilled: usize,
}

pub struct ExpirationSweeper {
    queue: ReservationQueueManager,
    coordinator: FulfillmentCoordinator,
    interval: Duration,
    sweep_rx: mpsc::Receiver<oneshot::Sender<EngineResult<SweepReport>>>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for triggering and stopping the sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    sweep_tx: mpsc::Sender<oneshot::Sender<EngineResult<SweepReport>>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Runs a sweep now and waits for its report.
    pub async fn sweep_now(&self) -> EngineResult<SweepReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sweep_tx
            .send(reply_tx)
            .await
            .map_err(|_| EngineError::ShuttingDown)?;
        reply_rx
            .await
            .map_err(|_| EngineError::ChannelError("Sweeper dropped the reply".into()))?
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Shutdown channel closed".into()))
    }
}

impl ExpirationSweeper {
    /// Creates a sweeper and returns its handle.
    pub fn new(
        queue: ReservationQueueManager,
        coordinator: FulfillmentCoordinator,
        interval: Duration,
    ) -> (Self, SweeperHandle) {
        let (sweep_tx, sweep_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sweeper = ExpirationSweeper {
            queue,
            coordinator,
            interval,
            sweep_rx,
            shutdown_rx,
        };

        (sweeper, SweeperHandle { sweep_tx, shutdown_tx })
    }

    /// Runs the sweep loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Expiration sweeper starting");

        // First scheduled sweep one interval after start.
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Scheduled sweep failed");
                    }
                }

                Some(reply) = self.sweep_rx.recv() => {
                    let _ = reply.send(self.sweep().await);
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Expiration sweeper shutting down");
                    break;
                }
            }
        }

        info!("Expiration sweeper stopped");
    }

    async fn sweep(&self) -> EngineResult<SweepReport> {
        let expired = self.queue.expire_reservations().await?;
        let fulfilled = self.coordinator.reconcile().await?;

        let report = SweepReport { expired, fulfilled };
        debug!(?report, "Sweep finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_sweep_now_expires_then_fulfills() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let stale = fx.student(1).await;
        let fresh = fx.student(1).await;
        let queue = fx.queue();

        let first = queue.reserve_book(&stale.id, &book.id).await.unwrap().reservation;
        fx.clock.advance(ChronoDuration::days(5));
        let second = queue.reserve_book(&fresh.id, &book.id).await.unwrap().reservation;
        fx.clock.advance(ChronoDuration::days(3));
        fx.set_available(&book.id, 1).await;

        let (sweeper, handle) =
            ExpirationSweeper::new(queue.clone(), fx.coordinator(), Duration::from_secs(3600));
        let task = tokio::spawn(sweeper.run());

        let report = handle.sweep_now().await.unwrap();
        assert_eq!(report, SweepReport { expired: 1, fulfilled: 1 });

        assert!(!queue.get_reservation(&first.id).await.unwrap().is_active());
        assert!(queue
            .has_student_fulfilled_reservation(&fresh.id, &book.id)
            .await
            .unwrap());
        assert_eq!(queue.queue_position(&second.id).await.unwrap(), None);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.sweep_now().await, Err(EngineError::ShuttingDown)));
    }
}
