//! Shared worker loop for bus-driven services.
//!
//! Pulls deliveries from a subscription, processes up to `max_concurrency`
//! of them in parallel, settles each according to the handler outcome, and
//! drains in-flight work on shutdown within a grace period.

use super::{BusMessage, SubscriptionReceiver};
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub max_concurrency: usize,
    pub receive_wait: Duration,
    pub drain_timeout: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            receive_wait: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &BusMessage, delivery_count: u32) -> Result<(), AppError>;
}

/// Run the consumer loop until the shutdown flag flips.
///
/// A handler `Ok` completes the delivery; an `Err` abandons it so the broker
/// redelivers (and eventually dead-letters). Undrained work past the grace
/// period is aborted and its deliveries are left for redelivery.
pub async fn run_consumer(
    receiver: Arc<dyn SubscriptionReceiver>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency));
    let mut tasks: JoinSet<()> = JoinSet::new();

    tracing::info!(
        max_concurrency = options.max_concurrency,
        "Consumer loop started"
    );

    'outer: while !*shutdown.borrow() {
        while tasks.try_join_next().is_some() {}

        let capacity = semaphore.available_permits().max(1);
        let received = tokio::select! {
            result = receiver.receive(capacity, options.receive_wait) => result,
            changed = shutdown.changed() => {
                match changed {
                    Ok(()) if *shutdown.borrow() => break 'outer,
                    Ok(()) => continue 'outer,
                    Err(_) => break 'outer,
                }
            }
        };

        let deliveries = match received {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(error = %e, "Bus receive failed, retrying shortly");
                tokio::select! {
                    _ = sleep(Duration::from_secs(5)) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
        };

        for delivery in deliveries {
            if *shutdown.borrow() {
                if let Err(e) = receiver.abandon(&delivery).await {
                    tracing::error!(error = %e, "Failed to abandon delivery during shutdown");
                }
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break 'outer,
            };
            let receiver = receiver.clone();
            let handler = handler.clone();

            tasks.spawn(async move {
                let message_id = delivery.message.message_id.clone();
                match handler.handle(&delivery.message, delivery.delivery_count).await {
                    Ok(()) => {
                        if let Err(e) = receiver.complete(&delivery).await {
                            tracing::error!(
                                error = %e,
                                message_id = %message_id,
                                "Failed to complete delivery"
                            );
                        } else {
                            tracing::debug!(message_id = %message_id, "Delivery completed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            message_id = %message_id,
                            "Handler failed, abandoning delivery for redelivery"
                        );
                        if let Err(settle_err) = receiver.abandon(&delivery).await {
                            tracing::error!(
                                error = %settle_err,
                                message_id = %message_id,
                                "Failed to abandon delivery"
                            );
                        }
                    }
                }
                drop(permit);
            });
        }
    }

    let active = tasks.len();
    if active > 0 {
        tracing::info!(
            active,
            grace_secs = options.drain_timeout.as_secs(),
            "Draining in-flight work before shutdown"
        );
    }

    let drained = tokio::time::timeout(options.drain_timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Drain grace period elapsed, aborting remaining work");
        tasks.shutdown().await;
    }

    tracing::info!("Consumer loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::bus::{MessageBus, TopicPublisher};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        seen: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: &BusMessage, delivery_count: u32) -> Result<(), AppError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && delivery_count == 1 {
                return Err(AppError::BadGateway("simulated upstream failure".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_and_completes_messages() {
        let bus = MemoryBus::new();
        let receiver = bus.subscribe("t", "workers").await.unwrap();
        for i in 0..3 {
            bus.publish(
                "t",
                BusMessage {
                    message_id: format!("m{}", i),
                    session_id: None,
                    body: "{}".into(),
                },
            )
            .await
            .unwrap();
        }

        let handler = Arc::new(CountingHandler {
            seen: AtomicU32::new(0),
            fail_first: false,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_handle = tokio::spawn(run_consumer(
            receiver.clone(),
            handler.clone(),
            ConsumerOptions {
                receive_wait: Duration::from_millis(20),
                ..Default::default()
            },
            shutdown_rx,
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages were not processed in time");

        shutdown_tx.send(true).unwrap();
        loop_handle.await.unwrap();

        // Everything settled: nothing left to receive.
        let leftover = receiver.receive(5, Duration::from_millis(20)).await.unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn failed_handling_is_retried_via_redelivery() {
        let bus = MemoryBus::new();
        let receiver = bus.subscribe("t", "workers").await.unwrap();
        bus.publish(
            "t",
            BusMessage {
                message_id: "m1".into(),
                session_id: None,
                body: "{}".into(),
            },
        )
        .await
        .unwrap();

        let handler = Arc::new(CountingHandler {
            seen: AtomicU32::new(0),
            fail_first: true,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_handle = tokio::spawn(run_consumer(
            receiver,
            handler.clone(),
            ConsumerOptions {
                receive_wait: Duration::from_millis(20),
                ..Default::default()
            },
            shutdown_rx,
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("redelivery did not happen");

        shutdown_tx.send(true).unwrap();
        loop_handle.await.unwrap();
    }
}
