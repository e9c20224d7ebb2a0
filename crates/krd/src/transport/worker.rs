//! Long-running relay tasks: the send worker and the receive poller.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{QueuePair, RecentMessages, RetryPolicy, Transport, TransportError};

/// Outcome of delivering one envelope to the relay.
pub type SendResult = Result<(), TransportError>;

/// An envelope waiting to be pushed to the relay.
#[derive(Debug)]
pub struct Outbound {
    pub queue: String,
    /// Raw envelope bytes; base64-encoded on the way out.
    pub envelope: Vec<u8>,
    /// Told whether delivery succeeded, if anyone is listening.
    pub result: Option<oneshot::Sender<SendResult>>,
}

/// Spawn the send worker.
///
/// Envelopes are delivered one at a time in queue order. Transient failures
/// are retried per `policy`; the final outcome is reported on
/// [`Outbound::result`]. On shutdown whatever is already queued gets up to
/// `grace` to reach the relay.
pub fn spawn_sender(
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    mut outbound: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                next = outbound.recv() => match next {
                    Some(msg) => deliver(transport.as_ref(), &policy, msg).await,
                    None => return,
                },
                _ = shutdown.changed() => {
                    let drain = async {
                        while let Ok(msg) = outbound.try_recv() {
                            deliver(transport.as_ref(), &policy, msg).await;
                        }
                    };
                    if tokio::time::timeout(grace, drain).await.is_err() {
                        warn!("Shutdown grace period elapsed with envelopes still queued");
                    }
                    info!("Send worker shutting down");
                    return;
                }
            }
        }
    })
}

async fn deliver(transport: &dyn Transport, policy: &RetryPolicy, msg: Outbound) {
    let body = BASE64.encode(&msg.envelope);
    let mut attempt: u32 = 0;

    let outcome = loop {
        match transport.send(&msg.queue, &body).await {
            Ok(()) => {
                debug!(queue = %msg.queue, bytes = msg.envelope.len(), "Envelope sent");
                break Ok(());
            }
            Err(e) if e.is_transient() && policy.should_retry(attempt.saturating_add(1)) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(queue = %msg.queue, error = %e, attempt, delay_ms = delay.as_millis(), "Retrying send");
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => {
                error!(queue = %msg.queue, error = %e, "Giving up on envelope");
                break Err(e);
            }
        }
    };

    if let Some(result) = msg.result {
        let _ = result.send(outcome);
    }
}

/// Spawn the receive poller.
///
/// Follows whichever queue pair `queues` currently names, creating both
/// queues on first use. Bodies already seen recently are dropped; the rest
/// are base64-decoded and forwarded on `inbound`. Polling pauses while no
/// channel exists.
pub fn spawn_poller(
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    dedup_capacity: usize,
    mut queues: watch::Receiver<Option<QueuePair>>,
    inbound: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut recent = RecentMessages::new(dedup_capacity);
        let mut ready: Option<QueuePair> = None;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Receive poller shutting down");
                return;
            }

            let current = queues.borrow_and_update().clone();
            let Some(pair) = current else {
                tokio::select! {
                    changed = queues.changed() => if changed.is_err() { return },
                    changed = shutdown.changed() => if changed.is_err() { return },
                }
                continue;
            };

            let result = if ready.as_ref() == Some(&pair) {
                tokio::select! {
                    r = transport.receive(&pair.inbound) => r,
                    changed = queues.changed() => {
                        if changed.is_err() { return }
                        continue;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() { return }
                        continue;
                    }
                }
            } else {
                create_queues(transport.as_ref(), &pair).await.map(|()| {
                    info!(outbound = %pair.outbound, inbound = %pair.inbound, "Polling relay");
                    ready = Some(pair.clone());
                    Vec::new()
                })
            };

            match result {
                Ok(bodies) => {
                    attempt = 0;
                    for body in bodies {
                        if !recent.first_sighting(&body) {
                            debug!("Dropping replayed message");
                            continue;
                        }
                        match BASE64.decode(body.as_bytes()) {
                            Ok(envelope) => {
                                if inbound.send(envelope).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => debug!(error = %e, "Dropping message that is not base64"),
                        }
                    }
                }
                Err(e) => {
                    let delay = if e.is_transient() {
                        policy.delay_for_attempt(attempt)
                    } else {
                        policy.max_delay
                    };
                    if e.is_transient() {
                        warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Relay poll failed");
                    } else {
                        error!(error = %e, delay_ms = delay.as_millis(), "Relay refused poll");
                    }
                    tokio::select! {
                        () = sleep(delay) => {}
                        changed = shutdown.changed() => if changed.is_err() { return },
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    })
}

async fn create_queues(transport: &dyn Transport, pair: &QueuePair) -> Result<(), TransportError> {
    transport.create_queue(&pair.outbound).await?;
    transport.create_queue(&pair.inbound).await
}
