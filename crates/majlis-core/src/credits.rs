//! Background settlement of recipient credits.
//!
//! Gift handlers push credits onto a [`CreditQueue`]; one worker task drains
//! it and settles each credit with bounded retries. The queue is only a fast
//! path: every credit is also in the `pending_credits` outbox, which the
//! worker sweeps at startup and then periodically, so a dropped message or a
//! crash delays a credit but never loses it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use majlis_shared::Clock;
use majlis_store::DocumentStore;

use crate::gifts::RecipientCredit;
use crate::service::Majlis;

/// Outbox entries settled per sweep.
const SWEEP_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    /// Time between outbox sweeps.
    pub sweep_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Sending half of the credit channel.
#[derive(Clone)]
pub struct CreditQueue {
    tx: mpsc::UnboundedSender<RecipientCredit>,
}

impl CreditQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RecipientCredit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a credit. If the worker has stopped, the credit waits in the
    /// outbox for the next sweep.
    pub fn enqueue(&self, credit: RecipientCredit) {
        let id = credit.id.clone();
        if self.tx.send(credit).is_err() {
            warn!(credit = %id, "credit worker stopped, credit left in the outbox");
        }
    }
}

/// Settle the outbox, then drain `rx` until every sender is dropped, sweeping
/// the outbox again every `policy.sweep_interval`.
pub async fn run_credit_worker<S, C>(
    majlis: Majlis<S, C>,
    mut rx: mpsc::UnboundedReceiver<RecipientCredit>,
    policy: RetryPolicy,
) where
    S: DocumentStore + 'static,
    C: Clock + Clone + 'static,
{
    info!("recipient credit worker started");
    sweep_outbox(&majlis, &policy).await;

    let period = policy.sweep_interval.max(Duration::from_millis(1));
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(credit) => settle_with_retry(&majlis, credit, &policy).await,
                None => break,
            },
            _ = sweep.tick() => sweep_outbox(&majlis, &policy).await,
        }
    }
    info!("recipient credit worker stopped");
}

async fn sweep_outbox<S, C>(majlis: &Majlis<S, C>, policy: &RetryPolicy)
where
    S: DocumentStore + 'static,
    C: Clock + Clone + 'static,
{
    let reader = majlis.clone();
    let pending = match tokio::task::spawn_blocking(move || reader.pending_credits(SWEEP_BATCH)).await
    {
        Ok(Ok(pending)) => pending,
        Ok(Err(e)) => {
            warn!(error = %e, "failed to read pending credits");
            return;
        }
        Err(e) => {
            warn!(error = %e, "pending credit scan panicked");
            return;
        }
    };
    if pending.is_empty() {
        return;
    }
    info!(count = pending.len(), "settling pending credits from the outbox");
    for credit in pending {
        settle_with_retry(majlis, credit, policy).await;
    }
}

async fn settle_with_retry<S, C>(majlis: &Majlis<S, C>, credit: RecipientCredit, policy: &RetryPolicy)
where
    S: DocumentStore + 'static,
    C: Clock + Clone + 'static,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let worker = majlis.clone();
        let job = credit.clone();
        let outcome =
            tokio::task::spawn_blocking(move || worker.settle_recipient_credit(&job)).await;

        match outcome {
            Ok(Ok(applied)) => {
                debug!(credit = %credit.id, applied, "credit settled");
                return;
            }
            Ok(Err(e)) => {
                warn!(credit = %credit.id, attempt, error = %e, "credit settlement failed");
            }
            Err(e) => {
                warn!(credit = %credit.id, attempt, error = %e, "credit task panicked");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }
    warn!(
        credit = %credit.id,
        recipient = %credit.recipient,
        coins = credit.coins,
        "credit still pending, leaving it for the next sweep"
    );
}
