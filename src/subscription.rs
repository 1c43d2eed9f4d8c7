//! Subscription manager.
//!
//! Bridges the database change feed to one UI state container: a background
//! task emits a full snapshot of every collection, then forwards each change
//! for its owner over an mpsc channel. The task ends when the handle is
//! cancelled or dropped, when the receiving side goes away, or when the feed
//! closes.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::PosResult;
use crate::feed::Snapshot;
use crate::identity::OwnerId;
use crate::persistence::full_snapshot;

/// Owning handle of a running subscription. Dropping it stops the task.
pub struct SubscriptionHandle {
    owner: OwnerId,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(self) -> PosResult<()> {
        self.cancel();
        self.task.await?;
        Ok(())
    }
}

/// Start forwarding `owner`'s snapshots to `tx`.
///
/// The feed is subscribed before this returns, so no change made after the
/// call is missed. Must be called inside a tokio runtime.
pub fn spawn(db: Arc<DbState>, owner: OwnerId, tx: mpsc::Sender<Snapshot>) -> SubscriptionHandle {
    let feed_rx = db.feed.subscribe();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run(db, owner.clone(), feed_rx, cancel_rx, tx));
    info!(owner_id = %owner, "Subscription started");
    SubscriptionHandle {
        owner,
        cancel_tx,
        task,
    }
}

async fn run(
    db: Arc<DbState>,
    owner: OwnerId,
    mut feed_rx: tokio::sync::broadcast::Receiver<Snapshot>,
    mut cancel_rx: watch::Receiver<bool>,
    tx: mpsc::Sender<Snapshot>,
) {
    if !send_full(&db, &owner, &tx).await {
        debug!(owner_id = %owner, "Subscriber gone before initial snapshot");
        return;
    }

    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            _ = tx.closed() => break,
            msg = feed_rx.recv() => match msg {
                Ok(snapshot) => {
                    if snapshot.owner_id != owner.as_str() {
                        continue;
                    }
                    if tx.send(snapshot).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(owner_id = %owner, skipped, "Change feed lagged; resending full snapshot");
                    if !send_full(&db, &owner, &tx).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!(owner_id = %owner, "Subscription stopped");
}

/// Read and forward every collection. Returns `false` once the receiver is
/// gone. A failed read is logged and skipped; the next change resends.
async fn send_full(db: &Arc<DbState>, owner: &OwnerId, tx: &mpsc::Sender<Snapshot>) -> bool {
    let db = db.clone();
    let task_owner = owner.clone();
    let snapshots = tokio::task::spawn_blocking(move || full_snapshot(&db, &task_owner)).await;
    let snapshots = match snapshots {
        Ok(Ok(snapshots)) => snapshots,
        Ok(Err(e)) => {
            warn!(owner_id = %owner, "full snapshot read failed: {e}");
            return !tx.is_closed();
        }
        Err(e) => {
            warn!(owner_id = %owner, "full snapshot task failed: {e}");
            return !tx.is_closed();
        }
    };
    for snapshot in snapshots {
        if tx.send(snapshot).await.is_err() {
            return false;
        }
    }
    true
}
