//! Asynchronous write-through queue. The user-visible path enqueues and
//! returns; a background writer drains the queue and applies each write
//! to the owning tenant's database. The cache is authoritative, so write
//! failures are logged and counted, never surfaced to the request.

use sqlx::sqlite::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tractstack_core::config::PersistConfig;
use tractstack_core::types::{Action, HeldBeliefRow, Visit};
use tracing::{info, warn};

/// One durable write. Each op stands alone; there is no multi-op
/// transaction guarantee.
#[derive(Debug, Clone)]
pub enum PersistOp {
    AppendAction(Action),
    UpsertHeldBelief(HeldBeliefRow),
    DeleteHeldBelief {
        belief_id: String,
        fingerprint_id: String,
    },
    EnsureFingerprint {
        fingerprint_id: String,
    },
    AppendVisit(Visit),
}

pub struct PersistJob {
    pub pool: SqlitePool,
    pub op: PersistOp,
    /// Acked once the op has been applied (or failed). Used by `flush`.
    ack: Option<oneshot::Sender<()>>,
}

/// Handle for enqueueing durable writes (non-blocking).
#[derive(Clone)]
pub struct PersistQueue {
    sender: mpsc::Sender<PersistJob>,
}

impl PersistQueue {
    /// Create the queue and spawn the background writer.
    pub fn new(config: &PersistConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<PersistJob>(config.queue_depth);
        tokio::spawn(run_writer(receiver));
        info!(depth = config.queue_depth, "persistence queue started");
        Self { sender }
    }

    /// Enqueue a write. Drops (with a warning) if the queue is full rather
    /// than applying backpressure to the request path.
    pub fn enqueue(&self, pool: SqlitePool, op: PersistOp) {
        if let Err(e) = self.sender.try_send(PersistJob {
            pool,
            op,
            ack: None,
        }) {
            metrics::counter!("persist_dropped").increment(1);
            warn!("persistence op dropped: {}", e);
        } else {
            metrics::counter!("persist_queued").increment(1);
        }
    }

    /// Wait until every op enqueued before this call has been applied.
    /// The writer is FIFO, so acking a sentinel op drains the backlog.
    pub async fn flush(&self, pool: SqlitePool) {
        let (ack, done) = oneshot::channel();
        let sent = self
            .sender
            .send(PersistJob {
                pool,
                op: PersistOp::EnsureFingerprint {
                    fingerprint_id: String::new(),
                },
                ack: Some(ack),
            })
            .await;
        if sent.is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_writer(mut receiver: mpsc::Receiver<PersistJob>) {
    while let Some(job) = receiver.recv().await {
        if let Err(e) = execute(&job).await {
            metrics::counter!("persist_errors").increment(1);
            warn!(error = %e, op = ?job.op, "durable write failed");
        } else {
            metrics::counter!("persist_flushed").increment(1);
        }
        if let Some(ack) = job.ack {
            let _ = ack.send(());
        }
    }
}

async fn execute(job: &PersistJob) -> sqlx::Result<()> {
    match &job.op {
        PersistOp::AppendAction(action) => {
            sqlx::query(
                "INSERT INTO actions (id, object_id, object_type, verb, duration, visit_id, fingerprint_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&action.id)
            .bind(&action.object_id)
            .bind(action.object_type.as_str())
            .bind(&action.verb)
            .bind(action.duration.map(|d| d as i64))
            .bind(&action.visit_id)
            .bind(&action.fingerprint_id)
            .bind(action.created_at.to_rfc3339())
            .execute(&job.pool)
            .await?;
        }
        PersistOp::UpsertHeldBelief(row) => {
            sqlx::query(
                "INSERT INTO heldbeliefs (id, belief_id, fingerprint_id, verb, object, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (belief_id, fingerprint_id)
                 DO UPDATE SET verb = excluded.verb, object = excluded.object, updated_at = excluded.updated_at",
            )
            .bind(&row.id)
            .bind(&row.belief_id)
            .bind(&row.fingerprint_id)
            .bind(&row.verb)
            .bind(&row.object)
            .bind(row.updated_at.to_rfc3339())
            .execute(&job.pool)
            .await?;
        }
        PersistOp::DeleteHeldBelief {
            belief_id,
            fingerprint_id,
        } => {
            sqlx::query("DELETE FROM heldbeliefs WHERE belief_id = ?1 AND fingerprint_id = ?2")
                .bind(belief_id)
                .bind(fingerprint_id)
                .execute(&job.pool)
                .await?;
        }
        PersistOp::EnsureFingerprint { fingerprint_id } => {
            if fingerprint_id.is_empty() {
                return Ok(());
            }
            sqlx::query(
                "INSERT INTO fingerprints (id, created_at) VALUES (?1, ?2)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(fingerprint_id)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&job.pool)
            .await?;
        }
        PersistOp::AppendVisit(visit) => {
            sqlx::query(
                "INSERT INTO visits (id, fingerprint_id, campaign_id, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&visit.id)
            .bind(&visit.fingerprint_id)
            .bind(&visit.campaign_id)
            .bind(visit.created_at.to_rfc3339())
            .execute(&job.pool)
            .await?;
        }
    }
    Ok(())
}
