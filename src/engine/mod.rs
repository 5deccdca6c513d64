mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{order_slots, table_slots};
pub use conflict::has_conflict;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTableDay = Arc<RwLock<TableDay>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is already queued,
/// then does one flush + fsync for the whole batch before answering.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction/counters see the file.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: a failed batch is cut back off the file, so no caller
/// told `Storage` finds their event again on replay.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("WAL rollback failed, log may hold rejected events: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Bucket locking ───────────────────────────────────────

/// Write guards over one or more (table, date) buckets, taken in key order.
/// Holds the commit gate in shared mode so compaction sees no half-applied
/// mutation.
pub(super) struct LockedBuckets {
    _gate: Option<OwnedRwLockReadGuard<()>>,
    guards: Vec<(BucketKey, OwnedRwLockWriteGuard<TableDay>)>,
}

impl LockedBuckets {
    fn get_mut(&mut self, key: &BucketKey) -> Option<&mut TableDay> {
        self.guards
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, g)| &mut **g)
    }

    pub(super) fn bucket(&mut self, key: &BucketKey) -> Result<&mut TableDay, EngineError> {
        self.get_mut(key)
            .ok_or_else(|| EngineError::Storage(format!("bucket {} {} not locked", key.0, key.1)))
    }
}

/// Lookup indexes kept in step with the buckets. Shared with commit tasks,
/// which outlive the caller that started them.
#[derive(Default)]
pub(super) struct Indexes {
    /// Reverse lookup: reservation id → bucket holding it.
    pub(super) entity_to_bucket: DashMap<Ulid, BucketKey>,
    /// Customer phone → reservation ids, including cancelled ones.
    pub(super) by_phone: DashMap<String, Vec<Ulid>>,
}

pub struct Engine {
    pub(super) buckets: DashMap<BucketKey, SharedTableDay>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) indexes: Arc<Indexes>,
    /// Shared by every mutation, exclusive for compaction.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            buckets: DashMap::new(),
            wal_tx,
            notify,
            catalog,
            clock,
            indexes: Arc::new(Indexes::default()),
            commit_gate: Arc::new(RwLock::new(())),
        };

        // We are the only owner of every bucket during replay, so try_write
        // always succeeds. Blocking locks are off limits: this may run inside
        // an async context.
        for event in &events {
            let keys = engine.keys_for(event);
            let mut locked = engine.try_lock_buckets(keys)?;
            engine.indexes.apply(&mut locked, event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events, {} reservations",
                events.len(),
                engine.indexes.entity_to_bucket.len()
            );
        }

        Ok(engine)
    }

    pub fn subscribe(&self, restaurant_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(restaurant_id)
    }

    pub fn reservation_count(&self) -> usize {
        self.indexes.entity_to_bucket.len()
    }

    pub(super) fn get_bucket(&self, key: &BucketKey) -> Option<SharedTableDay> {
        self.buckets.get(key).map(|e| e.value().clone())
    }

    fn get_or_create_bucket(&self, key: BucketKey) -> SharedTableDay {
        self.buckets
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(TableDay::new(key.0, key.1))))
            .value()
            .clone()
    }

    pub(super) fn bucket_of(&self, id: &Ulid) -> Option<BucketKey> {
        self.indexes.bucket_of(id)
    }

    /// Take write locks on the given buckets in ascending key order, which
    /// keeps multi-bucket mutations deadlock free.
    pub(super) async fn lock_buckets(&self, mut keys: Vec<BucketKey>) -> LockedBuckets {
        keys.sort();
        keys.dedup();
        let gate = self.commit_gate.clone().read_owned().await;
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let day = self.get_or_create_bucket(key);
            guards.push((key, day.write_owned().await));
        }
        LockedBuckets {
            _gate: Some(gate),
            guards,
        }
    }

    fn try_lock_buckets(&self, mut keys: Vec<BucketKey>) -> io::Result<LockedBuckets> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let guard = self
                .get_or_create_bucket(key)
                .try_write_owned()
                .map_err(|_| io::Error::other("replay: bucket unexpectedly locked"))?;
            guards.push((key, guard));
        }
        Ok(LockedBuckets { _gate: None, guards })
    }

    /// Lock the bucket holding `id`, plus whatever `extra` asks for.
    ///
    /// The index is re-read once the locks are held; if the reservation moved
    /// in the meantime we start over.
    pub(super) async fn lock_reservation(
        &self,
        id: Ulid,
        extra: impl Fn(BucketKey) -> Option<BucketKey>,
    ) -> Result<(BucketKey, LockedBuckets), EngineError> {
        loop {
            let key = self
                .bucket_of(&id)
                .ok_or_else(|| EngineError::reservation_not_found(id))?;
            let mut keys = vec![key];
            keys.extend(extra(key));
            let locked = self.lock_buckets(keys).await;
            if self.bucket_of(&id) == Some(key) {
                return Ok((key, locked));
            }
        }
    }

    /// WAL-append, apply to the locked buckets, then notify listeners.
    ///
    /// The commit runs as its own task that owns the locks. A caller that
    /// gives up mid-await leaves the commit to finish: the event is either
    /// logged and applied, or neither, and the buckets stay locked until then.
    pub(super) async fn persist_and_apply(
        &self,
        mut locked: LockedBuckets,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let indexes = self.indexes.clone();
        let notify = self.notify.clone();
        let commit = tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            indexes.apply(&mut locked, &event);
            notify.send(event.restaurant_id(), &event);
            Ok::<(), EngineError>(())
        });
        commit
            .await
            .map_err(|e| EngineError::Storage(format!("commit task failed: {e}")))?
    }

    /// Buckets an event touches. Uses the current index for the old home
    /// of an existing reservation.
    fn keys_for(&self, event: &Event) -> Vec<BucketKey> {
        match event {
            Event::ReservationCreated { reservation } => vec![reservation.bucket_key()],
            Event::ReservationUpdated { reservation } => {
                let mut keys = vec![reservation.bucket_key()];
                keys.extend(self.bucket_of(&reservation.id));
                keys
            }
            Event::StatusChanged { id, .. } | Event::ReservationDeleted { id, .. } => {
                self.bucket_of(id).into_iter().collect()
            }
        }
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(e.to_string()))
}

impl Indexes {
    fn bucket_of(&self, id: &Ulid) -> Option<BucketKey> {
        self.entity_to_bucket.get(id).map(|e| *e.value())
    }

    /// Apply an event to buckets the caller has locked and keep the indexes
    /// in step.
    fn apply(&self, locked: &mut LockedBuckets, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                let key = reservation.bucket_key();
                if let Some(day) = locked.get_mut(&key) {
                    day.insert(reservation.clone());
                    self.entity_to_bucket.insert(reservation.id, key);
                    self.index_phone(&reservation.customer_phone, reservation.id);
                }
            }
            Event::ReservationUpdated { reservation } => {
                let Some(old_key) = self.bucket_of(&reservation.id) else { return };
                let new_key = reservation.bucket_key();
                let previous = locked.get_mut(&old_key).and_then(|d| d.remove(reservation.id));
                if let Some(day) = locked.get_mut(&new_key) {
                    day.insert(reservation.clone());
                    self.entity_to_bucket.insert(reservation.id, new_key);
                }
                if let Some(prev) = previous
                    && prev.customer_phone != reservation.customer_phone
                {
                    self.unindex_phone(&prev.customer_phone, reservation.id);
                    self.index_phone(&reservation.customer_phone, reservation.id);
                }
            }
            Event::StatusChanged { id, status, at, .. } => {
                let Some(key) = self.bucket_of(id) else { return };
                if let Some(r) = locked.get_mut(&key).and_then(|d| d.get_mut(*id)) {
                    r.status = *status;
                    r.updated_at = *at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                let Some(key) = self.bucket_of(id) else { return };
                if let Some(removed) = locked.get_mut(&key).and_then(|d| d.remove(*id)) {
                    self.unindex_phone(&removed.customer_phone, *id);
                }
                self.entity_to_bucket.remove(id);
            }
        }
    }

    fn index_phone(&self, phone: &str, id: Ulid) {
        let mut ids = self.by_phone.entry(phone.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn unindex_phone(&self, phone: &str, id: Ulid) {
        let now_empty = match self.by_phone.get_mut(phone) {
            Some(mut ids) => {
                ids.retain(|r| *r != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_phone.remove_if(phone, |_, ids| ids.is_empty());
        }
    }
}
