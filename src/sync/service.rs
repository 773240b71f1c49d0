use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    commit::Commit,
    context::VersionContext,
    error::{ErrorKind, TraceGraphError},
    event::{ChangeMessage, Event},
    properties::ProjectVersion,
};

use super::{AuthoritySource, SyncReconciler, SyncReport};

/// Drives a [`SyncReconciler`] against an [`AuthoritySource`].
///
/// The context lock is only held while reading or mutating state, never across a fetch, so the
/// presentation layer keeps committing while a fetch is in flight. A fetch that completes after
/// another version was loaded is discarded.
pub struct SyncService<S: AuthoritySource> {
    source: S,
    ctx: Arc<Mutex<VersionContext>>,
    reconciler: SyncReconciler,
    notify_foreign: bool,
    tx: Option<UnboundedSender<Event>>,
}

impl<S: AuthoritySource> SyncService<S> {
    pub fn new(source: S, ctx: Arc<Mutex<VersionContext>>) -> SyncService<S> {
        let config = ctx.lock().config().sync.clone();
        SyncService {
            source,
            ctx,
            notify_foreign: config.notify_foreign_versions,
            reconciler: SyncReconciler::new(config),
            tx: None,
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<Event>) -> SyncService<S> {
        self.tx = Some(tx);
        self
    }

    pub fn context(&self) -> Arc<Mutex<VersionContext>> {
        self.ctx.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn reconciler(&self) -> &SyncReconciler {
        &self.reconciler
    }

    /// Queue a change message for the loaded version.
    pub fn enqueue(&mut self, message: ChangeMessage) -> bool {
        let loaded = self.ctx.lock().version_id().clone();
        let foreign = (self.notify_foreign && message.version_id != loaded).then(|| message.clone());
        let queued = self.reconciler.enqueue(message, &loaded);
        if let Some(message) = foreign {
            self.emit(Event::ChangeDropped(message));
        }
        queued
    }

    /// Fetch `version` and load it wholesale. Pending change messages are dropped with the old
    /// version.
    pub async fn load_version(&mut self, version: ProjectVersion) -> Result<(), TraceGraphError> {
        let snapshot = self.source.load_version(&version.version_id).await?;
        let mut ctx = self.ctx.lock();
        ctx.load_version(version, snapshot)?;
        self.reconciler = SyncReconciler::new(ctx.config().sync.clone());
        Ok(())
    }

    /// Reconcile the next queued message (or a pending resync). `Ok(None)` once the queue is
    /// empty.
    pub async fn process_next(&mut self) -> Result<Option<SyncReport>, TraceGraphError> {
        if self.reconciler.take_resync() {
            return self.resync().await.map(Some);
        }
        let Some(message) = self.reconciler.next_message() else {
            return Ok(None);
        };
        let (ticket, version_id) = {
            let ctx = self.ctx.lock();
            (ctx.ticket(), ctx.version_id().clone())
        };
        if message.version_id != version_id {
            tracing::debug!(
                "Skipping change message for {}; version {version_id} is loaded",
                message.version_id
            );
            return Ok(Some(SyncReport::default()));
        }

        let fetched = match self
            .source
            .fetch_entities(&version_id, &message.changed_entity_ids)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!("Fetching changed entities failed: {e}");
                self.reconciler.requeue(message);
                return Err(e);
            }
        };

        let result = {
            let mut ctx = self.ctx.lock();
            ctx.check_epoch(&ticket)
                .and_then(|_| self.reconciler.reconcile(&mut ctx, &message, &fetched))
        };
        match result {
            Ok(report) => Ok(Some(report)),
            Err(e) if e.kind() == ErrorKind::StaleComputation => {
                tracing::debug!("Discarding fetched entities: {e}");
                Ok(Some(SyncReport::default()))
            }
            Err(e) => {
                tracing::warn!("Could not apply remote change ({e}); resyncing the whole version");
                self.resync().await.map(Some)
            }
        }
    }

    /// Process queued messages until the queue is empty.
    pub async fn drain(&mut self) -> Result<Vec<SyncReport>, TraceGraphError> {
        let mut reports = Vec::new();
        while let Some(report) = self.process_next().await? {
            reports.push(report);
        }
        Ok(reports)
    }

    /// Reconcile the loaded version against its full authoritative content.
    pub async fn resync(&mut self) -> Result<SyncReport, TraceGraphError> {
        let (ticket, version_id) = {
            let ctx = self.ctx.lock();
            (ctx.ticket(), ctx.version_id().clone())
        };
        let snapshot = match self.source.load_version(&version_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.reconciler.request_resync();
                return Err(e);
            }
        };
        let mut ctx = self.ctx.lock();
        if let Err(e) = ctx.check_epoch(&ticket) {
            tracing::debug!("Discarding resync snapshot: {e}");
            return Ok(SyncReport::default());
        }
        tracing::info!("Resyncing version {version_id} from an authoritative snapshot");
        let result = self.reconciler.reconcile_snapshot(&mut ctx, &snapshot);
        if let Err(e) = result.as_ref() {
            tracing::warn!("Resync of version {version_id} failed, retrying later: {e}");
            self.reconciler.request_resync();
        }
        result
    }

    /// Push every unsynced local commit to the persistence service, oldest first. Stops at the
    /// first failure, leaving it and everything after it pending.
    pub async fn persist_pending(&mut self) -> Result<Vec<Commit>, TraceGraphError> {
        let (ticket, pending) = {
            let ctx = self.ctx.lock();
            (
                ctx.ticket(),
                ctx.engine().unsynced().cloned().collect::<Vec<_>>(),
            )
        };
        let mut stored = Vec::with_capacity(pending.len());
        for commit in pending {
            let local_id = commit.id.clone();
            let persisted = self.source.persist_commit(commit).await?;
            {
                let mut ctx = self.ctx.lock();
                if let Err(e) = ctx.check_epoch(&ticket) {
                    tracing::debug!("Version switched while persisting: {e}");
                    break;
                }
                ctx.mark_synced(&local_id);
            }
            tracing::debug!("Persisted local commit {local_id} as {}", persisted.id);
            self.emit(Event::Persisted(local_id, persisted.clone()));
            stored.push(persisted);
        }
        Ok(stored)
    }

    /// Consume change messages until the channel closes. Failed drains are logged and retried
    /// with the next message.
    pub async fn run(mut self, mut rx: UnboundedReceiver<ChangeMessage>) -> SyncService<S> {
        while let Some(message) = rx.recv().await {
            self.enqueue(message);
            while let Ok(message) = rx.try_recv() {
                self.enqueue(message);
            }
            if let Err(e) = self.drain().await {
                tracing::error!("Sync failed: {e}");
            }
        }
        tracing::debug!("Change channel closed, stopping sync service");
        self
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = self.tx.as_ref() {
            if let Err(e) = tx.send(event) {
                tracing::debug!("Event receiver dropped: {e}");
            }
        }
    }
}
