//! Reconciliation engine — the sync loop.
//!
//! Owns the authoritative in-memory snapshot and reconciles it against
//! the remote document with a pull/push protocol keyed on a version
//! counter. Whole-document last-writer-wins: the higher version fully
//! replaces the lower, no field-level merging. Two participants editing
//! at the same time means the later push silently overwrites the earlier
//! one, including tasks the later writer never touched. That is the
//! protocol, not a bug here — see the clobber test in tests/sync_loop.rs.
//!
//! Every mutation hits the local cache synchronously before anything
//! touches the network, so the board stays fully editable offline and a
//! dead connection never loses an edit.

use crate::board::{LogEntry, Snapshot, Task, LOG_CAP};
use crate::cache::{CacheError, CacheFile};
use crate::remote::{DocumentStore, RemoteError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the status indicator shows. Network failures land here instead
/// of propagating — the UI layer never sees a sync exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    /// Pull in flight.
    Checking,
    /// Push in flight.
    Syncing,
    /// Remote unreachable or timed out. Transient; the heartbeat retries.
    Offline,
    /// Remote rejected the request or sent garbage. Needs a human to read
    /// the message — usually a bad document URL.
    Error { message: String },
}

struct EngineState {
    snapshot: Snapshot,
    /// Version of the last snapshot known consistent with the remote.
    /// Local mutations do NOT advance this — only a successful push or an
    /// adopted pull does.
    baseline: u64,
    /// Unsynced local changes pending.
    dirty: bool,
    /// Bumped on every local mutation; lets a finished push tell whether
    /// an edit landed while its PUT was in flight.
    seq: u64,
}

pub struct SyncEngine {
    remote: Arc<dyn DocumentStore>,
    cache: CacheFile,
    /// Nickname stamped into every pushed snapshot as lastUpdatedBy.
    actor: String,
    state: RwLock<EngineState>,
    /// At most one pull or push in flight. Released by a drop guard so a
    /// panicking or timed-out operation can't wedge the engine.
    busy: AtomicBool,
    status: RwLock<SyncStatus>,
    last_synced: RwLock<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    /// Boot from the cached snapshot, or seed the starter board on a
    /// fresh install. Does not touch the network — the first heartbeat
    /// tick does.
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        cache: CacheFile,
        actor: impl Into<String>,
    ) -> Result<SyncEngine, CacheError> {
        let snapshot = match cache.load_snapshot()? {
            Some(snapshot) => snapshot,
            None => {
                let starter = Snapshot::starter();
                cache.store_snapshot(&starter)?;
                starter
            }
        };
        let baseline = snapshot.version;

        Ok(SyncEngine {
            remote,
            cache,
            actor: actor.into(),
            state: RwLock::new(EngineState { snapshot, baseline, dirty: false, seq: 0 }),
            busy: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::Checking),
            last_synced: RwLock::new(None),
        })
    }

    // ── Reads (the UI surface) ─────────────────────────────────

    pub fn current_snapshot(&self) -> Snapshot {
        self.state.read().unwrap().snapshot.clone()
    }

    pub fn current_version(&self) -> u64 {
        self.state.read().unwrap().baseline
    }

    pub fn has_unsynced_changes(&self) -> bool {
        self.state.read().unwrap().dirty
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status.read().unwrap().clone()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *self.last_synced.read().unwrap()
    }

    // ── Mutate ─────────────────────────────────────────────────

    /// Replace the board with fully-computed next collections (callers
    /// build them with `board::build_mutation` or by hand).
    ///
    /// The cache write happens first and its failure fails the whole
    /// call with memory untouched — reporting success on a lost local
    /// write would break the offline-safety property. On success the new
    /// snapshot is visible immediately and a best-effort push is
    /// scheduled; the version stays put until that push succeeds.
    pub fn mutate(
        self: &Arc<Self>,
        tasks: Vec<Task>,
        categories: Vec<String>,
        logs: Vec<LogEntry>,
    ) -> Result<(), CacheError> {
        let candidate = {
            let state = self.state.read().unwrap();
            let mut next = state.snapshot.clone();
            next.tasks = tasks;
            next.categories = categories;
            next.logs = logs;
            next.logs.truncate(LOG_CAP);
            next.last_updated_by = self.actor.clone();
            next.timestamp = Utc::now();
            next
        };

        self.cache.store_snapshot(&candidate)?;

        {
            let mut state = self.state.write().unwrap();
            state.snapshot = candidate;
            state.dirty = true;
            state.seq += 1;
        }

        // Push right away when we can; otherwise the heartbeat picks the
        // dirty flag up on its next tick.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(self);
            handle.spawn(async move { engine.push(None).await });
        }

        Ok(())
    }

    // ── Pull ───────────────────────────────────────────────────

    /// Fetch the remote document and adopt it if it is newer than our
    /// baseline. No-op while another sync is in flight, and while local
    /// unsynced changes exist — local edits take priority and get pushed
    /// instead. A missing remote document is only acted on for a manual
    /// pull: that is first contact, so we seed the document from the
    /// local board.
    pub async fn pull(&self, manual: bool) {
        let Some(_busy) = self.try_busy() else {
            debug!("pull skipped: sync already in flight");
            return;
        };
        if self.state.read().unwrap().dirty {
            debug!("pull skipped: local changes pending");
            return;
        }

        self.set_status(SyncStatus::Checking);

        let remote = Arc::clone(&self.remote);
        let fetched = match tokio::task::spawn_blocking(move || remote.fetch()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.set_status(SyncStatus::Error { message: format!("sync task failed: {e}") });
                return;
            }
        };

        match fetched {
            Ok(Some(body)) => match serde_json::from_str::<Snapshot>(&body) {
                Ok(mut incoming) => {
                    incoming.logs.truncate(LOG_CAP);
                    let adopted = {
                        let mut state = self.state.write().unwrap();
                        if incoming.version > state.baseline {
                            state.baseline = incoming.version;
                            state.snapshot = incoming;
                            state.seq += 1;
                            Some(state.snapshot.clone())
                        } else {
                            None
                        }
                    };
                    if let Some(snapshot) = adopted {
                        info!(version = snapshot.version, "adopted newer remote snapshot");
                        if let Err(e) = self.cache.store_snapshot(&snapshot) {
                            warn!("cache write after pull failed: {e}");
                        }
                    }
                    self.set_status(SyncStatus::Synced);
                    *self.last_synced.write().unwrap() = Some(Utc::now());
                }
                Err(e) => {
                    self.set_status(SyncStatus::Error {
                        message: format!("remote document is malformed: {e}"),
                    });
                }
            },
            Ok(None) => {
                if manual {
                    info!("remote document missing; seeding it from the local board");
                    let seed = self.state.read().unwrap().snapshot.clone();
                    self.push_inner(Some(seed)).await;
                } else {
                    self.set_status(SyncStatus::Synced);
                }
            }
            Err(e) => self.report_remote_error("pull", e),
        }
    }

    // ── Push ───────────────────────────────────────────────────

    /// Write the board to the remote document as baseline + 1. Skipped
    /// while another sync is in flight, and skipped when there is nothing
    /// to sync unless `force` supplies a snapshot. Failure keeps the
    /// dirty flag set so the heartbeat re-attempts.
    pub async fn push(&self, force: Option<Snapshot>) {
        let Some(_busy) = self.try_busy() else {
            debug!("push skipped: sync already in flight");
            return;
        };
        self.push_inner(force).await;
    }

    /// Body of push. Caller must hold the busy flag.
    async fn push_inner(&self, force: Option<Snapshot>) {
        let (mut outgoing, next_version, seq_at_capture) = {
            let state = self.state.read().unwrap();
            if force.is_none() && !state.dirty {
                debug!("push skipped: nothing to sync");
                return;
            }
            let snapshot = force.unwrap_or_else(|| state.snapshot.clone());
            (snapshot, state.baseline + 1, state.seq)
        };
        outgoing.version = next_version;
        outgoing.last_updated_by = self.actor.clone();
        outgoing.timestamp = Utc::now();
        outgoing.logs.truncate(LOG_CAP);

        self.set_status(SyncStatus::Syncing);

        let body = match serde_json::to_string(&outgoing) {
            Ok(body) => body,
            Err(e) => {
                self.set_status(SyncStatus::Error {
                    message: format!("snapshot failed to serialize: {e}"),
                });
                return;
            }
        };

        let remote = Arc::clone(&self.remote);
        let stored = match tokio::task::spawn_blocking(move || remote.store(&body)).await {
            Ok(stored) => stored,
            Err(e) => {
                self.set_status(SyncStatus::Error { message: format!("sync task failed: {e}") });
                return;
            }
        };

        match stored {
            Ok(()) => {
                let committed = {
                    let mut state = self.state.write().unwrap();
                    state.baseline = next_version;
                    if state.seq == seq_at_capture {
                        state.snapshot = outgoing;
                        state.dirty = false;
                        Some(state.snapshot.clone())
                    } else {
                        // An edit landed while the PUT was in flight.
                        // Keep dirty: the heartbeat pushes it as
                        // baseline + 1 on the next tick.
                        None
                    }
                };
                if let Some(snapshot) = committed {
                    if let Err(e) = self.cache.store_snapshot(&snapshot) {
                        warn!("cache write after push failed: {e}");
                    }
                }
                info!(version = next_version, "pushed snapshot");
                self.set_status(SyncStatus::Synced);
                *self.last_synced.write().unwrap() = Some(Utc::now());
            }
            Err(e) => self.report_remote_error("push", e),
        }
    }

    // ── Heartbeat ──────────────────────────────────────────────

    /// One heartbeat step: push if there are unsynced local changes,
    /// otherwise pull. Skipped entirely while a sync is in flight.
    pub async fn tick(&self) {
        if self.busy.load(Ordering::SeqCst) {
            return;
        }
        let dirty = self.state.read().unwrap().dirty;
        if dirty {
            self.push(None).await;
        } else {
            self.pull(false).await;
        }
    }

    /// Spawn the recurring background timer. The first tick fires
    /// immediately, which doubles as the boot-time sync.
    pub fn start_heartbeat(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.tick().await;
            }
        })
    }

    // ── Internals ──────────────────────────────────────────────

    fn try_busy(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.write().unwrap() = status;
    }

    fn report_remote_error(&self, op: &str, err: RemoteError) {
        match err {
            RemoteError::Unreachable(e) => {
                warn!("{op}: remote unreachable: {e}");
                self.set_status(SyncStatus::Offline);
            }
            RemoteError::Rejected { status, message } => {
                warn!("{op}: remote rejected request: HTTP {status} {message}");
                self.set_status(SyncStatus::Error {
                    message: format!("HTTP {status}: {message}"),
                });
            }
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{build_mutation, Intent, TaskStatus};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory document store with a switchable outage and a reject
    /// mode, standing in for the HTTP host.
    struct MemStore {
        doc: Mutex<Option<String>>,
        online: AtomicBool,
        reject: AtomicBool,
        puts: AtomicUsize,
    }

    impl MemStore {
        fn new() -> Arc<MemStore> {
            Arc::new(MemStore {
                doc: Mutex::new(None),
                online: AtomicBool::new(true),
                reject: AtomicBool::new(false),
                puts: AtomicUsize::new(0),
            })
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn set_reject(&self, reject: bool) {
            self.reject.store(reject, Ordering::SeqCst);
        }

        fn seed(&self, snapshot: &Snapshot) {
            *self.doc.lock().unwrap() = Some(serde_json::to_string(snapshot).unwrap());
        }

        fn document(&self) -> Option<Snapshot> {
            self.doc
                .lock()
                .unwrap()
                .as_ref()
                .map(|body| serde_json::from_str(body).unwrap())
        }
    }

    impl DocumentStore for MemStore {
        fn fetch(&self) -> Result<Option<String>, RemoteError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(RemoteError::Unreachable("simulated outage".into()));
            }
            Ok(self.doc.lock().unwrap().clone())
        }

        fn store(&self, body: &str) -> Result<(), RemoteError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(RemoteError::Unreachable("simulated outage".into()));
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(RemoteError::Rejected {
                    status: 400,
                    message: "document name rejected".into(),
                });
            }
            *self.doc.lock().unwrap() = Some(body.to_string());
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn temp_cache(name: &str) -> (CacheFile, String) {
        let path = format!("/tmp/prepboard_engine_{name}_{}.redb", std::process::id());
        let _ = fs::remove_file(&path);
        let cache = CacheFile::open(&path).unwrap();
        (cache, path)
    }

    /// Engine over a bare one-category board at the given version. Also
    /// returns a handle to the underlying cache for inspection.
    fn engine_at(
        store: &Arc<MemStore>,
        name: &str,
        version: u64,
    ) -> (Arc<SyncEngine>, CacheFile, String) {
        let (cache, path) = temp_cache(name);
        let mut board = Snapshot::empty();
        board.categories = vec!["PREP".to_string()];
        board.version = version;
        cache.store_snapshot(&board).unwrap();

        let engine =
            SyncEngine::new(Arc::clone(store) as Arc<dyn DocumentStore>, cache.clone(), "dana")
                .unwrap();
        (Arc::new(engine), cache, path)
    }

    fn remote_board(version: u64, titles: &[&str]) -> Snapshot {
        let mut board = Snapshot::empty();
        board.categories = vec!["PREP".to_string()];
        board.version = version;
        board.last_updated_by = "remote".to_string();
        board.tasks = titles
            .iter()
            .map(|title| Task {
                id: Uuid::new_v4(),
                category: "PREP".to_string(),
                title: title.to_string(),
                status: TaskStatus::Pending,
                notes: None,
                deadline: None,
                assignee: None,
                last_modified: Utc::now(),
            })
            .collect();
        board
    }

    fn add_task(engine: &Arc<SyncEngine>, title: &str) {
        let snapshot = engine.current_snapshot();
        let mutation = build_mutation(
            &snapshot,
            Intent::CreateTask {
                category: "PREP".into(),
                title: title.into(),
                notes: None,
                deadline: None,
                assignee: None,
            },
            "dana",
        )
        .unwrap();
        engine.mutate(mutation.tasks, mutation.categories, mutation.logs).unwrap();
    }

    #[tokio::test]
    async fn fresh_install_boots_the_starter_board() {
        let store = MemStore::new();
        let (cache, path) = temp_cache("starter");

        let engine =
            SyncEngine::new(Arc::clone(&store) as Arc<dyn DocumentStore>, cache.clone(), "dana")
                .unwrap();

        let board = engine.current_snapshot();
        assert!(!board.categories.is_empty());
        assert_eq!(board.version, 0);
        // The starter board is cached immediately so the next boot skips seeding.
        assert_eq!(cache.load_snapshot().unwrap().unwrap(), board);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn mutate_is_local_first() {
        let store = MemStore::new();
        store.set_online(false);
        let (engine, cache, path) = engine_at(&store, "local_first", 0);

        add_task(&engine, "Book venue");

        let board = engine.current_snapshot();
        assert_eq!(board.tasks.len(), 1);
        assert_eq!(board.tasks[0].title, "Book venue");
        assert_eq!(board.logs[0].action, "added \"Book venue\" to PREP");

        // Version only moves on a successful push.
        assert_eq!(engine.current_version(), 0);
        assert!(engine.has_unsynced_changes());

        // The cache already has the edit; the remote never saw anything.
        assert_eq!(cache.load_snapshot().unwrap().unwrap(), board);
        assert!(store.document().is_none());

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn offline_edits_survive_until_reconnect() {
        let store = MemStore::new();
        store.set_online(false);
        let (engine, _cache, path) = engine_at(&store, "offline", 0);

        add_task(&engine, "Book venue");
        add_task(&engine, "Order flowers");

        engine.push(None).await;
        assert_eq!(engine.sync_status(), SyncStatus::Offline);
        assert!(engine.has_unsynced_changes());
        assert_eq!(engine.current_version(), 0);

        store.set_online(true);
        engine.push(None).await;

        let remote = store.document().unwrap();
        assert_eq!(remote.version, 1);
        assert_eq!(remote.tasks, engine.current_snapshot().tasks);
        assert_eq!(remote.last_updated_by, "dana");
        assert!(!engine.has_unsynced_changes());
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
        assert!(engine.last_synced_at().is_some());

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn pull_adopts_newer_remote() {
        let store = MemStore::new();
        store.seed(&remote_board(5, &["Hire the band"]));
        let (engine, _cache, path) = engine_at(&store, "adopt", 3);

        engine.pull(false).await;

        let board = engine.current_snapshot();
        assert_eq!(engine.current_version(), 5);
        assert_eq!(board.tasks.len(), 1);
        assert_eq!(board.tasks[0].title, "Hire the band");
        assert_eq!(engine.sync_status(), SyncStatus::Synced);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn pull_discards_stale_remote() {
        let store = MemStore::new();
        store.seed(&remote_board(2, &["Stale task"]));
        let (engine, _cache, path) = engine_at(&store, "stale", 5);

        let before = engine.current_snapshot();
        engine.pull(false).await;

        assert_eq!(engine.current_snapshot(), before);
        assert_eq!(engine.current_version(), 5);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn pull_is_idempotent() {
        let store = MemStore::new();
        store.seed(&remote_board(5, &["Hire the band"]));
        let (engine, _cache, path) = engine_at(&store, "idempotent", 0);

        engine.pull(false).await;
        let first = engine.current_snapshot();

        engine.pull(false).await;
        assert_eq!(engine.current_snapshot(), first);
        assert_eq!(engine.current_version(), 5);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn manual_pull_seeds_a_missing_document() {
        let store = MemStore::new();
        let (engine, _cache, path) = engine_at(&store, "seed", 0);

        engine.pull(true).await;

        let remote = store.document().unwrap();
        assert_eq!(remote.version, 1);
        assert_eq!(remote.categories, vec!["PREP".to_string()]);
        assert_eq!(engine.current_version(), 1);
        assert_eq!(engine.sync_status(), SyncStatus::Synced);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn background_pull_leaves_a_missing_document_alone() {
        let store = MemStore::new();
        let (engine, _cache, path) = engine_at(&store, "no_seed", 0);

        engine.pull(false).await;

        assert!(store.document().is_none());
        assert_eq!(engine.current_version(), 0);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn unsynced_local_changes_block_pulls() {
        let store = MemStore::new();
        store.set_online(false);
        let (engine, _cache, path) = engine_at(&store, "dirty_pull", 0);

        add_task(&engine, "Book venue");
        store.set_online(true);
        store.seed(&remote_board(99, &["Someone else's board"]));

        engine.pull(false).await;

        // Local edits take priority; the remote board was not adopted.
        let board = engine.current_snapshot();
        assert_eq!(board.tasks[0].title, "Book venue");
        assert_eq!(engine.current_version(), 0);
        assert!(engine.has_unsynced_changes());

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn version_strictly_increases_across_pushes() {
        let store = MemStore::new();
        let (engine, _cache, path) = engine_at(&store, "monotonic", 0);

        for (i, title) in ["one", "two", "three"].iter().enumerate() {
            let before = engine.current_version();
            add_task(&engine, title);
            engine.push(None).await;
            assert_eq!(engine.current_version(), (i as u64) + 1);
            assert!(engine.current_version() > before);
        }

        assert_eq!(store.document().unwrap().version, 3);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn rejected_write_surfaces_status_detail() {
        let store = MemStore::new();
        store.set_reject(true);
        let (engine, _cache, path) = engine_at(&store, "rejected", 0);

        add_task(&engine, "Book venue");
        engine.push(None).await;

        match engine.sync_status() {
            SyncStatus::Error { message } => assert!(message.contains("400"), "{message}"),
            other => panic!("expected Error status, got {other:?}"),
        }
        // The edit is still pending; a fixed remote would pick it up.
        assert!(engine.has_unsynced_changes());

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn malformed_remote_document_sets_error_without_losing_state() {
        let store = MemStore::new();
        *store.doc.lock().unwrap() = Some("{not json".to_string());
        let (engine, _cache, path) = engine_at(&store, "malformed", 0);

        let before = engine.current_snapshot();
        engine.pull(false).await;

        assert!(matches!(engine.sync_status(), SyncStatus::Error { .. }));
        assert_eq!(engine.current_snapshot(), before);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn adopted_snapshot_is_log_capped() {
        let store = MemStore::new();
        let mut board = remote_board(5, &[]);
        for i in 0..60 {
            board
                .logs
                .push(LogEntry::system_event("Prep", "remote", format!("event {i}")));
        }
        store.seed(&board);
        let (engine, _cache, path) = engine_at(&store, "log_cap", 0);

        engine.pull(false).await;

        assert_eq!(engine.current_snapshot().logs.len(), LOG_CAP);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn tick_pushes_when_dirty_and_pulls_when_clean() {
        let store = MemStore::new();
        store.set_online(false);
        let (engine, _cache, path) = engine_at(&store, "tick", 0);

        add_task(&engine, "Book venue");
        store.set_online(true);

        engine.tick().await;
        assert!(!engine.has_unsynced_changes());
        assert_eq!(store.document().unwrap().version, 1);

        // Clean now; another participant bumps the document.
        store.seed(&remote_board(7, &["From elsewhere"]));
        engine.tick().await;
        assert_eq!(engine.current_version(), 7);
        assert_eq!(engine.current_snapshot().tasks[0].title, "From elsewhere");

        let _ = fs::remove_file(path);
    }
}
