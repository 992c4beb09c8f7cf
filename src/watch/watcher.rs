//! Per-operation phase watcher.
//!
//! One watcher tracks one logical request: the interception side calls
//! [`PhaseWatcher::set_phase`] as the call advances, the strategy side awaits
//! [`PhaseWatcher::watch`]. The two sides may live in different execution
//! contexts; they share only the store and the bus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::types::{Phase, PhaseRecord};
use crate::error::{WireError, WireResult};
use crate::sync::events::{PhaseBus, PhaseEvent};
use crate::sync::store::{phase_key, SharedStore};

pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(6);

/// At-most-one active watcher per bridge; shared with the interceptor.
pub type WatcherSlot = Arc<tokio::sync::Mutex<Option<Arc<PhaseWatcher>>>>;

pub struct PhaseWatcher {
    request_id: String,
    /// Substring a call's URL must contain to belong to this operation.
    pub match_source_url: String,
    /// Synthetic endpoint a redirected call is issued against instead.
    pub replace_url: Option<String>,
    timeout: Duration,
    key: String,
    store: Arc<dyn SharedStore>,
    bus: Arc<PhaseBus>,
    /// Last phase seen by either side; the timeout only fires from INIT.
    phase: Mutex<Phase>,
}

impl PhaseWatcher {
    pub fn new(
        store: Arc<dyn SharedStore>,
        bus: Arc<PhaseBus>,
        match_source_url: impl Into<String>,
        timeout: Duration,
        request_id: impl Into<String>,
        replace_url: Option<String>,
    ) -> Arc<Self> {
        let match_source_url = match_source_url.into();
        let request_id = request_id.into();
        let key = phase_key(&request_id, &match_source_url);
        debug!("watcher {}: key {}", request_id, key);
        Arc::new(Self {
            request_id,
            match_source_url,
            replace_url,
            timeout,
            key,
            store,
            bus,
            phase: Mutex::new(Phase::Init),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase_key(&self) -> &str {
        &self.key
    }

    pub fn matches(&self, url: &str) -> bool {
        !self.match_source_url.is_empty() && url.contains(&self.match_source_url)
    }

    /// Write a phase record to the store and mirror it on the bus.
    /// Callable from the interception side.
    pub async fn set_phase(&self, phase: Phase, payload: Value) -> WireResult<()> {
        let record = PhaseRecord::new(&self.request_id, phase, payload);
        *self.phase.lock().unwrap() = phase;
        self.store
            .set(&self.key, serde_json::to_value(&record)?)
            .await?;
        self.bus.emit(PhaseEvent {
            key: self.key.clone(),
            phase,
            record,
        });
        debug!("watcher {}: phase -> {}", self.request_id, phase);
        Ok(())
    }

    /// Last record written for this key, if any.
    pub async fn phase_data(&self) -> WireResult<Option<PhaseRecord>> {
        match self.store.get(&self.key).await? {
            Some(v) => Ok(serde_json::from_value(v).ok()),
            None => Ok(None),
        }
    }

    /// Await the operation's outcome.
    ///
    /// Resolves with the phase record once `break_phase` (or DATA, which is
    /// always terminal) is observed; rejects on ERROR; rejects with a timeout
    /// only if still in INIT when the deadline elapses — progress past INIT
    /// keeps the wait alive until the operation settles. The store is
    /// re-checked before subscribing so a write that raced the subscription
    /// is not lost. The bus subscription is dropped on every settle path.
    pub async fn watch(&self, break_phase: Phase) -> WireResult<PhaseRecord> {
        let mut rx = self.bus.subscribe();

        // A record may already be present: either the phase advanced before
        // this call, or a stale record shares the key. Correlation-ID
        // uniqueness per command is what keeps the latter out in practice.
        if let Some(existing) = self.phase_data().await? {
            *self.phase.lock().unwrap() = existing.phase;
            if let Some(settled) = Self::classify(existing, break_phase) {
                return settled;
            }
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut deadline_armed = true;

        loop {
            tokio::select! {
                _ = &mut deadline, if deadline_armed => {
                    if *self.phase.lock().unwrap() == Phase::Init {
                        return Err(WireError::Timeout {
                            pattern: self.match_source_url.clone(),
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    // Past INIT: the call is in flight, let it settle.
                    deadline_armed = false;
                }
                evt = rx.recv() => match evt {
                    Ok(evt) if evt.key == self.key => {
                        *self.phase.lock().unwrap() = evt.phase;
                        if let Some(settled) = Self::classify(evt.record, break_phase) {
                            return settled;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("watcher {}: lagged {} events, re-checking store", self.request_id, n);
                        if let Some(existing) = self.phase_data().await? {
                            *self.phase.lock().unwrap() = existing.phase;
                            if let Some(settled) = Self::classify(existing, break_phase) {
                                return settled;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WireError::Phase("phase bus closed".to_string()));
                    }
                },
            }
        }
    }

    /// Terminal-phase classification shared by the re-check and event paths.
    /// `None` means "keep waiting".
    fn classify(record: PhaseRecord, break_phase: Phase) -> Option<WireResult<PhaseRecord>> {
        match record.phase {
            Phase::Error => Some(Err(WireError::Phase(
                serde_json::to_string(&record.payload).unwrap_or_default(),
            ))),
            p if p == break_phase || p == Phase::Data => Some(Ok(record)),
            _ => None,
        }
    }

    /// Abandon the operation: remove the stored record so a later watcher
    /// reusing this key cannot resolve on stale data. Subscriptions are
    /// local to `watch` and die with its future.
    pub async fn cleanup(&self) -> WireResult<()> {
        self.store.remove(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStore;
    use serde_json::json;

    fn watcher(timeout: Duration) -> Arc<PhaseWatcher> {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(PhaseBus::new());
        PhaseWatcher::new(store, bus, "/api/v2/chat/completions", timeout, "r1", None)
    }

    #[tokio::test]
    async fn resolves_on_break_phase_only() {
        let w = watcher(Duration::from_secs(1));
        let w2 = w.clone();
        let waiting = tokio::spawn(async move { w2.watch(Phase::Data).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        w.set_phase(Phase::Request, json!({"url": "u"})).await.unwrap();
        w.set_phase(Phase::Headers, json!({})).await.unwrap();
        w.set_phase(Phase::Fetch, json!({})).await.unwrap();
        // FETCH must not resolve a DATA-break watcher.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        w.set_phase(Phase::Data, json!({"body": "answer"})).await.unwrap();
        let rec = waiting.await.unwrap().unwrap();
        assert_eq!(rec.phase, Phase::Data);
        assert_eq!(rec.payload["body"], "answer");
        assert_eq!(rec.request_id, "r1");
    }

    #[tokio::test]
    async fn fetch_break_phase_resolves_at_fetch() {
        let w = watcher(Duration::from_secs(1));
        let w2 = w.clone();
        let waiting = tokio::spawn(async move { w2.watch(Phase::Fetch).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        w.set_phase(Phase::Fetch, json!({"method": "POST"})).await.unwrap();
        let rec = waiting.await.unwrap().unwrap();
        assert_eq!(rec.phase, Phase::Fetch);
    }

    #[tokio::test]
    async fn error_phase_rejects() {
        let w = watcher(Duration::from_secs(1));
        let w2 = w.clone();
        let waiting = tokio::spawn(async move { w2.watch(Phase::Data).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        w.set_phase(Phase::Error, json!({"error": "connection reset"}))
            .await
            .unwrap();
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, WireError::Phase(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn times_out_from_init_within_slack() {
        let w = watcher(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let err = w.watch(Phase::Data).await.unwrap_err();
        assert!(matches!(err, WireError::Timeout { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(45), "fired early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "fired late: {elapsed:?}");
    }

    #[tokio::test]
    async fn progress_past_init_disarms_the_timeout() {
        let w = watcher(Duration::from_millis(40));
        let w2 = w.clone();
        let waiting = tokio::spawn(async move { w2.watch(Phase::Data).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        w.set_phase(Phase::Request, json!({})).await.unwrap();

        // Deadline passes with the call in flight; the watch stays alive.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiting.is_finished());

        w.set_phase(Phase::Data, json!({})).await.unwrap();
        assert!(waiting.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn pre_existing_record_resolves_immediately() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(PhaseBus::new());
        let writer = PhaseWatcher::new(
            store.clone(),
            bus.clone(),
            "/api/chat",
            Duration::from_secs(1),
            "r7",
            None,
        );
        writer.set_phase(Phase::Data, json!({"body": "early"})).await.unwrap();

        // A reader constructed afterwards must not miss the write.
        let reader = PhaseWatcher::new(store, bus, "/api/chat", Duration::from_secs(1), "r7", None);
        let rec = reader.watch(Phase::Data).await.unwrap();
        assert_eq!(rec.payload["body"], "early");
    }

    #[tokio::test]
    async fn independent_keys_do_not_interfere() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(PhaseBus::new());
        let a = PhaseWatcher::new(
            store.clone(),
            bus.clone(),
            "/api/a",
            Duration::from_millis(50),
            "ra",
            None,
        );
        let b = PhaseWatcher::new(store, bus, "/api/b", Duration::from_secs(1), "rb", None);

        // `a` times out; `b`, on a different key, is unaffected and resolves.
        let b2 = b.clone();
        let b_wait = tokio::spawn(async move { b2.watch(Phase::Data).await });
        assert!(a.watch(Phase::Data).await.is_err());
        b.set_phase(Phase::Data, json!({})).await.unwrap();
        assert!(b_wait.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cleanup_removes_the_stored_record() {
        let w = watcher(Duration::from_secs(1));
        w.set_phase(Phase::Data, json!({})).await.unwrap();
        assert!(w.phase_data().await.unwrap().is_some());
        w.cleanup().await.unwrap();
        assert!(w.phase_data().await.unwrap().is_none());
    }
}
