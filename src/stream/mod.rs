// src/stream/mod.rs
// Event stream reconciler: a gap-free, in-order view over a lossy push channel
//
// The server stamps every event with a monotonically increasing `seq`.
// This client applies events strictly in sequence: a gap buffers the
// out-of-order event and fetches the missing range over request/response;
// a reconnect catches up the same way with bounded backoff; an
// independent heartbeat poll covers silent link failures. When the server
// has already discarded part of the missing range (`truncated`), the
// reconciler latches into a resync state and applies nothing until the
// consumer acknowledges a wholesale reload.

use crate::error::{ContextError, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// One stream event as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(rename = "emittedAt")]
    pub emitted_at: i64,
}

/// Catch-up response: ordered events newer than the requested seq.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissedBatch {
    pub events: Vec<Event>,
    pub truncated: bool,
    #[serde(rename = "latestSeq")]
    pub latest_seq: u64,
}

/// Request/response channel used to fill gaps and poll for missed events.
#[async_trait]
pub trait CatchUpClient: Send + Sync {
    /// Ordered events with `seq > since_seq`, at most `limit` of them.
    async fn fetch_missed(&self, since_seq: u64, limit: usize) -> Result<MissedBatch>;

    /// Cheap poll for anything newer than `since_seq`.
    async fn poll(&self, since_seq: u64) -> Result<MissedBatch>;
}

/// Receives reconciled events, strictly in `seq` order.
pub trait EventConsumer: Send + Sync {
    fn apply(&self, event: &Event);

    /// The missing range is unrecoverable; reload state wholesale, then
    /// call `acknowledge_resync`.
    fn resync_required(&self, latest_seq: u64);
}

/// Tuning knobs for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cap on events per catch-up fetch; a truncated response triggers resync
    pub fetch_limit: usize,
    /// Cadence of the fallback poll
    pub heartbeat_interval: Duration,
    /// Catch-up attempts per reconnect before giving up
    pub max_reconnect_attempts: u32,
    /// First reconnect backoff; doubles per attempt
    pub base_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 1_000,
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 6,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Mutable position in the stream.
struct StreamPosition {
    last_seq: u64,
    /// Out-of-order events parked until their predecessors arrive
    buffer: BTreeMap<u64, Event>,
    /// Set when the server lost part of the missing range; nothing is
    /// applied until the consumer acknowledges
    resync_pending: bool,
}

/// Client-side stream reconciler.
pub struct Reconciler {
    client: Arc<dyn CatchUpClient>,
    consumer: Arc<dyn EventConsumer>,
    config: ReconcilerConfig,
    state: Mutex<StreamPosition>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn CatchUpClient>,
        consumer: Arc<dyn EventConsumer>,
        initial_seq: u64,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            consumer,
            config,
            state: Mutex::new(StreamPosition {
                last_seq: initial_seq,
                buffer: BTreeMap::new(),
                resync_pending: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Highest sequence number applied so far.
    pub async fn last_seq(&self) -> u64 {
        self.state.lock().await.last_seq
    }

    /// Whether the reconciler is waiting on a wholesale reload.
    pub async fn is_resync_pending(&self) -> bool {
        self.state.lock().await.resync_pending
    }

    /// Feed one event from the push channel.
    ///
    /// In-sequence events apply immediately; duplicates are no-ops; a gap
    /// buffers the event and fetches the missing range.
    pub async fn on_event(&self, event: Event) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.resync_pending {
            tracing::debug!(seq = event.seq, "dropping event while resync is pending");
            return Ok(());
        }
        if event.seq <= state.last_seq {
            return Ok(());
        }
        if event.seq == state.last_seq + 1 {
            self.apply(&mut state, event);
            self.drain_buffer(&mut state);
            return Ok(());
        }

        tracing::debug!(
            seq = event.seq,
            last_seq = state.last_seq,
            "gap detected, fetching missed events"
        );
        state.buffer.insert(event.seq, event);
        let since = state.last_seq;
        let batch = self.fetch_with_cancel(since).await?;
        self.ingest_batch(&mut state, batch)
    }

    /// The push channel reconnected: fetch everything missed while away.
    ///
    /// Transport failures retry with bounded exponential backoff and
    /// jitter; attempts and delays are both capped.
    pub async fn on_reconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.resync_pending {
            return Err(ContextError::ResyncRequired {
                latest_seq: state.last_seq,
            });
        }

        let mut delay = self.config.base_backoff;
        let mut attempt = 0;
        loop {
            match self.fetch_with_cancel(state.last_seq).await {
                Ok(batch) => return self.ingest_batch(&mut state, batch),
                Err(e @ ContextError::ResyncRequired { .. }) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_reconnect_attempts {
                        return Err(e);
                    }
                    let jitter = rand::rng().random_range(0.75..1.25);
                    let sleep_for = delay.mul_f64(jitter).min(self.config.max_backoff);
                    tracing::warn!(
                        attempt,
                        "reconnect catch-up failed, retrying in {:?}: {}",
                        sleep_for,
                        e
                    );
                    tokio::time::sleep(sleep_for).await;
                    delay = (delay * 2).min(self.config.max_backoff);
                }
            }
        }
    }

    /// The consumer reloaded state wholesale; resume from `seq`.
    pub async fn acknowledge_resync(&self, seq: u64) {
        let mut state = self.state.lock().await;
        state.last_seq = seq;
        state.buffer.clear();
        state.resync_pending = false;
    }

    /// Start the fallback poll loop. Runs until `shutdown`.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(this.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            // so the heartbeat waits a full period before its first poll.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.heartbeat_poll().await {
                            match e {
                                ContextError::ResyncRequired { .. } => {
                                    // Consumer already notified; keep ticking
                                    // until it acknowledges
                                }
                                e => tracing::warn!("heartbeat poll failed: {}", e),
                            }
                        }
                    }
                }
            }
        })
    }

    async fn heartbeat_poll(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.resync_pending {
            return Ok(());
        }
        let since = state.last_seq;
        let batch = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ContextError::Timeout("reconciler shut down"));
            }
            result = self.client.poll(since) => result?,
        };
        self.ingest_batch(&mut state, batch)
    }

    /// Cancel all pending network calls and the heartbeat timer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn apply(&self, state: &mut StreamPosition, event: Event) {
        self.consumer.apply(&event);
        state.last_seq = event.seq;
    }

    /// Apply buffered events that have become contiguous.
    fn drain_buffer(&self, state: &mut StreamPosition) {
        while let Some((&seq, _)) = state.buffer.first_key_value() {
            if seq <= state.last_seq {
                state.buffer.remove(&seq);
            } else if seq == state.last_seq + 1 {
                if let Some(event) = state.buffer.remove(&seq) {
                    self.apply(state, event);
                }
            } else {
                break;
            }
        }
    }

    /// Fold a catch-up batch into the stream, honoring truncation.
    fn ingest_batch(&self, state: &mut StreamPosition, batch: MissedBatch) -> Result<()> {
        if batch.truncated {
            state.resync_pending = true;
            state.buffer.clear();
            self.consumer.resync_required(batch.latest_seq);
            return Err(ContextError::ResyncRequired {
                latest_seq: batch.latest_seq,
            });
        }

        let mut events = batch.events;
        events.sort_by_key(|e| e.seq);
        for event in events {
            if event.seq <= state.last_seq {
                continue;
            }
            if event.seq == state.last_seq + 1 {
                self.apply(state, event);
            } else {
                state.buffer.insert(event.seq, event);
            }
        }
        self.drain_buffer(state);
        Ok(())
    }

    async fn fetch_with_cancel(&self, since_seq: u64) -> Result<MissedBatch> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ContextError::Timeout("reconciler shut down")),
            result = self.client.fetch_missed(since_seq, self.config.fetch_limit) => result,
        }
    }
}

// ============================================================================
// HTTP catch-up client
// ============================================================================

/// Budget for a catch-up fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for a heartbeat poll.
const POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Catch-up over plain HTTP endpoints.
pub struct HttpCatchUpClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatchUpClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_batch(&self, url: String, timeout: Duration) -> Result<MissedBatch> {
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ContextError::Timeout("event catch-up")
                } else {
                    ContextError::Http(e)
                }
            })?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatchUpClient for HttpCatchUpClient {
    async fn fetch_missed(&self, since_seq: u64, limit: usize) -> Result<MissedBatch> {
        let url = format!(
            "{}/events/missed?since_seq={since_seq}&limit={limit}",
            self.base_url
        );
        self.get_batch(url, FETCH_TIMEOUT).await
    }

    async fn poll(&self, since_seq: u64) -> Result<MissedBatch> {
        let url = format!("{}/events/poll?since_seq={since_seq}", self.base_url);
        self.get_batch(url, POLL_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(seq: u64) -> Event {
        Event {
            seq,
            event_type: "task_updated".to_string(),
            payload: serde_json::json!({}),
            emitted_at: 1_700_000_000_000 + seq as i64,
        }
    }

    /// Records applied seqs and resync notifications.
    #[derive(Default)]
    struct RecordingConsumer {
        applied: StdMutex<Vec<u64>>,
        resyncs: StdMutex<Vec<u64>>,
    }

    impl EventConsumer for RecordingConsumer {
        fn apply(&self, event: &Event) {
            self.applied.lock().unwrap().push(event.seq);
        }

        fn resync_required(&self, latest_seq: u64) {
            self.resyncs.lock().unwrap().push(latest_seq);
        }
    }

    /// Serves events from a fixed log; optionally truncated or failing.
    struct FakeClient {
        log: Vec<Event>,
        truncated: bool,
        failures_before_success: AtomicU32,
    }

    impl FakeClient {
        fn with_log(seqs: &[u64]) -> Self {
            Self {
                log: seqs.iter().map(|&s| event(s)).collect(),
                truncated: false,
                failures_before_success: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CatchUpClient for FakeClient {
        async fn fetch_missed(&self, since_seq: u64, limit: usize) -> Result<MissedBatch> {
            if self
                .failures_before_success
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ContextError::Timeout("fake transport"));
            }
            let events: Vec<Event> = self
                .log
                .iter()
                .filter(|e| e.seq > since_seq)
                .take(limit)
                .cloned()
                .collect();
            Ok(MissedBatch {
                latest_seq: self.log.last().map(|e| e.seq).unwrap_or(since_seq),
                truncated: self.truncated,
                events,
            })
        }

        async fn poll(&self, since_seq: u64) -> Result<MissedBatch> {
            self.fetch_missed(since_seq, usize::MAX).await
        }
    }

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_reconnect_attempts: 3,
            heartbeat_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn reconciler(
        client: FakeClient,
        initial_seq: u64,
    ) -> (Arc<Reconciler>, Arc<RecordingConsumer>) {
        let consumer = Arc::new(RecordingConsumer::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(client),
            consumer.clone(),
            initial_seq,
            fast_config(),
        ));
        (reconciler, consumer)
    }

    #[tokio::test]
    async fn test_in_sequence_events_apply_directly() {
        let (reconciler, consumer) = reconciler(FakeClient::with_log(&[]), 100);

        reconciler.on_event(event(101)).await.unwrap();
        reconciler.on_event(event(102)).await.unwrap();

        assert_eq!(*consumer.applied.lock().unwrap(), vec![101, 102]);
        assert_eq!(reconciler.last_seq().await, 102);
    }

    #[tokio::test]
    async fn test_gap_is_filled_from_catch_up() {
        // Server log holds everything; push channel skips 102
        let (reconciler, consumer) = reconciler(FakeClient::with_log(&[101, 102, 103]), 100);

        reconciler.on_event(event(101)).await.unwrap();
        reconciler.on_event(event(103)).await.unwrap();

        assert_eq!(*consumer.applied.lock().unwrap(), vec![101, 102, 103]);
        assert_eq!(reconciler.last_seq().await, 103);
    }

    #[tokio::test]
    async fn test_duplicates_are_idempotent() {
        let (reconciler, consumer) = reconciler(FakeClient::with_log(&[]), 100);

        reconciler.on_event(event(101)).await.unwrap();
        reconciler.on_event(event(101)).await.unwrap();
        reconciler.on_event(event(99)).await.unwrap();

        assert_eq!(*consumer.applied.lock().unwrap(), vec![101]);
    }

    #[tokio::test]
    async fn test_applied_run_is_contiguous() {
        let (reconciler, consumer) =
            reconciler(FakeClient::with_log(&[101, 102, 103, 104, 105]), 100);

        // Arbitrary arrival order
        reconciler.on_event(event(104)).await.unwrap();
        reconciler.on_event(event(102)).await.unwrap();
        reconciler.on_event(event(105)).await.unwrap();

        let applied = consumer.applied.lock().unwrap().clone();
        assert_eq!(applied, vec![101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn test_reconnect_catches_up() {
        let (reconciler, consumer) = reconciler(FakeClient::with_log(&[101, 102]), 100);

        reconciler.on_reconnect().await.unwrap();

        assert_eq!(*consumer.applied.lock().unwrap(), vec![101, 102]);
    }

    #[tokio::test]
    async fn test_reconnect_retries_with_bounded_backoff() {
        let client = FakeClient {
            log: vec![event(101)],
            truncated: false,
            failures_before_success: AtomicU32::new(2),
        };
        let (reconciler, consumer) = reconciler(client, 100);

        reconciler.on_reconnect().await.unwrap();
        assert_eq!(*consumer.applied.lock().unwrap(), vec![101]);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let client = FakeClient {
            log: vec![event(101)],
            truncated: false,
            failures_before_success: AtomicU32::new(100),
        };
        let (reconciler, consumer) = reconciler(client, 100);

        assert!(reconciler.on_reconnect().await.is_err());
        assert!(consumer.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_catch_up_forces_resync() {
        let client = FakeClient {
            log: vec![event(102), event(103)],
            truncated: true,
            failures_before_success: AtomicU32::new(0),
        };
        let (reconciler, consumer) = reconciler(client, 100);

        let err = reconciler.on_event(event(103)).await.unwrap_err();
        assert!(matches!(err, ContextError::ResyncRequired { latest_seq: 103 }));

        // Nothing applied; consumer notified; further pushes are dropped
        assert!(consumer.applied.lock().unwrap().is_empty());
        assert_eq!(*consumer.resyncs.lock().unwrap(), vec![103]);
        assert!(reconciler.is_resync_pending().await);

        reconciler.on_event(event(104)).await.unwrap();
        assert!(consumer.applied.lock().unwrap().is_empty());

        // After acknowledgement the stream resumes from the new position
        reconciler.acknowledge_resync(103).await;
        reconciler.on_event(event(104)).await.unwrap();
        assert_eq!(*consumer.applied.lock().unwrap(), vec![104]);
    }

    #[tokio::test]
    async fn test_heartbeat_poll_picks_up_missed_events() {
        let (reconciler, consumer) = reconciler(FakeClient::with_log(&[101, 102]), 100);

        let handle = reconciler.spawn_heartbeat();
        tokio::time::sleep(Duration::from_millis(80)).await;
        reconciler.shutdown();
        let _ = handle.await;

        assert_eq!(*consumer.applied.lock().unwrap(), vec![101, 102]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_calls() {
        struct HangingClient;

        #[async_trait]
        impl CatchUpClient for HangingClient {
            async fn fetch_missed(&self, _since_seq: u64, _limit: usize) -> Result<MissedBatch> {
                std::future::pending().await
            }

            async fn poll(&self, _since_seq: u64) -> Result<MissedBatch> {
                std::future::pending().await
            }
        }

        let consumer = Arc::new(RecordingConsumer::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(HangingClient),
            consumer,
            100,
            fast_config(),
        ));

        let pending = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.on_reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        reconciler.shutdown();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ContextError::Timeout(_))));
    }

    #[test]
    fn test_wire_shapes_round_trip() {
        let batch = MissedBatch {
            events: vec![event(7)],
            truncated: false,
            latest_seq: 7,
        };
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("\"latestSeq\":7"));
        assert!(json.contains("\"type\":\"task_updated\""));
        assert!(json.contains("\"emittedAt\""));

        let back: MissedBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }
}
