use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::StreamExt;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{EngineAdapter, Event, PROJECT_UNKNOWN};
use crate::backoff::{Backoff, BackoffOutcome, NeverRetry};
use crate::error::{AdapterError, WatchError};
use crate::model::Portfolio;
use crate::pending::PendingPauseQueue;

/// State serialized by the "event gate": whether enumeration is in
/// progress, which ids died during that window, and the pending pause
/// queue.
#[derive(Default)]
struct EventGate {
    list_in_progress: bool,
    died_during_list: Vec<String>,
    pending_pauses: PendingPauseQueue,
}

/// Ties a live event stream to the reconciliation state machine.
///
/// Owns exactly one adapter; `watch` drives the retry loop until the
/// supplied cancellation token fires or the backoff policy gives up.
pub struct Watcher {
    adapter: Arc<dyn EngineAdapter>,
    backoff: Box<dyn Backoff>,
    portfolio: ArcSwap<Portfolio>,
    gate: Mutex<EventGate>,
    ready_fired: AtomicBool,
    ready_notify: Notify,
}

/// Outcome of a single iteration of the re-sync protocol.
enum IterationResult {
    /// Enumeration succeeded and was promoted; continue the retry loop
    /// without sleeping.
    Resynced,
    Permanent,
    Transient(AdapterError),
}

impl Watcher {
    pub fn new(adapter: Arc<dyn EngineAdapter>) -> Self {
        Self::with_backoff(adapter, NeverRetry)
    }

    pub fn with_backoff(adapter: Arc<dyn EngineAdapter>, backoff: impl Backoff + 'static) -> Self {
        Self {
            adapter,
            backoff: Box::new(backoff),
            portfolio: ArcSwap::from_pointee(Portfolio::new()),
            gate: Mutex::new(EventGate::default()),
            ready_fired: AtomicBool::new(false),
            ready_notify: Notify::new(),
        }
    }

    /// A snapshot handle of the current read-side Portfolio. Callers MUST
    /// NOT retain this across a re-sync: a later call may return a
    /// different instance.
    pub fn portfolio(&self) -> Arc<Portfolio> {
        self.portfolio.load_full()
    }

    /// Completes once, after the first enumeration attempt (success or
    /// failure) has finished processing.
    pub async fn ready(&self) {
        if self.ready_fired.load(Ordering::Acquire) {
            return;
        }
        self.ready_notify.notified().await;
    }

    fn fire_ready(&self) {
        if !self.ready_fired.swap(true, Ordering::AcqRel) {
            self.ready_notify.notify_waiters();
        }
    }

    pub fn id(&self) -> &str {
        self.adapter.id()
    }

    pub fn engine_type(&self) -> &str {
        self.adapter.engine_type()
    }

    pub fn api(&self) -> &str {
        self.adapter.api()
    }

    pub fn pid(&self) -> u32 {
        self.adapter.pid()
    }

    /// The underlying raw client handle; downcast to the concrete type
    /// documented by the adapter that built this Watcher (e.g.
    /// `watch_docker` yields a [`crate::docker::DockerAdapter`], whose
    /// client downcasts to `&bollard::Docker`).
    pub fn client(&self) -> &(dyn std::any::Any + Send + Sync) {
        self.adapter.client()
    }

    pub async fn close(&self) {
        self.adapter.close().await;
    }

    /// Runs the retry loop until `cancellation` fires or the backoff
    /// policy gives up after a transient failure.
    pub async fn watch(&self, cancellation: CancellationToken) -> Result<(), WatchError> {
        let mut attempt: u32 = 1;
        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }

            match self.run_iteration(&cancellation).await {
                IterationResult::Resynced => {
                    attempt = 1;
                }
                IterationResult::Permanent => return Ok(()),
                IterationResult::Transient(err) => match self.backoff.next(attempt) {
                    BackoffOutcome::RetryAfter(delay) => {
                        warn!(error = %err, delay_ms = delay.as_millis(), "re-sync failed, backing off");
                        attempt += 1;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancellation.cancelled() => return Ok(()),
                        }
                    }
                    BackoffOutcome::GiveUp => return Err(WatchError::GaveUp(err)),
                },
            }
        }
    }

    /// One iteration of the re-sync protocol. Runs enumeration concurrently
    /// with event processing, promotes the write-side Portfolio on success,
    /// then keeps consuming events in steady state until the subscription
    /// itself ends or errors.
    async fn run_iteration(&self, cancellation: &CancellationToken) -> IterationResult {
        let write_side = Arc::new(Portfolio::new());
        if self.portfolio.load().container_total() == 0 {
            // No prior session state to protect; make updates visible
            // immediately rather than waiting for promotion.
            self.portfolio.store(write_side.clone());
        }

        let child_token = cancellation.child_token();
        let (mut events, mut errors) = match self.adapter.lifecycle_events(child_token.clone()).await {
            Ok(streams) => streams,
            Err(err) => {
                self.fire_ready();
                return IterationResult::Transient(err);
            }
        };

        {
            let mut gate = self.gate.lock().await;
            gate.list_in_progress = true;
        }

        let (list_tx, list_rx) = oneshot::channel();
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            let result = adapter.list().await;
            let _ = list_tx.send(result);
        });
        tokio::pin!(list_rx);
        let mut enumeration_pending = true;

        loop {
            if enumeration_pending {
                tokio::select! {
                    biased;

                    result = &mut list_rx => {
                        enumeration_pending = false;
                        let result = result.unwrap_or_else(|_| Err(AdapterError::other(EnumerationTaskLost)));
                        match result {
                            Ok(containers) => {
                                self.finalize_enumeration(&write_side, containers).await;
                                self.portfolio.store(write_side.clone());
                                self.fire_ready();
                            }
                            Err(err) => {
                                self.fire_ready();
                                self.clear_gate_after_failed_enumeration().await;
                                child_token.cancel();
                                return IterationResult::Transient(err);
                            }
                        }
                    }

                    maybe_event = events.next() => {
                        match maybe_event {
                            Some(event) => self.handle_event(&write_side, event).await,
                            None => {
                                self.fire_ready();
                                self.clear_gate_after_failed_enumeration().await;
                                return IterationResult::Transient(AdapterError::other(StreamEndedEarly));
                            }
                        }
                    }

                    maybe_err = errors.next() => {
                        if let Some(err) = maybe_err {
                            self.fire_ready();
                            self.clear_gate_after_failed_enumeration().await;
                            return self.classify_stream_error(cancellation, err);
                        }
                    }
                }
            } else {
                // Steady state: enumeration already promoted, keep
                // mutating the (now read-side) Portfolio directly until
                // the subscription ends or errors.
                tokio::select! {
                    maybe_event = events.next() => {
                        match maybe_event {
                            Some(event) => self.handle_event(&write_side, event).await,
                            None => return IterationResult::Resynced,
                        }
                    }

                    maybe_err = errors.next() => {
                        match maybe_err {
                            Some(err) => return self.classify_stream_error(cancellation, err),
                            None => return IterationResult::Resynced,
                        }
                    }
                }
            }
        }
    }

    fn classify_stream_error(&self, cancellation: &CancellationToken, err: AdapterError) -> IterationResult {
        if matches!(err, AdapterError::Cancelled) && cancellation.is_cancelled() {
            IterationResult::Permanent
        } else {
            IterationResult::Transient(err)
        }
    }

    async fn clear_gate_after_failed_enumeration(&self) {
        let mut gate = self.gate.lock().await;
        gate.list_in_progress = false;
        gate.died_during_list.clear();
        gate.pending_pauses.drain();
    }

    /// Step 5 of the protocol: fold enumeration results into the write-side
    /// Portfolio, eliminating zombies and replaying queued pause events.
    async fn finalize_enumeration(&self, write_side: &Arc<Portfolio>, containers: Vec<crate::model::Container>) {
        let mut gate = self.gate.lock().await;

        for container in containers {
            if gate.died_during_list.iter().any(|id| id == container.id()) {
                continue;
            }
            write_side.add(container);
        }

        for (id, paused) in gate.pending_pauses.drain() {
            if let Ok(container) = write_side.container(&id) {
                if let Ok(project) = write_side.project(container.project()) {
                    let _ = project.set_paused(&id, paused);
                }
            }
        }

        gate.died_during_list.clear();
        gate.list_in_progress = false;
    }

    async fn handle_event(&self, write_side: &Arc<Portfolio>, event: Event) {
        match event {
            Event::Started { id, .. } => self.handle_started(write_side, id).await,
            Event::Exited { id, project } => self.handle_exited(write_side, id, project).await,
            Event::Paused { id, project } => self.handle_pause(write_side, id, project, true).await,
            Event::Unpaused { id, project } => self.handle_pause(write_side, id, project, false).await,
        }
    }

    async fn handle_started(&self, write_side: &Arc<Portfolio>, id: String) {
        match self.adapter.inspect(&id).await {
            Ok(container) => {
                write_side.add(container);
            }
            Err(err) if err.is_processless_or_not_found() => {
                debug!(id = %id, "dropping started event for processless/unknown container");
            }
            Err(err) => {
                warn!(id = %id, error = %err, "inspect failed for started event");
            }
        }
    }

    async fn handle_exited(&self, write_side: &Arc<Portfolio>, id: String, project: String) {
        {
            let mut gate = self.gate.lock().await;
            if gate.list_in_progress {
                gate.died_during_list.push(id.clone());
            }
            gate.pending_pauses.remove(&id);
        }
        if let Some(resolved) = self.resolve_project(write_side, &id, &project) {
            let _ = write_side.remove(&id, &resolved);
        }
    }

    async fn handle_pause(&self, write_side: &Arc<Portfolio>, id: String, project: String, paused: bool) {
        let queued = {
            let mut gate = self.gate.lock().await;
            if gate.list_in_progress {
                gate.pending_pauses.add(id.clone(), paused);
                true
            } else {
                false
            }
        };
        if queued {
            return;
        }

        match self.resolve_project(write_side, &id, &project) {
            Some(resolved) => {
                if let Ok(p) = write_side.project(&resolved) {
                    let _ = p.set_paused(&id, paused);
                }
            }
            None => {
                debug!(id = %id, "dropping pause event for unknown container with unresolved project");
            }
        }
    }

    /// Resolves an event's project, looking the container up in the
    /// write-side Portfolio when the adapter did not know it at emission
    /// time. Returns `None` if the project is unknown and the container
    /// cannot be found.
    fn resolve_project(&self, write_side: &Arc<Portfolio>, id: &str, project: &str) -> Option<String> {
        if project != PROJECT_UNKNOWN {
            return Some(project.to_string());
        }
        write_side.container(id).ok().map(|c| c.project().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("stream ended without a terminating error")]
struct StreamEndedEarly;

#[derive(Debug, thiserror::Error)]
#[error("enumeration task dropped its result channel")]
struct EnumerationTaskLost;

#[allow(dead_code)]
fn assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<Watcher>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ErrorStream, EventStream};
    use crate::model::Container;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// A scriptable adapter: each queued `list()` round blocks until its
    /// one-shot trigger is released, which lets tests interleave events
    /// against an in-flight enumeration deterministically, and lets a test
    /// script multiple enumeration rounds to exercise reconnection.
    struct MockAdapter {
        list_results: Mutex<VecDeque<Result<Vec<Container>, AdapterError>>>,
        list_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
        list_releases: Mutex<VecDeque<oneshot::Sender<()>>>,
        events_tx: Mutex<Option<mpsc::Sender<Event>>>,
        errors_tx: Mutex<Option<mpsc::Sender<AdapterError>>>,
        inspect_responses: Mutex<HashMap<String, Result<Container, AdapterError>>>,
        list_calls: AtomicUsize,
    }

    impl MockAdapter {
        fn new(containers: Vec<Container>) -> Arc<Self> {
            let adapter = Arc::new(Self {
                list_results: Mutex::new(VecDeque::new()),
                list_gates: Mutex::new(VecDeque::new()),
                list_releases: Mutex::new(VecDeque::new()),
                events_tx: Mutex::new(None),
                errors_tx: Mutex::new(None),
                inspect_responses: Mutex::new(HashMap::new()),
                list_calls: AtomicUsize::new(0),
            });
            adapter.queue_list(Ok(containers));
            adapter
        }

        /// Schedules another `list()` round, gated behind its own release.
        fn queue_list(&self, result: Result<Vec<Container>, AdapterError>) {
            let (tx, rx) = oneshot::channel();
            self.list_results.try_lock().unwrap().push_back(result);
            self.list_gates.try_lock().unwrap().push_back(rx);
            self.list_releases.try_lock().unwrap().push_back(tx);
        }

        /// Lets the oldest still-gated `list()` round proceed to return its
        /// scripted result.
        async fn release_list(&self) {
            if let Some(tx) = self.list_releases.lock().await.pop_front() {
                let _ = tx.send(());
            }
        }

        async fn send_event(&self, event: Event) {
            let tx = self.events_tx.lock().await.clone().expect("events channel not wired yet");
            tx.send(event).await.unwrap();
        }

        async fn send_error(&self, err: AdapterError) {
            let tx = self.errors_tx.lock().await.clone().expect("errors channel not wired yet");
            let _ = tx.send(err).await;
        }
    }

    #[async_trait::async_trait]
    impl EngineAdapter for MockAdapter {
        async fn list(&self) -> Result<Vec<Container>, AdapterError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.list_gates.lock().await.pop_front();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.list_results.lock().await.pop_front().unwrap_or(Ok(Vec::new()))
        }

        async fn inspect(&self, id_or_name: &str) -> Result<Container, AdapterError> {
            self.inspect_responses
                .lock()
                .await
                .get(id_or_name)
                .cloned()
                .unwrap_or_else(|| Err(AdapterError::NotFound(id_or_name.to_string())))
        }

        async fn lifecycle_events(
            &self,
            _cancellation: CancellationToken,
        ) -> Result<(EventStream, ErrorStream), AdapterError> {
            let (etx, erx) = mpsc::channel(16);
            let (xtx, xrx) = mpsc::channel(1);
            *self.events_tx.lock().await = Some(etx);
            *self.errors_tx.lock().await = Some(xtx);
            let events: EventStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(erx));
            let errors: ErrorStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(xrx));
            Ok((events, errors))
        }

        fn id(&self) -> &str {
            "mock"
        }

        fn engine_type(&self) -> &str {
            "mock.test"
        }

        fn version(&self) -> &str {
            "0"
        }

        fn api(&self) -> &str {
            "mock://"
        }

        fn pid(&self) -> u32 {
            0
        }

        fn client(&self) -> &(dyn std::any::Any + Send + Sync) {
            self
        }

        async fn close(&self) {}
    }

    fn container(id: &str, name: &str, project: &str) -> Container {
        Container::new(id, name, HashMap::new(), 1, project, false)
    }

    #[tokio::test]
    async fn empty_engine_fires_ready_with_empty_portfolio() {
        let adapter = MockAdapter::new(vec![]);
        adapter.release_list().await;
        let watcher = Arc::new(Watcher::new(adapter));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        watcher.ready().await;
        let portfolio = watcher.portfolio();
        assert_eq!(portfolio.container_total(), 0);
        assert!(portfolio.project("").is_ok());

        token.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn one_container_with_project_lands_in_portfolio() {
        let adapter = MockAdapter::new(vec![container("A", "ff", "grumpy")]);
        adapter.release_list().await;
        let watcher = Arc::new(Watcher::new(adapter));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        watcher.ready().await;
        let portfolio = watcher.portfolio();
        assert_eq!(portfolio.names(), vec!["grumpy".to_string()]);
        assert_eq!(
            portfolio.project("grumpy").unwrap().container_names(),
            vec!["ff".to_string()]
        );

        token.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn zombie_during_list_is_excluded() {
        let adapter = MockAdapter::new(vec![container("A", "a", ""), container("B", "b", "")]);
        let watcher = Arc::new(Watcher::new(adapter.clone()));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        // Give the watcher a moment to open its subscription and start
        // enumeration before we inject the Exited event.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter
            .send_event(Event::Exited {
                id: "A".to_string(),
                project: String::new(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter.release_list().await;

        watcher.ready().await;
        let portfolio = watcher.portfolio();
        assert!(portfolio.container("A").is_err());
        assert!(portfolio.container("B").is_ok());

        token.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn pause_during_list_is_applied_after_enumeration() {
        let adapter = MockAdapter::new(vec![container("A", "a", "")]);
        let watcher = Arc::new(Watcher::new(adapter.clone()));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter
            .send_event(Event::Paused {
                id: "A".to_string(),
                project: String::new(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter.release_list().await;

        watcher.ready().await;
        let container = watcher.portfolio().container("A").unwrap();
        assert!(container.paused());

        token.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn pause_then_die_during_list_leaves_no_ghost() {
        let adapter = MockAdapter::new(vec![container("A", "a", "")]);
        let watcher = Arc::new(Watcher::new(adapter.clone()));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter
            .send_event(Event::Paused {
                id: "A".to_string(),
                project: String::new(),
            })
            .await;
        adapter
            .send_event(Event::Exited {
                id: "A".to_string(),
                project: String::new(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter.release_list().await;

        watcher.ready().await;
        assert!(watcher.portfolio().container("A").is_err());

        token.cancel();
        let _ = task.await;
    }

    #[derive(Debug, thiserror::Error)]
    #[error("mock stream error")]
    struct MockStreamError;

    /// Always retries immediately; the default `NeverRetry` policy would
    /// give up on the first transient error this test injects.
    struct AlwaysRetryFast;

    impl Backoff for AlwaysRetryFast {
        fn next(&self, _attempt: u32) -> BackoffOutcome {
            BackoffOutcome::RetryAfter(std::time::Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn reconnect_preserves_snapshot_then_resyncs() {
        let adapter = MockAdapter::new(vec![container("A", "a", ""), container("B", "b", "")]);
        adapter.queue_list(Ok(vec![container("A", "a", ""), container("C", "c", "")]));
        adapter.release_list().await;

        let watcher = Arc::new(Watcher::with_backoff(adapter.clone(), AlwaysRetryFast));
        let token = CancellationToken::new();
        let w = watcher.clone();
        let t = token.clone();
        let task = tokio::spawn(async move { w.watch(t).await });

        watcher.ready().await;
        let first = watcher.portfolio();
        assert!(first.container("A").is_ok());
        assert!(first.container("B").is_ok());

        // A non-cancellation stream error is transient: the Watcher tears
        // down and starts a fresh enumeration round.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        adapter.send_error(AdapterError::other(MockStreamError)).await;

        // The second enumeration is still gated behind its own release, so
        // readers must keep observing the first snapshot (make-before-break).
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let during_resync = watcher.portfolio();
        assert!(during_resync.container("A").is_ok());
        assert!(during_resync.container("B").is_ok());

        adapter.release_list().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let after = watcher.portfolio();
        assert!(after.container("A").is_ok());
        assert!(after.container("B").is_err());
        assert!(after.container("C").is_ok());

        token.cancel();
        let _ = task.await;
    }
}
