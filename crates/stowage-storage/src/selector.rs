//! Backend selection and lifecycle.
//!
//! [`BackendSelector`] decides which storage backend is authoritative. The
//! decision runs at most once at a time: concurrent callers that arrive while a
//! run is in flight attach to that run and all observe its result.
//!
//! State machine:
//!
//! ```text
//! Uninitialized --first use--> Initializing --> Ready(active, using_remote)
//!                                           \-> Failed(reason)
//! Ready | Failed | Initializing --reinitialize--> Initializing
//! ```
//!
//! A reinitialize that arrives while a run is in flight chains the new run behind
//! the old one. Callers already waiting on the old run get its result, new callers
//! get the new run's result, and two runs never execute at the same time. A run
//! only publishes into the selector if it is still the newest one.

use crate::factory::{BackendFactory, DefaultBackendFactory};
use crate::traits::{ProbeOutcome, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stowage_core::StorageSettingsSource;

/// Externally visible selector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for SelectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectorState::Uninitialized => "uninitialized",
            SelectorState::Initializing => "initializing",
            SelectorState::Ready => "ready",
            SelectorState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Handle to the backend chosen by one selection run.
///
/// Borrow it for one operation; after a reinitialize ask the selector again.
#[derive(Clone)]
pub struct ActiveBackend {
    storage: Arc<dyn Storage>,
    generation: u64,
}

impl ActiveBackend {
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn backend(&self) -> StorageBackend {
        self.storage.backend_type()
    }

    pub fn is_remote(&self) -> bool {
        self.backend().is_remote()
    }

    /// Generation of the selection run that produced this backend.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when both handles point at the same backend instance.
    pub fn same_instance(&self, other: &ActiveBackend) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl Deref for ActiveBackend {
    type Target = dyn Storage;

    fn deref(&self) -> &Self::Target {
        self.storage.as_ref()
    }
}

impl fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("backend", &self.backend())
            .field("remote", &self.is_remote())
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Configuration,
    Exhausted,
    Aborted,
}

/// Why a selection run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectionFailure {
    kind: FailureKind,
    reason: String,
}

impl SelectionFailure {
    fn configuration(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Configuration,
            reason: reason.into(),
        }
    }

    fn exhausted(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Exhausted,
            reason: reason.into(),
        }
    }

    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Aborted,
            reason: reason.into(),
        }
    }

    fn reason(&self) -> &str {
        &self.reason
    }

    /// Error reported to callers asking for a backend after this failure.
    fn unavailable(&self) -> StorageError {
        StorageError::StorageUnavailable(self.reason.clone())
    }

    /// Error reported to the caller that explicitly requested the run.
    fn into_error(self) -> StorageError {
        match self.kind {
            FailureKind::Configuration => StorageError::ConfigError(self.reason),
            FailureKind::Exhausted | FailureKind::Aborted => {
                StorageError::StorageUnavailable(self.reason)
            }
        }
    }
}

impl fmt::Display for SelectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Point-in-time view of the selector, safe to take at any moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorStatus {
    pub state: SelectorState,
    pub generation: u64,
    pub backend: Option<StorageBackend>,
    pub using_remote: bool,
    /// Remote setting seen by the last successful run; `None` before one.
    pub remote_enabled: Option<bool>,
    pub fallback_reason: Option<String>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    FirstUse,
    Reinitialize,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::FirstUse => "first_use",
            Trigger::Reinitialize => "reinitialize",
        }
    }
}

#[derive(Clone)]
struct Selected {
    active: ActiveBackend,
    remote_enabled: bool,
    fallback_reason: Option<String>,
}

type RunResult = Result<Selected, SelectionFailure>;
type InFlight = Shared<BoxFuture<'static, RunResult>>;

enum Phase {
    Uninitialized,
    Initializing(InFlight),
    Ready(ActiveBackend),
    Failed(SelectionFailure),
}

struct Inner {
    phase: Phase,
    generation: u64,
    /// Whether the settings read by the last successful run enabled remote.
    remote_enabled: Option<bool>,
    fallback_reason: Option<String>,
}

struct SelectorShared {
    factory: Arc<dyn BackendFactory>,
    inner: Mutex<Inner>,
    using_remote: AtomicBool,
}

/// Owns the decision of which storage backend is active.
///
/// Construct one per process and share it (`Arc<BackendSelector>`).
pub struct BackendSelector {
    shared: Arc<SelectorShared>,
}

impl BackendSelector {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            shared: Arc::new(SelectorShared {
                factory,
                inner: Mutex::new(Inner {
                    phase: Phase::Uninitialized,
                    generation: 0,
                    remote_enabled: None,
                    fallback_reason: None,
                }),
                using_remote: AtomicBool::new(false),
            }),
        }
    }

    /// Selector building the real backends from `source`.
    pub fn from_settings_source(source: Arc<dyn StorageSettingsSource>) -> Self {
        Self::new(Arc::new(DefaultBackendFactory::new(source)))
    }

    /// Return the active backend, running selection first if nothing has been
    /// selected yet.
    ///
    /// While a run is in flight the caller waits for it instead of starting
    /// another one. After a failed run this returns `StorageUnavailable` until
    /// [`BackendSelector::reinitialize`] is called.
    pub async fn active_backend(&self) -> StorageResult<ActiveBackend> {
        let run = {
            let mut inner = self.shared.inner.lock();
            let in_flight = match &inner.phase {
                Phase::Ready(active) => return Ok(active.clone()),
                Phase::Failed(failure) => return Err(failure.unavailable()),
                Phase::Initializing(run) => Some(run.clone()),
                Phase::Uninitialized => None,
            };
            match in_flight {
                Some(run) => run,
                None => SelectorShared::start_run(&self.shared, &mut inner, None, Trigger::FirstUse),
            }
        };

        run.await
            .map(|selected| selected.active)
            .map_err(|failure| failure.unavailable())
    }

    /// Whether the current (or last successfully selected) backend is remote.
    /// Never blocks; `false` until a selection has succeeded.
    pub fn is_using_remote(&self) -> bool {
        self.shared.using_remote.load(Ordering::Acquire)
    }

    /// Discard the current result and run selection again, re-reading settings.
    ///
    /// If a run is already in flight the new run starts after it finishes.
    pub async fn reinitialize(&self) -> StorageResult<ActiveBackend> {
        let run = {
            let mut inner = self.shared.inner.lock();
            let previous = match &inner.phase {
                Phase::Initializing(run) => Some(run.clone()),
                _ => None,
            };
            SelectorShared::start_run(&self.shared, &mut inner, previous, Trigger::Reinitialize)
        };

        run.await
            .map(|selected| selected.active)
            .map_err(SelectionFailure::into_error)
    }

    pub fn state(&self) -> SelectorState {
        match self.shared.inner.lock().phase {
            Phase::Uninitialized => SelectorState::Uninitialized,
            Phase::Initializing(_) => SelectorState::Initializing,
            Phase::Ready(_) => SelectorState::Ready,
            Phase::Failed(_) => SelectorState::Failed,
        }
    }

    pub fn status(&self) -> SelectorStatus {
        let inner = self.shared.inner.lock();
        let (state, backend, failure) = match &inner.phase {
            Phase::Uninitialized => (SelectorState::Uninitialized, None, None),
            Phase::Initializing(_) => (SelectorState::Initializing, None, None),
            Phase::Ready(active) => (SelectorState::Ready, Some(active.backend()), None),
            Phase::Failed(failure) => (
                SelectorState::Failed,
                None,
                Some(failure.reason().to_string()),
            ),
        };

        SelectorStatus {
            state,
            generation: inner.generation,
            backend,
            using_remote: self.is_using_remote(),
            remote_enabled: inner.remote_enabled,
            fallback_reason: inner.fallback_reason.clone(),
            failure,
        }
    }
}

impl SelectorShared {
    /// Start a new run and make it the one new callers attach to.
    /// Must be called with the state lock held.
    fn start_run(
        this: &Arc<SelectorShared>,
        inner: &mut Inner,
        previous: Option<InFlight>,
        trigger: Trigger,
    ) -> InFlight {
        inner.generation += 1;
        let generation = inner.generation;

        tracing::info!(
            generation,
            trigger = trigger.as_str(),
            chained = previous.is_some(),
            "Storage backend selection starting"
        );

        let factory = Arc::clone(&this.factory);
        let work = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run_protocol(factory.as_ref(), generation).await
        });

        let publisher = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(e) => Err(SelectionFailure::aborted(format!(
                    "backend selection task aborted: {}",
                    e
                ))),
            };
            publisher.publish(generation, &result);
            result
        });

        let run: InFlight = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SelectionFailure::aborted(format!(
                    "backend selection task aborted: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared();

        inner.phase = Phase::Initializing(run.clone());
        run
    }

    fn publish(&self, generation: u64, result: &RunResult) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!(
                generation,
                current_generation = inner.generation,
                "Superseded selection run finished; result not published"
            );
            return;
        }

        match result {
            Ok(selected) => {
                self.using_remote
                    .store(selected.active.is_remote(), Ordering::Release);
                inner.remote_enabled = Some(selected.remote_enabled);
                inner.fallback_reason = selected.fallback_reason.clone();
                inner.phase = Phase::Ready(selected.active.clone());
                tracing::info!(
                    generation,
                    backend = %selected.active.backend(),
                    using_remote = selected.active.is_remote(),
                    "Storage backend selected"
                );
            }
            Err(failure) => {
                inner.remote_enabled = None;
                inner.fallback_reason = None;
                inner.phase = Phase::Failed(failure.clone());
                tracing::error!(
                    generation,
                    reason = %failure,
                    "Storage backend selection failed"
                );
            }
        }
    }
}

/// One selection run: prefer remote when it is enabled and answers its probe,
/// otherwise fall back to local storage without probing it.
async fn run_protocol(factory: &dyn BackendFactory, generation: u64) -> RunResult {
    let settings = factory
        .settings()
        .map_err(|e| SelectionFailure::configuration(format!("{:#}", e)))?;

    let mut fallback_reason = None;

    if settings.remote.enabled {
        let outcome = match factory.build_remote(&settings).await {
            Ok(remote) => {
                let outcome =
                    match tokio::time::timeout(settings.probe_timeout, remote.probe()).await {
                        Ok(outcome) => outcome,
                        Err(_) => ProbeOutcome::Failed(format!(
                            "probe timed out after {} ms",
                            settings.probe_timeout.as_millis()
                        )),
                    };
                if outcome.is_available() {
                    return Ok(Selected {
                        active: ActiveBackend {
                            storage: remote,
                            generation,
                        },
                        remote_enabled: true,
                        fallback_reason: None,
                    });
                }
                outcome
            }
            Err(StorageError::ConfigError(msg)) => {
                return Err(SelectionFailure::configuration(msg));
            }
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        };

        let reason = outcome.reason().unwrap_or("remote unavailable").to_string();
        tracing::warn!(
            generation,
            reason = %reason,
            "Remote storage unavailable, falling back to local storage"
        );
        fallback_reason = Some(reason);
    }

    let local = factory.build_local(&settings).await.map_err(|e| {
        SelectionFailure::exhausted(format!("no storage backend could be selected: {}", e))
    })?;

    Ok(Selected {
        active: ActiveBackend {
            storage: local,
            generation,
        },
        remote_enabled: settings.remote.enabled,
        fallback_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{StoredLocation, StoredObject};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use stowage_core::StorageSettings;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[derive(Default)]
    struct ProbeControl {
        available: AtomicBool,
        error: AtomicBool,
        delay_ms: AtomicUsize,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct FakeStorage {
        kind: StorageBackend,
        probe: Arc<ProbeControl>,
    }

    #[async_trait]
    impl Storage for FakeStorage {
        async fn store(
            &self,
            key: &str,
            _content_type: &str,
            _data: Bytes,
        ) -> StorageResult<StoredLocation> {
            Ok(StoredLocation::Bucket {
                bucket: "fake".to_string(),
                key: key.to_string(),
                url: format!("fake://{}", key),
            })
        }

        async fn retrieve(&self, key: &str) -> StorageResult<StoredObject> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn probe(&self) -> ProbeOutcome {
            let control = &self.probe;
            control.calls.fetch_add(1, Ordering::SeqCst);
            let now = control.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            control.max_in_flight.fetch_max(now, Ordering::SeqCst);

            // The answer is fixed when the probe starts.
            let outcome = if control.error.load(Ordering::SeqCst) {
                ProbeOutcome::Failed("connection refused".to_string())
            } else if control.available.load(Ordering::SeqCst) {
                ProbeOutcome::Available
            } else {
                ProbeOutcome::Unavailable("bucket not reachable".to_string())
            };

            let delay = control.delay_ms.load(Ordering::SeqCst) as u64;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            control.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        fn backend_type(&self) -> StorageBackend {
            self.kind
        }
    }

    struct FakeFactory {
        remote_enabled: AtomicBool,
        config_broken: AtomicBool,
        local_broken: AtomicBool,
        local_panics: AtomicBool,
        probe_timeout: Duration,
        probe: Arc<ProbeControl>,
        settings_reads: AtomicUsize,
        remote_builds: AtomicUsize,
        local_builds: AtomicUsize,
    }

    impl FakeFactory {
        fn new(remote_enabled: bool) -> Self {
            Self {
                remote_enabled: AtomicBool::new(remote_enabled),
                config_broken: AtomicBool::new(false),
                local_broken: AtomicBool::new(false),
                local_panics: AtomicBool::new(false),
                probe_timeout: Duration::from_secs(5),
                probe: Arc::new(ProbeControl::default()),
                settings_reads: AtomicUsize::new(0),
                remote_builds: AtomicUsize::new(0),
                local_builds: AtomicUsize::new(0),
            }
        }

        fn with_probe_timeout(mut self, timeout: Duration) -> Self {
            self.probe_timeout = timeout;
            self
        }

        fn remote_available(self, available: bool) -> Self {
            self.probe.available.store(available, Ordering::SeqCst);
            self
        }

        fn probe_delay(self, delay: Duration) -> Self {
            self.probe
                .delay_ms
                .store(delay.as_millis() as usize, Ordering::SeqCst);
            self
        }

        fn probe_calls(&self) -> usize {
            self.probe.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackendFactory for FakeFactory {
        fn settings(&self) -> Result<StorageSettings, anyhow::Error> {
            self.settings_reads.fetch_add(1, Ordering::SeqCst);
            if self.config_broken.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!(
                    "S3_BUCKET_NAME must be set when S3 storage is enabled"
                ));
            }
            let mut settings = StorageSettings::local_only("/unused", "http://localhost:3000");
            settings.remote.enabled = self.remote_enabled.load(Ordering::SeqCst);
            settings.probe_timeout = self.probe_timeout;
            Ok(settings)
        }

        async fn build_remote(
            &self,
            _settings: &StorageSettings,
        ) -> StorageResult<Arc<dyn Storage>> {
            self.remote_builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeStorage {
                kind: StorageBackend::S3,
                probe: Arc::clone(&self.probe),
            }))
        }

        async fn build_local(
            &self,
            _settings: &StorageSettings,
        ) -> StorageResult<Arc<dyn Storage>> {
            self.local_builds.fetch_add(1, Ordering::SeqCst);
            if self.local_panics.load(Ordering::SeqCst) {
                panic!("local backend construction panicked");
            }
            if self.local_broken.load(Ordering::SeqCst) {
                return Err(StorageError::BackendUnavailable(
                    "cannot create storage root".to_string(),
                ));
            }
            Ok(Arc::new(FakeStorage {
                kind: StorageBackend::Local,
                probe: Arc::new(ProbeControl::default()),
            }))
        }
    }

    fn selector(factory: &Arc<FakeFactory>) -> BackendSelector {
        BackendSelector::new(Arc::clone(factory) as Arc<dyn BackendFactory>)
    }

    /// Counts selector warnings that announce a fallback to local storage.
    #[derive(Clone, Default)]
    struct FallbackEvents(Arc<AtomicUsize>);

    impl FallbackEvents {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: Subscriber> Layer<S> for FallbackEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            if *metadata.level() != Level::WARN
                || !metadata.target().starts_with("stowage_storage::selector")
            {
                return;
            }
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            if visitor.0.contains("falling back") {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn capture_fallbacks() -> (FallbackEvents, tracing::subscriber::DefaultGuard) {
        let events = FallbackEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (events, guard)
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(true));
        let selector = selector(&factory);

        let status = selector.status();
        assert_eq!(status.state, SelectorState::Uninitialized);
        assert_eq!(status.generation, 0);
        assert_eq!(status.backend, None);
        assert!(!selector.is_using_remote());
        assert_eq!(factory.settings_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_disabled_selects_local_without_probe() {
        let factory = Arc::new(FakeFactory::new(false).remote_available(true));
        let selector = selector(&factory);

        let active = selector.active_backend().await.unwrap();

        assert_eq!(active.backend(), StorageBackend::Local);
        assert!(!active.is_remote());
        assert!(!selector.is_using_remote());
        assert_eq!(factory.probe_calls(), 0);
        assert_eq!(factory.remote_builds.load(Ordering::SeqCst), 0);
        assert_eq!(selector.state(), SelectorState::Ready);
    }

    #[tokio::test]
    async fn test_available_remote_is_selected() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(true));
        let selector = selector(&factory);

        let active = selector.active_backend().await.unwrap();

        assert_eq!(active.backend(), StorageBackend::S3);
        assert!(selector.is_using_remote());
        assert_eq!(factory.local_builds.load(Ordering::SeqCst), 0);

        let status = selector.status();
        assert_eq!(status.state, SelectorState::Ready);
        assert_eq!(status.backend, Some(StorageBackend::S3));
        assert_eq!(status.fallback_reason, None);
    }

    #[tokio::test]
    async fn test_unavailable_remote_falls_back_with_one_log_event() {
        let (events, _guard) = capture_fallbacks();
        let factory = Arc::new(FakeFactory::new(true).remote_available(false));
        let selector = selector(&factory);

        let active = selector.active_backend().await.unwrap();

        assert_eq!(active.backend(), StorageBackend::Local);
        assert!(!selector.is_using_remote());
        assert_eq!(factory.probe_calls(), 1);
        assert_eq!(events.count(), 1);
        assert_eq!(
            selector.status().fallback_reason.as_deref(),
            Some("bucket not reachable")
        );

        // Served from Ready; no second run and no second event.
        selector.active_backend().await.unwrap();
        assert_eq!(events.count(), 1);
        assert_eq!(factory.probe_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_error_falls_back_without_surfacing() {
        let (events, _guard) = capture_fallbacks();
        let factory = Arc::new(FakeFactory::new(true));
        factory.probe.error.store(true, Ordering::SeqCst);
        let selector = selector(&factory);

        let active = selector.active_backend().await.unwrap();

        assert_eq!(active.backend(), StorageBackend::Local);
        assert_eq!(events.count(), 1);
        assert_eq!(
            selector.status().fallback_reason.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_probe_timeout_falls_back_to_local() {
        let factory = Arc::new(
            FakeFactory::new(true)
                .remote_available(true)
                .probe_delay(Duration::from_secs(10))
                .with_probe_timeout(Duration::from_millis(50)),
        );
        let selector = selector(&factory);

        let started = std::time::Instant::now();
        let active = selector.active_backend().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(active.backend(), StorageBackend::Local);
        assert!(!selector.is_using_remote());
        let reason = selector.status().fallback_reason.unwrap();
        assert!(reason.contains("timed out"), "reason: {}", reason);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_run() {
        let factory = Arc::new(
            FakeFactory::new(true)
                .remote_available(true)
                .probe_delay(Duration::from_millis(50)),
        );
        let selector = Arc::new(selector(&factory));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let selector = Arc::clone(&selector);
            handles.push(tokio::spawn(async move { selector.active_backend().await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.probe_calls(), 1);
        assert_eq!(factory.settings_reads.load(Ordering::SeqCst), 1);
        let first = &results[0];
        for active in &results {
            assert!(active.same_instance(first));
            assert_eq!(active.generation(), 1);
        }
    }

    #[tokio::test]
    async fn test_two_simultaneous_calls_with_slow_probe() {
        let factory = Arc::new(
            FakeFactory::new(true)
                .remote_available(true)
                .probe_delay(Duration::from_millis(200)),
        );
        let selector = selector(&factory);

        let (a, b) = tokio::join!(selector.active_backend(), selector.active_backend());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.same_instance(&b));
        assert_eq!(a.backend(), StorageBackend::S3);
        assert_eq!(factory.probe_calls(), 1);
    }

    #[tokio::test]
    async fn test_state_is_initializing_while_probe_runs() {
        let factory = Arc::new(
            FakeFactory::new(true)
                .remote_available(true)
                .probe_delay(Duration::from_millis(200)),
        );
        let selector = Arc::new(selector(&factory));

        let pending = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.active_backend().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(selector.state(), SelectorState::Initializing);
        assert!(!selector.is_using_remote());

        pending.await.unwrap().unwrap();
        assert_eq!(selector.state(), SelectorState::Ready);
        assert!(selector.is_using_remote());
    }

    #[tokio::test]
    async fn test_reinitialize_can_switch_to_remote() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(false));
        let selector = selector(&factory);

        let first = selector.active_backend().await.unwrap();
        assert_eq!(first.backend(), StorageBackend::Local);

        factory.probe.available.store(true, Ordering::SeqCst);
        let second = selector.reinitialize().await.unwrap();

        assert_eq!(second.backend(), StorageBackend::S3);
        assert_eq!(second.generation(), 2);
        assert!(selector.is_using_remote());
        assert_eq!(factory.probe_calls(), 2);
        assert_eq!(factory.settings_reads.load(Ordering::SeqCst), 2);

        let current = selector.active_backend().await.unwrap();
        assert!(current.same_instance(&second));
        assert_eq!(selector.status().fallback_reason, None);
    }

    #[tokio::test]
    async fn test_reinitialize_rereads_settings() {
        let factory = Arc::new(FakeFactory::new(false).remote_available(true));
        let selector = selector(&factory);

        assert_eq!(selector.status().remote_enabled, None);
        assert_eq!(
            selector.active_backend().await.unwrap().backend(),
            StorageBackend::Local
        );
        assert_eq!(selector.status().remote_enabled, Some(false));

        factory.remote_enabled.store(true, Ordering::SeqCst);
        let active = selector.reinitialize().await.unwrap();
        assert_eq!(active.backend(), StorageBackend::S3);
        assert!(active.is_remote());
        assert_eq!(selector.status().remote_enabled, Some(true));
    }

    #[tokio::test]
    async fn test_reinitialize_during_run_never_interleaves() {
        let factory = Arc::new(
            FakeFactory::new(true)
                .remote_available(false)
                .probe_delay(Duration::from_millis(200)),
        );
        let selector = Arc::new(selector(&factory));

        let early = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.active_backend().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        factory.probe.available.store(true, Ordering::SeqCst);
        let reinit = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.reinitialize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Callers arriving after the reinitialize attach to the new run.
        let late = selector.active_backend().await.unwrap();

        let early = early.await.unwrap().unwrap();
        let reinit = reinit.await.unwrap().unwrap();

        assert_eq!(early.generation(), 1);
        assert_eq!(early.backend(), StorageBackend::Local);
        assert_eq!(reinit.generation(), 2);
        assert_eq!(reinit.backend(), StorageBackend::S3);
        assert!(late.same_instance(&reinit));

        assert_eq!(factory.probe_calls(), 2);
        assert_eq!(factory.probe.max_in_flight.load(Ordering::SeqCst), 1);

        // The superseded run never overwrote the newer result.
        let status = selector.status();
        assert_eq!(status.generation, 2);
        assert_eq!(status.backend, Some(StorageBackend::S3));
        assert!(selector.is_using_remote());
    }

    #[tokio::test]
    async fn test_configuration_error_fails_without_retry() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(true));
        factory.config_broken.store(true, Ordering::SeqCst);
        let selector = selector(&factory);

        for _ in 0..3 {
            match selector.active_backend().await {
                Err(StorageError::StorageUnavailable(reason)) => {
                    assert!(reason.contains("S3_BUCKET_NAME"))
                }
                other => panic!("Expected StorageUnavailable, got {:?}", other),
            }
        }
        assert_eq!(factory.settings_reads.load(Ordering::SeqCst), 1);
        assert_eq!(factory.probe_calls(), 0);

        let status = selector.status();
        assert_eq!(status.state, SelectorState::Failed);
        assert!(status.failure.is_some());

        // An explicit reinitialize reports the configuration problem itself.
        assert!(matches!(
            selector.reinitialize().await,
            Err(StorageError::ConfigError(_))
        ));

        factory.config_broken.store(false, Ordering::SeqCst);
        let active = selector.reinitialize().await.unwrap();
        assert_eq!(active.backend(), StorageBackend::S3);
        assert_eq!(selector.state(), SelectorState::Ready);
    }

    #[tokio::test]
    async fn test_exhausted_fallback_chain_fails() {
        let factory = Arc::new(FakeFactory::new(false));
        factory.local_broken.store(true, Ordering::SeqCst);
        let selector = selector(&factory);

        assert!(matches!(
            selector.active_backend().await,
            Err(StorageError::StorageUnavailable(_))
        ));
        assert!(matches!(
            selector.active_backend().await,
            Err(StorageError::StorageUnavailable(_))
        ));
        assert_eq!(factory.local_builds.load(Ordering::SeqCst), 1);
        assert!(!selector.is_using_remote());
    }

    #[tokio::test]
    async fn test_aborted_run_fails() {
        let factory = Arc::new(FakeFactory::new(false));
        factory.local_panics.store(true, Ordering::SeqCst);
        let selector = selector(&factory);

        match selector.active_backend().await {
            Err(StorageError::StorageUnavailable(reason)) => assert!(reason.contains("aborted")),
            other => panic!("Expected StorageUnavailable, got {:?}", other),
        }
        assert_eq!(selector.state(), SelectorState::Failed);
    }

    #[tokio::test]
    async fn test_is_using_remote_keeps_last_success_while_reinitializing() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(true));
        let selector = Arc::new(selector(&factory));
        selector.active_backend().await.unwrap();
        assert!(selector.is_using_remote());

        factory.probe.delay_ms.store(200, Ordering::SeqCst);
        let reinit = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.reinitialize().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(selector.state(), SelectorState::Initializing);
        assert!(selector.is_using_remote());
        reinit.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_active_backend_dispatches_to_storage() {
        let factory = Arc::new(FakeFactory::new(true).remote_available(true));
        let selector = selector(&factory);

        let active = selector.active_backend().await.unwrap();
        let location = active
            .store("a/b.txt", "text/plain", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(location.key(), "a/b.txt");
        assert!(!active.exists("a/b.txt").await.unwrap());
    }
}
