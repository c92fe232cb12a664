//! Process-wide codec engine session.
//!
//! The engine is expensive to load, so one [`EngineSession`] is shared by
//! every job. Concurrent `load()` calls coalesce onto a single in-flight
//! attempt that walks the primary location and then each mirror; every
//! waiter observes the same outcome. Work inside the engine is serialized
//! through [`EngineLease`], which also guarantees the staging area is left
//! as it was found.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::{watch, OwnedMutexGuard};

use reelkit_common::clock::with_timeout;
use reelkit_common::config::EngineConfig;
use reelkit_common::error::{ReelError, ReelResult};

use crate::ffmpeg::FfmpegLoader;
use crate::runtime::{CodecRuntime, EngineLoader, ExecObserver, StreamInfo};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Loaded,
    /// The loaded engine crashed; the next `load()` starts over.
    Failed,
}

type LoadOutcome = Result<Arc<dyn CodecRuntime>, String>;

struct Inner {
    state: EngineState,
    runtime: Option<Arc<dyn CodecRuntime>>,
    inflight: Option<watch::Receiver<Option<LoadOutcome>>>,
    generation: u64,
    last_error: Option<String>,
}

pub struct EngineSession {
    loader: Arc<dyn EngineLoader>,
    locations: Vec<String>,
    load_timeout: Duration,
    inner: Mutex<Inner>,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("locations", &self.locations)
            .field("state", &self.state())
            .finish()
    }
}

static SHARED: OnceLock<Arc<EngineSession>> = OnceLock::new();

enum Role {
    Leader(watch::Sender<Option<LoadOutcome>>, u64),
    Follower(watch::Receiver<Option<LoadOutcome>>),
}

impl EngineSession {
    /// Session trying `locations` in order with `loader`.
    pub fn new(loader: Arc<dyn EngineLoader>, locations: Vec<String>, load_timeout: Duration) -> Self {
        Self {
            loader,
            locations,
            load_timeout,
            inner: Mutex::new(Inner {
                state: EngineState::Unloaded,
                runtime: None,
                inflight: None,
                generation: 0,
                last_error: None,
            }),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// ffmpeg session built from config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(FfmpegLoader),
            config.locations(),
            Duration::from_secs(config.load_timeout_secs.max(1)),
        )
    }

    /// The process-wide session. The first caller's config wins.
    pub fn shared(config: &EngineConfig) -> Arc<EngineSession> {
        SHARED
            .get_or_init(|| Arc::new(Self::from_config(config)))
            .clone()
    }

    pub fn state(&self) -> EngineState {
        self.lock_inner().state
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Message of the most recent failed load, if any.
    pub fn last_error(&self) -> Option<String> {
        self.lock_inner().last_error.clone()
    }

    /// Load the engine, or join the load already in progress.
    ///
    /// On failure the state returns to `Unloaded` so a later call retries
    /// from the primary location.
    pub async fn load(&self) -> ReelResult<Arc<dyn CodecRuntime>> {
        loop {
            let role = {
                let mut inner = self.lock_inner();
                match (inner.state, inner.runtime.clone(), inner.inflight.clone()) {
                    (EngineState::Loaded, Some(runtime), _) => return Ok(runtime),
                    (EngineState::Loading, _, Some(rx)) => Role::Follower(rx),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        inner.generation += 1;
                        inner.state = EngineState::Loading;
                        inner.runtime = None;
                        inner.inflight = Some(rx);
                        Role::Leader(tx, inner.generation)
                    }
                }
            };

            match role {
                Role::Follower(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        // Leader was dropped mid-load; its guard reset the state.
                        Err(_) => continue,
                    };
                    if let Some(outcome) = outcome {
                        return outcome.map_err(ReelError::engine_load);
                    }
                }
                Role::Leader(tx, generation) => {
                    let mut guard = AbandonGuard {
                        session: self,
                        generation,
                        armed: true,
                    };
                    let outcome = self.try_locations().await;
                    guard.armed = false;
                    self.finish_load(generation, &outcome);
                    let _ = tx.send(Some(outcome.clone()));
                    return outcome.map_err(ReelError::engine_load);
                }
            }
        }
    }

    /// Serialize access to the engine for one request.
    pub async fn acquire(self: &Arc<Self>) -> ReelResult<EngineLease> {
        let guard = self.exec_lock.clone().lock_owned().await;
        let runtime = self.load().await?;
        let listing = runtime.list_files().await;
        if let Err(ReelError::EngineLoad { message }) = &listing {
            self.mark_failed(message);
        }
        let baseline: BTreeSet<String> = listing?.into_iter().collect();
        Ok(EngineLease {
            session: self.clone(),
            runtime,
            baseline,
            guard: Some(guard),
        })
    }

    /// Record that the loaded engine died. The next `load()` starts over.
    pub fn mark_failed(&self, reason: &str) {
        let mut inner = self.lock_inner();
        if inner.state == EngineState::Loaded {
            tracing::error!(reason, "Codec engine crashed");
            inner.state = EngineState::Failed;
            inner.runtime = None;
            inner.last_error = Some(reason.to_string());
        }
    }

    async fn try_locations(&self) -> LoadOutcome {
        if self.locations.is_empty() {
            return Err("no engine locations configured".to_string());
        }
        let mut last_error = String::new();
        for (attempt, location) in self.locations.iter().enumerate() {
            tracing::info!(location = %location, attempt, "Loading codec engine");
            match with_timeout("engine load", self.load_timeout, self.loader.fetch(location)).await {
                Ok(Ok(runtime)) => {
                    tracing::info!(engine = %runtime.describe(), "Codec engine loaded");
                    return Ok(runtime);
                }
                Ok(Err(e)) => {
                    tracing::warn!(location = %location, error = %e, "Engine location failed");
                    last_error = e.to_string();
                }
                Err(timeout) => {
                    tracing::warn!(location = %location, "Engine location timed out");
                    last_error = timeout.to_string();
                }
            }
        }
        Err(format!(
            "all {} engine locations failed; last error: {last_error}",
            self.locations.len()
        ))
    }

    fn finish_load(&self, generation: u64, outcome: &LoadOutcome) {
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            return;
        }
        inner.inflight = None;
        match outcome {
            Ok(runtime) => {
                inner.state = EngineState::Loaded;
                inner.runtime = Some(runtime.clone());
                inner.last_error = None;
            }
            Err(message) => {
                inner.state = EngineState::Unloaded;
                inner.runtime = None;
                inner.last_error = Some(message.clone());
            }
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resets an abandoned in-flight load so the next caller can retry.
struct AbandonGuard<'a> {
    session: &'a EngineSession,
    generation: u64,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.session.lock_inner();
        if inner.generation == self.generation && inner.state == EngineState::Loading {
            tracing::warn!("Engine load abandoned");
            inner.state = EngineState::Unloaded;
            inner.inflight = None;
        }
    }
}

/// Exclusive, scoped access to the engine's staging area.
///
/// Everything created in the staging area while the lease is held is
/// deleted on [`release`](EngineLease::release), or in a background task
/// if the lease is dropped early. The next lease cannot start until that
/// cleanup has finished.
pub struct EngineLease {
    session: Arc<EngineSession>,
    runtime: Arc<dyn CodecRuntime>,
    baseline: BTreeSet<String>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLease")
            .field("engine", &self.runtime.describe())
            .field("baseline", &self.baseline.len())
            .finish()
    }
}

impl EngineLease {
    pub async fn write(&self, name: &str, bytes: &[u8]) -> ReelResult<()> {
        self.ensure_loaded(ReelError::engine_io)?;
        let result = self.runtime.write_file(name, bytes).await;
        self.observe(result)
    }

    pub async fn read(&self, name: &str) -> ReelResult<Vec<u8>> {
        self.ensure_loaded(ReelError::engine_io)?;
        let result = self.runtime.read_file(name).await;
        self.observe(result)
    }

    pub async fn delete(&self, name: &str) -> ReelResult<()> {
        self.ensure_loaded(ReelError::engine_io)?;
        let result = self.runtime.delete_file(name).await;
        self.observe(result)
    }

    pub async fn list(&self) -> ReelResult<Vec<String>> {
        self.ensure_loaded(ReelError::engine_io)?;
        let result = self.runtime.list_files().await;
        self.observe(result)
    }

    pub async fn exec(&self, args: &[String], observer: Option<ExecObserver>) -> ReelResult<()> {
        self.ensure_loaded(ReelError::engine_exec)?;
        let result = self.runtime.exec(args, observer).await;
        self.observe(result)
    }

    pub async fn probe(&self, name: &str) -> ReelResult<StreamInfo> {
        self.ensure_loaded(ReelError::engine_exec)?;
        let result = self.runtime.probe(name).await;
        self.observe(result)
    }

    pub fn describe(&self) -> String {
        self.runtime.describe()
    }

    /// Delete everything this lease created and give up the engine.
    pub async fn release(mut self) -> usize {
        let removed = cleanup(&self.runtime, &self.baseline).await;
        // Guard drops with `self`, after cleanup.
        self.guard.take();
        removed
    }

    /// Operations on a lease whose engine has failed are refused with the
    /// error kind of the operation itself.
    fn ensure_loaded(&self, refuse: fn(String) -> ReelError) -> ReelResult<()> {
        match self.session.state() {
            EngineState::Loaded => Ok(()),
            state => Err(refuse(format!("engine is not loaded ({state:?})"))),
        }
    }

    fn observe<T>(&self, result: ReelResult<T>) -> ReelResult<T> {
        if let Err(ReelError::EngineLoad { message }) = &result {
            self.session.mark_failed(message);
        }
        result
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let runtime = self.runtime.clone();
        let baseline = std::mem::take(&mut self.baseline);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    cleanup(&runtime, &baseline).await;
                    drop(guard);
                });
            }
            Err(_) => {
                tracing::warn!("Engine lease dropped outside a runtime; staging not cleaned");
            }
        }
    }
}

async fn cleanup(runtime: &Arc<dyn CodecRuntime>, baseline: &BTreeSet<String>) -> usize {
    let files = match runtime.list_files().await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, "Could not list staging area for cleanup");
            return 0;
        }
    };
    let mut removed = 0;
    for name in files.iter().filter(|f| !baseline.contains(*f)) {
        match runtime.delete_file(name).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(file = %name, error = %e, "Failed to delete staged file"),
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "Staging area cleaned");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRuntime, ScriptedLoader};

    fn session(loader: Arc<ScriptedLoader>, locations: &[&str]) -> Arc<EngineSession> {
        Arc::new(EngineSession::new(
            loader,
            locations.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_attempt() {
        let loader = Arc::new(
            ScriptedLoader::new()
                .succeed("primary", MemoryRuntime::new())
                .with_delay(Duration::from_millis(20)),
        );
        let session = session(loader.clone(), &["primary", "mirror"]);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let s = session.clone();
            tasks.push(tokio::spawn(async move { s.load().await.map(|r| r.describe()) }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), "memory");
        }
        assert_eq!(loader.fetches(), vec!["primary".to_string()]);
        assert_eq!(session.state(), EngineState::Loaded);
    }

    #[tokio::test]
    async fn test_mirrors_are_tried_in_order() {
        let loader = Arc::new(
            ScriptedLoader::new()
                .fail("primary", "cdn down")
                .fail("mirror-a", "404")
                .succeed("mirror-b", MemoryRuntime::new()),
        );
        let session = session(loader.clone(), &["primary", "mirror-a", "mirror-b", "mirror-c"]);
        session.load().await.unwrap();
        assert_eq!(loader.fetches(), vec!["primary", "mirror-a", "mirror-b"]);
    }

    #[tokio::test]
    async fn test_exhausted_mirrors_fail_everyone_and_reset() {
        let loader = Arc::new(
            ScriptedLoader::new()
                .fail("primary", "down")
                .fail("mirror", "down")
                .with_delay(Duration::from_millis(10)),
        );
        let session = session(loader.clone(), &["primary", "mirror"]);

        let (a, b, c) = tokio::join!(session.load(), session.load(), session.load());
        for result in [a, b, c] {
            match result {
                Err(ReelError::EngineLoad { message }) => assert!(message.contains("all 2")),
                other => panic!("expected EngineLoad, got {:?}", other.map(|r| r.describe())),
            }
        }
        assert_eq!(loader.fetches().len(), 2);
        assert_eq!(session.state(), EngineState::Unloaded);
        assert!(session.last_error().is_some());

        // A later call retries from the primary.
        let _ = session.load().await;
        assert_eq!(loader.fetches().len(), 4);
        assert_eq!(loader.fetches()[2], "primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_location_times_out_and_falls_through() {
        let loader = Arc::new(
            ScriptedLoader::new()
                .hang("primary")
                .succeed("mirror", MemoryRuntime::new()),
        );
        let session = Arc::new(EngineSession::new(
            loader.clone(),
            vec!["primary".into(), "mirror".into()],
            Duration::from_secs(3),
        ));
        session.load().await.unwrap();
        assert_eq!(loader.fetches(), vec!["primary", "mirror"]);
    }

    #[tokio::test]
    async fn test_abandoned_load_resets_state() {
        let loader = Arc::new(ScriptedLoader::new().hang("primary"));
        let session = session(loader, &["primary"]);
        let attempt = tokio::time::timeout(Duration::from_millis(20), session.load()).await;
        assert!(attempt.is_err());
        assert_eq!(session.state(), EngineState::Unloaded);
    }

    #[tokio::test]
    async fn test_lease_release_removes_only_new_files() {
        let runtime = MemoryRuntime::new();
        runtime.seed("keep.bin", b"pre-existing");
        let loader = Arc::new(ScriptedLoader::new().succeed("primary", runtime.clone()));
        let session = session(loader, &["primary"]);

        let lease = session.acquire().await.unwrap();
        lease.write("input.png", b"png").await.unwrap();
        lease
            .exec(&["-i".into(), "input.png".into(), "out.mp4".into()], None)
            .await
            .unwrap();
        assert!(!lease.read("out.mp4").await.unwrap().is_empty());
        assert_eq!(lease.release().await, 2);
        assert_eq!(runtime.file_names(), vec!["keep.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_lease_cleans_up_before_next_lease() {
        let runtime = MemoryRuntime::new();
        let loader = Arc::new(ScriptedLoader::new().succeed("primary", runtime.clone()));
        let session = session(loader, &["primary"]);

        {
            let lease = session.acquire().await.unwrap();
            lease.write("frame_00001.png", b"x").await.unwrap();
            // Dropped without release, e.g. on an error path.
        }
        let next = session.acquire().await.unwrap();
        assert!(next.list().await.unwrap().is_empty());
        next.release().await;
    }

    #[tokio::test]
    async fn test_crash_marks_failed_and_reload_recovers() {
        let runtime = MemoryRuntime::new();
        let loader = Arc::new(ScriptedLoader::new().succeed("primary", runtime.clone()));
        let session = session(loader.clone(), &["primary"]);

        let lease = session.acquire().await.unwrap();
        runtime.crash();
        let err = lease.exec(&["out.mp4".into()], None).await.unwrap_err();
        assert!(matches!(err, ReelError::EngineLoad { .. }));
        assert_eq!(session.state(), EngineState::Failed);
        let err = lease.write("a", b"b").await.unwrap_err();
        assert!(matches!(err, ReelError::EngineIo { .. }));
        let err = lease.read("a").await.unwrap_err();
        assert!(matches!(err, ReelError::EngineIo { .. }));
        let err = lease.exec(&["out.mp4".into()], None).await.unwrap_err();
        assert!(matches!(err, ReelError::EngineExec { .. }));
        let err = lease.probe("a").await.unwrap_err();
        assert!(matches!(err, ReelError::EngineExec { .. }));
        lease.release().await;

        runtime.recover();
        session.load().await.unwrap();
        assert_eq!(session.state(), EngineState::Loaded);
        assert_eq!(loader.fetches().len(), 2);
    }

    #[test]
    fn test_from_config_dedupes_locations() {
        let config = EngineConfig {
            primary: "ffmpeg".into(),
            mirrors: vec!["ffmpeg".into(), " /usr/bin/ffmpeg ".into(), String::new()],
            load_timeout_secs: 0,
        };
        let session = EngineSession::from_config(&config);
        assert_eq!(session.locations(), &["ffmpeg".to_string(), "/usr/bin/ffmpeg".to_string()]);
        assert_eq!(session.state(), EngineState::Unloaded);
    }
}
