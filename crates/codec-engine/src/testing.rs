//! In-memory engine doubles for tests.
//!
//! [`MemoryRuntime`] keeps staged files in a map and answers `exec` with a
//! configurable handler (by default: write a plausible output file to the
//! last argument). [`ScriptedLoader`] maps locations to scripted outcomes and
//! records the order in which locations were fetched.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use reelkit_common::error::{ReelError, ReelResult};

use crate::runtime::{
    check_file_name, CodecRuntime, EngineLoader, ExecObserver, ExecProgress, StreamInfo,
};

/// Size of the file the default exec handler writes.
pub const DEFAULT_OUTPUT_BYTES: usize = 64 * 1024;

pub type ExecHandler =
    Arc<dyn Fn(&[String], &mut BTreeMap<String, Vec<u8>>) -> ReelResult<()> + Send + Sync>;

struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    execs: Vec<Vec<String>>,
    probes: HashMap<String, StreamInfo>,
    default_probe: StreamInfo,
    handler: ExecHandler,
    exec_delay: Option<Duration>,
}

/// In-memory [`CodecRuntime`]. Clones share state.
#[derive(Clone)]
pub struct MemoryRuntime {
    state: Arc<Mutex<MemoryState>>,
    crashed: Arc<AtomicBool>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                files: BTreeMap::new(),
                execs: Vec::new(),
                probes: HashMap::new(),
                default_probe: StreamInfo {
                    width: 1080,
                    height: 1920,
                    fps: 30.0,
                    duration_secs: None,
                },
                handler: default_handler(),
                exec_delay: None,
            })),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Put a file in the staging area without going through a lease.
    pub fn seed(&self, name: &str, bytes: &[u8]) {
        self.lock().files.insert(name.to_string(), bytes.to_vec());
    }

    pub fn file_names(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Arguments of every exec so far.
    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.lock().execs.clone()
    }

    pub fn on_exec(&self, handler: ExecHandler) {
        self.lock().handler = handler;
    }

    /// Fail every exec whose arguments contain `needle`.
    pub fn fail_execs_containing(&self, needle: &str, message: &str) {
        let needle = needle.to_string();
        let message = message.to_string();
        let fallback = default_handler();
        self.on_exec(Arc::new(move |args: &[String], files: &mut BTreeMap<String, Vec<u8>>| {
            if args.iter().any(|a| a.contains(&needle)) {
                return Err(ReelError::engine_exec(message.clone()));
            }
            fallback(args, files)
        }));
    }

    /// Sleep this long inside every exec.
    pub fn set_exec_delay(&self, delay: Option<Duration>) {
        self.lock().exec_delay = delay;
    }

    pub fn set_probe(&self, name: &str, info: StreamInfo) {
        self.lock().probes.insert(name.to_string(), info);
    }

    pub fn set_default_probe(&self, info: StreamInfo) {
        self.lock().default_probe = info;
    }

    /// Simulate the engine process dying.
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.crashed.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn alive(&self) -> ReelResult<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(ReelError::engine_load("engine process is gone"));
        }
        Ok(())
    }
}

/// Write [`DEFAULT_OUTPUT_BYTES`] to the last argument after checking that
/// every `-i` input (other than image-sequence patterns) is staged.
pub fn default_handler() -> ExecHandler {
    Arc::new(|args: &[String], files: &mut BTreeMap<String, Vec<u8>>| {
        for pair in args.windows(2) {
            if pair[0] == "-i" && !pair[1].contains('%') && !files.contains_key(&pair[1]) {
                return Err(ReelError::engine_exec(format!("{}: No such file", pair[1])));
            }
        }
        let output = args
            .last()
            .ok_or_else(|| ReelError::engine_exec("no output file"))?;
        check_file_name(output)?;
        files.insert(output.clone(), vec![0x42; DEFAULT_OUTPUT_BYTES]);
        Ok(())
    })
}

#[async_trait]
impl CodecRuntime for MemoryRuntime {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn write_file(&self, name: &str, bytes: &[u8]) -> ReelResult<()> {
        self.alive()?;
        check_file_name(name)?;
        self.lock().files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, name: &str) -> ReelResult<Vec<u8>> {
        self.alive()?;
        self.lock()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| ReelError::engine_io(format!("read {name}: not found")))
    }

    async fn delete_file(&self, name: &str) -> ReelResult<()> {
        self.alive()?;
        self.lock().files.remove(name);
        Ok(())
    }

    async fn list_files(&self) -> ReelResult<Vec<String>> {
        self.alive()?;
        Ok(self.file_names())
    }

    async fn exec(&self, args: &[String], observer: Option<ExecObserver>) -> ReelResult<()> {
        self.alive()?;
        let (delay, handler) = {
            let mut state = self.lock();
            state.execs.push(args.to_vec());
            (state.exec_delay, state.handler.clone())
        };
        if let Some(observer) = &observer {
            observer(ExecProgress::default());
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.alive()?;
        {
            let mut state = self.lock();
            handler(args, &mut state.files)?;
        }
        if let Some(observer) = &observer {
            observer(ExecProgress {
                out_time_secs: 0.0,
                complete: true,
            });
        }
        Ok(())
    }

    async fn probe(&self, name: &str) -> ReelResult<StreamInfo> {
        self.alive()?;
        let state = self.lock();
        if !state.files.contains_key(name) {
            return Err(ReelError::engine_exec(format!("probe {name}: not found")));
        }
        Ok(state.probes.get(name).copied().unwrap_or(state.default_probe))
    }
}

enum Script {
    Succeed(MemoryRuntime),
    Fail(String),
    Hang,
}

/// Loader with a scripted outcome per location.
pub struct ScriptedLoader {
    scripts: HashMap<String, Script>,
    delay: Option<Duration>,
    fetches: Mutex<Vec<String>>,
}

impl Default for ScriptedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: None,
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn succeed(mut self, location: &str, runtime: MemoryRuntime) -> Self {
        self.scripts.insert(location.to_string(), Script::Succeed(runtime));
        self
    }

    pub fn fail(mut self, location: &str, message: &str) -> Self {
        self.scripts
            .insert(location.to_string(), Script::Fail(message.to_string()));
        self
    }

    /// Never resolve for `location`.
    pub fn hang(mut self, location: &str) -> Self {
        self.scripts.insert(location.to_string(), Script::Hang);
        self
    }

    /// Wait this long in every fetch before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Locations fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    async fn fetch(&self, location: &str) -> ReelResult<Arc<dyn CodecRuntime>> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(location.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.scripts.get(location) {
            Some(Script::Succeed(runtime)) => Ok(Arc::new(runtime.clone())),
            Some(Script::Fail(message)) => Err(ReelError::engine_load(message.clone())),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(ReelError::engine_load(format!("unknown location {location}"))),
        }
    }
}
