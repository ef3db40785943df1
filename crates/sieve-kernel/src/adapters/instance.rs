//! # Sandbox Instance
//!
//! One V8 isolate bound to one transformation version.
//!
//! `JsRuntime` is `!Send`, so each instance lives on its own OS thread
//! driving a current-thread tokio runtime. The host side of the instance
//! (`SandboxInstance`) is `Send` and owns only:
//!
//! - a request channel into the thread (batches go in as owned JSON),
//! - the isolate's thread-safe handle, used to terminate runaway scripts,
//! - lifecycle bookkeeping.
//!
//! ```text
//!  host task                          sandbox thread
//!  ─────────                          ──────────────
//!  start(batch) ── ExecutionRequest ─► ExecutionSlot.begin
//!                                      __sieveForward(id) ─► entry(events)
//!  reply_rx  ◄──── ForwardedReply ──── op_sieve_resolve / op_sieve_reject
//!  timeout? ─► terminate_execution + drop cancel ─► event loop abandoned
//! ```

use std::cell::RefCell;
use std::future::poll_fn;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use deno_core::{v8, JsRuntime, ModuleCodeString, OpState, PollEventLoopOptions, RuntimeOptions};
use serde_json::Value;
use sieve_core::{FetchTransport, MetadataMap, SieveError, SieveResult, TransformationVersion};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::{EntryPoint, InstanceState};
use crate::ops::{self, BridgeContext, BridgeCounters, EntryCandidates, ExecutionSlot, Forwarded};

/// Everything needed to build a sandbox, independent of the version
#[derive(Clone)]
pub struct InstanceSettings {
    pub memory_limit_bytes: usize,

    /// Upper bound on bootstrap + library + user source + resolution
    pub init_timeout: Duration,

    pub transport: Arc<dyn FetchTransport>,
    pub counters: Arc<BridgeCounters>,
}

/// What the sandbox thread reports for one execution
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardedReply {
    /// The entry point fulfilled with this value
    Resolved(Value),
    /// The entry point threw or rejected with this message
    Rejected(String),
    /// The isolate hit its heap ceiling and was terminated
    MemoryExceeded,
    /// The event loop failed before the entry point settled
    Faulted(String),
}

/// An execution handed to the sandbox thread
struct ExecutionRequest {
    execution_id: u32,
    batch: Value,
    metadata: MetadataMap,
    reply: oneshot::Sender<ForwardedReply>,
    /// Resolves (or closes) when the host abandons the execution
    cancel: oneshot::Receiver<()>,
}

/// Host-side handle on an in-flight execution.
///
/// Dropping it abandons the execution: the sandbox thread stops waiting on
/// its event loop.
pub struct PendingExecution {
    pub execution_id: u32,
    reply: oneshot::Receiver<ForwardedReply>,
    _cancel: oneshot::Sender<()>,
}

impl PendingExecution {
    /// Wait for the sandbox's reply; `None` if the thread went away
    pub async fn wait(&mut self) -> Option<ForwardedReply> {
        (&mut self.reply).await.ok()
    }
}

/// State shared between the host handle and the sandbox thread
#[derive(Default)]
struct SharedFlags {
    aborted: AtomicBool,
    heap_exhausted: AtomicBool,
    /// Published by the thread once the isolate exists
    isolate: Mutex<Option<v8::IsolateHandle>>,
}

impl SharedFlags {
    /// Mark aborted and terminate whatever the isolate is running.
    ///
    /// Serialised with `publish`: a thread that has not published yet sees
    /// the flag and never starts.
    fn abort(&self) {
        let isolate = self.isolate.lock();
        self.aborted.store(true, Ordering::Release);
        if let Some(handle) = isolate.as_ref() {
            handle.terminate_execution();
        }
    }

    /// `false` if the host gave up before the isolate was ready
    fn publish(&self, handle: v8::IsolateHandle) -> bool {
        let mut isolate = self.isolate.lock();
        if self.aborted.load(Ordering::Acquire) {
            return false;
        }
        *isolate = Some(handle);
        true
    }
}

/// [Hexagonal Adapter] One isolated execution environment
pub struct SandboxInstance {
    instance_id: String,
    version_id: String,
    entry: EntryPoint,
    state: InstanceState,
    created_at: Instant,
    last_used: Instant,
    executions: u64,
    next_execution_id: u32,
    memory_limit_bytes: usize,
    requests: mpsc::UnboundedSender<ExecutionRequest>,
    flags: Arc<SharedFlags>,
}

impl SandboxInstance {
    /// [Command] Compile a sandbox for `version`
    ///
    /// Spawns the sandbox thread, which allocates the isolate, runs the
    /// bootstrap, the libraries and the user source, then resolves the entry
    /// point. Any failure (or running past `init_timeout`) tears the thread
    /// down; no instance outlives a failed step. Dropping the returned future
    /// part-way terminates the thread as well.
    pub async fn spawn(
        version: Arc<TransformationVersion>,
        settings: &InstanceSettings,
    ) -> SieveResult<Self> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let host = tokio::runtime::Handle::try_current()
            .map_err(|e| SieveError::Internal(format!("no host runtime: {e}")))?;

        let bridge = BridgeContext {
            version_id: version.id.clone(),
            host,
            transport: settings.transport.clone(),
            counters: settings.counters.clone(),
        };
        let flags = Arc::new(SharedFlags::default());
        let (init_tx, init_rx) = oneshot::channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let boot = SandboxBoot {
            version: version.clone(),
            bridge,
            memory_limit_bytes: settings.memory_limit_bytes,
            flags: flags.clone(),
        };
        std::thread::Builder::new()
            .name(format!("sieve-{}", &instance_id[..8]))
            .spawn(move || sandbox_thread(boot, init_tx, requests_rx))
            .map_err(|e| SieveError::Internal(format!("failed to spawn sandbox thread: {e}")))?;

        // Owns the thread from here on; dropped on any exit from this future
        let mut instance = Self {
            instance_id,
            version_id: version.id.clone(),
            entry: EntryPoint::Transform,
            state: InstanceState::Compiling,
            created_at: Instant::now(),
            last_used: Instant::now(),
            executions: 0,
            next_execution_id: 0,
            memory_limit_bytes: settings.memory_limit_bytes,
            requests: requests_tx,
            flags,
        };

        let initialised = match tokio::time::timeout(settings.init_timeout, init_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SieveError::SandboxUnavailable(
                "sandbox thread exited during initialisation".into(),
            )),
            Err(_) => Err(SieveError::Compile {
                version_id: version.id.clone(),
                message: format!(
                    "initialisation exceeded {}ms",
                    settings.init_timeout.as_millis()
                ),
            }),
        };

        match initialised {
            Ok(entry) => {
                instance.entry = entry;
                instance.advance(InstanceState::Idle)?;
                info!(
                    "🆕 Sandbox {} compiled for version {} (entry: {})",
                    instance.instance_id, instance.version_id, entry
                );
                Ok(instance)
            }
            Err(e) => {
                warn!("💥 Sandbox for version {} failed to initialise: {}", version.id, e);
                instance.dispose();
                Err(e)
            }
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_bytes
    }

    /// The sandbox thread is still accepting executions
    pub fn is_alive(&self) -> bool {
        !self.state.is_terminal()
            && !self.requests.is_closed()
            && !self.flags.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&mut self, next: InstanceState) -> SieveResult<()> {
        self.state = self
            .state
            .transition(next)
            .map_err(|e| SieveError::Internal(e.to_string()))?;
        if next == InstanceState::Idle {
            self.last_used = Instant::now();
        }
        Ok(())
    }

    /// [Command] Hand a batch to the sandbox. Requires `InUse`.
    pub fn start(&mut self, batch: Value, metadata: MetadataMap) -> SieveResult<PendingExecution> {
        if self.state != InstanceState::InUse {
            return Err(SieveError::Internal(format!(
                "sandbox {} executed while {:?}",
                self.instance_id, self.state
            )));
        }

        self.next_execution_id = self.next_execution_id.wrapping_add(1);
        self.executions += 1;
        let execution_id = self.next_execution_id;

        let (reply_tx, reply_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.requests
            .send(ExecutionRequest {
                execution_id,
                batch,
                metadata,
                reply: reply_tx,
                cancel: cancel_rx,
            })
            .map_err(|_| SieveError::SandboxUnavailable(format!("sandbox {} is gone", self.instance_id)))?;

        Ok(PendingExecution {
            execution_id,
            reply: reply_rx,
            _cancel: cancel_tx,
        })
    }

    /// [Command] Stop whatever the isolate is running, right now
    pub fn abort(&self) {
        self.flags.abort();
    }

    /// [Command] Terminal teardown; the thread drops the runtime on its way out
    pub fn dispose(mut self) {
        if let Err(e) = self.advance(InstanceState::Disposed) {
            error!("🛡️ {}", e);
        }
        debug!(
            "🗑️  Sandbox {} disposed after {} executions",
            self.instance_id, self.executions
        );
    }
}

/// [RAII Guard] A dropped handle never leaves its thread running: the
/// isolate is terminated and dropping `requests` ends the serve loop.
impl Drop for SandboxInstance {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for SandboxInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxInstance")
            .field("instance_id", &self.instance_id)
            .field("version_id", &self.version_id)
            .field("entry", &self.entry)
            .field("state", &self.state)
            .field("executions", &self.executions)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox Thread
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SandboxBoot {
    version: Arc<TransformationVersion>,
    bridge: BridgeContext,
    memory_limit_bytes: usize,
    flags: Arc<SharedFlags>,
}

fn sandbox_thread(
    boot: SandboxBoot,
    init_tx: oneshot::Sender<SieveResult<EntryPoint>>,
    requests: mpsc::UnboundedReceiver<ExecutionRequest>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("💥 Failed to start sandbox runtime: {}", e);
            return;
        }
    };

    rt.block_on(async move {
        let version_id = boot.version.id.clone();
        let mut sandbox = match Sandbox::create(boot) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        match sandbox.initialise() {
            Ok(entry) => {
                if init_tx.send(Ok(entry)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        }

        sandbox.serve(requests).await;
        debug!("🧵 Sandbox thread for version {} exiting", version_id);
    });
}

/// Thread-local half of an instance: owns the `JsRuntime`
struct Sandbox {
    runtime: JsRuntime,
    op_state: Rc<RefCell<OpState>>,
    version: Arc<TransformationVersion>,
    memory_limit_bytes: usize,
    flags: Arc<SharedFlags>,
}

impl Sandbox {
    /// [Internal] Allocate the isolate with its heap ceiling and bridge ops
    fn create(boot: SandboxBoot) -> SieveResult<Self> {
        let SandboxBoot {
            version,
            bridge,
            memory_limit_bytes,
            flags,
        } = boot;

        let mut ext = ops::sieve_bridge::init_ops();
        ext.op_state_fn = Some(Box::new(move |state| {
            state.put(bridge);
            state.put(ExecutionSlot::default());
            state.put(EntryCandidates::default());
        }));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![ext],
            create_params: Some(v8::CreateParams::default().heap_limits(0, memory_limit_bytes)),
            ..Default::default()
        });

        let isolate = runtime.v8_isolate().thread_safe_handle();
        let near_limit = isolate.clone();
        let heap_flags = flags.clone();
        runtime.add_near_heap_limit_callback(move |current_limit, _initial_limit| {
            heap_flags.heap_exhausted.store(true, Ordering::Release);
            near_limit.terminate_execution();
            // Headroom for V8 to unwind the terminated script instead of aborting the process
            current_limit.saturating_mul(2)
        });

        if !flags.publish(isolate) {
            return Err(SieveError::SandboxUnavailable(
                "host stopped waiting for the sandbox".into(),
            ));
        }

        let op_state = runtime.op_state();
        Ok(Self {
            runtime,
            op_state,
            version,
            memory_limit_bytes,
            flags,
        })
    }

    /// [Internal] Bootstrap, libraries, user source, then entry resolution
    fn initialise(&mut self) -> SieveResult<EntryPoint> {
        self.run_script("[sieve:bootstrap]", ops::BOOTSTRAP_JS.to_string())
            .map_err(|e| self.compile_failure("bootstrap: ", e))?;

        if let Some(library) = self.version.library_code.clone() {
            self.run_script("[sieve:library]", library)
                .map_err(|e| self.compile_failure("library: ", e))?;
        }

        let source = self.version.source_code.clone();
        self.run_script("[sieve:transformation]", source)
            .map_err(|e| self.compile_failure("", e))?;

        self.run_script("[sieve:resolve]", "globalThis.__sieveResolveEntry();".to_string())
            .map_err(|e| self.compile_failure("entry resolution: ", e))?;

        let found = self
            .op_state
            .borrow_mut()
            .borrow_mut::<EntryCandidates>()
            .0
            .take()
            .unwrap_or_default();
        EntryPoint::resolve(&found)
    }

    fn compile_failure(&self, stage: &str, e: anyhow::Error) -> SieveError {
        if self.flags.heap_exhausted.load(Ordering::Acquire) {
            return SieveError::MemoryLimitExceeded {
                limit_mb: (self.memory_limit_bytes / (1024 * 1024)) as u64,
            };
        }
        SieveError::Compile {
            version_id: self.version.id.clone(),
            message: format!("{stage}{e:#}"),
        }
    }

    fn run_script(&mut self, name: &'static str, source: String) -> anyhow::Result<()> {
        if self.flags.heap_exhausted.load(Ordering::Acquire) {
            return Err(anyhow!("memory limit exceeded"));
        }
        if self.flags.aborted.load(Ordering::Acquire) {
            return Err(anyhow!("sandbox aborted"));
        }
        self.runtime
            .execute_script(name, ModuleCodeString::from(source))
            .map(|_| ())
            .with_context(|| format!("{name} failed"))
    }

    /// [Internal] Serve executions until the host drops its handle or aborts
    async fn serve(&mut self, mut requests: mpsc::UnboundedReceiver<ExecutionRequest>) {
        while let Some(request) = requests.recv().await {
            let ExecutionRequest {
                execution_id,
                batch,
                metadata,
                reply,
                cancel,
            } = request;

            let outcome = self.execute(execution_id, batch, metadata, cancel).await;
            self.op_state.borrow_mut().borrow_mut::<ExecutionSlot>().finish();

            match outcome {
                Some(forwarded) => {
                    let _ = reply.send(forwarded);
                }
                None => debug!("⏹️  Execution {} abandoned by host", execution_id),
            }

            if self.flags.aborted.load(Ordering::Acquire)
                || self.flags.heap_exhausted.load(Ordering::Acquire)
            {
                break;
            }
        }
    }

    /// [Internal] One pass of the forwarding protocol.
    ///
    /// Returns `None` when the host abandoned the execution first.
    async fn execute(
        &mut self,
        execution_id: u32,
        batch: Value,
        metadata: MetadataMap,
        mut cancel: oneshot::Receiver<()>,
    ) -> Option<ForwardedReply> {
        self.op_state
            .borrow_mut()
            .borrow_mut::<ExecutionSlot>()
            .begin(execution_id, batch, metadata);

        let invoke = format!("globalThis.__sieveForward({execution_id});");
        if let Err(e) = self.run_script("[sieve:forward]", invoke) {
            return Some(self.fault(format!("{e:#}")));
        }

        let op_state = self.op_state.clone();
        let runtime = &mut self.runtime;
        let settled = poll_fn(|cx| {
            if let Some(done) = take_settled(&op_state) {
                return Poll::Ready(Ok(Some(done)));
            }
            match runtime.poll_event_loop(cx, PollEventLoopOptions::default()) {
                Poll::Ready(Ok(())) => Poll::Ready(Ok(take_settled(&op_state))),
                // A stray rejection elsewhere fails the tick after the entry
                // point already settled; the settlement stands.
                Poll::Ready(Err(e)) => match take_settled(&op_state) {
                    Some(done) => Poll::Ready(Ok(Some(done))),
                    None => Poll::Ready(Err(e)),
                },
                Poll::Pending => match take_settled(&op_state) {
                    Some(done) => Poll::Ready(Ok(Some(done))),
                    None => Poll::Pending,
                },
            }
        });

        let result = tokio::select! {
            result = settled => result,
            _ = &mut cancel => return None,
        };

        match result {
            Ok(Some(Forwarded::Resolved(value))) => Some(ForwardedReply::Resolved(value)),
            Ok(Some(Forwarded::Rejected(message))) => Some(ForwardedReply::Rejected(message)),
            Ok(None) => {
                // Event loop drained but the entry point never settled:
                // behaves like a script that never returns.
                let _ = (&mut cancel).await;
                None
            }
            Err(e) => Some(self.fault(e.to_string())),
        }
    }

    fn fault(&self, message: String) -> ForwardedReply {
        if self.flags.heap_exhausted.load(Ordering::Acquire) {
            ForwardedReply::MemoryExceeded
        } else {
            ForwardedReply::Faulted(message)
        }
    }
}

fn take_settled(op_state: &Rc<RefCell<OpState>>) -> Option<Forwarded> {
    op_state.borrow_mut().borrow_mut::<ExecutionSlot>().take_settled()
}
