//! # Link to the Host
//!
//! `Link` is the one runtime context a script process owns. It holds the call
//! registry, the process-wide default executor, the transport, and a small tokio
//! runtime that drives three background tasks:
//!
//! - the **service loop**, reading reply lines and dispatching them to the registry,
//! - the **writer**, draining outgoing lines in the order calls were issued,
//! - the **watchdog** (optional), requesting exit once the script's main thread ends.
//!
//! The public API is synchronous. Script threads block only while waiting on a
//! reply, and every such wait returns promptly once the link is closed.
//!
//! ## Lifecycle
//!
//! `Running` -> `Exiting` (an `exit!` was sent) -> `Closed` (the host acknowledged,
//! the input stream ended, or the acknowledgment timed out). Once closed, calls
//! that expect a reply fail with `Error::LinkClosed` without blocking, and
//! fire-and-forget calls are silently dropped.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bridgerpc::Value;
use bridgerpc::decode_reply;
use bridgerpc::encode_call;
use bridgerpc::frame::EXIT_FUNCTION;
use bridgerpc::frame::SYSTEM_CALL_ID;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::call::Call;
use crate::config::LinkConfig;
use crate::error::Error;
use crate::error::Result;
use crate::executor::Executor;
use crate::future::CallFuture;
use crate::future::ReplyStream;
use crate::registry::CallId;
use crate::registry::CallRegistry;
use crate::registry::Delivery;
use crate::registry::ErrorRoute;
use crate::registry::PendingCall;
use crate::transport;
use crate::transport::Transport;
use crate::watchdog;
use crate::watchdog::Liveness;

/// Target used for echoing raw protocol lines in debug mode.
pub const WIRE_TARGET: &str = "bridge::wire";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Running,
    /// `exit!` has been sent; waiting for the host to acknowledge it.
    Exiting,
    Closed,
}

/// Result of blocking on a reply channel.
pub(crate) enum Recv {
    Delivery(Delivery),
    /// Every sender is gone: the call was closed or forgotten without a reply.
    Disconnected,
    /// The link closed while waiting.
    Closed,
    TimedOut,
    /// The calling thread is driving an async runtime and must not block.
    InsideRuntime,
}

/// State shared between the script threads and the background tasks.
pub(crate) struct Shared {
    registry: CallRegistry,
    outbound: UnboundedSender<String>,
    state: watch::Sender<LinkState>,
    exit_requested: AtomicBool,
    default_executor: AtomicU8,
    handle: Handle,
    config: LinkConfig,
}

impl Shared {
    pub(crate) fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == LinkState::Closed
    }

    pub(crate) fn default_executor(&self) -> Executor {
        Executor::from_u8(self.default_executor.load(Ordering::Relaxed))
    }

    fn write_line(&self, line: String) -> Result<()> {
        if self.config.debug {
            debug!(target: WIRE_TARGET, "-> {}", line.trim_end());
        }
        self.outbound.send(line).map_err(|_| Error::LinkClosed)
    }

    /// Registers a call and writes its request line. Replies go to `sink`.
    pub(crate) fn issue(
        &self,
        function: &str,
        args: &[Value],
        executor: Executor,
        errors: ErrorRoute,
        sink: UnboundedSender<Delivery>,
    ) -> Result<CallId> {
        if self.is_closed() {
            return Err(Error::LinkClosed);
        }
        let id = self.registry.allocate();
        let line = encode_call(id, executor.as_str(), function, args)?;

        // registered before the line is written, so the reply always finds it
        self.registry.register(id, PendingCall::new(function, sink, errors));
        if let Err(e) = self.write_line(line) {
            self.registry.forget(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Writes a call on id 0. Nothing is registered and no reply is expected.
    pub(crate) fn fire(&self, function: &str, args: &[Value], executor: Executor) -> Result<()> {
        if self.is_closed() {
            debug!("link closed, dropping fire-and-forget call to '{}'", function);
            return Ok(());
        }
        let line = encode_call(SYSTEM_CALL_ID, executor.as_str(), function, args)?;
        if self.write_line(line).is_err() {
            debug!("writer gone, dropping fire-and-forget call to '{}'", function);
        }
        Ok(())
    }

    /// Blocks the calling (non-async) thread until a delivery arrives, the link
    /// closes, or `timeout` expires. Refuses to block on a thread that is
    /// already inside a tokio runtime.
    pub(crate) fn recv_blocking(
        &self,
        rx: &mut UnboundedReceiver<Delivery>,
        timeout: Option<Duration>,
    ) -> Recv {
        match rx.try_recv() {
            Ok(delivery) => return Recv::Delivery(delivery),
            Err(TryRecvError::Disconnected) => return Recv::Disconnected,
            Err(TryRecvError::Empty) => {}
        }
        if self.is_closed() {
            return Recv::Closed;
        }
        if Handle::try_current().is_ok() {
            return Recv::InsideRuntime;
        }

        let mut state = self.state.subscribe();
        self.handle.block_on(async move {
            let recv = async {
                match rx.recv().await {
                    Some(delivery) => Recv::Delivery(delivery),
                    None => Recv::Disconnected,
                }
            };
            let closed = async {
                let _ = state.wait_for(|s| *s == LinkState::Closed).await;
                Recv::Closed
            };
            let deadline = async {
                match timeout {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                r = recv => r,
                r = closed => r,
                _ = deadline => Recv::TimedOut,
            }
        })
    }

    /// Sends `exit!` once. Later calls return false.
    pub(crate) fn request_exit(self: &Arc<Self>) -> bool {
        if self.exit_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.send_if_modified(|s| {
            if *s == LinkState::Running {
                *s = LinkState::Exiting;
                true
            } else {
                false
            }
        });

        info!("requesting exit from host");
        if let Err(e) = self.fire(EXIT_FUNCTION, &[], self.default_executor()) {
            warn!("could not send exit request: {}", e);
        }

        let shared = Arc::clone(self);
        let timeout = self.config.exit_ack_timeout();
        self.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if !shared.is_closed() {
                warn!("host did not acknowledge exit within {:?}, closing link", timeout);
                shared.close();
            }
        });
        true
    }

    /// Enters the closed state and wakes every pending call.
    pub(crate) fn close(&self) {
        let changed = self.state.send_if_modified(|s| {
            if *s != LinkState::Closed {
                *s = LinkState::Closed;
                true
            } else {
                false
            }
        });
        if changed {
            info!("link closed ({} calls pending)", self.registry.len());
        }
        self.registry.close_all();
    }
}

/// Reads reply lines until the host acknowledges exit or the input ends.
async fn service_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    loop {
        let line = match transport.recv_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("host closed the input stream");
                break;
            }
            Err(e) => {
                error!("service loop stopped: {}", e);
                break;
            }
        };

        if shared.config.debug {
            debug!(target: WIRE_TARGET, "<- {}", line);
        }
        if line.trim().is_empty() {
            continue;
        }

        let reply = match decode_reply(&line) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("skipping malformed reply ({}): {}", e, line);
                continue;
            }
        };

        if reply.call_id == SYSTEM_CALL_ID {
            if reply.is_exit_ack() {
                info!("host acknowledged exit");
                break;
            }
            debug!("ignoring system message: {:?}", reply);
            continue;
        }

        shared.registry.dispatch(reply);
    }

    shared.close();
}

/// Writes outgoing lines in the order they were queued.
async fn write_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, mut rx: UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = transport.send_line(&line).await {
            error!("writer stopped: {}", e);
            shared.close();
            return;
        }
    }
}

/// The script's connection to the host.
pub struct Link {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
}

impl Link {
    /// Starts the background tasks over `transport`.
    pub fn start(transport: Box<dyn Transport>, config: LinkConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bridge-link")
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(transport::Error::Io(e.to_string())))?;

        let transport: Arc<dyn Transport> = Arc::from(transport);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Running);

        let shared = Arc::new(Shared {
            registry: CallRegistry::new(config.unknown_reply_threshold),
            outbound,
            state,
            exit_requested: AtomicBool::new(false),
            default_executor: AtomicU8::new(config.default_executor.to_u8()),
            handle: runtime.handle().clone(),
            config,
        });

        runtime.spawn(write_loop(Arc::clone(&shared), Arc::clone(&transport), outbound_rx));
        runtime.spawn(service_loop(Arc::clone(&shared), transport));
        debug!("link started (default executor {})", shared.default_executor());

        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of calls still waiting for the host to close them.
    pub fn pending_calls(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn default_executor(&self) -> Executor {
        self.shared.default_executor()
    }

    /// Changes the executor used by calls that resolve no other.
    pub fn set_default_executor(&self, executor: Executor) {
        self.shared.default_executor.store(executor.to_u8(), Ordering::Relaxed);
    }

    /// Starts building a call to `function`.
    pub fn function(&self, function: impl Into<String>) -> Call<'_> {
        Call::new(&self.shared, function.into())
    }

    /// Calls `function` and blocks until it returns.
    ///
    /// Fails with `Error::InsideRuntime` when called from a thread that is
    /// driving a tokio runtime.
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        self.function(function).args(args).call()
    }

    /// Calls `function` and returns immediately with a handle to the result.
    pub fn call_async(&self, function: &str, args: Vec<Value>) -> Result<CallFuture<Value>> {
        self.function(function).args(args).spawn()
    }

    /// Calls a function that streams several values before closing.
    pub fn call_stream(&self, function: &str, args: Vec<Value>) -> Result<ReplyStream> {
        self.function(function).args(args).stream()
    }

    /// Calls `function` without expecting any reply.
    pub fn send(&self, function: &str, args: Vec<Value>) -> Result<()> {
        self.function(function).args(args).fire()
    }

    /// Asks the host to end the session. Only the first request is sent.
    pub fn request_exit(&self) -> bool {
        self.shared.request_exit()
    }

    /// Starts a watchdog that requests exit once `liveness` reports the script's
    /// main line of execution has ended.
    pub fn watch(&self, liveness: Liveness) {
        self.shared.handle.spawn(watchdog::run(Arc::clone(&self.shared), liveness));
    }

    /// Runs `main` on a dedicated thread under the watchdog.
    pub fn spawn_main<F, R>(&self, main: F) -> std::io::Result<std::thread::JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (token, liveness) = watchdog::liveness();
        let handle = std::thread::Builder::new()
            .name("script-main".into())
            .spawn(move || {
                let _token = token;
                main()
            })?;
        self.watch(liveness);
        Ok(handle)
    }

    /// Blocks until the link is closed.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime. Use it from a plain thread,
    /// as every other blocking operation on the link.
    pub fn join(&self) {
        let mut state = self.shared.state.subscribe();
        self.shared.handle.block_on(async move {
            let _ = state.wait_for(|s| *s == LinkState::Closed).await;
        });
    }

    /// Blocks until the link is closed or `timeout` expires. Returns true if closed.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.subscribe();
        self.shared.handle.block_on(async move {
            let closed = tokio::time::timeout(timeout, state.wait_for(|s| *s == LinkState::Closed)).await;
            matches!(closed, Ok(Ok(_)))
        })
    }

    /// Requests exit and waits for the link to close.
    pub fn shutdown(&self) {
        self.request_exit();
        self.join();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shared.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
