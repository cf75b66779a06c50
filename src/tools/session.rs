//! Tool-session lifecycle: lazy connect, serialized calls, teardown.
//!
//! A [`SessionManager`] owns at most one live tool session and moves it
//! through `Uninitialized → Connecting → Ready → Closed`:
//!
//! - The first [`SessionManager::invoke`] launches the session. The state
//!   lock is held for the whole connect, so concurrent first callers wait
//!   for the same attempt instead of spawning their own process.
//! - A failed or abandoned connect returns to `Uninitialized`; the next
//!   call retries.
//! - Calls hold the same lock, so requests never interleave on the stream.
//! - Timeouts, transport failures and malformed responses tear the session
//!   down; the next call reconnects.
//! - [`SessionManager::close`] cancels in-flight connects and calls, then
//!   releases the process. It is idempotent and terminal.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::ToolError;
use crate::tools::process::{ProcessConfig, ToolProcess};
use crate::tools::protocol::{BoxedReader, BoxedWriter, SessionToken, ToolCall, ToolClient, ToolResult};

/// Observable lifecycle phase of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No process, no streams.
    Uninitialized,
    /// Spawn and handshake in flight.
    Connecting,
    /// Session usable.
    Ready,
    /// Terminal; every call fails with `session-closed`.
    Closed,
}

impl Display for SessionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closed => "closed",
        })
    }
}

/// Timing knobs of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound for one `tools/call` round trip.
    pub call_timeout: Duration,
    /// Grace period granted to the process on teardown before it is killed.
    pub shutdown_grace: Duration,
    /// Connect in [`SessionManager::start_session`] instead of on first use.
    pub eager_connect: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            eager_connect: false,
        }
    }
}

/// An initialized session and the process behind it.
#[derive(Debug)]
pub struct LiveSession {
    client: ToolClient,
    process: Option<ToolProcess>,
}

impl LiveSession {
    /// Pair a handshaken client with the process it talks to.
    ///
    /// `process` is `None` for sessions over in-memory streams.
    #[must_use]
    pub fn new(client: ToolClient, process: Option<ToolProcess>) -> Self {
        Self { client, process }
    }

    /// Handshake outcome of this session.
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        self.client.token()
    }

    /// Close stdin, then stop the process.
    async fn shutdown(self, grace: Duration) {
        let Self { client, process } = self;
        drop(client);
        if let Some(process) = process {
            process.terminate(grace).await;
        }
    }
}

/// Produces ready sessions for a [`SessionManager`].
///
/// The production implementation is [`ProcessLauncher`]; tests plug in
/// launchers over in-memory pipes.
pub trait SessionLauncher: Send + Sync {
    /// Start a session and complete its handshake.
    ///
    /// Dropping the returned future must release anything it created.
    ///
    /// # Errors
    ///
    /// Returns the [`ToolError`] of the failed spawn or handshake.
    fn launch(&self) -> Pin<Box<dyn Future<Output = Result<LiveSession, ToolError>> + Send + '_>>;
}

/// Launches the tool server as a child process over stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: ProcessConfig,
    handshake_timeout: Duration,
    shutdown_grace: Duration,
}

impl ProcessLauncher {
    /// Create a launcher for `config`.
    #[must_use]
    pub fn new(config: ProcessConfig, handshake_timeout: Duration, shutdown_grace: Duration) -> Self {
        Self {
            config,
            handshake_timeout,
            shutdown_grace,
        }
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch(&self) -> Pin<Box<dyn Future<Output = Result<LiveSession, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let (process, stdout, stdin) = ToolProcess::spawn(&self.config)?;
            let reader: BoxedReader = Box::new(stdout);
            let writer: BoxedWriter = Box::new(stdin);

            match ToolClient::handshake(reader, writer, self.handshake_timeout).await {
                Ok(client) => Ok(LiveSession::new(client, Some(process))),
                Err(err) => {
                    warn!(%err, "tool server handshake failed, stopping process");
                    process.terminate(self.shutdown_grace).await;
                    Err(err)
                }
            }
        })
    }
}

enum SessionState {
    Idle,
    Ready(LiveSession),
    Closed,
}

/// Owner of the single tool session of this process.
///
/// Share it as `Arc<SessionManager>`; every method takes `&self`.
pub struct SessionManager {
    launcher: Box<dyn SessionLauncher>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    phase: watch::Sender<SessionPhase>,
    closing: CancellationToken,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.options)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager in the `Uninitialized` phase. Nothing is spawned yet.
    #[must_use]
    pub fn new(launcher: impl SessionLauncher + 'static, options: SessionOptions) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            launcher: Box::new(launcher),
            options,
            state: Mutex::new(SessionState::Idle),
            phase,
            closing: CancellationToken::new(),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Boot hook: connect now when `eager_connect` is set, otherwise no-op.
    ///
    /// # Errors
    ///
    /// Returns the connect failure, or `session-closed` after [`close`](Self::close).
    pub async fn start_session(&self) -> Result<(), ToolError> {
        if !self.options.eager_connect {
            debug!("tool session will connect on first use");
            return Ok(());
        }
        let mut state = self.lock_state().await?;
        self.ensure_ready(&mut state).await?;
        Ok(())
    }

    /// Shutdown hook; same as [`close`](Self::close).
    pub async fn stop_session(&self) {
        self.close().await;
    }

    /// Call `tool_name` with JSON `arguments`, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Any [`ToolError`]: invalid call, connect failure, call failure, or
    /// `session-closed`.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<ToolResult, ToolError> {
        let call = ToolCall::from_value(tool_name, arguments)?;
        self.call(&call).await
    }

    /// Perform `call`, connecting first if needed.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn call(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        call.validate()?;
        let span = info_span!("tool_call", tool = call.name());

        async {
            let mut state = self.lock_state().await?;
            let session = self.ensure_ready(&mut state).await?;

            let outcome = tokio::select! {
                biased;
                () = self.closing.cancelled() => Err(ToolError::session_closed()),
                result = tokio::time::timeout(self.options.call_timeout, session.client.call_tool(call)) => {
                    result.unwrap_or_else(|_| {
                        Err(ToolError::timeout(format!(
                            "no response to `{}` within {:?}",
                            call.name(),
                            self.options.call_timeout
                        )))
                    })
                }
            };

            if let Err(ref err) = outcome {
                if err.invalidates_session() {
                    warn!(%err, "tool session invalidated, tearing down");
                    let stale = std::mem::replace(&mut *state, SessionState::Idle);
                    self.set_phase(SessionPhase::Uninitialized);
                    drop(state);
                    if let SessionState::Ready(live) = stale {
                        live.shutdown(self.options.shutdown_grace).await;
                    }
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Release the process and streams and enter `Closed` for good.
    ///
    /// Safe in every phase, including before any session existed and while
    /// calls or a connect are in flight: those are aborted and fail with
    /// `session-closed`. Repeated calls are no-ops. Teardown problems are
    /// logged, never returned.
    pub async fn close(&self) {
        self.closing.cancel();

        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, SessionState::Closed);
        self.set_phase(SessionPhase::Closed);
        drop(state);

        match previous {
            SessionState::Ready(live) => {
                info!("closing tool session");
                live.shutdown(self.options.shutdown_grace).await;
                info!("tool session closed");
            }
            SessionState::Idle => debug!("tool session closed before it was used"),
            SessionState::Closed => debug!("tool session already closed"),
        }
    }

    /// Take the state lock unless the manager is closing.
    async fn lock_state(&self) -> Result<tokio::sync::MutexGuard<'_, SessionState>, ToolError> {
        if self.closing.is_cancelled() {
            return Err(ToolError::session_closed());
        }
        tokio::select! {
            biased;
            () = self.closing.cancelled() => Err(ToolError::session_closed()),
            guard = self.state.lock() => Ok(guard),
        }
    }

    /// Make sure `state` holds a usable session, launching one if needed.
    ///
    /// The caller holds the state lock, which is what makes the connect
    /// single-flight.
    async fn ensure_ready<'a>(
        &self,
        state: &'a mut SessionState,
    ) -> Result<&'a mut LiveSession, ToolError> {
        let poisoned = matches!(state, SessionState::Ready(live) if live.client.is_poisoned());
        if poisoned {
            warn!("discarding tool session left desynchronized by an abandoned call");
            let stale = std::mem::replace(state, SessionState::Idle);
            self.set_phase(SessionPhase::Uninitialized);
            if let SessionState::Ready(live) = stale {
                live.shutdown(self.options.shutdown_grace).await;
            }
        }

        if matches!(state, SessionState::Idle) {
            self.set_phase(SessionPhase::Connecting);
            info!("connecting tool session");

            // Also fires when the caller is dropped mid-launch.
            let pending = ConnectGuard {
                phase: &self.phase,
                closing: &self.closing,
                armed: true,
            };

            let attempt = tokio::select! {
                biased;
                () = self.closing.cancelled() => Err(ToolError::session_closed()),
                result = self.launcher.launch() => result,
            };

            match attempt {
                Ok(live) => {
                    pending.disarm();
                    info!(
                        protocol_version = %live.token().protocol_version,
                        "tool session ready"
                    );
                    *state = SessionState::Ready(live);
                    self.set_phase(SessionPhase::Ready);
                }
                Err(err) => {
                    drop(pending);
                    warn!(%err, "tool session connect failed");
                    return Err(err.while_connecting());
                }
            }
        }

        match state {
            SessionState::Ready(live) => Ok(live),
            SessionState::Closed => Err(ToolError::session_closed()),
            SessionState::Idle => Err(ToolError::transport("tool session unavailable")),
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "tool session phase changed");
        }
    }
}

/// Returns the phase to `Uninitialized` unless the connect it covers
/// succeeded or the manager is closing.
struct ConnectGuard<'a> {
    phase: &'a watch::Sender<SessionPhase>,
    closing: &'a CancellationToken,
    armed: bool,
}

impl ConnectGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed && !self.closing.is_cancelled() {
            let previous = self.phase.send_replace(SessionPhase::Uninitialized);
            debug!(from = %previous, to = %SessionPhase::Uninitialized, "tool session phase changed");
        }
    }
}
