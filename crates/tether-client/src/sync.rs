// crates/tether-client/src/sync.rs
// Sync worker: stream lifecycle, reconnect backoff, debounced reconciliation

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tether_types::{Message, StreamEvent};

use crate::config::CadenceProfile;
use crate::error::ClientError;
use crate::gateway::GatewayClient;
use crate::reconnect::{retry_delay, ReconnectState};
use crate::stream::{EventStream, StreamNotice, StreamOptions};

const DEFAULT_RECONCILE_LIMIT: u32 = 100;

/// Tuning for a sync worker.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub profile: CadenceProfile,
    /// History page size for reconciliation fetches
    pub reconcile_limit: u32,
    /// Deliver heartbeat frames to the worker (normally filtered out)
    pub include_heartbeats: bool,
}

impl SyncSettings {
    pub fn new(profile: CadenceProfile) -> Self {
        Self {
            profile,
            reconcile_limit: DEFAULT_RECONCILE_LIMIT,
            include_heartbeats: false,
        }
    }
}

/// Updates pushed to whoever holds the receiver from [`SessionSync::spawn`].
#[derive(Debug)]
pub enum SyncUpdate {
    /// The push stream is live.
    StreamLive,
    /// The push stream went down. `retry_in` is set when a reconnect is
    /// scheduled; `None` means streaming was stopped deliberately.
    StreamDown {
        reason: String,
        retry_in: Option<Duration>,
    },
    /// A message for the selected session arrived on the stream.
    Message(Message),
    /// Authoritative history for the selected session.
    Reconciled {
        session_key: String,
        messages: Vec<Message>,
    },
    /// A reconciliation fetch failed; the local view may be stale.
    ReconcileFailed { session_key: String, error: String },
}

enum Command {
    SelectSession(Option<String>),
    StartStreaming,
    StopStreaming { reason: String },
}

/// Handle to a spawned sync worker.
///
/// The worker serializes every state transition; one handle, one owner is
/// the expected usage. Dropping the handle shuts the worker down.
pub struct SessionSync {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionSync {
    /// Spawn a worker against `gateway` and return the handle plus the
    /// update stream.
    pub fn spawn(
        gateway: GatewayClient,
        settings: SyncSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SyncUpdate>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates, update_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        let worker = SyncWorker {
            gateway,
            settings,
            updates,
            commands: command_rx,
            fetch_tx,
            fetch_rx,
            selected: None,
            reconnect: ReconnectState::new(),
            live: false,
            stream: None,
            reconnect_at: None,
            reconcile: None,
            fetch_task: None,
        };
        tokio::spawn(worker.run());

        (Self { commands }, update_rx)
    }

    /// Replace the selected session. Cancels any pending reconciliation for
    /// the previous one. Does not fetch history; do that through
    /// [`GatewayClient::session_messages`] right after selecting.
    pub fn select_session(&self, session_key: Option<String>) {
        let _ = self.commands.send(Command::SelectSession(session_key));
    }

    /// Open the push stream and keep it healed. No-op if already streaming.
    pub fn start_streaming(&self) {
        let _ = self.commands.send(Command::StartStreaming);
    }

    /// Stop streaming and cancel all scheduled work. Idempotent.
    pub fn stop_streaming(&self, reason: impl Into<String>) {
        let _ = self.commands.send(Command::StopStreaming {
            reason: reason.into(),
        });
    }
}

struct PendingReconcile {
    session_key: String,
    at: Instant,
}

struct FetchOutcome {
    session_key: String,
    result: Result<Vec<Message>, ClientError>,
}

struct SyncWorker {
    gateway: GatewayClient,
    settings: SyncSettings,
    updates: mpsc::UnboundedSender<SyncUpdate>,
    commands: mpsc::UnboundedReceiver<Command>,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    selected: Option<String>,
    reconnect: ReconnectState,
    /// Dedupes StreamLive across our synthetic connected event and the
    /// gateway's own connected frame.
    live: bool,
    stream: Option<EventStream>,
    reconnect_at: Option<Instant>,
    reconcile: Option<PendingReconcile>,
    fetch_task: Option<JoinHandle<()>>,
}

impl SyncWorker {
    async fn run(mut self) {
        loop {
            let reconnect_at = self.reconnect_at;
            let reconcile_at = self.reconcile.as_ref().map(|pending| pending.at);

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                notice = next_notice(self.stream.as_mut()) => self.handle_notice(notice),
                _ = sleep_until_opt(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.try_connect().await;
                }
                _ = sleep_until_opt(reconcile_at), if reconcile_at.is_some() => {
                    self.fire_reconcile();
                }
                Some(outcome) = self.fetch_rx.recv() => self.apply_fetch(outcome),
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectSession(session_key) => self.select_session(session_key).await,
            Command::StartStreaming => self.start_streaming().await,
            Command::StopStreaming { reason } => self.stop_streaming(reason).await,
        }
    }

    async fn select_session(&mut self, session_key: Option<String>) {
        if self.selected == session_key {
            return;
        }
        debug!("selected session: {:?}", session_key);
        self.selected = session_key;
        self.reconcile = None;
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        // A reconnect scheduled before the switch would fire against stale
        // state; replace it with an immediate attempt.
        if self.reconnect_at.take().is_some() && self.reconnect.active {
            self.try_connect().await;
        }
    }

    async fn start_streaming(&mut self) {
        if self.reconnect.active {
            debug!("start_streaming ignored: already streaming");
            return;
        }
        self.reconnect.active = true;
        self.reconnect.reset();
        self.try_connect().await;
    }

    async fn stop_streaming(&mut self, reason: String) {
        if !self.reconnect.active && self.stream.is_none() {
            return;
        }
        self.reconnect.active = false;
        self.live = false;
        self.reconnect_at = None;
        self.reconcile = None;
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop().await;
        }
        info!("streaming stopped: {}", reason);
        self.push(SyncUpdate::StreamDown {
            reason,
            retry_in: None,
        });
    }

    async fn try_connect(&mut self) {
        if !self.reconnect.active {
            return;
        }
        let options = StreamOptions {
            include_heartbeats: self.settings.include_heartbeats,
        };
        match EventStream::connect(self.gateway.base_url(), self.gateway.auth_token(), options).await
        {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => self.handle_terminal(err.to_string()),
        }
    }

    fn handle_notice(&mut self, notice: Option<StreamNotice>) {
        match notice {
            Some(StreamNotice::Event(event)) => self.handle_event(event),
            Some(StreamNotice::Closed { reason }) => {
                self.stream = None;
                self.handle_terminal(
                    reason.unwrap_or_else(|| "connection closed by gateway".to_string()),
                );
            }
            Some(StreamNotice::Failed { error }) => {
                self.stream = None;
                self.handle_terminal(error);
            }
            None => {
                self.stream = None;
                self.handle_terminal("event stream ended".to_string());
            }
        }
    }

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected { .. } => {
                self.reconnect.reset();
                if !self.live {
                    self.live = true;
                    self.push(SyncUpdate::StreamLive);
                }
            }
            StreamEvent::Heartbeat { .. } => {}
            StreamEvent::InboundMessage { message } | StreamEvent::OutboundMessage { message } => {
                if self.selected.as_deref() != Some(message.session_key.as_str()) {
                    debug!("ignoring message for unselected session {}", message.session_key);
                    return;
                }
                let session_key = message.session_key.clone();
                self.push(SyncUpdate::Message(message));
                self.schedule_reconcile(session_key);
            }
            StreamEvent::SystemLog { level, message } => {
                debug!("gateway log [{}]: {}", level, message);
            }
            StreamEvent::Lagged { skipped } => {
                // The gateway's event bus overran; the local view may have
                // missed messages for the selected session.
                warn!("gateway event bus dropped {} events", skipped);
                if let Some(selected) = self.selected.clone() {
                    self.schedule_reconcile(selected);
                }
            }
            StreamEvent::Error { message } => {
                warn!("stream frame error: {}", message);
            }
        }
    }

    fn handle_terminal(&mut self, reason: String) {
        self.live = false;
        if !self.reconnect.active {
            debug!("stream ended after stop: {}", reason);
            return;
        }
        let attempt = self.reconnect.record_failure();
        let delay = retry_delay(attempt, &self.settings.profile);
        info!(
            "stream down ({}), reconnect attempt {} in {}ms",
            reason,
            attempt,
            delay.as_millis()
        );
        self.reconnect_at = Some(Instant::now() + delay);
        self.push(SyncUpdate::StreamDown {
            reason,
            retry_in: Some(delay),
        });
    }

    fn schedule_reconcile(&mut self, session_key: String) {
        if let Some(pending) = &self.reconcile {
            if pending.session_key == session_key {
                // Coalesce: the scheduled fetch covers this event too.
                return;
            }
        }
        let at = Instant::now() + Duration::from_millis(self.settings.profile.reconciliation_debounce_ms);
        self.reconcile = Some(PendingReconcile { session_key, at });
    }

    fn fire_reconcile(&mut self) {
        let Some(pending) = self.reconcile.take() else {
            return;
        };
        // Fetches run on their own task so the stream loop is never starved.
        let gateway = self.gateway.clone();
        let limit = self.settings.reconcile_limit;
        let fetch_tx = self.fetch_tx.clone();
        let session_key = pending.session_key;
        self.fetch_task = Some(tokio::spawn(async move {
            let result = gateway.session_messages(&session_key, limit).await;
            let _ = fetch_tx.send(FetchOutcome {
                session_key,
                result,
            });
        }));
    }

    fn apply_fetch(&mut self, outcome: FetchOutcome) {
        self.fetch_task = None;
        if self.selected.as_deref() != Some(outcome.session_key.as_str()) {
            debug!(
                "discarding reconciliation result for unselected session {}",
                outcome.session_key
            );
            return;
        }
        match outcome.result {
            Ok(messages) => self.push(SyncUpdate::Reconciled {
                session_key: outcome.session_key,
                messages,
            }),
            Err(err) => {
                warn!("reconciliation fetch failed: {}", err);
                self.push(SyncUpdate::ReconcileFailed {
                    session_key: outcome.session_key,
                    error: err.to_string(),
                });
            }
        }
    }

    fn push(&self, update: SyncUpdate) {
        let _ = self.updates.send(update);
    }

    async fn shutdown(mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop().await;
        }
    }
}

async fn next_notice(stream: Option<&mut EventStream>) -> Option<StreamNotice> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
