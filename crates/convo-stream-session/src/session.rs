//! Session driver and the facade handed to the application.
//!
//! All session state is mutated by a single driver task. Transport signals,
//! replay timer steps and facade commands are handled one at a time, each to
//! completion, so the log and the replay queue never see interleaved writes.

use std::{pin::Pin, sync::Arc};

use convo_stream_core::{
    ConnectionStatus, Event, EventHandler, EventLog, IngestError, IngestPipeline, Ingested,
    LogUpdate, RateMonitor, ReplayState, Route, SessionMode,
};
use convo_stream_transport::{
    ChannelConnection, ChannelEvent, ClientMessage, Connector, DomainError, ErrorClass,
    ServerFrame, TransportError,
};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    error::{Notice, SessionError},
    replay::ReplayScheduler,
};

const NOTICE_CAPACITY: usize = 64;

/// Observable session state, for UI binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub mode: SessionMode,
    /// `None` outside replay mode.
    pub replay_state: Option<ReplayState>,
    pub last_delivered_id: Option<i64>,
    /// Last conversation error reported by the remote side.
    pub error: Option<DomainError>,
}

struct Shared {
    log: EventLog,
    rate: Mutex<RateMonitor>,
    state: watch::Sender<SessionState>,
    notices: broadcast::Sender<Notice>,
}

enum Command {
    Send(Map<String, Value>),
    Disconnect,
    Reconnect,
    SkipToResults(oneshot::Sender<usize>),
    ResetReplay(oneshot::Sender<usize>),
}

/// One conversation stream.
///
/// Dropping the session cancels it; use [`Session::close`] to also wait
/// until the channel is detached and no further event can be delivered.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session and open its channel.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let (state, _) = watch::channel(SessionState {
            status: ConnectionStatus::Disconnected,
            mode: config.mode,
            replay_state: (config.mode == SessionMode::Replay).then_some(ReplayState::InProgress),
            last_delivered_id: None,
            error: None,
        });
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            log: EventLog::new(),
            rate: Mutex::new(RateMonitor::new(config.rate_threshold)),
            state,
            notices,
        });

        let driver = SessionDriver {
            channel: ChannelConnection::new(connector),
            pipeline: IngestPipeline::new(config.mode),
            scheduler: ReplayScheduler::new(config.replay_interval, cancel.child_token()),
            shared: Arc::clone(&shared),
            handler,
            commands: command_rx,
            cancel: cancel.clone(),
            auto_reconnect: true,
            attempts: 0,
            reconnect_at: None,
            config: config.clone(),
        };

        let span = tracing::info_span!(
            "session",
            %id,
            conversation_id = %config.conversation_id,
            mode = ?config.mode,
        );
        let task = tokio::spawn(driver.run().instrument(span));

        Self {
            id,
            config,
            commands,
            shared,
            cancel,
            task: Some(task),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.config.conversation_id
    }

    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.config.auth_token
    }

    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.config.mode
    }

    /// Send an application command to the remote agent.
    ///
    /// # Errors
    /// Returns [`SessionError::NotConnected`] (and logs it) if no channel is
    /// open, or [`SessionError::Closed`] once the session is gone.
    pub fn send(&self, action: Map<String, Value>) -> Result<(), SessionError> {
        if self.status() != ConnectionStatus::Connected {
            tracing::error!(session = %self.id, "Cannot send while disconnected");
            return Err(SessionError::NotConnected);
        }
        self.commands
            .send(Command::Send(action))
            .map_err(|_| SessionError::Closed)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.borrow().status
    }

    /// Replay progress; `None` for live sessions.
    #[must_use]
    pub fn replay_state(&self) -> Option<ReplayState> {
        self.shared.state.borrow().replay_state
    }

    /// Resume cursor: the last numeric id handed to the consumer.
    #[must_use]
    pub fn last_delivered_id(&self) -> Option<i64> {
        self.shared.log.last_delivered_id()
    }

    /// Whether the initial burst of messages is still arriving.
    #[must_use]
    pub fn is_loading_messages(&self) -> bool {
        self.shared.rate.lock().is_under_threshold(Instant::now())
    }

    /// Delivered events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.shared.log.snapshot()
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Delivered events so far, then every later change to the log.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, LogUpdate> {
        self.shared.log.history_plus_stream()
    }

    /// Errors and status messages meant for the user.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Deliver every queued replay event at once.
    ///
    /// Returns how many events were delivered; zero outside replay mode or
    /// with an empty queue.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] once the session is gone.
    pub async fn skip_to_results(&self) -> Result<usize, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SkipToResults(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Replay the whole conversation again from the start.
    ///
    /// Returns how many events are queued; zero when there is nothing to
    /// replay or outside replay mode.
    ///
    /// # Errors
    /// Returns [`SessionError::Closed`] once the session is gone.
    pub async fn reset_replay(&self) -> Result<usize, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ResetReplay(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Close the channel and stop reconnecting.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Re-open the channel from the current resume cursor.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Tear the session down and wait until nothing more can be delivered.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(session = %self.id, "Session driver failed: {e}");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionDriver {
    config: SessionConfig,
    channel: ChannelConnection,
    pipeline: IngestPipeline,
    scheduler: ReplayScheduler,
    shared: Arc<Shared>,
    handler: Arc<dyn EventHandler>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    auto_reconnect: bool,
    attempts: u32,
    reconnect_at: Option<Pin<Box<Sleep>>>,
}

impl SessionDriver {
    async fn run(mut self) {
        self.connect();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                // Inbound frames go first so a burst is fully queued before
                // the next replay step; a frame stream that never pauses
                // holds replay steps back.
                event = self.channel.next_event() => self.on_channel_event(event),
                () = self.scheduler.wait_step() => self.on_replay_step(),
                () = wait_deadline(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        self.teardown();
    }

    fn connect(&mut self) {
        let cursor = self.shared.log.last_delivered_id();
        self.channel.connect(self.config.open_params(cursor));
        self.publish_status();
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send(data) => {
                if let Err(e) = self.channel.send(ClientMessage::user_action(data)) {
                    tracing::error!("Dropping outbound action: {e}");
                }
            }
            Command::Disconnect => {
                self.auto_reconnect = false;
                self.reconnect_at = None;
                if self.channel.disconnect() {
                    tracing::info!("Channel closed");
                }
                self.publish_status();
            }
            Command::Reconnect => {
                self.auto_reconnect = true;
                self.attempts = 0;
                self.reconnect_at = None;
                self.connect();
            }
            Command::SkipToResults(reply) => {
                let _ = reply.send(self.skip_to_results());
            }
            Command::ResetReplay(reply) => {
                let _ = reply.send(self.reset_replay());
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.attempts = 0;
                tracing::info!(
                    latest_event_id = ?self.channel.params().map(|p| p.latest_event_id),
                    "Channel open"
                );
                self.shared.state.send_modify(|s| {
                    s.status = ConnectionStatus::Connected;
                    s.error = None;
                });
            }
            ChannelEvent::Frame(text) => self.on_frame(&text),
            ChannelEvent::Lost { error } => self.on_lost(error),
        }
    }

    fn on_frame(&mut self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::Event(raw)) => self.ingest(raw),
            Ok(ServerFrame::Error(error)) => self.report_domain(error),
            Ok(ServerFrame::Status(notice)) => {
                tracing::debug!(id = %notice.id, "Status update: {}", notice.message);
                let _ = self.shared.notices.send(Notice::Status(notice));
            }
            Err(e) => tracing::warn!("Dropping unreadable frame: {e}"),
        }
    }

    fn on_lost(&mut self, error: Option<TransportError>) {
        let cursor = self.shared.log.last_delivered_id();
        self.publish_status();

        match error {
            Some(error) if error.classify() == ErrorClass::Domain => {
                self.auto_reconnect = false;
                if let Some(domain) = error.domain() {
                    self.report_domain(domain.clone());
                }
            }
            Some(error) => {
                tracing::debug!(latest_event_id = ?cursor, "Channel lost: {error}");
                self.schedule_reconnect();
            }
            None => {
                tracing::info!(latest_event_id = ?cursor, "Channel closed by remote");
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.auto_reconnect {
            return;
        }
        self.attempts += 1;
        match self.config.reconnect.delay_for(self.attempts) {
            Some(delay) => {
                tracing::debug!(attempt = self.attempts, ?delay, "Scheduling reconnect");
                self.reconnect_at = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => tracing::warn!(
                attempts = self.attempts - 1,
                "Giving up on reconnecting"
            ),
        }
    }

    fn report_domain(&self, error: DomainError) {
        let viewer = self.config.mode == SessionMode::Replay || self.config.shared;
        let redirect_after = (viewer && error.is_unavailable()).then_some(self.config.redirect_delay);

        tracing::warn!("Conversation error: {error}");
        self.shared.state.send_modify(|s| s.error = Some(error.clone()));
        let _ = self.shared.notices.send(Notice::Error {
            error,
            redirect_after,
        });
    }

    fn ingest(&mut self, raw: Value) {
        match self.pipeline.ingest(raw) {
            Ok(Ingested { event, route }) => {
                if event.is_message() {
                    self.shared.rate.lock().record(Instant::now());
                }
                match route {
                    Route::Deliver => self.deliver(event),
                    Route::Enqueue => {
                        self.scheduler.enqueue(event);
                        self.publish_replay_state();
                    }
                }
            }
            Err(IngestError::Duplicate(id)) => {
                tracing::debug!(
                    event_id = id,
                    highest_seen = ?self.pipeline.highest_seen(),
                    "Dropping re-delivered event"
                );
            }
            Err(e @ IngestError::Malformed(_)) => tracing::warn!("Dropping frame: {e}"),
        }
    }

    fn deliver(&self, event: Event) {
        self.shared.log.push(event.clone());
        self.dispatch(&event);
        self.publish_cursor();
    }

    fn dispatch(&self, event: &Event) {
        if let Err(e) = self.handler.on_event(event) {
            tracing::warn!(event_id = %event.id(), "{e}");
        }
    }

    fn on_replay_step(&mut self) {
        if let Some(event) = self.scheduler.step() {
            self.deliver(event);
        }
        self.publish_replay_state();
    }

    fn skip_to_results(&mut self) -> usize {
        if self.config.mode != SessionMode::Replay {
            return 0;
        }
        let batch = self.scheduler.skip_to_end();
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        self.shared.log.push_batch(batch.clone());
        for event in &batch {
            self.dispatch(event);
        }
        self.publish_cursor();
        self.publish_replay_state();
        tracing::debug!(count, "Skipped to results");
        count
    }

    fn reset_replay(&mut self) -> usize {
        if self.config.mode != SessionMode::Replay
            || (self.shared.log.is_empty() && self.scheduler.queued() == 0)
        {
            return 0;
        }

        let history = self.shared.log.take_all();
        self.handler.on_reset();
        self.scheduler.restart(history);
        self.publish_replay_state();

        let queued = self.scheduler.queued();
        tracing::debug!(queued, "Replay restarted");
        queued
    }

    fn publish_status(&self) {
        let status = self.channel.status();
        self.shared.state.send_if_modified(|s| {
            let changed = s.status != status;
            s.status = status;
            changed
        });
    }

    fn publish_cursor(&self) {
        let cursor = self.shared.log.last_delivered_id();
        self.shared.state.send_if_modified(|s| {
            let changed = s.last_delivered_id != cursor;
            s.last_delivered_id = cursor;
            changed
        });
    }

    fn publish_replay_state(&self) {
        if self.config.mode != SessionMode::Replay {
            return;
        }
        let replay_state = Some(self.scheduler.replay_state());
        self.shared.state.send_if_modified(|s| {
            let changed = s.replay_state != replay_state;
            s.replay_state = replay_state;
            changed
        });
    }

    fn teardown(&mut self) {
        self.scheduler.cancel();
        self.reconnect_at = None;
        self.channel.disconnect();
        self.publish_status();
        tracing::debug!("Session torn down");
    }
}

async fn wait_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use convo_stream_core::HandlerError;
    use convo_stream_transport::{MemoryConnector, MemoryPeer};
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::config::ReconnectPolicy;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        resets: AtomicUsize,
    }

    impl Recorder {
        fn ids(&self) -> Vec<i64> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| e.id().ordinal())
                .collect()
        }
    }

    impl EventHandler for Recorder {
        fn on_event(&self, event: &Event) -> Result<(), HandlerError> {
            self.events.lock().push(event.clone());
            Ok(())
        }

        fn on_reset(&self) {
            self.events.lock().clear();
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(id: i64) -> Value {
        json!({
            "id": id,
            "source": "agent",
            "type": "message",
            "timestamp": "2024-05-01T10:00:00Z",
            "message": format!("message {id}")
        })
    }

    fn ids(session: &Session) -> Vec<i64> {
        session
            .events()
            .iter()
            .filter_map(|e| e.id().ordinal())
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn start(
        config: SessionConfig,
    ) -> (
        Session,
        MemoryPeer,
        mpsc::UnboundedReceiver<MemoryPeer>,
        Arc<Recorder>,
    ) {
        let (connector, mut peers) = MemoryConnector::new();
        let recorder = Arc::new(Recorder::default());
        let session = Session::start(config, Arc::new(connector), recorder.clone());
        let peer = peers.recv().await.unwrap();
        peer.open();
        settle().await;
        (session, peer, peers, recorder)
    }

    fn replay_config() -> SessionConfig {
        SessionConfig::new("conv-1", "token")
            .with_mode(SessionMode::Replay)
            .shared(true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_events_in_arrival_order() {
        let (session, peer, _peers, recorder) = start(SessionConfig::new("conv-1", "token")).await;
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(peer.params().latest_event_id, -1);
        assert!(!session.is_loading_messages());

        for id in 1..=3 {
            peer.send(&frame(id));
        }
        settle().await;

        assert_eq!(ids(&session), vec![1, 2, 3]);
        assert_eq!(recorder.ids(), vec![1, 2, 3]);
        assert_eq!(session.last_delivered_id(), Some(3));
        assert_eq!(session.state().last_delivered_id, Some(3));
        assert_eq!(session.replay_state(), None);
        assert!(session.is_loading_messages());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!session.is_loading_messages());
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_never_reach_the_log() {
        let (session, peer, _peers, recorder) = start(SessionConfig::new("conv-1", "token")).await;

        peer.send(&frame(1));
        peer.send(&json!({
            "id": 2,
            "source": "agent",
            "type": "message"
        }));
        peer.send_text("{ not json");
        peer.send(&json!({ "id": 3, "source": "alien", "type": "message", "timestamp": "t" }));
        peer.send(&frame(4));
        settle().await;

        assert_eq!(ids(&session), vec![1, 4]);
        assert_eq!(recorder.ids(), vec![1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_without_duplicates() {
        let (session, peer, mut peers, _recorder) =
            start(SessionConfig::new("conv-1", "token")).await;

        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;
        peer.fail(TransportError::Timeout);
        settle().await;

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(peer.is_detached());

        let resumed = peers.recv().await.unwrap();
        assert_eq!(resumed.params().latest_event_id, 5);
        assert_eq!(resumed.params().cursor(), Some(5));

        resumed.open();
        for id in 4..=6 {
            resumed.send(&frame(id));
        }
        settle().await;

        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(ids(&session), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(session.last_delivered_id(), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_reconnect_skips_already_queued() {
        let (session, peer, mut peers, _recorder) = start(replay_config()).await;
        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;
        assert_eq!(ids(&session), vec![1]);

        peer.fail(TransportError::Timeout);
        let resumed = peers.recv().await.unwrap();
        assert_eq!(resumed.params().latest_event_id, 1);

        resumed.open();
        for id in 2..=6 {
            resumed.send(&frame(id));
        }
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(ids(&session), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(session.replay_state(), Some(ReplayState::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_handler_does_not_stop_delivery() {
        struct Flaky {
            calls: Mutex<Vec<i64>>,
        }

        impl EventHandler for Flaky {
            fn on_event(&self, event: &Event) -> Result<(), HandlerError> {
                let id = event.id().ordinal().unwrap_or_default();
                self.calls.lock().push(id);
                if id == 1 {
                    return Err(HandlerError("store unavailable".into()));
                }
                Ok(())
            }
        }

        let (connector, mut peers) = MemoryConnector::new();
        let handler = Arc::new(Flaky {
            calls: Mutex::new(Vec::new()),
        });
        let session = Session::start(
            SessionConfig::new("conv-1", "token"),
            Arc::new(connector),
            handler.clone(),
        );
        let peer = peers.recv().await.unwrap();
        peer.open();
        for id in 1..=3 {
            peer.send(&frame(id));
        }
        settle().await;

        assert_eq!(ids(&session), vec![1, 2, 3]);
        assert_eq!(*handler.calls.lock(), vec![1, 2, 3]);
        assert_eq!(session.last_delivered_id(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_burst_counts_as_loading() {
        let (session, peer, _peers, _recorder) = start(replay_config()).await;
        assert!(!session.is_loading_messages());

        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;

        assert_eq!(ids(&session), vec![1]);
        assert!(session.is_loading_messages());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!session.is_loading_messages());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_replay_stays_in_progress() {
        let (session, _peer, _peers, _recorder) = start(replay_config()).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(session.events().is_empty());
        assert_eq!(session.replay_state(), Some(ReplayState::InProgress));
        assert_eq!(session.skip_to_results().await.unwrap(), 0);
        assert_eq!(session.replay_state(), Some(ReplayState::InProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_open_channel() {
        let (connector, mut peers) = MemoryConnector::new();
        let session = Session::start(
            SessionConfig::new("conv-1", "token"),
            Arc::new(connector),
            Arc::new(convo_stream_core::NoopHandler),
        );
        let mut peer = peers.recv().await.unwrap();

        let mut action = Map::new();
        action.insert("action".into(), json!("message"));
        action.insert("args".into(), json!({ "content": "hello" }));

        assert!(matches!(
            session.send(action.clone()),
            Err(SessionError::NotConnected)
        ));

        peer.open();
        settle().await;
        assert_ok!(session.send(action.clone()));
        settle().await;

        assert_eq!(peer.try_recv(), Some(ClientMessage::user_action(action)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_is_paced() {
        let (session, peer, _peers, recorder) = start(replay_config()).await;
        assert_eq!(peer.params().mode.as_deref(), Some("shared"));
        assert_eq!(session.replay_state(), Some(ReplayState::InProgress));

        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;
        assert_eq!(ids(&session), vec![1]);
        assert_eq!(session.replay_state(), Some(ReplayState::InProgress));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ids(&session), vec![1, 2, 3]);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(ids(&session), vec![1, 2, 3, 4, 5]);
        assert_eq!(recorder.ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(session.replay_state(), Some(ReplayState::Completed));
        assert_eq!(session.last_delivered_id(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_to_results_matches_full_replay() {
        let (session, peer, _peers, recorder) = start(replay_config()).await;
        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;

        let delivered = session.skip_to_results().await.unwrap();
        assert_eq!(delivered, 4);
        assert_eq!(ids(&session), vec![1, 2, 3, 4, 5]);
        assert_eq!(recorder.ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(session.replay_state(), Some(ReplayState::Completed));
        assert_eq!(session.last_delivered_id(), Some(5));

        // Nothing left: a second skip is a no-op, and no stray timer fires.
        assert_eq!(session.skip_to_results().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ids(&session), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_replay_reproduces_sequence() {
        let (session, peer, _peers, recorder) = start(replay_config()).await;
        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;
        session.skip_to_results().await.unwrap();
        let first_run = session.events();

        let queued = session.reset_replay().await.unwrap();
        assert_eq!(queued, 5);
        assert_eq!(recorder.resets.load(Ordering::SeqCst), 1);
        assert_eq!(session.replay_state(), Some(ReplayState::InProgress));

        settle().await;
        assert_eq!(ids(&session), vec![1]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.events(), first_run);
        assert_eq!(recorder.ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(session.replay_state(), Some(ReplayState::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_controls_are_noops_in_live_mode() {
        let (session, peer, _peers, _recorder) = start(SessionConfig::new("conv-1", "token")).await;
        peer.send(&frame(1));
        settle().await;

        assert_eq!(session.skip_to_results().await.unwrap(), 0);
        assert_eq!(session.reset_replay().await.unwrap(), 0);
        assert_eq!(ids(&session), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_error_notice_with_redirect() {
        let (session, peer, _peers, _recorder) = start(replay_config()).await;
        let mut notices = session.subscribe_notices();

        peer.send(&json!({ "error": true, "message": "Conversation not found" }));
        peer.send(&json!({
            "status_update": true,
            "type": "info",
            "id": "STATUS$READY",
            "message": "Ready"
        }));
        settle().await;

        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Error {
                error: DomainError::ConversationNotFound,
                redirect_after: Some(crate::config::DEFAULT_REDIRECT_DELAY),
            }
        );
        assert!(matches!(notices.try_recv().unwrap(), Notice::Status(n) if n.id == "STATUS$READY"));
        assert_eq!(session.state().error, Some(DomainError::ConversationNotFound));
        assert!(session.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_close_stops_reconnecting() {
        let (session, peer, mut peers, _recorder) =
            start(SessionConfig::new("conv-1", "token")).await;
        let mut notices = session.subscribe_notices();

        peer.close(Some("Conversation not published"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(peers.try_recv().is_err());
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Error {
                error: DomainError::ConversationNotPublished,
                redirect_after: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_is_final_until_reconnect() {
        let (session, peer, mut peers, _recorder) =
            start(SessionConfig::new("conv-1", "token")).await;
        peer.send(&frame(1));
        settle().await;

        session.disconnect();
        session.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(peer.is_detached());
        assert!(peers.try_recv().is_err());

        session.reconnect();
        let resumed = peers.recv().await.unwrap();
        assert_eq!(resumed.params().latest_event_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_policy() {
        let config = SessionConfig::new("conv-1", "token").with_reconnect(ReconnectPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
        });
        let (_session, peer, mut peers, _recorder) = start(config).await;

        peer.fail(TransportError::Socket("reset".into()));
        let retry = peers.recv().await.unwrap();
        retry.fail(TransportError::Timeout);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_replay() {
        let (session, peer, _peers, recorder) = start(replay_config()).await;
        for id in 1..=5 {
            peer.send(&frame(id));
        }
        settle().await;
        assert_eq!(recorder.ids(), vec![1]);

        session.close().await;
        assert!(peer.is_detached());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.ids(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_history_then_live() {
        use futures::StreamExt;

        let (session, peer, _peers, _recorder) = start(SessionConfig::new("conv-1", "token")).await;
        peer.send(&frame(1));
        settle().await;

        let mut updates = session.subscribe();
        peer.send(&frame(2));
        settle().await;

        let first = updates.next().await.unwrap();
        let second = updates.next().await.unwrap();
        assert!(matches!(first, LogUpdate::Appended(e) if e.id().ordinal() == Some(1)));
        assert!(matches!(second, LogUpdate::Appended(e) if e.id().ordinal() == Some(2)));
    }
}
