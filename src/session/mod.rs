mod state;

pub use self::state::{Mode, MotionStatus, SessionEvent, SessionState};

use crate::{
    blinds::{BlindsApi, CommandKind},
    configuration::PollingConfig,
    scheduler::{start_polling, PollHandle, DEFAULT_POLL_PERIOD},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::*;

/// Optimistic time for the blind to finish moving. Nothing on the service
/// side confirms it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub poll_period: Duration,
    pub settle_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_period: DEFAULT_POLL_PERIOD,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl From<&PollingConfig> for SessionOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_period: config.period(),
            settle_delay: config.settle_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The service accepted the command
    Sent,
    /// Refused locally, nothing was sent. Either the mode does not allow the
    /// command or the session is stopped
    Rejected,
    /// The service or the transport failed
    Failed,
}

struct Shared {
    api: Arc<dyn BlindsApi>,
    state: watch::Sender<SessionState>,
    settle_delay: Duration,
    settle_timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Shared {
    fn apply(&self, event: SessionEvent) {
        if self.closed.load(Ordering::Acquire) {
            trace!("Session closed, dropping {:?}", event);
            return;
        }
        self.state.send_if_modified(|state| state.apply(event));
    }

    async fn poll(&self) {
        match self.api.fetch_telemetry().await {
            Ok(records) => {
                debug!("Poll returned {} records", records.len());
                self.apply(SessionEvent::PollSucceeded(records));
            }
            Err(e) => {
                error!("Failed to fetch telemetry {}", e);
                self.apply(SessionEvent::PollFailed);
            }
        }
    }

    fn schedule_settle(self: &Arc<Self>, command: CommandKind) {
        let shared: Weak<Self> = Arc::downgrade(self);
        let delay = self.settle_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.apply(SessionEvent::SettleTimerFired(command));
            }
        });
        let previous = self
            .settle_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_settle(&self) {
        let pending = self
            .settle_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
    }
}

/// Mode, motion, message and telemetry of one running client.
///
/// Polling starts with the session and stops when it is stopped or dropped.
/// Telemetry polls and commands run independently and never wait on each
/// other; each event is applied to the state in one step.
pub struct ControlSession {
    shared: Arc<Shared>,
    poller: PollHandle,
}

impl ControlSession {
    pub fn start(api: Arc<dyn BlindsApi>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let shared = Arc::new(Shared {
            api,
            state,
            settle_delay: options.settle_delay,
            settle_timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let poller = start_polling(
            {
                let shared = shared.clone();
                move || {
                    let shared = shared.clone();
                    async move { shared.poll().await }
                }
            },
            options.poll_period,
        );
        info!(
            "Control session started, polling every {:?}",
            options.poll_period
        );
        Self { shared, poller }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Poll now without touching the timer's phase.
    pub async fn refresh(&self) {
        if self.is_stopped() {
            debug!("Session stopped, skipping refresh");
            return;
        }
        self.shared.poll().await
    }

    pub async fn open(&self) -> CommandOutcome {
        self.command(CommandKind::Open).await
    }

    pub async fn close(&self) -> CommandOutcome {
        self.command(CommandKind::Close).await
    }

    pub async fn toggle_mode(&self) -> CommandOutcome {
        let target = self.shared.state.borrow().mode.toggled();
        self.command(target.command()).await
    }

    #[instrument(skip(self))]
    pub async fn command(&self, command: CommandKind) -> CommandOutcome {
        if self.is_stopped() {
            warn!("Session stopped, not sending {}", command);
            return CommandOutcome::Rejected;
        }
        let accepted = self.shared.state.borrow().accepts(command);
        if !accepted {
            warn!("Ignoring {} while in auto mode", command);
            return CommandOutcome::Rejected;
        }

        self.shared.apply(SessionEvent::CommandStarted(command));
        match self.shared.api.send_command(command).await {
            Ok(_) => {
                self.shared.apply(SessionEvent::CommandSucceeded(command));
                if matches!(command, CommandKind::Open | CommandKind::Close) {
                    self.shared.schedule_settle(command);
                }
                CommandOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send {} command {}", command, e);
                self.shared.apply(SessionEvent::CommandFailed {
                    command,
                    cause: e.to_string(),
                });
                CommandOutcome::Failed
            }
        }
    }

    /// Cancel polling and pending settle timers. Later results are discarded.
    pub fn stop(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!("Stopping control session");
        }
        self.poller.cancel();
        self.shared.cancel_settle();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blinds::{Ack, TelemetryRecord},
        error::{CommandError, FetchError},
    };
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct FakeBlindsService {
        fetches: AtomicUsize,
        fail_fetches: AtomicBool,
        fail_commands: AtomicBool,
        command_latency: Duration,
        fetch_latency: Duration,
        commands: Mutex<Vec<CommandKind>>,
    }

    impl FakeBlindsService {
        fn with_latency(command_latency: Duration) -> Self {
            Self {
                command_latency,
                ..Default::default()
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn commands(&self) -> Vec<CommandKind> {
            self.commands.lock().unwrap().clone()
        }
    }

    // every poll returns a single record tagged with the poll number
    fn record(poll: usize) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            status: format!("poll {}", poll),
            humidity: 50.0,
            light_level: poll as f64,
        }
    }

    #[async_trait]
    impl BlindsApi for FakeBlindsService {
        async fn fetch_telemetry(&self) -> Result<Vec<TelemetryRecord>, FetchError> {
            let poll = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.fetch_latency.is_zero() {
                sleep(self.fetch_latency).await;
            }
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(FetchError::Status(StatusCode::BAD_GATEWAY));
            }
            Ok(vec![record(poll)])
        }

        async fn send_command(&self, command: CommandKind) -> Result<Ack, CommandError> {
            self.commands.lock().unwrap().push(command);
            if !self.command_latency.is_zero() {
                sleep(self.command_latency).await;
            }
            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(CommandError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            Ok(Ack {
                status: StatusCode::OK,
                body: String::new(),
            })
        }
    }

    fn start(service: &Arc<FakeBlindsService>) -> ControlSession {
        ControlSession::start(
            service.clone(),
            SessionOptions {
                poll_period: PERIOD,
                settle_delay: DEFAULT_SETTLE_DELAY,
            },
        )
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_happens_on_start() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        let initial = session.state();
        assert_eq!(initial.mode, Mode::Auto);
        assert_eq!(initial.motion, MotionStatus::Idle);

        settle().await;

        let state = session.state();
        assert_eq!(service.fetches(), 1);
        assert_eq!(state.telemetry, vec![record(1)]);
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_follows_latest_successful_poll() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        let mut updates = session.subscribe();

        sleep(PERIOD * 2).await;
        settle().await;
        assert_eq!(service.fetches(), 3);
        assert_eq!(session.state().telemetry, vec![record(3)]);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().telemetry, vec![record(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_stale_telemetry() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;
        let before = session.state();

        service.fail_fetches.store(true, Ordering::SeqCst);
        sleep(PERIOD).await;

        assert_eq!(service.fetches(), 2);
        assert_eq!(session.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_poll_clears_loading() {
        let service = Arc::new(FakeBlindsService::default());
        service.fail_fetches.store(true, Ordering::SeqCst);
        let session = start(&service);
        settle().await;

        let state = session.state();
        assert!(!state.loading);
        assert!(state.telemetry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_in_auto_mode_is_refused_locally() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;

        assert_eq!(session.open().await, CommandOutcome::Rejected);
        assert_eq!(session.close().await, CommandOutcome::Rejected);

        let state = session.state();
        assert!(service.commands().is_empty());
        assert_eq!(state.motion, MotionStatus::Idle);
        assert!(state.message.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_then_close_settles_after_delay() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);

        assert_eq!(session.toggle_mode().await, CommandOutcome::Sent);
        let state = session.state();
        assert_eq!((state.mode, state.motion), (Mode::Manual, MotionStatus::Idle));
        assert_eq!(state.message, "System switched to manual mode");

        assert_eq!(session.close().await, CommandOutcome::Sent);
        let state = session.state();
        assert_eq!(state.motion, MotionStatus::Closing);
        assert_eq!(state.message, "closing");

        sleep(Duration::from_millis(2_999)).await;
        assert_eq!(session.state().motion, MotionStatus::Closing);

        sleep(Duration::from_millis(2)).await;
        let state = session.state();
        assert_eq!(state.motion, MotionStatus::Closed);
        assert_eq!(state.message, "closed");
        assert_eq!(
            service.commands(),
            vec![CommandKind::Manual, CommandKind::Close]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_open_goes_through_opening() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;
        let mut updates = session.subscribe();

        session.command(CommandKind::Manual).await;
        session.open().await;
        assert_eq!(updates.borrow_and_update().motion, MotionStatus::Opening);

        updates.changed().await.unwrap();
        let state = updates.borrow_and_update().clone();
        assert_eq!(state.motion, MotionStatus::Opened);
        assert_eq!(state.message, "opened");
        assert_eq!(state.mode, Mode::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_message_shows_while_sending() {
        let service = Arc::new(FakeBlindsService::with_latency(Duration::from_secs(2)));
        let session = Arc::new(start(&service));

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.toggle_mode().await }
        });
        settle().await;
        assert_eq!(session.state().message, "Sending manual command...");
        assert_eq!(session.state().mode, Mode::Auto);

        assert_eq!(pending.await.unwrap(), CommandOutcome::Sent);
        assert_eq!(session.state().mode, Mode::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_changes_only_the_message() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        session.toggle_mode().await;
        session.close().await;
        sleep(DEFAULT_SETTLE_DELAY * 2).await;
        let before = session.state();
        assert_eq!(before.motion, MotionStatus::Closed);

        service.fail_commands.store(true, Ordering::SeqCst);
        assert_eq!(session.open().await, CommandOutcome::Failed);
        assert_eq!(session.toggle_mode().await, CommandOutcome::Failed);

        let after = session.state();
        assert_eq!(after.mode, Mode::Manual);
        assert_eq!(after.motion, MotionStatus::Closed);
        assert!(after.message.starts_with("Error: "));
        assert!(after.message.contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_motion_command_supersedes_pending_settle() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        session.toggle_mode().await;

        session.open().await;
        sleep(Duration::from_secs(1)).await;
        session.close().await;

        // the open settle would have landed here
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(session.state().motion, MotionStatus::Closing);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(session.state().motion, MotionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_polls_out_of_band_without_shifting_ticks() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;

        sleep(Duration::from_secs(10)).await;
        session.refresh().await;
        assert_eq!(service.fetches(), 2);
        assert_eq!(session.state().telemetry, vec![record(2)]);

        // next scheduled tick is still at 30s after start
        sleep(Duration::from_millis(20_000)).await;
        assert_eq!(service.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_polling_and_settling() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;
        session.toggle_mode().await;
        session.open().await;

        session.stop();
        session.stop();
        assert!(session.is_stopped());
        sleep(PERIOD * 5).await;

        assert_eq!(service.fetches(), 1);
        assert_eq!(session.state().motion, MotionStatus::Opening);
    }

    #[tokio::test(start_paused = true)]
    async fn command_after_stop_sends_nothing() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        settle().await;
        session.toggle_mode().await;
        let before = session.state();

        session.stop();
        assert_eq!(session.open().await, CommandOutcome::Rejected);
        assert_eq!(session.toggle_mode().await, CommandOutcome::Rejected);
        session.refresh().await;

        assert_eq!(service.commands(), vec![CommandKind::Manual]);
        assert_eq!(service.fetches(), 1);
        assert_eq!(session.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_lands_while_command_is_in_flight() {
        let service = Arc::new(FakeBlindsService::with_latency(Duration::from_secs(10)));
        let session = Arc::new(start(&service));
        settle().await;

        sleep(Duration::from_secs(25)).await;
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.toggle_mode().await }
        });

        // the 30s tick completes while the command is still waiting
        sleep(Duration::from_secs(6)).await;
        let state = session.state();
        assert_eq!(service.fetches(), 2);
        assert_eq!(state.telemetry, vec![record(2)]);
        assert_eq!(state.mode, Mode::Auto);
        assert_eq!(state.motion, MotionStatus::Idle);
        assert_eq!(state.message, "Sending manual command...");

        assert_eq!(pending.await.unwrap(), CommandOutcome::Sent);
        let state = session.state();
        assert_eq!(state.mode, Mode::Manual);
        assert_eq!(state.message, "System switched to manual mode");
        assert_eq!(state.telemetry, vec![record(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn command_finishes_while_poll_is_in_flight() {
        let service = Arc::new(FakeBlindsService {
            fetch_latency: Duration::from_secs(5),
            ..Default::default()
        });
        let session = start(&service);
        session.toggle_mode().await;

        // first poll started at zero and is still waiting
        assert!(session.state().loading);
        assert_eq!(session.close().await, CommandOutcome::Sent);

        sleep(Duration::from_secs(6)).await;
        let state = session.state();
        assert!(!state.loading);
        assert_eq!(state.telemetry, vec![record(1)]);
        assert_eq!(state.mode, Mode::Manual);
        assert_eq!(state.motion, MotionStatus::Closed);
        assert_eq!(state.message, "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn late_open_after_switch_to_auto_does_not_move() {
        let service = Arc::new(FakeBlindsService::with_latency(Duration::from_secs(1)));
        let session = Arc::new(start(&service));
        session.toggle_mode().await;

        let to_auto = tokio::spawn({
            let session = session.clone();
            async move { session.command(CommandKind::Auto).await }
        });
        sleep(Duration::from_millis(500)).await;
        let open = tokio::spawn({
            let session = session.clone();
            async move { session.open().await }
        });

        assert_eq!(to_auto.await.unwrap(), CommandOutcome::Sent);
        assert_eq!(open.await.unwrap(), CommandOutcome::Sent);
        sleep(DEFAULT_SETTLE_DELAY * 2).await;

        let state = session.state();
        assert_eq!(state.mode, Mode::Auto);
        assert_eq!(state.motion, MotionStatus::Idle);
        assert_eq!(state.message, "System switched to auto mode");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_session_stops_polling() {
        let service = Arc::new(FakeBlindsService::default());
        let session = start(&service);
        let updates = session.subscribe();
        settle().await;

        drop(session);
        sleep(PERIOD * 4).await;

        assert_eq!(service.fetches(), 1);
        assert!(updates.has_changed().is_err());
    }
}
