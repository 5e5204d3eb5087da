//! Shared application state: the session aggregate behind its mutex, the
//! connection registry, the collaborator engines, and the timed tasks that
//! drive automatic phase transitions.

pub mod registry;
pub mod session;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
// tokio's Instant so the countdown follows the (pausable) runtime clock
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::config::AppConfig;
use crate::dto::snapshot::SessionSnapshot;
use crate::engine::{Paraphraser, SpeechToText};

use registry::ConnectionRegistry;
use session::{Language, Phase, SessionEvent, SessionState};

/// Cheap-to-clone handle to the application state.
pub type SharedState = Arc<AppState>;

/// Interval between round countdown ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Slot holding the session's single pending timed task (round countdown,
/// reveal timeout, or reset settle — never more than one at a time).
///
/// Cancellation is idempotent: aborting a finished or already-cancelled
/// task is a no-op. A task clears the slot itself immediately before
/// driving its own natural transition, so that transition never aborts the
/// task that caused it.
#[derive(Default)]
pub struct TimerSlot {
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    /// Track a newly spawned task, aborting any task still in the slot.
    fn store(&self, handle: JoinHandle<()>) {
        let mut slot = self.handle.lock().expect("timer slot poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Abort and forget the tracked task, if any.
    pub fn cancel(&self) {
        let mut slot = self.handle.lock().expect("timer slot poisoned");
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Forget the tracked task without aborting it. Called by the task
    /// itself on its natural completion path.
    fn clear(&self) {
        let mut slot = self.handle.lock().expect("timer slot poisoned");
        slot.take();
    }

    /// Whether a timed task is currently tracked.
    pub fn is_armed(&self) -> bool {
        self.handle.lock().expect("timer slot poisoned").is_some()
    }
}

/// Central application state shared across connections and tasks.
pub struct AppState {
    config: Arc<AppConfig>,
    session: Mutex<SessionState>,
    registry: ConnectionRegistry,
    transcriber: Arc<dyn SpeechToText>,
    paraphraser: Arc<dyn Paraphraser>,
    pipeline_gate: Mutex<()>,
    timer: TimerSlot,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl AppState {
    /// Build the shared state and the receiving end of its event stream.
    ///
    /// The caller (the session host, or a test) consumes the returned
    /// receiver; the state machine itself never touches a connection.
    pub fn new(
        config: Arc<AppConfig>,
        transcriber: Arc<dyn SpeechToText>,
        paraphraser: Arc<dyn Paraphraser>,
    ) -> (SharedState, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let pool = config.prompt_pool(config.default_language);
        let session = SessionState::new(config.default_language, pool, config.round_duration);
        let state = Arc::new(Self {
            config,
            session: Mutex::new(session),
            registry: ConnectionRegistry::new(),
            transcriber,
            paraphraser,
            pipeline_gate: Mutex::new(()),
            timer: TimerSlot::default(),
            events,
        });
        (state, events_rx)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Role-keyed connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Speech-to-text collaborator.
    pub fn transcriber(&self) -> &Arc<dyn SpeechToText> {
        &self.transcriber
    }

    /// Paraphrasing collaborator.
    pub fn paraphraser(&self) -> &Arc<dyn Paraphraser> {
        &self.paraphraser
    }

    /// Mutex serializing the whole turn pipeline body across both players.
    pub fn pipeline_gate(&self) -> &Mutex<()> {
        &self.pipeline_gate
    }

    /// Slot tracking the session's pending timed task.
    pub fn timer(&self) -> &TimerSlot {
        &self.timer
    }

    /// Run a closure against the locked session aggregate.
    pub async fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self.session.lock().await;
        f(&mut guard)
    }

    /// Run a transition against the locked aggregate and publish its event
    /// (if any) before the lock is released, preserving emission order.
    async fn transition(
        &self,
        f: impl FnOnce(&mut SessionState) -> Option<SessionEvent>,
    ) -> Option<SessionEvent> {
        let mut guard = self.session.lock().await;
        let event = f(&mut guard);
        if let Some(event) = &event {
            let _ = self.events.send(event.clone());
        }
        event
    }

    /// Full-state snapshot for a newly connected client.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.session.lock().await;
        SessionSnapshot::from(&*guard)
    }

    /// Mark a player ready; entering the conversation happens later via
    /// prompt confirmation.
    pub async fn player_ready(self: &Arc<Self>, player: u8) {
        self.transition(|s| s.player_ready(player)).await;
    }

    /// Control-panel fallback: ready both players while idle.
    pub async fn start_game(self: &Arc<Self>) {
        if self.with_session(|s| s.phase()).await != Phase::Idle {
            return;
        }
        self.player_ready(1).await;
        self.player_ready(2).await;
    }

    /// Show the next topic during prompt selection.
    pub async fn reroll_prompt(self: &Arc<Self>) {
        self.transition(|s| s.reroll_prompt()).await;
    }

    /// Step back to the previously shown topic.
    pub async fn prev_prompt(self: &Arc<Self>) {
        self.transition(|s| s.prev_prompt()).await;
    }

    /// Directional prompt navigation from the key relay.
    pub async fn navigate_prompt(self: &Arc<Self>, direction: i32) {
        self.transition(|s| s.navigate_prompt(direction)).await;
    }

    /// Confirm the highlighted topic and start the round timer.
    pub async fn confirm_prompt(self: &Arc<Self>) {
        let event = self.transition(|s| s.confirm_prompt()).await;
        self.arm_round_timer_if_started(event);
    }

    /// Confirm a topic by on-screen index and start the round timer.
    pub async fn set_prompt_index(self: &Arc<Self>, index: usize) {
        let event = self.transition(|s| s.set_prompt_index(index)).await;
        self.arm_round_timer_if_started(event);
    }

    fn arm_round_timer_if_started(self: &Arc<Self>, event: Option<SessionEvent>) {
        if matches!(
            event,
            Some(SessionEvent::PhaseChanged {
                phase: Phase::Conversation,
                ..
            })
        ) {
            let state = Arc::clone(self);
            let duration = self.config.round_duration;
            self.timer
                .store(tokio::spawn(run_round_timer(state, duration)));
        }
    }

    /// End the round now, whether forced or by the countdown reaching zero.
    /// Ignored outside the conversation phase.
    pub async fn force_reveal(self: &Arc<Self>) {
        let event = self.transition(|s| s.enter_reveal()).await;
        if event.is_some() {
            // Cancel a still-running countdown (no-op on the natural path,
            // where the timer task already cleared its own handle).
            self.timer.cancel();
            let state = Arc::clone(self);
            let hold = self.config.reveal_hold;
            self.timer
                .store(tokio::spawn(run_reveal_timeout(state, hold)));
        }
    }

    /// Explicit reset: cancel any timed task, enter the reset pause, and
    /// settle back to idle after it.
    pub async fn reset(self: &Arc<Self>) {
        self.timer.cancel();
        self.transition(|s| Some(s.begin_reset())).await;
        self.arm_reset_settle();
    }

    /// Reveal-timeout path: reset only if the session is still revealing.
    async fn reset_from_reveal(self: &Arc<Self>) {
        let event = self
            .transition(|s| (s.phase() == Phase::Reveal).then(|| s.begin_reset()))
            .await;
        if event.is_some() {
            self.arm_reset_settle();
        }
    }

    fn arm_reset_settle(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let settle = self.config.reset_settle;
        self.timer
            .store(tokio::spawn(run_reset_settle(state, settle)));
    }

    /// Switch the active language, reloading the prompt pool.
    pub async fn set_language(self: &Arc<Self>, language: Language) {
        if self.with_session(|s| s.language()).await == language {
            return;
        }
        let pool = self.config.prompt_pool(language);
        let event = self.transition(|s| s.set_language(language, pool)).await;
        if event.is_some() {
            info!(language = language.code(), "language changed");
        }
    }
}

/// Round countdown: recompute remaining time from the captured start
/// instant so scheduling jitter never drifts or goes negative, tick at
/// ~1 Hz, and reveal when the countdown reaches zero.
async fn run_round_timer(state: SharedState, duration: Duration) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first interval tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let remaining = duration.saturating_sub(started.elapsed());
        state
            .transition(|s| s.tick(remaining.as_secs_f64()))
            .await;
        if remaining.is_zero() {
            break;
        }
    }
    // Clear our own handle first so the reveal transition does not try to
    // cancel the very task that is driving it.
    state.timer.clear();
    state.force_reveal().await;
}

/// Hold the reveal screen, then reset automatically.
async fn run_reveal_timeout(state: SharedState, hold: Duration) {
    tokio::time::sleep(hold).await;
    state.timer.clear();
    state.reset_from_reveal().await;
}

/// Let the "thanks for playing" screen sit for a moment before idling.
async fn run_reset_settle(state: SharedState, settle: Duration) {
    tokio::time::sleep(settle).await;
    state.timer.clear();
    state.transition(|s| s.finish_reset()).await;
}
