//! The session aggregate: phases, prompt selection, the turn log, and the
//! events emitted when any of them change.
//!
//! This type is deliberately free of transport and timer concerns so a full
//! round can be driven in a plain unit test. Transition methods mutate the
//! aggregate and return the event to broadcast, or `None` when the request
//! is not valid in the current phase (client-side races, not errors).

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Spoken and display language of the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Japanese.
    Ja,
    /// English.
    En,
}

impl Language {
    /// Character-dense scripts are measured in characters rather than words
    /// by the fragment filters.
    pub fn is_char_dense(self) -> bool {
        matches!(self, Language::Ja)
    }

    /// Two-letter code handed to the transcription collaborator.
    pub fn code(self) -> &'static str {
        match self {
            Language::Ja => "ja",
            Language::En => "en",
        }
    }
}

/// Discrete stage of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Start screen, nobody ready.
    Idle,
    /// One player ready, waiting for the other.
    Waiting,
    /// The starting player browses topics.
    PromptSelect,
    /// The timed misheard conversation.
    Conversation,
    /// Earmuffs off, both sides compare notes.
    Reveal,
    /// Cleanup pause before returning to idle.
    #[serde(rename = "reset")]
    Resetting,
}

/// Conversation topic drawn from the language-specific pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Stable id within the pool, used to avoid repeats.
    pub id: u32,
    /// Short topic label.
    pub topic: String,
    /// Full prompt text shown to the players.
    pub text: String,
}

/// One player's utterance and the altered line shown to the listener.
///
/// Created once per successfully processed audio chunk, never mutated,
/// cleared wholesale on reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    /// Speaking player, 1 or 2.
    pub player: u8,
    /// What the speaker actually said.
    pub original: String,
    /// What the listener is told they said.
    pub misheard: String,
    /// Unix timestamp in seconds.
    #[serde(rename = "ts")]
    pub timestamp: f64,
}

/// Phase-specific payload attached to a phase-change event.
///
/// Serialized flattened into the outbound `phase` message, with the key
/// names the screens already expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhasePayload {
    /// No extra data (idle / resetting).
    Empty {},
    /// Which players have pressed ready so far.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Sorted list of ready player numbers.
        players_ready: Vec<u8>,
    },
    /// The currently browsed topic during prompt selection.
    #[serde(rename_all = "camelCase")]
    PromptChoice {
        /// Candidate prompts shown on screen.
        choices: Vec<Prompt>,
        /// Index of the highlighted candidate.
        highlight_index: usize,
        /// Player who picks the topic and speaks first.
        starting_player: u8,
    },
    /// The round has started.
    #[serde(rename_all = "camelCase")]
    Conversation {
        /// Confirmed topic for this round.
        prompt: Prompt,
        /// Round length in seconds.
        duration: u64,
        /// Player who speaks first.
        starting_player: u8,
    },
    /// The round is over; both sides see everything.
    #[serde(rename_all = "camelCase")]
    Reveal {
        /// Topic the round was played on.
        prompt: Option<Prompt>,
        /// Full turn log in submission order.
        turns: Vec<Turn>,
    },
}

/// Event emitted by the aggregate for the host to fan out.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new phase.
    PhaseChanged {
        /// Phase just entered.
        phase: Phase,
        /// Payload for the screens.
        payload: PhasePayload,
    },
    /// Round countdown tick, roughly 1 Hz.
    TimerTick {
        /// Remaining seconds, rounded to one decimal.
        remaining: f64,
    },
    /// The active language changed and the prompt pool was reloaded.
    LanguageChanged {
        /// New active language.
        language: Language,
    },
}

/// Prompts shown during selection, in order, with a replay cursor.
///
/// Moving forward past the end samples a fresh prompt; moving backward only
/// replays history.
#[derive(Debug, Default)]
struct PromptHistory {
    shown: Vec<Prompt>,
    cursor: usize,
}

impl PromptHistory {
    fn clear(&mut self) {
        self.shown.clear();
        self.cursor = 0;
    }

    fn current(&self) -> Option<&Prompt> {
        self.shown.get(self.cursor)
    }

    fn push(&mut self, prompt: Prompt) {
        self.shown.push(prompt);
        self.cursor = self.shown.len() - 1;
    }

    /// Advance the cursor within history; false when already at the end.
    fn forward(&mut self) -> bool {
        if self.cursor + 1 < self.shown.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn back(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }
}

/// Single source of truth for one running session.
///
/// Exclusively owned and mutated through [`crate::state::AppState`]; every
/// other component only reads snapshots or consumes emitted events.
pub struct SessionState {
    phase: Phase,
    language: Language,
    prompt_pool: Vec<Prompt>,
    used_prompt_ids: HashSet<u32>,
    history: PromptHistory,
    selected_prompt: Option<Prompt>,
    highlight_index: usize,
    starting_player: u8,
    turns: Vec<Turn>,
    players_ready: HashSet<u8>,
    round_duration: Duration,
    round_remaining: f64,
}

impl SessionState {
    /// Build a fresh idle session with the given prompt pool.
    pub fn new(language: Language, prompt_pool: Vec<Prompt>, round_duration: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            language,
            prompt_pool,
            used_prompt_ids: HashSet::new(),
            history: PromptHistory::default(),
            selected_prompt: None,
            highlight_index: 0,
            starting_player: pick_starting_player(),
            turns: Vec::new(),
            players_ready: HashSet::new(),
            round_remaining: round_duration.as_secs_f64(),
            round_duration,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Active language.
    pub fn language(&self) -> Language {
        self.language
    }

    /// Topic confirmed for the current round, if any.
    pub fn selected_prompt(&self) -> Option<&Prompt> {
        self.selected_prompt.as_ref()
    }

    /// Topic label of the selected prompt, for the paraphraser.
    pub fn selected_topic(&self) -> Option<String> {
        self.selected_prompt.as_ref().map(|p| p.topic.clone())
    }

    /// Prompt candidates currently on screen (one entry while browsing).
    pub fn current_choices(&self) -> Vec<Prompt> {
        self.history.current().cloned().into_iter().collect()
    }

    /// Index of the highlighted prompt candidate.
    pub fn highlight_index(&self) -> usize {
        self.highlight_index
    }

    /// Player who picks the topic and speaks first this round.
    pub fn starting_player(&self) -> u8 {
        self.starting_player
    }

    /// Turn log in submission order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Remaining round time in seconds, rounded to one decimal.
    pub fn round_remaining(&self) -> f64 {
        round_tenths(self.round_remaining)
    }

    /// Sorted list of players that have pressed ready.
    pub fn ready_players(&self) -> Vec<u8> {
        let mut players: Vec<u8> = self.players_ready.iter().copied().collect();
        players.sort_unstable();
        players
    }

    /// Mark a player ready. First player moves the session to waiting, the
    /// second into prompt selection. Duplicate signals are idempotent.
    pub fn player_ready(&mut self, player: u8) -> Option<SessionEvent> {
        if !matches!(self.phase, Phase::Idle | Phase::Waiting) {
            return None;
        }
        if !self.players_ready.insert(player) && self.phase == Phase::Waiting {
            return None;
        }

        if self.players_ready.len() >= 2 {
            self.enter_prompt_select()
        } else {
            self.phase = Phase::Waiting;
            Some(SessionEvent::PhaseChanged {
                phase: Phase::Waiting,
                payload: PhasePayload::Ready {
                    players_ready: self.ready_players(),
                },
            })
        }
    }

    /// Sample one prompt, avoiding ids already used this epoch. When every
    /// prompt has been used the epoch resets and the full pool is eligible
    /// again.
    fn pick_unused_prompt(&mut self) -> Option<Prompt> {
        if self.prompt_pool.is_empty() {
            warn!(language = self.language.code(), "prompt pool is empty");
            return None;
        }
        let available: Vec<&Prompt> = self
            .prompt_pool
            .iter()
            .filter(|p| !self.used_prompt_ids.contains(&p.id))
            .collect();
        let choice = if available.is_empty() {
            self.used_prompt_ids.clear();
            self.prompt_pool.choose(&mut rand::rng())
        } else {
            available.choose(&mut rand::rng()).copied()
        };
        let prompt = choice.cloned()?;
        self.used_prompt_ids.insert(prompt.id);
        Some(prompt)
    }

    fn enter_prompt_select(&mut self) -> Option<SessionEvent> {
        self.history.clear();
        let prompt = self.pick_unused_prompt()?;
        self.history.push(prompt);
        self.highlight_index = 0;
        self.phase = Phase::PromptSelect;
        Some(self.prompt_choice_event())
    }

    fn prompt_choice_event(&self) -> SessionEvent {
        SessionEvent::PhaseChanged {
            phase: Phase::PromptSelect,
            payload: PhasePayload::PromptChoice {
                choices: self.current_choices(),
                highlight_index: self.highlight_index,
                starting_player: self.starting_player,
            },
        }
    }

    /// Show the next topic: replay forward through history if the cursor is
    /// behind, otherwise sample a fresh prompt and append it.
    pub fn reroll_prompt(&mut self) -> Option<SessionEvent> {
        if self.phase != Phase::PromptSelect {
            return None;
        }
        if !self.history.forward() {
            let prompt = self.pick_unused_prompt()?;
            self.history.push(prompt);
        }
        self.highlight_index = 0;
        Some(self.prompt_choice_event())
    }

    /// Step back to the previously shown topic. Never resamples.
    pub fn prev_prompt(&mut self) -> Option<SessionEvent> {
        if self.phase != Phase::PromptSelect {
            return None;
        }
        self.history.back();
        self.highlight_index = 0;
        Some(self.prompt_choice_event())
    }

    /// Directional navigation used by the key relay screens.
    pub fn navigate_prompt(&mut self, direction: i32) -> Option<SessionEvent> {
        if direction >= 0 {
            self.reroll_prompt()
        } else {
            self.prev_prompt()
        }
    }

    /// Confirm the highlighted topic and start the round.
    pub fn confirm_prompt(&mut self) -> Option<SessionEvent> {
        if self.phase != Phase::PromptSelect {
            return None;
        }
        self.selected_prompt = self.history.current().cloned();
        self.enter_conversation()
    }

    /// Confirm a topic by on-screen index (pointer clicks).
    pub fn set_prompt_index(&mut self, index: usize) -> Option<SessionEvent> {
        if self.phase != Phase::PromptSelect {
            return None;
        }
        let choices = self.current_choices();
        if index >= choices.len() {
            return None;
        }
        self.highlight_index = index;
        self.selected_prompt = choices.into_iter().nth(index);
        self.enter_conversation()
    }

    fn enter_conversation(&mut self) -> Option<SessionEvent> {
        let prompt = self.selected_prompt.clone()?;
        self.phase = Phase::Conversation;
        self.turns.clear();
        self.round_remaining = self.round_duration.as_secs_f64();
        Some(SessionEvent::PhaseChanged {
            phase: Phase::Conversation,
            payload: PhasePayload::Conversation {
                prompt,
                duration: self.round_duration.as_secs(),
                starting_player: self.starting_player,
            },
        })
    }

    /// Record a countdown tick. Ignored outside the conversation phase so a
    /// late tick from a cancelled timer cannot surface.
    pub fn tick(&mut self, remaining: f64) -> Option<SessionEvent> {
        if self.phase != Phase::Conversation {
            return None;
        }
        self.round_remaining = remaining;
        Some(SessionEvent::TimerTick {
            remaining: round_tenths(remaining),
        })
    }

    /// End the round, exposing the full turn log to everyone.
    pub fn enter_reveal(&mut self) -> Option<SessionEvent> {
        if self.phase != Phase::Conversation {
            return None;
        }
        self.phase = Phase::Reveal;
        Some(SessionEvent::PhaseChanged {
            phase: Phase::Reveal,
            payload: PhasePayload::Reveal {
                prompt: self.selected_prompt.clone(),
                turns: self.turns.clone(),
            },
        })
    }

    /// Enter the reset pause and re-randomize the starting player for the
    /// next round. Valid from any phase.
    pub fn begin_reset(&mut self) -> SessionEvent {
        self.starting_player = pick_starting_player();
        self.phase = Phase::Resetting;
        SessionEvent::PhaseChanged {
            phase: Phase::Resetting,
            payload: PhasePayload::Empty {},
        }
    }

    /// Complete the reset: clear all round state and return to idle.
    pub fn finish_reset(&mut self) -> Option<SessionEvent> {
        if self.phase != Phase::Resetting {
            return None;
        }
        self.turns.clear();
        self.selected_prompt = None;
        self.history.clear();
        self.highlight_index = 0;
        self.players_ready.clear();
        self.round_remaining = self.round_duration.as_secs_f64();
        self.phase = Phase::Idle;
        Some(SessionEvent::PhaseChanged {
            phase: Phase::Idle,
            payload: PhasePayload::Empty {},
        })
    }

    /// Switch the active language, replacing the prompt pool and resetting
    /// the used-prompt epoch. No-op when the language is unchanged.
    pub fn set_language(&mut self, language: Language, pool: Vec<Prompt>) -> Option<SessionEvent> {
        if language == self.language {
            return None;
        }
        self.language = language;
        self.prompt_pool = pool;
        self.used_prompt_ids.clear();
        Some(SessionEvent::LanguageChanged { language })
    }

    /// Append a turn record. Returns `None` once the round has ended, so a
    /// chunk whose collaborator calls outlived the round is dropped.
    pub fn record_turn(&mut self, player: u8, original: String, misheard: String) -> Option<Turn> {
        if self.phase != Phase::Conversation {
            return None;
        }
        let turn = Turn {
            player,
            original,
            misheard,
            timestamp: unix_now(),
        };
        self.turns.push(turn.clone());
        Some(turn)
    }
}

fn pick_starting_player() -> u8 {
    if rand::rng().random_bool(0.5) { 1 } else { 2 }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: u32) -> Vec<Prompt> {
        (1..=n)
            .map(|id| Prompt {
                id,
                topic: format!("topic-{id}"),
                text: format!("text-{id}"),
            })
            .collect()
    }

    fn session() -> SessionState {
        SessionState::new(Language::En, pool(5), Duration::from_secs(180))
    }

    fn shown_prompt_id(event: &SessionEvent) -> u32 {
        match event {
            SessionEvent::PhaseChanged {
                payload: PhasePayload::PromptChoice { choices, .. },
                ..
            } => choices[0].id,
            other => panic!("expected prompt choice event, got {other:?}"),
        }
    }

    #[test]
    fn initial_state_is_idle() {
        let s = session();
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.turns().is_empty());
    }

    #[test]
    fn first_ready_enters_waiting() {
        let mut s = session();
        let event = s.player_ready(2).unwrap();
        assert_eq!(s.phase(), Phase::Waiting);
        assert_eq!(
            event,
            SessionEvent::PhaseChanged {
                phase: Phase::Waiting,
                payload: PhasePayload::Ready {
                    players_ready: vec![2]
                },
            }
        );
    }

    #[test]
    fn both_ready_reaches_prompt_select_in_any_order() {
        for (first, second) in [(1, 2), (2, 1)] {
            let mut s = session();
            s.player_ready(first);
            let event = s.player_ready(second).unwrap();
            assert_eq!(s.phase(), Phase::PromptSelect);
            match event {
                SessionEvent::PhaseChanged {
                    phase: Phase::PromptSelect,
                    payload:
                        PhasePayload::PromptChoice {
                            choices,
                            highlight_index,
                            starting_player,
                        },
                } => {
                    assert_eq!(choices.len(), 1);
                    assert_eq!(highlight_index, 0);
                    assert!(starting_player == 1 || starting_player == 2);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn duplicate_ready_signals_do_not_advance() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(1);
        assert_eq!(s.phase(), Phase::Waiting);
    }

    #[test]
    fn reroll_then_prev_replays_history() {
        let mut s = session();
        s.player_ready(1);
        let first = shown_prompt_id(&s.player_ready(2).unwrap());
        let second = shown_prompt_id(&s.reroll_prompt().unwrap());
        assert_ne!(first, second);
        // prev replays, never resamples
        assert_eq!(shown_prompt_id(&s.prev_prompt().unwrap()), first);
        // forward through history returns the same second prompt
        assert_eq!(shown_prompt_id(&s.reroll_prompt().unwrap()), second);
    }

    #[test]
    fn prev_at_start_of_history_stays_put() {
        let mut s = session();
        s.player_ready(1);
        let first = shown_prompt_id(&s.player_ready(2).unwrap());
        assert_eq!(shown_prompt_id(&s.prev_prompt().unwrap()), first);
    }

    #[test]
    fn sampler_exhausts_pool_before_repeating() {
        let mut s = SessionState::new(Language::En, pool(3), Duration::from_secs(180));
        s.player_ready(1);
        let mut seen = vec![shown_prompt_id(&s.player_ready(2).unwrap())];
        seen.push(shown_prompt_id(&s.reroll_prompt().unwrap()));
        seen.push(shown_prompt_id(&s.reroll_prompt().unwrap()));
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3, "first epoch must cover the whole pool");
        // Pool exhausted: the epoch resets and sampling keeps working.
        s.reroll_prompt().unwrap();
    }

    #[test]
    fn confirm_outside_prompt_select_is_ignored() {
        let mut s = session();
        assert!(s.confirm_prompt().is_none());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn confirm_starts_conversation_with_configured_duration() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(2);
        let event = s.confirm_prompt().unwrap();
        assert_eq!(s.phase(), Phase::Conversation);
        match event {
            SessionEvent::PhaseChanged {
                payload: PhasePayload::Conversation { duration, .. },
                ..
            } => assert_eq!(duration, 180),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn set_prompt_index_rejects_out_of_range() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(2);
        assert!(s.set_prompt_index(3).is_none());
        assert_eq!(s.phase(), Phase::PromptSelect);
        assert!(s.set_prompt_index(0).is_some());
        assert_eq!(s.phase(), Phase::Conversation);
    }

    #[test]
    fn reveal_carries_the_turn_log() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(2);
        s.confirm_prompt();
        s.record_turn(1, "hello there friend".into(), "hello there fiend".into());
        let event = s.enter_reveal().unwrap();
        match event {
            SessionEvent::PhaseChanged {
                phase: Phase::Reveal,
                payload: PhasePayload::Reveal { turns, prompt },
            } => {
                assert_eq!(turns.len(), 1);
                assert_eq!(turns[0].player, 1);
                assert!(prompt.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        // a second reveal is a guard violation, silently ignored
        assert!(s.enter_reveal().is_none());
    }

    #[test]
    fn record_turn_outside_conversation_is_dropped() {
        let mut s = session();
        assert!(s.record_turn(1, "a".into(), "b".into()).is_none());
    }

    #[test]
    fn reset_clears_round_state_and_returns_to_idle() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(2);
        s.confirm_prompt();
        s.record_turn(2, "x y z".into(), "x y q".into());
        s.begin_reset();
        assert_eq!(s.phase(), Phase::Resetting);
        s.finish_reset().unwrap();
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.turns().is_empty());
        assert!(s.selected_prompt().is_none());
        assert!(s.ready_players().is_empty());
        assert!(s.current_choices().is_empty());
        assert_eq!(s.round_remaining(), 180.0);
    }

    #[test]
    fn double_reset_is_idempotent() {
        let mut s = session();
        s.begin_reset();
        s.begin_reset();
        s.finish_reset().unwrap();
        assert!(s.finish_reset().is_none());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn language_switch_replaces_pool_and_resets_epoch() {
        let mut s = session();
        s.player_ready(1);
        s.player_ready(2);
        assert!(!s.used_prompt_ids.is_empty());
        let event = s.set_language(Language::Ja, pool(2));
        assert!(matches!(
            event,
            Some(SessionEvent::LanguageChanged {
                language: Language::Ja
            })
        ));
        assert!(s.used_prompt_ids.is_empty());
        assert_eq!(s.prompt_pool.len(), 2);
        // switching to the already active language is a no-op
        assert!(s.set_language(Language::Ja, pool(2)).is_none());
    }

    #[test]
    fn ticks_are_ignored_outside_conversation() {
        let mut s = session();
        assert!(s.tick(10.0).is_none());
    }
}
