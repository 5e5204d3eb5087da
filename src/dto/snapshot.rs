//! Full-state snapshot sent to clients on (re)connect, so late joiners
//! resynchronize without event replay.

use serde::Serialize;

use crate::state::session::{Language, Phase, Prompt, SessionState, Turn};

/// Complete view of the session, shaped for the screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Active language.
    pub language: Language,
    /// Current phase.
    pub phase: Phase,
    /// Topic confirmed for the current round, if any.
    pub prompt: Option<Prompt>,
    /// Prompt candidates currently on screen.
    pub prompt_choices: Vec<Prompt>,
    /// Highlighted candidate index.
    pub highlight_index: usize,
    /// Player who picks the topic and speaks first.
    pub starting_player: u8,
    /// Remaining round seconds, one decimal.
    pub remaining: f64,
    /// Turn log so far.
    pub turns: Vec<Turn>,
    /// Players that have pressed ready.
    pub players_ready: Vec<u8>,
}

impl From<&SessionState> for SessionSnapshot {
    fn from(session: &SessionState) -> Self {
        Self {
            language: session.language(),
            phase: session.phase(),
            prompt: session.selected_prompt().cloned(),
            prompt_choices: session.current_choices(),
            highlight_index: session.highlight_index(),
            starting_player: session.starting_player(),
            remaining: session.round_remaining(),
            turns: session.turns().to_vec(),
            players_ready: session.ready_players(),
        }
    }
}
