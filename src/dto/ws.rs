//! Messages crossing the WebSocket boundary, in both directions.

use serde::{Deserialize, Serialize};

use crate::state::session::{Language, Phase, PhasePayload};

fn default_direction() -> i32 {
    1
}

/// Messages accepted from connected clients, tagged by `action`.
///
/// Unknown actions deserialize to [`ClientAction::Unknown`] and are ignored
/// by the dispatcher.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// A player (or the control panel, for both players) pressed ready.
    PlayerReady,
    /// Control-panel fallback: ready both players while idle.
    StartGame,
    /// Directional prompt navigation.
    NavPrompt {
        /// Positive steps forward, negative replays history.
        #[serde(default = "default_direction")]
        direction: i32,
    },
    /// Show the next topic.
    RerollPrompt,
    /// Step back to the previously shown topic.
    PrevPrompt,
    /// Confirm the highlighted topic.
    SelectPrompt,
    /// Confirm a topic by on-screen index.
    SetPromptIndex {
        /// Index into the displayed choices.
        #[serde(default)]
        index: usize,
    },
    /// A chunk of recorded speech from a player.
    AudioChunk {
        /// Base64-encoded raw audio buffer.
        #[serde(default)]
        audio: String,
    },
    /// Operator ends the round early.
    ForceReveal,
    /// Operator resets the whole session.
    Reset,
    /// Debug shortcut: confirm the current topic immediately.
    SkipToConversation,
    /// Switch the active language.
    SetLanguage {
        /// Requested language.
        language: Language,
    },
    /// Forward a key event verbatim to one player's screen.
    #[serde(rename_all = "camelCase")]
    RelayKey {
        /// Player whose screen receives the event.
        target_player: u8,
        /// Logical key action name.
        key_action: String,
        /// `keydown` / `keyup`.
        event_type: String,
    },
    /// Anything else; ignored.
    #[serde(other)]
    Unknown,
}

/// Messages pushed to clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session entered a new phase.
    Phase {
        /// Phase just entered.
        phase: Phase,
        /// Phase-specific payload, flattened.
        #[serde(flatten)]
        payload: PhasePayload,
    },
    /// Round countdown tick.
    Timer {
        /// Remaining seconds, one decimal.
        remaining: f64,
    },
    /// The altered line delivered to the listening player.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Speaking player.
        from: u8,
        /// The line the listener is told was said.
        text: String,
        /// Always false: the listener never sees their own speech here.
        is_own: bool,
    },
    /// Both sides of a turn, for the spectator displays.
    Turn {
        /// Speaking player.
        player: u8,
        /// What was actually said.
        original: String,
        /// What the listener was told.
        misheard: String,
    },
    /// Both sides of a turn, for the control panel.
    DebugTurn {
        /// Speaking player.
        player: u8,
        /// What was actually said.
        original: String,
        /// What the listener was told.
        misheard: String,
    },
    /// Full state pushed once when a client (re)connects.
    Snapshot {
        /// Complete session snapshot, flattened.
        #[serde(flatten)]
        state: crate::dto::snapshot::SessionSnapshot,
    },
    /// The active language changed.
    LanguageChange {
        /// New language.
        language: Language,
    },
    /// A relayed key event.
    #[serde(rename_all = "camelCase")]
    RemoteKey {
        /// Logical key action name.
        key_action: String,
        /// `keydown` / `keyup`.
        event_type: String,
    },
}
