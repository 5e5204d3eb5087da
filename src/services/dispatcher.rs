//! Stateless translation of inbound client payloads into session, pipeline,
//! or registry calls. Malformed and unknown messages are ignored with a
//! debug log; nothing here mutates state directly.

use tracing::debug;

use crate::dto::ws::{ClientAction, ServerMessage};
use crate::state::SharedState;
use crate::state::registry::Role;

use super::turn_pipeline;

/// Decode one raw text frame from `role` and route it.
pub async fn dispatch(state: &SharedState, role: Role, raw: &str) {
    let action = match serde_json::from_str::<ClientAction>(raw) {
        Ok(action) => action,
        Err(err) => {
            debug!(%role, error = %err, "ignoring malformed client message");
            return;
        }
    };

    match action {
        ClientAction::PlayerReady => match role.player_number() {
            Some(player) => state.player_ready(player).await,
            // the control panel readies both players at once
            None if role == Role::Control => {
                state.player_ready(1).await;
                state.player_ready(2).await;
            }
            None => debug!(%role, "ignoring ready signal from a spectator"),
        },
        ClientAction::StartGame => state.start_game().await,
        ClientAction::NavPrompt { direction } => state.navigate_prompt(direction).await,
        ClientAction::RerollPrompt => state.reroll_prompt().await,
        ClientAction::PrevPrompt => state.prev_prompt().await,
        ClientAction::SelectPrompt => state.confirm_prompt().await,
        ClientAction::SetPromptIndex { index } => state.set_prompt_index(index).await,
        ClientAction::AudioChunk { audio } => {
            turn_pipeline::process_chunk(state, role, audio).await;
        }
        ClientAction::ForceReveal => state.force_reveal().await,
        ClientAction::Reset => state.reset().await,
        ClientAction::SkipToConversation => state.confirm_prompt().await,
        ClientAction::SetLanguage { language } => state.set_language(language).await,
        ClientAction::RelayKey {
            target_player,
            key_action,
            event_type,
        } => {
            let Some(target) = Role::for_player(target_player) else {
                debug!(target_player, "ignoring key relay to unknown player");
                return;
            };
            state.registry().send_to(
                target,
                &ServerMessage::RemoteKey {
                    key_action,
                    event_type,
                },
            );
        }
        ClientAction::Unknown => debug!(%role, "ignoring unknown action"),
    }
}
