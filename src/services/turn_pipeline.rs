//! The serialized turn-processing pipeline: audio chunk in, one delivered
//! turn out — or a silent drop anywhere along the way.
//!
//! The whole body runs under the pipeline gate so at most one chunk is
//! between decode and fan-out at any instant, across both players. The
//! paraphraser therefore always sees a turn log consistent with delivery
//! order, and turn records land in submission order. A chunk that arrives
//! while another is in flight waits at the gate; it is never dropped for
//! waiting. No failure in here may reach the caller or a connection.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dto::ws::ServerMessage;
use crate::engine::ParaphraseRequest;
use crate::state::SharedState;
use crate::state::registry::Role;
use crate::state::session::Phase;

use super::filters;

/// Markers of a paraphraser response that could not pass as live speech.
const REFUSAL_MARKERS: [&str; 4] = ["i can't", "i cannot", "i'm sorry", "as an ai"];

/// Process one base64-encoded audio chunk from a player connection.
pub async fn process_chunk(state: &SharedState, role: Role, audio_b64: String) {
    let Some(player) = role.player_number() else {
        debug!(%role, "ignoring audio from a non-player role");
        return;
    };
    if audio_b64.is_empty() {
        return;
    }
    // cheap pre-check before paying for the decode; re-checked once we
    // actually hold the gate
    if state.with_session(|s| s.phase()).await != Phase::Conversation {
        return;
    }
    let audio = match BASE64.decode(audio_b64.as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(player, error = %err, "discarding chunk with invalid base64 audio");
            return;
        }
    };

    let _gate = state.pipeline_gate().lock().await;

    let Some(language) = state
        .with_session(|s| (s.phase() == Phase::Conversation).then(|| s.language()))
        .await
    else {
        return;
    };

    let call_timeout = state.config().collaborators.call_timeout;
    let transcript = match timeout(
        call_timeout,
        state.transcriber().transcribe(audio, language),
    )
    .await
    {
        Err(_) => {
            warn!(player, "transcription timed out; treating as silence");
            return;
        }
        Ok(Err(err)) => {
            warn!(player, error = %err, "transcription failed; treating as silence");
            return;
        }
        Ok(Ok(text)) => text.trim().to_owned(),
    };
    if transcript.is_empty() {
        return;
    }
    if let Some(rejection) = filters::screen(&transcript, language, &state.config().filters) {
        debug!(player, ?rejection, text = %transcript, "discarding transcript");
        return;
    }

    info!(player, text = %transcript, "player said");

    let (topic, history) = state
        .with_session(|s| (s.selected_topic(), s.turns().to_vec()))
        .await;
    let request = ParaphraseRequest {
        original: transcript.clone(),
        history,
        topic,
        speaker: player,
        language,
    };
    let misheard = match timeout(call_timeout, state.paraphraser().paraphrase(request)).await {
        Err(_) => {
            warn!(player, "paraphrase timed out; delivering the original line");
            transcript.clone()
        }
        Ok(Err(err)) => {
            warn!(player, error = %err, "paraphrase failed; delivering the original line");
            transcript.clone()
        }
        Ok(Ok(line)) => sanitize_drift(&transcript, line),
    };

    info!(player, text = %misheard, "heard as");

    // the round may have ended while the collaborators were working
    let Some(turn) = state
        .with_session(|s| s.record_turn(player, transcript, misheard))
        .await
    else {
        debug!(player, "round ended mid-pipeline; dropping finished chunk");
        return;
    };

    let registry = state.registry();
    let listener = if player == 1 { 2 } else { 1 };
    if let Some(listener_role) = Role::for_player(listener) {
        registry.send_to(
            listener_role,
            &ServerMessage::Message {
                from: turn.player,
                text: turn.misheard.clone(),
                is_own: false,
            },
        );
    }
    let spectator_view = ServerMessage::Turn {
        player: turn.player,
        original: turn.original.clone(),
        misheard: turn.misheard.clone(),
    };
    registry.send_to(Role::Spectator1, &spectator_view);
    registry.send_to(Role::Spectator2, &spectator_view);
    registry.send_to(
        Role::Control,
        &ServerMessage::DebugTurn {
            player: turn.player,
            original: turn.original,
            misheard: turn.misheard,
        },
    );
}

/// Substitute the original line when the paraphraser returns something that
/// could not pass as live speech: empty output, multiple lines, list
/// markup, or refusal phrasing.
fn sanitize_drift(original: &str, candidate: String) -> String {
    let line = candidate.trim();
    if line.is_empty() || line.lines().count() > 1 {
        return original.to_owned();
    }
    if line.starts_with(['-', '*', '•']) {
        return original.to_owned();
    }
    let lowered = line.to_lowercase();
    if REFUSAL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return original.to_owned();
    }
    line.to_owned()
}
