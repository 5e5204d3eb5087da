//! End-to-end session tests driving the shared state with scripted
//! collaborators and channel-backed fake connections — no network layer.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tokio::sync::mpsc;

use drift_back::config::AppConfig;
use drift_back::engine::mock::{
    CannedParaphraser, FailingParaphraser, FailingTranscriber, ScriptedTranscriber,
};
use drift_back::engine::{Paraphraser, SpeechToText};
use drift_back::services::{dispatcher, fanout, turn_pipeline};
use drift_back::state::registry::Role;
use drift_back::state::session::{Language, Phase, PhasePayload, SessionEvent};
use drift_back::state::{AppState, SharedState};

/// Config for paused-clock tests: a three-second round keeps the tick
/// sequence short.
fn paused_config() -> AppConfig {
    AppConfig {
        round_duration: Duration::from_secs(3),
        reveal_hold: Duration::from_secs(5),
        reset_settle: Duration::from_secs(5),
        default_language: Language::En,
        ..AppConfig::default()
    }
}

/// Config for real-clock tests: a round long enough that it cannot end
/// underneath the assertions.
fn test_config() -> AppConfig {
    AppConfig {
        round_duration: Duration::from_secs(120),
        default_language: Language::En,
        ..AppConfig::default()
    }
}

fn build_state(
    config: AppConfig,
    transcriber: Arc<dyn SpeechToText>,
    paraphraser: Arc<dyn Paraphraser>,
) -> (
    SharedState,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) {
    AppState::new(Arc::new(config), transcriber, paraphraser)
}

fn default_mocks() -> (Arc<dyn SpeechToText>, Arc<dyn Paraphraser>) {
    (
        Arc::new(ScriptedTranscriber::default()),
        Arc::new(CannedParaphraser::default()),
    )
}

/// Attach a fake connection for `role` and return its inbound frames.
fn attach(state: &SharedState, role: Role) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.registry().register(role, tx);
    rx
}

fn drain_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str(text.as_str()).expect("valid json frame"));
        }
    }
    frames
}

async fn next_phase(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> (Phase, PhasePayload) {
    loop {
        match events.recv().await.expect("event stream open") {
            SessionEvent::PhaseChanged { phase, payload } => return (phase, payload),
            _ => continue,
        }
    }
}

async fn ready_both(state: &SharedState) {
    state.player_ready(1).await;
    state.player_ready(2).await;
}

#[tokio::test]
async fn prompt_select_requires_both_distinct_players() {
    let (t, p) = default_mocks();
    let (state, mut events) = build_state(test_config(), t, p);

    state.player_ready(1).await;
    state.player_ready(1).await;
    let (phase, payload) = next_phase(&mut events).await;
    assert_eq!(phase, Phase::Waiting);
    assert_eq!(
        payload,
        PhasePayload::Ready {
            players_ready: vec![1]
        }
    );
    assert!(events.try_recv().is_err(), "duplicate ready must not emit");

    state.player_ready(2).await;
    let (phase, payload) = next_phase(&mut events).await;
    assert_eq!(phase, Phase::PromptSelect);
    match payload {
        PhasePayload::PromptChoice {
            choices,
            highlight_index,
            starting_player,
        } => {
            assert_eq!(choices.len(), 1);
            assert_eq!(highlight_index, 0);
            assert!(starting_player == 1 || starting_player == 2);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn reroll_then_prev_returns_to_the_prior_prompt() {
    let (t, p) = default_mocks();
    let (state, mut events) = build_state(test_config(), t, p);

    ready_both(&state).await;
    next_phase(&mut events).await; // waiting
    let (_, payload) = next_phase(&mut events).await; // prompt select
    let first = match payload {
        PhasePayload::PromptChoice { choices, .. } => choices[0].clone(),
        other => panic!("unexpected payload {other:?}"),
    };

    state.reroll_prompt().await;
    let (_, payload) = next_phase(&mut events).await;
    let second = match payload {
        PhasePayload::PromptChoice { choices, .. } => choices[0].clone(),
        other => panic!("unexpected payload {other:?}"),
    };
    assert_ne!(first.id, second.id);

    state.prev_prompt().await;
    let (_, payload) = next_phase(&mut events).await;
    match payload {
        PhasePayload::PromptChoice { choices, .. } => assert_eq!(choices[0].id, first.id),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn round_timer_counts_down_to_reveal_and_back_to_idle() {
    let (t, p) = default_mocks();
    let (state, mut events) = build_state(paused_config(), t, p);

    ready_both(&state).await;
    state.confirm_prompt().await;
    while next_phase(&mut events).await.0 != Phase::Conversation {}

    let mut ticks: Vec<f64> = Vec::new();
    let mut saw_reveal = false;
    loop {
        match events.recv().await.expect("event stream open") {
            SessionEvent::TimerTick { remaining } => {
                assert!(!saw_reveal, "no tick may follow the reveal");
                ticks.push(remaining);
            }
            SessionEvent::PhaseChanged {
                phase: Phase::Reveal,
                ..
            } => {
                saw_reveal = true;
            }
            SessionEvent::PhaseChanged {
                phase: Phase::Resetting,
                ..
            } => {}
            SessionEvent::PhaseChanged {
                phase: Phase::Idle, ..
            } => break,
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert!(saw_reveal);
    assert!(!ticks.is_empty());
    assert!(
        ticks.windows(2).all(|pair| pair[1] <= pair[0]),
        "ticks must be monotonically non-increasing: {ticks:?}"
    );
    assert_eq!(*ticks.last().unwrap(), 0.0);
    assert!(!state.timer().is_armed(), "all timers settled after idle");
    // double-cancel of a finished timer must be a no-op
    state.timer().cancel();
    state.timer().cancel();

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.turns.is_empty());
    assert!(snapshot.prompt.is_none());
}

#[tokio::test(start_paused = true)]
async fn forced_reveal_cancels_the_timer_and_carries_the_turn_log() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["I love going to the beach"]));
    let paraphraser = Arc::new(CannedParaphraser::replying("I love going to the harbor"));
    let (state, mut events) = build_state(paused_config(), transcriber, paraphraser);

    ready_both(&state).await;
    state.confirm_prompt().await;

    let chunk = BASE64.encode(b"pcm-bytes");
    turn_pipeline::process_chunk(&state, Role::Player1, chunk).await;

    state.force_reveal().await;
    loop {
        match events.recv().await.expect("event stream open") {
            SessionEvent::PhaseChanged {
                phase: Phase::Reveal,
                payload,
            } => {
                match payload {
                    PhasePayload::Reveal { turns, prompt } => {
                        assert_eq!(turns.len(), 1);
                        assert_eq!(turns[0].original, "I love going to the beach");
                        assert_eq!(turns[0].misheard, "I love going to the harbor");
                        assert!(prompt.is_some());
                    }
                    other => panic!("unexpected payload {other:?}"),
                }
                break;
            }
            _ => continue,
        }
    }

    // a second force is a guard violation and must do nothing
    state.force_reveal().await;

    // the reveal pause then the reset settle elapse on the paused clock
    loop {
        if let SessionEvent::PhaseChanged {
            phase: Phase::Idle, ..
        } = events.recv().await.expect("event stream open")
        {
            break;
        }
    }
    let snapshot = state.snapshot().await;
    assert!(snapshot.turns.is_empty());
    assert!(snapshot.players_ready.is_empty());
}

#[tokio::test]
async fn audio_chunk_is_transcribed_drifted_and_fanned_out() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["I love going to the beach"]));
    let paraphraser = Arc::new(CannedParaphraser::replying("I love going to the mountains"));
    let paraphraser_handle = paraphraser.clone();
    let (state, events) = build_state(test_config(), transcriber, paraphraser);
    fanout::spawn_event_fanout(state.clone(), events);

    let mut p1 = attach(&state, Role::Player1);
    let mut p2 = attach(&state, Role::Player2);
    let mut spectator = attach(&state, Role::Spectator1);
    let mut control = attach(&state, Role::Control);

    ready_both(&state).await;
    state.confirm_prompt().await;

    let chunk = BASE64.encode(b"pcm-bytes");
    let raw = serde_json::json!({ "action": "audio_chunk", "audio": chunk }).to_string();
    dispatcher::dispatch(&state, Role::Player1, &raw).await;

    // listener gets only the altered line
    let p2_frames = drain_json(&mut p2);
    let delivered: Vec<&Value> = p2_frames
        .iter()
        .filter(|frame| frame["type"] == "message")
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["from"], 1);
    assert_eq!(delivered[0]["text"], "I love going to the mountains");
    assert_eq!(delivered[0]["isOwn"], false);

    // the speaker never sees their own line come back
    assert!(
        drain_json(&mut p1)
            .iter()
            .all(|frame| frame["type"] != "message")
    );

    // spectators and control see both sides
    let turn_frame = drain_json(&mut spectator)
        .into_iter()
        .find(|frame| frame["type"] == "turn")
        .expect("spectator turn frame");
    assert_eq!(turn_frame["player"], 1);
    assert_eq!(turn_frame["original"], "I love going to the beach");
    assert_eq!(turn_frame["misheard"], "I love going to the mountains");
    assert!(
        drain_json(&mut control)
            .iter()
            .any(|frame| frame["type"] == "debug_turn")
    );

    // paraphraser saw the topic and the empty history of a fresh round
    let calls = paraphraser_handle.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].speaker, 1);
    assert!(calls[0].topic.is_some());
    assert!(calls[0].history.is_empty());

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.turns.len(), 1);
    assert_eq!(snapshot.turns[0].player, 1);
}

#[tokio::test]
async fn short_character_dense_fragment_never_reaches_the_paraphraser() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["ねえ"]));
    let paraphraser = Arc::new(CannedParaphraser::default());
    let paraphraser_handle = paraphraser.clone();
    let config = AppConfig {
        default_language: Language::Ja,
        ..test_config()
    };
    let (state, _events) = build_state(config, transcriber, paraphraser);

    ready_both(&state).await;
    state.confirm_prompt().await;

    turn_pipeline::process_chunk(&state, Role::Player2, BASE64.encode(b"pcm")).await;

    assert!(paraphraser_handle.calls().is_empty());
    assert!(state.snapshot().await.turns.is_empty());
}

#[tokio::test]
async fn repeated_character_glitch_produces_no_turn_or_broadcast() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["あ".repeat(12)]));
    let paraphraser = Arc::new(CannedParaphraser::default());
    let config = AppConfig {
        default_language: Language::Ja,
        ..test_config()
    };
    let (state, _events) = build_state(config, transcriber, paraphraser);
    let mut p1 = attach(&state, Role::Player1);

    ready_both(&state).await;
    state.confirm_prompt().await;
    drain_json(&mut p1);

    turn_pipeline::process_chunk(&state, Role::Player2, BASE64.encode(b"pcm")).await;

    assert!(state.snapshot().await.turns.is_empty());
    assert!(
        drain_json(&mut p1)
            .iter()
            .all(|frame| frame["type"] != "message")
    );
}

#[tokio::test]
async fn chunks_are_dropped_outside_the_conversation_phase() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["I love going to the beach"]));
    let paraphraser = Arc::new(CannedParaphraser::default());
    let paraphraser_handle = paraphraser.clone();
    let (state, _events) = build_state(test_config(), transcriber, paraphraser);

    turn_pipeline::process_chunk(&state, Role::Player1, BASE64.encode(b"pcm")).await;
    assert!(paraphraser_handle.calls().is_empty());
}

#[tokio::test]
async fn malformed_audio_and_transcriber_faults_are_contained() {
    let (state, _events) = build_state(
        test_config(),
        Arc::new(FailingTranscriber),
        Arc::new(CannedParaphraser::default()),
    );

    ready_both(&state).await;
    state.confirm_prompt().await;

    // not base64 at all
    turn_pipeline::process_chunk(&state, Role::Player1, "%%%not-base64%%%".into()).await;
    // transcriber blows up
    turn_pipeline::process_chunk(&state, Role::Player1, BASE64.encode(b"pcm")).await;

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Conversation);
    assert!(snapshot.turns.is_empty());
}

#[tokio::test]
async fn paraphraser_fault_falls_back_to_the_original_line() {
    let transcriber = Arc::new(ScriptedTranscriber::new(["we hiked for three hours"]));
    let (state, _events) = build_state(test_config(), transcriber, Arc::new(FailingParaphraser));
    let mut p2 = attach(&state, Role::Player2);

    ready_both(&state).await;
    state.confirm_prompt().await;
    drain_json(&mut p2);

    turn_pipeline::process_chunk(&state, Role::Player1, BASE64.encode(b"pcm")).await;

    let delivered = drain_json(&mut p2)
        .into_iter()
        .find(|frame| frame["type"] == "message")
        .expect("fallback line delivered");
    assert_eq!(delivered["text"], "we hiked for three hours");

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.turns[0].misheard, "we hiked for three hours");
}

#[tokio::test]
async fn turn_records_append_in_submission_order() {
    let transcriber = Arc::new(ScriptedTranscriber::new([
        "first line from someone here",
        "second line from someone here",
        "third line from someone here",
    ]));
    let (state, _events) = build_state(
        test_config(),
        transcriber,
        Arc::new(CannedParaphraser::default()),
    );

    ready_both(&state).await;
    state.confirm_prompt().await;

    // both players submit concurrently; the pipeline gate serializes them
    let chunk = BASE64.encode(b"pcm");
    let submissions = [
        (Role::Player1, chunk.clone()),
        (Role::Player2, chunk.clone()),
        (Role::Player1, chunk.clone()),
    ];
    for (role, audio) in submissions {
        turn_pipeline::process_chunk(&state, role, audio).await;
    }

    let snapshot = state.snapshot().await;
    let originals: Vec<&str> = snapshot
        .turns
        .iter()
        .map(|turn| turn.original.as_str())
        .collect();
    assert_eq!(
        originals,
        [
            "first line from someone here",
            "second line from someone here",
            "third line from someone here"
        ]
    );
    assert_eq!(
        snapshot.turns.iter().map(|t| t.player).collect::<Vec<_>>(),
        [1, 2, 1]
    );
}

#[tokio::test(start_paused = true)]
async fn reset_twice_in_a_row_settles_in_idle() {
    let (t, p) = default_mocks();
    let (state, mut events) = build_state(paused_config(), t, p);

    ready_both(&state).await;
    state.confirm_prompt().await;

    state.reset().await;
    state.reset().await;

    // drain everything the two resets produce; the paused clock fast-forwards
    // through the surviving settle task, then the stream goes quiet
    let mut idle_seen = 0;
    loop {
        match tokio::time::timeout(Duration::from_secs(60), events.recv()).await {
            Ok(Some(SessionEvent::PhaseChanged {
                phase: Phase::Idle, ..
            })) => idle_seen += 1,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
    assert_eq!(idle_seen, 1, "exactly one settle task survives");

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.turns.is_empty());
}

#[tokio::test]
async fn snapshot_is_sent_through_the_registry_on_connect() {
    let (t, p) = default_mocks();
    let (state, _events) = build_state(test_config(), t, p);
    let mut control = attach(&state, Role::Control);

    // what the websocket service pushes right after registering
    let snapshot = state.snapshot().await;
    state.registry().send_to(
        Role::Control,
        &drift_back::dto::ws::ServerMessage::Snapshot { state: snapshot },
    );

    let frame = drain_json(&mut control)
        .into_iter()
        .find(|frame| frame["type"] == "snapshot")
        .expect("snapshot frame");
    assert_eq!(frame["phase"], "idle");
    assert_eq!(frame["language"], "en");
    assert_eq!(frame["remaining"], 120.0);
    assert!(frame["turns"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn language_switch_broadcasts_and_reloads_prompts() {
    let (t, p) = default_mocks();
    let (state, events) = build_state(test_config(), t, p);
    fanout::spawn_event_fanout(state.clone(), events);
    let mut control = attach(&state, Role::Control);

    let raw = serde_json::json!({ "action": "set_language", "language": "ja" }).to_string();
    dispatcher::dispatch(&state, Role::Control, &raw).await;

    // give the fan-out task a chance to drain the event
    let mut frames = Vec::new();
    for _ in 0..100 {
        tokio::task::yield_now().await;
        frames.extend(drain_json(&mut control));
        if frames.iter().any(|frame| frame["type"] == "language_change") {
            break;
        }
    }
    let change = frames
        .iter()
        .find(|frame| frame["type"] == "language_change")
        .expect("language change frame");
    assert_eq!(change["language"], "ja");
    assert_eq!(state.snapshot().await.language, Language::Ja);
}

#[tokio::test]
async fn relay_key_reaches_only_the_target_player() {
    let (t, p) = default_mocks();
    let (state, _events) = build_state(test_config(), t, p);
    let mut p1 = attach(&state, Role::Player1);
    let mut p2 = attach(&state, Role::Player2);

    let raw = serde_json::json!({
        "action": "relay_key",
        "targetPlayer": 2,
        "keyAction": "select",
        "eventType": "keydown",
    })
    .to_string();
    dispatcher::dispatch(&state, Role::Control, &raw).await;

    let p2_frames = drain_json(&mut p2);
    let relayed = p2_frames
        .iter()
        .find(|frame| frame["type"] == "remote_key")
        .expect("remote key frame");
    assert_eq!(relayed["keyAction"], "select");
    assert!(drain_json(&mut p1).is_empty());
}

#[tokio::test]
async fn unknown_and_malformed_messages_are_ignored() {
    let (t, p) = default_mocks();
    let (state, _events) = build_state(test_config(), t, p);

    dispatcher::dispatch(&state, Role::Control, "not json at all").await;
    dispatcher::dispatch(&state, Role::Control, r#"{"action":"warp_reality"}"#).await;
    dispatcher::dispatch(&state, Role::Control, r#"{"no_action_field":1}"#).await;

    assert_eq!(state.snapshot().await.phase, Phase::Idle);
}
