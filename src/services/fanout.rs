//! Bridges the session aggregate's event stream onto the connection
//! registry, keeping the state machine itself free of any transport
//! dependency.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dto::ws::ServerMessage;
use crate::state::SharedState;
use crate::state::session::SessionEvent;

/// Consume session events and broadcast them to every connected client.
///
/// Events arrive in emission order (they are published under the session
/// lock), so phase changes and ticks reach the screens in the order the
/// aggregate produced them.
pub fn spawn_event_fanout(
    state: SharedState,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::PhaseChanged { phase, payload } => {
                    info!(?phase, "phase changed");
                    state
                        .registry()
                        .broadcast(&ServerMessage::Phase { phase, payload });
                }
                SessionEvent::TimerTick { remaining } => {
                    state
                        .registry()
                        .broadcast(&ServerMessage::Timer { remaining });
                }
                SessionEvent::LanguageChanged { language } => {
                    state
                        .registry()
                        .broadcast(&ServerMessage::LanguageChange { language });
                }
            }
        }
    })
}
