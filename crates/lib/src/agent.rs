//! Agent turn: load the session transcript, call Claude, append the reply,
//! persist. Session-layer failures never block the reply path: a load error
//! means the turn runs with empty history, a save error means the history is
//! not persisted; both are logged and the reply still goes out.

use crate::llm::{ChatMessage, ClaudeClient, ClaudeError};
use crate::session::{SessionMessage, SessionStore};

/// Run one conversation turn and return the assistant's reply text.
pub async fn run_turn(
    sessions: &SessionStore,
    claude: &ClaudeClient,
    model: &str,
    system: &str,
    session_id: &str,
    user_text: &str,
) -> Result<String, ClaudeError> {
    let mut history = match sessions.load(session_id).await {
        Ok(h) => h,
        Err(e) => {
            log::warn!(
                "session {}: load failed, continuing with empty history: {}",
                session_id,
                e
            );
            Vec::new()
        }
    };
    history.push(SessionMessage::user(user_text));

    let messages: Vec<ChatMessage> = history
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();
    let reply = claude.chat(model, system, &messages).await?;

    history.push(SessionMessage::assistant(reply.clone()));
    if let Err(e) = sessions.save(session_id, &history).await {
        log::warn!("session {}: save failed, history not persisted: {}", session_id, e);
    }
    Ok(reply)
}
