//! Inbound message: the normalized form of a webhook event, handed to the
//! gateway for dedup, session, and agent handling.

/// A normalized chat event. `session_id` identifies the conversation thread
/// (thread root id when the message belongs to a topic, chat id otherwise).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub session_id: String,
    pub sender_type: String,
    pub text: String,
}
