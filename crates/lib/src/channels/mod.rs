//! Communication channel (Lark/Feishu).
//!
//! Wire types for the Lark event callback, normalization of raw events into
//! `InboundMessage`, and the outbound reply path (token exchange + reply post).

mod inbound;
mod lark;

pub use inbound::InboundMessage;
pub use lark::{normalize, LarkChannel, WebhookPayload};
