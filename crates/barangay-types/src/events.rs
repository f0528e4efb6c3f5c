use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification, Role};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        name: String,
        role: Role,
        verified: bool,
    },

    /// The account's verification state changed (verify/reject by an admin)
    AuthStateChange {
        user_id: Uuid,
        verified: bool,
        submitted: bool,
        error_note: Option<String>,
    },

    /// A message addressed to this user was sent
    MessageCreate(Message),

    /// A notification was created for this user
    NotificationCreate(Notification),

    /// Another user started typing a message to this user
    TypingStart { user_id: Uuid, name: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing a message to a user
    StartTyping { receiver_id: Uuid },
}
