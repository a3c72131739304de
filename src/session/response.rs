//! Response descriptors handed back to the transport.

use serde::{Deserialize, Serialize};

use crate::session::action::Command;

/// Abstract keyboard tag; the transport maps each to concrete controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keyboard {
    #[default]
    None,
    RoleMenu,
    DriverMenu,
    PassengerMenu,
    RegistrationPrompt,
    CancelPrompt,
    /// Link to the full agreement plus an accept button.
    TermsPrompt,
    /// Link to the required channel plus a re-check button.
    SubscriptionPrompt,
    AdminMenu,
}

/// An inline action attached to a single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub command: Command,
}

impl Button {
    pub fn new(label: impl Into<String>, command: Command) -> Self {
        Self {
            label: label.into(),
            command,
        }
    }
}

/// A message body to fan out to many users. Delivery is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// The admin who confirmed the broadcast; receives the final report.
    pub admin_id: i64,
    pub recipients: Vec<i64>,
    pub body: String,
}

/// Delivery counts reported back by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub keyboard: Keyboard,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastRequest>,
}

impl Response {
    pub fn new(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard,
            buttons: Vec::new(),
            broadcast: None,
        }
    }

    /// Plain text with no controls.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, Keyboard::None)
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn with_buttons(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.buttons.extend(buttons);
        self
    }

    pub fn with_broadcast(mut self, request: BroadcastRequest) -> Self {
        self.broadcast = Some(request);
        self
    }
}
