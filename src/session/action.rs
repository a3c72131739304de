//! Normalized inbound events and the closed command set.

use serde::{Deserialize, Serialize};

/// Every user intent the session machine understands. Transports map their
/// native UI events (button labels, slash commands, callback data) onto
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "command", content = "id", rename_all = "snake_case")]
pub enum Command {
    Start,
    Help,
    Terms,
    AcceptTerms,
    CheckSubscription,
    Register,
    ChooseDriver,
    ChoosePassenger,
    ChangeRole,
    CreateRide,
    MyRides,
    EndRide(i64),
    SearchRide,
    MySearches,
    RepeatSearch(i64),
    RelevantRides,
    ContactDriver(i64),
    Cancel,
    Back,
    Admin,
    AdminStats,
    AdminUsers,
    AdminRides,
    AdminDeleteRide(i64),
    AdminBroadcast,
    AdminConfirmBroadcast,
    AdminCleanup,
    Stats,
}

impl Command {
    /// Commands that work before the user has accepted the terms.
    pub fn bypasses_terms(&self) -> bool {
        matches!(
            self,
            Self::Start
                | Self::Help
                | Self::Terms
                | Self::AcceptTerms
                | Self::CheckSubscription
                | Self::Admin
        )
    }

    /// Commands restricted to privileged identities.
    pub fn is_admin_command(&self) -> bool {
        matches!(
            self,
            Self::Admin
                | Self::AdminStats
                | Self::AdminUsers
                | Self::AdminRides
                | Self::AdminDeleteRide(_)
                | Self::AdminBroadcast
                | Self::AdminConfirmBroadcast
                | Self::AdminCleanup
                | Self::Stats
        )
    }

    /// Role and menu actions gated on channel subscription.
    pub fn needs_subscription(&self) -> bool {
        matches!(
            self,
            Self::ChooseDriver
                | Self::ChoosePassenger
                | Self::ChangeRole
                | Self::Register
                | Self::CreateRide
                | Self::MyRides
                | Self::SearchRide
                | Self::MySearches
                | Self::RelevantRides
        )
    }

    /// Commands that still answer (with a redirect notice) outside direct chats.
    pub fn answers_in_groups(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Help | Self::Terms | Self::Register | Self::Stats
        )
    }
}

/// What the user did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Free text typed into the chat.
    Text(String),
    /// A shared contact card carrying a phone number.
    Contact(String),
    /// A recognized command.
    Command(Command),
}

/// A single inbound event, already normalized by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub user_id: i64,
    /// Username or first name, whichever the transport has.
    pub display_name: String,
    pub chat_is_direct: bool,
    pub action: Action,
}

impl InboundEvent {
    pub fn direct(user_id: i64, display_name: impl Into<String>, action: Action) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            chat_is_direct: true,
            action,
        }
    }

    pub fn command(user_id: i64, display_name: impl Into<String>, command: Command) -> Self {
        Self::direct(user_id, display_name, Action::Command(command))
    }

    pub fn text(user_id: i64, display_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::direct(user_id, display_name, Action::Text(text.into()))
    }

    /// Mark this event as coming from a group or channel chat.
    pub fn in_group(mut self) -> Self {
        self.chat_is_direct = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_entry_bypasses_terms_but_other_admin_commands_do_not() {
        assert!(Command::Admin.bypasses_terms());
        assert!(!Command::AdminStats.bypasses_terms());
        assert!(Command::AdminStats.is_admin_command());
        assert!(Command::Stats.is_admin_command());
    }

    #[test]
    fn end_ride_is_not_subscription_gated() {
        assert!(!Command::EndRide(1).needs_subscription());
        assert!(Command::SearchRide.needs_subscription());
    }

    #[test]
    fn command_serializes_with_id() {
        let json = serde_json::to_value(Command::ContactDriver(7)).unwrap();
        assert_eq!(json, serde_json::json!({"command": "contact_driver", "id": 7}));
        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, Command::ContactDriver(7));
    }

    #[test]
    fn group_event_builder() {
        let ev = InboundEvent::command(1, "anna", Command::Start).in_group();
        assert!(!ev.chat_is_direct);
    }
}
