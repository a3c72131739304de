//! Mapping between native chat controls and the closed [`Command`] set.
//!
//! Reply-keyboard labels and slash commands arrive as plain text; inline
//! buttons arrive as callback data. Both directions live here so labels and
//! callbacks can never drift apart.

use crate::session::{Command, Keyboard};

pub const DRIVER: &str = "🚗 I'm a driver";
pub const PASSENGER: &str = "👤 I'm a passenger";
pub const HELP: &str = "❓ Help";
pub const CREATE_RIDE: &str = "🚗 Create ride";
pub const MY_RIDES: &str = "📋 My rides";
pub const FIND_RIDE: &str = "🔍 Find ride";
pub const MY_SEARCHES: &str = "📋 My searches";
pub const RELEVANT_RIDES: &str = "🚗 Relevant rides";
pub const REGISTRATION: &str = "📞 Registration";
pub const CHANGE_ROLE: &str = "🔄 Change role";
pub const SHARE_PHONE: &str = "📱 Share phone number";
pub const BACK: &str = "🔙 Back";
pub const CANCEL: &str = "❌ Cancel";

/// A reply-keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyKey {
    pub label: &'static str,
    /// Ask the client to share the user's phone number.
    pub request_contact: bool,
}

const fn key(label: &'static str) -> ReplyKey {
    ReplyKey {
        label,
        request_contact: false,
    }
}

/// Where an inline key leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineTarget {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineKey {
    pub label: String,
    pub target: InlineTarget,
}

impl InlineKey {
    pub fn callback(label: impl Into<String>, command: Command) -> Self {
        Self {
            label: label.into(),
            target: InlineTarget::Callback(encode_callback(command)),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: InlineTarget::Url(url.into()),
        }
    }
}

/// Rows of reply keys, or `None` for keyboards rendered inline.
pub fn reply_layout(keyboard: Keyboard) -> Option<Vec<Vec<ReplyKey>>> {
    let rows = match keyboard {
        Keyboard::RoleMenu => vec![vec![key(DRIVER), key(PASSENGER)], vec![key(HELP)]],
        Keyboard::DriverMenu => vec![
            vec![key(CREATE_RIDE), key(MY_RIDES)],
            vec![key(REGISTRATION), key(CHANGE_ROLE)],
            vec![key(HELP)],
        ],
        Keyboard::PassengerMenu => vec![
            vec![key(FIND_RIDE), key(MY_SEARCHES)],
            vec![key(RELEVANT_RIDES)],
            vec![key(REGISTRATION), key(CHANGE_ROLE)],
            vec![key(HELP)],
        ],
        Keyboard::RegistrationPrompt => vec![
            vec![ReplyKey {
                label: SHARE_PHONE,
                request_contact: true,
            }],
            vec![key(BACK)],
        ],
        Keyboard::CancelPrompt => vec![vec![key(CANCEL)]],
        Keyboard::None
        | Keyboard::TermsPrompt
        | Keyboard::SubscriptionPrompt
        | Keyboard::AdminMenu => return None,
    };
    Some(rows)
}

/// Rows of inline keys for keyboards that carry links or admin actions.
pub fn inline_layout(
    keyboard: Keyboard,
    terms_url: &str,
    required_channel: &str,
) -> Option<Vec<Vec<InlineKey>>> {
    let rows = match keyboard {
        Keyboard::TermsPrompt => vec![
            vec![InlineKey::url("📄 Open full text", terms_url)],
            vec![InlineKey::callback("✅ I accept the terms", Command::AcceptTerms)],
        ],
        Keyboard::SubscriptionPrompt => vec![
            vec![InlineKey::url(
                "📢 Subscribe to the channel",
                channel_url(required_channel),
            )],
            vec![InlineKey::callback("✅ I subscribed", Command::CheckSubscription)],
        ],
        Keyboard::AdminMenu => vec![
            vec![InlineKey::callback("📊 Statistics", Command::AdminStats)],
            vec![InlineKey::callback("👥 Users", Command::AdminUsers)],
            vec![InlineKey::callback("🚗 Active rides", Command::AdminRides)],
            vec![InlineKey::callback("📢 Broadcast", Command::AdminBroadcast)],
            vec![InlineKey::callback("🧹 Clean up", Command::AdminCleanup)],
            vec![InlineKey::callback("🚪 Exit", Command::Back)],
        ],
        _ => return None,
    };
    Some(rows)
}

pub fn channel_url(handle: &str) -> String {
    format!("https://t.me/{}", handle.trim_start_matches('@'))
}

/// Map typed text to a command: slash commands (with an optional
/// `@botname` suffix) and reply-keyboard labels.
pub fn parse_text(text: &str) -> Option<Command> {
    let text = text.trim();
    if let Some(slash) = text.strip_prefix('/') {
        let name = slash
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default();
        return match name {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            "terms" => Some(Command::Terms),
            "register" => Some(Command::Register),
            "role" => Some(Command::ChangeRole),
            "cancel" => Some(Command::Cancel),
            "admin" => Some(Command::Admin),
            "stats" => Some(Command::Stats),
            _ => None,
        };
    }

    let command = match text {
        DRIVER => Command::ChooseDriver,
        PASSENGER => Command::ChoosePassenger,
        HELP => Command::Help,
        CREATE_RIDE => Command::CreateRide,
        MY_RIDES => Command::MyRides,
        FIND_RIDE => Command::SearchRide,
        MY_SEARCHES => Command::MySearches,
        RELEVANT_RIDES => Command::RelevantRides,
        REGISTRATION => Command::Register,
        CHANGE_ROLE => Command::ChangeRole,
        BACK => Command::Back,
        CANCEL => Command::Cancel,
        _ => return None,
    };
    Some(command)
}

pub fn encode_callback(command: Command) -> String {
    match command {
        Command::Start => "start".into(),
        Command::Help => "help".into(),
        Command::Terms => "terms".into(),
        Command::AcceptTerms => "accept_terms".into(),
        Command::CheckSubscription => "check_subscription".into(),
        Command::Register => "register_for_contacts".into(),
        Command::ChooseDriver => "role_driver".into(),
        Command::ChoosePassenger => "role_passenger".into(),
        Command::ChangeRole => "change_role".into(),
        Command::CreateRide => "create_ride".into(),
        Command::MyRides => "my_rides".into(),
        Command::EndRide(id) => format!("end_ride_{id}"),
        Command::SearchRide => "search_ride".into(),
        Command::MySearches => "my_searches".into(),
        Command::RepeatSearch(id) => format!("repeat_search_{id}"),
        Command::RelevantRides => "refresh_relevant_rides".into(),
        Command::ContactDriver(id) => format!("contact_{id}"),
        Command::Cancel => "cancel".into(),
        Command::Back => "back".into(),
        Command::Admin => "admin_back".into(),
        Command::AdminStats => "admin_stats".into(),
        Command::AdminUsers => "admin_users".into(),
        Command::AdminRides => "admin_active_rides".into(),
        Command::AdminDeleteRide(id) => format!("admin_delete_ride_{id}"),
        Command::AdminBroadcast => "admin_broadcast".into(),
        Command::AdminConfirmBroadcast => "admin_confirm_broadcast".into(),
        Command::AdminCleanup => "admin_cleanup".into(),
        Command::Stats => "stats".into(),
    }
}

pub fn decode_callback(data: &str) -> Option<Command> {
    let with_id = |prefix: &str| data.strip_prefix(prefix)?.parse::<i64>().ok();

    if let Some(id) = with_id("admin_delete_ride_") {
        return Some(Command::AdminDeleteRide(id));
    }
    if let Some(id) = with_id("end_ride_") {
        return Some(Command::EndRide(id));
    }
    if let Some(id) = with_id("repeat_search_") {
        return Some(Command::RepeatSearch(id));
    }
    if let Some(id) = with_id("contact_") {
        return Some(Command::ContactDriver(id));
    }

    let command = match data {
        "start" => Command::Start,
        "help" => Command::Help,
        "terms" => Command::Terms,
        "accept_terms" => Command::AcceptTerms,
        "check_subscription" => Command::CheckSubscription,
        "register_for_contacts" => Command::Register,
        "role_driver" => Command::ChooseDriver,
        "role_passenger" => Command::ChoosePassenger,
        "change_role" => Command::ChangeRole,
        "create_ride" => Command::CreateRide,
        "my_rides" => Command::MyRides,
        "search_ride" => Command::SearchRide,
        "my_searches" => Command::MySearches,
        "refresh_relevant_rides" => Command::RelevantRides,
        "cancel" => Command::Cancel,
        "back" | "back_to_driver" | "back_to_passenger" | "admin_exit" => Command::Back,
        "admin_back" => Command::Admin,
        "admin_stats" => Command::AdminStats,
        "admin_users" => Command::AdminUsers,
        "admin_active_rides" => Command::AdminRides,
        "admin_broadcast" => Command::AdminBroadcast,
        "admin_confirm_broadcast" => Command::AdminConfirmBroadcast,
        "admin_cleanup" => Command::AdminCleanup,
        "stats" => Command::Stats,
        _ => return None,
    };
    Some(command)
}
