//! Per-user session record — role, active flow and the data it has
//! collected so far.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::session::response::Keyboard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Passenger,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver => write!(f, "driver"),
            Self::Passenger => write!(f, "passenger"),
        }
    }
}

/// Ride creation. Each step carries everything collected before it, so a
/// step can only be reached with its inputs present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CreateRideStep {
    From,
    To {
        from: String,
    },
    Date {
        from: String,
        to: String,
    },
    Time {
        from: String,
        to: String,
        date: String,
    },
    Seats {
        from: String,
        to: String,
        date: String,
        time: String,
    },
}

impl CreateRideStep {
    pub const TOTAL: usize = 5;

    /// 1-based position in the flow.
    pub fn number(&self) -> usize {
        match self {
            Self::From => 1,
            Self::To { .. } => 2,
            Self::Date { .. } => 3,
            Self::Time { .. } => 4,
            Self::Seats { .. } => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SearchStep {
    From,
    To { from: String },
    Date { from: String, to: String },
}

impl SearchStep {
    pub const TOTAL: usize = 3;

    pub fn number(&self) -> usize {
        match self {
            Self::From => 1,
            Self::To { .. } => 2,
            Self::Date { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BroadcastStep {
    Composing,
    Confirming { body: String },
}

/// The conversation the user is currently in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum Flow {
    #[default]
    Idle,
    AwaitingTerms,
    RoleSelection,
    Registration,
    CreateRide(CreateRideStep),
    SearchRide(SearchStep),
    AdminBroadcast(BroadcastStep),
}

impl Flow {
    /// Whether free text is consumed as flow input.
    pub fn collects_input(&self) -> bool {
        matches!(
            self,
            Self::Registration | Self::CreateRide(_) | Self::SearchRide(_) | Self::AdminBroadcast(_)
        )
    }

    /// Keyboard to keep showing while this flow waits for input.
    pub fn input_keyboard(&self) -> Option<Keyboard> {
        match self {
            Self::Registration => Some(Keyboard::RegistrationPrompt),
            Self::CreateRide(_) | Self::SearchRide(_) | Self::AdminBroadcast(_) => {
                Some(Keyboard::CancelPrompt)
            }
            Self::AwaitingTerms => Some(Keyboard::TermsPrompt),
            Self::Idle | Self::RoleSelection => None,
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingTerms => write!(f, "awaiting_terms"),
            Self::RoleSelection => write!(f, "role_selection"),
            Self::Registration => write!(f, "registration"),
            Self::CreateRide(step) => write!(f, "create_ride[{}/{}]", step.number(), CreateRideStep::TOTAL),
            Self::SearchRide(step) => write!(f, "search_ride[{}/{}]", step.number(), SearchStep::TOTAL),
            Self::AdminBroadcast(BroadcastStep::Composing) => write!(f, "admin_broadcast[composing]"),
            Self::AdminBroadcast(BroadcastStep::Confirming { .. }) => {
                write!(f, "admin_broadcast[confirming]")
            }
        }
    }
}

/// Ephemeral conversational state for one user.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Option<Role>,
    pub flow: Flow,
    /// An unregistered passenger started a search; offer registration with
    /// the results and return to the passenger menu once it completes.
    pub register_after_search: bool,
    pub last_activity: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            role: None,
            flow: Flow::Idle,
            register_after_search: false,
            last_activity: Instant::now(),
        }
    }
}

impl Session {
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Drop the in-progress flow and transient flags; the role survives.
    pub fn reset_flow(&mut self) {
        self.flow = Flow::Idle;
        self.register_after_search = false;
    }

    /// The role-appropriate idle menu.
    pub fn menu_keyboard(&self) -> Keyboard {
        match self.role {
            Some(Role::Driver) => Keyboard::DriverMenu,
            Some(Role::Passenger) => Keyboard::PassengerMenu,
            None => Keyboard::RoleMenu,
        }
    }

    /// Keyboard for the current flow, falling back to the idle menu.
    pub fn current_keyboard(&self) -> Keyboard {
        self.flow
            .input_keyboard()
            .unwrap_or_else(|| self.menu_keyboard())
    }
}
