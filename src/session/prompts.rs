//! User-facing text. Renderers take model values and return plain strings;
//! controls are attached by the caller.

use std::fmt::Write;

use crate::error::ValidationError;
use crate::matching::RelevantRide;
use crate::session::action::Command;
use crate::session::input::format_date_for_display;
use crate::session::response::Button;
use crate::session::state::{CreateRideStep, Role, SearchStep};
use crate::store::model::{DriverContact, Ride, SearchRecord, User};

const RULE: &str = "────────────────────";

pub const DIRECT_ONLY: &str = "🤖 I only work in direct messages. Write to me privately.";

pub const TERMS_PROMPT: &str = "📜 Please read the user agreement:";

pub const TERMS_REQUIRED: &str =
    "📜 You need to accept the user agreement before using the bot.";

pub const STILL_NOT_SUBSCRIBED: &str =
    "❌ You are not subscribed to the channel yet.\nSubscribe and press \"I subscribed\" again.";

pub const CHOOSE_ROLE: &str = "Choose your role:";

pub const REGISTER_PROMPT: &str = "📝 Registration\n\n\
    Press the button below to share your phone number.\n\
    Or send the number manually, for example 89123456789:";

pub const REGISTERED_AFTER_SEARCH: &str = "✅ Registration successful!\n\n\
    You can now use every passenger feature.\nTry again:";

pub const CONTACTS_NEED_REGISTRATION: &str = "📝 Driver contacts are only available to registered users.\n\n\
    Share your phone number with the button below, or press \"📞 Registration\":";

pub const REGISTER_FIRST: &str = "Register first! Press \"📞 Registration\".";

pub const NOT_YOUR_RIDE: &str = "You can only end your own rides.";

pub const CANCELLED: &str = "❌ Action cancelled.\nChoose an action:";

pub const GENERIC_FAILURE: &str = "❌ Something went wrong. Please try again.";

pub const NO_RIDES: &str = "🚗 My rides\n\n\
    You have no active rides yet.\nCreate one with \"🚗 Create ride\".";

pub const NO_SEARCHES: &str = "🔍 My searches\n\n\
    You have no saved searches yet.\nStart one with \"🔍 Find ride\".";

pub const NO_RELEVANT_RIDES: &str = "🚗 Relevant rides\n\n\
    No rides match your searches yet.\n\
    Search with \"🔍 Find ride\" first and matches will show up here!";

pub fn welcome(name: &str) -> String {
    format!("Hi, {name}! 👋\nI help drivers and passengers find each other.\n\n{CHOOSE_ROLE}")
}

pub fn subscription_required(name: &str) -> String {
    format!(
        "Hi, {name}! 👋\nI help drivers and passengers find each other.\n\n\
         To use the bot you need to subscribe to our channel.\n\n\
         Subscribe with the button below, then press \"I subscribed\"."
    )
}

pub fn terms_accepted(name: &str) -> String {
    format!("✅ Thank you for accepting the agreement, {name}!\n\n{CHOOSE_ROLE}")
}

pub fn terms(url: &str) -> String {
    format!(
        "📜 User agreement, key points:\n\n\
         • The bot only connects drivers and passengers; it does not organize rides.\n\
         • Users arrange payment and details between themselves.\n\
         • Your phone number is shown to other registered users you contact or who contact you.\n\
         • Be polite and careful when meeting other users.\n\n\
         Full text: {url}"
    )
}

pub fn help(required_channel: &str) -> String {
    let mut text = String::from(
        "📚 Help\n\n\
         👥 Roles:\n\
         • 🚗 Driver: creates rides and offers seats\n\
         • 👤 Passenger: searches for rides\n\n\
         🚗 Driver features (registration required):\n\
         • Create ride: offer a ride to others\n\
         • My rides: view and end your rides\n\n\
         👤 Passenger features:\n\
         • Find ride: search by route and date (no registration needed)\n\
         • My searches: your search history (registration required)\n\
         • Relevant rides: new rides matching your searches (registration required)\n\n\
         📱 Registration is required for drivers, for driver contacts and for search history.\n\n\
         📅 Dates use DD.MM.YYYY (for example: 31.12.2024)\n",
    );
    if !required_channel.is_empty() {
        let _ = write!(
            text,
            "\n📢 Required channel: {}\nYou must be subscribed to use the bot.\n",
            required_channel.trim_start_matches('@')
        );
    }
    text.push_str(
        "\nCommands:\n\
         • /start: start over\n\
         • /help: this help\n\
         • /role: choose a role\n\
         • /register: registration\n\
         • /terms: user agreement\n\
         • /cancel: cancel the current action",
    );
    text
}

pub fn driver_menu(registered: bool) -> String {
    if registered {
        "🚗 You are a driver.\nChoose an action:".to_string()
    } else {
        "🚗 You are a driver.\n\n\
         To create rides you need to register first: press \"📞 Registration\"."
            .to_string()
    }
}

pub fn passenger_menu() -> &'static str {
    "👤 You are a passenger.\nChoose an action:"
}

pub fn idle_hint(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Driver) => "Use the driver menu:",
        Some(Role::Passenger) => "Use the passenger menu:",
        None => CHOOSE_ROLE,
    }
}

pub fn main_menu(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Driver) => "Driver main menu:",
        Some(Role::Passenger) => "Passenger main menu:",
        None => CHOOSE_ROLE,
    }
}

pub fn already_registered(user: &User) -> String {
    format!(
        "✅ You are already registered!\n👤 Name: {}\n📱 Phone: {}\n\n\
         To change it, send a new phone number, for example 89123456789.",
        user.username,
        user.phone.as_deref().unwrap_or_default()
    )
}

pub fn registered(name: &str, phone: &str, role: Option<Role>) -> String {
    let role = role.map_or_else(|| "user".to_string(), |r| r.to_string());
    format!(
        "✅ Registration successful!\n👤 Name: {name}\n📱 Phone: {phone}\n👤 Role: {role}\n\n\
         You can now use every feature of the bot."
    )
}

/// Validation message followed by the re-prompt.
pub fn retry(err: &ValidationError) -> String {
    format!("{err}\nTry again:")
}

pub fn create_ride_step(step: &CreateRideStep) -> String {
    let n = step.number();
    let total = CreateRideStep::TOTAL;
    match step {
        CreateRideStep::From => {
            format!("🚗 Create ride\n\nStep {n}/{total}: Where are you leaving from?\nFor example: Moscow")
        }
        CreateRideStep::To { .. } => {
            format!("Step {n}/{total}: Where are you going?\nFor example: Saint Petersburg")
        }
        CreateRideStep::Date { .. } => {
            format!("Step {n}/{total}: Date of the ride?\nFormat: DD.MM.YYYY\nFor example: 31.12.2024")
        }
        CreateRideStep::Time { .. } => {
            format!("Step {n}/{total}: Departure time?\nFormat: HH:MM\nFor example: 14:30")
        }
        CreateRideStep::Seats { .. } => {
            format!("Step {n}/{total}: How many free seats?\nEnter a number from 1 to 10:")
        }
    }
}

pub fn search_step(step: &SearchStep) -> String {
    let n = step.number();
    let total = SearchStep::TOTAL;
    match step {
        SearchStep::From => {
            format!("🔍 Find ride\n\nStep {n}/{total}: Where are you leaving from?\nFor example: Moscow")
        }
        SearchStep::To { .. } => {
            format!("Step {n}/{total}: Where do you need to go?\nFor example: Saint Petersburg")
        }
        SearchStep::Date { .. } => {
            format!("Step {n}/{total}: On what date?\nFormat: DD.MM.YYYY\nFor example: 31.12.2024")
        }
    }
}

pub fn ride_created(ride: &Ride) -> String {
    format!(
        "✅ Ride created!\n\n📍 From: {}\n📍 To: {}\n📅 Date: {}\n🕒 Time: {}\n👥 Free seats: {}\n\n👤 Driver: {}",
        ride.from_location,
        ride.to_location,
        format_date_for_display(&ride.date),
        ride.time,
        ride.seats,
        ride.driver_username
    )
}

pub fn ride_ended(ride_id: i64) -> String {
    format!("✅ Ride #{ride_id} ended. It no longer shows up in searches.")
}

pub fn search_results(from: &str, to: &str, date: &str, rides: &[Ride]) -> String {
    let date = format_date_for_display(date);
    if rides.is_empty() {
        return format!(
            "🔍 Nothing found.\n📍 Route: {from} → {to}\n📅 Date: {date}\n\n\
             Try changing the search parameters."
        );
    }

    let mut text = format!(
        "🎯 Rides found: {}\n\n📍 Route: {from} → {to}\n📅 Date: {date}\n\n",
        rides.len()
    );
    for ride in rides {
        let _ = write!(
            text,
            "🚗 Ride #{}\n  📍 {} → {}\n  📅 {} at {}\n  👥 Free seats: {}\n  👤 Driver: {}\n\n",
            ride.id,
            ride.from_location,
            ride.to_location,
            format_date_for_display(&ride.date),
            ride.time,
            ride.seats,
            ride.driver_username
        );
    }
    text
}

pub const SEARCH_REGISTER_HINT: &str =
    "📱 Register to see driver contacts and keep your search history.";

/// One button per ride: driver contacts for registered users, a
/// registration shortcut otherwise.
pub fn contact_buttons<'a>(
    rides: impl IntoIterator<Item = &'a Ride>,
    registered: bool,
) -> Vec<Button> {
    rides
        .into_iter()
        .map(|ride| {
            if registered {
                Button::new(
                    format!("📞 Driver contacts #{}", ride.id),
                    Command::ContactDriver(ride.id),
                )
            } else {
                Button::new(
                    format!("📞 Register for contacts #{}", ride.id),
                    Command::Register,
                )
            }
        })
        .collect()
}

pub fn back_button() -> Button {
    Button::new("🔙 Back", Command::Back)
}

pub fn my_rides(rides: &[Ride]) -> String {
    let mut text = String::from("🚗 Your active rides:\n\n");
    for ride in rides {
        let _ = writeln!(
            text,
            "📍 Route: {} → {}\n📅 Date: {}\n🕒 Time: {}\n👥 Free seats: {}\n🆔 Ride ID: {}\n{RULE}",
            ride.from_location,
            ride.to_location,
            format_date_for_display(&ride.date),
            ride.time,
            ride.seats,
            ride.id
        );
    }
    text
}

pub fn end_ride_button(ride: &Ride) -> Button {
    Button::new(
        format!(
            "❌ End #{}: {}→{}",
            ride.id, ride.from_location, ride.to_location
        ),
        Command::EndRide(ride.id),
    )
}

pub fn my_searches(searches: &[SearchRecord]) -> String {
    let mut text = String::from("🔍 Your search history:\n\n");
    for search in searches {
        let _ = writeln!(
            text,
            "📍 Route: {} → {}\n📅 Ride date: {}\n🕒 Searched at: {}\n🆔 Search ID: {}\n{RULE}",
            search.from_location,
            search.to_location,
            format_date_for_display(&search.search_date),
            search.created_at.format("%H:%M"),
            search.id
        );
    }
    text
}

pub fn repeat_search_button(search: &SearchRecord) -> Button {
    Button::new(
        format!(
            "🔍 Repeat: {}→{} ({})",
            search.from_location,
            search.to_location,
            format_date_for_display(&search.search_date)
        ),
        Command::RepeatSearch(search.id),
    )
}

/// Rides grouped by the route of the search that surfaced them, in order of
/// first appearance.
pub fn relevant_rides(found: &[RelevantRide]) -> String {
    let mut groups: Vec<(&str, &str, &str, Vec<&Ride>)> = Vec::new();
    for item in found {
        let route = (
            item.search.from_location.as_str(),
            item.search.to_location.as_str(),
        );
        match groups.iter_mut().find(|g| (g.0, g.1) == route) {
            Some(group) => group.3.push(&item.ride),
            None => groups.push((route.0, route.1, item.search.date.as_str(), vec![&item.ride])),
        }
    }

    let mut text = String::from("🚗 Rides matching your searches:\n\n");
    for (from, to, searched, rides) in groups {
        let _ = write!(
            text,
            "📍 Route: {from} → {to}\n📅 Searched for: {}\n\n",
            format_date_for_display(searched)
        );
        for ride in rides {
            let _ = write!(
                text,
                "  🚗 Ride #{}\n    📅 {} at {}\n    👥 Free seats: {}\n    👤 Driver: {}\n    ──────────────────\n",
                ride.id,
                format_date_for_display(&ride.date),
                ride.time,
                ride.seats,
                ride.driver_username
            );
        }
        text.push('\n');
    }
    text
}

pub fn driver_contact(ride_id: i64, contact: &DriverContact) -> String {
    let phone = contact
        .phone
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("not provided");
    format!(
        "📞 Driver contacts for ride #{ride_id}:\n\n👤 Username: @{}\n📱 Phone: {phone}\n\n\
         Please be polite and careful when getting in touch.",
        contact.username
    )
}
