//! The session state machine: one inbound event in, one response out.
//!
//! Every event is processed with its session locked, so a user's events are
//! handled strictly one at a time. Guards run in a fixed order: chat type,
//! terms acceptance, admin privilege, channel subscription, then the
//! per-command role and registration checks inside each handler.

use std::collections::HashSet;
use std::sync::Arc;

use crate::channels::SubscriptionCheck;
use crate::config::BotConfig;
use crate::error::FlowError;
use crate::lifecycle::LifecycleSweeper;
use crate::matching::MatchEngine;
use crate::session::action::{Action, Command, InboundEvent};
use crate::session::input::{normalize_contact_phone, parse_phone};
use crate::session::prompts;
use crate::session::response::{Keyboard, Response};
use crate::session::state::{Flow, Role, Session};
use crate::session::store::SessionStore;
use crate::store::RecordStore;
use crate::store::model::User;

pub struct SessionMachine {
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) matcher: MatchEngine,
    pub(super) sweeper: Arc<LifecycleSweeper>,
    sessions: Arc<SessionStore>,
    subscription: Arc<dyn SubscriptionCheck>,
    admins: HashSet<i64>,
    terms_url: String,
    required_channel: String,
}

impl SessionMachine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        subscription: Arc<dyn SubscriptionCheck>,
        config: &BotConfig,
    ) -> Self {
        Self {
            matcher: MatchEngine::new(store.clone()),
            sweeper: Arc::new(LifecycleSweeper::new(store.clone())),
            store,
            sessions: Arc::new(SessionStore::new()),
            subscription,
            admins: config.admin_ids.clone(),
            terms_url: config.terms_url.clone(),
            required_channel: config.required_channel.clone(),
        }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn sweeper(&self) -> Arc<LifecycleSweeper> {
        self.sweeper.clone()
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    /// Process one event. `None` means the event is ignored (non-direct
    /// chats only).
    pub async fn handle(&self, event: &InboundEvent) -> Option<Response> {
        let handle = self.sessions.session(event.user_id).await;
        let mut session = handle.lock().await;
        session.touch();

        if !event.chat_is_direct {
            return match &event.action {
                Action::Command(cmd) if cmd.answers_in_groups() => {
                    Some(Response::text(prompts::DIRECT_ONLY))
                }
                _ => None,
            };
        }

        let response = match self.dispatch(event, &mut session).await {
            Ok(response) => response,
            Err(e) => self.render_error(e, event, &session),
        };
        tracing::debug!(user_id = event.user_id, flow = %session.flow, "Event handled");
        Some(response)
    }

    async fn dispatch(
        &self,
        event: &InboundEvent,
        session: &mut Session,
    ) -> Result<Response, FlowError> {
        let user = self.store.get_user(event.user_id).await;

        let accepted = user.as_ref().is_some_and(|u| u.accepted_terms);
        if !accepted && !self.terms_exempt(event, session) {
            return Ok(Response::new(prompts::TERMS_REQUIRED, Keyboard::TermsPrompt));
        }

        match &event.action {
            Action::Command(cmd) => self.run_command(*cmd, event, session, user).await,
            Action::Contact(phone) => {
                let phone = normalize_contact_phone(phone);
                self.complete_registration(event, session, user, phone).await
            }
            Action::Text(text) => self.handle_text(text, event, session, user).await,
        }
    }

    /// Actions allowed before the terms are accepted.
    fn terms_exempt(&self, event: &InboundEvent, session: &Session) -> bool {
        let admin = self.is_admin(event.user_id);
        let broadcasting = admin && matches!(session.flow, Flow::AdminBroadcast(_));
        match &event.action {
            Action::Command(cmd) => {
                cmd.bypasses_terms()
                    || (admin && cmd.is_admin_command())
                    || (broadcasting && matches!(cmd, Command::Cancel | Command::Back))
            }
            Action::Text(_) => broadcasting,
            Action::Contact(_) => false,
        }
    }

    async fn run_command(
        &self,
        cmd: Command,
        event: &InboundEvent,
        session: &mut Session,
        user: Option<User>,
    ) -> Result<Response, FlowError> {
        if cmd.is_admin_command() && !self.is_admin(event.user_id) {
            return Err(FlowError::Unauthorized(
                "This command is only available to administrators.".into(),
            ));
        }

        if cmd.needs_subscription() && !self.is_subscribed(event.user_id).await {
            return Ok(Response::new(
                prompts::subscription_required(&event.display_name),
                Keyboard::SubscriptionPrompt,
            ));
        }

        match cmd {
            Command::Start => {
                session.role = None;
                session.reset_flow();
                if !self.is_subscribed(event.user_id).await {
                    return Ok(Response::new(
                        prompts::subscription_required(&event.display_name),
                        Keyboard::SubscriptionPrompt,
                    ));
                }
                Ok(self.enter(event, session, user.as_ref()))
            }
            Command::CheckSubscription => {
                if !self.is_subscribed(event.user_id).await {
                    return Ok(Response::new(
                        prompts::STILL_NOT_SUBSCRIBED,
                        Keyboard::SubscriptionPrompt,
                    ));
                }
                session.reset_flow();
                Ok(self.enter(event, session, user.as_ref()))
            }
            Command::Help => Ok(Response::new(
                prompts::help(&self.required_channel),
                session.current_keyboard(),
            )),
            Command::Terms => {
                let accepted = user.as_ref().is_some_and(|u| u.accepted_terms);
                let keyboard = if accepted {
                    session.current_keyboard()
                } else {
                    Keyboard::TermsPrompt
                };
                Ok(Response::new(prompts::terms(&self.terms_url), keyboard))
            }
            Command::AcceptTerms => self.accept_terms(event, session, user.as_ref()).await,
            Command::Register => Ok(self.start_registration(session, user.as_ref())),
            Command::ChooseDriver => {
                session.role = Some(Role::Driver);
                session.reset_flow();
                let registered = user.as_ref().is_some_and(User::is_registered);
                Ok(Response::new(prompts::driver_menu(registered), Keyboard::DriverMenu))
            }
            Command::ChoosePassenger => {
                session.role = Some(Role::Passenger);
                session.reset_flow();
                Ok(Response::new(prompts::passenger_menu(), Keyboard::PassengerMenu))
            }
            Command::ChangeRole => {
                session.role = None;
                session.reset_flow();
                session.flow = Flow::RoleSelection;
                Ok(Response::new(prompts::CHOOSE_ROLE, Keyboard::RoleMenu))
            }
            Command::CreateRide => self.start_create_ride(session, user.as_ref()),
            Command::MyRides => self.my_rides(event, session, user.as_ref()).await,
            Command::EndRide(ride_id) => self.end_ride(event, ride_id).await,
            Command::SearchRide => self.start_search(session, user.as_ref()),
            Command::MySearches => self.my_searches(event, session).await,
            Command::RepeatSearch(search_id) => {
                self.repeat_search(event, session, user.as_ref(), search_id)
                    .await
            }
            Command::RelevantRides => self.relevant_rides(event, session, user.as_ref()).await,
            Command::ContactDriver(ride_id) => {
                self.contact_driver(session, user.as_ref(), ride_id).await
            }
            Command::Cancel => {
                session.reset_flow();
                Ok(Response::new(prompts::CANCELLED, session.menu_keyboard()))
            }
            Command::Back => {
                session.reset_flow();
                Ok(Response::new(
                    prompts::main_menu(session.role),
                    session.menu_keyboard(),
                ))
            }
            Command::Admin
            | Command::AdminStats
            | Command::AdminUsers
            | Command::AdminRides
            | Command::AdminDeleteRide(_)
            | Command::AdminBroadcast
            | Command::AdminConfirmBroadcast
            | Command::AdminCleanup
            | Command::Stats => self.run_admin(cmd, event, session).await,
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        event: &InboundEvent,
        session: &mut Session,
        user: Option<User>,
    ) -> Result<Response, FlowError> {
        match session.flow.clone() {
            Flow::Registration => {
                let phone = parse_phone(text)?;
                self.complete_registration(event, session, user, phone).await
            }
            Flow::CreateRide(step) => self.advance_create_ride(step, text, event, session).await,
            Flow::SearchRide(step) => {
                self.advance_search(step, text, event, session, user.as_ref())
                    .await
            }
            Flow::AdminBroadcast(_) => {
                if !self.is_admin(event.user_id) {
                    session.reset_flow();
                    return Err(FlowError::Unauthorized(
                        "Broadcasts are only available to administrators.".into(),
                    ));
                }
                Ok(self.compose_broadcast(text, session).await)
            }
            Flow::AwaitingTerms | Flow::Idle | Flow::RoleSelection => Ok(Response::new(
                prompts::idle_hint(session.role),
                session.menu_keyboard(),
            )),
        }
    }

    /// Landing point after subscription is confirmed: terms first, then role.
    fn enter(&self, event: &InboundEvent, session: &mut Session, user: Option<&User>) -> Response {
        if !user.is_some_and(|u| u.accepted_terms) {
            session.flow = Flow::AwaitingTerms;
            return Response::new(prompts::TERMS_PROMPT, Keyboard::TermsPrompt);
        }
        session.flow = Flow::RoleSelection;
        Response::new(prompts::welcome(&event.display_name), Keyboard::RoleMenu)
    }

    /// Fails open: a faulty check must not lock every user out.
    async fn is_subscribed(&self, user_id: i64) -> bool {
        match self.subscription.is_subscribed(user_id).await {
            Ok(subscribed) => subscribed,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Subscription check failed, treating as subscribed");
                true
            }
        }
    }

    fn render_error(&self, err: FlowError, event: &InboundEvent, session: &Session) -> Response {
        let keyboard = session.current_keyboard();
        match err {
            FlowError::Validation(e) => Response::new(prompts::retry(&e), keyboard),
            FlowError::NotFound { .. } => {
                tracing::debug!(user_id = event.user_id, error = %err, "Lookup missed");
                Response::new(format!("❌ {err}."), keyboard)
            }
            FlowError::Unauthorized(reason) => {
                tracing::info!(user_id = event.user_id, %reason, "Action rejected");
                Response::new(format!("❌ {reason}"), keyboard)
            }
            FlowError::Persistence(e) => {
                tracing::error!(
                    user_id = event.user_id,
                    flow = %session.flow,
                    error = %e,
                    "Store write failed"
                );
                Response::new(prompts::GENERIC_FAILURE, keyboard)
            }
        }
    }
}
