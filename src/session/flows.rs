//! Registration, ride creation and search flows, plus the driver and
//! passenger menu actions.

use crate::error::FlowError;
use crate::matching::DEFAULT_HISTORY_LIMIT;
use crate::session::action::{Command, InboundEvent};
use crate::session::input::{parse_date, parse_location, parse_seats, parse_time};
use crate::session::machine::SessionMachine;
use crate::session::prompts;
use crate::session::response::{Button, Keyboard, Response};
use crate::session::state::{CreateRideStep, Flow, Role, SearchStep, Session};
use crate::store::model::{Ride, User};

/// Entries shown by "my searches".
pub const MY_SEARCHES_LIMIT: usize = 10;
/// Searches offered as one-tap repeats.
pub const REPEAT_BUTTONS: usize = 3;

fn require_role(session: &Session, role: Role) -> Result<(), FlowError> {
    if session.role == Some(role) {
        Ok(())
    } else {
        Err(FlowError::Unauthorized(format!(
            "This action is only available to a {role}. Choose the role first."
        )))
    }
}

fn require_registered(user: Option<&User>) -> Result<&User, FlowError> {
    user.filter(|u| u.is_registered())
        .ok_or_else(|| FlowError::Unauthorized(prompts::REGISTER_FIRST.into()))
}

impl SessionMachine {
    pub(super) async fn accept_terms(
        &self,
        event: &InboundEvent,
        session: &mut Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        match user {
            Some(_) => self.store.set_accepted_terms(event.user_id, true).await?,
            None => {
                self.store
                    .upsert_user(event.user_id, &event.display_name, None, true)
                    .await?
            }
        }
        tracing::info!(user_id = event.user_id, "Terms accepted");

        session.reset_flow();
        session.flow = Flow::RoleSelection;
        Ok(Response::new(
            prompts::terms_accepted(&event.display_name),
            Keyboard::RoleMenu,
        ))
    }

    // ── Registration ────────────────────────────────────────────────

    pub(super) fn start_registration(&self, session: &mut Session, user: Option<&User>) -> Response {
        // register_after_search survives: registering from search results
        // should land back on the passenger menu.
        session.flow = Flow::Registration;
        let text = match user.filter(|u| u.is_registered()) {
            Some(user) => prompts::already_registered(user),
            None => prompts::REGISTER_PROMPT.to_string(),
        };
        Response::new(text, Keyboard::RegistrationPrompt)
    }

    /// Store the phone for this user. Reached from typed input in the
    /// registration flow or from a shared contact in any flow.
    pub(super) async fn complete_registration(
        &self,
        event: &InboundEvent,
        session: &mut Session,
        user: Option<User>,
        phone: String,
    ) -> Result<Response, FlowError> {
        let accepted = user.as_ref().is_none_or(|u| u.accepted_terms);
        self.store
            .upsert_user(event.user_id, &event.display_name, Some(&phone), accepted)
            .await?;
        tracing::info!(user_id = event.user_id, "User registered");

        if session.flow == Flow::Registration {
            session.flow = Flow::Idle;
        }

        let text = if session.register_after_search {
            session.register_after_search = false;
            session.role = Some(Role::Passenger);
            prompts::REGISTERED_AFTER_SEARCH.to_string()
        } else {
            prompts::registered(&event.display_name, &phone, session.role)
        };

        // A contact shared mid-flow leaves that flow waiting for its next input.
        let keyboard = if session.flow.collects_input() {
            session.current_keyboard()
        } else {
            session.menu_keyboard()
        };
        Ok(Response::new(text, keyboard))
    }

    // ── Driver ──────────────────────────────────────────────────────

    pub(super) fn start_create_ride(
        &self,
        session: &mut Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        require_role(session, Role::Driver)?;
        require_registered(user)?;

        session.reset_flow();
        let step = CreateRideStep::From;
        let prompt = prompts::create_ride_step(&step);
        session.flow = Flow::CreateRide(step);
        Ok(Response::new(prompt, Keyboard::CancelPrompt))
    }

    /// Consume one input for the current step. On any error the session is
    /// left untouched, so the same step is asked again.
    pub(super) async fn advance_create_ride(
        &self,
        step: CreateRideStep,
        text: &str,
        event: &InboundEvent,
        session: &mut Session,
    ) -> Result<Response, FlowError> {
        let next = match step {
            CreateRideStep::From => CreateRideStep::To {
                from: parse_location(text)?,
            },
            CreateRideStep::To { from } => CreateRideStep::Date {
                from,
                to: parse_location(text)?,
            },
            CreateRideStep::Date { from, to } => CreateRideStep::Time {
                from,
                to,
                date: parse_date(text)?,
            },
            CreateRideStep::Time { from, to, date } => CreateRideStep::Seats {
                from,
                to,
                date,
                time: parse_time(text)?,
            },
            CreateRideStep::Seats {
                from,
                to,
                date,
                time,
            } => {
                let seats = parse_seats(text)?;
                let ride_id = self
                    .store
                    .create_ride(event.user_id, &from, &to, &date, &time, seats)
                    .await?;
                tracing::info!(user_id = event.user_id, ride_id, "Ride created");
                session.reset_flow();

                let text = match self.store.get_ride(ride_id).await {
                    Some(ride) => prompts::ride_created(&ride),
                    None => format!("✅ Ride #{ride_id} created!"),
                };
                return Ok(Response::new(text, session.menu_keyboard()));
            }
        };

        let prompt = prompts::create_ride_step(&next);
        session.flow = Flow::CreateRide(next);
        Ok(Response::new(prompt, Keyboard::CancelPrompt))
    }

    pub(super) async fn my_rides(
        &self,
        event: &InboundEvent,
        session: &Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        require_role(session, Role::Driver)?;
        require_registered(user)?;

        let rides = self.store.list_active_rides_for_driver(event.user_id).await;
        if rides.is_empty() {
            return Ok(Response::new(prompts::NO_RIDES, Keyboard::DriverMenu));
        }

        Ok(Response::new(prompts::my_rides(&rides), Keyboard::DriverMenu)
            .with_buttons(rides.iter().map(prompts::end_ride_button))
            .with_button(prompts::back_button()))
    }

    pub(super) async fn end_ride(
        &self,
        event: &InboundEvent,
        ride_id: i64,
    ) -> Result<Response, FlowError> {
        let ride = self
            .store
            .get_ride(ride_id)
            .await
            .ok_or(FlowError::NotFound {
                entity: "Ride",
                id: ride_id,
            })?;
        if ride.driver_id != event.user_id {
            return Err(FlowError::Unauthorized(prompts::NOT_YOUR_RIDE.into()));
        }

        self.store.set_ride_active(ride_id, false).await?;
        tracing::info!(user_id = event.user_id, ride_id, "Ride ended by driver");
        Ok(Response::new(prompts::ride_ended(ride_id), Keyboard::DriverMenu))
    }

    // ── Passenger ───────────────────────────────────────────────────

    pub(super) fn start_search(
        &self,
        session: &mut Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        require_role(session, Role::Passenger)?;

        session.reset_flow();
        session.register_after_search = !user.is_some_and(User::is_registered);
        let step = SearchStep::From;
        let prompt = prompts::search_step(&step);
        session.flow = Flow::SearchRide(step);
        Ok(Response::new(prompt, Keyboard::CancelPrompt))
    }

    pub(super) async fn advance_search(
        &self,
        step: SearchStep,
        text: &str,
        event: &InboundEvent,
        session: &mut Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        let next = match step {
            SearchStep::From => SearchStep::To {
                from: parse_location(text)?,
            },
            SearchStep::To { from } => SearchStep::Date {
                from,
                to: parse_location(text)?,
            },
            SearchStep::Date { from, to } => {
                let date = parse_date(text)?;
                let rides = self.matcher.search_exact(&from, &to, &date).await;
                let registered = user.is_some_and(User::is_registered);

                if registered
                    && let Err(e) = self
                        .store
                        .record_search(event.user_id, &from, &to, &date)
                        .await
                {
                    tracing::warn!(user_id = event.user_id, error = %e, "Failed to record search");
                }
                tracing::info!(
                    user_id = event.user_id,
                    found = rides.len(),
                    "Search completed"
                );

                // The flag outlives the flow so a later registration lands
                // back on the passenger menu.
                session.flow = Flow::Idle;
                return Ok(search_response(&from, &to, &date, &rides, registered));
            }
        };

        let prompt = prompts::search_step(&next);
        session.flow = Flow::SearchRide(next);
        Ok(Response::new(prompt, Keyboard::CancelPrompt))
    }

    pub(super) async fn my_searches(
        &self,
        event: &InboundEvent,
        session: &Session,
    ) -> Result<Response, FlowError> {
        require_role(session, Role::Passenger)?;

        let searches = self
            .store
            .list_recent_searches(event.user_id, MY_SEARCHES_LIMIT)
            .await;
        if searches.is_empty() {
            return Ok(Response::new(prompts::NO_SEARCHES, Keyboard::PassengerMenu));
        }

        Ok(
            Response::new(prompts::my_searches(&searches), Keyboard::PassengerMenu)
                .with_buttons(
                    searches
                        .iter()
                        .take(REPEAT_BUTTONS)
                        .map(prompts::repeat_search_button),
                )
                .with_button(prompts::back_button()),
        )
    }

    /// Re-run a stored search. Does not append to history.
    pub(super) async fn repeat_search(
        &self,
        event: &InboundEvent,
        session: &Session,
        user: Option<&User>,
        search_id: i64,
    ) -> Result<Response, FlowError> {
        let search = self
            .store
            .get_search(search_id, event.user_id)
            .await
            .ok_or(FlowError::NotFound {
                entity: "Search",
                id: search_id,
            })?;

        let rides = self
            .matcher
            .search_exact(&search.from_location, &search.to_location, &search.search_date)
            .await;
        let registered = user.is_some_and(User::is_registered);
        let mut response = search_response(
            &search.from_location,
            &search.to_location,
            &search.search_date,
            &rides,
            registered,
        );
        response.keyboard = session.menu_keyboard();
        Ok(response)
    }

    pub(super) async fn relevant_rides(
        &self,
        event: &InboundEvent,
        session: &Session,
        user: Option<&User>,
    ) -> Result<Response, FlowError> {
        require_role(session, Role::Passenger)?;

        let found = self
            .matcher
            .relevant_for_passenger(event.user_id, DEFAULT_HISTORY_LIMIT)
            .await;
        if found.is_empty() {
            return Ok(Response::new(
                prompts::NO_RELEVANT_RIDES,
                Keyboard::PassengerMenu,
            ));
        }

        let registered = user.is_some_and(User::is_registered);
        Ok(
            Response::new(prompts::relevant_rides(&found), Keyboard::PassengerMenu)
                .with_buttons(prompts::contact_buttons(
                    found.iter().map(|r| &r.ride),
                    registered,
                ))
                .with_button(Button::new("🔄 Refresh", Command::RelevantRides))
                .with_button(prompts::back_button()),
        )
    }

    pub(super) async fn contact_driver(
        &self,
        session: &Session,
        user: Option<&User>,
        ride_id: i64,
    ) -> Result<Response, FlowError> {
        if !user.is_some_and(User::is_registered) {
            return Ok(Response::new(
                prompts::CONTACTS_NEED_REGISTRATION,
                Keyboard::RegistrationPrompt,
            ));
        }

        let contact = self
            .store
            .get_driver_contact(ride_id)
            .await
            .ok_or(FlowError::NotFound {
                entity: "Ride",
                id: ride_id,
            })?;
        Ok(Response::new(
            prompts::driver_contact(ride_id, &contact),
            session.current_keyboard(),
        ))
    }
}

fn search_response(from: &str, to: &str, date: &str, rides: &[Ride], registered: bool) -> Response {
    let mut text = prompts::search_results(from, to, date, rides);
    if !registered && !rides.is_empty() {
        text.push_str("\n\n");
        text.push_str(prompts::SEARCH_REGISTER_HINT);
    }
    Response::new(text, Keyboard::PassengerMenu)
        .with_buttons(prompts::contact_buttons(rides, registered))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::channels::AlwaysSubscribed;
    use crate::config::BotConfig;
    use crate::error::DatabaseError;
    use crate::session::action::Action;
    use crate::store::model::{DriverContact, SearchRecord, SearchTriple, Stats};
    use crate::store::{LibSqlBackend, RecordStore};

    const DRIVER: i64 = 10;
    const PASSENGER: i64 = 20;

    async fn setup() -> (SessionMachine, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store.upsert_user(DRIVER, "ivan", Some("79001112233"), true).await.unwrap();
        store.upsert_user(PASSENGER, "anna", Some("79004445566"), true).await.unwrap();
        let machine = SessionMachine::new(store.clone(), Arc::new(AlwaysSubscribed), &BotConfig::default());
        (machine, store)
    }

    async fn cmd(m: &SessionMachine, user_id: i64, command: Command) -> Response {
        m.handle(&InboundEvent::command(user_id, "u", command)).await.unwrap()
    }

    async fn say(m: &SessionMachine, user_id: i64, text: &str) -> Response {
        m.handle(&InboundEvent::text(user_id, "u", text)).await.unwrap()
    }

    async fn flow(m: &SessionMachine, user_id: i64) -> Flow {
        m.sessions().session(user_id).await.lock().await.flow.clone()
    }

    async fn create_ride(m: &SessionMachine, date: &str) -> Response {
        cmd(m, DRIVER, Command::ChooseDriver).await;
        cmd(m, DRIVER, Command::CreateRide).await;
        for input in ["Moscow", "Kazan", date, "9:30"] {
            say(m, DRIVER, input).await;
        }
        say(m, DRIVER, "3").await
    }

    #[tokio::test]
    async fn invalid_input_repeats_the_same_step() {
        let (m, _) = setup().await;
        cmd(&m, DRIVER, Command::ChooseDriver).await;
        cmd(&m, DRIVER, Command::CreateRide).await;
        say(&m, DRIVER, "Moscow").await;
        say(&m, DRIVER, "Kazan").await;
        let before = flow(&m, DRIVER).await;

        let r = say(&m, DRIVER, "31.02.2030").await;
        assert!(r.text.contains("Invalid day"));
        assert!(r.text.ends_with("Try again:"));
        assert_eq!(r.keyboard, Keyboard::CancelPrompt);
        assert_eq!(flow(&m, DRIVER).await, before);

        say(&m, DRIVER, "28.02.2030").await;
        let r = say(&m, DRIVER, "25:00").await;
        assert!(r.text.contains("Invalid time"));
        assert!(matches!(
            flow(&m, DRIVER).await,
            Flow::CreateRide(CreateRideStep::Time { .. })
        ));
    }

    #[tokio::test]
    async fn completed_ride_is_stored_with_normalized_fields() {
        let (m, store) = setup().await;
        let r = create_ride(&m, "5.1.2030").await;
        assert!(r.text.contains("Ride created"));
        assert!(r.text.contains("05.01.2030"));
        assert_eq!(r.keyboard, Keyboard::DriverMenu);
        assert_eq!(flow(&m, DRIVER).await, Flow::Idle);

        let rides = store.list_active_rides_for_driver(DRIVER).await;
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].date, "2030-01-05");
        assert_eq!(rides[0].time, "09:30");
        assert_eq!(rides[0].driver_username, "ivan");
    }

    #[tokio::test]
    async fn my_rides_lists_end_buttons() {
        let (m, _) = setup().await;
        create_ride(&m, "01.01.2030").await;
        let r = cmd(&m, DRIVER, Command::MyRides).await;
        assert_eq!(r.buttons.len(), 2);
        assert!(matches!(r.buttons[0].command, Command::EndRide(_)));
        assert_eq!(r.buttons[1].command, Command::Back);
    }

    #[tokio::test]
    async fn only_owner_can_end_ride() {
        let (m, store) = setup().await;
        create_ride(&m, "01.01.2030").await;
        let ride_id = store.list_active_rides_for_driver(DRIVER).await[0].id;

        let r = cmd(&m, PASSENGER, Command::EndRide(ride_id)).await;
        assert!(r.text.contains("your own rides"));
        assert!(store.get_ride(ride_id).await.unwrap().is_active);

        let r = cmd(&m, DRIVER, Command::EndRide(999)).await;
        assert!(r.text.contains("Ride #999 not found"));

        cmd(&m, DRIVER, Command::EndRide(ride_id)).await;
        assert!(!store.get_ride(ride_id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn registered_search_is_recorded_and_offers_contacts() {
        let (m, store) = setup().await;
        create_ride(&m, "01.01.2030").await;

        cmd(&m, PASSENGER, Command::ChoosePassenger).await;
        cmd(&m, PASSENGER, Command::SearchRide).await;
        say(&m, PASSENGER, "Moscow").await;
        say(&m, PASSENGER, "Kazan").await;
        let r = say(&m, PASSENGER, "01.01.2030").await;

        assert!(r.text.contains("Rides found: 1"));
        assert!(matches!(r.buttons[0].command, Command::ContactDriver(_)));
        assert_eq!(flow(&m, PASSENGER).await, Flow::Idle);
        assert_eq!(store.list_recent_searches(PASSENGER, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_search_is_not_recorded_and_returns_after_registration() {
        let (m, store) = setup().await;
        store.upsert_user(30, "guest", None, true).await.unwrap();
        create_ride(&m, "01.01.2030").await;

        cmd(&m, 30, Command::ChoosePassenger).await;
        cmd(&m, 30, Command::SearchRide).await;
        say(&m, 30, "Moscow").await;
        say(&m, 30, "Kazan").await;
        let r = say(&m, 30, "01.01.2030").await;
        assert!(r.buttons.iter().all(|b| b.command == Command::Register));
        assert!(store.list_recent_searches(30, 10).await.is_empty());

        cmd(&m, 30, Command::Register).await;
        let r = say(&m, 30, "89123456789").await;
        assert_eq!(r.text, prompts::REGISTERED_AFTER_SEARCH);
        assert_eq!(r.keyboard, Keyboard::PassengerMenu);
        let session = m.sessions().session(30).await;
        assert!(!session.lock().await.register_after_search);
    }

    #[tokio::test]
    async fn contact_requires_registration() {
        let (m, store) = setup().await;
        store.upsert_user(30, "guest", None, true).await.unwrap();
        create_ride(&m, "01.01.2030").await;
        let ride_id = store.list_active_rides_for_driver(DRIVER).await[0].id;

        let r = cmd(&m, 30, Command::ContactDriver(ride_id)).await;
        assert_eq!(r.keyboard, Keyboard::RegistrationPrompt);

        let r = cmd(&m, PASSENGER, Command::ContactDriver(ride_id)).await;
        assert!(r.text.contains("@ivan"));
        assert!(r.text.contains("79001112233"));

        let r = cmd(&m, PASSENGER, Command::ContactDriver(424242)).await;
        assert!(r.text.contains("not found"));
    }

    #[tokio::test]
    async fn history_and_repeat() {
        let (m, store) = setup().await;
        for date in ["2030-01-01", "2030-01-02", "2030-01-03", "2030-01-04"] {
            store.record_search(PASSENGER, "Moscow", "Kazan", date).await.unwrap();
        }
        cmd(&m, PASSENGER, Command::ChoosePassenger).await;

        let r = cmd(&m, PASSENGER, Command::MySearches).await;
        assert_eq!(r.buttons.len(), REPEAT_BUTTONS + 1);
        let Command::RepeatSearch(latest) = r.buttons[0].command else {
            panic!("expected a repeat button");
        };
        assert!(r.buttons[0].label.contains("04.01.2030"));

        let r = cmd(&m, PASSENGER, Command::RepeatSearch(latest)).await;
        assert!(r.text.contains("Nothing found"));
        assert_eq!(store.list_recent_searches(PASSENGER, 10).await.len(), 4);

        let r = cmd(&m, DRIVER, Command::RepeatSearch(latest)).await;
        assert!(r.text.contains("Search #"));
    }

    #[tokio::test]
    async fn relevant_rides_surface_later_rides() {
        let (m, store) = setup().await;
        store.record_search(PASSENGER, "Moscow", "Kazan", "2030-01-01").await.unwrap();
        cmd(&m, PASSENGER, Command::ChoosePassenger).await;

        let r = cmd(&m, PASSENGER, Command::RelevantRides).await;
        assert_eq!(r.text, prompts::NO_RELEVANT_RIDES);

        create_ride(&m, "01.01.2030").await;
        let r = cmd(&m, PASSENGER, Command::RelevantRides).await;
        assert!(r.text.contains("Route: Moscow → Kazan"));
        let labels: Vec<_> = r.buttons.iter().map(|b| b.command).collect();
        assert!(matches!(labels[0], Command::ContactDriver(_)));
        assert!(labels.contains(&Command::RelevantRides));
    }

    #[tokio::test]
    async fn passenger_actions_need_passenger_role() {
        let (m, _) = setup().await;
        cmd(&m, DRIVER, Command::ChooseDriver).await;
        let r = cmd(&m, DRIVER, Command::SearchRide).await;
        assert!(r.text.contains("passenger"));
        assert_eq!(flow(&m, DRIVER).await, Flow::Idle);
    }

    /// Delegates to a real store but fails the next `create_ride` on demand.
    struct FlakyStore {
        inner: Arc<dyn RecordStore>,
        fail_next_ride: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }
        async fn upsert_user(
            &self,
            user_id: i64,
            username: &str,
            phone: Option<&str>,
            accepted_terms: bool,
        ) -> Result<(), DatabaseError> {
            self.inner.upsert_user(user_id, username, phone, accepted_terms).await
        }
        async fn set_accepted_terms(&self, user_id: i64, accepted: bool) -> Result<(), DatabaseError> {
            self.inner.set_accepted_terms(user_id, accepted).await
        }
        async fn get_user(&self, user_id: i64) -> Option<User> {
            self.inner.get_user(user_id).await
        }
        async fn list_all_users(&self) -> Vec<User> {
            self.inner.list_all_users().await
        }
        async fn create_ride(
            &self,
            driver_id: i64,
            from: &str,
            to: &str,
            date: &str,
            time: &str,
            seats: i64,
        ) -> Result<i64, DatabaseError> {
            if self.fail_next_ride.swap(false, Ordering::SeqCst) {
                return Err(DatabaseError::Query("database is locked".into()));
            }
            self.inner.create_ride(driver_id, from, to, date, time, seats).await
        }
        async fn get_ride(&self, ride_id: i64) -> Option<Ride> {
            self.inner.get_ride(ride_id).await
        }
        async fn list_active_rides_for_driver(&self, driver_id: i64) -> Vec<Ride> {
            self.inner.list_active_rides_for_driver(driver_id).await
        }
        async fn list_all_active_rides(&self) -> Vec<Ride> {
            self.inner.list_all_active_rides().await
        }
        async fn set_ride_active(&self, ride_id: i64, active: bool) -> Result<bool, DatabaseError> {
            self.inner.set_ride_active(ride_id, active).await
        }
        async fn delete_ride(&self, ride_id: i64) -> Result<bool, DatabaseError> {
            self.inner.delete_ride(ride_id).await
        }
        async fn get_driver_contact(&self, ride_id: i64) -> Option<DriverContact> {
            self.inner.get_driver_contact(ride_id).await
        }
        async fn find_open_rides(&self, from: &str, to: &str, date: &str) -> Vec<Ride> {
            self.inner.find_open_rides(from, to, date).await
        }
        async fn expire_rides_before(
            &self,
            today: NaiveDate,
            now: NaiveDateTime,
        ) -> Result<usize, DatabaseError> {
            self.inner.expire_rides_before(today, now).await
        }
        async fn purge_inactive_created_before(
            &self,
            cutoff: NaiveDateTime,
        ) -> Result<usize, DatabaseError> {
            self.inner.purge_inactive_created_before(cutoff).await
        }
        async fn record_search(
            &self,
            passenger_id: i64,
            from: &str,
            to: &str,
            date: &str,
        ) -> Result<i64, DatabaseError> {
            self.inner.record_search(passenger_id, from, to, date).await
        }
        async fn list_recent_searches(&self, passenger_id: i64, limit: usize) -> Vec<SearchRecord> {
            self.inner.list_recent_searches(passenger_id, limit).await
        }
        async fn get_search(&self, search_id: i64, passenger_id: i64) -> Option<SearchRecord> {
            self.inner.get_search(search_id, passenger_id).await
        }
        async fn list_recent_search_triples(
            &self,
            passenger_id: i64,
            limit: usize,
        ) -> Vec<SearchTriple> {
            self.inner.list_recent_search_triples(passenger_id, limit).await
        }
        async fn stats(&self) -> Stats {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn failed_ride_insert_keeps_seats_step_for_retry() {
        let (_, inner) = setup().await;
        let flaky = Arc::new(FlakyStore {
            inner: inner.clone(),
            fail_next_ride: AtomicBool::new(false),
        });
        let m = SessionMachine::new(flaky.clone(), Arc::new(AlwaysSubscribed), &BotConfig::default());

        cmd(&m, DRIVER, Command::ChooseDriver).await;
        cmd(&m, DRIVER, Command::CreateRide).await;
        for input in ["Moscow", "Kazan", "01.01.2030", "09:30"] {
            say(&m, DRIVER, input).await;
        }

        flaky.fail_next_ride.store(true, Ordering::SeqCst);
        let r = say(&m, DRIVER, "4").await;
        assert_eq!(r.text, prompts::GENERIC_FAILURE);
        assert_eq!(r.keyboard, Keyboard::CancelPrompt);
        assert!(matches!(
            flow(&m, DRIVER).await,
            Flow::CreateRide(CreateRideStep::Seats { .. })
        ));
        assert!(inner.list_active_rides_for_driver(DRIVER).await.is_empty());

        let r = say(&m, DRIVER, "4").await;
        assert!(r.text.contains("Ride created"));
        assert_eq!(flow(&m, DRIVER).await, Flow::Idle);
        let rides = inner.list_active_rides_for_driver(DRIVER).await;
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].seats, 4);
    }

    #[tokio::test]
    async fn contact_mid_flow_keeps_flow_keyboard() {
        let (m, store) = setup().await;
        cmd(&m, DRIVER, Command::ChooseDriver).await;
        cmd(&m, DRIVER, Command::CreateRide).await;
        say(&m, DRIVER, "Moscow").await;

        let contact = InboundEvent::direct(DRIVER, "ivan", Action::Contact("+79009998877".into()));
        let r = m.handle(&contact).await.unwrap();
        assert_eq!(r.keyboard, Keyboard::CancelPrompt);
        assert!(matches!(
            flow(&m, DRIVER).await,
            Flow::CreateRide(CreateRideStep::To { .. })
        ));
        assert_eq!(
            store.get_user(DRIVER).await.unwrap().phone.as_deref(),
            Some("79009998877")
        );

        say(&m, DRIVER, "Kazan").await;
        assert!(matches!(
            flow(&m, DRIVER).await,
            Flow::CreateRide(CreateRideStep::Date { .. })
        ));
    }

    #[tokio::test]
    async fn contact_while_idle_shows_role_menu() {
        let (m, _) = setup().await;
        cmd(&m, PASSENGER, Command::ChoosePassenger).await;
        let contact = InboundEvent::direct(PASSENGER, "anna", Action::Contact("89004445566".into()));
        let r = m.handle(&contact).await.unwrap();
        assert!(r.text.contains("Registration successful"));
        assert_eq!(r.keyboard, Keyboard::PassengerMenu);
    }
}
