//! Administrative surface. Privilege is checked by the machine before any
//! handler here runs.

use std::fmt::Write;

use crate::error::FlowError;
use crate::session::action::{Command, InboundEvent};
use crate::session::input::format_date_for_display;
use crate::session::machine::SessionMachine;
use crate::session::response::{BroadcastReport, BroadcastRequest, Button, Keyboard, Response};
use crate::session::state::{BroadcastStep, Flow, Session};
use crate::store::model::{Stats, User};

pub const RECENT_USERS: usize = 5;
pub const USER_LIST_LIMIT: usize = 50;
pub const RIDE_LIST_LIMIT: usize = 30;
pub const DELETE_BUTTONS: usize = 5;
pub const PREVIEW_CHARS: usize = 500;

pub const BROADCAST_HEADER: &str = "📢 MESSAGE FROM ADMINISTRATION:\n\n";

const PANEL: &str = "👑 Admin panel\n\nChoose an action:";
const RULE: &str = "──────────────────────────────";

fn back_to_panel() -> Button {
    Button::new("🔙 Back", Command::Admin)
}

fn user_markers(user: &User) -> (&'static str, &'static str) {
    (
        if user.accepted_terms { "✅" } else { "❌" },
        if user.is_registered() { "📱" } else { "❌" },
    )
}

fn render_stats(stats: &Stats, recent: &[User]) -> String {
    let mut text = format!(
        "📊 Bot statistics\n\n\
         👥 Users: {}\n\
         📱 Registered: {}\n\
         📜 Accepted terms: {}\n\n\
         🚗 Active rides: {}\n\
         🚗 Rides total: {}\n\
         🧑‍✈️ Active drivers: {}\n\n\
         🔍 Searches: {}\n\
         🔍 Unique searchers: {}\n",
        stats.total_users,
        stats.registered_users,
        stats.accepted_terms,
        stats.active_rides,
        stats.total_rides,
        stats.active_drivers,
        stats.total_searches,
        stats.unique_searchers,
    );
    if !recent.is_empty() {
        text.push_str("\nRecent users:\n");
        for user in recent {
            let (terms, phone) = user_markers(user);
            let _ = writeln!(
                text,
                "• {terms} {phone} ID: {}, Name: {}",
                user.user_id, user.username
            );
        }
    }
    text
}

impl SessionMachine {
    pub(super) async fn run_admin(
        &self,
        cmd: Command,
        event: &InboundEvent,
        session: &mut Session,
    ) -> Result<Response, FlowError> {
        match cmd {
            Command::Admin => Ok(Response::new(PANEL, Keyboard::AdminMenu)),
            Command::AdminStats | Command::Stats => Ok(self.admin_stats().await),
            Command::AdminUsers => Ok(self.admin_users().await),
            Command::AdminRides => Ok(self.admin_rides(None).await),
            Command::AdminDeleteRide(ride_id) => self.admin_delete_ride(event, ride_id).await,
            Command::AdminCleanup => {
                let report = self.sweeper.run_once().await?;
                tracing::info!(
                    user_id = event.user_id,
                    expired = report.expired,
                    purged = report.purged,
                    "Manual cleanup"
                );
                Ok(Response::new(
                    format!(
                        "✅ Cleanup complete\n\n• Expired rides deactivated: {}\n• Old inactive rides deleted: {}",
                        report.expired, report.purged
                    ),
                    Keyboard::None,
                )
                .with_button(Button::new("🔄 Run again", Command::AdminCleanup))
                .with_button(back_to_panel()))
            }
            Command::AdminBroadcast => {
                session.reset_flow();
                session.flow = Flow::AdminBroadcast(BroadcastStep::Composing);
                Ok(Response::new(
                    "📢 Broadcast\n\nSend the message to deliver to every user:",
                    Keyboard::CancelPrompt,
                ))
            }
            Command::AdminConfirmBroadcast => Ok(self.confirm_broadcast(event, session).await),
            _ => Err(FlowError::Unauthorized(format!(
                "{cmd:?} is not an admin command."
            ))),
        }
    }

    async fn admin_stats(&self) -> Response {
        let stats = self.store.stats().await;
        let users = self.store.list_all_users().await;
        let recent = &users[..users.len().min(RECENT_USERS)];
        Response::new(render_stats(&stats, recent), Keyboard::None)
            .with_button(Button::new("🔄 Refresh", Command::AdminStats))
            .with_button(back_to_panel())
    }

    async fn admin_users(&self) -> Response {
        let users = self.store.list_all_users().await;
        if users.is_empty() {
            return Response::new("❌ There are no users yet.", Keyboard::None)
                .with_button(back_to_panel());
        }

        let mut text = String::from("👥 All users:\n\n");
        for user in users.iter().take(USER_LIST_LIMIT) {
            let (terms, _) = user_markers(user);
            let _ = writeln!(
                text,
                "{terms} ID: {}\nName: {}\nPhone: {}",
                user.user_id,
                user.username,
                user.phone.as_deref().unwrap_or("none")
            );
            if let Some(at) = user.accepted_at {
                let _ = writeln!(text, "Accepted: {}", at.format("%Y-%m-%d"));
            }
            let _ = writeln!(text, "{RULE}");
        }
        if users.len() > USER_LIST_LIMIT {
            let _ = write!(text, "\n... and {} more", users.len() - USER_LIST_LIMIT);
        }

        Response::new(text, Keyboard::None)
            .with_button(Button::new("🔄 Refresh", Command::AdminUsers))
            .with_button(back_to_panel())
    }

    async fn admin_rides(&self, notice: Option<String>) -> Response {
        let rides = self.store.list_all_active_rides().await;
        let mut text = notice.map(|n| format!("{n}\n\n")).unwrap_or_default();
        if rides.is_empty() {
            text.push_str("🚗 No active rides.");
            return Response::new(text, Keyboard::None).with_button(back_to_panel());
        }

        text.push_str("🚗 All active rides:\n\n");
        for ride in rides.iter().take(RIDE_LIST_LIMIT) {
            let _ = writeln!(
                text,
                "📍 Ride #{}\nRoute: {} → {}\nDate: {} at {}\nSeats: {}\nDriver: {} (ID: {})\nCreated: {}\n{RULE}",
                ride.id,
                ride.from_location,
                ride.to_location,
                format_date_for_display(&ride.date),
                ride.time,
                ride.seats,
                ride.driver_username,
                ride.driver_id,
                ride.created_at.format("%Y-%m-%d %H:%M"),
            );
        }
        if rides.len() > RIDE_LIST_LIMIT {
            let _ = write!(text, "\n... and {} more", rides.len() - RIDE_LIST_LIMIT);
        }

        Response::new(text, Keyboard::None)
            .with_buttons(rides.iter().take(DELETE_BUTTONS).map(|ride| {
                Button::new(
                    format!("🗑️ Delete #{}", ride.id),
                    Command::AdminDeleteRide(ride.id),
                )
            }))
            .with_button(Button::new("🔄 Refresh", Command::AdminRides))
            .with_button(back_to_panel())
    }

    async fn admin_delete_ride(
        &self,
        event: &InboundEvent,
        ride_id: i64,
    ) -> Result<Response, FlowError> {
        if !self.store.delete_ride(ride_id).await? {
            return Err(FlowError::NotFound {
                entity: "Ride",
                id: ride_id,
            });
        }
        tracing::info!(user_id = event.user_id, ride_id, "Ride deleted by admin");
        Ok(self
            .admin_rides(Some(format!("✅ Ride #{ride_id} deleted")))
            .await)
    }

    /// Admin text while a broadcast is open: (re)stage the body and ask for
    /// confirmation.
    pub(super) async fn compose_broadcast(&self, text: &str, session: &mut Session) -> Response {
        let body = text.trim().to_string();
        if body.is_empty() {
            return Response::new("❌ The message is empty. Send the broadcast text:", Keyboard::CancelPrompt);
        }

        let recipients = self.store.list_all_users().await.len();
        let preview: String = body.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if body.chars().count() > PREVIEW_CHARS { "..." } else { "" };
        session.flow = Flow::AdminBroadcast(BroadcastStep::Confirming { body });

        Response::new(
            format!(
                "📢 Broadcast preview\n\nRecipients: {recipients}\n\n{preview}{ellipsis}\n\nSend it?"
            ),
            Keyboard::CancelPrompt,
        )
        .with_button(Button::new("✅ Send", Command::AdminConfirmBroadcast))
        .with_button(Button::new("❌ Cancel", Command::Cancel))
    }

    async fn confirm_broadcast(&self, event: &InboundEvent, session: &mut Session) -> Response {
        let Flow::AdminBroadcast(BroadcastStep::Confirming { body }) = &session.flow else {
            return Response::new("❌ There is no broadcast to send.", Keyboard::AdminMenu);
        };

        let recipients: Vec<i64> = self
            .store
            .list_all_users()
            .await
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        let request = BroadcastRequest {
            admin_id: event.user_id,
            recipients,
            body: format!("{BROADCAST_HEADER}{body}"),
        };
        tracing::info!(
            user_id = event.user_id,
            recipients = request.recipients.len(),
            "Broadcast confirmed"
        );

        session.reset_flow();
        Response::new(
            format!(
                "⏳ Sending the broadcast to {} users...",
                request.recipients.len()
            ),
            Keyboard::AdminMenu,
        )
        .with_broadcast(request)
    }

    /// Summary shown to the admin once the transport has delivered a
    /// broadcast.
    pub fn broadcast_finished(&self, report: BroadcastReport) -> Response {
        tracing::info!(
            total = report.total,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast finished"
        );
        Response::new(
            format!(
                "✅ Broadcast complete\n\n• Users total: {}\n• Delivered: {}\n• Failed: {}",
                report.total, report.delivered, report.failed
            ),
            Keyboard::AdminMenu,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channels::AlwaysSubscribed;
    use crate::config::BotConfig;
    use crate::store::{LibSqlBackend, RecordStore};

    const ADMIN: i64 = 1;

    async fn setup() -> (SessionMachine, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut config = BotConfig::default();
        config.admin_ids.insert(ADMIN);
        let machine = SessionMachine::new(store.clone(), Arc::new(AlwaysSubscribed), &config);
        (machine, store)
    }

    async fn cmd(m: &SessionMachine, command: Command) -> Response {
        m.handle(&InboundEvent::command(ADMIN, "root", command)).await.unwrap()
    }

    #[tokio::test]
    async fn stats_lists_recent_users_with_markers() {
        let (m, store) = setup().await;
        for id in 10..17 {
            store.upsert_user(id, &format!("user{id}"), None, id % 2 == 0).await.unwrap();
        }
        store.upsert_user(20, "phoned", Some("79123456789"), true).await.unwrap();

        let r = cmd(&m, Command::Stats).await;
        assert!(r.text.contains("Users: 8"));
        assert!(r.text.contains("Registered: 1"));
        assert_eq!(r.text.matches("• ").count(), RECENT_USERS);
        assert!(r.text.contains("• ✅ 📱 ID: 20, Name: phoned"));
    }

    #[tokio::test]
    async fn user_list_is_capped() {
        let (m, store) = setup().await;
        for id in 100..160 {
            store.upsert_user(id, "u", None, true).await.unwrap();
        }
        let r = cmd(&m, Command::AdminUsers).await;
        assert_eq!(r.text.matches("ID: ").count(), USER_LIST_LIMIT);
        assert!(r.text.contains("... and 10 more"));
    }

    #[tokio::test]
    async fn ride_list_offers_delete_buttons_and_delete_works() {
        let (m, store) = setup().await;
        let mut ids = Vec::new();
        for _ in 0..7 {
            ids.push(store.create_ride(5, "A", "B", "2030-01-01", "10:00", 2).await.unwrap());
        }
        let r = cmd(&m, Command::AdminRides).await;
        let deletes = r
            .buttons
            .iter()
            .filter(|b| matches!(b.command, Command::AdminDeleteRide(_)))
            .count();
        assert_eq!(deletes, DELETE_BUTTONS);

        let r = cmd(&m, Command::AdminDeleteRide(ids[0])).await;
        assert!(r.text.starts_with(&format!("✅ Ride #{} deleted", ids[0])));
        assert!(store.get_ride(ids[0]).await.is_none());

        let r = cmd(&m, Command::AdminDeleteRide(ids[0])).await;
        assert!(r.text.contains("not found"));
    }

    #[tokio::test]
    async fn cleanup_reports_counts() {
        let (m, store) = setup().await;
        store.create_ride(5, "A", "B", "2020-01-01", "10:00", 2).await.unwrap();
        let r = cmd(&m, Command::AdminCleanup).await;
        assert!(r.text.contains("Expired rides deactivated: 1"));
        assert!(r.text.contains("Old inactive rides deleted: 0"));
    }

    #[tokio::test]
    async fn broadcast_compose_confirm_and_report() {
        let (m, store) = setup().await;
        store.upsert_user(10, "a", None, true).await.unwrap();
        store.upsert_user(11, "b", None, true).await.unwrap();

        cmd(&m, Command::AdminBroadcast).await;
        let long = "x".repeat(PREVIEW_CHARS + 20);
        let r = m
            .handle(&InboundEvent::text(ADMIN, "root", long.clone()))
            .await
            .unwrap();
        assert!(r.text.contains("Recipients: 2"));
        assert!(r.text.contains(&format!("{}...", "x".repeat(PREVIEW_CHARS))));
        assert!(r.broadcast.is_none());

        let r = cmd(&m, Command::AdminConfirmBroadcast).await;
        let request = r.broadcast.unwrap();
        assert_eq!(request.admin_id, ADMIN);
        assert_eq!(request.recipients.len(), 2);
        assert_eq!(request.body, format!("{BROADCAST_HEADER}{long}"));
        let flow = m.sessions().session(ADMIN).await.lock().await.flow.clone();
        assert_eq!(flow, Flow::Idle);

        let again = cmd(&m, Command::AdminConfirmBroadcast).await;
        assert!(again.broadcast.is_none());

        let summary = m.broadcast_finished(BroadcastReport { total: 2, delivered: 1, failed: 1 });
        assert!(summary.text.contains("Delivered: 1"));
        assert!(summary.text.contains("Failed: 1"));
    }

    #[tokio::test]
    async fn cancel_drops_staged_broadcast() {
        let (m, _) = setup().await;
        cmd(&m, Command::AdminBroadcast).await;
        m.handle(&InboundEvent::text(ADMIN, "root", "hello")).await.unwrap();
        cmd(&m, Command::Cancel).await;
        let r = cmd(&m, Command::AdminConfirmBroadcast).await;
        assert!(r.broadcast.is_none());
    }
}
