use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use rideshare::channels::{
    AlwaysSubscribed, Channel, CliChannel, SubscriptionCheck, TelegramChannel,
};
use rideshare::config::BotConfig;
use rideshare::lifecycle;
use rideshare::session::{self, Command, InboundEvent, SessionMachine};
use rideshare::store::{LibSqlBackend, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().context("invalid configuration")?;

    eprintln!("🚗 Rideshare v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Channel ──────────────────────────────────────────────────────────
    let (channel, subscription): (Arc<dyn Channel>, Arc<dyn SubscriptionCheck>) =
        match &config.bot_token {
            Some(token) => {
                let telegram = Arc::new(TelegramChannel::new(
                    token.clone(),
                    config.terms_url.clone(),
                    config.required_channel.clone(),
                ));
                telegram
                    .health_check()
                    .await
                    .context("Telegram health check failed")?;
                let subscription: Arc<dyn SubscriptionCheck> =
                    if config.required_channel.is_empty() {
                        Arc::new(AlwaysSubscribed)
                    } else {
                        telegram.clone()
                    };
                let channel: Arc<dyn Channel> = telegram;
                (channel, subscription)
            }
            None => {
                let cli: Arc<dyn Channel> = Arc::new(CliChannel::new(
                    config.terms_url.clone(),
                    config.required_channel.clone(),
                ));
                let subscription: Arc<dyn SubscriptionCheck> = Arc::new(AlwaysSubscribed);
                (cli, subscription)
            }
        };
    eprintln!("   Channel: {}", channel.name());
    if config.required_channel.is_empty() {
        eprintln!("   Subscription check: disabled");
    } else {
        eprintln!("   Subscription check: {}", config.required_channel);
    }
    eprintln!("   Admins: {}\n", config.admin_ids.len());

    let machine = Arc::new(SessionMachine::new(store, subscription, &config));

    // ── Background tasks ─────────────────────────────────────────────────
    match machine.sweeper().run_once().await {
        Ok(report) => tracing::info!(
            expired = report.expired,
            purged = report.purged,
            "Startup sweep complete"
        ),
        Err(e) => tracing::error!(error = %e, "Startup sweep failed"),
    }
    let _sweep_handle = lifecycle::spawn_sweep_task(machine.sweeper(), config.sweep_interval);
    let _prune_handle = session::spawn_prune_task(
        machine.sessions(),
        config.session_ttl,
        config.session_prune_interval,
    );

    // ── Event loop ───────────────────────────────────────────────────────
    let mut events = channel.start().await?;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    tracing::info!("Event stream closed");
                    break;
                };
                handle_event(&machine, &channel, event).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    channel.shutdown().await?;
    Ok(())
}

/// Run one event through the machine and render the outcome. A confirmed
/// broadcast is delivered in the background; the admin gets the report
/// when it finishes.
async fn handle_event(
    machine: &Arc<SessionMachine>,
    channel: &Arc<dyn Channel>,
    event: InboundEvent,
) {
    let Some(mut response) = machine.handle(&event).await else {
        return;
    };
    let broadcast = response.broadcast.take();

    if let Err(e) = channel.respond(&event, response).await {
        tracing::warn!(user_id = event.user_id, error = %e, "Failed to send response");
    }

    if let Some(request) = broadcast {
        let machine = Arc::clone(machine);
        let channel = Arc::clone(channel);
        let admin = event.display_name.clone();
        tokio::spawn(async move {
            tracing::info!(recipients = request.recipients.len(), "Broadcast started");
            let report = channel.deliver_broadcast(&request).await;
            let reply_to = InboundEvent::command(request.admin_id, admin, Command::Admin);
            if let Err(e) = channel
                .respond(&reply_to, machine.broadcast_finished(report))
                .await
            {
                tracing::warn!(error = %e, "Failed to send broadcast report");
            }
        });
    }
}
