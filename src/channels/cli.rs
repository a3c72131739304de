//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Lines are read as a single direct-chat user. Reply-keyboard labels and
//! slash commands are recognized as typed; inline buttons are pressed by
//! typing `!` followed by their callback data (for example `!contact_3`).

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::keyboard::{self, InlineTarget};
use crate::channels::{Channel, EventStream};
use crate::error::ChannelError;
use crate::session::{Action, BroadcastReport, BroadcastRequest, InboundEvent, Response};

const CLI_USER_ID: i64 = 0;
const CLI_USER_NAME: &str = "local";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    terms_url: String,
    required_channel: String,
}

impl CliChannel {
    pub fn new(terms_url: String, required_channel: String) -> Self {
        Self {
            terms_url,
            required_channel,
        }
    }

    /// Render a response as plain text: body, inline buttons with their
    /// callback data, then the reply keyboard labels.
    fn render(&self, response: &Response) -> String {
        let mut out = response.text.clone();

        for button in &response.buttons {
            out.push_str(&format!(
                "\n  [{}] !{}",
                button.label,
                keyboard::encode_callback(button.command)
            ));
        }
        if let Some(rows) =
            keyboard::inline_layout(response.keyboard, &self.terms_url, &self.required_channel)
        {
            for key in rows.into_iter().flatten() {
                match key.target {
                    InlineTarget::Callback(data) => {
                        out.push_str(&format!("\n  [{}] !{data}", key.label))
                    }
                    InlineTarget::Url(url) => out.push_str(&format!("\n  [{}] {url}", key.label)),
                }
            }
        }
        if let Some(rows) = keyboard::reply_layout(response.keyboard) {
            let labels: Vec<&str> = rows.into_iter().flatten().map(|k| k.label).collect();
            out.push_str(&format!("\n  {}", labels.join(" | ")));
        }
        out
    }
}

/// Turn one typed line into an event. `None` for an unknown `!` callback.
fn parse_line(line: &str) -> Option<InboundEvent> {
    let action = if let Some(data) = line.strip_prefix('!') {
        Action::Command(keyboard::decode_callback(data.trim())?)
    } else {
        match keyboard::parse_text(line) {
            Some(command) => Action::Command(command),
            None => Action::Text(line.to_string()),
        }
    };
    Some(InboundEvent::direct(CLI_USER_ID, CLI_USER_NAME, action))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            // Print prompt
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let Some(event) = parse_line(line) else {
                            eprintln!("Unknown button: {line}");
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, _event: &InboundEvent, response: Response) -> Result<(), ChannelError> {
        println!("\n{}\n", self.render(&response));
        eprint!("> ");
        Ok(())
    }

    async fn deliver_broadcast(&self, request: &BroadcastRequest) -> BroadcastReport {
        for user_id in &request.recipients {
            println!("\n[broadcast → {user_id}]\n{}\n", request.body);
        }
        BroadcastReport {
            total: request.recipients.len(),
            delivered: request.recipients.len(),
            failed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Button, Command, Keyboard};

    #[test]
    fn parse_line_recognizes_labels_callbacks_and_text() {
        let event = parse_line("🚗 Create ride").unwrap();
        assert_eq!(event.action, Action::Command(Command::CreateRide));
        assert!(event.chat_is_direct);

        let event = parse_line("!end_ride_4").unwrap();
        assert_eq!(event.action, Action::Command(Command::EndRide(4)));

        let event = parse_line("Kazan").unwrap();
        assert_eq!(event.action, Action::Text("Kazan".into()));

        assert!(parse_line("!bogus").is_none());
    }

    #[test]
    fn render_lists_buttons_and_keyboard() {
        let cli = CliChannel::new("https://example.org/terms".into(), String::new());
        let response = Response::new("Your rides", Keyboard::DriverMenu)
            .with_button(Button::new("❌ End #2", Command::EndRide(2)));
        let out = cli.render(&response);
        assert!(out.starts_with("Your rides"));
        assert!(out.contains("[❌ End #2] !end_ride_2"));
        assert!(out.contains(keyboard::CREATE_RIDE));
    }

    #[tokio::test]
    async fn broadcast_reports_every_recipient_delivered() {
        let cli = CliChannel::new(String::new(), String::new());
        let report = cli
            .deliver_broadcast(&BroadcastRequest {
                admin_id: 1,
                recipients: vec![1, 2, 3],
                body: "hello".into(),
            })
            .await;
        assert_eq!(report.total, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
    }
}
