//! CLI channel: stdin/stdout REPL for local testing.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

/// User id every CLI line is attributed to.
pub const CLI_USER_ID: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
#[derive(Default)]
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprintln!("bantrat CLI. Try /start or /help.");
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = IncomingMessage::new("cli", CLI_USER_ID, &line)
                            .with_user_name("you");
                        if tx.send(msg).is_err() {
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
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", response.content);
        eprint!("> ");
        Ok(())
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        if let Some(line) = status_line(&status) {
            eprintln!("{line}");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Terminal line for a status; empty updates print nothing.
fn status_line(status: &StatusUpdate) -> Option<String> {
    match status {
        StatusUpdate::Thinking(msg) if !msg.is_empty() => Some(format!("⏳ {msg}")),
        StatusUpdate::Status(msg) if !msg.is_empty() => Some(format!("ℹ️  {msg}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_typing_indicator_prints_nothing() {
        assert_eq!(status_line(&StatusUpdate::Thinking(String::new())), None);
        assert_eq!(status_line(&StatusUpdate::Status(String::new())), None);
    }

    #[test]
    fn notices_print_once_with_their_marker() {
        assert_eq!(
            status_line(&StatusUpdate::Status("⏳ Deploying... please wait.".into())).as_deref(),
            Some("ℹ️  ⏳ Deploying... please wait.")
        );
        assert_eq!(
            status_line(&StatusUpdate::Thinking("working".into())).as_deref(),
            Some("⏳ working")
        );
    }
}
