//! WebSocket client for the assignment wizard

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use crate::messages::{AssignmentEvent, ClientMessage, Invite, ServerMessage, Unit, WizardView};

/// Wizard endpoint of a passport on `server`
pub fn wizard_url(server: &str, passport_id: Uuid) -> Result<Url> {
    let mut url = Url::parse(server)?;
    match url.scheme() {
        "http" => url
            .set_scheme("ws")
            .map_err(|_| anyhow!("Cannot use {} as a websocket URL", server))?,
        "https" => url
            .set_scheme("wss")
            .map_err(|_| anyhow!("Cannot use {} as a websocket URL", server))?,
        "ws" | "wss" => {}
        other => return Err(anyhow!("Unsupported scheme: {}", other)),
    }
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/passports/{}/wizard", base, passport_id));
    Ok(url)
}

/// Everything the server answered to one request
#[derive(Debug)]
pub struct Reply {
    pub view: WizardView,
    pub error: Option<(String, Vec<Unit>)>,
    pub committed: Option<(Invite, Option<String>)>,
    /// Grant changes made by others while waiting
    pub changes: Vec<AssignmentEvent>,
}

/// One wizard session on one passport
pub struct WizardClient {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<ServerMessage>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl WizardClient {
    /// Connect and return the client with the session's initial view
    pub async fn connect(server: &str, passport_id: Uuid) -> Result<(Self, WizardView)> {
        let url = wizard_url(server, passport_id)?;
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(32);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = out_rx.recv() => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(msg) => {
                                        if in_tx.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
        });

        let mut client = Self {
            tx: out_tx,
            rx: in_rx,
            handle,
        };
        let first = client.collect().await?;
        tracing::debug!("Wizard opened at {}", first.view.state.stage);
        Ok((client, first.view))
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Read until the next wizard state
    async fn collect(&mut self) -> Result<Reply> {
        let mut error = None;
        let mut committed = None;
        let mut changes = Vec::new();

        while let Some(msg) = self.rx.recv().await {
            match msg {
                ServerMessage::WizardState { view } => {
                    return Ok(Reply {
                        view,
                        error,
                        committed,
                        changes,
                    });
                }
                ServerMessage::Error { message, units, .. } => error = Some((message, units)),
                ServerMessage::Committed {
                    invite,
                    notification_error,
                } => committed = Some((invite, notification_error)),
                ServerMessage::AssignmentChanged { event } => changes.push(event),
            }
        }

        Err(anyhow!("Connection closed"))
    }

    /// Send one wizard message and wait for the resulting state
    pub async fn request(&mut self, msg: ClientMessage) -> Result<Reply> {
        self.send(msg).await?;
        self.collect().await
    }

    /// Listen for grant changes until the callback returns false
    pub async fn watch<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&AssignmentEvent, &WizardView) -> bool,
    {
        loop {
            let reply = self.collect().await?;
            for event in &reply.changes {
                if !callback(event, &reply.view) {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wizard_url() {
        let id = Uuid::nil();
        assert_eq!(
            wizard_url("http://localhost:3000", id).unwrap().as_str(),
            format!("ws://localhost:3000/passports/{}/wizard", id)
        );
        assert_eq!(
            wizard_url("https://dpp.example.com/assign/", id)
                .unwrap()
                .as_str(),
            format!("wss://dpp.example.com/assign/passports/{}/wizard", id)
        );
        assert!(wizard_url("ftp://example.com", id).is_err());
    }

    #[test]
    fn test_commit_message_serialization() {
        let json = serde_json::to_string(&ClientMessage::Commit { notify: true }).unwrap();
        assert!(json.contains("\"type\":\"commit\""));
        assert!(json.contains("\"notify\":true"));
    }
}
