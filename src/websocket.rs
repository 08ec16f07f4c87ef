//! WebSocket wizard handler
//!
//! One connection drives one wizard session for a passport. Every client
//! message is answered with the resulting `wizard_state` (preceded by an
//! `error` when it was refused). Grant changes made elsewhere on the same
//! passport are pushed as `assignment_changed` followed by a fresh state.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::assignment::{AssignmentEvent, Invite};
use crate::error::AppError;
use crate::models::{Contact, ResponsibilityMode, ResponsibilityUnit};
use crate::wizard::{WizardEvent, WizardSession, WizardView};
use crate::AppState;

type Sender = SplitSink<WebSocket, Message>;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(passport_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, passport_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, passport_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.lifecycle.subscribe();
    let mut session = WizardSession::new(
        state.lifecycle.clone(),
        state.dispatcher.clone(),
        passport_id,
    );
    tracing::debug!("Wizard session opened for passport {}", passport_id);

    if send_state(&mut sender, &session).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                };

                if handle_text(&mut sender, &mut session, &text).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Wizard session lagged by {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                // Own commits are already reflected in the state we sent
                if event.passport_id() != passport_id
                    || session.state().committed.contains(&event.invite_id())
                {
                    continue;
                }

                if send(&mut sender, &ServerMessage::AssignmentChanged { event }).await.is_err()
                    || send_state(&mut sender, &session).await.is_err()
                {
                    break;
                }
            }
        }
    }

    tracing::debug!("Wizard session closed for passport {}", passport_id);
}

async fn handle_text(
    sender: &mut Sender,
    session: &mut WizardSession,
    text: &str,
) -> Result<(), axum::Error> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let error = ServerMessage::Error {
                message: format!("Invalid message: {}", e),
                kind: "validation",
                units: Vec::new(),
            };
            return send(sender, &error).await;
        }
    };

    let result = match client_msg {
        ClientMessage::GetState => Ok(()),
        ClientMessage::Commit { notify } => match session.commit(notify).await {
            Ok(outcome) => {
                send(
                    sender,
                    &ServerMessage::Committed {
                        invite: outcome.invite,
                        notification_error: outcome.notification_error,
                    },
                )
                .await?;
                Ok(())
            }
            Err(e) => Err(e),
        },
        other => match other.into_event() {
            Some(event) => session.handle(event).await,
            None => Ok(()),
        },
    };

    if let Err(e) = result {
        send(sender, &ServerMessage::from_error(&e)).await?;
    }
    send_state(sender, session).await
}

async fn send_state(sender: &mut Sender, session: &WizardSession) -> Result<(), axum::Error> {
    match session.view().await {
        Ok(view) => send(sender, &ServerMessage::WizardState { view }).await,
        Err(e) => send(sender, &ServerMessage::from_error(&e)).await,
    }
}

async fn send(sender: &mut Sender, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await.map_err(|e| {
        tracing::error!("Failed to send wizard message: {}", e);
        e
    })
}

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChooseRole {
        role: String,
    },
    EnterContact {
        #[serde(flatten)]
        contact: Contact,
    },
    ChooseMode {
        mode: ResponsibilityMode,
    },
    SelectScope {
        units: Vec<ResponsibilityUnit>,
    },
    Back,
    AddAnother,
    /// Save the drafted invite, optionally sending the invitation
    Commit {
        #[serde(default)]
        notify: bool,
    },
    GetState,
}

impl ClientMessage {
    fn into_event(self) -> Option<WizardEvent> {
        match self {
            ClientMessage::ChooseRole { role } => Some(WizardEvent::ChooseRole { role }),
            ClientMessage::EnterContact { contact } => Some(WizardEvent::EnterContact { contact }),
            ClientMessage::ChooseMode { mode } => Some(WizardEvent::ChooseMode { mode }),
            ClientMessage::SelectScope { units } => Some(WizardEvent::SelectScope { units }),
            ClientMessage::Back => Some(WizardEvent::Back),
            ClientMessage::AddAnother => Some(WizardEvent::AddAnother),
            ClientMessage::Commit { .. } | ClientMessage::GetState => None,
        }
    }
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    WizardState {
        view: WizardView,
    },
    Committed {
        invite: Invite,
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_error: Option<String>,
    },
    /// Grants on this passport changed outside this session
    AssignmentChanged {
        event: AssignmentEvent,
    },
    Error {
        message: String,
        kind: &'static str,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        units: Vec<ResponsibilityUnit>,
    },
}

impl ServerMessage {
    fn from_error(e: &AppError) -> Self {
        let message = match e {
            AppError::Validation(m)
            | AppError::InvalidTransition(m)
            | AppError::NotFound(m)
            | AppError::Gone(m) => m.clone(),
            AppError::Conflict { message, .. } => message.clone(),
            AppError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        };
        ServerMessage::Error {
            message,
            kind: e.kind(),
            units: e.conflicting_units().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"enter_contact","email":"a@example.com","company":"Acme"}"#,
        )
        .unwrap();
        match msg.into_event() {
            Some(WizardEvent::EnterContact { contact }) => {
                assert_eq!(contact.email, "a@example.com");
                assert_eq!(contact.company.as_deref(), Some("Acme"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"commit"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Commit { notify: false }));
        assert!(msg.into_event().is_none());

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"select_scope","units":[{"kind":"block","block_id":"materials"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            msg.into_event(),
            Some(WizardEvent::SelectScope { units }) if units.len() == 1
        ));
    }

    #[test]
    fn test_error_message_carries_conflict_units() {
        let err = AppError::conflict(vec![ResponsibilityUnit::block("materials")]);
        let json = serde_json::to_value(ServerMessage::from_error(&err)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "conflict");
        assert_eq!(json["units"][0]["block_id"], "materials");

        let json = serde_json::to_value(ServerMessage::from_error(&AppError::Validation(
            "Email is required".to_string(),
        )))
        .unwrap();
        assert_eq!(json["message"], "Email is required");
        assert!(json.get("units").is_none());
    }
}
