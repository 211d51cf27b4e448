use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    api::events::{ServerEvent, WsIncomingMessage},
    services::auth_flow::{AuthFlowEngine, ClientChannel},
    AppState,
};

/// Registry of live client connections. Each socket gets a generated
/// connection id and an outbound channel; the auth engine addresses clients
/// through the [`ClientChannel`] implementation.
#[derive(Default)]
pub struct WsHub {
    clients: RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: &str, sender: mpsc::Sender<ServerEvent>) {
        let mut clients = self.clients.write().await;
        clients.insert(connection_id.to_string(), sender);
        tracing::info!("Client registered: {}", connection_id);
    }

    pub async fn unregister(&self, connection_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(connection_id);
        tracing::info!("Client unregistered: {}", connection_id);
    }
}

#[async_trait]
impl ClientChannel for WsHub {
    async fn emit(&self, connection_id: &str, event: ServerEvent) {
        let clients = self.clients.read().await;
        match clients.get(connection_id) {
            Some(sender) => {
                if sender.send(event).await.is_err() {
                    tracing::debug!("Outbound channel closed for {}", connection_id);
                }
            }
            // The target may have disconnected while the bot side of the
            // flow was still completing.
            None => tracing::debug!("No live connection {} for event", connection_id),
        }
    }
}

pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(256);
    state.ws_hub.register(&connection_id, tx).await;

    // Outbound: engine events -> socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize server event: {}", e),
            }
        }
    });

    // Inbound: socket messages -> engine
    let engine = state.engine.clone();
    let hub = state.ws_hub.clone();
    let conn = connection_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(msg) => dispatch_client_event(&engine, hub.as_ref(), &conn, msg).await,
                    Err(e) => tracing::warn!("Malformed message on {}: {}", conn, e),
                },
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    // Only the live channel goes away; the session record survives the
    // disconnect so the long-term token can restore it later.
    state.ws_hub.unregister(&connection_id).await;
}

async fn dispatch_client_event(
    engine: &AuthFlowEngine,
    hub: &WsHub,
    connection_id: &str,
    msg: WsIncomingMessage,
) {
    let payload = &msg.payload;
    let result = match msg.msg_type.as_str() {
        "checkAuth" => {
            let token = payload.get("sessionToken").and_then(Value::as_str);
            engine.check_auth(connection_id, token).await
        }
        "requestAuth" => {
            let phone = payload_str(payload, "phone").unwrap_or_default();
            engine.request_auth(connection_id, &phone).await
        }
        "verifyCode" => {
            let phone = payload_str(payload, "phone").unwrap_or_default();
            let code = payload_str(payload, "code").unwrap_or_default();
            engine.verify_code(connection_id, &phone, &code).await
        }
        "logout" => engine.logout(connection_id).await,
        "resetSession" => engine.reset_session(connection_id).await,
        other => {
            tracing::warn!("Unknown message type from {}: {}", connection_id, other);
            Ok(())
        }
    };

    if let Err(e) = result {
        hub.emit(
            connection_id,
            ServerEvent::AuthError {
                message: e.client_message(),
            },
        )
        .await;
    }
}

// Clients send codes both as strings and as bare JSON numbers; either way
// the engine compares trimmed strings.
fn payload_str(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
