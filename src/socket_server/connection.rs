//! WebSocket connection handling
//!
//! `ConnectionManager` accepts sockets, works out who the client is and
//! registers it with the streaming service. Each socket then runs a small
//! pump: frames queued by the dispatch loop go out, control messages come in.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};

use crate::error::Result;
use crate::events::EventData;
use crate::socket_server::protocol::{parse_client_message, ClientMessage, ServerMessage};
use crate::streaming::{
    ChannelTransport, ClientPreferences, ClientType, ConnectionInfo, Delivery,
    EventStreamingService, OutboundFrame, Registration,
};

/// Header a client may use to pick its own id
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// What we learned about a client during the HTTP upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub client_id: Option<String>,
    pub user_agent: Option<String>,
}

impl HandshakeInfo {
    pub fn from_request(request: &Request) -> Self {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let client_id = request
            .uri()
            .query()
            .and_then(client_id_from_query)
            .or_else(|| header(CLIENT_ID_HEADER))
            .filter(|id| !id.is_empty());

        Self {
            client_id,
            user_agent: header("user-agent"),
        }
    }
}

fn client_id_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "client_id")
        .and_then(|(_, value)| percent_decode(value))
}

/// Decode `%XX` escapes and `+` in a query value; `None` if malformed or not UTF-8
fn percent_decode(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        match b {
            b'%' => {
                let hex = tail.get(..2).filter(|h| h.iter().all(u8::is_ascii_hexdigit))?;
                let hex = std::str::from_utf8(hex).ok()?;
                bytes.push(u8::from_str_radix(hex, 16).ok()?);
                rest = &tail[2..];
            }
            b'+' => {
                bytes.push(b' ');
                rest = tail;
            }
            _ => {
                bytes.push(b);
                rest = tail;
            }
        }
    }
    String::from_utf8(bytes).ok()
}

fn generate_client_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("client_{}", &uuid[..8])
}

/// Front door of the streaming service for socket clients.
///
/// Holds no client state of its own; the service's registry is the only
/// record of who is connected.
pub struct ConnectionManager {
    service: Arc<EventStreamingService>,
}

impl ConnectionManager {
    pub fn new(service: Arc<EventStreamingService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<EventStreamingService> {
        &self.service
    }

    pub fn detect_client_type(user_agent: Option<&str>) -> ClientType {
        ClientType::detect(user_agent)
    }

    pub fn default_preferences(client_type: ClientType, client_id: &str) -> ClientPreferences {
        client_type.default_preferences(client_id)
    }

    /// Connection counts, per-client metadata and streaming stats
    pub fn connection_info(&self) -> ConnectionInfo {
        self.service.get_connection_info()
    }

    /// Register a handshaken client whose frames go to `tx`
    pub fn register(
        &self,
        handshake: &HandshakeInfo,
        tx: mpsc::UnboundedSender<Delivery>,
    ) -> (ClientType, Registration) {
        let client_type = Self::detect_client_type(handshake.user_agent.as_deref());
        let client_id = handshake
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);
        let transport = Arc::new(ChannelTransport::new(client_id.clone(), tx));
        let registration = self
            .service
            .register_client(&client_id, client_type, transport, None);
        (client_type, registration)
    }

    /// Handle a single WebSocket connection until it closes
    pub async fn handle_connection(&self, stream: TcpStream) {
        let addr = stream.peer_addr().ok();

        let mut handshake = HandshakeInfo::default();
        let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            handshake = HandshakeInfo::from_request(request);
            Ok(response)
        };
        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (client_type, registration) = self.register(&handshake, tx);
        tracing::info!(
            client_id = %registration.client_id,
            ?addr,
            user_agent = handshake.user_agent.as_deref().unwrap_or("-"),
            "WebSocket client connected"
        );

        let mut conn = ClientConnection {
            ws,
            service: Arc::clone(&self.service),
            client_id: registration.client_id.clone(),
            frames: rx,
        };
        let connected = ServerMessage::Connected {
            client_id: registration.client_id.clone(),
            client_type,
            preferences: registration.preferences.clone(),
            resumed: registration.resumed,
            missed_events: registration.replayed,
        };
        let mut unwritten = match conn.send(&connected).await {
            Ok(()) => conn.run().await,
            Err(e) => {
                tracing::warn!(client_id = %conn.client_id, "Failed to send connected message: {}", e);
                Vec::new()
            }
        };

        // Once the queue is closed, dispatch records later events as missed itself.
        unwritten.extend(conn.drain_queued());
        if !unwritten.is_empty() {
            tracing::debug!(client_id = %conn.client_id, unwritten = unwritten.len(), "Returning unwritten events");
        }
        self.service.release_connection(
            &registration.client_id,
            registration.connection_token,
            unwritten,
        );
        let _ = conn.ws.close(None).await;
        tracing::info!(client_id = %registration.client_id, "Connection closed");
    }
}

/// One live socket
struct ClientConnection {
    ws: WebSocketStream<TcpStream>,
    service: Arc<EventStreamingService>,
    client_id: String,
    frames: mpsc::UnboundedReceiver<Delivery>,
}

impl ClientConnection {
    /// Pump until the socket ends; returns the events of a frame whose write failed
    async fn run(&mut self) -> Vec<Arc<EventData>> {
        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.service.touch(&self.client_id);
                            if let Err(e) = self.handle_message(&text).await {
                                tracing::debug!(client_id = %self.client_id, "Bad client message: {}", e);
                                let reply = ServerMessage::error("invalid_message", e.to_string());
                                if self.send(&reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Client {} requested close", self.client_id);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.service.touch(&self.client_id);
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(client_id = %self.client_id, "WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                delivery = self.frames.recv() => {
                    let Some(Delivery { frame, events }) = delivery else {
                        // The service dropped our transport (superseded by a newer socket).
                        tracing::info!(client_id = %self.client_id, "Transport released by service");
                        break;
                    };
                    let message = match frame {
                        OutboundFrame::Text(text) => Message::Text(text),
                        OutboundFrame::Binary(bytes) => Message::Binary(bytes),
                    };
                    if let Err(e) = self.ws.send(message).await {
                        tracing::warn!(client_id = %self.client_id, "Socket write failed: {}", e);
                        return events;
                    }
                }
            }
        }
        Vec::new()
    }

    /// Refuse further frames and take back the events of those still queued
    fn drain_queued(&mut self) -> Vec<Arc<EventData>> {
        self.frames.close();
        let mut events = Vec::new();
        while let Ok(delivery) = self.frames.try_recv() {
            events.extend(delivery.events);
        }
        events
    }

    async fn handle_message(&mut self, text: &str) -> Result<()> {
        match parse_client_message(text)? {
            ClientMessage::UpdatePreferences { preferences } => {
                let reply = match self.service.update_preferences(&self.client_id, &preferences) {
                    Some(preferences) => ServerMessage::PreferencesUpdated { preferences },
                    None => ServerMessage::error("not_registered", "client is not registered"),
                };
                self.send(&reply).await
            }
            ClientMessage::GetConnectionInfo => {
                let info = self.service.get_connection_info();
                self.send(&ServerMessage::ConnectionInfo(Box::new(info))).await
            }
            ClientMessage::Ping => self.send(&ServerMessage::Pong).await,
        }
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }
}
