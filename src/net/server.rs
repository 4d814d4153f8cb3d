//! WebSocket Game Server
//!
//! Async WebSocket server for match connections. Accepts clients,
//! parses the wire protocol, and routes everything to the match
//! actors through the registry.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::catalog::PermanentRule;
use crate::net::protocol::{
    ClientMessage, ErrorCode, OperatorRequest, ServerError, ServerMessage,
};
use crate::net::registry::{ClientAction, MatchCommand, MatchHandle, MatchRegistry};
use crate::store::{AccountLedger, RecordSink};
use crate::game::state::ParticipantId;

/// Match id used when a join names no match.
const DEFAULT_MATCH_ID: [u8; 16] = [0; 16];

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum concurrently live matches.
    pub max_matches: usize,
    /// Shared secret gating operator commands. None disables them.
    pub operator_secret: Option<String>,
    /// JSONL file for settled-match records. None disables persistence.
    pub record_path: Option<PathBuf>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            max_connections: 1000,
            max_matches: 256,
            operator_secret: None,
            record_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Configuration from the environment, defaults where unset.
    ///
    /// `DIMINISH_BIND`, `DIMINISH_MAX_CONNECTIONS`,
    /// `DIMINISH_MAX_MATCHES`, `DIMINISH_OPERATOR_SECRET`,
    /// `DIMINISH_RECORD_PATH`.
    pub fn from_env() -> Result<Self, ServeError> {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("DIMINISH_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| ServeError::Config(format!("invalid bind address: {bind}")))?;
        }
        if let Ok(max) = std::env::var("DIMINISH_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| ServeError::Config(format!("invalid connection limit: {max}")))?;
        }
        if let Ok(max) = std::env::var("DIMINISH_MAX_MATCHES") {
            config.max_matches = max
                .parse()
                .map_err(|_| ServeError::Config(format!("invalid match limit: {max}")))?;
        }
        if let Ok(secret) = std::env::var("DIMINISH_OPERATOR_SECRET") {
            if !secret.is_empty() {
                config.operator_secret = Some(secret);
            }
        }
        if let Ok(path) = std::env::var("DIMINISH_RECORD_PATH") {
            if !path.is_empty() {
                config.record_path = Some(PathBuf::from(path));
            }
        }
        Ok(config)
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// Bad configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<MatchRegistry>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server with its persistence wired up.
    pub fn new(config: ServerConfig) -> Self {
        let sink = Arc::new(RecordSink::new(config.record_path.clone()));
        let ledger = Arc::new(AccountLedger::new());
        let registry = MatchRegistry::new(
            sink,
            ledger,
            config.version.clone(),
            config.max_matches,
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServeError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("listening on {}", self.config.bind_addr);
        if self.config.operator_secret.is_none() {
            info!("operator commands disabled (no secret configured)");
        }

        let scheduler = self.registry.spawn_scheduler();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Relaxed) >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {addr}");
                                tokio::spawn(reject_connection(stream));
                                continue;
                            }
                            debug!("new connection from {addr}");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        scheduler.abort();
        Ok(())
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Live match count.
    pub async fn match_count(&self) -> usize {
        self.registry.match_count().await
    }

    /// Spawn the per-connection task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let config = self.config.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("websocket handshake failed for {addr}: {e}");
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) =
                mpsc::channel::<ServerMessage>(MatchRegistry::outbound_queue_depth());

            // Outbound pump: serialize and write until the channel or
            // the socket closes.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {e}");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Participant identity and match, set by the first join.
            let mut joined: Option<(ParticipantId, MatchHandle)> = None;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {addr}: {e}");
                                        send_error(&msg_tx, ErrorCode::InvalidInput,
                                            "invalid message format").await;
                                        continue;
                                    }
                                };
                                handle_client_message(
                                    client_msg, &registry, &config, &msg_tx, &mut joined,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: now_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {addr} disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            if let Some((participant, handle)) = joined {
                handle.send(MatchCommand::Disconnect { participant }).await;
            }
            connections.fetch_sub(1, Ordering::Relaxed);
            debug!("client {addr} cleaned up");
        });
    }
}

/// Complete the handshake just long enough to tell a client turned
/// away at the connection limit why, then close.
async fn reject_connection(stream: TcpStream) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let err = ServerMessage::Error(ServerError {
        code: ErrorCode::ServerFull,
        message: "connection limit reached".to_string(),
    });
    if let Ok(text) = err.to_json() {
        let _ = ws.send(Message::Text(text)).await;
    }
    let _ = ws.close(None).await;
}

/// Dispatch one parsed client message.
async fn handle_client_message(
    msg: ClientMessage,
    registry: &Arc<MatchRegistry>,
    config: &ServerConfig,
    msg_tx: &mpsc::Sender<ServerMessage>,
    joined: &mut Option<(ParticipantId, MatchHandle)>,
) {
    match msg {
        ClientMessage::Join(req) => {
            let Some(participant) = ParticipantId::from_uuid_str(&req.participant_id) else {
                send_error(msg_tx, ErrorCode::InvalidInput, "invalid participant id").await;
                return;
            };
            let match_id = match &req.match_id {
                None => DEFAULT_MATCH_ID,
                Some(_) => match req.match_id_bytes() {
                    Some(id) => id,
                    None => {
                        send_error(msg_tx, ErrorCode::InvalidInput, "invalid match id").await;
                        return;
                    }
                },
            };

            let handle = match registry.handle(match_id).await {
                Ok(h) => h,
                Err(e) => {
                    send_error(msg_tx, ErrorCode::ServerFull, &e.to_string()).await;
                    return;
                }
            };
            // Joining somewhere else first vacates the old seat, or
            // the previous match would keep a stale member forever.
            if let Some((prev, prev_handle)) = joined.take() {
                if prev_handle.id != match_id || prev != participant {
                    prev_handle
                        .send(MatchCommand::Disconnect { participant: prev })
                        .await;
                }
            }
            handle
                .send(MatchCommand::Join {
                    participant,
                    name: req.name,
                    sender: msg_tx.clone(),
                })
                .await;
            *joined = Some((participant, handle));
        }
        ClientMessage::Ping { timestamp } => {
            let _ = msg_tx
                .send(ServerMessage::Pong {
                    timestamp,
                    server_time: now_millis(),
                })
                .await;
        }
        ClientMessage::Operator(req) => {
            handle_operator(req, config, msg_tx, joined, registry).await;
        }
        other => {
            let Some((participant, handle)) = joined.as_ref() else {
                send_error(msg_tx, ErrorCode::NotJoined, "join a match first").await;
                return;
            };
            let action = match to_action(other, msg_tx).await {
                Some(a) => a,
                None => return,
            };
            let leaving = matches!(action, ClientAction::Leave);
            handle
                .send(MatchCommand::Action {
                    participant: *participant,
                    action,
                })
                .await;
            if leaving {
                *joined = None;
            }
        }
    }
}

/// Map wire messages onto engine actions, validating ids inline.
async fn to_action(
    msg: ClientMessage,
    msg_tx: &mpsc::Sender<ServerMessage>,
) -> Option<ClientAction> {
    match msg {
        ClientMessage::ToggleReady => Some(ClientAction::ToggleReady),
        ClientMessage::Submit { value } => Some(ClientAction::Submit(value)),
        ClientMessage::ConfirmRule => Some(ClientAction::ConfirmRule),
        ClientMessage::SelfEliminate { rule_id } => {
            let rule = match rule_id {
                None => None,
                Some(id) => match PermanentRule::from_id(id) {
                    Some(r) => Some(r),
                    None => {
                        send_error(msg_tx, ErrorCode::InvalidInput, "unknown rule id").await;
                        return None;
                    }
                },
            };
            Some(ClientAction::SelfEliminate(rule))
        }
        ClientMessage::VoteKick { target } => {
            match ParticipantId::from_uuid_str(&target) {
                Some(id) => Some(ClientAction::VoteKick(id)),
                None => {
                    send_error(msg_tx, ErrorCode::InvalidInput, "invalid target id").await;
                    None
                }
            }
        }
        ClientMessage::Like { target } => match ParticipantId::from_uuid_str(&target) {
            Some(id) => Some(ClientAction::Like(id)),
            None => {
                send_error(msg_tx, ErrorCode::InvalidInput, "invalid target id").await;
                None
            }
        },
        ClientMessage::Leave => Some(ClientAction::Leave),
        // Join, Ping and Operator are handled before this point.
        _ => None,
    }
}

/// Authenticate and forward an operator request.
async fn handle_operator(
    req: OperatorRequest,
    config: &ServerConfig,
    msg_tx: &mpsc::Sender<ServerMessage>,
    joined: &Option<(ParticipantId, MatchHandle)>,
    registry: &Arc<MatchRegistry>,
) {
    let authorized = config
        .operator_secret
        .as_deref()
        .map(|s| s == req.secret)
        .unwrap_or(false);
    if !authorized {
        warn!("rejected operator command: bad or missing secret");
        send_error(msg_tx, ErrorCode::Unauthorized, "operator secret rejected").await;
        return;
    }

    // Operators act on the match they joined, or the default one.
    let handle = match joined {
        Some((_, handle)) => handle.clone(),
        None => match registry.handle(DEFAULT_MATCH_ID).await {
            Ok(h) => h,
            Err(e) => {
                send_error(msg_tx, ErrorCode::ServerFull, &e.to_string()).await;
                return;
            }
        },
    };
    handle
        .send(MatchCommand::Operator {
            command: req.command,
            reply: msg_tx.clone(),
        })
        .await;
}

async fn send_error(msg_tx: &mpsc::Sender<ServerMessage>, code: ErrorCode, message: &str) {
    let _ = msg_tx
        .send(ServerMessage::Error(ServerError {
            code,
            message: message.to_string(),
        }))
        .await;
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_matches, 256);
        assert!(config.operator_secret.is_none());
        assert!(config.record_path.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.match_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown_signal() {
        let server = GameServer::new(ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        });
        server.shutdown();
    }

    #[tokio::test]
    async fn test_operator_rejected_without_secret() {
        let config = ServerConfig::default();
        let (tx, mut rx) = mpsc::channel(8);
        let registry = GameServer::new(config.clone()).registry;

        handle_operator(
            OperatorRequest {
                secret: "anything".to_string(),
                command: crate::net::protocol::OperatorCommand::Reset,
            },
            &config,
            &tx,
            &None,
            &registry,
        )
        .await;

        match rx.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::Unauthorized),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_operator_accepted_with_secret() {
        let config = ServerConfig {
            operator_secret: Some("hunter2".to_string()),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(8);
        let registry = GameServer::new(config.clone()).registry;

        handle_operator(
            OperatorRequest {
                secret: "hunter2".to_string(),
                command: crate::net::protocol::OperatorCommand::QueryPools,
            },
            &config,
            &tx,
            &None,
            &registry,
        )
        .await;

        match rx.recv().await {
            Some(ServerMessage::Pools(view)) => assert_eq!(view.rules_remaining.len(), 6),
            other => panic!("expected pools view, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unjoined_action_rejected() {
        let config = ServerConfig::default();
        let registry = GameServer::new(config.clone()).registry;
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = None;

        handle_client_message(
            ClientMessage::Submit { value: 50 },
            &registry,
            &config,
            &tx,
            &mut joined,
        )
        .await;

        match rx.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::NotJoined),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_routes_to_default_match() {
        let config = ServerConfig::default();
        let registry = GameServer::new(config.clone()).registry;
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = None;

        handle_client_message(
            ClientMessage::Join(crate::net::protocol::JoinRequest {
                match_id: None,
                participant_id: uuid::Uuid::from_bytes([1; 16]).to_string(),
                name: "alice".to_string(),
            }),
            &registry,
            &config,
            &tx,
            &mut joined,
        )
        .await;

        assert!(joined.is_some());
        assert_eq!(joined.as_ref().unwrap().1.id, DEFAULT_MATCH_ID);
        match rx.recv().await {
            Some(ServerMessage::Joined(info)) => {
                assert_eq!(info.match_id, hex::encode(DEFAULT_MATCH_ID));
            }
            other => panic!("expected join ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_other_match_vacates_previous() {
        let config = ServerConfig::default();
        let registry = GameServer::new(config.clone()).registry;
        let (tx, _rx) = mpsc::channel(64);
        let mut joined = None;

        let join = |match_id: [u8; 16], pid: u8, name: &str| {
            ClientMessage::Join(crate::net::protocol::JoinRequest {
                match_id: Some(hex::encode(match_id)),
                participant_id: uuid::Uuid::from_bytes([pid; 16]).to_string(),
                name: name.to_string(),
            })
        };

        // Alice joins one match, then switches to another.
        handle_client_message(join([0xAA; 16], 1, "alice"), &registry, &config, &tx, &mut joined)
            .await;
        handle_client_message(join([0xBB; 16], 1, "alice"), &registry, &config, &tx, &mut joined)
            .await;
        assert_eq!(joined.as_ref().unwrap().1.id, [0xBB; 16]);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Bob joins the first match and should find it empty.
        let (tx2, mut rx2) = mpsc::channel(64);
        let mut joined2 = None;
        handle_client_message(join([0xAA; 16], 2, "bob"), &registry, &config, &tx2, &mut joined2)
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut last_state = None;
        while let Ok(msg) = rx2.try_recv() {
            if let ServerMessage::State(v) = msg {
                last_state = Some(v);
            }
        }
        let state = last_state.expect("state broadcast");
        assert_eq!(state.participants.len(), 1);
        assert_eq!(state.participants[0].name, "bob");
    }

    #[tokio::test]
    async fn test_join_rejected_at_match_limit() {
        let config = ServerConfig {
            max_matches: 1,
            ..Default::default()
        };
        let registry = GameServer::new(config.clone()).registry;

        let join = |match_id: [u8; 16], pid: u8| {
            ClientMessage::Join(crate::net::protocol::JoinRequest {
                match_id: Some(hex::encode(match_id)),
                participant_id: uuid::Uuid::from_bytes([pid; 16]).to_string(),
                name: format!("p{pid}"),
            })
        };

        let (tx, _rx) = mpsc::channel(8);
        let mut joined = None;
        handle_client_message(join([0xAA; 16], 1), &registry, &config, &tx, &mut joined).await;
        assert!(joined.is_some());

        // The only match slot is taken; naming a second match fails
        // with an explicit rejection.
        let (tx2, mut rx2) = mpsc::channel(8);
        let mut joined2 = None;
        handle_client_message(join([0xBB; 16], 2), &registry, &config, &tx2, &mut joined2).await;

        assert!(joined2.is_none());
        match rx2.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::ServerFull),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_rejects_bad_ids() {
        let config = ServerConfig::default();
        let registry = GameServer::new(config.clone()).registry;
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = None;

        handle_client_message(
            ClientMessage::Join(crate::net::protocol::JoinRequest {
                match_id: None,
                participant_id: "not-a-uuid".to_string(),
                name: "x".to_string(),
            }),
            &registry,
            &config,
            &tx,
            &mut joined,
        )
        .await;

        assert!(joined.is_none());
        match rx.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::InvalidInput),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
