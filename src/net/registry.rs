//! Match Registry
//!
//! One actor task per match. Connections hand commands to the actor
//! over an mpsc queue and the actor applies them to the engine one at
//! a time, so no command ever observes a half-applied round. A single
//! scheduler task drives every match clock at 1 Hz.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::core::rng::derive_match_seed;
use crate::game::catalog::PermanentRule;
use crate::game::phase::{Effect, MatchEngine};
use crate::game::state::{ParticipantId, Phase};
use crate::net::protocol::{
    JoinedInfo, MatchView, OperatorCommand, PoolsView, ServerError, ServerMessage,
};
use crate::store::{AccountLedger, RecordSink};

/// Command queue depth per match.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Seconds an empty lobby idles before its actor shuts down.
const ACTOR_IDLE_SECS: u32 = 300;

/// A participant command already resolved to engine terms.
#[derive(Debug, Clone)]
pub enum ClientAction {
    /// Toggle lobby readiness.
    ToggleReady,
    /// Submit a value for the current round.
    Submit(u8),
    /// Acknowledge the rule announcement on display.
    ConfirmRule,
    /// Bow out, optionally pre-selecting the drawn rule.
    SelfEliminate(Option<PermanentRule>),
    /// Vote to remove a lobby participant.
    VoteKick(ParticipantId),
    /// Send a like.
    Like(ParticipantId),
    /// Leave the match.
    Leave,
}

/// Commands accepted by a match actor.
#[derive(Debug)]
pub enum MatchCommand {
    /// A connection joins (or reconnects) as a participant.
    Join {
        participant: ParticipantId,
        name: String,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A participant command.
    Action {
        participant: ParticipantId,
        action: ClientAction,
    },
    /// The connection carrying this participant closed.
    Disconnect { participant: ParticipantId },
    /// A privileged command, already authenticated by the server.
    Operator {
        command: OperatorCommand,
        reply: mpsc::Sender<ServerMessage>,
    },
    /// One second of match clock.
    Tick,
}

/// Registry errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Live-match cap reached; no new match may be created.
    #[error("server is at its match limit ({0})")]
    MatchLimit(usize),
}

/// Cheap handle for sending commands to a match actor.
#[derive(Clone, Debug)]
pub struct MatchHandle {
    /// Match identifier.
    pub id: [u8; 16],
    tx: mpsc::Sender<MatchCommand>,
}

impl MatchHandle {
    /// Queue a command; false if the actor is gone.
    pub async fn send(&self, cmd: MatchCommand) -> bool {
        self.tx.send(cmd).await.is_ok()
    }

    /// Queue a command without waiting; used by the scheduler so one
    /// congested match never stalls the clock of the others.
    pub fn try_send(&self, cmd: MatchCommand) -> Result<(), mpsc::error::TrySendError<MatchCommand>> {
        self.tx.try_send(cmd)
    }

    /// True once the actor has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct MatchActor {
    engine: MatchEngine,
    /// Live outbound channels, one per connected participant.
    connections: BTreeMap<ParticipantId, mpsc::Sender<ServerMessage>>,
    sink: Arc<RecordSink>,
    ledger: Arc<AccountLedger>,
    /// Consecutive idle ticks with nobody connected.
    idle_ticks: u32,
    version: String,
}

impl MatchActor {
    async fn run(mut self, mut rx: mpsc::Receiver<MatchCommand>) {
        let match_id = hex::encode(self.engine.state.id);
        debug!(match_id = %match_id, "match actor started");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                MatchCommand::Join {
                    participant,
                    name,
                    sender,
                } => self.handle_join(participant, name, sender).await,
                MatchCommand::Action {
                    participant,
                    action,
                } => self.handle_action(participant, action).await,
                MatchCommand::Disconnect { participant } => {
                    self.handle_disconnect(participant).await
                }
                MatchCommand::Operator { command, reply } => {
                    self.handle_operator(command, reply).await
                }
                MatchCommand::Tick => {
                    if self.handle_tick().await {
                        break;
                    }
                }
            }
        }

        debug!(match_id = %match_id, "match actor stopped");
    }

    async fn handle_join(
        &mut self,
        participant: ParticipantId,
        name: String,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        match self.engine.join(participant, &name) {
            Ok(effects) => {
                self.connections.insert(participant, sender.clone());
                let _ = sender
                    .send(ServerMessage::Joined(JoinedInfo {
                        match_id: hex::encode(self.engine.state.id),
                        participant_id: participant.to_uuid_string(),
                        server_version: self.version.clone(),
                    }))
                    .await;
                self.apply_effects(effects).await;
            }
            Err(e) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError::from_game(&e)))
                    .await;
            }
        }
    }

    async fn handle_action(&mut self, participant: ParticipantId, action: ClientAction) {
        let result = match action {
            ClientAction::ToggleReady => self.engine.toggle_ready(participant),
            ClientAction::Submit(value) => self.engine.submit(participant, value),
            ClientAction::ConfirmRule => self.engine.confirm_rule(participant),
            ClientAction::SelfEliminate(rule) => self.engine.self_eliminate(participant, rule),
            ClientAction::VoteKick(target) => self.engine.vote_kick(participant, target),
            ClientAction::Like(target) => self.engine.like(participant, target),
            ClientAction::Leave => {
                let result = self.engine.leave(participant);
                self.connections.remove(&participant);
                result
            }
        };

        match result {
            Ok(effects) => self.apply_effects(effects).await,
            Err(e) => {
                if let Some(sender) = self.connections.get(&participant) {
                    let _ = sender
                        .send(ServerMessage::Error(ServerError::from_game(&e)))
                        .await;
                }
            }
        }
    }

    /// A dropped connection only removes the participant while the
    /// match has not started; mid-match the seat stays reserved so the
    /// participant can reconnect.
    async fn handle_disconnect(&mut self, participant: ParticipantId) {
        self.connections.remove(&participant);
        if matches!(self.engine.state.phase, Phase::Lobby | Phase::PreGame) {
            if let Ok(effects) = self.engine.leave(participant) {
                self.apply_effects(effects).await;
            }
        }
    }

    async fn handle_operator(
        &mut self,
        command: OperatorCommand,
        reply: mpsc::Sender<ServerMessage>,
    ) {
        match command {
            OperatorCommand::Reset => {
                info!(match_id = %hex::encode(self.engine.state.id), "operator reset");
                let effects = self.engine.operator_reset();
                self.apply_effects(effects).await;
            }
            OperatorCommand::ForceRule { rule_id } => {
                let Some(rule) = PermanentRule::from_id(rule_id) else {
                    let _ = reply
                        .send(ServerMessage::Error(ServerError {
                            code: crate::net::protocol::ErrorCode::InvalidInput,
                            message: format!("unknown rule id {rule_id}"),
                        }))
                        .await;
                    return;
                };
                match self.engine.operator_force_rule(rule) {
                    Ok(effects) => self.apply_effects(effects).await,
                    Err(e) => {
                        let _ = reply
                            .send(ServerMessage::Error(ServerError::from_game(&e)))
                            .await;
                    }
                }
            }
            OperatorCommand::ForceEvent { event_id } => {
                let Some(kind) = crate::game::catalog::RoundEventKind::from_id(event_id) else {
                    let _ = reply
                        .send(ServerMessage::Error(ServerError {
                            code: crate::net::protocol::ErrorCode::InvalidInput,
                            message: format!("unknown event id {event_id}"),
                        }))
                        .await;
                    return;
                };
                let effects = self.engine.operator_force_event(kind);
                self.apply_effects(effects).await;
            }
            OperatorCommand::QueryPools => {
                let pool = &self.engine.pool;
                let _ = reply
                    .send(ServerMessage::Pools(PoolsView {
                        rules_remaining: pool.remaining().iter().map(|r| r.id()).collect(),
                        forced_rule: pool.forced_rule().map(|r| r.id()),
                        forced_event: pool.forced_event().map(|k| k.id()),
                    }))
                    .await;
            }
        }
    }

    /// Returns true when the actor should shut down.
    async fn handle_tick(&mut self) -> bool {
        if self.connections.is_empty() && self.engine.state.phase == Phase::Lobby {
            self.idle_ticks += 1;
            if self.idle_ticks >= ACTOR_IDLE_SECS {
                return true;
            }
        } else {
            self.idle_ticks = 0;
        }

        let effects = self.engine.tick();
        self.apply_effects(effects).await;
        false
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        let mut broadcast_state = false;
        for effect in effects {
            match effect {
                Effect::State => broadcast_state = true,
                Effect::Kicked(id) => {
                    if let Some(sender) = self.connections.remove(&id) {
                        let _ = sender
                            .send(ServerMessage::Kicked {
                                reason: "removed by lobby vote".to_string(),
                            })
                            .await;
                    }
                    broadcast_state = true;
                }
                Effect::Settled(mut record) => {
                    info!(
                        match_id = %record.match_id,
                        rounds = record.rounds,
                        "match settled"
                    );
                    // Ledger first so the broadcast and the persisted
                    // line both carry cumulative totals.
                    self.ledger.apply(&mut record).await;
                    self.broadcast(ServerMessage::Settled(record.clone()));

                    // Fire and forget: a disk failure must not stall
                    // the actor.
                    let sink = self.sink.clone();
                    tokio::spawn(async move {
                        sink.append_logged(&record).await;
                    });
                }
            }
        }
        if broadcast_state {
            self.broadcast(ServerMessage::State(MatchView::from_match(&self.engine.state)));
        }
    }

    /// Send to every connected participant. Non-blocking: a client
    /// that cannot drain its queue loses updates, not the whole match.
    fn broadcast(&self, msg: ServerMessage) {
        for (id, sender) in &self.connections {
            if sender.try_send(msg.clone()).is_err() {
                debug!(participant = %id.to_uuid_string(), "outbound queue full, dropping update");
            }
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Routes connections to match actors, creating them on demand.
pub struct MatchRegistry {
    matches: RwLock<BTreeMap<[u8; 16], MatchHandle>>,
    sink: Arc<RecordSink>,
    ledger: Arc<AccountLedger>,
    version: String,
    max_matches: usize,
}

impl MatchRegistry {
    /// New registry backed by the given persistence, capped at
    /// `max_matches` live matches.
    pub fn new(
        sink: Arc<RecordSink>,
        ledger: Arc<AccountLedger>,
        version: String,
        max_matches: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            matches: RwLock::new(BTreeMap::new()),
            sink,
            ledger,
            version,
            max_matches,
        })
    }

    /// Handle for a match, spawning its actor if needed. Creating a
    /// match past the cap is rejected, never silently dropped.
    pub async fn handle(&self, id: [u8; 16]) -> Result<MatchHandle, RegistryError> {
        {
            let matches = self.matches.read().await;
            if let Some(handle) = matches.get(&id) {
                if !handle.is_closed() {
                    return Ok(handle.clone());
                }
            }
        }

        let mut matches = self.matches.write().await;
        // Re-check under the write lock.
        if let Some(handle) = matches.get(&id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }
        matches.retain(|_, h| !h.is_closed());
        if matches.len() >= self.max_matches {
            return Err(RegistryError::MatchLimit(self.max_matches));
        }

        let seed = derive_match_seed(&id, clock_entropy(), &[]);
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let actor = MatchActor {
            engine: MatchEngine::new(id, seed),
            connections: BTreeMap::new(),
            sink: self.sink.clone(),
            ledger: self.ledger.clone(),
            idle_ticks: 0,
            version: self.version.clone(),
        };
        tokio::spawn(actor.run(rx));

        let handle = MatchHandle { id, tx };
        matches.insert(id, handle.clone());
        info!(match_id = %hex::encode(id), "match created");
        Ok(handle)
    }

    /// Number of live matches.
    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }

    /// Outbound channel depth used for new connections.
    pub fn outbound_queue_depth() -> usize {
        OUTBOUND_QUEUE_DEPTH
    }

    /// Drive every match clock at 1 Hz and prune dead actors.
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let handles: Vec<MatchHandle> = {
                    let matches = registry.matches.read().await;
                    matches.values().cloned().collect()
                };

                let mut dead = Vec::new();
                for handle in handles {
                    match handle.try_send(MatchCommand::Tick) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Closed(_)) => dead.push(handle.id),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(match_id = %hex::encode(handle.id), "tick dropped, queue full");
                        }
                    }
                }

                if !dead.is_empty() {
                    let mut matches = registry.matches.write().await;
                    for id in dead {
                        matches.remove(&id);
                        debug!(match_id = %hex::encode(id), "match pruned");
                    }
                }
            }
        })
    }
}

/// Wall-clock nanoseconds folded into a seed entropy word.
fn clock_entropy() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

// =============================================================================
// TESTS
// =============================================================================
