//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as tagged JSON.

use serde::{Deserialize, Serialize};

use crate::game::catalog::RoundEvent;
use crate::game::phase::GameError;
use crate::game::score::MatchRecord;
use crate::game::state::{Match, Phase, RoundSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a match (or reconnect to one).
    Join(JoinRequest),

    /// Toggle lobby readiness.
    ToggleReady,

    /// Submit a value for the current round.
    Submit { value: u8 },

    /// Acknowledge the rule announcement on display.
    ConfirmRule,

    /// Bow out of the match, optionally pre-selecting the rule the
    /// resulting draw activates.
    SelfEliminate { rule_id: Option<u8> },

    /// Vote to remove a participant from the lobby.
    VoteKick { target: String },

    /// Send a like to another participant.
    Like { target: String },

    /// Leave the match.
    Leave,

    /// Operator command, gated by the shared secret.
    Operator(OperatorRequest),

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Match to join, hex encoded. Omitted for the default match.
    pub match_id: Option<String>,
    /// Stable participant id (UUID string).
    pub participant_id: String,
    /// Display name.
    pub name: String,
}

impl JoinRequest {
    /// Parse the match id from hex, if present.
    pub fn match_id_bytes(&self) -> Option<[u8; 16]> {
        let s = self.match_id.as_deref()?;
        let bytes = hex::decode(s).ok()?;
        let mut arr = [0u8; 16];
        if bytes.len() != 16 {
            return None;
        }
        arr.copy_from_slice(&bytes);
        Some(arr)
    }
}

/// Operator request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRequest {
    /// Shared operator secret.
    pub secret: String,
    /// The command proper.
    pub command: OperatorCommand,
}

/// Privileged operator commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Reset the match to a fresh lobby.
    Reset,
    /// Pre-select the next rule draw.
    ForceRule { rule_id: u8 },
    /// Force the next round's event.
    ForceEvent { event_id: u8 },
    /// Inspect the undrawn pools.
    QueryPools,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Joined(JoinedInfo),

    /// Full match view; broadcast after every state change.
    State(MatchView),

    /// Final standings after settlement.
    Settled(MatchRecord),

    /// Removed from the lobby by vote.
    Kicked { reason: String },

    /// Undrawn pools (operator query).
    Pools(PoolsView),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Join acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Match id, hex encoded.
    pub match_id: String,
    /// Echo of the participant id.
    pub participant_id: String,
    /// Server version.
    pub server_version: String,
}

/// Pool inspection result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsView {
    /// Rule ids still undrawn.
    pub rules_remaining: Vec<u8>,
    /// Pre-selected rule, if any.
    pub forced_rule: Option<u8>,
    /// Forced event kind, if any.
    pub forced_event: Option<u8>,
}

/// Error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes for client error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or unparseable message.
    InvalidInput,
    /// Command not valid in the current phase.
    WrongPhase,
    /// Match is at capacity.
    MatchFull,
    /// Server is at its connection or match limit.
    ServerFull,
    /// Sender is eliminated.
    NotAlive,
    /// Value outside 0..=100.
    OutOfRange,
    /// Unknown participant or target.
    UnknownParticipant,
    /// Requested rule already left the pool.
    RuleUnavailable,
    /// Operator secret missing or wrong.
    Unauthorized,
    /// Must join before doing anything else.
    NotJoined,
    /// Internal server error.
    InternalError,
}

impl ServerError {
    /// Map a rejected game command onto the wire taxonomy.
    pub fn from_game(err: &GameError) -> Self {
        let code = match err {
            GameError::WrongPhase(_) => ErrorCode::WrongPhase,
            GameError::UnknownParticipant => ErrorCode::UnknownParticipant,
            GameError::MatchFull => ErrorCode::MatchFull,
            GameError::NotAlive => ErrorCode::NotAlive,
            GameError::ValueOutOfRange(_) => ErrorCode::OutOfRange,
            GameError::EmptyName => ErrorCode::InvalidInput,
            GameError::SelfTarget => ErrorCode::InvalidInput,
            GameError::RuleNotPooled => ErrorCode::RuleUnavailable,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// MATCH VIEW
// =============================================================================

/// One participant as broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Participant id (UUID string).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Hit points, floored at zero for display.
    pub hp: i32,
    /// Still in the running.
    pub alive: bool,
    /// Ready in the lobby.
    pub ready: bool,
    /// Submitted this round. Hidden while a blackout is in effect.
    pub submitted: bool,
    /// Confirmed the current announcement.
    pub confirmed: bool,
    /// Damage taken last round.
    pub last_damage: i32,
    /// Won last round.
    pub won_last_round: bool,
    /// Likes received so far.
    pub likes_received: u32,
}

/// One row of a resolved round as broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultLineView {
    /// Participant id (UUID string).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Value originally submitted.
    pub original: u8,
    /// Value actually judged.
    pub used: u8,
    /// Original owner of the judged value (UUID string).
    pub source: String,
    /// Hit points after the round.
    pub hp: i32,
    /// Damage taken.
    pub damage: i32,
    /// Won the round.
    pub win: bool,
}

/// A resolved round as broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResultView {
    /// Round number.
    pub round: u32,
    /// Weighted average of the judged values.
    pub average: f64,
    /// Target the values were judged against.
    pub target: f64,
    /// Multiplier in force.
    pub multiplier: f64,
    /// Event description, if one was active.
    pub event: Option<String>,
    /// Active rule descriptions.
    pub rules: Vec<String>,
    /// Per-participant rows.
    pub lines: Vec<ResultLineView>,
}

impl RoundResultView {
    fn from_snapshot(snap: &RoundSnapshot) -> Self {
        Self {
            round: snap.round,
            average: snap.average,
            target: snap.target,
            multiplier: snap.multiplier,
            event: snap.event.clone(),
            rules: snap.rules.clone(),
            lines: snap
                .lines
                .iter()
                .map(|l| ResultLineView {
                    id: l.id.to_uuid_string(),
                    name: l.name.clone(),
                    original: l.original,
                    used: l.used,
                    source: l.source.to_uuid_string(),
                    hp: l.hp,
                    damage: l.damage,
                    win: l.win,
                })
                .collect(),
        }
    }
}

/// The rule announcement on display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementView {
    /// Numeric rule id.
    pub rule_id: u8,
    /// Text to display.
    pub text: String,
}

/// Full match state as broadcast to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchView {
    /// Match id, hex encoded.
    pub match_id: String,
    /// Current phase.
    pub phase: Phase,
    /// Round counter.
    pub round: u32,
    /// Seconds left in the current phase.
    pub timer: u32,
    /// Target multiplier in force.
    pub multiplier: f64,
    /// Active event, if any.
    pub event: Option<RoundEvent>,
    /// Active rule ids, in draw order.
    pub rule_ids: Vec<u8>,
    /// Active rule descriptions, same order.
    pub rule_texts: Vec<String>,
    /// Count of retained ghost values.
    pub ghost_count: usize,
    /// All participants, in id order.
    pub participants: Vec<ParticipantView>,
    /// Announcement on display, when in that phase.
    pub announcement: Option<AnnouncementView>,
    /// Most recently resolved round.
    pub last_result: Option<RoundResultView>,
}

impl MatchView {
    /// Build the broadcast view of a match.
    ///
    /// A blackout in effect during the input phase hides every
    /// participant's submission status; the values themselves are
    /// never in the view anyway.
    pub fn from_match(state: &Match) -> Self {
        let blackout = state.phase == Phase::Input
            && matches!(state.event, Some(RoundEvent::Blackout));

        let participants = state
            .participants
            .values()
            .map(|p| ParticipantView {
                id: p.id.to_uuid_string(),
                name: p.name.clone(),
                hp: p.hp.max(0),
                alive: p.alive,
                ready: p.ready,
                submitted: if blackout { false } else { p.submitted },
                confirmed: p.confirmed,
                last_damage: p.last_damage,
                won_last_round: p.won_last_round,
                likes_received: p.likes_received,
            })
            .collect();

        let announcement = if state.phase == Phase::RuleAnnouncement {
            state.announcements.front().map(|a| AnnouncementView {
                rule_id: a.rule.id(),
                text: a.text.clone(),
            })
        } else {
            None
        };

        Self {
            match_id: hex::encode(state.id),
            phase: state.phase,
            round: state.round,
            timer: state.timer,
            multiplier: state.multiplier,
            event: state.event,
            rule_ids: state.rules.iter().map(|r| r.id()).collect(),
            rule_texts: state.rules.iter().map(|r| r.description().to_string()).collect(),
            ghost_count: state.ghosts.len(),
            participants,
            announcement,
            last_result: state.last_result.as_ref().map(RoundResultView::from_snapshot),
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{EliminationCause, ParticipantId};

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::Join(JoinRequest {
            match_id: None,
            participant_id: "f47ac10b-58cc-4372-a567-0e02b2c3d479".to_string(),
            name: "alice".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"join\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        match parsed {
            ClientMessage::Join(req) => assert_eq!(req.name, "alice"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_submit_tag() {
        let json = r#"{"type":"submit","value":42}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::Submit { value } => assert_eq!(value, 42),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_operator_command_tags() {
        let json = r#"{"type":"operator","secret":"s","command":{"op":"force_rule","rule_id":3}}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::Operator(req) => {
                assert_eq!(req.secret, "s");
                assert!(matches!(
                    req.command,
                    OperatorCommand::ForceRule { rule_id: 3 }
                ));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn test_join_request_match_id_parsing() {
        let req = JoinRequest {
            match_id: Some(hex::encode([7u8; 16])),
            participant_id: String::new(),
            name: String::new(),
        };
        assert_eq!(req.match_id_bytes(), Some([7u8; 16]));

        let bad = JoinRequest {
            match_id: Some("zz".to_string()),
            participant_id: String::new(),
            name: String::new(),
        };
        assert_eq!(bad.match_id_bytes(), None);
    }

    #[test]
    fn test_error_mapping() {
        let err = ServerError::from_game(&GameError::ValueOutOfRange(120));
        assert_eq!(err.code, ErrorCode::OutOfRange);
        assert!(err.message.contains("120"));

        let err = ServerError::from_game(&GameError::MatchFull);
        assert_eq!(err.code, ErrorCode::MatchFull);
    }

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_string(&Phase::RuleAnnouncement).unwrap();
        assert_eq!(json, "\"RULE_ANNOUNCEMENT\"");
        let json = serde_json::to_string(&Phase::PreGame).unwrap();
        assert_eq!(json, "\"PRE_GAME\"");
    }

    #[test]
    fn test_match_view_basic() {
        let mut m = Match::new([1; 16], 9);
        m.add_participant(ParticipantId::new([2; 16]), "a".to_string());
        m.add_participant(ParticipantId::new([3; 16]), "b".to_string());

        let view = MatchView::from_match(&m);
        assert_eq!(view.match_id, hex::encode([1u8; 16]));
        assert_eq!(view.participants.len(), 2);
        assert_eq!(view.phase, Phase::Lobby);
        assert!(view.last_result.is_none());
        assert!(view.announcement.is_none());
    }

    #[test]
    fn test_match_view_hides_negative_hp() {
        let mut m = Match::new([1; 16], 9);
        let id = ParticipantId::new([2; 16]);
        m.add_participant(id, "a".to_string());
        m.participant_mut(&id).unwrap().hp = -1;
        m.eliminate(id, EliminationCause::Forced, None);

        let view = MatchView::from_match(&m);
        assert_eq!(view.participants[0].hp, 0);
        assert!(!view.participants[0].alive);
    }

    #[test]
    fn test_blackout_hides_submission_status() {
        let mut m = Match::new([1; 16], 9);
        let id = ParticipantId::new([2; 16]);
        m.add_participant(id, "a".to_string());
        m.phase = Phase::Input;
        m.event = Some(RoundEvent::Blackout);
        m.participant_mut(&id).unwrap().submitted = true;

        let view = MatchView::from_match(&m);
        assert!(!view.participants[0].submitted);

        // The flag reappears outside the input phase.
        m.phase = Phase::Result;
        let view = MatchView::from_match(&m);
        assert!(view.participants[0].submitted);
    }

    #[test]
    fn test_server_message_state_roundtrip() {
        let m = Match::new([1; 16], 9);
        let msg = ServerMessage::State(MatchView::from_match(&m));
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(ServerMessage::from_json(&json).is_ok());
    }
}
