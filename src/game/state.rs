//! Game State Definitions
//!
//! All state for one match. Participants live in a BTreeMap so every
//! sweep over them is in stable id order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::rng::MatchRng;
use crate::game::catalog::{PermanentRule, RoundEvent};
use crate::{DEFAULT_MULTIPLIER, MAX_HP};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Unique participant identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Why a participant left the living set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    /// Hit points reached zero through round damage.
    Forced,
    /// The participant gave up voluntarily.
    Voluntary,
}

/// State of a single participant in a match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    /// Stable account id.
    pub id: ParticipantId,

    /// Display name.
    pub name: String,

    /// Hit points. Damage application may push this negative before
    /// the death check; never clamp upward.
    pub hp: i32,

    /// Still in the running?
    pub alive: bool,

    /// Current round submission, if any.
    pub guess: Option<u8>,

    /// Submitted this round.
    pub submitted: bool,

    /// Ready in the lobby.
    pub ready: bool,

    /// Confirmed the current rule announcement.
    pub confirmed: bool,

    /// Damage taken in the last resolved round.
    pub last_damage: i32,

    /// Won the last resolved round.
    pub won_last_round: bool,

    /// Cumulative likes received from other participants.
    pub likes_received: u32,

    /// Cumulative likes sent.
    pub likes_sent: u32,

    /// Set when the participant is eliminated.
    pub elimination_cause: Option<EliminationCause>,

    /// Hit points at the moment of elimination. Drives the scoring
    /// exception for voluntary exits with hp still above 1.
    pub hp_at_elimination: Option<i32>,
}

impl Participant {
    /// Create a new participant at full health.
    pub fn new(id: ParticipantId, name: String) -> Self {
        Self {
            id,
            name,
            hp: MAX_HP,
            alive: true,
            guess: None,
            submitted: false,
            ready: false,
            confirmed: false,
            last_damage: 0,
            won_last_round: false,
            likes_received: 0,
            likes_sent: 0,
            elimination_cause: None,
            hp_at_elimination: None,
        }
    }

    /// Clear per-round submission state. Called entering INPUT.
    pub fn reset_for_round(&mut self) {
        self.guess = None;
        self.submitted = false;
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Current phase of a match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Waiting for participants to join and ready up.
    #[default]
    Lobby,
    /// All ready; fixed countdown before round one.
    PreGame,
    /// Survivors submit their numbers.
    Input,
    /// Round outcome on display.
    Result,
    /// A newly drawn permanent rule on display.
    RuleAnnouncement,
    /// Match over; standings on display until reset.
    End,
}

// =============================================================================
// ROUND SNAPSHOT
// =============================================================================

/// One participant's row in a resolved round. Immutable once recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotLine {
    /// Participant id.
    pub id: ParticipantId,
    /// Display name at resolution time.
    pub name: String,
    /// Value originally submitted (or defaulted).
    pub original: u8,
    /// Value actually judged, after any chaos swap.
    pub used: u8,
    /// Who originally owned the judged value (differs under ChaosSwap).
    pub source: ParticipantId,
    /// Hit points after damage and heals.
    pub hp: i32,
    /// Damage dealt to this participant.
    pub damage: i32,
    /// Won the round.
    pub win: bool,
}

/// Immutable record of one resolved round, appended to match history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round number.
    pub round: u32,
    /// Weighted average of the judged submissions.
    pub average: f64,
    /// Target the submissions were judged against.
    pub target: f64,
    /// Multiplier in force this round.
    pub multiplier: f64,
    /// Description of the active temporary event, if any.
    pub event: Option<String>,
    /// Descriptions of every active permanent rule.
    pub rules: Vec<String>,
    /// Per-participant outcomes, in id order.
    pub lines: Vec<SnapshotLine>,
}

// =============================================================================
// ANNOUNCEMENT
// =============================================================================

/// A queued permanent-rule announcement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleAnnouncement {
    /// The rule that activated.
    pub rule: PermanentRule,
    /// Text to show; differs from the catalog text under final-duel forcing.
    pub text: String,
}

// =============================================================================
// MATCH
// =============================================================================

/// Complete state of one match. Owned by a single actor task; all
/// mutation is funneled through its command queue.
#[derive(Clone, Debug)]
pub struct Match {
    /// Match identifier.
    pub id: [u8; 16],

    /// Current phase.
    pub phase: Phase,

    /// Round counter. Only ever increases within a match.
    pub round: u32,

    /// Countdown in seconds for timer-governed phases.
    pub timer: u32,

    /// All participants, keyed by id for stable iteration.
    pub participants: BTreeMap<ParticipantId, Participant>,

    /// Active permanent rules, in draw order. Append-only.
    pub rules: Vec<PermanentRule>,

    /// Temporary event for the current round.
    pub event: Option<RoundEvent>,

    /// Target multiplier for the current round.
    pub multiplier: f64,

    /// Values retained from eliminated participants.
    pub ghosts: Vec<u8>,

    /// Elimination order, oldest first. Append-only, each id at most once.
    pub elimination_order: Vec<ParticipantId>,

    /// Queued permanent-rule announcements.
    pub announcements: VecDeque<RuleAnnouncement>,

    /// Snapshot of the most recently resolved round.
    pub last_result: Option<RoundSnapshot>,

    /// Full round history. Append-only.
    pub history: Vec<RoundSnapshot>,

    /// Lobby vote-kick tallies: target id to set of voters.
    pub kick_votes: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,

    /// Settlement already ran for this match instance.
    pub settled: bool,

    /// Match RNG.
    pub rng: MatchRng,
}

impl Match {
    /// Create a fresh match in the lobby.
    pub fn new(id: [u8; 16], seed: u64) -> Self {
        Self {
            id,
            phase: Phase::Lobby,
            round: 0,
            timer: 0,
            participants: BTreeMap::new(),
            rules: Vec::new(),
            event: None,
            multiplier: DEFAULT_MULTIPLIER,
            ghosts: Vec::new(),
            elimination_order: Vec::new(),
            announcements: VecDeque::new(),
            last_result: None,
            history: Vec::new(),
            kick_votes: BTreeMap::new(),
            settled: false,
            rng: MatchRng::new(seed),
        }
    }

    /// Add a participant. Caller enforces phase and capacity.
    pub fn add_participant(&mut self, id: ParticipantId, name: String) {
        self.participants.insert(id, Participant::new(id, name));
    }

    /// Get a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Get a participant mutably by id.
    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Ids of living participants, in id order.
    pub fn living_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect()
    }

    /// Count of living participants.
    pub fn living_count(&self) -> usize {
        self.participants.values().filter(|p| p.alive).count()
    }

    /// True when a rule is in the active set.
    pub fn rule_active(&self, rule: PermanentRule) -> bool {
        self.rules.contains(&rule)
    }

    /// All current participants marked ready (lobby start condition,
    /// minimum count enforced by the caller).
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.ready)
    }

    /// Every living participant has submitted this round.
    pub fn all_living_submitted(&self) -> bool {
        let mut any = false;
        for p in self.participants.values().filter(|p| p.alive) {
            any = true;
            if !p.submitted {
                return false;
            }
        }
        any
    }

    /// Every living participant has confirmed the current announcement.
    pub fn all_living_confirmed(&self) -> bool {
        let mut any = false;
        for p in self.participants.values().filter(|p| p.alive) {
            any = true;
            if !p.confirmed {
                return false;
            }
        }
        any
    }

    /// Mark a participant eliminated and record the bookkeeping: cause,
    /// hp at elimination, ghost value, elimination order.
    ///
    /// Idempotent: a second call for the same id is a no-op, keeping
    /// the elimination order free of duplicates.
    pub fn eliminate(&mut self, id: ParticipantId, cause: EliminationCause, ghost_value: Option<u8>) {
        let Some(p) = self.participants.get_mut(&id) else {
            return;
        };
        if !p.alive {
            return;
        }
        p.alive = false;
        p.elimination_cause = Some(cause);
        p.hp_at_elimination = Some(p.hp);
        if let Some(v) = ghost_value {
            self.ghosts.push(v);
        }
        self.elimination_order.push(id);
    }

    /// Reset everything except identities back to a fresh lobby.
    pub fn reset(&mut self) {
        self.phase = Phase::Lobby;
        self.round = 0;
        self.timer = 0;
        self.rules.clear();
        self.event = None;
        self.multiplier = DEFAULT_MULTIPLIER;
        self.ghosts.clear();
        self.elimination_order.clear();
        self.announcements.clear();
        self.last_result = None;
        self.history.clear();
        self.kick_votes.clear();
        self.settled = false;

        for p in self.participants.values_mut() {
            p.hp = MAX_HP;
            p.alive = true;
            p.guess = None;
            p.submitted = false;
            p.ready = false;
            p.confirmed = false;
            p.last_damage = 0;
            p.won_last_round = false;
            p.elimination_cause = None;
            p.hp_at_elimination = None;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
