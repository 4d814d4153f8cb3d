//! Phase Machine
//!
//! Drives a match through its lifecycle: LOBBY, PRE_GAME, INPUT,
//! RESULT, RULE_ANNOUNCEMENT, END. Every participant command and every
//! timer tick enters through here; the engine mutates the match state
//! and reports what the caller has to do about it as [`Effect`]s.
//!
//! The engine is synchronous and single-threaded. The network layer
//! owns one engine per match behind an actor task, so no locking
//! happens here.

use thiserror::Error;

use crate::game::catalog::{PermanentRule, RoundEvent};
use crate::game::pool::ModifierPool;
use crate::game::resolve::{resolve, RoundContext, RoundEntry};
use crate::game::score::{settle, MatchRecord};
use crate::game::state::{
    EliminationCause, Match, ParticipantId, Phase, RuleAnnouncement,
};
use crate::{DEFAULT_MULTIPLIER, MAX_PARTICIPANTS, MIN_PARTICIPANTS};

// =============================================================================
// TIMERS
// =============================================================================

/// Countdown before round one, seconds.
pub const PRE_GAME_SECS: u32 = 60;

/// Submission window per round, seconds.
pub const INPUT_SECS: u32 = 30;

/// Round outcome display, seconds.
pub const RESULT_SECS: u32 = 5;

/// Rule announcement display, seconds.
pub const RULE_SECS: u32 = 5;

/// Idle time on the end screen before the match resets, seconds.
pub const END_IDLE_SECS: u32 = 120;

// =============================================================================
// ERRORS & EFFECTS
// =============================================================================

/// A rejected participant command.
#[derive(Debug, Error, PartialEq)]
pub enum GameError {
    /// Command not valid in the current phase.
    #[error("action not allowed in phase {0:?}")]
    WrongPhase(Phase),

    /// Sender or target is not in this match.
    #[error("unknown participant")]
    UnknownParticipant,

    /// Lobby is at capacity.
    #[error("match is full")]
    MatchFull,

    /// Sender is eliminated.
    #[error("participant is no longer alive")]
    NotAlive,

    /// Submission outside 0..=100.
    #[error("value {0} is out of range 0..=100")]
    ValueOutOfRange(u8),

    /// Join with a blank display name.
    #[error("display name must not be empty")]
    EmptyName,

    /// Vote or like aimed at the sender themselves.
    #[error("cannot target yourself")]
    SelfTarget,

    /// Requested rule has already been drawn.
    #[error("rule is no longer in the pool")]
    RuleNotPooled,
}

/// Side effects the caller must carry out after a successful command.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Match state changed; broadcast the updated view.
    State,
    /// A participant was voted out of the lobby; drop their connection.
    Kicked(ParticipantId),
    /// The match settled; persist the record and apply score deltas.
    Settled(MatchRecord),
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Effect::State, Effect::State) => true,
            (Effect::Kicked(a), Effect::Kicked(b)) => a == b,
            (Effect::Settled(a), Effect::Settled(b)) => a.match_id == b.match_id,
            _ => false,
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// One match's state plus its modifier pool, driven by commands and
/// one-second ticks.
#[derive(Clone, Debug)]
pub struct MatchEngine {
    /// The match state proper.
    pub state: Match,
    /// Undrawn rules and pending operator forcings.
    pub pool: ModifierPool,
}

impl MatchEngine {
    /// Fresh engine in the lobby.
    pub fn new(id: [u8; 16], seed: u64) -> Self {
        Self {
            state: Match::new(id, seed),
            pool: ModifierPool::new(),
        }
    }

    // ------------------------------------------------------------------
    // Participant commands
    // ------------------------------------------------------------------

    /// Join the lobby. Re-joining with a known id is a no-op, which is
    /// what a reconnect looks like from here.
    pub fn join(&mut self, id: ParticipantId, name: &str) -> Result<Vec<Effect>, GameError> {
        if self.state.participants.contains_key(&id) {
            return Ok(vec![Effect::State]);
        }
        if !matches!(self.state.phase, Phase::Lobby | Phase::PreGame) {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        if name.trim().is_empty() {
            return Err(GameError::EmptyName);
        }
        if self.state.participants.len() >= MAX_PARTICIPANTS {
            return Err(GameError::MatchFull);
        }

        // A new, unready joiner cancels a running countdown.
        if self.state.phase == Phase::PreGame {
            self.state.phase = Phase::Lobby;
            self.state.timer = 0;
        }
        self.state.add_participant(id, name.trim().to_string());
        Ok(vec![Effect::State])
    }

    /// Leave the match. In the lobby this removes the participant; mid
    /// match it is a voluntary elimination.
    pub fn leave(&mut self, id: ParticipantId) -> Result<Vec<Effect>, GameError> {
        if !self.state.participants.contains_key(&id) {
            return Ok(Vec::new());
        }

        match self.state.phase {
            Phase::Lobby | Phase::PreGame | Phase::End => {
                self.state.participants.remove(&id);
                self.state.kick_votes.remove(&id);
                for voters in self.state.kick_votes.values_mut() {
                    voters.remove(&id);
                }
                if self.state.phase == Phase::PreGame
                    && (self.state.participants.len() < MIN_PARTICIPANTS
                        || !self.state.all_ready())
                {
                    self.state.phase = Phase::Lobby;
                    self.state.timer = 0;
                }
                Ok(vec![Effect::State])
            }
            Phase::Input | Phase::Result | Phase::RuleAnnouncement => {
                let alive = self
                    .state
                    .participant(&id)
                    .map(|p| p.alive)
                    .unwrap_or(false);
                if !alive {
                    return Ok(vec![Effect::State]);
                }
                let ghost = self.state.participant(&id).and_then(|p| p.guess);
                self.state.eliminate(id, EliminationCause::Voluntary, ghost);
                self.after_midround_elimination()
            }
        }
    }

    /// Toggle lobby readiness. All ready with enough participants
    /// starts the pre-game countdown; anyone backing out cancels it.
    pub fn toggle_ready(&mut self, id: ParticipantId) -> Result<Vec<Effect>, GameError> {
        if !matches!(self.state.phase, Phase::Lobby | Phase::PreGame) {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        let p = self
            .state
            .participant_mut(&id)
            .ok_or(GameError::UnknownParticipant)?;
        p.ready = !p.ready;

        if self.state.phase == Phase::Lobby
            && self.state.participants.len() >= MIN_PARTICIPANTS
            && self.state.all_ready()
        {
            self.state.phase = Phase::PreGame;
            self.state.timer = PRE_GAME_SECS;
        } else if self.state.phase == Phase::PreGame && !self.state.all_ready() {
            self.state.phase = Phase::Lobby;
            self.state.timer = 0;
        }
        Ok(vec![Effect::State])
    }

    /// Submit a value for the current round. The round resolves early
    /// once every living participant has submitted.
    pub fn submit(&mut self, id: ParticipantId, value: u8) -> Result<Vec<Effect>, GameError> {
        if self.state.phase != Phase::Input {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        if value > 100 {
            return Err(GameError::ValueOutOfRange(value));
        }
        let p = self
            .state
            .participant_mut(&id)
            .ok_or(GameError::UnknownParticipant)?;
        if !p.alive {
            return Err(GameError::NotAlive);
        }
        p.guess = Some(value);
        p.submitted = true;

        if self.state.all_living_submitted() {
            return self.resolve_round();
        }
        Ok(vec![Effect::State])
    }

    /// Acknowledge the rule on display. The announcement advances once
    /// every living participant has confirmed (or its timer runs out).
    pub fn confirm_rule(&mut self, id: ParticipantId) -> Result<Vec<Effect>, GameError> {
        if self.state.phase != Phase::RuleAnnouncement {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        let p = self
            .state
            .participant_mut(&id)
            .ok_or(GameError::UnknownParticipant)?;
        if !p.alive {
            return Err(GameError::NotAlive);
        }
        p.confirmed = true;

        if self.state.all_living_confirmed() {
            return self.advance_announcement();
        }
        Ok(vec![Effect::State])
    }

    /// Bow out of the match during the input phase. The departing
    /// participant may pre-select which rule the resulting draw
    /// activates, provided it is still in the pool.
    pub fn self_eliminate(
        &mut self,
        id: ParticipantId,
        chosen: Option<PermanentRule>,
    ) -> Result<Vec<Effect>, GameError> {
        if self.state.phase != Phase::Input {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        let p = self
            .state
            .participant(&id)
            .ok_or(GameError::UnknownParticipant)?;
        if !p.alive {
            return Err(GameError::NotAlive);
        }
        if let Some(rule) = chosen {
            if !self.pool.force_rule(rule) {
                return Err(GameError::RuleNotPooled);
            }
        }

        let ghost = self.state.participant(&id).and_then(|p| p.guess);
        self.state.eliminate(id, EliminationCause::Voluntary, ghost);
        self.after_midround_elimination()
    }

    /// Cast a lobby vote to remove a participant. An absolute majority
    /// of the lobby removes the target.
    pub fn vote_kick(
        &mut self,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> Result<Vec<Effect>, GameError> {
        if self.state.phase != Phase::Lobby {
            return Err(GameError::WrongPhase(self.state.phase));
        }
        if voter == target {
            return Err(GameError::SelfTarget);
        }
        if !self.state.participants.contains_key(&voter)
            || !self.state.participants.contains_key(&target)
        {
            return Err(GameError::UnknownParticipant);
        }

        let votes = {
            let voters = self.state.kick_votes.entry(target).or_default();
            voters.insert(voter);
            voters.len()
        };
        // Absolute majority over the full lobby, target included.
        if votes >= self.state.participants.len() / 2 + 1 {
            self.state.participants.remove(&target);
            self.state.kick_votes.remove(&target);
            for voters in self.state.kick_votes.values_mut() {
                voters.remove(&target);
            }
            return Ok(vec![Effect::Kicked(target), Effect::State]);
        }
        Ok(vec![Effect::State])
    }

    /// Send a like to another participant.
    pub fn like(
        &mut self,
        from: ParticipantId,
        to: ParticipantId,
    ) -> Result<Vec<Effect>, GameError> {
        if from == to {
            return Err(GameError::SelfTarget);
        }
        if !self.state.participants.contains_key(&from)
            || !self.state.participants.contains_key(&to)
        {
            return Err(GameError::UnknownParticipant);
        }
        if let Some(p) = self.state.participant_mut(&from) {
            p.likes_sent += 1;
        }
        if let Some(p) = self.state.participant_mut(&to) {
            p.likes_received += 1;
        }
        Ok(vec![Effect::State])
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Reset the match to a fresh lobby, keeping the participants.
    pub fn operator_reset(&mut self) -> Vec<Effect> {
        self.state.reset();
        self.pool = ModifierPool::new();
        vec![Effect::State]
    }

    /// Pre-select the next rule draw. Fails if the rule already left
    /// the pool.
    pub fn operator_force_rule(&mut self, rule: PermanentRule) -> Result<Vec<Effect>, GameError> {
        if !self.pool.force_rule(rule) {
            return Err(GameError::RuleNotPooled);
        }
        Ok(vec![Effect::State])
    }

    /// Force the next round's event.
    pub fn operator_force_event(&mut self, kind: crate::game::catalog::RoundEventKind) -> Vec<Effect> {
        self.pool.force_event(kind);
        vec![Effect::State]
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    /// Advance the match clock by one second.
    pub fn tick(&mut self) -> Vec<Effect> {
        match self.state.phase {
            Phase::Lobby => Vec::new(),
            Phase::PreGame => {
                if self.dec_timer() {
                    self.begin_round()
                } else {
                    vec![Effect::State]
                }
            }
            Phase::Input => {
                if self.dec_timer() {
                    // Unsubmitted survivors get a uniform random value.
                    let pending: Vec<ParticipantId> = self
                        .state
                        .participants
                        .values()
                        .filter(|p| p.alive && !p.submitted)
                        .map(|p| p.id)
                        .collect();
                    for id in pending {
                        let v = self.state.rng.next_guess();
                        if let Some(p) = self.state.participant_mut(&id) {
                            p.guess = Some(v);
                            p.submitted = true;
                        }
                    }
                    self.resolve_round().unwrap_or_default()
                } else {
                    vec![Effect::State]
                }
            }
            Phase::Result => {
                if self.dec_timer() {
                    self.after_result()
                } else {
                    vec![Effect::State]
                }
            }
            Phase::RuleAnnouncement => {
                if self.dec_timer() {
                    self.advance_announcement().unwrap_or_default()
                } else {
                    vec![Effect::State]
                }
            }
            Phase::End => {
                if self.dec_timer() {
                    self.operator_reset()
                } else {
                    vec![Effect::State]
                }
            }
        }
    }

    /// Decrement the phase timer; true when it reaches zero.
    fn dec_timer(&mut self) -> bool {
        self.state.timer = self.state.timer.saturating_sub(1);
        self.state.timer == 0
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Start a new input round: clear per-round state, roll the event,
    /// set the multiplier.
    fn begin_round(&mut self) -> Vec<Effect> {
        self.state.round += 1;
        for p in self.state.participants.values_mut() {
            p.reset_for_round();
            p.confirmed = false;
            p.last_damage = 0;
            p.won_last_round = false;
        }

        let alive = self.state.living_count();
        self.state.event = self.pool.select_event(alive, &mut self.state.rng);
        self.state.multiplier = match self.state.event {
            Some(RoundEvent::MultiplierShock { multiplier }) => multiplier,
            _ => DEFAULT_MULTIPLIER,
        };

        self.state.phase = Phase::Input;
        self.state.timer = INPUT_SECS;
        vec![Effect::State]
    }

    /// Judge the round and apply every outcome.
    fn resolve_round(&mut self) -> Result<Vec<Effect>, GameError> {
        // Safety net for callers that skipped the timeout fill.
        let pending: Vec<ParticipantId> = self
            .state
            .participants
            .values()
            .filter(|p| p.alive && p.guess.is_none())
            .map(|p| p.id)
            .collect();
        for id in pending {
            let v = self.state.rng.next_guess();
            if let Some(p) = self.state.participant_mut(&id) {
                p.guess = Some(v);
                p.submitted = true;
            }
        }

        let entries: Vec<RoundEntry> = self
            .state
            .participants
            .values()
            .filter(|p| p.alive)
            .map(|p| RoundEntry {
                id: p.id,
                name: p.name.clone(),
                value: p.guess.unwrap_or(0),
                hp: p.hp,
            })
            .collect();
        if entries.is_empty() {
            return Ok(self.enter_end());
        }

        let ctx = RoundContext {
            round: self.state.round,
            rules: &self.state.rules,
            event: self.state.event,
            multiplier: self.state.multiplier,
            ghosts: &self.state.ghosts,
        };
        let resolution = resolve(&ctx, &entries, &mut self.state.rng);

        let mut fell: Vec<(ParticipantId, u8)> = Vec::new();
        for o in &resolution.outcomes {
            if let Some(p) = self.state.participant_mut(&o.id) {
                p.hp = o.hp_after;
                p.last_damage = o.damage;
                p.won_last_round = o.win;
            }
            if o.eliminated {
                // The judged (post-swap) value is what lingers as a ghost.
                fell.push((o.id, o.used));
            }
        }
        for (id, ghost) in &fell {
            self.state
                .eliminate(*id, EliminationCause::Forced, Some(*ghost));
        }

        if !fell.is_empty() {
            self.draw_rule_for_elimination();
        }

        self.state.last_result = Some(resolution.snapshot.clone());
        self.state.history.push(resolution.snapshot);
        self.state.phase = Phase::Result;
        self.state.timer = RESULT_SECS;
        Ok(vec![Effect::State])
    }

    /// One pool draw per elimination trigger, with the final-duel text
    /// substituted when Extremity activates by forcing.
    fn draw_rule_for_elimination(&mut self) {
        let alive_after = self.state.living_count();
        if alive_after < 2 {
            return;
        }
        if let Some(rule) = self
            .pool
            .draw_on_elimination(alive_after, &mut self.state.rng)
        {
            self.state.rules.push(rule);
            let text = if rule == PermanentRule::Extremity && alive_after == 2 {
                PermanentRule::FINAL_DUEL_TEXT.to_string()
            } else {
                rule.description().to_string()
            };
            self.state
                .announcements
                .push_back(RuleAnnouncement { rule, text });
        }
    }

    /// A participant fell outside resolution (leave or self-exit).
    fn after_midround_elimination(&mut self) -> Result<Vec<Effect>, GameError> {
        if self.state.living_count() <= 1 {
            return Ok(self.enter_end());
        }
        self.draw_rule_for_elimination();

        if self.state.phase == Phase::Input && self.state.all_living_submitted() {
            return self.resolve_round();
        }
        if self.state.phase == Phase::RuleAnnouncement && self.state.all_living_confirmed() {
            return self.advance_announcement();
        }
        Ok(vec![Effect::State])
    }

    /// Leave the result screen: settle, announce, or start the next
    /// round.
    fn after_result(&mut self) -> Vec<Effect> {
        if self.state.living_count() <= 1 {
            return self.enter_end();
        }
        if !self.state.announcements.is_empty() {
            for p in self.state.participants.values_mut() {
                p.confirmed = false;
            }
            self.state.phase = Phase::RuleAnnouncement;
            self.state.timer = RULE_SECS;
            return vec![Effect::State];
        }
        self.begin_round()
    }

    /// Drop the announcement on display; show the next one or start
    /// the round.
    fn advance_announcement(&mut self) -> Result<Vec<Effect>, GameError> {
        self.state.announcements.pop_front();
        for p in self.state.participants.values_mut() {
            p.confirmed = false;
        }
        if self.state.announcements.is_empty() {
            Ok(self.begin_round())
        } else {
            self.state.timer = RULE_SECS;
            Ok(vec![Effect::State])
        }
    }

    /// Terminal transition. Settlement runs exactly once per match
    /// instance.
    fn enter_end(&mut self) -> Vec<Effect> {
        self.state.phase = Phase::End;
        self.state.timer = END_IDLE_SECS;

        let mut effects = vec![Effect::State];
        if !self.state.settled {
            self.state.settled = true;
            effects.push(Effect::Settled(settle(&self.state)));
        }
        effects
    }
}

// =============================================================================
// TESTS
// =============================================================================
