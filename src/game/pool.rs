//! Modifier Pool
//!
//! Per-match draw pool of permanent rules (without replacement) and the
//! per-round temporary event selection, including operator overrides
//! and the final-duel forcing of Extremity.

use serde::{Deserialize, Serialize};

use crate::core::rng::MatchRng;
use crate::game::catalog::{PermanentRule, RoundEvent, RoundEventKind};

/// Probability (percent) that a round gets a temporary event.
pub const EVENT_PERCENT: u32 = 30;

/// Probability (percent) of a temporary event when exactly two remain;
/// the selection is then always ChaosSwap.
pub const FINAL_DUEL_EVENT_PERCENT: u32 = 75;

/// Mutable modifier state for one match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModifierPool {
    /// Not-yet-drawn permanent rules.
    remaining: Vec<PermanentRule>,
    /// Pre-selected rule for the next elimination draw (operator
    /// override or a self-eliminating participant's choice).
    forced_rule: Option<PermanentRule>,
    /// Forced temporary event for the next round. Consumed on use.
    forced_event: Option<RoundEventKind>,
}

impl Default for ModifierPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ModifierPool {
    /// Seed a fresh pool with the whole catalog.
    pub fn new() -> Self {
        Self {
            remaining: PermanentRule::ALL.to_vec(),
            forced_rule: None,
            forced_event: None,
        }
    }

    /// Rules still in the pool.
    pub fn remaining(&self) -> &[PermanentRule] {
        &self.remaining
    }

    /// True if `rule` has not been drawn yet.
    pub fn contains(&self, rule: PermanentRule) -> bool {
        self.remaining.contains(&rule)
    }

    /// Pre-select a pooled rule for the next elimination draw.
    /// Returns false if the rule has already been drawn.
    pub fn force_rule(&mut self, rule: PermanentRule) -> bool {
        if self.contains(rule) {
            self.forced_rule = Some(rule);
            true
        } else {
            false
        }
    }

    /// Force a specific temporary event for the next round.
    pub fn force_event(&mut self, kind: RoundEventKind) {
        self.forced_event = Some(kind);
    }

    /// The pre-selected rule, if one is pending.
    pub fn forced_rule(&self) -> Option<PermanentRule> {
        self.forced_rule
    }

    /// The forced event kind, if one is pending.
    pub fn forced_event(&self) -> Option<RoundEventKind> {
        self.forced_event
    }

    /// Remove a specific rule from the pool, if present.
    fn take(&mut self, rule: PermanentRule) -> Option<PermanentRule> {
        let idx = self.remaining.iter().position(|r| *r == rule)?;
        Some(self.remaining.swap_remove(idx))
    }

    /// Draw the rule activated by an elimination. Called at most once
    /// per resolution pass, however many participants fell.
    ///
    /// Precedence: a pre-selected rule still in the pool wins; then,
    /// when the pass leaves exactly two alive, Extremity is forced if
    /// still pooled; otherwise the draw is uniform. Empty pool draws
    /// nothing.
    pub fn draw_on_elimination(
        &mut self,
        alive_after: usize,
        rng: &mut MatchRng,
    ) -> Option<PermanentRule> {
        if let Some(rule) = self.forced_rule.take() {
            if let Some(rule) = self.take(rule) {
                return Some(rule);
            }
        }
        if alive_after == 2 {
            if let Some(rule) = self.take(PermanentRule::Extremity) {
                return Some(rule);
            }
        }
        rng.draw(&mut self.remaining)
    }

    /// Select the temporary event for a new round, rolling its
    /// parameters. A forced event always fires and is consumed.
    /// Under normal odds ChaosSwap is excluded; in a final duel the
    /// roll succeeds far more often and always yields ChaosSwap.
    pub fn select_event(&mut self, alive: usize, rng: &mut MatchRng) -> Option<RoundEvent> {
        if let Some(kind) = self.forced_event.take() {
            return Some(kind.roll(rng));
        }

        if alive == 2 {
            if rng.chance(FINAL_DUEL_EVENT_PERCENT) {
                return Some(RoundEventKind::ChaosSwap.roll(rng));
            }
            return None;
        }

        if rng.chance(EVENT_PERCENT) {
            let kinds: Vec<RoundEventKind> = RoundEventKind::ALL
                .into_iter()
                .filter(|k| *k != RoundEventKind::ChaosSwap)
                .collect();
            let kind = *rng.choose(&kinds)?;
            return Some(kind.roll(rng));
        }

        None
    }
}

// =============================================================================
// TESTS
// =============================================================================
