//! Rule and Event Catalog
//!
//! The fixed set of permanent rules and temporary round events. Both
//! are closed enums so the resolver's dispatch is exhaustive: adding a
//! rule without handling its effect fails to compile.

use serde::{Deserialize, Serialize};

use crate::core::rng::MatchRng;

/// A permanent rule modifier. Once drawn from the pool it stays active
/// for the remainder of the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PermanentRule {
    /// Duplicated submissions are invalidated; their owners cannot win.
    Conflict = 1,
    /// Winner error below 1 doubles the damage dealt to losers.
    Precision = 2,
    /// If both 0 and 100 are submitted, everyone holding 100 wins outright.
    Extremity = 3,
    /// Eliminated participants' final values keep weighing into the average.
    Ghost = 4,
    /// Submissions from participants below 3 hp weigh triple.
    Desperation = 5,
    /// The participant(s) with the highest hp take one extra damage on a loss.
    HighestHpPenalty = 6,
}

impl PermanentRule {
    /// Every rule, in catalog order. This is the pool seeded at match start.
    pub const ALL: [PermanentRule; 6] = [
        PermanentRule::Conflict,
        PermanentRule::Precision,
        PermanentRule::Extremity,
        PermanentRule::Ghost,
        PermanentRule::Desperation,
        PermanentRule::HighestHpPenalty,
    ];

    /// Stable numeric id, used on the operator surface.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a rule by its numeric id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.id() == id)
    }

    /// Announcement text shown when the rule activates.
    pub fn description(self) -> &'static str {
        match self {
            PermanentRule::Conflict => {
                "Conflict: duplicated numbers are invalid; their owners cannot win this round."
            }
            PermanentRule::Precision => {
                "Precision: if the winner's error is below 1, losers take 2 damage."
            }
            PermanentRule::Extremity => {
                "Extremity: if 0 and 100 both appear, whoever chose 100 wins outright."
            }
            PermanentRule::Ghost => {
                "Ghost: the fallen keep playing - their last numbers still pull the average."
            }
            PermanentRule::Desperation => {
                "Desperation: numbers from players below 3 hp count three times."
            }
            PermanentRule::HighestHpPenalty => {
                "Burden: the healthiest player takes 1 extra damage on a loss."
            }
        }
    }

    /// Variant of the Extremity announcement used when it activates by
    /// final-duel forcing rather than a pool draw.
    pub const FINAL_DUEL_TEXT: &'static str =
        "Final duel: Extremity is now in force - if 0 and 100 both appear, 100 wins outright.";
}

/// A temporary event active for exactly one round, with any parameters
/// rolled at selection time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEvent {
    /// All submissions are deranged among the living participants.
    ChaosSwap,
    /// The target multiplier mutates for this round.
    MultiplierShock {
        /// Rolled replacement multiplier, 0.1 to 2.0 in 0.1 steps.
        multiplier: f64,
    },
    /// Winners gain 1 hp; losers in [40,60] take no damage.
    SafeZone,
    /// Submission indicators are hidden until resolution. No arithmetic effect.
    Blackout,
    /// Target becomes 100 minus the usual target.
    Inversion,
    /// Values ending in the lucky digit grant 1 hp, win or lose.
    LuckyDigit {
        /// Rolled digit 0..=9.
        digit: u8,
    },
}

/// Discriminant-only tag for [`RoundEvent`], used for selection and on
/// the operator surface where no parameters are rolled yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RoundEventKind {
    /// Submissions deranged among the living.
    ChaosSwap = 101,
    /// Multiplier rerolled for the round.
    MultiplierShock = 102,
    /// Heals for winners, shelter for middle values.
    SafeZone = 103,
    /// Submission indicators hidden.
    Blackout = 104,
    /// Target flipped to 100 minus the usual value.
    Inversion = 105,
    /// Values ending in the rolled digit heal.
    LuckyDigit = 106,
}

impl RoundEventKind {
    /// Every event kind, in catalog order.
    pub const ALL: [RoundEventKind; 6] = [
        RoundEventKind::ChaosSwap,
        RoundEventKind::MultiplierShock,
        RoundEventKind::SafeZone,
        RoundEventKind::Blackout,
        RoundEventKind::Inversion,
        RoundEventKind::LuckyDigit,
    ];

    /// Stable numeric id, used on the operator surface.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up an event kind by its numeric id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.id() == id)
    }

    /// Roll the event's round-scoped parameters.
    pub fn roll(self, rng: &mut MatchRng) -> RoundEvent {
        match self {
            RoundEventKind::ChaosSwap => RoundEvent::ChaosSwap,
            RoundEventKind::MultiplierShock => RoundEvent::MultiplierShock {
                // randint(1, 20) * 0.1, rounded to one decimal place
                multiplier: (rng.next_int_range(1, 20) as f64 * 0.1 * 10.0).round() / 10.0,
            },
            RoundEventKind::SafeZone => RoundEvent::SafeZone,
            RoundEventKind::Blackout => RoundEvent::Blackout,
            RoundEventKind::Inversion => RoundEvent::Inversion,
            RoundEventKind::LuckyDigit => RoundEvent::LuckyDigit {
                digit: rng.next_int(10) as u8,
            },
        }
    }
}

impl RoundEvent {
    /// The tag of a rolled event.
    pub fn kind(&self) -> RoundEventKind {
        match self {
            RoundEvent::ChaosSwap => RoundEventKind::ChaosSwap,
            RoundEvent::MultiplierShock { .. } => RoundEventKind::MultiplierShock,
            RoundEvent::SafeZone => RoundEventKind::SafeZone,
            RoundEvent::Blackout => RoundEventKind::Blackout,
            RoundEvent::Inversion => RoundEventKind::Inversion,
            RoundEvent::LuckyDigit { .. } => RoundEventKind::LuckyDigit,
        }
    }

    /// Announcement text, including rolled parameters.
    pub fn description(&self) -> String {
        match self {
            RoundEvent::ChaosSwap => {
                "Chaos: everyone's numbers are swapped at random this round!".to_string()
            }
            RoundEvent::MultiplierShock { multiplier } => {
                format!("Shock: the target multiplier mutates to x{multiplier:.1} this round!")
            }
            RoundEvent::SafeZone => {
                "Safe zone: winners heal 1 hp; numbers in 40-60 take no damage.".to_string()
            }
            RoundEvent::Blackout => {
                "Blackout: nobody can see who has submitted this round.".to_string()
            }
            RoundEvent::Inversion => {
                "Inversion: the target flips to 100 minus the usual value!".to_string()
            }
            RoundEvent::LuckyDigit { digit } => {
                format!("Lucky digit: numbers ending in {digit} heal 1 hp, win or lose.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_roundtrip() {
        for rule in PermanentRule::ALL {
            assert_eq!(PermanentRule::from_id(rule.id()), Some(rule));
        }
        assert_eq!(PermanentRule::from_id(0), None);
        assert_eq!(PermanentRule::from_id(7), None);
    }

    #[test]
    fn test_event_id_roundtrip() {
        for kind in RoundEventKind::ALL {
            assert_eq!(RoundEventKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(RoundEventKind::from_id(100), None);
    }

    #[test]
    fn test_multiplier_shock_roll_range() {
        let mut rng = MatchRng::new(77);
        for _ in 0..200 {
            if let RoundEvent::MultiplierShock { multiplier } =
                RoundEventKind::MultiplierShock.roll(&mut rng)
            {
                assert!(multiplier >= 0.1 - 1e-9 && multiplier <= 2.0 + 1e-9);
                // One-decimal steps
                let steps = multiplier * 10.0;
                assert!((steps - steps.round()).abs() < 1e-9);
            } else {
                panic!("wrong event rolled");
            }
        }
    }

    #[test]
    fn test_lucky_digit_roll_range() {
        let mut rng = MatchRng::new(78);
        for _ in 0..100 {
            if let RoundEvent::LuckyDigit { digit } = RoundEventKind::LuckyDigit.roll(&mut rng) {
                assert!(digit <= 9);
            } else {
                panic!("wrong event rolled");
            }
        }
    }

    #[test]
    fn test_descriptions_carry_params() {
        let ev = RoundEvent::MultiplierShock { multiplier: 1.3 };
        assert!(ev.description().contains("1.3"));

        let ev = RoundEvent::LuckyDigit { digit: 7 };
        assert!(ev.description().contains('7'));
    }
}
