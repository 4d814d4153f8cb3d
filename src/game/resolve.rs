//! Round Resolution
//!
//! The pure core of the game: given the living submissions, the active
//! rules, and the round's event, compute the target, the winners, and
//! every participant's damage. No state is mutated here; the phase
//! machine applies the returned outcomes to the match.

use crate::core::rng::MatchRng;
use crate::game::catalog::{PermanentRule, RoundEvent};
use crate::game::state::{ParticipantId, RoundSnapshot, SnapshotLine};
use crate::MAX_HP;

/// Hp threshold below which Desperation triples a submission's weight.
const DESPERATION_HP: i32 = 3;

/// Weight applied to a desperate submission.
const DESPERATION_WEIGHT: u32 = 3;

/// One living participant entering resolution, with the value actually
/// submitted (or defaulted at timeout).
#[derive(Clone, Debug)]
pub struct RoundEntry {
    /// Participant id.
    pub id: ParticipantId,
    /// Display name, carried into the snapshot.
    pub name: String,
    /// Submitted or defaulted value, 0..=100.
    pub value: u8,
    /// Hit points entering the round.
    pub hp: i32,
}

/// Everything the resolver needs besides the submissions.
#[derive(Clone, Debug)]
pub struct RoundContext<'a> {
    /// Round number, for the snapshot.
    pub round: u32,
    /// Active permanent rules.
    pub rules: &'a [PermanentRule],
    /// This round's temporary event, if any.
    pub event: Option<RoundEvent>,
    /// Target multiplier in force (already rerolled under MultiplierShock).
    pub multiplier: f64,
    /// Retained values from eliminated participants.
    pub ghosts: &'a [u8],
}

/// One participant's resolved outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundOutcome {
    /// Participant id.
    pub id: ParticipantId,
    /// Value originally submitted.
    pub original: u8,
    /// Value judged after any swap.
    pub used: u8,
    /// Original owner of the judged value.
    pub source: ParticipantId,
    /// Damage applied.
    pub damage: i32,
    /// Hit points after damage and heals. May be negative.
    pub hp_after: i32,
    /// Won the round.
    pub win: bool,
    /// Fell to 0 hp or below this round.
    pub eliminated: bool,
}

/// Result of resolving one round.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// Weighted average of the judged values.
    pub average: f64,
    /// Target the values were judged against.
    pub target: f64,
    /// Per-participant outcomes, in entry order.
    pub outcomes: Vec<RoundOutcome>,
    /// Immutable snapshot for the match history.
    pub snapshot: RoundSnapshot,
}

/// Resolve one round.
///
/// `entries` are the living participants in id order. The RNG is only
/// consumed by a ChaosSwap derangement, so resolution without that
/// event is fully deterministic in its inputs.
pub fn resolve(ctx: &RoundContext, entries: &[RoundEntry], rng: &mut MatchRng) -> Resolution {
    let n = entries.len();
    debug_assert!(n > 0, "resolver invoked with no living participants");

    let has_rule = |r: PermanentRule| ctx.rules.contains(&r);
    // Extremity binds when drawn, and unconditionally in a final duel.
    let extremity_active = has_rule(PermanentRule::Extremity) || n == 2;
    let chaos = matches!(ctx.event, Some(RoundEvent::ChaosSwap));
    let inversion = matches!(ctx.event, Some(RoundEvent::Inversion));
    let safe_zone = matches!(ctx.event, Some(RoundEvent::SafeZone));
    let lucky_digit = match ctx.event {
        Some(RoundEvent::LuckyDigit { digit }) => Some(digit),
        _ => None,
    };

    // 1. Chaos swap: a derangement over the submission indices.
    let mut used: Vec<u8> = entries.iter().map(|e| e.value).collect();
    let mut source: Vec<ParticipantId> = entries.iter().map(|e| e.id).collect();
    if chaos && n >= 2 {
        let perm = rng.derangement(n);
        used = perm.iter().map(|&j| entries[j].value).collect();
        source = perm.iter().map(|&j| entries[j].id).collect();
    }

    // 2. Weighted sum over the living values, plus ghosts when active.
    let mut weighted_sum: u64 = 0;
    let mut weight_count: u64 = 0;
    for (i, e) in entries.iter().enumerate() {
        let w = if has_rule(PermanentRule::Desperation) && e.hp < DESPERATION_HP {
            DESPERATION_WEIGHT
        } else {
            1
        };
        weighted_sum += used[i] as u64 * w as u64;
        weight_count += w as u64;
    }
    if has_rule(PermanentRule::Ghost) {
        for &g in ctx.ghosts {
            weighted_sum += g as u64;
            weight_count += 1;
        }
    }

    // 3. Average and target.
    let average = if weight_count == 0 {
        0.0
    } else {
        weighted_sum as f64 / weight_count as f64
    };
    let target = if inversion {
        100.0 - average * ctx.multiplier
    } else {
        average * ctx.multiplier
    };

    // 4. Winners.
    let mut base_damage: i32 = 1;
    let mut winners: Vec<bool> = vec![false; n];

    let extremity_fires =
        extremity_active && used.contains(&0) && used.contains(&100);
    if extremity_fires {
        // 4a. Short-circuit: every holder of 100 wins, damage stays 1.
        for (i, &v) in used.iter().enumerate() {
            winners[i] = v == 100;
        }
    } else {
        // 4b. Candidates, minus duplicated values under Conflict.
        let mut candidate: Vec<bool> = vec![true; n];
        if has_rule(PermanentRule::Conflict) {
            for i in 0..n {
                let dup = used.iter().filter(|&&v| v == used[i]).count() > 1;
                if dup {
                    candidate[i] = false;
                }
            }
        }

        // 4c. Minimum distance among the survivors of 4b.
        let min_dist = (0..n)
            .filter(|&i| candidate[i])
            .map(|i| (used[i] as f64 - target).abs())
            .fold(f64::INFINITY, f64::min);

        if min_dist.is_finite() {
            for i in 0..n {
                if candidate[i] && ((used[i] as f64 - target).abs() - min_dist).abs() < 1e-9 {
                    winners[i] = true;
                }
            }

            // 4d. Precision doubles the damage on a sub-1 error.
            if has_rule(PermanentRule::Precision) && min_dist < 1.0 {
                base_damage = 2;
            }
        }
        // Empty candidate set: nobody wins, everyone takes base damage.
    }

    // 5. Hp ceiling, only needed under the penalty rule.
    let max_hp_alive = if has_rule(PermanentRule::HighestHpPenalty) {
        entries.iter().map(|e| e.hp).max()
    } else {
        None
    };

    // 6. Per-participant damage and heals.
    let mut outcomes = Vec::with_capacity(n);
    for (i, e) in entries.iter().enumerate() {
        let win = winners[i];
        let mut damage = 0;
        let mut heal = 0;

        if win {
            if safe_zone {
                heal += 1;
            }
        } else {
            damage = base_damage;
            if safe_zone && (40..=60).contains(&used[i]) {
                damage = 0;
            }
            if max_hp_alive == Some(e.hp) {
                // All participants tied at the maximum qualify.
                damage += 1;
            }
        }

        if lucky_digit == Some(used[i] % 10) {
            heal += 1;
        }

        // Damage may push hp negative; heals cap at the maximum.
        let mut hp_after = e.hp - damage;
        if heal > 0 {
            hp_after = (hp_after + heal).min(MAX_HP);
        }

        outcomes.push(RoundOutcome {
            id: e.id,
            original: e.value,
            used: used[i],
            source: source[i],
            damage,
            hp_after,
            win,
            eliminated: hp_after <= 0,
        });
    }

    // 8. Immutable snapshot.
    let mut rule_texts: Vec<String> = ctx
        .rules
        .iter()
        .map(|r| r.description().to_string())
        .collect();
    if extremity_active && !has_rule(PermanentRule::Extremity) {
        rule_texts.push(PermanentRule::FINAL_DUEL_TEXT.to_string());
    }
    let snapshot = RoundSnapshot {
        round: ctx.round,
        average,
        target,
        multiplier: ctx.multiplier,
        event: ctx.event.as_ref().map(|e| e.description()),
        rules: rule_texts,
        lines: entries
            .iter()
            .zip(&outcomes)
            .map(|(e, o)| SnapshotLine {
                id: e.id,
                name: e.name.clone(),
                original: o.original,
                used: o.used,
                source: o.source,
                hp: o.hp_after,
                damage: o.damage,
                win: o.win,
            })
            .collect(),
    };

    Resolution {
        average,
        target,
        outcomes,
        snapshot,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn entries(values: &[(u8, u8, i32)]) -> Vec<RoundEntry> {
        values
            .iter()
            .map(|&(id, value, hp)| RoundEntry {
                id: pid(id),
                name: format!("p{id}"),
                value,
                hp,
            })
            .collect()
    }

    fn ctx<'a>(rules: &'a [PermanentRule], event: Option<RoundEvent>, ghosts: &'a [u8]) -> RoundContext<'a> {
        RoundContext {
            round: 1,
            rules,
            event,
            multiplier: 0.8,
            ghosts,
        }
    }

    #[test]
    fn test_basic_round() {
        // 10, 50, 90 -> avg 50, target 40; 50 wins, others take 1.
        let es = entries(&[(1, 10, 10), (2, 50, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], None, &[]), &es, &mut rng);

        assert_eq!(r.average, 50.0);
        assert_eq!(r.target, 40.0);
        assert!(!r.outcomes[0].win && r.outcomes[0].damage == 1);
        assert!(r.outcomes[1].win && r.outcomes[1].damage == 0);
        assert!(!r.outcomes[2].win && r.outcomes[2].damage == 1);
        assert_eq!(r.outcomes[0].hp_after, 9);
        assert_eq!(r.outcomes[1].hp_after, 10);
    }

    #[test]
    fn test_conflict_excludes_duplicates() {
        // 50, 50, 10 with Conflict: both 50s are out, 10 wins alone.
        let es = entries(&[(1, 50, 10), (2, 50, 10), (3, 10, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Conflict];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        assert!(!r.outcomes[0].win);
        assert!(!r.outcomes[1].win);
        assert!(r.outcomes[2].win);
        assert_eq!(r.outcomes[0].damage, 1);
        assert_eq!(r.outcomes[1].damage, 1);
    }

    #[test]
    fn test_conflict_can_empty_candidates() {
        let es = entries(&[(1, 50, 10), (2, 50, 10), (3, 10, 10), (4, 10, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Conflict];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        assert!(r.outcomes.iter().all(|o| !o.win));
        assert!(r.outcomes.iter().all(|o| o.damage == 1));
    }

    #[test]
    fn test_extremity_precedence() {
        // 0, 100, 55 with Extremity: only the 100 wins, target ignored.
        let es = entries(&[(1, 0, 10), (2, 100, 10), (3, 55, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Extremity];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        assert!(!r.outcomes[0].win);
        assert!(r.outcomes[1].win);
        assert!(!r.outcomes[2].win);
    }

    #[test]
    fn test_extremity_needs_both_poles() {
        let es = entries(&[(1, 100, 10), (2, 60, 10), (3, 55, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Extremity];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        // avg = 71.67, target = 57.33 -> 55 is closest.
        assert!(!r.outcomes[0].win);
        assert!(r.outcomes[2].win);
    }

    #[test]
    fn test_final_duel_forces_extremity() {
        // Two alive, Extremity NOT drawn: still fires.
        let es = entries(&[(1, 0, 5), (2, 100, 5)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], None, &[]), &es, &mut rng);

        assert!(!r.outcomes[0].win);
        assert!(r.outcomes[1].win);
        // Snapshot carries the forcing announcement.
        assert!(r
            .snapshot
            .rules
            .iter()
            .any(|t| t.contains("Final duel")));
    }

    #[test]
    fn test_precision_doubles_damage() {
        // avg 50, target 40; the 40 lands exactly on the target.
        let es = entries(&[(1, 10, 10), (2, 40, 10), (3, 100, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Precision];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        assert!(r.outcomes[1].win);
        assert_eq!(r.outcomes[0].damage, 2);
        assert_eq!(r.outcomes[2].damage, 2);
    }

    #[test]
    fn test_precision_inert_above_one() {
        let es = entries(&[(1, 10, 10), (2, 50, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Precision];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        // min distance is 10, so damage stays 1.
        assert_eq!(r.outcomes[0].damage, 1);
    }

    #[test]
    fn test_ghost_values_pull_average() {
        let es = entries(&[(1, 50, 10), (2, 100, 10)]);
        let ghosts = [0u8, 0u8];
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Ghost];
        let r = resolve(&ctx(&rules, None, &ghosts), &es, &mut rng);

        // (50 + 100 + 0 + 0) / 4 = 37.5
        assert_eq!(r.average, 37.5);
    }

    #[test]
    fn test_ghosts_ignored_without_rule() {
        let es = entries(&[(1, 50, 10), (2, 100, 10), (3, 30, 10)]);
        let ghosts = [0u8];
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], None, &ghosts), &es, &mut rng);

        assert_eq!(r.average, 60.0);
    }

    #[test]
    fn test_desperation_triples_low_hp_weight() {
        // hp 2 participant at 0, two healthy at 90:
        // (0*3 + 90 + 90) / 5 = 36
        let es = entries(&[(1, 0, 2), (2, 90, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Desperation];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        assert_eq!(r.average, 36.0);
    }

    #[test]
    fn test_highest_hp_penalty_hits_all_tied() {
        let es = entries(&[(1, 10, 8), (2, 50, 8), (3, 90, 5)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::HighestHpPenalty];
        let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

        // 50 wins; loser at hp 8 takes 2 (tied leader), loser at 5 takes 1.
        assert!(r.outcomes[1].win);
        assert_eq!(r.outcomes[0].damage, 2);
        assert_eq!(r.outcomes[2].damage, 1);
    }

    #[test]
    fn test_inversion_flips_target() {
        let es = entries(&[(1, 10, 10), (2, 50, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], Some(RoundEvent::Inversion), &[]), &es, &mut rng);

        // avg 50, inverted target 100 - 40 = 60 -> 50 still closest.
        assert_eq!(r.target, 60.0);
        assert!(r.outcomes[1].win);
    }

    #[test]
    fn test_safe_zone_shields_middle_values() {
        let es = entries(&[(1, 30, 10), (2, 42, 10), (3, 58, 10)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], Some(RoundEvent::SafeZone), &[]), &es, &mut rng);

        // avg 43.33, target 34.67 -> 30 wins and heals (already max).
        assert!(r.outcomes[0].win);
        assert_eq!(r.outcomes[0].hp_after, 10);
        // 42 and 58 lose but sit in [40,60]: no damage.
        assert_eq!(r.outcomes[1].damage, 0);
        assert_eq!(r.outcomes[2].damage, 0);
    }

    #[test]
    fn test_safe_zone_heals_winner_below_max() {
        let es = entries(&[(1, 10, 4), (2, 90, 4)], );
        let mut rng = MatchRng::new(0);
        // Two alive: avoid extremity firing (no 0/100 present).
        let r = resolve(&ctx(&[], Some(RoundEvent::SafeZone), &[]), &es, &mut rng);

        let winner = r.outcomes.iter().find(|o| o.win).unwrap();
        assert_eq!(winner.hp_after, 5);
    }

    #[test]
    fn test_lucky_digit_heals_independent_of_loss() {
        let es = entries(&[(1, 17, 10), (2, 50, 9), (3, 87, 5)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(
            &ctx(&[], Some(RoundEvent::LuckyDigit { digit: 7 }), &[]),
            &es,
            &mut rng,
        );

        // avg 51.33, target 41.07 -> 50 wins, heals nothing (no 7).
        assert!(r.outcomes[1].win);
        assert_eq!(r.outcomes[1].hp_after, 9);
        // Losers ending in 7 take 1 then heal 1.
        assert_eq!(r.outcomes[0].hp_after, 10);
        assert_eq!(r.outcomes[2].hp_after, 5);
    }

    #[test]
    fn test_lucky_digit_can_save_from_elimination() {
        let es = entries(&[(1, 27, 1), (2, 50, 9), (3, 90, 9)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(
            &ctx(&[], Some(RoundEvent::LuckyDigit { digit: 7 }), &[]),
            &es,
            &mut rng,
        );

        // The hp-1 loser drops to 0, then the lucky heal pulls it back.
        assert_eq!(r.outcomes[0].hp_after, 1);
        assert!(!r.outcomes[0].eliminated);
    }

    #[test]
    fn test_elimination_flag_on_zero_hp() {
        let es = entries(&[(1, 10, 1), (2, 50, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let r = resolve(&ctx(&[], None, &[]), &es, &mut rng);

        assert!(r.outcomes[0].eliminated);
        assert_eq!(r.outcomes[0].hp_after, 0);
        assert!(!r.outcomes[2].eliminated);
    }

    #[test]
    fn test_chaos_swap_is_derangement() {
        let es = entries(&[(1, 10, 10), (2, 50, 10), (3, 90, 10), (4, 30, 10)]);
        let mut rng = MatchRng::new(7);
        let r = resolve(&ctx(&[], Some(RoundEvent::ChaosSwap), &[]), &es, &mut rng);

        // Nobody keeps their own value, and the multiset is preserved.
        for (e, o) in es.iter().zip(&r.outcomes) {
            assert_ne!(o.source, e.id);
            assert_eq!(o.original, e.value);
        }
        let mut orig: Vec<u8> = es.iter().map(|e| e.value).collect();
        let mut swapped: Vec<u8> = r.outcomes.iter().map(|o| o.used).collect();
        orig.sort();
        swapped.sort();
        assert_eq!(orig, swapped);
    }

    #[test]
    fn test_chaos_swap_two_is_exchange() {
        let es = entries(&[(1, 20, 10), (2, 70, 10)]);
        let mut rng = MatchRng::new(5);
        let r = resolve(&ctx(&[], Some(RoundEvent::ChaosSwap), &[]), &es, &mut rng);

        assert_eq!(r.outcomes[0].used, 70);
        assert_eq!(r.outcomes[1].used, 20);
        assert_eq!(r.outcomes[0].source, pid(2));
        assert_eq!(r.outcomes[1].source, pid(1));
    }

    #[test]
    fn test_snapshot_mirrors_outcomes() {
        let es = entries(&[(1, 10, 10), (2, 50, 10), (3, 90, 10)]);
        let mut rng = MatchRng::new(0);
        let rules = [PermanentRule::Conflict];
        let r = resolve(
            &ctx(&rules, Some(RoundEvent::Blackout), &[]),
            &es,
            &mut rng,
        );

        assert_eq!(r.snapshot.lines.len(), 3);
        assert_eq!(r.snapshot.rules.len(), 1);
        assert!(r.snapshot.event.as_deref().unwrap().contains("Blackout"));
        for (line, o) in r.snapshot.lines.iter().zip(&r.outcomes) {
            assert_eq!(line.hp, o.hp_after);
            assert_eq!(line.win, o.win);
        }
    }

    proptest! {
        /// The computed average is the exact rational weighted mean.
        #[test]
        fn prop_weighted_average_exact(
            values in prop::collection::vec(0u8..=100, 1..8),
            hps in prop::collection::vec(1i32..=10, 8),
            desperation in any::<bool>(),
        ) {
            let es: Vec<RoundEntry> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| RoundEntry {
                    id: pid(i as u8 + 1),
                    name: format!("p{i}"),
                    value: v,
                    hp: hps[i],
                })
                .collect();
            let rules: Vec<PermanentRule> = if desperation {
                vec![PermanentRule::Desperation]
            } else {
                vec![]
            };
            let mut rng = MatchRng::new(0);
            let r = resolve(&ctx(&rules, None, &[]), &es, &mut rng);

            let mut sum = 0u64;
            let mut count = 0u64;
            for e in &es {
                let w = if desperation && e.hp < 3 { 3 } else { 1 };
                sum += e.value as u64 * w;
                count += w;
            }
            prop_assert_eq!(r.average, sum as f64 / count as f64);
        }

        /// With uniform weights the average is the arithmetic mean.
        #[test]
        fn prop_uniform_average_is_mean(
            values in prop::collection::vec(0u8..=100, 1..8),
        ) {
            let es: Vec<RoundEntry> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| RoundEntry {
                    id: pid(i as u8 + 1),
                    name: format!("p{i}"),
                    value: v,
                    hp: 10,
                })
                .collect();
            let mut rng = MatchRng::new(0);
            let r = resolve(&ctx(&[], None, &[]), &es, &mut rng);

            let mean = values.iter().map(|&v| v as u64).sum::<u64>() as f64
                / values.len() as f64;
            prop_assert_eq!(r.average, mean);
        }

        /// Conflict is the identity when no value repeats.
        #[test]
        fn prop_conflict_idempotent_without_duplicates(
            seed in any::<u64>(),
            mut values in prop::collection::hash_set(0u8..=100, 3..8),
        ) {
            let values: Vec<u8> = values.drain().collect();
            let es: Vec<RoundEntry> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| RoundEntry {
                    id: pid(i as u8 + 1),
                    name: format!("p{i}"),
                    value: v,
                    hp: 10,
                })
                .collect();

            let mut rng1 = MatchRng::new(seed);
            let mut rng2 = MatchRng::new(seed);
            let with = resolve(
                &ctx(&[PermanentRule::Conflict], None, &[]),
                &es,
                &mut rng1,
            );
            let without = resolve(&ctx(&[], None, &[]), &es, &mut rng2);

            prop_assert_eq!(with.outcomes, without.outcomes);
        }

        /// Chaos swap never leaves anyone holding their own value.
        #[test]
        fn prop_derangement_no_fixed_point(
            seed in any::<u64>(),
            values in prop::collection::vec(0u8..=100, 2..8),
        ) {
            let es: Vec<RoundEntry> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| RoundEntry {
                    id: pid(i as u8 + 1),
                    name: format!("p{i}"),
                    value: v,
                    hp: 10,
                })
                .collect();
            let mut rng = MatchRng::new(seed);
            let r = resolve(&ctx(&[], Some(RoundEvent::ChaosSwap), &[]), &es, &mut rng);

            for (e, o) in es.iter().zip(&r.outcomes) {
                prop_assert_ne!(o.source, e.id);
            }
        }
    }
}
