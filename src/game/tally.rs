//! Vote Tally
//!
//! Turns decrypted ballots into a reproducible elimination decision.
//! Uses BTreeMap throughout so counting order never affects outcomes.
//!
//! ## Tie policy
//!
//! Night ties eliminate a uniformly random member of the tied set,
//! seeded from public round values (progress over fairness - identity
//! is unknowable at night anyway). Day ties eliminate nobody (protect
//! by default). The asymmetry is intentional policy; do not normalize
//! it without confirming intent with product.

use std::collections::BTreeMap;

use k256::SecretKey;
use tracing::{debug, warn};

use crate::core::rng::{derive_tiebreak_seed, DeterministicRng};
use crate::crypto::ballot;
use crate::game::types::{GameId, Phase, PlayerIdx};

/// How a tally reached its decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TallyReason {
    /// Nobody cast a valid vote.
    NoValidVotes,
    /// A single target held the top count.
    TopTarget,
    /// Night tie broken by the public-seed draw.
    NightTieBreak {
        /// Tied targets, ascending.
        tied: Vec<PlayerIdx>,
    },
    /// Day tie; nobody is eliminated.
    DayTie {
        /// Tied targets, ascending.
        tied: Vec<PlayerIdx>,
    },
}

/// Resolution decision for one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyOutcome {
    /// Eliminated target, if any.
    pub target: Option<PlayerIdx>,
    /// Whether an elimination happens.
    pub eliminate: bool,
    /// How the decision was reached.
    pub reason: TallyReason,
}

/// Resolve a round from decrypted vote targets.
///
/// Votes naming a non-living target are discarded, and in a non-voting
/// phase every vote is invalid. Reproducible by any observer: counting
/// uses sorted maps and the only randomness (Night tie-break) is seeded
/// from `(game_id, round, phase, tied set)`.
pub fn resolve(
    votes: &[PlayerIdx],
    alive: &[PlayerIdx],
    phase: Phase,
    game_id: GameId,
    round: u8,
) -> TallyOutcome {
    if !phase.is_voting() {
        debug!(
            game = game_id,
            round,
            phase = %phase,
            votes = votes.len(),
            "tally requested outside a voting phase; no vote is valid"
        );
        return TallyOutcome {
            target: None,
            eliminate: false,
            reason: TallyReason::NoValidVotes,
        };
    }

    let mut counts: BTreeMap<PlayerIdx, u32> = BTreeMap::new();
    for &target in votes {
        if alive.contains(&target) {
            *counts.entry(target).or_insert(0) += 1;
        }
    }

    let Some(top) = counts.values().copied().max() else {
        return TallyOutcome {
            target: None,
            eliminate: false,
            reason: TallyReason::NoValidVotes,
        };
    };

    // BTreeMap iteration keeps the tied set sorted ascending
    let tied: Vec<PlayerIdx> = counts
        .iter()
        .filter(|(_, &count)| count == top)
        .map(|(&idx, _)| idx)
        .collect();

    if tied.len() == 1 {
        return TallyOutcome {
            target: Some(tied[0]),
            eliminate: true,
            reason: TallyReason::TopTarget,
        };
    }

    if phase == Phase::Night {
        let seed = derive_tiebreak_seed(game_id, round, phase.tag(), &tied);
        let mut rng = DeterministicRng::new(seed);
        let picked = tied[rng.next_int(tied.len() as u32) as usize];
        TallyOutcome {
            target: Some(picked),
            eliminate: true,
            reason: TallyReason::NightTieBreak { tied },
        }
    } else {
        // The voting guard above leaves Day as the only phase here
        TallyOutcome {
            target: None,
            eliminate: false,
            reason: TallyReason::DayTie { tied },
        }
    }
}

/// Open a batch of sealed ballots with the tally private key.
///
/// Undecryptable or round-mismatched ballots become abstentions with a
/// warning log; round processing always continues.
pub fn open_ballots(
    secret: &SecretKey,
    ciphertexts: &[Vec<u8>],
    expected_round: u8,
) -> Vec<PlayerIdx> {
    let mut targets = Vec::with_capacity(ciphertexts.len());

    for (i, ciphertext) in ciphertexts.iter().enumerate() {
        match ballot::open(ciphertext, secret) {
            Ok(plaintext) if plaintext.round == expected_round => {
                targets.push(plaintext.target);
            }
            Ok(plaintext) => {
                warn!(
                    ballot = i,
                    got_round = plaintext.round,
                    expected_round,
                    "discarding ballot for wrong round"
                );
            }
            Err(err) => {
                warn!(ballot = i, %err, "undecryptable ballot treated as abstention");
            }
        }
    }

    targets
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ballot::{seal, BallotPlaintext};

    const ALIVE: &[PlayerIdx] = &[0, 1, 2, 3, 4];

    #[test]
    fn test_clear_winner_day() {
        let outcome = resolve(&[1, 1, 2], ALIVE, Phase::Day, 7, 1);
        assert_eq!(outcome.target, Some(1));
        assert!(outcome.eliminate);
        assert_eq!(outcome.reason, TallyReason::TopTarget);
    }

    #[test]
    fn test_order_independent() {
        let a = resolve(&[1, 1, 2], ALIVE, Phase::Day, 7, 1);
        let b = resolve(&[2, 1, 1], ALIVE, Phase::Day, 7, 1);
        let c = resolve(&[1, 2, 1], ALIVE, Phase::Day, 7, 1);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_no_votes() {
        let outcome = resolve(&[], ALIVE, Phase::Day, 7, 1);
        assert!(!outcome.eliminate);
        assert_eq!(outcome.target, None);
        assert_eq!(outcome.reason, TallyReason::NoValidVotes);
    }

    #[test]
    fn test_dead_targets_discarded() {
        // 9 is not alive; only the vote for 2 counts
        let outcome = resolve(&[9, 9, 2], ALIVE, Phase::Night, 7, 1);
        assert_eq!(outcome.target, Some(2));
        assert!(outcome.eliminate);

        // All votes dead = no valid votes
        let outcome = resolve(&[9, 9], ALIVE, Phase::Day, 7, 1);
        assert_eq!(outcome.reason, TallyReason::NoValidVotes);
    }

    #[test]
    fn test_non_voting_phase_counts_nothing() {
        // Caller bug; the outcome must still say no vote was valid
        for phase in [Phase::Lobby, Phase::Finished] {
            let outcome = resolve(&[1, 1, 2], ALIVE, phase, 7, 1);
            assert!(!outcome.eliminate);
            assert_eq!(outcome.target, None);
            assert_eq!(outcome.reason, TallyReason::NoValidVotes);
        }
    }

    #[test]
    fn test_day_tie_protects() {
        let outcome = resolve(&[1, 2], ALIVE, Phase::Day, 7, 1);
        assert!(!outcome.eliminate);
        assert_eq!(outcome.target, None);
        assert_eq!(outcome.reason, TallyReason::DayTie { tied: vec![1, 2] });
    }

    #[test]
    fn test_night_tie_eliminates_from_tied_set() {
        let outcome = resolve(&[1, 2], ALIVE, Phase::Night, 7, 1);
        assert!(outcome.eliminate);
        let target = outcome.target.unwrap();
        assert!(target == 1 || target == 2);
        assert_eq!(outcome.reason, TallyReason::NightTieBreak { tied: vec![1, 2] });
    }

    #[test]
    fn test_night_tie_reproducible() {
        // Same public inputs, same draw - any observer replays it
        let a = resolve(&[1, 2], ALIVE, Phase::Night, 7, 1);
        let b = resolve(&[2, 1], ALIVE, Phase::Night, 7, 1);
        assert_eq!(a.target, b.target);

        // A different round may draw differently but must stay in the set
        let c = resolve(&[1, 2], ALIVE, Phase::Night, 7, 2);
        assert!(c.target == Some(1) || c.target == Some(2));
    }

    #[test]
    fn test_open_ballots_skips_garbage_and_wrong_round() {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key();

        let good = seal(
            &BallotPlaintext {
                target: 3,
                round: 2,
                salt: 77,
            },
            &public,
            &mut rand::thread_rng(),
        )
        .unwrap();
        let stale = seal(
            &BallotPlaintext {
                target: 4,
                round: 1,
                salt: 78,
            },
            &public,
            &mut rand::thread_rng(),
        )
        .unwrap();

        let ballots = vec![good.to_vec(), vec![0u8; 10], stale.to_vec()];
        assert_eq!(open_ballots(&secret, &ballots, 2), vec![3]);
    }
}
