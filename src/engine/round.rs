//! Round Lifecycle
//!
//! State machine per (game, round, phase): Uninitialized -> Active ->
//! Resolved. Snapshots open rounds and reconcile vote counts; the
//! scheduled vote timeout (or the sweep backstop) resolves them. Every
//! transition is replay-safe: duplicate snapshots and duplicate timeout
//! fires are logged no-ops.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{EngineConfig, EngineError};
use crate::game::types::{
    AliveRow, BlockHeight, GameId, Phase, PlayerIdx, PunishReason, Punishment, RoundKey,
    RoundRecord, Snapshot,
};
use crate::sched::{Scheduler, TimerKey};
use crate::store::GameStore;

/// What applying a snapshot did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Non-voting phase; nothing to do.
    Ignored,
    /// Snapshot reported the game finished; game record flagged.
    GameFinished,
    /// A new round was opened and its timeout scheduled.
    RoundOpened {
        /// Block the vote timeout will fire at.
        timeout_block: BlockHeight,
    },
    /// Existing round; vote counter mirrored from the ledger.
    VotesReconciled {
        /// New counter value.
        votes_submitted: u32,
    },
    /// Existing round; nothing changed.
    Unchanged,
}

/// What a timeout fire (or sweep pass) did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// No round row for the key; benign duplicate-delivery race.
    MissingRound,
    /// Round already resolved; duplicate fire tolerated.
    AlreadyResolved,
    /// Everyone voted in time; round resolved with no fallout.
    AllVoted,
    /// Missed votes; punishments queued for the selected players.
    Punished {
        /// Punished roster indices, ascending.
        player_idxs: Vec<PlayerIdx>,
    },
}

/// Round state machine over ledger snapshots and vote timeouts.
pub struct RoundLifecycle {
    store: Arc<dyn GameStore>,
    scheduler: Arc<dyn Scheduler>,
    config: EngineConfig,
}

impl RoundLifecycle {
    /// Wire the lifecycle to its gateway and scheduler.
    pub fn new(
        store: Arc<dyn GameStore>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Apply one ledger snapshot for a game.
    ///
    /// This component never counts ballots itself; the ledger's
    /// submitted-vote counter is authoritative and only mirrored here.
    pub async fn process_snapshot(&self, snap: &Snapshot) -> Result<SnapshotOutcome, EngineError> {
        if !snap.phase.is_voting() {
            if snap.phase == Phase::Finished {
                return self.finish_game(snap).await;
            }
            debug!(
                game = snap.game_id,
                phase = %snap.phase,
                block = snap.block_height,
                "snapshot in non-voting phase ignored"
            );
            return Ok(SnapshotOutcome::Ignored);
        }

        let key = snap.round_key();
        match self.store.round(&key).await? {
            None => self.open_round(snap, key).await,
            Some(existing) => {
                if existing.votes_submitted == snap.votes_submitted {
                    return Ok(SnapshotOutcome::Unchanged);
                }
                // Idempotent catch-up after missed or duplicated snapshots
                self.store
                    .set_round_votes(&key, snap.votes_submitted)
                    .await?;
                debug!(
                    game = key.game_id,
                    round = key.round,
                    phase = %key.phase,
                    block = snap.block_height,
                    from = existing.votes_submitted,
                    to = snap.votes_submitted,
                    "vote counter reconciled"
                );
                Ok(SnapshotOutcome::VotesReconciled {
                    votes_submitted: snap.votes_submitted,
                })
            }
        }
    }

    async fn open_round(
        &self,
        snap: &Snapshot,
        key: RoundKey,
    ) -> Result<SnapshotOutcome, EngineError> {
        let timeout_block = snap.block_height + self.config.vote_timeout_blocks;

        // Conflict-safe insert keyed by (game, round, phase); a replay
        // losing this race just re-runs the idempotent writes below.
        self.store
            .insert_round_if_absent(&RoundRecord {
                key,
                alive_count: snap.alive.len() as u32,
                votes_submitted: snap.votes_submitted,
                timeout_block: Some(timeout_block),
                resolved: false,
            })
            .await?;

        // Freeze the roster: ground truth for who needed to act
        for &player_idx in &snap.alive {
            self.store
                .insert_alive_row(&AliveRow { key, player_idx })
                .await?;
        }

        // Mirror round progress onto the game record
        if let Some(mut game) = self.store.game(snap.game_id).await? {
            game.round = snap.round;
            game.phase = snap.phase;
            game.alive = snap.alive.clone();
            self.store.upsert_game(&game).await?;
        } else {
            warn!(game = snap.game_id, "snapshot for unknown game; round tracked anyway");
        }

        self.scheduler
            .schedule(
                TimerKey::RoundVote {
                    game_id: key.game_id,
                    round: key.round,
                    phase: key.phase,
                },
                timeout_block,
            )
            .await?;

        info!(
            game = key.game_id,
            round = key.round,
            phase = %key.phase,
            block = snap.block_height,
            alive = snap.alive.len(),
            timeout_block,
            "round opened"
        );
        Ok(SnapshotOutcome::RoundOpened { timeout_block })
    }

    async fn finish_game(&self, snap: &Snapshot) -> Result<SnapshotOutcome, EngineError> {
        if let Some(mut game) = self.store.game(snap.game_id).await? {
            if !game.finished {
                game.phase = Phase::Finished;
                game.finished = true;
                self.store.upsert_game(&game).await?;
                info!(game = snap.game_id, block = snap.block_height, "game finished");
            }
        } else {
            warn!(game = snap.game_id, "finished snapshot for unknown game");
        }
        Ok(SnapshotOutcome::GameFinished)
    }

    /// Resolve a round when its vote timeout fires.
    ///
    /// Who exactly failed to vote is unobservable by construction, so
    /// the fallback selects the highest-indexed players still alive in
    /// this round's frozen roster - a deterministic liveness heuristic,
    /// not a fairness mechanism (flagged for product review).
    pub async fn on_timeout(
        &self,
        game_id: GameId,
        round: u8,
        phase: Phase,
        block_height: BlockHeight,
    ) -> Result<TimeoutOutcome, EngineError> {
        let key = RoundKey {
            game_id,
            round,
            phase,
        };

        let Some(record) = self.store.round(&key).await? else {
            warn!(
                game = game_id,
                round,
                phase = %phase,
                block = block_height,
                "timeout for missing round; no-op"
            );
            return Ok(TimeoutOutcome::MissingRound);
        };

        if record.resolved {
            debug!(
                game = game_id,
                round,
                phase = %phase,
                block = block_height,
                "duplicate timeout fire; round already resolved"
            );
            return Ok(TimeoutOutcome::AlreadyResolved);
        }

        let missing = record.alive_count.saturating_sub(record.votes_submitted);
        if missing == 0 {
            self.store.mark_round_resolved(&key).await?;
            info!(
                game = game_id,
                round,
                phase = %phase,
                block = block_height,
                "round resolved; all votes in"
            );
            return Ok(TimeoutOutcome::AllVoted);
        }

        // Highest `missing` indices of the frozen roster, ascending
        let alive = self.store.alive_rows(&key).await?;
        let skip = alive.len().saturating_sub(missing as usize);
        let selected: Vec<PlayerIdx> = alive.into_iter().skip(skip).collect();

        // Punishments land before the resolved flag so a crash between
        // the two is healed by the redelivered (idempotent) fire
        for &player_idx in &selected {
            self.store
                .queue_punishment(&Punishment {
                    game_id,
                    player_idx,
                    reason: PunishReason::MissedVote { round, phase },
                    created_at_block: block_height,
                    executed: false,
                })
                .await?;
        }
        self.store.mark_round_resolved(&key).await?;

        info!(
            game = game_id,
            round,
            phase = %phase,
            block = block_height,
            missing,
            punished = ?selected,
            reason = %PunishReason::MissedVote { round, phase }.tag(),
            "round resolved with missed-vote punishments"
        );
        Ok(TimeoutOutcome::Punished {
            player_idxs: selected,
        })
    }

    /// Resolve every overdue, unresolved round of a game.
    ///
    /// Backstop for lost timeout callbacks; uses the same path as a
    /// regular fire, so it is just as replay-safe.
    pub async fn sweep(
        &self,
        game_id: GameId,
        block_height: BlockHeight,
    ) -> Result<Vec<TimeoutOutcome>, EngineError> {
        let overdue = self.store.overdue_rounds(game_id, block_height).await?;
        let mut outcomes = Vec::with_capacity(overdue.len());
        for key in overdue {
            outcomes.push(
                self.on_timeout(key.game_id, key.round, key.phase, block_height)
                    .await?,
            );
        }
        Ok(outcomes)
    }
}

// =============================================================================
// TESTS
// =============================================================================
