//! Lifecycle Engine
//!
//! The [`Coordinator`] is the single entry point the snapshot feed, the
//! scheduler and voters talk to. It serializes all processing within a
//! game behind a per-game lock (distinct games run fully in parallel -
//! every persisted key is game-scoped) and delegates to the round and
//! lobby state machines.

use std::collections::BTreeMap;
use std::sync::Arc;

use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use k256::PublicKey;
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::ballot::{self, BallotError, BallotPlaintext, SubmittedBallot};
use crate::crypto::merkle::{MembershipTree, MerkleError};
use crate::game::tally::{self, TallyOutcome};
use crate::game::types::{BlockHeight, GameId, Phase, PlayerIdx, Snapshot};
use crate::sched::{SchedError, Scheduler};
use crate::store::{GameStore, StoreError};
use crate::Digest32;

pub mod lobby;
pub mod round;

pub use lobby::{AdminAction, JoinOutcome, LobbyLifecycle, LobbyOutcome, LobbyTimeoutOutcome};
pub use round::{RoundLifecycle, SnapshotOutcome, TimeoutOutcome};

/// Engine tunables. Defaults match the deployed contract constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Blocks a voting round stays open.
    pub vote_timeout_blocks: u64,
    /// Blocks a lobby stays open before the quorum check.
    pub lobby_timeout_blocks: u64,
    /// Minimum players for a lobby to survive its timeout.
    pub lobby_min_players: u32,
    /// Membership tree depth; 2^depth must hold the largest roster.
    pub tree_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vote_timeout_blocks: crate::VOTE_TIMEOUT_BLOCKS,
            lobby_timeout_blocks: crate::LOBBY_TIMEOUT_BLOCKS,
            lobby_min_players: crate::LOBBY_MIN_PLAYERS,
            tree_depth: 7, // 128 slots, roster is capped at 100
        }
    }
}

/// Engine-level failure.
///
/// Store and scheduler variants are fatal for the current event and
/// healed by redelivery; the rest are caller contract violations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Persistence gateway failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Scheduler request failure.
    #[error(transparent)]
    Sched(#[from] SchedError),

    /// Membership tree failure.
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// Ballot codec failure.
    #[error(transparent)]
    Ballot(#[from] BallotError),

    /// No committed roster for the game; it has not started.
    #[error("no committed roster for game {0}")]
    RosterNotCommitted(GameId),

    /// Roster exceeds the largest encodable player index.
    #[error("roster of {players} players exceeds the cap of {max}")]
    RosterTooLarge {
        /// Submitted roster size.
        players: usize,
        /// Largest supported roster.
        max: usize,
    },

    /// Coordinator was built without a tally public key.
    #[error("no tally public key configured")]
    MissingTallyKey,
}

/// Entry point wiring the state machines to the gateway and scheduler.
pub struct Coordinator {
    store: Arc<dyn GameStore>,
    rounds: RoundLifecycle,
    lobbies: LobbyLifecycle,
    config: EngineConfig,
    tally_pub: Option<PublicKey>,
    /// Per-game processing locks (replaces the old global single-flight
    /// flag; snapshot ordering within a game is an external guarantee,
    /// this only guards against overlapping dispatch).
    locks: std::sync::Mutex<BTreeMap<GameId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Coordinator {
    /// Build a coordinator over a gateway and scheduler.
    ///
    /// `tally_pub` is required only for [`Coordinator::submit_ballot`].
    pub fn new(
        store: Arc<dyn GameStore>,
        scheduler: Arc<dyn Scheduler>,
        tally_pub: Option<PublicKey>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rounds: RoundLifecycle::new(store.clone(), scheduler.clone(), config.clone()),
            lobbies: LobbyLifecycle::new(store.clone(), scheduler, config.clone()),
            store,
            config,
            tally_pub,
            locks: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    fn game_lock(&self, game_id: GameId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks.entry(game_id).or_default().clone()
    }

    /// Apply one ledger snapshot.
    pub async fn process_snapshot(&self, snap: &Snapshot) -> Result<SnapshotOutcome, EngineError> {
        let lock = self.game_lock(snap.game_id);
        let _guard = lock.lock().await;
        self.rounds.process_snapshot(snap).await
    }

    /// Deliver a round vote-timeout callback.
    pub async fn on_round_timeout(
        &self,
        game_id: GameId,
        round: u8,
        phase: Phase,
        block_height: BlockHeight,
    ) -> Result<TimeoutOutcome, EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.rounds.on_timeout(game_id, round, phase, block_height).await
    }

    /// Liveness backstop: resolve every overdue round of a game, using
    /// the same path a timeout callback takes. Covers lost callbacks.
    pub async fn sweep(
        &self,
        game_id: GameId,
        block_height: BlockHeight,
    ) -> Result<Vec<TimeoutOutcome>, EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.rounds.sweep(game_id, block_height).await
    }

    /// Create a lobby (and its game record). Idempotent.
    pub async fn create_lobby(
        &self,
        game_id: GameId,
        max_players: u32,
        at_block: BlockHeight,
    ) -> Result<LobbyOutcome, EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.lobbies.create(game_id, max_players, at_block).await
    }

    /// Join a lobby. Idempotent per (game, player_hash).
    pub async fn join_lobby(
        &self,
        game_id: GameId,
        player_hash: [u8; 32],
        at_block: BlockHeight,
    ) -> Result<JoinOutcome, EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.lobbies.join(game_id, player_hash, at_block).await
    }

    /// Close a lobby. Idempotent.
    pub async fn close_lobby(&self, game_id: GameId) -> Result<(), EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.lobbies.close(game_id).await
    }

    /// Deliver a lobby quorum-timeout callback.
    pub async fn on_lobby_timeout(
        &self,
        game_id: GameId,
        block_height: BlockHeight,
    ) -> Result<LobbyTimeoutOutcome, EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;
        self.lobbies.on_timeout(game_id, block_height).await
    }

    /// Commit the final roster and start the game.
    ///
    /// Stores the leaf digests the membership tree is built from; the
    /// tree itself is rebuilt deterministically on demand and never
    /// mutated afterwards.
    pub async fn start_game(
        &self,
        game_id: GameId,
        leaves: Vec<Digest32>,
        werewolf_count: u32,
        at_block: BlockHeight,
    ) -> Result<(), EngineError> {
        let lock = self.game_lock(game_id);
        let _guard = lock.lock().await;

        // Fail before any write if the roster cannot fit the tree or the
        // ballot target encoding (player indices are u8, targets <= 99)
        let max_players = ballot::MAX_TARGET as usize + 1;
        if leaves.len() > max_players {
            return Err(EngineError::RosterTooLarge {
                players: leaves.len(),
                max: max_players,
            });
        }
        MembershipTree::build(&leaves, self.config.tree_depth)?;
        self.store.put_roster_leaves(game_id, &leaves).await?;

        if let Some(mut game) = self.store.game(game_id).await? {
            game.player_count = leaves.len() as u32;
            game.werewolf_count = werewolf_count;
            game.alive = (0..leaves.len() as u8).collect();
            self.store.upsert_game(&game).await?;
        } else {
            debug!(game = game_id, "start_game without game record; roster stored");
        }

        info!(
            game = game_id,
            players = leaves.len(),
            werewolves = werewolf_count,
            block = at_block,
            "roster committed"
        );
        Ok(())
    }

    /// Build a sealed ballot plus membership proof for a voter.
    ///
    /// The ciphertext only the tally authority can open; the proof shows
    /// the voter holds *some* slot in the committed roster without
    /// revealing which. Both go to the proving circuit together.
    pub async fn submit_ballot(
        &self,
        voter_idx: PlayerIdx,
        target_idx: PlayerIdx,
        round: u8,
        phase: Phase,
        game_id: GameId,
    ) -> Result<SubmittedBallot, EngineError> {
        let tally_pub = self.tally_pub.as_ref().ok_or(EngineError::MissingTallyKey)?;

        let leaves = self
            .store
            .roster_leaves(game_id)
            .await?
            .ok_or(EngineError::RosterNotCommitted(game_id))?;

        let tree = MembershipTree::build(&leaves, self.config.tree_depth)?;
        let proof = tree.proof(voter_idx as usize)?;

        let plaintext = BallotPlaintext {
            target: target_idx,
            round,
            salt: (OsRng.next_u32() % 1000) as u16,
        };
        let ciphertext = ballot::seal(&plaintext, tally_pub, &mut OsRng)?.to_vec();

        debug!(
            game = game_id,
            round,
            phase = %phase,
            "ballot sealed with membership proof"
        );
        Ok(SubmittedBallot { ciphertext, proof })
    }

    /// Resolve a round from decrypted vote targets (tally authority path).
    pub fn resolve_round(
        &self,
        votes: &[PlayerIdx],
        alive: &[PlayerIdx],
        phase: Phase,
        game_id: GameId,
        round: u8,
    ) -> TallyOutcome {
        tally::resolve(votes, alive, phase, game_id, round)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::hash_bytes;
    use crate::sched::RecordingScheduler;
    use crate::store::MemoryStore;
    use k256::SecretKey;

    fn coordinator_with_key() -> (Coordinator, SecretKey) {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let coordinator = Coordinator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingScheduler::new()),
            Some(secret.public_key()),
            EngineConfig::default(),
        );
        (coordinator, secret)
    }

    fn roster(n: u8) -> Vec<Digest32> {
        (0..n).map(|i| hash_bytes(&[i])).collect()
    }

    #[tokio::test]
    async fn test_submit_ballot_roundtrips_through_tally_key() {
        let (coordinator, secret) = coordinator_with_key();
        coordinator
            .start_game(1, roster(6), 2, 100)
            .await
            .unwrap();

        let submitted = coordinator
            .submit_ballot(2, 5, 3, Phase::Night, 1)
            .await
            .unwrap();

        assert_eq!(submitted.proof.depth(), EngineConfig::default().tree_depth);
        let plaintext = ballot::open(&submitted.ciphertext, &secret).unwrap();
        assert_eq!(plaintext.target, 5);
        assert_eq!(plaintext.round, 3);
        assert!(plaintext.salt <= 999);
    }

    #[tokio::test]
    async fn test_start_game_rejects_oversized_roster() {
        let (coordinator, _) = coordinator_with_key();
        // 101 leaves fit the default depth-7 tree but not the u8/99-target
        // player index space
        let err = coordinator
            .start_game(1, roster(101), 2, 100)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RosterTooLarge {
                players: 101,
                max: 100
            }
        ));
        assert!(coordinator.store.roster_leaves(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_ballot_requires_roster() {
        let (coordinator, _) = coordinator_with_key();
        let err = coordinator
            .submit_ballot(0, 1, 1, Phase::Night, 42)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RosterNotCommitted(42)));
    }

    #[tokio::test]
    async fn test_submit_ballot_requires_tally_key() {
        let coordinator = Coordinator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingScheduler::new()),
            None,
            EngineConfig::default(),
        );
        let err = coordinator
            .submit_ballot(0, 1, 1, Phase::Night, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingTallyKey));
    }

    #[tokio::test]
    async fn test_membership_proof_verifies_against_committed_roster() {
        let (coordinator, _) = coordinator_with_key();
        let leaves = roster(5);
        coordinator
            .start_game(1, leaves.clone(), 1, 100)
            .await
            .unwrap();

        let submitted = coordinator
            .submit_ballot(3, 0, 1, Phase::Day, 1)
            .await
            .unwrap();

        let tree = MembershipTree::build(&leaves, EngineConfig::default().tree_depth).unwrap();
        assert!(MembershipTree::verify(
            &tree.root(),
            &submitted.proof,
            &leaves[3]
        ));
    }
}
