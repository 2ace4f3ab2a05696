//! Game Record Definitions
//!
//! Persisted shapes for games, rounds, roster snapshots, punishments
//! and lobbies, plus the ledger snapshot the engine consumes. All keys
//! are game-scoped so distinct games never contend.

use serde::{Deserialize, Serialize};

/// Ledger-assigned game identifier.
pub type GameId = u64;

/// Height of a processed ledger block.
pub type BlockHeight = u64;

/// Position of a player in the committed roster (0-based, < 100).
pub type PlayerIdx = u8;

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase of a game.
///
/// Night and Day are the voting phases; Lobby and Finished bracket them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum Phase {
    /// Roster still assembling.
    #[default]
    Lobby,
    /// Werewolves vote in secret.
    Night,
    /// The village votes openly-counted (contents still sealed).
    Day,
    /// Game over.
    Finished,
}

impl Phase {
    /// Whether this phase runs a voting round.
    pub fn is_voting(self) -> bool {
        matches!(self, Phase::Night | Phase::Day)
    }

    /// Stable tag used in reason strings, logs and seed derivation.
    pub fn tag(self) -> u8 {
        match self {
            Phase::Lobby => 0,
            Phase::Night => 1,
            Phase::Day => 2,
            Phase::Finished => 3,
        }
    }

    /// Lowercase name for logs and reason strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Night => "night",
            Phase::Day => "day",
            Phase::Finished => "finished",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// GAME
// =============================================================================

/// Top-level game record. Created by lobby creation, mutated only by
/// the round and lobby lifecycles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Game identifier.
    pub game_id: GameId,
    /// Total players in the committed roster.
    pub player_count: u32,
    /// Werewolves among them.
    pub werewolf_count: u32,
    /// Block the game was created at.
    pub created_at_block: BlockHeight,
    /// Current round number.
    pub round: u8,
    /// Current phase.
    pub phase: Phase,
    /// Indices of living players, ascending.
    pub alive: Vec<PlayerIdx>,
    /// Terminal flag, monotonic false -> true.
    pub finished: bool,
}

// =============================================================================
// ROUND
// =============================================================================

/// Unique key of one voting round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundKey {
    /// Owning game.
    pub game_id: GameId,
    /// Round number.
    pub round: u8,
    /// Voting phase (Night or Day).
    pub phase: Phase,
}

impl std::fmt::Display for RoundKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "game {} round {} {}", self.game_id, self.round, self.phase)
    }
}

/// Per-round voting record. At most one row per key;
/// `votes_submitted <= alive_count`; `resolved` is monotonic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round key.
    pub key: RoundKey,
    /// Living players when the round opened.
    pub alive_count: u32,
    /// Ledger's submitted-vote counter, mirrored on each snapshot.
    pub votes_submitted: u32,
    /// Block at which the vote timeout fires.
    pub timeout_block: Option<BlockHeight>,
    /// Whether the round has been resolved.
    pub resolved: bool,
}

/// One living player at round start. Immutable once written - the
/// ground truth for "who needed to act", since individual ballot
/// identity is never known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveRow {
    /// Owning round.
    pub key: RoundKey,
    /// Living player's roster index.
    pub player_idx: PlayerIdx,
}

// =============================================================================
// PUNISHMENT
// =============================================================================

/// Why a punishment was queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishReason {
    /// Selected to carry a missed-vote penalty for a round.
    MissedVote {
        /// Round the vote was missed in.
        round: u8,
        /// Phase the vote was missed in.
        phase: Phase,
    },
}

impl PunishReason {
    /// Stable reason tag, e.g. `missed_vote:night:3`.
    pub fn tag(&self) -> String {
        match self {
            PunishReason::MissedVote { round, phase } => {
                format!("missed_vote:{}:{}", phase.as_str(), round)
            }
        }
    }
}

/// Punishment queued by timeout resolution, consumed externally.
/// Unique per (game_id, player_idx, reason).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    /// Owning game.
    pub game_id: GameId,
    /// Punished roster index.
    pub player_idx: PlayerIdx,
    /// Why it was queued.
    pub reason: PunishReason,
    /// Block the timeout resolved at.
    pub created_at_block: BlockHeight,
    /// Whether the external consumer has executed it.
    pub executed: bool,
}

// =============================================================================
// LOBBY
// =============================================================================

/// Pre-game lobby record. `closed` is monotonic and terminal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyRecord {
    /// Game the lobby assembles.
    pub game_id: GameId,
    /// Advertised capacity. Advisory only: join does not enforce it
    /// (latent upstream behavior, kept until product confirms a change).
    pub max_players: u32,
    /// Players joined so far.
    pub player_count: u32,
    /// Block the lobby was created at.
    pub created_at_block: BlockHeight,
    /// Block at which the quorum timeout fires.
    pub timeout_block: BlockHeight,
    /// Terminal flag.
    pub closed: bool,
}

/// Append-only lobby membership row, unique per (game_id, player_hash).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayerRow {
    /// Owning game.
    pub game_id: GameId,
    /// Anonymized player commitment.
    pub player_hash: [u8; 32],
    /// Block the player joined at.
    pub joined_at_block: BlockHeight,
}

// =============================================================================
// LEDGER SNAPSHOT
// =============================================================================

/// Per-game view of on-chain contract state after a processed block.
/// Delivered monotonically per game; at-least-once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Game the snapshot describes.
    pub game_id: GameId,
    /// Round reported by the contract.
    pub round: u8,
    /// Phase reported by the contract.
    pub phase: Phase,
    /// Living roster indices, ascending.
    pub alive: Vec<PlayerIdx>,
    /// Contract's submitted-vote counter.
    pub votes_submitted: u32,
    /// Height of the processed block.
    pub block_height: BlockHeight,
}

impl Snapshot {
    /// Round key this snapshot addresses (voting phases only).
    pub fn round_key(&self) -> RoundKey {
        RoundKey {
            game_id: self.game_id,
            round: self.round,
            phase: self.phase,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
