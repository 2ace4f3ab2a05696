//! Persistence Gateway
//!
//! Narrow request/response interface over the relational backend: point
//! queries plus idempotent, conflict-safe upserts keyed by each record's
//! natural key. No cross-entity transactions are assumed. A gateway failure
//! is fatal for the current event - there is no internal retry; upstream
//! at-least-once redelivery plus these idempotent writes is the recovery
//! path.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::hash::Digest32;
use crate::game::types::{
    AliveRow, Game, GameId, LobbyPlayerRow, LobbyRecord, PlayerIdx, Punishment, RoundKey,
    RoundRecord,
};

pub mod memory;

pub use memory::MemoryStore;

/// Gateway failure. Always fatal for the event being processed.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend round-trip failed.
    #[error("persistence gateway error: {0}")]
    Gateway(String),
}

/// Result alias for gateway calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Point queries and idempotent upserts over game records.
///
/// Every write keyed by its record's natural key must be safe to replay:
/// duplicate delivery of the same event must not double-create rows or
/// double-queue punishments.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Fetch a game by id.
    async fn game(&self, game_id: GameId) -> StoreResult<Option<Game>>;

    /// Insert or replace a game record.
    async fn upsert_game(&self, game: &Game) -> StoreResult<()>;

    /// Fetch a round by key.
    async fn round(&self, key: &RoundKey) -> StoreResult<Option<RoundRecord>>;

    /// Insert a round unless its key already exists.
    /// Returns whether the row was newly created.
    async fn insert_round_if_absent(&self, record: &RoundRecord) -> StoreResult<bool>;

    /// Mirror the ledger's submitted-vote counter onto an existing round.
    async fn set_round_votes(&self, key: &RoundKey, votes_submitted: u32) -> StoreResult<()>;

    /// Flip a round's resolved flag (monotonic; replay-safe).
    async fn mark_round_resolved(&self, key: &RoundKey) -> StoreResult<()>;

    /// Record a living player at round start. Idempotent per
    /// (key, player_idx).
    async fn insert_alive_row(&self, row: &AliveRow) -> StoreResult<()>;

    /// Living player indices for a round, ascending.
    async fn alive_rows(&self, key: &RoundKey) -> StoreResult<Vec<PlayerIdx>>;

    /// Queue a punishment. Idempotent per (game_id, player_idx, reason).
    async fn queue_punishment(&self, punishment: &Punishment) -> StoreResult<()>;

    /// All punishments queued for a game.
    async fn punishments(&self, game_id: GameId) -> StoreResult<Vec<Punishment>>;

    /// Fetch a lobby by game id.
    async fn lobby(&self, game_id: GameId) -> StoreResult<Option<LobbyRecord>>;

    /// Insert a lobby unless one exists. Returns whether it was created.
    async fn insert_lobby_if_absent(&self, lobby: &LobbyRecord) -> StoreResult<bool>;

    /// Overwrite a lobby's player count.
    async fn set_lobby_player_count(&self, game_id: GameId, player_count: u32) -> StoreResult<()>;

    /// Flip a lobby's closed flag (monotonic; replay-safe).
    async fn close_lobby(&self, game_id: GameId) -> StoreResult<()>;

    /// Append a lobby membership row. Returns false if the
    /// (game_id, player_hash) pair already joined.
    async fn insert_lobby_player(&self, row: &LobbyPlayerRow) -> StoreResult<bool>;

    /// Membership rows for a lobby, in join order.
    async fn lobby_players(&self, game_id: GameId) -> StoreResult<Vec<LobbyPlayerRow>>;

    /// Committed roster leaf digests for a game, if the game started.
    async fn roster_leaves(&self, game_id: GameId) -> StoreResult<Option<Vec<Digest32>>>;

    /// Store the committed roster leaf digests (written once at game start).
    async fn put_roster_leaves(&self, game_id: GameId, leaves: &[Digest32]) -> StoreResult<()>;

    /// Rounds of a game with `resolved = false` and a timeout at or
    /// before `block_height`. Backstop query for the liveness sweep.
    async fn overdue_rounds(&self, game_id: GameId, block_height: u64)
        -> StoreResult<Vec<RoundKey>>;
}
